//! Serializes symbols back into header text.

/// Padding lines are broken after this many columns.
pub const PADDING_COLUMNS: usize = 78;

const OPEN: &str = "{\r\n";
const CLOSE: &str = "\r\n}\n";

fn escape_char(c: char, out: &mut String) {
	match c {
		'\\' => out.push_str("\\\\"),
		'{' => out.push_str("\\("),
		'}' => out.push_str("\\)"),
		';' => out.push_str("\\:"),
		'\n' => out.push_str("\\n"),
		'\r' => out.push_str("\\r"),
		'\t' => out.push_str("\\t"),
		'\x0b' => out.push_str("\\v"),
		'\x0c' => out.push_str("\\f"),
		c => out.push(c),
	}
}

/// Escapes a logical value so that the lexer reads it back unchanged.
pub fn escape_value(value: &str) -> String {
	let mut out = String::with_capacity(value.len() + 4);
	let quoted = value.len() >= 2 && value.starts_with('"') && value.ends_with('"');
	if quoted {
		out.push('"');
	}
	let chars: Vec<char> = value.chars().collect();
	let last = chars.len().saturating_sub(1);
	for (i, &c) in chars.iter().enumerate() {
		if c == ' ' && (i == 0 || i == last) {
			out.push_str("\\s");
		} else {
			escape_char(c, &mut out);
		}
	}
	if quoted {
		out.push('"');
	}
	out
}

fn char_cost(c: char) -> usize {
	match c {
		'\\' | '{' | '}' | ';' | '\n' | '\r' | '\t' | '\x0b' | '\x0c' => 2,
		c => c.len_utf8(),
	}
}

fn escaped_len(chars: &[char]) -> usize {
	let mut len: usize = chars.iter().map(|&c| char_cost(c)).sum();
	if chars.first() == Some(&' ') {
		len += 1;
	}
	if chars.len() > 1 && chars.last() == Some(&' ') {
		len += 1;
	}
	if chars.len() > 1 && chars.first() == Some(&'"') && chars.last() == Some(&'"') {
		len += 2;
	}
	len
}

/// Splits a logical value into continuation parts.
///
/// `width(i)` is the largest escaped length allowed for part `i`. A part is
/// cut after the last space that still fits, or at the width when there is
/// none. Every part holds at least one character.
pub fn split_value(value: &str, width: impl Fn(usize) -> usize) -> Vec<String> {
	let chars: Vec<char> = value.chars().collect();
	let mut parts = Vec::new();
	let mut start = 0;
	while start < chars.len() || parts.is_empty() {
		let limit = width(parts.len());
		if escaped_len(&chars[start..]) <= limit {
			parts.push(chars[start..].iter().collect());
			break;
		}
		let mut end = start + 1;
		while end < chars.len() && escaped_len(&chars[start..end + 1]) <= limit {
			end += 1;
		}
		if let Some(space) = chars[start + 1..end].iter().rposition(|&c| c == ' ') {
			end = start + 1 + space + 1;
		}
		parts.push(chars[start..end].iter().collect());
		start = end;
	}
	parts
}

pub fn format_entry(key: &str, escaped: &str) -> String {
	format!("{} = {} ;\r\n", key, escaped)
}

fn round_up(value: u64, boundary: u64) -> u64 {
	let boundary = boundary.max(1);
	value.div_ceil(boundary).saturating_mul(boundary)
}

/// Padded size of a header whose entries take `body_len` bytes.
pub fn header_size(body_len: usize, boundary: u64, minimum: u64) -> u64 {
	let bare = (OPEN.len() + body_len + CLOSE.len()) as u64;
	round_up(bare.max(minimum), boundary)
}

/// Renders a complete header padded to exactly `size` bytes.
///
/// `size` must be at least `header_size(body.len(), 1, 0)`.
pub fn render_header(body: &str, size: u64) -> Vec<u8> {
	let mut out = Vec::with_capacity(size as usize);
	out.extend_from_slice(OPEN.as_bytes());
	out.extend_from_slice(body.as_bytes());
	let mut remaining = (size as usize).saturating_sub(out.len() + CLOSE.len());
	let mut column = 0;
	while remaining > 0 {
		if column == PADDING_COLUMNS && remaining >= 2 {
			out.extend_from_slice(b"\r\n");
			column = 0;
			remaining -= 2;
		} else {
			out.push(b' ');
			column += 1;
			remaining -= 1;
		}
	}
	out.extend_from_slice(CLOSE.as_bytes());
	out
}

/// Rewritten in place: the escaped value left-aligned in `capacity` bytes.
pub fn patch_value(escaped: &str, capacity: usize) -> Option<Vec<u8>> {
	if escaped.len() > capacity {
		return None;
	}
	let mut out = escaped.as_bytes().to_vec();
	out.resize(capacity, b' ');
	Some(out)
}

/// Trailing payload padding up to the block boundary.
pub fn padded_len(len: u64, boundary: u64) -> u64 {
	round_up(len, boundary)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::header::lexer::{scan_header, Scan};

	fn reparse(value: &str) -> String {
		let body = format_entry("Key", &escape_value(value));
		let text = render_header(&body, header_size(body.len(), 512, 0));
		match scan_header(&text, 0, false).unwrap() {
			Scan::Complete(header) => header.entries[0].value.clone(),
			Scan::Incomplete => panic!("incomplete"),
		}
	}

	#[test]
	fn test_escape_round_trip() {
		for value in [
			"plain",
			" leading and trailing ",
			"semi;colon {braces} back\\slash",
			"tab\there\nnewline\rreturn",
			"\"quoted\"",
			"a \"middle\" quote",
			"",
		] {
			assert_eq!(reparse(value), value);
		}
	}

	#[test]
	fn test_padding_to_boundary() {
		let body = format_entry("Dim_1", "2");
		let size = header_size(body.len(), 512, 0);
		assert_eq!(size, 512);
		let text = render_header(&body, size);
		assert_eq!(text.len(), 512);
		assert!(text.ends_with(b"\r\n}\n"));
		assert!(text.starts_with(b"{\r\n"));
		for line in text.split(|&b| b == b'\n') {
			assert!(line.len() <= PADDING_COLUMNS + 1 || line.starts_with(b"Dim"));
		}
		assert_eq!(header_size(body.len(), 512, 1000), 1024);
		assert_eq!(header_size(body.len(), 1, 0) as usize, 3 + body.len() + 4);
	}

	#[test]
	fn test_split_at_space() {
		// a trailing blank costs two bytes once escaped
		let parts = split_value("aaaa bbbb cccc", |_| 10);
		assert_eq!(parts, vec!["aaaa ", "bbbb cccc"]);
		let parts = split_value("aaaa bbbb cccc", |_| 11);
		assert_eq!(parts, vec!["aaaa bbbb ", "cccc"]);
		assert_eq!(parts.concat(), "aaaa bbbb cccc");
	}

	#[test]
	fn test_split_without_space() {
		let value = "x".repeat(25);
		let parts = split_value(&value, |_| 10);
		assert_eq!(parts.len(), 3);
		assert!(parts.iter().all(|p| p.len() <= 10));
		assert_eq!(parts.concat(), value);
		assert_eq!(split_value("", |_| 10), vec![String::new()]);
	}

	#[test]
	fn test_split_respects_escape_width() {
		let value = "a;b;c;d;e;f";
		let parts = split_value(value, |_| 4);
		assert!(parts.iter().all(|p| escape_value(p).len() <= 4));
		assert_eq!(parts.concat(), value);
	}

	#[test]
	fn test_patch_value() {
		assert_eq!(patch_value("12", 5).unwrap(), b"12   ");
		assert!(patch_value("123456", 5).is_none());
	}
}
