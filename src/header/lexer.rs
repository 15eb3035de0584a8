//! Tokenizer for `{ key = value ; ... }` headers.

use crate::error::{BdfError, Result};

/// One `key = value ;` entry as found on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEntry {
	pub key: String,
	/// Unescaped value. Header text is read as UTF-8; invalid sequences in
	/// keys or values become U+FFFD and are written back that way.
	pub value: String,
	/// Absolute position of the first key byte.
	pub key_offset: u64,
	/// Absolute position of the first value byte.
	pub value_offset: u64,
	/// Bytes between `value_offset` and the terminating `;`.
	pub value_capacity: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedHeader {
	pub entries: Vec<RawEntry>,
	/// Absolute position of the opening `{`.
	pub open: u64,
	/// Absolute position just past the closing `}` line.
	pub end: u64,
}

#[derive(Debug, PartialEq)]
pub enum Scan {
	Complete(ParsedHeader),
	/// The buffer ended inside the header.
	Incomplete,
}

fn is_space(b: u8) -> bool {
	matches!(b, b' ' | b'\t' | b'\r' | b'\n' | 0x0b | 0x0c)
}

/// Offset of the header's `{` after leading whitespace, if the buffer starts
/// a header. `None` for whitespace-only input.
pub fn find_header_start(buf: &[u8]) -> Option<std::result::Result<usize, u8>> {
	let pos = buf.iter().position(|&b| !is_space(b))?;
	Some(if buf[pos] == b'{' { Ok(pos) } else { Err(buf[pos]) })
}

/// True if the leading bytes look like a block header.
pub fn sniff(buf: &[u8]) -> bool {
	buf.starts_with(b"{") || buf.starts_with(b"\n{") || buf.starts_with(b"\r\n{")
}

fn unescape(ch: u8) -> Option<&'static [u8]> {
	Some(match ch {
		b's' => b" ",
		b't' => b"\t",
		b'v' => b"\x0b",
		b'f' => b"\x0c",
		b'r' => b"\r",
		b'n' | b'l' => b"\n",
		b'(' => b"{",
		b')' => b"}",
		b':' => b";",
		b'\\' => b"\\",
		b'\r' | b'\n' => b"",
		_ => return None,
	})
}

/// Collapses runs of whitespace inside a key to one space.
fn normalize_key(raw: &[u8]) -> String {
	let text = String::from_utf8_lossy(raw);
	text.split_ascii_whitespace().collect::<Vec<_>>().join(" ")
}

/// Strips one `"..."` wrapping.
fn strip_quotes(mut value: Vec<u8>) -> Vec<u8> {
	if value.len() >= 2 && value[0] == b'"' && value[value.len() - 1] == b'"' {
		value.pop();
		value.remove(0);
	}
	value
}

/// Parses one header starting at `buf[0]`; `base` is the absolute position of
/// `buf[0]` in the file. With `eof` set, a closing brace without its line
/// feed at the very end of `buf` still completes the header.
pub fn scan_header(buf: &[u8], base: u64, eof: bool) -> Result<Scan> {
	let open = match find_header_start(buf) {
		None => return Ok(Scan::Incomplete),
		Some(Ok(pos)) => pos,
		Some(Err(byte)) => {
			return Err(BdfError::CouldNotFindHeader {
				offset: base,
				reason: format!("expected '{{', found byte 0x{:02x}", byte),
			})
		}
	};
	let mut entries = Vec::new();
	let mut i = open + 1;
	loop {
		while i < buf.len() && is_space(buf[i]) {
			i += 1;
		}
		if i >= buf.len() {
			return Ok(Scan::Incomplete);
		}
		match buf[i] {
			b'}' => {
				i += 1;
				if buf.get(i) == Some(&b'\r') {
					i += 1;
				}
				if i >= buf.len() && !eof {
					return Ok(Scan::Incomplete);
				}
				if buf.get(i) == Some(&b'\n') {
					i += 1;
				}
				return Ok(Scan::Complete(ParsedHeader { entries, open: base + open as u64, end: base + i as u64 }));
			}
			b'#' => match buf[i..].iter().position(|&b| b == b'\n') {
				Some(n) => i += n + 1,
				None => return Ok(Scan::Incomplete),
			},
			_ => {
				let key_start = i;
				while i < buf.len() && buf[i] != b'=' {
					if buf[i] == b';' || buf[i] == b'}' {
						return Err(BdfError::CouldNotFindHeader {
							offset: base + key_start as u64,
							reason: format!("entry without '=': {:?}", normalize_key(&buf[key_start..i])),
						});
					}
					i += 1;
				}
				if i >= buf.len() {
					return Ok(Scan::Incomplete);
				}
				let key = normalize_key(&buf[key_start..i]);
				i += 1;
				while i < buf.len() && matches!(buf[i], b' ' | b'\t') {
					i += 1;
				}
				let value_start = i;
				let mut value = Vec::new();
				// length of `value` up to the last byte that is not unescaped whitespace
				let mut significant = 0;
				loop {
					let Some(&b) = buf.get(i) else {
						return Ok(Scan::Incomplete);
					};
					match b {
						b';' => break,
						b'\\' => {
							let Some(&next) = buf.get(i + 1) else {
								return Ok(Scan::Incomplete);
							};
							match unescape(next) {
								Some(bytes) => value.extend_from_slice(bytes),
								None => value.extend_from_slice(&[b'\\', next]),
							}
							significant = value.len();
							i += 2;
							if next == b'\r' && buf.get(i) == Some(&b'\n') {
								i += 1;
							}
						}
						b'\r' | b'\n' => i += 1,
						b' ' | b'\t' | 0x0b | 0x0c => {
							value.push(b);
							i += 1;
						}
						_ => {
							value.push(b);
							significant = value.len();
							i += 1;
						}
					}
				}
				let value_capacity = i - value_start;
				i += 1;
				value.truncate(significant);
				let value = strip_quotes(value);
				entries.push(RawEntry {
					key,
					value: String::from_utf8_lossy(&value).into_owned(),
					key_offset: base + key_start as u64,
					value_offset: base + value_start as u64,
					value_capacity,
				});
			}
		}
	}
}
