//! Processing history kept in `History-<n>` header keys.
//!
//! A [`History`] collects the argument vector of the running program and the
//! history lines read from an input header. Writing it back emits the read
//! lines under their own keys and the new command line under the next free
//! number.

use std::borrow::Cow;
use std::io::Write;

pub const HISTORY_KEY_PREFIX: &str = "History-";

/// Characters that force an argument into quotes, besides whitespace.
const SHELL_SPECIAL: &[char] = &[
	'"', '\'', '\\', '$', '`', '*', '?', '[', ']', '(', ')', '{', '}', '<', '>', '|', '&', ';', '#', '~', '!',
];

/// `History-<n>` for `n >= 1`.
pub fn history_key(number: u32) -> String {
	format!("{}{}", HISTORY_KEY_PREFIX, number)
}

/// Number of a `History-<n>` key.
pub fn history_number(key: &str) -> Option<u32> {
	let rest = key.trim().strip_prefix(HISTORY_KEY_PREFIX)?;
	if rest.is_empty() || !rest.bytes().all(|b| b.is_ascii_digit()) {
		return None;
	}
	rest.parse().ok().filter(|n| *n > 0)
}

fn needs_quotes(arg: &str) -> bool {
	arg.is_empty() || arg.chars().any(|c| c.is_whitespace() || SHELL_SPECIAL.contains(&c))
}

/// Quotes an argument so that a shell would read it back as one word.
pub fn quote(arg: &str) -> Cow<'_, str> {
	if !needs_quotes(arg) {
		return Cow::Borrowed(arg);
	}
	let mut quoted = String::with_capacity(arg.len() + 2);
	quoted.push('"');
	for c in arg.chars() {
		if matches!(c, '"' | '\\' | '$' | '`') {
			quoted.push('\\');
		}
		quoted.push(c);
	}
	quoted.push('"');
	Cow::Owned(quoted)
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Argument {
	text: String,
	required: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct History {
	arguments: Vec<Argument>,
	skip_next: bool,
	/// Lines read from a header, ordered by number.
	lines: Vec<(u32, String)>,
}

impl History {
	pub fn new() -> Self {
		Self::default()
	}

	/// Marks the next argument as discardable.
	pub fn skip(&mut self) {
		self.skip_next = true;
	}

	/// Makes every argument appended so far required.
	pub fn take(&mut self) {
		for argument in &mut self.arguments {
			argument.required = true;
		}
		self.skip_next = false;
	}

	pub fn argv(&mut self, arg: &str) {
		let required = !std::mem::take(&mut self.skip_next);
		self.arguments.push(Argument { text: arg.to_string(), required });
	}

	/// The command line; discardable arguments at the end are dropped.
	pub fn line(&self) -> String {
		let keep = self.arguments.iter().rposition(|a| a.required).map_or(0, |last| last + 1);
		self.arguments[..keep]
			.iter()
			.map(|a| quote(&a.text))
			.collect::<Vec<_>>()
			.join(" ")
	}

	/// Replaces the read lines with the history entries among `entries`.
	pub fn read_entries<I, K, V>(&mut self, entries: I) -> usize
	where
		I: IntoIterator<Item = (K, V)>,
		K: AsRef<str>,
		V: Into<String>,
	{
		self.lines = entries
			.into_iter()
			.filter_map(|(key, value)| history_number(key.as_ref()).map(|n| (n, value.into())))
			.collect();
		self.lines.sort_by_key(|(n, _)| *n);
		self.lines.dedup_by_key(|(n, _)| *n);
		self.lines.len()
	}

	/// Previously read lines as `(key, line)`.
	pub fn lines(&self) -> impl Iterator<Item = (String, &str)> + '_ {
		self.lines.iter().map(|(n, line)| (history_key(*n), line.as_str()))
	}

	/// Entries to store in a header that already holds history numbers
	/// `existing`: the read lines, then the command line under the next
	/// unused number.
	pub fn entries(&self, existing: impl IntoIterator<Item = u32>) -> Vec<(String, String)> {
		let mut out: Vec<(String, String)> = self.lines().map(|(k, v)| (k, v.to_string())).collect();
		let line = self.line();
		if !line.is_empty() {
			let last = existing
				.into_iter()
				.chain(self.lines.iter().map(|(n, _)| *n))
				.max()
				.unwrap_or(0);
			out.push((history_key(last + 1), line));
		}
		out
	}

	pub fn print<W: Write>(&self, out: &mut W, name: &str) -> std::io::Result<()> {
		writeln!(out, "history {}", name)?;
		for (key, line) in self.lines() {
			writeln!(out, "  {} = {}", key, line)?;
		}
		writeln!(out, "  argv = {}", self.line())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_quote() {
		assert_eq!(quote("plain-arg.edf"), "plain-arg.edf");
		assert_eq!(quote("two words"), "\"two words\"");
		assert_eq!(quote("*.edf"), "\"*.edf\"");
		assert_eq!(quote("a\"b"), "\"a\\\"b\"");
		assert_eq!(quote(""), "\"\"");
		assert_eq!(quote("$HOME"), "\"\\$HOME\"");
	}

	#[test]
	fn test_history_number() {
		assert_eq!(history_number("History-3"), Some(3));
		assert_eq!(history_number("History-0"), None);
		assert_eq!(history_number("History-x"), None);
		assert_eq!(history_number("Title"), None);
	}

	#[test]
	fn test_skipped_tail_is_dropped() {
		let mut history = History::new();
		history.argv("saxs_mac");
		history.skip();
		history.argv("-i");
		history.argv("in.edf");
		history.skip();
		history.argv("--verbose");
		assert_eq!(history.line(), "saxs_mac -i in.edf");
	}

	#[test]
	fn test_take_keeps_skipped() {
		let mut history = History::new();
		history.argv("prog");
		history.skip();
		history.argv("--dry");
		history.take();
		assert_eq!(history.line(), "prog --dry");
	}

	#[test]
	fn test_entries_continue_numbering() {
		let mut history = History::new();
		let read = history.read_entries(vec![
			("Title", "x"),
			("History-2", "second"),
			("History-1", "first"),
		]);
		assert_eq!(read, 2);
		history.argv("prog");
		history.argv("out file.edf");
		let entries = history.entries([4]);
		assert_eq!(entries[0], ("History-1".to_string(), "first".to_string()));
		assert_eq!(entries[1], ("History-2".to_string(), "second".to_string()));
		assert_eq!(entries[2], ("History-5".to_string(), "prog \"out file.edf\"".to_string()));
	}

	#[test]
	fn test_empty_line_not_written() {
		let history = History::new();
		assert!(history.entries(std::iter::empty()).is_empty());
	}
}
