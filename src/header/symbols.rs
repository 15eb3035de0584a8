//! Per-block symbol table.

use super::emit::{escape_value, split_value};
use super::lexer::RawEntry;
use crate::error::{BdfError, Result};
use std::cmp::Ordering;

/// Keys with this prefix describe the binary layout and cannot be deleted.
pub const RESERVED_PREFIX: &str = "EDF_";

/// Separator between a key and its continuation depth.
pub const CONTINUATION_MARK: char = '~';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortMode {
	/// Case-insensitive, digit runs compared as numbers.
	#[default]
	Alphanumeric,
	CaseSensitive,
	/// Numeric keys by value, others alphanumerically after them.
	Numeric,
}

/// Keys that read back unchanged: no header punctuation, no leading `#`
/// (a comment line) and no whitespace the lexer would collapse.
pub fn is_valid_key(key: &str) -> bool {
	!key.is_empty()
		&& !key.starts_with('#')
		&& !key.contains(['=', ';', '{', '}'])
		&& key.split(' ').all(|word| !word.is_empty() && !word.contains(char::is_whitespace))
}

pub fn is_reserved(key: &str) -> bool {
	key.len() >= RESERVED_PREFIX.len()
		&& key.is_char_boundary(RESERVED_PREFIX.len())
		&& key[..RESERVED_PREFIX.len()].eq_ignore_ascii_case(RESERVED_PREFIX)
}

/// Splits `base~N` into `(base, N)`; plain keys have depth 0.
pub fn split_key(key: &str) -> (&str, u32) {
	if let Some((base, digits)) = key.rsplit_once(CONTINUATION_MARK) {
		if !base.is_empty() && !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
			match digits.parse::<u32>() {
				Ok(depth) if depth >= 1 => return (base, depth),
				_ => {}
			}
		}
	}
	(key, 0)
}

pub fn continuation_key(base: &str, depth: u32) -> String {
	if depth == 0 {
		base.to_string()
	} else {
		format!("{}{}{}", base, CONTINUATION_MARK, depth)
	}
}

/// Natural, case-insensitive comparison.
pub fn compare_alphanumeric(a: &str, b: &str) -> Ordering {
	let (a, b) = (a.as_bytes(), b.as_bytes());
	let (mut i, mut j) = (0, 0);
	while i < a.len() && j < b.len() {
		if a[i].is_ascii_digit() && b[j].is_ascii_digit() {
			let si = i;
			while i < a.len() && a[i].is_ascii_digit() {
				i += 1;
			}
			let sj = j;
			while j < b.len() && b[j].is_ascii_digit() {
				j += 1;
			}
			let da = trim_zeros(&a[si..i]);
			let db = trim_zeros(&b[sj..j]);
			let ord = da.len().cmp(&db.len()).then_with(|| da.cmp(db));
			if ord != Ordering::Equal {
				return ord;
			}
		} else {
			let ord = a[i].to_ascii_lowercase().cmp(&b[j].to_ascii_lowercase());
			if ord != Ordering::Equal {
				return ord;
			}
			i += 1;
			j += 1;
		}
	}
	(a.len() - i).cmp(&(b.len() - j)).then_with(|| a.to_ascii_lowercase().cmp(&b.to_ascii_lowercase()))
}

fn trim_zeros(digits: &[u8]) -> &[u8] {
	let first = digits.iter().position(|&d| d != b'0').unwrap_or(digits.len());
	&digits[first..]
}

pub(crate) fn compare_base(mode: SortMode, a: &str, b: &str) -> Ordering {
	match mode {
		SortMode::Alphanumeric => compare_alphanumeric(a, b),
		SortMode::CaseSensitive => a.cmp(b),
		SortMode::Numeric => match (a.trim().parse::<f64>(), b.trim().parse::<f64>()) {
			(Ok(x), Ok(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal).then_with(|| a.cmp(b)),
			(Ok(_), Err(_)) => Ordering::Less,
			(Err(_), Ok(_)) => Ordering::Greater,
			(Err(_), Err(_)) => compare_alphanumeric(a, b),
		},
	}
}

/// Two-level order: reserved keys first, then base key, then depth.
pub fn compare_keys(mode: SortMode, a: &str, b: &str) -> Ordering {
	let (base_a, depth_a) = split_key(a);
	let (base_b, depth_b) = split_key(b);
	is_reserved(base_b)
		.cmp(&is_reserved(base_a))
		.then_with(|| compare_base(mode, base_a, base_b))
		.then_with(|| depth_a.cmp(&depth_b))
}

#[derive(Debug, Clone, PartialEq)]
pub struct Symbol {
	pub key: String,
	/// Unescaped value of this entry alone.
	pub value: String,
	pub key_offset: Option<u64>,
	pub value_offset: Option<u64>,
	/// Bytes available on disk for the escaped value.
	pub value_capacity: usize,
	changed: bool,
}

impl Symbol {
	fn new(key: String, value: String) -> Self {
		Self { key, value, key_offset: None, value_offset: None, value_capacity: 0, changed: true }
	}

	pub fn base(&self) -> &str {
		split_key(&self.key).0
	}

	pub fn depth(&self) -> u32 {
		split_key(&self.key).1
	}

	pub fn is_changed(&self) -> bool {
		self.changed
	}

	pub fn is_on_disk(&self) -> bool {
		self.value_offset.is_some()
	}
}

#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
	symbols: Vec<Symbol>,
	mode: SortMode,
	/// A key was added or removed, or a value outgrew its disk slot.
	relayout: bool,
}

impl SymbolTable {
	pub fn new(mode: SortMode) -> Self {
		Self { symbols: Vec::new(), mode, relayout: false }
	}

	/// Table for a header read from disk; nothing is marked changed.
	pub fn from_entries(entries: Vec<RawEntry>, mode: SortMode) -> Self {
		let mut table = Self::new(mode);
		for entry in entries {
			let symbol = Symbol {
				key: entry.key,
				value: entry.value,
				key_offset: Some(entry.key_offset),
				value_offset: Some(entry.value_offset),
				value_capacity: entry.value_capacity,
				changed: false,
			};
			match table.search(&symbol.key) {
				// a repeated key: the later entry wins
				Ok(i) => table.symbols[i] = symbol,
				Err(i) => table.symbols.insert(i, symbol),
			}
		}
		table
	}

	fn search(&self, key: &str) -> std::result::Result<usize, usize> {
		self.symbols.binary_search_by(|s| compare_keys(self.mode, &s.key, key))
	}

	pub fn mode(&self) -> SortMode {
		self.mode
	}

	pub fn len(&self) -> usize {
		self.symbols.len()
	}

	pub fn is_empty(&self) -> bool {
		self.symbols.is_empty()
	}

	/// Symbols in table order.
	pub fn iter(&self) -> impl Iterator<Item = &Symbol> {
		self.symbols.iter()
	}

	pub fn keys(&self) -> Vec<&str> {
		self.symbols.iter().map(|s| s.key.as_str()).collect()
	}

	pub fn get(&self, key: &str) -> Option<&Symbol> {
		self.search(key).ok().map(|i| &self.symbols[i])
	}

	pub fn contains(&self, key: &str) -> bool {
		self.search(key).is_ok()
	}

	/// Sets one entry. An on-disk value keeps its slot when the new value fits.
	pub fn insert(&mut self, key: &str, value: &str) -> Result<()> {
		let key = key.trim();
		if !is_valid_key(key) {
			return Err(BdfError::CouldNotInsertSymbol(key.to_string()));
		}
		match self.search(key) {
			Ok(i) => {
				let symbol = &mut self.symbols[i];
				if symbol.value == value {
					return Ok(());
				}
				if symbol.is_on_disk() && escape_value(value).len() > symbol.value_capacity {
					symbol.key_offset = None;
					symbol.value_offset = None;
					self.relayout = true;
				}
				symbol.value = value.to_string();
				symbol.changed = true;
			}
			Err(i) => {
				self.symbols.insert(i, Symbol::new(key.to_string(), value.to_string()));
				self.relayout = true;
			}
		}
		Ok(())
	}

	/// Sets a logical value, spreading it over `key~1`, `key~2`, ... as needed.
	///
	/// `width(i)` bounds the escaped length of part `i`. Continuation entries
	/// beyond the new depth are removed.
	pub fn insert_as_string(&mut self, key: &str, logical: &str, width: impl Fn(usize) -> usize) -> Result<()> {
		let base = split_key(key.trim()).0.to_string();
		let parts = split_value(logical, width);
		for (depth, part) in parts.iter().enumerate() {
			self.insert(&continuation_key(&base, depth as u32), part)?;
		}
		let keep = parts.len() as u32;
		let before = self.symbols.len();
		let mode = self.mode;
		self.symbols.retain(|s| {
			let (b, d) = split_key(&s.key);
			!(d >= keep && compare_base(mode, b, &base) == Ordering::Equal)
		});
		if self.symbols.len() != before {
			self.relayout = true;
		}
		Ok(())
	}

	/// The symbol and its value with all continuation parts appended.
	pub fn lookup(&self, key: &str) -> Option<(&Symbol, String)> {
		let i = self.search(key).ok()?;
		let symbol = &self.symbols[i];
		let mut logical = symbol.value.clone();
		if symbol.depth() == 0 {
			let mut expected = 1;
			for next in &self.symbols[i + 1..] {
				let (b, d) = split_key(&next.key);
				if d != expected || compare_base(self.mode, b, &symbol.key) != Ordering::Equal {
					break;
				}
				logical.push_str(&next.value);
				expected += 1;
			}
		}
		Some((symbol, logical))
	}

	pub fn value(&self, key: &str) -> Option<String> {
		self.lookup(key).map(|(_, v)| v)
	}

	/// Removes `key` and every continuation entry below it.
	pub fn remove(&mut self, key: &str) -> bool {
		let base = split_key(key.trim()).0.to_string();
		let mode = self.mode;
		let before = self.symbols.len();
		self.symbols.retain(|s| compare_base(mode, s.base(), &base) != Ordering::Equal);
		let removed = self.symbols.len() != before;
		self.relayout |= removed;
		removed
	}

	/// Like [`remove`](Self::remove) but refuses layout keys.
	pub fn delete_key(&mut self, key: &str) -> Result<()> {
		if is_reserved(key.trim()) {
			return Err(BdfError::CouldNotDeleteString(key.to_string()));
		}
		if self.remove(key) {
			Ok(())
		} else {
			Err(BdfError::CouldNotFindSymbol { key: key.to_string() })
		}
	}

	/// `(base key, logical value)` for every base key, in table order.
	pub fn logical_entries(&self) -> Vec<(String, String)> {
		self.symbols
			.iter()
			.filter(|s| s.depth() == 0)
			.filter_map(|s| self.lookup(&s.key).map(|(s, v)| (s.key.clone(), v)))
			.collect()
	}

	pub fn is_changed(&self) -> bool {
		self.relayout || self.symbols.iter().any(|s| s.changed)
	}

	pub fn needs_relayout(&self) -> bool {
		self.relayout
	}

	pub fn changed_symbols(&self) -> impl Iterator<Item = &Symbol> {
		self.symbols.iter().filter(|s| s.changed)
	}

	/// Records the layout of a freshly written header and clears change marks.
	pub fn mark_written(&mut self, entries: &[RawEntry]) {
		for entry in entries {
			if let Ok(i) = self.search(&entry.key) {
				let symbol = &mut self.symbols[i];
				symbol.key_offset = Some(entry.key_offset);
				symbol.value_offset = Some(entry.value_offset);
				symbol.value_capacity = entry.value_capacity;
			}
		}
		self.mark_clean();
	}

	pub fn mark_clean(&mut self) {
		self.relayout = false;
		for symbol in &mut self.symbols {
			symbol.changed = false;
		}
	}

	/// Forgets disk positions, e.g. when the header moves.
	pub fn detach(&mut self) {
		for symbol in &mut self.symbols {
			symbol.key_offset = None;
			symbol.value_offset = None;
			symbol.value_capacity = 0;
			symbol.changed = true;
		}
		self.relayout = true;
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn width(_: usize) -> usize {
		10
	}

	#[test]
	fn test_split_key() {
		assert_eq!(split_key("Title~3"), ("Title", 3));
		assert_eq!(split_key("Title"), ("Title", 0));
		assert_eq!(split_key("Title~0"), ("Title~0", 0));
		assert_eq!(split_key("~2"), ("~2", 0));
		assert_eq!(continuation_key("Title", 2), "Title~2");
	}

	#[test]
	fn test_sort_order() {
		let mut table = SymbolTable::default();
		for key in ["title", "Dim_10", "Dim_2", "EDF_BinarySize", "Dim_2~1", "Alpha"] {
			table.insert(key, "v").unwrap();
		}
		assert_eq!(table.keys(), vec!["EDF_BinarySize", "Alpha", "Dim_2", "Dim_2~1", "Dim_10", "title"]);
	}

	#[test]
	fn test_case_insensitive_identity() {
		let mut table = SymbolTable::default();
		table.insert("Title", "a").unwrap();
		table.insert("TITLE", "b").unwrap();
		assert_eq!(table.len(), 1);
		assert_eq!(table.value("title").unwrap(), "b");
	}

	#[test]
	fn test_numeric_mode() {
		let mut table = SymbolTable::new(SortMode::Numeric);
		for key in ["10", "-2", "3", "x"] {
			table.insert(key, "v").unwrap();
		}
		assert_eq!(table.keys(), vec!["-2", "3", "10", "x"]);
	}

	#[test]
	fn test_continuation_reassembly() {
		let mut table = SymbolTable::default();
		let long = "0123456789".repeat(5);
		table.insert_as_string("Long", &long, width).unwrap();
		assert_eq!(table.len(), 5);
		assert!(table.contains("Long~4"));
		assert_eq!(table.value("Long").unwrap(), long);

		table.insert_as_string("Long", "short", width).unwrap();
		assert_eq!(table.len(), 1);
		assert_eq!(table.value("Long").unwrap(), "short");
	}

	#[test]
	fn test_reassembly_stops_at_gap() {
		let mut table = SymbolTable::default();
		table.insert("K", "a").unwrap();
		table.insert("K~1", "b").unwrap();
		table.insert("K~3", "d").unwrap();
		assert_eq!(table.value("K").unwrap(), "ab");
	}

	#[test]
	fn test_remove_and_delete() {
		let mut table = SymbolTable::default();
		table.insert_as_string("Long", &"x".repeat(30), width).unwrap();
		table.insert("EDF_BinarySize", "4").unwrap();
		table.insert("Other", "1").unwrap();
		assert!(table.remove("Long"));
		assert_eq!(table.keys(), vec!["EDF_BinarySize", "Other"]);
		assert!(matches!(table.delete_key("EDF_BinarySize"), Err(BdfError::CouldNotDeleteString(_))));
		assert!(table.delete_key("Missing").unwrap_err().is_not_found());
		table.delete_key("Other").unwrap();
		assert_eq!(table.len(), 1);
	}

	#[test]
	fn test_in_place_slot() {
		let entries = vec![RawEntry {
			key: "EDF_DataBlocks".to_string(),
			value: "1".to_string(),
			key_offset: 3,
			value_offset: 20,
			value_capacity: 4,
		}];
		let mut table = SymbolTable::from_entries(entries, SortMode::default());
		assert!(!table.is_changed());
		table.insert("EDF_DataBlocks", "12").unwrap();
		assert!(table.is_changed());
		assert!(!table.needs_relayout());
		assert_eq!(table.get("EDF_DataBlocks").unwrap().value_offset, Some(20));
		table.insert("EDF_DataBlocks", "12345").unwrap();
		assert!(table.needs_relayout());
		assert_eq!(table.get("EDF_DataBlocks").unwrap().value_offset, None);
	}

	#[test]
	fn test_rejects_bad_keys() {
		let mut table = SymbolTable::default();
		assert!(table.insert("", "x").is_err());
		assert!(table.insert("a;b", "x").is_err());
		assert!(table.insert("#Comment", "x").is_err());
		assert!(table.insert("two  spaces", "x").is_err());
		assert!(table.insert("tab\tkey", "x").is_err());
		assert!(table.insert("line\nbreak", "x").is_err());
		assert!(table.insert("Detector Name", "x").is_ok());
		assert!(table.insert("Dim#2", "x").is_ok());
	}
}
