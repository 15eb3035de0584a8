//! Emission order of header keys.
//!
//! The table is a list of patterns. A `*` matches any run of characters; the
//! text after a `*` is matched at its first occurrence in the rest of the key
//! and the matcher never backtracks, so `a*b` matches `axb` but not `abxb`.
//! Comparison ignores case and non-printable characters.

/// Keys that lead every header, in this order, whatever the table says.
pub const BINARY_DESCRIPTION: &[&str] = &[
	"EDF_DataBlockID",
	"EDF_BinaryFileName",
	"EDF_BinaryFilePosition",
	"EDF_BinaryFileSize",
	"EDF_BinarySize",
	"EDF_HeaderSize",
	"EDF_DataFormatVersion",
	"EDF_BlockBoundary",
	"EDF_DataBlocks",
	"EDF_*",
	"ByteOrder",
	"DataType",
	"Dim_*",
	"Size",
	"DataRasterConfiguration",
	"Compression",
	"DataValueOffset",
];

const DEFAULT_TABLE: &[&str] = &[
	"HeaderID",
	"Image",
	"Title",
	"Time",
	"Dummy",
	"DDummy",
	"Offset_*",
	"BinSize_*",
	"PSize_*",
	"Center_*",
	"SampleDistance",
	"WaveLength",
	"DetectorRotation_*",
	"ProjectionType",
	"RasterConfiguration",
	"AxisType_*",
	"Orientation",
	"History*",
	"*",
];

fn printable_lower(text: &str) -> Vec<u8> {
	text.bytes().filter(|b| b.is_ascii_graphic()).map(|b| b.to_ascii_lowercase()).collect()
}

/// Wildcard match, first occurrence after every `*`, no backtracking.
pub fn pattern_matches(pattern: &str, key: &str) -> bool {
	let pattern = printable_lower(pattern);
	let key = printable_lower(key);
	let mut segments = pattern.split(|&b| b == b'*');
	let Some(head) = segments.next() else {
		return key.is_empty();
	};
	if !key.starts_with(head) {
		return false;
	}
	let mut rest = &key[head.len()..];
	let mut last_was_star = false;
	for segment in segments {
		last_was_star = true;
		if segment.is_empty() {
			continue;
		}
		match rest.windows(segment.len()).position(|w| w == segment) {
			Some(at) => {
				rest = &rest[at + segment.len()..];
				last_was_star = false;
			}
			None => return false,
		}
	}
	last_was_star || rest.is_empty()
}

#[derive(Debug, Clone)]
pub struct KeyOrderTable {
	patterns: Vec<String>,
}

impl Default for KeyOrderTable {
	fn default() -> Self {
		Self { patterns: DEFAULT_TABLE.iter().map(|p| p.to_string()).collect() }
	}
}

impl KeyOrderTable {
	pub fn new<S: AsRef<str>>(patterns: &[S]) -> Self {
		Self { patterns: patterns.iter().map(|p| p.as_ref().to_string()).collect() }
	}

	pub fn set_table<S: AsRef<str>>(&mut self, patterns: &[S]) {
		*self = Self::new(patterns);
	}

	/// Restores the built-in table.
	pub fn reset(&mut self) {
		*self = Self::default();
	}

	pub fn patterns(&self) -> &[String] {
		&self.patterns
	}

	/// Indices of `keys` (given in table order) in emission order.
	pub fn emission_order(&self, keys: &[&str]) -> Vec<usize> {
		let mut emitted = vec![false; keys.len()];
		let mut order = Vec::with_capacity(keys.len());
		let patterns = BINARY_DESCRIPTION.iter().copied().chain(self.patterns.iter().map(String::as_str));
		for pattern in patterns {
			for (i, key) in keys.iter().enumerate() {
				if !emitted[i] && pattern_matches(pattern, key) {
					emitted[i] = true;
					order.push(i);
				}
			}
		}
		order.extend((0..keys.len()).filter(|&i| !emitted[i]));
		order
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_trailing_wildcard() {
		assert!(pattern_matches("Dim_*", "Dim_1"));
		assert!(pattern_matches("dim_*", "DIM_12"));
		assert!(pattern_matches("History*", "History-3"));
		assert!(!pattern_matches("Dim_*", "Title"));
		assert!(pattern_matches("*", "anything"));
		assert!(pattern_matches("Title", "TITLE"));
		assert!(!pattern_matches("Title", "Title2"));
	}

	#[test]
	fn test_middle_wildcard_matches_first_recurrence() {
		assert!(pattern_matches("a*b", "axb"));
		assert!(pattern_matches("a*b*", "abxb"));
		// the segment after `*` binds to its first occurrence and is not retried
		assert!(!pattern_matches("a*b", "abxb"));
		assert!(pattern_matches("Offset*_1", "Offset_1"));
		assert!(!pattern_matches("Offset*_1", "Offset_1_1"));
	}

	#[test]
	fn test_non_printable_ignored() {
		assert!(pattern_matches("Data Type", "DataType"));
	}

	#[test]
	fn test_emission_order() {
		let keys = ["Alpha", "Dim_1", "History-1", "Title", "DataType", "EDF_BinarySize", "Zeta"];
		let table = KeyOrderTable::default();
		let order: Vec<&str> = table.emission_order(&keys).into_iter().map(|i| keys[i]).collect();
		assert_eq!(order, vec!["EDF_BinarySize", "DataType", "Dim_1", "Title", "History-1", "Alpha", "Zeta"]);
	}

	#[test]
	fn test_custom_table_and_reset() {
		let keys = ["Alpha", "Beta", "Gamma"];
		let mut table = KeyOrderTable::new(&["Gamma", "Alpha"]);
		let order: Vec<&str> = table.emission_order(&keys).into_iter().map(|i| keys[i]).collect();
		assert_eq!(order, vec!["Gamma", "Alpha", "Beta"]);
		table.reset();
		assert_eq!(table.patterns().last().map(String::as_str), Some("*"));
	}
}
