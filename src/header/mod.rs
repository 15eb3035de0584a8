//! Block header text: lexing, symbol storage, ordering and rendering.

pub mod emit;
pub mod keyorder;
pub mod lexer;
pub mod symbols;

pub use keyorder::KeyOrderTable;
pub use lexer::{scan_header, ParsedHeader, RawEntry, Scan};
pub use symbols::{SortMode, Symbol, SymbolTable, RESERVED_PREFIX};

use crate::error::{BdfError, Result};
use std::cmp::Ordering;

pub const KEY_HEADER_SIZE: &str = "EDF_HeaderSize";
pub const KEY_BLOCK_ID: &str = "EDF_DataBlockID";
pub const KEY_BINARY_SIZE: &str = "EDF_BinarySize";
pub const KEY_BINARY_FILE_NAME: &str = "EDF_BinaryFileName";
pub const KEY_BINARY_FILE_POSITION: &str = "EDF_BinaryFilePosition";
pub const KEY_BINARY_FILE_SIZE: &str = "EDF_BinaryFileSize";
pub const KEY_FORMAT_VERSION: &str = "EDF_DataFormatVersion";
pub const KEY_BLOCK_BOUNDARY: &str = "EDF_BlockBoundary";
pub const KEY_DATA_BLOCKS: &str = "EDF_DataBlocks";
/// Binary size key of version 1 files.
pub const KEY_SIZE: &str = "Size";
pub const KEY_DATA_TYPE: &str = "DataType";
pub const KEY_BYTE_ORDER: &str = "ByteOrder";
pub const KEY_RASTER: &str = "DataRasterConfiguration";
pub const KEY_COMPRESSION: &str = "Compression";
pub const KEY_VALUE_OFFSET: &str = "DataValueOffset";

/// `Dim_<axis>`, axes counted from 1.
pub fn dim_key(axis: usize) -> String {
	format!("Dim_{}", axis)
}

/// Header body in emission order, continuation siblings kept behind their base.
pub fn render_body(table: &SymbolTable, order: &KeyOrderTable) -> String {
	let symbols: Vec<&Symbol> = table.iter().collect();
	let mut groups: Vec<(usize, usize)> = Vec::new();
	for (i, symbol) in symbols.iter().enumerate() {
		match groups.last_mut() {
			Some((start, end))
				if symbols::compare_base(table.mode(), symbols[*start].base(), symbol.base()) == Ordering::Equal =>
			{
				*end = i + 1
			}
			_ => groups.push((i, i + 1)),
		}
	}
	let bases: Vec<&str> = groups.iter().map(|&(start, _)| symbols[start].base()).collect();
	let mut body = String::new();
	for g in order.emission_order(&bases) {
		let (start, end) = groups[g];
		for symbol in &symbols[start..end] {
			body.push_str(&emit::format_entry(&symbol.key, &emit::escape_value(&symbol.value)));
		}
	}
	body
}

/// Renders a full padded header.
///
/// With `write_header_size` the `EDF_HeaderSize` key is kept equal to the
/// rendered size. `exact` forces the padded size, failing if the text does
/// not fit.
pub fn render_header(
	table: &mut SymbolTable,
	order: &KeyOrderTable,
	boundary: u64,
	minimum: u64,
	write_header_size: bool,
	exact: Option<u64>,
) -> Result<Vec<u8>> {
	let mut body = render_body(table, order);
	let mut size = emit::header_size(body.len(), boundary, minimum);
	if let Some(exact) = exact {
		size = size.max(exact);
	}
	if write_header_size {
		// the size key sits inside the header it measures
		for _ in 0..4 {
			table.insert(KEY_HEADER_SIZE, &size.to_string())?;
			body = render_body(table, order);
			let mut next = emit::header_size(body.len(), boundary, minimum);
			if let Some(exact) = exact {
				next = next.max(exact);
			}
			if next == size {
				break;
			}
			size = next;
		}
	}
	if let Some(exact) = exact {
		if size != exact {
			return Err(BdfError::write(
				"header",
				format!("header needs {} bytes but only {} are reserved", size, exact),
			));
		}
	}
	Ok(emit::render_header(&body, size))
}

/// Parses a complete in-memory header into a symbol table.
pub fn parse_table(text: &[u8], mode: SortMode) -> Result<SymbolTable> {
	match scan_header(text, 0, true)? {
		Scan::Complete(parsed) => Ok(SymbolTable::from_entries(parsed.entries, mode)),
		Scan::Incomplete => Err(BdfError::CouldNotFindHeader { offset: 0, reason: "header is not closed".to_string() }),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rand::{rngs::StdRng, Rng, SeedableRng};

	fn random_value(rng: &mut StdRng) -> String {
		const ALPHABET: &[u8] = b"abcXYZ019 ;{}\\\"=#\t\n\r-_.";
		let len = rng.gen_range(0..40);
		(0..len).map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char).collect()
	}

	#[test]
	fn test_render_parse_round_trip() {
		let mut rng = StdRng::seed_from_u64(42);
		for _ in 0..50 {
			let mut table = SymbolTable::default();
			for k in 0..rng.gen_range(1..12) {
				table.insert(&format!("Key_{}", k), &random_value(&mut rng)).unwrap();
			}
			let text = render_header(&mut table, &KeyOrderTable::default(), 512, 0, false, None).unwrap();
			assert_eq!(text.len() % 512, 0);
			let back = parse_table(&text, SortMode::default()).unwrap();
			assert_eq!(back.logical_entries(), table.logical_entries());
		}
	}

	#[test]
	fn test_header_size_fixed_point() {
		let mut table = SymbolTable::default();
		table.insert("Title", &"t".repeat(470)).unwrap();
		let text = render_header(&mut table, &KeyOrderTable::default(), 512, 0, true, None).unwrap();
		let back = parse_table(&text, SortMode::default()).unwrap();
		assert_eq!(back.value(KEY_HEADER_SIZE).unwrap(), text.len().to_string());
		assert_eq!(text.len(), 1024);
	}

	#[test]
	fn test_exact_size() {
		let mut table = SymbolTable::default();
		table.insert("A", "1").unwrap();
		let text = render_header(&mut table, &KeyOrderTable::default(), 512, 0, false, Some(1024)).unwrap();
		assert_eq!(text.len(), 1024);
		table.insert("B", &"x".repeat(2000)).unwrap();
		assert!(render_header(&mut table, &KeyOrderTable::default(), 512, 0, false, Some(1024)).is_err());
	}

	#[test]
	fn test_continuations_follow_base() {
		let mut table = SymbolTable::default();
		table.insert_as_string("Title", &"word ".repeat(30), |_| 40).unwrap();
		table.insert("Dim_1", "4").unwrap();
		let body = render_body(&table, &KeyOrderTable::default());
		let keys: Vec<&str> = body.lines().map(|l| l.split(" = ").next().unwrap_or("")).collect();
		assert_eq!(keys[0], "Dim_1");
		assert_eq!(keys[1], "Title");
		assert_eq!(keys[2], "Title~1");
		assert_eq!(parse_table(
			&emit::render_header(&body, emit::header_size(body.len(), 512, 0)),
			SortMode::default()
		)
		.unwrap()
		.value("Title")
		.unwrap(), "word ".repeat(30));
	}
}
