//! Legacy twin-file format.
//!
//! A text index holds two title lines followed by pairs of lines: ten or more
//! integer indicators, then the name of a raw file of 32-bit float frames.
//! Each pair is a "memory". The adapter turns memory `m` into the chain
//! numbered `m` and its frames into blocks `1..=frames`, each pointing into
//! the raw file.

use crate::catalog::{BlockFlags, BlockState, Catalog, DataDescription, ExternalPayload};
use crate::config::EngineConfig;
use crate::error::{BdfError, Result};
use crate::file::{BdfFile, Format};
use crate::header::{
	dim_key, KeyOrderTable, SymbolTable, KEY_BINARY_FILE_NAME, KEY_BINARY_FILE_POSITION,
	KEY_BINARY_FILE_SIZE, KEY_BINARY_SIZE, KEY_BLOCK_ID, KEY_BYTE_ORDER, KEY_COMPRESSION,
	KEY_DATA_TYPE,
};
use crate::types::{block_key, chain_key, ByteOrder, Compression, DataType, Dimensions};
use std::path::{Path, PathBuf};

/// Minimum number of indicators on a memory line.
pub const INDICATOR_COUNT: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LdfMemory {
	pub number: i64,
	pub file_name: String,
	pub indicators: Vec<i64>,
}

impl LdfMemory {
	/// Pixels per row.
	pub fn dim_1(&self) -> i64 {
		self.indicators[0]
	}

	/// Rows per frame.
	pub fn dim_2(&self) -> i64 {
		self.indicators[1]
	}

	pub fn frames(&self) -> i64 {
		self.indicators[2]
	}

	/// Indicator 10 is zero on the last memory.
	pub fn is_last(&self) -> bool {
		self.indicators[9] == 0
	}

	/// Bytes per frame, `None` if it overflows.
	pub fn frame_size(&self) -> Option<u64> {
		(self.dim_1() as u64)
			.checked_mul(self.dim_2() as u64)?
			.checked_mul(DataType::F32.size_of() as u64)
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LdfIndex {
	pub title: String,
	pub subtitle: String,
	pub memories: Vec<LdfMemory>,
}

fn bad_index(offset: usize, reason: impl Into<String>) -> BdfError {
	BdfError::CouldNotFindHeader { offset: offset as u64, reason: reason.into() }
}

/// Parses the text of an index file.
pub fn parse_index(text: &str) -> Result<LdfIndex> {
	let mut lines = Vec::new();
	let mut offset = 0;
	for line in text.split_inclusive('\n') {
		lines.push((offset, line.trim_end_matches(['\r', '\n'])));
		offset += line.len();
	}
	let mut lines = lines.into_iter();
	let (_, title) = lines.next().ok_or_else(|| bad_index(0, "empty index file"))?;
	let (_, subtitle) = lines.next().ok_or_else(|| bad_index(title.len(), "missing second title line"))?;

	let mut memories = Vec::new();
	while let Some((at, indicator)) = lines.next() {
		if indicator.trim().is_empty() {
			continue;
		}
		let indicators = indicator
			.split_whitespace()
			.map(|word| word.parse::<i64>())
			.collect::<std::result::Result<Vec<_>, _>>()
			.map_err(|e| bad_index(at, format!("bad indicator line {:?}: {}", indicator, e)))?;
		if indicators.len() < INDICATOR_COUNT {
			return Err(bad_index(
				at,
				format!("{} indicators found, {} needed", indicators.len(), INDICATOR_COUNT),
			));
		}
		let (name_at, file_name) = lines
			.next()
			.ok_or_else(|| bad_index(at + indicator.len(), "indicator line without file name"))?;
		let file_name = file_name.trim();
		if file_name.is_empty() {
			return Err(bad_index(name_at, "empty binary file name"));
		}
		let memory = LdfMemory {
			number: memories.len() as i64 + 1,
			file_name: file_name.to_string(),
			indicators,
		};
		if memory.dim_1() < 1 || memory.dim_2() < 1 || memory.frames() < 0 {
			return Err(bad_index(
				at,
				format!(
					"memory {} declares {}x{} pixels and {} frames",
					memory.number,
					memory.dim_1(),
					memory.dim_2(),
					memory.frames()
				),
			));
		}
		memories.push(memory);
	}
	Ok(LdfIndex { title: title.trim().to_string(), subtitle: subtitle.trim().to_string(), memories })
}

/// Builds the block catalog; frame files are resolved against `dir`.
pub fn build_catalog(index: &LdfIndex, dir: &Path, byte_order: ByteOrder) -> Result<Catalog> {
	let mut catalog = Catalog::new();
	let mut sequence = 1;
	for memory in &index.memories {
		let chain = chain_key(memory.number);
		let path = dir.join(&memory.file_name);
		let oversized = || {
			BdfError::CouldNotReadDimension {
				key: format!("memory {}", memory.number),
				value: format!("{}x{} pixels, {} frames", memory.dim_1(), memory.dim_2(), memory.frames()),
			}
		};
		let size = memory.frame_size().ok_or_else(oversized)?;
		size.checked_mul(memory.frames() as u64).ok_or_else(oversized)?;
		for frame in 1..=memory.frames() {
			let block = block_key(frame);
			let offset = size * (frame as u64 - 1);
			let id = catalog.insert_block(&chain, &block)?;
			let external = ExternalPayload { path: path.clone(), offset, length: size };
			let dims = Dimensions::new(vec![memory.dim_1() as usize, memory.dim_2() as usize]);

			let mut table = SymbolTable::default();
			table.insert(KEY_BLOCK_ID, &format!("{}.{}", block, chain))?;
			table.insert(KEY_BINARY_FILE_NAME, &memory.file_name)?;
			table.insert(KEY_BINARY_FILE_POSITION, &external.offset.to_string())?;
			table.insert(KEY_BINARY_FILE_SIZE, &size.to_string())?;
			table.insert(KEY_BINARY_SIZE, &size.to_string())?;
			table.insert(KEY_DATA_TYPE, DataType::F32.as_str())?;
			table.insert(KEY_BYTE_ORDER, byte_order.as_str())?;
			for (axis, extent) in dims.extents().iter().enumerate() {
				table.insert(&dim_key(axis + 1), &extent.to_string())?;
			}
			table.insert(KEY_COMPRESSION, Compression::None.as_str())?;
			table.insert("Title", &index.title)?;
			table.insert("Subtitle", &index.subtitle)?;
			table.mark_clean();

			let entry = catalog.block_mut(id);
			entry.description = Some(DataDescription {
				data_type: DataType::F32,
				byte_order,
				raster: 1,
				compression: Compression::None,
				value_offset: 0,
				dims,
				binary_size: size,
			});
			entry.symbols = Some(table);
			entry.external = Some(external);
			entry.sequence = sequence;
			entry.flags = BlockFlags::INTERNAL_HEADER | BlockFlags::DATA_EXTERNAL;
			entry.state = BlockState::HeaderLoaded;
			sequence += 1;
		}
	}
	Ok(catalog)
}

/// Opens an index file read-only.
pub fn open(path: impl AsRef<Path>, config: &EngineConfig, order: &KeyOrderTable) -> Result<BdfFile> {
	let path = path.as_ref();
	let bytes = std::fs::read(path)
		.map_err(|source| BdfError::CouldNotOpenFile { path: path.to_path_buf(), source })?;
	from_bytes(path, &bytes, config, order)
}

/// Opens an index from its (decompressed) text; frame files are resolved
/// next to `path`.
pub fn from_bytes(path: &Path, bytes: &[u8], config: &EngineConfig, order: &KeyOrderTable) -> Result<BdfFile> {
	let index = parse_index(&String::from_utf8_lossy(bytes))?;
	let dir = path.parent().map(Path::to_path_buf).unwrap_or_else(PathBuf::new);
	let byte_order = config.ldf_input_byte_order.unwrap_or_else(ByteOrder::native);
	let catalog = build_catalog(&index, &dir, byte_order)?;
	log::debug!("{}: {} memories in legacy index", path.display(), index.memories.len());
	Ok(BdfFile::from_catalog(path.to_path_buf(), Format::Ldf, catalog, config, order))
}

#[cfg(test)]
mod tests {
	use super::*;

	const INDEX: &str = "A\nB\n 4 2 3 0 0 0 0 0 0 1\nmem1.raw\n4 2 2 0 0 0 0 0 0 0\nmem2.raw\n";

	#[test]
	fn test_parse_index() {
		let index = parse_index(INDEX).unwrap();
		assert_eq!(index.title, "A");
		assert_eq!(index.subtitle, "B");
		assert_eq!(index.memories.len(), 2);
		assert_eq!(index.memories[0].frames(), 3);
		assert!(!index.memories[0].is_last());
		assert!(index.memories[1].is_last());
		assert_eq!(index.memories[1].number, 2);
		assert_eq!(index.memories[1].file_name, "mem2.raw");
		assert_eq!(index.memories[1].frame_size(), Some(32));
	}

	#[test]
	fn test_short_indicator_line() {
		let err = parse_index("A\nB\n1 2 3\nmem.raw\n").unwrap_err();
		assert!(matches!(err, BdfError::CouldNotFindHeader { offset: 4, .. }));
	}

	#[test]
	fn test_missing_file_name() {
		assert!(parse_index("A\nB\n1 1 1 0 0 0 0 0 0 0\n").is_err());
		assert!(parse_index("").is_err());
	}

	#[test]
	fn test_oversized_memory() {
		let index = parse_index("A\nB\n4294967296 4294967296 2 0 0 0 0 0 0 0\nm.raw\n").unwrap();
		assert_eq!(index.memories[0].frame_size(), None);
		let err = build_catalog(&index, Path::new("/data"), ByteOrder::LowByteFirst).unwrap_err();
		assert!(matches!(err, BdfError::CouldNotReadDimension { .. }));

		let index = parse_index("A\nB\n65536 65536 9223372036854775807 0 0 0 0 0 0 0\nm.raw\n").unwrap();
		assert!(build_catalog(&index, Path::new("/data"), ByteOrder::LowByteFirst).is_err());
	}

	#[test]
	fn test_catalog_offsets() {
		let index = parse_index(INDEX).unwrap();
		let catalog = build_catalog(&index, Path::new("/data"), ByteOrder::LowByteFirst).unwrap();
		let id = catalog.find_block("Image.Psd.2", "2").unwrap();
		let block = catalog.block(id);
		let external = block.external.as_ref().unwrap();
		assert_eq!(external.path, Path::new("/data/mem2.raw"));
		assert_eq!(external.offset, 32);
		assert_eq!(external.length, 32);
		assert_eq!(block.data_len, 0);
		assert_eq!(block.symbols.as_ref().unwrap().value("Title").unwrap(), "A");
		assert_eq!(catalog.minmax_number("Image.Psd"), Some((1, 3)));
	}
}
