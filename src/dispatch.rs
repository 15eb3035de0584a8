//! Chooses the reader for a file from its leading bytes.

use crate::config::EngineConfig;
use crate::error::{BdfError, Result};
use crate::file::{spool, BdfFile, Format};
use crate::header::lexer::find_header_start;
use crate::header::KeyOrderTable;
use crate::ldf;
use crate::types::{Compression, OpenMode};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

const PREFIX_LEN: usize = 512;

/// Format suggested by the first bytes of a file. Whitespace-only input
/// counts as an empty block file.
pub fn detect(prefix: &[u8]) -> Format {
	match find_header_start(prefix) {
		None | Some(Ok(_)) => Format::Bdf,
		Some(Err(_)) => Format::Ldf,
	}
}

fn read_prefix(file: &mut File) -> Result<Vec<u8>> {
	let mut prefix = Vec::with_capacity(PREFIX_LEN);
	file.by_ref().take(PREFIX_LEN as u64).read_to_end(&mut prefix)?;
	file.seek(SeekFrom::Start(0))?;
	Ok(prefix)
}

fn not_a_block_file(e: BdfError) -> BdfError {
	BdfError::CouldNotFindHeader { offset: 0, reason: format!("not a block file and not a legacy index ({})", e) }
}

/// Opens `path` as a block file, or as a legacy twin-file index when a
/// read-only file does not start with a header. Compressed files are
/// inflated before the check.
pub fn open(path: impl AsRef<Path>, mode: OpenMode, config: &EngineConfig, order: &KeyOrderTable) -> Result<BdfFile> {
	let path = path.as_ref();
	if mode != OpenMode::Read {
		return BdfFile::open(path, mode, config, order);
	}
	let mut source =
		File::open(path).map_err(|source| BdfError::CouldNotOpenFile { path: path.to_path_buf(), source })?;
	if Compression::from_path(path) == Compression::None {
		let prefix = read_prefix(&mut source)?;
		drop(source);
		return match detect(&prefix) {
			Format::Bdf => BdfFile::open(path, mode, config, order),
			Format::Ldf => {
				log::debug!("{}: no block header, trying legacy index", path.display());
				ldf::open(path, config, order).map_err(not_a_block_file)
			}
		};
	}
	let mut inflated = spool(source, path)?;
	let prefix = read_prefix(&mut inflated)?;
	match detect(&prefix) {
		Format::Bdf => BdfFile::open_spooled(path.to_path_buf(), inflated, config, order),
		Format::Ldf => {
			log::debug!("{}: no block header after decompression, trying legacy index", path.display());
			let mut text = Vec::new();
			inflated.read_to_end(&mut text)?;
			ldf::from_bytes(path, &text, config, order).map_err(not_a_block_file)
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	#[test]
	fn test_detect() {
		assert_eq!(detect(b""), Format::Bdf);
		assert_eq!(detect(b"  \r\n"), Format::Bdf);
		assert_eq!(detect(b"\n{\r\nA = 1 ;"), Format::Bdf);
		assert_eq!(detect(b"Title\nSubtitle\n"), Format::Ldf);
	}

	#[test]
	fn test_empty_file_is_block_file() {
		let dir = TempDir::new().unwrap();
		let path = dir.path().join("empty.edf");
		std::fs::write(&path, b"").unwrap();
		let file = open(&path, OpenMode::Read, &EngineConfig::default(), &KeyOrderTable::default()).unwrap();
		assert_eq!(file.format(), Format::Bdf);
		assert!(file.chain_keys().is_empty());
	}

	#[test]
	fn test_text_file_routes_to_index() {
		let dir = TempDir::new().unwrap();
		let path = dir.path().join("X00.000");
		std::fs::write(&path, b"A\nB\n2 2 1 0 0 0 0 0 0 0\nX01.000\n").unwrap();
		let file = open(&path, OpenMode::Read, &EngineConfig::default(), &KeyOrderTable::default()).unwrap();
		assert_eq!(file.format(), Format::Ldf);
		assert_eq!(file.chain_keys(), vec!["Image.Psd".to_string()]);
	}

	#[test]
	fn test_garbage_is_rejected() {
		let dir = TempDir::new().unwrap();
		let path = dir.path().join("junk.bin");
		std::fs::write(&path, b"junk").unwrap();
		let err = open(&path, OpenMode::Read, &EngineConfig::default(), &KeyOrderTable::default()).unwrap_err();
		assert!(matches!(err, BdfError::CouldNotFindHeader { offset: 0, .. }));
	}

	#[test]
	fn test_compressed_index_routes_to_index() {
		use flate2::write::GzEncoder;
		use std::io::Write;

		let dir = TempDir::new().unwrap();
		let path = dir.path().join("X00.000.gz");
		let mut encoder = GzEncoder::new(File::create(&path).unwrap(), flate2::Compression::default());
		encoder.write_all(b"A\nB\n2 2 1 0 0 0 0 0 0 0\nX01.000\n").unwrap();
		encoder.finish().unwrap();
		let file = open(&path, OpenMode::Read, &EngineConfig::default(), &KeyOrderTable::default()).unwrap();
		assert_eq!(file.format(), Format::Ldf);
		assert_eq!(file.block_keys("Image.Psd").unwrap(), vec!["1"]);
	}

	#[test]
	fn test_missing_file() {
		let dir = TempDir::new().unwrap();
		let err = open(dir.path().join("none"), OpenMode::Read, &EngineConfig::default(), &KeyOrderTable::default())
			.unwrap_err();
		assert!(matches!(err, BdfError::CouldNotOpenFile { .. }));
	}
}
