//! # bdfio
//!
//! Reader and writer for block-structured detector image files.
//!
//! A file is a sequence of blocks. Each block is an ASCII header of
//! `key = value ;` entries padded to the block boundary, followed by an
//! optional binary payload. Blocks are grouped into chains (`Image.Psd` for
//! primary data, `Image.Error` for variances, `General` for file-wide keys)
//! and addressed by a numeric block key.
//!
//! ## Features
//!
//! - **Lazy access**: blocks are located once at open time, headers and
//!   payloads are parsed on first use
//! - **Typed payloads**: ten element types, either byte order, eight-fold
//!   raster orientations and per-block value offsets, all normalized on read
//! - **Compression**: zlib or gzip payloads, and transparent whole-file
//!   `.gz`/`.Z` files
//! - **Legacy input**: two-line-title index files with raw float frames open
//!   through the same API
//!
//! ## Quick Start
//!
//! ```rust
//! use bdfio::{DataArray, Dimensions, Engine, OpenMode};
//!
//! # fn example() -> bdfio::Result<()> {
//! let mut engine = Engine::default();
//! let stream = engine.open("frame.edf", OpenMode::New)?;
//! let dims = Dimensions::new(vec![2, 3]);
//! let data = DataArray::from(vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0]);
//! engine.write_header_string(stream, 1, 1, "Title", "calibration")?;
//! engine.write_data(stream, 1, 1, &dims, &data)?;
//! engine.close(stream)?;
//!
//! let stream = engine.open("frame.edf", OpenMode::Read)?;
//! let (dims, data) = engine.read_data(stream, 1, 1, None)?;
//! assert_eq!(dims.extents(), &[2, 3]);
//! assert_eq!(data.into_vec::<f32>(), Some(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]));
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod cli;
pub mod codec;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod file;
pub mod header;
pub mod history;
pub mod ldf;
pub mod legacy;
pub mod types;

// Re-export commonly used types for convenience
pub use codec::DataArray;
pub use config::EngineConfig;
pub use engine::{Engine, Stream};
pub use error::{BdfError, ErrorKind, Result};
pub use file::{BdfFile, Format};
pub use history::History;
pub use types::{ByteOrder, Compression, DataType, Dimensions, OpenMode};

/// Written to `EDF_DataFormatVersion` of new general blocks.
pub const DATA_FORMAT_VERSION: &str = "2.40";

/// Opens a file outside any engine, detecting its format.
///
/// # Example
///
/// ```rust
/// use bdfio::{open, OpenMode};
///
/// # fn example() -> bdfio::Result<()> {
/// let mut file = open("frame.edf", OpenMode::Read)?;
/// for chain in file.chain_keys() {
///     println!("{}: {:?}", chain, file.block_keys(&chain)?);
/// }
/// # Ok(())
/// # }
/// ```
pub fn open(path: impl AsRef<std::path::Path>, mode: OpenMode) -> Result<BdfFile> {
	dispatch::open(path, mode, &EngineConfig::default(), &header::KeyOrderTable::default())
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	#[test]
	fn test_open_write_read() {
		let dir = TempDir::new().unwrap();
		let path = dir.path().join("quick.edf");
		let mut file = open(&path, OpenMode::New).unwrap();
		let dims = Dimensions::new(vec![4]);
		file.write_data("Image.Psd", "1", &dims, &DataArray::from(vec![1i16, -2, 3, -4])).unwrap();
		file.close().unwrap();

		let mut file = open(&path, OpenMode::Read).unwrap();
		assert_eq!(file.version(), Some(DATA_FORMAT_VERSION));
		let data = file.read_data("Image.Psd", "1", Some(DataType::F32)).unwrap();
		assert_eq!(data.into_vec::<f32>().unwrap(), vec![1.0, -2.0, 3.0, -4.0]);
	}
}
