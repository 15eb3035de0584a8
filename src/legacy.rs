//! Process-wide entry points with the historical names.
//!
//! All calls share one default [`Engine`] behind a lock. Programs that need
//! several independent contexts should create their own `Engine` instead.

use crate::codec::DataArray;
use crate::engine::{Engine, Stream};
use crate::error::Result;
use crate::types::{ByteOrder, Compression, DataType, Dimensions};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::path::Path;

static DEFAULT_ENGINE: Lazy<Mutex<Engine>> = Lazy::new(|| Mutex::new(Engine::default()));

/// Runs `f` with the default engine locked.
pub fn with_engine<T>(f: impl FnOnce(&mut Engine) -> T) -> T {
	f(&mut DEFAULT_ENGINE.lock())
}

pub fn dataformat_version() -> &'static str {
	crate::DATA_FORMAT_VERSION
}

/// `mode` is one of `read`, `old`, `new`, `any`, `temp`.
pub fn open_data_file(path: impl AsRef<Path>, mode: &str) -> Result<Stream> {
	with_engine(|e| e.open_with(path, mode))
}

pub fn close_data_file(stream: Stream) -> Result<()> {
	with_engine(|e| e.close(stream))
}

/// Closes every file and forgets named headers, histories and settings.
pub fn free_all() -> Result<()> {
	with_engine(|e| {
		let closed = e.close_all();
		*e = Engine::default();
		closed
	})
}

pub fn search_stream(path: impl AsRef<Path>) -> Option<Stream> {
	with_engine(|e| e.search_stream(path))
}

pub fn search_minmax_number(stream: Stream, chain: i64) -> Result<(i64, i64)> {
	with_engine(|e| e.search_minmax_number(stream, chain))
}

pub fn test_header(stream: Stream, number: i64, chain: i64) -> Result<bool> {
	with_engine(|e| e.test_header(stream, number, chain))
}

pub fn read_header_long(stream: Stream, number: i64, chain: i64, key: &str) -> Result<i64> {
	with_engine(|e| e.read_header_long(stream, number, chain, key))
}

pub fn read_header_float(stream: Stream, number: i64, chain: i64, key: &str) -> Result<f64> {
	with_engine(|e| e.read_header_float(stream, number, chain, key))
}

pub fn read_header_line(stream: Stream, number: i64, chain: i64, key: &str) -> Result<String> {
	with_engine(|e| e.read_header_line(stream, number, chain, key))
}

pub fn read_header_string(stream: Stream, number: i64, chain: i64, key: &str) -> Result<String> {
	with_engine(|e| e.read_header_string(stream, number, chain, key))
}

pub fn write_header_long(stream: Stream, number: i64, chain: i64, key: &str, value: i64) -> Result<()> {
	with_engine(|e| e.write_header_long(stream, number, chain, key, value))
}

pub fn write_header_float(stream: Stream, number: i64, chain: i64, key: &str, value: f64) -> Result<()> {
	with_engine(|e| e.write_header_float(stream, number, chain, key, value))
}

pub fn write_header_line(stream: Stream, number: i64, chain: i64, key: &str, value: &str) -> Result<()> {
	with_engine(|e| e.write_header_line(stream, number, chain, key, value))
}

pub fn write_header_string(stream: Stream, number: i64, chain: i64, key: &str, value: &str) -> Result<()> {
	with_engine(|e| e.write_header_string(stream, number, chain, key, value))
}

pub fn write_header_unit(stream: Stream, number: i64, chain: i64, key: &str, value: f64, unit: &str) -> Result<()> {
	with_engine(|e| e.write_header_unit(stream, number, chain, key, value, unit))
}

pub fn delete_key(stream: Stream, number: i64, chain: i64, key: &str) -> Result<()> {
	with_engine(|e| e.delete_header_key(stream, number, chain, key))
}

pub fn read_dimension(stream: Stream, number: i64, chain: i64) -> Result<Dimensions> {
	with_engine(|e| e.read_dimensions(stream, number, chain))
}

pub fn read_data(stream: Stream, number: i64, chain: i64, as_type: DataType) -> Result<(Dimensions, DataArray)> {
	with_engine(|e| e.read_data(stream, number, chain, Some(as_type)))
}

pub fn write_data(stream: Stream, number: i64, chain: i64, dims: &Dimensions, data: &DataArray) -> Result<()> {
	with_engine(|e| e.write_data(stream, number, chain, dims, data))
}

/// Output element type; `None` keeps the caller's type.
pub fn set_datatype(data_type: Option<DataType>) {
	with_engine(|e| e.set_output_type(data_type));
}

pub fn set_datavalueoffset(offset: i64) {
	with_engine(|e| e.set_output_value_offset(offset));
}

pub fn set_compression(compression: Compression) {
	with_engine(|e| e.set_output_compression(compression));
}

pub fn set_minimumheadersize(size: u64) {
	with_engine(|e| e.set_minimum_header_size(size));
}

pub fn set_max_line_width(width: usize) {
	with_engine(|e| e.set_max_line_width(width));
}

pub fn general_block(enabled: bool) {
	with_engine(|e| e.set_general_block(enabled));
}

pub fn headersize(enabled: bool) {
	with_engine(|e| e.set_write_header_size(enabled));
}

pub fn set_bsl_input_byteorder(order: Option<ByteOrder>) {
	with_engine(|e| e.set_ldf_byte_order(order));
}

pub fn keyorder_set_table<S: AsRef<str>>(patterns: &[S]) {
	with_engine(|e| e.set_key_order(patterns));
}

pub fn keyorder_reset() {
	with_engine(|e| e.reset_key_order());
}

pub fn history_new(key: &str) {
	with_engine(|e| e.history_new(key));
}

pub fn history_argv(key: &str, arg: &str) {
	with_engine(|e| e.history_argv(key, arg));
}

pub fn history_skip(key: &str) {
	with_engine(|e| e.history_skip(key));
}

pub fn write_header_history(stream: Stream, number: i64, chain: i64, key: &str) -> Result<()> {
	with_engine(|e| e.write_header_history(stream, number, chain, key))
}

pub fn read_header_history(stream: Stream, number: i64, chain: i64, key: &str) -> Result<usize> {
	with_engine(|e| e.read_header_history(stream, number, chain, key))
}

pub fn print_file_table() -> Result<()> {
	with_engine(|e| e.print_file_table(&mut std::io::stdout().lock()))
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	// one test only: the default engine is shared by the whole test binary
	#[test]
	fn test_default_engine() {
		let dir = TempDir::new().unwrap();
		let path = dir.path().join("legacy.edf");
		let stream = open_data_file(&path, "new").unwrap();
		write_header_long(stream, 1, 1, "Frames", 5).unwrap();
		write_data(stream, 1, 1, &Dimensions::new(vec![2, 2]), &DataArray::from(vec![1.0f32, 2.0, 3.0, 4.0])).unwrap();
		assert_eq!(search_stream(&path), Some(stream));
		close_data_file(stream).unwrap();

		let stream = open_data_file(&path, "read").unwrap();
		assert_eq!(read_header_long(stream, 1, 1, "Frames").unwrap(), 5);
		let (dims, data) = read_data(stream, 1, 1, DataType::F64).unwrap();
		assert_eq!(dims.extents(), &[2, 2]);
		assert_eq!(data.into_vec::<f64>().unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
		assert_eq!(read_header_long(stream, 1, 0, "EDF_DataBlocks").unwrap(), 1);
		free_all().unwrap();
		assert_eq!(search_stream(&path), None);
		assert_eq!(dataformat_version(), crate::DATA_FORMAT_VERSION);
	}
}
