//! Engine context: the table of open files plus the settings, key order,
//! named headers and histories shared by them.
//!
//! Blocks are addressed the historical way, by a block number and a chain
//! number (see [`chain_key`]). Chain `0` always means the general block.

use crate::catalog::DataDescription;
use crate::codec::DataArray;
use crate::config::EngineConfig;
use crate::dispatch;
use crate::error::{BdfError, Result};
use crate::file::BdfFile;
use crate::header::symbols::is_reserved;
use crate::header::{KeyOrderTable, SymbolTable};
use crate::history::{history_number, History};
use crate::types::{
	block_key, chain_key, ByteOrder, Compression, DataType, Dimensions, OpenMode, GENERAL_BLOCK, GENERAL_CHAIN,
};
use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;

/// Index into the engine's file table.
pub type Stream = usize;

/// `(chain, block)` names for the numeric address of a block.
pub fn address(number: i64, chain: i64) -> (String, String) {
	if chain == 0 {
		(GENERAL_CHAIN.to_string(), GENERAL_BLOCK.to_string())
	} else {
		(chain_key(chain), block_key(number))
	}
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T> {
	value.trim().parse().map_err(|_| BdfError::NumberConversionFailed {
		key: key.to_string(),
		value: value.to_string(),
	})
}

#[derive(Debug)]
pub struct Engine {
	config: EngineConfig,
	order: KeyOrderTable,
	files: Vec<Option<BdfFile>>,
	headers: HashMap<String, SymbolTable>,
	histories: HashMap<String, History>,
}

impl Default for Engine {
	fn default() -> Self {
		Self::new(EngineConfig::default())
	}
}

impl Engine {
	pub fn new(config: EngineConfig) -> Self {
		let mut files = Vec::new();
		files.resize_with(config.max_files, || None);
		Self {
			config,
			order: KeyOrderTable::default(),
			files,
			headers: HashMap::new(),
			histories: HashMap::new(),
		}
	}

	// ---- settings ----

	pub fn config(&self) -> &EngineConfig {
		&self.config
	}

	/// Replaces the settings; open files use them for their next writes.
	pub fn set_config(&mut self, config: EngineConfig) {
		if config.max_files > self.files.len() {
			self.files.resize_with(config.max_files, || None);
		}
		self.config = config;
		self.propagate();
	}

	pub fn reset_config(&mut self) {
		self.set_config(EngineConfig::default());
	}

	fn update(&mut self, change: impl FnOnce(&mut EngineConfig)) {
		let mut config = self.config.clone();
		change(&mut config);
		self.set_config(config);
	}

	fn propagate(&mut self) {
		for file in self.files.iter_mut().flatten() {
			file.configure(&self.config, &self.order);
		}
	}

	/// Element type of written payloads; `None` keeps the caller's type.
	pub fn set_output_type(&mut self, data_type: Option<DataType>) {
		self.update(|c| c.default_output_type = data_type);
	}

	pub fn set_output_compression(&mut self, compression: Compression) {
		self.update(|c| c.output_compression = compression);
	}

	pub fn set_output_value_offset(&mut self, offset: i64) {
		self.update(|c| c.output_value_offset = offset);
	}

	pub fn set_minimum_header_size(&mut self, size: u64) {
		self.update(|c| c.minimum_header_size = size);
	}

	pub fn set_max_line_width(&mut self, width: usize) {
		self.update(|c| c.max_line_width = width);
	}

	pub fn set_general_block(&mut self, enabled: bool) {
		self.update(|c| c.general_block = enabled);
	}

	pub fn set_write_header_size(&mut self, enabled: bool) {
		self.update(|c| c.write_header_size = enabled);
	}

	pub fn set_ldf_byte_order(&mut self, order: Option<ByteOrder>) {
		self.update(|c| c.ldf_input_byte_order = order);
	}

	pub fn set_strict_binary_size(&mut self, strict: bool) {
		self.update(|c| c.strict_binary_size = strict);
	}

	pub fn key_order(&self) -> &KeyOrderTable {
		&self.order
	}

	pub fn set_key_order<S: AsRef<str>>(&mut self, patterns: &[S]) {
		self.order.set_table(patterns);
		self.propagate();
	}

	pub fn reset_key_order(&mut self) {
		self.order.reset();
		self.propagate();
	}

	// ---- streams ----

	/// Opens a file and returns its stream.
	///
	/// Opening a path that is already open returns the same stream when the
	/// modes agree.
	///
	/// # Errors
	///
	/// `IncompatibleOpeningMode` if the path is open in another mode,
	/// `NoMoreStreamsAvailable` if the file table is full.
	pub fn open(&mut self, path: impl AsRef<Path>, mode: OpenMode) -> Result<Stream> {
		let path = path.as_ref();
		if let Some(stream) = self.search_stream(path) {
			let existing = self.file(stream)?.mode();
			if existing == mode {
				return Ok(stream);
			}
			return Err(BdfError::IncompatibleOpeningMode(format!(
				"{} is already open as {:?}, requested {:?}",
				path.display(),
				existing,
				mode
			)));
		}
		let slot = self
			.files
			.iter()
			.position(Option::is_none)
			.ok_or(BdfError::NoMoreStreamsAvailable(self.files.len()))?;
		let file = dispatch::open(path, mode, &self.config, &self.order)?;
		log::debug!("stream {}: opened {} ({:?}, {})", slot, path.display(), mode, file.format());
		self.files[slot] = Some(file);
		Ok(slot)
	}

	/// Like [`open`](Self::open) with the mode given as `read`, `old`, `new`, `any` or `temp`.
	pub fn open_with(&mut self, path: impl AsRef<Path>, mode: &str) -> Result<Stream> {
		self.open(path, mode.parse()?)
	}

	pub fn close(&mut self, stream: Stream) -> Result<()> {
		self.file(stream)?;
		match self.files[stream].take() {
			Some(file) => file.close(),
			None => Err(BdfError::NoFileOpen(stream)),
		}
	}

	/// Closes every open file, returning the first failure.
	pub fn close_all(&mut self) -> Result<()> {
		let mut first = None;
		for slot in self.files.iter_mut() {
			if let Some(file) = slot.take() {
				if let Err(e) = file.close() {
					log::warn!("{}", e);
					first.get_or_insert(e);
				}
			}
		}
		first.map_or(Ok(()), Err)
	}

	/// Stream on which `path` is open.
	pub fn search_stream(&self, path: impl AsRef<Path>) -> Option<Stream> {
		let path = path.as_ref();
		self.files.iter().position(|slot| slot.as_ref().is_some_and(|f| f.path() == path))
	}

	pub fn file(&self, stream: Stream) -> Result<&BdfFile> {
		self.files
			.get(stream)
			.ok_or(BdfError::InvalidStream(stream))?
			.as_ref()
			.ok_or(BdfError::NoFileOpen(stream))
	}

	pub fn file_mut(&mut self, stream: Stream) -> Result<&mut BdfFile> {
		self.files
			.get_mut(stream)
			.ok_or(BdfError::InvalidStream(stream))?
			.as_mut()
			.ok_or(BdfError::NoFileOpen(stream))
	}

	pub fn flush(&mut self, stream: Stream) -> Result<()> {
		self.file_mut(stream)?.flush()
	}

	// ---- enumeration ----

	pub fn chain_keys(&self, stream: Stream) -> Result<Vec<String>> {
		Ok(self.file(stream)?.chain_keys())
	}

	pub fn block_keys(&self, stream: Stream, chain: i64) -> Result<Vec<String>> {
		let (chain, _) = address(1, chain);
		self.file(stream)?.block_keys(&chain)
	}

	/// True if the block exists.
	pub fn test_header(&self, stream: Stream, number: i64, chain: i64) -> Result<bool> {
		let (chain, block) = address(number, chain);
		Ok(self.file(stream)?.has_block(&chain, &block))
	}

	/// Smallest and largest numeric block key of a chain.
	pub fn search_minmax_number(&self, stream: Stream, chain: i64) -> Result<(i64, i64)> {
		let (chain, _) = address(1, chain);
		self.file(stream)?
			.minmax_number(&chain)
			.ok_or(BdfError::CouldNotFindBlock { chain, block: "*".to_string() })
	}

	// ---- typed header values ----

	/// Logical value of `key`, continuation entries included.
	pub fn read_header_string(&mut self, stream: Stream, number: i64, chain: i64, key: &str) -> Result<String> {
		let (chain, block) = address(number, chain);
		self.file_mut(stream)?.lookup(&chain, &block, key)
	}

	/// First line of the value of `key`.
	pub fn read_header_line(&mut self, stream: Stream, number: i64, chain: i64, key: &str) -> Result<String> {
		let value = self.read_header_string(stream, number, chain, key)?;
		Ok(value.lines().next().unwrap_or_default().to_string())
	}

	pub fn read_header_long(&mut self, stream: Stream, number: i64, chain: i64, key: &str) -> Result<i64> {
		let value = self.read_header_string(stream, number, chain, key)?;
		parse_number(key, &value)
	}

	pub fn read_header_float(&mut self, stream: Stream, number: i64, chain: i64, key: &str) -> Result<f64> {
		let value = self.read_header_string(stream, number, chain, key)?;
		parse_number(key, &value)
	}

	pub fn write_header_string(&mut self, stream: Stream, number: i64, chain: i64, key: &str, value: &str) -> Result<()> {
		let (chain, block) = address(number, chain);
		self.file_mut(stream)?.write_symbol(&chain, &block, key, value)
	}

	/// Writes the first line of `value`.
	pub fn write_header_line(&mut self, stream: Stream, number: i64, chain: i64, key: &str, value: &str) -> Result<()> {
		let line = value.lines().next().unwrap_or_default();
		self.write_header_string(stream, number, chain, key, line)
	}

	pub fn write_header_long(&mut self, stream: Stream, number: i64, chain: i64, key: &str, value: i64) -> Result<()> {
		self.write_header_string(stream, number, chain, key, &value.to_string())
	}

	pub fn write_header_float(&mut self, stream: Stream, number: i64, chain: i64, key: &str, value: f64) -> Result<()> {
		self.write_header_string(stream, number, chain, key, &value.to_string())
	}

	/// Writes `value` immediately followed by `unit`, e.g. `1.5mm`.
	pub fn write_header_unit(
		&mut self,
		stream: Stream,
		number: i64,
		chain: i64,
		key: &str,
		value: f64,
		unit: &str,
	) -> Result<()> {
		self.write_header_string(stream, number, chain, key, &format!("{}{}", value, unit))
	}

	pub fn delete_header_key(&mut self, stream: Stream, number: i64, chain: i64, key: &str) -> Result<()> {
		let (chain, block) = address(number, chain);
		self.file_mut(stream)?.remove_symbol(&chain, &block, key)
	}

	/// Logical `(key, value)` pairs of a block header.
	pub fn header_entries(&mut self, stream: Stream, number: i64, chain: i64) -> Result<Vec<(String, String)>> {
		let (chain, block) = address(number, chain);
		self.file_mut(stream)?.header_entries(&chain, &block)
	}

	// ---- payloads ----

	pub fn read_dimensions(&mut self, stream: Stream, number: i64, chain: i64) -> Result<Dimensions> {
		let (chain, block) = address(number, chain);
		self.file_mut(stream)?.dimensions(&chain, &block)
	}

	/// Dimensions and payload, converted to `as_type` when given.
	pub fn read_data(
		&mut self,
		stream: Stream,
		number: i64,
		chain: i64,
		as_type: Option<DataType>,
	) -> Result<(Dimensions, DataArray)> {
		let (chain, block) = address(number, chain);
		let file = self.file_mut(stream)?;
		let dims = file.dimensions(&chain, &block)?;
		let data = file.read_data(&chain, &block, as_type)?;
		Ok((dims, data))
	}

	/// A two-dimensional frame as `((columns, rows), data)`.
	pub fn read_frame(
		&mut self,
		stream: Stream,
		number: i64,
		chain: i64,
		as_type: Option<DataType>,
	) -> Result<((usize, usize), DataArray)> {
		let (chain, block) = address(number, chain);
		let file = self.file_mut(stream)?;
		let frame = file.frame(&chain, &block)?;
		let data = file.read_data(&chain, &block, as_type)?;
		Ok((frame, data))
	}

	/// Converts the payload into `out` and returns its dimensions.
	pub fn read_data_into(
		&mut self,
		stream: Stream,
		number: i64,
		chain: i64,
		as_type: DataType,
		out: &mut [u8],
	) -> Result<Dimensions> {
		let (chain, block) = address(number, chain);
		let file = self.file_mut(stream)?;
		file.read_data_into(&chain, &block, as_type, out)?;
		file.dimensions(&chain, &block)
	}

	/// Stored payload in machine order without the value offset.
	pub fn read_raw(&mut self, stream: Stream, number: i64, chain: i64) -> Result<(DataDescription, Vec<u8>)> {
		let (chain, block) = address(number, chain);
		self.file_mut(stream)?.read_raw(&chain, &block)
	}

	pub fn write_data(&mut self, stream: Stream, number: i64, chain: i64, dims: &Dimensions, data: &DataArray) -> Result<()> {
		let (chain, block) = address(number, chain);
		self.file_mut(stream)?.write_data(&chain, &block, dims, data)
	}

	pub fn write_raw(
		&mut self,
		stream: Stream,
		number: i64,
		chain: i64,
		dims: &Dimensions,
		data_type: DataType,
		bytes: Vec<u8>,
	) -> Result<()> {
		let (chain, block) = address(number, chain);
		self.file_mut(stream)?.write_raw(&chain, &block, dims, data_type, bytes)
	}

	// ---- named headers ----

	fn named(&self, key: &str) -> Result<&SymbolTable> {
		self.headers
			.get(key)
			.ok_or_else(|| BdfError::CouldNotFindSymbol { key: key.to_string() })
	}

	/// Creates an empty named header, replacing any header of that name.
	pub fn new_header(&mut self, key: &str) {
		self.headers.insert(key.to_string(), SymbolTable::default());
	}

	/// Copies a block header into the named header `key`.
	pub fn read_header(&mut self, stream: Stream, number: i64, chain: i64, key: &str) -> Result<usize> {
		let entries = self.header_entries(stream, number, chain)?;
		let table = self.headers.entry(key.to_string()).or_default();
		for (k, v) in &entries {
			table.insert(k, v)?;
		}
		Ok(entries.len())
	}

	/// Copies the named header into a block; layout keys are left to the block.
	pub fn write_header(&mut self, stream: Stream, number: i64, chain: i64, key: &str) -> Result<()> {
		let entries = self.named(key)?.logical_entries();
		let (chain, block) = address(number, chain);
		let file = self.file_mut(stream)?;
		for (k, v) in entries.iter().filter(|(k, _)| !is_reserved(k)) {
			file.write_symbol(&chain, &block, k, v)?;
		}
		Ok(())
	}

	/// Lazy `(key, value)` enumeration of a named header.
	pub fn header_elements(&self, key: &str) -> Result<impl Iterator<Item = (String, String)> + '_> {
		let table = self.named(key)?;
		Ok(table
			.iter()
			.filter(|s| s.depth() == 0)
			.map(move |s| (s.key.clone(), table.value(&s.key).unwrap_or_default())))
	}

	pub fn search_header_element(&self, key: &str, element: &str) -> Result<String> {
		self.named(key)?
			.value(element)
			.ok_or_else(|| BdfError::CouldNotFindSymbol { key: element.to_string() })
	}

	/// Sets an element, creating the named header if needed.
	pub fn add_header_element(&mut self, key: &str, element: &str, value: &str) -> Result<()> {
		self.headers.entry(key.to_string()).or_default().insert(element, value)
	}

	pub fn delete_header_element(&mut self, key: &str, element: &str) -> Result<()> {
		self.headers
			.get_mut(key)
			.ok_or_else(|| BdfError::CouldNotFindSymbol { key: key.to_string() })?
			.delete_key(element)
	}

	/// Drops a named header; false if there was none.
	pub fn free_header(&mut self, key: &str) -> bool {
		self.headers.remove(key).is_some()
	}

	pub fn print_header<W: Write>(&self, out: &mut W, key: &str) -> Result<()> {
		writeln!(out, "header {}", key)?;
		for (k, v) in self.header_elements(key)? {
			writeln!(out, "  {} = {}", k, v)?;
		}
		Ok(())
	}

	// ---- history ----

	/// Starts an empty history, replacing any history of that name.
	pub fn history_new(&mut self, key: &str) {
		self.histories.insert(key.to_string(), History::new());
	}

	pub fn history(&self, key: &str) -> Option<&History> {
		self.histories.get(key)
	}

	fn history_mut(&mut self, key: &str) -> &mut History {
		self.histories.entry(key.to_string()).or_default()
	}

	pub fn history_skip(&mut self, key: &str) {
		self.history_mut(key).skip();
	}

	pub fn history_take(&mut self, key: &str) {
		self.history_mut(key).take();
	}

	pub fn history_argv(&mut self, key: &str, arg: &str) {
		self.history_mut(key).argv(arg);
	}

	/// Reads the `History-<n>` lines of a block; returns how many were found.
	pub fn read_header_history(&mut self, stream: Stream, number: i64, chain: i64, key: &str) -> Result<usize> {
		let entries = self.header_entries(stream, number, chain)?;
		Ok(self.history_mut(key).read_entries(entries))
	}

	/// Writes the read lines and the command line into a block.
	pub fn write_header_history(&mut self, stream: Stream, number: i64, chain: i64, key: &str) -> Result<()> {
		let existing: Vec<u32> = self
			.header_entries(stream, number, chain)
			.or_else(|e| if e.is_not_found() { Ok(Vec::new()) } else { Err(e) })?
			.iter()
			.filter_map(|(k, _)| history_number(k))
			.collect();
		let entries = self.history_mut(key).entries(existing);
		for (k, v) in &entries {
			self.write_header_string(stream, number, chain, k, v)?;
		}
		Ok(())
	}

	/// Reads the history lines held in a named header.
	pub fn history_read_header(&mut self, header_key: &str, history_key: &str) -> Result<usize> {
		let entries = self.named(header_key)?.logical_entries();
		Ok(self.history_mut(history_key).read_entries(entries))
	}

	/// Writes a history into a named header, creating it if needed.
	pub fn history_write_header(&mut self, header_key: &str, history_key: &str) -> Result<()> {
		let history = self.history_mut(history_key).clone();
		let table = self.headers.entry(header_key.to_string()).or_default();
		let existing: Vec<u32> = table.keys().into_iter().filter_map(history_number).collect();
		for (k, v) in history.entries(existing) {
			table.insert(&k, &v)?;
		}
		Ok(())
	}

	pub fn history_copy(&mut self, copy: &str, key: &str) {
		let history = self.history_mut(key).clone();
		self.histories.insert(copy.to_string(), history);
	}

	pub fn history_free(&mut self, key: &str) -> bool {
		self.histories.remove(key).is_some()
	}

	pub fn history_print<W: Write>(&self, out: &mut W, key: &str) -> Result<()> {
		match self.histories.get(key) {
			Some(history) => history.print(out, key)?,
			None => writeln!(out, "history {} is empty", key)?,
		}
		Ok(())
	}

	// ---- diagnostics ----

	/// One line per open stream.
	pub fn print_file_table<W: Write>(&self, out: &mut W) -> Result<()> {
		for (stream, slot) in self.files.iter().enumerate() {
			if let Some(file) = slot {
				writeln!(
					out,
					"{:>3}  {:<4} {:<5?} {:>4} blocks  {}",
					stream,
					file.format(),
					file.mode(),
					file.catalog().block_ids().count(),
					file.path().display()
				)?;
			}
		}
		Ok(())
	}

	/// Catalog and every header of one stream.
	pub fn dump<W: Write>(&mut self, stream: Stream, out: &mut W) -> Result<()> {
		let file = self.file_mut(stream)?;
		file.write_catalog(out)?;
		let mut blocks = Vec::new();
		for chain in file.catalog().chains() {
			for id in chain.blocks() {
				blocks.push((chain.name.clone(), file.catalog().block(*id).name.clone()));
			}
		}
		for (chain, block) in blocks {
			writeln!(out, "{}.{}", block, chain)?;
			match file.header_entries(&chain, &block) {
				Ok(entries) => {
					for (k, v) in entries {
						writeln!(out, "  {} = {}", k, v)?;
					}
				}
				Err(e) => writeln!(out, "  ({})", e)?,
			}
		}
		Ok(())
	}
}

impl Drop for Engine {
	fn drop(&mut self) {
		if let Err(e) = self.close_all() {
			log::warn!("closing files on drop: {}", e);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	fn engine() -> Engine {
		Engine::new(EngineConfig::default())
	}

	#[test]
	fn test_address() {
		assert_eq!(address(3, 1), ("Image.Psd".to_string(), "3".to_string()));
		assert_eq!(address(3, -2), ("Image.Error.2".to_string(), "3".to_string()));
		assert_eq!(address(7, 0), ("General".to_string(), "All".to_string()));
	}

	#[test]
	fn test_typed_header_values() {
		let dir = TempDir::new().unwrap();
		let path = dir.path().join("typed.edf");
		let mut engine = engine();
		let s = engine.open(&path, OpenMode::New).unwrap();
		engine.write_header_long(s, 1, 1, "Count", -42).unwrap();
		engine.write_header_float(s, 1, 1, "Wavelength", 1.5e-10).unwrap();
		engine.write_header_unit(s, 1, 1, "Distance", 2.5, "m").unwrap();
		engine.write_header_line(s, 1, 1, "Comment", "first\nsecond").unwrap();
		engine.close(s).unwrap();

		let s = engine.open(&path, OpenMode::Read).unwrap();
		assert!(engine.test_header(s, 1, 1).unwrap());
		assert!(!engine.test_header(s, 2, 1).unwrap());
		assert_eq!(engine.read_header_long(s, 1, 1, "Count").unwrap(), -42);
		assert_eq!(engine.read_header_float(s, 1, 1, "Wavelength").unwrap(), 1.5e-10);
		assert_eq!(engine.read_header_string(s, 1, 1, "Distance").unwrap(), "2.5m");
		assert_eq!(engine.read_header_line(s, 1, 1, "Comment").unwrap(), "first");
		let err = engine.read_header_long(s, 1, 1, "Distance").unwrap_err();
		assert!(matches!(err, BdfError::NumberConversionFailed { .. }));
		let err = engine.read_header_long(s, 1, 1, "Missing").unwrap_err();
		assert!(err.is_not_found());
	}

	#[test]
	fn test_stream_table() {
		let dir = TempDir::new().unwrap();
		let path = dir.path().join("streams.edf");
		let mut engine = Engine::new(EngineConfig { max_files: 2, ..EngineConfig::default() });
		let a = engine.open(&path, OpenMode::New).unwrap();
		assert_eq!(engine.open(&path, OpenMode::New).unwrap(), a);
		assert!(matches!(engine.open(&path, OpenMode::Read), Err(BdfError::IncompatibleOpeningMode(_))));
		assert_eq!(engine.search_stream(&path), Some(a));
		let _b = engine.open(dir.path().join("b"), OpenMode::Temp).unwrap();
		let err = engine.open(dir.path().join("c"), OpenMode::Temp).unwrap_err();
		assert!(matches!(err, BdfError::NoMoreStreamsAvailable(2)));
		engine.close(a).unwrap();
		assert!(matches!(engine.close(a), Err(BdfError::NoFileOpen(_))));
		assert!(matches!(engine.file(99), Err(BdfError::InvalidStream(99))));
		assert!(engine.open_with(dir.path().join("d"), "sideways").is_err());
	}

	#[test]
	fn test_minmax_and_keys() {
		let dir = TempDir::new().unwrap();
		let mut engine = engine();
		let s = engine.open(dir.path().join("t"), OpenMode::Temp).unwrap();
		let dims = Dimensions::new(vec![2]);
		for n in [3, 1, 7] {
			engine.write_data(s, n, 1, &dims, &DataArray::from(vec![1u8, 2])).unwrap();
		}
		engine.write_data(s, 1, -1, &dims, &DataArray::from(vec![0u8, 0])).unwrap();
		assert_eq!(engine.search_minmax_number(s, 1).unwrap(), (1, 7));
		assert_eq!(engine.block_keys(s, 1).unwrap(), vec!["1", "3", "7"]);
		assert_eq!(engine.chain_keys(s).unwrap(), vec!["Image.Error", "Image.Psd"]);
		assert!(engine.search_minmax_number(s, 5).unwrap_err().is_not_found());
	}

	#[test]
	fn test_named_headers() {
		let dir = TempDir::new().unwrap();
		let mut engine = engine();
		let s = engine.open(dir.path().join("t"), OpenMode::Temp).unwrap();
		engine.write_header_string(s, 1, 1, "Title", "sample").unwrap();
		engine.write_header_string(s, 1, 1, "Time", "12:00").unwrap();

		engine.new_header("copy");
		assert_eq!(engine.read_header(s, 1, 1, "copy").unwrap(), 2);
		assert_eq!(engine.search_header_element("copy", "Title").unwrap(), "sample");
		engine.add_header_element("copy", "Title", "changed").unwrap();
		engine.delete_header_element("copy", "Time").unwrap();
		let keys: Vec<String> = engine.header_elements("copy").unwrap().map(|(k, _)| k).collect();
		assert_eq!(keys, vec!["Title".to_string()]);

		engine.write_header(s, 2, 1, "copy").unwrap();
		assert_eq!(engine.read_header_string(s, 2, 1, "Title").unwrap(), "changed");
		assert!(engine.free_header("copy"));
		assert!(engine.search_header_element("copy", "Title").unwrap_err().is_not_found());
	}

	#[test]
	fn test_history_round_trip() {
		let dir = TempDir::new().unwrap();
		let mut engine = engine();
		let s = engine.open(dir.path().join("t"), OpenMode::Temp).unwrap();
		engine.write_header_string(s, 1, 1, "History-1", "acquire -t 10").unwrap();

		engine.history_new("run");
		assert_eq!(engine.read_header_history(s, 1, 1, "run").unwrap(), 1);
		engine.history_argv("run", "reduce");
		engine.history_argv("run", "in put.edf");
		engine.history_skip("run");
		engine.history_argv("run", "-v");
		engine.write_header_history(s, 2, 1, "run").unwrap();
		assert_eq!(engine.read_header_string(s, 2, 1, "History-1").unwrap(), "acquire -t 10");
		assert_eq!(engine.read_header_string(s, 2, 1, "History-2").unwrap(), "reduce \"in put.edf\"");

		engine.history_copy("again", "run");
		engine.history_write_header("named", "again").unwrap();
		assert_eq!(engine.search_header_element("named", "History-2").unwrap(), "reduce \"in put.edf\"");
		engine.history_new("other");
		assert_eq!(engine.history_read_header("named", "other").unwrap(), 2);
		assert!(engine.history_free("other"));
	}

	#[test]
	fn test_settings_reach_open_files() {
		let dir = TempDir::new().unwrap();
		let path = dir.path().join("typed.edf");
		let mut engine = engine();
		let s = engine.open(&path, OpenMode::New).unwrap();
		engine.set_output_type(Some(DataType::I32));
		engine.write_data(s, 1, 1, &Dimensions::new(vec![3]), &DataArray::from(vec![1u16, 2, 3])).unwrap();
		engine.close(s).unwrap();
		engine.reset_config();
		assert_eq!(engine.config().default_output_type, None);

		let s = engine.open(&path, OpenMode::Read).unwrap();
		let (dims, data) = engine.read_data(s, 1, 1, None).unwrap();
		assert_eq!(dims, Dimensions::new(vec![3]));
		assert_eq!(data.into_vec::<i32>().unwrap(), vec![1, 2, 3]);
		let mut table = Vec::new();
		engine.print_file_table(&mut table).unwrap();
		assert!(String::from_utf8(table).unwrap().contains("typed.edf"));
	}
}
