//! One open data file: channel, block catalog and the block life cycle.
//!
//! Blocks are located once when the file is opened. Headers are parsed when
//! a block is first touched and payloads are read when first requested. Only
//! one block is active at a time; switching blocks flushes the previous one.

use crate::catalog::{
	Block, BlockFlags, BlockId, BlockState, Catalog, DataDescription, ExternalPayload,
};
use crate::codec::{self, DataArray};
use crate::codec::compress::{deflate_stream, inflate_stream, sniff};
use crate::codec::raster::number_to_order;
use crate::config::EngineConfig;
use crate::error::{BdfError, Result};
use crate::header::emit::{escape_value, padded_len, patch_value};
use crate::header::lexer::find_header_start;
use crate::header::symbols::{continuation_key, is_reserved, split_key};
use crate::header::{
	self, dim_key, KeyOrderTable, Scan, SortMode, SymbolTable, KEY_BINARY_FILE_NAME,
	KEY_BINARY_FILE_POSITION, KEY_BINARY_FILE_SIZE, KEY_BINARY_SIZE, KEY_BLOCK_BOUNDARY,
	KEY_BLOCK_ID, KEY_BYTE_ORDER, KEY_COMPRESSION, KEY_DATA_BLOCKS, KEY_DATA_TYPE,
	KEY_FORMAT_VERSION, KEY_RASTER, KEY_SIZE, KEY_VALUE_OFFSET,
};
use crate::types::{
	ByteOrder, Compression, DataType, Dimensions, OpenMode, GENERAL_BLOCK, GENERAL_CHAIN,
};
use memmap2::Mmap;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// First read when looking for a header; grows until the header closes.
const SCAN_CHUNK: usize = 4096;

const DEFAULT_CHAIN: &str = "Image.Psd";

/// Upper bound of the deflate expansion ratio.
const MAX_INFLATE_RATIO: u64 = 1032;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
	/// Block data format.
	Bdf,
	/// Legacy header index plus raw companion files.
	Ldf,
}

impl fmt::Display for Format {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			Format::Bdf => "BDF",
			Format::Ldf => "LDF",
		})
	}
}

/// Splits `block.chain` at its first dot.
pub fn split_block_id(id: &str) -> (String, String) {
	match id.trim().split_once('.') {
		Some((block, chain)) => (block.to_string(), chain.to_string()),
		None => (id.trim().to_string(), DEFAULT_CHAIN.to_string()),
	}
}

fn parse_critical<T: FromStr>(table: &SymbolTable, key: &str) -> Result<Option<T>> {
	match table.value(key) {
		None => Ok(None),
		Some(value) => value
			.trim()
			.parse()
			.map(Some)
			.map_err(|_| BdfError::NumberConversionFailed { key: key.to_string(), value }),
	}
}

/// Parses a non-critical key, falling back to `default` with a warning.
fn parse_or<T: FromStr + fmt::Display + Copy>(table: &SymbolTable, key: &str, default: T, block: &str) -> T {
	match table.value(key) {
		None => default,
		Some(value) => value.trim().parse().unwrap_or_else(|_| {
			log::warn!("block {}: cannot read {} = {:?}, using {}", block, key, value, default);
			default
		}),
	}
}

/// Decodes the binary description of a header.
///
/// `Ok(None)` means the header declares no dimensions and carries no array.
pub fn describe(
	table: &SymbolTable,
	binary_size: u64,
	block: &str,
	offset: u64,
	strict: bool,
) -> Result<Option<DataDescription>> {
	let mut extents = Vec::new();
	loop {
		let key = dim_key(extents.len() + 1);
		let Some(value) = table.value(&key) else {
			break;
		};
		match value.trim().parse::<i64>() {
			Ok(extent) if extent >= 1 => extents.push(extent as usize),
			_ => return Err(BdfError::CouldNotReadDimension { key, value }),
		}
	}
	if extents.is_empty() {
		return Ok(None);
	}
	let data_type = match table.value(KEY_DATA_TYPE) {
		Some(name) => name.trim().parse::<DataType>().map_err(|_| BdfError::ConversionUnsupported {
			from: name.clone(),
			to: "machine type".to_string(),
		})?,
		None => return Err(BdfError::MissingKeyDefinition(KEY_DATA_TYPE.to_string())),
	};
	let byte_order = match table.value(KEY_BYTE_ORDER) {
		Some(value) => value.trim().parse().unwrap_or_else(|_| {
			log::warn!("block {}: unknown byte order {:?}, assuming HighByteFirst", block, value);
			ByteOrder::HighByteFirst
		}),
		None => {
			log::warn!("block {}: no {} key, assuming HighByteFirst", block, KEY_BYTE_ORDER);
			ByteOrder::HighByteFirst
		}
	};
	let compression = match table.value(KEY_COMPRESSION) {
		Some(value) => value
			.trim()
			.parse()
			.map_err(|_| BdfError::DataConversionFailed(format!("unknown compression {:?}", value)))?,
		None => Compression::None,
	};
	let description = DataDescription {
		data_type,
		byte_order,
		raster: parse_or(table, KEY_RASTER, 1i64, block),
		compression,
		value_offset: parse_or(table, KEY_VALUE_OFFSET, 0i64, block),
		dims: Dimensions::new(extents),
		binary_size,
	};
	if number_to_order(description.dims.rank(), description.raster).is_none() {
		return Err(BdfError::DataConversionFailed(format!(
			"block {}: raster configuration {} is invalid for {} dimensions",
			block,
			description.raster,
			description.dims.rank()
		)));
	}
	let expected = description.expected_size().ok_or_else(|| BdfError::CouldNotReadDimension {
		key: dim_key(description.dims.rank()),
		value: format!("{} elements of {} bytes overflow", description.dims, data_type.size_of()),
	})?;
	if compression == Compression::None && binary_size != expected {
		let message = format!("binary size {} differs from {} bytes implied by the dimensions", binary_size, expected);
		if strict {
			return Err(BdfError::read(offset, message));
		}
		log::warn!("block {}: {}", block, message);
	}
	Ok(Some(description))
}

fn map_external(payload: &ExternalPayload) -> Result<Vec<u8>> {
	let file = File::open(&payload.path)
		.map_err(|source| BdfError::CouldNotOpenFile { path: payload.path.clone(), source })?;
	// SAFETY: the map is read-only and dropped before returning.
	let map = unsafe { Mmap::map(&file) }.map_err(|e| BdfError::read(payload.offset, e.to_string()))?;
	let range = usize::try_from(payload.offset)
		.ok()
		.zip(usize::try_from(payload.length).ok())
		.and_then(|(start, length)| Some(start..start.checked_add(length)?))
		.filter(|range| range.end <= map.len());
	match range {
		Some(range) => Ok(map[range].to_vec()),
		None => Err(BdfError::read(
			payload.offset,
			format!(
				"{} holds {} bytes, {} at offset {} needed",
				payload.path.display(),
				map.len(),
				payload.length,
				payload.offset
			),
		)),
	}
}

/// Zeroed buffer of `len` bytes.
pub(crate) fn allocate(len: u64) -> Result<Vec<u8>> {
	let len = usize::try_from(len).map_err(|_| BdfError::CouldNotMallocMemory(usize::MAX))?;
	let mut buf = Vec::new();
	buf.try_reserve_exact(len).map_err(|_| BdfError::CouldNotMallocMemory(len))?;
	buf.resize(len, 0);
	Ok(buf)
}

/// Decompresses, swaps and normalizes a stored payload into canonical order.
pub fn decode_payload(raw: Vec<u8>, description: &DataDescription, offset: u64) -> Result<Vec<u8>> {
	let expected = description
		.expected_size()
		.ok_or_else(|| BdfError::read(offset, format!("{} elements do not fit in memory", description.dims)))?;
	if description.compression != Compression::None
		&& expected > (raw.len() as u64).saturating_mul(MAX_INFLATE_RATIO).saturating_add(64)
	{
		return Err(BdfError::read(
			offset,
			format!("{} compressed bytes cannot inflate to {} bytes", raw.len(), expected),
		));
	}
	let expected = usize::try_from(expected).map_err(|_| BdfError::CouldNotMallocMemory(usize::MAX))?;
	let mut bytes = if description.compression == Compression::None {
		let mut raw = raw;
		if raw.len() < expected {
			return Err(BdfError::read(offset, format!("payload holds {} of {} bytes", raw.len(), expected)));
		}
		raw.truncate(expected);
		raw
	} else {
		let mut out = allocate(expected as u64)?;
		let n = codec::inflate_into(&raw, description.compression, &mut out)?;
		if n < expected {
			return Err(BdfError::read(offset, format!("payload inflates to {} of {} bytes", n, expected)));
		}
		out
	};
	let item = description.data_type.size_of();
	codec::swap_to_native(&mut bytes, item, description.byte_order);
	if description.raster != 1 {
		let mut canonical = allocate(expected as u64)?;
		codec::normalize(&mut canonical, &bytes, description.dims.extents(), description.raster, item)?;
		bytes = canonical;
	}
	Ok(bytes)
}

/// Lays a canonical payload out as it is stored.
pub fn encode_payload(canonical: &[u8], description: &DataDescription) -> Result<Vec<u8>> {
	let item = description.data_type.size_of();
	let mut payload = if description.raster == 1 {
		canonical.to_vec()
	} else {
		let mut stored = vec![0u8; canonical.len()];
		codec::denormalize(&mut stored, canonical, description.dims.extents(), description.raster, item)?;
		stored
	};
	codec::swap_to_native(&mut payload, item, description.byte_order);
	if description.compression != Compression::None {
		payload = codec::deflate(&payload, description.compression)?;
	}
	Ok(payload)
}

pub struct BdfFile {
	path: PathBuf,
	mode: OpenMode,
	format: Format,
	channel: Option<File>,
	/// Deflate the spool into `path` on close.
	compress_on_close: Compression,
	boundary: u64,
	version: Option<String>,
	catalog: Catalog,
	active: Option<BlockId>,
	last_written: Option<BlockId>,
	next_sequence: u64,
	/// End of the last complete block on disk.
	end: u64,
	config: EngineConfig,
	order: KeyOrderTable,
}

impl fmt::Debug for BdfFile {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("BdfFile")
			.field("path", &self.path)
			.field("mode", &self.mode)
			.field("format", &self.format)
			.field("boundary", &self.boundary)
			.field("end", &self.end)
			.finish()
	}
}

impl BdfFile {
	fn empty(path: PathBuf, mode: OpenMode, format: Format, config: &EngineConfig, order: &KeyOrderTable) -> Self {
		Self {
			path,
			mode,
			format,
			channel: None,
			compress_on_close: Compression::None,
			boundary: config.block_boundary.max(1),
			version: None,
			catalog: Catalog::new(),
			active: None,
			last_written: None,
			next_sequence: 1,
			end: 0,
			config: config.clone(),
			order: order.clone(),
		}
	}

	/// Opens a block data file. Paths ending in `.gz` or `.Z` are
	/// transparently decompressed on read and compressed on close.
	pub fn open(path: impl AsRef<Path>, mode: OpenMode, config: &EngineConfig, order: &KeyOrderTable) -> Result<Self> {
		let path = path.as_ref().to_path_buf();
		let mut file = Self::empty(path.clone(), mode, Format::Bdf, config, order);
		if mode == OpenMode::Temp {
			return Ok(file);
		}
		let wrapper = Compression::from_path(&path);
		if wrapper != Compression::None && matches!(mode, OpenMode::Old | OpenMode::Any) {
			return Err(BdfError::IncompatibleOpeningMode(format!(
				"{:?} on compressed file {}",
				mode,
				path.display()
			)));
		}
		let open_error = |source| BdfError::CouldNotOpenFile { path: path.clone(), source };
		let channel = match mode {
			OpenMode::Read => {
				let source = File::open(&path).map_err(open_error)?;
				if wrapper == Compression::None {
					source
				} else {
					spool(source, &path)?
				}
			}
			OpenMode::Old => OpenOptions::new().read(true).write(true).open(&path).map_err(open_error)?,
			OpenMode::New if wrapper != Compression::None => {
				// create the target now so that permission problems surface at open
				File::create(&path).map_err(open_error)?;
				file.compress_on_close = wrapper;
				tempfile::tempfile()?
			}
			OpenMode::New => OpenOptions::new()
				.read(true)
				.write(true)
				.create(true)
				.truncate(true)
				.open(&path)
				.map_err(open_error)?,
			OpenMode::Any => OpenOptions::new()
				.read(true)
				.write(true)
				.create(true)
				.truncate(false)
				.open(&path)
				.map_err(open_error)?,
			OpenMode::Temp => return Ok(file),
		};
		file.attach(channel)?;
		Ok(file)
	}

	/// Reads a block file whose content was already spooled into `channel`.
	pub(crate) fn open_spooled(path: PathBuf, channel: File, config: &EngineConfig, order: &KeyOrderTable) -> Result<Self> {
		let mut file = Self::empty(path, OpenMode::Read, Format::Bdf, config, order);
		file.attach(channel)?;
		Ok(file)
	}

	fn attach(&mut self, channel: File) -> Result<()> {
		self.channel = Some(channel);
		self.locate()?;
		if self.mode.is_writable() && self.catalog.block_ids().next().is_none() && self.config.general_block {
			self.create_general_block()?;
		}
		Ok(())
	}

	/// Wraps a catalog built elsewhere; the file is read-only.
	pub(crate) fn from_catalog(
		path: PathBuf,
		format: Format,
		catalog: Catalog,
		config: &EngineConfig,
		order: &KeyOrderTable,
	) -> Self {
		let mut file = Self::empty(path, OpenMode::Read, format, config, order);
		file.next_sequence += catalog.block_ids().count() as u64;
		file.catalog = catalog;
		file
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	pub fn mode(&self) -> OpenMode {
		self.mode
	}

	pub fn format(&self) -> Format {
		self.format
	}

	pub fn block_boundary(&self) -> u64 {
		self.boundary
	}

	/// Format version declared by the general block.
	pub fn version(&self) -> Option<&str> {
		self.version.as_deref()
	}

	pub fn catalog(&self) -> &Catalog {
		&self.catalog
	}

	/// Replaces the settings used by later writes.
	pub fn configure(&mut self, config: &EngineConfig, order: &KeyOrderTable) {
		self.config = config.clone();
		self.order = order.clone();
	}

	pub fn is_writable(&self) -> bool {
		self.format == Format::Bdf && self.mode.is_writable()
	}

	fn check_writable(&self) -> Result<()> {
		if self.is_writable() {
			Ok(())
		} else {
			Err(BdfError::FileIsNotWritable(self.path.clone()))
		}
	}

	fn channel(&mut self, offset: u64) -> Result<&mut File> {
		self.channel
			.as_mut()
			.ok_or_else(|| BdfError::read(offset, "file has no data channel"))
	}

	fn read_at(&mut self, offset: u64, len: usize) -> Result<Vec<u8>> {
		let channel = self.channel(offset)?;
		channel.seek(SeekFrom::Start(offset))?;
		let mut buf = vec![0u8; len];
		channel
			.read_exact(&mut buf)
			.map_err(|e| BdfError::read(offset, e.to_string()))?;
		Ok(buf)
	}

	fn write_at(&mut self, offset: u64, bytes: &[u8]) -> Result<()> {
		let channel = self.channel(offset)?;
		channel.seek(SeekFrom::Start(offset))?;
		channel.write_all(bytes)?;
		Ok(())
	}

	// ---- locate pass ----

	fn locate(&mut self) -> Result<()> {
		let len = self.channel(0)?.metadata()?.len();
		let mut pos = 0u64;
		let mut last_good = String::from("none");
		while pos < len {
			match self.locate_block(pos, len) {
				Ok(Some((next, id))) => {
					let (block, chain) = self.catalog.identity(id);
					last_good = format!("{}.{}", block, chain);
					pos = next;
				}
				Ok(None) => break,
				Err(err @ BdfError::ErrorReadingGeneralBlock(_)) => return Err(err),
				Err(err) => {
					let err = BdfError::ErrorLocatingBlocks { offset: pos, last_good, message: err.to_string() };
					// writing after a block that cannot be read would overwrite it
					if pos == 0 && self.mode.is_writable() {
						return Err(err);
					}
					log::warn!("{}: {}; catalog truncated", self.path.display(), err);
					break;
				}
			}
		}
		self.end = pos;
		log::debug!("{}: located {} blocks in {} bytes", self.path.display(), self.catalog.block_ids().count(), pos);
		Ok(())
	}

	/// Records the block starting at `pos`; returns the next block offset.
	fn locate_block(&mut self, pos: u64, len: u64) -> Result<Option<(u64, BlockId)>> {
		let mut want = SCAN_CHUNK;
		let parsed = loop {
			let take = (want as u64).min(len - pos) as usize;
			let buf = self.read_at(pos, take)?;
			let eof = pos + take as u64 == len;
			match header::scan_header(&buf, pos, eof)? {
				Scan::Complete(parsed) => break parsed,
				Scan::Incomplete if eof => {
					if find_header_start(&buf).is_none() {
						return Ok(None);
					}
					return Err(BdfError::CouldNotFindHeader { offset: pos, reason: "header is truncated".to_string() });
				}
				Scan::Incomplete => want *= 4,
			}
		};
		if self.boundary > 1 && parsed.end % self.boundary != 0 {
			log::warn!(
				"{}: header end at offset {} is not aligned on {} bytes, using block boundary 1",
				self.path.display(),
				parsed.end,
				self.boundary
			);
			self.boundary = 1;
		}
		let table = SymbolTable::from_entries(parsed.entries, SortMode::default());
		let (block_key, chain_key) = match table.value(KEY_BLOCK_ID) {
			Some(id) => split_block_id(&id),
			None => ((self.catalog.written_data_blocks() + 1).to_string(), DEFAULT_CHAIN.to_string()),
		};
		let is_general = chain_key == GENERAL_CHAIN;
		if is_general {
			self.version = table.value(KEY_FORMAT_VERSION);
			let boundary = parse_critical::<u64>(&table, KEY_BLOCK_BOUNDARY)
				.map_err(|e| BdfError::ErrorReadingGeneralBlock(e.to_string()))?;
			if let Some(boundary) = boundary {
				if boundary >= 1 && self.boundary != 1 {
					self.boundary = boundary;
				}
			}
		}
		let binary_size = match parse_critical::<u64>(&table, KEY_BINARY_SIZE)? {
			Some(size) => Some(size),
			None => parse_critical::<u64>(&table, KEY_SIZE)?,
		};
		let external = match table.value(KEY_BINARY_FILE_NAME) {
			Some(name) => {
				let dir = self.path.parent().map(Path::to_path_buf).unwrap_or_default();
				Some(ExternalPayload {
					path: dir.join(name.trim()),
					offset: parse_critical(&table, KEY_BINARY_FILE_POSITION)?.unwrap_or(0),
					length: parse_critical(&table, KEY_BINARY_FILE_SIZE)?.or(binary_size).unwrap_or(0),
				})
			}
			None => None,
		};
		let data_len = if external.is_some() { 0 } else { binary_size.unwrap_or(0) };
		let data_end = parsed.end.checked_add(data_len).filter(|end| *end <= len);
		if data_end.is_none() {
			return Err(BdfError::read(parsed.end, format!("payload of {} bytes runs past the end of file", data_len)));
		}
		let next = parsed.end.saturating_add(padded_len(data_len, self.boundary)).min(len);

		let id = self.catalog.insert_block(&chain_key, &block_key)?;
		let sequence = self.next_sequence;
		self.next_sequence += 1;
		let block = self.catalog.block_mut(id);
		if block.is_on_disk() {
			log::warn!("block {}.{} appears twice, keeping the one at offset {}", block_key, chain_key, pos);
		}
		let mut flags = BlockFlags::HEADER_EXTERNAL | BlockFlags::FIXED_LAYOUT;
		if external.is_some() {
			flags |= BlockFlags::DATA_EXTERNAL;
		}
		if is_general {
			flags |= BlockFlags::INTERNAL_HEADER;
		}
		*block = Block {
			name: block.name.clone(),
			chain: block.chain,
			header_offset: pos,
			header_len: parsed.end - pos,
			data_offset: parsed.end,
			data_len,
			external,
			symbols: is_general.then_some(table),
			description: None,
			data: None,
			sequence,
			flags,
			state: BlockState::Unopened,
		};
		Ok(Some((next, id)))
	}

	fn create_general_block(&mut self) -> Result<()> {
		let create = |file: &mut Self| -> Result<()> {
			let id = file.catalog.insert_block(GENERAL_CHAIN, GENERAL_BLOCK)?;
			let mut table = SymbolTable::default();
			table.insert(KEY_FORMAT_VERSION, crate::DATA_FORMAT_VERSION)?;
			table.insert(KEY_BLOCK_BOUNDARY, &file.boundary.to_string())?;
			table.insert(KEY_DATA_BLOCKS, "0")?;
			let block = file.catalog.block_mut(id);
			block.symbols = Some(table);
			block.flags |= BlockFlags::INTERNAL_HEADER | BlockFlags::HEADER_CHANGED;
			block.sequence = 0;
			file.version = Some(crate::DATA_FORMAT_VERSION.to_string());
			file.append_block(id)
		};
		create(self).map_err(|e| BdfError::ErrorCreatingGeneralBlock(e.to_string()))
	}

	// ---- enumeration ----

	/// Chain names in order, without the general chain.
	pub fn chain_keys(&self) -> Vec<String> {
		self.catalog
			.chains()
			.filter(|c| c.name != GENERAL_CHAIN)
			.filter(|c| c.blocks().iter().any(|id| !self.catalog.block(*id).is_bad()))
			.map(|c| c.name.clone())
			.collect()
	}

	/// Block names of a chain in numeric order.
	pub fn block_keys(&self, chain: &str) -> Result<Vec<String>> {
		let id = self
			.catalog
			.find_chain(chain)
			.ok_or_else(|| BdfError::CouldNotFindBlock { chain: chain.to_string(), block: "*".to_string() })?;
		Ok(self
			.catalog
			.chain(id)
			.blocks()
			.iter()
			.map(|b| self.catalog.block(*b))
			.filter(|b| !b.is_bad())
			.map(|b| b.name.clone())
			.collect())
	}

	pub fn has_block(&self, chain: &str, block: &str) -> bool {
		self.catalog.find_block(chain, block).is_some_and(|id| !self.catalog.block(id).is_bad())
	}

	pub fn minmax_number(&self, chain: &str) -> Option<(i64, i64)> {
		self.catalog.minmax_number(chain)
	}

	/// `(block, chain)` of the block written last.
	pub fn last_written(&self) -> Option<(String, String)> {
		self.last_written.map(|id| self.catalog.identity(id))
	}

	// ---- block access ----

	fn existing(&self, chain: &str, block: &str) -> Result<BlockId> {
		let id = self.catalog.find_block(chain, block).ok_or_else(|| BdfError::CouldNotFindBlock {
			chain: chain.to_string(),
			block: block.to_string(),
		})?;
		if self.catalog.block(id).is_bad() {
			return Err(BdfError::BadBlock(format!("{}.{}", block, chain)));
		}
		Ok(id)
	}

	fn for_write(&mut self, chain: &str, block: &str) -> Result<BlockId> {
		self.check_writable()?;
		let id = self.catalog.insert_block(chain, block)?;
		let temp = self.mode == OpenMode::Temp;
		let entry = self.catalog.block_mut(id);
		if entry.is_bad() {
			return Err(BdfError::BadBlock(format!("{}.{}", block, chain)));
		}
		if !entry.is_on_disk() && entry.state == BlockState::Unopened && entry.symbols.is_none() {
			entry.sequence = self.next_sequence;
			self.next_sequence += 1;
			if temp {
				entry.flags |= BlockFlags::INTERNAL_HEADER | BlockFlags::INTERNAL_DATA;
			}
		}
		Ok(id)
	}

	fn activate(&mut self, id: BlockId) -> Result<()> {
		if self.active == Some(id) {
			return Ok(());
		}
		if let Some(previous) = self.active.take() {
			self.flush_block(previous)?;
		}
		self.active = Some(id);
		Ok(())
	}

	fn ensure_header(&mut self, id: BlockId) -> Result<()> {
		let block = self.catalog.block(id);
		if block.symbols.is_some() {
			return Ok(());
		}
		if !block.flags.contains(BlockFlags::HEADER_EXTERNAL) {
			self.catalog.block_mut(id).symbols = Some(SymbolTable::default());
			return Ok(());
		}
		let (offset, len) = (block.header_offset, block.header_len as usize);
		let text = self.read_at(offset, len)?;
		let table = match header::scan_header(&text, offset, true)? {
			Scan::Complete(parsed) => SymbolTable::from_entries(parsed.entries, SortMode::default()),
			Scan::Incomplete => {
				return Err(BdfError::CouldNotFindHeader { offset, reason: "header is not closed".to_string() })
			}
		};
		let block = self.catalog.block_mut(id);
		block.symbols = Some(table);
		if matches!(block.state, BlockState::Unopened | BlockState::Flushed) {
			block.state = BlockState::HeaderLoaded;
		}
		Ok(())
	}

	fn open_header(&mut self, chain: &str, block: &str) -> Result<BlockId> {
		let id = self.existing(chain, block)?;
		self.activate(id)?;
		self.ensure_header(id)?;
		Ok(id)
	}

	fn table(&self, id: BlockId) -> &SymbolTable {
		static EMPTY: once_cell::sync::Lazy<SymbolTable> = once_cell::sync::Lazy::new(SymbolTable::default);
		self.catalog.block(id).symbols.as_ref().unwrap_or(&EMPTY)
	}

	/// Symbol table of a block, parsed on first access.
	pub fn symbols(&mut self, chain: &str, block: &str) -> Result<&SymbolTable> {
		let id = self.open_header(chain, block)?;
		Ok(self.table(id))
	}

	/// Logical `(key, value)` pairs of a block in table order.
	pub fn header_entries(&mut self, chain: &str, block: &str) -> Result<Vec<(String, String)>> {
		Ok(self.symbols(chain, block)?.logical_entries())
	}

	/// Logical value of `key`, falling back to the general block for
	/// keys outside the reserved prefix.
	pub fn lookup(&mut self, chain: &str, block: &str, key: &str) -> Result<String> {
		let id = self.open_header(chain, block)?;
		if let Some(value) = self.table(id).value(key) {
			return Ok(value);
		}
		if !is_reserved(key) {
			if let Some(general) = self.catalog.general().filter(|g| *g != id) {
				self.ensure_header(general)?;
				if let Some(value) = self.table(general).value(key) {
					return Ok(value);
				}
			}
		}
		Err(BdfError::CouldNotFindSymbol { key: key.to_string() })
	}

	/// Sets a logical value, split into continuation entries where needed.
	pub fn write_symbol(&mut self, chain: &str, block: &str, key: &str, value: &str) -> Result<()> {
		let id = self.for_write(chain, block)?;
		self.activate(id)?;
		self.ensure_header(id)?;
		let base = split_key(key.trim()).0.to_string();
		let continuation = self.config.continuation_width.max(1);
		let line = self.config.max_line_width;
		let width = move |part: usize| {
			let mut width = continuation;
			if line > 0 {
				// `key = value ;` leaves the rest of the line for the value
				let key_len = continuation_key(&base, part as u32).len();
				width = width.min(line.saturating_sub(key_len + 5));
			}
			width.max(1)
		};
		let entry = self.catalog.block_mut(id);
		entry
			.symbols
			.get_or_insert_with(SymbolTable::default)
			.insert_as_string(key, value, width)?;
		entry.flags |= BlockFlags::HEADER_CHANGED;
		Ok(())
	}

	/// Removes a key and its continuation entries.
	pub fn remove_symbol(&mut self, chain: &str, block: &str, key: &str) -> Result<()> {
		self.check_writable()?;
		let id = self.open_header(chain, block)?;
		let entry = self.catalog.block_mut(id);
		entry.symbols.get_or_insert_with(SymbolTable::default).delete_key(key)?;
		entry.flags |= BlockFlags::HEADER_CHANGED;
		Ok(())
	}

	// ---- payloads ----

	fn describe_block(&mut self, id: BlockId) -> Result<DataDescription> {
		if let Some(description) = &self.catalog.block(id).description {
			return Ok(description.clone());
		}
		self.ensure_header(id)?;
		let block = self.catalog.block(id);
		let binary_size = block.external.as_ref().map(|e| e.length).unwrap_or(block.data_len);
		let name = format!("{}.{}", block.name, self.catalog.identity(id).1);
		let description = describe(self.table(id), binary_size, &name, block.data_offset, self.config.strict_binary_size)?
			.ok_or(BdfError::MissingArrayDimensions(name))?;
		self.catalog.block_mut(id).description = Some(description.clone());
		Ok(description)
	}

	fn load_payload(&mut self, id: BlockId) -> Result<DataDescription> {
		let description = self.describe_block(id)?;
		if self.catalog.block(id).data.is_some() {
			return Ok(description);
		}
		let block = self.catalog.block(id);
		let (offset, len, external) = (block.data_offset, block.data_len as usize, block.external.clone());
		let raw = match external {
			Some(payload) => map_external(&payload)?,
			None => self.read_at(offset, len)?,
		};
		let canonical = decode_payload(raw, &description, offset)?;
		let block = self.catalog.block_mut(id);
		block.data = Some(canonical);
		block.state = BlockState::DataLoaded;
		Ok(description)
	}

	/// Binary description of a block.
	pub fn description(&mut self, chain: &str, block: &str) -> Result<DataDescription> {
		let id = self.open_header(chain, block)?;
		self.describe_block(id)
	}

	pub fn dimensions(&mut self, chain: &str, block: &str) -> Result<Dimensions> {
		Ok(self.description(chain, block)?.dims)
	}

	/// `(columns, rows)` of a block that holds a single frame.
	pub fn frame(&mut self, chain: &str, block: &str) -> Result<(usize, usize)> {
		self.dimensions(chain, block)?
			.frame()
			.ok_or_else(|| BdfError::NotNdData { block: format!("{}.{}", block, chain), expected: 2 })
	}

	/// Canonical payload in the stored element type, machine order, no offset applied.
	pub fn read_raw(&mut self, chain: &str, block: &str) -> Result<(DataDescription, Vec<u8>)> {
		let id = self.open_header(chain, block)?;
		let description = self.load_payload(id)?;
		let data = self.catalog.block(id).data.clone().unwrap_or_default();
		Ok((description, data))
	}

	/// Payload converted to `as_type` (the stored type if `None`), value offset added.
	pub fn read_data(&mut self, chain: &str, block: &str, as_type: Option<DataType>) -> Result<DataArray> {
		let id = self.open_header(chain, block)?;
		let description = self.load_payload(id)?;
		let to = as_type.unwrap_or(description.data_type);
		let data = self.catalog.block(id).data.as_deref().unwrap_or_default();
		let bytes = codec::convert(data, description.data_type, to, description.value_offset)?;
		DataArray::from_native_bytes(to, &bytes)
	}

	/// Converts the payload into a caller buffer that must be large enough.
	pub fn read_data_into(&mut self, chain: &str, block: &str, as_type: DataType, out: &mut [u8]) -> Result<usize> {
		let array = self.read_data(chain, block, Some(as_type))?;
		let bytes = array.to_native_bytes();
		if out.len() < bytes.len() {
			return Err(BdfError::DataBufferTooSmall { required: bytes.len(), available: out.len() });
		}
		out[..bytes.len()].copy_from_slice(&bytes);
		Ok(bytes.len())
	}

	/// Stores a typed array; the value offset is subtracted on the way in.
	pub fn write_data(&mut self, chain: &str, block: &str, dims: &Dimensions, data: &DataArray) -> Result<()> {
		self.store(chain, block, dims, data.data_type(), data.to_native_bytes(), false)
	}

	/// Stores a machine-order buffer, taking ownership when no conversion is needed.
	pub fn write_raw(&mut self, chain: &str, block: &str, dims: &Dimensions, data_type: DataType, bytes: Vec<u8>) -> Result<()> {
		self.store(chain, block, dims, data_type, bytes, true)
	}

	fn store(
		&mut self,
		chain: &str,
		block: &str,
		dims: &Dimensions,
		data_type: DataType,
		mut bytes: Vec<u8>,
		owned: bool,
	) -> Result<()> {
		let name = format!("{}.{}", block, chain);
		if dims.rank() == 0 {
			return Err(BdfError::MissingArrayDimensions(name));
		}
		let required = dims
			.checked_element_count()
			.and_then(|count| count.checked_mul(data_type.size_of()))
			.ok_or_else(|| BdfError::CouldNotWriteDimension(format!("{} elements overflow", dims)))?;
		if bytes.len() < required {
			return Err(BdfError::DataBufferTooSmall { required, available: bytes.len() });
		}
		bytes.truncate(required);
		let id = self.for_write(chain, block)?;
		self.activate(id)?;
		self.ensure_header(id)?;
		if self.catalog.block(id).external.is_some() {
			return Err(BdfError::ExternalData(name));
		}
		if self.catalog.block(id).is_on_disk() {
			return Err(BdfError::write(name, "the block is already on disk and its payload cannot be rewritten"));
		}
		let value_offset = parse_or(self.table(id), KEY_VALUE_OFFSET, self.config.output_value_offset, &name);
		let to = self.config.default_output_type.unwrap_or(data_type);
		let converted = to != data_type || value_offset != 0;
		codec::convert_in_place(&mut bytes, data_type, to, value_offset.checked_neg().unwrap_or(i64::MAX))?;
		let entry = self.catalog.block_mut(id);
		entry.description = Some(DataDescription {
			data_type: to,
			byte_order: ByteOrder::native(),
			raster: 1,
			compression: Compression::None,
			value_offset,
			dims: dims.clone(),
			binary_size: required as u64,
		});
		entry.data = Some(bytes);
		entry.flags |= BlockFlags::DATA_CHANGED;
		entry.flags.set(BlockFlags::EXTERNAL_ALLOCATION, owned && !converted);
		entry.state = BlockState::DataLoaded;
		Ok(())
	}

	// ---- flushing ----

	/// Writes the binary description keys and returns the stored payload.
	fn synchronize(&mut self, id: BlockId) -> Result<Option<Vec<u8>>> {
		let (block_key, chain_key) = self.catalog.identity(id);
		let name = format!("{}.{}", block_key, chain_key);
		let default_compression = self.config.output_compression;
		let block = self.catalog.block_mut(id);
		let table = block.symbols.get_or_insert_with(SymbolTable::default);
		table.insert(KEY_BLOCK_ID, &name)?;
		let (Some(data), Some(description)) = (block.data.as_ref(), block.description.as_mut()) else {
			return Ok(None);
		};
		description.byte_order = match table.value(KEY_BYTE_ORDER) {
			Some(value) => value.trim().parse()?,
			None => ByteOrder::native(),
		};
		description.raster = parse_critical(table, KEY_RASTER)?.unwrap_or(1);
		if number_to_order(description.dims.rank(), description.raster).is_none() {
			return Err(BdfError::write(name, format!("invalid raster configuration {}", description.raster)));
		}
		description.compression = match table.value(KEY_COMPRESSION) {
			Some(value) => value.trim().parse()?,
			None => default_compression,
		};
		let payload = encode_payload(data, description)?;
		description.binary_size = payload.len() as u64;

		table.insert(KEY_BINARY_SIZE, &payload.len().to_string())?;
		table.insert(KEY_DATA_TYPE, description.data_type.as_str())?;
		table.insert(KEY_BYTE_ORDER, description.byte_order.as_str())?;
		for (axis, extent) in description.dims.extents().iter().enumerate() {
			table.insert(&dim_key(axis + 1), &extent.to_string())?;
		}
		let mut stale = description.dims.rank() + 1;
		while table.remove(&dim_key(stale)) {
			stale += 1;
		}
		table.insert(KEY_COMPRESSION, description.compression.as_str())?;
		if description.raster == 1 {
			table.remove(KEY_RASTER);
		} else {
			table.insert(KEY_RASTER, &description.raster.to_string())?;
		}
		if description.value_offset == 0 {
			table.remove(KEY_VALUE_OFFSET);
		} else {
			table.insert(KEY_VALUE_OFFSET, &description.value_offset.to_string())?;
		}
		Ok(Some(payload))
	}

	fn render(&mut self, id: BlockId, exact: Option<u64>) -> Result<Vec<u8>> {
		let minimum = if exact.is_some() { 0 } else { self.config.minimum_header_size };
		let write_size = self.config.write_header_size;
		let boundary = self.boundary;
		let order = &self.order;
		let table = self.catalog.block_mut(id).symbols.get_or_insert_with(SymbolTable::default);
		header::render_header(table, order, boundary, minimum, write_size, exact)
	}

	fn record_layout(&mut self, id: BlockId, text: &[u8], offset: u64) -> Result<()> {
		if let Scan::Complete(parsed) = header::scan_header(text, offset, true)? {
			if let Some(table) = self.catalog.block_mut(id).symbols.as_mut() {
				table.mark_written(&parsed.entries);
			}
		}
		Ok(())
	}

	/// Writes header, payload and padding at `offset`; the block is marked
	/// bad and the file cut back on failure.
	fn write_block(&mut self, id: BlockId, offset: u64, text: &[u8], payload: &[u8]) -> Result<u64> {
		let padded = padded_len(payload.len() as u64, self.boundary) as usize;
		let mut bytes = Vec::with_capacity(text.len() + padded);
		bytes.extend_from_slice(text);
		bytes.extend_from_slice(payload);
		bytes.resize(text.len() + padded, b' ');
		if let Err(err) = self.write_at(offset, &bytes) {
			let (block, chain) = self.catalog.identity(id);
			self.catalog.block_mut(id).flags |= BlockFlags::BAD_BLOCK;
			if let Some(channel) = self.channel.as_mut() {
				if let Err(cut) = channel.set_len(self.end) {
					log::warn!("{}: cannot cut file back to {} bytes: {}", self.path.display(), self.end, cut);
				}
			}
			return Err(BdfError::write(format!("{}.{}", block, chain), err.to_string()));
		}
		let block = self.catalog.block_mut(id);
		block.header_offset = offset;
		block.header_len = text.len() as u64;
		block.data_offset = offset + text.len() as u64;
		block.data_len = payload.len() as u64;
		block.flags |= BlockFlags::FIXED_LAYOUT | BlockFlags::HEADER_EXTERNAL;
		block.flags.remove(BlockFlags::HEADER_CHANGED | BlockFlags::DATA_CHANGED);
		block.state = BlockState::Flushed;
		self.record_layout(id, text, offset)?;
		Ok(offset + bytes.len() as u64)
	}

	fn append_block(&mut self, id: BlockId) -> Result<()> {
		let payload = self.synchronize(id)?.unwrap_or_default();
		let text = self.render(id, None)?;
		let start = self.end;
		self.end = self.write_block(id, start, &text, &payload)?;
		self.last_written = Some(id);
		let (block, chain) = self.catalog.identity(id);
		log::debug!("wrote block {}.{} at offset {} ({} payload bytes)", block, chain, start, payload.len());
		Ok(())
	}

	/// Brings an on-disk header up to date without moving other blocks.
	fn rewrite_header(&mut self, id: BlockId) -> Result<()> {
		let block = self.catalog.block(id);
		let Some(table) = &block.symbols else {
			return Ok(());
		};
		let name = format!("{}.{}", block.name, self.catalog.identity(id).1);
		let (offset, len) = (block.header_offset, block.header_len);
		let is_last = block.data_offset + padded_len(block.data_len, self.boundary) >= self.end;
		if !table.is_changed() {
			self.catalog.block_mut(id).flags.remove(BlockFlags::HEADER_CHANGED);
			return Ok(());
		}
		let patches: Option<Vec<(u64, Vec<u8>)>> = if table.needs_relayout() {
			None
		} else {
			table
				.changed_symbols()
				.map(|s| Some((s.value_offset?, patch_value(&escape_value(&s.value), s.value_capacity)?)))
				.collect()
		};
		if let Some(patches) = patches {
			for (offset, bytes) in patches {
				self.write_at(offset, &bytes)?;
			}
			let block = self.catalog.block_mut(id);
			if let Some(table) = block.symbols.as_mut() {
				table.mark_clean();
			}
			block.flags.remove(BlockFlags::HEADER_CHANGED);
			return Ok(());
		}
		match self.render(id, Some(len)) {
			Ok(text) => {
				self.write_at(offset, &text)?;
				self.record_layout(id, &text, offset)?;
				self.catalog.block_mut(id).flags.remove(BlockFlags::HEADER_CHANGED);
				Ok(())
			}
			Err(_) if is_last => {
				let block = self.catalog.block(id);
				let (data_offset, data_len) = (block.data_offset, block.data_len as usize);
				let payload = self.read_at(data_offset, data_len)?;
				let text = self.render(id, None)?;
				log::debug!("block {} outgrew its header, rewriting it at offset {}", name, offset);
				self.end = self.write_block(id, offset, &text, &payload)?;
				Ok(())
			}
			Err(err) => Err(BdfError::write(name, format!("header no longer fits in place: {}", err))),
		}
	}

	fn update_general_count(&mut self) -> Result<()> {
		let Some(general) = self.catalog.general() else {
			return Ok(());
		};
		self.ensure_header(general).map_err(|e| BdfError::ErrorReadingGeneralBlock(e.to_string()))?;
		let count = self.catalog.written_data_blocks();
		if let Some(table) = self.catalog.block_mut(general).symbols.as_mut() {
			table.insert(KEY_DATA_BLOCKS, &count.to_string())?;
		}
		self.rewrite_header(general)
	}

	fn release(&mut self, id: BlockId) {
		let block = self.catalog.block_mut(id);
		let reloadable = block.is_on_disk() || block.flags.contains(BlockFlags::DATA_EXTERNAL);
		if !reloadable {
			return;
		}
		if !block.flags.contains(BlockFlags::INTERNAL_HEADER) && !block.is_dirty() {
			block.symbols = None;
		}
		if !block.flags.intersects(BlockFlags::INTERNAL_DATA | BlockFlags::EXTERNAL_ALLOCATION) {
			block.data = None;
		}
		if block.symbols.is_none() && block.data.is_none() {
			block.state = BlockState::Unopened;
		}
	}

	fn flush_block(&mut self, id: BlockId) -> Result<()> {
		if self.mode == OpenMode::Temp {
			return Ok(());
		}
		if !self.is_writable() {
			self.release(id);
			return Ok(());
		}
		let block = self.catalog.block(id);
		if block.is_bad() {
			return Err(BdfError::BadBlock(block.name.clone()));
		}
		let general = self.catalog.general();
		if !block.is_on_disk() {
			self.append_block(id)?;
			if general != Some(id) {
				self.update_general_count()?;
			}
		} else if block.is_dirty() {
			self.rewrite_header(id)?;
		}
		self.release(id);
		Ok(())
	}

	/// Flushes the active block.
	pub fn flush(&mut self) -> Result<()> {
		match self.active.take() {
			Some(id) => self.flush_block(id),
			None => Ok(()),
		}
	}

	/// Flushes every pending block and finishes whole-file compression.
	pub fn close(mut self) -> Result<()> {
		let path = self.path.clone();
		let close_error = |e: BdfError| BdfError::CouldNotCloseFile { path: path.clone(), message: e.to_string() };
		self.flush().map_err(close_error)?;
		let pending: Vec<BlockId> = self
			.catalog
			.block_ids()
			.filter(|id| {
				let block = self.catalog.block(*id);
				!block.is_bad() && (!block.is_on_disk() || block.is_dirty())
			})
			.collect();
		for id in pending {
			self.flush_block(id).map_err(close_error)?;
		}
		let Some(mut channel) = self.channel.take() else {
			return Ok(());
		};
		if self.compress_on_close != Compression::None {
			let target = File::create(&self.path)
				.map_err(|source| BdfError::CouldNotOpenFile { path: self.path.clone(), source })?;
			channel.seek(SeekFrom::Start(0))?;
			let written = deflate_stream(&mut channel, target, self.compress_on_close).map_err(close_error)?;
			log::debug!("{}: compressed {} bytes into {}", self.path.display(), self.end, written);
		} else if self.mode.is_writable() {
			channel.sync_all().map_err(|e| close_error(e.into()))?;
		}
		Ok(())
	}

	/// Prints the catalog, one line per block.
	pub fn write_catalog<W: Write>(&mut self, out: &mut W) -> Result<()> {
		writeln!(out, "{} ({}, {:?}, block boundary {})", self.path.display(), self.format, self.mode, self.boundary)?;
		for chain in self.catalog.chains() {
			for id in chain.blocks() {
				let block = self.catalog.block(*id);
				let mut line = format!(
					"  {}.{}  header {}+{}  data {}+{}",
					block.name, chain.name, block.header_offset, block.header_len, block.data_offset, block.data_len
				);
				if let Some(external) = &block.external {
					line.push_str(&format!("  external {}@{}", external.path.display(), external.offset));
				}
				if block.is_bad() {
					line.push_str("  BAD");
				}
				writeln!(out, "{}", line)?;
			}
		}
		Ok(())
	}
}

/// Inflates a compressed file into an anonymous temporary file.
pub(crate) fn spool(mut source: File, path: &Path) -> Result<File> {
	let mut prefix = [0u8; 2];
	let n = source.read(&mut prefix)?;
	source.seek(SeekFrom::Start(0))?;
	let wrapper = sniff(&prefix[..n]);
	if wrapper == Compression::None && n > 0 {
		log::warn!("{}: no gzip or zlib signature, reading it uncompressed", path.display());
	}
	let mut spool = tempfile::tempfile()?;
	let inflated = inflate_stream(&mut source, &mut spool, wrapper)?;
	log::debug!("{}: inflated to {} bytes", path.display(), inflated);
	spool.seek(SeekFrom::Start(0))?;
	Ok(spool)
}
