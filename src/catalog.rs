//! Chains and blocks of one file, stored as an arena addressed by index.

use crate::error::{BdfError, Result};
use crate::header::symbols::compare_alphanumeric;
use crate::header::SymbolTable;
use crate::types::{ByteOrder, Compression, DataType, Dimensions, GENERAL_BLOCK, GENERAL_CHAIN};
use std::cmp::Ordering;
use std::path::PathBuf;

bitflags::bitflags! {
	#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
	pub struct BlockFlags: u16 {
		/// Header lives on disk.
		const HEADER_EXTERNAL     = 0b0000_0000_0001;
		/// Payload lives in another file.
		const DATA_EXTERNAL       = 0b0000_0000_0010;
		const HEADER_CHANGED      = 0b0000_0000_0100;
		const DATA_CHANGED        = 0b0000_0000_1000;
		/// Header and payload offsets are fixed on disk.
		const FIXED_LAYOUT        = 0b0000_0001_0000;
		/// Keep the symbol table in memory after a flush.
		const INTERNAL_HEADER     = 0b0000_0010_0000;
		/// Keep the payload in memory after a flush.
		const INTERNAL_DATA       = 0b0000_0100_0000;
		/// The payload buffer was handed over by the caller.
		const EXTERNAL_ALLOCATION = 0b0000_1000_0000;
		const BAD_BLOCK           = 0b0001_0000_0000;
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlockState {
	#[default]
	Unopened,
	HeaderLoaded,
	DataLoaded,
	Flushed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChainId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

/// Payload stored in a companion file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalPayload {
	pub path: PathBuf,
	pub offset: u64,
	pub length: u64,
}

/// Binary layout keys of a block, decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct DataDescription {
	pub data_type: DataType,
	pub byte_order: ByteOrder,
	pub raster: i64,
	pub compression: Compression,
	pub value_offset: i64,
	pub dims: Dimensions,
	/// Stored payload length, after compression.
	pub binary_size: u64,
}

impl DataDescription {
	/// Uncompressed payload length implied by type and dimensions, `None`
	/// if it does not fit in memory.
	pub fn expected_size(&self) -> Option<u64> {
		self.dims
			.checked_element_count()?
			.checked_mul(self.data_type.size_of())
			.map(|bytes| bytes as u64)
	}
}

#[derive(Debug, Clone, Default)]
pub struct Block {
	pub name: String,
	pub chain: Option<ChainId>,
	pub header_offset: u64,
	pub header_len: u64,
	pub data_offset: u64,
	/// Payload bytes in this file (0 for external payloads).
	pub data_len: u64,
	pub external: Option<ExternalPayload>,
	pub symbols: Option<SymbolTable>,
	pub description: Option<DataDescription>,
	/// Canonical payload in machine order, typed by `description.data_type`.
	pub data: Option<Vec<u8>>,
	pub sequence: u64,
	pub flags: BlockFlags,
	pub state: BlockState,
}

impl Block {
	pub fn is_on_disk(&self) -> bool {
		self.flags.contains(BlockFlags::FIXED_LAYOUT)
	}

	pub fn is_bad(&self) -> bool {
		self.flags.contains(BlockFlags::BAD_BLOCK)
	}

	pub fn is_dirty(&self) -> bool {
		self.flags.intersects(BlockFlags::HEADER_CHANGED | BlockFlags::DATA_CHANGED)
			|| self.symbols.as_ref().is_some_and(|s| s.is_changed())
	}
}

#[derive(Debug, Clone)]
pub struct Chain {
	pub name: String,
	blocks: Vec<BlockId>,
}

impl Chain {
	pub fn blocks(&self) -> &[BlockId] {
		&self.blocks
	}
}

/// Canonical spelling of a numeric block key: no `+`, no leading zeros.
pub fn normalize_block_key(key: &str) -> String {
	let trimmed = key.trim();
	let (negative, digits) = match trimmed.as_bytes().first() {
		Some(b'-') => (true, &trimmed[1..]),
		Some(b'+') => (false, &trimmed[1..]),
		_ => (false, trimmed),
	};
	if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
		return trimmed.to_string();
	}
	let digits = digits.trim_start_matches('0');
	match (digits.is_empty(), negative) {
		(true, _) => "0".to_string(),
		(false, true) => format!("-{}", digits),
		(false, false) => digits.to_string(),
	}
}

pub fn block_number(key: &str) -> Option<i64> {
	normalize_block_key(key).parse().ok()
}

/// Numeric keys by value ahead of non-numeric ones, which sort naturally.
pub fn compare_block_keys(a: &str, b: &str) -> Ordering {
	match (block_number(a), block_number(b)) {
		(Some(x), Some(y)) => x.cmp(&y),
		(Some(_), None) => Ordering::Less,
		(None, Some(_)) => Ordering::Greater,
		(None, None) => compare_alphanumeric(a, b),
	}
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
	chains: Vec<Chain>,
	blocks: Vec<Block>,
	/// Chain ids sorted by name.
	by_name: Vec<ChainId>,
}

impl Catalog {
	pub fn new() -> Self {
		Self::default()
	}

	fn chain_position(&self, name: &str) -> std::result::Result<usize, usize> {
		self.by_name.binary_search_by(|id| compare_alphanumeric(&self.chains[id.0 as usize].name, name))
	}

	pub fn find_chain(&self, name: &str) -> Option<ChainId> {
		self.chain_position(name).ok().map(|i| self.by_name[i])
	}

	/// Returns the chain, creating it on first reference.
	pub fn insert_chain(&mut self, name: &str) -> Result<ChainId> {
		let name = name.trim();
		if name.is_empty() || name.contains(|c: char| c.is_whitespace()) {
			return Err(BdfError::CouldNotInsertChain(name.to_string()));
		}
		match self.chain_position(name) {
			Ok(i) => Ok(self.by_name[i]),
			Err(i) => {
				let id = ChainId(self.chains.len() as u32);
				self.chains.push(Chain { name: name.to_string(), blocks: Vec::new() });
				self.by_name.insert(i, id);
				Ok(id)
			}
		}
	}

	pub fn chain(&self, id: ChainId) -> &Chain {
		&self.chains[id.0 as usize]
	}

	/// Chains in name order.
	pub fn chains(&self) -> impl Iterator<Item = &Chain> {
		self.by_name.iter().map(|id| &self.chains[id.0 as usize])
	}

	pub fn block(&self, id: BlockId) -> &Block {
		&self.blocks[id.0 as usize]
	}

	pub fn block_mut(&mut self, id: BlockId) -> &mut Block {
		&mut self.blocks[id.0 as usize]
	}

	pub fn find_block(&self, chain: &str, block: &str) -> Option<BlockId> {
		let chain = self.chain(self.find_chain(chain)?);
		let key = normalize_block_key(block);
		chain
			.blocks
			.binary_search_by(|id| compare_block_keys(&self.blocks[id.0 as usize].name, &key))
			.ok()
			.map(|i| chain.blocks[i])
	}

	/// Returns the block, creating chain and block as needed.
	pub fn insert_block(&mut self, chain: &str, block: &str) -> Result<BlockId> {
		let chain_id = self.insert_chain(chain)?;
		let key = normalize_block_key(block);
		if key.is_empty() || key.contains(|c: char| c.is_whitespace() || c == '.') {
			return Err(BdfError::CouldNotInsertBlock(format!("{}.{}", block, chain)));
		}
		let position = {
			let blocks = &self.blocks;
			self.chains[chain_id.0 as usize]
				.blocks
				.binary_search_by(|id| compare_block_keys(&blocks[id.0 as usize].name, &key))
		};
		match position {
			Ok(i) => Ok(self.chains[chain_id.0 as usize].blocks[i]),
			Err(i) => {
				let id = BlockId(self.blocks.len() as u32);
				self.blocks.push(Block { name: key, chain: Some(chain_id), ..Block::default() });
				self.chains[chain_id.0 as usize].blocks.insert(i, id);
				Ok(id)
			}
		}
	}

	/// `(block key, chain key)` of a block.
	pub fn identity(&self, id: BlockId) -> (String, String) {
		let block = self.block(id);
		let chain = block.chain.map(|c| self.chain(c).name.clone()).unwrap_or_default();
		(block.name.clone(), chain)
	}

	pub fn block_ids(&self) -> impl Iterator<Item = BlockId> {
		(0..self.blocks.len() as u32).map(BlockId)
	}

	pub fn general(&self) -> Option<BlockId> {
		self.find_block(GENERAL_CHAIN, GENERAL_BLOCK)
	}

	/// Smallest and largest numeric block key of a chain, bad blocks skipped.
	pub fn minmax_number(&self, chain: &str) -> Option<(i64, i64)> {
		let chain = self.chain(self.find_chain(chain)?);
		let mut numbers = chain
			.blocks
			.iter()
			.map(|id| self.block(*id))
			.filter(|b| !b.is_bad())
			.filter_map(|b| block_number(&b.name));
		let first = numbers.next()?;
		Some(numbers.fold((first, first), |(lo, hi), n| (lo.min(n), hi.max(n))))
	}

	/// Blocks written to disk outside the general chain.
	pub fn written_data_blocks(&self) -> usize {
		let general = self.find_chain(GENERAL_CHAIN);
		self.blocks
			.iter()
			.filter(|b| b.chain != general && b.is_on_disk() && !b.is_bad())
			.count()
	}
}
