use std::path::PathBuf;
use thiserror::Error;

/// Why the compression codec gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecFailure {
	BadInput,
	OutputTooSmall,
	MemoryExhausted,
	VersionMismatch,
}

impl std::fmt::Display for CodecFailure {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let text = match self {
			CodecFailure::BadInput => "bad input stream",
			CodecFailure::OutputTooSmall => "output buffer too small",
			CodecFailure::MemoryExhausted => "memory exhausted",
			CodecFailure::VersionMismatch => "codec version mismatch",
		};
		f.write_str(text)
	}
}

#[derive(Error, Debug)]
pub enum BdfError {
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("Invalid stream {0}")]
	InvalidStream(usize),

	#[error("No file open on stream {0}")]
	NoFileOpen(usize),

	#[error("No more streams available (limit {0})")]
	NoMoreStreamsAvailable(usize),

	#[error("Could not open file {path}: {source}")]
	CouldNotOpenFile {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("File {0} is not writable")]
	FileIsNotWritable(PathBuf),

	#[error("Incompatible opening mode: {0}")]
	IncompatibleOpeningMode(String),

	#[error("Could not find header at offset {offset}: {reason}")]
	CouldNotFindHeader { offset: u64, reason: String },

	#[error("Could not find block {block} in chain {chain}")]
	CouldNotFindBlock { chain: String, block: String },

	#[error("Could not find symbol {key}")]
	CouldNotFindSymbol { key: String },

	#[error("Missing key definition: {0}")]
	MissingKeyDefinition(String),

	#[error("Missing array dimensions in block {0}")]
	MissingArrayDimensions(String),

	#[error("Block {block} does not hold {expected}-dimensional data")]
	NotNdData { block: String, expected: usize },

	#[error("Could not read dimension {key}: {value:?}")]
	CouldNotReadDimension { key: String, value: String },

	#[error("Could not write dimension: {0}")]
	CouldNotWriteDimension(String),

	#[error("Read error at offset {offset}: {message}")]
	ReadDataError { offset: u64, message: String },

	#[error("Write error in block {block}: {message}")]
	WriteDataError { block: String, message: String },

	#[error("Compression error ({failure}): {message}")]
	CompressionError { failure: CodecFailure, message: String },

	#[error("Conversion from {from} to {to} is not supported")]
	ConversionUnsupported { from: String, to: String },

	#[error("Data conversion failed: {0}")]
	DataConversionFailed(String),

	#[error("Number conversion failed for {key}: {value:?}")]
	NumberConversionFailed { key: String, value: String },

	#[error("Data buffer too small: {required} bytes required, {available} available")]
	DataBufferTooSmall { required: usize, available: usize },

	#[error("Block {0} refers to external data")]
	ExternalData(String),

	#[error("Could not allocate {0} bytes")]
	CouldNotMallocMemory(usize),

	#[error("Error locating blocks at offset {offset} (last good block {last_good}): {message}")]
	ErrorLocatingBlocks { offset: u64, last_good: String, message: String },

	#[error("Error reading general block: {0}")]
	ErrorReadingGeneralBlock(String),

	#[error("Error creating general block: {0}")]
	ErrorCreatingGeneralBlock(String),

	#[error("Could not insert chain {0}")]
	CouldNotInsertChain(String),

	#[error("Could not insert block {0}")]
	CouldNotInsertBlock(String),

	#[error("Could not insert symbol {0}")]
	CouldNotInsertSymbol(String),

	#[error("Could not delete key {0}")]
	CouldNotDeleteString(String),

	#[error("Could not close file {path}: {message}")]
	CouldNotCloseFile { path: PathBuf, message: String },

	#[error("Block {0} is marked bad")]
	BadBlock(String),

	#[error("Configuration error: {0}")]
	ConfigError(String),
}

/// Fieldless mirror of [`BdfError`] for callers that only branch on the kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
	Io,
	InvalidStream,
	NoFileOpen,
	NoMoreStreamsAvailable,
	CouldNotOpenFile,
	FileIsNotWritable,
	IncompatibleOpeningMode,
	CouldNotFindHeader,
	CouldNotFindBlock,
	CouldNotFindSymbol,
	MissingKeyDefinition,
	MissingArrayDimensions,
	NotNdData,
	CouldNotReadDimension,
	CouldNotWriteDimension,
	ReadDataError,
	WriteDataError,
	CompressionError,
	ConversionUnsupported,
	DataConversionFailed,
	NumberConversionFailed,
	DataBufferTooSmall,
	ExternalData,
	CouldNotMallocMemory,
	ErrorLocatingBlocks,
	ErrorReadingGeneralBlock,
	ErrorCreatingGeneralBlock,
	CouldNotInsertChain,
	CouldNotInsertBlock,
	CouldNotInsertSymbol,
	CouldNotDeleteString,
	CouldNotCloseFile,
	BadBlock,
	ConfigError,
}

impl BdfError {
	pub fn kind(&self) -> ErrorKind {
		match self {
			BdfError::Io(_) => ErrorKind::Io,
			BdfError::InvalidStream(_) => ErrorKind::InvalidStream,
			BdfError::NoFileOpen(_) => ErrorKind::NoFileOpen,
			BdfError::NoMoreStreamsAvailable(_) => ErrorKind::NoMoreStreamsAvailable,
			BdfError::CouldNotOpenFile { .. } => ErrorKind::CouldNotOpenFile,
			BdfError::FileIsNotWritable(_) => ErrorKind::FileIsNotWritable,
			BdfError::IncompatibleOpeningMode(_) => ErrorKind::IncompatibleOpeningMode,
			BdfError::CouldNotFindHeader { .. } => ErrorKind::CouldNotFindHeader,
			BdfError::CouldNotFindBlock { .. } => ErrorKind::CouldNotFindBlock,
			BdfError::CouldNotFindSymbol { .. } => ErrorKind::CouldNotFindSymbol,
			BdfError::MissingKeyDefinition(_) => ErrorKind::MissingKeyDefinition,
			BdfError::MissingArrayDimensions(_) => ErrorKind::MissingArrayDimensions,
			BdfError::NotNdData { .. } => ErrorKind::NotNdData,
			BdfError::CouldNotReadDimension { .. } => ErrorKind::CouldNotReadDimension,
			BdfError::CouldNotWriteDimension(_) => ErrorKind::CouldNotWriteDimension,
			BdfError::ReadDataError { .. } => ErrorKind::ReadDataError,
			BdfError::WriteDataError { .. } => ErrorKind::WriteDataError,
			BdfError::CompressionError { .. } => ErrorKind::CompressionError,
			BdfError::ConversionUnsupported { .. } => ErrorKind::ConversionUnsupported,
			BdfError::DataConversionFailed(_) => ErrorKind::DataConversionFailed,
			BdfError::NumberConversionFailed { .. } => ErrorKind::NumberConversionFailed,
			BdfError::DataBufferTooSmall { .. } => ErrorKind::DataBufferTooSmall,
			BdfError::ExternalData(_) => ErrorKind::ExternalData,
			BdfError::CouldNotMallocMemory(_) => ErrorKind::CouldNotMallocMemory,
			BdfError::ErrorLocatingBlocks { .. } => ErrorKind::ErrorLocatingBlocks,
			BdfError::ErrorReadingGeneralBlock(_) => ErrorKind::ErrorReadingGeneralBlock,
			BdfError::ErrorCreatingGeneralBlock(_) => ErrorKind::ErrorCreatingGeneralBlock,
			BdfError::CouldNotInsertChain(_) => ErrorKind::CouldNotInsertChain,
			BdfError::CouldNotInsertBlock(_) => ErrorKind::CouldNotInsertBlock,
			BdfError::CouldNotInsertSymbol(_) => ErrorKind::CouldNotInsertSymbol,
			BdfError::CouldNotDeleteString(_) => ErrorKind::CouldNotDeleteString,
			BdfError::CouldNotCloseFile { .. } => ErrorKind::CouldNotCloseFile,
			BdfError::BadBlock(_) => ErrorKind::BadBlock,
			BdfError::ConfigError(_) => ErrorKind::ConfigError,
		}
	}

	/// Lookup misses: the key or block is absent but the file is fine.
	pub fn is_not_found(&self) -> bool {
		matches!(
			self,
			BdfError::CouldNotFindBlock { .. } | BdfError::CouldNotFindSymbol { .. }
		)
	}

	pub(crate) fn read(offset: u64, message: impl Into<String>) -> Self {
		BdfError::ReadDataError { offset, message: message.into() }
	}

	pub(crate) fn write(block: impl Into<String>, message: impl Into<String>) -> Self {
		BdfError::WriteDataError { block: block.into(), message: message.into() }
	}

	pub(crate) fn codec(failure: CodecFailure, message: impl Into<String>) -> Self {
		BdfError::CompressionError { failure, message: message.into() }
	}
}

pub type Result<T> = std::result::Result<T, BdfError>;
