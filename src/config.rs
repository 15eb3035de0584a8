use crate::types::{ByteOrder, Compression, DataType};

/// Historical block boundary.
pub const DEFAULT_BLOCK_BOUNDARY: u64 = 512;
/// Longest value emitted on a single entry before it is continued.
pub const DEFAULT_CONTINUATION_WIDTH: usize = 512;
/// Maximum number of files one engine keeps open.
pub const DEFAULT_MAX_FILES: usize = 20;

/// Settings that were process-global in the historical library.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Output element type; `None` keeps the caller's type.
    pub default_output_type: Option<DataType>,
    pub output_compression: Compression,
    pub output_value_offset: i64,
    pub minimum_header_size: u64,
    pub block_boundary: u64,
    /// Maximum width of a header line, 0 for no limit.
    pub max_line_width: usize,
    pub continuation_width: usize,
    pub write_header_size: bool,
    pub general_block: bool,
    /// Byte order assumed for legacy twin-file payloads; machine order if `None`.
    pub ldf_input_byte_order: Option<ByteOrder>,
    /// Reject blocks whose binary size disagrees with their dimensions.
    pub strict_binary_size: bool,
    pub max_files: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_output_type: None,
            output_compression: Compression::None,
            output_value_offset: 0,
            minimum_header_size: 0,
            block_boundary: DEFAULT_BLOCK_BOUNDARY,
            max_line_width: 0,
            continuation_width: DEFAULT_CONTINUATION_WIDTH,
            write_header_size: true,
            general_block: true,
            ldf_input_byte_order: None,
            strict_binary_size: false,
            max_files: DEFAULT_MAX_FILES,
        }
    }
}

impl EngineConfig {
    pub fn with_output_type(mut self, data_type: DataType) -> Self {
        self.default_output_type = Some(data_type);
        self
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.output_compression = compression;
        self
    }

    pub fn with_value_offset(mut self, offset: i64) -> Self {
        self.output_value_offset = offset;
        self
    }

    pub fn with_minimum_header_size(mut self, size: u64) -> Self {
        self.minimum_header_size = size;
        self
    }

    pub fn with_block_boundary(mut self, boundary: u64) -> Self {
        self.block_boundary = boundary.max(1);
        self
    }

    pub fn with_max_line_width(mut self, width: usize) -> Self {
        self.max_line_width = width;
        self
    }

    pub fn with_general_block(mut self, enabled: bool) -> Self {
        self.general_block = enabled;
        self
    }

    pub fn with_ldf_byte_order(mut self, order: ByteOrder) -> Self {
        self.ldf_input_byte_order = Some(order);
        self
    }

    pub fn with_strict_binary_size(mut self, strict: bool) -> Self {
        self.strict_binary_size = strict;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.block_boundary, 512);
        assert_eq!(config.max_files, 20);
        assert!(config.general_block);
        assert_eq!(config.output_compression, Compression::None);
    }

    #[test]
    fn test_builder() {
        let config = EngineConfig::default()
            .with_output_type(DataType::U16)
            .with_compression(Compression::Gzip)
            .with_block_boundary(0);
        assert_eq!(config.default_output_type, Some(DataType::U16));
        assert_eq!(config.output_compression, Compression::Gzip);
        assert_eq!(config.block_boundary, 1);
    }
}
