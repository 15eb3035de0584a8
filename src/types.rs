//! Value types shared by the header, codec and file layers.

use crate::error::{BdfError, Result};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Element type of a binary payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DataType {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
    F32,
    F64,
}

impl DataType {
    pub const ALL: [DataType; 10] = [
        DataType::U8,
        DataType::I8,
        DataType::U16,
        DataType::I16,
        DataType::U32,
        DataType::I32,
        DataType::U64,
        DataType::I64,
        DataType::F32,
        DataType::F64,
    ];

    pub fn size_of(self) -> usize {
        match self {
            DataType::U8 | DataType::I8 => 1,
            DataType::U16 | DataType::I16 => 2,
            DataType::U32 | DataType::I32 | DataType::F32 => 4,
            DataType::U64 | DataType::I64 | DataType::F64 => 8,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, DataType::F32 | DataType::F64)
    }

    pub fn is_signed(self) -> bool {
        matches!(
            self,
            DataType::I8 | DataType::I16 | DataType::I32 | DataType::I64 | DataType::F32 | DataType::F64
        )
    }

    /// Name written into the `DataType` key.
    pub fn as_str(self) -> &'static str {
        match self {
            DataType::U8 => "UnsignedByte",
            DataType::I8 => "SignedByte",
            DataType::U16 => "UnsignedShort",
            DataType::I16 => "SignedShort",
            DataType::U32 => "UnsignedInteger",
            DataType::I32 => "SignedInteger",
            DataType::U64 => "Unsigned64",
            DataType::I64 => "Signed64",
            DataType::F32 => "FloatValue",
            DataType::F64 => "DoubleValue",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = BdfError;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "unsignedbyte" | "unsigned8" | "unsignedchar" | "u8" => Ok(DataType::U8),
            "signedbyte" | "signed8" | "char" | "i8" => Ok(DataType::I8),
            "unsignedshort" | "unsigned16" | "u16" => Ok(DataType::U16),
            "signedshort" | "signed16" | "i16" => Ok(DataType::I16),
            "unsignedinteger" | "unsignedlong" | "unsigned32" | "u32" => Ok(DataType::U32),
            "signedinteger" | "signedlong" | "signed32" | "i32" => Ok(DataType::I32),
            "unsigned64" | "u64" => Ok(DataType::U64),
            "signed64" | "i64" => Ok(DataType::I64),
            "floatvalue" | "floatieee32" | "float" | "f32" => Ok(DataType::F32),
            "doublevalue" | "doubleieee64" | "floatieee64" | "double" | "f64" => Ok(DataType::F64),
            _ => Err(BdfError::ConfigError(format!("Invalid data type: {}", s))),
        }
    }
}

/// Byte order of multi-byte elements in a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ByteOrder {
    LowByteFirst,
    HighByteFirst,
}

impl ByteOrder {
    pub fn native() -> Self {
        if cfg!(target_endian = "little") {
            ByteOrder::LowByteFirst
        } else {
            ByteOrder::HighByteFirst
        }
    }

    pub fn is_native(self) -> bool {
        self == ByteOrder::native()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ByteOrder::LowByteFirst => "LowByteFirst",
            ByteOrder::HighByteFirst => "HighByteFirst",
        }
    }
}

impl fmt::Display for ByteOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ByteOrder {
    type Err = BdfError;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "lowbytefirst" | "low" | "little" => Ok(ByteOrder::LowByteFirst),
            "highbytefirst" | "high" | "big" => Ok(ByteOrder::HighByteFirst),
            _ => Err(BdfError::ConfigError(format!("Invalid byte order: {}", s))),
        }
    }
}

/// Payload (or whole-file) compression wrapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Compression {
    #[default]
    None,
    Gzip,
    Zlib,
}

impl Compression {
    pub fn as_str(self) -> &'static str {
        match self {
            Compression::None => "None",
            Compression::Gzip => "GzipCompression",
            Compression::Zlib => "ZCompression",
        }
    }

    /// Whole-file compression implied by the file name suffix.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("gz") => Compression::Gzip,
            Some("Z") => Compression::Zlib,
            _ => Compression::None,
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Compression {
    type Err = BdfError;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "none" | "nocompression" | "uncompressed" => Ok(Compression::None),
            "gzipcompression" | "gzip" | "gz" => Ok(Compression::Gzip),
            "zcompression" | "zlib" | "z" => Ok(Compression::Zlib),
            _ => Err(BdfError::ConfigError(format!("Invalid compression: {}", s))),
        }
    }
}

/// How a file is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Must exist, read-only.
    Read,
    /// Must exist, read-write.
    Old,
    /// Create or truncate, read-write.
    New,
    /// Open or create, read-write.
    Any,
    /// In-memory only, never touches disk.
    Temp,
}

impl OpenMode {
    pub fn is_writable(self) -> bool {
        !matches!(self, OpenMode::Read)
    }
}

impl FromStr for OpenMode {
    type Err = BdfError;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "read" => Ok(OpenMode::Read),
            "old" => Ok(OpenMode::Old),
            "new" => Ok(OpenMode::New),
            "any" => Ok(OpenMode::Any),
            "temp" => Ok(OpenMode::Temp),
            _ => Err(BdfError::IncompatibleOpeningMode(s.to_string())),
        }
    }
}

/// Extents of an n-dimensional array, axis 1 varying fastest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Dimensions {
    extents: Vec<usize>,
}

impl Dimensions {
    pub fn new(extents: impl Into<Vec<usize>>) -> Self {
        Self { extents: extents.into() }
    }

    pub fn rank(&self) -> usize {
        self.extents.len()
    }

    pub fn extents(&self) -> &[usize] {
        &self.extents
    }

    /// Extent of the 1-based axis, `None` past the rank.
    pub fn extent(&self, axis: usize) -> Option<usize> {
        axis.checked_sub(1).and_then(|i| self.extents.get(i).copied())
    }

    /// Number of elements; saturates at `usize::MAX`.
    pub fn element_count(&self) -> usize {
        self.checked_element_count().unwrap_or(usize::MAX)
    }

    /// Number of elements, `None` if the product overflows.
    pub fn checked_element_count(&self) -> Option<usize> {
        if self.extents.is_empty() {
            return Some(0);
        }
        self.extents.iter().try_fold(1usize, |count, &extent| count.checked_mul(extent))
    }

    /// `(columns, rows)` of a frame. Trailing axes of extent 1 are ignored;
    /// a single axis is one row.
    pub fn frame(&self) -> Option<(usize, usize)> {
        match self.extents.as_slice() {
            [] => None,
            [columns] => Some((*columns, 1)),
            [columns, rows, rest @ ..] if rest.iter().all(|&e| e == 1) => Some((*columns, *rows)),
            _ => None,
        }
    }

    /// The historical `n+1` vector: element 0 is the rank.
    pub fn to_vector(&self) -> Vec<i64> {
        let mut v = Vec::with_capacity(self.extents.len() + 1);
        v.push(self.extents.len() as i64);
        v.extend(self.extents.iter().map(|&e| e as i64));
        v
    }

    pub fn from_vector(vector: &[i64]) -> Result<Self> {
        let rank = *vector
            .first()
            .ok_or_else(|| BdfError::CouldNotWriteDimension("empty dimension vector".to_string()))?;
        if rank < 0 || vector.len() < rank as usize + 1 {
            return Err(BdfError::CouldNotWriteDimension(format!(
                "dimension vector declares {} axes but holds {}",
                rank,
                vector.len().saturating_sub(1)
            )));
        }
        let mut extents = Vec::with_capacity(rank as usize);
        for &extent in &vector[1..=rank as usize] {
            if extent < 1 {
                return Err(BdfError::CouldNotWriteDimension(format!("extent {} < 1", extent)));
            }
            extents.push(extent as usize);
        }
        Ok(Self { extents })
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.extents.iter().map(|e| e.to_string()).collect();
        f.write_str(&parts.join("x"))
    }
}

/// Product of the extents of a historical dimension vector.
pub fn dim_product(vector: &[i64]) -> u64 {
    match vector.split_first() {
        Some((&rank, rest)) if rank > 0 => rest
            .iter()
            .take(rank as usize)
            .map(|&e| e.max(0) as u64)
            .fold(1u64, u64::saturating_mul),
        _ => 0,
    }
}

pub const GENERAL_CHAIN: &str = "General";
pub const GENERAL_BLOCK: &str = "All";
const PRIMARY_CHAIN: &str = "Image.Psd";
const ERROR_CHAIN: &str = "Image.Error";

/// Chain key for the numeric chain argument of the public API.
///
/// `0` is the general chain, positive numbers are primary data and negative
/// numbers the matching variance chain.
pub fn chain_key(number: i64) -> String {
    match number {
        0 => GENERAL_CHAIN.to_string(),
        1 => PRIMARY_CHAIN.to_string(),
        -1 => ERROR_CHAIN.to_string(),
        n if n > 1 => format!("{}.{}", PRIMARY_CHAIN, n),
        n => format!("{}.{}", ERROR_CHAIN, n.unsigned_abs()),
    }
}

/// Inverse of [`chain_key`]; `None` for chains outside the numbering.
pub fn chain_number(key: &str) -> Option<i64> {
    let (base, sign) = if let Some(rest) = key.strip_prefix(PRIMARY_CHAIN) {
        (rest, 1)
    } else if let Some(rest) = key.strip_prefix(ERROR_CHAIN) {
        (rest, -1)
    } else if key == GENERAL_CHAIN {
        return Some(0);
    } else {
        return None;
    };
    if base.is_empty() {
        return Some(sign);
    }
    let n: i64 = base.strip_prefix('.')?.parse().ok()?;
    (n > 1).then_some(sign * n)
}

pub fn block_key(number: i64) -> String {
    number.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_type_aliases() {
        assert_eq!("UnsignedLong".parse::<DataType>().unwrap(), DataType::U32);
        assert_eq!("SignedLong".parse::<DataType>().unwrap(), DataType::I32);
        assert_eq!("FloatIEEE32".parse::<DataType>().unwrap(), DataType::F32);
        assert_eq!("DoubleIEEE64".parse::<DataType>().unwrap(), DataType::F64);
        assert_eq!("FloatIEEE64".parse::<DataType>().unwrap(), DataType::F64);
        assert!("Complex".parse::<DataType>().is_err());
        for t in DataType::ALL {
            assert_eq!(t.as_str().parse::<DataType>().unwrap(), t);
        }
    }

    #[test]
    fn test_compression_from_path() {
        assert_eq!(Compression::from_path(Path::new("a.edf.gz")), Compression::Gzip);
        assert_eq!(Compression::from_path(Path::new("a.edf.Z")), Compression::Zlib);
        assert_eq!(Compression::from_path(Path::new("a.edf")), Compression::None);
    }

    #[test]
    fn test_open_mode_parse() {
        assert_eq!("read".parse::<OpenMode>().unwrap(), OpenMode::Read);
        assert_eq!("temp".parse::<OpenMode>().unwrap(), OpenMode::Temp);
        let err = "append".parse::<OpenMode>().unwrap_err();
        assert!(matches!(err, BdfError::IncompatibleOpeningMode(_)));
    }

    #[test]
    fn test_dimension_vector() {
        let dim = Dimensions::new(vec![2, 3]);
        assert_eq!(dim.to_vector(), vec![2, 2, 3]);
        assert_eq!(Dimensions::from_vector(&[2, 2, 3]).unwrap(), dim);
        assert_eq!(dim.element_count(), 6);
        assert_eq!(dim.extent(2), Some(3));
        assert_eq!(dim.extent(3), None);
        assert!(Dimensions::from_vector(&[2, 2, 0]).is_err());
        assert_eq!(dim_product(&[2, 2, 3]), 6);
        assert_eq!(dim_product(&[2, i64::MAX, i64::MAX]), u64::MAX);
    }

    #[test]
    fn test_element_count_overflow() {
        let huge = Dimensions::new(vec![1usize << 32, 1usize << 32]);
        assert_eq!(huge.checked_element_count(), None);
        assert_eq!(huge.element_count(), usize::MAX);
        assert_eq!(Dimensions::default().checked_element_count(), Some(0));
    }

    #[test]
    fn test_frame() {
        assert_eq!(Dimensions::new(vec![4, 3]).frame(), Some((4, 3)));
        assert_eq!(Dimensions::new(vec![4]).frame(), Some((4, 1)));
        assert_eq!(Dimensions::new(vec![4, 3, 1, 1]).frame(), Some((4, 3)));
        assert_eq!(Dimensions::new(vec![4, 3, 2]).frame(), None);
        assert_eq!(Dimensions::default().frame(), None);
    }

    #[test]
    fn test_chain_numbering() {
        for n in [-5, -2, -1, 0, 1, 2, 7] {
            assert_eq!(chain_number(&chain_key(n)), Some(n));
        }
        assert_eq!(chain_key(2), "Image.Psd.2");
        assert_eq!(chain_key(-1), "Image.Error");
        assert_eq!(chain_number("Image.Psd.x"), None);
        assert_eq!(chain_number("Other"), None);
    }
}
