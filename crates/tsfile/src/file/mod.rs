//! TsFile format definitions.
//!
//! ## File Structure
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  "TsFile" + version byte                                     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Chunk groups (repeated per device and flush)               │
//! │  - CHUNK_GROUP_HEADER marker, device name                    │
//! │  - chunks: header, then page header + page bytes             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  OPERATION_INDEX_RANGE marker, min/max plan index            │
//! │  SEPARATOR marker                                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  TimeseriesIndex records and MetaIndexNodes                  │
//! ├─────────────────────────────────────────────────────────────┤
//! │  TsFileMeta (root node, meta offset) + Bloom filter          │
//! │  tsfile_meta_size: u32                                       │
//! │  "TsFile"                                                    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! All fixed-width integers are big-endian.

pub mod bloom;
pub mod io;
pub mod io_writer;
pub mod meta;
pub mod reader;

pub use bloom::BloomFilter;
pub use io::{LocalReadFile, LocalWriteFile, MemoryFile, ReadFile, WriteFile};
pub use io_writer::{SeriesChunkMetas, TsFileIoWriter};
pub use meta::{
    ChunkGroupMeta, ChunkHeader, ChunkMeta, MetaIndexEntry, MetaIndexNode, MetaIndexNodeType,
    PageHeader, TimeseriesIndex, TsFileMeta,
};
pub use reader::{AlignedRows, ChunkData, PageData, TsFileReader};

use crate::error::{Result, TsFileError};
use std::fmt;

/// Magic string at both ends of every file.
pub const MAGIC_STRING: &[u8; 6] = b"TsFile";

/// Format version written after the leading magic string.
pub const VERSION_NUM_BYTE: u8 = 0x04;

/// Starts a chunk group.
pub const CHUNK_GROUP_HEADER_MARKER: u8 = 0;

/// Starts a chunk with several pages.
pub const CHUNK_HEADER_MARKER: u8 = 1;

/// Separates the data section from the index section.
pub const SEPARATOR_MARKER: u8 = 2;

/// Precedes the min/max plan index pair.
pub const OPERATION_INDEX_RANGE: u8 = 4;

/// Starts a chunk whose single page carries no statistic.
pub const ONLY_ONE_PAGE_CHUNK_HEADER_MARKER: u8 = 5;

/// Marker bit for the time column of an aligned device.
pub const TIME_COLUMN_MASK: u8 = 0x80;

/// Marker bit for a value column of an aligned device.
pub const VALUE_COLUMN_MASK: u8 = 0x40;

/// Logical data type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum DataType {
    /// One-byte boolean.
    Boolean = 0,
    /// 32-bit signed integer.
    Int32 = 1,
    /// 64-bit signed integer.
    Int64 = 2,
    /// 32-bit IEEE-754 float.
    Float = 3,
    /// 64-bit IEEE-754 float.
    Double = 4,
    /// Time column of an aligned device.
    Vector = 6,
}

impl DataType {
    /// Creates a DataType from a u8 value.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Boolean),
            1 => Some(Self::Int32),
            2 => Some(Self::Int64),
            3 => Some(Self::Float),
            4 => Some(Self::Double),
            6 => Some(Self::Vector),
            _ => None,
        }
    }

    /// Parses a type byte read from a file.
    pub fn parse(value: u8) -> Result<Self> {
        Self::from_u8(value)
            .ok_or_else(|| TsFileError::Corrupted(format!("unknown data type {}", value)))
    }
}

/// Column encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum Encoding {
    /// Fixed-width values (varint for INT32).
    #[default]
    Plain = 0,
    /// XOR-with-previous compression.
    Gorilla = 8,
    /// Zigzag varint blocks.
    Zigzag = 9,
}

impl Encoding {
    /// Creates an Encoding from a u8 value.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Plain),
            8 => Some(Self::Gorilla),
            9 => Some(Self::Zigzag),
            _ => None,
        }
    }

    /// Parses an encoding byte read from a file.
    pub fn parse(value: u8) -> Result<Self> {
        Self::from_u8(value)
            .ok_or_else(|| TsFileError::Corrupted(format!("unknown encoding {}", value)))
    }

    /// Returns true if this encoding can carry values of `data_type`.
    pub fn supports(self, data_type: DataType) -> bool {
        match self {
            Self::Plain => data_type != DataType::Vector,
            Self::Gorilla => matches!(
                data_type,
                DataType::Int32 | DataType::Int64 | DataType::Float | DataType::Double
            ),
            Self::Zigzag => matches!(data_type, DataType::Int32 | DataType::Int64),
        }
    }
}

/// Page compression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum CompressionType {
    /// Pages stored as encoded.
    Uncompressed = 0,
    /// Snappy raw format.
    Snappy = 1,
    /// Gzip stream.
    Gzip = 2,
    /// LZ4 raw block.
    #[default]
    Lz4 = 7,
}

impl CompressionType {
    /// Creates a CompressionType from a u8 value.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Uncompressed),
            1 => Some(Self::Snappy),
            2 => Some(Self::Gzip),
            7 => Some(Self::Lz4),
            _ => None,
        }
    }

    /// Parses a compression byte read from a file.
    pub fn parse(value: u8) -> Result<Self> {
        Self::from_u8(value)
            .ok_or_else(|| TsFileError::Corrupted(format!("unknown compression {}", value)))
    }
}

/// A single typed value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    /// Boolean value.
    Boolean(bool),
    /// INT32 value.
    Int32(i32),
    /// INT64 value.
    Int64(i64),
    /// FLOAT value.
    Float(f32),
    /// DOUBLE value.
    Double(f64),
}

impl Value {
    /// Data type of this value.
    pub fn data_type(&self) -> DataType {
        match self {
            Self::Boolean(_) => DataType::Boolean,
            Self::Int32(_) => DataType::Int32,
            Self::Int64(_) => DataType::Int64,
            Self::Float(_) => DataType::Float,
            Self::Double(_) => DataType::Double,
        }
    }

    /// Checks this value against a declared column type.
    pub fn check_type(&self, expected: DataType) -> Result<()> {
        let actual = self.data_type();
        if actual != expected {
            return Err(TsFileError::TypeMismatch { expected, actual });
        }
        Ok(())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean(v) => write!(f, "{}", v),
            Self::Int32(v) => write!(f, "{}", v),
            Self::Int64(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{}", v),
            Self::Double(v) => write!(f, "{}", v),
        }
    }
}

/// Schema of one measurement (column).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeasurementSchema {
    /// Measurement name, unique within its device.
    pub name: String,
    /// Declared value type.
    pub data_type: DataType,
    /// Value encoding.
    pub encoding: Encoding,
    /// Page compression.
    pub compression: CompressionType,
}

impl MeasurementSchema {
    /// Creates a schema with the default compression.
    pub fn new(name: impl Into<String>, data_type: DataType, encoding: Encoding) -> Self {
        Self {
            name: name.into(),
            data_type,
            encoding,
            compression: CompressionType::default(),
        }
    }

    /// Sets the page compression.
    pub fn with_compression(mut self, compression: CompressionType) -> Self {
        self.compression = compression;
        self
    }

    /// Rejects empty names, the reserved time type, and unsupported
    /// type/encoding pairs.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(TsFileError::InvalidArg(
                "measurement name must not be empty".to_string(),
            ));
        }
        if self.data_type == DataType::Vector {
            return Err(TsFileError::InvalidArg(format!(
                "measurement {} cannot use the VECTOR type",
                self.name
            )));
        }
        if !self.encoding.supports(self.data_type) {
            return Err(TsFileError::InvalidArg(format!(
                "encoding {:?} does not support {:?} (measurement {})",
                self.encoding, self.data_type, self.name
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enum_codes_roundtrip() {
        for dt in [
            DataType::Boolean,
            DataType::Int32,
            DataType::Int64,
            DataType::Float,
            DataType::Double,
            DataType::Vector,
        ] {
            assert_eq!(DataType::from_u8(dt as u8), Some(dt));
        }
        assert_eq!(Encoding::from_u8(8), Some(Encoding::Gorilla));
        assert_eq!(CompressionType::from_u8(7), Some(CompressionType::Lz4));
        assert!(DataType::parse(5).is_err());
    }

    #[test]
    fn test_schema_validation() {
        assert!(MeasurementSchema::new("s1", DataType::Double, Encoding::Gorilla)
            .validate()
            .is_ok());
        assert!(matches!(
            MeasurementSchema::new("s1", DataType::Boolean, Encoding::Gorilla).validate(),
            Err(TsFileError::InvalidArg(_))
        ));
        assert!(matches!(
            MeasurementSchema::new("", DataType::Int32, Encoding::Plain).validate(),
            Err(TsFileError::InvalidArg(_))
        ));
    }

    #[test]
    fn test_value_type_check() {
        assert!(Value::Int32(1).check_type(DataType::Int32).is_ok());
        assert!(matches!(
            Value::Double(1.0).check_type(DataType::Int32),
            Err(TsFileError::TypeMismatch {
                expected: DataType::Int32,
                actual: DataType::Double
            })
        ));
    }
}
