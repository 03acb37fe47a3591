//! Error and Result types for TsFile operations.

use crate::file::DataType;
use std::io;
use thiserror::Error;

/// A convenience `Result` type for TsFile operations.
pub type Result<T> = std::result::Result<T, TsFileError>;

/// The error type for TsFile operations.
#[derive(Debug, Error)]
pub enum TsFileError {
    /// A page or arena allocation could not be satisfied.
    #[error("Out of memory: failed to allocate {0} bytes")]
    OutOfMemory(usize),

    /// Value type does not match the declared column type.
    #[error("Type mismatch: expected {expected:?}, got {actual:?}")]
    TypeMismatch {
        /// Declared type of the column or statistic.
        expected: DataType,
        /// Type of the offered value.
        actual: DataType,
    },

    /// Not enough bytes remain to decode a complete item.
    #[error("Buffer not enough: needed {needed} bytes, {available} available")]
    BufferNotEnough {
        /// Bytes the decoder needed.
        needed: usize,
        /// Bytes that were left.
        available: usize,
    },

    /// Fewer bytes than requested were read; the available bytes were copied.
    #[error("Partial read: requested {requested} bytes, read {read}")]
    PartialRead {
        /// Requested length.
        requested: usize,
        /// Bytes actually copied.
        read: usize,
    },

    /// Read positioned past the committed data.
    #[error("Out of range: offset {offset} beyond size {size}")]
    OutOfRange {
        /// Requested offset.
        offset: u64,
        /// Committed size.
        size: u64,
    },

    /// Timeseries or index entry registered twice.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Malformed argument or schema.
    #[error("Invalid argument: {0}")]
    InvalidArg(String),

    /// An iterator ran dry.
    #[error("No more data")]
    NoMoreData,

    /// Requested device or measurement is not in the file.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid magic bytes at the head or tail of the file.
    #[error("Invalid magic bytes: expected \"TsFile\", got {0:?}")]
    InvalidMagic(Vec<u8>),

    /// Unsupported file format version.
    #[error("Unsupported version: {0}")]
    UnsupportedVersion(u8),

    /// Structural damage found while parsing.
    #[error("Corrupted file: {0}")]
    Corrupted(String),

    /// Error during compression.
    #[error("Compression error: {0}")]
    CompressionError(String),

    /// Error during decompression.
    #[error("Decompression error: {0}")]
    DecompressionError(String),

    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
}

impl TsFileError {
    /// Returns true for errors that signal the end of readable data rather
    /// than a failure.
    pub fn is_end_of_data(&self) -> bool {
        matches!(self, Self::NoMoreData | Self::OutOfRange { .. })
    }
}
