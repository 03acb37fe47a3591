//! TsFile - columnar time-series file format
//!
//! This crate provides the binary encoding and file-layout engine of the
//! TsFile format: per-device, per-measurement time/value sequences with
//! embedded statistics and a hierarchical index.
//!
//! # Components
//!
//! - [`PagedBuffer`]: page-linked byte buffer behind every serialization path
//! - [`Statistic`]: count, time range and typed aggregates of pages and chunks
//! - [`encoding`]: PLAIN, Gorilla and Zigzag column codecs
//! - [`TsFileWriter`]: registration, page/chunk writers, chunk groups, index
//! - [`TsFileReader`]: footer, index lookup and page decoding
//!
//! # Example
//!
//! ```rust,ignore
//! use tsfile::{DataType, Encoding, MeasurementSchema, MemoryFile, TsFileConfig};
//! use tsfile::{TsFileReader, TsFileWriter, Value};
//!
//! let mut writer = TsFileWriter::new(MemoryFile::new(), TsFileConfig::default())?;
//! let schema = MeasurementSchema::new("s1", DataType::Double, Encoding::Gorilla);
//! writer.register_timeseries("root.d1", schema)?;
//! for t in 0..1000 {
//!     writer.write("root.d1", "s1", t, Value::Double(t as f64 * 0.5))?;
//! }
//! let file = writer.close()?;
//!
//! let mut reader = TsFileReader::open(file)?;
//! let points = reader.read_series("root.d1", "s1")?;
//! assert_eq!(points.len(), 1000);
//! ```

#![deny(missing_docs)]

pub mod buffer;
pub mod compress;
pub mod config;
pub mod encoding;
pub mod error;
pub mod file;
pub mod statistic;
pub mod write;

pub use buffer::PagedBuffer;
pub use config::TsFileConfig;
pub use error::{Result, TsFileError};
pub use file::{
    AlignedRows, CompressionType, DataType, Encoding, LocalReadFile, LocalWriteFile,
    MeasurementSchema, MemoryFile, ReadFile, TimeseriesIndex, TsFileMeta, TsFileReader, Value,
    WriteFile,
};
pub use statistic::{StatValues, Statistic};
pub use write::TsFileWriter;
