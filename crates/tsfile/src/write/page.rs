//! Page writer for non-aligned series.
//!
//! A page accumulates `(time, value)` pairs in two independent streams and
//! is sealed into one compressed payload:
//!
//! ```text
//! varuint(time_len) time_bytes value_bytes
//! ```

use crate::buffer::{encode_var_u64, PagedBuffer};
use crate::compress;
use crate::config::TsFileConfig;
use crate::encoding::ColumnEncoder;
use crate::error::Result;
use crate::file::{CompressionType, MeasurementSchema, PageHeader, Value};
use crate::statistic::Statistic;

/// A sealed, compressed page waiting to be placed in a chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct SealedPage {
    /// Payload size before compression.
    pub uncompressed_size: usize,
    /// Compressed payload.
    pub data: Vec<u8>,
    /// Statistic over the page's points.
    pub statistic: Statistic,
}

impl SealedPage {
    /// Compresses `payload` and attaches `statistic`.
    pub fn new(compression: CompressionType, payload: &[u8], statistic: Statistic) -> Result<Self> {
        Ok(Self {
            uncompressed_size: payload.len(),
            data: compress::compress(compression, payload)?,
            statistic,
        })
    }

    /// Writes the page header and the payload. The statistic is only
    /// written when `with_statistic` is set.
    pub fn write_to(&self, out: &mut PagedBuffer, with_statistic: bool) -> Result<usize> {
        let header = PageHeader {
            uncompressed_size: self.uncompressed_size,
            compressed_size: self.data.len(),
            statistic: with_statistic.then_some(self.statistic),
        };
        let n = header.serialize_to(out)?;
        out.write(&self.data)?;
        Ok(n + self.data.len())
    }
}

/// Seal thresholds shared by every page writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageLimits {
    /// Point count at which a page seals.
    pub max_points: usize,
    /// Estimated encoded size at which a page seals.
    pub max_bytes: usize,
}

impl PageLimits {
    /// Limits taken from `config`.
    pub fn from_config(config: &TsFileConfig) -> Self {
        Self {
            max_points: config.page_writer_max_point_num,
            max_bytes: config.page_writer_max_memory_bytes,
        }
    }

    /// Returns true if a page with `points` points and `bytes` estimated
    /// bytes must seal.
    pub fn reached(&self, points: usize, bytes: usize) -> bool {
        points >= self.max_points || bytes >= self.max_bytes
    }
}

/// Accumulates one page of a non-aligned series.
pub struct PageWriter {
    compression: CompressionType,
    page_size: usize,
    time_encoder: ColumnEncoder,
    value_encoder: ColumnEncoder,
    statistic: Statistic,
    point_count: usize,
}

impl PageWriter {
    /// Creates a page writer for `schema`, with timestamps encoded as the
    /// config says.
    pub fn new(schema: &MeasurementSchema, config: &TsFileConfig) -> Result<Self> {
        Ok(Self {
            compression: schema.compression,
            page_size: config.page_size,
            time_encoder: ColumnEncoder::for_time(config.time_encoding, config.page_size)?,
            value_encoder: ColumnEncoder::new(schema.encoding, schema.data_type, config.page_size)?,
            statistic: Statistic::new(schema.data_type),
            point_count: 0,
        })
    }

    /// Appends one point.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` if `value` does not match the declared type;
    /// nothing is written in that case.
    pub fn write(&mut self, time: i64, value: Value) -> Result<()> {
        value.check_type(self.value_encoder.data_type())?;
        self.time_encoder.encode(Value::Int64(time))?;
        self.value_encoder.encode(value)?;
        self.statistic.update(time, value)?;
        self.point_count += 1;
        Ok(())
    }

    /// Points in the open page.
    pub fn point_count(&self) -> usize {
        self.point_count
    }

    /// Estimated encoded size of the open page; zero while it is empty.
    pub fn estimated_size(&self) -> usize {
        if self.point_count == 0 {
            return 0;
        }
        self.time_encoder.estimated_size() + self.value_encoder.estimated_size()
    }

    /// Statistic of the open page.
    pub fn statistic(&self) -> &Statistic {
        &self.statistic
    }

    /// Flushes both streams, compresses the payload, and starts a new page.
    pub fn seal(&mut self) -> Result<SealedPage> {
        let mut time_bytes = PagedBuffer::new(self.page_size);
        self.time_encoder.flush(&mut time_bytes)?;
        let mut value_bytes = PagedBuffer::new(self.page_size);
        self.value_encoder.flush(&mut value_bytes)?;

        let mut payload =
            Vec::with_capacity(10 + time_bytes.total_size() + value_bytes.total_size());
        encode_var_u64(time_bytes.total_size() as u64, &mut payload);
        for chunk in time_bytes.iter().chain(value_bytes.iter()) {
            payload.extend_from_slice(chunk);
        }

        let statistic = self.statistic;
        self.statistic.reset();
        self.point_count = 0;
        SealedPage::new(self.compression, &payload, statistic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::{DataType, Encoding};

    #[test]
    fn test_seal_resets_page() {
        let schema = MeasurementSchema::new("s1", DataType::Int64, Encoding::Zigzag)
            .with_compression(CompressionType::Uncompressed);
        let mut writer = PageWriter::new(&schema, &TsFileConfig::default()).unwrap();
        for t in 0..10 {
            writer.write(t, Value::Int64(t * 2)).unwrap();
        }
        assert_eq!(writer.point_count(), 10);

        let page = writer.seal().unwrap();
        assert_eq!(page.statistic.count(), 10);
        assert_eq!(page.uncompressed_size, page.data.len());
        assert_eq!(writer.point_count(), 0);
        assert!(writer.statistic().is_empty());
    }

    #[test]
    fn test_rejected_point_leaves_page_unchanged() {
        let schema = MeasurementSchema::new("s1", DataType::Double, Encoding::Gorilla);
        let mut writer = PageWriter::new(&schema, &TsFileConfig::default()).unwrap();
        writer.write(1, Value::Double(1.0)).unwrap();
        let size = writer.estimated_size();

        assert!(writer.write(2, Value::Int32(2)).is_err());
        assert_eq!(writer.point_count(), 1);
        assert_eq!(writer.estimated_size(), size);
        assert_eq!(writer.statistic().count(), 1);
    }

    #[test]
    fn test_limits() {
        let limits = PageLimits {
            max_points: 100,
            max_bytes: 1024,
        };
        assert!(!limits.reached(99, 1023));
        assert!(limits.reached(100, 0));
        assert!(limits.reached(1, 1024));
    }
}
