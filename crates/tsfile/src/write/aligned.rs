//! Writers for aligned devices.
//!
//! Every measurement of an aligned device shares one time column. The time
//! column is written as its own chunk (name `""`, type VECTOR, marker bit
//! `TIME_COLUMN_MASK`); each measurement is a value chunk (marker bit
//! `VALUE_COLUMN_MASK`) whose pages carry a not-null bitmap:
//!
//! ```text
//! time page:  time_bytes
//! value page: row_count(u32) bitmap[ceil(row_count / 8)] value_bytes
//! ```
//!
//! Time and value pages always seal together, so page `i` of every value
//! chunk covers the rows of page `i` of the time chunk.

use super::chunk::{ChunkIdentity, ChunkPages, EncodedChunk};
use super::page::{PageLimits, SealedPage};
use crate::buffer::PagedBuffer;
use crate::config::TsFileConfig;
use crate::encoding::ColumnEncoder;
use crate::error::{Result, TsFileError};
use crate::file::{
    CompressionType, DataType, MeasurementSchema, Value, TIME_COLUMN_MASK, VALUE_COLUMN_MASK,
};
use crate::statistic::Statistic;
use bitvec::prelude::*;
use std::collections::BTreeMap;
use tracing::debug;

/// Measurement name of the time column.
pub const TIME_COLUMN_NAME: &str = "";

fn stream_bytes(encoder: &mut ColumnEncoder, page_size: usize) -> Result<PagedBuffer> {
    let mut out = PagedBuffer::new(page_size);
    encoder.flush(&mut out)?;
    Ok(out)
}

/// Accumulates the timestamps of one aligned page.
pub struct TimePageWriter {
    compression: CompressionType,
    page_size: usize,
    encoder: ColumnEncoder,
    statistic: Statistic,
    point_count: usize,
}

impl TimePageWriter {
    /// Creates a time page writer using the config's time codec.
    pub fn new(config: &TsFileConfig) -> Result<Self> {
        Ok(Self {
            compression: config.time_compression,
            page_size: config.page_size,
            encoder: ColumnEncoder::for_time(config.time_encoding, config.page_size)?,
            statistic: Statistic::new(DataType::Vector),
            point_count: 0,
        })
    }

    /// Appends one timestamp.
    pub fn write(&mut self, time: i64) -> Result<()> {
        self.encoder.encode(Value::Int64(time))?;
        self.statistic.update_time(time)?;
        self.point_count += 1;
        Ok(())
    }

    /// Rows in the open page.
    pub fn point_count(&self) -> usize {
        self.point_count
    }

    /// Estimated encoded size of the open page; zero while it is empty.
    pub fn estimated_size(&self) -> usize {
        if self.point_count == 0 {
            return 0;
        }
        self.encoder.estimated_size()
    }

    /// Seals the open page.
    pub fn seal(&mut self) -> Result<SealedPage> {
        let time_bytes = stream_bytes(&mut self.encoder, self.page_size)?;
        let statistic = self.statistic;
        self.statistic.reset();
        self.point_count = 0;
        SealedPage::new(self.compression, &time_bytes.to_vec(), statistic)
    }
}

/// Accumulates one column of an aligned page, nulls included.
pub struct ValuePageWriter {
    compression: CompressionType,
    page_size: usize,
    encoder: ColumnEncoder,
    bitmap: BitVec<u8, Msb0>,
    statistic: Statistic,
}

impl ValuePageWriter {
    /// Creates a value page writer for `schema`.
    pub fn new(schema: &MeasurementSchema, config: &TsFileConfig) -> Result<Self> {
        Ok(Self {
            compression: schema.compression,
            page_size: config.page_size,
            encoder: ColumnEncoder::new(schema.encoding, schema.data_type, config.page_size)?,
            bitmap: BitVec::new(),
            statistic: Statistic::new(schema.data_type),
        })
    }

    /// Declared value type.
    pub fn data_type(&self) -> DataType {
        self.encoder.data_type()
    }

    /// Appends one row. A `None` value only clears the row's bitmap bit.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` without touching the page if the value is of
    /// the wrong type.
    pub fn write(&mut self, time: i64, value: Option<Value>) -> Result<()> {
        if let Some(value) = value {
            value.check_type(self.data_type())?;
            self.encoder.encode(value)?;
            self.statistic.update(time, value)?;
        }
        self.bitmap.push(value.is_some());
        Ok(())
    }

    /// Rows in the open page, nulls included.
    pub fn row_count(&self) -> usize {
        self.bitmap.len()
    }

    /// Estimated size of the open page's payload.
    pub fn estimated_size(&self) -> usize {
        if self.bitmap.is_empty() {
            return 0;
        }
        4 + self.bitmap.len().div_ceil(8) + self.encoder.estimated_size()
    }

    /// Statistic over the non-null values of the open page.
    pub fn statistic(&self) -> &Statistic {
        &self.statistic
    }

    /// Seals the open page.
    pub fn seal(&mut self) -> Result<SealedPage> {
        let value_bytes = stream_bytes(&mut self.encoder, self.page_size)?;
        let mut bitmap = std::mem::take(&mut self.bitmap);
        bitmap.set_uninitialized(false);
        let row_count = u32::try_from(bitmap.len()).map_err(|_| {
            TsFileError::InvalidArg(format!("{} rows do not fit one page", bitmap.len()))
        })?;

        let raw = bitmap.as_raw_slice();
        let mut payload = Vec::with_capacity(4 + raw.len() + value_bytes.total_size());
        payload.extend_from_slice(&row_count.to_be_bytes());
        payload.extend_from_slice(raw);
        for chunk in value_bytes.iter() {
            payload.extend_from_slice(chunk);
        }

        let statistic = self.statistic;
        self.statistic.reset();
        SealedPage::new(self.compression, &payload, statistic)
    }
}

struct ValueColumn {
    schema: MeasurementSchema,
    page: ValuePageWriter,
    chunk: ChunkPages,
}

/// Chunk writer for one aligned device: a time chunk plus one value chunk
/// per measurement.
pub struct AlignedWriter {
    config: TsFileConfig,
    limits: PageLimits,
    time_page: TimePageWriter,
    time_chunk: ChunkPages,
    columns: Vec<ValueColumn>,
    positions: BTreeMap<String, usize>,
}

impl AlignedWriter {
    /// Creates a writer with no measurements.
    pub fn new(config: &TsFileConfig) -> Result<Self> {
        let identity = ChunkIdentity {
            measurement_name: TIME_COLUMN_NAME.to_string(),
            data_type: DataType::Vector,
            encoding: config.time_encoding,
            compression: config.time_compression,
            mask: TIME_COLUMN_MASK,
        };
        Ok(Self {
            config: config.clone(),
            limits: PageLimits::from_config(config),
            time_page: TimePageWriter::new(config)?,
            time_chunk: ChunkPages::new(identity, config.page_size),
            columns: Vec::new(),
            positions: BTreeMap::new(),
        })
    }

    /// Adds a measurement.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` for a known name, `InvalidArg` for a bad
    /// schema or while rows are buffered.
    pub fn add_column(&mut self, schema: MeasurementSchema) -> Result<()> {
        schema.validate()?;
        if self.positions.contains_key(&schema.name) {
            return Err(TsFileError::AlreadyExists(schema.name));
        }
        if !self.is_empty() {
            return Err(TsFileError::InvalidArg(format!(
                "cannot add aligned measurement {} while rows are buffered",
                schema.name
            )));
        }
        let identity = ChunkIdentity {
            measurement_name: schema.name.clone(),
            data_type: schema.data_type,
            encoding: schema.encoding,
            compression: schema.compression,
            mask: VALUE_COLUMN_MASK,
        };
        let column = ValueColumn {
            page: ValuePageWriter::new(&schema, &self.config)?,
            chunk: ChunkPages::new(identity, self.config.page_size),
            schema,
        };
        self.positions.insert(column.schema.name.clone(), self.columns.len());
        self.columns.push(column);
        Ok(())
    }

    /// Returns true if `measurement` is a column of this device.
    pub fn contains(&self, measurement: &str) -> bool {
        self.positions.contains_key(measurement)
    }

    /// Schemas in registration order.
    pub fn schemas(&self) -> impl Iterator<Item = &MeasurementSchema> {
        self.columns.iter().map(|c| &c.schema)
    }

    /// Appends one row. Measurements not named in `values` are null.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown measurement, `TypeMismatch` for a
    /// wrongly typed value and `InvalidArg` for a measurement named twice.
    /// The row is validated as a whole, so a rejected row writes nothing.
    pub fn write_row(&mut self, time: i64, values: &[(&str, Value)]) -> Result<()> {
        let mut row: Vec<Option<Value>> = vec![None; self.columns.len()];
        for &(name, value) in values {
            let index = *self
                .positions
                .get(name)
                .ok_or_else(|| TsFileError::NotFound(name.to_string()))?;
            value.check_type(self.columns[index].schema.data_type)?;
            if row[index].replace(value).is_some() {
                return Err(TsFileError::InvalidArg(format!(
                    "measurement {} appears twice in one row",
                    name
                )));
            }
        }

        self.time_page.write(time)?;
        for (column, value) in self.columns.iter_mut().zip(row) {
            column.page.write(time, value)?;
        }

        if self.page_limit_reached() {
            self.seal_pages()?;
        }
        Ok(())
    }

    fn page_limit_reached(&self) -> bool {
        let rows = self.time_page.point_count();
        self.limits.reached(rows, self.time_page.estimated_size())
            || self
                .columns
                .iter()
                .any(|c| self.limits.reached(rows, c.page.estimated_size()))
    }

    /// Seals the open time page and every open value page.
    pub fn seal_pages(&mut self) -> Result<()> {
        let rows = self.time_page.point_count();
        if rows == 0 {
            return Ok(());
        }
        let time_page = self.time_page.seal()?;
        self.time_chunk.add_page(time_page)?;
        for column in &mut self.columns {
            let page = column.page.seal()?;
            column.chunk.add_page(page)?;
        }
        debug!(rows, columns = self.columns.len(), "aligned pages sealed");
        Ok(())
    }

    /// Returns true if no row was written since the last chunk ended.
    pub fn is_empty(&self) -> bool {
        self.time_page.point_count() == 0 && self.time_chunk.num_pages() == 0
    }

    /// Rows in the open page.
    pub fn buffered_rows(&self) -> usize {
        self.time_page.point_count()
    }

    /// Buffered bytes over every column.
    pub fn estimated_size(&self) -> usize {
        self.time_chunk.estimated_size()
            + self.time_page.estimated_size()
            + self
                .columns
                .iter()
                .map(|c| c.chunk.estimated_size() + c.page.estimated_size())
                .sum::<usize>()
    }

    /// Seals open pages and finishes the time chunk followed by every value
    /// chunk. Returns nothing if no row was written.
    pub fn end_encode_chunks(&mut self) -> Result<Vec<EncodedChunk>> {
        self.seal_pages()?;
        let Some(time_chunk) = self.time_chunk.finish()? else {
            return Ok(Vec::new());
        };
        let mut chunks = Vec::with_capacity(1 + self.columns.len());
        chunks.push(time_chunk);
        for column in &mut self.columns {
            if let Some(chunk) = column.chunk.finish()? {
                chunks.push(chunk);
            }
        }
        Ok(chunks)
    }
}
