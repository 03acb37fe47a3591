//! High-level file writer.
//!
//! [`TsFileWriter`] owns schema registration and one chunk writer per
//! series. Points accumulate in memory until the buffered size crosses
//! `chunk_group_size_threshold` or [`flush`](TsFileWriter::flush) is
//! called; each flush writes one chunk group per device with data.
//!
//! # Example
//!
//! ```rust,ignore
//! use tsfile::{DataType, Encoding, MeasurementSchema, MemoryFile};
//! use tsfile::{TsFileConfig, TsFileWriter, Value};
//!
//! let mut writer = TsFileWriter::new(MemoryFile::new(), TsFileConfig::default())?;
//! let schema = MeasurementSchema::new("s1", DataType::Int64, Encoding::Zigzag);
//! writer.register_timeseries("root.d1", schema)?;
//! writer.write("root.d1", "s1", 1_000, Value::Int64(42))?;
//! let file = writer.close()?;
//! ```

use super::aligned::AlignedWriter;
use super::chunk::{ChunkWriter, EncodedChunk};
use crate::config::TsFileConfig;
use crate::error::{Result, TsFileError};
use crate::file::{LocalWriteFile, MeasurementSchema, TsFileIoWriter, Value, WriteFile};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::{debug, warn};

/// Records written before the first buffered-size check.
pub const MIN_RECORD_COUNT_FOR_MEM_CHECK: u64 = 100;

/// Upper bound on the records between two buffered-size checks.
pub const MAX_RECORD_COUNT_FOR_MEM_CHECK: u64 = 10_000;

enum DeviceWriter {
    NonAligned(BTreeMap<String, ChunkWriter>),
    Aligned(AlignedWriter),
}

impl DeviceWriter {
    fn estimated_size(&self) -> usize {
        match self {
            Self::NonAligned(series) => series.values().map(ChunkWriter::estimated_size).sum(),
            Self::Aligned(writer) => writer.estimated_size(),
        }
    }

    fn end_encode_chunks(&mut self) -> Result<Vec<EncodedChunk>> {
        match self {
            Self::NonAligned(series) => {
                let mut chunks = Vec::new();
                for writer in series.values_mut() {
                    if let Some(chunk) = writer.end_encode_chunk()? {
                        chunks.push(chunk);
                    }
                }
                Ok(chunks)
            }
            Self::Aligned(writer) => writer.end_encode_chunks(),
        }
    }
}

/// Writes a complete file: registration, buffering, flushing, and the
/// index on close.
pub struct TsFileWriter<W: WriteFile> {
    io: TsFileIoWriter<W>,
    config: TsFileConfig,
    devices: BTreeMap<String, DeviceWriter>,
    record_count: u64,
    record_count_for_next_mem_check: u64,
    chunk_groups_written: usize,
}

impl TsFileWriter<LocalWriteFile> {
    /// Creates a new file at `path`.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` if the file exists.
    pub fn create(path: impl AsRef<Path>, config: TsFileConfig) -> Result<Self> {
        Self::new(LocalWriteFile::create(path)?, config)
    }
}

impl<W: WriteFile> TsFileWriter<W> {
    /// Creates a writer on `file`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArg` if `config` does not validate.
    pub fn new(file: W, config: TsFileConfig) -> Result<Self> {
        let io = TsFileIoWriter::new(file, &config)?;
        Ok(Self {
            io,
            config,
            devices: BTreeMap::new(),
            record_count: 0,
            record_count_for_next_mem_check: MIN_RECORD_COUNT_FOR_MEM_CHECK,
            chunk_groups_written: 0,
        })
    }

    /// Configuration in use.
    pub fn config(&self) -> &TsFileConfig {
        &self.config
    }

    /// Underlying byte-layout writer.
    pub fn io_writer(&self) -> &TsFileIoWriter<W> {
        &self.io
    }

    /// Records the range of write-plan indexes stored in this file.
    pub fn set_plan_index_range(&mut self, min: i64, max: i64) {
        self.io.set_plan_index_range(min, max);
    }

    /// Registers a non-aligned series.
    ///
    /// # Errors
    ///
    /// - `AlreadyExists` if the series is registered
    /// - `InvalidArg` for a bad schema or an aligned device
    pub fn register_timeseries(&mut self, device: &str, schema: MeasurementSchema) -> Result<()> {
        schema.validate()?;
        let writer = self
            .devices
            .entry(device.to_string())
            .or_insert_with(|| DeviceWriter::NonAligned(BTreeMap::new()));
        let DeviceWriter::NonAligned(series) = writer else {
            return Err(TsFileError::InvalidArg(format!(
                "device {} is aligned",
                device
            )));
        };
        if series.contains_key(&schema.name) {
            return Err(TsFileError::AlreadyExists(format!(
                "{}.{}",
                device, schema.name
            )));
        }
        let name = schema.name.clone();
        series.insert(name, ChunkWriter::new(schema, &self.config)?);
        Ok(())
    }

    /// Registers measurements of an aligned device. Calling again adds
    /// measurements to the device.
    ///
    /// # Errors
    ///
    /// - `AlreadyExists` if a measurement is registered
    /// - `InvalidArg` for an empty list, a bad schema, a non-aligned device,
    ///   or rows buffered for the device
    ///
    /// Nothing is registered when an error is returned.
    pub fn register_aligned_timeseries(
        &mut self,
        device: &str,
        schemas: Vec<MeasurementSchema>,
    ) -> Result<()> {
        if schemas.is_empty() {
            return Err(TsFileError::InvalidArg(format!(
                "no measurements given for aligned device {}",
                device
            )));
        }

        let existing = match self.devices.get(device) {
            None => None,
            Some(DeviceWriter::Aligned(writer)) => Some(writer),
            Some(DeviceWriter::NonAligned(_)) => {
                return Err(TsFileError::InvalidArg(format!(
                    "device {} is not aligned",
                    device
                )))
            }
        };
        let mut names = BTreeSet::new();
        for schema in &schemas {
            schema.validate()?;
            let known = existing.is_some_and(|w| w.contains(&schema.name));
            if known || !names.insert(schema.name.as_str()) {
                return Err(TsFileError::AlreadyExists(format!(
                    "{}.{}",
                    device, schema.name
                )));
            }
        }
        if existing.is_some_and(|w| !w.is_empty()) {
            return Err(TsFileError::InvalidArg(format!(
                "aligned device {} has buffered rows",
                device
            )));
        }

        if !self.devices.contains_key(device) {
            let writer = AlignedWriter::new(&self.config)?;
            self.devices
                .insert(device.to_string(), DeviceWriter::Aligned(writer));
        }
        if let Some(DeviceWriter::Aligned(writer)) = self.devices.get_mut(device) {
            for schema in schemas {
                writer.add_column(schema)?;
            }
        }
        Ok(())
    }

    /// Writes one point.
    ///
    /// On an aligned device the other measurements of the row are null.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unregistered series and `TypeMismatch` for
    /// a value of the wrong type.
    pub fn write(
        &mut self,
        device: &str,
        measurement: &str,
        time: i64,
        value: Value,
    ) -> Result<()> {
        self.write_record(device, time, &[(measurement, value)])
    }

    /// Writes several measurements of one device at one timestamp.
    ///
    /// The record is validated as a whole, so a rejected record writes
    /// nothing.
    pub fn write_record(
        &mut self,
        device: &str,
        time: i64,
        values: &[(&str, Value)],
    ) -> Result<()> {
        let writer = self
            .devices
            .get_mut(device)
            .ok_or_else(|| TsFileError::NotFound(device.to_string()))?;
        match writer {
            DeviceWriter::NonAligned(series) => {
                let mut seen = BTreeSet::new();
                for &(name, value) in values {
                    let writer = series
                        .get(name)
                        .ok_or_else(|| TsFileError::NotFound(format!("{}.{}", device, name)))?;
                    value.check_type(writer.schema().data_type)?;
                    if !seen.insert(name) {
                        return Err(TsFileError::InvalidArg(format!(
                            "measurement {}.{} appears twice in one record",
                            device, name
                        )));
                    }
                }
                for &(name, value) in values {
                    if let Some(writer) = series.get_mut(name) {
                        writer.write(time, value)?;
                    }
                }
            }
            DeviceWriter::Aligned(writer) => writer.write_row(time, values)?,
        }

        self.record_count += 1;
        if self.record_count >= self.record_count_for_next_mem_check {
            self.check_memory()?;
        }
        Ok(())
    }

    /// Bytes buffered across every device.
    pub fn estimated_size(&self) -> usize {
        self.devices.values().map(DeviceWriter::estimated_size).sum()
    }

    fn check_memory(&mut self) -> Result<()> {
        let threshold = self.config.chunk_group_size_threshold as u64;
        let size = self.estimated_size() as u64;
        if size >= threshold {
            debug!(
                buffered = size,
                threshold,
                records = self.record_count,
                "chunk group size threshold reached"
            );
            self.flush()?;
            return Ok(());
        }
        // Aim the next check at the record count where the threshold would
        // be crossed at the current bytes-per-record rate.
        let projected = self.record_count.saturating_mul(threshold) / size.max(1);
        self.record_count_for_next_mem_check = projected.clamp(
            self.record_count + MIN_RECORD_COUNT_FOR_MEM_CHECK,
            self.record_count + MAX_RECORD_COUNT_FOR_MEM_CHECK,
        );
        Ok(())
    }

    /// Writes one chunk group per device with buffered data.
    pub fn flush(&mut self) -> Result<()> {
        let mut groups = 0;
        for (device, writer) in &mut self.devices {
            let chunks = writer.end_encode_chunks()?;
            if chunks.is_empty() {
                continue;
            }
            self.io.start_chunk_group(device)?;
            for chunk in chunks {
                self.io.write_chunk(chunk)?;
            }
            self.io.end_chunk_group()?;
            groups += 1;
        }
        debug!(
            chunk_groups = groups,
            records = self.record_count,
            position = self.io.position(),
            "flushed"
        );
        self.chunk_groups_written += groups;
        self.record_count = 0;
        self.record_count_for_next_mem_check = MIN_RECORD_COUNT_FOR_MEM_CHECK;
        Ok(())
    }

    /// Flushes remaining data, writes the index and footer, and closes the
    /// file.
    pub fn close(mut self) -> Result<W> {
        self.flush()?;
        if self.chunk_groups_written == 0 {
            warn!("closing a file without any data");
        }
        self.io.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::{DataType, Encoding, MemoryFile};

    fn writer(config: TsFileConfig) -> TsFileWriter<MemoryFile> {
        TsFileWriter::new(MemoryFile::new(), config).unwrap()
    }

    fn int64(name: &str) -> MeasurementSchema {
        MeasurementSchema::new(name, DataType::Int64, Encoding::Zigzag)
    }

    #[test]
    fn test_registration_rules() {
        let mut w = writer(TsFileConfig::default());
        w.register_timeseries("d1", int64("s1")).unwrap();
        assert!(matches!(
            w.register_timeseries("d1", int64("s1")),
            Err(TsFileError::AlreadyExists(_))
        ));
        assert!(matches!(
            w.register_timeseries(
                "d1",
                MeasurementSchema::new("s2", DataType::Boolean, Encoding::Gorilla)
            ),
            Err(TsFileError::InvalidArg(_))
        ));
        assert!(matches!(
            w.register_aligned_timeseries("d1", vec![int64("s3")]),
            Err(TsFileError::InvalidArg(_))
        ));

        w.register_aligned_timeseries("d2", vec![int64("a"), int64("b")])
            .unwrap();
        assert!(matches!(
            w.register_timeseries("d2", int64("c")),
            Err(TsFileError::InvalidArg(_))
        ));
        assert!(matches!(
            w.register_aligned_timeseries("d2", vec![int64("c"), int64("a")]),
            Err(TsFileError::AlreadyExists(_))
        ));
        // The rejected call registered nothing.
        w.register_aligned_timeseries("d2", vec![int64("c")]).unwrap();
    }

    #[test]
    fn test_unregistered_series_not_found() {
        let mut w = writer(TsFileConfig::default());
        w.register_timeseries("d1", int64("s1")).unwrap();
        assert!(matches!(
            w.write("d9", "s1", 1, Value::Int64(1)),
            Err(TsFileError::NotFound(_))
        ));
        assert!(matches!(
            w.write("d1", "s9", 1, Value::Int64(1)),
            Err(TsFileError::NotFound(_))
        ));
    }

    #[test]
    fn test_rejected_record_writes_nothing() {
        let mut w = writer(TsFileConfig::default());
        w.register_timeseries("d1", int64("s1")).unwrap();
        w.register_timeseries("d1", int64("s2")).unwrap();
        let result = w.write_record(
            "d1",
            1,
            &[("s1", Value::Int64(1)), ("s2", Value::Double(1.0))],
        );
        assert!(matches!(result, Err(TsFileError::TypeMismatch { .. })));
        assert_eq!(w.estimated_size(), 0);
    }

    #[test]
    fn test_duplicate_measurement_in_record_rejected() {
        let mut w = writer(TsFileConfig::default());
        w.register_timeseries("d1", int64("s1")).unwrap();
        let result = w.write_record(
            "d1",
            1,
            &[("s1", Value::Int64(1)), ("s1", Value::Int64(2))],
        );
        assert!(matches!(result, Err(TsFileError::InvalidArg(_))));
        assert_eq!(w.estimated_size(), 0);
    }

    #[test]
    fn test_huge_threshold_projects_without_overflow() {
        let config = TsFileConfig::default().with_chunk_group_size_threshold(usize::MAX);
        let mut w = writer(config);
        w.register_timeseries("d1", int64("s1")).unwrap();
        for t in 0..MIN_RECORD_COUNT_FOR_MEM_CHECK as i64 {
            w.write("d1", "s1", t, Value::Int64(t)).unwrap();
        }
        assert!(w.io_writer().chunk_group_metas().is_empty());
        assert_eq!(
            w.record_count_for_next_mem_check,
            MIN_RECORD_COUNT_FOR_MEM_CHECK + MAX_RECORD_COUNT_FOR_MEM_CHECK
        );
    }

    #[test]
    fn test_threshold_triggers_flush() {
        let config = TsFileConfig::default().with_chunk_group_size_threshold(1);
        let mut w = writer(config);
        w.register_timeseries("d1", int64("s1")).unwrap();
        for t in 0..MIN_RECORD_COUNT_FOR_MEM_CHECK as i64 {
            w.write("d1", "s1", t, Value::Int64(t)).unwrap();
        }
        assert_eq!(w.io_writer().chunk_group_metas().len(), 1);
        assert_eq!(w.estimated_size(), 0);
    }

    #[test]
    fn test_each_flush_is_a_chunk_group() {
        let mut w = writer(TsFileConfig::default());
        w.register_timeseries("d1", int64("s1")).unwrap();
        w.register_timeseries("d2", int64("s1")).unwrap();
        w.write("d1", "s1", 1, Value::Int64(1)).unwrap();
        w.flush().unwrap();
        w.write("d1", "s1", 2, Value::Int64(2)).unwrap();
        w.write("d2", "s1", 2, Value::Int64(2)).unwrap();
        w.flush().unwrap();

        let groups: Vec<&str> = w
            .io_writer()
            .chunk_group_metas()
            .iter()
            .map(|g| g.device.as_str())
            .collect();
        assert_eq!(groups, vec!["d1", "d1", "d2"]);

        let file = w.close().unwrap();
        assert!(file.is_closed());
    }
}
