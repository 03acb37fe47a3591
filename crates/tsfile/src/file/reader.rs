//! Metadata reader.
//!
//! [`TsFileReader`] checks both magic strings, loads the [`TsFileMeta`]
//! footer, and descends the index tree to a series' [`TimeseriesIndex`].
//! From there it decodes chunks and pages back into points, for plain and
//! aligned series alike.
//!
//! Timestamps of non-aligned pages are decoded with the configured time
//! encoding, which the file does not record; open a file with the config it
//! was written with.
//!
//! # Footer lookup
//!
//! ```text
//! ... TsFileMeta | tsfile_meta_size: u32 | "TsFile"
//!     ^ size - 10 - tsfile_meta_size
//! ```

use super::io::{LocalReadFile, ReadFile};
use super::meta::{
    ChunkHeader, ChunkMeta, MetaIndexNode, MetaIndexNodeType, PageHeader, TimeseriesIndex,
    TsFileMeta,
};
use super::{
    BloomFilter, DataType, Encoding, Value, MAGIC_STRING, TIME_COLUMN_MASK, VALUE_COLUMN_MASK,
    VERSION_NUM_BYTE,
};
use crate::buffer::PagedBuffer;
use crate::compress;
use crate::config::TsFileConfig;
use crate::encoding::ColumnDecoder;
use crate::error::{Result, TsFileError};
use std::path::Path;
use tracing::debug;

const HEAD_LEN: usize = MAGIC_STRING.len() + 1;
const TAIL_LEN: usize = 4 + MAGIC_STRING.len();

/// First read size when parsing a chunk header of unknown length.
const CHUNK_HEADER_READ_SIZE: usize = 64;

/// One decoded page: header and uncompressed payload.
#[derive(Debug, Clone)]
pub struct PageData {
    /// Page header as stored.
    pub header: PageHeader,
    /// Uncompressed payload.
    pub payload: Vec<u8>,
}

/// One chunk with its pages decompressed.
#[derive(Debug, Clone)]
pub struct ChunkData {
    /// Chunk header; `num_of_pages` is filled in from the pages read.
    pub header: ChunkHeader,
    /// Pages in file order.
    pub pages: Vec<PageData>,
}

/// Rows of an aligned device.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedRows {
    /// Measurement names in index order.
    pub measurements: Vec<String>,
    /// `(time, values)` rows; `values[i]` belongs to `measurements[i]`.
    pub rows: Vec<(i64, Vec<Option<Value>>)>,
}

fn corrupted(msg: impl Into<String>) -> TsFileError {
    TsFileError::Corrupted(msg.into())
}

fn is_short_read(err: &TsFileError) -> bool {
    matches!(
        err,
        TsFileError::BufferNotEnough { .. }
            | TsFileError::PartialRead { .. }
            | TsFileError::OutOfRange { .. }
    )
}

/// Reads the index and data of a finished file.
pub struct TsFileReader<R: ReadFile> {
    file: R,
    meta: TsFileMeta,
    time_encoding: Encoding,
}

impl TsFileReader<LocalReadFile> {
    /// Opens the file at `path`.
    pub fn open_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::open(LocalReadFile::open(path)?)
    }
}

impl<R: ReadFile> TsFileReader<R> {
    /// Opens a file written with the default config.
    pub fn open(file: R) -> Result<Self> {
        Self::open_with_config(file, &TsFileConfig::default())
    }

    /// Validates the file and loads its footer.
    ///
    /// # Errors
    ///
    /// - `InvalidMagic` if either magic string is wrong
    /// - `UnsupportedVersion` for a version byte other than 4
    /// - `Corrupted` if the footer size does not fit the file
    pub fn open_with_config(mut file: R, config: &TsFileConfig) -> Result<Self> {
        let size = file.size();
        if size < (HEAD_LEN + TAIL_LEN) as u64 {
            return Err(corrupted(format!("file of {} bytes is too short", size)));
        }

        let head = file.read_at(0, HEAD_LEN)?;
        if &head[..MAGIC_STRING.len()] != MAGIC_STRING {
            return Err(TsFileError::InvalidMagic(head[..MAGIC_STRING.len()].to_vec()));
        }
        if head[MAGIC_STRING.len()] != VERSION_NUM_BYTE {
            return Err(TsFileError::UnsupportedVersion(head[MAGIC_STRING.len()]));
        }

        let tail = file.read_at(size - TAIL_LEN as u64, TAIL_LEN)?;
        if &tail[4..] != MAGIC_STRING {
            return Err(TsFileError::InvalidMagic(tail[4..].to_vec()));
        }
        let meta_size = u64::from(u32::from_be_bytes([tail[0], tail[1], tail[2], tail[3]]));
        if meta_size + (HEAD_LEN + TAIL_LEN) as u64 > size {
            return Err(corrupted(format!(
                "footer of {} bytes does not fit a {} byte file",
                meta_size, size
            )));
        }

        let meta_start = size - TAIL_LEN as u64 - meta_size;
        let bytes = file.read_at(meta_start, meta_size as usize)?;
        let meta = TsFileMeta::deserialize_from(&mut PagedBuffer::wrap(bytes))?;
        if meta.meta_offset < HEAD_LEN as i64 || meta.meta_offset as u64 >= meta_start {
            return Err(corrupted(format!("meta offset {} out of range", meta.meta_offset)));
        }
        debug!(size, meta_size, "file opened");

        Ok(Self {
            file,
            meta,
            time_encoding: config.time_encoding,
        })
    }

    /// Footer metadata.
    pub fn meta(&self) -> &TsFileMeta {
        &self.meta
    }

    /// Path filter of the file.
    pub fn bloom_filter(&self) -> &BloomFilter {
        &self.meta.bloom_filter
    }

    /// Returns false if the file certainly has no `device.measurement`.
    pub fn may_contain(&self, device: &str, measurement: &str) -> bool {
        self.meta.bloom_filter.maybe_contains(device, measurement)
    }

    fn read_range(&mut self, (start, end): (i64, i64)) -> Result<PagedBuffer> {
        if start < 0 || end < start {
            return Err(corrupted(format!("bad index range [{}, {})", start, end)));
        }
        let bytes = self.file.read_at(start as u64, (end - start) as usize)?;
        Ok(PagedBuffer::wrap(bytes))
    }

    fn read_node(&mut self, range: (i64, i64)) -> Result<MetaIndexNode> {
        MetaIndexNode::deserialize_from(&mut self.read_range(range)?)
    }

    /// Every device in the file, sorted.
    pub fn devices(&mut self) -> Result<Vec<String>> {
        let mut devices = Vec::new();
        let mut stack = vec![self.meta.meta_index.clone()];
        while let Some(node) = stack.pop() {
            match node.node_type {
                MetaIndexNodeType::LeafDevice => {
                    devices.extend(node.children.into_iter().map(|e| e.name));
                }
                MetaIndexNodeType::InternalDevice => {
                    for i in 0..node.children.len() {
                        let end = node
                            .children
                            .get(i + 1)
                            .map_or(node.end_offset, |next| next.offset);
                        stack.push(self.read_node((node.children[i].offset, end))?);
                    }
                }
                other => {
                    return Err(corrupted(format!("{:?} node in the device tree", other)));
                }
            }
        }
        devices.sort();
        Ok(devices)
    }

    /// Root of the measurement tree of `device`.
    fn device_root(&mut self, device: &str) -> Result<MetaIndexNode> {
        let mut node = self.meta.meta_index.clone();
        loop {
            let range = match node.node_type {
                MetaIndexNodeType::InternalDevice => node.child_range(device, false),
                MetaIndexNodeType::LeafDevice => node.child_range(device, true),
                other => return Err(corrupted(format!("{:?} node in the device tree", other))),
            };
            let range = range.ok_or_else(|| TsFileError::NotFound(device.to_string()))?;
            let child = self.read_node(range)?;
            if node.node_type == MetaIndexNodeType::LeafDevice {
                return Ok(child);
            }
            node = child;
        }
    }

    /// Looks up the index record of one series.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the file has no such series.
    pub fn get_timeseries_index(
        &mut self,
        device: &str,
        measurement: &str,
    ) -> Result<TimeseriesIndex> {
        let not_found = || TsFileError::NotFound(format!("{}.{}", device, measurement));
        if !measurement.is_empty() && !self.may_contain(device, measurement) {
            return Err(not_found());
        }

        let mut node = self.device_root(device)?;
        loop {
            match node.node_type {
                MetaIndexNodeType::InternalMeasurement => {
                    let range = node.child_range(measurement, false).ok_or_else(not_found)?;
                    node = self.read_node(range)?;
                }
                MetaIndexNodeType::LeafMeasurement => {
                    let range = node.child_range(measurement, true).ok_or_else(not_found)?;
                    return TimeseriesIndex::deserialize_from(&mut self.read_range(range)?);
                }
                other => {
                    return Err(corrupted(format!("{:?} node in a measurement tree", other)));
                }
            }
        }
    }

    /// Index records of every series of `device`, sorted by name.
    pub fn timeseries_indexes(&mut self, device: &str) -> Result<Vec<TimeseriesIndex>> {
        let mut indexes = Vec::new();
        let mut stack = vec![self.device_root(device)?];
        while let Some(node) = stack.pop() {
            let is_leaf = match node.node_type {
                MetaIndexNodeType::LeafMeasurement => true,
                MetaIndexNodeType::InternalMeasurement => false,
                other => {
                    return Err(corrupted(format!("{:?} node in a measurement tree", other)));
                }
            };
            for (i, entry) in node.children.iter().enumerate() {
                let end = node
                    .children
                    .get(i + 1)
                    .map_or(node.end_offset, |next| next.offset);
                let mut bytes = self.read_range((entry.offset, end))?;
                if is_leaf {
                    indexes.push(TimeseriesIndex::deserialize_from(&mut bytes)?);
                } else {
                    stack.push(MetaIndexNode::deserialize_from(&mut bytes)?);
                }
            }
        }
        indexes.sort_by(|a, b| a.measurement_name.cmp(&b.measurement_name));
        Ok(indexes)
    }

    fn read_chunk_header(&mut self, offset: u64) -> Result<(ChunkHeader, u64)> {
        let available = self.file.size().saturating_sub(offset) as usize;
        let mut want = CHUNK_HEADER_READ_SIZE.min(available);
        loop {
            let mut input = PagedBuffer::wrap(self.file.read_at(offset, want)?);
            let parsed = input
                .read_u8()
                .and_then(|marker| ChunkHeader::deserialize_after_marker(marker, &mut input));
            match parsed {
                Ok(header) => return Ok((header, input.read_pos() as u64)),
                Err(e) if is_short_read(&e) && want < available => {
                    want = (want * 2).min(available);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Reads one chunk and decompresses its pages.
    pub fn read_chunk(&mut self, meta: &ChunkMeta) -> Result<ChunkData> {
        let offset = u64::try_from(meta.offset_of_chunk_header).map_err(|_| {
            corrupted(format!(
                "negative chunk offset {}",
                meta.offset_of_chunk_header
            ))
        })?;
        let (mut header, header_len) = self.read_chunk_header(offset)?;
        if header.measurement_name != meta.measurement_name {
            return Err(corrupted(format!(
                "chunk at {} belongs to {}, index says {}",
                offset, header.measurement_name, meta.measurement_name
            )));
        }

        let bytes = self.file.read_at(offset + header_len, header.data_size)?;
        let mut input = PagedBuffer::wrap(bytes);
        let with_statistic = !header.is_single_page();
        let mut pages = Vec::new();
        while input.remaining() > 0 {
            let page_header =
                PageHeader::deserialize_from(header.data_type, with_statistic, &mut input)?;
            let stored = input.read_vec(page_header.compressed_size)?;
            let payload =
                compress::decompress(header.compression, &stored, page_header.uncompressed_size)?;
            pages.push(PageData {
                header: page_header,
                payload,
            });
        }
        if header.is_single_page() && pages.len() != 1 {
            return Err(corrupted(format!(
                "single-page chunk {} holds {} pages",
                header.measurement_name,
                pages.len()
            )));
        }
        header.num_of_pages = pages.len();
        Ok(ChunkData { header, pages })
    }

    /// Every chunk of one series, in file order.
    pub fn read_chunks(&mut self, index: &TimeseriesIndex) -> Result<Vec<ChunkData>> {
        index
            .chunk_metas
            .iter()
            .map(|meta| self.read_chunk(meta))
            .collect()
    }

    /// Reads every point of a series.
    ///
    /// For a measurement of an aligned device the null rows are skipped.
    pub fn read_series(&mut self, device: &str, measurement: &str) -> Result<Vec<(i64, Value)>> {
        let index = self.get_timeseries_index(device, measurement)?;
        match index.mask {
            0 => {
                let mut points = Vec::with_capacity(index.statistic.count() as usize);
                for chunk in self.read_chunks(&index)? {
                    for page in &chunk.pages {
                        decode_plain_page(
                            self.time_encoding,
                            &chunk.header,
                            &page.payload,
                            &mut points,
                        )?;
                    }
                }
                Ok(points)
            }
            VALUE_COLUMN_MASK => {
                let time_index = self.get_timeseries_index(device, "")?;
                let times = self.read_time_column(&time_index)?;
                let values = self.read_value_column(&index)?;
                zip_column(&times, values, &index.measurement_name)
                    .map(|rows| {
                        rows.into_iter()
                            .filter_map(|(t, v)| v.map(|v| (t, v)))
                            .collect()
                    })
            }
            _ => Err(TsFileError::InvalidArg(format!(
                "{}.{} is a time column",
                device, measurement
            ))),
        }
    }

    /// Reads every row of an aligned device.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the device has no time column.
    pub fn read_aligned(&mut self, device: &str) -> Result<AlignedRows> {
        let time_index = self.get_timeseries_index(device, "")?;
        if time_index.mask != TIME_COLUMN_MASK {
            return Err(corrupted(format!("time column of {} is not marked", device)));
        }
        let times = self.read_time_column(&time_index)?;

        let mut measurements = Vec::new();
        let mut rows: Vec<(i64, Vec<Option<Value>>)> =
            times.iter().map(|&t| (t, Vec::new())).collect();
        for index in self.timeseries_indexes(device)? {
            if index.mask != VALUE_COLUMN_MASK {
                continue;
            }
            let values = self.read_value_column(&index)?;
            let column = zip_column(&times, values, &index.measurement_name)?;
            for (row, (_, value)) in rows.iter_mut().zip(column) {
                row.1.push(value);
            }
            measurements.push(index.measurement_name);
        }
        Ok(AlignedRows { measurements, rows })
    }

    fn read_time_column(&mut self, index: &TimeseriesIndex) -> Result<Vec<i64>> {
        let mut times = Vec::with_capacity(index.statistic.count() as usize);
        for chunk in self.read_chunks(index)? {
            for page in &chunk.pages {
                let mut decoder =
                    ColumnDecoder::for_time(chunk.header.encoding, page.payload.clone())?;
                while let Some(t) = decoder.next_time()? {
                    times.push(t);
                }
            }
        }
        Ok(times)
    }

    fn read_value_column(&mut self, index: &TimeseriesIndex) -> Result<Vec<Option<Value>>> {
        let mut values = Vec::new();
        for chunk in self.read_chunks(index)? {
            for page in &chunk.pages {
                decode_value_page(
                    chunk.header.encoding,
                    chunk.header.data_type,
                    &page.payload,
                    &mut values,
                )?;
            }
        }
        Ok(values)
    }
}

fn zip_column(
    times: &[i64],
    values: Vec<Option<Value>>,
    measurement: &str,
) -> Result<Vec<(i64, Option<Value>)>> {
    if values.len() != times.len() {
        return Err(corrupted(format!(
            "aligned column {} has {} rows, time column has {}",
            measurement,
            values.len(),
            times.len()
        )));
    }
    Ok(times.iter().copied().zip(values).collect())
}

fn decode_plain_page(
    time_encoding: Encoding,
    header: &ChunkHeader,
    payload: &[u8],
    points: &mut Vec<(i64, Value)>,
) -> Result<()> {
    let mut input = PagedBuffer::wrap(payload.to_vec());
    let time_len = input.read_var_u64()? as usize;
    let time_bytes = input.read_vec(time_len)?;
    let value_bytes = input.read_vec(input.remaining())?;

    let mut times = ColumnDecoder::for_time(time_encoding, time_bytes)?;
    let mut values = ColumnDecoder::new(header.encoding, header.data_type, value_bytes)?;
    loop {
        match (times.next_time()?, values.next_value()?) {
            (Some(t), Some(v)) => points.push((t, v)),
            (None, None) => return Ok(()),
            _ => {
                return Err(corrupted(format!(
                    "page of {} has unequal time and value counts",
                    header.measurement_name
                )))
            }
        }
    }
}

fn decode_value_page(
    encoding: Encoding,
    data_type: DataType,
    payload: &[u8],
    values: &mut Vec<Option<Value>>,
) -> Result<()> {
    let mut input = PagedBuffer::wrap(payload.to_vec());
    let row_count = input.read_u32()? as usize;
    let bitmap = input.read_vec(row_count.div_ceil(8))?;
    let mut decoder = ColumnDecoder::new(encoding, data_type, input.read_vec(input.remaining())?)?;
    for row in 0..row_count {
        let present = bitmap[row / 8] & (0x80 >> (row % 8)) != 0;
        if present {
            let value = decoder
                .next_value()?
                .ok_or_else(|| corrupted("value page ends before its bitmap"))?;
            values.push(Some(value));
        } else {
            values.push(None);
        }
    }
    Ok(())
}
