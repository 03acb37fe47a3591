//! Low-level file writer: chunk groups, chunks, and the file index.
//!
//! [`TsFileIoWriter`] owns the output handle. Bytes are staged in a
//! [`PagedBuffer`] and pushed to the file after every chunk group, so the
//! position of any byte is `flushed + staged`.
//!
//! # Index layout
//!
//! `write_file_index` walks the series in `(device, measurement)` order and
//! builds the index tree bottom-up:
//!
//! 1. every series gets a `TimeseriesIndex` record and an entry in a
//!    leaf-measurement node; full nodes are sealed and queued
//! 2. queued nodes are grouped under internal-measurement nodes until one
//!    root per device remains
//! 3. device roots are indexed the same way by leaf-device and
//!    internal-device nodes
//!
//! Each node is written after the children it points to, and the device
//! level root goes into the [`TsFileMeta`] footer.

use super::bloom::BloomFilter;
use super::io::WriteFile;
use super::meta::{
    ChunkGroupMeta, ChunkMeta, MetaIndexNode, MetaIndexNodeType, TimeseriesIndex, TsFileMeta,
};
use super::{
    CHUNK_GROUP_HEADER_MARKER, MAGIC_STRING, OPERATION_INDEX_RANGE, SEPARATOR_MARKER,
    VERSION_NUM_BYTE,
};
use crate::buffer::{Arena, Handle, PagedBuffer};
use crate::config::TsFileConfig;
use crate::error::{Result, TsFileError};
use crate::write::EncodedChunk;
use std::collections::{btree_map, BTreeMap, VecDeque};
use tracing::debug;

/// Chunk metas grouped by device, then measurement.
pub type SeriesChunkMetas = BTreeMap<String, BTreeMap<String, Vec<ChunkMeta>>>;

fn stale<T>(_: Handle<T>) -> TsFileError {
    TsFileError::InvalidArg("metadata handle outlived its arena".to_string())
}

/// Writes the byte layout of one file.
pub struct TsFileIoWriter<W: WriteFile> {
    file: W,
    out: PagedBuffer,
    flushed: u64,
    max_degree: usize,
    bloom_filter_error_rate: f64,
    chunk_metas: Arena<ChunkMeta>,
    chunk_groups: Vec<ChunkGroupMeta>,
    current_group: Option<ChunkGroupMeta>,
    min_plan_index: i64,
    max_plan_index: i64,
}

impl<W: WriteFile> TsFileIoWriter<W> {
    /// Starts a file on `file` and stages the magic string and version.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArg` if `config` does not validate.
    pub fn new(file: W, config: &TsFileConfig) -> Result<Self> {
        config.validate()?;
        let mut out = PagedBuffer::new(config.page_size);
        out.write(MAGIC_STRING)?;
        out.write_u8(VERSION_NUM_BYTE)?;
        Ok(Self {
            file,
            out,
            flushed: 0,
            max_degree: config.max_degree_of_index_node,
            bloom_filter_error_rate: config.bloom_filter_error_rate,
            chunk_metas: Arena::default(),
            chunk_groups: Vec::new(),
            current_group: None,
            min_plan_index: i64::MAX,
            max_plan_index: i64::MIN,
        })
    }

    /// File offset of the next byte.
    pub fn position(&self) -> i64 {
        (self.flushed + self.out.total_size() as u64) as i64
    }

    /// Records the range of write-plan indexes stored in this file.
    pub fn set_plan_index_range(&mut self, min: i64, max: i64) {
        self.min_plan_index = min;
        self.max_plan_index = max;
    }

    /// Chunk groups ended so far.
    pub fn chunk_group_metas(&self) -> &[ChunkGroupMeta] {
        &self.chunk_groups
    }

    /// Resolves a chunk meta handle of a [`ChunkGroupMeta`].
    pub fn chunk_meta(&self, handle: Handle<ChunkMeta>) -> Option<&ChunkMeta> {
        self.chunk_metas.get(handle)
    }

    /// Opens a chunk group for `device`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArg` if a group is already open.
    pub fn start_chunk_group(&mut self, device: &str) -> Result<()> {
        if let Some(open) = &self.current_group {
            return Err(TsFileError::InvalidArg(format!(
                "chunk group of {} is still open",
                open.device
            )));
        }
        self.out.write_u8(CHUNK_GROUP_HEADER_MARKER)?;
        self.out.write_str(device)?;
        self.current_group = Some(ChunkGroupMeta::new(device));
        Ok(())
    }

    /// Writes one finished chunk into the open group and records its meta.
    pub fn write_chunk(&mut self, chunk: EncodedChunk) -> Result<()> {
        let offset_of_chunk_header = self.position();
        let group = self.current_group.as_mut().ok_or_else(|| {
            TsFileError::InvalidArg("write_chunk called outside a chunk group".to_string())
        })?;

        chunk.header.serialize_to(&mut self.out)?;
        for page in chunk.pages.iter() {
            self.out.write(page)?;
        }

        let mask = chunk.header.column_mask();
        let handle = self.chunk_metas.alloc(ChunkMeta {
            measurement_name: chunk.header.measurement_name,
            offset_of_chunk_header,
            data_type: chunk.header.data_type,
            mask,
            statistic: chunk.statistic,
        })?;
        group.chunk_metas.push(handle);
        Ok(())
    }

    /// Closes the open group and pushes staged bytes to the file.
    pub fn end_chunk_group(&mut self) -> Result<()> {
        let group = self.current_group.take().ok_or_else(|| {
            TsFileError::InvalidArg("no chunk group is open".to_string())
        })?;
        debug!(
            device = %group.device,
            chunks = group.chunk_metas.len(),
            "chunk group ended"
        );
        self.chunk_groups.push(group);
        self.flush_to_file()
    }

    /// Pushes every staged byte to the file.
    pub fn flush_to_file(&mut self) -> Result<()> {
        for page in self.out.iter() {
            self.file.write(page)?;
        }
        self.flushed += self.out.total_size() as u64;
        self.out.reset();
        Ok(())
    }

    /// Chunk metas of every written chunk, grouped by device and
    /// measurement in file order.
    pub fn series_chunk_metas(&self) -> Result<SeriesChunkMetas> {
        let mut series = SeriesChunkMetas::new();
        for group in &self.chunk_groups {
            let measurements = series.entry(group.device.clone()).or_default();
            for &handle in &group.chunk_metas {
                let meta = self.chunk_metas.get(handle).ok_or_else(|| stale(handle))?;
                measurements
                    .entry(meta.measurement_name.clone())
                    .or_default()
                    .push(meta.clone());
            }
        }
        Ok(series)
    }

    /// Writes the index section and the footer, then pushes everything to
    /// the file. Returns the footer metadata.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArg` while a chunk group is open.
    pub fn write_file_index(&mut self) -> Result<TsFileMeta> {
        if self.current_group.is_some() {
            return Err(TsFileError::InvalidArg(
                "cannot write the file index inside a chunk group".to_string(),
            ));
        }
        let series = self.series_chunk_metas()?;

        self.out.write_u8(OPERATION_INDEX_RANGE)?;
        self.out.write_i64(self.min_plan_index)?;
        self.out.write_i64(self.max_plan_index)?;
        let meta_offset = self.position();
        self.out.write_u8(SEPARATOR_MARKER)?;

        let path_count = series
            .values()
            .flat_map(|m| m.keys())
            .filter(|name| !name.is_empty())
            .count();
        let mut bloom_filter = BloomFilter::new(path_count, self.bloom_filter_error_rate);

        let index_start = self.position();
        let mut builder = IndexBuilder::new(&mut self.out, self.flushed, self.max_degree);
        let meta_index = builder.build(&series, &mut bloom_filter)?;
        let index_bytes = self.position() - index_start;

        let meta = TsFileMeta {
            meta_index,
            meta_offset,
            bloom_filter,
        };
        let size = meta.serialize_to(&mut self.out)?;
        self.out.write_u32(size as u32)?;
        self.out.write(MAGIC_STRING)?;

        debug!(
            devices = series.len(),
            paths = path_count,
            index_bytes,
            footer_bytes = size,
            "file index written"
        );

        self.chunk_metas.reset();
        self.chunk_groups.clear();
        self.flush_to_file()?;
        Ok(meta)
    }

    /// Writes the index and footer, closes the file, and returns it.
    pub fn close(mut self) -> Result<W> {
        self.write_file_index()?;
        self.file.close()?;
        Ok(self.file)
    }
}

/// Series cursor that reports exhaustion as `NoMoreData`.
struct DeviceCursor<'a> {
    devices: btree_map::Iter<'a, String, BTreeMap<String, Vec<ChunkMeta>>>,
}

impl<'a> DeviceCursor<'a> {
    fn next_device(&mut self) -> Result<(&'a String, &'a BTreeMap<String, Vec<ChunkMeta>>)> {
        self.devices.next().ok_or(TsFileError::NoMoreData)
    }
}

/// Bottom-up index tree writer for one `write_file_index` call.
struct IndexBuilder<'a> {
    out: &'a mut PagedBuffer,
    base: u64,
    max_degree: usize,
    nodes: Arena<MetaIndexNode>,
}

impl<'a> IndexBuilder<'a> {
    fn new(out: &'a mut PagedBuffer, base: u64, max_degree: usize) -> Self {
        Self {
            out,
            base,
            max_degree,
            nodes: Arena::default(),
        }
    }

    fn position(&self) -> i64 {
        (self.base + self.out.total_size() as u64) as i64
    }

    fn build(
        &mut self,
        series: &SeriesChunkMetas,
        bloom_filter: &mut BloomFilter,
    ) -> Result<MetaIndexNode> {
        let mut device_roots: BTreeMap<&str, Handle<MetaIndexNode>> = BTreeMap::new();
        let mut cursor = DeviceCursor {
            devices: series.iter(),
        };
        loop {
            let (device, measurements) = match cursor.next_device() {
                Ok(next) => next,
                Err(e) if e.is_end_of_data() => break,
                Err(e) => return Err(e),
            };
            let root = self.build_device(device, measurements, bloom_filter)?;
            if device_roots.insert(device.as_str(), root).is_some() {
                return Err(TsFileError::AlreadyExists(device.clone()));
            }
        }

        let mut queue = VecDeque::new();
        let mut current = MetaIndexNode::new(MetaIndexNodeType::LeafDevice);
        for (device, root) in device_roots {
            let pos = self.position();
            if current.is_full(self.max_degree) {
                current.end_offset = pos;
                let full = std::mem::replace(
                    &mut current,
                    MetaIndexNode::new(MetaIndexNodeType::LeafDevice),
                );
                queue.push_back(self.nodes.alloc(full)?);
            }
            current.add_entry(device, pos);
            let node = self.nodes.get(root).ok_or_else(|| stale(root))?;
            node.serialize_to(self.out)?;
        }
        current.end_offset = self.position();
        queue.push_back(self.nodes.alloc(current)?);

        let root = self.generate_root_node(queue, MetaIndexNodeType::InternalDevice)?;
        let node = self.nodes.get(root).ok_or_else(|| stale(root))?.clone();
        self.nodes.reset();
        Ok(node)
    }

    fn build_device(
        &mut self,
        device: &str,
        measurements: &BTreeMap<String, Vec<ChunkMeta>>,
        bloom_filter: &mut BloomFilter,
    ) -> Result<Handle<MetaIndexNode>> {
        let mut queue = VecDeque::new();
        let mut current = MetaIndexNode::new(MetaIndexNodeType::LeafMeasurement);
        for (measurement, chunk_metas) in measurements {
            let pos = self.position();
            if current.is_full(self.max_degree) {
                current.end_offset = pos;
                let full = std::mem::replace(
                    &mut current,
                    MetaIndexNode::new(MetaIndexNodeType::LeafMeasurement),
                );
                queue.push_back(self.nodes.alloc(full)?);
            }
            let index = TimeseriesIndex::from_chunk_metas(chunk_metas.clone())?;
            current.add_entry(measurement.as_str(), pos);
            index.serialize_to(self.out)?;
            if !measurement.is_empty() {
                bloom_filter.add_path(device, measurement);
            }
        }
        current.end_offset = self.position();
        queue.push_back(self.nodes.alloc(current)?);

        self.generate_root_node(queue, MetaIndexNodeType::InternalMeasurement)
    }

    /// Groups queued sibling nodes under `node_type` parents, level by
    /// level, until one node remains.
    fn generate_root_node(
        &mut self,
        mut queue: VecDeque<Handle<MetaIndexNode>>,
        node_type: MetaIndexNodeType,
    ) -> Result<Handle<MetaIndexNode>> {
        while queue.len() > 1 {
            let level_size = queue.len();
            let mut current = MetaIndexNode::new(node_type);
            for _ in 0..level_size {
                let child = queue.pop_front().ok_or(TsFileError::NoMoreData)?;
                let pos = self.position();
                if current.is_full(self.max_degree) {
                    current.end_offset = pos;
                    let full = std::mem::replace(&mut current, MetaIndexNode::new(node_type));
                    queue.push_back(self.nodes.alloc(full)?);
                }
                let node = self.nodes.get(child).ok_or_else(|| stale(child))?;
                current.add_entry(node.first_name().unwrap_or_default(), pos);
                node.serialize_to(self.out)?;
            }
            current.end_offset = self.position();
            queue.push_back(self.nodes.alloc(current)?);
        }
        queue.pop_front().ok_or(TsFileError::NoMoreData)
    }
}
