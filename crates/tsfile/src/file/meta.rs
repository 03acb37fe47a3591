//! Headers and index records.
//!
//! Every record here follows the same pattern as the rest of the format:
//! `serialize_to` appends to a [`PagedBuffer`] and returns the bytes written,
//! `deserialize_from` reads one record from the buffer's cursor.

use super::bloom::BloomFilter;
use super::{
    CompressionType, DataType, Encoding, CHUNK_HEADER_MARKER, ONLY_ONE_PAGE_CHUNK_HEADER_MARKER,
    TIME_COLUMN_MASK, VALUE_COLUMN_MASK,
};
use crate::buffer::{Handle, PagedBuffer};
use crate::error::{Result, TsFileError};
use crate::statistic::Statistic;

const COLUMN_MASKS: u8 = TIME_COLUMN_MASK | VALUE_COLUMN_MASK;

/// Header written before the pages of a chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkHeader {
    /// Marker byte, including the aligned column bit.
    pub chunk_type: u8,
    /// Measurement name (`""` for the time column of an aligned device).
    pub measurement_name: String,
    /// Bytes of page headers and pages that follow the header.
    pub data_size: usize,
    /// Declared data type.
    pub data_type: DataType,
    /// Page compression.
    pub compression: CompressionType,
    /// Value encoding.
    pub encoding: Encoding,
    /// Number of pages. Not serialized; the reader counts pages.
    pub num_of_pages: usize,
}

impl ChunkHeader {
    /// Returns true if the chunk has a single page without a statistic.
    pub fn is_single_page(&self) -> bool {
        self.chunk_type & !COLUMN_MASKS == ONLY_ONE_PAGE_CHUNK_HEADER_MARKER
    }

    /// Column bits of the marker (`0`, time, or value).
    pub fn column_mask(&self) -> u8 {
        self.chunk_type & COLUMN_MASKS
    }

    /// Writes the header, marker byte first.
    pub fn serialize_to(&self, out: &mut PagedBuffer) -> Result<usize> {
        let start = out.total_size();
        out.write_u8(self.chunk_type)?;
        out.write_str(&self.measurement_name)?;
        out.write_var_u64(self.data_size as u64)?;
        out.write_u8(self.data_type as u8)?;
        out.write_u8(self.compression as u8)?;
        out.write_u8(self.encoding as u8)?;
        Ok(out.total_size() - start)
    }

    /// Reads a header whose marker byte `chunk_type` was already consumed.
    pub fn deserialize_after_marker(chunk_type: u8, input: &mut PagedBuffer) -> Result<Self> {
        let marker = chunk_type & !COLUMN_MASKS;
        if marker != CHUNK_HEADER_MARKER && marker != ONLY_ONE_PAGE_CHUNK_HEADER_MARKER {
            return Err(TsFileError::Corrupted(format!(
                "unexpected chunk marker {:#04x}",
                chunk_type
            )));
        }
        Ok(Self {
            chunk_type,
            measurement_name: input.read_str()?,
            data_size: input.read_var_u64()? as usize,
            data_type: DataType::parse(input.read_u8()?)?,
            compression: CompressionType::parse(input.read_u8()?)?,
            encoding: Encoding::parse(input.read_u8()?)?,
            num_of_pages: 0,
        })
    }
}

/// Header written before each page's bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct PageHeader {
    /// Size of the page payload before compression.
    pub uncompressed_size: usize,
    /// Size of the stored page bytes.
    pub compressed_size: usize,
    /// Page statistic; omitted when the page is the only one in its chunk.
    pub statistic: Option<Statistic>,
}

impl PageHeader {
    /// Writes the header.
    pub fn serialize_to(&self, out: &mut PagedBuffer) -> Result<usize> {
        let start = out.total_size();
        out.write_var_u64(self.uncompressed_size as u64)?;
        out.write_var_u64(self.compressed_size as u64)?;
        if let Some(statistic) = &self.statistic {
            statistic.serialize_to(out)?;
        }
        Ok(out.total_size() - start)
    }

    /// Reads a header; `with_statistic` is false for single-page chunks.
    pub fn deserialize_from(
        data_type: DataType,
        with_statistic: bool,
        input: &mut PagedBuffer,
    ) -> Result<Self> {
        let uncompressed_size = input.read_var_u64()? as usize;
        let compressed_size = input.read_var_u64()? as usize;
        let statistic = if with_statistic {
            Some(Statistic::deserialize_from(data_type, input)?)
        } else {
            None
        };
        Ok(Self {
            uncompressed_size,
            compressed_size,
            statistic,
        })
    }
}

/// Location and statistic of one written chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkMeta {
    /// Measurement name.
    pub measurement_name: String,
    /// File offset of the chunk header's marker byte.
    pub offset_of_chunk_header: i64,
    /// Declared data type.
    pub data_type: DataType,
    /// Column bits (`0`, time, or value).
    pub mask: u8,
    /// Chunk statistic.
    pub statistic: Statistic,
}

/// Chunk metas of one device written in one flush.
#[derive(Debug, Clone)]
pub struct ChunkGroupMeta {
    /// Device name.
    pub device: String,
    /// Chunk metas, allocated in the writer's chunk-meta arena.
    pub chunk_metas: Vec<Handle<ChunkMeta>>,
}

impl ChunkGroupMeta {
    /// Creates an empty group for `device`.
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            chunk_metas: Vec::new(),
        }
    }
}

/// Index record of one timeseries: its chunk metas and rolled-up statistic.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeseriesIndex {
    /// Column bits (`0`, time, or value).
    pub mask: u8,
    /// Measurement name.
    pub measurement_name: String,
    /// Declared data type.
    pub data_type: DataType,
    /// Merge of every chunk statistic.
    pub statistic: Statistic,
    /// Chunk metas in file order.
    pub chunk_metas: Vec<ChunkMeta>,
}

impl TimeseriesIndex {
    /// Builds the record from chunk metas of one series.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArg` for an empty list and `TypeMismatch` if the
    /// chunks disagree on the data type.
    pub fn from_chunk_metas(chunk_metas: Vec<ChunkMeta>) -> Result<Self> {
        let first = chunk_metas.first().ok_or_else(|| {
            TsFileError::InvalidArg("timeseries index needs at least one chunk".to_string())
        })?;
        let mut statistic = Statistic::new(first.data_type);
        for meta in &chunk_metas {
            statistic.merge_with(&meta.statistic)?;
        }
        Ok(Self {
            mask: first.mask,
            measurement_name: first.measurement_name.clone(),
            data_type: first.data_type,
            statistic,
            chunk_metas,
        })
    }

    /// Writes the record.
    pub fn serialize_to(&self, out: &mut PagedBuffer) -> Result<usize> {
        let start = out.total_size();
        let multi_chunk = self.chunk_metas.len() > 1;
        out.write_u8(u8::from(multi_chunk) | self.mask)?;
        out.write_str(&self.measurement_name)?;
        out.write_u8(self.data_type as u8)?;

        let mut list = PagedBuffer::new(out.page_size());
        for meta in &self.chunk_metas {
            list.write_i64(meta.offset_of_chunk_header)?;
            if multi_chunk {
                meta.statistic.serialize_to(&mut list)?;
            }
        }
        out.write_var_u64(list.total_size() as u64)?;
        self.statistic.serialize_to(out)?;
        for chunk in list.iter() {
            out.write(chunk)?;
        }
        Ok(out.total_size() - start)
    }

    /// Reads one record.
    pub fn deserialize_from(input: &mut PagedBuffer) -> Result<Self> {
        let meta_type = input.read_u8()?;
        let mask = meta_type & COLUMN_MASKS;
        let multi_chunk = match meta_type & !COLUMN_MASKS {
            0 => false,
            1 => true,
            other => {
                return Err(TsFileError::Corrupted(format!(
                    "unknown timeseries meta type {}",
                    other
                )))
            }
        };
        let measurement_name = input.read_str()?;
        let data_type = DataType::parse(input.read_u8()?)?;
        let list_size = input.read_var_u64()? as usize;
        let statistic = Statistic::deserialize_from(data_type, input)?;

        let mut list = PagedBuffer::wrap(input.read_vec(list_size)?);
        let mut chunk_metas = Vec::new();
        while list.remaining() > 0 {
            let offset_of_chunk_header = list.read_i64()?;
            let chunk_statistic = if multi_chunk {
                Statistic::deserialize_from(data_type, &mut list)?
            } else {
                statistic
            };
            chunk_metas.push(ChunkMeta {
                measurement_name: measurement_name.clone(),
                offset_of_chunk_header,
                data_type,
                mask,
                statistic: chunk_statistic,
            });
        }
        if chunk_metas.is_empty() || (!multi_chunk && chunk_metas.len() != 1) {
            return Err(TsFileError::Corrupted(format!(
                "timeseries {} lists {} chunks",
                measurement_name,
                chunk_metas.len()
            )));
        }

        Ok(Self {
            mask,
            measurement_name,
            data_type,
            statistic,
            chunk_metas,
        })
    }
}

/// Role of a [`MetaIndexNode`] in the index tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MetaIndexNodeType {
    /// Entries point at device-level child nodes.
    InternalDevice = 0,
    /// Entries point at the root of each device's measurement tree.
    LeafDevice = 1,
    /// Entries point at measurement-level child nodes.
    InternalMeasurement = 2,
    /// Entries point at timeseries index records.
    LeafMeasurement = 3,
}

impl MetaIndexNodeType {
    /// Creates a MetaIndexNodeType from a u8 value.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::InternalDevice),
            1 => Some(Self::LeafDevice),
            2 => Some(Self::InternalMeasurement),
            3 => Some(Self::LeafMeasurement),
            _ => None,
        }
    }

    /// Returns true for device-level nodes.
    pub fn is_device_level(self) -> bool {
        matches!(self, Self::InternalDevice | Self::LeafDevice)
    }
}

/// One `(name, offset)` entry of an index node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaIndexEntry {
    /// First name covered by the child.
    pub name: String,
    /// File offset of the child.
    pub offset: i64,
}

/// Bounded fan-out index node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaIndexNode {
    /// Entries sorted by name.
    pub children: Vec<MetaIndexEntry>,
    /// File offset just past the last child.
    pub end_offset: i64,
    /// Role of the node.
    pub node_type: MetaIndexNodeType,
}

impl MetaIndexNode {
    /// Creates an empty node.
    pub fn new(node_type: MetaIndexNodeType) -> Self {
        Self {
            children: Vec::new(),
            end_offset: 0,
            node_type,
        }
    }

    /// Appends an entry.
    pub fn add_entry(&mut self, name: impl Into<String>, offset: i64) {
        self.children.push(MetaIndexEntry {
            name: name.into(),
            offset,
        });
    }

    /// Returns true once the node holds `max_degree` entries.
    pub fn is_full(&self, max_degree: usize) -> bool {
        self.children.len() >= max_degree
    }

    /// Name of the first entry.
    pub fn first_name(&self) -> Option<&str> {
        self.children.first().map(|e| e.name.as_str())
    }

    /// Finds the child covering `name`.
    ///
    /// Returns the child's `[start, end)` byte range. With `exact` set, only
    /// an entry named exactly `name` matches; otherwise the last entry whose
    /// name is not greater than `name` is chosen.
    pub fn child_range(&self, name: &str, exact: bool) -> Option<(i64, i64)> {
        let index = match self
            .children
            .binary_search_by(|entry| entry.name.as_str().cmp(name))
        {
            Ok(index) => index,
            Err(_) if exact => return None,
            Err(0) => return None,
            Err(insert_at) => insert_at - 1,
        };
        let start = self.children[index].offset;
        let end = self
            .children
            .get(index + 1)
            .map_or(self.end_offset, |next| next.offset);
        Some((start, end))
    }

    /// Writes the node.
    pub fn serialize_to(&self, out: &mut PagedBuffer) -> Result<usize> {
        let start = out.total_size();
        out.write_var_u64(self.children.len() as u64)?;
        for entry in &self.children {
            out.write_str(&entry.name)?;
            out.write_i64(entry.offset)?;
        }
        out.write_i64(self.end_offset)?;
        out.write_u8(self.node_type as u8)?;
        Ok(out.total_size() - start)
    }

    /// Reads one node.
    pub fn deserialize_from(input: &mut PagedBuffer) -> Result<Self> {
        let count = input.read_var_u64()? as usize;
        // Each entry takes at least nine bytes.
        if count > input.remaining() / 9 {
            return Err(TsFileError::Corrupted(format!(
                "index node claims {} entries in {} bytes",
                count,
                input.remaining()
            )));
        }
        let mut children = Vec::with_capacity(count);
        for _ in 0..count {
            let name = input.read_str()?;
            let offset = input.read_i64()?;
            children.push(MetaIndexEntry { name, offset });
        }
        let end_offset = input.read_i64()?;
        let node_type = input.read_u8()?;
        let node_type = MetaIndexNodeType::from_u8(node_type).ok_or_else(|| {
            TsFileError::Corrupted(format!("unknown index node type {}", node_type))
        })?;
        Ok(Self {
            children,
            end_offset,
            node_type,
        })
    }
}

/// File-level metadata block at the tail of the file.
#[derive(Debug, Clone, PartialEq)]
pub struct TsFileMeta {
    /// Root of the device-level index tree.
    pub meta_index: MetaIndexNode,
    /// Offset of the separator marker that starts the index section.
    pub meta_offset: i64,
    /// Filter over every `device.measurement` path.
    pub bloom_filter: BloomFilter,
}

impl TsFileMeta {
    /// Writes the root node, the meta offset, and the Bloom filter.
    pub fn serialize_to(&self, out: &mut PagedBuffer) -> Result<usize> {
        let start = out.total_size();
        self.meta_index.serialize_to(out)?;
        out.write_i64(self.meta_offset)?;
        self.bloom_filter.serialize_to(out)?;
        Ok(out.total_size() - start)
    }

    /// Reads the block.
    pub fn deserialize_from(input: &mut PagedBuffer) -> Result<Self> {
        let meta_index = MetaIndexNode::deserialize_from(input)?;
        let meta_offset = input.read_i64()?;
        let bloom_filter = BloomFilter::deserialize_from(input)?;
        Ok(Self {
            meta_index,
            meta_offset,
            bloom_filter,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::Value;

    fn int_stat(points: &[(i64, i32)]) -> Statistic {
        let mut stat = Statistic::new(DataType::Int32);
        for &(t, v) in points {
            stat.update(t, Value::Int32(v)).unwrap();
        }
        stat
    }

    #[test]
    fn test_chunk_header_roundtrip() {
        let header = ChunkHeader {
            chunk_type: ONLY_ONE_PAGE_CHUNK_HEADER_MARKER | VALUE_COLUMN_MASK,
            measurement_name: "s1".to_string(),
            data_size: 300,
            data_type: DataType::Float,
            compression: CompressionType::Snappy,
            encoding: Encoding::Gorilla,
            num_of_pages: 0,
        };
        let mut buf = PagedBuffer::new(8);
        header.serialize_to(&mut buf).unwrap();

        let marker = buf.read_u8().unwrap();
        let decoded = ChunkHeader::deserialize_after_marker(marker, &mut buf).unwrap();
        assert_eq!(decoded, header);
        assert!(decoded.is_single_page());
        assert_eq!(decoded.column_mask(), VALUE_COLUMN_MASK);
    }

    #[test]
    fn test_bad_chunk_marker() {
        let mut buf = PagedBuffer::wrap(vec![0u8; 8]);
        assert!(matches!(
            ChunkHeader::deserialize_after_marker(7, &mut buf),
            Err(TsFileError::Corrupted(_))
        ));
    }

    #[test]
    fn test_timeseries_index_single_chunk_omits_chunk_statistic() {
        let stat = int_stat(&[(1, 5), (2, 6)]);
        let index = TimeseriesIndex::from_chunk_metas(vec![ChunkMeta {
            measurement_name: "s1".to_string(),
            offset_of_chunk_header: 42,
            data_type: DataType::Int32,
            mask: 0,
            statistic: stat,
        }])
        .unwrap();

        let mut buf = PagedBuffer::new(16);
        index.serialize_to(&mut buf).unwrap();
        let bytes = buf.to_vec();
        assert_eq!(bytes[0], 0);

        let decoded = TimeseriesIndex::deserialize_from(&mut buf).unwrap();
        assert_eq!(decoded, index);
    }

    #[test]
    fn test_timeseries_index_multi_chunk() {
        let metas: Vec<ChunkMeta> = [(10, int_stat(&[(1, 1)])), (90, int_stat(&[(5, 9)]))]
            .into_iter()
            .map(|(offset, statistic)| ChunkMeta {
                measurement_name: "s2".to_string(),
                offset_of_chunk_header: offset,
                data_type: DataType::Int32,
                mask: VALUE_COLUMN_MASK,
                statistic,
            })
            .collect();
        let index = TimeseriesIndex::from_chunk_metas(metas).unwrap();
        assert_eq!(index.statistic.count(), 2);
        assert_eq!(index.statistic.start_time(), 1);
        assert_eq!(index.statistic.end_time(), 5);

        let mut buf = PagedBuffer::new(16);
        index.serialize_to(&mut buf).unwrap();
        assert_eq!(buf.to_vec()[0], 1 | VALUE_COLUMN_MASK);
        assert_eq!(TimeseriesIndex::deserialize_from(&mut buf).unwrap(), index);
    }

    #[test]
    fn test_meta_index_node_lookup() {
        let mut node = MetaIndexNode::new(MetaIndexNodeType::LeafMeasurement);
        node.add_entry("s1", 100);
        node.add_entry("s3", 200);
        node.end_offset = 300;

        assert_eq!(node.child_range("s1", true), Some((100, 200)));
        assert_eq!(node.child_range("s3", true), Some((200, 300)));
        assert_eq!(node.child_range("s2", true), None);
        assert_eq!(node.child_range("s2", false), Some((100, 200)));
        assert_eq!(node.child_range("a", false), None);
        assert!(node.is_full(2));

        let mut buf = PagedBuffer::new(16);
        node.serialize_to(&mut buf).unwrap();
        assert_eq!(MetaIndexNode::deserialize_from(&mut buf).unwrap(), node);
    }

    #[test]
    fn test_tsfile_meta_roundtrip() {
        let mut root = MetaIndexNode::new(MetaIndexNodeType::LeafDevice);
        root.add_entry("d1", 1000);
        root.end_offset = 1100;
        let mut bloom_filter = BloomFilter::new(1, 0.05);
        bloom_filter.add_path("d1", "s1");

        let meta = TsFileMeta {
            meta_index: root,
            meta_offset: 900,
            bloom_filter,
        };
        let mut buf = PagedBuffer::new(64);
        let n = meta.serialize_to(&mut buf).unwrap();
        assert_eq!(n, buf.total_size());
        assert_eq!(TsFileMeta::deserialize_from(&mut buf).unwrap(), meta);
    }
}
