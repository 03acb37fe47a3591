//! Writer configuration.

use crate::buffer::DEFAULT_PAGE_SIZE;
use crate::error::{Result, TsFileError};
use crate::file::{CompressionType, DataType, Encoding};

/// Default maximum number of points in one page.
pub const DEFAULT_PAGE_MAX_POINT_NUM: usize = 10_000;

/// Default maximum estimated encoded size of one page: 64 KB.
pub const DEFAULT_PAGE_MAX_MEMORY_BYTES: usize = 64 * 1024;

/// Default fan-out of index nodes.
pub const DEFAULT_MAX_DEGREE_OF_INDEX_NODE: usize = 256;

/// Default buffered chunk-group size that triggers an automatic flush: 128 MB.
pub const DEFAULT_CHUNK_GROUP_SIZE_THRESHOLD: usize = 128 * 1024 * 1024;

/// Default Bloom filter false-positive rate.
pub const DEFAULT_BLOOM_FILTER_ERROR_RATE: f64 = 0.05;

/// Configuration for [`TsFileWriter`](crate::TsFileWriter) and the writers it
/// drives.
#[derive(Debug, Clone, PartialEq)]
pub struct TsFileConfig {
    /// Point count at which a page is sealed.
    ///
    /// Default: 10000.
    pub page_writer_max_point_num: usize,

    /// Estimated encoded page size at which a page is sealed.
    ///
    /// Default: 64 KB.
    pub page_writer_max_memory_bytes: usize,

    /// Maximum number of entries in one index node.
    ///
    /// Default: 256.
    pub max_degree_of_index_node: usize,

    /// Buffered chunk-group bytes at which the writer flushes on its own.
    ///
    /// Default: 128 MB.
    pub chunk_group_size_threshold: usize,

    /// Target false-positive rate of the file Bloom filter.
    ///
    /// Clamped to `[0.01, 0.1]` when the filter is sized. Default: 0.05.
    pub bloom_filter_error_rate: f64,

    /// Encoding of time columns. Default: GORILLA.
    pub time_encoding: Encoding,

    /// Compression of time columns in aligned devices. Default: LZ4.
    pub time_compression: CompressionType,

    /// Page size of the paged buffers backing every writer. Default: 1 KB.
    pub page_size: usize,
}

impl Default for TsFileConfig {
    fn default() -> Self {
        Self {
            page_writer_max_point_num: DEFAULT_PAGE_MAX_POINT_NUM,
            page_writer_max_memory_bytes: DEFAULT_PAGE_MAX_MEMORY_BYTES,
            max_degree_of_index_node: DEFAULT_MAX_DEGREE_OF_INDEX_NODE,
            chunk_group_size_threshold: DEFAULT_CHUNK_GROUP_SIZE_THRESHOLD,
            bloom_filter_error_rate: DEFAULT_BLOOM_FILTER_ERROR_RATE,
            time_encoding: Encoding::Gorilla,
            time_compression: CompressionType::default(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl TsFileConfig {
    /// Sets the page point limit.
    pub fn with_page_max_point_num(mut self, points: usize) -> Self {
        self.page_writer_max_point_num = points;
        self
    }

    /// Sets the page size limit in bytes.
    pub fn with_page_max_memory_bytes(mut self, bytes: usize) -> Self {
        self.page_writer_max_memory_bytes = bytes;
        self
    }

    /// Sets the index node fan-out.
    pub fn with_max_degree_of_index_node(mut self, degree: usize) -> Self {
        self.max_degree_of_index_node = degree;
        self
    }

    /// Sets the automatic flush threshold.
    pub fn with_chunk_group_size_threshold(mut self, bytes: usize) -> Self {
        self.chunk_group_size_threshold = bytes;
        self
    }

    /// Sets the Bloom filter false-positive rate.
    pub fn with_bloom_filter_error_rate(mut self, rate: f64) -> Self {
        self.bloom_filter_error_rate = rate;
        self
    }

    /// Sets the time column encoding.
    pub fn with_time_encoding(mut self, encoding: Encoding) -> Self {
        self.time_encoding = encoding;
        self
    }

    /// Sets the time column compression.
    pub fn with_time_compression(mut self, compression: CompressionType) -> Self {
        self.time_compression = compression;
        self
    }

    /// Sets the buffer page size.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Checks that every limit is usable.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArg` for zero limits, a fan-out below 2, an error rate
    /// outside `(0, 1)`, or a time encoding that cannot carry INT64.
    pub fn validate(&self) -> Result<()> {
        if self.page_writer_max_point_num == 0 {
            return Err(TsFileError::InvalidArg(
                "page_writer_max_point_num must be positive".to_string(),
            ));
        }
        if self.page_writer_max_memory_bytes == 0 {
            return Err(TsFileError::InvalidArg(
                "page_writer_max_memory_bytes must be positive".to_string(),
            ));
        }
        if self.max_degree_of_index_node < 2 {
            return Err(TsFileError::InvalidArg(format!(
                "max_degree_of_index_node must be at least 2, got {}",
                self.max_degree_of_index_node
            )));
        }
        if self.chunk_group_size_threshold == 0 {
            return Err(TsFileError::InvalidArg(
                "chunk_group_size_threshold must be positive".to_string(),
            ));
        }
        if !(self.bloom_filter_error_rate > 0.0 && self.bloom_filter_error_rate < 1.0) {
            return Err(TsFileError::InvalidArg(format!(
                "bloom_filter_error_rate must be in (0, 1), got {}",
                self.bloom_filter_error_rate
            )));
        }
        if !self.time_encoding.supports(DataType::Int64) {
            return Err(TsFileError::InvalidArg(format!(
                "time encoding {:?} cannot encode timestamps",
                self.time_encoding
            )));
        }
        if self.page_size == 0 {
            return Err(TsFileError::InvalidArg(
                "page_size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
