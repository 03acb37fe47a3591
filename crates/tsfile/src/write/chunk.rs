//! Chunk writers.
//!
//! A chunk holds back its first sealed page. If the chunk ends with that
//! page alone, the page is written without its statistic and the chunk uses
//! `ONLY_ONE_PAGE_CHUNK_HEADER_MARKER`. When a second page seals, the held
//! page is written with its statistic, followed by the new one, and the
//! chunk uses `CHUNK_HEADER_MARKER`.
//!
//! ```text
//! Empty --seal--> OneBufferedPage --seal--> MultiPage --seal--> MultiPage
//! ```

use super::page::{PageLimits, PageWriter, SealedPage};
use crate::buffer::PagedBuffer;
use crate::config::TsFileConfig;
use crate::error::{Result, TsFileError};
use crate::file::{
    ChunkHeader, CompressionType, DataType, Encoding, MeasurementSchema, Value,
    CHUNK_HEADER_MARKER, ONLY_ONE_PAGE_CHUNK_HEADER_MARKER,
};
use crate::statistic::Statistic;
use tracing::debug;

/// Page placement state of a chunk.
#[derive(Debug, Default)]
pub enum ChunkState {
    /// No page sealed yet.
    #[default]
    Empty,
    /// Exactly one sealed page, not yet written.
    OneBufferedPage(SealedPage),
    /// Two or more pages written, each with its statistic.
    MultiPage,
}

/// A finished chunk: header plus page bytes.
#[derive(Debug)]
pub struct EncodedChunk {
    /// Chunk header with `data_size` and page count filled in.
    pub header: ChunkHeader,
    /// Page headers and page payloads.
    pub pages: PagedBuffer,
    /// Merge of every page statistic.
    pub statistic: Statistic,
}

/// Chunk identity written into the header.
#[derive(Debug, Clone)]
pub struct ChunkIdentity {
    /// Measurement name.
    pub measurement_name: String,
    /// Data type.
    pub data_type: DataType,
    /// Encoding.
    pub encoding: Encoding,
    /// Compression.
    pub compression: CompressionType,
    /// Column bits added to the marker.
    pub mask: u8,
}

/// Page placement shared by plain, time, and value chunk writers.
pub struct ChunkPages {
    identity: ChunkIdentity,
    page_size: usize,
    state: ChunkState,
    data: PagedBuffer,
    statistic: Statistic,
    num_pages: usize,
}

impl ChunkPages {
    /// Creates an empty chunk.
    pub fn new(identity: ChunkIdentity, page_size: usize) -> Self {
        let statistic = Statistic::new(identity.data_type);
        Self {
            identity,
            page_size,
            state: ChunkState::Empty,
            data: PagedBuffer::new(page_size),
            statistic,
            num_pages: 0,
        }
    }

    /// Current placement state.
    pub fn state(&self) -> &ChunkState {
        &self.state
    }

    /// Number of sealed pages.
    pub fn num_pages(&self) -> usize {
        self.num_pages
    }

    /// Statistic over every sealed page.
    pub fn statistic(&self) -> &Statistic {
        &self.statistic
    }

    /// Bytes held by sealed pages, written or buffered.
    pub fn estimated_size(&self) -> usize {
        let buffered = match &self.state {
            ChunkState::OneBufferedPage(page) => page.data.len() + 16,
            _ => 0,
        };
        self.data.total_size() + buffered
    }

    /// Places a sealed page.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` without placing anything if the page statistic
    /// is of another kind.
    pub fn add_page(&mut self, page: SealedPage) -> Result<()> {
        if page.statistic.data_type() != self.statistic.data_type() {
            return Err(TsFileError::TypeMismatch {
                expected: self.statistic.data_type(),
                actual: page.statistic.data_type(),
            });
        }
        let statistic = page.statistic;
        self.state = match std::mem::take(&mut self.state) {
            ChunkState::Empty => ChunkState::OneBufferedPage(page),
            ChunkState::OneBufferedPage(first) => {
                first.write_to(&mut self.data, true)?;
                page.write_to(&mut self.data, true)?;
                ChunkState::MultiPage
            }
            ChunkState::MultiPage => {
                page.write_to(&mut self.data, true)?;
                ChunkState::MultiPage
            }
        };
        // Counted only once its bytes are placed.
        self.statistic.merge_with(&statistic)?;
        self.num_pages += 1;
        Ok(())
    }

    /// Closes the chunk and returns it, or `None` if no page was sealed.
    /// The writer is reset for the next chunk.
    pub fn finish(&mut self) -> Result<Option<EncodedChunk>> {
        let marker = match std::mem::take(&mut self.state) {
            ChunkState::Empty => return Ok(None),
            ChunkState::OneBufferedPage(page) => {
                page.write_to(&mut self.data, false)?;
                ONLY_ONE_PAGE_CHUNK_HEADER_MARKER
            }
            ChunkState::MultiPage => CHUNK_HEADER_MARKER,
        };

        let pages = std::mem::replace(&mut self.data, PagedBuffer::new(self.page_size));
        let statistic = self.statistic;
        self.statistic.reset();
        let num_of_pages = std::mem::take(&mut self.num_pages);

        let header = ChunkHeader {
            chunk_type: marker | self.identity.mask,
            measurement_name: self.identity.measurement_name.clone(),
            data_size: pages.total_size(),
            data_type: self.identity.data_type,
            compression: self.identity.compression,
            encoding: self.identity.encoding,
            num_of_pages,
        };
        debug!(
            measurement = %header.measurement_name,
            pages = num_of_pages,
            points = statistic.count(),
            bytes = header.data_size,
            "chunk finished"
        );
        Ok(Some(EncodedChunk {
            header,
            pages,
            statistic,
        }))
    }
}

/// Writes one non-aligned series into chunks.
pub struct ChunkWriter {
    schema: MeasurementSchema,
    limits: PageLimits,
    page_writer: PageWriter,
    pages: ChunkPages,
}

impl ChunkWriter {
    /// Creates a writer for `schema`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArg` if the schema is invalid.
    pub fn new(schema: MeasurementSchema, config: &TsFileConfig) -> Result<Self> {
        schema.validate()?;
        let identity = ChunkIdentity {
            measurement_name: schema.name.clone(),
            data_type: schema.data_type,
            encoding: schema.encoding,
            compression: schema.compression,
            mask: 0,
        };
        Ok(Self {
            page_writer: PageWriter::new(&schema, config)?,
            pages: ChunkPages::new(identity, config.page_size),
            limits: PageLimits::from_config(config),
            schema,
        })
    }

    /// Schema of the series.
    pub fn schema(&self) -> &MeasurementSchema {
        &self.schema
    }

    /// Appends one point, sealing the page when a limit is reached.
    pub fn write(&mut self, time: i64, value: Value) -> Result<()> {
        self.page_writer.write(time, value)?;
        if self
            .limits
            .reached(self.page_writer.point_count(), self.page_writer.estimated_size())
        {
            self.seal_current_page()?;
        }
        Ok(())
    }

    /// Seals the open page if it holds any point.
    pub fn seal_current_page(&mut self) -> Result<()> {
        if self.page_writer.point_count() == 0 {
            return Ok(());
        }
        let page = self.page_writer.seal()?;
        debug!(
            measurement = %self.schema.name,
            points = page.statistic.count(),
            bytes = page.data.len(),
            "page sealed"
        );
        self.pages.add_page(page)
    }

    /// Returns true if nothing was written since the last chunk ended.
    pub fn is_empty(&self) -> bool {
        self.page_writer.point_count() == 0 && self.pages.num_pages() == 0
    }

    /// Buffered bytes of the chunk, sealed pages and the open page.
    pub fn estimated_size(&self) -> usize {
        self.pages.estimated_size() + self.page_writer.estimated_size()
    }

    /// Page placement state.
    pub fn state(&self) -> &ChunkState {
        self.pages.state()
    }

    /// Seals the open page and finishes the chunk.
    pub fn end_encode_chunk(&mut self) -> Result<Option<EncodedChunk>> {
        self.seal_current_page()?;
        self.pages.finish()
    }
}
