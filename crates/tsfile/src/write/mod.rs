//! Write pipeline: page writers, chunk writers, and the file writer.
//!
//! ```text
//! TsFileWriter ─┬─ ChunkWriter ── PageWriter            (per series)
//!               └─ AlignedWriter ─┬─ TimePageWriter     (per aligned device)
//!                                 └─ ValuePageWriter    (per measurement)
//!                       │
//!                       ▼
//!               TsFileIoWriter (chunk groups, index, footer)
//! ```

pub mod aligned;
pub mod chunk;
pub mod page;
pub mod tsfile_writer;

pub use aligned::{AlignedWriter, TimePageWriter, ValuePageWriter, TIME_COLUMN_NAME};
pub use chunk::{ChunkIdentity, ChunkPages, ChunkState, ChunkWriter, EncodedChunk};
pub use page::{PageLimits, PageWriter, SealedPage};
pub use tsfile_writer::TsFileWriter;
