//! Paged byte buffers.
//!
//! Every serialization path in the crate writes through a [`PagedBuffer`]: an
//! append-only byte buffer that grows by allocating fixed-size pages instead
//! of reallocating one large array. Pages live in a vector and are linked by
//! index, so iterators and cursors never hold pointers into freed memory.
//!
//! ```text
//! pages: [0] -> [1] -> [2] -> None
//!         full   full   partial (tail)
//!        ^ purged pages become `None` slots, indices stay stable
//! ```
//!
//! The buffer keeps a read cursor for sequential decoding, a mark for
//! measuring the size of a sub-serialization, and can alternatively *wrap*
//! an externally owned byte array for zero-copy reads.
//!
//! For the single-producer/single-consumer streaming mode see [`stream`].

pub mod arena;
mod primitives;
pub mod stream;

pub use arena::{Arena, Handle, Span};
pub use primitives::{encode_var_u64, var_u64_len, VARINT_FORCED_STOP};
pub use stream::{stream_buffer, Consumer, Producer};

use crate::error::{Result, TsFileError};
use bytes::Bytes;

/// Default page size for paged buffers (1 KiB).
pub const DEFAULT_PAGE_SIZE: usize = 1024;

#[derive(Debug)]
struct Page {
    data: Vec<u8>,
    next: Option<usize>,
}

impl Page {
    fn allocate(capacity: usize) -> Result<Self> {
        let mut data = Vec::new();
        data.try_reserve_exact(capacity)
            .map_err(|_| TsFileError::OutOfMemory(capacity))?;
        Ok(Self { data, next: None })
    }
}

#[derive(Debug)]
enum Storage {
    Paged {
        pages: Vec<Option<Page>>,
        head: Option<usize>,
        tail: Option<usize>,
    },
    Wrapped(Bytes),
}

/// Auto-growing, page-linked byte buffer.
#[derive(Debug)]
pub struct PagedBuffer {
    page_size: usize,
    storage: Storage,
    total_size: usize,
    read_pos: usize,
    mark: usize,
}

impl Default for PagedBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE)
    }
}

impl PagedBuffer {
    /// Creates an empty buffer that allocates pages of `page_size` bytes.
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
            storage: Storage::Paged {
                pages: Vec::new(),
                head: None,
                tail: None,
            },
            total_size: 0,
            read_pos: 0,
            mark: 0,
        }
    }

    /// Wraps an externally owned byte array for zero-copy reads.
    ///
    /// The buffer never frees or mutates the wrapped memory; writes are
    /// rejected with `InvalidArg`.
    pub fn wrap(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Self {
            page_size: data.len().max(1),
            total_size: data.len(),
            storage: Storage::Wrapped(data),
            read_pos: 0,
            mark: 0,
        }
    }

    /// Returns true if this buffer wraps external memory.
    pub fn is_wrapped(&self) -> bool {
        matches!(self.storage, Storage::Wrapped(_))
    }

    /// Page size in bytes.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Number of committed bytes.
    pub fn total_size(&self) -> usize {
        self.total_size
    }

    /// Returns true if nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.total_size == 0
    }

    /// Current read cursor position.
    pub fn read_pos(&self) -> usize {
        self.read_pos
    }

    /// Bytes between the read cursor and the end of committed data.
    pub fn remaining(&self) -> usize {
        self.total_size - self.read_pos
    }

    /// Number of live (non-purged) pages.
    pub fn page_count(&self) -> usize {
        match &self.storage {
            Storage::Paged { pages, .. } => pages.iter().filter(|p| p.is_some()).count(),
            Storage::Wrapped(_) => 1,
        }
    }

    /// Appends `bytes`, allocating new pages on demand.
    ///
    /// # Errors
    ///
    /// Returns `OutOfMemory` if a page cannot be allocated, or `InvalidArg`
    /// for a wrapped buffer.
    pub fn write(&mut self, mut bytes: &[u8]) -> Result<()> {
        let page_size = self.page_size;
        let Storage::Paged { pages, head, tail } = &mut self.storage else {
            return Err(TsFileError::InvalidArg(
                "cannot write into a wrapped buffer".to_string(),
            ));
        };

        while !bytes.is_empty() {
            let need_page = match tail.and_then(|t| pages[t].as_ref()) {
                Some(page) => page.data.len() == page_size,
                None => true,
            };
            if need_page {
                let index = pages.len();
                pages.push(Some(Page::allocate(page_size)?));
                if let Some(prev) = tail.and_then(|t| pages[t].as_mut()) {
                    prev.next = Some(index);
                }
                if head.is_none() {
                    *head = Some(index);
                }
                *tail = Some(index);
            }

            let Some(page) = tail.and_then(|t| pages[t].as_mut()) else {
                break;
            };
            let room = page_size - page.data.len();
            let n = room.min(bytes.len());
            page.data.extend_from_slice(&bytes[..n]);
            self.total_size += n;
            bytes = &bytes[n..];
        }

        Ok(())
    }

    /// Copies up to `out.len()` bytes from the read cursor into `out`.
    ///
    /// Returns the number of bytes copied when the full request was
    /// satisfied. If fewer bytes remain, the available bytes are copied, the
    /// cursor advances past them, and `PartialRead` reports how many were
    /// read. Reading with nothing left yields `OutOfRange`.
    pub fn read(&mut self, out: &mut [u8]) -> Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        let available = self.remaining();
        if available == 0 {
            return Err(TsFileError::OutOfRange {
                offset: self.read_pos as u64,
                size: self.total_size as u64,
            });
        }

        let n = available.min(out.len());
        self.copy_at(self.read_pos, &mut out[..n]);
        self.read_pos += n;

        if n < out.len() {
            return Err(TsFileError::PartialRead {
                requested: out.len(),
                read: n,
            });
        }
        Ok(n)
    }

    /// Fills `out` completely or fails without moving the cursor.
    ///
    /// # Errors
    ///
    /// Returns `BufferNotEnough` if fewer than `out.len()` bytes remain.
    pub fn read_exact(&mut self, out: &mut [u8]) -> Result<()> {
        let available = self.remaining();
        if available < out.len() {
            return Err(TsFileError::BufferNotEnough {
                needed: out.len(),
                available,
            });
        }
        self.copy_at(self.read_pos, out);
        self.read_pos += out.len();
        Ok(())
    }

    /// Reads `len` bytes into a new vector.
    pub fn read_vec(&mut self, len: usize) -> Result<Vec<u8>> {
        let available = self.remaining();
        if available < len {
            return Err(TsFileError::BufferNotEnough {
                needed: len,
                available,
            });
        }
        let mut out = vec![0u8; len];
        self.read_exact(&mut out)?;
        Ok(out)
    }

    /// Advances the read cursor by `len` bytes.
    pub fn skip(&mut self, len: usize) -> Result<()> {
        let available = self.remaining();
        if available < len {
            return Err(TsFileError::BufferNotEnough {
                needed: len,
                available,
            });
        }
        self.read_pos += len;
        Ok(())
    }

    /// Records the current write position.
    pub fn mark(&mut self) {
        self.mark = self.total_size;
    }

    /// Bytes written since the last [`mark`](Self::mark).
    pub fn marked_len(&self) -> usize {
        self.total_size - self.mark
    }

    /// Iterates over the live byte range of every backing page, in order.
    pub fn iter(&self) -> BufferIterator<'_> {
        match &self.storage {
            Storage::Paged { pages, head, .. } => BufferIterator {
                inner: IterInner::Paged { pages, next: *head },
            },
            Storage::Wrapped(data) => BufferIterator {
                inner: IterInner::Wrapped(Some(data)),
            },
        }
    }

    /// Copies all live bytes into a contiguous vector.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.total_size);
        for chunk in self.iter() {
            out.extend_from_slice(chunk);
        }
        out
    }

    /// Frees up to `n` leading pages whose bytes have all been read.
    ///
    /// Pages holding unread bytes are never released. Returns the number of
    /// pages freed.
    pub fn purge_prev_pages(&mut self, n: usize) -> usize {
        let page_size = self.page_size;
        let read_pos = self.read_pos;
        let Storage::Paged { pages, head, tail } = &mut self.storage else {
            return 0;
        };

        let mut purged = 0;
        while purged < n {
            let Some(index) = *head else { break };
            let page_end = (index + 1) * page_size;
            // The tail page may still receive bytes, so keep it.
            if page_end > read_pos || Some(index) == *tail {
                break;
            }
            let next = pages[index].take().and_then(|page| page.next);
            *head = next;
            purged += 1;
        }
        purged
    }

    /// Drops every page and clears all cursors.
    pub fn reset(&mut self) {
        if let Storage::Paged { pages, head, tail } = &mut self.storage {
            pages.clear();
            *head = None;
            *tail = None;
            self.total_size = 0;
        }
        self.read_pos = 0;
        self.mark = 0;
    }

    fn copy_at(&self, offset: usize, out: &mut [u8]) {
        match &self.storage {
            Storage::Wrapped(data) => {
                out.copy_from_slice(&data[offset..offset + out.len()]);
            }
            Storage::Paged { pages, .. } => {
                let mut copied = 0;
                while copied < out.len() {
                    let pos = offset + copied;
                    let index = pos / self.page_size;
                    let in_page = pos % self.page_size;
                    let Some(page) = pages.get(index).and_then(Option::as_ref) else {
                        // Purged pages are only ever behind the cursor.
                        break;
                    };
                    let n = (page.data.len() - in_page).min(out.len() - copied);
                    out[copied..copied + n].copy_from_slice(&page.data[in_page..in_page + n]);
                    copied += n;
                }
            }
        }
    }
}

/// Iterator over the live byte ranges of a [`PagedBuffer`].
pub struct BufferIterator<'a> {
    inner: IterInner<'a>,
}

enum IterInner<'a> {
    Paged {
        pages: &'a [Option<Page>],
        next: Option<usize>,
    },
    Wrapped(Option<&'a Bytes>),
}

impl<'a> Iterator for BufferIterator<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.inner {
            IterInner::Paged { pages, next } => {
                let page = pages.get((*next)?)?.as_ref()?;
                *next = page.next;
                Some(page.data.as_slice())
            }
            IterInner::Wrapped(data) => data.take().map(|b| &b[..]),
        }
    }
}
