//! Lock-free single-producer/single-consumer paged stream.
//!
//! [`stream_buffer`] splits a paged buffer into a [`Producer`] that appends
//! bytes and a [`Consumer`] that drains them, possibly on another thread.
//! Neither side takes a lock:
//!
//! - the producer fills the tail page, links a fresh page through a
//!   set-once `next` slot when the tail is full, bumps the shared tail index,
//!   and finally publishes the new `total_size` with `Release` ordering;
//! - the consumer snapshots `(tail, total_size)`, retrying until the tail
//!   index is unchanged across the size load, then reads only bytes below the
//!   snapshot size.
//!
//! Pages are never unlinked while either side is alive. Pages behind the
//! consumer are released as soon as the consumer steps past them, which is
//! the streaming equivalent of `purge_prev_pages`.

use crate::error::{Result, TsFileError};
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

struct StreamPage {
    index: usize,
    // Bytes are stored `Relaxed` and become visible through the `Release`
    // store of `total_size`.
    data: Box<[AtomicU8]>,
    next: OnceLock<Arc<StreamPage>>,
}

impl StreamPage {
    fn allocate(index: usize, capacity: usize) -> Result<Arc<Self>> {
        let mut data: Vec<AtomicU8> = Vec::new();
        data.try_reserve_exact(capacity)
            .map_err(|_| TsFileError::OutOfMemory(capacity))?;
        data.extend((0..capacity).map(|_| AtomicU8::new(0)));
        Ok(Arc::new(Self {
            index,
            data: data.into_boxed_slice(),
            next: OnceLock::new(),
        }))
    }

    fn write_at(&self, offset: usize, bytes: &[u8]) {
        for (slot, &b) in self.data[offset..offset + bytes.len()].iter().zip(bytes) {
            slot.store(b, Ordering::Relaxed);
        }
    }

    fn read_into(&self, start: usize, end: usize, out: &mut Vec<u8>) {
        out.extend(self.data[start..end].iter().map(|b| b.load(Ordering::Relaxed)));
    }
}

impl Drop for StreamPage {
    fn drop(&mut self) {
        // Unlink iteratively so a long chain cannot overflow the stack.
        let mut next = self.next.take();
        while let Some(page) = next {
            match Arc::try_unwrap(page) {
                Ok(mut page) => next = page.next.take(),
                Err(_) => break,
            }
        }
    }
}

struct Shared {
    page_size: usize,
    tail_index: AtomicUsize,
    total_size: AtomicUsize,
}

/// Creates a connected producer/consumer pair over fresh pages of
/// `page_size` bytes.
///
/// # Errors
///
/// Returns `OutOfMemory` if the first page cannot be allocated.
pub fn stream_buffer(page_size: usize) -> Result<(Producer, Consumer)> {
    let page_size = page_size.max(1);
    let first = StreamPage::allocate(0, page_size)?;
    let shared = Arc::new(Shared {
        page_size,
        tail_index: AtomicUsize::new(0),
        total_size: AtomicUsize::new(0),
    });

    let producer = Producer {
        shared: Arc::clone(&shared),
        tail: Arc::clone(&first),
        written: 0,
    };
    let consumer = Consumer {
        shared,
        page: first,
        read_pos: 0,
    };
    Ok((producer, consumer))
}

/// Writing half of a stream buffer.
pub struct Producer {
    shared: Arc<Shared>,
    tail: Arc<StreamPage>,
    written: usize,
}

impl Producer {
    /// Appends `bytes` and publishes them to the consumer.
    ///
    /// # Errors
    ///
    /// Returns `OutOfMemory` if a page allocation fails. Bytes copied before
    /// the failure are published.
    pub fn write(&mut self, mut bytes: &[u8]) -> Result<()> {
        let page_size = self.shared.page_size;
        let result = loop {
            if bytes.is_empty() {
                break Ok(());
            }
            let in_page = self.written - self.tail.index * page_size;
            if in_page == page_size {
                let page = match StreamPage::allocate(self.tail.index + 1, page_size) {
                    Ok(page) => page,
                    Err(e) => break Err(e),
                };
                // Only the producer links pages, so the slot is always empty.
                let _ = self.tail.next.set(Arc::clone(&page));
                self.shared.tail_index.store(page.index, Ordering::Release);
                self.tail = page;
                continue;
            }

            let n = (page_size - in_page).min(bytes.len());
            self.tail.write_at(in_page, &bytes[..n]);
            self.written += n;
            bytes = &bytes[n..];
        };

        self.shared.total_size.store(self.written, Ordering::Release);
        result
    }

    /// Total bytes written so far.
    pub fn total_size(&self) -> usize {
        self.written
    }
}

/// Reading half of a stream buffer.
pub struct Consumer {
    shared: Arc<Shared>,
    page: Arc<StreamPage>,
    read_pos: usize,
}

impl Consumer {
    /// Takes a consistent `(tail page index, total size)` snapshot.
    ///
    /// The producer may advance between the two loads; the snapshot is only
    /// accepted once the tail index is observed unchanged around the size.
    pub fn snapshot(&self) -> (usize, usize) {
        loop {
            let tail = self.shared.tail_index.load(Ordering::Acquire);
            let size = self.shared.total_size.load(Ordering::Acquire);
            if self.shared.tail_index.load(Ordering::Acquire) == tail {
                return (tail, size);
            }
            std::hint::spin_loop();
        }
    }

    /// Bytes consumed so far.
    pub fn read_pos(&self) -> usize {
        self.read_pos
    }

    /// Copies every committed, unread byte into `out` and returns how many
    /// were appended.
    pub fn read_available(&mut self, out: &mut Vec<u8>) -> usize {
        let (_, size) = self.snapshot();
        let page_size = self.shared.page_size;
        let start = self.read_pos;

        while self.read_pos < size {
            let page_start = self.page.index * page_size;
            let in_page = self.read_pos - page_start;
            if in_page == page_size {
                let Some(next) = self.page.next.get().cloned() else {
                    break;
                };
                // Dropping the old Arc releases the consumed page.
                self.page = next;
                continue;
            }
            let end = (size - page_start).min(page_size);
            // Only bytes below the snapshot size are read.
            self.page.read_into(in_page, end, out);
            self.read_pos += end - in_page;
        }

        self.read_pos - start
    }
}
