//! Page-backed bump arena with typed handles.
//!
//! Metadata objects built during a flush (chunk metas, index nodes) are
//! allocated here instead of individually on the heap. Allocation bumps into
//! the current page; `reset()` drops whole pages at once.
//!
//! Handles carry the arena epoch, so a handle that outlives a `reset()`
//! resolves to `None` instead of aliasing a newer object.

use crate::error::{Result, TsFileError};
use std::fmt;
use std::marker::PhantomData;

/// Default number of slots per arena page.
pub const DEFAULT_ARENA_PAGE_SLOTS: usize = 256;

/// Typed reference to one object in an [`Arena`].
pub struct Handle<T> {
    epoch: u32,
    page: u32,
    slot: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.epoch == other.epoch && self.page == other.page && self.slot == other.slot
    }
}

impl<T> Eq for Handle<T> {}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({}:{}:{})", self.epoch, self.page, self.slot)
    }
}

/// Typed reference to a contiguous run of objects in an [`Arena`].
pub struct Span<T> {
    epoch: u32,
    page: u32,
    start: u32,
    len: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Span<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Span<T> {}

impl<T> Span<T> {
    /// Number of objects in the run.
    pub fn len(&self) -> usize {
        self.len as usize
    }

    /// Returns true for an empty run.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl<T> fmt::Debug for Span<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Span({}:{}:{}+{})",
            self.epoch, self.page, self.start, self.len
        )
    }
}

/// Bump allocator over fixed-size pages.
///
/// Not thread-safe; one arena serves one single-threaded build phase.
pub struct Arena<T> {
    page_slots: usize,
    pages: Vec<Vec<T>>,
    epoch: u32,
    allocated: usize,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new(DEFAULT_ARENA_PAGE_SLOTS)
    }
}

impl<T> Arena<T> {
    /// Creates an arena whose pages hold `page_slots` objects.
    pub fn new(page_slots: usize) -> Self {
        Self {
            page_slots: page_slots.max(1),
            pages: Vec::new(),
            epoch: 0,
            allocated: 0,
        }
    }

    fn page_with_room(&mut self, needed: usize) -> Result<usize> {
        if let Some(last) = self.pages.last() {
            if last.capacity() - last.len() >= needed {
                return Ok(self.pages.len() - 1);
            }
        }

        let slots = self.page_slots.max(needed);
        let mut page = Vec::new();
        page.try_reserve_exact(slots)
            .map_err(|_| TsFileError::OutOfMemory(slots * std::mem::size_of::<T>()))?;
        self.pages.push(page);
        Ok(self.pages.len() - 1)
    }

    /// Moves `value` into the arena.
    ///
    /// # Errors
    ///
    /// Returns `OutOfMemory` if a new page cannot be allocated.
    pub fn alloc(&mut self, value: T) -> Result<Handle<T>> {
        let page = self.page_with_room(1)?;
        let slot = self.pages[page].len();
        self.pages[page].push(value);
        self.allocated += 1;
        Ok(Handle {
            epoch: self.epoch,
            page: page as u32,
            slot: slot as u32,
            _marker: PhantomData,
        })
    }

    /// Moves a run of values into one page. A run larger than the page size
    /// gets a dedicated page of exactly that size.
    pub fn alloc_extend<I>(&mut self, values: I) -> Result<Span<T>>
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: ExactSizeIterator,
    {
        let values = values.into_iter();
        let len = values.len();
        let page = self.page_with_room(len)?;
        let start = self.pages[page].len();
        self.pages[page].extend(values);
        self.allocated += len;
        Ok(Span {
            epoch: self.epoch,
            page: page as u32,
            start: start as u32,
            len: len as u32,
            _marker: PhantomData,
        })
    }

    /// Resolves a handle; `None` if it predates the last `reset()`.
    pub fn get(&self, handle: Handle<T>) -> Option<&T> {
        if handle.epoch != self.epoch {
            return None;
        }
        self.pages
            .get(handle.page as usize)?
            .get(handle.slot as usize)
    }

    /// Mutable variant of [`get`](Self::get).
    pub fn get_mut(&mut self, handle: Handle<T>) -> Option<&mut T> {
        if handle.epoch != self.epoch {
            return None;
        }
        self.pages
            .get_mut(handle.page as usize)?
            .get_mut(handle.slot as usize)
    }

    /// Resolves a span.
    pub fn slice(&self, span: Span<T>) -> Option<&[T]> {
        if span.epoch != self.epoch {
            return None;
        }
        let start = span.start as usize;
        self.pages
            .get(span.page as usize)?
            .get(start..start + span.len as usize)
    }

    /// Number of live objects.
    pub fn len(&self) -> usize {
        self.allocated
    }

    /// Returns true if nothing is allocated.
    pub fn is_empty(&self) -> bool {
        self.allocated == 0
    }

    /// Number of pages currently held.
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Bytes reserved by all pages.
    pub fn reserved_bytes(&self) -> usize {
        self.pages
            .iter()
            .map(|p| p.capacity() * std::mem::size_of::<T>())
            .sum()
    }

    /// Drops every page. Outstanding handles become stale.
    pub fn reset(&mut self) {
        self.pages.clear();
        self.allocated = 0;
        self.epoch = self.epoch.wrapping_add(1);
    }
}
