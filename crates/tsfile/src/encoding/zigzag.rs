//! Zigzag varint codec for INT32 and INT64.
//!
//! Each value is mapped to an unsigned word with `(v << 1) ^ (v >> (BITS-1))`
//! and written as an unsigned varint. Values are buffered by `encode` and
//! written by `flush` in blocks:
//!
//! ```text
//! [encoded_byte_count: u8][value_count: u8][varint bytes...]
//! ```
//!
//! Both header fields are single bytes, so a block holds at most 255 encoded
//! bytes and 255 values; `flush` starts a new block whenever either limit
//! would be crossed.

use crate::buffer::{encode_var_u64, var_u64_len, PagedBuffer};
use crate::error::{Result, TsFileError};
use std::marker::PhantomData;

/// Largest byte or value count one block header can carry.
pub const MAX_BLOCK_LEN: usize = u8::MAX as usize;

/// A signed integer the zigzag codec can carry.
pub trait ZigzagValue: Copy {
    /// Maps the value to its zigzag word.
    fn zigzag(self) -> u64;

    /// Inverse of [`zigzag`](Self::zigzag).
    fn unzigzag(word: u64) -> Result<Self>;
}

impl ZigzagValue for i32 {
    fn zigzag(self) -> u64 {
        u64::from(((self << 1) ^ (self >> 31)) as u32)
    }

    fn unzigzag(word: u64) -> Result<Self> {
        let word = u32::try_from(word)
            .map_err(|_| TsFileError::Corrupted(format!("zigzag word {} exceeds INT32", word)))?;
        Ok(((word >> 1) as i32) ^ -((word & 1) as i32))
    }
}

impl ZigzagValue for i64 {
    fn zigzag(self) -> u64 {
        ((self << 1) ^ (self >> 63)) as u64
    }

    fn unzigzag(word: u64) -> Result<Self> {
        Ok(((word >> 1) as i64) ^ -((word & 1) as i64))
    }
}

/// Buffering zigzag encoder.
pub struct ZigzagEncoder<T: ZigzagValue> {
    words: Vec<u64>,
    encoded_len: usize,
    _marker: PhantomData<T>,
}

impl<T: ZigzagValue> Default for ZigzagEncoder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ZigzagValue> ZigzagEncoder<T> {
    /// Creates an empty encoder.
    pub fn new() -> Self {
        Self {
            words: Vec::new(),
            encoded_len: 0,
            _marker: PhantomData,
        }
    }

    /// Buffers one value. Nothing is written until [`flush`](Self::flush).
    pub fn encode(&mut self, value: T) {
        let word = value.zigzag();
        self.encoded_len += var_u64_len(word);
        self.words.push(word);
    }

    /// Number of buffered values.
    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// Returns true if nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Upper bound on the bytes the next [`flush`](Self::flush) writes.
    pub fn estimated_size(&self) -> usize {
        let blocks = self.words.len().div_ceil(MAX_BLOCK_LEN).max(1)
            + self.encoded_len / MAX_BLOCK_LEN;
        self.encoded_len + 2 * blocks
    }

    /// Writes every buffered value as one or more blocks and clears the
    /// buffer.
    pub fn flush(&mut self, out: &mut PagedBuffer) -> Result<()> {
        let mut block: Vec<u8> = Vec::with_capacity(MAX_BLOCK_LEN);
        let mut count = 0usize;
        let mut encoded: Vec<u8> = Vec::with_capacity(10);

        for &word in &self.words {
            encoded.clear();
            encode_var_u64(word, &mut encoded);
            if count == MAX_BLOCK_LEN || block.len() + encoded.len() > MAX_BLOCK_LEN {
                write_block(out, &block, count)?;
                block.clear();
                count = 0;
            }
            block.extend_from_slice(&encoded);
            count += 1;
        }
        if count > 0 {
            write_block(out, &block, count)?;
        }

        self.words.clear();
        self.encoded_len = 0;
        Ok(())
    }
}

fn write_block(out: &mut PagedBuffer, block: &[u8], count: usize) -> Result<()> {
    out.write_u8(block.len() as u8)?;
    out.write_u8(count as u8)?;
    out.write(block)
}

/// Zigzag decoder over one flushed stream.
pub struct ZigzagDecoder<T: ZigzagValue> {
    input: PagedBuffer,
    block_values_left: usize,
    block_end: usize,
    _marker: PhantomData<T>,
}

impl<T: ZigzagValue> ZigzagDecoder<T> {
    /// Creates a decoder over the bytes of one stream.
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            input: PagedBuffer::wrap(data),
            block_values_left: 0,
            block_end: 0,
            _marker: PhantomData,
        }
    }

    /// Returns the next value, or `None` when the input is exhausted.
    ///
    /// # Errors
    ///
    /// Returns `Corrupted` if a block's byte count disagrees with the
    /// varints it holds.
    pub fn next_value(&mut self) -> Result<Option<T>> {
        if self.block_values_left == 0 {
            if self.input.read_pos() != self.block_end {
                return Err(TsFileError::Corrupted(format!(
                    "zigzag block ends at {}, expected {}",
                    self.input.read_pos(),
                    self.block_end
                )));
            }
            if self.input.remaining() == 0 {
                return Ok(None);
            }
            let byte_count = usize::from(self.input.read_u8()?);
            let value_count = usize::from(self.input.read_u8()?);
            if value_count == 0 {
                return Err(TsFileError::Corrupted("empty zigzag block".to_string()));
            }
            self.block_values_left = value_count;
            self.block_end = self.input.read_pos() + byte_count;
        }

        let word = self.input.read_var_u64()?;
        if self.input.read_pos() > self.block_end {
            return Err(TsFileError::Corrupted(
                "zigzag varint crosses block end".to_string(),
            ));
        }
        self.block_values_left -= 1;
        Ok(Some(T::unzigzag(word)?))
    }
}
