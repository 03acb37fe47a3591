//! Gorilla XOR compression over 32- and 64-bit words.
//!
//! # Algorithm Overview
//!
//! Values are handled as raw words; FLOAT and DOUBLE go through bit
//! reinterpretation, never float arithmetic.
//!
//! - First value: `WORD_BITS` bits raw
//! - Subsequent values, with `xor = stored ^ value`:
//!   - `xor == 0`: `'0'`
//!   - window fits inside the stored one: `'10'` + stored-window bits
//!   - new window: `'11'` + leading zeros + (significant bits - 1) +
//!     significant bits; the two counts take 5 bits for 32-bit words and 6
//!     bits for 64-bit words
//!
//! ## Termination
//!
//! `flush()` encodes a sentinel word as one more value and pads the last
//! byte with zeros. The decoder stops at the first sentinel it decodes, so a
//! data value equal to the sentinel ends the stream early. Existing files
//! depend on this layout.
//!
//! | type | sentinel |
//! |------|----------|
//! | INT32 | `i32::MIN` |
//! | INT64 | `i64::MIN` |
//! | FLOAT | `0x7FC0_0000` (canonical NaN) |
//! | DOUBLE | `0x7FF8_0000_0000_0000` (canonical NaN) |

use crate::buffer::PagedBuffer;
use crate::error::{Result, TsFileError};
use bitvec::prelude::*;
use std::marker::PhantomData;

/// A value the Gorilla codec can carry as a fixed-width word.
pub trait GorillaValue: Copy {
    /// Word width in bits (32 or 64).
    const WORD_BITS: u32;
    /// Width of the leading-zero and length fields.
    const COUNT_BITS: u32;
    /// End-of-stream word.
    const SENTINEL: u64;

    /// Raw word of this value, zero-extended to 64 bits.
    fn to_word(self) -> u64;

    /// Value of a raw word.
    fn from_word(word: u64) -> Self;

    /// Leading zeros of `word` within `WORD_BITS`.
    fn leading_zeros(word: u64) -> u32 {
        word.leading_zeros() - (64 - Self::WORD_BITS)
    }
}

impl GorillaValue for i32 {
    const WORD_BITS: u32 = 32;
    const COUNT_BITS: u32 = 5;
    const SENTINEL: u64 = i32::MIN as u32 as u64;

    fn to_word(self) -> u64 {
        u64::from(self as u32)
    }

    fn from_word(word: u64) -> Self {
        word as u32 as i32
    }
}

impl GorillaValue for i64 {
    const WORD_BITS: u32 = 64;
    const COUNT_BITS: u32 = 6;
    const SENTINEL: u64 = i64::MIN as u64;

    fn to_word(self) -> u64 {
        self as u64
    }

    fn from_word(word: u64) -> Self {
        word as i64
    }
}

impl GorillaValue for f32 {
    const WORD_BITS: u32 = 32;
    const COUNT_BITS: u32 = 5;
    const SENTINEL: u64 = 0x7FC0_0000;

    fn to_word(self) -> u64 {
        u64::from(self.to_bits())
    }

    fn from_word(word: u64) -> Self {
        f32::from_bits(word as u32)
    }
}

impl GorillaValue for f64 {
    const WORD_BITS: u32 = 64;
    const COUNT_BITS: u32 = 6;
    const SENTINEL: u64 = 0x7FF8_0000_0000_0000;

    fn to_word(self) -> u64 {
        self.to_bits()
    }

    fn from_word(word: u64) -> Self {
        f64::from_bits(word)
    }
}

/// Marks the stored leading-zero count as unset, so the first non-zero xor
/// always opens a new window.
const UNSET_LEADING_ZEROS: u32 = u32::MAX;

/// Streaming Gorilla encoder.
///
/// Bits accumulate in memory; nothing reaches the output until
/// [`flush`](Self::flush).
pub struct GorillaEncoder<T: GorillaValue> {
    bits: BitVec<u8, Msb0>,
    has_first: bool,
    stored_value: u64,
    stored_leading_zeros: u32,
    stored_trailing_zeros: u32,
    _marker: PhantomData<T>,
}

impl<T: GorillaValue> Default for GorillaEncoder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: GorillaValue> GorillaEncoder<T> {
    /// Creates an empty encoder.
    pub fn new() -> Self {
        Self {
            bits: BitVec::new(),
            has_first: false,
            stored_value: 0,
            stored_leading_zeros: UNSET_LEADING_ZEROS,
            stored_trailing_zeros: 0,
            _marker: PhantomData,
        }
    }

    /// Appends one value.
    pub fn encode(&mut self, value: T) {
        self.encode_word(value.to_word());
    }

    fn encode_word(&mut self, word: u64) {
        if !self.has_first {
            self.has_first = true;
            self.stored_value = word;
            self.write_bits(word, T::WORD_BITS);
            return;
        }

        let xor = self.stored_value ^ word;
        if xor == 0 {
            self.bits.push(false);
        } else {
            self.bits.push(true);
            let leading = T::leading_zeros(xor);
            let trailing = xor.trailing_zeros();

            if self.stored_leading_zeros != UNSET_LEADING_ZEROS
                && leading >= self.stored_leading_zeros
                && trailing >= self.stored_trailing_zeros
            {
                self.bits.push(false);
                let significant =
                    T::WORD_BITS - self.stored_leading_zeros - self.stored_trailing_zeros;
                self.write_bits(xor >> self.stored_trailing_zeros, significant);
            } else {
                self.bits.push(true);
                let significant = T::WORD_BITS - leading - trailing;
                self.write_bits(u64::from(leading), T::COUNT_BITS);
                self.write_bits(u64::from(significant - 1), T::COUNT_BITS);
                self.write_bits(xor >> trailing, significant);
                self.stored_leading_zeros = leading;
                self.stored_trailing_zeros = trailing;
            }
        }
        self.stored_value = word;
    }

    fn write_bits(&mut self, value: u64, count: u32) {
        for i in (0..count).rev() {
            self.bits.push((value >> i) & 1 == 1);
        }
    }

    /// Upper bound on the bytes the next [`flush`](Self::flush) writes.
    pub fn estimated_size(&self) -> usize {
        // Sentinel worst case: two control bits, two counts, a full word.
        let sentinel_bits = 2 + 2 * T::COUNT_BITS + T::WORD_BITS;
        (self.bits.len() + sentinel_bits as usize).div_ceil(8)
    }

    /// Terminates the stream with the sentinel, writes the padded bytes to
    /// `out`, and resets the encoder.
    pub fn flush(&mut self, out: &mut PagedBuffer) -> Result<()> {
        self.encode_word(T::SENTINEL);
        let mut bits = std::mem::take(&mut self.bits);
        bits.set_uninitialized(false);
        out.write(bits.as_raw_slice())?;
        *self = Self::new();
        Ok(())
    }
}

/// Gorilla decoder over one flushed stream.
pub struct GorillaDecoder<T: GorillaValue> {
    bits: BitVec<u8, Msb0>,
    pos: usize,
    has_first: bool,
    finished: bool,
    stored_value: u64,
    stored_leading_zeros: u32,
    stored_trailing_zeros: u32,
    _marker: PhantomData<T>,
}

impl<T: GorillaValue> GorillaDecoder<T> {
    /// Creates a decoder over the bytes of one stream.
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            bits: BitVec::from_vec(data),
            pos: 0,
            has_first: false,
            finished: false,
            stored_value: 0,
            stored_leading_zeros: 0,
            stored_trailing_zeros: 0,
            _marker: PhantomData,
        }
    }

    fn read_bit(&mut self) -> Result<bool> {
        let bit = self
            .bits
            .get(self.pos)
            .map(|b| *b)
            .ok_or_else(|| TsFileError::Corrupted("gorilla stream truncated".to_string()))?;
        self.pos += 1;
        Ok(bit)
    }

    fn read_bits(&mut self, count: u32) -> Result<u64> {
        let count = count as usize;
        if count == 0 {
            return Ok(0);
        }
        if self.pos + count > self.bits.len() {
            return Err(TsFileError::Corrupted(
                "gorilla stream truncated".to_string(),
            ));
        }
        let value = self.bits[self.pos..self.pos + count].load_be::<u64>();
        self.pos += count;
        Ok(value)
    }

    fn decode_word(&mut self) -> Result<u64> {
        if !self.has_first {
            self.has_first = true;
            self.stored_value = self.read_bits(T::WORD_BITS)?;
            return Ok(self.stored_value);
        }

        if !self.read_bit()? {
            return Ok(self.stored_value);
        }

        if self.read_bit()? {
            let leading = self.read_bits(T::COUNT_BITS)? as u32;
            let significant = self.read_bits(T::COUNT_BITS)? as u32 + 1;
            if leading + significant > T::WORD_BITS {
                return Err(TsFileError::Corrupted(format!(
                    "gorilla window {}+{} exceeds {} bits",
                    leading,
                    significant,
                    T::WORD_BITS
                )));
            }
            self.stored_leading_zeros = leading;
            self.stored_trailing_zeros = T::WORD_BITS - leading - significant;
        }

        let significant =
            T::WORD_BITS - self.stored_leading_zeros - self.stored_trailing_zeros;
        let xor = self.read_bits(significant)? << self.stored_trailing_zeros;
        self.stored_value ^= xor;
        Ok(self.stored_value)
    }

    /// Returns the next value, or `None` once the sentinel is reached.
    ///
    /// # Errors
    ///
    /// Returns `Corrupted` if the stream ends before its sentinel.
    pub fn next_value(&mut self) -> Result<Option<T>> {
        if self.finished {
            return Ok(None);
        }
        let word = self.decode_word()?;
        if word == T::SENTINEL {
            self.finished = true;
            return Ok(None);
        }
        Ok(Some(T::from_word(word)))
    }
}
