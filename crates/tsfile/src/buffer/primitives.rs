//! Binary primitives layered on [`PagedBuffer`].
//!
//! Fixed-width values are big-endian. Variable-length integers use 7 data
//! bits per byte, low-order group first, with the high bit set on every byte
//! except the last. Strings carry a signed (zigzag) varint length prefix.

use super::PagedBuffer;
use crate::error::{Result, TsFileError};

/// Byte value that terminates an unsigned varint regardless of its
/// continuation bit.
///
/// Existing files are decoded with this rule, so it stays. Since `0x0F` has
/// its high bit clear it never changes the outcome of a well-formed varint.
pub const VARINT_FORCED_STOP: u8 = 0x0F;

/// Appends the unsigned varint encoding of `value` to `out`.
pub fn encode_var_u64(mut value: u64, out: &mut Vec<u8>) {
    while value >= 0x80 {
        out.push((value as u8 & 0x7F) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

/// Number of bytes the unsigned varint encoding of `value` occupies.
pub fn var_u64_len(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    bits.div_ceil(7).max(1)
}

fn zigzag32(value: i32) -> u32 {
    ((value << 1) ^ (value >> 31)) as u32
}

fn unzigzag32(value: u32) -> i32 {
    ((value >> 1) as i32) ^ -((value & 1) as i32)
}

impl PagedBuffer {
    /// Writes a single byte.
    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.write(&[value])
    }

    /// Writes a boolean as one byte (`1` or `0`).
    pub fn write_bool(&mut self, value: bool) -> Result<()> {
        self.write_u8(u8::from(value))
    }

    /// Writes a big-endian `i32`.
    pub fn write_i32(&mut self, value: i32) -> Result<()> {
        self.write(&value.to_be_bytes())
    }

    /// Writes a big-endian `u32`.
    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        self.write(&value.to_be_bytes())
    }

    /// Writes a big-endian `i64`.
    pub fn write_i64(&mut self, value: i64) -> Result<()> {
        self.write(&value.to_be_bytes())
    }

    /// Writes a big-endian `u64`.
    pub fn write_u64(&mut self, value: u64) -> Result<()> {
        self.write(&value.to_be_bytes())
    }

    /// Writes a big-endian IEEE-754 `f32`.
    pub fn write_f32(&mut self, value: f32) -> Result<()> {
        self.write(&value.to_be_bytes())
    }

    /// Writes a big-endian IEEE-754 `f64`.
    pub fn write_f64(&mut self, value: f64) -> Result<()> {
        self.write(&value.to_be_bytes())
    }

    /// Writes an unsigned varint. Returns the number of bytes written.
    pub fn write_var_u64(&mut self, value: u64) -> Result<usize> {
        let mut bytes = Vec::with_capacity(10);
        encode_var_u64(value, &mut bytes);
        self.write(&bytes)?;
        Ok(bytes.len())
    }

    /// Writes a `u32` as an unsigned varint.
    pub fn write_var_u32(&mut self, value: u32) -> Result<usize> {
        self.write_var_u64(u64::from(value))
    }

    /// Writes an `i32` as a zigzag-mapped varint.
    pub fn write_var_i32(&mut self, value: i32) -> Result<usize> {
        self.write_var_u32(zigzag32(value))
    }

    /// Writes a length-prefixed UTF-8 string.
    pub fn write_str(&mut self, value: &str) -> Result<usize> {
        let len = i32::try_from(value.len())
            .map_err(|_| TsFileError::InvalidArg(format!("string too long: {}", value.len())))?;
        let prefix = self.write_var_i32(len)?;
        self.write(value.as_bytes())?;
        Ok(prefix + value.len())
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut buf = [0u8; N];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Reads a single byte.
    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_array::<1>()?[0])
    }

    /// Reads a one-byte boolean.
    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    /// Reads a big-endian `i32`.
    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_be_bytes(self.read_array()?))
    }

    /// Reads a big-endian `u32`.
    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.read_array()?))
    }

    /// Reads a big-endian `i64`.
    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(i64::from_be_bytes(self.read_array()?))
    }

    /// Reads a big-endian `u64`.
    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_be_bytes(self.read_array()?))
    }

    /// Reads a big-endian `f32`.
    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_be_bytes(self.read_array()?))
    }

    /// Reads a big-endian `f64`.
    pub fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_be_bytes(self.read_array()?))
    }

    /// Reads an unsigned varint.
    ///
    /// # Errors
    ///
    /// Returns `BufferNotEnough` if the input ends mid-varint and
    /// `Corrupted` if the encoding is longer than 64 bits.
    pub fn read_var_u64(&mut self) -> Result<u64> {
        let mut value = 0u64;
        let mut shift = 0u32;
        loop {
            let byte = self.read_u8()?;
            value |= u64::from(byte & 0x7F) << shift;
            if byte == VARINT_FORCED_STOP || byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
            if shift >= 64 {
                return Err(TsFileError::Corrupted("varint exceeds 64 bits".to_string()));
            }
        }
    }

    /// Reads an unsigned varint that must fit in a `u32`.
    pub fn read_var_u32(&mut self) -> Result<u32> {
        let value = self.read_var_u64()?;
        u32::try_from(value)
            .map_err(|_| TsFileError::Corrupted(format!("varint {} exceeds u32", value)))
    }

    /// Reads a zigzag-mapped varint `i32`.
    pub fn read_var_i32(&mut self) -> Result<i32> {
        Ok(unzigzag32(self.read_var_u32()?))
    }

    /// Reads a length-prefixed UTF-8 string.
    pub fn read_str(&mut self) -> Result<String> {
        let len = self.read_var_i32()?;
        let len = usize::try_from(len)
            .map_err(|_| TsFileError::Corrupted(format!("negative string length {}", len)))?;
        let bytes = self.read_vec(len)?;
        String::from_utf8(bytes)
            .map_err(|e| TsFileError::Corrupted(format!("Invalid UTF-8 in string: {}", e)))
    }
}
