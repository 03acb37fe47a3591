//! Whole-file Bloom filter over `device.measurement` paths.

use crate::buffer::PagedBuffer;
use crate::error::{Result, TsFileError};
use bitvec::prelude::*;

/// Lowest false-positive rate the filter is sized for.
pub const MIN_ERROR_RATE: f64 = 0.01;

/// Highest false-positive rate the filter is sized for.
pub const MAX_ERROR_RATE: f64 = 0.1;

/// Smallest bit array ever allocated.
pub const MIN_BIT_COUNT: usize = 256;

/// Upper bound on the number of hash functions.
pub const MAX_HASH_COUNT: usize = 8;

/// Bloom filter for path existence checks.
///
/// Uses xxhash64 with seeds `0..hash_count`:
/// `h_i(path) = xxhash64(path, seed=i) % bit_count`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BloomFilter {
    bits: BitVec<u8, Msb0>,
    hash_count: usize,
}

impl BloomFilter {
    /// Creates a filter sized for `path_count` paths at `error_rate`.
    ///
    /// `m = -n ln p / (ln 2)^2` bits (at least [`MIN_BIT_COUNT`]) and
    /// `k = ceil(-log2 p)` hashes, with `p` clamped to
    /// `[MIN_ERROR_RATE, MAX_ERROR_RATE]`.
    pub fn new(path_count: usize, error_rate: f64) -> Self {
        let p = error_rate.clamp(MIN_ERROR_RATE, MAX_ERROR_RATE);
        let ln2 = std::f64::consts::LN_2;
        let n = path_count.max(1) as f64;
        let bit_count = ((-n * p.ln() / (ln2 * ln2)).ceil() as usize).max(MIN_BIT_COUNT);
        let hash_count = ((-p.log2()).ceil() as usize).clamp(1, MAX_HASH_COUNT);

        Self {
            bits: bitvec![u8, Msb0; 0; bit_count],
            hash_count,
        }
    }

    fn positions<'a>(
        &'a self,
        device: &'a str,
        measurement: &'a str,
    ) -> impl Iterator<Item = usize> + 'a {
        let key = path_key(device, measurement);
        let bit_count = self.bits.len() as u64;
        (0..self.hash_count as u64)
            .map(move |seed| (xxhash_rust::xxh64::xxh64(key.as_bytes(), seed) % bit_count) as usize)
    }

    /// Adds a path.
    pub fn add_path(&mut self, device: &str, measurement: &str) {
        let positions: Vec<usize> = self.positions(device, measurement).collect();
        for pos in positions {
            self.bits.set(pos, true);
        }
    }

    /// Checks if a path might be in the filter.
    ///
    /// Returns `false` only if the path was definitely never added.
    pub fn maybe_contains(&self, device: &str, measurement: &str) -> bool {
        self.positions(device, measurement).all(|pos| self.bits[pos])
    }

    /// Number of bits in the filter.
    pub fn bit_count(&self) -> usize {
        self.bits.len()
    }

    /// Number of hash functions.
    pub fn hash_count(&self) -> usize {
        self.hash_count
    }

    /// Writes `varuint(byte_len) bytes varuint(bit_count) varuint(hash_count)`.
    pub fn serialize_to(&self, out: &mut PagedBuffer) -> Result<usize> {
        let start = out.total_size();
        let bytes = self.bits.as_raw_slice();
        out.write_var_u64(bytes.len() as u64)?;
        out.write(bytes)?;
        out.write_var_u64(self.bits.len() as u64)?;
        out.write_var_u64(self.hash_count as u64)?;
        Ok(out.total_size() - start)
    }

    /// Reads a filter written by [`serialize_to`](Self::serialize_to).
    pub fn deserialize_from(input: &mut PagedBuffer) -> Result<Self> {
        let byte_len = input.read_var_u64()? as usize;
        let bytes = input.read_vec(byte_len)?;
        let bit_count = input.read_var_u64()? as usize;
        let hash_count = input.read_var_u64()? as usize;

        if bit_count == 0 || bit_count > byte_len * 8 {
            return Err(TsFileError::Corrupted(format!(
                "bloom filter claims {} bits in {} bytes",
                bit_count, byte_len
            )));
        }
        if hash_count == 0 || hash_count > MAX_HASH_COUNT {
            return Err(TsFileError::Corrupted(format!(
                "bloom filter hash count {}",
                hash_count
            )));
        }

        let mut bits = BitVec::<u8, Msb0>::from_vec(bytes);
        bits.truncate(bit_count);
        Ok(Self { bits, hash_count })
    }
}

fn path_key(device: &str, measurement: &str) -> String {
    let mut key = String::with_capacity(device.len() + measurement.len() + 1);
    key.push_str(device);
    key.push('.');
    key.push_str(measurement);
    key
}
