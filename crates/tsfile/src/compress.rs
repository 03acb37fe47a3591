//! Page compressors.
//!
//! The uncompressed size of every page is stored in its page header, so the
//! codecs here use their raw (unframed) forms where one exists.

use crate::error::{Result, TsFileError};
use crate::file::CompressionType;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::io::{Read, Write};

/// Compresses one page payload.
pub fn compress(compression: CompressionType, input: &[u8]) -> Result<Vec<u8>> {
    match compression {
        CompressionType::Uncompressed => Ok(input.to_vec()),
        CompressionType::Snappy => snap::raw::Encoder::new()
            .compress_vec(input)
            .map_err(|e| TsFileError::CompressionError(format!("snappy: {}", e))),
        CompressionType::Gzip => {
            let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
            encoder
                .write_all(input)
                .map_err(|e| TsFileError::CompressionError(format!("gzip: {}", e)))?;
            encoder
                .finish()
                .map_err(|e| TsFileError::CompressionError(format!("gzip: {}", e)))
        }
        CompressionType::Lz4 => Ok(lz4_flex::block::compress(input)),
    }
}

/// Decompresses one page payload of known uncompressed size.
///
/// # Errors
///
/// Returns `DecompressionError` if the codec fails or the output length
/// differs from `uncompressed_size`.
pub fn decompress(
    compression: CompressionType,
    input: &[u8],
    uncompressed_size: usize,
) -> Result<Vec<u8>> {
    let output = match compression {
        CompressionType::Uncompressed => input.to_vec(),
        CompressionType::Snappy => snap::raw::Decoder::new()
            .decompress_vec(input)
            .map_err(|e| TsFileError::DecompressionError(format!("snappy: {}", e)))?,
        CompressionType::Gzip => {
            let mut output = Vec::with_capacity(uncompressed_size);
            GzDecoder::new(input)
                .read_to_end(&mut output)
                .map_err(|e| TsFileError::DecompressionError(format!("gzip: {}", e)))?;
            output
        }
        CompressionType::Lz4 => lz4_flex::block::decompress(input, uncompressed_size)
            .map_err(|e| TsFileError::DecompressionError(format!("lz4: {}", e)))?,
    };

    if output.len() != uncompressed_size {
        return Err(TsFileError::DecompressionError(format!(
            "{:?} produced {} bytes, page header says {}",
            compression,
            output.len(),
            uncompressed_size
        )));
    }
    Ok(output)
}
