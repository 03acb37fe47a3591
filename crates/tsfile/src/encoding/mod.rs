//! Column codecs.
//!
//! [`ColumnEncoder`] and [`ColumnDecoder`] dispatch over every supported
//! `(Encoding, DataType)` pair:
//!
//! | encoding | BOOLEAN | INT32 | INT64 | FLOAT | DOUBLE |
//! |----------|---------|-------|-------|-------|--------|
//! | PLAIN    | yes     | yes   | yes   | yes   | yes    |
//! | GORILLA  |         | yes   | yes   | yes   | yes    |
//! | ZIGZAG   |         | yes   | yes   |       |        |
//!
//! Timestamps are encoded as INT64 values.

pub mod gorilla;
pub mod plain;
pub mod zigzag;

pub use gorilla::{GorillaDecoder, GorillaEncoder, GorillaValue};
pub use plain::{encode_plain, PlainDecoder};
pub use zigzag::{ZigzagDecoder, ZigzagEncoder, ZigzagValue};

use crate::buffer::PagedBuffer;
use crate::error::{Result, TsFileError};
use crate::file::{DataType, Encoding, Value};

fn unsupported(encoding: Encoding, data_type: DataType) -> TsFileError {
    TsFileError::InvalidArg(format!(
        "encoding {:?} does not support {:?}",
        encoding, data_type
    ))
}

struct PlainState {
    pending: Option<PagedBuffer>,
    page_size: usize,
}

enum EncoderKind {
    Plain(PlainState),
    GorillaInt32(GorillaEncoder<i32>),
    GorillaInt64(GorillaEncoder<i64>),
    GorillaFloat(GorillaEncoder<f32>),
    GorillaDouble(GorillaEncoder<f64>),
    ZigzagInt32(ZigzagEncoder<i32>),
    ZigzagInt64(ZigzagEncoder<i64>),
}

/// Typed encoder for one column stream.
///
/// Values are checked against the declared type before anything is
/// buffered, so a rejected value leaves the stream untouched.
pub struct ColumnEncoder {
    data_type: DataType,
    encoding: Encoding,
    kind: EncoderKind,
}

impl ColumnEncoder {
    /// Creates an encoder for `data_type` values.
    ///
    /// PLAIN values are staged in a paged buffer of `page_size` bytes.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArg` for unsupported combinations.
    pub fn new(encoding: Encoding, data_type: DataType, page_size: usize) -> Result<Self> {
        let kind = match (encoding, data_type) {
            (Encoding::Plain, DataType::Vector) => return Err(unsupported(encoding, data_type)),
            (Encoding::Plain, _) => EncoderKind::Plain(PlainState {
                pending: None,
                page_size,
            }),
            (Encoding::Gorilla, DataType::Int32) => {
                EncoderKind::GorillaInt32(GorillaEncoder::new())
            }
            (Encoding::Gorilla, DataType::Int64) => {
                EncoderKind::GorillaInt64(GorillaEncoder::new())
            }
            (Encoding::Gorilla, DataType::Float) => {
                EncoderKind::GorillaFloat(GorillaEncoder::new())
            }
            (Encoding::Gorilla, DataType::Double) => {
                EncoderKind::GorillaDouble(GorillaEncoder::new())
            }
            (Encoding::Zigzag, DataType::Int32) => EncoderKind::ZigzagInt32(ZigzagEncoder::new()),
            (Encoding::Zigzag, DataType::Int64) => EncoderKind::ZigzagInt64(ZigzagEncoder::new()),
            _ => return Err(unsupported(encoding, data_type)),
        };
        Ok(Self {
            data_type,
            encoding,
            kind,
        })
    }

    /// Creates the encoder for a timestamp stream.
    pub fn for_time(encoding: Encoding, page_size: usize) -> Result<Self> {
        Self::new(encoding, DataType::Int64, page_size)
    }

    /// Declared value type.
    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// Encoding in use.
    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Appends one value.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` without buffering anything if `value` is not of
    /// the declared type.
    pub fn encode(&mut self, value: Value) -> Result<()> {
        value.check_type(self.data_type)?;
        match (&mut self.kind, value) {
            (EncoderKind::Plain(state), v) => {
                let page_size = state.page_size;
                let pending = state
                    .pending
                    .get_or_insert_with(|| PagedBuffer::new(page_size));
                encode_plain(v, pending)?;
            }
            (EncoderKind::GorillaInt32(e), Value::Int32(v)) => e.encode(v),
            (EncoderKind::GorillaInt64(e), Value::Int64(v)) => e.encode(v),
            (EncoderKind::GorillaFloat(e), Value::Float(v)) => e.encode(v),
            (EncoderKind::GorillaDouble(e), Value::Double(v)) => e.encode(v),
            (EncoderKind::ZigzagInt32(e), Value::Int32(v)) => e.encode(v),
            (EncoderKind::ZigzagInt64(e), Value::Int64(v)) => e.encode(v),
            _ => {
                return Err(TsFileError::TypeMismatch {
                    expected: self.data_type,
                    actual: value.data_type(),
                })
            }
        }
        Ok(())
    }

    /// Upper bound on the bytes the next [`flush`](Self::flush) writes.
    pub fn estimated_size(&self) -> usize {
        match &self.kind {
            EncoderKind::Plain(state) => state.pending.as_ref().map_or(0, |b| b.total_size()),
            EncoderKind::GorillaInt32(e) => e.estimated_size(),
            EncoderKind::GorillaInt64(e) => e.estimated_size(),
            EncoderKind::GorillaFloat(e) => e.estimated_size(),
            EncoderKind::GorillaDouble(e) => e.estimated_size(),
            EncoderKind::ZigzagInt32(e) => e.estimated_size(),
            EncoderKind::ZigzagInt64(e) => e.estimated_size(),
        }
    }

    /// Writes every buffered value to `out` and resets the stream.
    pub fn flush(&mut self, out: &mut PagedBuffer) -> Result<()> {
        match &mut self.kind {
            EncoderKind::Plain(state) => {
                if let Some(pending) = state.pending.take() {
                    for chunk in pending.iter() {
                        out.write(chunk)?;
                    }
                }
                Ok(())
            }
            EncoderKind::GorillaInt32(e) => e.flush(out),
            EncoderKind::GorillaInt64(e) => e.flush(out),
            EncoderKind::GorillaFloat(e) => e.flush(out),
            EncoderKind::GorillaDouble(e) => e.flush(out),
            EncoderKind::ZigzagInt32(e) => e.flush(out),
            EncoderKind::ZigzagInt64(e) => e.flush(out),
        }
    }
}

enum DecoderKind {
    Plain(PlainDecoder),
    GorillaInt32(GorillaDecoder<i32>),
    GorillaInt64(GorillaDecoder<i64>),
    GorillaFloat(GorillaDecoder<f32>),
    GorillaDouble(GorillaDecoder<f64>),
    ZigzagInt32(ZigzagDecoder<i32>),
    ZigzagInt64(ZigzagDecoder<i64>),
}

/// Typed decoder over one flushed column stream.
pub struct ColumnDecoder {
    kind: DecoderKind,
}

impl ColumnDecoder {
    /// Creates a decoder for a stream of `data_type` values.
    pub fn new(encoding: Encoding, data_type: DataType, data: Vec<u8>) -> Result<Self> {
        let kind = match (encoding, data_type) {
            (Encoding::Plain, DataType::Vector) => return Err(unsupported(encoding, data_type)),
            (Encoding::Plain, _) => DecoderKind::Plain(PlainDecoder::new(data_type, data)),
            (Encoding::Gorilla, DataType::Int32) => {
                DecoderKind::GorillaInt32(GorillaDecoder::new(data))
            }
            (Encoding::Gorilla, DataType::Int64) => {
                DecoderKind::GorillaInt64(GorillaDecoder::new(data))
            }
            (Encoding::Gorilla, DataType::Float) => {
                DecoderKind::GorillaFloat(GorillaDecoder::new(data))
            }
            (Encoding::Gorilla, DataType::Double) => {
                DecoderKind::GorillaDouble(GorillaDecoder::new(data))
            }
            (Encoding::Zigzag, DataType::Int32) => {
                DecoderKind::ZigzagInt32(ZigzagDecoder::new(data))
            }
            (Encoding::Zigzag, DataType::Int64) => {
                DecoderKind::ZigzagInt64(ZigzagDecoder::new(data))
            }
            _ => return Err(unsupported(encoding, data_type)),
        };
        Ok(Self { kind })
    }

    /// Creates the decoder for a timestamp stream.
    pub fn for_time(encoding: Encoding, data: Vec<u8>) -> Result<Self> {
        Self::new(encoding, DataType::Int64, data)
    }

    /// Returns the next value, or `None` at end of stream.
    pub fn next_value(&mut self) -> Result<Option<Value>> {
        Ok(match &mut self.kind {
            DecoderKind::Plain(d) => d.next_value()?,
            DecoderKind::GorillaInt32(d) => d.next_value()?.map(Value::Int32),
            DecoderKind::GorillaInt64(d) => d.next_value()?.map(Value::Int64),
            DecoderKind::GorillaFloat(d) => d.next_value()?.map(Value::Float),
            DecoderKind::GorillaDouble(d) => d.next_value()?.map(Value::Double),
            DecoderKind::ZigzagInt32(d) => d.next_value()?.map(Value::Int32),
            DecoderKind::ZigzagInt64(d) => d.next_value()?.map(Value::Int64),
        })
    }

    /// Returns the next timestamp of a time stream.
    pub fn next_time(&mut self) -> Result<Option<i64>> {
        match self.next_value()? {
            None => Ok(None),
            Some(Value::Int64(t)) => Ok(Some(t)),
            Some(other) => Err(TsFileError::TypeMismatch {
                expected: DataType::Int64,
                actual: other.data_type(),
            }),
        }
    }

    /// Decodes the rest of the stream.
    pub fn collect_values(&mut self) -> Result<Vec<Value>> {
        let mut values = Vec::new();
        while let Some(v) = self.next_value()? {
            values.push(v);
        }
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_pairs_rejected() {
        assert!(ColumnEncoder::new(Encoding::Gorilla, DataType::Boolean, 64).is_err());
        assert!(ColumnEncoder::new(Encoding::Zigzag, DataType::Double, 64).is_err());
        assert!(ColumnDecoder::new(Encoding::Zigzag, DataType::Float, vec![]).is_err());
    }

    #[test]
    fn test_type_mismatch_leaves_stream_untouched() {
        let mut encoder = ColumnEncoder::new(Encoding::Gorilla, DataType::Int64, 64).unwrap();
        encoder.encode(Value::Int64(1)).unwrap();
        let before = encoder.estimated_size();
        assert!(matches!(
            encoder.encode(Value::Double(2.0)),
            Err(TsFileError::TypeMismatch { .. })
        ));
        assert_eq!(encoder.estimated_size(), before);

        let mut out = PagedBuffer::new(64);
        encoder.flush(&mut out).unwrap();
        let mut decoder = ColumnDecoder::for_time(Encoding::Gorilla, out.to_vec()).unwrap();
        assert_eq!(decoder.next_time().unwrap(), Some(1));
        assert_eq!(decoder.next_time().unwrap(), None);
    }

    #[test]
    fn test_every_supported_pair_roundtrips() {
        let cases: Vec<(Encoding, Vec<Value>)> = vec![
            (Encoding::Plain, vec![Value::Boolean(true), Value::Boolean(false)]),
            (Encoding::Plain, vec![Value::Int32(-7), Value::Int32(i32::MAX)]),
            (Encoding::Plain, vec![Value::Float(1.5), Value::Float(-3.0)]),
            (Encoding::Gorilla, vec![Value::Int32(3), Value::Int32(-3)]),
            (Encoding::Gorilla, vec![Value::Float(0.1), Value::Float(0.2)]),
            (Encoding::Gorilla, vec![Value::Double(9.5), Value::Double(9.75)]),
            (Encoding::Zigzag, vec![Value::Int32(-100), Value::Int32(100)]),
            (Encoding::Zigzag, vec![Value::Int64(i64::MAX), Value::Int64(0)]),
        ];

        for (encoding, values) in cases {
            let data_type = values[0].data_type();
            let mut encoder = ColumnEncoder::new(encoding, data_type, 16).unwrap();
            for v in &values {
                encoder.encode(*v).unwrap();
            }
            let mut out = PagedBuffer::new(16);
            encoder.flush(&mut out).unwrap();

            let mut decoder = ColumnDecoder::new(encoding, data_type, out.to_vec()).unwrap();
            assert_eq!(decoder.collect_values().unwrap(), values, "{:?}", encoding);
        }
    }
}
