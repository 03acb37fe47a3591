//! PLAIN encoding: values written as-is.
//!
//! BOOLEAN takes one byte, INT32 a zigzag varint, and INT64, FLOAT and
//! DOUBLE their big-endian fixed width.

use crate::buffer::PagedBuffer;
use crate::error::Result;
use crate::file::{DataType, Value};

/// Writes one value in PLAIN form.
pub fn encode_plain(value: Value, out: &mut PagedBuffer) -> Result<()> {
    match value {
        Value::Boolean(v) => out.write_bool(v),
        Value::Int32(v) => out.write_var_i32(v).map(|_| ()),
        Value::Int64(v) => out.write_i64(v),
        Value::Float(v) => out.write_f32(v),
        Value::Double(v) => out.write_f64(v),
    }
}

/// PLAIN decoder over one stream.
pub struct PlainDecoder {
    data_type: DataType,
    input: PagedBuffer,
}

impl PlainDecoder {
    /// Creates a decoder for values of `data_type`.
    pub fn new(data_type: DataType, data: Vec<u8>) -> Self {
        Self {
            data_type,
            input: PagedBuffer::wrap(data),
        }
    }

    /// Returns the next value, or `None` when the input is exhausted.
    pub fn next_value(&mut self) -> Result<Option<Value>> {
        if self.input.remaining() == 0 {
            return Ok(None);
        }
        let value = match self.data_type {
            DataType::Boolean => Value::Boolean(self.input.read_bool()?),
            DataType::Int32 => Value::Int32(self.input.read_var_i32()?),
            DataType::Int64 | DataType::Vector => Value::Int64(self.input.read_i64()?),
            DataType::Float => Value::Float(self.input.read_f32()?),
            DataType::Double => Value::Double(self.input.read_f64()?),
        };
        Ok(Some(value))
    }
}
