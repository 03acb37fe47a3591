//! Page and chunk statistics.
//!
//! Every page and chunk carries a [`Statistic`]: the point count, the time
//! range, and per-type aggregates. Statistics merge order-independently:
//! first/last values follow whichever side owns the earliest/latest
//! timestamp, so merging page statistics in any order yields the same chunk
//! statistic.
//!
//! ## Wire Format
//!
//! ```text
//! count        varuint
//! start_time   i64 (BE)
//! end_time     i64 (BE)
//! BOOLEAN      first(1B) last(1B) sum(i64)
//! INT32        min max first last (i32 each) sum(i64)
//! INT64        min max first last (i64 each) sum(f64)
//! FLOAT        min max first last (f32 each) sum(f64)
//! DOUBLE       min max first last (f64 each) sum(f64)
//! VECTOR/time  nothing
//! ```

use crate::buffer::PagedBuffer;
use crate::error::{Result, TsFileError};
use crate::file::{DataType, Value};

/// Type-specific aggregates of a [`Statistic`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StatValues {
    /// BOOLEAN column; `sum` counts `true` values.
    Boolean {
        /// Value at the earliest timestamp.
        first: bool,
        /// Value at the latest timestamp.
        last: bool,
        /// Number of `true` values.
        sum: i64,
    },
    /// INT32 column.
    Int32 {
        /// Smallest value.
        min: i32,
        /// Largest value.
        max: i32,
        /// Value at the earliest timestamp.
        first: i32,
        /// Value at the latest timestamp.
        last: i32,
        /// Sum of all values.
        sum: i64,
    },
    /// INT64 column.
    Int64 {
        /// Smallest value.
        min: i64,
        /// Largest value.
        max: i64,
        /// Value at the earliest timestamp.
        first: i64,
        /// Value at the latest timestamp.
        last: i64,
        /// Sum of all values.
        sum: f64,
    },
    /// FLOAT column.
    Float {
        /// Smallest value.
        min: f32,
        /// Largest value.
        max: f32,
        /// Value at the earliest timestamp.
        first: f32,
        /// Value at the latest timestamp.
        last: f32,
        /// Sum of all values.
        sum: f64,
    },
    /// DOUBLE column.
    Double {
        /// Smallest value.
        min: f64,
        /// Largest value.
        max: f64,
        /// Value at the earliest timestamp.
        first: f64,
        /// Value at the latest timestamp.
        last: f64,
        /// Sum of all values.
        sum: f64,
    },
    /// Time column of an aligned device; only count and time range.
    Time,
}

impl StatValues {
    fn empty(data_type: DataType) -> Self {
        match data_type {
            DataType::Boolean => Self::Boolean {
                first: false,
                last: false,
                sum: 0,
            },
            DataType::Int32 => Self::Int32 {
                min: 0,
                max: 0,
                first: 0,
                last: 0,
                sum: 0,
            },
            DataType::Int64 => Self::Int64 {
                min: 0,
                max: 0,
                first: 0,
                last: 0,
                sum: 0.0,
            },
            DataType::Float => Self::Float {
                min: 0.0,
                max: 0.0,
                first: 0.0,
                last: 0.0,
                sum: 0.0,
            },
            DataType::Double => Self::Double {
                min: 0.0,
                max: 0.0,
                first: 0.0,
                last: 0.0,
                sum: 0.0,
            },
            DataType::Vector => Self::Time,
        }
    }

    fn seeded(value: Value) -> Self {
        match value {
            Value::Boolean(v) => Self::Boolean {
                first: v,
                last: v,
                sum: i64::from(v),
            },
            Value::Int32(v) => Self::Int32 {
                min: v,
                max: v,
                first: v,
                last: v,
                sum: i64::from(v),
            },
            Value::Int64(v) => Self::Int64 {
                min: v,
                max: v,
                first: v,
                last: v,
                sum: v as f64,
            },
            Value::Float(v) => Self::Float {
                min: v,
                max: v,
                first: v,
                last: v,
                sum: f64::from(v),
            },
            Value::Double(v) => Self::Double {
                min: v,
                max: v,
                first: v,
                last: v,
                sum: v,
            },
        }
    }

    fn data_type(&self) -> DataType {
        match self {
            Self::Boolean { .. } => DataType::Boolean,
            Self::Int32 { .. } => DataType::Int32,
            Self::Int64 { .. } => DataType::Int64,
            Self::Float { .. } => DataType::Float,
            Self::Double { .. } => DataType::Double,
            Self::Time => DataType::Vector,
        }
    }
}

/// Typed aggregate over a page or chunk.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Statistic {
    count: u64,
    start_time: i64,
    end_time: i64,
    values: StatValues,
}

impl Statistic {
    /// Creates an empty statistic for a column of `data_type`.
    ///
    /// `DataType::Vector` yields the time-only kind.
    pub fn new(data_type: DataType) -> Self {
        Self {
            count: 0,
            start_time: i64::MAX,
            end_time: i64::MIN,
            values: StatValues::empty(data_type),
        }
    }

    /// Data type this statistic aggregates.
    pub fn data_type(&self) -> DataType {
        self.values.data_type()
    }

    /// Number of points.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Returns true if no point has been recorded.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Earliest timestamp (`i64::MAX` while empty).
    pub fn start_time(&self) -> i64 {
        self.start_time
    }

    /// Latest timestamp (`i64::MIN` while empty).
    pub fn end_time(&self) -> i64 {
        self.end_time
    }

    /// Type-specific aggregates.
    pub fn values(&self) -> &StatValues {
        &self.values
    }

    /// Clears all aggregates, keeping the kind.
    pub fn reset(&mut self) {
        *self = Self::new(self.data_type());
    }

    /// Records a timestamp on a time-only statistic.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` for value statistics, which need a value.
    pub fn update_time(&mut self, time: i64) -> Result<()> {
        if self.values != StatValues::Time {
            return Err(TsFileError::TypeMismatch {
                expected: self.data_type(),
                actual: DataType::Vector,
            });
        }
        self.widen(time);
        Ok(())
    }

    /// Records one `(time, value)` sample.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` if `value` is not of this statistic's type; the
    /// statistic is left unchanged.
    pub fn update(&mut self, time: i64, value: Value) -> Result<()> {
        value.check_type(self.data_type())?;

        if self.count == 0 {
            self.values = StatValues::seeded(value);
            self.widen(time);
            return Ok(());
        }

        let is_first = time < self.start_time;
        let is_last = time >= self.end_time;
        match (&mut self.values, value) {
            (StatValues::Boolean { first, last, sum }, Value::Boolean(v)) => {
                *sum += i64::from(v);
                if is_first {
                    *first = v;
                }
                if is_last {
                    *last = v;
                }
            }
            (StatValues::Int32 { min, max, first, last, sum }, Value::Int32(v)) => {
                *min = (*min).min(v);
                *max = (*max).max(v);
                *sum += i64::from(v);
                if is_first {
                    *first = v;
                }
                if is_last {
                    *last = v;
                }
            }
            (StatValues::Int64 { min, max, first, last, sum }, Value::Int64(v)) => {
                *min = (*min).min(v);
                *max = (*max).max(v);
                *sum += v as f64;
                if is_first {
                    *first = v;
                }
                if is_last {
                    *last = v;
                }
            }
            (StatValues::Float { min, max, first, last, sum }, Value::Float(v)) => {
                if v < *min {
                    *min = v;
                }
                if v > *max {
                    *max = v;
                }
                *sum += f64::from(v);
                if is_first {
                    *first = v;
                }
                if is_last {
                    *last = v;
                }
            }
            (StatValues::Double { min, max, first, last, sum }, Value::Double(v)) => {
                if v < *min {
                    *min = v;
                }
                if v > *max {
                    *max = v;
                }
                *sum += v;
                if is_first {
                    *first = v;
                }
                if is_last {
                    *last = v;
                }
            }
            _ => unreachable!("value type checked above"),
        }
        self.widen(time);
        Ok(())
    }

    fn widen(&mut self, time: i64) {
        self.count += 1;
        self.start_time = self.start_time.min(time);
        self.end_time = self.end_time.max(time);
    }

    /// Folds `other` into this statistic.
    ///
    /// Merging an empty statistic is a no-op. The result does not depend on
    /// merge order for statistics over disjoint time ranges.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` if the kinds differ.
    pub fn merge_with(&mut self, other: &Statistic) -> Result<()> {
        if self.data_type() != other.data_type() {
            return Err(TsFileError::TypeMismatch {
                expected: self.data_type(),
                actual: other.data_type(),
            });
        }
        if other.count == 0 {
            return Ok(());
        }
        if self.count == 0 {
            *self = *other;
            return Ok(());
        }

        let take_first = other.start_time < self.start_time;
        let take_last = other.end_time > self.end_time;
        match (&mut self.values, &other.values) {
            (
                StatValues::Boolean { first, last, sum },
                StatValues::Boolean {
                    first: o_first,
                    last: o_last,
                    sum: o_sum,
                },
            ) => {
                *sum += *o_sum;
                if take_first {
                    *first = *o_first;
                }
                if take_last {
                    *last = *o_last;
                }
            }
            (
                StatValues::Int32 { min, max, first, last, sum },
                StatValues::Int32 {
                    min: o_min,
                    max: o_max,
                    first: o_first,
                    last: o_last,
                    sum: o_sum,
                },
            ) => {
                *min = (*min).min(*o_min);
                *max = (*max).max(*o_max);
                *sum += *o_sum;
                if take_first {
                    *first = *o_first;
                }
                if take_last {
                    *last = *o_last;
                }
            }
            (
                StatValues::Int64 { min, max, first, last, sum },
                StatValues::Int64 {
                    min: o_min,
                    max: o_max,
                    first: o_first,
                    last: o_last,
                    sum: o_sum,
                },
            ) => {
                *min = (*min).min(*o_min);
                *max = (*max).max(*o_max);
                *sum += *o_sum;
                if take_first {
                    *first = *o_first;
                }
                if take_last {
                    *last = *o_last;
                }
            }
            (
                StatValues::Float { min, max, first, last, sum },
                StatValues::Float {
                    min: o_min,
                    max: o_max,
                    first: o_first,
                    last: o_last,
                    sum: o_sum,
                },
            ) => {
                if *o_min < *min {
                    *min = *o_min;
                }
                if *o_max > *max {
                    *max = *o_max;
                }
                *sum += *o_sum;
                if take_first {
                    *first = *o_first;
                }
                if take_last {
                    *last = *o_last;
                }
            }
            (
                StatValues::Double { min, max, first, last, sum },
                StatValues::Double {
                    min: o_min,
                    max: o_max,
                    first: o_first,
                    last: o_last,
                    sum: o_sum,
                },
            ) => {
                if *o_min < *min {
                    *min = *o_min;
                }
                if *o_max > *max {
                    *max = *o_max;
                }
                *sum += *o_sum;
                if take_first {
                    *first = *o_first;
                }
                if take_last {
                    *last = *o_last;
                }
            }
            (StatValues::Time, StatValues::Time) => {}
            _ => unreachable!("kinds checked above"),
        }

        self.count += other.count;
        self.start_time = self.start_time.min(other.start_time);
        self.end_time = self.end_time.max(other.end_time);
        Ok(())
    }

    /// Value at the earliest timestamp.
    pub fn first_value(&self) -> Option<Value> {
        if self.count == 0 {
            return None;
        }
        match self.values {
            StatValues::Boolean { first, .. } => Some(Value::Boolean(first)),
            StatValues::Int32 { first, .. } => Some(Value::Int32(first)),
            StatValues::Int64 { first, .. } => Some(Value::Int64(first)),
            StatValues::Float { first, .. } => Some(Value::Float(first)),
            StatValues::Double { first, .. } => Some(Value::Double(first)),
            StatValues::Time => None,
        }
    }

    /// Value at the latest timestamp.
    pub fn last_value(&self) -> Option<Value> {
        if self.count == 0 {
            return None;
        }
        match self.values {
            StatValues::Boolean { last, .. } => Some(Value::Boolean(last)),
            StatValues::Int32 { last, .. } => Some(Value::Int32(last)),
            StatValues::Int64 { last, .. } => Some(Value::Int64(last)),
            StatValues::Float { last, .. } => Some(Value::Float(last)),
            StatValues::Double { last, .. } => Some(Value::Double(last)),
            StatValues::Time => None,
        }
    }

    /// Sum as a double; `None` for time-only or empty statistics.
    pub fn sum(&self) -> Option<f64> {
        if self.count == 0 {
            return None;
        }
        match self.values {
            StatValues::Boolean { sum, .. } => Some(sum as f64),
            StatValues::Int32 { sum, .. } => Some(sum as f64),
            StatValues::Int64 { sum, .. }
            | StatValues::Float { sum, .. }
            | StatValues::Double { sum, .. } => Some(sum),
            StatValues::Time => None,
        }
    }

    /// Writes the statistic and returns the number of bytes written.
    pub fn serialize_to(&self, out: &mut PagedBuffer) -> Result<usize> {
        let start = out.total_size();
        out.write_var_u64(self.count)?;
        out.write_i64(self.start_time)?;
        out.write_i64(self.end_time)?;
        match self.values {
            StatValues::Boolean { first, last, sum } => {
                out.write_bool(first)?;
                out.write_bool(last)?;
                out.write_i64(sum)?;
            }
            StatValues::Int32 { min, max, first, last, sum } => {
                out.write_i32(min)?;
                out.write_i32(max)?;
                out.write_i32(first)?;
                out.write_i32(last)?;
                out.write_i64(sum)?;
            }
            StatValues::Int64 { min, max, first, last, sum } => {
                out.write_i64(min)?;
                out.write_i64(max)?;
                out.write_i64(first)?;
                out.write_i64(last)?;
                out.write_f64(sum)?;
            }
            StatValues::Float { min, max, first, last, sum } => {
                out.write_f32(min)?;
                out.write_f32(max)?;
                out.write_f32(first)?;
                out.write_f32(last)?;
                out.write_f64(sum)?;
            }
            StatValues::Double { min, max, first, last, sum } => {
                out.write_f64(min)?;
                out.write_f64(max)?;
                out.write_f64(first)?;
                out.write_f64(last)?;
                out.write_f64(sum)?;
            }
            StatValues::Time => {}
        }
        Ok(out.total_size() - start)
    }

    /// Reads a statistic of the declared `data_type`.
    pub fn deserialize_from(data_type: DataType, input: &mut PagedBuffer) -> Result<Self> {
        let count = input.read_var_u64()?;
        let start_time = input.read_i64()?;
        let end_time = input.read_i64()?;
        let values = match data_type {
            DataType::Boolean => StatValues::Boolean {
                first: input.read_bool()?,
                last: input.read_bool()?,
                sum: input.read_i64()?,
            },
            DataType::Int32 => StatValues::Int32 {
                min: input.read_i32()?,
                max: input.read_i32()?,
                first: input.read_i32()?,
                last: input.read_i32()?,
                sum: input.read_i64()?,
            },
            DataType::Int64 => StatValues::Int64 {
                min: input.read_i64()?,
                max: input.read_i64()?,
                first: input.read_i64()?,
                last: input.read_i64()?,
                sum: input.read_f64()?,
            },
            DataType::Float => StatValues::Float {
                min: input.read_f32()?,
                max: input.read_f32()?,
                first: input.read_f32()?,
                last: input.read_f32()?,
                sum: input.read_f64()?,
            },
            DataType::Double => StatValues::Double {
                min: input.read_f64()?,
                max: input.read_f64()?,
                first: input.read_f64()?,
                last: input.read_f64()?,
                sum: input.read_f64()?,
            },
            DataType::Vector => StatValues::Time,
        };

        if count > 0 && start_time > end_time {
            return Err(TsFileError::Corrupted(format!(
                "statistic start time {} after end time {}",
                start_time, end_time
            )));
        }

        Ok(Self {
            count,
            start_time,
            end_time,
            values,
        })
    }
}
