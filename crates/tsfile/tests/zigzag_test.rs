//! Tests for the zigzag varint codec.

use proptest::prelude::*;
use tsfile::buffer::PagedBuffer;
use tsfile::encoding::{ZigzagDecoder, ZigzagEncoder, ZigzagValue};

fn encode<T: ZigzagValue + Copy>(values: &[T]) -> Vec<u8> {
    let mut encoder = ZigzagEncoder::<T>::new();
    for &v in values {
        encoder.encode(v);
    }
    let mut out = PagedBuffer::new(32);
    encoder.flush(&mut out).unwrap();
    out.to_vec()
}

fn decode<T: ZigzagValue>(bytes: Vec<u8>) -> Vec<T> {
    let mut decoder = ZigzagDecoder::<T>::new(bytes);
    let mut values = Vec::new();
    while let Some(v) = decoder.next_value().unwrap() {
        values.push(v);
    }
    values
}

#[test]
fn test_block_header_layout() {
    // zigzag(-1) = 1, zigzag(1) = 2, zigzag(-64) = 127
    let bytes = encode(&[-1i32, 1, -64]);
    assert_eq!(bytes, vec![3, 3, 1, 2, 127]);
}

#[test]
fn test_multi_byte_varint() {
    // zigzag(64) = 128 -> 0x80 0x01
    let bytes = encode(&[64i64]);
    assert_eq!(bytes, vec![2, 1, 0x80, 0x01]);
    assert_eq!(decode::<i64>(bytes), vec![64]);
}

#[test]
fn test_large_sequence_splits_into_blocks() {
    let values: Vec<i64> = (0..10_000).map(|i| (i * 7919) % 100_003 - 50_000).collect();
    let bytes = encode(&values);
    // Every block header fits in one byte each.
    assert!(bytes.len() > 2 * (10_000 / 255));
    assert_eq!(decode::<i64>(bytes), values);
}

#[test]
fn test_extremes() {
    let values = vec![i32::MIN, i32::MAX, 0, -1, i32::MIN];
    assert_eq!(decode::<i32>(encode(&values)), values);
    let values = vec![i64::MIN, i64::MAX, 0, -1];
    assert_eq!(decode::<i64>(encode(&values)), values);
}

#[test]
fn test_empty_flush_writes_nothing() {
    assert!(encode::<i32>(&[]).is_empty());
    assert!(decode::<i32>(Vec::new()).is_empty());
}

#[test]
fn test_truncated_block_is_error() {
    let mut bytes = encode(&[1000i32, 2000, 3000]);
    bytes.pop();
    let mut decoder = ZigzagDecoder::<i32>::new(bytes);
    let mut result = Ok(None);
    for _ in 0..4 {
        result = decoder.next_value();
        if result.is_err() {
            break;
        }
    }
    assert!(result.is_err());
}

proptest! {
    #[test]
    fn test_i32_roundtrip(values in prop::collection::vec(any::<i32>(), 0..1000)) {
        prop_assert_eq!(decode::<i32>(encode(&values)), values);
    }

    #[test]
    fn test_i64_roundtrip(values in prop::collection::vec(any::<i64>(), 0..1000)) {
        prop_assert_eq!(decode::<i64>(encode(&values)), values);
    }
}
