//! Property tests for the paged buffer and its binary primitives.

use proptest::prelude::*;
use tsfile::buffer::PagedBuffer;
use tsfile::TsFileError;

#[derive(Debug, Clone)]
enum Item {
    I32(i32),
    I64(i64),
    VarU64(u64),
    VarI32(i32),
    Str(String),
}

fn item() -> impl Strategy<Value = Item> {
    prop_oneof![
        any::<i32>().prop_map(Item::I32),
        any::<i64>().prop_map(Item::I64),
        any::<u64>().prop_map(Item::VarU64),
        any::<i32>().prop_map(Item::VarI32),
        "[a-z0-9._]{0,40}".prop_map(Item::Str),
    ]
}

fn write_item(buf: &mut PagedBuffer, item: &Item) {
    match item {
        Item::I32(v) => buf.write_i32(*v).unwrap(),
        Item::I64(v) => buf.write_i64(*v).unwrap(),
        Item::VarU64(v) => {
            buf.write_var_u64(*v).unwrap();
        }
        Item::VarI32(v) => {
            buf.write_var_i32(*v).unwrap();
        }
        Item::Str(s) => {
            buf.write_str(s).unwrap();
        }
    }
}

fn check_item(buf: &mut PagedBuffer, item: &Item) {
    match item {
        Item::I32(v) => assert_eq!(buf.read_i32().unwrap(), *v),
        Item::I64(v) => assert_eq!(buf.read_i64().unwrap(), *v),
        Item::VarU64(v) => assert_eq!(buf.read_var_u64().unwrap(), *v),
        Item::VarI32(v) => assert_eq!(buf.read_var_i32().unwrap(), *v),
        Item::Str(s) => assert_eq!(&buf.read_str().unwrap(), s),
    }
}

#[test]
fn test_wrapped_view_matches_paged_bytes() {
    let mut buf = PagedBuffer::new(3);
    buf.write_str("root.sg.d1").unwrap();
    buf.write_i64(-2).unwrap();

    let mut wrapped = PagedBuffer::wrap(buf.to_vec());
    assert_eq!(wrapped.total_size(), buf.total_size());
    assert_eq!(wrapped.read_str().unwrap(), "root.sg.d1");
    assert_eq!(wrapped.read_i64().unwrap(), -2);
    assert!(matches!(
        wrapped.read_u8(),
        Err(TsFileError::OutOfRange { .. }) | Err(TsFileError::BufferNotEnough { .. })
    ));
}

proptest! {
    #[test]
    fn test_mixed_primitives_roundtrip(
        page_size in 1usize..64,
        items in prop::collection::vec(item(), 0..100),
    ) {
        let mut buf = PagedBuffer::new(page_size);
        for item in &items {
            write_item(&mut buf, item);
        }
        let written = buf.total_size();
        prop_assert_eq!(buf.to_vec().len(), written);

        for item in &items {
            check_item(&mut buf, item);
        }
        prop_assert_eq!(buf.remaining(), 0);
    }

    #[test]
    fn test_purge_never_loses_unread_bytes(
        page_size in 1usize..32,
        data in prop::collection::vec(any::<u8>(), 1..512),
        steps in prop::collection::vec(1usize..40, 1..20),
    ) {
        let mut buf = PagedBuffer::new(page_size);
        buf.write(&data).unwrap();

        let mut read = Vec::new();
        for step in steps {
            let len = step.min(buf.remaining());
            read.extend(buf.read_vec(len).unwrap());
            buf.purge_prev_pages(usize::MAX);
            if buf.remaining() == 0 {
                break;
            }
        }
        let rest = buf.remaining();
        read.extend(buf.read_vec(rest).unwrap());
        prop_assert_eq!(read, data);
    }
}
