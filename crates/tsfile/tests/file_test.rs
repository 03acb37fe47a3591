//! End-to-end tests: write a file, reopen it, read it back.

use tempfile::tempdir;
use tsfile::file::{CHUNK_HEADER_MARKER, MAGIC_STRING, ONLY_ONE_PAGE_CHUNK_HEADER_MARKER};
use tsfile::{
    CompressionType, DataType, Encoding, MeasurementSchema, MemoryFile, TsFileConfig, TsFileError,
    TsFileReader, TsFileWriter, Value,
};

fn schema(name: &str, data_type: DataType, encoding: Encoding) -> MeasurementSchema {
    MeasurementSchema::new(name, data_type, encoding)
}

fn write_memory<F>(config: TsFileConfig, build: F) -> Vec<u8>
where
    F: FnOnce(&mut TsFileWriter<MemoryFile>),
{
    let mut writer = TsFileWriter::new(MemoryFile::new(), config).unwrap();
    build(&mut writer);
    writer.close().unwrap().into_bytes()
}

fn open_memory(bytes: Vec<u8>, config: &TsFileConfig) -> TsFileReader<MemoryFile> {
    TsFileReader::open_with_config(MemoryFile::from_bytes(bytes), config).unwrap()
}

#[test]
fn test_local_file_three_series_five_pages() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("d1.tsfile");
    let config = TsFileConfig::default().with_page_max_point_num(1000);

    let mut writer = TsFileWriter::create(&path, config).unwrap();
    writer
        .register_timeseries("d1", schema("s1", DataType::Int64, Encoding::Zigzag))
        .unwrap();
    writer
        .register_timeseries("d1", schema("s2", DataType::Double, Encoding::Gorilla))
        .unwrap();
    writer
        .register_timeseries("d1", schema("s3", DataType::Int32, Encoding::Plain))
        .unwrap();
    for t in 0..5000i64 {
        writer
            .write_record(
                "d1",
                t,
                &[
                    ("s1", Value::Int64(t * 3 - 7000)),
                    ("s2", Value::Double(t as f64 * 0.5)),
                    ("s3", Value::Int32((t % 17) as i32)),
                ],
            )
            .unwrap();
    }
    writer.close().unwrap();

    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(&bytes[..6], MAGIC_STRING);
    assert_eq!(&bytes[bytes.len() - 6..], &bytes[..6]);

    let mut reader = TsFileReader::open_path(&path).unwrap();
    assert_eq!(reader.devices().unwrap(), vec!["d1".to_string()]);

    for name in ["s1", "s2", "s3"] {
        let index = reader.get_timeseries_index("d1", name).unwrap();
        assert_eq!(index.statistic.count(), 5000);
        assert_eq!(index.statistic.start_time(), 0);
        assert_eq!(index.statistic.end_time(), 4999);
        assert_eq!(index.chunk_metas.len(), 1);

        let chunks = reader.read_chunks(&index).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].header.chunk_type, CHUNK_HEADER_MARKER);
        assert_eq!(chunks[0].header.num_of_pages, 5);
        for page in &chunks[0].pages {
            assert_eq!(page.header.statistic.as_ref().unwrap().count(), 1000);
        }
    }

    let s1 = reader.read_series("d1", "s1").unwrap();
    assert_eq!(s1.len(), 5000);
    assert_eq!(s1[0], (0, Value::Int64(-7000)));
    assert_eq!(s1[4999], (4999, Value::Int64(4999 * 3 - 7000)));

    let s2 = reader.read_series("d1", "s2").unwrap();
    assert_eq!(s2[1234], (1234, Value::Double(617.0)));

    let s3 = reader.read_series("d1", "s3").unwrap();
    assert!(s3.iter().all(|(t, v)| *v == Value::Int32((t % 17) as i32)));
}

#[test]
fn test_existing_path_is_not_overwritten() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("taken.tsfile");
    std::fs::write(&path, b"keep").unwrap();

    assert!(TsFileWriter::create(&path, TsFileConfig::default()).is_err());
    assert_eq!(std::fs::read(&path).unwrap(), b"keep");
}

#[test]
fn test_single_page_chunk_has_no_page_statistic() {
    let bytes = write_memory(TsFileConfig::default(), |w| {
        w.register_timeseries("d1", schema("s1", DataType::Float, Encoding::Gorilla))
            .unwrap();
        for t in 0..10 {
            w.write("d1", "s1", t, Value::Float(t as f32)).unwrap();
        }
    });
    let mut reader = open_memory(bytes, &TsFileConfig::default());
    let index = reader.get_timeseries_index("d1", "s1").unwrap();
    let chunk = reader.read_chunk(&index.chunk_metas[0]).unwrap();

    assert_eq!(chunk.header.chunk_type, ONLY_ONE_PAGE_CHUNK_HEADER_MARKER);
    assert_eq!(chunk.pages.len(), 1);
    assert!(chunk.pages[0].header.statistic.is_none());
    assert_eq!(index.statistic.count(), 10);
    assert_eq!(index.statistic.last_value(), Some(Value::Float(9.0)));
}

#[test]
fn test_every_flush_adds_a_chunk() {
    let bytes = write_memory(TsFileConfig::default(), |w| {
        w.register_timeseries("d1", schema("s1", DataType::Int32, Encoding::Zigzag))
            .unwrap();
        for batch in 0..3i64 {
            for t in batch * 100..batch * 100 + 100 {
                w.write("d1", "s1", t, Value::Int32(t as i32)).unwrap();
            }
            w.flush().unwrap();
        }
    });
    let mut reader = open_memory(bytes, &TsFileConfig::default());
    let index = reader.get_timeseries_index("d1", "s1").unwrap();

    assert_eq!(index.chunk_metas.len(), 3);
    assert_eq!(index.statistic.count(), 300);
    assert_eq!(index.statistic.sum(), Some((0..300).sum::<i64>() as f64));
    let offsets: Vec<i64> = index
        .chunk_metas
        .iter()
        .map(|m| m.offset_of_chunk_header)
        .collect();
    assert!(offsets.windows(2).all(|w| w[0] < w[1]));

    let points = reader.read_series("d1", "s1").unwrap();
    assert_eq!(points.len(), 300);
    assert!(points.iter().all(|(t, v)| *v == Value::Int32(*t as i32)));
}

#[test]
fn test_aligned_device_roundtrip_with_nulls() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("aligned.tsfile");
    let config = TsFileConfig::default().with_page_max_point_num(7);

    let mut writer = TsFileWriter::create(&path, config).unwrap();
    writer
        .register_aligned_timeseries(
            "root.a",
            vec![
                schema("temp", DataType::Float, Encoding::Gorilla),
                schema("on", DataType::Boolean, Encoding::Plain),
                schema("n", DataType::Int32, Encoding::Zigzag),
            ],
        )
        .unwrap();
    for t in 0..30i64 {
        let mut values = vec![("temp", Value::Float(t as f32 / 2.0))];
        if t % 2 == 0 {
            values.push(("on", Value::Boolean(t % 4 == 0)));
        }
        if t % 3 == 0 {
            values.push(("n", Value::Int32(-(t as i32))));
        }
        writer.write_record("root.a", 1000 + t, &values).unwrap();
    }
    writer.close().unwrap();

    let mut reader = TsFileReader::open_path(&path).unwrap();
    let aligned = reader.read_aligned("root.a").unwrap();
    assert_eq!(aligned.measurements, vec!["n", "on", "temp"]);
    assert_eq!(aligned.rows.len(), 30);
    for (i, (time, row)) in aligned.rows.iter().enumerate() {
        let t = i as i64;
        assert_eq!(*time, 1000 + t);
        let n = (t % 3 == 0).then(|| Value::Int32(-(t as i32)));
        let on = (t % 2 == 0).then(|| Value::Boolean(t % 4 == 0));
        assert_eq!(row, &vec![n, on, Some(Value::Float(t as f32 / 2.0))]);
    }

    let on = reader.read_series("root.a", "on").unwrap();
    assert_eq!(on.len(), 15);
    assert_eq!(on[1], (1002, Value::Boolean(false)));

    let time_index = reader.get_timeseries_index("root.a", "").unwrap();
    assert_eq!(time_index.data_type, DataType::Vector);
    assert_eq!(time_index.statistic.count(), 30);
    assert!(matches!(
        reader.read_series("root.a", ""),
        Err(TsFileError::InvalidArg(_))
    ));
}

#[test]
fn test_all_null_value_column_is_kept() {
    let bytes = write_memory(TsFileConfig::default(), |w| {
        w.register_aligned_timeseries(
            "d1",
            vec![
                schema("a", DataType::Int64, Encoding::Gorilla),
                schema("b", DataType::Double, Encoding::Plain),
            ],
        )
        .unwrap();
        for t in 0..5 {
            w.write("d1", "a", t, Value::Int64(t)).unwrap();
        }
    });
    let mut reader = open_memory(bytes, &TsFileConfig::default());
    let aligned = reader.read_aligned("d1").unwrap();

    assert_eq!(aligned.measurements, vec!["a", "b"]);
    assert!(aligned.rows.iter().all(|(_, row)| row[1].is_none()));
    assert!(reader.read_series("d1", "b").unwrap().is_empty());
}

#[test]
fn test_every_compression_and_time_encoding() {
    let compressions = [
        CompressionType::Uncompressed,
        CompressionType::Snappy,
        CompressionType::Gzip,
        CompressionType::Lz4,
    ];
    let time_encodings = [Encoding::Plain, Encoding::Gorilla, Encoding::Zigzag];
    let series = [
        ("bool", DataType::Boolean, Encoding::Plain),
        ("i32", DataType::Int32, Encoding::Gorilla),
        ("i64", DataType::Int64, Encoding::Plain),
        ("f32", DataType::Float, Encoding::Plain),
        ("f64", DataType::Double, Encoding::Gorilla),
    ];
    let value = |data_type: DataType, t: i64| match data_type {
        DataType::Boolean => Value::Boolean(t % 3 == 0),
        DataType::Int32 => Value::Int32(t as i32 * 11),
        DataType::Int64 => Value::Int64(t * t),
        DataType::Float => Value::Float(t as f32 * 0.25),
        _ => Value::Double(t as f64 / 3.0),
    };

    for compression in compressions {
        for time_encoding in time_encodings {
            let config = TsFileConfig::default()
                .with_page_max_point_num(64)
                .with_time_encoding(time_encoding)
                .with_time_compression(compression);
            let bytes = write_memory(config.clone(), |w| {
                for (name, data_type, encoding) in series {
                    w.register_timeseries(
                        "dev",
                        schema(name, data_type, encoding).with_compression(compression),
                    )
                    .unwrap();
                }
                w.register_aligned_timeseries(
                    "aligned",
                    vec![schema("x", DataType::Int64, Encoding::Zigzag)
                        .with_compression(compression)],
                )
                .unwrap();
                for t in 0..200i64 {
                    let values: Vec<(&str, Value)> = series
                        .iter()
                        .map(|&(name, data_type, _)| (name, value(data_type, t)))
                        .collect();
                    w.write_record("dev", 5000 + t * 7, &values).unwrap();
                    w.write("aligned", "x", t, Value::Int64(-t)).unwrap();
                }
            });

            let mut reader = open_memory(bytes, &config);
            for (name, data_type, _) in series {
                let points = reader.read_series("dev", name).unwrap();
                assert_eq!(points.len(), 200, "{:?}/{:?}/{}", compression, time_encoding, name);
                for (i, (time, v)) in points.iter().enumerate() {
                    let t = i as i64;
                    assert_eq!(*time, 5000 + t * 7);
                    assert_eq!(*v, value(data_type, t));
                }
            }
            let x = reader.read_series("aligned", "x").unwrap();
            assert_eq!(x.len(), 200);
            assert_eq!(x[199], (199, Value::Int64(-199)));
        }
    }
}

#[test]
fn test_missing_series_and_devices() {
    let bytes = write_memory(TsFileConfig::default(), |w| {
        w.register_timeseries("d1", schema("s1", DataType::Int64, Encoding::Plain))
            .unwrap();
        w.write("d1", "s1", 1, Value::Int64(1)).unwrap();
    });
    let mut reader = open_memory(bytes, &TsFileConfig::default());

    assert!(reader.may_contain("d1", "s1"));
    assert!(matches!(
        reader.get_timeseries_index("d1", "s2"),
        Err(TsFileError::NotFound(_))
    ));
    assert!(matches!(
        reader.get_timeseries_index("d9", "s1"),
        Err(TsFileError::NotFound(_))
    ));
    assert!(matches!(
        reader.read_aligned("d1"),
        Err(TsFileError::NotFound(_))
    ));
}

#[test]
fn test_file_without_data_is_readable() {
    let bytes = write_memory(TsFileConfig::default(), |_| {});
    let mut reader = open_memory(bytes, &TsFileConfig::default());
    assert!(reader.devices().unwrap().is_empty());
    assert!(reader.meta().meta_index.children.is_empty());
}

#[test]
fn test_plan_index_range_is_recorded() {
    let mut writer = TsFileWriter::new(MemoryFile::new(), TsFileConfig::default()).unwrap();
    writer.set_plan_index_range(3, 42);
    let bytes = writer.close().unwrap().into_bytes();

    let reader = open_memory(bytes.clone(), &TsFileConfig::default());
    // OPERATION_INDEX_RANGE marker, min, max, then the separator at meta_offset.
    let meta_offset = reader.meta().meta_offset as usize;
    assert_eq!(bytes[meta_offset - 17], 4);
    let min = i64::from_be_bytes(bytes[meta_offset - 16..meta_offset - 8].try_into().unwrap());
    let max = i64::from_be_bytes(bytes[meta_offset - 8..meta_offset].try_into().unwrap());
    assert_eq!((min, max), (3, 42));
    assert_eq!(bytes[meta_offset], 2);
}

#[test]
fn test_bad_header_and_footer() {
    let good = write_memory(TsFileConfig::default(), |w| {
        w.register_timeseries("d1", schema("s1", DataType::Int64, Encoding::Plain))
            .unwrap();
        w.write("d1", "s1", 1, Value::Int64(1)).unwrap();
    });
    let open = |bytes: Vec<u8>| TsFileReader::open(MemoryFile::from_bytes(bytes)).map(|_| ());

    let mut bad_head = good.clone();
    bad_head[0] = b'X';
    assert!(matches!(open(bad_head), Err(TsFileError::InvalidMagic(_))));

    let mut bad_version = good.clone();
    bad_version[6] = 3;
    assert!(matches!(
        open(bad_version),
        Err(TsFileError::UnsupportedVersion(3))
    ));

    let mut bad_tail = good.clone();
    let last = bad_tail.len() - 1;
    bad_tail[last] = b'X';
    assert!(matches!(open(bad_tail), Err(TsFileError::InvalidMagic(_))));

    let mut huge_meta = good.clone();
    let size_at = huge_meta.len() - 10;
    huge_meta[size_at..size_at + 4].copy_from_slice(&u32::MAX.to_be_bytes());
    assert!(matches!(open(huge_meta), Err(TsFileError::Corrupted(_))));

    assert!(matches!(
        open(b"TsFile\x04".to_vec()),
        Err(TsFileError::Corrupted(_))
    ));
}
