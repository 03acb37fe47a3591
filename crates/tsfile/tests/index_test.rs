//! Shape of the metadata index tree.

use tsfile::buffer::PagedBuffer;
use tsfile::file::{MetaIndexNode, MetaIndexNodeType};
use tsfile::{
    DataType, Encoding, MeasurementSchema, MemoryFile, TimeseriesIndex, TsFileConfig,
    TsFileReader, TsFileWriter, Value,
};

/// Writes `devices` × `measurements` series with one point each.
fn write_file(config: TsFileConfig, devices: &[String], measurements: &[String]) -> Vec<u8> {
    let mut writer = TsFileWriter::new(MemoryFile::new(), config).unwrap();
    for device in devices {
        for name in measurements {
            writer
                .register_timeseries(
                    device,
                    MeasurementSchema::new(name.as_str(), DataType::Int32, Encoding::Plain),
                )
                .unwrap();
        }
        let values: Vec<(&str, Value)> = measurements
            .iter()
            .enumerate()
            .map(|(i, name)| (name.as_str(), Value::Int32(i as i32)))
            .collect();
        writer.write_record(device, 1, &values).unwrap();
    }
    writer.close().unwrap().into_bytes()
}

fn names(prefix: &str, count: usize) -> Vec<String> {
    (0..count).map(|i| format!("{}{:03}", prefix, i)).collect()
}

fn node_at(bytes: &[u8], (start, end): (i64, i64)) -> MetaIndexNode {
    let slice = bytes[start as usize..end as usize].to_vec();
    MetaIndexNode::deserialize_from(&mut PagedBuffer::wrap(slice)).unwrap()
}

fn child_ranges(node: &MetaIndexNode) -> Vec<(i64, i64)> {
    node.children
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            let end = node
                .children
                .get(i + 1)
                .map_or(node.end_offset, |next| next.offset);
            (entry.offset, end)
        })
        .collect()
}

/// Leaf measurement nodes of `device`, left to right.
fn measurement_leaves(bytes: &[u8], root: &MetaIndexNode, device: &str) -> Vec<MetaIndexNode> {
    let mut node = root.clone();
    while node.node_type != MetaIndexNodeType::LeafDevice {
        let range = node.child_range(device, false).unwrap();
        node = node_at(bytes, range);
    }
    let device_root = node_at(bytes, node.child_range(device, true).unwrap());

    let mut leaves = Vec::new();
    let mut level = vec![device_root];
    while let Some(first) = level.first() {
        if first.node_type == MetaIndexNodeType::LeafMeasurement {
            leaves = level;
            break;
        }
        level = level
            .iter()
            .flat_map(child_ranges)
            .map(|range| node_at(bytes, range))
            .collect();
    }
    leaves
}

#[test]
fn test_300_measurements_split_into_two_leaves() {
    let measurements = names("s", 300);
    let bytes = write_file(
        TsFileConfig::default(),
        &["d1".to_string()],
        &measurements,
    );
    let reader = TsFileReader::open(MemoryFile::from_bytes(bytes.clone())).unwrap();
    let root = reader.meta().meta_index.clone();

    assert_eq!(root.node_type, MetaIndexNodeType::LeafDevice);
    assert_eq!(root.children.len(), 1);
    let device_root = node_at(&bytes, root.child_range("d1", true).unwrap());
    assert_eq!(device_root.node_type, MetaIndexNodeType::InternalMeasurement);
    assert_eq!(device_root.children.len(), 2);
    assert_eq!(device_root.children[0].name, "s000");
    assert_eq!(device_root.children[1].name, "s256");

    let leaves = measurement_leaves(&bytes, &root, "d1");
    assert_eq!(leaves.len(), 2);
    assert_eq!(leaves[0].children.len(), 256);
    assert_eq!(leaves[1].children.len(), 44);
}

#[test]
fn test_leaf_entries_point_at_their_records() {
    let config = TsFileConfig::default().with_max_degree_of_index_node(4);
    let measurements = names("m", 10);
    let bytes = write_file(config, &["dev".to_string()], &measurements);
    let mut reader = TsFileReader::open(MemoryFile::from_bytes(bytes.clone())).unwrap();
    let root = reader.meta().meta_index.clone();

    let leaves = measurement_leaves(&bytes, &root, "dev");
    let entries: Vec<(String, (i64, i64))> = leaves
        .iter()
        .flat_map(|leaf| {
            leaf.children
                .iter()
                .map(|e| e.name.clone())
                .zip(child_ranges(leaf))
                .collect::<Vec<_>>()
        })
        .collect();
    assert_eq!(entries.len(), 10);

    // Records are laid out back to back.
    for pair in entries.windows(2) {
        assert_eq!(pair[0].1 .1, pair[1].1 .0);
    }
    for (i, (name, (start, end))) in entries.iter().enumerate() {
        assert_eq!(name, &measurements[i]);
        let slice = bytes[*start as usize..*end as usize].to_vec();
        let mut input = PagedBuffer::wrap(slice);
        let index = TimeseriesIndex::deserialize_from(&mut input).unwrap();
        assert_eq!(&index.measurement_name, name);
        assert_eq!(input.remaining(), 0);

        let found = reader.get_timeseries_index("dev", name).unwrap();
        assert_eq!(found.chunk_metas, index.chunk_metas);
    }
}

#[test]
fn test_leaf_count_is_ceil_of_fan_out() {
    let k = 4;
    for n in [1, 3, 4, 5, 8, 9, 17] {
        let config = TsFileConfig::default().with_max_degree_of_index_node(k);
        let bytes = write_file(config, &["d".to_string()], &names("x", n));
        let reader = TsFileReader::open(MemoryFile::from_bytes(bytes.clone())).unwrap();
        let leaves = measurement_leaves(&bytes, &reader.meta().meta_index, "d");

        assert_eq!(leaves.len(), n.div_ceil(k), "n = {}", n);
        let total: usize = leaves.iter().map(|leaf| leaf.children.len()).sum();
        assert_eq!(total, n);
        assert!(leaves.iter().all(|leaf| leaf.children.len() <= k));
    }
}

#[test]
fn test_deep_measurement_tree_lookup() {
    let config = TsFileConfig::default().with_max_degree_of_index_node(2);
    let measurements = names("s", 9);
    let bytes = write_file(config, &["d1".to_string()], &measurements);
    let mut reader = TsFileReader::open(MemoryFile::from_bytes(bytes.clone())).unwrap();

    let root = reader.meta().meta_index.clone();
    let device_root = node_at(&bytes, root.child_range("d1", true).unwrap());
    assert_eq!(device_root.node_type, MetaIndexNodeType::InternalMeasurement);
    assert!(device_root.children.len() <= 2);

    for (i, name) in measurements.iter().enumerate() {
        let points = reader.read_series("d1", name).unwrap();
        assert_eq!(points, vec![(1, Value::Int32(i as i32))]);
    }
    assert_eq!(reader.timeseries_indexes("d1").unwrap().len(), 9);
    assert!(reader.get_timeseries_index("d1", "s0095").is_err());
}

#[test]
fn test_many_devices_get_internal_root() {
    let config = TsFileConfig::default().with_max_degree_of_index_node(3);
    let devices = names("root.sg.d", 7);
    let measurements = names("s", 2);
    let bytes = write_file(config, &devices, &measurements);
    let mut reader = TsFileReader::open(MemoryFile::from_bytes(bytes)).unwrap();

    let root = &reader.meta().meta_index;
    assert_eq!(root.node_type, MetaIndexNodeType::InternalDevice);
    assert_eq!(root.children.len(), 3);
    assert_eq!(root.children[0].name, "root.sg.d000");
    assert_eq!(root.children[1].name, "root.sg.d003");
    assert_eq!(root.children[2].name, "root.sg.d006");

    assert_eq!(reader.devices().unwrap(), devices);
    for device in &devices {
        let indexes = reader.timeseries_indexes(device).unwrap();
        let found: Vec<&str> = indexes.iter().map(|i| i.measurement_name.as_str()).collect();
        assert_eq!(found, vec!["s000", "s001"]);
        assert_eq!(
            reader.read_series(device, "s001").unwrap(),
            vec![(1, Value::Int32(1))]
        );
    }
    assert!(reader.get_timeseries_index("root.sg.d007", "s000").is_err());
    assert!(reader.get_timeseries_index("a", "s000").is_err());
}

#[test]
fn test_bloom_filter_covers_every_series() {
    let devices = names("d", 5);
    let measurements = names("s", 20);
    let bytes = write_file(TsFileConfig::default(), &devices, &measurements);
    let reader = TsFileReader::open(MemoryFile::from_bytes(bytes)).unwrap();

    for device in &devices {
        for name in &measurements {
            assert!(reader.may_contain(device, name));
        }
    }
}
