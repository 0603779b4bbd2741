//! # Row Container Integration Tests
//!
//! End-to-end scenarios over the public API:
//!
//! 1. Scalar grouping: hash equality and comparison over fixed keys
//! 2. Nullable keys: null ordering and variable-size inspection
//! 3. Serialization: whole-row round trip including multipart strings
//! 4. Erase and reuse: free-list LIFO and column statistics
//! 5. Partition listing: sealed scan with resumption across batches
//! 6. NaN handling: hash collapse and total order
//! 7. Sorting: RowComparator over rows and decoded tuples

use std::sync::Arc;

use rowpack::{
    CompareFlags, DataType, DecodedVector, MemoryBudget, RowComparator, RowContainer,
    RowContainerIterator, RowContainerOptions, RowPtr, SortOrder, Value,
};

fn budget() -> Arc<MemoryBudget> {
    Arc::new(MemoryBudget::unlimited())
}

fn decoded(data_type: DataType, values: Vec<Value>) -> DecodedVector {
    DecodedVector::new(data_type, values).unwrap()
}

fn insert_rows(container: &mut RowContainer, columns: &[DecodedVector]) -> Vec<RowPtr> {
    let count = columns[0].len();
    let mut rows = Vec::with_capacity(count);
    for index in 0..count {
        let row = container.new_row().unwrap();
        for (column, values) in columns.iter().enumerate() {
            container.store(values, index, row, column).unwrap();
        }
        rows.push(row);
    }
    rows
}

// ============================================================================
// 1. Simple scalar grouping
// ============================================================================

#[test]
fn scalar_keys_group_by_hash() {
    let mut container = RowContainer::new(
        vec![DataType::Int4, DataType::Int4],
        false,
        vec![],
        vec![],
        RowContainerOptions::default(),
        budget(),
    );
    let first = decoded(
        DataType::Int4,
        vec![Value::Int4(1), Value::Int4(3), Value::Int4(1)],
    );
    let second = decoded(
        DataType::Int4,
        vec![Value::Int4(2), Value::Int4(4), Value::Int4(2)],
    );
    let rows = insert_rows(&mut container, &[first, second]);

    assert_eq!(container.fixed_row_size() % 8, 0);

    let mut hashes = vec![0u64; 3];
    container.hash(0, &rows, false, &mut hashes);
    container.hash(1, &rows, true, &mut hashes);

    // Rows 1 and 3 carry the same key and must collide exactly.
    let mut groups: hashbrown::HashMap<u64, Vec<usize>> = hashbrown::HashMap::new();
    for (index, &hash) in hashes.iter().enumerate() {
        groups.entry(hash).or_default().push(index);
    }
    assert_eq!(groups.len(), 2);
    assert_eq!(groups[&hashes[0]], vec![0, 2]);

    let flags = CompareFlags::default();
    assert_eq!(
        container.compare_rows(rows[0], rows[2], 0, flags),
        std::cmp::Ordering::Equal
    );
    assert_eq!(
        container.compare_rows(rows[0], rows[1], 0, flags),
        std::cmp::Ordering::Less
    );
}

// ============================================================================
// 2. Nullable keys
// ============================================================================

#[test]
fn nullable_keys_order_nulls_first() {
    let mut container = RowContainer::new(
        vec![DataType::Text, DataType::Int8],
        true,
        vec![],
        vec![],
        RowContainerOptions::default(),
        budget(),
    );
    let texts = decoded(
        DataType::Text,
        vec![Value::Text("ab".into()), Value::Text("ab".into())],
    );
    let numbers = decoded(DataType::Int8, vec![Value::Null, Value::Int8(5)]);
    let rows = insert_rows(&mut container, &[texts, numbers]);

    assert_eq!(container.variable_size_at(rows[0], 0), 2);
    assert_eq!(container.variable_size_at(rows[1], 0), 2);
    assert!(container.is_null_at(rows[0], 1));
    assert!(!container.is_null_at(rows[1], 1));

    let flags = CompareFlags {
        nulls_first: true,
        ascending: true,
        ..CompareFlags::default()
    };
    assert_eq!(
        container.compare_rows(rows[0], rows[1], 1, flags),
        std::cmp::Ordering::Less
    );

    // With nulls last the order flips.
    let flags = CompareFlags {
        nulls_first: false,
        ..flags
    };
    assert_eq!(
        container.compare_rows(rows[0], rows[1], 1, flags),
        std::cmp::Ordering::Greater
    );
}

// ============================================================================
// 3. Serialization round trip
// ============================================================================

#[test]
fn kilobyte_string_serializes_and_reloads() {
    let mut container = RowContainer::new(
        vec![DataType::Text],
        false,
        vec![],
        vec![],
        RowContainerOptions::default(),
        budget(),
    );
    let payload: String = (0..1024).map(|i| (b'a' + (i % 26) as u8) as char).collect();
    let values = decoded(DataType::Text, vec![Value::Text(payload.clone())]);
    let rows = insert_rows(&mut container, &[values]);

    let serialized = container.extract_serialized_rows(&rows);
    assert_eq!(serialized.len(), 1);
    assert_eq!(
        serialized.row(0).len(),
        container.layout().flag_bytes() + 4 + 1024
    );

    let reloaded = container.new_row().unwrap();
    container
        .store_serialized_row(serialized.row(0), reloaded)
        .unwrap();

    let mut hashes = vec![0u64; 2];
    container.hash(0, &[rows[0], reloaded], false, &mut hashes);
    assert_eq!(hashes[0], hashes[1]);
    assert_eq!(
        container.extract_column(&[reloaded], 0).unwrap(),
        vec![Value::Text(payload)]
    );
}

#[test]
fn serialized_rows_observably_equal_originals() {
    let mut container = RowContainer::new(
        vec![DataType::Int4, DataType::Text],
        true,
        vec![],
        vec![DataType::Float8, DataType::Array],
        RowContainerOptions::default(),
        budget(),
    );
    let keys = decoded(
        DataType::Int4,
        vec![Value::Int4(7), Value::Null, Value::Int4(-1)],
    );
    let texts = decoded(
        DataType::Text,
        vec![
            Value::Text("short".into()),
            Value::Text("x".repeat(600)),
            Value::Null,
        ],
    );
    let floats = decoded(
        DataType::Float8,
        vec![
            Value::Float8(2.5),
            Value::Null,
            Value::Float8(f64::NEG_INFINITY),
        ],
    );
    let arrays = decoded(
        DataType::Array,
        vec![
            Value::Array(vec![Value::Int8(1), Value::Null]),
            Value::Array(vec![]),
            Value::Null,
        ],
    );
    let rows = insert_rows(&mut container, &[keys, texts, floats, arrays]);

    let serialized = container.extract_serialized_rows(&rows);
    let mut reloaded = Vec::new();
    for index in 0..serialized.len() {
        let row = container.new_row().unwrap();
        container
            .store_serialized_row(serialized.row(index), row)
            .unwrap();
        reloaded.push(row);
    }

    let flags = CompareFlags::default();
    for column in 0..4 {
        let mut original_hashes = vec![0u64; rows.len()];
        let mut reloaded_hashes = vec![0u64; rows.len()];
        container.hash(column, &rows, false, &mut original_hashes);
        container.hash(column, &reloaded, false, &mut reloaded_hashes);
        assert_eq!(original_hashes, reloaded_hashes, "column {column}");

        for index in 0..rows.len() {
            assert_eq!(
                container.compare_rows(rows[index], reloaded[index], column, flags),
                std::cmp::Ordering::Equal,
                "row {index} column {column}"
            );
        }
        assert_eq!(
            container.extract_column(&rows, column).unwrap(),
            container.extract_column(&reloaded, column).unwrap(),
            "column {column}"
        );
    }
}

// ============================================================================
// 4. Erase and reuse
// ============================================================================

#[test]
fn erase_then_reuse_is_lifo() {
    let mut container = RowContainer::new(
        vec![DataType::Int8],
        false,
        vec![],
        vec![],
        RowContainerOptions::default(),
        budget(),
    );
    let values = decoded(DataType::Int8, (0..4).map(Value::Int8).collect());
    let rows = insert_rows(&mut container, &[values]);

    container.erase_rows(&[rows[1], rows[2]]);
    assert_eq!(container.num_free_rows(), 2);

    let reused = container.new_row().unwrap();
    assert_eq!(reused, rows[2]);
    assert_eq!(container.num_free_rows(), 1);

    let single = decoded(DataType::Int8, vec![Value::Int8(40)]);
    container.store(&single, 0, reused, 0).unwrap();
    assert_eq!(container.column_stats(0).non_null_count(), 3);
}

// ============================================================================
// 5. Partition listing
// ============================================================================

#[test]
fn partition_listing_resumes_without_duplicates() {
    let mut container = RowContainer::new(
        vec![DataType::Int4],
        false,
        vec![],
        vec![],
        RowContainerOptions::default(),
        budget(),
    );
    let values = decoded(DataType::Int4, (0..100).map(Value::Int4).collect());
    let rows = insert_rows(&mut container, &[values]);

    let mut partitions = container.create_row_partitions().unwrap();
    let ids: Vec<u8> = (0..100).map(|i| (i % 4) as u8).collect();
    partitions.append_partitions(&ids);

    let expected: Vec<RowPtr> = (0..100).filter(|i| i % 4 == 2).map(|i| rows[i]).collect();
    assert_eq!(expected.len(), 25);

    let mut iter = RowContainerIterator::default();
    let mut listed = Vec::new();
    let mut batches = Vec::new();
    loop {
        let mut batch = Vec::new();
        let count = container.list_partition_rows(&mut iter, 2, 10, &partitions, &mut batch);
        if count == 0 {
            break;
        }
        batches.push(count);
        listed.extend(batch);
    }
    assert_eq!(batches, vec![10, 10, 5]);
    assert_eq!(listed, expected);
}

#[test]
fn every_partition_is_scanned_exhaustively() {
    let mut container = RowContainer::new(
        vec![DataType::Int4],
        false,
        vec![],
        vec![],
        RowContainerOptions::default(),
        budget(),
    );
    let count = 1000;
    let values = decoded(DataType::Int4, (0..count).map(Value::Int4).collect());
    let rows = insert_rows(&mut container, &[values]);

    let mut partitions = container.create_row_partitions().unwrap();
    let ids: Vec<u8> = (0..count).map(|i| (i % 7) as u8).collect();
    partitions.append_partitions(&ids);

    let mut seen = Vec::new();
    for partition in 0..7u8 {
        let mut iter = RowContainerIterator::default();
        let mut batch = Vec::new();
        while container.list_partition_rows(&mut iter, partition, 37, &partitions, &mut batch) > 0
        {
            seen.extend(batch.drain(..));
        }
    }
    assert_eq!(seen.len(), count as usize);

    let mut seen_sorted: Vec<usize> = seen.iter().map(|&r| r as usize).collect();
    seen_sorted.sort_unstable();
    let mut expected: Vec<usize> = rows.iter().map(|&r| r as usize).collect();
    expected.sort_unstable();
    assert_eq!(seen_sorted, expected);
}

// ============================================================================
// 6. NaN handling
// ============================================================================

#[test]
fn nan_keys_hash_and_compare_equal() {
    let mut container = RowContainer::new(
        vec![DataType::Float8],
        false,
        vec![],
        vec![],
        RowContainerOptions::default(),
        budget(),
    );
    let quiet = f64::NAN;
    let payload = f64::from_bits(f64::NAN.to_bits() | 0xbeef);
    assert_ne!(quiet.to_bits(), payload.to_bits());

    let values = decoded(
        DataType::Float8,
        vec![Value::Float8(quiet), Value::Float8(payload)],
    );
    let rows = insert_rows(&mut container, &[values]);

    let mut hashes = vec![0u64; 2];
    container.hash(0, &rows, false, &mut hashes);
    assert_eq!(hashes[0], hashes[1]);
    assert_eq!(
        container.compare_rows(rows[0], rows[1], 0, CompareFlags::default()),
        std::cmp::Ordering::Equal
    );
}

// ============================================================================
// 7. Sorting with RowComparator
// ============================================================================

#[test]
fn comparator_sorts_rows_with_mixed_directions() {
    let mut container = RowContainer::new(
        vec![DataType::Int4, DataType::Text],
        true,
        vec![],
        vec![],
        RowContainerOptions::default(),
        budget(),
    );
    let numbers = decoded(
        DataType::Int4,
        vec![Value::Int4(2), Value::Int4(1), Value::Null, Value::Int4(1)],
    );
    let texts = decoded(
        DataType::Text,
        vec![
            Value::Text("a".into()),
            Value::Text("b".into()),
            Value::Text("c".into()),
            Value::Text("a".into()),
        ],
    );
    let rows = insert_rows(&mut container, &[numbers, texts]);

    // Ascending nulls-first on the number, descending on the text.
    let comparator = RowComparator::new(
        &container,
        &[0, 1],
        &[SortOrder::asc_nulls_first(), SortOrder::desc_nulls_last()],
    );
    let mut sorted = rows.clone();
    sorted.sort_by(|&a, &b| comparator.compare(a, b));
    assert_eq!(sorted, vec![rows[2], rows[1], rows[3], rows[0]]);
}

#[test]
fn comparator_orders_decoded_tuples_against_rows() {
    let mut container = RowContainer::new(
        vec![DataType::Int8],
        true,
        vec![],
        vec![],
        RowContainerOptions::default(),
        budget(),
    );
    let values = decoded(DataType::Int8, vec![Value::Int8(10)]);
    let rows = insert_rows(&mut container, &[values]);

    let comparator = RowComparator::new(&container, &[0], &[SortOrder::asc_nulls_first()]);
    let probe = vec![decoded(
        DataType::Int8,
        vec![Value::Int8(5), Value::Int8(10), Value::Int8(20)],
    )];
    assert!(comparator.is_less_decoded(&probe, 0, rows[0]));
    assert_eq!(
        comparator.compare_decoded(&probe, 1, rows[0]),
        std::cmp::Ordering::Equal
    );
    assert_eq!(
        comparator.compare_decoded(&probe, 2, rows[0]),
        std::cmp::Ordering::Greater
    );
}
