//! # Row Container
//!
//! Dense, append-only row store for query execution: group-by tables,
//! hash-join build sides, order-by and spill pipelines address rows by raw
//! pointer and hash/compare them at vector speed.
//!
//! ## Row Layout
//!
//! Every row is a fixed-stride byte region; offsets are computed once by
//! the [`layout`] planner:
//!
//! ```text
//! +--------+-----+-------------+--------------+------------+----------+--------+
//! | keys   | pad | flag bytes  | accumulators | dependents | row size | next   |
//! +--------+-----+-------------+--------------+------------+----------+--------+
//! ```
//!
//! Variable-width values (text, blob, serialized array/struct/map) live in
//! the [`StringHeap`](crate::heap::StringHeap); rows hold 16-byte views.
//! Rows allocated while normalized keys are active carry an 8-byte prehash
//! immediately before the row pointer.
//!
//! ## Lifecycle
//!
//! A row is born from `new_row` (popped from the free list or bump
//! allocated), initialized to zeroed flags, mutated by `store` per column,
//! then read, hashed, compared or iterated. `erase_rows` releases heap
//! payloads, destroys accumulators, updates column stats and threads the
//! row onto the free list; the free bit disambiguates the aliased link.
//! `clear` drops arena and heap wholesale.
//!
//! ## Sealing
//!
//! `create_row_partitions` flips the container immutable; afterwards the
//! only legal mutation is setting the probed bit, which uses a relaxed
//! atomic OR so concurrent probe threads may share rows.
//!
//! ## Thread Safety
//!
//! Not thread-safe for mutation. One producer builds the container; after
//! sealing, readers may iterate and hash/compare concurrently on disjoint
//! row sets.

pub mod comparator;
pub mod iter;
pub mod layout;
pub mod serialize;


pub use comparator::RowComparator;
pub use iter::{RowContainerIterator, RowPartitions};
pub use layout::{AccumulatorColumn, ColumnStats, RowColumn, RowLayout};
pub use serialize::SerializedRows;

use std::cmp::Ordering;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering as MemoryOrdering};
use std::sync::Arc;

use eyre::{ensure, Result, WrapErr};

use crate::accumulator::Accumulator;
use crate::config::{CLEAR_BATCH_SIZE, GROWTH_UNIT};
use crate::heap::{HeapView, StringHeap, StringView};
use crate::memory::{MemoryBudget, RowArena};
use crate::rowserde;
use crate::types::{
    compare_f64, hash_bytes, hash_f32, hash_f64, hash_i64, hash_mix, CompareFlags, DataType,
    Value, NULL_HASH,
};
use crate::vector::DecodedVector;
use crate::RowPtr;

use layout::round_up;

/// Feature switches fixed at construction.
#[derive(Debug, Clone, Copy, Default)]
pub struct RowContainerOptions {
    /// Reserve a next-row pointer for hash-join build chaining.
    pub has_next: bool,
    /// Reserve a probed bit for join probe marking.
    pub has_probed_flag: bool,
    /// Reserve an 8-byte prehash digest before each row.
    pub has_normalized_keys: bool,
}

pub struct RowContainer {
    key_types: Vec<DataType>,
    nullable_keys: bool,
    accumulators: Vec<Accumulator>,
    /// Keys followed by dependents; accumulators are not columns.
    types: Vec<DataType>,
    layout: RowLayout,
    /// Bytes currently reserved per new row for the prehash prefix. Drops
    /// to zero after `disable_normalized_keys`.
    normalized_key_size: usize,
    arena: RowArena,
    heap: StringHeap,
    budget: Arc<MemoryBudget>,
    first_free_row: *mut u8,
    num_rows: usize,
    num_free_rows: usize,
    num_rows_with_normalized_key: usize,
    column_stats: Vec<ColumnStats>,
    mutable: bool,
}

impl RowContainer {
    pub fn new(
        key_types: Vec<DataType>,
        nullable_keys: bool,
        accumulators: Vec<Accumulator>,
        dependent_types: Vec<DataType>,
        options: RowContainerOptions,
        budget: Arc<MemoryBudget>,
    ) -> Self {
        let layout = RowLayout::plan(
            &key_types,
            nullable_keys,
            &accumulators,
            &dependent_types,
            options.has_next,
            options.has_probed_flag,
            options.has_normalized_keys,
        );
        let mut types = key_types.clone();
        types.extend(dependent_types);
        let column_stats = vec![ColumnStats::default(); types.len()];
        let normalized_key_size = layout.normalized_key_size;
        Self {
            key_types,
            nullable_keys,
            accumulators,
            types,
            layout,
            normalized_key_size,
            arena: RowArena::new(budget.clone()),
            heap: StringHeap::new(budget.clone()),
            budget,
            first_free_row: std::ptr::null_mut(),
            num_rows: 0,
            num_free_rows: 0,
            num_rows_with_normalized_key: 0,
            column_stats,
            mutable: true,
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Allocates an initialized row: popped from the free list when one is
    /// available, bump-allocated otherwise. On failure the container is
    /// unchanged.
    pub fn new_row(&mut self) -> Result<RowPtr> {
        assert!(self.mutable, "can't add row into a sealed row container");
        let row = if self.first_free_row.is_null() {
            let total = self.layout.fixed_row_size + self.normalized_key_size;
            let base = self.arena.allocate_fixed(total, self.layout.alignment)?;
            if self.normalized_key_size > 0 {
                self.num_rows_with_normalized_key += 1;
            }
            unsafe { base.add(self.normalized_key_size) }
        } else {
            let row = self.first_free_row;
            assert!(is_bit_set(row, self.layout.free_flag_bit));
            self.first_free_row = self.next_free(row);
            self.num_free_rows -= 1;
            row
        };
        self.num_rows += 1;
        // Erased rows already released their payloads, so both paths
        // initialize without the reuse pass.
        Ok(self.initialize_row(row, false))
    }

    /// Resets a row to the freshly-allocated state: no nulls set, no
    /// accumulator initialized, zero variable size, free bit clear.
    /// `reuse` first releases payloads and accumulator state still held by
    /// the slot; pass it when recycling a live row in place.
    pub fn initialize_row(&mut self, row: RowPtr, reuse: bool) -> RowPtr {
        if reuse {
            let rows = [row];
            self.free_variable_width_fields(&rows);
            self.free_aggregates(&rows);
            assert!(
                self.layout.next_offset.is_none(),
                "can't reuse rows in a container with next-row pointers"
            );
        } else if self.layout.row_size_offset.is_some() {
            // Zero the whole fixed area so erase and clear never interpret
            // stale bytes as live heap views.
            unsafe { std::ptr::write_bytes(row, 0, self.layout.fixed_row_size) };
        }
        // One memset covers key/dependent null bits, accumulator flag
        // pairs, the probed bit and the free bit.
        unsafe {
            std::ptr::write_bytes(row.add(self.layout.flags_offset), 0, self.layout.flag_bytes)
        };
        if let Some(offset) = self.layout.row_size_offset {
            unsafe { set_value_at::<u32>(row, offset, 0) };
        }
        clear_bit(row, self.layout.free_flag_bit);
        row
    }

    /// Releases the given rows: frees heap payloads, destroys
    /// accumulators, updates column stats and pushes each row onto the
    /// free list (LIFO). Erasing a row twice is a programming error.
    pub fn erase_rows(&mut self, rows: &[RowPtr]) {
        assert!(self.mutable, "can't erase rows from a sealed row container");
        self.free_rows_extra_memory(rows);
        for &row in rows {
            assert!(
                !is_bit_set(row, self.layout.free_flag_bit),
                "double free of row"
            );
            self.remove_row_column_stats(row, false);
            set_bit(row, self.layout.free_flag_bit);
            self.set_next_free(row, self.first_free_row);
            self.first_free_row = row;
        }
        self.num_free_rows += rows.len();
    }

    /// Drops every row and all heap state. When accumulators hold external
    /// memory, live rows are walked in batches and destroyed first.
    pub fn clear(&mut self) {
        if self.layout.uses_external_memory {
            let mut iter = RowContainerIterator::default();
            let mut rows: Vec<RowPtr> = Vec::with_capacity(CLEAR_BATCH_SIZE);
            loop {
                let found = self.list_rows(&mut iter, CLEAR_BATCH_SIZE, &mut rows);
                if found == 0 {
                    break;
                }
                self.free_rows_extra_memory(&rows);
                rows.clear();
            }
        }
        self.arena.clear();
        self.heap.clear();
        self.num_rows = 0;
        self.num_free_rows = 0;
        self.num_rows_with_normalized_key = 0;
        self.normalized_key_size = self.layout.normalized_key_size;
        self.first_free_row = std::ptr::null_mut();
        for stats in &mut self.column_stats {
            *stats = ColumnStats::default();
        }
    }

    /// Sets every column of a live row to null, updating stats as an
    /// update-in-place. Heap payloads stay allocated until the row is
    /// erased.
    pub fn set_all_null(&mut self, row: RowPtr) {
        assert!(!is_bit_set(row, self.layout.free_flag_bit));
        for column in 0..self.types.len() {
            let was_null = self.is_null_at(row, column);
            let bytes = if was_null {
                0
            } else if let Some(width) = self.types[column].fixed_size() {
                width
            } else {
                self.variable_size_at(row, column)
            };
            self.column_stats[column].remove_or_update_cell(bytes, was_null, true);
        }
        for column in &self.layout.columns {
            if let Some(bit) = column.null_bit() {
                set_bit(row, bit);
            }
        }
        for accumulator in &self.layout.accumulator_columns {
            set_bit(row, accumulator.null_bit);
        }
    }

    fn free_variable_width_fields(&mut self, rows: &[RowPtr]) {
        for (column, data_type) in self.types.iter().enumerate() {
            let offset = self.layout.columns[column].offset();
            if data_type.is_string() {
                for &row in rows {
                    let view = unsafe { value_at::<StringView>(row, offset) };
                    if !view.is_inline() {
                        self.heap.free(view.data_ptr());
                    }
                }
            } else if data_type.is_complex() {
                for &row in rows {
                    let view = unsafe { value_at::<HeapView>(row, offset) };
                    if !view.is_empty() {
                        self.heap.free(view.ptr());
                    }
                }
            }
        }
    }

    fn free_aggregates(&mut self, rows: &[RowPtr]) {
        for accumulator in &self.accumulators {
            accumulator.destroy(rows);
        }
    }

    fn free_rows_extra_memory(&mut self, rows: &[RowPtr]) {
        self.free_variable_width_fields(rows);
        self.free_aggregates(rows);
        self.num_rows -= rows.len();
    }

    fn remove_row_column_stats(&mut self, row: RowPtr, set_to_null: bool) {
        for column in 0..self.types.len() {
            let was_null = self.is_null_at(row, column);
            let bytes = if was_null {
                0
            } else if let Some(width) = self.types[column].fixed_size() {
                width
            } else {
                self.variable_size_at(row, column)
            };
            self.column_stats[column].remove_or_update_cell(bytes, was_null, set_to_null);
        }
    }

    fn next_free(&self, row: RowPtr) -> *mut u8 {
        unsafe { value_at::<usize>(row, 0) as *mut u8 }
    }

    fn set_next_free(&mut self, row: RowPtr, next: *mut u8) {
        unsafe { set_value_at::<usize>(row, 0, next as usize) };
    }

    // ------------------------------------------------------------------
    // Column I/O
    // ------------------------------------------------------------------

    /// Stores one value into `row` at `column`. Non-nullable keys skip the
    /// null bit entirely; otherwise a null source sets the bit and leaves
    /// the payload untouched.
    pub fn store(
        &mut self,
        decoded: &DecodedVector,
        index: usize,
        row: RowPtr,
        column: usize,
    ) -> Result<()> {
        assert!(self.mutable, "can't store into a sealed row container");
        let is_key = column < self.key_types.len();
        // With accumulators present only key columns are stored directly.
        debug_assert!(is_key || self.accumulators.is_empty());
        let never_null = is_key && !self.nullable_keys;
        self.store_cell(decoded, index, row, column, never_null)?;
        self.update_column_stats(decoded, index, row, column);
        Ok(())
    }

    /// Stores one column across a batch of rows.
    pub fn store_column(
        &mut self,
        decoded: &DecodedVector,
        rows: &[RowPtr],
        column: usize,
    ) -> Result<()> {
        assert!(self.mutable, "can't store into a sealed row container");
        ensure!(
            decoded.len() >= rows.len(),
            "decoded vector shorter than row batch"
        );
        let is_key = column < self.key_types.len();
        debug_assert!(is_key || self.accumulators.is_empty());
        let never_null = is_key && !self.nullable_keys;
        for (index, &row) in rows.iter().enumerate() {
            self.store_cell(decoded, index, row, column, never_null)?;
            self.update_column_stats(decoded, index, row, column);
        }
        Ok(())
    }

    fn store_cell(
        &mut self,
        decoded: &DecodedVector,
        index: usize,
        row: RowPtr,
        column: usize,
        never_null: bool,
    ) -> Result<()> {
        let col = self.layout.columns[column];
        if never_null {
            debug_assert!(!decoded.is_null_at(index), "null value for non-nullable key");
        } else {
            let bit = col.null_bit().expect("nullable column has a null bit");
            if decoded.is_null_at(index) {
                set_bit(row, bit);
                return Ok(());
            }
            clear_bit(row, bit);
        }

        let data_type = self.types[column].clone();
        let offset = col.offset();
        match (&data_type, decoded.value_at(index)) {
            (DataType::Bool, Value::Bool(v)) => unsafe {
                set_value_at::<u8>(row, offset, *v as u8)
            },
            (DataType::Int2, Value::Int2(v)) => unsafe { set_value_at::<i16>(row, offset, *v) },
            (DataType::Int4, Value::Int4(v)) => unsafe { set_value_at::<i32>(row, offset, *v) },
            (DataType::Int8, Value::Int8(v)) => unsafe { set_value_at::<i64>(row, offset, *v) },
            (DataType::Float4, Value::Float4(v)) => unsafe {
                set_value_at::<f32>(row, offset, *v)
            },
            (DataType::Float8, Value::Float8(v)) => unsafe {
                set_value_at::<f64>(row, offset, *v)
            },
            (DataType::Date, Value::Date(v)) => unsafe { set_value_at::<i32>(row, offset, *v) },
            (DataType::Timestamp, Value::Timestamp(v)) => unsafe {
                set_value_at::<i64>(row, offset, *v)
            },
            (DataType::Custom(_), Value::Int8(v)) => unsafe {
                set_value_at::<i64>(row, offset, *v)
            },
            (DataType::Text | DataType::Blob, _) => {
                let before = self.heap.cumulative_allocated();
                self.heap
                    .copy_multipart(decoded.bytes_at(index), row, offset)
                    .wrap_err("storing variable-width column")?;
                self.add_row_size_delta(row, before);
            }
            (DataType::Array | DataType::Struct | DataType::Map, value) => {
                let mut payload = Vec::new();
                rowserde::serialize_into(value, &mut payload);
                let before = self.heap.cumulative_allocated();
                let ptr = self
                    .heap
                    .allocate(&payload)
                    .wrap_err("storing complex column")?;
                unsafe {
                    set_value_at::<HeapView>(row, offset, HeapView::new(ptr, payload.len()))
                };
                self.add_row_size_delta(row, before);
            }
            (data_type, value) => {
                panic!("cannot store {value:?} into column of type {data_type}")
            }
        }
        Ok(())
    }

    fn update_column_stats(
        &mut self,
        decoded: &DecodedVector,
        index: usize,
        row: RowPtr,
        column: usize,
    ) {
        if decoded.is_null_at(index) {
            self.column_stats[column].add_null_cell();
        } else {
            let bytes = match self.types[column].fixed_size() {
                Some(width) => width,
                None => self.variable_size_at(row, column),
            };
            self.column_stats[column].add_cell_size(bytes);
        }
    }

    pub(crate) fn update_column_stats_from_row(&mut self, row: RowPtr, column: usize) {
        if self.is_null_at(row, column) {
            self.column_stats[column].add_null_cell();
        } else {
            let bytes = match self.types[column].fixed_size() {
                Some(width) => width,
                None => self.variable_size_at(row, column),
            };
            self.column_stats[column].add_cell_size(bytes);
        }
    }

    fn add_row_size_delta(&mut self, row: RowPtr, before: u64) {
        if let Some(offset) = self.layout.row_size_offset {
            let delta = (self.heap.cumulative_allocated() - before) as u32;
            let current = unsafe { value_at::<u32>(row, offset) };
            unsafe { set_value_at::<u32>(row, offset, current.saturating_add(delta)) };
        }
    }

    #[inline]
    pub fn is_null_at(&self, row: RowPtr, column: usize) -> bool {
        match self.layout.columns[column].null_bit() {
            Some(bit) => is_bit_set(row, bit),
            None => false,
        }
    }

    /// Stored length of a variable-width cell, 0 when null. Does not touch
    /// heap contents.
    pub fn variable_size_at(&self, row: RowPtr, column: usize) -> usize {
        let col = self.layout.columns[column];
        if self.is_null_at(row, column) {
            return 0;
        }
        if self.types[column].is_string() {
            unsafe { value_at::<StringView>(row, col.offset()) }.len()
        } else {
            unsafe { value_at::<HeapView>(row, col.offset()) }.len()
        }
    }

    pub fn fixed_size_at(&self, column: usize) -> usize {
        self.types[column]
            .fixed_size()
            .expect("fixed_size_at on variable-width column")
    }

    /// Heap bytes charged to this row's variable-width payloads.
    pub fn variable_row_size(&self, row: RowPtr) -> u32 {
        match self.layout.row_size_offset {
            Some(offset) => unsafe { value_at::<u32>(row, offset) },
            None => 0,
        }
    }

    /// Materializes one column of the given rows.
    pub fn extract_column(&self, rows: &[RowPtr], column: usize) -> Result<Vec<Value>> {
        let col = self.layout.columns[column];
        let data_type = &self.types[column];
        let mut out = Vec::with_capacity(rows.len());
        let mut scratch = Vec::new();
        for &row in rows {
            if self.is_null_at(row, column) {
                out.push(Value::Null);
                continue;
            }
            let offset = col.offset();
            let value = match data_type {
                DataType::Bool => Value::Bool(unsafe { value_at::<u8>(row, offset) } != 0),
                DataType::Int2 => Value::Int2(unsafe { value_at::<i16>(row, offset) }),
                DataType::Int4 => Value::Int4(unsafe { value_at::<i32>(row, offset) }),
                DataType::Int8 | DataType::Custom(_) => {
                    Value::Int8(unsafe { value_at::<i64>(row, offset) })
                }
                DataType::Float4 => Value::Float4(unsafe { value_at::<f32>(row, offset) }),
                DataType::Float8 => Value::Float8(unsafe { value_at::<f64>(row, offset) }),
                DataType::Date => Value::Date(unsafe { value_at::<i32>(row, offset) }),
                DataType::Timestamp => Value::Timestamp(unsafe { value_at::<i64>(row, offset) }),
                DataType::Text => {
                    let bytes = self.string_bytes_at(row, offset, &mut scratch).to_vec();
                    Value::Text(String::from_utf8(bytes).wrap_err("non-utf8 text payload")?)
                }
                DataType::Blob => {
                    Value::Blob(self.string_bytes_at(row, offset, &mut scratch).to_vec())
                }
                DataType::Array | DataType::Struct | DataType::Map => {
                    let view = unsafe { value_at::<HeapView>(row, offset) };
                    scratch.clear();
                    self.heap.read_into(view.ptr(), view.len(), &mut scratch);
                    rowserde::deserialize(&scratch)?
                }
            };
            out.push(value);
        }
        Ok(out)
    }

    /// Contiguous bytes of a string or blob cell, inline or dereferenced
    /// through the heap (copying into `scratch` only for multipart
    /// payloads).
    pub fn extract_string<'a>(
        &'a self,
        row: RowPtr,
        column: usize,
        scratch: &'a mut Vec<u8>,
    ) -> &'a [u8] {
        debug_assert!(self.types[column].is_string());
        self.string_bytes_at(row, self.layout.columns[column].offset(), scratch)
    }

    fn string_bytes_at<'a>(
        &'a self,
        row: RowPtr,
        offset: usize,
        scratch: &'a mut Vec<u8>,
    ) -> &'a [u8] {
        let view = unsafe { value_at::<StringView>(row, offset) };
        if view.is_inline() {
            scratch.clear();
            scratch.extend_from_slice(view.inline_bytes());
            scratch
        } else {
            self.heap.contiguous(view.data_ptr(), view.len(), scratch)
        }
    }

    // ------------------------------------------------------------------
    // Hashing and comparison
    // ------------------------------------------------------------------

    /// Hashes one column of the given rows into `result`. With `mix` the
    /// column hash is combined into the existing value, otherwise it
    /// overwrites. Nulls hash to a fixed sentinel; floats are NaN-aware;
    /// custom types delegate to their comparator.
    pub fn hash(&self, column: usize, rows: &[RowPtr], mix: bool, result: &mut [u64]) {
        assert!(result.len() >= rows.len());
        let col = self.layout.columns[column];
        let nullable = column >= self.key_types.len() || self.nullable_keys;
        let data_type = &self.types[column];
        let mut scratch = Vec::new();
        for (i, &row) in rows.iter().enumerate() {
            let hash = if nullable && self.is_null_at(row, column) {
                NULL_HASH
            } else {
                self.hash_cell(row, col.offset(), data_type, &mut scratch)
            };
            result[i] = if mix { hash_mix(result[i], hash) } else { hash };
        }
    }

    fn hash_cell(
        &self,
        row: RowPtr,
        offset: usize,
        data_type: &DataType,
        scratch: &mut Vec<u8>,
    ) -> u64 {
        match data_type {
            DataType::Bool => hash_i64(unsafe { value_at::<u8>(row, offset) } as i64),
            DataType::Int2 => hash_i64(unsafe { value_at::<i16>(row, offset) } as i64),
            DataType::Int4 => hash_i64(unsafe { value_at::<i32>(row, offset) } as i64),
            DataType::Int8 => hash_i64(unsafe { value_at::<i64>(row, offset) }),
            DataType::Date => hash_i64(unsafe { value_at::<i32>(row, offset) } as i64),
            DataType::Timestamp => hash_i64(unsafe { value_at::<i64>(row, offset) }),
            DataType::Float4 => hash_f32(unsafe { value_at::<f32>(row, offset) }),
            DataType::Float8 => hash_f64(unsafe { value_at::<f64>(row, offset) }),
            DataType::Custom(comparator) => {
                comparator.hash(unsafe { value_at::<i64>(row, offset) })
            }
            DataType::Text | DataType::Blob => {
                hash_bytes(self.string_bytes_at(row, offset, scratch))
            }
            DataType::Array | DataType::Struct | DataType::Map => {
                let view = unsafe { value_at::<HeapView>(row, offset) };
                scratch.clear();
                self.heap.read_into(view.ptr(), view.len(), scratch);
                rowserde::hash_bytes(scratch).expect("corrupt serialized complex payload")
            }
        }
    }

    /// Compares the same column of two rows. Null ordering follows
    /// `nulls_first`; value ordering follows `ascending`.
    pub fn compare_rows(
        &self,
        left: RowPtr,
        right: RowPtr,
        column: usize,
        flags: CompareFlags,
    ) -> Ordering {
        let col = self.layout.columns[column];
        let left_null = !col.is_never_null() && self.is_null_at(left, column);
        let right_null = !col.is_never_null() && self.is_null_at(right, column);
        match (left_null, right_null) {
            (true, true) => return Ordering::Equal,
            (true, false) => {
                return if flags.nulls_first {
                    Ordering::Less
                } else {
                    Ordering::Greater
                }
            }
            (false, true) => {
                return if flags.nulls_first {
                    Ordering::Greater
                } else {
                    Ordering::Less
                }
            }
            (false, false) => {}
        }
        let ord = self.compare_cells(left, right, col.offset(), &self.types[column], flags);
        if flags.ascending {
            ord
        } else {
            ord.reverse()
        }
    }

    fn compare_cells(
        &self,
        left: RowPtr,
        right: RowPtr,
        offset: usize,
        data_type: &DataType,
        flags: CompareFlags,
    ) -> Ordering {
        match data_type {
            DataType::Bool => unsafe {
                value_at::<u8>(left, offset).cmp(&value_at::<u8>(right, offset))
            },
            DataType::Int2 => unsafe {
                value_at::<i16>(left, offset).cmp(&value_at::<i16>(right, offset))
            },
            DataType::Int4 | DataType::Date => unsafe {
                value_at::<i32>(left, offset).cmp(&value_at::<i32>(right, offset))
            },
            DataType::Int8 | DataType::Timestamp => unsafe {
                value_at::<i64>(left, offset).cmp(&value_at::<i64>(right, offset))
            },
            DataType::Float4 => compare_f64(
                unsafe { value_at::<f32>(left, offset) } as f64,
                unsafe { value_at::<f32>(right, offset) } as f64,
            ),
            DataType::Float8 => compare_f64(
                unsafe { value_at::<f64>(left, offset) },
                unsafe { value_at::<f64>(right, offset) },
            ),
            DataType::Custom(comparator) => comparator.compare(
                unsafe { value_at::<i64>(left, offset) },
                unsafe { value_at::<i64>(right, offset) },
            ),
            DataType::Text | DataType::Blob => {
                let mut left_scratch = Vec::new();
                let mut right_scratch = Vec::new();
                let left_bytes = self.string_bytes_at(left, offset, &mut left_scratch);
                let right_bytes = self.string_bytes_at(right, offset, &mut right_scratch);
                left_bytes.cmp(right_bytes)
            }
            DataType::Array | DataType::Struct | DataType::Map => {
                let mut left_scratch = Vec::new();
                let mut right_scratch = Vec::new();
                let left_view = unsafe { value_at::<HeapView>(left, offset) };
                let right_view = unsafe { value_at::<HeapView>(right, offset) };
                self.heap
                    .read_into(left_view.ptr(), left_view.len(), &mut left_scratch);
                self.heap
                    .read_into(right_view.ptr(), right_view.len(), &mut right_scratch);
                rowserde::compare_bytes(&left_scratch, &right_scratch, flags)
                    .expect("corrupt serialized complex payload")
            }
        }
    }

    /// Compares a row cell against a decoded value: row is the first
    /// operand. The comparator negates this for decoded-vs-row ordering.
    pub fn compare_with_decoded(
        &self,
        row: RowPtr,
        column: usize,
        decoded: &DecodedVector,
        index: usize,
        flags: CompareFlags,
    ) -> Ordering {
        let col = self.layout.columns[column];
        let row_null = !col.is_never_null() && self.is_null_at(row, column);
        let decoded_null = decoded.is_null_at(index);
        match (row_null, decoded_null) {
            (true, true) => return Ordering::Equal,
            (true, false) => {
                return if flags.nulls_first {
                    Ordering::Less
                } else {
                    Ordering::Greater
                }
            }
            (false, true) => {
                return if flags.nulls_first {
                    Ordering::Greater
                } else {
                    Ordering::Less
                }
            }
            (false, false) => {}
        }

        let offset = col.offset();
        let value = decoded.value_at(index);
        let ord = match (&self.types[column], value) {
            (DataType::Bool, Value::Bool(v)) => {
                (unsafe { value_at::<u8>(row, offset) } != 0).cmp(v)
            }
            (DataType::Int2, Value::Int2(v)) => unsafe { value_at::<i16>(row, offset) }.cmp(v),
            (DataType::Int4, Value::Int4(v)) => unsafe { value_at::<i32>(row, offset) }.cmp(v),
            (DataType::Int8, Value::Int8(v)) => unsafe { value_at::<i64>(row, offset) }.cmp(v),
            (DataType::Date, Value::Date(v)) => unsafe { value_at::<i32>(row, offset) }.cmp(v),
            (DataType::Timestamp, Value::Timestamp(v)) => {
                unsafe { value_at::<i64>(row, offset) }.cmp(v)
            }
            (DataType::Float4, Value::Float4(v)) => {
                compare_f64(unsafe { value_at::<f32>(row, offset) } as f64, *v as f64)
            }
            (DataType::Float8, Value::Float8(v)) => {
                compare_f64(unsafe { value_at::<f64>(row, offset) }, *v)
            }
            (DataType::Custom(comparator), Value::Int8(v)) => {
                comparator.compare(unsafe { value_at::<i64>(row, offset) }, *v)
            }
            (DataType::Text | DataType::Blob, _) => {
                let mut scratch = Vec::new();
                self.string_bytes_at(row, offset, &mut scratch)
                    .cmp(decoded.bytes_at(index))
            }
            (DataType::Array | DataType::Struct | DataType::Map, value) => {
                let view = unsafe { value_at::<HeapView>(row, offset) };
                let mut scratch = Vec::new();
                self.heap.read_into(view.ptr(), view.len(), &mut scratch);
                rowserde::compare_with_value(&scratch, value, flags)
                    .expect("corrupt serialized complex payload")
            }
            (data_type, value) => {
                panic!("cannot compare {value:?} against column of type {data_type}")
            }
        };
        if flags.ascending {
            ord
        } else {
            ord.reverse()
        }
    }

    /// Equality fast path for hash-join probing: null equals null.
    pub fn equals(
        &self,
        row: RowPtr,
        column: usize,
        decoded: &DecodedVector,
        index: usize,
    ) -> bool {
        let flags = CompareFlags {
            equals_only: true,
            ..CompareFlags::default()
        };
        self.compare_with_decoded(row, column, decoded, index, flags) == Ordering::Equal
    }

    // ------------------------------------------------------------------
    // Probed flag
    // ------------------------------------------------------------------

    /// Marks rows selected by a hash-join probe. The store is a relaxed
    /// atomic OR: multiple probe threads may mark rows of a sealed
    /// container concurrently, and the probed bit is the one location
    /// where that race is tolerated.
    pub fn set_probed_flag(&self, rows: &[RowPtr]) {
        let bit = self
            .layout
            .probed_flag_bit
            .expect("container built without probed flags");
        let mask = 1u8 << (bit % 8);
        for &row in rows {
            // Row may be null in case of a full join.
            if row.is_null() {
                continue;
            }
            let byte = unsafe { row.add(bit / 8) };
            unsafe { &*(byte as *const AtomicU8) }.fetch_or(mask, MemoryOrdering::Relaxed);
        }
    }

    pub fn is_probed(&self, row: RowPtr) -> bool {
        let bit = self
            .layout
            .probed_flag_bit
            .expect("container built without probed flags");
        is_bit_set(row, bit)
    }

    /// Reads probed flags back, with optional null results for rows with
    /// null keys or rows never probed (mirrors outer-join semantics).
    pub fn extract_probed_flags(
        &self,
        rows: &[RowPtr],
        set_null_for_null_keys_row: bool,
        set_null_for_non_probed_row: bool,
    ) -> Vec<Option<bool>> {
        rows.iter()
            .map(|&row| {
                if set_null_for_null_keys_row && self.nullable_keys {
                    let has_null_key =
                        (0..self.key_types.len()).any(|column| self.is_null_at(row, column));
                    if has_null_key {
                        return None;
                    }
                }
                let probed = self.is_probed(row);
                if set_null_for_non_probed_row && !probed {
                    None
                } else {
                    Some(probed)
                }
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Next-row chaining and normalized keys
    // ------------------------------------------------------------------

    pub fn next_row(&self, row: RowPtr) -> Option<RowPtr> {
        let offset = self
            .layout
            .next_offset
            .expect("container built without next-row pointers");
        let next = unsafe { value_at::<usize>(row, offset) } as *mut u8;
        (!next.is_null()).then_some(next)
    }

    pub fn set_next_row(&mut self, row: RowPtr, next: RowPtr) {
        let offset = self
            .layout
            .next_offset
            .expect("container built without next-row pointers");
        unsafe { set_value_at::<usize>(row, offset, next as usize) };
    }

    /// The 8-byte prehash stored immediately before the row. Valid only
    /// for rows allocated while normalized keys were active.
    pub fn normalized_key(&self, row: RowPtr) -> u64 {
        debug_assert!(self.layout.normalized_key_size > 0);
        unsafe { std::ptr::read_unaligned(row.sub(8) as *const u64) }
    }

    pub fn set_normalized_key(&mut self, row: RowPtr, key: u64) {
        debug_assert!(self.layout.normalized_key_size > 0);
        unsafe { std::ptr::write_unaligned(row.sub(8) as *mut u64, key) };
    }

    /// One-way switch: rows allocated from here on carry no prehash
    /// prefix. Existing prefixed rows keep theirs; iteration accounts for
    /// the mixed strides.
    pub fn disable_normalized_keys(&mut self) {
        self.normalized_key_size = 0;
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    /// Filters `candidates` down to pointers that lie inside the arena.
    /// The sole mechanism for detecting dangling pointers in caller sets.
    pub fn find_rows(&self, candidates: &[RowPtr]) -> Vec<RowPtr> {
        let mut ranges: Vec<(usize, usize)> = (0..self.arena.num_ranges())
            .map(|index| {
                let (data, fill) = self.arena.range_at(index);
                (data as usize, fill)
            })
            .collect();
        ranges.sort_unstable_by_key(|range| range.0);
        candidates
            .iter()
            .copied()
            .filter(|&row| {
                let address = row as usize;
                let index = ranges.partition_point(|&(start, _)| start <= address);
                index > 0 && address < ranges[index - 1].0 + ranges[index - 1].1
            })
            .collect()
    }

    /// Average bytes per live row, arena and heap combined. `None` when
    /// the container is empty.
    pub fn estimate_row_size(&self) -> Option<usize> {
        if self.num_rows == 0 {
            return None;
        }
        let free_bytes = self.arena.free_bytes() + self.layout.fixed_row_size * self.num_free_rows;
        let used = self.arena.allocated_bytes() - free_bytes + self.heap.retained_size()
            - self.heap.free_space();
        let row_size = used / self.num_rows;
        assert!(
            row_size > 0,
            "estimated row size of the row container must be positive"
        );
        Some(row_size)
    }

    /// Bytes the container must grow to admit `num_rows` more rows and
    /// `variable_bytes` more heap data, after crediting free rows and heap
    /// free space.
    pub fn size_increment(&self, num_rows: usize, variable_bytes: usize) -> usize {
        let need_rows = num_rows.saturating_sub(self.num_free_rows);
        let need_bytes = variable_bytes.saturating_sub(self.heap.free_space());
        round_up(need_rows * self.layout.fixed_row_size, GROWTH_UNIT)
            + round_up(need_bytes, GROWTH_UNIT)
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    pub fn num_free_rows(&self) -> usize {
        self.num_free_rows
    }

    pub fn num_rows_with_normalized_key(&self) -> usize {
        self.num_rows_with_normalized_key
    }

    pub fn key_types(&self) -> &[DataType] {
        &self.key_types
    }

    pub fn dependent_types(&self) -> &[DataType] {
        &self.types[self.key_types.len()..]
    }

    pub fn accumulators(&self) -> &[Accumulator] {
        &self.accumulators
    }

    pub fn column_at(&self, column: usize) -> RowColumn {
        self.layout.columns[column]
    }

    pub fn column_stats(&self, column: usize) -> &ColumnStats {
        &self.column_stats[column]
    }

    pub fn fixed_row_size(&self) -> usize {
        self.layout.fixed_row_size
    }

    pub fn layout(&self) -> &RowLayout {
        &self.layout
    }

    pub fn string_heap(&self) -> &StringHeap {
        &self.heap
    }

    pub fn budget(&self) -> &Arc<MemoryBudget> {
        &self.budget
    }

    pub fn is_mutable(&self) -> bool {
        self.mutable
    }

    // ------------------------------------------------------------------
    // Accumulator slots
    // ------------------------------------------------------------------

    pub fn accumulator_column(&self, index: usize) -> AccumulatorColumn {
        self.layout.accumulator_columns[index]
    }

    pub fn accumulator_offset(&self, index: usize) -> usize {
        self.layout.accumulator_columns[index].offset
    }

    pub fn is_accumulator_null(&self, row: RowPtr, index: usize) -> bool {
        is_bit_set(row, self.layout.accumulator_columns[index].null_bit)
    }

    pub fn clear_accumulator_null(&mut self, row: RowPtr, index: usize) {
        clear_bit(row, self.layout.accumulator_columns[index].null_bit);
    }

    pub fn is_accumulator_initialized(&self, row: RowPtr, index: usize) -> bool {
        is_bit_set(row, self.layout.accumulator_columns[index].initialized_bit())
    }

    pub fn set_accumulator_initialized(&mut self, row: RowPtr, index: usize) {
        set_bit(row, self.layout.accumulator_columns[index].initialized_bit());
    }
}

impl Drop for RowContainer {
    fn drop(&mut self) {
        self.clear();
    }
}

impl fmt::Display for RowContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "keys: ")?;
        for (index, key) in self.key_types.iter().enumerate() {
            if index > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{key}")?;
        }
        let dependents = self.dependent_types();
        if !dependents.is_empty() {
            write!(f, " dependents: ")?;
            for (index, dependent) in dependents.iter().enumerate() {
                if index > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{dependent}")?;
            }
        }
        if !self.accumulators.is_empty() {
            write!(f, " num accumulators: {}", self.accumulators.len())?;
        }
        write!(f, " num rows: {}", self.num_rows)
    }
}

// Row pointers are only dereferenced through the container. Mutation is
// single-writer by contract; after sealing, readers share the container
// and the probed bit is the only mutable location (atomic).
unsafe impl Send for RowContainer {}
unsafe impl Sync for RowContainer {}

// ----------------------------------------------------------------------
// Raw row access helpers
// ----------------------------------------------------------------------

#[inline]
pub(crate) fn is_bit_set(row: *const u8, bit: usize) -> bool {
    unsafe { *row.add(bit / 8) & (1 << (bit % 8)) != 0 }
}

#[inline]
pub(crate) fn set_bit(row: *mut u8, bit: usize) {
    unsafe { *row.add(bit / 8) |= 1 << (bit % 8) };
}

#[inline]
pub(crate) fn clear_bit(row: *mut u8, bit: usize) {
    unsafe { *row.add(bit / 8) &= !(1 << (bit % 8)) };
}

#[inline]
pub(crate) unsafe fn value_at<T: Copy>(row: *const u8, offset: usize) -> T {
    std::ptr::read_unaligned(row.add(offset) as *const T)
}

#[inline]
pub(crate) unsafe fn set_value_at<T>(row: *mut u8, offset: usize, value: T) {
    std::ptr::write_unaligned(row.add(offset) as *mut T, value);
}
