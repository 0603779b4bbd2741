//! # Row Layout Planner
//!
//! Computes the physical layout of a row once, at container construction.
//! Every row of a container shares the same offsets; only payload bytes
//! mutate afterwards.
//!
//! ## Row Layout
//!
//! ```text
//! +--------+-----+--------------+---------------+------------+----------+--------+
//! | keys   | pad | flag bytes   | accumulators  | dependents | row size | next   |
//! | slots  |     | nulls/probed | (aligned)     | slots      | (u32)    | (ptr)  |
//! +--------+-----+--------------+---------------+------------+----------+--------+
//! ```
//!
//! - Key slots are sized by type; variable-width keys hold 16-byte views.
//! - The pad widens the key area to at least pointer size so a freed row
//!   can thread the free-list link through its first slot.
//! - Flag bits, in order: key null bits (nullable keys only), accumulator
//!   (null, initialized) pairs starting on a byte boundary, dependent null
//!   bits, the optional probed bit, the mandatory free bit. All bit
//!   indices are rebased to count from the row start.
//! - Accumulator payloads are rounded up to their alignment; the final row
//!   size is rounded up to the container alignment (max of pointer size
//!   and all accumulator alignments).
//! - The row-size counter is present iff any column or accumulator is
//!   variable-width; the next pointer iff join-build chaining is on.

use std::mem;

use crate::accumulator::Accumulator;
use crate::types::DataType;

/// Sentinel for columns that can never be null (non-nullable keys).
const NOT_NULL: u32 = u32::MAX;

/// Offset and null-bit position of one key or dependent column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowColumn {
    offset: u32,
    null_bit: u32,
}

impl RowColumn {
    fn new(offset: usize, null_bit: Option<usize>) -> Self {
        Self {
            offset: offset as u32,
            null_bit: null_bit.map_or(NOT_NULL, |bit| bit as u32),
        }
    }

    #[inline]
    pub fn offset(&self) -> usize {
        self.offset as usize
    }

    /// Bit index from the row start, or `None` for never-null columns.
    #[inline]
    pub fn null_bit(&self) -> Option<usize> {
        (self.null_bit != NOT_NULL).then_some(self.null_bit as usize)
    }

    #[inline]
    pub fn is_never_null(&self) -> bool {
        self.null_bit == NOT_NULL
    }
}

/// Offset and flag bits of one accumulator. The initialized bit follows
/// the null bit; the planner keeps the pair inside a single byte.
#[derive(Debug, Clone, Copy)]
pub struct AccumulatorColumn {
    pub offset: usize,
    pub null_bit: usize,
}

impl AccumulatorColumn {
    #[inline]
    pub fn initialized_bit(&self) -> usize {
        self.null_bit + 1
    }
}

/// Immutable layout descriptor shared by every row of a container.
#[derive(Debug)]
pub struct RowLayout {
    pub(crate) columns: Vec<RowColumn>,
    pub(crate) accumulator_columns: Vec<AccumulatorColumn>,
    /// Byte offset of the flag block (equals the padded key width).
    pub(crate) flags_offset: usize,
    pub(crate) flag_bytes: usize,
    pub(crate) free_flag_bit: usize,
    pub(crate) probed_flag_bit: Option<usize>,
    pub(crate) row_size_offset: Option<usize>,
    pub(crate) next_offset: Option<usize>,
    pub(crate) fixed_row_size: usize,
    pub(crate) alignment: usize,
    /// Bytes reserved before the row pointer for the normalized-key
    /// prehash, when the feature is on at construction.
    pub(crate) normalized_key_size: usize,
    pub(crate) is_variable_width: bool,
    pub(crate) uses_external_memory: bool,
}

impl RowLayout {
    pub fn plan(
        key_types: &[DataType],
        nullable_keys: bool,
        accumulators: &[Accumulator],
        dependent_types: &[DataType],
        has_next: bool,
        has_probed_flag: bool,
        has_normalized_keys: bool,
    ) -> Self {
        let pointer_size = mem::size_of::<*const u8>();
        let mut offset = 0usize;
        let mut flag_bit = 0usize;
        let mut is_variable_width = false;

        let mut key_offsets = Vec::with_capacity(key_types.len());
        let mut key_null_bits = Vec::with_capacity(key_types.len());
        for key in key_types {
            key_offsets.push(offset);
            offset += key.slot_size();
            is_variable_width |= key.is_variable_width();
            if nullable_keys {
                key_null_bits.push(flag_bit);
                flag_bit += 1;
            }
        }

        // Widen the key area to pointer size so freed rows can hold the
        // free-list link in their first slot.
        offset = offset.max(pointer_size);
        let flags_offset = offset;

        if !accumulators.is_empty() {
            // Round the bit cursor to the next byte so an accumulator's
            // (null, initialized) pair never straddles a byte boundary.
            flag_bit = (flag_bit + 7) & !7;
        }
        let mut alignment = pointer_size;
        let mut uses_external_memory = false;
        let mut accumulator_null_bits = Vec::with_capacity(accumulators.len());
        for accumulator in accumulators {
            accumulator_null_bits.push(flag_bit);
            flag_bit += 2;
            is_variable_width |= !accumulator.is_fixed_size();
            uses_external_memory |= accumulator.uses_external_memory();
            alignment = combine_alignments(alignment, accumulator.alignment());
        }

        let mut dependent_null_bits = Vec::with_capacity(dependent_types.len());
        for dependent in dependent_types {
            dependent_null_bits.push(flag_bit);
            flag_bit += 1;
            is_variable_width |= dependent.is_variable_width();
        }

        let rebase = flags_offset * 8;
        let probed_flag_bit = has_probed_flag.then(|| {
            let bit = flag_bit + rebase;
            flag_bit += 1;
            bit
        });
        let free_flag_bit = flag_bit + rebase;
        flag_bit += 1;
        let flag_bytes = flag_bit.div_ceil(8);

        offset = flags_offset + flag_bytes;
        let mut accumulator_columns = Vec::with_capacity(accumulators.len());
        for (accumulator, null_bit) in accumulators.iter().zip(&accumulator_null_bits) {
            offset = round_up(offset, accumulator.alignment());
            accumulator_columns.push(AccumulatorColumn {
                offset,
                null_bit: null_bit + rebase,
            });
            offset += accumulator.fixed_width_size();
        }

        let mut dependent_offsets = Vec::with_capacity(dependent_types.len());
        for dependent in dependent_types {
            dependent_offsets.push(offset);
            offset += dependent.slot_size();
        }

        let row_size_offset = is_variable_width.then(|| {
            let at = offset;
            offset += mem::size_of::<u32>();
            at
        });
        let next_offset = has_next.then(|| {
            let at = offset;
            offset += pointer_size;
            at
        });

        let fixed_row_size = round_up(offset, alignment);
        let normalized_key_size = if has_normalized_keys {
            round_up(mem::size_of::<u64>(), alignment)
        } else {
            0
        };

        let mut columns = Vec::with_capacity(key_types.len() + dependent_types.len());
        for (index, key_offset) in key_offsets.iter().enumerate() {
            let null_bit = nullable_keys.then(|| key_null_bits[index] + rebase);
            columns.push(RowColumn::new(*key_offset, null_bit));
        }
        for (dependent_offset, null_bit) in dependent_offsets.iter().zip(&dependent_null_bits) {
            columns.push(RowColumn::new(*dependent_offset, Some(null_bit + rebase)));
        }

        Self {
            columns,
            accumulator_columns,
            flags_offset,
            flag_bytes,
            free_flag_bit,
            probed_flag_bit,
            row_size_offset,
            next_offset,
            fixed_row_size,
            alignment,
            normalized_key_size,
            is_variable_width,
            uses_external_memory,
        }
    }

    pub fn fixed_row_size(&self) -> usize {
        self.fixed_row_size
    }

    pub fn alignment(&self) -> usize {
        self.alignment
    }

    pub fn flag_bytes(&self) -> usize {
        self.flag_bytes
    }
}

fn combine_alignments(a: usize, b: usize) -> usize {
    assert!(a.is_power_of_two(), "alignment can only be power of 2");
    assert!(b.is_power_of_two(), "alignment can only be power of 2");
    a.max(b)
}

pub(crate) fn round_up(value: usize, alignment: usize) -> usize {
    (value + alignment - 1) & !(alignment - 1)
}

/// Per-column running statistics, maintained on every store and removal.
/// Min/max become unknown once any cell is removed or updated, because
/// recomputing them would require a full rescan.
#[derive(Debug, Clone, Default)]
pub struct ColumnStats {
    null_count: u64,
    non_null_count: u64,
    sum_bytes: u64,
    min_bytes: u32,
    max_bytes: u32,
    min_max_invalidated: bool,
}

impl ColumnStats {
    pub(crate) fn add_cell_size(&mut self, bytes: usize) {
        if !self.min_max_invalidated {
            if self.non_null_count == 0 {
                self.min_bytes = bytes as u32;
                self.max_bytes = bytes as u32;
            } else {
                self.min_bytes = self.min_bytes.min(bytes as u32);
                self.max_bytes = self.max_bytes.max(bytes as u32);
            }
        }
        self.non_null_count += 1;
        self.sum_bytes += bytes as u64;
    }

    pub(crate) fn add_null_cell(&mut self) {
        self.null_count += 1;
    }

    /// Removal or update of one cell. `set_to_null` distinguishes an
    /// update-to-null (the cell stays, as null) from a removal.
    pub(crate) fn remove_or_update_cell(&mut self, bytes: usize, was_null: bool, set_to_null: bool) {
        if was_null {
            debug_assert_eq!(bytes, 0);
            if !set_to_null {
                self.null_count -= 1;
            }
        } else {
            self.non_null_count -= 1;
            self.sum_bytes -= bytes as u64;
            if set_to_null {
                self.null_count += 1;
            }
        }
        self.invalidate_min_max();
    }

    pub(crate) fn invalidate_min_max(&mut self) {
        self.min_max_invalidated = true;
    }

    pub fn null_count(&self) -> u64 {
        self.null_count
    }

    pub fn non_null_count(&self) -> u64 {
        self.non_null_count
    }

    pub fn num_cells(&self) -> u64 {
        self.null_count + self.non_null_count
    }

    pub fn sum_bytes(&self) -> u64 {
        self.sum_bytes
    }

    pub fn min_bytes(&self) -> Option<u32> {
        (!self.min_max_invalidated && self.non_null_count > 0).then_some(self.min_bytes)
    }

    pub fn max_bytes(&self) -> Option<u32> {
        (!self.min_max_invalidated && self.non_null_count > 0).then_some(self.max_bytes)
    }

    /// Aggregates stats across containers. Min/max survive only if valid
    /// on every input.
    pub fn merge<'a>(stats: impl IntoIterator<Item = &'a ColumnStats>) -> ColumnStats {
        let mut merged = ColumnStats::default();
        for item in stats {
            if merged.min_max_invalidated || item.min_max_invalidated {
                merged.min_max_invalidated = true;
            } else if item.non_null_count > 0 {
                if merged.non_null_count == 0 {
                    merged.min_bytes = item.min_bytes;
                    merged.max_bytes = item.max_bytes;
                } else {
                    merged.min_bytes = merged.min_bytes.min(item.min_bytes);
                    merged.max_bytes = merged.max_bytes.max(item.max_bytes);
                }
            }
            merged.null_count += item.null_count;
            merged.non_null_count += item.non_null_count;
            merged.sum_bytes += item.sum_bytes;
        }
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accumulator::AggregateFunction;
    use crate::types::Value;
    use crate::RowPtr;
    use std::sync::Arc;

    #[derive(Debug)]
    struct TestAggregate {
        width: usize,
        align: usize,
        external: bool,
    }

    impl AggregateFunction for TestAggregate {
        fn is_fixed_size(&self) -> bool {
            true
        }
        fn fixed_width_size(&self) -> usize {
            self.width
        }
        fn uses_external_memory(&self) -> bool {
            self.external
        }
        fn alignment(&self) -> usize {
            self.align
        }
        fn spill_type(&self) -> DataType {
            DataType::Int8
        }
        fn extract_for_spill(&self, _groups: &[RowPtr], _out: &mut Vec<Value>) {}
        fn destroy(&self, _groups: &[RowPtr]) {}
    }

    fn accumulator(width: usize, align: usize) -> Accumulator {
        Accumulator::new(Arc::new(TestAggregate {
            width,
            align,
            external: false,
        }))
    }

    #[test]
    fn row_size_is_multiple_of_alignment() {
        let layout = RowLayout::plan(
            &[DataType::Int4, DataType::Int8],
            false,
            &[accumulator(24, 16)],
            &[DataType::Text],
            false,
            false,
            false,
        );
        assert_eq!(layout.alignment, 16);
        assert_eq!(layout.fixed_row_size % layout.alignment, 0);
    }

    #[test]
    fn alignment_is_max_of_pointer_and_accumulators() {
        let layout = RowLayout::plan(&[DataType::Int4], false, &[], &[], false, false, false);
        assert_eq!(layout.alignment, mem::size_of::<*const u8>());

        let layout = RowLayout::plan(
            &[DataType::Int4],
            false,
            &[accumulator(8, 4), accumulator(32, 32)],
            &[],
            false,
            false,
            false,
        );
        assert_eq!(layout.alignment, 32);
    }

    #[test]
    fn non_nullable_keys_have_no_null_bit() {
        let layout = RowLayout::plan(
            &[DataType::Int4, DataType::Text],
            false,
            &[],
            &[DataType::Int8],
            false,
            false,
            false,
        );
        assert!(layout.columns[0].is_never_null());
        assert!(layout.columns[1].is_never_null());
        assert!(layout.columns[2].null_bit().is_some());
    }

    #[test]
    fn accumulator_flag_pair_shares_a_byte() {
        // Three nullable keys leave the bit cursor mid-byte; accumulator
        // flags must jump to the next byte boundary.
        let layout = RowLayout::plan(
            &[DataType::Int4, DataType::Int4, DataType::Int4],
            true,
            &[accumulator(8, 8), accumulator(8, 8), accumulator(8, 8), accumulator(8, 8)],
            &[],
            false,
            false,
            false,
        );
        for column in &layout.accumulator_columns {
            assert_eq!(column.null_bit % 8, 0, "pair starts on a byte boundary");
            assert_eq!(
                column.null_bit / 8,
                column.initialized_bit() / 8,
                "null and initialized bits share a byte"
            );
        }
        let first = layout.accumulator_columns[0].null_bit;
        assert_eq!(first, layout.flags_offset * 8 + 8);
    }

    #[test]
    fn free_flag_is_distinct_from_all_null_bits() {
        let layout = RowLayout::plan(
            &[DataType::Int4, DataType::Text],
            true,
            &[],
            &[DataType::Int8, DataType::Blob],
            false,
            true,
            false,
        );
        let mut bits: Vec<usize> = layout
            .columns
            .iter()
            .filter_map(|c| c.null_bit())
            .collect();
        bits.push(layout.probed_flag_bit.unwrap());
        bits.push(layout.free_flag_bit);
        let unique: std::collections::BTreeSet<_> = bits.iter().collect();
        assert_eq!(unique.len(), bits.len());
    }

    #[test]
    fn key_area_is_padded_to_pointer_size() {
        let layout = RowLayout::plan(&[DataType::Int4], false, &[], &[], false, false, false);
        assert_eq!(layout.flags_offset, mem::size_of::<*const u8>());
    }

    #[test]
    fn row_size_counter_present_iff_variable_width() {
        let fixed = RowLayout::plan(
            &[DataType::Int4],
            false,
            &[],
            &[DataType::Int8],
            false,
            false,
            false,
        );
        assert!(fixed.row_size_offset.is_none());

        let variable = RowLayout::plan(
            &[DataType::Int4],
            false,
            &[],
            &[DataType::Text],
            false,
            false,
            false,
        );
        assert!(variable.row_size_offset.is_some());
    }

    #[test]
    fn next_pointer_follows_row_size_counter() {
        let layout = RowLayout::plan(
            &[DataType::Text],
            false,
            &[],
            &[],
            true,
            false,
            false,
        );
        let row_size_at = layout.row_size_offset.unwrap();
        assert_eq!(layout.next_offset.unwrap(), row_size_at + 4);
    }

    #[test]
    fn accumulator_offsets_are_aligned() {
        let layout = RowLayout::plan(
            &[DataType::Int8],
            false,
            &[accumulator(8, 8), accumulator(48, 16)],
            &[],
            false,
            false,
            false,
        );
        assert_eq!(layout.accumulator_columns[0].offset % 8, 0);
        assert_eq!(layout.accumulator_columns[1].offset % 16, 0);
    }

    #[test]
    fn normalized_key_reservation_rounds_to_alignment() {
        let layout = RowLayout::plan(
            &[DataType::Int8],
            false,
            &[accumulator(16, 16)],
            &[],
            false,
            false,
            true,
        );
        assert_eq!(layout.normalized_key_size, 16);

        let layout = RowLayout::plan(&[DataType::Int8], false, &[], &[], false, false, true);
        assert_eq!(layout.normalized_key_size, 8);
    }

    #[test]
    #[should_panic(expected = "alignment can only be power of 2")]
    fn non_power_of_two_alignment_is_rejected() {
        RowLayout::plan(
            &[DataType::Int4],
            false,
            &[accumulator(8, 12)],
            &[],
            false,
            false,
            false,
        );
    }

    #[test]
    fn stats_track_min_max_until_removal() {
        let mut stats = ColumnStats::default();
        stats.add_cell_size(10);
        stats.add_cell_size(4);
        stats.add_null_cell();
        assert_eq!(stats.min_bytes(), Some(4));
        assert_eq!(stats.max_bytes(), Some(10));
        assert_eq!(stats.sum_bytes(), 14);
        assert_eq!(stats.num_cells(), 3);

        stats.remove_or_update_cell(4, false, false);
        assert_eq!(stats.min_bytes(), None);
        assert_eq!(stats.max_bytes(), None);
        assert_eq!(stats.sum_bytes(), 10);
        assert_eq!(stats.non_null_count(), 1);
    }

    #[test]
    fn stats_merge_sums_counts() {
        let mut a = ColumnStats::default();
        a.add_cell_size(8);
        let mut b = ColumnStats::default();
        b.add_cell_size(2);
        b.add_null_cell();

        let merged = ColumnStats::merge([&a, &b]);
        assert_eq!(merged.non_null_count(), 2);
        assert_eq!(merged.null_count(), 1);
        assert_eq!(merged.sum_bytes(), 10);
        assert_eq!(merged.min_bytes(), Some(2));
        assert_eq!(merged.max_bytes(), Some(8));
    }
}
