//! # Row Comparator
//!
//! Ordering predicate over container rows for sort and priority-queue
//! callers. Evaluates sort keys in order and returns the first non-zero
//! comparison with the key's direction applied. The decoded entry point
//! compares an incoming tuple against a stored row without materializing
//! it.

use std::cmp::Ordering;

use smallvec::SmallVec;

use crate::types::SortOrder;
use crate::vector::DecodedVector;
use crate::RowPtr;

use super::RowContainer;

pub struct RowComparator<'a> {
    container: &'a RowContainer,
    keys: SmallVec<[(usize, SortOrder); 4]>,
}

impl<'a> RowComparator<'a> {
    /// `sorting_keys` are column indices (keys-then-dependents order);
    /// one `SortOrder` per key.
    pub fn new(
        container: &'a RowContainer,
        sorting_keys: &[usize],
        sorting_orders: &[SortOrder],
    ) -> Self {
        assert_eq!(
            sorting_keys.len(),
            sorting_orders.len(),
            "one sort order per sorting key"
        );
        Self {
            container,
            keys: sorting_keys
                .iter()
                .copied()
                .zip(sorting_orders.iter().copied())
                .collect(),
        }
    }

    pub fn compare(&self, left: RowPtr, right: RowPtr) -> Ordering {
        if std::ptr::eq(left, right) {
            return Ordering::Equal;
        }
        for &(column, order) in &self.keys {
            let ord = self
                .container
                .compare_rows(left, right, column, order.into());
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }

    pub fn is_less(&self, left: RowPtr, right: RowPtr) -> bool {
        self.compare(left, right) == Ordering::Less
    }

    /// Compares an incoming tuple (one decoded vector per column, indexed
    /// by column) against a stored row.
    pub fn compare_decoded(
        &self,
        decoded: &[DecodedVector],
        index: usize,
        row: RowPtr,
    ) -> Ordering {
        for &(column, order) in &self.keys {
            let ord = self.container.compare_with_decoded(
                row,
                column,
                &decoded[column],
                index,
                order.into(),
            );
            if ord != Ordering::Equal {
                // The container compared row-vs-decoded; callers want
                // decoded-vs-row.
                return ord.reverse();
            }
        }
        Ordering::Equal
    }

    pub fn is_less_decoded(&self, decoded: &[DecodedVector], index: usize, row: RowPtr) -> bool {
        self.compare_decoded(decoded, index, row) == Ordering::Less
    }
}
