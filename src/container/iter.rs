//! # Iteration and Partitioned Scanning
//!
//! Forward cursors over the arena ranges plus the partition-filtered scan
//! used for parallel consumption of a sealed container.
//!
//! ## Iterator State
//!
//! `RowContainerIterator` tracks both a byte cursor (`allocation_index`,
//! `row_offset`) used by `list_rows` and a pointer cursor (`row_begin`,
//! `end_of_run`) used by `skip`; `row_number` is the logical position.
//! Rows allocated while normalized keys were active are wider by the
//! prefix size; `normalized_keys_left` counts how many of those are still
//! ahead so the stride switches at the right row.
//!
//! ## Partition Scan
//!
//! `RowPartitions` is a page-backed byte table, one partition id per row,
//! built once after sealing. `list_partition_rows` compares
//! [`SIMD_BATCH_WIDTH`] ids at a time against a broadcast target and walks
//! the hit mask, masking off positions before the iterator and past the
//! last row. Pages are a multiple of the batch width, so a batch never
//! straddles a page, and the zero-filled tail never reaches the scan.
//!
//! ## Platform Notes
//!
//! - **x86_64**: SSE2 byte-equality mask (baseline, no feature detection)
//! - **aarch64**: NEON with a horizontal-add movemask emulation
//! - **Other**: scalar fallback producing the same 16-bit masks

use std::fmt;
use std::sync::Arc;

use eyre::Result;

use crate::config::{PARTITION_PAGE_SIZE, SIMD_BATCH_WIDTH};
use crate::memory::{MemoryBudget, Pool};
use crate::RowPtr;

use super::{is_bit_set, RowContainer};

/// Resumable cursor over a container's rows, in insertion order.
#[derive(Debug, Clone)]
pub struct RowContainerIterator {
    pub(crate) allocation_index: usize,
    pub(crate) row_offset: usize,
    pub(crate) row_begin: *mut u8,
    pub(crate) end_of_run: *mut u8,
    pub(crate) row_number: usize,
    pub(crate) normalized_keys_left: usize,
    pub(crate) normalized_key_size: usize,
}

impl Default for RowContainerIterator {
    fn default() -> Self {
        Self {
            allocation_index: 0,
            row_offset: 0,
            row_begin: std::ptr::null_mut(),
            end_of_run: std::ptr::null_mut(),
            row_number: 0,
            normalized_keys_left: 0,
            normalized_key_size: 0,
        }
    }
}

impl RowContainerIterator {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn row_number(&self) -> usize {
        self.row_number
    }

    /// Row under the cursor, or null past the end. Skips past the
    /// normalized-key prefix while prefixed rows remain.
    pub fn current_row(&self) -> RowPtr {
        if self.row_begin.is_null() {
            return std::ptr::null_mut();
        }
        if self.normalized_keys_left > 0 {
            unsafe { self.row_begin.add(self.normalized_key_size) }
        } else {
            self.row_begin
        }
    }
}

impl fmt::Display for RowContainerIterator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[allocation_index:{} row_offset:{} row_number:{}]",
            self.allocation_index, self.row_offset, self.row_number
        )
    }
}

/// Post-build partition-id table: one byte per row, page-backed for SIMD
/// scanning. Created by sealing the container.
pub struct RowPartitions {
    capacity: usize,
    size: usize,
    pages: Vec<Box<[u8]>>,
    budget: Arc<MemoryBudget>,
}

impl RowPartitions {
    pub(crate) fn new(num_rows: usize, budget: Arc<MemoryBudget>) -> Result<Self> {
        let num_pages = num_rows.div_ceil(PARTITION_PAGE_SIZE);
        budget.allocate(Pool::Partitions, num_pages * PARTITION_PAGE_SIZE)?;
        let pages = (0..num_pages)
            .map(|_| vec![0u8; PARTITION_PAGE_SIZE].into_boxed_slice())
            .collect();
        Ok(Self {
            capacity: num_rows,
            size: 0,
            pages,
            budget,
        })
    }

    /// Appends partition ids in row order. Pages are pre-zeroed, which
    /// also pads the tail past `len` for the SIMD scan.
    pub fn append_partitions(&mut self, partitions: &[u8]) {
        assert!(
            self.size + partitions.len() <= self.capacity,
            "more partition ids than rows"
        );
        let mut index = 0;
        while index < partitions.len() {
            let page = self.size / PARTITION_PAGE_SIZE;
            let offset = self.size % PARTITION_PAGE_SIZE;
            let take = (partitions.len() - index).min(PARTITION_PAGE_SIZE - offset);
            self.pages[page][offset..offset + take]
                .copy_from_slice(&partitions[index..index + take]);
            self.size += take;
            index += take;
        }
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn num_pages(&self) -> usize {
        self.pages.len()
    }

    pub(crate) fn page(&self, index: usize) -> &[u8] {
        &self.pages[index]
    }
}

impl Drop for RowPartitions {
    fn drop(&mut self) {
        self.budget
            .release(Pool::Partitions, self.pages.len() * PARTITION_PAGE_SIZE);
    }
}

impl RowContainer {
    /// Seals the container and allocates its partition table. A one-way
    /// transition: inserts and erasures are rejected afterwards; only the
    /// probed bit stays mutable.
    pub fn create_row_partitions(&mut self) -> Result<RowPartitions> {
        assert!(
            self.mutable,
            "can only create row partitions once from a row container"
        );
        self.mutable = false;
        RowPartitions::new(self.num_rows, self.budget.clone())
    }

    /// Advances the iterator by `num_rows` rows. Skipping past the end
    /// clamps `row_number` and nulls the cursor (terminal state).
    pub fn skip(&self, iter: &mut RowContainerIterator, num_rows: usize) {
        // Group-by containers are listed with list_rows; the pointer
        // cursor is join-side only.
        debug_assert!(self.accumulators.is_empty());
        if iter.row_number + num_rows >= self.num_rows {
            iter.row_number = self.num_rows;
            iter.row_begin = std::ptr::null_mut();
            return;
        }
        if iter.end_of_run.is_null() {
            debug_assert_eq!(iter.row_number, 0);
            iter.normalized_keys_left = self.num_rows_with_normalized_key;
            iter.normalized_key_size = self.layout.normalized_key_size;
            let (data, fill) = self.arena.range_at(0);
            iter.row_begin = data;
            iter.end_of_run = unsafe { data.add(fill) };
        }
        let mut to_skip = num_rows;
        let mut row_size = self.layout.fixed_row_size
            + if iter.normalized_keys_left > 0 {
                iter.normalized_key_size
            } else {
                0
            };
        if iter.normalized_keys_left > 0 {
            if iter.normalized_keys_left < num_rows {
                // Walk the remaining prefixed rows at the wide stride,
                // then fall back to the plain stride.
                let prefixed = iter.normalized_keys_left;
                self.advance_runs(iter, prefixed, row_size);
                iter.normalized_keys_left = 0;
                to_skip -= prefixed;
                row_size = self.layout.fixed_row_size;
            } else {
                iter.normalized_keys_left -= num_rows;
            }
        }
        self.advance_runs(iter, to_skip, row_size);
        iter.row_number += num_rows;
    }

    fn advance_runs(&self, iter: &mut RowContainerIterator, mut to_skip: usize, row_size: usize) {
        while to_skip > 0 {
            let remaining = unsafe { iter.end_of_run.offset_from(iter.row_begin) } as usize;
            if to_skip * row_size < remaining {
                iter.row_begin = unsafe { iter.row_begin.add(to_skip * row_size) };
                break;
            }
            to_skip -= remaining / row_size;
            iter.allocation_index += 1;
            let (data, fill) = self.arena.range_at(iter.allocation_index);
            iter.row_begin = data;
            iter.end_of_run = unsafe { data.add(fill) };
        }
    }

    /// Lists up to `max_rows` live rows in insertion order, skipping freed
    /// slots. Resumable: successive calls with the same iterator continue
    /// where the previous one stopped. Returns the number of rows pushed.
    pub fn list_rows(
        &self,
        iter: &mut RowContainerIterator,
        max_rows: usize,
        out: &mut Vec<RowPtr>,
    ) -> usize {
        if iter.allocation_index == 0 && iter.row_offset == 0 {
            iter.normalized_keys_left = self.num_rows_with_normalized_key;
            iter.normalized_key_size = self.layout.normalized_key_size;
        }
        let mut count = 0;
        let mut row_size = self.layout.fixed_row_size
            + if iter.normalized_keys_left > 0 {
                iter.normalized_key_size
            } else {
                0
            };
        for allocation in iter.allocation_index..self.arena.num_ranges() {
            let (data, fill) = self.arena.range_at(allocation);
            let mut offset = iter.row_offset;
            while offset + row_size <= fill {
                let row = unsafe {
                    data.add(offset).add(if iter.normalized_keys_left > 0 {
                        iter.normalized_key_size
                    } else {
                        0
                    })
                };
                offset += row_size;
                if iter.normalized_keys_left > 0 {
                    iter.normalized_keys_left -= 1;
                    if iter.normalized_keys_left == 0 {
                        row_size = self.layout.fixed_row_size;
                    }
                }
                if is_bit_set(row, self.layout.free_flag_bit) {
                    continue;
                }
                out.push(row);
                count += 1;
                iter.row_number += 1;
                if count == max_rows {
                    iter.allocation_index = allocation;
                    iter.row_offset = offset;
                    return count;
                }
            }
            iter.row_offset = 0;
        }
        iter.allocation_index = self.arena.num_ranges();
        count
    }

    /// Lists up to `max_rows` rows of `partition`, resuming from `iter`.
    /// Requires a sealed container and a fully populated partition table.
    pub fn list_partition_rows(
        &self,
        iter: &mut RowContainerIterator,
        partition: u8,
        max_rows: usize,
        partitions: &RowPartitions,
        out: &mut Vec<RowPtr>,
    ) -> usize {
        assert!(
            !self.mutable,
            "can't list partition rows from a mutable row container"
        );
        assert_eq!(
            partitions.len(),
            self.num_rows,
            "all rows must have a partition"
        );
        if self.num_rows == 0 {
            return 0;
        }
        const BATCH: usize = SIMD_BATCH_WIDTH;
        let mut count = 0;
        let mut start_row = iter.row_number / BATCH * BATCH;
        // Ignore hits below the iterator's position in the first batch.
        let mut batch_mask = !low_mask(iter.row_number - start_row);
        let mut page_index = start_row / PARTITION_PAGE_SIZE;
        let mut offset_in_page = start_row % PARTITION_PAGE_SIZE;
        while page_index < partitions.num_pages() {
            let page = partitions.page(page_index);
            while offset_in_page < page.len() {
                let mut bits = eq_mask(&page[offset_in_page..offset_in_page + BATCH], partition)
                    & batch_mask;
                batch_mask = !0;
                let mut at_end = false;
                if start_row + BATCH >= self.num_rows {
                    // Clear bits for positions past the last row.
                    bits &= low_mask(self.num_rows - start_row);
                    at_end = true;
                }
                while bits != 0 {
                    let hit = bits.trailing_zeros() as usize;
                    let distance = start_row + hit - iter.row_number;
                    self.skip(iter, distance);
                    out.push(iter.current_row());
                    count += 1;
                    if count == max_rows {
                        // Step once more so the next call resumes past
                        // this hit.
                        self.skip(iter, 1);
                        return count;
                    }
                    bits &= bits - 1;
                }
                start_row += BATCH;
                offset_in_page += BATCH;
                if at_end {
                    iter.row_number = self.num_rows;
                    return count;
                }
                if iter.row_number != start_row {
                    self.skip(iter, start_row - iter.row_number);
                }
            }
            page_index += 1;
            offset_in_page = 0;
        }
        count
    }
}

#[inline]
fn low_mask(bits: usize) -> u32 {
    if bits >= 32 {
        !0
    } else {
        (1u32 << bits) - 1
    }
}

/// 16-bit mask of lanes equal to `target`. `chunk` must hold at least
/// [`SIMD_BATCH_WIDTH`] bytes.
#[cfg(target_arch = "x86_64")]
#[inline]
fn eq_mask(chunk: &[u8], target: u8) -> u32 {
    debug_assert!(chunk.len() >= SIMD_BATCH_WIDTH);
    // SSE2 is part of the x86_64 baseline, so no runtime detection is
    // needed for a 16-lane compare.
    unsafe {
        use std::arch::x86_64::*;
        let data = _mm_loadu_si128(chunk.as_ptr() as *const __m128i);
        let needle = _mm_set1_epi8(target as i8);
        _mm_movemask_epi8(_mm_cmpeq_epi8(data, needle)) as u32
    }
}

/// 16-bit mask of lanes equal to `target` (NEON version).
#[cfg(target_arch = "aarch64")]
#[inline]
fn eq_mask(chunk: &[u8], target: u8) -> u32 {
    debug_assert!(chunk.len() >= SIMD_BATCH_WIDTH);
    unsafe {
        use std::arch::aarch64::*;
        const BIT_POSITIONS: [u8; 16] = [1, 2, 4, 8, 16, 32, 64, 128, 1, 2, 4, 8, 16, 32, 64, 128];
        let data = vld1q_u8(chunk.as_ptr());
        let needle = vdupq_n_u8(target);
        let equal = vceqq_u8(data, needle);
        // NEON has no movemask; weight each hit lane by its bit position
        // and add across halves.
        let weighted = vandq_u8(equal, vld1q_u8(BIT_POSITIONS.as_ptr()));
        let low = vaddv_u8(vget_low_u8(weighted)) as u32;
        let high = vaddv_u8(vget_high_u8(weighted)) as u32;
        low | (high << 8)
    }
}

/// Scalar fallback producing the same 16-bit masks.
#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
#[inline]
fn eq_mask(chunk: &[u8], target: u8) -> u32 {
    let mut mask = 0u32;
    for (lane, &byte) in chunk[..SIMD_BATCH_WIDTH].iter().enumerate() {
        if byte == target {
            mask |= 1 << lane;
        }
    }
    mask
}
