//! # Row Arena
//!
//! Bump allocator behind the row store. Memory is acquired from the budget
//! in large aligned ranges; rows are carved off the tail of the newest
//! range at a fixed stride. Ranges never move or shrink, so a row pointer
//! stays valid until `clear`.
//!
//! ```text
//! ranges: [ range 0 (full) ][ range 1 (full) ][ range 2 (partly filled) ]
//!           row row row ...   row row row ...   row row | free tail
//! ```
//!
//! Iteration visits ranges in allocation order; within a range, rows are
//! adjacent at the stride they were allocated with. Freed rows are not
//! returned here: the container threads them onto its own free list and
//! reuses them before asking the arena for new space.

use std::alloc::{alloc, dealloc, handle_alloc_error, Layout};
use std::sync::Arc;

use eyre::Result;

use crate::config::{ARENA_MAX_RANGE_SIZE, ARENA_MIN_RANGE_SIZE};
use crate::memory::{MemoryBudget, Pool};

struct ArenaRange {
    data: *mut u8,
    capacity: usize,
    fill: usize,
    layout: Layout,
}

pub struct RowArena {
    budget: Arc<MemoryBudget>,
    ranges: Vec<ArenaRange>,
    next_range_size: usize,
}

impl RowArena {
    pub fn new(budget: Arc<MemoryBudget>) -> Self {
        Self {
            budget,
            ranges: Vec::new(),
            next_range_size: ARENA_MIN_RANGE_SIZE,
        }
    }

    /// Returns a pointer to `size` fresh bytes aligned to `alignment`.
    /// Every call within one container uses the same alignment and a size
    /// that is a multiple of it, so rows within a range stay adjacent.
    pub fn allocate_fixed(&mut self, size: usize, alignment: usize) -> Result<*mut u8> {
        assert!(alignment.is_power_of_two(), "alignment can only be power of 2");
        assert!(size > 0 && size % alignment == 0);

        let needs_range = match self.ranges.last() {
            Some(range) => range.capacity - range.fill < size,
            None => true,
        };
        if needs_range {
            self.grow(size, alignment)?;
        }

        let range = self.ranges.last_mut().expect("grow pushed a range");
        let row = unsafe { range.data.add(range.fill) };
        range.fill += size;
        Ok(row)
    }

    fn grow(&mut self, min_size: usize, alignment: usize) -> Result<()> {
        let capacity = self.next_range_size.max(min_size);
        self.budget.allocate(Pool::Rows, capacity)?;

        let layout = Layout::from_size_align(capacity, alignment)
            .expect("arena range layout");
        let data = unsafe { alloc(layout) };
        if data.is_null() {
            handle_alloc_error(layout);
        }

        self.ranges.push(ArenaRange {
            data,
            capacity,
            fill: 0,
            layout,
        });
        self.next_range_size = (self.next_range_size * 2).min(ARENA_MAX_RANGE_SIZE);
        Ok(())
    }

    pub fn num_ranges(&self) -> usize {
        self.ranges.len()
    }

    /// Start pointer and filled length of range `index`. The filled length
    /// is an exact multiple of the strides allocated from it, so iterators
    /// can walk `fill / stride` rows without touching the free tail.
    pub fn range_at(&self, index: usize) -> (*mut u8, usize) {
        let range = &self.ranges[index];
        (range.data, range.fill)
    }

    /// Total bytes reserved from the budget.
    pub fn allocated_bytes(&self) -> usize {
        self.ranges.iter().map(|r| r.capacity).sum()
    }

    /// Reserved bytes not yet handed out.
    pub fn free_bytes(&self) -> usize {
        self.ranges.iter().map(|r| r.capacity - r.fill).sum()
    }

    pub fn clear(&mut self) {
        for range in self.ranges.drain(..) {
            unsafe { dealloc(range.data, range.layout) };
            self.budget.release(Pool::Rows, range.capacity);
        }
        self.next_range_size = ARENA_MIN_RANGE_SIZE;
    }
}

impl Drop for RowArena {
    fn drop(&mut self) {
        self.clear();
    }
}

// The arena owns its ranges exclusively; raw pointers are handed out under
// the container's single-writer contract.
unsafe impl Send for RowArena {}
unsafe impl Sync for RowArena {}

#[cfg(test)]
mod tests {
    use super::*;

    fn arena() -> RowArena {
        RowArena::new(Arc::new(MemoryBudget::unlimited()))
    }

    #[test]
    fn rows_in_one_range_are_adjacent() {
        let mut arena = arena();
        let first = arena.allocate_fixed(64, 8).unwrap();
        let second = arena.allocate_fixed(64, 8).unwrap();
        assert_eq!(first as usize + 64, second as usize);
        assert_eq!(arena.num_ranges(), 1);
        let (_, fill) = arena.range_at(0);
        assert_eq!(fill, 128);
    }

    #[test]
    fn allocation_respects_alignment() {
        let mut arena = arena();
        let row = arena.allocate_fixed(96, 32).unwrap();
        assert_eq!(row as usize % 32, 0);
        let row = arena.allocate_fixed(96, 32).unwrap();
        assert_eq!(row as usize % 32, 0);
    }

    #[test]
    fn arena_grows_into_new_ranges() {
        let mut arena = arena();
        let stride = 4096;
        let per_range = ARENA_MIN_RANGE_SIZE / stride;
        for _ in 0..per_range + 1 {
            arena.allocate_fixed(stride, 8).unwrap();
        }
        assert_eq!(arena.num_ranges(), 2);
        assert!(arena.free_bytes() > 0);
    }

    #[test]
    fn budget_failure_leaves_arena_unchanged() {
        let budget = Arc::new(MemoryBudget::with_limit(1024));
        let mut arena = RowArena::new(budget);
        assert!(arena.allocate_fixed(64, 8).is_err());
        assert_eq!(arena.num_ranges(), 0);
        assert_eq!(arena.allocated_bytes(), 0);
    }

    #[test]
    fn clear_releases_budget() {
        let budget = Arc::new(MemoryBudget::with_limit(ARENA_MIN_RANGE_SIZE));
        let mut arena = RowArena::new(budget.clone());
        arena.allocate_fixed(64, 8).unwrap();
        assert_eq!(budget.used(), ARENA_MIN_RANGE_SIZE);
        arena.clear();
        assert_eq!(budget.used(), 0);
    }
}
