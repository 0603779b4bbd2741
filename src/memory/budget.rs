//! # Memory Budget Implementation
//!
//! Hard-limit memory accounting shared by everything that allocates on
//! behalf of a row container: the row arena, the string heap and the
//! partition table.
//!
//! ## Design Principles
//!
//! 1. **Hard limits**: allocations that would exceed the budget fail
//!    immediately, before memory is touched
//! 2. **Per-pool attribution**: usage is tracked per subsystem so stats can
//!    tell arena growth from heap growth
//! 3. **Thread safety**: all counters are atomics, allocation is lock-free
//!
//! ## Accounting Granularity
//!
//! The arena and heap reserve whole ranges/segments, not individual rows or
//! chunks, so the number of atomic operations is proportional to growth
//! events rather than stores.

use std::sync::atomic::{AtomicUsize, Ordering};

use eyre::Result;
use sysinfo::System;

use crate::config::{DEFAULT_BUDGET_PERCENT, MIN_BUDGET_FLOOR};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pool {
    Rows,
    Heap,
    Partitions,
}

impl Pool {
    pub fn name(&self) -> &'static str {
        match self {
            Pool::Rows => "rows",
            Pool::Heap => "heap",
            Pool::Partitions => "partitions",
        }
    }

    fn index(&self) -> usize {
        match self {
            Pool::Rows => 0,
            Pool::Heap => 1,
            Pool::Partitions => 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BudgetStats {
    pub total_limit: usize,
    pub total_used: usize,
    pub rows_used: usize,
    pub heap_used: usize,
    pub partitions_used: usize,
}

impl BudgetStats {
    pub fn available(&self) -> usize {
        self.total_limit.saturating_sub(self.total_used)
    }
}

impl std::fmt::Display for BudgetStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "rows:{},heap:{},partitions:{},total:{}/{}",
            self.rows_used, self.heap_used, self.partitions_used, self.total_used, self.total_limit
        )
    }
}

#[derive(Debug)]
pub struct MemoryError {
    pub pool: Pool,
    pub requested: usize,
    pub available: usize,
}

impl std::fmt::Display for MemoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "out of memory in pool '{}': requested {} bytes, {} available",
            self.pool.name(),
            self.requested,
            self.available
        )
    }
}

impl std::error::Error for MemoryError {}

#[derive(Debug)]
pub struct MemoryBudget {
    limit: usize,
    total: AtomicUsize,
    pools: [AtomicUsize; 3],
}

impl MemoryBudget {
    /// Budget sized from system RAM: a fixed fraction with a floor for
    /// small hosts.
    pub fn auto_detect() -> Self {
        let mut system = System::new();
        system.refresh_memory();
        let total = system.total_memory() as usize;
        let limit = (total * DEFAULT_BUDGET_PERCENT / 100).max(MIN_BUDGET_FLOOR);
        Self::with_limit(limit)
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit,
            total: AtomicUsize::new(0),
            pools: [AtomicUsize::new(0), AtomicUsize::new(0), AtomicUsize::new(0)],
        }
    }

    /// No enforcement; accounting only.
    pub fn unlimited() -> Self {
        Self::with_limit(usize::MAX)
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn used(&self) -> usize {
        self.total.load(Ordering::Relaxed)
    }

    pub fn allocate(&self, pool: Pool, bytes: usize) -> Result<()> {
        let previous = self.total.fetch_add(bytes, Ordering::Relaxed);
        if previous.saturating_add(bytes) > self.limit {
            self.total.fetch_sub(bytes, Ordering::Relaxed);
            return Err(MemoryError {
                pool,
                requested: bytes,
                available: self.limit.saturating_sub(previous),
            }
            .into());
        }
        self.pools[pool.index()].fetch_add(bytes, Ordering::Relaxed);
        Ok(())
    }

    pub fn release(&self, pool: Pool, bytes: usize) {
        self.total.fetch_sub(bytes, Ordering::Relaxed);
        self.pools[pool.index()].fetch_sub(bytes, Ordering::Relaxed);
    }

    pub fn stats(&self) -> BudgetStats {
        BudgetStats {
            total_limit: self.limit,
            total_used: self.total.load(Ordering::Relaxed),
            rows_used: self.pools[0].load(Ordering::Relaxed),
            heap_used: self.pools[1].load(Ordering::Relaxed),
            partitions_used: self.pools[2].load(Ordering::Relaxed),
        }
    }
}
