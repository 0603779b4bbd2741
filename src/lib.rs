//! # rowpack - In-Memory Row Store for Query Execution
//!
//! rowpack packs tuples (keys, dependent columns, aggregation accumulators)
//! into a dense fixed-width byte layout so that group-by tables, hash-join
//! build sides, order-by and spill pipelines can address rows by raw
//! pointer and hash/compare them at vector speed. This implementation
//! prioritizes:
//!
//! - **One layout computation**: offsets, null bits and alignment are
//!   planned once at construction; rows are opaque byte slices afterwards
//! - **Fixed-stride rows**: variable-width payloads live in a side heap so
//!   iteration and partition scans stay pointer arithmetic
//! - **Zero-allocation reuse**: erased rows thread a free list through
//!   their own payload bytes and are recycled in O(1)
//!
//! ## Quick Start
//!
//! ```ignore
//! use rowpack::{DataType, DecodedVector, MemoryBudget, RowContainer,
//!               RowContainerOptions, Value};
//! use std::sync::Arc;
//!
//! let mut container = RowContainer::new(
//!     vec![DataType::Int4, DataType::Text],
//!     false,
//!     vec![],
//!     vec![DataType::Float8],
//!     RowContainerOptions::default(),
//!     Arc::new(MemoryBudget::auto_detect()),
//! );
//!
//! let keys = DecodedVector::new(DataType::Int4, vec![Value::Int4(7)])?;
//! let row = container.new_row()?;
//! container.store(&keys, 0, row, 0)?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------+
//! |        RowContainer (lifecycle, I/O)         |
//! +----------------------+----------------------+
//! |  Layout Planner      |  Iteration/Partitions |
//! |  (offsets, bits)     |  (cursors, SIMD scan) |
//! +----------------------+----------------------+
//! |  Column I/O, Hash/Compare, Serialization     |
//! +----------------------+----------------------+
//! |   Row Arena          |     String Heap       |
//! |   (fixed stride)     |  (multipart chunks)   |
//! +----------------------+----------------------+
//! |            Memory Budget (shared)            |
//! +---------------------------------------------+
//! ```
//!
//! ## Module Overview
//!
//! - [`container`]: the row container, layout planner, iteration,
//!   partitioned scanning, serialization and the sort comparator
//! - [`heap`]: side allocator for variable-width payloads
//! - [`memory`]: memory budget and the row arena
//! - [`types`]: data types, runtime values, compare flags, hashing
//! - [`vector`]: decoded input columns
//! - [`rowserde`]: self-describing serialization of nested values
//! - [`accumulator`]: opaque aggregate-state descriptors
//!
//! ## Thread Safety
//!
//! A container is single-writer. After `create_row_partitions` seals it,
//! readers may share it across threads; the probed bit is the only
//! mutable location and is set with a relaxed atomic OR.

pub mod accumulator;
pub mod config;
pub mod container;
pub mod heap;
pub mod memory;
pub mod rowserde;
pub mod types;
pub mod vector;

/// Raw pointer to a row. Only valid for the container that allocated it,
/// until that container is cleared or dropped.
pub type RowPtr = *mut u8;

pub use accumulator::{Accumulator, AggregateFunction};
pub use container::{
    ColumnStats, RowComparator, RowContainer, RowContainerIterator, RowContainerOptions,
    RowPartitions, SerializedRows,
};
pub use heap::{HeapView, StringHeap, StringView};
pub use memory::{BudgetStats, MemoryBudget, MemoryError, Pool, RowArena};
pub use types::{CompareFlags, DataType, SortOrder, TypeComparator, Value};
pub use vector::DecodedVector;
