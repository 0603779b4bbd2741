//! # Configuration Constants
//!
//! This module centralizes the numeric configuration for rowpack. Constants are
//! grouped by functional area and interdependencies are documented next to the
//! values they constrain.
//!
//! ## Why Centralization?
//!
//! The row arena, the string heap and the partition table all make sizing
//! assumptions about each other (for example, partition pages must be a
//! multiple of the SIMD batch width or equality scans would straddle pages).
//! Co-locating the values keeps those assumptions visible and checkable.

/// Size of the first arena range. Later ranges double until
/// [`ARENA_MAX_RANGE_SIZE`].
pub const ARENA_MIN_RANGE_SIZE: usize = 64 * 1024;

/// Upper bound on a single arena range. Must be a multiple of
/// [`GROWTH_UNIT`] so `size_increment` estimates stay conservative.
pub const ARENA_MAX_RANGE_SIZE: usize = 1024 * 1024;

/// Granularity used when estimating how much the container must grow to
/// admit a batch of rows.
pub const GROWTH_UNIT: usize = 64 * 1024;

/// Size of one string-heap segment. Each segment is carved into
/// header-prefixed chunks; a segment must hold at least one maximal chunk
/// (`CHUNK_HEADER_SIZE + MAX_CHUNK_PAYLOAD`).
pub const HEAP_SEGMENT_SIZE: usize = 16 * 1024;

/// Maximum payload bytes in a single heap chunk. Anything longer is split
/// into a multipart chain.
pub const MAX_CHUNK_PAYLOAD: usize = 512;

/// Bytes a `StringView` stores inline before spilling to the heap. Fixed by
/// the 16-byte view layout: 4 size bytes leave 12 for data.
pub const STRING_INLINE_CAPACITY: usize = 12;

/// Size of one page of the partition-id table. Must be a multiple of
/// [`SIMD_BATCH_WIDTH`] so an equality batch never crosses a page.
pub const PARTITION_PAGE_SIZE: usize = 4096;

/// Lanes compared per step when scanning partition ids. 16 bytes is the
/// baseline vector width on both x86_64 (SSE2) and aarch64 (NEON); the
/// scalar fallback emulates the same width.
pub const SIMD_BATCH_WIDTH: usize = 16;

/// Rows released per iteration when `clear` walks accumulators that hold
/// external memory.
pub const CLEAR_BATCH_SIZE: usize = 1000;

/// Fraction of system RAM the auto-detected memory budget claims.
pub const DEFAULT_BUDGET_PERCENT: usize = 25;

/// Floor for the auto-detected budget so tiny hosts still get a workable
/// allowance.
pub const MIN_BUDGET_FLOOR: usize = 8 * 1024 * 1024;

const _: () = assert!(PARTITION_PAGE_SIZE % SIMD_BATCH_WIDTH == 0);
const _: () = assert!(HEAP_SEGMENT_SIZE >= 8 + MAX_CHUNK_PAYLOAD);
const _: () = assert!(ARENA_MAX_RANGE_SIZE % GROWTH_UNIT == 0);
