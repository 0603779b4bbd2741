//! # Data Types and Comparison Flags
//!
//! This module defines the type system the row store dispatches on:
//! - `DataType`: column types with fixed widths and row-slot sizes
//! - `Value`: owned runtime values, including nested array/struct/map data
//! - `CompareFlags` / `SortOrder`: ordering control for compare paths
//! - `TypeComparator`: hook for types that bring their own hash/compare
//!
//! ## Type Categories
//!
//! | Category | Types | Row slot |
//! |----------|-------|----------|
//! | **Fixed** | bool, int2, int4, int8, float4, float8, date, timestamp, custom | Direct bytes |
//! | **String** | text, blob | 16-byte `StringView` (inline or heap pointer) |
//! | **Complex** | array, struct, map | 16-byte `HeapView` over a serialized payload |
//!
//! ## Fixed-Width Type Sizes
//!
//! | Type | Size (bytes) |
//! |------|--------------|
//! | bool | 1 |
//! | int2 | 2 |
//! | int4 | 4 |
//! | int8 | 8 |
//! | float4 | 4 |
//! | float8 | 8 |
//! | date | 4 (days since epoch) |
//! | timestamp | 8 (microseconds since epoch) |
//! | custom | 8 (opaque int8 payload, ordered by the type's comparator) |
//!
//! ## Float Semantics
//!
//! Floats hash and compare NaN-aware: every NaN bit pattern hashes to the
//! canonical NaN and compares equal to any other NaN, and NaN orders after
//! all non-NaN values. This keeps group-by and order-by deterministic when
//! NaNs arrive with differing payloads.

mod value;

pub use value::Value;

use std::cmp::Ordering;
use std::fmt;
use std::hash::BuildHasher;
use std::mem;
use std::sync::Arc;

use crate::heap::{HeapView, StringView};

/// Hash/compare hook for types that define their own ordering over an
/// 8-byte backing value (for example timestamp-with-timezone packings).
pub trait TypeComparator: fmt::Debug + Send + Sync {
    fn hash(&self, value: i64) -> u64;
    fn compare(&self, left: i64, right: i64) -> Ordering;
}

#[derive(Debug, Clone)]
pub enum DataType {
    Bool,
    Int2,
    Int4,
    Int8,
    Float4,
    Float8,
    Date,
    Timestamp,
    Text,
    Blob,
    Array,
    Struct,
    Map,
    Custom(Arc<dyn TypeComparator>),
}

impl DataType {
    /// Logical width of the value, for fixed-width types.
    pub fn fixed_size(&self) -> Option<usize> {
        match self {
            DataType::Bool => Some(1),
            DataType::Int2 => Some(2),
            DataType::Int4 => Some(4),
            DataType::Int8 => Some(8),
            DataType::Float4 => Some(4),
            DataType::Float8 => Some(8),
            DataType::Date => Some(4),
            DataType::Timestamp => Some(8),
            DataType::Custom(_) => Some(8),
            DataType::Text
            | DataType::Blob
            | DataType::Array
            | DataType::Struct
            | DataType::Map => None,
        }
    }

    /// Bytes the value occupies inside a row. Variable-width types store a
    /// 16-byte view; everything else stores the value inline.
    pub fn slot_size(&self) -> usize {
        match self {
            DataType::Text | DataType::Blob => mem::size_of::<StringView>(),
            DataType::Array | DataType::Struct | DataType::Map => mem::size_of::<HeapView>(),
            _ => self.fixed_size().unwrap_or(0),
        }
    }

    pub fn is_variable_width(&self) -> bool {
        self.fixed_size().is_none()
    }

    pub fn is_string(&self) -> bool {
        matches!(self, DataType::Text | DataType::Blob)
    }

    pub fn is_complex(&self) -> bool {
        matches!(self, DataType::Array | DataType::Struct | DataType::Map)
    }

    pub fn custom_comparator(&self) -> Option<&Arc<dyn TypeComparator>> {
        match self {
            DataType::Custom(cmp) => Some(cmp),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DataType::Bool => "bool",
            DataType::Int2 => "int2",
            DataType::Int4 => "int4",
            DataType::Int8 => "int8",
            DataType::Float4 => "float4",
            DataType::Float8 => "float8",
            DataType::Date => "date",
            DataType::Timestamp => "timestamp",
            DataType::Text => "text",
            DataType::Blob => "blob",
            DataType::Array => "array",
            DataType::Struct => "struct",
            DataType::Map => "map",
            DataType::Custom(_) => "custom",
        }
    }
}

impl PartialEq for DataType {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (DataType::Custom(a), DataType::Custom(b)) => Arc::ptr_eq(a, b),
            _ => mem::discriminant(self) == mem::discriminant(other),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Ordering control for `compare` entry points.
///
/// `ascending` applies to value comparisons only; null ordering is decided
/// by `nulls_first` unmodified. `null_as_value` must stay `true` for
/// complex-type comparisons; the stop-at-null mode is unsupported.
#[derive(Debug, Clone, Copy)]
pub struct CompareFlags {
    pub nulls_first: bool,
    pub ascending: bool,
    pub equals_only: bool,
    pub null_as_value: bool,
}

impl Default for CompareFlags {
    fn default() -> Self {
        Self {
            nulls_first: true,
            ascending: true,
            equals_only: false,
            null_as_value: true,
        }
    }
}

/// Per-key sort direction for the row comparator.
#[derive(Debug, Clone, Copy)]
pub struct SortOrder {
    pub ascending: bool,
    pub nulls_first: bool,
}

impl SortOrder {
    pub fn asc_nulls_first() -> Self {
        Self {
            ascending: true,
            nulls_first: true,
        }
    }

    pub fn desc_nulls_last() -> Self {
        Self {
            ascending: false,
            nulls_first: false,
        }
    }
}

impl From<SortOrder> for CompareFlags {
    fn from(order: SortOrder) -> Self {
        Self {
            nulls_first: order.nulls_first,
            ascending: order.ascending,
            ..Self::default()
        }
    }
}

/// Hash emitted for null cells. Mixed like any other value hash.
pub const NULL_HASH: u64 = 1;

// Fixed seeds keep value hashes stable across containers, so hashes of the
// same key computed on the build and probe sides agree.
fn hasher_state() -> ahash::RandomState {
    ahash::RandomState::with_seeds(
        0x243f_6a88_85a3_08d3,
        0x1319_8a2e_0370_7344,
        0xa409_3822_299f_31d0,
        0x082e_fa98_ec4e_6c89,
    )
}

pub fn hash_bytes(bytes: &[u8]) -> u64 {
    hasher_state().hash_one(bytes)
}

pub fn hash_i64(value: i64) -> u64 {
    hasher_state().hash_one(value)
}

pub fn hash_f32(value: f32) -> u64 {
    let canonical = if value.is_nan() { f32::NAN } else { value };
    hasher_state().hash_one(canonical.to_bits())
}

pub fn hash_f64(value: f64) -> u64 {
    let canonical = if value.is_nan() { f64::NAN } else { value };
    hasher_state().hash_one(canonical.to_bits())
}

/// Combines an existing hash with a new column hash.
pub fn hash_mix(left: u64, right: u64) -> u64 {
    let mut h = left ^ right.wrapping_mul(0x9e37_79b9_7f4a_7c15);
    h ^= h >> 32;
    h = h.wrapping_mul(0xff51_afd7_ed55_8ccd);
    h ^ (h >> 32)
}

/// NaN-aware total order: NaN equals NaN and sorts after all other values.
pub fn compare_f64(left: f64, right: f64) -> Ordering {
    if left.is_nan() {
        if right.is_nan() {
            Ordering::Equal
        } else {
            Ordering::Greater
        }
    } else if right.is_nan() {
        Ordering::Less
    } else {
        // Neither side is NaN, so partial_cmp is total here.
        left.partial_cmp(&right).unwrap_or(Ordering::Equal)
    }
}

/// Recursive value hash with the same per-kind functions the container
/// uses, so serialized complex payloads hash consistently with direct
/// scalar columns.
pub fn hash_value(value: &Value) -> u64 {
    match value {
        Value::Null => NULL_HASH,
        Value::Bool(v) => hash_i64(*v as i64),
        Value::Int2(v) => hash_i64(*v as i64),
        Value::Int4(v) => hash_i64(*v as i64),
        Value::Int8(v) => hash_i64(*v),
        Value::Float4(v) => hash_f32(*v),
        Value::Float8(v) => hash_f64(*v),
        Value::Date(v) => hash_i64(*v as i64),
        Value::Timestamp(v) => hash_i64(*v),
        Value::Text(v) => hash_bytes(v.as_bytes()),
        Value::Blob(v) => hash_bytes(v),
        Value::Array(items) | Value::Struct(items) => {
            let mut h = hash_i64(items.len() as i64);
            for item in items {
                h = hash_mix(h, hash_value(item));
            }
            h
        }
        Value::Map(entries) => {
            let mut h = hash_i64(entries.len() as i64);
            for (key, val) in entries {
                h = hash_mix(h, hash_value(key));
                h = hash_mix(h, hash_value(val));
            }
            h
        }
    }
}
