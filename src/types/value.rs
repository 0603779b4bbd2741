//! # Runtime Value Representation
//!
//! `Value` is the owned runtime form of a cell: the input side of `store`
//! (through `DecodedVector`) and the output side of `extract_column`.
//! Nested array/struct/map values are the payloads the container serializes
//! into the string heap.
//!
//! ## Comparison Semantics
//!
//! `compare` is a total order within one data type: null sorts before any
//! non-null value, floats are NaN-aware (NaN equals NaN, NaN after
//! everything else), arrays and structs compare element-wise then by
//! length, maps compare entry-wise in stored order. Comparing values of
//! different kinds is a programming error.

use std::cmp::Ordering;

use crate::types::compare_f64;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int2(i16),
    Int4(i32),
    Int8(i64),
    Float4(f32),
    Float8(f64),
    Date(i32),
    Timestamp(i64),
    Text(String),
    Blob(Vec<u8>),
    Array(Vec<Value>),
    Struct(Vec<Value>),
    Map(Vec<(Value, Value)>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Logical byte size of the value, as accounted by column statistics.
    pub fn data_size(&self) -> usize {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int2(_) => 2,
            Value::Int4(_) | Value::Date(_) | Value::Float4(_) => 4,
            Value::Int8(_) | Value::Timestamp(_) | Value::Float8(_) => 8,
            Value::Text(s) => s.len(),
            Value::Blob(b) => b.len(),
            Value::Array(items) | Value::Struct(items) => {
                items.iter().map(Value::data_size).sum()
            }
            Value::Map(entries) => entries
                .iter()
                .map(|(k, v)| k.data_size() + v.data_size())
                .sum(),
        }
    }

    /// Total order over same-kind values. Null sorts first, NaN last.
    pub fn compare(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Null, _) => Ordering::Less,
            (_, Value::Null) => Ordering::Greater,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int2(a), Value::Int2(b)) => a.cmp(b),
            (Value::Int4(a), Value::Int4(b)) => a.cmp(b),
            (Value::Int8(a), Value::Int8(b)) => a.cmp(b),
            (Value::Date(a), Value::Date(b)) => a.cmp(b),
            (Value::Timestamp(a), Value::Timestamp(b)) => a.cmp(b),
            (Value::Float4(a), Value::Float4(b)) => compare_f64(*a as f64, *b as f64),
            (Value::Float8(a), Value::Float8(b)) => compare_f64(*a, *b),
            (Value::Text(a), Value::Text(b)) => a.as_bytes().cmp(b.as_bytes()),
            (Value::Blob(a), Value::Blob(b)) => a.cmp(b),
            (Value::Array(a), Value::Array(b)) | (Value::Struct(a), Value::Struct(b)) => {
                for (left, right) in a.iter().zip(b.iter()) {
                    let ord = left.compare(right);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            (Value::Map(a), Value::Map(b)) => {
                for ((ak, av), (bk, bv)) in a.iter().zip(b.iter()) {
                    let ord = ak.compare(bk);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                    let ord = av.compare(bv);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            (left, right) => panic!(
                "cannot compare values of different kinds: {left:?} vs {right:?}"
            ),
        }
    }
}
