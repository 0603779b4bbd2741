//! # Complex-Value Serialization
//!
//! Serializer, comparator and hasher for nested values stored in the string
//! heap. The encoding is self-describing so a payload can be compared or
//! hashed without consulting the schema.
//!
//! ## Wire Format
//!
//! ```text
//! value  := tag (u8) payload
//! tag    := 0 null | 1 bool | 2 int2 | 3 int4 | 4 int8 | 5 float4
//!         | 6 float8 | 7 date | 8 timestamp | 9 text | 10 blob
//!         | 11 array | 12 struct | 13 map
//! scalars: little-endian fixed width
//! text/blob: u32 length || bytes
//! array/struct: u32 count || value*
//! map: u32 count || (key value)*
//! ```
//!
//! Nested nulls compare as values (null first); the stop-at-null handling
//! mode is unsupported and rejected.

use std::cmp::Ordering;

use eyre::{bail, ensure, Result};

use crate::types::{hash_value, CompareFlags, Value};

const TAG_NULL: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_INT2: u8 = 2;
const TAG_INT4: u8 = 3;
const TAG_INT8: u8 = 4;
const TAG_FLOAT4: u8 = 5;
const TAG_FLOAT8: u8 = 6;
const TAG_DATE: u8 = 7;
const TAG_TIMESTAMP: u8 = 8;
const TAG_TEXT: u8 = 9;
const TAG_BLOB: u8 = 10;
const TAG_ARRAY: u8 = 11;
const TAG_STRUCT: u8 = 12;
const TAG_MAP: u8 = 13;

pub fn serialize_into(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Null => out.push(TAG_NULL),
        Value::Bool(v) => {
            out.push(TAG_BOOL);
            out.push(*v as u8);
        }
        Value::Int2(v) => {
            out.push(TAG_INT2);
            out.extend_from_slice(&v.to_le_bytes());
        }
        Value::Int4(v) => {
            out.push(TAG_INT4);
            out.extend_from_slice(&v.to_le_bytes());
        }
        Value::Int8(v) => {
            out.push(TAG_INT8);
            out.extend_from_slice(&v.to_le_bytes());
        }
        Value::Float4(v) => {
            out.push(TAG_FLOAT4);
            out.extend_from_slice(&v.to_le_bytes());
        }
        Value::Float8(v) => {
            out.push(TAG_FLOAT8);
            out.extend_from_slice(&v.to_le_bytes());
        }
        Value::Date(v) => {
            out.push(TAG_DATE);
            out.extend_from_slice(&v.to_le_bytes());
        }
        Value::Timestamp(v) => {
            out.push(TAG_TIMESTAMP);
            out.extend_from_slice(&v.to_le_bytes());
        }
        Value::Text(v) => {
            out.push(TAG_TEXT);
            out.extend_from_slice(&(v.len() as u32).to_le_bytes());
            out.extend_from_slice(v.as_bytes());
        }
        Value::Blob(v) => {
            out.push(TAG_BLOB);
            out.extend_from_slice(&(v.len() as u32).to_le_bytes());
            out.extend_from_slice(v);
        }
        Value::Array(items) | Value::Struct(items) => {
            out.push(if matches!(value, Value::Array(_)) {
                TAG_ARRAY
            } else {
                TAG_STRUCT
            });
            out.extend_from_slice(&(items.len() as u32).to_le_bytes());
            for item in items {
                serialize_into(item, out);
            }
        }
        Value::Map(entries) => {
            out.push(TAG_MAP);
            out.extend_from_slice(&(entries.len() as u32).to_le_bytes());
            for (key, val) in entries {
                serialize_into(key, out);
                serialize_into(val, out);
            }
        }
    }
}

pub fn deserialize(bytes: &[u8]) -> Result<Value> {
    let mut cursor = Cursor { bytes, pos: 0 };
    let value = cursor.read_value()?;
    ensure!(
        cursor.pos == bytes.len(),
        "trailing bytes after serialized value"
    );
    Ok(value)
}

/// Compares two serialized payloads. Direction flags are applied by the
/// caller; this is the natural order.
pub fn compare_bytes(left: &[u8], right: &[u8], flags: CompareFlags) -> Result<Ordering> {
    check_null_handling(flags);
    let left = deserialize(left)?;
    let right = deserialize(right)?;
    Ok(left.compare(&right))
}

/// Compares a serialized payload against an in-memory value.
pub fn compare_with_value(left: &[u8], right: &Value, flags: CompareFlags) -> Result<Ordering> {
    check_null_handling(flags);
    let left = deserialize(left)?;
    Ok(left.compare(right))
}

pub fn hash_bytes(bytes: &[u8]) -> Result<u64> {
    Ok(hash_value(&deserialize(bytes)?))
}

fn check_null_handling(flags: CompareFlags) {
    assert!(
        flags.null_as_value,
        "not supported null handling mode"
    );
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        ensure!(
            self.pos + n <= self.bytes.len(),
            "serialized value truncated at byte {}",
            self.pos
        );
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_u32(&mut self) -> Result<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
    }

    fn read_value(&mut self) -> Result<Value> {
        let tag = self.take(1)?[0];
        Ok(match tag {
            TAG_NULL => Value::Null,
            TAG_BOOL => Value::Bool(self.take(1)?[0] != 0),
            TAG_INT2 => Value::Int2(i16::from_le_bytes(self.take(2)?.try_into().unwrap())),
            TAG_INT4 => Value::Int4(i32::from_le_bytes(self.take(4)?.try_into().unwrap())),
            TAG_INT8 => Value::Int8(i64::from_le_bytes(self.take(8)?.try_into().unwrap())),
            TAG_FLOAT4 => Value::Float4(f32::from_le_bytes(self.take(4)?.try_into().unwrap())),
            TAG_FLOAT8 => Value::Float8(f64::from_le_bytes(self.take(8)?.try_into().unwrap())),
            TAG_DATE => Value::Date(i32::from_le_bytes(self.take(4)?.try_into().unwrap())),
            TAG_TIMESTAMP => {
                Value::Timestamp(i64::from_le_bytes(self.take(8)?.try_into().unwrap()))
            }
            TAG_TEXT => {
                let len = self.read_u32()? as usize;
                let bytes = self.take(len)?;
                Value::Text(String::from_utf8(bytes.to_vec())?)
            }
            TAG_BLOB => {
                let len = self.read_u32()? as usize;
                Value::Blob(self.take(len)?.to_vec())
            }
            TAG_ARRAY | TAG_STRUCT => {
                let count = self.read_u32()? as usize;
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    items.push(self.read_value()?);
                }
                if tag == TAG_ARRAY {
                    Value::Array(items)
                } else {
                    Value::Struct(items)
                }
            }
            TAG_MAP => {
                let count = self.read_u32()? as usize;
                let mut entries = Vec::with_capacity(count);
                for _ in 0..count {
                    let key = self.read_value()?;
                    let val = self.read_value()?;
                    entries.push((key, val));
                }
                Value::Map(entries)
            }
            other => bail!("unknown value tag {}", other),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(value: Value) {
        let mut bytes = Vec::new();
        serialize_into(&value, &mut bytes);
        assert_eq!(deserialize(&bytes).unwrap(), value);
    }

    #[test]
    fn scalars_round_trip() {
        round_trip(Value::Null);
        round_trip(Value::Bool(true));
        round_trip(Value::Int4(-7));
        round_trip(Value::Int8(i64::MIN));
        round_trip(Value::Float8(3.25));
        round_trip(Value::Text("hello".into()));
        round_trip(Value::Blob(vec![0, 255, 3]));
    }

    #[test]
    fn nested_values_round_trip() {
        round_trip(Value::Array(vec![
            Value::Int4(1),
            Value::Null,
            Value::Int4(3),
        ]));
        round_trip(Value::Struct(vec![
            Value::Text("k".into()),
            Value::Array(vec![Value::Float8(1.5)]),
        ]));
        round_trip(Value::Map(vec![
            (Value::Text("a".into()), Value::Int8(1)),
            (Value::Text("b".into()), Value::Null),
        ]));
    }

    #[test]
    fn compare_orders_serialized_payloads() {
        let mut a = Vec::new();
        let mut b = Vec::new();
        serialize_into(&Value::Array(vec![Value::Int4(1), Value::Int4(2)]), &mut a);
        serialize_into(&Value::Array(vec![Value::Int4(1), Value::Int4(3)]), &mut b);
        assert_eq!(
            compare_bytes(&a, &b, CompareFlags::default()).unwrap(),
            Ordering::Less
        );
        assert_eq!(
            compare_bytes(&a, &a, CompareFlags::default()).unwrap(),
            Ordering::Equal
        );
    }

    #[test]
    fn hash_matches_value_hash() {
        let value = Value::Map(vec![(Value::Text("k".into()), Value::Int8(9))]);
        let mut bytes = Vec::new();
        serialize_into(&value, &mut bytes);
        assert_eq!(hash_bytes(&bytes).unwrap(), crate::types::hash_value(&value));
    }

    #[test]
    #[should_panic(expected = "not supported null handling mode")]
    fn stop_at_null_mode_is_rejected() {
        let flags = CompareFlags {
            null_as_value: false,
            ..CompareFlags::default()
        };
        let mut bytes = Vec::new();
        serialize_into(&Value::Int4(1), &mut bytes);
        let _ = compare_bytes(&bytes, &bytes, flags);
    }

    #[test]
    fn truncated_payload_is_an_error() {
        let mut bytes = Vec::new();
        serialize_into(&Value::Text("hello".into()), &mut bytes);
        bytes.truncate(bytes.len() - 1);
        assert!(deserialize(&bytes).is_err());
    }
}
