//! # DecodedVector
//!
//! Random-access accessor over one column of input values, the store-side
//! collaborator of the row container. A `DecodedVector` owns its values;
//! `store` reads them by index and never retains references past the call.

use eyre::{ensure, Result};

use crate::types::{DataType, Value};

#[derive(Debug)]
pub struct DecodedVector {
    data_type: DataType,
    values: Vec<Value>,
    may_have_nulls: bool,
}

impl DecodedVector {
    /// Wraps a column of values. Every value must be null or match
    /// `data_type`; custom types are backed by int8.
    pub fn new(data_type: DataType, values: Vec<Value>) -> Result<Self> {
        for (index, value) in values.iter().enumerate() {
            ensure!(
                value.is_null() || kind_matches(&data_type, value),
                "value at index {} does not match column type {}",
                index,
                data_type
            );
        }
        let may_have_nulls = values.iter().any(Value::is_null);
        Ok(Self {
            data_type,
            values,
            may_have_nulls,
        })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn data_type(&self) -> &DataType {
        &self.data_type
    }

    #[inline]
    pub fn is_null_at(&self, index: usize) -> bool {
        self.values[index].is_null()
    }

    pub fn may_have_nulls(&self) -> bool {
        self.may_have_nulls
    }

    #[inline]
    pub fn value_at(&self, index: usize) -> &Value {
        &self.values[index]
    }

    /// Raw bytes of a text or blob value.
    pub fn bytes_at(&self, index: usize) -> &[u8] {
        match &self.values[index] {
            Value::Text(s) => s.as_bytes(),
            Value::Blob(b) => b,
            other => panic!("bytes_at on non-string value {other:?}"),
        }
    }
}

fn kind_matches(data_type: &DataType, value: &Value) -> bool {
    matches!(
        (data_type, value),
        (DataType::Bool, Value::Bool(_))
            | (DataType::Int2, Value::Int2(_))
            | (DataType::Int4, Value::Int4(_))
            | (DataType::Int8, Value::Int8(_))
            | (DataType::Float4, Value::Float4(_))
            | (DataType::Float8, Value::Float8(_))
            | (DataType::Date, Value::Date(_))
            | (DataType::Timestamp, Value::Timestamp(_))
            | (DataType::Text, Value::Text(_))
            | (DataType::Blob, Value::Blob(_))
            | (DataType::Array, Value::Array(_))
            | (DataType::Struct, Value::Struct(_))
            | (DataType::Map, Value::Map(_))
            | (DataType::Custom(_), Value::Int8(_))
    )
}
