//! Schema-tagged rows and their byte encoding.
//!
//! Each cell starts with a null byte. Boolean and integer payloads are a
//! fixed 8 bytes (little-endian) so in-place rewrites of fixed-width rows
//! never outgrow their slot; varchars carry a 4-byte length prefix.

use crate::errors::ExecutionError;
use crate::types::{Schema, TypeId, Value};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tuple {
    values: Vec<Value>,
}

impl Tuple {
    pub fn new(values: Vec<Value>) -> Self {
        Tuple { values }
    }

    /// All-null row of the schema's arity, used by deletes.
    pub fn null_tuple(schema: &Schema) -> Self {
        Tuple {
            values: vec![Value::Null; schema.column_count()],
        }
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn value(&self, idx: usize) -> &Value {
        &self.values[idx]
    }

    pub fn set_value(&mut self, idx: usize, value: Value) {
        self.values[idx] = value;
    }

    pub fn project(&self, attrs: &[usize]) -> Tuple {
        Tuple {
            values: attrs.iter().map(|&i| self.values[i].clone()).collect(),
        }
    }

    pub fn encode(&self, schema: &Schema) -> Vec<u8> {
        debug_assert_eq!(self.values.len(), schema.column_count());
        let mut buf = Vec::new();
        for (value, column) in self.values.iter().zip(schema.columns()) {
            buf.push(value.is_null() as u8);
            match (column.type_id, value) {
                (TypeId::Boolean, Value::Boolean(v)) => {
                    buf.extend_from_slice(&(*v as i64).to_le_bytes());
                }
                (TypeId::Integer, Value::Integer(v)) => {
                    buf.extend_from_slice(&v.to_le_bytes());
                }
                (TypeId::Varchar, Value::Varchar(v)) => {
                    buf.extend_from_slice(&(v.len() as u32).to_le_bytes());
                    buf.extend_from_slice(v.as_bytes());
                }
                (TypeId::Boolean | TypeId::Integer, Value::Null) => {
                    buf.extend_from_slice(&0i64.to_le_bytes());
                }
                (TypeId::Varchar, Value::Null) => {
                    buf.extend_from_slice(&0u32.to_le_bytes());
                }
                (expected, got) => {
                    debug_assert!(false, "cell {got:?} does not match column type {expected:?}");
                    match expected {
                        TypeId::Varchar => buf.extend_from_slice(&0u32.to_le_bytes()),
                        _ => buf.extend_from_slice(&0i64.to_le_bytes()),
                    }
                }
            }
        }
        buf
    }

    /// Decodes a row; trailing bytes beyond the schema's cells are ignored,
    /// since slots keep their original reservation across shrinking updates.
    pub fn decode(schema: &Schema, bytes: &[u8]) -> Result<Tuple, ExecutionError> {
        let mut offset = 0usize;
        let mut values = Vec::with_capacity(schema.column_count());
        for column in schema.columns() {
            let is_null = *bytes.get(offset).ok_or_else(|| {
                ExecutionError::MalformedTuple(format!(
                    "row ends inside column {}",
                    column.name
                ))
            })? != 0;
            offset += 1;

            match column.type_id {
                TypeId::Boolean | TypeId::Integer => {
                    let end = offset + 8;
                    let raw = bytes.get(offset..end).ok_or_else(|| {
                        ExecutionError::MalformedTuple(format!(
                            "row ends inside column {}",
                            column.name
                        ))
                    })?;
                    let v = i64::from_le_bytes(raw.try_into().expect("8-byte slice"));
                    offset = end;
                    values.push(if is_null {
                        Value::Null
                    } else if column.type_id == TypeId::Boolean {
                        Value::Boolean(v != 0)
                    } else {
                        Value::Integer(v)
                    });
                }
                TypeId::Varchar => {
                    let end = offset + 4;
                    let raw = bytes.get(offset..end).ok_or_else(|| {
                        ExecutionError::MalformedTuple(format!(
                            "row ends inside column {}",
                            column.name
                        ))
                    })?;
                    let len = u32::from_le_bytes(raw.try_into().expect("4-byte slice")) as usize;
                    offset = end;
                    let raw = bytes.get(offset..offset + len).ok_or_else(|| {
                        ExecutionError::MalformedTuple(format!(
                            "varchar column {} overruns the row",
                            column.name
                        ))
                    })?;
                    let text = String::from_utf8_lossy(raw).into_owned();
                    offset += len;
                    values.push(if is_null {
                        Value::Null
                    } else {
                        Value::Varchar(text)
                    });
                }
            }
        }
        Ok(Tuple { values })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Column;

    fn schema() -> Schema {
        Schema::new(vec![
            Column::new("id", TypeId::Integer),
            Column::new("flag", TypeId::Boolean),
            Column::new("name", TypeId::Varchar),
        ])
    }

    #[test]
    fn encode_decode_round_trips() {
        let schema = schema();
        let tuple = Tuple::new(vec![
            Value::Integer(-42),
            Value::Boolean(true),
            Value::Varchar("granite".into()),
        ]);
        let bytes = tuple.encode(&schema);
        assert_eq!(Tuple::decode(&schema, &bytes).unwrap(), tuple);
    }

    #[test]
    fn nulls_round_trip_and_null_tuple_is_all_null() {
        let schema = schema();
        let tuple = Tuple::null_tuple(&schema);
        assert!(tuple.values().iter().all(Value::is_null));

        let bytes = tuple.encode(&schema);
        assert_eq!(Tuple::decode(&schema, &bytes).unwrap(), tuple);
    }

    #[test]
    fn trailing_bytes_are_tolerated() {
        let schema = schema();
        let tuple = Tuple::new(vec![
            Value::Integer(1),
            Value::Null,
            Value::Varchar("x".into()),
        ]);
        let mut bytes = tuple.encode(&schema);
        bytes.extend_from_slice(&[0, 0, 0, 0]);
        assert_eq!(Tuple::decode(&schema, &bytes).unwrap(), tuple);
    }

    #[test]
    fn truncated_rows_are_rejected() {
        let schema = schema();
        let bytes = Tuple::new(vec![
            Value::Integer(1),
            Value::Boolean(false),
            Value::Varchar("abcdef".into()),
        ])
        .encode(&schema);
        assert!(Tuple::decode(&schema, &bytes[..bytes.len() - 3]).is_err());
    }

    #[test]
    fn null_filled_delete_image_never_outgrows_fixed_width_rows() {
        let schema = Schema::new(vec![
            Column::new("a", TypeId::Integer),
            Column::new("b", TypeId::Integer),
        ]);
        let row = Tuple::new(vec![Value::Integer(7), Value::Integer(8)]).encode(&schema);
        let blank = Tuple::null_tuple(&schema).encode(&schema);
        assert_eq!(row.len(), blank.len());
    }
}
