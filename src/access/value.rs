use anyhow::{Result, bail};
use std::cmp::Ordering;

/// Data types supported by the engine.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Boolean = 1,
    Int32 = 2,
    Varchar = 4,
}

impl DataType {
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            1 => Ok(DataType::Boolean),
            2 => Ok(DataType::Int32),
            4 => Ok(DataType::Varchar),
            _ => bail!("Unknown data type: {}", value),
        }
    }
}

/// Values that can be stored in the database.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Int32(i32),
    String(String),
}

impl Value {
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Value::Null => None,
            Value::Boolean(_) => Some(DataType::Boolean),
            Value::Int32(_) => Some(DataType::Int32),
            Value::String(_) => Some(DataType::Varchar),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Total order used by sort and top-n; NULL sorts before everything.
    pub fn compare(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Null, _) => Ordering::Less,
            (_, Value::Null) => Ordering::Greater,
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            (Value::Int32(a), Value::Int32(b)) => a.cmp(b),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            // Mixed types fall back to a type-rank order to stay total.
            (a, b) => rank(a).cmp(&rank(b)),
        }
    }

    /// Arithmetic addition for SUM; NULL absorbs.
    pub fn add(&self, other: &Value) -> Result<Value> {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
            (Value::Int32(a), Value::Int32(b)) => Ok(Value::Int32(a.wrapping_add(*b))),
            (a, b) => bail!("Cannot add {:?} and {:?}", a, b),
        }
    }
}

// No floating-point variant exists, so equality is total.
impl Eq for Value {}

impl std::hash::Hash for Value {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        rank(self).hash(state);
        match self {
            Value::Null => {}
            Value::Boolean(b) => b.hash(state),
            Value::Int32(i) => i.hash(state),
            Value::String(s) => s.hash(state),
        }
    }
}

fn rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Boolean(_) => 1,
        Value::Int32(_) => 2,
        Value::String(_) => 3,
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Int32(i) => write!(f, "{}", i),
            Value::String(s) => write!(f, "{}", s),
        }
    }
}

/// Serialize a row of values into self-describing bytes.
pub fn serialize_values(values: &[Value]) -> Vec<u8> {
    let mut data = Vec::new();
    data.extend_from_slice(&(values.len() as u32).to_le_bytes());

    for value in values {
        match value {
            Value::Null => {
                data.push(0);
            }
            Value::Boolean(b) => {
                data.push(DataType::Boolean as u8);
                data.push(u8::from(*b));
            }
            Value::Int32(i) => {
                data.push(DataType::Int32 as u8);
                data.extend_from_slice(&i.to_le_bytes());
            }
            Value::String(s) => {
                data.push(DataType::Varchar as u8);
                let bytes = s.as_bytes();
                data.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
                data.extend_from_slice(bytes);
            }
        }
    }

    data
}

/// Deserialize bytes produced by `serialize_values`.
pub fn deserialize_values(data: &[u8]) -> Result<Vec<Value>> {
    if data.len() < 4 {
        bail!("Invalid value data: too short");
    }

    let count = u32::from_le_bytes(data[0..4].try_into().unwrap()) as usize;
    let mut offset = 4;
    let mut values = Vec::with_capacity(count);

    for _ in 0..count {
        if offset >= data.len() {
            bail!("Invalid value data: truncated");
        }
        let tag = data[offset];
        offset += 1;
        match tag {
            0 => values.push(Value::Null),
            1 => {
                if offset + 1 > data.len() {
                    bail!("Invalid value data: truncated boolean");
                }
                values.push(Value::Boolean(data[offset] != 0));
                offset += 1;
            }
            2 => {
                if offset + 4 > data.len() {
                    bail!("Invalid value data: truncated int32");
                }
                values.push(Value::Int32(i32::from_le_bytes(
                    data[offset..offset + 4].try_into().unwrap(),
                )));
                offset += 4;
            }
            4 => {
                if offset + 4 > data.len() {
                    bail!("Invalid value data: truncated string length");
                }
                let len =
                    u32::from_le_bytes(data[offset..offset + 4].try_into().unwrap()) as usize;
                offset += 4;
                if offset + len > data.len() {
                    bail!("Invalid value data: truncated string");
                }
                values.push(Value::String(
                    String::from_utf8_lossy(&data[offset..offset + len]).into_owned(),
                ));
                offset += len;
            }
            _ => bail!("Unknown value tag: {}", tag),
        }
    }

    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_round_trip() {
        let values = vec![
            Value::Int32(-42),
            Value::String("hello".to_string()),
            Value::Boolean(true),
            Value::Null,
        ];

        let data = serialize_values(&values);
        let restored = deserialize_values(&data).unwrap();
        assert_eq!(restored, values);
    }

    #[test]
    fn test_empty_row() {
        let data = serialize_values(&[]);
        assert_eq!(deserialize_values(&data).unwrap(), Vec::<Value>::new());
    }

    #[test]
    fn test_compare() {
        assert_eq!(
            Value::Int32(1).compare(&Value::Int32(2)),
            Ordering::Less
        );
        assert_eq!(
            Value::String("b".into()).compare(&Value::String("a".into())),
            Ordering::Greater
        );
        assert_eq!(Value::Null.compare(&Value::Int32(0)), Ordering::Less);
        assert_eq!(Value::Null.compare(&Value::Null), Ordering::Equal);
    }

    #[test]
    fn test_add() {
        assert_eq!(
            Value::Int32(2).add(&Value::Int32(3)).unwrap(),
            Value::Int32(5)
        );
        assert_eq!(Value::Int32(2).add(&Value::Null).unwrap(), Value::Null);
        assert!(Value::Boolean(true).add(&Value::Int32(1)).is_err());
    }

    #[test]
    fn test_deserialize_rejects_garbage() {
        assert!(deserialize_values(&[1, 2]).is_err());
        let mut data = serialize_values(&[Value::Int32(1)]);
        data.truncate(data.len() - 2);
        assert!(deserialize_values(&data).is_err());
    }
}
