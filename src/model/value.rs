use crate::error::ModelError;
use std::fmt;

/// Logical type a [`Value`] was constructed from. Values read back from the
/// store carry [`ValueKind::Bytes`] because cells are untyped on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    String,
    Integer,
    Long,
    Double,
    Bytes,
}

impl ValueKind {
    fn as_str(self) -> &'static str {
        match self {
            ValueKind::String => "string",
            ValueKind::Integer => "integer",
            ValueKind::Long => "long",
            ValueKind::Double => "double",
            ValueKind::Bytes => "bytes",
        }
    }
}

/// Immutable cell payload.
///
/// Numeric values are encoded fixed-width big-endian, strings as UTF-8. The
/// typed accessors are pure functions of the stored bytes, so a value written
/// as `Value::from(111_i64)` and read back as raw bytes still answers
/// `to_long() == Ok(111)`.
#[derive(Clone)]
pub struct Value {
    kind: ValueKind,
    bytes: Vec<u8>,
}

impl Value {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            kind: ValueKind::Bytes,
            bytes: bytes.into(),
        }
    }

    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    pub fn to_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn to_text(&self) -> Result<String, ModelError> {
        String::from_utf8(self.bytes.clone())
            .map_err(|e| ModelError::Decode(format!("value is not valid utf-8: {e}")))
    }

    pub fn to_integer(&self) -> Result<i32, ModelError> {
        Ok(i32::from_be_bytes(self.fixed::<4>(ValueKind::Integer)?))
    }

    pub fn to_long(&self) -> Result<i64, ModelError> {
        Ok(i64::from_be_bytes(self.fixed::<8>(ValueKind::Long)?))
    }

    pub fn to_double(&self) -> Result<f64, ModelError> {
        Ok(f64::from_be_bytes(self.fixed::<8>(ValueKind::Double)?))
    }

    fn fixed<const N: usize>(&self, target: ValueKind) -> Result<[u8; N], ModelError> {
        self.bytes.as_slice().try_into().map_err(|_| {
            ModelError::Decode(format!(
                "cannot read {} from {} bytes (expected {N})",
                target.as_str(),
                self.bytes.len()
            ))
        })
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

impl Eq for Value {}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ValueKind::String => {
                write!(f, "Value::String({:?})", String::from_utf8_lossy(&self.bytes))
            }
            ValueKind::Integer => match self.to_integer() {
                Ok(v) => write!(f, "Value::Integer({v})"),
                Err(_) => write!(f, "Value::Integer({:?})", self.bytes),
            },
            ValueKind::Long => match self.to_long() {
                Ok(v) => write!(f, "Value::Long({v})"),
                Err(_) => write!(f, "Value::Long({:?})", self.bytes),
            },
            ValueKind::Double => match self.to_double() {
                Ok(v) => write!(f, "Value::Double({v})"),
                Err(_) => write!(f, "Value::Double({:?})", self.bytes),
            },
            ValueKind::Bytes => write!(f, "Value::Bytes({} bytes)", self.bytes.len()),
        }
    }
}

/// Renders the payload as (lossy) UTF-8, which is how stored text is read back.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.bytes))
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self {
            kind: ValueKind::String,
            bytes: value.as_bytes().to_vec(),
        }
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self {
            kind: ValueKind::String,
            bytes: value.into_bytes(),
        }
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self {
            kind: ValueKind::Integer,
            bytes: value.to_be_bytes().to_vec(),
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self {
            kind: ValueKind::Long,
            bytes: value.to_be_bytes().to_vec(),
        }
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self {
            kind: ValueKind::Double,
            bytes: value.to_be_bytes().to_vec(),
        }
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Self::from_bytes(value)
    }
}

impl From<&[u8]> for Value {
    fn from(value: &[u8]) -> Self {
        Self::from_bytes(value.to_vec())
    }
}
