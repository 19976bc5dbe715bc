//! Property values and qualified state names.

use crate::error::{CoreError, CoreResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// A property value held by an entity state.
///
/// Floats are not representable so that values compare with `Eq`; store
/// them as text or scaled integers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    /// Absent value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed integer.
    Integer(i64),
    /// UTF-8 text.
    Text(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// Point in time.
    Timestamp(DateTime<Utc>),
    /// Ordered collection.
    List(Vec<Value>),
    /// Nested value object keyed by field name.
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Returns the kind name used in error messages.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Integer(_) => "integer",
            Self::Text(_) => "text",
            Self::Bytes(_) => "bytes",
            Self::Timestamp(_) => "timestamp",
            Self::List(_) => "list",
            Self::Map(_) => "map",
        }
    }

    /// Returns true for [`Value::Null`].
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns the text if this is a text value.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the integer if this is an integer value.
    #[must_use]
    pub const fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    fn mismatch(self, expected: &'static str) -> CoreError {
        CoreError::TypeMismatch {
            expected,
            found: self.kind(),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Integer(i64::from(v))
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Timestamp(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// Conversion between Rust types and [`Value`] for typed property access.
pub trait PropertyValue: Sized {
    /// Converts a stored value into `Self`.
    fn from_value(value: Value) -> CoreResult<Self>;

    /// Converts `self` into a storable value.
    fn into_value(self) -> Value;
}

impl PropertyValue for Value {
    fn from_value(value: Value) -> CoreResult<Self> {
        Ok(value)
    }

    fn into_value(self) -> Value {
        self
    }
}

impl PropertyValue for bool {
    fn from_value(value: Value) -> CoreResult<Self> {
        match value {
            Value::Bool(b) => Ok(b),
            other => Err(other.mismatch("bool")),
        }
    }

    fn into_value(self) -> Value {
        Value::Bool(self)
    }
}

impl PropertyValue for i64 {
    fn from_value(value: Value) -> CoreResult<Self> {
        match value {
            Value::Integer(i) => Ok(i),
            other => Err(other.mismatch("integer")),
        }
    }

    fn into_value(self) -> Value {
        Value::Integer(self)
    }
}

impl PropertyValue for i32 {
    fn from_value(value: Value) -> CoreResult<Self> {
        let wide = i64::from_value(value)?;
        Self::try_from(wide).map_err(|_| CoreError::TypeMismatch {
            expected: "i32",
            found: "integer",
        })
    }

    fn into_value(self) -> Value {
        Value::Integer(i64::from(self))
    }
}

impl PropertyValue for String {
    fn from_value(value: Value) -> CoreResult<Self> {
        match value {
            Value::Text(s) => Ok(s),
            other => Err(other.mismatch("text")),
        }
    }

    fn into_value(self) -> Value {
        Value::Text(self)
    }
}

impl PropertyValue for Vec<u8> {
    fn from_value(value: Value) -> CoreResult<Self> {
        match value {
            Value::Bytes(b) => Ok(b),
            other => Err(other.mismatch("bytes")),
        }
    }

    fn into_value(self) -> Value {
        Value::Bytes(self)
    }
}

impl PropertyValue for DateTime<Utc> {
    fn from_value(value: Value) -> CoreResult<Self> {
        match value {
            Value::Timestamp(t) => Ok(t),
            other => Err(other.mismatch("timestamp")),
        }
    }

    fn into_value(self) -> Value {
        Value::Timestamp(self)
    }
}

impl<T: PropertyValue> PropertyValue for Option<T> {
    fn from_value(value: Value) -> CoreResult<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }

    fn into_value(self) -> Value {
        self.map_or(Value::Null, PropertyValue::into_value)
    }
}

/// Name of a property or association, qualified by its declaring entity type.
///
/// Rendered as `Type:name`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct QualifiedName {
    declaring_type: String,
    name: String,
}

impl QualifiedName {
    /// Creates a qualified name.
    #[must_use]
    pub fn new(declaring_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            declaring_type: declaring_type.into(),
            name: name.into(),
        }
    }

    /// Returns the declaring entity type.
    #[must_use]
    pub fn declaring_type(&self) -> &str {
        &self.declaring_type
    }

    /// Returns the simple name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.declaring_type, self.name)
    }
}

impl FromStr for QualifiedName {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.rsplit_once(':') {
            Some((ty, name)) if !ty.is_empty() && !name.is_empty() => Ok(Self::new(ty, name)),
            _ => Err(CoreError::codec(format!("malformed qualified name: {s:?}"))),
        }
    }
}

impl TryFrom<String> for QualifiedName {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<QualifiedName> for String {
    fn from(value: QualifiedName) -> Self {
        value.to_string()
    }
}
