//! Dynamic parameter values and their wire kinds.

use std::borrow::Cow;

use chrono::{DateTime, Utc};

use crate::geometry::Geometry;

/// A dynamically-typed parameter value.
///
/// This is what callers hand to the packet writer and the bulk encoder.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// NULL value
    Null,

    /// Boolean value
    Bool(bool),

    /// Signed integer
    Int(i64),

    /// Unsigned integer
    UInt(u64),

    /// Floating point
    Double(f64),

    /// Arbitrary precision decimal (stored as string)
    Decimal(String),

    /// Text string
    Text(String),

    /// Binary data
    Bytes(Vec<u8>),

    /// A point in time; rendered in the configured timezone when encoded
    DateTime(DateTime<Utc>),

    /// Spatial value
    Geometry(Geometry),

    /// JSON document. Objects carrying a geometry `type` tag are treated as
    /// geometries, everything else is sent as its JSON text.
    Json(serde_json::Value),

    /// SQL text rendered by the caller, substituted verbatim.
    Raw(String),
}

/// The closed set of encode paths a value can take.
///
/// Computed once per value by [`Value::kind`] and then dispatched with a
/// `match`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Null,
    Bool,
    Number,
    Date,
    Blob,
    Geometry,
    Text,
}

impl Value {
    /// Check if this value is NULL.
    pub const fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Infer the encode path for this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Null | Value::Json(serde_json::Value::Null) => ValueKind::Null,
            Value::Bool(_) => ValueKind::Bool,
            Value::Int(_) | Value::UInt(_) | Value::Double(_) | Value::Decimal(_) => {
                ValueKind::Number
            }
            Value::DateTime(_) => ValueKind::Date,
            Value::Bytes(_) => ValueKind::Blob,
            Value::Geometry(_) => ValueKind::Geometry,
            Value::Json(json) => {
                if Geometry::from_geojson(json).is_some() {
                    ValueKind::Geometry
                } else {
                    ValueKind::Text
                }
            }
            Value::Text(_) | Value::Raw(_) => ValueKind::Text,
        }
    }

    /// The geometry carried by this value, either directly or as a tagged
    /// JSON object.
    pub fn as_geometry(&self) -> Option<Cow<'_, Geometry>> {
        match self {
            Value::Geometry(g) => Some(Cow::Borrowed(g)),
            Value::Json(json) => Geometry::from_geojson(json).map(Cow::Owned),
            _ => None,
        }
    }

    /// Textual form used for values sent as strings (numbers, text, JSON, raw SQL).
    ///
    /// Returns `None` for values that have a dedicated binary form.
    pub fn to_text(&self) -> Option<Cow<'_, str>> {
        match self {
            Value::Int(v) => Some(Cow::Owned(v.to_string())),
            Value::UInt(v) => Some(Cow::Owned(v.to_string())),
            Value::Double(v) => Some(Cow::Owned(v.to_string())),
            Value::Decimal(s) | Value::Text(s) | Value::Raw(s) => Some(Cow::Borrowed(s)),
            Value::Json(json) => Some(Cow::Owned(json.to_string())),
            _ => None,
        }
    }

    /// Try to convert this value to a bool.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            Value::Int(v) => Some(*v != 0),
            Value::UInt(v) => Some(*v != 0),
            _ => None,
        }
    }

    /// Try to get this value as a byte slice.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            Value::Text(s) => Some(s.as_bytes()),
            _ => None,
        }
    }
}

// Conversion implementations
impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::UInt(u64::from(v))
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::UInt(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Bytes(v.to_vec())
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::DateTime(v)
    }
}

impl From<Geometry> for Value {
    fn from(v: Geometry) -> Self {
        Value::Geometry(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::Json(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}
