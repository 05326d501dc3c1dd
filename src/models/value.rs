//! Parameter and column values.
//!
//! [`Value::Null`] is the database NULL sentinel. It is distinct from a parameter
//! that has no value at all (`Option::None` on [`crate::models::Parameter`]).

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A value bound to a parameter or read from a column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Database NULL
    Null,
    Bool(bool),
    /// Integer value (stored as i64 for maximum range)
    Int(i64),
    Float(f64),
    Timestamp(NaiveDateTime),
    Text(String),
    /// Binary data (base64 encoded in JSON)
    #[serde(with = "base64_bytes")]
    Bytes(Vec<u8>),
    Json(JsonValue),
}

impl Value {
    /// Check if this value is the NULL sentinel.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the type name of this value for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Timestamp(_) => "timestamp",
            Self::Text(_) => "text",
            Self::Bytes(_) => "bytes",
            Self::Json(_) => "json",
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Bool(v) => Some(*v as i64),
            Self::Text(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Length in characters (text) or bytes (binary), used for size checks.
    pub fn len(&self) -> Option<usize> {
        match self {
            Self::Text(s) => Some(s.chars().count()),
            Self::Bytes(b) => Some(b.len()),
            _ => None,
        }
    }

    /// Parse a command-line literal: JSON scalars map to their natural variant,
    /// anything that is not valid JSON is taken as text.
    pub fn from_literal(literal: &str) -> Self {
        match serde_json::from_str::<JsonValue>(literal) {
            Ok(JsonValue::Null) => Self::Null,
            Ok(JsonValue::Bool(b)) => Self::Bool(b),
            Ok(JsonValue::Number(n)) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Float(n.as_f64().unwrap_or_default()),
            },
            Ok(JsonValue::String(s)) => Self::Text(s),
            Ok(json) => Self::Json(json),
            Err(_) => Self::Text(literal.to_string()),
        }
    }

    /// Convert to JSON for display.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Self::Null => JsonValue::Null,
            Self::Bool(v) => JsonValue::Bool(*v),
            Self::Int(v) => JsonValue::from(*v),
            Self::Float(v) => JsonValue::from(*v),
            Self::Timestamp(v) => JsonValue::String(v.to_string()),
            Self::Text(v) => JsonValue::String(v.clone()),
            Self::Bytes(v) => serde_json::to_value(Self::Bytes(v.clone())).unwrap_or_default(),
            Self::Json(v) => v.clone(),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
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

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Self::Timestamp(v)
    }
}

/// Provider type declared on a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    /// Accept whatever value is supplied
    #[default]
    Unspecified,
    Boolean,
    Integer,
    Float,
    /// Exact numeric, carried as integer, float or text
    Decimal,
    Text,
    Binary,
    Json,
    Timestamp,
}

impl ParamType {
    /// Check whether a value may be bound to a parameter of this type.
    /// NULL is compatible with every type.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) | (Self::Unspecified, _) => true,
            (Self::Boolean, Value::Bool(_)) => true,
            (Self::Integer, Value::Int(_)) => true,
            (Self::Float, Value::Float(_) | Value::Int(_)) => true,
            (Self::Decimal, Value::Int(_) | Value::Float(_) | Value::Text(_)) => true,
            (Self::Text, Value::Text(_)) => true,
            (Self::Binary, Value::Bytes(_)) => true,
            (Self::Json, Value::Json(_) | Value::Text(_)) => true,
            (Self::Timestamp, Value::Timestamp(_)) => true,
            _ => false,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Unspecified => "unspecified",
            Self::Boolean => "boolean",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Decimal => "decimal",
            Self::Text => "text",
            Self::Binary => "binary",
            Self::Json => "json",
            Self::Timestamp => "timestamp",
        }
    }
}

/// Custom serialization for binary data as base64.
mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        STANDARD.encode(bytes).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_sentinel() {
        assert!(Value::Null.is_null());
        assert!(!Value::Int(0).is_null());
        assert!(!Value::Text(String::new()).is_null());
    }

    #[test]
    fn test_param_type_accepts() {
        assert!(ParamType::Integer.accepts(&Value::Int(1)));
        assert!(ParamType::Integer.accepts(&Value::Null));
        assert!(!ParamType::Integer.accepts(&Value::Text("1".into())));
        assert!(ParamType::Float.accepts(&Value::Int(3)));
        assert!(ParamType::Decimal.accepts(&Value::Text("1.50".into())));
        assert!(ParamType::Unspecified.accepts(&Value::Bytes(vec![1, 2])));
        assert!(!ParamType::Binary.accepts(&Value::Text("abc".into())));
    }

    #[test]
    fn test_from_literal() {
        assert_eq!(Value::from_literal("42"), Value::Int(42));
        assert_eq!(Value::from_literal("1.5"), Value::Float(1.5));
        assert_eq!(Value::from_literal("true"), Value::Bool(true));
        assert_eq!(Value::from_literal("null"), Value::Null);
        assert_eq!(Value::from_literal("\"7\""), Value::Text("7".into()));
        assert_eq!(Value::from_literal("alice"), Value::Text("alice".into()));
    }

    #[test]
    fn test_len_counts_chars() {
        assert_eq!(Value::Text("héllo".into()).len(), Some(5));
        assert_eq!(Value::Bytes(vec![0; 4]).len(), Some(4));
        assert_eq!(Value::Int(12345).len(), None);
    }

    #[test]
    fn test_bytes_serialize_as_base64() {
        let json = serde_json::to_string(&Value::Bytes(vec![1, 2, 3])).unwrap();
        assert_eq!(json, "\"AQID\"");
    }
}
