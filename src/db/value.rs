use chrono::{DateTime, FixedOffset, SecondsFormat};
use serde::ser::{Serialize, Serializer};

/// Dynamically-typed cell value as it travels between drivers, templates and
/// JSON payloads.
///
/// The universe of cell types is closed: engines scan into one of these
/// variants and serialization treats them uniformly. Byte-string cells render
/// as UTF-8 text and timestamps as RFC 3339 with offset, matching the
/// query-result JSON shape the gateway exposes.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(DateTime<FixedOffset>),
    Bytes(Vec<u8>),
    Json(serde_json::Value),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Builds a value from a JSON scalar, the shape trigger parameters and
    /// step parameter maps arrive in.
    pub fn from_json(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => SqlValue::Null,
            serde_json::Value::Bool(b) => SqlValue::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    SqlValue::Int(i)
                } else {
                    SqlValue::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => SqlValue::Text(s),
            other => SqlValue::Json(other),
        }
    }

}

impl Serialize for SqlValue {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            SqlValue::Null => serializer.serialize_none(),
            SqlValue::Bool(b) => serializer.serialize_bool(*b),
            SqlValue::Int(i) => serializer.serialize_i64(*i),
            SqlValue::Float(f) => serializer.serialize_f64(*f),
            SqlValue::Text(s) => serializer.serialize_str(s),
            SqlValue::Timestamp(ts) => {
                serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
            SqlValue::Bytes(b) => serializer.serialize_str(&String::from_utf8_lossy(b)),
            SqlValue::Json(v) => v.serialize(serializer),
        }
    }
}
