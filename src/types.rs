//! Core types shared by the parser, the catalog and the runtime.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Namespace prefix of every remote command name.
pub const COMMAND_NAMESPACE: &str = "API";

/// First port the remote application listens on.
pub const BASE_PORT: u16 = 19723;

/// Number of ports above [`BASE_PORT`] that are probed.
pub const MAX_PORT_OFFSET: u16 = 20;

/// Default host of the remote application.
pub const DEFAULT_HOST: &str = "http://127.0.0.1";

/// Oldest release the binding layout supports.
pub const MIN_RELEASE: u32 = 24;

/// Returns the JSON type name for error messages.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Short rendering of a value for error messages.
pub fn summarize(value: &Value) -> String {
    const LIMIT: usize = 60;
    let text = value.to_string();
    if text.chars().count() <= LIMIT {
        return text;
    }
    let mut short: String = text.chars().take(LIMIT).collect();
    short.push_str("...");
    short
}

/// Equality that treats `1` and `1.0` as the same number.
///
/// Objects compare key by key regardless of order, arrays element-wise.
pub fn semantic_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            if let (Some(x), Some(y)) = (x.as_i64(), y.as_i64()) {
                return x == y;
            }
            if let (Some(x), Some(y)) = (x.as_u64(), y.as_u64()) {
                return x == y;
            }
            match (x.as_f64(), y.as_f64()) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            }
        }
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(a, b)| semantic_eq(a, b))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x
                    .iter()
                    .all(|(k, v)| y.get(k).map(|w| semantic_eq(v, w)).unwrap_or(false))
        }
        _ => a == b,
    }
}

/// Primitive kinds of the schema dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrimitiveKind {
    Boolean,
    Integer,
    Number,
    String,
    Uuid,
}

impl PrimitiveKind {
    /// Parse a JSON Schema `type` keyword plus optional `format`.
    pub fn from_schema(type_name: &str, format: Option<&str>) -> Option<Self> {
        match (type_name, format) {
            ("string", Some("uuid")) => Some(PrimitiveKind::Uuid),
            ("boolean", _) => Some(PrimitiveKind::Boolean),
            ("integer", _) => Some(PrimitiveKind::Integer),
            ("number", _) => Some(PrimitiveKind::Number),
            ("string", _) => Some(PrimitiveKind::String),
            _ => None,
        }
    }

    /// The catalog token for this kind (`int`, `float`, `str`, `bool`, `UUID`).
    pub fn token(&self) -> &'static str {
        match self {
            PrimitiveKind::Boolean => "bool",
            PrimitiveKind::Integer => "int",
            PrimitiveKind::Number => "float",
            PrimitiveKind::String => "str",
            PrimitiveKind::Uuid => "UUID",
        }
    }

    /// Inverse of [`PrimitiveKind::token`].
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "bool" => Some(PrimitiveKind::Boolean),
            "int" => Some(PrimitiveKind::Integer),
            "float" => Some(PrimitiveKind::Number),
            "str" => Some(PrimitiveKind::String),
            "UUID" => Some(PrimitiveKind::Uuid),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, PrimitiveKind::Integer | PrimitiveKind::Number)
    }
}
