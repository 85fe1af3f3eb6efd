//! Event values handed to the sink by the host
//!
//! An event is a mapping from attribute name to an [`AttributeValue`], a small
//! polymorphic value tree. Key order is not significant; the codec emits keys
//! in sorted order because [`Event`] is a `BTreeMap`.

use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Attribute mapping for a single event
pub type Event = BTreeMap<String, AttributeValue>;

/// A single attribute value
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    List(Vec<AttributeValue>),
    Map(Event),
}

impl AttributeValue {
    /// Name of the variant, used in error messages
    pub fn kind(&self) -> &'static str {
        match self {
            AttributeValue::Null => "null",
            AttributeValue::Bool(_) => "bool",
            AttributeValue::Int(_) => "int",
            AttributeValue::Double(_) => "double",
            AttributeValue::String(_) => "string",
            AttributeValue::List(_) => "list",
            AttributeValue::Map(_) => "map",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Event> {
        match self {
            AttributeValue::Map(map) => Some(map),
            _ => None,
        }
    }
}

impl From<Value> for AttributeValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => AttributeValue::Null,
            Value::Bool(b) => AttributeValue::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => AttributeValue::Int(i),
                // u64 values above i64::MAX and all fractional values
                None => AttributeValue::Double(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => AttributeValue::String(s),
            Value::Array(items) => {
                AttributeValue::List(items.into_iter().map(AttributeValue::from).collect())
            }
            Value::Object(map) => AttributeValue::Map(
                map.into_iter()
                    .map(|(k, v)| (k, AttributeValue::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::String(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::String(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::Int(value)
    }
}

impl From<i32> for AttributeValue {
    fn from(value: i32) -> Self {
        AttributeValue::Int(value.into())
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        AttributeValue::Double(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Bool(value)
    }
}

impl From<Event> for AttributeValue {
    fn from(value: Event) -> Self {
        AttributeValue::Map(value)
    }
}

impl fmt::Display for AttributeValue {
    /// Renders the value the way it is substituted into option templates:
    /// strings verbatim, containers as compact JSON.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Null => write!(f, "null"),
            AttributeValue::Bool(b) => write!(f, "{b}"),
            AttributeValue::Int(i) => write!(f, "{i}"),
            AttributeValue::Double(d) => write!(f, "{d}"),
            AttributeValue::String(s) => write!(f, "{s}"),
            AttributeValue::List(_) | AttributeValue::Map(_) => {
                match crate::codec::JsonCodec::to_json(self) {
                    Ok(json) => write!(f, "{json}"),
                    Err(_) => write!(f, "{self:?}"),
                }
            }
        }
    }
}

/// Build an [`Event`] from `key => value` pairs
#[macro_export]
macro_rules! event {
    ($($key:expr => $value:expr),* $(,)?) => {{
        #[allow(unused_mut)]
        let mut event = $crate::event::Event::new();
        $(event.insert($key.to_string(), $crate::event::AttributeValue::from($value));)*
        event
    }};
}
