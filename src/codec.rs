//! JSON encoding of events
//!
//! Walks the [`AttributeValue`] tree into a `serde_json::Value` and writes it
//! as a compact UTF-8 byte string. Non-finite doubles have no JSON
//! representation and are the only source of [`SinkError::EncodingFailure`].

use crate::error::{SinkError, SinkResult};
use crate::event::{AttributeValue, Event};
use serde_json::{Map, Number, Value};

/// Pure JSON codec for sink payloads
pub struct JsonCodec;

impl JsonCodec {
    /// Encode an event mapping into a compact JSON object
    pub fn encode(event: &Event) -> SinkResult<Vec<u8>> {
        let object = Self::map_to_json(event)?;
        serde_json::to_vec(&Value::Object(object))
            .map_err(|e| SinkError::encoding_failure(format!("Serialization error: {e}")))
    }

    /// Convert a single attribute value into its JSON form
    pub fn to_json(value: &AttributeValue) -> SinkResult<Value> {
        Ok(match value {
            AttributeValue::Null => Value::Null,
            AttributeValue::Bool(b) => Value::Bool(*b),
            AttributeValue::Int(i) => Value::Number((*i).into()),
            AttributeValue::Double(d) => Number::from_f64(*d)
                .map(Value::Number)
                .ok_or_else(|| {
                    SinkError::encoding_failure(format!("{d} is not representable in JSON"))
                })?,
            AttributeValue::String(s) => Value::String(s.clone()),
            AttributeValue::List(items) => Value::Array(
                items
                    .iter()
                    .map(Self::to_json)
                    .collect::<SinkResult<Vec<_>>>()?,
            ),
            AttributeValue::Map(map) => Value::Object(Self::map_to_json(map)?),
        })
    }

    fn map_to_json(map: &Event) -> SinkResult<Map<String, Value>> {
        map.iter()
            .map(|(key, value)| Ok((key.clone(), Self::to_json(value)?)))
            .collect()
    }
}
