//! The default codec. Maps become objects, arrays arrays, integers and
//! floats numbers, enums their names when one is known, byte strings
//! hex-encoded strings.

use crate::codec::{names, TmxDecoder, TmxEncoder};
use tmx_value::hex::encode_hex;
use tmx_value::{TmxError, TmxResult, Value};

pub struct JsonCodec;

fn to_json(value: &Value) -> serde_json::Value {
    use serde_json::Value as Json;
    match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Int { value, .. } => Json::from(*value as i64),
        Value::UInt { value, .. } => Json::from(*value as u64),
        Value::Float { value, .. } => {
            serde_json::Number::from_f64(*value).map_or(Json::Null, Json::Number)
        }
        Value::String(s) => Json::String(s.clone()),
        Value::Bytes { data, .. } => Json::String(encode_hex(data)),
        Value::Enum { value, name } => match name {
            Some(n) => Json::String(n.clone()),
            None => Json::from(*value),
        },
        Value::Array(items) => Json::Array(items.iter().map(to_json).collect()),
        Value::Map(entries) => Json::Object(
            entries
                .iter()
                .map(|(k, v)| (k.clone(), to_json(v)))
                .collect(),
        ),
    }
}

fn from_json(json: &serde_json::Value) -> Value {
    use serde_json::Value as Json;
    match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::from(i)
            } else if let Some(u) = n.as_u64() {
                Value::from(u)
            } else {
                Value::from(n.as_f64().unwrap_or(0.0))
            }
        }
        Json::String(s) => Value::String(s.clone()),
        Json::Array(items) => Value::Array(items.iter().map(from_json).collect()),
        Json::Object(entries) => {
            let mut out = Value::map();
            for (k, v) in entries {
                out.insert(k.clone(), from_json(v));
            }
            out
        }
    }
}

impl TmxEncoder for JsonCodec {
    fn name(&self) -> &'static str {
        names::JSON
    }

    fn encode(&self, value: &Value, out: &mut Vec<u8>) -> TmxResult<()> {
        serde_json::to_writer(&mut *out, &to_json(value))
            .map_err(|e| TmxError::bad_message(format!("JSON encode failed: {}", e)))
    }
}

impl TmxDecoder for JsonCodec {
    fn name(&self) -> &'static str {
        names::JSON
    }

    fn decode(&self, bytes: &[u8]) -> TmxResult<Value> {
        let json: serde_json::Value = serde_json::from_slice(bytes)
            .map_err(|e| TmxError::malformed(format!("JSON decode failed: {}", e)))?;
        Ok(from_json(&json))
    }
}
