//! CBOR codec. The only text-free built-in: byte strings survive a round
//! trip natively instead of through hex.

use crate::codec::{names, TmxDecoder, TmxEncoder};
use ciborium::value::Value as Cbor;
use tmx_value::{TmxError, TmxResult, Value};

pub struct CborCodec;

fn to_cbor(value: &Value) -> Cbor {
    match value {
        Value::Null => Cbor::Null,
        Value::Bool(b) => Cbor::Bool(*b),
        Value::Int { value, .. } => Cbor::Integer(
            ciborium::value::Integer::try_from(*value).unwrap_or_else(|_| 0i64.into()),
        ),
        Value::UInt { value, .. } => Cbor::Integer(
            ciborium::value::Integer::try_from(*value).unwrap_or_else(|_| 0i64.into()),
        ),
        Value::Float { value, .. } => Cbor::Float(*value),
        Value::String(s) => Cbor::Text(s.clone()),
        Value::Bytes { data, .. } => Cbor::Bytes(data.clone()),
        Value::Enum { value, name } => match name {
            Some(n) => Cbor::Text(n.clone()),
            None => Cbor::Integer((*value).into()),
        },
        Value::Array(items) => Cbor::Array(items.iter().map(to_cbor).collect()),
        Value::Map(entries) => Cbor::Map(
            entries
                .iter()
                .map(|(k, v)| (Cbor::Text(k.clone()), to_cbor(v)))
                .collect(),
        ),
    }
}

fn from_cbor(cbor: &Cbor) -> Value {
    match cbor {
        Cbor::Null => Value::Null,
        Cbor::Bool(b) => Value::Bool(*b),
        Cbor::Integer(i) => {
            let wide = i128::from(*i);
            if let Ok(v) = i64::try_from(wide) {
                Value::from(v)
            } else if wide >= 0 {
                Value::UInt {
                    bits: 128,
                    value: wide as u128,
                }
            } else {
                Value::Int {
                    bits: 128,
                    value: wide,
                }
            }
        }
        Cbor::Float(f) => Value::from(*f),
        Cbor::Text(s) => Value::String(s.clone()),
        Cbor::Bytes(b) => Value::bytes(b.clone()),
        Cbor::Array(items) => Value::Array(items.iter().map(from_cbor).collect()),
        Cbor::Map(entries) => {
            let mut out = Value::map();
            for (k, v) in entries {
                let key = match k {
                    Cbor::Text(s) => s.clone(),
                    other => format!("{:?}", other),
                };
                out.insert(key, from_cbor(v));
            }
            out
        }
        _ => Value::Null,
    }
}

impl TmxEncoder for CborCodec {
    fn name(&self) -> &'static str {
        names::CBOR
    }

    fn encode(&self, value: &Value, out: &mut Vec<u8>) -> TmxResult<()> {
        ciborium::ser::into_writer(&to_cbor(value), &mut *out)
            .map_err(|e| TmxError::bad_message(format!("CBOR encode failed: {}", e)))
    }
}

impl TmxDecoder for CborCodec {
    fn name(&self) -> &'static str {
        names::CBOR
    }

    fn decode(&self, bytes: &[u8]) -> TmxResult<Value> {
        let cbor: Cbor = ciborium::de::from_reader(bytes)
            .map_err(|e| TmxError::malformed(format!("CBOR decode failed: {}", e)))?;
        Ok(from_cbor(&cbor))
    }
}
