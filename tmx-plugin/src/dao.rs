//! Data-access objects: typed views over a decoded payload that handlers
//! consume. A DAO only has to be constructible from a [`Value`].

use tmx_value::{TmxError, Value};

/// The payload broadcast on `<plugin>/config/<key>` and
/// `<plugin>/status/<key>` whenever a cached value changes.
#[derive(Debug, Clone, PartialEq)]
pub struct TmxPluginDataUpdate {
    pub key: String,
    pub old_value: Value,
    pub new_value: Value,
}

impl TmxPluginDataUpdate {
    pub fn to_value(&self) -> Value {
        let mut out = Value::map();
        out.insert("key", self.key.clone());
        out.insert("old_value", self.old_value.clone());
        out.insert("new_value", self.new_value.clone());
        out
    }
}

impl TryFrom<Value> for TmxPluginDataUpdate {
    type Error = TmxError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        let key = value.get("key");
        if key.is_null() {
            return Err(TmxError::invalid_argument(
                "data update payload is missing its key",
            ));
        }
        Ok(Self {
            key: key.to_text(),
            old_value: value.get("old_value").clone(),
            new_value: value.get("new_value").clone(),
        })
    }
}

/// The error payload broadcast on `<plugin>/error`.
#[derive(Debug, Clone, PartialEq)]
pub struct TmxErrorReport {
    pub code: i64,
    pub message: String,
    pub source: String,
}

impl TmxErrorReport {
    pub fn to_value(&self) -> Value {
        let mut out = Value::map();
        out.insert("code", self.code);
        out.insert("message", self.message.clone());
        out.insert("source", self.source.clone());
        out
    }
}

impl TryFrom<Value> for TmxErrorReport {
    type Error = TmxError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Ok(Self {
            code: value.get("code").to_int(),
            message: value.get("message").to_text(),
            source: value.get("source").to_text(),
        })
    }
}
