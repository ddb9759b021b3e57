//! XML codec. The payload is a single `<tmx>` element whose `type`
//! attribute names the value shape; map entries and array items nest as
//! `<entry key="...">` and `<item>` so arbitrary map keys survive.

use crate::codec::{names, TmxDecoder, TmxEncoder};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use tmx_value::hex::{decode_hex, encode_hex};
use tmx_value::{TmxError, TmxResult, Value};

pub struct XmlCodec;

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Int { .. } => "int",
        Value::UInt { .. } => "uint",
        Value::Float { .. } => "float",
        Value::String(_) => "string",
        Value::Bytes { .. } => "bytes",
        Value::Enum { .. } => "enum",
        Value::Array(_) => "array",
        Value::Map(_) => "properties",
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::Bytes { data, .. } => encode_hex(data),
        Value::Enum { value, name } => name.clone().unwrap_or_else(|| value.to_string()),
        other => other.to_text(),
    }
}

fn write_value(
    writer: &mut Writer<Vec<u8>>,
    tag: &str,
    key: Option<&str>,
    value: &Value,
) -> TmxResult<()> {
    let mut start = BytesStart::new(tag);
    if let Some(key) = key {
        start.push_attribute(("key", key));
    }
    start.push_attribute(("type", kind_name(value)));
    if let Value::Enum {
        value: raw,
        name: Some(_),
    } = value
    {
        start.push_attribute(("value", raw.to_string().as_str()));
    }

    macro_rules! emit {
        ($event:expr) => {
            writer
                .write_event($event)
                .map_err(|e| TmxError::bad_message(format!("XML encode failed: {}", e)))?
        };
    }

    match value {
        Value::Null => emit!(Event::Empty(start)),
        Value::Array(items) => {
            emit!(Event::Start(start));
            for item in items {
                write_value(writer, "item", None, item)?;
            }
            emit!(Event::End(BytesEnd::new(tag)));
        }
        Value::Map(entries) => {
            emit!(Event::Start(start));
            for (k, v) in entries {
                write_value(writer, "entry", Some(k), v)?;
            }
            emit!(Event::End(BytesEnd::new(tag)));
        }
        scalar => {
            emit!(Event::Start(start));
            let text = scalar_text(scalar);
            emit!(Event::Text(BytesText::new(&text)));
            emit!(Event::End(BytesEnd::new(tag)));
        }
    }
    Ok(())
}

struct Parsed {
    key: Option<String>,
    value: Value,
}

fn attr(start: &BytesStart, name: &str) -> TmxResult<Option<String>> {
    match start.try_get_attribute(name) {
        Ok(Some(a)) => match a.unescape_value() {
            Ok(v) => Ok(Some(v.into_owned())),
            Err(e) => Err(TmxError::malformed(format!("bad XML attribute: {}", e))),
        },
        Ok(None) => Ok(None),
        Err(e) => Err(TmxError::malformed(format!("bad XML attribute: {}", e))),
    }
}

fn scalar_from(kind: &str, text: &str, enum_value: Option<String>) -> TmxResult<Value> {
    Ok(match kind {
        "null" => Value::Null,
        "bool" => Value::Bool(text.trim().eq_ignore_ascii_case("true")),
        "int" => Value::from(text.trim().parse::<i64>().unwrap_or(0)),
        "uint" => Value::from(text.trim().parse::<u64>().unwrap_or(0)),
        "float" => Value::from(text.trim().parse::<f64>().unwrap_or(0.0)),
        "string" => Value::String(text.to_string()),
        "bytes" => Value::bytes(
            decode_hex(text)
                .ok_or_else(|| TmxError::malformed("bad hex in XML bytes element"))?,
        ),
        "enum" => match enum_value {
            Some(raw) => Value::enumerated(raw.trim().parse::<i64>().unwrap_or(0), text),
            None => Value::Enum {
                value: text.trim().parse::<i64>().unwrap_or(0),
                name: None,
            },
        },
        other => {
            return Err(TmxError::malformed(format!(
                "unknown XML value type {:?}",
                other
            )))
        }
    })
}

fn read_value(reader: &mut Reader<&[u8]>, start: BytesStart, empty: bool) -> TmxResult<Parsed> {
    let key = attr(&start, "key")?;
    let kind = attr(&start, "type")?.unwrap_or_else(|| "string".to_string());
    let enum_value = attr(&start, "value")?;

    if empty {
        return Ok(Parsed {
            key,
            value: scalar_from(&kind, "", enum_value)?,
        });
    }

    let mut text = String::new();
    let mut children: Vec<Parsed> = Vec::new();
    loop {
        match reader.read_event() {
            Ok(Event::Start(child)) => {
                children.push(read_value(reader, child.into_owned(), false)?)
            }
            Ok(Event::Empty(child)) => {
                children.push(read_value(reader, child.into_owned(), true)?)
            }
            Ok(Event::Text(t)) => {
                text.push_str(
                    &t.unescape()
                        .map_err(|e| TmxError::malformed(format!("bad XML text: {}", e)))?,
                );
            }
            Ok(Event::End(_)) => break,
            Ok(Event::Eof) => return Err(TmxError::malformed("truncated XML document")),
            Ok(_) => {}
            Err(e) => return Err(TmxError::malformed(format!("XML parse failed: {}", e))),
        }
    }

    let value = match kind.as_str() {
        "array" => Value::Array(children.into_iter().map(|p| p.value).collect()),
        "properties" => {
            let mut out = Value::map();
            for child in children {
                let key = child
                    .key
                    .ok_or_else(|| TmxError::malformed("map entry without key attribute"))?;
                out.insert(key, child.value);
            }
            out
        }
        scalar => scalar_from(scalar, &text, enum_value)?,
    };
    Ok(Parsed { key, value })
}

impl TmxEncoder for XmlCodec {
    fn name(&self) -> &'static str {
        names::XML
    }

    fn encode(&self, value: &Value, out: &mut Vec<u8>) -> TmxResult<()> {
        let mut writer = Writer::new(Vec::new());
        write_value(&mut writer, "tmx", None, value)?;
        out.extend_from_slice(&writer.into_inner());
        Ok(())
    }
}

impl TmxDecoder for XmlCodec {
    fn name(&self) -> &'static str {
        names::XML
    }

    fn decode(&self, bytes: &[u8]) -> TmxResult<Value> {
        let mut reader = Reader::from_reader(bytes);
        loop {
            match reader.read_event() {
                Ok(Event::Start(start)) => {
                    return Ok(read_value(&mut reader, start.into_owned(), false)?.value)
                }
                Ok(Event::Empty(start)) => {
                    return Ok(read_value(&mut reader, start.into_owned(), true)?.value)
                }
                Ok(Event::Decl(_)) | Ok(Event::Text(_)) | Ok(Event::Comment(_)) => {}
                Ok(Event::Eof) => return Err(TmxError::malformed("empty XML document")),
                Ok(_) => {}
                Err(e) => return Err(TmxError::malformed(format!("XML parse failed: {}", e))),
            }
        }
    }
}
