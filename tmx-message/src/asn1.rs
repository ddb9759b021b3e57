//! ASN.1 codecs over the TMX scalar module.
//!
//! The schema registry maps each value shape to the corresponding type
//! descriptor of the TMX ASN.1 module (BOOLEAN, INT8..INT64, UINT8..UINT64,
//! FLOAT32..FLOAT128, STRING8, ARRAY, PROPERTIES). Four transfer syntaxes
//! are provided; for everything except XER the produced bytes are further
//! hex-encoded so the payload stays a printable byte string inside the
//! envelope. Enum names and byte strings degrade to integers and hex text
//! respectively, the same documented loss as the JSON codec.

use crate::codec::{names, TmxDecoder, TmxEncoder};
use tmx_value::hex::{decode_hex, encode_hex};
use tmx_value::packing::{BitReader, BitWriter};
use tmx_value::{TmxError, TmxResult, Value};

/// The ASN.1 type descriptors of the TMX module, selected by value shape
/// and declared bit width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsnType {
    Null,
    Boolean,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
    Float128,
    String8,
    Array,
    Properties,
}

/// Schema lookup for a value. Enums resolve to INT64, byte strings to
/// STRING8 via their hex rendering.
pub fn schema_of(value: &Value) -> AsnType {
    match value {
        Value::Null => AsnType::Null,
        Value::Bool(_) => AsnType::Boolean,
        Value::Int { bits, .. } => match bits {
            0..=8 => AsnType::Int8,
            9..=16 => AsnType::Int16,
            17..=32 => AsnType::Int32,
            _ => AsnType::Int64,
        },
        Value::UInt { bits, .. } => match bits {
            0..=8 => AsnType::UInt8,
            9..=16 => AsnType::UInt16,
            17..=32 => AsnType::UInt32,
            _ => AsnType::UInt64,
        },
        Value::Float { bits, .. } => match bits {
            0..=32 => AsnType::Float32,
            33..=64 => AsnType::Float64,
            _ => AsnType::Float128,
        },
        Value::Enum { .. } => AsnType::Int64,
        Value::String(_) | Value::Bytes { .. } => AsnType::String8,
        Value::Array(_) => AsnType::Array,
        Value::Map(_) => AsnType::Properties,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferSyntax {
    Ber,
    Xer,
    Oer,
    Uper,
}

impl TransferSyntax {
    pub const ALL: [TransferSyntax; 4] = [
        TransferSyntax::Ber,
        TransferSyntax::Xer,
        TransferSyntax::Oer,
        TransferSyntax::Uper,
    ];

    pub fn codec_name(self) -> &'static str {
        match self {
            TransferSyntax::Ber => names::ASN1_BER,
            TransferSyntax::Xer => names::ASN1_XER,
            TransferSyntax::Oer => names::ASN1_OER,
            TransferSyntax::Uper => names::ASN1_UPER,
        }
    }
}

pub struct AsnCodec {
    syntax: TransferSyntax,
}

impl AsnCodec {
    pub fn new(syntax: TransferSyntax) -> Self {
        Self { syntax }
    }
}

// BER tags for the TMX module types.
const TAG_NULL: u8 = 0x05;
const TAG_BOOLEAN: u8 = 0x01;
const TAG_INTEGER: u8 = 0x02;
const TAG_FLOAT: u8 = 0x09;
const TAG_STRING: u8 = 0x0C;
const TAG_ARRAY: u8 = 0x30;
const TAG_PROPERTIES: u8 = 0x31;

fn ber_write_length(out: &mut Vec<u8>, len: usize) {
    if len < 128 {
        out.push(len as u8);
    } else {
        let bytes = len.to_be_bytes();
        let skip = bytes.iter().take_while(|b| **b == 0).count();
        out.push(0x80 | (bytes.len() - skip) as u8);
        out.extend_from_slice(&bytes[skip..]);
    }
}

fn ber_read_length(bytes: &[u8], pos: &mut usize) -> TmxResult<usize> {
    let first = *bytes
        .get(*pos)
        .ok_or_else(|| TmxError::message_size("truncated BER length"))?;
    *pos += 1;
    if first < 128 {
        return Ok(first as usize);
    }
    let count = (first & 0x7F) as usize;
    if count == 0 || count > 8 || *pos + count > bytes.len() {
        return Err(TmxError::malformed("bad BER length form"));
    }
    let mut len = 0usize;
    for _ in 0..count {
        len = (len << 8) | bytes[*pos] as usize;
        *pos += 1;
    }
    Ok(len)
}

fn signed_minimal_bytes(v: i128) -> Vec<u8> {
    let bytes = v.to_be_bytes();
    let mut start = 0;
    while start < 15 {
        let b = bytes[start];
        let next_msb = bytes[start + 1] & 0x80;
        if (b == 0x00 && next_msb == 0) || (b == 0xFF && next_msb != 0) {
            start += 1;
        } else {
            break;
        }
    }
    bytes[start..].to_vec()
}

fn ber_encode(value: &Value, out: &mut Vec<u8>) -> TmxResult<()> {
    match value {
        Value::Null => {
            out.push(TAG_NULL);
            out.push(0);
        }
        Value::Bool(b) => {
            out.push(TAG_BOOLEAN);
            out.push(1);
            out.push(if *b { 0xFF } else { 0x00 });
        }
        Value::Int { value, .. } => {
            out.push(TAG_INTEGER);
            let content = signed_minimal_bytes(*value);
            ber_write_length(out, content.len());
            out.extend_from_slice(&content);
        }
        Value::UInt { value, .. } => {
            out.push(TAG_INTEGER);
            let content = signed_minimal_bytes(*value as i128);
            ber_write_length(out, content.len());
            out.extend_from_slice(&content);
        }
        Value::Enum { value, .. } => {
            out.push(TAG_INTEGER);
            let content = signed_minimal_bytes(*value as i128);
            ber_write_length(out, content.len());
            out.extend_from_slice(&content);
        }
        Value::Float { value, .. } => {
            out.push(TAG_FLOAT);
            ber_write_length(out, 8);
            out.extend_from_slice(&value.to_be_bytes());
        }
        Value::String(s) => {
            out.push(TAG_STRING);
            ber_write_length(out, s.len());
            out.extend_from_slice(s.as_bytes());
        }
        Value::Bytes { data, .. } => {
            let hexed = encode_hex(data);
            out.push(TAG_STRING);
            ber_write_length(out, hexed.len());
            out.extend_from_slice(hexed.as_bytes());
        }
        Value::Array(items) => {
            let mut content = Vec::new();
            for item in items {
                ber_encode(item, &mut content)?;
            }
            out.push(TAG_ARRAY);
            ber_write_length(out, content.len());
            out.extend_from_slice(&content);
        }
        Value::Map(entries) => {
            let mut content = Vec::new();
            for (k, v) in entries {
                content.push(TAG_STRING);
                ber_write_length(&mut content, k.len());
                content.extend_from_slice(k.as_bytes());
                ber_encode(v, &mut content)?;
            }
            out.push(TAG_PROPERTIES);
            ber_write_length(out, content.len());
            out.extend_from_slice(&content);
        }
    }
    Ok(())
}

fn ber_decode_one(bytes: &[u8], pos: &mut usize) -> TmxResult<Value> {
    let tag = *bytes
        .get(*pos)
        .ok_or_else(|| TmxError::message_size("truncated BER value"))?;
    *pos += 1;
    let len = ber_read_length(bytes, pos)?;
    if *pos + len > bytes.len() {
        return Err(TmxError::message_size("truncated BER content"));
    }
    let content = &bytes[*pos..*pos + len];
    *pos += len;

    Ok(match tag {
        TAG_NULL => Value::Null,
        TAG_BOOLEAN => Value::Bool(content.first().copied().unwrap_or(0) != 0),
        TAG_INTEGER => {
            let mut acc: i128 = if content.first().map_or(false, |b| b & 0x80 != 0) {
                -1
            } else {
                0
            };
            for &b in content {
                acc = acc.wrapping_shl(8) | b as i128;
            }
            if let Ok(v) = i64::try_from(acc) {
                Value::from(v)
            } else if acc >= 0 {
                Value::UInt {
                    bits: 128,
                    value: acc as u128,
                }
            } else {
                Value::Int {
                    bits: 128,
                    value: acc,
                }
            }
        }
        TAG_FLOAT => {
            if content.len() != 8 {
                return Err(TmxError::malformed("bad FLOAT64 content length"));
            }
            let mut buf = [0u8; 8];
            buf.copy_from_slice(content);
            Value::from(f64::from_be_bytes(buf))
        }
        TAG_STRING => Value::String(
            std::str::from_utf8(content)
                .map_err(|_| TmxError::malformed("STRING8 content is not UTF-8"))?
                .to_string(),
        ),
        TAG_ARRAY => {
            let mut items = Vec::new();
            let mut inner = 0usize;
            while inner < content.len() {
                items.push(ber_decode_one(content, &mut inner)?);
            }
            Value::Array(items)
        }
        TAG_PROPERTIES => {
            let mut out = Value::map();
            let mut inner = 0usize;
            while inner < content.len() {
                let key = match ber_decode_one(content, &mut inner)? {
                    Value::String(s) => s,
                    _ => return Err(TmxError::malformed("PROPERTIES key is not a string")),
                };
                let value = ber_decode_one(content, &mut inner)?;
                out.insert(key, value);
            }
            out
        }
        other => {
            return Err(TmxError::malformed(format!(
                "unknown BER tag 0x{:02X}",
                other
            )))
        }
    })
}

// OER keeps the same TLV skeleton but writes integers at the fixed width
// of their schema slot instead of the minimal BER form. Containers recurse
// back through here so nested integers stay octet-aligned fixed-width too.
fn oer_encode(value: &Value, out: &mut Vec<u8>) -> TmxResult<()> {
    fn fixed_int(out: &mut Vec<u8>, v: i128, width: usize) {
        out.push(TAG_INTEGER);
        ber_write_length(out, width);
        let bytes = v.to_be_bytes();
        out.extend_from_slice(&bytes[16 - width..]);
    }

    match value {
        Value::Int { value, .. } => fixed_int(out, *value, 8),
        Value::UInt { value, .. } => fixed_int(out, *value as i128, 9),
        Value::Enum { value, .. } => fixed_int(out, *value as i128, 8),
        Value::Array(items) => {
            let mut content = Vec::new();
            for item in items {
                oer_encode(item, &mut content)?;
            }
            out.push(TAG_ARRAY);
            ber_write_length(out, content.len());
            out.extend_from_slice(&content);
        }
        Value::Map(entries) => {
            let mut content = Vec::new();
            for (k, v) in entries {
                content.push(TAG_STRING);
                ber_write_length(&mut content, k.len());
                content.extend_from_slice(k.as_bytes());
                oer_encode(v, &mut content)?;
            }
            out.push(TAG_PROPERTIES);
            ber_write_length(out, content.len());
            out.extend_from_slice(&content);
        }
        other => return ber_encode(other, out),
    }
    Ok(())
}

// UPER: a self-describing unaligned bit stream. Kind tags are 4 bits;
// integers carry a 7-bit significant-length prefix with zigzag mapping for
// signed values; strings, arrays and maps carry 16-bit counts.
const UK_NULL: u64 = 0;
const UK_FALSE: u64 = 1;
const UK_TRUE: u64 = 2;
const UK_INT: u64 = 3;
const UK_UINT: u64 = 4;
const UK_FLOAT: u64 = 5;
const UK_STRING: u64 = 6;
const UK_ARRAY: u64 = 7;
const UK_MAP: u64 = 8;

fn uper_write_uint(w: &mut BitWriter, v: u64) {
    let bits = if v == 0 { 1 } else { 64 - v.leading_zeros() as u8 };
    w.write_bits(bits as u64, 7);
    w.write_bits(v, bits);
}

fn uper_read_uint(r: &mut BitReader) -> TmxResult<u64> {
    let bits = r
        .read_bits(7)
        .ok_or_else(|| TmxError::message_size("truncated UPER integer"))?;
    r.read_bits(bits as u8)
        .ok_or_else(|| TmxError::message_size("truncated UPER integer"))
}

fn zigzag(v: i64) -> u64 {
    (v.wrapping_shl(1) ^ (v >> 63)) as u64
}

fn unzigzag(v: u64) -> i64 {
    ((v >> 1) as i64) ^ -((v & 1) as i64)
}

fn uper_encode(value: &Value, w: &mut BitWriter) -> TmxResult<()> {
    match value {
        Value::Null => w.write_bits(UK_NULL, 4),
        Value::Bool(b) => w.write_bits(if *b { UK_TRUE } else { UK_FALSE }, 4),
        Value::Int { value, .. } => {
            w.write_bits(UK_INT, 4);
            uper_write_uint(w, zigzag(*value as i64));
        }
        Value::Enum { value, .. } => {
            w.write_bits(UK_INT, 4);
            uper_write_uint(w, zigzag(*value));
        }
        Value::UInt { value, .. } => {
            w.write_bits(UK_UINT, 4);
            uper_write_uint(w, *value as u64);
        }
        Value::Float { value, .. } => {
            w.write_bits(UK_FLOAT, 4);
            let raw = value.to_bits();
            w.write_bits(raw >> 32, 32);
            w.write_bits(raw & 0xFFFF_FFFF, 32);
        }
        Value::String(s) => {
            w.write_bits(UK_STRING, 4);
            w.write_bits(s.len() as u64, 16);
            w.write_bytes(s.as_bytes());
        }
        Value::Bytes { data, .. } => {
            let hexed = encode_hex(data);
            w.write_bits(UK_STRING, 4);
            w.write_bits(hexed.len() as u64, 16);
            w.write_bytes(hexed.as_bytes());
        }
        Value::Array(items) => {
            w.write_bits(UK_ARRAY, 4);
            w.write_bits(items.len() as u64, 16);
            for item in items {
                uper_encode(item, w)?;
            }
        }
        Value::Map(entries) => {
            w.write_bits(UK_MAP, 4);
            w.write_bits(entries.len() as u64, 16);
            for (k, v) in entries {
                w.write_bits(k.len() as u64, 16);
                w.write_bytes(k.as_bytes());
                uper_encode(v, w)?;
            }
        }
    }
    Ok(())
}

fn uper_decode(r: &mut BitReader) -> TmxResult<Value> {
    let kind = r
        .read_bits(4)
        .ok_or_else(|| TmxError::message_size("truncated UPER value"))?;
    Ok(match kind {
        UK_NULL => Value::Null,
        UK_FALSE => Value::Bool(false),
        UK_TRUE => Value::Bool(true),
        UK_INT => Value::from(unzigzag(uper_read_uint(r)?)),
        UK_UINT => Value::from(uper_read_uint(r)?),
        UK_FLOAT => {
            let hi = r
                .read_bits(32)
                .ok_or_else(|| TmxError::message_size("truncated UPER float"))?;
            let lo = r
                .read_bits(32)
                .ok_or_else(|| TmxError::message_size("truncated UPER float"))?;
            Value::from(f64::from_bits((hi << 32) | lo))
        }
        UK_STRING => {
            let len = r
                .read_bits(16)
                .ok_or_else(|| TmxError::message_size("truncated UPER string"))?;
            let bytes = r
                .read_bytes(len as usize)
                .ok_or_else(|| TmxError::message_size("truncated UPER string"))?;
            Value::String(
                String::from_utf8(bytes)
                    .map_err(|_| TmxError::malformed("UPER string is not UTF-8"))?,
            )
        }
        UK_ARRAY => {
            let len = r
                .read_bits(16)
                .ok_or_else(|| TmxError::message_size("truncated UPER array"))?;
            let mut items = Vec::with_capacity(len as usize);
            for _ in 0..len {
                items.push(uper_decode(r)?);
            }
            Value::Array(items)
        }
        UK_MAP => {
            let len = r
                .read_bits(16)
                .ok_or_else(|| TmxError::message_size("truncated UPER map"))?;
            let mut out = Value::map();
            for _ in 0..len {
                let klen = r
                    .read_bits(16)
                    .ok_or_else(|| TmxError::message_size("truncated UPER key"))?;
                let kbytes = r
                    .read_bytes(klen as usize)
                    .ok_or_else(|| TmxError::message_size("truncated UPER key"))?;
                let key = String::from_utf8(kbytes)
                    .map_err(|_| TmxError::malformed("UPER key is not UTF-8"))?;
                out.insert(key, uper_decode(r)?);
            }
            out
        }
        other => {
            return Err(TmxError::malformed(format!(
                "unknown UPER kind tag {}",
                other
            )))
        }
    })
}

impl TmxEncoder for AsnCodec {
    fn name(&self) -> &'static str {
        self.syntax.codec_name()
    }

    fn encode(&self, value: &Value, out: &mut Vec<u8>) -> TmxResult<()> {
        match self.syntax {
            TransferSyntax::Xer => crate::xml::XmlCodec.encode(value, out),
            TransferSyntax::Ber | TransferSyntax::Oer => {
                let mut raw = Vec::new();
                if self.syntax == TransferSyntax::Ber {
                    ber_encode(value, &mut raw)?;
                } else {
                    oer_encode(value, &mut raw)?;
                }
                out.extend_from_slice(encode_hex(&raw).as_bytes());
                Ok(())
            }
            TransferSyntax::Uper => {
                // A value shaped like a J2735 MessageFrame encodes as the
                // real frame, the way the schema registry routes message
                // containers to their generated descriptors.
                let raw = if crate::j2735::MessageFrame::value_is_frame(value) {
                    crate::j2735::MessageFrame::from_value(value)?.encode_uper()?
                } else {
                    let mut w = BitWriter::new();
                    uper_encode(value, &mut w)?;
                    w.align();
                    w.into_bytes()
                };
                out.extend_from_slice(encode_hex(&raw).as_bytes());
                Ok(())
            }
        }
    }
}

impl TmxDecoder for AsnCodec {
    fn name(&self) -> &'static str {
        self.syntax.codec_name()
    }

    fn decode(&self, bytes: &[u8]) -> TmxResult<Value> {
        match self.syntax {
            TransferSyntax::Xer => crate::xml::XmlCodec.decode(bytes),
            TransferSyntax::Ber | TransferSyntax::Oer => {
                let text = std::str::from_utf8(bytes)
                    .map_err(|_| TmxError::malformed("hex payload is not UTF-8"))?;
                let raw = decode_hex(text)
                    .ok_or_else(|| TmxError::malformed("payload is not valid hex"))?;
                let mut pos = 0usize;
                let value = ber_decode_one(&raw, &mut pos)?;
                if pos != raw.len() {
                    return Err(TmxError::malformed("trailing bytes after BER value"));
                }
                Ok(value)
            }
            TransferSyntax::Uper => {
                let text = std::str::from_utf8(bytes)
                    .map_err(|_| TmxError::malformed("hex payload is not UTF-8"))?;
                let raw = decode_hex(text)
                    .ok_or_else(|| TmxError::malformed("payload is not valid hex"))?;
                // Recognized J2735 frames decode through their schema;
                // everything else is the self-describing module.
                if let Ok(frame) = crate::j2735::MessageFrame::decode_uper(&raw) {
                    if !matches!(frame.payload, crate::j2735::FramePayload::Opaque(_)) {
                        return Ok(frame.to_value());
                    }
                }
                let mut r = BitReader::new(&raw);
                uper_decode(&mut r)
            }
        }
    }
}
