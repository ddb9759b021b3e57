//! Encoder/decoder pairs keyed by canonical encoding name.

use crate::envelope::TmxMessage;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tmx_value::{TmxError, TmxResult, Value};

/// Canonical codec names. Lookup is case-sensitive; the empty name means
/// the payload already carries its intended representation.
pub mod names {
    pub const JSON: &str = "json";
    pub const XML: &str = "xml";
    pub const CBOR: &str = "cbor";
    pub const ASN1_BER: &str = "asn.1-ber";
    pub const ASN1_XER: &str = "asn.1-xer";
    pub const ASN1_OER: &str = "asn.1-oer";
    pub const ASN1_UPER: &str = "asn.1-uper";
    pub const RTCM2: &str = "RTCM-SC10402.3";
    pub const RTCM3: &str = "RTCM-SC10403.3";
    pub const NONE: &str = "";
}

/// Serializes a [`Value`] into a byte sink. Bytes produced here must decode
/// back to an equal value through the matching decoder, modulo the
/// documented lossy conversions (enum name against integer, float
/// precision, byte strings rendered as hex in text formats).
pub trait TmxEncoder: Send + Sync {
    fn name(&self) -> &'static str;

    fn encode(&self, value: &Value, out: &mut Vec<u8>) -> TmxResult<()>;
}

/// The inverse direction. A failed decode returns the error without
/// partially populating anything.
pub trait TmxDecoder: Send + Sync {
    fn name(&self) -> &'static str;

    fn decode(&self, bytes: &[u8]) -> TmxResult<Value>;
}

/// Empty-name codec: the payload is raw UTF-8 text or plain bytes.
struct RawCodec;

impl TmxEncoder for RawCodec {
    fn name(&self) -> &'static str {
        names::NONE
    }

    fn encode(&self, value: &Value, out: &mut Vec<u8>) -> TmxResult<()> {
        match value {
            Value::Bytes { data, .. } => out.extend_from_slice(data),
            other => out.extend_from_slice(other.to_text().as_bytes()),
        }
        Ok(())
    }
}

impl TmxDecoder for RawCodec {
    fn name(&self) -> &'static str {
        names::NONE
    }

    fn decode(&self, bytes: &[u8]) -> TmxResult<Value> {
        match std::str::from_utf8(bytes) {
            Ok(s) => Ok(Value::String(s.to_string())),
            Err(_) => Ok(Value::bytes(bytes.to_vec())),
        }
    }
}

/// O(1) lookup of encoder/decoder pairs by canonical name. Reads take a
/// shared lock only, so codec selection never serializes publishes.
pub struct CodecRegistry {
    encoders: RwLock<HashMap<String, Arc<dyn TmxEncoder>>>,
    decoders: RwLock<HashMap<String, Arc<dyn TmxDecoder>>>,
}

impl CodecRegistry {
    /// An empty registry with only the raw codec.
    pub fn new() -> Self {
        let reg = Self {
            encoders: RwLock::new(HashMap::new()),
            decoders: RwLock::new(HashMap::new()),
        };
        reg.register(Arc::new(RawCodec), Arc::new(RawCodec));
        reg
    }

    /// A registry with every built-in codec installed.
    pub fn standard() -> Self {
        let reg = Self::new();
        reg.register(
            Arc::new(crate::json::JsonCodec),
            Arc::new(crate::json::JsonCodec),
        );
        reg.register(
            Arc::new(crate::xml::XmlCodec),
            Arc::new(crate::xml::XmlCodec),
        );
        reg.register(
            Arc::new(crate::cbor::CborCodec),
            Arc::new(crate::cbor::CborCodec),
        );
        for syntax in crate::asn1::TransferSyntax::ALL {
            reg.register(
                Arc::new(crate::asn1::AsnCodec::new(syntax)),
                Arc::new(crate::asn1::AsnCodec::new(syntax)),
            );
        }
        reg.register(
            Arc::new(crate::rtcm::v3::Rtcm3Codec),
            Arc::new(crate::rtcm::v3::Rtcm3Codec),
        );
        reg.register(
            Arc::new(crate::rtcm::v2::Rtcm2Codec),
            Arc::new(crate::rtcm::v2::Rtcm2Codec),
        );
        reg
    }

    pub fn register(&self, encoder: Arc<dyn TmxEncoder>, decoder: Arc<dyn TmxDecoder>) {
        self.encoders
            .write()
            .insert(encoder.name().to_string(), encoder);
        self.decoders
            .write()
            .insert(decoder.name().to_string(), decoder);
    }

    pub fn get_encoder(&self, name: &str) -> Option<Arc<dyn TmxEncoder>> {
        self.encoders.read().get(name).cloned()
    }

    pub fn get_decoder(&self, name: &str) -> Option<Arc<dyn TmxDecoder>> {
        self.decoders.read().get(name).cloned()
    }

    /// Encode a value with the named codec, failing with NotSupported for
    /// an unknown name.
    pub fn encode(&self, name: &str, value: &Value) -> TmxResult<Vec<u8>> {
        let encoder = self
            .get_encoder(name)
            .ok_or_else(|| TmxError::not_supported(format!("no encoder named {:?}", name)))?;
        let mut out = Vec::new();
        encoder.encode(value, &mut out)?;
        Ok(out)
    }

    /// Decode a payload with the named codec. An empty name applies light
    /// auto-detection: a leading `{` selects JSON and a leading `<` XML;
    /// anything else is raw text or bytes.
    pub fn decode(&self, name: &str, bytes: &[u8]) -> TmxResult<Value> {
        let name = if name.is_empty() {
            match bytes.first() {
                Some(b'{') => names::JSON,
                Some(b'<') => names::XML,
                _ => names::NONE,
            }
        } else {
            name
        };
        let decoder = self
            .get_decoder(name)
            .ok_or_else(|| TmxError::not_supported(format!("no decoder named {:?}", name)))?;
        decoder.decode(bytes)
    }

    /// Decode the payload of an envelope using its `encoding` field.
    pub fn decode_message(&self, message: &TmxMessage) -> TmxResult<Value> {
        self.decode(&message.encoding, &message.payload)
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::standard()
    }
}
