//! The message layer of the TMX runtime: the envelope that crosses broker
//! boundaries, the codec registry with its built-in JSON/XML/CBOR/ASN.1
//! codecs, the bit-exact RTCM v2/v3 frame codecs and the J2735
//! MessageFrame composition used for GNSS correction relay.

pub mod asn1;
pub mod cbor;
pub mod codec;
pub mod envelope;
pub mod gpsd;
pub mod j2735;
pub mod json;
pub mod nmea;
pub mod rtcm;
pub mod xml;

pub use codec::{names, CodecRegistry, TmxDecoder, TmxEncoder};
pub use envelope::{TmxMessage, TMX_PREAMBLE};
