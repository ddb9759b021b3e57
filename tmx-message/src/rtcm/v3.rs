//! RTCM SC-104 version 3.3 transport framing.
//!
//! Frame layout: an 8-bit preamble (0xD3), 6 reserved zero bits, a 10-bit
//! length, then the message content starting with the 12-bit message number
//! and 12-bit reference station id, then `length - 3` further content
//! bytes, then a 24-bit CRC-24Q over everything before it. The length
//! counts the message number and station id words, not the header or CRC.

use crate::codec::{names, TmxDecoder, TmxEncoder};
use crate::rtcm::{crc24q, Rtcm3MessageType};
use tmx_value::hex::{decode_hex, encode_hex};
use tmx_value::packing::{pack, unpack, BitWriter};
use tmx_value::{NamedEnum, TmxError, TmxResult, Value};

pub const RTCM3_PREAMBLE: u8 = 0xD3;
const WORD_SIZE: usize = 3;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Rtcm3Frame {
    pub message_number: u16,
    pub station_id: u16,
    /// Message content after the message-number/station-id word.
    pub data: Vec<u8>,
    pub crc: u32,
}

impl Rtcm3Frame {
    pub fn new(message_number: u16, station_id: u16, data: Vec<u8>) -> Self {
        let mut frame = Self {
            message_number,
            station_id,
            data,
            crc: 0,
        };
        frame.crc = frame.compute_crc();
        frame
    }

    /// The value of the 10-bit length field: content bytes including the
    /// message-number/station-id word.
    pub fn message_length(&self) -> u16 {
        (self.data.len() + WORD_SIZE) as u16
    }

    /// The 24-bit header word.
    pub fn header(&self) -> u32 {
        pack(&[
            (RTCM3_PREAMBLE as u128, 8),
            (0, 6),
            (self.message_length() as u128, 10),
        ]) as u32
    }

    /// CRC-24Q over the header word, the message-number/station-id word
    /// and the content, excluding the CRC itself.
    pub fn compute_crc(&self) -> u32 {
        let bytes = self.frame_bytes_without_crc();
        crc24q(&bytes)
    }

    fn frame_bytes_without_crc(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(2 * WORD_SIZE + self.data.len());
        out.extend_from_slice(&self.header().to_be_bytes()[1..]);
        let ids = pack(&[
            (self.message_number as u128, 12),
            (self.station_id as u128, 12),
        ]) as u32;
        out.extend_from_slice(&ids.to_be_bytes()[1..]);
        out.extend_from_slice(&self.data);
        out
    }

    /// The full wire frame including the trailing CRC.
    pub fn encode_bytes(&self) -> Vec<u8> {
        let mut out = self.frame_bytes_without_crc();
        let crc = crc24q(&out);
        out.extend_from_slice(&crc.to_be_bytes()[1..]);
        out
    }

    /// Parse a frame from raw bytes, skipping optional garbage before the
    /// preamble and verifying the trailing CRC when one is present.
    pub fn decode_bytes(bytes: &[u8]) -> TmxResult<Self> {
        let start = bytes
            .iter()
            .position(|b| *b == RTCM3_PREAMBLE)
            .ok_or_else(|| TmxError::malformed("no RTCM3 preamble in input"))?;
        let bytes = &bytes[start..];
        if bytes.len() < WORD_SIZE {
            return Err(TmxError::message_size("truncated RTCM3 header"));
        }

        let header = u32::from_be_bytes([0, bytes[0], bytes[1], bytes[2]]);
        let fields = unpack(header as u128, &[8, 6, 10]);
        if fields[0] as u8 != RTCM3_PREAMBLE {
            return Err(TmxError::malformed(format!(
                "invalid RTCM3 preamble {:#04x}",
                fields[0]
            )));
        }
        if fields[1] != 0 {
            return Err(TmxError::malformed("RTCM3 reserved bits are set"));
        }
        let length = fields[2] as usize;
        if length < WORD_SIZE {
            return Err(TmxError::message_size(format!(
                "RTCM3 length {} cannot hold the message header",
                length
            )));
        }

        let body = &bytes[WORD_SIZE..];
        if body.len() < WORD_SIZE {
            return Err(TmxError::message_size(format!(
                "no RTCM3 data can be stored within {} bytes",
                body.len()
            )));
        }
        let ids = u32::from_be_bytes([0, body[0], body[1], body[2]]);
        let id_fields = unpack(ids as u128, &[12, 12]);
        let message_number = id_fields[0] as u16;
        let station_id = id_fields[1] as u16;
        if Rtcm3MessageType::from_value(message_number as i64).is_none() {
            return Err(TmxError::not_supported(format!(
                "unsupported RTCM3 message number {}",
                message_number
            )));
        }

        let data_len = length - WORD_SIZE;
        let rest = &body[WORD_SIZE..];
        if rest.len() < data_len {
            return Err(TmxError::message_size(format!(
                "RTCM3 frame truncated: need {} content bytes, have {}",
                data_len,
                rest.len()
            )));
        }
        let data = rest[..data_len].to_vec();

        let mut frame = Self {
            message_number,
            station_id,
            data,
            crc: 0,
        };
        let computed = frame.compute_crc();

        // Verify the trailing CRC if enough bytes remain to carry one.
        let trailer = &rest[data_len..];
        if trailer.len() >= WORD_SIZE {
            let wire = u32::from_be_bytes([0, trailer[0], trailer[1], trailer[2]]);
            if wire != computed {
                return Err(TmxError::protocol(format!(
                    "invalid RTCM3 cyclic redundancy check {:#08x}",
                    wire
                )));
            }
        }
        frame.crc = computed;
        Ok(frame)
    }

    /// Message representation used by handlers and the codec registry.
    pub fn to_value(&self) -> Value {
        let mut out = Value::map();
        out.insert(
            "MessageNumber",
            match Rtcm3MessageType::name_of(self.message_number as i64) {
                Some(name) => Value::enumerated(self.message_number as i64, name),
                None => Value::from(self.message_number),
            },
        );
        out.insert("ReferenceStationID", self.station_id);
        out.insert("CRC", self.crc);
        out.insert("Data", Value::bytes(self.data.clone()));
        out
    }

    pub fn from_value(value: &Value) -> TmxResult<Self> {
        let message_number = value.get("MessageNumber").to_uint() as u16;
        if message_number == 0 {
            return Err(TmxError::invalid_argument(
                "RTCM3 value is missing MessageNumber",
            ));
        }
        let station_id = value.get("ReferenceStationID").to_uint() as u16;
        let data = match value.get("Data") {
            Value::Bytes { data, .. } => data.clone(),
            Value::String(s) => decode_hex(s)
                .ok_or_else(|| TmxError::malformed("RTCM3 Data is not valid hex"))?,
            Value::Null => Vec::new(),
            other => {
                return Err(TmxError::invalid_argument(format!(
                    "RTCM3 Data has unusable shape {}",
                    other
                )))
            }
        };
        Ok(Self::new(message_number, station_id, data))
    }

    /// Build a frame from a gpsd RTCM3 JSON report. A type 1005 report is
    /// reassembled bit-exact from its fields; other reports must carry the
    /// raw content bytes in a `data` array.
    pub fn from_gpsd_report(report: &Value) -> TmxResult<Self> {
        let msg_type = report.get("type").to_uint() as u16;
        if msg_type == 1005 {
            return Ok(Self::from_gpsd_1005(report));
        }

        let declared = report.get("length").to_uint() as usize;
        let data = report.get("data");
        if data.is_null() {
            return Err(TmxError::invalid_argument(
                "gpsd report carries no data bytes",
            ));
        }
        if declared != data.len() {
            return Err(TmxError::message_size(format!(
                "expecting {} bytes, but only received {}",
                declared,
                data.len()
            )));
        }
        let mut bytes = Vec::with_capacity(declared);
        for item in data.items() {
            let byte = match item {
                Value::String(s) => {
                    let t = s.trim();
                    let parsed = if let Some(hex) = t.strip_prefix("0x") {
                        u64::from_str_radix(hex, 16).unwrap_or(0)
                    } else {
                        t.parse::<u64>().unwrap_or(0)
                    };
                    (parsed & 0xFF) as u8
                }
                other => (other.to_uint() & 0xFF) as u8,
            };
            bytes.push(byte);
        }
        Self::decode_bytes(&bytes)
    }

    // DF order per the stationary antenna reference point message: message
    // number, station id, ITRF year, GPS/GLONASS/Galileo indicators,
    // reference-station indicator, ECEF X, single-receiver oscillator,
    // reserved, ECEF Y, quarter-cycle indicator, ECEF Z. Coordinates are in
    // 0.0001 m units as 38-bit two's complement.
    fn from_gpsd_1005(report: &Value) -> Self {
        let station_id = report.get("station_id").to_uint() as u16;
        let mut gps = 0u64;
        let mut glonass = 0u64;
        let mut galileo = 0u64;
        for system in report.get("system").items() {
            match system.to_text().as_str() {
                "GPS" => gps = 1,
                "GLONASS" => glonass = 1,
                "GALILEO" => galileo = 1,
                _ => {}
            }
        }
        let ref_station = report.get("refstation").to_bool() as u64;
        let oscillator = report.get("src").to_bool() as u64;
        let ecef = |axis: &str| -> u64 {
            let scaled = (report.get(axis).to_float() * 10000.0).round() as i64;
            (scaled as u64) & ((1u64 << 38) - 1)
        };

        let mut w = BitWriter::new();
        w.write_bits(1005, 12);
        w.write_bits(station_id as u64, 12);
        w.write_bits(0, 6);
        w.write_bits(gps, 1);
        w.write_bits(glonass, 1);
        w.write_bits(galileo, 1);
        w.write_bits(ref_station, 1);
        w.write_bits(ecef("x"), 38);
        w.write_bits(oscillator, 1);
        w.write_bits(0, 1);
        w.write_bits(ecef("y"), 38);
        w.write_bits(0, 2);
        w.write_bits(ecef("z"), 38);
        let content = w.into_bytes();

        Self::new(1005, station_id, content[WORD_SIZE..].to_vec())
    }
}

/// Typed view of a type 1005 stationary antenna reference point message.
/// Coordinates are ECEF in 0.1 mm units as 38-bit two's complement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StationaryAntennaReference {
    pub station_id: u16,
    pub gps: bool,
    pub glonass: bool,
    pub galileo: bool,
    pub reference_station: bool,
    pub ecef_x: i64,
    pub single_oscillator: bool,
    pub ecef_y: i64,
    pub quarter_cycle: u8,
    pub ecef_z: i64,
}

fn sign_extend_38(raw: u64) -> i64 {
    ((raw << 26) as i64) >> 26
}

impl StationaryAntennaReference {
    pub fn from_frame(frame: &Rtcm3Frame) -> TmxResult<Self> {
        if frame.message_number != 1005 {
            return Err(TmxError::not_supported(format!(
                "message {} is not a stationary antenna reference",
                frame.message_number
            )));
        }
        // Reassemble the full content bit stream, message header included.
        let mut content = Vec::with_capacity(WORD_SIZE + frame.data.len());
        let ids = pack(&[
            (frame.message_number as u128, 12),
            (frame.station_id as u128, 12),
        ]) as u32;
        content.extend_from_slice(&ids.to_be_bytes()[1..]);
        content.extend_from_slice(&frame.data);

        let mut r = tmx_value::packing::BitReader::new(&content);
        let mut take = |bits: u8| {
            r.read_bits(bits)
                .ok_or_else(|| TmxError::message_size("truncated 1005 message"))
        };
        let _message_number = take(12)?;
        let station_id = take(12)? as u16;
        let _itrf_year = take(6)?;
        let gps = take(1)? != 0;
        let glonass = take(1)? != 0;
        let galileo = take(1)? != 0;
        let reference_station = take(1)? != 0;
        let ecef_x = sign_extend_38(take(38)?);
        let single_oscillator = take(1)? != 0;
        let _reserved = take(1)?;
        let ecef_y = sign_extend_38(take(38)?);
        let quarter_cycle = take(2)? as u8;
        let ecef_z = sign_extend_38(take(38)?);

        Ok(Self {
            station_id,
            gps,
            glonass,
            galileo,
            reference_station,
            ecef_x,
            single_oscillator,
            ecef_y,
            quarter_cycle,
            ecef_z,
        })
    }

    /// Coordinates in meters.
    pub fn position_meters(&self) -> (f64, f64, f64) {
        (
            self.ecef_x as f64 / 10000.0,
            self.ecef_y as f64 / 10000.0,
            self.ecef_z as f64 / 10000.0,
        )
    }
}

/// Registry codec: values in, hex-encoded frames out.
pub struct Rtcm3Codec;

impl TmxEncoder for Rtcm3Codec {
    fn name(&self) -> &'static str {
        names::RTCM3
    }

    fn encode(&self, value: &Value, out: &mut Vec<u8>) -> TmxResult<()> {
        let frame = Rtcm3Frame::from_value(value)?;
        out.extend_from_slice(encode_hex(&frame.encode_bytes()).as_bytes());
        Ok(())
    }
}

impl TmxDecoder for Rtcm3Codec {
    fn name(&self) -> &'static str {
        names::RTCM3
    }

    fn decode(&self, bytes: &[u8]) -> TmxResult<Value> {
        let frame = Rtcm3Frame::decode_bytes(&unwrap_hex(bytes))?;
        Ok(frame.to_value())
    }
}

/// Accept either the hex encoding produced by the encoder or raw frame
/// bytes straight off a wire.
pub(crate) fn unwrap_hex(bytes: &[u8]) -> Vec<u8> {
    if let Ok(text) = std::str::from_utf8(bytes) {
        if let Some(decoded) = decode_hex(text) {
            return decoded;
        }
    }
    bytes.to_vec()
}
