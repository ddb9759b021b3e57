//! RTCM SC-104 version 2.3 framing: 30-bit words of 24 data bits plus 6
//! parity bits computed with the GPS ICD-200 equations. The first header
//! word carries the 0x66 preamble, message type and station id; the second
//! carries the modified Z-count, sequence number, frame length in words and
//! station health. Words after a word whose last parity bit is set are
//! transmitted with complemented data bits.

use crate::codec::{names, TmxDecoder, TmxEncoder};
use crate::rtcm::v3::unwrap_hex;
use tmx_value::hex::{decode_hex, encode_hex};
use tmx_value::packing::{BitReader, BitWriter};
use tmx_value::{TmxError, TmxResult, Value};

pub const RTCM2_PREAMBLE: u8 = 0x66;
const DATA_MASK: u32 = 0xFF_FFFF;

// Data-bit index lists (d1..d24) for each parity equation; the leading
// flag selects D29* or D30* as the seed term.
const PARITY_TAPS: [(bool, &[u8]); 6] = [
    (false, &[1, 2, 3, 5, 6, 10, 11, 12, 13, 14, 17, 18, 20, 23]),
    (true, &[2, 3, 4, 6, 7, 11, 12, 13, 14, 15, 18, 19, 21, 24]),
    (false, &[1, 3, 4, 5, 7, 8, 12, 13, 14, 15, 16, 19, 20, 22]),
    (true, &[2, 4, 5, 6, 8, 9, 13, 14, 15, 16, 17, 20, 21, 23]),
    (true, &[1, 3, 5, 6, 7, 9, 10, 14, 15, 16, 17, 18, 21, 22, 24]),
    (false, &[3, 5, 6, 8, 9, 10, 11, 13, 15, 19, 22, 23, 24]),
];

fn data_bit(data: u32, index: u8) -> u32 {
    (data >> (24 - index)) & 1
}

/// The six parity bits for 24 source data bits, given the last two parity
/// bits of the previous word.
pub fn word_parity(d29_star: bool, d30_star: bool, data: u32) -> u8 {
    let mut parity = 0u8;
    for (use_d30, taps) in PARITY_TAPS {
        let mut bit = if use_d30 { d30_star } else { d29_star } as u32;
        for &tap in taps {
            bit ^= data_bit(data, tap);
        }
        parity = (parity << 1) | bit as u8;
    }
    parity
}

struct WordStream {
    writer: BitWriter,
    d29_star: bool,
    d30_star: bool,
}

impl WordStream {
    fn new() -> Self {
        Self {
            writer: BitWriter::new(),
            d29_star: false,
            d30_star: false,
        }
    }

    fn push(&mut self, data: u32) {
        let data = data & DATA_MASK;
        let transmitted = if self.d30_star { !data & DATA_MASK } else { data };
        let parity = word_parity(self.d29_star, self.d30_star, data);
        self.writer.write_bits(transmitted as u64, 24);
        self.writer.write_bits(parity as u64, 6);
        self.d29_star = parity & 0b10 != 0;
        self.d30_star = parity & 0b01 != 0;
    }

    fn finish(mut self) -> Vec<u8> {
        self.writer.align();
        self.writer.into_bytes()
    }
}

struct WordReader<'a> {
    reader: BitReader<'a>,
    d29_star: bool,
    d30_star: bool,
}

impl<'a> WordReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self {
            reader: BitReader::new(bytes),
            d29_star: false,
            d30_star: false,
        }
    }

    /// Next 24 source data bits, verifying word parity.
    fn next(&mut self) -> TmxResult<u32> {
        let transmitted = self
            .reader
            .read_bits(24)
            .ok_or_else(|| TmxError::message_size("truncated RTCM2 word"))? as u32;
        let parity = self
            .reader
            .read_bits(6)
            .ok_or_else(|| TmxError::message_size("truncated RTCM2 parity"))? as u8;
        let data = if self.d30_star {
            !transmitted & DATA_MASK
        } else {
            transmitted
        };
        let expected = word_parity(self.d29_star, self.d30_star, data);
        if parity != expected {
            return Err(TmxError::protocol(format!(
                "RTCM2 word parity check failed: got {:#04x}, expected {:#04x}",
                parity, expected
            )));
        }
        self.d29_star = parity & 0b10 != 0;
        self.d30_star = parity & 0b01 != 0;
        Ok(data)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Rtcm2Frame {
    pub message_type: u8,
    pub station_id: u16,
    /// Modified Z-count in 0.6 second units.
    pub z_count: u16,
    pub sequence: u8,
    pub health: u8,
    /// Payload as whole 24-bit words, three bytes per word.
    pub data: Vec<u8>,
}

impl Rtcm2Frame {
    pub fn new(message_type: u8, station_id: u16, data: Vec<u8>) -> Self {
        let mut data = data;
        // Pad to whole words; the v2 payload has no byte-level length.
        while data.len() % 3 != 0 {
            data.push(0);
        }
        Self {
            message_type,
            station_id,
            z_count: 0,
            sequence: 0,
            health: 0,
            data,
        }
    }

    /// Frame length in payload words.
    pub fn word_count(&self) -> u8 {
        (self.data.len() / 3) as u8
    }

    pub fn encode_bytes(&self) -> Vec<u8> {
        let mut stream = WordStream::new();
        stream.push(
            ((RTCM2_PREAMBLE as u32) << 16)
                | ((self.message_type as u32 & 0x3F) << 10)
                | (self.station_id as u32 & 0x3FF),
        );
        stream.push(
            ((self.z_count as u32 & 0x1FFF) << 11)
                | ((self.sequence as u32 & 0x7) << 8)
                | ((self.word_count() as u32 & 0x1F) << 3)
                | (self.health as u32 & 0x7),
        );
        for chunk in self.data.chunks(3) {
            stream.push(
                ((chunk[0] as u32) << 16) | ((chunk[1] as u32) << 8) | chunk[2] as u32,
            );
        }
        stream.finish()
    }

    pub fn decode_bytes(bytes: &[u8]) -> TmxResult<Self> {
        let mut words = WordReader::new(bytes);
        let first = words.next()?;
        let preamble = (first >> 16) as u8;
        if preamble != RTCM2_PREAMBLE {
            return Err(TmxError::malformed(format!(
                "invalid RTCM2 preamble {:#04x}",
                preamble
            )));
        }
        let message_type = ((first >> 10) & 0x3F) as u8;
        let station_id = (first & 0x3FF) as u16;

        let second = words.next()?;
        let z_count = ((second >> 11) & 0x1FFF) as u16;
        let sequence = ((second >> 8) & 0x7) as u8;
        let length = ((second >> 3) & 0x1F) as usize;
        let health = (second & 0x7) as u8;

        let mut data = Vec::with_capacity(length * 3);
        for _ in 0..length {
            let word = words.next()?;
            data.extend_from_slice(&word.to_be_bytes()[1..]);
        }

        Ok(Self {
            message_type,
            station_id,
            z_count,
            sequence,
            health,
            data,
        })
    }

    pub fn to_value(&self) -> Value {
        let mut out = Value::map();
        out.insert("MessageType", self.message_type);
        out.insert("StationID", self.station_id);
        out.insert("ZCount", self.z_count);
        out.insert("Sequence", self.sequence);
        out.insert("Health", self.health);
        out.insert("Data", Value::bytes(self.data.clone()));
        out
    }

    pub fn from_value(value: &Value) -> TmxResult<Self> {
        let message_type = value.get("MessageType").to_uint() as u8;
        if message_type == 0 || message_type > 63 {
            return Err(TmxError::invalid_argument(
                "RTCM2 value is missing a usable MessageType",
            ));
        }
        let data = match value.get("Data") {
            Value::Bytes { data, .. } => data.clone(),
            Value::String(s) => decode_hex(s)
                .ok_or_else(|| TmxError::malformed("RTCM2 Data is not valid hex"))?,
            Value::Null => Vec::new(),
            other => {
                return Err(TmxError::invalid_argument(format!(
                    "RTCM2 Data has unusable shape {}",
                    other
                )))
            }
        };
        let mut frame = Self::new(message_type, value.get("StationID").to_uint() as u16, data);
        frame.z_count = value.get("ZCount").to_uint() as u16;
        frame.sequence = value.get("Sequence").to_uint() as u8;
        frame.health = value.get("Health").to_uint() as u8;
        Ok(frame)
    }
}

pub struct Rtcm2Codec;

impl TmxEncoder for Rtcm2Codec {
    fn name(&self) -> &'static str {
        names::RTCM2
    }

    fn encode(&self, value: &Value, out: &mut Vec<u8>) -> TmxResult<()> {
        let frame = Rtcm2Frame::from_value(value)?;
        out.extend_from_slice(encode_hex(&frame.encode_bytes()).as_bytes());
        Ok(())
    }
}

impl TmxDecoder for Rtcm2Codec {
    fn name(&self) -> &'static str {
        names::RTCM2
    }

    fn decode(&self, bytes: &[u8]) -> TmxResult<Value> {
        let frame = Rtcm2Frame::decode_bytes(&unwrap_hex(bytes))?;
        Ok(frame.to_value())
    }
}
