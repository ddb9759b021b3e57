//! The message envelope, the only structure that crosses broker
//! boundaries.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Sync pattern for implementations that need an on-wire preamble: the
/// letters T, M, X as three packed 5-bit integers. Never embedded in the
/// envelope itself.
pub const TMX_PREAMBLE: u16 = 0x4D97;

const QOS_SHIFT: u32 = 62;
const PRIORITY_SHIFT: u32 = 58;
const BASE_SHIFT: u32 = 56;
const ASSIGN_GROUP_SHIFT: u32 = 52;
const ASSIGN_ID_SHIFT: u32 = 48;
const FRAGMENT_SHIFT: u32 = 44;
const ATTEMPT_SHIFT: u32 = 40;
const RESERVED_SHIFT: u32 = 32;

fn field(metadata: u64, shift: u32, bits: u32) -> u64 {
    (metadata >> shift) & ((1u64 << bits) - 1)
}

fn with_field(metadata: u64, shift: u32, bits: u32, value: u64) -> u64 {
    let mask = ((1u64 << bits) - 1) << shift;
    (metadata & !mask) | ((value << shift) & mask)
}

/// A fixed-shape message header plus opaque payload bytes.
///
/// `id` is the fully-qualified type name of the payload (or empty), `topic`
/// the '/'-separated routing key, `source` an informational origin,
/// `encoding` the canonical codec name used for the payload, `timestamp` a
/// count conventionally of nanoseconds since the Unix epoch, and `metadata`
/// a packed 64-bit routing word whose sub-fields are exposed through
/// accessors.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TmxMessage {
    pub id: String,
    pub topic: String,
    pub source: String,
    pub encoding: String,
    pub timestamp: i64,
    pub metadata: u64,
    pub payload: Vec<u8>,
}

impl TmxMessage {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            ..Default::default()
        }
    }

    /// Number of bytes in the payload.
    pub fn length(&self) -> usize {
        self.payload.len()
    }

    /// The payload interpreted as UTF-8 text, with replacement characters
    /// for invalid sequences.
    pub fn payload_string(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    pub fn set_payload_string(&mut self, s: impl Into<String>) {
        self.payload = s.into().into_bytes();
    }

    /// Timestamp as a point in time, treating the count as nanoseconds
    /// since the Unix epoch.
    pub fn timepoint(&self) -> SystemTime {
        if self.timestamp >= 0 {
            UNIX_EPOCH + Duration::from_nanos(self.timestamp as u64)
        } else {
            UNIX_EPOCH - Duration::from_nanos(self.timestamp.unsigned_abs())
        }
    }

    pub fn set_timepoint(&mut self, when: SystemTime) {
        self.timestamp = match when.duration_since(UNIX_EPOCH) {
            Ok(d) => d.as_nanos() as i64,
            Err(e) => -(e.duration().as_nanos() as i64),
        };
    }

    /// Stamp with the current wall-clock time.
    pub fn stamp_now(&mut self) {
        self.set_timepoint(SystemTime::now());
    }

    pub fn qos(&self) -> u8 {
        field(self.metadata, QOS_SHIFT, 2) as u8
    }

    pub fn set_qos(&mut self, value: u8) {
        self.metadata = with_field(self.metadata, QOS_SHIFT, 2, value as u64);
    }

    pub fn priority(&self) -> u8 {
        field(self.metadata, PRIORITY_SHIFT, 4) as u8
    }

    pub fn set_priority(&mut self, value: u8) {
        self.metadata = with_field(self.metadata, PRIORITY_SHIFT, 4, value as u64);
    }

    /// The base (0 for auto, or 16/32/64) used for binary rendering.
    pub fn base(&self) -> u8 {
        field(self.metadata, BASE_SHIFT, 2) as u8
    }

    pub fn set_base(&mut self, value: u8) {
        self.metadata = with_field(self.metadata, BASE_SHIFT, 2, value as u64);
    }

    pub fn assignment_group(&self) -> u8 {
        field(self.metadata, ASSIGN_GROUP_SHIFT, 4) as u8
    }

    pub fn set_assignment_group(&mut self, value: u8) {
        self.metadata = with_field(self.metadata, ASSIGN_GROUP_SHIFT, 4, value as u64);
    }

    pub fn assignment_id(&self) -> u8 {
        field(self.metadata, ASSIGN_ID_SHIFT, 4) as u8
    }

    pub fn set_assignment_id(&mut self, value: u8) {
        self.metadata = with_field(self.metadata, ASSIGN_ID_SHIFT, 4, value as u64);
    }

    pub fn fragment(&self) -> u8 {
        field(self.metadata, FRAGMENT_SHIFT, 4) as u8
    }

    pub fn set_fragment(&mut self, value: u8) {
        self.metadata = with_field(self.metadata, FRAGMENT_SHIFT, 4, value as u64);
    }

    pub fn attempt(&self) -> u8 {
        field(self.metadata, ATTEMPT_SHIFT, 4) as u8
    }

    pub fn set_attempt(&mut self, value: u8) {
        self.metadata = with_field(self.metadata, ATTEMPT_SHIFT, 4, value as u64);
    }

    /// The reserved byte between the routing fields and the programmable
    /// word. Unknown bits are carried untouched on receive.
    pub fn reserved(&self) -> u8 {
        field(self.metadata, RESERVED_SHIFT, 8) as u8
    }

    /// The low-order 32 bits left to plugin-defined interpretation.
    pub fn programmable_metadata(&self) -> u32 {
        self.metadata as u32
    }

    pub fn set_programmable_metadata(&mut self, value: u32) {
        self.metadata = (self.metadata & !0xFFFF_FFFF) | value as u64;
    }
}
