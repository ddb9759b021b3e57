//! SAE J2735 MessageFrame composition for the frames the bus relays:
//! RTCMcorrections wrapping a correction stream, and the BasicSafetyMessage
//! emitted for simulated vehicles. Encoding is unaligned PER built directly
//! on the bit packing layer; the open-type payload inside the frame is
//! octet-aligned with a standard length determinant.

use tmx_value::named_enum;
use tmx_value::packing::{BitReader, BitWriter};
use tmx_value::{NamedEnum, TmxError, TmxResult, Value};

named_enum! {
    /// DSRC message ids used for `J2735/<type>` topic derivation.
    pub enum DsrcMessageId: u16 {
        MapData = 18,
        SignalPhaseAndTiming = 19,
        BasicSafetyMessage = 20,
        CommonSafetyRequest = 21,
        EmergencyVehicleAlert = 22,
        IntersectionCollision = 23,
        NmeaCorrections = 24,
        ProbeDataManagement = 25,
        ProbeVehicleData = 26,
        RoadSideAlert = 27,
        RtcmCorrections = 28,
        SignalRequestMessage = 29,
        SignalStatusMessage = 30,
        TravelerInformation = 31,
        PersonalSafetyMessage = 32,
    }
}

/// Topic suffix for a decoded frame, `UNKNOWN` when the id is not in the
/// documented table.
pub fn topic_for_message_id(id: u16) -> String {
    match DsrcMessageId::from_value(id as i64) {
        Some(DsrcMessageId::BasicSafetyMessage) => "BSM".to_string(),
        Some(DsrcMessageId::RtcmCorrections) => "RTCM".to_string(),
        Some(DsrcMessageId::SignalRequestMessage) => "SRM".to_string(),
        Some(DsrcMessageId::SignalStatusMessage) => "SSM".to_string(),
        Some(DsrcMessageId::SignalPhaseAndTiming) => "SPAT".to_string(),
        Some(DsrcMessageId::MapData) => "MAP".to_string(),
        Some(DsrcMessageId::TravelerInformation) => "TIM".to_string(),
        Some(other) => other.name().unwrap_or("UNKNOWN").to_string(),
        None => "UNKNOWN".to_string(),
    }
}

named_enum! {
    pub enum RtcmRevision: u8 {
        Unknown = 0,
        RtcmRev2 = 1,
        RtcmRev3 = 2,
        Reserved = 3,
    }
}

const MINUTE_OF_YEAR_MAX: u32 = 527040;

fn take(r: &mut BitReader, bits: u8, what: &str) -> TmxResult<u64> {
    r.read_bits(bits)
        .ok_or_else(|| TmxError::message_size(format!("truncated {}", what)))
}

// Civil-calendar day arithmetic, used to anchor the minute-of-year field.
fn days_from_civil(y: i64, m: i64, d: i64) -> i64 {
    let y = if m <= 2 { y - 1 } else { y };
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = y - era * 400;
    let mp = (m + 9) % 12;
    let doy = (153 * mp + 2) / 5 + d - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146097 + doe - 719468
}

fn civil_from_days(z: i64) -> (i64, i64, i64) {
    let z = z + 719468;
    let era = if z >= 0 { z } else { z - 146096 } / 146097;
    let doe = z - era * 146097;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let m = if mp < 10 { mp + 3 } else { mp - 9 };
    (if m <= 2 { y + 1 } else { y }, m, d)
}

/// Minute of the current UTC year for a nanosecond-since-epoch timestamp,
/// clamped to the field's upper bound.
pub fn minute_of_year(timestamp_ns: i64) -> u32 {
    let secs = timestamp_ns.div_euclid(1_000_000_000);
    let days = secs.div_euclid(86400);
    let (year, _, _) = civil_from_days(days);
    let year_start = days_from_civil(year, 1, 1) * 86400;
    let minutes = (secs - year_start) / 60;
    (minutes.max(0) as u32).min(MINUTE_OF_YEAR_MAX)
}

/// The RTCMcorrections payload: a counted batch of raw correction frames.
#[derive(Debug, Clone, PartialEq)]
pub struct RtcmCorrections {
    pub msg_cnt: u8,
    pub rev: RtcmRevision,
    pub time_stamp: Option<u32>,
    pub msgs: Vec<Vec<u8>>,
}

impl RtcmCorrections {
    // Field layout: extension bit, presence bits for timeStamp /
    // anchorPoint / rtcmHeader / regional, msgCnt (7), rev (extensible
    // enumerated, 1+2), optional timeStamp (20), msgs SIZE(1..5) count-1
    // in 3 bits, each an OCTET STRING SIZE(1..1023) with a 10-bit
    // length-1 determinant.
    pub fn encode_uper(&self) -> TmxResult<Vec<u8>> {
        if self.msgs.is_empty() || self.msgs.len() > 5 {
            return Err(TmxError::invalid_argument(
                "RTCMcorrections carries 1 to 5 messages",
            ));
        }
        let mut w = BitWriter::new();
        w.write_bits(0, 1);
        w.write_bits(self.time_stamp.is_some() as u64, 1);
        w.write_bits(0, 1);
        w.write_bits(0, 1);
        w.write_bits(0, 1);
        w.write_bits((self.msg_cnt & 0x7F) as u64, 7);
        w.write_bits(0, 1);
        w.write_bits(self.rev.value() as u64, 2);
        if let Some(ts) = self.time_stamp {
            w.write_bits(ts.min(MINUTE_OF_YEAR_MAX) as u64, 20);
        }
        w.write_bits(self.msgs.len() as u64 - 1, 3);
        for msg in &self.msgs {
            if msg.is_empty() || msg.len() > 1023 {
                return Err(TmxError::message_size(
                    "RTCM message must be 1 to 1023 octets",
                ));
            }
            w.write_bits(msg.len() as u64 - 1, 10);
            w.write_bytes(msg);
        }
        w.align();
        Ok(w.into_bytes())
    }

    pub fn decode_uper(bytes: &[u8]) -> TmxResult<Self> {
        let r = &mut BitReader::new(bytes);
        let what = "RTCMcorrections";
        if take(r, 1, what)? != 0 {
            return Err(TmxError::not_supported(
                "extended RTCMcorrections is not supported",
            ));
        }
        let has_time_stamp = take(r, 1, what)? != 0;
        let has_anchor = take(r, 1, what)? != 0;
        let has_header = take(r, 1, what)? != 0;
        let has_regional = take(r, 1, what)? != 0;
        if has_anchor || has_header || has_regional {
            return Err(TmxError::not_supported(
                "optional RTCMcorrections components are not supported",
            ));
        }
        let msg_cnt = take(r, 7, what)? as u8;
        let rev = if take(r, 1, what)? != 0 {
            RtcmRevision::Unknown
        } else {
            RtcmRevision::from_value(take(r, 2, what)? as i64)
                .unwrap_or(RtcmRevision::Unknown)
        };
        let time_stamp = if has_time_stamp {
            Some(take(r, 20, what)? as u32)
        } else {
            None
        };
        let count = take(r, 3, what)? as usize + 1;
        let mut msgs = Vec::with_capacity(count);
        for _ in 0..count {
            let len = take(r, 10, what)? as usize + 1;
            let msg = r
                .read_bytes(len)
                .ok_or_else(|| TmxError::message_size("truncated RTCM message octets"))?;
            msgs.push(msg);
        }
        Ok(Self {
            msg_cnt,
            rev,
            time_stamp,
            msgs,
        })
    }
}

/// BSM core data with raw J2735 field units. Defaults are the standard
/// unavailable markers.
#[derive(Debug, Clone, PartialEq)]
pub struct BsmCoreData {
    pub msg_cnt: u8,
    /// TemporaryID, four octets.
    pub id: [u8; 4],
    /// Milliseconds within the current minute.
    pub sec_mark: u16,
    /// 1/10 microdegree.
    pub lat: i32,
    pub lon: i32,
    /// 0.1 m above the reference ellipsoid.
    pub elev: i32,
    pub semi_major: u8,
    pub semi_minor: u8,
    pub orientation: u16,
    pub transmission: u8,
    /// 0.02 m/s.
    pub speed: u16,
    /// 0.0125 degree.
    pub heading: u16,
    /// 1.5 degree.
    pub angle: i16,
    /// 0.01 m/s^2.
    pub accel_long: i16,
    pub accel_lat: i16,
    pub accel_vert: i16,
    pub accel_yaw: i32,
    /// Raw 15-bit brake status word.
    pub brakes: u16,
    /// Centimeters.
    pub width: u16,
    pub length: u16,
}

impl Default for BsmCoreData {
    fn default() -> Self {
        Self {
            msg_cnt: 0,
            id: [0; 4],
            sec_mark: 65535,
            lat: 900000001,
            lon: 1800000001,
            elev: -4096,
            semi_major: 255,
            semi_minor: 255,
            orientation: 65535,
            transmission: 7,
            speed: 8191,
            heading: 28800,
            angle: 127,
            accel_long: 2001,
            accel_lat: 2001,
            accel_vert: -127,
            accel_yaw: 0,
            brakes: 0,
            width: 0,
            length: 0,
        }
    }
}

const LAT_LB: i64 = -900_000_000;
const LON_LB: i64 = -1_799_999_999;
const ELEV_LB: i64 = -4096;
const ANGLE_LB: i64 = -126;
const ACCEL_LB: i64 = -2000;
const VERT_LB: i64 = -127;
const YAW_LB: i64 = -32767;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BasicSafetyMessage {
    pub core: BsmCoreData,
}

impl BasicSafetyMessage {
    pub fn encode_uper(&self) -> TmxResult<Vec<u8>> {
        let c = &self.core;
        let mut w = BitWriter::new();
        // extension bit plus partII/regional presence
        w.write_bits(0, 1);
        w.write_bits(0, 1);
        w.write_bits(0, 1);
        w.write_bits((c.msg_cnt & 0x7F) as u64, 7);
        for byte in c.id {
            w.write_bits(byte as u64, 8);
        }
        w.write_bits(c.sec_mark as u64, 16);
        w.write_bits((c.lat as i64 - LAT_LB) as u64, 31);
        w.write_bits((c.lon as i64 - LON_LB) as u64, 32);
        w.write_bits((c.elev as i64 - ELEV_LB) as u64, 16);
        w.write_bits(c.semi_major as u64, 8);
        w.write_bits(c.semi_minor as u64, 8);
        w.write_bits(c.orientation as u64, 16);
        w.write_bits(c.transmission as u64, 3);
        w.write_bits(c.speed as u64, 13);
        w.write_bits(c.heading as u64, 15);
        w.write_bits((c.angle as i64 - ANGLE_LB) as u64, 8);
        w.write_bits((c.accel_long as i64 - ACCEL_LB) as u64, 12);
        w.write_bits((c.accel_lat as i64 - ACCEL_LB) as u64, 12);
        w.write_bits((c.accel_vert as i64 - VERT_LB) as u64, 8);
        w.write_bits((c.accel_yaw as i64 - YAW_LB) as u64, 16);
        w.write_bits(c.brakes as u64, 15);
        w.write_bits(c.width as u64, 10);
        w.write_bits(c.length as u64, 12);
        w.align();
        Ok(w.into_bytes())
    }

    pub fn decode_uper(bytes: &[u8]) -> TmxResult<Self> {
        let r = &mut BitReader::new(bytes);
        let what = "BasicSafetyMessage";
        if take(r, 1, what)? != 0 {
            return Err(TmxError::not_supported(
                "extended BasicSafetyMessage is not supported",
            ));
        }
        let has_part2 = take(r, 1, what)? != 0;
        let has_regional = take(r, 1, what)? != 0;
        if has_part2 || has_regional {
            return Err(TmxError::not_supported(
                "BSM partII/regional extensions are not supported",
            ));
        }
        let msg_cnt = take(r, 7, what)? as u8;
        let mut id = [0u8; 4];
        for byte in &mut id {
            *byte = take(r, 8, what)? as u8;
        }
        let core = BsmCoreData {
            msg_cnt,
            id,
            sec_mark: take(r, 16, what)? as u16,
            lat: (take(r, 31, what)? as i64 + LAT_LB) as i32,
            lon: (take(r, 32, what)? as i64 + LON_LB) as i32,
            elev: (take(r, 16, what)? as i64 + ELEV_LB) as i32,
            semi_major: take(r, 8, what)? as u8,
            semi_minor: take(r, 8, what)? as u8,
            orientation: take(r, 16, what)? as u16,
            transmission: take(r, 3, what)? as u8,
            speed: take(r, 13, what)? as u16,
            heading: take(r, 15, what)? as u16,
            angle: (take(r, 8, what)? as i64 + ANGLE_LB) as i16,
            accel_long: (take(r, 12, what)? as i64 + ACCEL_LB) as i16,
            accel_lat: (take(r, 12, what)? as i64 + ACCEL_LB) as i16,
            accel_vert: (take(r, 8, what)? as i64 + VERT_LB) as i16,
            accel_yaw: (take(r, 16, what)? as i64 + YAW_LB) as i32,
            brakes: take(r, 15, what)? as u16,
            width: take(r, 10, what)? as u16,
            length: take(r, 12, what)? as u16,
        };
        Ok(Self { core })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FramePayload {
    RtcmCorrections(RtcmCorrections),
    BasicSafetyMessage(BasicSafetyMessage),
    Opaque(Vec<u8>),
}

/// The outer ASN.1 container: a 15-bit DSRCmsgID and an open-type payload.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageFrame {
    pub message_id: u16,
    pub payload: FramePayload,
}

fn write_open_type(w: &mut BitWriter, content: &[u8]) -> TmxResult<()> {
    match content.len() {
        0..=127 => w.write_bits(content.len() as u64, 8),
        128..=16383 => {
            w.write_bits(0b10, 2);
            w.write_bits(content.len() as u64, 14);
        }
        _ => {
            return Err(TmxError::message_size(
                "open type payload exceeds the supported length",
            ))
        }
    }
    w.write_bytes(content);
    Ok(())
}

fn read_open_type(r: &mut BitReader) -> TmxResult<Vec<u8>> {
    let first = r
        .read_bits(1)
        .ok_or_else(|| TmxError::message_size("truncated open type length"))?;
    let len = if first == 0 {
        r.read_bits(7)
            .ok_or_else(|| TmxError::message_size("truncated open type length"))? as usize
    } else {
        let form = r
            .read_bits(1)
            .ok_or_else(|| TmxError::message_size("truncated open type length"))?;
        if form != 0 {
            return Err(TmxError::not_supported(
                "fragmented open type lengths are not supported",
            ));
        }
        r.read_bits(14)
            .ok_or_else(|| TmxError::message_size("truncated open type length"))? as usize
    };
    r.read_bytes(len)
        .ok_or_else(|| TmxError::message_size("truncated open type content"))
}

impl MessageFrame {
    /// Wrap a raw RTCM v3 frame for rebroadcast on `J2735/RTCM`.
    pub fn embed_rtcm(rtcm_bytes: Vec<u8>, timestamp_ns: i64, msg_cnt: u8) -> Self {
        Self {
            message_id: DsrcMessageId::RtcmCorrections.value() as u16,
            payload: FramePayload::RtcmCorrections(RtcmCorrections {
                msg_cnt: msg_cnt % 128,
                rev: RtcmRevision::RtcmRev3,
                time_stamp: Some(minute_of_year(timestamp_ns)),
                msgs: vec![rtcm_bytes],
            }),
        }
    }

    pub fn encode_uper(&self) -> TmxResult<Vec<u8>> {
        let content = match &self.payload {
            FramePayload::RtcmCorrections(rtcm) => rtcm.encode_uper()?,
            FramePayload::BasicSafetyMessage(bsm) => bsm.encode_uper()?,
            FramePayload::Opaque(bytes) => bytes.clone(),
        };
        let mut w = BitWriter::new();
        w.write_bits(0, 1);
        w.write_bits(self.message_id as u64 & 0x7FFF, 15);
        write_open_type(&mut w, &content)?;
        w.align();
        Ok(w.into_bytes())
    }

    /// The map shape the codec registry trades in:
    /// `{messageId, value: {<TypeName>: ...}}`.
    pub fn to_value(&self) -> Value {
        let mut out = Value::map();
        out.insert("messageId", self.message_id);
        let mut inner = Value::map();
        match &self.payload {
            FramePayload::RtcmCorrections(rtcm) => {
                let mut v = Value::map();
                v.insert("msgCnt", rtcm.msg_cnt);
                v.insert("rev", Value::from_enum(rtcm.rev));
                if let Some(ts) = rtcm.time_stamp {
                    v.insert("timeStamp", ts);
                }
                let mut msgs = Value::array();
                for msg in &rtcm.msgs {
                    msgs.push(Value::bytes(msg.clone()));
                }
                v.insert("msgs", msgs);
                inner.insert("RTCMcorrections", v);
            }
            FramePayload::BasicSafetyMessage(bsm) => {
                let c = &bsm.core;
                let mut core = Value::map();
                core.insert("msgCnt", c.msg_cnt);
                core.insert("id", Value::bytes(c.id.to_vec()));
                core.insert("secMark", c.sec_mark);
                core.insert("lat", c.lat);
                core.insert("Long", c.lon);
                core.insert("elev", c.elev);
                core.insert("transmission", c.transmission);
                core.insert("speed", c.speed);
                core.insert("heading", c.heading);
                core.insert("angle", c.angle);
                let mut accuracy = Value::map();
                accuracy.insert("semiMajor", c.semi_major);
                accuracy.insert("semiMinor", c.semi_minor);
                accuracy.insert("orientation", c.orientation);
                core.insert("accuracy", accuracy);
                let mut accel = Value::map();
                accel.insert("long", c.accel_long);
                accel.insert("lat", c.accel_lat);
                accel.insert("vert", c.accel_vert);
                accel.insert("yaw", c.accel_yaw);
                core.insert("accelSet", accel);
                core.insert("brakes", c.brakes);
                let mut size = Value::map();
                size.insert("width", c.width);
                size.insert("length", c.length);
                core.insert("size", size);
                let mut v = Value::map();
                v.insert("coreData", core);
                inner.insert("BasicSafetyMessage", v);
            }
            FramePayload::Opaque(bytes) => {
                inner.insert("opaque", Value::bytes(bytes.clone()));
            }
        }
        out.insert("value", inner);
        out
    }

    /// Reassemble a frame from the map shape. Fields the map does not
    /// carry keep their unavailable defaults.
    pub fn from_value(value: &Value) -> TmxResult<Self> {
        let message_id = value.get("messageId").to_uint() as u16;
        let inner = value.get("value");
        let rtcm = inner.get("RTCMcorrections");
        if !rtcm.is_null() {
            let mut msgs = Vec::new();
            for msg in rtcm.get("msgs").items() {
                match msg {
                    Value::Bytes { data, .. } => msgs.push(data.clone()),
                    other => {
                        let text = other.to_text();
                        msgs.push(
                            tmx_value::hex::decode_hex(&text)
                                .unwrap_or_else(|| text.into_bytes()),
                        );
                    }
                }
            }
            let ts = rtcm.get("timeStamp");
            return Ok(Self {
                message_id,
                payload: FramePayload::RtcmCorrections(RtcmCorrections {
                    msg_cnt: rtcm.get("msgCnt").to_uint() as u8,
                    rev: RtcmRevision::from_value(rtcm.get("rev").to_int())
                        .or_else(|| {
                            rtcm.get("rev")
                                .as_str()
                                .and_then(RtcmRevision::from_name)
                        })
                        .unwrap_or(RtcmRevision::Unknown),
                    time_stamp: if ts.is_null() {
                        None
                    } else {
                        Some(ts.to_uint() as u32)
                    },
                    msgs,
                }),
            });
        }
        let bsm = inner.get("BasicSafetyMessage");
        if !bsm.is_null() {
            let core = bsm.get("coreData");
            let mut id = [0u8; 4];
            if let Some(bytes) = core.get("id").as_bytes() {
                for (slot, byte) in id.iter_mut().zip(bytes.iter()) {
                    *slot = *byte;
                }
            }
            let defaults = BsmCoreData::default();
            let accuracy = core.get("accuracy");
            let accel = core.get("accelSet");
            let size = core.get("size");
            let take_or = |v: &Value, default: i64| -> i64 {
                if v.is_null() {
                    default
                } else {
                    v.to_int()
                }
            };
            return Ok(Self {
                message_id,
                payload: FramePayload::BasicSafetyMessage(BasicSafetyMessage {
                    core: BsmCoreData {
                        msg_cnt: core.get("msgCnt").to_uint() as u8,
                        id,
                        sec_mark: take_or(core.get("secMark"), defaults.sec_mark as i64) as u16,
                        lat: take_or(core.get("lat"), defaults.lat as i64) as i32,
                        lon: take_or(core.get("Long"), defaults.lon as i64) as i32,
                        elev: take_or(core.get("elev"), defaults.elev as i64) as i32,
                        semi_major: take_or(accuracy.get("semiMajor"), defaults.semi_major as i64)
                            as u8,
                        semi_minor: take_or(accuracy.get("semiMinor"), defaults.semi_minor as i64)
                            as u8,
                        orientation: take_or(
                            accuracy.get("orientation"),
                            defaults.orientation as i64,
                        ) as u16,
                        transmission: take_or(
                            core.get("transmission"),
                            defaults.transmission as i64,
                        ) as u8,
                        speed: take_or(core.get("speed"), defaults.speed as i64) as u16,
                        heading: take_or(core.get("heading"), defaults.heading as i64) as u16,
                        angle: take_or(core.get("angle"), defaults.angle as i64) as i16,
                        accel_long: take_or(accel.get("long"), defaults.accel_long as i64) as i16,
                        accel_lat: take_or(accel.get("lat"), defaults.accel_lat as i64) as i16,
                        accel_vert: take_or(accel.get("vert"), defaults.accel_vert as i64) as i16,
                        accel_yaw: take_or(accel.get("yaw"), defaults.accel_yaw as i64) as i32,
                        brakes: take_or(core.get("brakes"), defaults.brakes as i64) as u16,
                        width: take_or(size.get("width"), defaults.width as i64) as u16,
                        length: take_or(size.get("length"), defaults.length as i64) as u16,
                    },
                }),
            });
        }
        let opaque = inner.get("opaque");
        if !opaque.is_null() {
            let bytes = match opaque {
                Value::Bytes { data, .. } => data.clone(),
                other => tmx_value::hex::decode_hex(&other.to_text())
                    .unwrap_or_else(|| other.to_text().into_bytes()),
            };
            return Ok(Self {
                message_id,
                payload: FramePayload::Opaque(bytes),
            });
        }
        Err(TmxError::invalid_argument(
            "value does not describe a MessageFrame",
        ))
    }

    /// Does a map look like the frame shape [`MessageFrame::to_value`]
    /// produces?
    pub fn value_is_frame(value: &Value) -> bool {
        value.is_map() && !value.get("messageId").is_null() && value.get("value").is_map()
    }

    pub fn decode_uper(bytes: &[u8]) -> TmxResult<Self> {
        let mut r = BitReader::new(bytes);
        let extended = r
            .read_bits(1)
            .ok_or_else(|| TmxError::message_size("truncated MessageFrame"))?;
        if extended != 0 {
            return Err(TmxError::not_supported(
                "extended MessageFrame is not supported",
            ));
        }
        let message_id = r
            .read_bits(15)
            .ok_or_else(|| TmxError::message_size("truncated MessageFrame id"))?
            as u16;
        let content = read_open_type(&mut r)?;
        let payload = match DsrcMessageId::from_value(message_id as i64) {
            Some(DsrcMessageId::RtcmCorrections) => {
                FramePayload::RtcmCorrections(RtcmCorrections::decode_uper(&content)?)
            }
            Some(DsrcMessageId::BasicSafetyMessage) => {
                FramePayload::BasicSafetyMessage(BasicSafetyMessage::decode_uper(&content)?)
            }
            _ => FramePayload::Opaque(content),
        };
        Ok(Self {
            message_id,
            payload,
        })
    }
}
