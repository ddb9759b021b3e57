//! NMEA 0183 sentence handling for the GNSS side of the bus: talker-id
//! extraction for topic derivation and the GGA-to-fix translation behind
//! the `V2X/Location` feed.

use tmx_value::{named_enum, NamedEnum, TmxError, TmxResult, Value};
use tracing::warn;

named_enum! {
    /// Fix dimensionality, numbered like the gpsd TPV `mode` field.
    pub enum FixMode: u8 {
        NotSeen = 0,
        NoFix = 1,
        TwoD = 2,
        ThreeD = 3,
    }
}

named_enum! {
    /// Fix source, numbered like the gpsd TPV `status` field.
    pub enum FixStatus: u8 {
        Unknown = 0,
        Gps = 1,
        Dgps = 2,
        RtkFixed = 3,
        RtkFloating = 4,
        DeadReckoning = 5,
        GnssDeadReckoning = 6,
        TimeOnly = 7,
        SimulationMode = 8,
        PpsFix = 9,
    }
}

/// XOR checksum over a sentence body (the text between `$` and `*`).
pub fn checksum(body: &str) -> u8 {
    body.bytes().fold(0, |acc, b| acc ^ b)
}

/// A split NMEA sentence: two-character talker id, sentence kind, and the
/// comma-separated data fields.
#[derive(Debug, Clone, PartialEq)]
pub struct NmeaSentence {
    pub talker: String,
    pub kind: String,
    pub fields: Vec<String>,
    pub checksum_ok: bool,
}

impl NmeaSentence {
    /// Parse one line. A checksum mismatch is tolerated but recorded, so
    /// upstream receivers with sloppy checksums still produce fixes.
    pub fn parse(line: &str) -> TmxResult<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        let body = line
            .strip_prefix('$')
            .ok_or_else(|| TmxError::malformed("NMEA sentence does not start with $"))?;

        let (body, checksum_ok) = match body.rsplit_once('*') {
            Some((data, sum)) => {
                let ok = u8::from_str_radix(sum.trim(), 16)
                    .map(|wire| wire == checksum(data))
                    .unwrap_or(false);
                if !ok {
                    warn!("NMEA checksum mismatch in {:?}", line);
                }
                (data, ok)
            }
            None => (body, false),
        };

        let mut fields = body.split(',');
        let address = fields
            .next()
            .ok_or_else(|| TmxError::malformed("empty NMEA sentence"))?;
        if address.len() < 5 {
            return Err(TmxError::malformed(format!(
                "NMEA address field {:?} is too short",
                address
            )));
        }
        Ok(Self {
            talker: address[..2].to_string(),
            kind: address[2..].to_string(),
            fields: fields.map(str::to_string).collect(),
            checksum_ok,
        })
    }

    fn field(&self, index: usize) -> &str {
        self.fields.get(index).map(String::as_str).unwrap_or("")
    }

    fn number(&self, index: usize) -> f64 {
        self.field(index).parse().unwrap_or(0.0)
    }
}

/// A position fix shaped like a gpsd TPV report.
#[derive(Debug, Clone, PartialEq)]
pub struct GnssFix {
    pub mode: FixMode,
    pub status: FixStatus,
    pub lat: f64,
    pub lon: f64,
    /// Height above the ellipsoid, meters.
    pub alt_hae: f64,
    /// Height above mean sea level, meters.
    pub alt_msl: f64,
    /// Course over ground, degrees true.
    pub track: f64,
    /// Speed over ground, m/s.
    pub speed: f64,
    pub satellites_used: u32,
    pub hdop: f64,
}

impl Default for GnssFix {
    fn default() -> Self {
        Self {
            mode: FixMode::NotSeen,
            status: FixStatus::Unknown,
            lat: 0.0,
            lon: 0.0,
            alt_hae: 0.0,
            alt_msl: 0.0,
            track: 0.0,
            speed: 0.0,
            satellites_used: 0,
            hdop: 0.0,
        }
    }
}

impl GnssFix {
    /// The TPV-shaped map carried on `V2X/Location` and `gpsd/TPV`.
    pub fn to_value(&self) -> Value {
        let mut out = Value::map();
        out.insert("class", "TPV");
        out.insert("mode", Value::from_enum(self.mode));
        out.insert("status", Value::from_enum(self.status));
        out.insert("lat", self.lat);
        out.insert("lon", self.lon);
        out.insert("altHAE", self.alt_hae);
        out.insert("altMSL", self.alt_msl);
        out.insert("track", self.track);
        out.insert("speed", self.speed);
        out.insert("uSat", self.satellites_used);
        out.insert("hdop", self.hdop);
        out
    }

    pub fn from_value(value: &Value) -> Self {
        // A decoded payload may carry the enums by name (JSON) or by
        // underlying number (CBOR, gpsd reports).
        fn named<E: NamedEnum>(v: &Value) -> Option<E> {
            match v.as_str() {
                Some(s) => E::from_name(s),
                None => E::from_value(v.to_int()),
            }
        }
        let mode = named::<FixMode>(value.get("mode")).unwrap_or(FixMode::NotSeen);
        let status =
            named::<FixStatus>(value.get("status")).unwrap_or(FixStatus::Unknown);
        Self {
            mode,
            status,
            lat: value.get("lat").to_float(),
            lon: value.get("lon").to_float(),
            alt_hae: value.get("altHAE").to_float(),
            alt_msl: value.get("altMSL").to_float(),
            track: value.get("track").to_float(),
            speed: value.get("speed").to_float(),
            satellites_used: value.get("uSat").to_uint() as u32,
            hdop: value.get("hdop").to_float(),
        }
    }
}

/// Convert `ddmm.mmmm` plus hemisphere into signed decimal degrees.
fn coordinate(raw: &str, hemisphere: &str) -> f64 {
    let value: f64 = match raw.parse() {
        Ok(v) => v,
        Err(_) => return 0.0,
    };
    let degrees = (value / 100.0).trunc();
    let minutes = value - degrees * 100.0;
    let decimal = degrees + minutes / 60.0;
    match hemisphere {
        "S" | "W" => -decimal,
        _ => decimal,
    }
}

/// Translate a GGA sentence into a fix. Fails on non-GGA input; a quality
/// of zero produces a no-fix report rather than an error.
pub fn fix_from_gga(sentence: &NmeaSentence) -> TmxResult<GnssFix> {
    if sentence.kind != "GGA" {
        return Err(TmxError::not_supported(format!(
            "cannot derive a fix from a {} sentence",
            sentence.kind
        )));
    }

    let quality = sentence.number(5) as u32;
    let satellites = sentence.number(6) as u32;
    let status = match quality {
        0 => FixStatus::Unknown,
        1 => FixStatus::Gps,
        2 => FixStatus::Dgps,
        4 => FixStatus::RtkFixed,
        5 => FixStatus::RtkFloating,
        6 => FixStatus::DeadReckoning,
        8 => FixStatus::SimulationMode,
        _ => FixStatus::Unknown,
    };
    let mode = if quality == 0 {
        FixMode::NoFix
    } else if satellites >= 4 {
        FixMode::ThreeD
    } else {
        FixMode::TwoD
    };

    let alt_msl = sentence.number(8);
    let geoid_separation = sentence.number(10);
    Ok(GnssFix {
        mode,
        status,
        lat: coordinate(sentence.field(1), sentence.field(2)),
        lon: coordinate(sentence.field(3), sentence.field(4)),
        alt_hae: alt_msl + geoid_separation,
        alt_msl,
        satellites_used: satellites,
        hdop: sentence.number(7),
        ..Default::default()
    })
}
