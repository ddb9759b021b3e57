//! Typed views over gpsd JSON reports. The broker layer forwards raw
//! report lines with class-derived topics; these DAOs give handlers a
//! typed shape for the classes the bus itself consumes.

use crate::nmea::GnssFix;
use tmx_value::{TmxError, Value};

/// The report classes the daemon emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpsdClass {
    Version,
    Devices,
    Device,
    Watch,
    Tpv,
    Sky,
    Other,
}

impl GpsdClass {
    pub fn of(report: &Value) -> GpsdClass {
        match report.get("class").as_str() {
            Some("VERSION") => GpsdClass::Version,
            Some("DEVICES") => GpsdClass::Devices,
            Some("DEVICE") => GpsdClass::Device,
            Some("WATCH") => GpsdClass::Watch,
            Some("TPV") => GpsdClass::Tpv,
            Some("SKY") => GpsdClass::Sky,
            _ => GpsdClass::Other,
        }
    }
}

/// The daemon handshake report.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionReport {
    pub release: String,
    pub revision: String,
    pub proto_major: i64,
    pub proto_minor: i64,
}

impl TryFrom<Value> for VersionReport {
    type Error = TmxError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        if GpsdClass::of(&value) != GpsdClass::Version {
            return Err(TmxError::not_supported("report is not a VERSION class"));
        }
        Ok(Self {
            release: value.get("release").to_text(),
            revision: value.get("rev").to_text(),
            proto_major: value.get("proto_major").to_int(),
            proto_minor: value.get("proto_minor").to_int(),
        })
    }
}

/// One attached receiver from a DEVICE or DEVICES report.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceReport {
    pub path: String,
    pub driver: String,
    pub subtype: String,
    pub activated: String,
    pub flags: i64,
}

impl TryFrom<Value> for DeviceReport {
    type Error = TmxError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        let path = value.get("path");
        if path.is_null() {
            return Err(TmxError::not_supported("device report carries no path"));
        }
        Ok(Self {
            path: path.to_text(),
            driver: value.get("driver").to_text(),
            subtype: value.get("subtype").to_text(),
            activated: value.get("activated").to_text(),
            flags: value.get("flags").to_int(),
        })
    }
}

/// Satellite visibility summary from a SKY report.
#[derive(Debug, Clone, PartialEq)]
pub struct SkyReport {
    pub satellites_visible: usize,
    pub satellites_used: usize,
    pub hdop: f64,
    pub vdop: f64,
    pub pdop: f64,
}

impl TryFrom<Value> for SkyReport {
    type Error = TmxError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        if GpsdClass::of(&value) != GpsdClass::Sky {
            return Err(TmxError::not_supported("report is not a SKY class"));
        }
        let satellites = value.get("satellites");
        let used = satellites
            .items()
            .filter(|sat| sat.get("used").to_bool())
            .count();
        Ok(Self {
            satellites_visible: satellites.len(),
            satellites_used: used,
            hdop: value.get("hdop").to_float(),
            vdop: value.get("vdop").to_float(),
            pdop: value.get("pdop").to_float(),
        })
    }
}

/// A TPV report is exactly the fix shape the bus trades in.
pub fn fix_from_tpv(report: &Value) -> Result<GnssFix, TmxError> {
    if GpsdClass::of(report) != GpsdClass::Tpv {
        return Err(TmxError::not_supported("report is not a TPV class"));
    }
    Ok(GnssFix::from_value(report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::names;
    use crate::CodecRegistry;

    fn decode(json: &str) -> Value {
        CodecRegistry::standard()
            .decode(names::JSON, json.as_bytes())
            .unwrap()
    }

    #[test]
    fn version_report() {
        let report = decode(
            r#"{"class":"VERSION","release":"3.25","rev":"2023-01-10","proto_major":3,"proto_minor":15}"#,
        );
        assert_eq!(GpsdClass::of(&report), GpsdClass::Version);
        let version = VersionReport::try_from(report).unwrap();
        assert_eq!(version.release, "3.25");
        assert_eq!(version.proto_major, 3);
    }

    #[test]
    fn sky_report_counts_used_satellites() {
        let report = decode(
            r#"{"class":"SKY","hdop":1.2,"satellites":[{"PRN":1,"used":true},{"PRN":7,"used":false},{"PRN":12,"used":true}]}"#,
        );
        let sky = SkyReport::try_from(report).unwrap();
        assert_eq!(sky.satellites_visible, 3);
        assert_eq!(sky.satellites_used, 2);
        assert_eq!(sky.hdop, 1.2);
    }

    #[test]
    fn tpv_report_is_a_fix() {
        let report = decode(
            r#"{"class":"TPV","mode":3,"status":1,"lat":34.20576,"lon":-86.20576,"altHAE":50.0,"speed":20.0,"track":90.0}"#,
        );
        let fix = fix_from_tpv(&report).unwrap();
        assert_eq!(fix.mode, crate::nmea::FixMode::ThreeD);
        assert_eq!(fix.lat, 34.20576);
        assert_eq!(fix.speed, 20.0);
    }

    #[test]
    fn class_mismatch_is_not_supported() {
        let report = decode(r#"{"class":"TPV","mode":2}"#);
        assert!(VersionReport::try_from(report.clone()).is_err());
        assert!(SkyReport::try_from(report).is_err());
    }

    #[test]
    fn device_report_requires_path() {
        let report = decode(r#"{"class":"DEVICE","driver":"u-blox"}"#);
        assert!(DeviceReport::try_from(report).is_err());
        let report = decode(
            r#"{"class":"DEVICE","path":"/dev/ttyACM0","driver":"u-blox","flags":1}"#,
        );
        let device = DeviceReport::try_from(report).unwrap();
        assert_eq!(device.path, "/dev/ttyACM0");
        assert_eq!(device.flags, 1);
    }
}
