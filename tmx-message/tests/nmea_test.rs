use tmx_message::nmea::{checksum, fix_from_gga, FixMode, FixStatus, GnssFix, NmeaSentence};

const GGA: &str =
    "$GPGGA,172814.00,3412.3456,N,08612.3456,W,1,12,1.0,50.0,M,0.0,M,,*5A\r\n";

#[test]
fn test_parse_splits_talker_and_kind() {
    let sentence = NmeaSentence::parse(GGA).unwrap();
    assert_eq!(sentence.talker, "GP");
    assert_eq!(sentence.kind, "GGA");
    assert_eq!(sentence.fields[0], "172814.00");
    assert_eq!(sentence.fields.len(), 14);
}

#[test]
fn test_checksum_mismatch_is_tolerated_but_flagged() {
    let sentence = NmeaSentence::parse(GGA).unwrap();
    assert!(!sentence.checksum_ok);

    let body = "GPGGA,172814.00,3412.3456,N,08612.3456,W,1,12,1.0,50.0,M,0.0,M,,";
    let good = format!("${}*{:02X}", body, checksum(body));
    assert!(NmeaSentence::parse(&good).unwrap().checksum_ok);
}

#[test]
fn test_parse_rejects_non_sentence() {
    assert!(NmeaSentence::parse("GPGGA,1,2,3").is_err());
    assert!(NmeaSentence::parse("$GP").is_err());
}

#[test]
fn test_gga_fix_values() {
    let sentence = NmeaSentence::parse(GGA).unwrap();
    let fix = fix_from_gga(&sentence).unwrap();

    assert_eq!(fix.mode, FixMode::ThreeD);
    assert_eq!(fix.status, FixStatus::Gps);
    assert!((fix.lat - 34.205760).abs() < 1e-6);
    assert!((fix.lon - -86.205760).abs() < 1e-6);
    assert_eq!(fix.alt_hae, 50.0);
    assert_eq!(fix.alt_msl, 50.0);
    assert_eq!(fix.satellites_used, 12);
    assert_eq!(fix.hdop, 1.0);
}

#[test]
fn test_gga_without_fix() {
    let body = "GPGGA,172814.00,,,,,0,00,,,M,,M,,";
    let line = format!("${}*{:02X}", body, checksum(body));
    let fix = fix_from_gga(&NmeaSentence::parse(&line).unwrap()).unwrap();
    assert_eq!(fix.mode, FixMode::NoFix);
    assert_eq!(fix.status, FixStatus::Unknown);
    assert_eq!(fix.lat, 0.0);
}

#[test]
fn test_non_gga_is_not_supported() {
    let body = "GPRMC,172814.00,A,3412.3456,N,08612.3456,W,0.1,90.0,130621,,,A";
    let line = format!("${}*{:02X}", body, checksum(body));
    let sentence = NmeaSentence::parse(&line).unwrap();
    let err = fix_from_gga(&sentence).unwrap_err();
    assert_eq!(err.code, tmx_value::codes::ENOTSUP);
}

#[test]
fn test_southern_western_hemispheres() {
    let body = "GPGGA,0,1230.0000,S,04515.0000,W,1,8,1.0,10.0,M,2.5,M,,";
    let line = format!("${}*{:02X}", body, checksum(body));
    let fix = fix_from_gga(&NmeaSentence::parse(&line).unwrap()).unwrap();
    assert!((fix.lat - -12.5).abs() < 1e-9);
    assert!((fix.lon - -45.25).abs() < 1e-9);
    assert_eq!(fix.alt_hae, 12.5);
}

#[test]
fn test_fix_value_round_trip() {
    let sentence = NmeaSentence::parse(GGA).unwrap();
    let fix = fix_from_gga(&sentence).unwrap();
    let value = fix.to_value();
    assert_eq!(value.get("class").as_str(), Some("TPV"));
    assert_eq!(value.get("mode").to_int(), 3);
    let back = GnssFix::from_value(&value);
    assert_eq!(back, fix);
}
