use std::time::{Duration, UNIX_EPOCH};
use tmx_message::{TmxMessage, TMX_PREAMBLE};

#[test]
fn test_preamble_constant() {
    // T, M, X as three packed 5-bit letters.
    assert_eq!(TMX_PREAMBLE, 0x4D97);
    let t = 19u16;
    let m = 12u16;
    let x = 23u16;
    assert_eq!((t << 10) | (m << 5) | x, TMX_PREAMBLE);
}

#[test]
fn test_length_tracks_payload() {
    let mut msg = TmxMessage::new("V2X/RTCM3");
    assert_eq!(msg.length(), 0);
    msg.set_payload_string("d3001310");
    assert_eq!(msg.length(), 8);
    assert_eq!(msg.payload_string(), "d3001310");
}

#[test]
fn test_metadata_subfields_pack_independently() {
    let mut msg = TmxMessage::default();
    msg.set_qos(2);
    msg.set_priority(7);
    msg.set_base(1);
    msg.set_assignment_group(9);
    msg.set_assignment_id(4);
    msg.set_fragment(3);
    msg.set_attempt(5);
    msg.set_programmable_metadata(0xDEADBEEF);

    assert_eq!(msg.qos(), 2);
    assert_eq!(msg.priority(), 7);
    assert_eq!(msg.base(), 1);
    assert_eq!(msg.assignment_group(), 9);
    assert_eq!(msg.assignment_id(), 4);
    assert_eq!(msg.fragment(), 3);
    assert_eq!(msg.attempt(), 5);
    assert_eq!(msg.programmable_metadata(), 0xDEADBEEF);

    // QoS occupies the two highest-order bits.
    assert_eq!(msg.metadata >> 62, 2);
}

#[test]
fn test_metadata_setter_masks_overflow() {
    let mut msg = TmxMessage::default();
    msg.set_qos(0xFF);
    assert_eq!(msg.qos(), 3);
    assert_eq!(msg.priority(), 0);
}

#[test]
fn test_reserved_bits_round_trip_untouched() {
    let mut msg = TmxMessage::default();
    // Write an unknown pattern straight into the packed word.
    msg.metadata = 0x0000_00AB_0000_0000;
    msg.set_qos(1);
    msg.set_programmable_metadata(7);
    assert_eq!(msg.reserved(), 0xAB);
}

#[test]
fn test_timepoint_round_trip() {
    let mut msg = TmxMessage::default();
    let when = UNIX_EPOCH + Duration::new(1_700_000_000, 123_456_789);
    msg.set_timepoint(when);
    assert_eq!(msg.timestamp, 1_700_000_000_123_456_789);
    assert_eq!(msg.timepoint(), when);
}

#[test]
fn test_default_envelope_is_empty() {
    let msg = TmxMessage::default();
    assert!(msg.id.is_empty());
    assert!(msg.topic.is_empty());
    assert!(msg.source.is_empty());
    assert!(msg.encoding.is_empty());
    assert_eq!(msg.timestamp, 0);
    assert_eq!(msg.metadata, 0);
    assert_eq!(msg.length(), 0);
}
