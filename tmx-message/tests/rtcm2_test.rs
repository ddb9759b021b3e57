use tmx_message::rtcm::v2::{word_parity, Rtcm2Codec, Rtcm2Frame, RTCM2_PREAMBLE};
use tmx_message::{TmxDecoder, TmxEncoder};
use tmx_value::Value;

#[test]
fn test_parity_depends_on_history() {
    let data = 0x66_1234;
    let clean = word_parity(false, false, data);
    let with_d29 = word_parity(true, false, data);
    let with_d30 = word_parity(false, true, data);
    assert_ne!(clean, with_d29);
    assert_ne!(clean, with_d30);
    // Six parity bits only.
    assert!(clean < 64);
}

#[test]
fn test_encode_decode_identity() {
    let mut frame = Rtcm2Frame::new(1, 1021, vec![0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC]);
    frame.z_count = 1234;
    frame.sequence = 5;
    frame.health = 2;

    let wire = frame.encode_bytes();
    // 4 words of 30 bits, padded to bytes.
    assert_eq!(wire.len(), 15);

    let decoded = Rtcm2Frame::decode_bytes(&wire).unwrap();
    assert_eq!(decoded, frame);
    assert_eq!(decoded.word_count(), 2);
}

#[test]
fn test_payload_padded_to_whole_words() {
    let frame = Rtcm2Frame::new(9, 1, vec![0xAB, 0xCD]);
    assert_eq!(frame.data.len(), 3);
    assert_eq!(frame.word_count(), 1);
}

#[test]
fn test_decode_rejects_flipped_parity_bit() {
    let frame = Rtcm2Frame::new(3, 100, vec![1, 2, 3]);
    let mut wire = frame.encode_bytes();
    // Flip a bit inside the first word's parity field (bits 24..30).
    wire[3] ^= 0x20;
    let err = Rtcm2Frame::decode_bytes(&wire).unwrap_err();
    assert_eq!(err.code, tmx_value::codes::EPROTO);
}

#[test]
fn test_decode_rejects_corrupted_data_bit() {
    let frame = Rtcm2Frame::new(3, 100, vec![1, 2, 3]);
    let mut wire = frame.encode_bytes();
    wire[0] ^= 0x01;
    let err = Rtcm2Frame::decode_bytes(&wire).unwrap_err();
    // Either the parity check or the preamble catches it.
    assert!(
        err.code == tmx_value::codes::EPROTO || err.code == tmx_value::codes::EILSEQ
    );
}

#[test]
fn test_decode_rejects_wrong_preamble() {
    // Build a frame and rewrite the preamble bits with valid parity.
    let mut frame = Rtcm2Frame::new(1, 0, vec![]);
    frame.message_type = 1;
    let mut wire_words = Vec::new();
    {
        // Hand-roll a first word with a wrong preamble byte.
        use tmx_value::packing::BitWriter;
        let data = ((0x59u32) << 16) | (1 << 10);
        let parity = word_parity(false, false, data);
        let mut w = BitWriter::new();
        w.write_bits(data as u64, 24);
        w.write_bits(parity as u64, 6);
        let second = 0u32;
        let parity2 = word_parity(parity & 2 != 0, parity & 1 != 0, second);
        w.write_bits(second as u64, 24);
        w.write_bits(parity2 as u64, 6);
        w.align();
        wire_words.extend_from_slice(&w.into_bytes());
    }
    let err = Rtcm2Frame::decode_bytes(&wire_words).unwrap_err();
    assert_eq!(err.code, tmx_value::codes::EILSEQ);
}

#[test]
fn test_truncated_frame_is_message_size() {
    let frame = Rtcm2Frame::new(1, 7, vec![1, 2, 3, 4, 5, 6]);
    let wire = frame.encode_bytes();
    let err = Rtcm2Frame::decode_bytes(&wire[..wire.len() - 4]).unwrap_err();
    assert_eq!(err.code, tmx_value::codes::EMSGSIZE);
}

#[test]
fn test_complement_path_round_trips() {
    // Enough varied words that some follow a word with d30 set, forcing
    // the complemented-transmission path.
    for seed in 0u8..16 {
        let data: Vec<u8> = (0..12).map(|i| seed.wrapping_mul(31).wrapping_add(i * 17)).collect();
        let frame = Rtcm2Frame::new((seed % 63) + 1, seed as u16, data);
        let decoded = Rtcm2Frame::decode_bytes(&frame.encode_bytes()).unwrap();
        assert_eq!(decoded, frame);
    }
}

#[test]
fn test_value_round_trip() {
    let mut frame = Rtcm2Frame::new(17, 900, vec![0xDE, 0xAD, 0xBE]);
    frame.z_count = 400;
    let value = frame.to_value();
    assert_eq!(value.get("MessageType").to_int(), 17);
    assert_eq!(Rtcm2Frame::from_value(&value).unwrap(), frame);
}

#[test]
fn test_codec_pair() {
    let frame = Rtcm2Frame::new(31, 55, vec![9, 9, 9]);
    let codec = Rtcm2Codec;
    let mut out = Vec::new();
    codec.encode(&frame.to_value(), &mut out).unwrap();
    let decoded = codec.decode(&out).unwrap();
    assert_eq!(Rtcm2Frame::from_value(&decoded).unwrap(), frame);
    assert_eq!(RTCM2_PREAMBLE, 0x66);
}

#[test]
fn test_from_value_requires_message_type() {
    let err = Rtcm2Frame::from_value(&Value::map()).unwrap_err();
    assert_eq!(err.code, tmx_value::codes::EINVAL);
}
