use tmx_message::j2735::{
    minute_of_year, topic_for_message_id, BasicSafetyMessage, BsmCoreData, FramePayload,
    MessageFrame, RtcmCorrections, RtcmRevision,
};
use tmx_message::rtcm::v3::Rtcm3Frame;

#[test]
fn test_minute_of_year_at_year_start() {
    // 1971-01-01T00:10:30 UTC: 365 days after the epoch.
    let ts = (365i64 * 86400 + 10 * 60 + 30) * 1_000_000_000;
    assert_eq!(minute_of_year(ts), 10);
}

#[test]
fn test_minute_of_year_spans_leap_year() {
    // 2021-01-01 00:00 is minute zero of 2021; 1972 was a leap year so
    // the day arithmetic must use the civil calendar.
    let days_to_2021 = 18628i64; // days from 1970-01-01 to 2021-01-01
    let ts = days_to_2021 * 86400 * 1_000_000_000;
    assert_eq!(minute_of_year(ts), 0);
    let one_day_later = ts + 86400 * 1_000_000_000;
    assert_eq!(minute_of_year(one_day_later), 1440);
}

#[test]
fn test_embed_rtcm_round_trip() {
    let rtcm = Rtcm3Frame::new(1005, 2003, vec![5u8; 16]).encode_bytes();
    let frame = MessageFrame::embed_rtcm(rtcm.clone(), 1_700_000_000_000_000_000, 0);
    assert_eq!(frame.message_id, 0x1C);

    let encoded = frame.encode_uper().unwrap();
    let decoded = MessageFrame::decode_uper(&encoded).unwrap();
    assert_eq!(decoded.message_id, 0x1C);
    match decoded.payload {
        FramePayload::RtcmCorrections(corrections) => {
            assert_eq!(corrections.msg_cnt, 0);
            assert_eq!(corrections.rev, RtcmRevision::RtcmRev3);
            assert_eq!(corrections.msgs.len(), 1);
            assert_eq!(corrections.msgs[0], rtcm);
            assert!(corrections.time_stamp.is_some());
        }
        other => panic!("expected RTCMcorrections, got {:?}", other),
    }
}

#[test]
fn test_msg_cnt_wraps_mod_128() {
    let frame = MessageFrame::embed_rtcm(vec![1], 0, 200);
    match frame.payload {
        FramePayload::RtcmCorrections(c) => assert_eq!(c.msg_cnt, 200 % 128),
        _ => unreachable!(),
    }
}

#[test]
fn test_rtcm_corrections_limits() {
    let empty = RtcmCorrections {
        msg_cnt: 0,
        rev: RtcmRevision::RtcmRev3,
        time_stamp: None,
        msgs: vec![],
    };
    assert_eq!(
        empty.encode_uper().unwrap_err().code,
        tmx_value::codes::EINVAL
    );

    let oversize = RtcmCorrections {
        msg_cnt: 0,
        rev: RtcmRevision::RtcmRev3,
        time_stamp: None,
        msgs: vec![vec![0u8; 1024]],
    };
    assert_eq!(
        oversize.encode_uper().unwrap_err().code,
        tmx_value::codes::EMSGSIZE
    );
}

#[test]
fn test_bsm_round_trip() {
    let bsm = BasicSafetyMessage {
        core: BsmCoreData {
            msg_cnt: 17,
            id: [0x2A, 0x00, 0x00, 0x00],
            lat: 342057600,
            lon: -862057600,
            elev: 500,
            speed: 1000,
            heading: 7200,
            ..Default::default()
        },
    };
    let encoded = bsm.encode_uper().unwrap();
    let decoded = BasicSafetyMessage::decode_uper(&encoded).unwrap();
    assert_eq!(decoded, bsm);
}

#[test]
fn test_bsm_inside_message_frame() {
    let bsm = BasicSafetyMessage {
        core: BsmCoreData {
            id: [1, 2, 3, 4],
            lat: -900000000,
            lon: 1800000001,
            ..Default::default()
        },
    };
    let frame = MessageFrame {
        message_id: 20,
        payload: FramePayload::BasicSafetyMessage(bsm.clone()),
    };
    let decoded = MessageFrame::decode_uper(&frame.encode_uper().unwrap()).unwrap();
    assert_eq!(
        decoded.payload,
        FramePayload::BasicSafetyMessage(bsm)
    );
}

#[test]
fn test_unknown_message_id_keeps_opaque_payload() {
    let frame = MessageFrame {
        message_id: 77,
        payload: FramePayload::Opaque(vec![9, 8, 7]),
    };
    let decoded = MessageFrame::decode_uper(&frame.encode_uper().unwrap()).unwrap();
    assert_eq!(decoded.payload, FramePayload::Opaque(vec![9, 8, 7]));
}

#[test]
fn test_truncated_frame_fails() {
    let frame = MessageFrame::embed_rtcm(vec![1, 2, 3], 0, 0);
    let encoded = frame.encode_uper().unwrap();
    let err = MessageFrame::decode_uper(&encoded[..2]).unwrap_err();
    assert_eq!(err.code, tmx_value::codes::EMSGSIZE);
}

#[test]
fn test_topic_derivation_from_message_id() {
    assert_eq!(topic_for_message_id(0x1C), "RTCM");
    assert_eq!(topic_for_message_id(20), "BSM");
    assert_eq!(topic_for_message_id(19), "SPAT");
    assert_eq!(topic_for_message_id(29), "SRM");
    assert_eq!(topic_for_message_id(12345), "UNKNOWN");
}
