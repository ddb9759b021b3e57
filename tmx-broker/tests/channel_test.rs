use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tmx_broker::{BrokerRegistry, BrokerState, TmxChannel};
use tmx_message::{CodecRegistry, TmxMessage};
use tmx_value::Value;

fn wait_until(timeout: Duration, mut predicate: impl FnMut() -> bool) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    while std::time::Instant::now() < deadline {
        if predicate() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    predicate()
}

#[test]
fn test_default_encoding_preference() {
    let registry = BrokerRegistry::standard();
    let json = TmxChannel::new(registry.clone(), "kafka://h:9092", "", Value::Null).unwrap();
    assert_eq!(json.default_encoding(), "json");
    let cbor = TmxChannel::new(
        registry,
        "kafka://h:9092?encoding=cbor",
        "",
        Value::Null,
    )
    .unwrap();
    assert_eq!(cbor.default_encoding(), "cbor");
}

#[test]
fn test_outbound_topic_filter() {
    let registry = BrokerRegistry::standard();
    let open = TmxChannel::new(registry.clone(), "kafka://h:9092", "", Value::Null).unwrap();
    assert!(open.accepts_topic("V2X/RTCM3"));
    assert!(open.accepts_topic("anything/at/all"));

    let mut defaults = Value::map();
    let mut topics = Value::array();
    topics.push("V2X/*");
    topics.push("J2735/RTCM");
    defaults.insert("topics", topics);
    let narrow = TmxChannel::new(registry, "kafka://h:9092", "", defaults).unwrap();
    assert!(narrow.accepts_topic("V2X/RTCM3"));
    assert!(narrow.accepts_topic("V2X/Location"));
    assert!(narrow.accepts_topic("J2735/RTCM"));
    assert!(!narrow.accepts_topic("J2735/BSM"));
    assert!(!narrow.accepts_topic("gpsd/TPV"));
}

#[test]
fn test_unknown_scheme_is_not_supported() {
    let registry = BrokerRegistry::standard();
    let channel = TmxChannel::new(registry, "mqtt://h:1883", "", Value::Null).unwrap();
    let err = channel.initialize().unwrap_err();
    assert_eq!(err.code, tmx_value::codes::ENOTSUP);
}

#[test]
fn test_write_data_encodes_with_preference() {
    let registry = BrokerRegistry::standard();
    let codecs = CodecRegistry::standard();
    let channel = TmxChannel::new(
        registry,
        "kafka://hub-chan:9092",
        "chan-1",
        Value::Null,
    )
    .unwrap();
    channel.initialize().unwrap();
    channel.connect(&Value::Null).unwrap();
    assert!(channel
        .context()
        .wait_for_state(BrokerState::Connected, Duration::from_secs(2)));

    // Subscribe a collector on the same channel so the hub loops back.
    let seen: Arc<Mutex<Vec<TmxMessage>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    channel
        .subscribe(
            "V2X/Location",
            "collector",
            Arc::new(move |message| {
                sink.lock().push(message);
            }),
        )
        .unwrap();
    assert_eq!(channel.subscriptions().len(), 1);

    let mut fix = Value::map();
    fix.insert("lat", 34.20576f64);
    fix.insert("lon", -86.20576f64);
    channel
        .write_data(&codecs, &fix, TmxMessage::new("V2X/Location"))
        .unwrap();

    assert!(wait_until(Duration::from_secs(2), || !seen.lock().is_empty()));
    let received = seen.lock()[0].clone();
    assert_eq!(received.encoding, "json");
    let decoded = codecs.decode_message(&received).unwrap();
    assert_eq!(decoded.get("lat").to_float(), 34.20576);

    channel.destroy().unwrap();
}
