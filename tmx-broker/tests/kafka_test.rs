use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tmx_broker::kafka::{topic_from_kafka, topic_to_kafka};
use tmx_broker::{BrokerContext, BrokerRegistry, BrokerState, CallbackDescriptor};
use tmx_message::TmxMessage;
use tmx_value::Value;

fn collector() -> (Arc<Mutex<Vec<TmxMessage>>>, tmx_broker::MessageCallback) {
    let seen: Arc<Mutex<Vec<TmxMessage>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    (
        seen,
        Arc::new(move |message| {
            sink.lock().push(message);
        }),
    )
}

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
fn test_topic_translation() {
    assert_eq!(topic_to_kafka("V2X/RTCM3"), "V2X.RTCM3");
    assert_eq!(topic_from_kafka("V2X.RTCM3"), "V2X/RTCM3");
    assert_eq!(topic_from_kafka(&topic_to_kafka("a/b/c")), "a/b/c");
}

#[test]
fn test_connect_requires_initialize() {
    let registry = BrokerRegistry::standard();
    let ctx = BrokerContext::new("kafka://broker.local:9092", "", Value::Null).unwrap();
    let broker = registry.get_broker(&ctx).unwrap();

    // Straight to connect must be rejected by the state machine.
    broker.connect(&ctx, &Value::Null);
    assert_eq!(ctx.state(), BrokerState::Uninitialized);
    assert_eq!(ctx.last_error().unwrap().code, tmx_value::codes::EINVAL);

    broker.initialize(&ctx);
    assert_eq!(ctx.state(), BrokerState::Initialized);
    broker.connect(&ctx, &Value::Null);
    assert!(ctx.wait_for_state(BrokerState::Connected, Duration::from_secs(2)));
    assert!(broker.is_connected(&ctx));
    broker.destroy(&ctx);
    assert_eq!(ctx.state(), BrokerState::Uninitialized);
}

#[test]
fn test_initialize_fills_defaults() {
    let registry = BrokerRegistry::standard();
    let ctx = BrokerContext::new("kafka://broker.local:9092", "ctx-k", Value::Null).unwrap();
    let broker = registry.get_broker(&ctx).unwrap();
    broker.initialize(&ctx);

    assert_eq!(
        ctx.param("bootstrap.servers").as_str(),
        Some("broker.local:9092")
    );
    assert!(ctx.param("allow.auto.create.topics").to_bool());
    assert_eq!(ctx.param("linger.ms").to_int(), 0);
    // The consumer group defaults to the context id.
    assert_eq!(ctx.param("consumer-group").as_str(), Some("ctx-k"));
}

#[test]
fn test_publish_subscribe_round_trip() {
    let registry = BrokerRegistry::standard();
    let producer =
        BrokerContext::new("kafka://hub-a:9092", "producer", Value::Null).unwrap();
    let consumer =
        BrokerContext::new("kafka://hub-a:9092", "consumer", Value::Null).unwrap();
    let broker = registry.get_broker(&producer).unwrap();

    broker.initialize(&producer);
    broker.initialize(&consumer);
    broker.connect(&producer, &Value::Null);
    broker.connect(&consumer, &Value::Null);
    assert!(producer.wait_for_state(BrokerState::Connected, Duration::from_secs(2)));
    assert!(consumer.wait_for_state(BrokerState::Connected, Duration::from_secs(2)));

    let (seen, callback) = collector();
    broker.subscribe(&consumer, "V2X/RTCM3", CallbackDescriptor::new("h1", callback));
    assert_eq!(consumer.state(), BrokerState::Registered);

    let mut message = TmxMessage::new("V2X/RTCM3");
    message.id = "RTCM3Message".to_string();
    message.source = "test".to_string();
    message.encoding = "json".to_string();
    message.set_payload_string("{\"MessageNumber\":1005}");
    broker.publish(&producer, message);

    assert!(wait_until(Duration::from_secs(2), || !seen.lock().is_empty()));
    let received = seen.lock()[0].clone();
    // The consumer sees the slash-form topic and the content headers.
    assert_eq!(received.topic, "V2X/RTCM3");
    assert_eq!(received.id, "RTCM3Message");
    assert_eq!(received.source, "test");
    assert_eq!(received.encoding, "json");

    broker.destroy(&producer);
    broker.destroy(&consumer);
}

#[test]
fn test_same_group_delivers_once() {
    let registry = BrokerRegistry::standard();
    let producer = BrokerContext::new("kafka://hub-b:9092", "p2", Value::Null).unwrap();
    let a = BrokerContext::new(
        "kafka://hub-b:9092?consumer-group=workers",
        "worker-a",
        Value::Null,
    )
    .unwrap();
    let b = BrokerContext::new(
        "kafka://hub-b:9092?consumer-group=workers",
        "worker-b",
        Value::Null,
    )
    .unwrap();
    let broker = registry.get_broker(&producer).unwrap();
    for ctx in [&producer, &a, &b] {
        broker.initialize(ctx);
        broker.connect(ctx, &Value::Null);
        assert!(ctx.wait_for_state(BrokerState::Connected, Duration::from_secs(2)));
    }

    let (seen_a, cb_a) = collector();
    let (seen_b, cb_b) = collector();
    broker.subscribe(&a, "jobs/ingest", CallbackDescriptor::new("h", cb_a));
    broker.subscribe(&b, "jobs/ingest", CallbackDescriptor::new("h", cb_b));

    for i in 0..10 {
        let mut message = TmxMessage::new("jobs/ingest");
        message.set_payload_string(format!("job-{}", i));
        broker.publish(&producer, message);
    }

    assert!(wait_until(Duration::from_secs(2), || {
        seen_a.lock().len() + seen_b.lock().len() == 10
    }));
    // One delivery per message across the group, spread over members.
    assert_eq!(seen_a.lock().len() + seen_b.lock().len(), 10);
    assert!(!seen_a.lock().is_empty());
    assert!(!seen_b.lock().is_empty());

    for ctx in [&producer, &a, &b] {
        broker.destroy(ctx);
    }
}

#[test]
fn test_publish_unconnected_reports_not_connected() {
    let registry = BrokerRegistry::standard();
    let ctx = BrokerContext::new("kafka://hub-c:9092", "", Value::Null).unwrap();
    let broker = registry.get_broker(&ctx).unwrap();
    broker.initialize(&ctx);
    broker.publish(&ctx, TmxMessage::new("x/y"));
    assert_eq!(ctx.last_error().unwrap().code, tmx_value::codes::ENOTCONN);
}

#[test]
fn test_disconnect_is_idempotent() {
    let registry = BrokerRegistry::standard();
    let ctx = BrokerContext::new("kafka://hub-d:9092", "", Value::Null).unwrap();
    let broker = registry.get_broker(&ctx).unwrap();
    broker.initialize(&ctx);
    broker.connect(&ctx, &Value::Null);
    assert!(ctx.wait_for_state(BrokerState::Connected, Duration::from_secs(2)));

    broker.disconnect(&ctx);
    assert_eq!(ctx.state(), BrokerState::Disconnected);
    // A second call in disconnected is a successful no-op.
    broker.disconnect(&ctx);
    assert_eq!(ctx.state(), BrokerState::Disconnected);
    assert!(ctx.last_error().is_none());
}

#[test]
fn test_broker_info_reflects_subscriptions() {
    let registry = BrokerRegistry::standard();
    let ctx = BrokerContext::new("kafka://hub-e:9092", "info-ctx", Value::Null).unwrap();
    let broker = registry.get_broker(&ctx).unwrap();
    broker.initialize(&ctx);
    broker.connect(&ctx, &Value::Null);
    assert!(ctx.wait_for_state(BrokerState::Connected, Duration::from_secs(2)));
    let (_, callback) = collector();
    broker.subscribe(&ctx, "V2X/Location", CallbackDescriptor::new("h", callback));

    let info = broker.broker_info(&ctx);
    assert_eq!(info.get("scheme").as_str(), Some("kafka"));
    assert_eq!(info.get("topics").at(0).as_str(), Some("V2X.Location"));
    broker.destroy(&ctx);
}

#[test]
fn test_broker_info_never_starves_publish() {
    let registry = BrokerRegistry::standard();
    let producer = BrokerContext::new("kafka://hub-f:9092", "pf", Value::Null).unwrap();
    let observer = BrokerContext::new("kafka://hub-f:9092", "of", Value::Null).unwrap();
    let broker = registry.get_broker(&producer).unwrap();
    for ctx in [&producer, &observer] {
        broker.initialize(ctx);
        broker.connect(ctx, &Value::Null);
        assert!(ctx.wait_for_state(BrokerState::Connected, Duration::from_secs(2)));
    }

    // Hammer broker_info from one thread while publishing from another;
    // all publishes must complete within the bound.
    let info_broker = registry.get_broker(&observer).unwrap();
    let info_thread = std::thread::spawn(move || {
        for _ in 0..500 {
            let _ = info_broker.broker_info(&observer);
        }
    });
    let started = std::time::Instant::now();
    for i in 0..500 {
        let mut message = TmxMessage::new("load/test");
        message.set_payload_string(format!("{}", i));
        broker.publish(&producer, message);
    }
    assert!(started.elapsed() < Duration::from_secs(5));
    info_thread.join().unwrap();
    broker.destroy(&producer);
}

#[test]
fn test_scheme_lookup() {
    let registry = BrokerRegistry::standard();
    for scheme in [
        "kafka", "tcp", "udp", "tcp-d", "udp-d", "http", "ntrip", "gpsd", "gnss", "nmea",
        "snmpv1", "snmpv2c", "snmpv3", "ntcip",
    ] {
        assert!(
            registry.get_by_scheme(scheme).is_some(),
            "missing broker for {}",
            scheme
        );
    }
    assert!(registry.get_by_scheme("mqtt").is_none());
}
