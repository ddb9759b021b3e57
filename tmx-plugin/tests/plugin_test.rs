use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tmx_message::TmxMessage;
use tmx_plugin::{PluginDescriptor, TmxErrorReport, TmxPlugin, TmxPluginDataUpdate};
use tmx_value::{TmxError, Value};

struct TagA;
struct TagB;
struct Collect;

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

fn json_message(topic: &str, payload: &str) -> TmxMessage {
    let mut message = TmxMessage::new(topic);
    message.encoding = "json".to_string();
    message.set_payload_string(payload);
    message.stamp_now();
    message
}

#[test]
fn test_duplicate_dao_tag_rejected() {
    let plugin = TmxPlugin::new(PluginDescriptor::new("dup-test")).unwrap();
    plugin
        .register_handler::<Value, TagA, _>("V2X/Location", |_, _| Ok(()))
        .unwrap();
    // Same DAO under the same tag for the same topic is a conflict...
    let err = plugin
        .register_handler::<Value, TagA, _>("V2X/Location", |_, _| Ok(()))
        .unwrap_err();
    assert_eq!(err.code, tmx_value::codes::EINVAL);
    // ...but a different tag makes an independent listener.
    plugin
        .register_handler::<Value, TagB, _>("V2X/Location", |_, _| Ok(()))
        .unwrap();
    // And another topic is its own namespace.
    plugin
        .register_handler::<Value, TagA, _>("V2X/RTCM3", |_, _| Ok(()))
        .unwrap();
}

#[test]
fn test_multiple_listeners_same_topic() {
    let plugin = TmxPlugin::new(PluginDescriptor::new("fanout-test")).unwrap();
    let hits: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    let sink = hits.clone();
    plugin
        .register_handler::<Value, TagA, _>("V2X/Location", move |_, _| {
            sink.lock().push("a");
            Ok(())
        })
        .unwrap();
    let sink = hits.clone();
    plugin
        .register_handler::<Value, TagB, _>("V2X/Location", move |_, _| {
            sink.lock().push("b");
            Ok(())
        })
        .unwrap();

    plugin.handle_message(json_message("V2X/Location", r#"{"lat":1}"#));
    assert!(wait_until(Duration::from_secs(2), || hits.lock().len() == 2));
    let mut seen = hits.lock().clone();
    seen.sort();
    assert_eq!(seen, vec!["a", "b"]);
}

#[test]
fn test_delivery_order_within_topic() {
    let plugin = TmxPlugin::new(PluginDescriptor::new("order-test")).unwrap();
    let order: Arc<Mutex<Vec<i64>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = order.clone();
    plugin
        .register_handler::<Value, TagA, _>("seq/in", move |value, _| {
            sink.lock().push(value.get("n").to_int());
            Ok(())
        })
        .unwrap();

    for n in 0..50 {
        plugin.handle_message(json_message("seq/in", &format!(r#"{{"n":{}}}"#, n)));
    }
    assert!(wait_until(Duration::from_secs(2), || order.lock().len() == 50));
    let seen = order.lock().clone();
    assert_eq!(seen, (0..50).collect::<Vec<i64>>());
}

#[test]
fn test_handler_error_broadcast_on_error_topic() {
    let plugin = TmxPlugin::new(PluginDescriptor::new("err-test")).unwrap();
    let errors: Arc<Mutex<Vec<TmxErrorReport>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = errors.clone();
    plugin
        .register_handler::<TmxErrorReport, Collect, _>(
            &plugin.topic("error"),
            move |report, _| {
                sink.lock().push(report);
                Ok(())
            },
        )
        .unwrap();
    plugin
        .register_handler::<Value, TagA, _>("boom/in", |_, _| {
            Err(TmxError::protocol("handler exploded"))
        })
        .unwrap();

    plugin.handle_message(json_message("boom/in", "{}"));
    assert!(wait_until(Duration::from_secs(2), || !errors.lock().is_empty()));
    let report = errors.lock()[0].clone();
    assert_eq!(report.code, tmx_value::codes::EPROTO as i64);
    assert_eq!(report.message, "handler exploded");
    assert_eq!(report.source, "boom/in");
}

#[test]
fn test_dao_conversion_failure_reports_not_supported() {
    let plugin = TmxPlugin::new(PluginDescriptor::new("dao-test")).unwrap();
    let errors: Arc<Mutex<Vec<TmxErrorReport>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = errors.clone();
    plugin
        .register_handler::<TmxErrorReport, Collect, _>(
            &plugin.topic("error"),
            move |report, _| {
                sink.lock().push(report);
                Ok(())
            },
        )
        .unwrap();
    // TmxPluginDataUpdate requires a `key` field the payload lacks.
    plugin
        .register_handler::<TmxPluginDataUpdate, TagA, _>("updates/in", |_, _| Ok(()))
        .unwrap();

    plugin.handle_message(json_message("updates/in", r#"{"unrelated":1}"#));
    assert!(wait_until(Duration::from_secs(2), || !errors.lock().is_empty()));
    assert_eq!(errors.lock()[0].code, tmx_value::codes::ENOTSUP as i64);
}

/// Scenario: a config write broadcasts the old/new pair on the plugin's
/// config topic and the cache read immediately afterwards sees the new
/// value.
#[test]
fn test_config_update_round_trip() {
    let plugin = TmxPlugin::new(PluginDescriptor::new("message-receiver")).unwrap();
    let updates: Arc<Mutex<Vec<(TmxPluginDataUpdate, String)>>> =
        Arc::new(Mutex::new(Vec::new()));
    let sink = updates.clone();
    plugin
        .register_handler::<TmxPluginDataUpdate, Collect, _>(
            "message-receiver/config/status-Hz",
            move |update, message| {
                sink.lock().push((update, message.topic.clone()));
                Ok(())
            },
        )
        .unwrap();

    plugin.set_config("status-Hz", 1i64);
    plugin.set_config("status-Hz", 2.0f64);
    assert_eq!(plugin.get_config("status-Hz"), Value::from(2.0f64));

    assert!(wait_until(Duration::from_secs(2), || updates.lock().len() == 2));
    let (second, topic) = updates.lock()[1].clone();
    assert_eq!(topic, "message-receiver/config/status-Hz");
    assert_eq!(second.key, "status-Hz");
    assert_eq!(second.old_value, Value::from(1i64));
    assert_eq!(second.new_value, Value::from(2.0f64));
}

#[test]
fn test_unchanged_config_value_is_silent() {
    let plugin = TmxPlugin::new(PluginDescriptor::new("quiet-test")).unwrap();
    let updates: Arc<Mutex<Vec<TmxPluginDataUpdate>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = updates.clone();
    plugin
        .register_handler::<TmxPluginDataUpdate, Collect, _>(
            "quiet-test/config/*",
            move |update, _| {
                sink.lock().push(update);
                Ok(())
            },
        )
        .unwrap();

    plugin.set_config("interval", 5i64);
    plugin.set_config("interval", 5i64);
    assert!(wait_until(Duration::from_secs(2), || updates.lock().len() == 1));
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(updates.lock().len(), 1);
}

#[test]
fn test_concurrent_config_writes_on_disjoint_keys() {
    let plugin = TmxPlugin::new(PluginDescriptor::new("race-test")).unwrap();
    let a = plugin.clone();
    let b = plugin.clone();
    let t1 = std::thread::spawn(move || {
        for i in 0..100i64 {
            a.set_config("alpha", i);
        }
    });
    let t2 = std::thread::spawn(move || {
        for i in 0..100i64 {
            b.set_config("beta", i);
        }
    });
    t1.join().unwrap();
    t2.join().unwrap();
    assert_eq!(plugin.get_config("alpha"), Value::from(99i64));
    assert_eq!(plugin.get_config("beta"), Value::from(99i64));
}

#[test]
fn test_status_cache_uses_status_topic() {
    let plugin = TmxPlugin::new(PluginDescriptor::new("status-test")).unwrap();
    let topics: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = topics.clone();
    plugin
        .register_handler::<TmxPluginDataUpdate, Collect, _>(
            "status-test/status/*",
            move |_, message| {
                sink.lock().push(message.topic.clone());
                Ok(())
            },
        )
        .unwrap();

    plugin.set_status("State", "Running");
    assert!(wait_until(Duration::from_secs(2), || !topics.lock().is_empty()));
    assert_eq!(topics.lock()[0], "status-test/status/State");
    assert_eq!(plugin.get_status("State").as_str(), Some("Running"));
}

#[test]
fn test_config_schema_seeding() {
    let plugin = TmxPlugin::new(PluginDescriptor::new("schema-test")).unwrap();
    let schema = {
        let mut entry1 = Value::map();
        entry1.insert("key", "status-Hz");
        entry1.insert("default", 1i64);
        entry1.insert("description", "status publish rate");
        let mut entry2 = Value::map();
        entry2.insert("key", "route-dsrc");
        entry2.insert("default", false);
        Value::Array(vec![entry1, entry2])
    };
    plugin.load_config_schema(&schema);
    assert_eq!(plugin.get_config("status-Hz"), Value::from(1i64));
    assert_eq!(plugin.get_config("route-dsrc"), Value::Bool(false));
    assert!(plugin.get_config("absent").is_null());
}

#[test]
fn test_init_wires_default_handlers() {
    let plugin = TmxPlugin::new(PluginDescriptor::new("init-test")).unwrap();
    plugin.init().unwrap();
    // A second init collides with the already-registered defaults.
    assert!(plugin.init().is_err());
    // Errors flow through the default error handler without feedback.
    plugin.report_error(TmxError::protocol("one-off"), "somewhere");
}

#[test]
fn test_lifecycle_stop_ends_main() {
    let plugin = TmxPlugin::new(PluginDescriptor::new("life-test")).unwrap();
    plugin.init().unwrap();
    plugin.start().unwrap();
    assert!(plugin.is_running());
    let runner = {
        let plugin = plugin.clone();
        std::thread::spawn(move || plugin.main())
    };
    std::thread::sleep(Duration::from_millis(100));
    plugin.stop();
    assert!(!plugin.is_running());
    runner.join().unwrap().unwrap();
}
