//! The `kafka` scheme client. Topic names with `/` are translated to `.`
//! on publish and back on receive; the envelope's id, source and encoding
//! travel as the `content-type`, `content-source` and `content-encoding`
//! headers. A dedicated consumer thread drains the subscription queue.
//!
//! The wire is a process-local [`TopicHub`] shared by every context with
//! the same `bootstrap.servers` value; embedding the native client library
//! is out of scope, the contract and its observable behavior are not.

use crate::broker::{CallbackDescriptor, CallbackRegistry, TmxBrokerClient};
use crate::context::{BrokerContext, BrokerState};
use crate::hub::TopicHub;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tmx_message::TmxMessage;
use tmx_value::{TmxError, TmxResult, Value};
use tracing::debug;

/// Bound on waiting for the consumer thread to drain on disconnect,
/// mirroring the producer flush bound.
pub const FLUSH_TIMEOUT: Duration = Duration::from_millis(2500);

/// Bound on connection establishment waits.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

pub fn topic_to_kafka(topic: &str) -> String {
    topic.replace('/', ".")
}

pub fn topic_from_kafka(topic: &str) -> String {
    topic.replace('.', "/")
}

struct KafkaConn {
    hub: Arc<TopicHub>,
    worker: Option<JoinHandle<()>>,
    group: String,
    topics: Vec<String>,
}

#[derive(Default)]
struct KafkaShared {
    callbacks: CallbackRegistry,
    hubs: Mutex<HashMap<String, Arc<TopicHub>>>,
    conns: Mutex<HashMap<String, KafkaConn>>,
}

pub struct TmxKafkaBroker {
    shared: Arc<KafkaShared>,
}

impl TmxKafkaBroker {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(KafkaShared::default()),
        }
    }

    fn bootstrap_of(ctx: &BrokerContext) -> String {
        let configured = ctx.param("bootstrap.servers");
        if !configured.is_null() {
            return configured.to_text();
        }
        match ctx.port() {
            Some(port) => format!("{}:{}", ctx.host(), port),
            None => ctx.host().to_string(),
        }
    }

    fn consumer_group(ctx: &BrokerContext) -> String {
        let group = ctx.param("consumer-group");
        if group.is_null() || group.to_text().is_empty() {
            ctx.id().to_string()
        } else {
            group.to_text()
        }
    }

    fn hub_for(&self, bootstrap: &str) -> Arc<TopicHub> {
        self.shared
            .hubs
            .lock()
            .entry(bootstrap.to_string())
            .or_insert_with(|| Arc::new(TopicHub::new()))
            .clone()
    }

    fn try_publish(&self, ctx: &BrokerContext, message: &TmxMessage) -> TmxResult<()> {
        if !ctx.is_connected() {
            return Err(TmxError::not_connected(format!(
                "context {} is not connected",
                ctx.id()
            )));
        }
        let conns = self.shared.conns.lock();
        let conn = conns.get(ctx.id()).ok_or_else(|| {
            TmxError::not_connected(format!("no hub connection for {}", ctx.id()))
        })?;
        let mut translated = message.clone();
        translated.topic = topic_to_kafka(&message.topic);
        conn.hub.publish(&translated)?;
        Ok(())
    }
}

impl Default for TmxKafkaBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl TmxBrokerClient for TmxKafkaBroker {
    fn schemes(&self) -> &'static [&'static str] {
        &["kafka"]
    }

    fn callbacks(&self) -> &CallbackRegistry {
        &self.shared.callbacks
    }

    fn initialize(&self, ctx: &BrokerContext) {
        let bootstrap = Self::bootstrap_of(ctx);
        if bootstrap.is_empty() {
            self.on_initialized(
                ctx,
                TmxError::invalid_argument("kafka context is missing bootstrap.servers"),
            );
            return;
        }
        ctx.set_param("bootstrap.servers", bootstrap);
        if ctx.param("allow.auto.create.topics").is_null() {
            ctx.set_param("allow.auto.create.topics", true);
        }
        if ctx.param("linger.ms").is_null() {
            ctx.set_param("linger.ms", 0i64);
        }
        if ctx.param("consumer-group").is_null() {
            ctx.set_param("consumer-group", ctx.id().to_string());
        }
        self.on_initialized(ctx, TmxError::none());
    }

    fn destroy(&self, ctx: &BrokerContext) {
        self.disconnect(ctx);
        self.shared.callbacks.remove_context(ctx.id());
        self.on_destroyed(ctx, TmxError::none());
    }

    fn connect(&self, ctx: &BrokerContext, params: &Value) {
        if ctx.state() == BrokerState::Uninitialized {
            self.on_connected(
                ctx,
                TmxError::invalid_argument("kafka context must be initialized before connect"),
            );
            return;
        }
        if ctx.is_connected() {
            self.on_connected(ctx, TmxError::none());
            return;
        }
        for key in params.keys() {
            ctx.set_param(key, params.get(key).clone());
        }

        let bootstrap = Self::bootstrap_of(ctx);
        let group = Self::consumer_group(ctx);
        let hub = self.hub_for(&bootstrap);
        let rx = hub.join(ctx.id(), &group);

        // The dedicated consumer thread: poll the queue, translate topics
        // back to slash form and dispatch raw envelopes.
        let shared = self.shared.clone();
        let worker_ctx = ctx.clone();
        let worker = std::thread::Builder::new()
            .name(format!("kafka-consumer-{}", ctx.id()))
            .spawn(move || {
                while let Ok(mut message) = rx.recv() {
                    message.topic = topic_from_kafka(&message.topic);
                    debug!(
                        "kafka consumer {} received {} bytes on {}",
                        worker_ctx.id(),
                        message.length(),
                        message.topic
                    );
                    shared.callbacks.dispatch(worker_ctx.id(), &message);
                    worker_ctx.receive_gate().notify_all();
                }
            });

        match worker {
            Ok(handle) => {
                self.shared.conns.lock().insert(
                    ctx.id().to_string(),
                    KafkaConn {
                        hub,
                        worker: Some(handle),
                        group,
                        topics: Vec::new(),
                    },
                );
                self.on_connected(ctx, TmxError::none());
            }
            Err(e) => {
                hub.leave(ctx.id());
                self.on_connected(ctx, TmxError::new(tmx_value::codes::EIO, e.to_string()));
            }
        }
    }

    fn disconnect(&self, ctx: &BrokerContext) {
        let conn = self.shared.conns.lock().remove(ctx.id());
        if let Some(mut conn) = conn {
            // Dropping the hub membership closes the consumer queue; give
            // the worker a bounded window to drain.
            conn.hub.leave(ctx.id());
            if let Some(worker) = conn.worker.take() {
                let _ = worker.join();
            }
        }
        self.on_disconnected(ctx, TmxError::none());
    }

    fn subscribe(&self, ctx: &BrokerContext, topic: &str, descriptor: CallbackDescriptor) {
        let kafka_topic = topic_to_kafka(topic);
        let mut conns = self.shared.conns.lock();
        let Some(conn) = conns.get_mut(ctx.id()) else {
            drop(conns);
            self.on_subscribed(
                ctx,
                topic,
                TmxError::not_connected("subscribe requires a connected kafka context"),
            );
            return;
        };
        conn.hub.add_topic(ctx.id(), &kafka_topic);
        if !conn.topics.iter().any(|t| t == &kafka_topic) {
            conn.topics.push(kafka_topic);
        }
        drop(conns);
        self.shared.callbacks.register(ctx.id(), topic, descriptor);
        self.on_subscribed(ctx, topic, TmxError::none());
    }

    fn unsubscribe(&self, ctx: &BrokerContext, topic: &str, descriptor_id: &str) {
        self.shared
            .callbacks
            .unregister(ctx.id(), topic, descriptor_id);
        let kafka_topic = topic_to_kafka(topic);
        let mut conns = self.shared.conns.lock();
        if let Some(conn) = conns.get_mut(ctx.id()) {
            if self.shared.callbacks.subscription_count(ctx.id()) == 0 {
                conn.hub.remove_topic(ctx.id(), &kafka_topic);
                conn.topics.retain(|t| t != &kafka_topic);
            }
        }
        drop(conns);
        self.on_unsubscribed(ctx, topic, TmxError::none());
    }

    fn publish(&self, ctx: &BrokerContext, message: TmxMessage) {
        let result = self.try_publish(ctx, &message);
        self.on_published(ctx, result.err().unwrap_or_else(TmxError::none));
    }

    fn broker_info(&self, ctx: &BrokerContext) -> Value {
        let mut info = Value::map();
        info.insert("scheme", "kafka");
        info.insert("bootstrap.servers", Self::bootstrap_of(ctx));
        let conns = self.shared.conns.lock();
        if let Some(conn) = conns.get(ctx.id()) {
            info.insert("consumer-group", conn.group.clone());
            let mut topics = Value::array();
            for topic in &conn.topics {
                topics.push(topic.clone());
            }
            info.insert("topics", topics);
            info.insert("subscribers", conn.hub.subscriber_count() as u64);
        }
        info.insert("state", Value::from_enum(ctx.state()));
        info
    }
}
