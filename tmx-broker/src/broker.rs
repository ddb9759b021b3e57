//! The broker client contract and the per-scheme lookup.
//!
//! Every operation is non-throwing: failures surface through the matching
//! completion notification, which updates the context state machine and
//! wakes anything waiting on the context's condition variables.

use crate::context::{BrokerContext, BrokerState};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tmx_message::TmxMessage;
use tmx_value::{TmxError, Value};
use tracing::{debug, warn};

pub type MessageCallback = Arc<dyn Fn(TmxMessage) + Send + Sync>;

/// A registered message handler: the id stands in for the handler's type
/// identity and keys unsubscription.
#[derive(Clone)]
pub struct CallbackDescriptor {
    pub id: String,
    pub callback: MessageCallback,
}

impl CallbackDescriptor {
    pub fn new(id: impl Into<String>, callback: MessageCallback) -> Self {
        Self {
            id: id.into(),
            callback,
        }
    }
}

/// Does a subscription pattern accept a concrete topic? Exact matches do;
/// a trailing `*` segment accepts any suffix; the empty pattern accepts
/// everything.
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    if pattern.is_empty() || pattern == topic {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix('*') {
        return topic.starts_with(prefix.trim_end_matches('/'));
    }
    false
}

/// Handler lists per (context id, topic pattern), shared by every broker.
/// Raw envelopes are delivered here; payload decode happens later in the
/// plugin layer.
#[derive(Default)]
pub struct CallbackRegistry {
    entries: RwLock<HashMap<String, Vec<(String, CallbackDescriptor)>>>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, ctx_id: &str, pattern: &str, descriptor: CallbackDescriptor) {
        self.entries
            .write()
            .entry(ctx_id.to_string())
            .or_default()
            .push((pattern.to_string(), descriptor));
    }

    pub fn unregister(&self, ctx_id: &str, pattern: &str, descriptor_id: &str) {
        if let Some(list) = self.entries.write().get_mut(ctx_id) {
            list.retain(|(p, d)| !(p == pattern && d.id == descriptor_id));
        }
    }

    pub fn remove_context(&self, ctx_id: &str) {
        self.entries.write().remove(ctx_id);
    }

    /// Deliver an envelope to every matching handler for the context.
    /// Within a single (context, topic) pair the invocation order is the
    /// registration order; no lock is held across a handler call.
    pub fn dispatch(&self, ctx_id: &str, message: &TmxMessage) {
        let matching: Vec<CallbackDescriptor> = {
            let entries = self.entries.read();
            match entries.get(ctx_id) {
                Some(list) => list
                    .iter()
                    .filter(|(pattern, _)| topic_matches(pattern, &message.topic))
                    .map(|(_, d)| d.clone())
                    .collect(),
                None => Vec::new(),
            }
        };
        for descriptor in matching {
            (descriptor.callback)(message.clone());
        }
    }

    pub fn subscription_count(&self, ctx_id: &str) -> usize {
        self.entries
            .read()
            .get(ctx_id)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

/// The uniform lifecycle every wire-protocol client implements. The
/// `on_*` completion notifications have defaults that drive the state
/// machine, record the error on the context and wake waiters; clients
/// override them only to add protocol-specific work.
pub trait TmxBrokerClient: Send + Sync {
    /// The URL schemes this client self-registers under.
    fn schemes(&self) -> &'static [&'static str];

    fn initialize(&self, ctx: &BrokerContext);

    fn destroy(&self, ctx: &BrokerContext);

    fn connect(&self, ctx: &BrokerContext, params: &Value);

    fn disconnect(&self, ctx: &BrokerContext);

    fn subscribe(&self, ctx: &BrokerContext, topic: &str, descriptor: CallbackDescriptor);

    fn unsubscribe(&self, ctx: &BrokerContext, topic: &str, descriptor_id: &str);

    fn publish(&self, ctx: &BrokerContext, message: TmxMessage);

    fn broker_info(&self, ctx: &BrokerContext) -> Value;

    fn is_connected(&self, ctx: &BrokerContext) -> bool {
        ctx.is_connected()
    }

    fn callbacks(&self) -> &CallbackRegistry;

    fn on_initialized(&self, ctx: &BrokerContext, error: TmxError) {
        if error.is_ok() {
            debug!("context {} initialized", ctx.id());
            ctx.set_state(BrokerState::Initialized);
        } else {
            warn!("context {} failed to initialize: {}", ctx.id(), error);
            ctx.set_state(BrokerState::Uninitialized);
        }
        ctx.post_error(error);
    }

    fn on_connected(&self, ctx: &BrokerContext, error: TmxError) {
        if error.is_ok() {
            debug!("context {} connected", ctx.id());
            ctx.set_state(BrokerState::Connected);
        } else {
            warn!("context {} failed to connect: {}", ctx.id(), error);
            // A context that was never initialized stays that way; the
            // connected/disconnected pair only exists past initialize.
            if ctx.state() != BrokerState::Uninitialized {
                ctx.set_state(BrokerState::Disconnected);
            }
        }
        ctx.post_error(error);
    }

    fn on_disconnected(&self, ctx: &BrokerContext, error: TmxError) {
        debug!("context {} disconnected", ctx.id());
        ctx.set_state(BrokerState::Disconnected);
        ctx.post_error(error);
    }

    fn on_destroyed(&self, ctx: &BrokerContext, error: TmxError) {
        debug!("context {} destroyed", ctx.id());
        ctx.set_state(BrokerState::Uninitialized);
        ctx.post_error(error);
    }

    fn on_subscribed(&self, ctx: &BrokerContext, topic: &str, error: TmxError) {
        if error.is_ok() {
            debug!("context {} subscribed to {}", ctx.id(), topic);
            ctx.set_state(BrokerState::Registered);
        } else {
            warn!(
                "context {} failed to subscribe to {}: {}",
                ctx.id(),
                topic,
                error
            );
        }
        ctx.post_error(error);
    }

    fn on_unsubscribed(&self, ctx: &BrokerContext, topic: &str, error: TmxError) {
        debug!("context {} unsubscribed from {}", ctx.id(), topic);
        ctx.post_error(error);
    }

    fn on_published(&self, ctx: &BrokerContext, error: TmxError) {
        if !error.is_ok() {
            warn!("context {} publish failed: {}", ctx.id(), error);
        }
        ctx.post_error(error);
        ctx.publish_gate().notify_all();
    }

    fn on_error(&self, ctx: &BrokerContext, error: TmxError) {
        warn!("context {} error: {}", ctx.id(), error);
        ctx.post_error(error);
    }

    /// Deliver an inbound envelope to the handlers registered for this
    /// context, waking receive waiters afterwards.
    fn on_message(&self, ctx: &BrokerContext, message: TmxMessage) {
        self.callbacks().dispatch(ctx.id(), &message);
        ctx.receive_gate().notify_all();
    }
}

/// Per-scheme broker lookup. Clients self-register the schemes they
/// serve; `get_broker` selects by the context's scheme.
pub struct BrokerRegistry {
    clients: RwLock<HashMap<String, Arc<dyn TmxBrokerClient>>>,
}

impl BrokerRegistry {
    pub fn new() -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// A registry with every built-in wire client installed.
    pub fn standard() -> Arc<Self> {
        let registry = Self::new();
        registry.register(Arc::new(crate::kafka::TmxKafkaBroker::new()));
        registry.register(Arc::new(crate::socket::AsyncSocketBridge::new()));
        registry.register(Arc::new(crate::http::HttpBrokerClient::new()));
        registry.register(Arc::new(crate::gpsd::GpsdBrokerClient::new()));
        registry.register(Arc::new(crate::snmp::NetSnmpBrokerClient::new()));
        Arc::new(registry)
    }

    pub fn register(&self, client: Arc<dyn TmxBrokerClient>) {
        let mut clients = self.clients.write();
        for scheme in client.schemes() {
            clients.insert(scheme.to_string(), client.clone());
        }
    }

    pub fn get_broker(&self, ctx: &BrokerContext) -> Option<Arc<dyn TmxBrokerClient>> {
        self.get_by_scheme(ctx.scheme())
    }

    pub fn get_by_scheme(&self, scheme: &str) -> Option<Arc<dyn TmxBrokerClient>> {
        self.clients.read().get(scheme).cloned()
    }

    pub fn schemes(&self) -> Vec<String> {
        let mut schemes: Vec<String> = self.clients.read().keys().cloned().collect();
        schemes.sort();
        schemes
    }
}

impl Default for BrokerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
