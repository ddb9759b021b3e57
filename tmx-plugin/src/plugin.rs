//! The plugin host: configuration and status caches, handler registration
//! under (topic, DAO, tag) keys, decode-and-dispatch of inbound envelopes,
//! and broadcast to every bound channel plus in-process listeners.

use crate::dao::{TmxErrorReport, TmxPluginDataUpdate};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tmx_broker::{topic_matches, BrokerRegistry, TmxChannel, TmxExecutor};
use tmx_message::{CodecRegistry, TmxMessage};
use tmx_value::registry::TmxTypeDescriptor;
use tmx_value::{
    codes, full_type_name, short_type_name, TmxError, TmxResult, TypeRegistry, Value,
};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// Tag types for the default handlers wired by `init`.
pub struct OnConfigUpdate;
pub struct OnStatusUpdate;
pub struct OnError;

#[derive(Debug, Clone)]
pub struct PluginDescriptor {
    pub name: String,
    pub version: String,
    pub description: String,
}

impl PluginDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: String::new(),
            description: String::new(),
        }
    }
}

type DispatchItem = (Value, TmxMessage, Vec<TmxTypeDescriptor>);

struct PluginInner {
    descriptor: PluginDescriptor,
    registry: TypeRegistry,
    codecs: CodecRegistry,
    brokers: Arc<BrokerRegistry>,
    executor: Arc<TmxExecutor>,
    channels: RwLock<Vec<Arc<TmxChannel>>>,
    config: Mutex<Value>,
    status: Mutex<Value>,
    handler_topics: RwLock<Vec<String>>,
    dispatch_queues: Mutex<HashMap<String, mpsc::UnboundedSender<DispatchItem>>>,
    running: AtomicBool,
}

/// The host for one plugin. Cloning shares the underlying state; handlers
/// reach back through a weak handle so a stopped plugin tears down
/// cleanly.
#[derive(Clone)]
pub struct TmxPlugin {
    inner: Arc<PluginInner>,
}

/// A non-owning handle for handler closures; holding the plugin strongly
/// from inside its own registry would cycle and leak.
#[derive(Clone)]
pub struct WeakPlugin {
    inner: Weak<PluginInner>,
}

impl WeakPlugin {
    pub fn upgrade(&self) -> Option<TmxPlugin> {
        self.inner.upgrade().map(|inner| TmxPlugin { inner })
    }
}

impl TmxPlugin {
    pub fn new(descriptor: PluginDescriptor) -> TmxResult<Self> {
        Self::with_brokers(descriptor, BrokerRegistry::standard())
    }

    pub fn with_brokers(
        descriptor: PluginDescriptor,
        brokers: Arc<BrokerRegistry>,
    ) -> TmxResult<Self> {
        let registry = TypeRegistry::new(&descriptor.name)?;
        let executor = TmxExecutor::shared(&descriptor.name)?;
        Ok(Self {
            inner: Arc::new(PluginInner {
                descriptor,
                registry,
                codecs: CodecRegistry::standard(),
                brokers,
                executor,
                channels: RwLock::new(Vec::new()),
                config: Mutex::new(Value::map()),
                status: Mutex::new(Value::map()),
                handler_topics: RwLock::new(Vec::new()),
                dispatch_queues: Mutex::new(HashMap::new()),
                running: AtomicBool::new(false),
            }),
        })
    }

    pub fn descriptor(&self) -> &PluginDescriptor {
        &self.inner.descriptor
    }

    pub fn downgrade(&self) -> WeakPlugin {
        WeakPlugin {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.inner.registry
    }

    pub fn codecs(&self) -> &CodecRegistry {
        &self.inner.codecs
    }

    pub fn brokers(&self) -> &Arc<BrokerRegistry> {
        &self.inner.brokers
    }

    pub fn executor(&self) -> &Arc<TmxExecutor> {
        &self.inner.executor
    }

    /// A topic under this plugin's namespace, for config/status/error
    /// traffic specific to the plugin rather than the data.
    pub fn topic(&self, name: &str) -> String {
        format!("{}/{}", self.inner.descriptor.name, name)
    }

    /// Bind a new channel. The context inherits the plugin executor and
    /// forwards its broker errors to `<plugin>/error`.
    pub fn add_channel(&self, url: &str, id: &str, defaults: Value) -> TmxResult<Arc<TmxChannel>> {
        let channel = Arc::new(TmxChannel::new(
            self.inner.brokers.clone(),
            url,
            id,
            defaults,
        )?);
        channel.context().set_executor(self.inner.executor.clone());

        let weak = Arc::downgrade(&self.inner);
        channel.context().set_error_callback(Arc::new(move |ctx, err| {
            if let Some(inner) = weak.upgrade() {
                let plugin = TmxPlugin { inner };
                plugin.report_error(err.clone(), ctx.id());
            }
        }));

        self.inner.channels.write().push(channel.clone());
        Ok(channel)
    }

    pub fn channels(&self) -> Vec<Arc<TmxChannel>> {
        self.inner.channels.read().clone()
    }

    pub fn get_channel(&self, ctx_id: &str) -> Option<Arc<TmxChannel>> {
        self.inner
            .channels
            .read()
            .iter()
            .find(|c| c.context().id() == ctx_id)
            .cloned()
    }

    /// Register a handler for a DAO type under a tag. The (DAO, tag) pair
    /// must be unique for the topic, which is what lets several
    /// independent listeners share the generic `Value` DAO.
    pub fn register_handler<D, T, F>(&self, topic: &str, handler: F) -> TmxResult<()>
    where
        D: TryFrom<Value> + Send + Sync + 'static,
        T: 'static,
        F: Fn(D, &TmxMessage) -> TmxResult<()> + Send + Sync + 'static,
    {
        let name = format!(
            "{}|handle|{}",
            full_type_name::<T>(),
            short_type_name::<D>()
        );
        let namespace = self.inner.registry.child(topic)?;
        if namespace.get(&name).is_some() {
            return Err(TmxError::invalid_argument(format!(
                "a {} handler is already registered for topic {:?}",
                short_type_name::<D>(),
                topic
            )));
        }
        namespace.register_handler::<(Value, TmxMessage)>(
            move |(value, message)| {
                let dao = D::try_from(value.clone()).map_err(|_| {
                    TmxError::not_supported(format!(
                        "payload is not convertible to {}",
                        short_type_name::<D>()
                    ))
                })?;
                handler(dao, message)?;
                Ok(Value::Null)
            },
            &name,
        )?;

        let mut topics = self.inner.handler_topics.write();
        if !topics.iter().any(|t| t == topic) {
            topics.push(topic.to_string());
        }
        Ok(())
    }

    pub fn unregister_handler<D, T>(&self, topic: &str) -> TmxResult<()>
    where
        D: 'static,
        T: 'static,
    {
        let name = format!(
            "{}|handle|{}",
            full_type_name::<T>(),
            short_type_name::<D>()
        );
        self.inner.registry.child(topic)?.unregister(&name)
    }

    /// Deliver an inbound envelope: look up the codec for its encoding,
    /// decode the payload, then invoke every matching handler through the
    /// executor. Handler errors are converted and broadcast on
    /// `<plugin>/error`, never propagated.
    pub fn handle_message(&self, message: TmxMessage) {
        let patterns: Vec<String> = {
            let topics = self.inner.handler_topics.read();
            topics
                .iter()
                .filter(|pattern| topic_matches(pattern, &message.topic))
                .cloned()
                .collect()
        };
        let mut descriptors = Vec::new();
        for pattern in patterns {
            if let Ok(namespace) = self.inner.registry.child(&pattern) {
                descriptors.extend(namespace.get_all(None));
            }
        }
        if descriptors.is_empty() {
            return;
        }

        let value = match self.inner.codecs.decode_message(&message) {
            Ok(value) => value,
            Err(e) => {
                warn!(
                    "plugin {} cannot decode {} payload on {}: {}",
                    self.inner.descriptor.name, message.encoding, message.topic, e
                );
                self.report_error(e, &message.topic);
                return;
            }
        };
        let queue = self.dispatch_queue(&message.topic);
        let _ = queue.send((value, message, descriptors));
    }

    /// One ordered queue per topic: delivery order within a topic matches
    /// arrival order, while distinct topics dispatch concurrently.
    fn dispatch_queue(&self, topic: &str) -> mpsc::UnboundedSender<DispatchItem> {
        let mut queues = self.inner.dispatch_queues.lock();
        queues
            .entry(topic.to_string())
            .or_insert_with(|| {
                let (tx, mut rx) = mpsc::unbounded_channel::<DispatchItem>();
                let weak = Arc::downgrade(&self.inner);
                self.inner.executor.spawn(async move {
                    while let Some((value, message, descriptors)) = rx.recv().await {
                        for descriptor in descriptors {
                            let argument = (value.clone(), message.clone());
                            let result = TypeRegistry::dispatch::<(Value, TmxMessage)>(
                                &descriptor,
                                &argument,
                            );
                            if let Err(e) = result {
                                if e.code == codes::ECANCELED {
                                    continue;
                                }
                                if let Some(inner) = weak.upgrade() {
                                    TmxPlugin { inner }.report_error(e, &message.topic);
                                }
                            }
                        }
                    }
                });
                tx
            })
            .clone()
    }

    /// Convert to the wire error shape and broadcast on `<plugin>/error`.
    pub fn report_error(&self, error: TmxError, source: &str) {
        error!(
            "plugin {} error from {}: {}",
            self.inner.descriptor.name, source, error
        );
        let report = TmxErrorReport {
            code: error.code as i64,
            message: error.message,
            source: source.to_string(),
        };
        let topic = self.topic("error");
        if source == topic {
            // A failing error handler must not feed back into itself.
            return;
        }
        let _ = self.broadcast(&report.to_value(), &topic, &self.inner.descriptor.name, "json");
    }

    /// Encode with the named (or default) codec, stamp the timestamp, and
    /// forward to every channel that allows the topic plus the in-process
    /// handlers, enabling loopback without a broker round trip.
    pub fn broadcast(
        &self,
        value: &Value,
        topic: &str,
        source: &str,
        encoding: &str,
    ) -> TmxResult<()> {
        let encoding = if encoding.is_empty() {
            tmx_message::names::JSON
        } else {
            encoding
        };
        let mut message = TmxMessage::new(topic);
        message.source = source.to_string();
        message.encoding = encoding.to_string();
        message.payload = self.inner.codecs.encode(encoding, value)?;
        message.stamp_now();
        self.broadcast_message(message);
        Ok(())
    }

    /// Forward an already-encoded envelope.
    pub fn broadcast_message(&self, message: TmxMessage) {
        for channel in self.inner.channels.read().iter() {
            if channel.accepts_topic(&message.topic) && channel.context().is_connected() {
                if let Err(e) = channel.write_message(message.clone()) {
                    warn!(
                        "plugin {} failed to forward {} to channel {}: {}",
                        self.inner.descriptor.name,
                        message.topic,
                        channel.context().id(),
                        e
                    );
                }
            }
        }
        self.handle_message(message);
    }

    /// Seed the config cache from a declared schema: an array of
    /// `{key, default, description}` objects. No updates are broadcast.
    pub fn load_config_schema(&self, schema: &Value) {
        let mut config = self.inner.config.lock();
        for entry in schema.items() {
            let key = entry.get("key");
            if !key.is_null() {
                config.insert(key.to_text(), entry.get("default").clone());
            }
        }
    }

    pub fn get_config(&self, key: &str) -> Value {
        self.inner.config.lock().get(key).clone()
    }

    pub fn config_snapshot(&self) -> Value {
        self.inner.config.lock().clone()
    }

    /// Store a config value; when it changes, broadcast the update on
    /// `<plugin>/config/<key>` strictly after the cache write.
    pub fn set_config(&self, key: &str, value: impl Into<Value>) {
        self.set_cached(key, value.into(), true);
    }

    pub fn get_status(&self, key: &str) -> Value {
        self.inner.status.lock().get(key).clone()
    }

    pub fn set_status(&self, key: &str, value: impl Into<Value>) {
        self.set_cached(key, value.into(), false);
    }

    fn set_cached(&self, key: &str, value: Value, config: bool) {
        let cache = if config {
            &self.inner.config
        } else {
            &self.inner.status
        };
        let old_value = {
            let mut cache = cache.lock();
            let old = cache.get(key).clone();
            if old == value {
                return;
            }
            cache.insert(key, value.clone());
            old
        };
        let kind = if config { "config" } else { "status" };
        let update = TmxPluginDataUpdate {
            key: key.to_string(),
            old_value,
            new_value: value,
        };
        let topic = self.topic(&format!("{}/{}", kind, key));
        if let Err(e) =
            self.broadcast(&update.to_value(), &topic, &self.inner.descriptor.name, "json")
        {
            warn!(
                "plugin {} failed to broadcast {} update for {}: {}",
                self.inner.descriptor.name, kind, key, e
            );
        }
    }

    /// Wire the default handlers: config updates, status updates and the
    /// error logger.
    pub fn init(&self) -> TmxResult<()> {
        let name = self.inner.descriptor.name.clone();
        self.register_handler::<TmxPluginDataUpdate, OnConfigUpdate, _>(
            &self.topic("config/*"),
            move |update, _| {
                debug!("config {} changed to {}", update.key, update.new_value);
                Ok(())
            },
        )?;
        self.register_handler::<TmxPluginDataUpdate, OnStatusUpdate, _>(
            &self.topic("status/*"),
            move |update, _| {
                debug!("status {} changed to {}", update.key, update.new_value);
                Ok(())
            },
        )?;
        self.register_handler::<TmxErrorReport, OnError, _>(
            &self.topic("error"),
            move |report, _| {
                error!("[{}] error {}: {}", name, report.code, report.message);
                Ok(())
            },
        )?;
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Initialize and connect every channel, then subscribe them to the
    /// registered handler topics so inbound traffic reaches
    /// `handle_message`.
    pub fn start(&self) -> TmxResult<()> {
        self.inner.running.store(true, Ordering::SeqCst);
        let topics = self.inner.handler_topics.read().clone();
        for channel in self.inner.channels.read().iter() {
            channel.initialize()?;
            // An initialization failure is fatal for the plugin, unlike
            // the recoverable connect/disconnect cycle.
            if channel.context().state() == tmx_broker::BrokerState::Uninitialized {
                self.inner.running.store(false, Ordering::SeqCst);
                return Err(channel.context().last_error().unwrap_or_else(|| {
                    TmxError::invalid_argument(format!(
                        "channel {} failed to initialize",
                        channel.context().id()
                    ))
                }));
            }
            channel.connect(&Value::Null)?;
            for topic in &topics {
                let weak = Arc::downgrade(&self.inner);
                channel.subscribe(
                    topic,
                    "plugin-dispatch",
                    Arc::new(move |message| {
                        if let Some(inner) = weak.upgrade() {
                            TmxPlugin { inner }.handle_message(message);
                        }
                    }),
                )?;
            }
        }
        Ok(())
    }

    /// Run until `stop` is called. Plugins with their own loop bodies run
    /// them in place of this.
    pub fn main(&self) -> TmxResult<()> {
        while self.is_running() {
            std::thread::sleep(Duration::from_millis(50));
        }
        Ok(())
    }

    pub fn execute(&self) -> TmxResult<()> {
        self.init()?;
        self.start()?;
        self.main()
    }

    /// Disconnect every channel, destroy the broker contexts and let the
    /// dispatch workers drain.
    pub fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        for channel in self.inner.channels.read().iter() {
            if let Err(e) = channel.disconnect() {
                warn!("channel {} disconnect failed: {}", channel.context().id(), e);
            }
            if let Err(e) = channel.destroy() {
                warn!("channel {} destroy failed: {}", channel.context().id(), e);
            }
        }
        // Dropping the queue senders ends each per-topic worker once its
        // backlog is drained.
        self.inner.dispatch_queues.lock().clear();
    }
}
