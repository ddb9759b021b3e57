//! A channel is a live binding between a plugin and one broker context:
//! it records which topics are subscribed with which handlers and mediates
//! outbound writes so payload encoding goes through the codec registry
//! with the channel's preferred encoding.

use crate::broker::{BrokerRegistry, CallbackDescriptor, MessageCallback, TmxBrokerClient};
use crate::context::BrokerContext;
use parking_lot::Mutex;
use std::sync::Arc;
use tmx_message::{CodecRegistry, TmxMessage};
use tmx_value::{TmxError, TmxResult, Value};

pub struct TmxChannel {
    context: BrokerContext,
    registry: Arc<BrokerRegistry>,
    default_encoding: String,
    subscriptions: Mutex<Vec<(String, String)>>,
}

impl TmxChannel {
    /// Bind a new context for the URL. The `encoding` parameter selects
    /// the channel's preferred payload encoding; `topics` (an array of
    /// patterns) restricts which broadcast topics this channel forwards.
    pub fn new(
        registry: Arc<BrokerRegistry>,
        url: &str,
        id: &str,
        defaults: Value,
    ) -> TmxResult<Self> {
        let context = BrokerContext::new(url, id, defaults)?;
        let encoding = {
            let v = context.param("encoding");
            if v.is_null() {
                tmx_message::names::JSON.to_string()
            } else {
                v.to_text()
            }
        };
        Ok(Self {
            context,
            registry,
            default_encoding: encoding,
            subscriptions: Mutex::new(Vec::new()),
        })
    }

    pub fn context(&self) -> &BrokerContext {
        &self.context
    }

    pub fn default_encoding(&self) -> &str {
        &self.default_encoding
    }

    pub fn broker(&self) -> TmxResult<Arc<dyn TmxBrokerClient>> {
        self.registry.get_broker(&self.context).ok_or_else(|| {
            TmxError::not_supported(format!(
                "no broker registered for scheme {:?}",
                self.context.scheme()
            ))
        })
    }

    pub fn initialize(&self) -> TmxResult<()> {
        self.broker()?.initialize(&self.context);
        Ok(())
    }

    pub fn connect(&self, params: &Value) -> TmxResult<()> {
        self.broker()?.connect(&self.context, params);
        Ok(())
    }

    pub fn disconnect(&self) -> TmxResult<()> {
        self.broker()?.disconnect(&self.context);
        Ok(())
    }

    pub fn destroy(&self) -> TmxResult<()> {
        self.subscriptions.lock().clear();
        self.broker()?.destroy(&self.context);
        Ok(())
    }

    /// Subscribe a handler and record the (topic, handler) pair for later
    /// teardown.
    pub fn subscribe(
        &self,
        topic: &str,
        descriptor_id: &str,
        callback: MessageCallback,
    ) -> TmxResult<()> {
        let broker = self.broker()?;
        broker.subscribe(
            &self.context,
            topic,
            CallbackDescriptor::new(descriptor_id, callback),
        );
        self.subscriptions
            .lock()
            .push((topic.to_string(), descriptor_id.to_string()));
        Ok(())
    }

    pub fn unsubscribe(&self, topic: &str, descriptor_id: &str) -> TmxResult<()> {
        let broker = self.broker()?;
        broker.unsubscribe(&self.context, topic, descriptor_id);
        self.subscriptions
            .lock()
            .retain(|(t, d)| !(t == topic && d == descriptor_id));
        Ok(())
    }

    pub fn subscriptions(&self) -> Vec<(String, String)> {
        self.subscriptions.lock().clone()
    }

    /// Does this channel forward a broadcast on the given topic? The
    /// `topics` parameter (array of patterns) restricts it; otherwise
    /// every topic is accepted.
    pub fn accepts_topic(&self, topic: &str) -> bool {
        let filter = self.context.param("topics");
        if filter.is_null() || filter.is_empty() {
            return true;
        }
        let matches = filter
            .items()
            .any(|pattern| crate::broker::topic_matches(&pattern.to_text(), topic));
        matches
    }

    /// Encode and publish: the payload encoding is delegated to the codec
    /// registry using the envelope's encoding or, when empty, the
    /// channel's preference.
    pub fn write_data(
        &self,
        codecs: &CodecRegistry,
        value: &Value,
        mut template: TmxMessage,
    ) -> TmxResult<()> {
        let encoding = if template.encoding.is_empty() {
            self.default_encoding.clone()
        } else {
            template.encoding.clone()
        };
        template.payload = codecs.encode(&encoding, value)?;
        template.encoding = encoding;
        self.write_message(template)
    }

    /// Publish an already-encoded envelope.
    pub fn write_message(&self, message: TmxMessage) -> TmxResult<()> {
        self.broker()?.publish(&self.context, message);
        Ok(())
    }
}
