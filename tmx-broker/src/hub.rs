//! Process-local topic hub backing the `kafka` scheme. Contexts that share
//! a `bootstrap.servers` value meet in the same hub; within a consumer
//! group each message goes to exactly one member, rotating.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::mpsc::{Receiver, SyncSender, TrySendError};
use tmx_message::TmxMessage;
use tmx_value::{codes, TmxError, TmxResult};

/// Bounded per-consumer queue depth; a full queue surfaces as a
/// queue-full publish error, matching the lossy-on-overflow model.
const QUEUE_DEPTH: usize = 1024;

struct HubSubscriber {
    ctx_id: String,
    group: String,
    topics: Vec<String>,
    tx: SyncSender<TmxMessage>,
}

#[derive(Default)]
pub struct TopicHub {
    subscribers: Mutex<Vec<HubSubscriber>>,
    cursors: Mutex<HashMap<String, usize>>,
}

impl TopicHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the hub, replacing any previous registration for the context.
    pub fn join(&self, ctx_id: &str, group: &str) -> Receiver<TmxMessage> {
        let (tx, rx) = std::sync::mpsc::sync_channel(QUEUE_DEPTH);
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|s| s.ctx_id != ctx_id);
        subscribers.push(HubSubscriber {
            ctx_id: ctx_id.to_string(),
            group: group.to_string(),
            topics: Vec::new(),
            tx,
        });
        rx
    }

    pub fn leave(&self, ctx_id: &str) {
        self.subscribers.lock().retain(|s| s.ctx_id != ctx_id);
    }

    pub fn add_topic(&self, ctx_id: &str, topic: &str) {
        let mut subscribers = self.subscribers.lock();
        if let Some(sub) = subscribers.iter_mut().find(|s| s.ctx_id == ctx_id) {
            if !sub.topics.iter().any(|t| t == topic) {
                sub.topics.push(topic.to_string());
            }
        }
    }

    pub fn remove_topic(&self, ctx_id: &str, topic: &str) {
        let mut subscribers = self.subscribers.lock();
        if let Some(sub) = subscribers.iter_mut().find(|s| s.ctx_id == ctx_id) {
            sub.topics.retain(|t| t != topic);
        }
    }

    /// Fan the message out: one delivery per consumer group whose
    /// subscription covers the topic. A full consumer queue fails the
    /// whole publish with a queue-full error so the caller can decide
    /// whether to retry.
    pub fn publish(&self, message: &TmxMessage) -> TmxResult<usize> {
        let subscribers = self.subscribers.lock();

        let mut groups: HashMap<&str, Vec<&HubSubscriber>> = HashMap::new();
        for sub in subscribers.iter() {
            if sub
                .topics
                .iter()
                .any(|t| crate::broker::topic_matches(t, &message.topic))
            {
                groups.entry(&sub.group).or_default().push(sub);
            }
        }

        let mut delivered = 0;
        let mut cursors = self.cursors.lock();
        for (group, members) in groups {
            let key = format!("{}|{}", group, message.topic);
            let cursor = cursors.entry(key).or_insert(0);
            let target = members[*cursor % members.len()];
            *cursor = cursor.wrapping_add(1);
            match target.tx.try_send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    return Err(TmxError::new(
                        codes::EAGAIN,
                        format!("consumer queue full for topic {}", message.topic),
                    ));
                }
                Err(TrySendError::Disconnected(_)) => {}
            }
        }
        Ok(delivered)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}
