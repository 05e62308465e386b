//! In-memory topic-based publish/subscribe.
//!
//! Each subscription owns one bounded `mpsc` channel. Publishing clones the
//! subscriber list under a read lock and delivers outside of it, so only topic
//! registration is serialized. A full subscriber channel applies backpressure
//! to the publisher.

use std::collections::HashMap;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::trace;

/// Topic carrying [`TaskEvent`]s for freshly inserted tasks.
pub const TOPIC_TASK_CREATED: &str = "task.created";

/// Announces that the registry gained a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskEvent {
    pub video_id: String,
}

pub struct MessageBus<T> {
    topics: RwLock<HashMap<String, Vec<mpsc::Sender<T>>>>,
    capacity: usize,
}

impl<T> MessageBus<T>
where
    T: Clone + Send + 'static,
{
    /// `capacity` bounds every subscriber channel; zero is bumped to one.
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Deliver `value` to every current subscriber of `topic`.
    ///
    /// Waits while a subscriber channel is full. Dropped subscribers are
    /// pruned; a topic with no subscribers swallows the value.
    pub async fn publish(&self, topic: &str, value: T) {
        let senders = {
            let topics = self.topics.read();
            match topics.get(topic) {
                Some(senders) => senders.clone(),
                None => {
                    drop(topics);
                    self.topics.write().entry(topic.to_string()).or_default();
                    Vec::new()
                }
            }
        };

        let mut closed = false;
        for sender in &senders {
            if sender.send(value.clone()).await.is_err() {
                closed = true;
            }
        }
        trace!(topic, subscribers = senders.len(), "Published message");

        if closed && let Some(senders) = self.topics.write().get_mut(topic) {
            senders.retain(|s| !s.is_closed());
        }
    }

    /// Register one new channel against every topic in `topics`.
    ///
    /// The returned receiver yields the union of their messages.
    pub fn subscribe(&self, topics: &[&str]) -> mpsc::Receiver<T> {
        let (tx, rx) = mpsc::channel(self.capacity);
        let mut map = self.topics.write();
        for topic in topics {
            map.entry((*topic).to_string()).or_default().push(tx.clone());
        }
        rx
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.read().get(topic).map_or(0, Vec::len)
    }
}
