use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::{Map, Value as Json};
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::broker::topic::{SendMode, TopicInfo};
use crate::broker::value::{TimestampedValue, Value};
use crate::client::outbound::{Outbound, ValueTarget};

/// A value received by an in-process subscriber.
#[derive(Debug, Clone, PartialEq)]
pub struct TopicValue {
    pub topic: String,
    pub value: Value,
    pub time: i64,
}

/// Bounded queue of one in-process subscriber. When full, the oldest value is
/// dropped.
#[derive(Debug)]
pub struct SubscriberQueue {
    values: Mutex<VecDeque<TopicValue>>,
    notify: Notify,
    capacity: usize,
}

impl SubscriberQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            values: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&self, value: TopicValue) {
        {
            let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
            if values.len() >= self.capacity {
                if let Some(dropped) = values.pop_front() {
                    warn!(topic = %dropped.topic, "subscriber queue full, dropping oldest value");
                }
            }
            values.push_back(value);
        }
        self.notify.notify_one();
    }

    pub fn pop(&self) -> Option<TopicValue> {
        self.values.lock().unwrap_or_else(PoisonError::into_inner).pop_front()
    }

    pub fn drain(&self) -> Vec<TopicValue> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect()
    }

    /// Waits until a value is available and returns it.
    pub async fn next(&self) -> TopicValue {
        loop {
            if let Some(value) = self.pop() {
                return value;
            }
            self.notify.notified().await;
        }
    }
}

/// Queues of all in-process subscribers, keyed by subuid.
#[derive(Debug)]
pub struct LocalHub {
    queues: Mutex<HashMap<i64, Arc<SubscriberQueue>>>,
    capacity: usize,
}

impl LocalHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    pub fn register(&self, subuid: i64) -> Arc<SubscriberQueue> {
        let queue = Arc::new(SubscriberQueue::new(self.capacity));
        self.queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(subuid, Arc::clone(&queue));
        queue
    }

    pub fn remove(&self, subuid: i64) {
        self.queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&subuid);
    }

    fn deliver(&self, target: &ValueTarget<'_>, value: &TimestampedValue) {
        let queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        for subuid in target.subscribers {
            if let Some(queue) = queues.get(subuid) {
                queue.push(TopicValue {
                    topic: target.name.to_string(),
                    value: value.value.clone(),
                    time: value.time,
                });
            }
        }
    }
}

/// Outbound side of the in-process client. Values go straight to the
/// subscriber queues; there is no flush period.
pub struct LocalOutbound {
    hub: Arc<LocalHub>,
}

impl LocalOutbound {
    pub fn new(hub: Arc<LocalHub>) -> Self {
        Self { hub }
    }
}

impl Outbound for LocalOutbound {
    fn announce(&mut self, topic: &TopicInfo, pubuid: Option<i64>) {
        debug!(topic = %topic.name, ?pubuid, "local announce");
    }

    fn unannounce(&mut self, name: &str, _id: i64) {
        debug!(topic = %name, "local unannounce");
    }

    fn properties(&mut self, name: &str, _update: &Map<String, Json>, _ack: bool) {
        debug!(topic = %name, "local properties update");
    }

    fn send_value(&mut self, target: ValueTarget<'_>, value: &TimestampedValue, _mode: SendMode) {
        self.hub.deliver(&target, value);
    }

    fn send_values_now(&mut self, values: &[(ValueTarget<'_>, &TimestampedValue)]) {
        for (target, value) in values {
            self.hub.deliver(target, value);
        }
    }

    fn flush(&mut self) {}

    fn set_period(&mut self, _period: Option<Duration>) {}
}
