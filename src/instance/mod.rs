//! The in-process entry point.
//!
//! An [`Instance`] owns the storage task. Transports get a [`StorageHandle`]
//! from it; application code publishes and subscribes through it directly as
//! the local client.

mod task;

pub use task::{StorageCommand, StorageHandle, StorageTask};

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use serde_json::{Map, Value as Json};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::broker::Storage;
use crate::broker::message::ClientMessage;
use crate::broker::subscriber::SubscribeOptions;
use crate::broker::topic::TopicInfo;
use crate::broker::value::{TimestampedValue, Value};
use crate::client::local::{LocalHub, LocalOutbound, SubscriberQueue, TopicValue};
use crate::config::Settings;
use crate::persistence::Persistence;
use crate::utils::clock::{Clock, MonotonicClock};
use crate::utils::error::Result;

pub struct Instance {
    handle: StorageHandle,
    hub: Arc<LocalHub>,
    next_uid: Arc<AtomicI64>,
    clock: Arc<dyn Clock>,
    task: Option<JoinHandle<()>>,
}

impl Instance {
    /// Starts the storage task. Must be called within a tokio runtime.
    pub fn start(settings: &Settings) -> Result<Self> {
        Self::start_with_clock(settings, Arc::new(MonotonicClock::new()))
    }

    pub fn start_with_clock(settings: &Settings, clock: Arc<dyn Clock>) -> Result<Self> {
        let mut storage = Storage::new(Arc::clone(&clock));

        let persistence = match &settings.persistence.path {
            Some(path) => {
                let persistence = Persistence::open(path)?;
                storage.load_persistent(persistence.load_topics()?);
                Some(persistence)
            }
            None => None,
        };

        let hub = Arc::new(LocalHub::new(settings.broker.local_queue_capacity));
        let (local, _) = storage.add_client(
            "",
            "local",
            true,
            Box::new(LocalOutbound::new(Arc::clone(&hub))),
            None,
        );

        let (tx, rx) = mpsc::unbounded_channel();
        let task = StorageTask::new(
            storage,
            local,
            rx,
            tx.downgrade(),
            settings.broker.max_batch,
            persistence,
            Duration::from_millis(settings.persistence.save_interval_ms),
        );
        let task = tokio::spawn(task.run());
        info!("storage started");

        Ok(Self {
            handle: StorageHandle::new(tx),
            hub,
            next_uid: Arc::new(AtomicI64::new(1)),
            clock,
            task: Some(task),
        })
    }

    pub fn handle(&self) -> StorageHandle {
        self.handle.clone()
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    fn next_uid(&self) -> i64 {
        self.next_uid.fetch_add(1, Ordering::Relaxed)
    }

    pub fn publish(&self, name: &str, type_str: &str) -> Result<Publisher> {
        self.publish_with_properties(name, type_str, Map::new())
    }

    pub fn publish_with_properties(
        &self,
        name: &str,
        type_str: &str,
        properties: Map<String, Json>,
    ) -> Result<Publisher> {
        let pubuid = self.next_uid();
        self.handle.local(ClientMessage::Publish {
            name: name.to_string(),
            pubuid,
            type_str: type_str.to_string(),
            properties,
        })?;
        Ok(Publisher {
            pubuid,
            topic: name.to_string(),
            handle: self.handle.clone(),
        })
    }

    pub fn subscribe<I, S>(&self, prefixes: I, options: SubscribeOptions) -> Result<Subscriber>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let subuid = self.next_uid();
        let queue = self.hub.register(subuid);
        let message = ClientMessage::Subscribe {
            subuid,
            topics: prefixes.into_iter().map(Into::into).collect(),
            options,
        };
        if let Err(e) = self.handle.local(message) {
            self.hub.remove(subuid);
            return Err(e);
        }
        Ok(Subscriber {
            subuid,
            queue,
            hub: Arc::clone(&self.hub),
            handle: self.handle.clone(),
        })
    }

    /// Snapshot of all topics, in name order.
    pub async fn get_topics(&self) -> Result<Vec<TopicInfo>> {
        self.handle.topics().await
    }

    /// Stops the storage task and waits for it to save persistent topics.
    pub async fn shutdown(mut self) {
        self.handle.shutdown();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        if self.task.is_some() {
            self.handle.shutdown();
        }
    }
}

/// A local publisher. Dropping it unpublishes.
#[derive(Debug)]
pub struct Publisher {
    pubuid: i64,
    topic: String,
    handle: StorageHandle,
}

impl Publisher {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Publishes a value stamped with the server clock.
    pub fn set(&self, value: Value) -> Result<()> {
        self.set_at(value, 0)
    }

    pub fn set_at(&self, value: Value, time: i64) -> Result<()> {
        self.handle.local(ClientMessage::SetValue {
            pubuid: self.pubuid,
            value: TimestampedValue::new(value, time),
        })
    }

    pub fn set_properties(&self, update: Map<String, Json>) -> Result<()> {
        self.handle.local(ClientMessage::SetProperties {
            name: self.topic.clone(),
            update,
        })
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        let _ = self.handle.local(ClientMessage::Unpublish {
            pubuid: self.pubuid,
        });
    }
}

/// A local subscriber. Values arrive in order; dropping it unsubscribes.
pub struct Subscriber {
    subuid: i64,
    queue: Arc<SubscriberQueue>,
    hub: Arc<LocalHub>,
    handle: StorageHandle,
}

impl Subscriber {
    /// Takes every value received since the last call.
    pub fn read_queue(&self) -> Vec<TopicValue> {
        self.queue.drain()
    }

    /// Waits for the next value.
    pub async fn next(&self) -> TopicValue {
        self.queue.next().await
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        self.hub.remove(self.subuid);
        let _ = self.handle.local(ClientMessage::Unsubscribe {
            subuid: self.subuid,
        });
    }
}
