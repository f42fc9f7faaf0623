use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};

use crate::broker::subscriber::Subscriber;
use crate::broker::value::TimestampedValue;
use crate::broker::{ClientId, TopicId};

/// How values of a topic are forwarded to one client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum SendMode {
    #[default]
    Disabled,
    /// Only the latest value per flush period.
    Normal,
    /// Every value.
    All,
}

/// Bookkeeping for one (topic, client) pair.
#[derive(Debug, Clone, Default)]
pub struct TopicClientData {
    pub publishers: BTreeSet<i64>,
    pub subscribers: BTreeSet<i64>,
    /// Subscribers that want values, i.e. all but the topics-only ones.
    pub receivers: BTreeSet<i64>,
    pub send_mode: SendMode,
}

impl TopicClientData {
    pub fn add_subscriber(&mut self, subscriber: &Subscriber) -> bool {
        let added = self.subscribers.insert(subscriber.subuid);
        if !subscriber.options.topics_only {
            self.receivers.insert(subscriber.subuid);
            if subscriber.options.all {
                self.send_mode = SendMode::All;
            } else if self.send_mode == SendMode::Disabled {
                self.send_mode = SendMode::Normal;
            }
        }
        added
    }

    /// Recomputes receivers and the send mode from the client's current
    /// subscriber table.
    pub fn refresh_send_mode(&mut self, table: &BTreeMap<i64, Subscriber>) {
        let receivers: Vec<&Subscriber> = self
            .subscribers
            .iter()
            .filter_map(|subuid| table.get(subuid))
            .filter(|s| !s.options.topics_only)
            .collect();
        self.send_mode = receivers
            .iter()
            .map(|s| if s.options.all { SendMode::All } else { SendMode::Normal })
            .max()
            .unwrap_or_default();
        self.receivers = receivers.iter().map(|s| s.subuid).collect();
    }

    pub fn is_empty(&self) -> bool {
        self.publishers.is_empty() && self.subscribers.is_empty()
    }
}

/// Snapshot of a topic as announced to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicInfo {
    pub name: String,
    pub id: i64,
    #[serde(rename = "type")]
    pub type_str: String,
    pub properties: Map<String, Json>,
}

#[derive(Debug)]
pub struct Topic {
    /// Wire id used in announce messages and value frames.
    pub id: i64,
    pub name: String,
    pub type_str: String,
    pub properties: Map<String, Json>,
    pub special: bool,
    pub persistent: bool,
    pub retained: bool,
    pub last_value: Option<TimestampedValue>,
    pub last_value_client: Option<ClientId>,
    pub clients: BTreeMap<ClientId, TopicClientData>,
    pub meta_pub: Option<TopicId>,
    pub meta_sub: Option<TopicId>,
}

impl Topic {
    pub fn new(id: i64, name: &str, type_str: &str, properties: Map<String, Json>, special: bool) -> Self {
        let mut topic = Self {
            id,
            name: name.to_string(),
            type_str: type_str.to_string(),
            properties,
            special,
            persistent: false,
            retained: false,
            last_value: None,
            last_value_client: None,
            clients: BTreeMap::new(),
            meta_pub: None,
            meta_sub: None,
        };
        topic.refresh_flags();
        topic
    }

    pub fn publisher_count(&self) -> usize {
        self.clients.values().map(|c| c.publishers.len()).sum()
    }

    pub fn is_published(&self) -> bool {
        self.persistent || self.retained || self.publisher_count() > 0
    }

    /// Merges `update` into the property bag; `null` removes a key.
    /// Returns false when nothing changed.
    pub fn set_properties(&mut self, update: &Map<String, Json>) -> bool {
        let mut changed = false;
        for (key, value) in update {
            if value.is_null() {
                changed |= self.properties.remove(key).is_some();
            } else if self.properties.get(key) != Some(value) {
                self.properties.insert(key.clone(), value.clone());
                changed = true;
            }
        }
        if changed {
            self.refresh_flags();
        }
        changed
    }

    fn refresh_flags(&mut self) {
        self.persistent = flag(&self.properties, "persistent");
        self.retained = flag(&self.properties, "retained");
    }

    pub fn info(&self) -> TopicInfo {
        TopicInfo {
            name: self.name.clone(),
            id: self.id,
            type_str: self.type_str.clone(),
            properties: self.properties.clone(),
        }
    }
}

fn flag(properties: &Map<String, Json>, key: &str) -> bool {
    properties.get(key).and_then(Json::as_bool).unwrap_or(false)
}
