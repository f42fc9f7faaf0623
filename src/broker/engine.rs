use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Value as Json};
use slotmap::SlotMap;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::broker::message::ClientMessage;
use crate::broker::meta::MetaState;
use crate::broker::session::ClientSession;
use crate::broker::topic::{SendMode, Topic, TopicClientData, TopicInfo};
use crate::broker::value::{TimestampedValue, ValueFrame, decode_value_frames, encode_value_frames};
use crate::broker::{ClientId, TopicId};
use crate::client::outbound::{Outbound, ValueTarget};
use crate::persistence::StoredTopic;
use crate::utils::clock::Clock;

/// Default client name when the connection path carries none.
pub const DEFAULT_CLIENT_NAME: &str = "NT4";

/// The topic registry and every connected client session.
///
/// `Storage` is owned by a single task; all mutation goes through `&mut self`.
pub struct Storage {
    pub(crate) topics: SlotMap<TopicId, Topic>,
    pub(crate) names: BTreeMap<String, TopicId>,
    pub(crate) clients: SlotMap<ClientId, ClientSession>,
    pub(crate) meta: MetaState,
    next_wire_id: i64,
    persistent_changed: bool,
    clock: Arc<dyn Clock>,
}

impl Storage {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let mut storage = Self {
            topics: SlotMap::with_key(),
            names: BTreeMap::new(),
            clients: SlotMap::with_key(),
            meta: MetaState::default(),
            next_wire_id: 0,
            persistent_changed: false,
            clock,
        };
        let clients_topic = storage.create_meta_topic("$clients");
        storage.meta.clients_topic = Some(clients_topic);
        storage.meta.clients_dirty = true;
        storage.refresh_meta();
        storage
    }

    pub fn now_micros(&self) -> u64 {
        self.clock.now_micros()
    }

    pub fn get_topic(&self, name: &str) -> Option<TopicId> {
        self.names.get(name).copied()
    }

    pub fn topic(&self, id: TopicId) -> Option<&Topic> {
        self.topics.get(id)
    }

    pub fn topic_by_name(&self, name: &str) -> Option<&Topic> {
        self.get_topic(name).and_then(|id| self.topics.get(id))
    }

    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    pub fn client(&self, id: ClientId) -> Option<&ClientSession> {
        self.clients.get(id)
    }

    /// Snapshot of every topic, in name order.
    pub fn list_topics(&self) -> Vec<TopicInfo> {
        self.names
            .values()
            .filter_map(|id| self.topics.get(*id))
            .map(Topic::info)
            .collect()
    }

    /// Returns the topic called `name`, creating it if needed.
    ///
    /// A new topic is announced to every client with a matching subscriber
    /// except `owner`, which is expected to announce it itself.
    pub fn create_topic(
        &mut self,
        owner: Option<ClientId>,
        name: &str,
        type_str: &str,
        properties: Map<String, Json>,
        special: bool,
    ) -> TopicId {
        if let Some(&id) = self.names.get(name) {
            if let Some(topic) = self.topics.get(id) {
                if topic.type_str != type_str {
                    warn!(
                        topic = name,
                        existing = %topic.type_str,
                        requested = type_str,
                        "type mismatch, keeping existing topic type"
                    );
                }
            }
            return id;
        }

        let wire_id = self.next_wire_id;
        self.next_wire_id += 1;
        let id = self
            .topics
            .insert(Topic::new(wire_id, name, type_str, properties, special));
        self.names.insert(name.to_string(), id);
        debug!(topic = name, id = wire_id, "created topic");
        if self.topics.get(id).is_some_and(|t| t.persistent) {
            self.persistent_changed = true;
        }

        let mut announce_to = Vec::new();
        if let Some(topic) = self.topics.get_mut(id) {
            for (client_id, session) in self.clients.iter() {
                let mut data = TopicClientData::default();
                for subscriber in session.subscribers.values() {
                    if subscriber.matches(name, special) {
                        data.add_subscriber(subscriber);
                    }
                }
                if data.subscribers.is_empty() {
                    continue;
                }
                topic.clients.insert(client_id, data);
                if Some(client_id) != owner {
                    announce_to.push(client_id);
                }
            }
        }
        for client_id in announce_to {
            self.announce(client_id, id, None);
        }

        if !special {
            let meta_pub = self.create_meta_topic(&format!("$pub${name}"));
            let meta_sub = self.create_meta_topic(&format!("$sub${name}"));
            if let Some(topic) = self.topics.get_mut(id) {
                topic.meta_pub = Some(meta_pub);
                topic.meta_sub = Some(meta_sub);
            }
            self.meta.topic_pub.insert(id);
            self.meta.topic_sub.insert(id);
        }
        id
    }

    pub(crate) fn create_meta_topic(&mut self, name: &str) -> TopicId {
        let mut properties = Map::new();
        properties.insert("retained".to_string(), Json::Bool(true));
        self.create_topic(None, name, "msgpack", properties, true)
    }

    /// Deletes a topic that has no publishers left. Returns whether it was
    /// deleted.
    pub fn delete_topic(&mut self, id: TopicId) -> bool {
        match self.topics.get(id) {
            Some(topic) if topic.publisher_count() == 0 => {
                self.remove_topic(id);
                true
            }
            Some(topic) => {
                warn!(topic = %topic.name, "refusing to delete topic with active publishers");
                false
            }
            None => false,
        }
    }

    pub(crate) fn remove_topic(&mut self, id: TopicId) {
        let Some(topic) = self.topics.remove(id) else {
            return;
        };
        self.names.remove(&topic.name);
        debug!(topic = %topic.name, "deleted topic");

        for (client_id, data) in &topic.clients {
            if data.publishers.is_empty() {
                continue;
            }
            if let Some(session) = self.clients.get_mut(*client_id) {
                for pubuid in &data.publishers {
                    session.publishers.remove(pubuid);
                }
                self.meta.client_pub.insert(*client_id);
            }
        }

        for session in self.clients.values_mut() {
            if session.announced.remove(&id) {
                session.outbound.unannounce(&topic.name, topic.id);
            }
        }

        self.meta.forget_topic(id);
        for child in [topic.meta_pub, topic.meta_sub].into_iter().flatten() {
            self.remove_topic(child);
        }
    }

    /// Announces a topic to a client. Without a pubuid, a topic already
    /// announced to the client is not announced again.
    pub(crate) fn announce(&mut self, client: ClientId, topic: TopicId, pubuid: Option<i64>) {
        let (Some(session), Some(topic_ref)) = (self.clients.get_mut(client), self.topics.get(topic)) else {
            return;
        };
        let first = session.announced.insert(topic);
        if first || pubuid.is_some() {
            session.outbound.announce(&topic_ref.info(), pubuid);
        }
    }

    /// Stores a new value and forwards it to every subscribed client except
    /// a network `source`. Clients may not write special topics.
    pub fn set_value(&mut self, source: Option<ClientId>, id: TopicId, mut value: TimestampedValue) {
        let now = self.clock.now_micros() as i64;
        let Some(topic) = self.topics.get_mut(id) else {
            return;
        };
        if topic.special && source.is_some() {
            warn!(topic = %topic.name, "rejected client write to meta topic");
            return;
        }
        if value.time == 0 {
            value.time = now;
        }
        if topic.persistent {
            self.persistent_changed = true;
        }
        topic.last_value = Some(value.clone());
        topic.last_value_client = source;

        for (client_id, data) in &topic.clients {
            if data.send_mode == SendMode::Disabled {
                continue;
            }
            let Some(session) = self.clients.get_mut(*client_id) else {
                continue;
            };
            // local publishers and subscribers share one session; local values loop back
            if (Some(*client_id) == source && !session.local) || !session.announced.contains(&id) {
                continue;
            }
            let target = ValueTarget {
                id: topic.id,
                name: &topic.name,
                subscribers: &data.receivers,
            };
            session.outbound.send_value(target, &value, data.send_mode);
        }
    }

    /// Merges a property patch into a topic and tells every client that knows
    /// the topic. The topic is deleted if it is no longer published.
    pub fn set_properties(&mut self, source: Option<ClientId>, id: TopicId, update: &Map<String, Json>) {
        let Some(topic) = self.topics.get_mut(id) else {
            return;
        };
        let was_persistent = topic.persistent;
        if !topic.set_properties(update) {
            return;
        }
        if was_persistent || topic.persistent {
            self.persistent_changed = true;
        }
        if !topic.is_published() {
            self.remove_topic(id);
            return;
        }
        for (client_id, session) in self.clients.iter_mut() {
            if session.announced.contains(&id) {
                session
                    .outbound
                    .properties(&topic.name, update, Some(client_id) == source);
            }
        }
    }

    /// Visits every topic in name order. The topic set is snapshotted first,
    /// so `f` may not observe topics created meanwhile.
    pub fn for_each_topic<F: FnMut(TopicId, &mut Topic)>(&mut self, mut f: F) {
        let ids: Vec<TopicId> = self.names.values().copied().collect();
        for id in ids {
            if let Some(topic) = self.topics.get_mut(id) {
                f(id, topic);
            }
        }
    }

    fn unique_client_name(&self, requested: &str) -> String {
        let base = requested.split('@').next().unwrap_or_default();
        let base = if base.is_empty() { DEFAULT_CLIENT_NAME } else { base };
        let taken = |name: &str| self.clients.values().any(|c| c.name == name);
        let mut name = base.to_string();
        let mut n = 1;
        while taken(&name) {
            name = format!("{base}@{n}");
            n += 1;
        }
        name
    }

    /// Registers a client session and returns its id and de-duplicated name.
    pub fn add_client(
        &mut self,
        name: &str,
        conn_info: &str,
        local: bool,
        outbound: Box<dyn Outbound>,
        inbound: Option<mpsc::Receiver<ClientMessage>>,
    ) -> (ClientId, String) {
        let name = if local {
            String::new()
        } else {
            self.unique_client_name(name)
        };
        let id = self.clients.insert(ClientSession::new(
            name.clone(),
            conn_info.to_string(),
            local,
            outbound,
            inbound,
        ));

        if !local {
            let meta_pub = self.create_meta_topic(&format!("$clientpub${name}"));
            let meta_sub = self.create_meta_topic(&format!("$clientsub${name}"));
            if let Some(session) = self.clients.get_mut(id) {
                session.meta_pub = Some(meta_pub);
                session.meta_sub = Some(meta_sub);
            }
            self.meta.client_pub.insert(id);
            self.meta.client_sub.insert(id);
            self.meta.clients_dirty = true;
            info!(client = %name, conn = conn_info, "client connected");
        }
        self.refresh_meta();
        self.flush_all();
        (id, name)
    }

    /// Tears down every publisher and subscriber of a client and removes it.
    pub fn remove_client(&mut self, id: ClientId) {
        let Some(session) = self.clients.remove(id) else {
            return;
        };

        let mut unpublished = Vec::new();
        for (topic_id, topic) in self.topics.iter_mut() {
            let Some(data) = topic.clients.remove(&id) else {
                continue;
            };
            if !data.publishers.is_empty() {
                self.meta.topic_pub.insert(topic_id);
            }
            if !data.subscribers.is_empty() {
                self.meta.topic_sub.insert(topic_id);
            }
            if !topic.is_published() {
                unpublished.push(topic_id);
            }
        }
        for topic_id in unpublished {
            self.remove_topic(topic_id);
        }
        for meta in [session.meta_pub, session.meta_sub].into_iter().flatten() {
            self.remove_topic(meta);
        }

        self.meta.forget_client(id);
        if !session.local {
            self.meta.clients_dirty = true;
            info!(client = %session.name, "client disconnected");
        }
        self.refresh_meta();
        self.flush_all();
    }

    pub(crate) fn flush_all(&mut self) {
        for session in self.clients.values_mut() {
            session.outbound.flush();
        }
    }

    /// Returns and clears the "persistent topics changed" flag.
    pub fn take_persistent_changed(&mut self) -> bool {
        std::mem::take(&mut self.persistent_changed)
    }

    pub fn persistent_topics(&self) -> Vec<StoredTopic> {
        let saved_at = chrono::Utc::now().timestamp_millis();
        self.names
            .values()
            .filter_map(|id| self.topics.get(*id))
            .filter(|topic| topic.persistent)
            .map(|topic| StoredTopic {
                name: topic.name.clone(),
                type_str: topic.type_str.clone(),
                properties: topic.properties.clone(),
                value: topic.last_value.as_ref().and_then(|v| {
                    let frame = ValueFrame {
                        id: 0,
                        time: v.time,
                        value: v.value.clone(),
                    };
                    encode_value_frames(&[frame])
                        .inspect_err(|e| warn!(topic = %topic.name, "failed to encode persistent value: {}", e))
                        .ok()
                }),
                saved_at,
            })
            .collect()
    }

    /// Recreates stored persistent topics as server-owned topics.
    pub fn load_persistent(&mut self, stored: Vec<StoredTopic>) {
        let count = stored.len();
        for entry in stored {
            let mut properties = entry.properties;
            properties.insert("persistent".to_string(), Json::Bool(true));
            let id = self.create_topic(None, &entry.name, &entry.type_str, properties, false);
            let Some(bytes) = entry.value else {
                continue;
            };
            match decode_value_frames(&bytes) {
                Ok(frames) => {
                    if let Some(frame) = frames.into_iter().next() {
                        self.set_value(None, id, TimestampedValue::new(frame.value, frame.time));
                    }
                }
                Err(e) => warn!(topic = %entry.name, "dropping unreadable persistent value: {}", e),
            }
        }
        self.persistent_changed = false;
        self.refresh_meta();
        info!("loaded {} persistent topics", count);
    }
}
