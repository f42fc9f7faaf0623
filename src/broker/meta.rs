//! `$`-prefixed introspection topics.
//!
//! Mutations only mark what changed; [`Storage::refresh_meta`] regenerates
//! each dirty meta topic once, normally at the end of a message batch.

use std::collections::BTreeSet;

use serde::Serialize;
use tracing::warn;

use crate::broker::engine::Storage;
use crate::broker::subscriber::SubscribeOptions;
use crate::broker::value::{TimestampedValue, Value};
use crate::broker::{ClientId, TopicId};

/// Protocol version reported in `$clients`.
pub const PROTOCOL_VERSION: u16 = 0x0401;

#[derive(Debug, Default)]
pub(crate) struct MetaState {
    pub clients_topic: Option<TopicId>,
    pub clients_dirty: bool,
    pub topic_pub: BTreeSet<TopicId>,
    pub topic_sub: BTreeSet<TopicId>,
    pub client_pub: BTreeSet<ClientId>,
    pub client_sub: BTreeSet<ClientId>,
}

impl MetaState {
    pub fn forget_topic(&mut self, id: TopicId) {
        self.topic_pub.remove(&id);
        self.topic_sub.remove(&id);
    }

    pub fn forget_client(&mut self, id: ClientId) {
        self.client_pub.remove(&id);
        self.client_sub.remove(&id);
    }
}

#[derive(Serialize)]
struct ClientEntry<'a> {
    id: &'a str,
    conn: &'a str,
    ver: u16,
}

#[derive(Serialize)]
struct ClientPubEntry<'a> {
    uid: i64,
    topic: &'a str,
}

#[derive(Serialize)]
struct ClientSubEntry<'a> {
    uid: i64,
    topics: &'a [String],
    options: &'a SubscribeOptions,
}

#[derive(Serialize)]
struct TopicPubEntry<'a> {
    client: &'a str,
    pubuid: i64,
}

#[derive(Serialize)]
struct TopicSubEntry<'a> {
    client: &'a str,
    subuid: i64,
    options: &'a SubscribeOptions,
}

fn encode<T: Serialize>(entries: &T) -> Option<Vec<u8>> {
    rmp_serde::to_vec_named(entries)
        .inspect_err(|e| warn!("failed to encode meta topic: {}", e))
        .ok()
}

impl Storage {
    pub fn refresh_meta(&mut self) {
        if std::mem::take(&mut self.meta.clients_dirty) {
            self.refresh_clients_meta();
        }
        for id in std::mem::take(&mut self.meta.topic_pub) {
            self.refresh_topic_pub_meta(id);
        }
        for id in std::mem::take(&mut self.meta.topic_sub) {
            self.refresh_topic_sub_meta(id);
        }
        for id in std::mem::take(&mut self.meta.client_pub) {
            self.refresh_client_pub_meta(id);
        }
        for id in std::mem::take(&mut self.meta.client_sub) {
            self.refresh_client_sub_meta(id);
        }
    }

    fn write_meta(&mut self, meta: Option<TopicId>, payload: Option<Vec<u8>>) {
        if let (Some(meta), Some(payload)) = (meta, payload) {
            self.set_value(None, meta, TimestampedValue::new(Value::Raw(payload), 0));
        }
    }

    fn client_name(&self, id: ClientId) -> &str {
        self.clients.get(id).map(|c| c.name.as_str()).unwrap_or_default()
    }

    fn refresh_clients_meta(&mut self) {
        let entries: Vec<ClientEntry<'_>> = self
            .clients
            .values()
            .filter(|c| !c.local)
            .map(|c| ClientEntry {
                id: &c.name,
                conn: &c.conn_info,
                ver: PROTOCOL_VERSION,
            })
            .collect();
        let payload = encode(&entries);
        let meta = self.meta.clients_topic;
        self.write_meta(meta, payload);
    }

    fn refresh_topic_pub_meta(&mut self, id: TopicId) {
        let Some(topic) = self.topics.get(id) else {
            return;
        };
        let mut entries = Vec::new();
        for (client, data) in &topic.clients {
            for pubuid in &data.publishers {
                entries.push(TopicPubEntry {
                    client: self.client_name(*client),
                    pubuid: *pubuid,
                });
            }
        }
        let meta = topic.meta_pub;
        let payload = encode(&entries);
        self.write_meta(meta, payload);
    }

    fn refresh_topic_sub_meta(&mut self, id: TopicId) {
        let Some(topic) = self.topics.get(id) else {
            return;
        };
        let mut entries = Vec::new();
        for (client, data) in &topic.clients {
            let Some(session) = self.clients.get(*client) else {
                continue;
            };
            for subuid in &data.subscribers {
                if let Some(subscriber) = session.subscribers.get(subuid) {
                    entries.push(TopicSubEntry {
                        client: &session.name,
                        subuid: *subuid,
                        options: &subscriber.options,
                    });
                }
            }
        }
        let meta = topic.meta_sub;
        let payload = encode(&entries);
        self.write_meta(meta, payload);
    }

    fn refresh_client_pub_meta(&mut self, id: ClientId) {
        let Some(session) = self.clients.get(id) else {
            return;
        };
        let entries: Vec<ClientPubEntry<'_>> = session
            .publishers
            .values()
            .filter_map(|p| {
                self.topics.get(p.topic).map(|t| ClientPubEntry {
                    uid: p.pubuid,
                    topic: &t.name,
                })
            })
            .collect();
        let meta = session.meta_pub;
        let payload = encode(&entries);
        self.write_meta(meta, payload);
    }

    fn refresh_client_sub_meta(&mut self, id: ClientId) {
        let Some(session) = self.clients.get(id) else {
            return;
        };
        let entries: Vec<ClientSubEntry<'_>> = session
            .subscribers
            .values()
            .map(|s| ClientSubEntry {
                uid: s.subuid,
                topics: &s.prefixes,
                options: &s.options,
            })
            .collect();
        let meta = session.meta_sub;
        let payload = encode(&entries);
        self.write_meta(meta, payload);
    }
}
