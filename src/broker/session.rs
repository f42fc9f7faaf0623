use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::time::Duration;

use serde_json::{Map, Value as Json};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::broker::engine::Storage;
use crate::broker::message::ClientMessage;
use crate::broker::subscriber::{Publisher, SubscribeOptions, Subscriber, negotiated_period};
use crate::broker::value::TimestampedValue;
use crate::broker::{ClientId, TopicId};
use crate::client::outbound::{Outbound, ValueTarget};

/// State of one connected endpoint.
pub struct ClientSession {
    pub(crate) name: String,
    pub(crate) conn_info: String,
    pub(crate) local: bool,
    pub(crate) publishers: BTreeMap<i64, Publisher>,
    pub(crate) subscribers: BTreeMap<i64, Subscriber>,
    pub(crate) period: Option<Duration>,
    /// Topics this client has been told about.
    pub(crate) announced: HashSet<TopicId>,
    pub(crate) outbound: Box<dyn Outbound>,
    pub(crate) inbound: Option<mpsc::Receiver<ClientMessage>>,
    pub(crate) meta_pub: Option<TopicId>,
    pub(crate) meta_sub: Option<TopicId>,
}

impl ClientSession {
    pub fn new(
        name: String,
        conn_info: String,
        local: bool,
        outbound: Box<dyn Outbound>,
        inbound: Option<mpsc::Receiver<ClientMessage>>,
    ) -> Self {
        Self {
            name,
            conn_info,
            local,
            publishers: BTreeMap::new(),
            subscribers: BTreeMap::new(),
            period: None,
            announced: HashSet::new(),
            outbound,
            inbound,
            meta_pub: None,
            meta_sub: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn conn_info(&self) -> &str {
        &self.conn_info
    }

    /// Flush period negotiated across the client's subscribers.
    pub fn period(&self) -> Option<Duration> {
        self.period
    }

    pub fn publisher(&self, pubuid: i64) -> Option<&Publisher> {
        self.publishers.get(&pubuid)
    }

    pub fn subscriber(&self, subuid: i64) -> Option<&Subscriber> {
        self.subscribers.get(&subuid)
    }

    pub fn is_announced(&self, topic: TopicId) -> bool {
        self.announced.contains(&topic)
    }

    fn refresh_period(&mut self) {
        let period = negotiated_period(self.subscribers.values());
        if period != self.period {
            self.period = period;
            self.outbound.set_period(period);
        }
    }
}

impl Storage {
    pub fn client_publish(
        &mut self,
        client: ClientId,
        pubuid: i64,
        name: &str,
        type_str: &str,
        properties: Map<String, Json>,
    ) {
        let Some(session) = self.clients.get(client) else {
            return;
        };
        if session.publishers.contains_key(&pubuid) {
            warn!(client = %session.name, pubuid, topic = name, "duplicate publish, keeping existing publisher");
            return;
        }
        if name.is_empty() {
            warn!(client = %session.name, pubuid, "publish with empty topic name");
            return;
        }
        debug!(client = %session.name, pubuid, topic = name, "publish");

        let topic = self.create_topic(Some(client), name, type_str, properties, false);
        let Some(session) = self.clients.get_mut(client) else {
            return;
        };
        session.publishers.insert(pubuid, Publisher { pubuid, topic });
        if let Some(topic_ref) = self.topics.get_mut(topic) {
            topic_ref
                .clients
                .entry(client)
                .or_default()
                .publishers
                .insert(pubuid);
        }
        self.meta.topic_pub.insert(topic);
        self.meta.client_pub.insert(client);
        self.announce(client, topic, Some(pubuid));
    }

    pub fn client_unpublish(&mut self, client: ClientId, pubuid: i64) {
        let Some(session) = self.clients.get_mut(client) else {
            return;
        };
        let Some(publisher) = session.publishers.remove(&pubuid) else {
            debug!(client = %session.name, pubuid, "unpublish of unknown publisher");
            return;
        };
        self.meta.client_pub.insert(client);

        let Some(topic) = self.topics.get_mut(publisher.topic) else {
            return;
        };
        if let Some(data) = topic.clients.get_mut(&client) {
            data.publishers.remove(&pubuid);
            if data.is_empty() {
                topic.clients.remove(&client);
            }
        }
        self.meta.topic_pub.insert(publisher.topic);
        if !topic.is_published() {
            self.remove_topic(publisher.topic);
        }
    }

    pub fn client_set_properties(&mut self, client: ClientId, name: &str, update: &Map<String, Json>) {
        let Some(topic) = self.topic_by_name(name) else {
            warn!(topic = name, "set properties on unknown topic");
            return;
        };
        if !topic.is_published() {
            warn!(topic = name, "set properties on unpublished topic");
            return;
        }
        if topic.special {
            warn!(topic = name, "rejected property change on meta topic");
            return;
        }
        if let Some(id) = self.get_topic(name) {
            self.set_properties(Some(client), id, update);
        }
    }

    /// Adds or replaces a subscriber. Topics that newly match are announced,
    /// then their current values are sent as one batch. A network client that
    /// already receives a topic through another subscriber gets no extra copy.
    pub fn client_subscribe(
        &mut self,
        client: ClientId,
        subuid: i64,
        prefixes: Vec<String>,
        options: SubscribeOptions,
    ) {
        let Some(session) = self.clients.get_mut(client) else {
            return;
        };
        let replace = match session.subscribers.get_mut(&subuid) {
            Some(existing) => {
                existing.update(prefixes, options);
                true
            }
            None => {
                session
                    .subscribers
                    .insert(subuid, Subscriber::new(subuid, prefixes, options));
                false
            }
        };
        session.refresh_period();
        let local = session.local;
        let table = session.subscribers.clone();
        let Some(subscriber) = table.get(&subuid).cloned() else {
            return;
        };
        debug!(client = %session.name, subuid, prefixes = ?subscriber.prefixes, replace, "subscribe");
        self.meta.client_sub.insert(client);

        let mut changed = Vec::new();
        let mut added = Vec::new();
        let mut initial = Vec::new();
        self.for_each_topic(|id, topic| {
            let data = topic.clients.entry(client).or_default();
            // a network client already receiving this topic has its value queued
            let receiving = !local && !data.receivers.is_empty();
            let removed = replace && data.subscribers.remove(&subuid);
            let matched = subscriber.matches(&topic.name, topic.special);
            if matched {
                data.subscribers.insert(subuid);
            }
            if matched || removed {
                data.refresh_send_mode(&table);
            }
            if matched != removed {
                changed.push(id);
            }
            if matched && !removed {
                added.push(id);
                if !receiving {
                    initial.push(id);
                }
            }
            if data.is_empty() {
                topic.clients.remove(&client);
            }
        });

        self.meta.topic_sub.extend(changed);
        for id in &added {
            self.announce(client, *id, None);
        }

        if subscriber.options.topics_only {
            return;
        }
        let Some(session) = self.clients.get_mut(client) else {
            return;
        };
        let only_this = BTreeSet::from([subuid]);
        let batch: Vec<(ValueTarget<'_>, &TimestampedValue)> = initial
            .iter()
            .filter_map(|id| {
                let topic = self.topics.get(*id)?;
                let value = topic.last_value.as_ref()?;
                let target = ValueTarget {
                    id: topic.id,
                    name: &topic.name,
                    subscribers: &only_this,
                };
                Some((target, value))
            })
            .collect();
        if !batch.is_empty() {
            session.outbound.send_values_now(&batch);
        }
    }

    pub fn client_unsubscribe(&mut self, client: ClientId, subuid: i64) {
        let Some(session) = self.clients.get_mut(client) else {
            return;
        };
        if session.subscribers.remove(&subuid).is_none() {
            debug!(client = %session.name, subuid, "unsubscribe of unknown subscriber");
            return;
        }
        session.refresh_period();
        let table = session.subscribers.clone();
        self.meta.client_sub.insert(client);

        let mut changed = Vec::new();
        self.for_each_topic(|id, topic| {
            let Some(data) = topic.clients.get_mut(&client) else {
                return;
            };
            if data.subscribers.remove(&subuid) {
                data.refresh_send_mode(&table);
                changed.push(id);
                if data.is_empty() {
                    topic.clients.remove(&client);
                }
            }
        });
        self.meta.topic_sub.extend(changed);
    }

    pub fn client_set_value(&mut self, client: ClientId, pubuid: i64, value: TimestampedValue) {
        let topic = self
            .clients
            .get(client)
            .and_then(|session| session.publishers.get(&pubuid))
            .map(|publisher| publisher.topic);
        match topic {
            Some(topic) => self.set_value(Some(client), topic, value),
            None => warn!(pubuid, "value for unknown publisher"),
        }
    }

    pub fn dispatch(&mut self, client: ClientId, message: ClientMessage) {
        match message {
            ClientMessage::Publish {
                name,
                pubuid,
                type_str,
                properties,
            } => self.client_publish(client, pubuid, &name, &type_str, properties),
            ClientMessage::Unpublish { pubuid } => self.client_unpublish(client, pubuid),
            ClientMessage::SetProperties { name, update } => {
                self.client_set_properties(client, &name, &update)
            }
            ClientMessage::Subscribe {
                subuid,
                topics,
                options,
            } => self.client_subscribe(client, subuid, topics, options),
            ClientMessage::Unsubscribe { subuid } => self.client_unsubscribe(client, subuid),
            ClientMessage::SetValue { pubuid, value } => self.client_set_value(client, pubuid, value),
        }
    }

    /// Handles one message and publishes the resulting meta topic changes.
    pub fn handle_message(&mut self, client: ClientId, message: ClientMessage) {
        self.dispatch(client, message);
        self.refresh_meta();
        self.flush_all();
    }

    /// Drains up to `max` queued messages of a client. Meta topics are
    /// refreshed once for the whole batch. Returns true if the batch was full
    /// and more messages may be waiting.
    pub fn process_incoming(&mut self, client: ClientId, max: usize) -> bool {
        let mut batch = Vec::new();
        {
            let Some(inbound) = self
                .clients
                .get_mut(client)
                .and_then(|session| session.inbound.as_mut())
            else {
                return false;
            };
            while batch.len() < max {
                match inbound.try_recv() {
                    Ok(message) => batch.push(message),
                    Err(_) => break,
                }
            }
        }
        let full = max > 0 && batch.len() == max;
        for message in batch {
            self.dispatch(client, message);
        }
        self.refresh_meta();
        self.flush_all();
        full
    }
}
