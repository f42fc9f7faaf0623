use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::{Map, Value as Json};
use tokio::sync::{mpsc::UnboundedSender, watch};
use tracing::{debug, warn};
use tungstenite::protocol::Message as WsMessage;

use crate::broker::topic::{SendMode, TopicInfo};
use crate::broker::value::{TimestampedValue, ValueFrame, encode_value_frames};
use crate::transport::message::{ServerMessage, encode_text_frame};

/// Topic a value is delivered for, and which of the client's subscribers
/// asked for it.
#[derive(Debug, Clone, Copy)]
pub struct ValueTarget<'a> {
    pub id: i64,
    pub name: &'a str,
    pub subscribers: &'a BTreeSet<i64>,
}

/// Sink the broker writes a session's outgoing traffic to.
pub trait Outbound: Send {
    fn announce(&mut self, topic: &TopicInfo, pubuid: Option<i64>);

    /// Also drops any value of this topic that has not been sent yet.
    fn unannounce(&mut self, name: &str, id: i64);

    fn properties(&mut self, name: &str, update: &Map<String, Json>, ack: bool);

    /// Queues a value for the next periodic flush.
    fn send_value(&mut self, target: ValueTarget<'_>, value: &TimestampedValue, mode: SendMode);

    /// Sends values right away as one batch, bypassing the periodic flush.
    fn send_values_now(&mut self, values: &[(ValueTarget<'_>, &TimestampedValue)]);

    /// Writes out buffered control messages.
    fn flush(&mut self);

    fn set_period(&mut self, period: Option<Duration>);
}

/// Values waiting for the next periodic flush of one network client.
#[derive(Debug, Default)]
pub struct PendingValues {
    frames: Vec<ValueFrame>,
}

impl PendingValues {
    pub fn push(&mut self, frame: ValueFrame, mode: SendMode) {
        match mode {
            SendMode::Disabled => {}
            SendMode::All => self.frames.push(frame),
            SendMode::Normal => match self.frames.iter_mut().find(|f| f.id == frame.id) {
                Some(existing) => *existing = frame,
                None => self.frames.push(frame),
            },
        }
    }

    pub fn discard_topic(&mut self, id: i64) {
        self.frames.retain(|f| f.id != id);
    }

    pub fn take(&mut self) -> Vec<ValueFrame> {
        std::mem::take(&mut self.frames)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

pub(crate) fn lock_pending(pending: &Mutex<PendingValues>) -> std::sync::MutexGuard<'_, PendingValues> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Outbound side of a WebSocket client.
///
/// Control messages are buffered until [`Outbound::flush`] and are always
/// written before a value is queued. Writes to the socket channel happen with
/// the pending lock held so the periodic sender cannot slip a value in front
/// of an announce or behind an unannounce.
pub struct NetworkOutbound {
    tx: UnboundedSender<WsMessage>,
    pending: Arc<Mutex<PendingValues>>,
    period: watch::Sender<Option<Duration>>,
    control: Vec<ServerMessage>,
}

impl NetworkOutbound {
    pub fn new(
        tx: UnboundedSender<WsMessage>,
        pending: Arc<Mutex<PendingValues>>,
        period: watch::Sender<Option<Duration>>,
    ) -> Self {
        Self {
            tx,
            pending,
            period,
            control: Vec::new(),
        }
    }

    fn write_control(&mut self, _guard: &PendingValues) {
        if self.control.is_empty() {
            return;
        }
        match encode_text_frame(&self.control) {
            Ok(text) => {
                if self.tx.send(WsMessage::text(text)).is_err() {
                    debug!("client writer closed, dropping control messages");
                }
            }
            Err(e) => warn!("failed to encode control messages: {}", e),
        }
        self.control.clear();
    }
}

impl Outbound for NetworkOutbound {
    fn announce(&mut self, topic: &TopicInfo, pubuid: Option<i64>) {
        self.control.push(ServerMessage::announce(topic, pubuid));
    }

    fn unannounce(&mut self, name: &str, id: i64) {
        lock_pending(&self.pending).discard_topic(id);
        self.control.push(ServerMessage::Unannounce {
            name: name.to_string(),
            id,
        });
    }

    fn properties(&mut self, name: &str, update: &Map<String, Json>, ack: bool) {
        self.control.push(ServerMessage::Properties {
            name: name.to_string(),
            update: update.clone(),
            ack,
        });
    }

    fn send_value(&mut self, target: ValueTarget<'_>, value: &TimestampedValue, mode: SendMode) {
        let pending = Arc::clone(&self.pending);
        let mut guard = lock_pending(&pending);
        self.write_control(&guard);
        guard.push(
            ValueFrame {
                id: target.id,
                time: value.time,
                value: value.value.clone(),
            },
            mode,
        );
    }

    fn send_values_now(&mut self, values: &[(ValueTarget<'_>, &TimestampedValue)]) {
        let frames: Vec<ValueFrame> = values
            .iter()
            .map(|(target, value)| ValueFrame {
                id: target.id,
                time: value.time,
                value: value.value.clone(),
            })
            .collect();
        let pending = Arc::clone(&self.pending);
        let guard = lock_pending(&pending);
        self.write_control(&guard);
        match encode_value_frames(&frames) {
            Ok(bytes) => {
                if self.tx.send(WsMessage::binary(bytes)).is_err() {
                    debug!("client writer closed, dropping values");
                }
            }
            Err(e) => warn!("failed to encode values: {}", e),
        }
    }

    fn flush(&mut self) {
        if self.control.is_empty() {
            return;
        }
        let pending = Arc::clone(&self.pending);
        let guard = lock_pending(&pending);
        self.write_control(&guard);
    }

    fn set_period(&mut self, period: Option<Duration>) {
        self.period.send_replace(period);
    }
}
