use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};

use crate::broker::subscriber::SubscribeOptions;
use crate::broker::value::TimestampedValue;

/// A request from a client to the broker.
///
/// Everything except `SetValue` arrives as a `{"method", "params"}` object in a
/// JSON text frame; values arrive in binary frames and are turned into
/// `SetValue` by the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "lowercase")]
pub enum ClientMessage {
    Publish {
        name: String,
        pubuid: i64,
        #[serde(rename = "type")]
        type_str: String,
        #[serde(default)]
        properties: Map<String, Json>,
    },
    Unpublish {
        pubuid: i64,
    },
    SetProperties {
        name: String,
        update: Map<String, Json>,
    },
    Subscribe {
        subuid: i64,
        topics: Vec<String>,
        #[serde(default)]
        options: SubscribeOptions,
    },
    Unsubscribe {
        subuid: i64,
    },
    #[serde(skip)]
    SetValue {
        pubuid: i64,
        value: TimestampedValue,
    },
}

impl ClientMessage {
    pub fn method(&self) -> &'static str {
        match self {
            ClientMessage::Publish { .. } => "publish",
            ClientMessage::Unpublish { .. } => "unpublish",
            ClientMessage::SetProperties { .. } => "setproperties",
            ClientMessage::Subscribe { .. } => "subscribe",
            ClientMessage::Unsubscribe { .. } => "unsubscribe",
            ClientMessage::SetValue { .. } => "setvalue",
        }
    }
}
