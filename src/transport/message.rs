use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};
use tracing::warn;

use crate::broker::message::ClientMessage;
use crate::broker::topic::TopicInfo;
use crate::utils::error::Result;

/// Control messages sent from the server to a client in JSON text frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "lowercase")]
pub enum ServerMessage {
    Announce {
        name: String,
        id: i64,
        #[serde(rename = "type")]
        type_str: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pubuid: Option<i64>,
        properties: Map<String, Json>,
    },
    Unannounce {
        name: String,
        id: i64,
    },
    Properties {
        name: String,
        update: Map<String, Json>,
        ack: bool,
    },
}

impl ServerMessage {
    pub fn announce(topic: &TopicInfo, pubuid: Option<i64>) -> Self {
        ServerMessage::Announce {
            name: topic.name.clone(),
            id: topic.id,
            type_str: topic.type_str.clone(),
            pubuid,
            properties: topic.properties.clone(),
        }
    }
}

pub fn encode_text_frame(messages: &[ServerMessage]) -> Result<String> {
    Ok(serde_json::to_string(messages)?)
}

/// Parses a client text frame.
///
/// Malformed entries are logged and skipped; the rest of the frame is kept.
pub fn decode_text_frame(text: &str) -> Vec<ClientMessage> {
    let items = match serde_json::from_str::<Json>(text) {
        Ok(Json::Array(items)) => items,
        Ok(_) => {
            warn!("dropping text frame: expected a JSON array");
            return Vec::new();
        }
        Err(e) => {
            warn!("dropping text frame: {}", e);
            return Vec::new();
        }
    };

    items
        .into_iter()
        .enumerate()
        .filter_map(|(index, item)| match serde_json::from_value::<ClientMessage>(item) {
            Ok(msg) => Some(msg),
            Err(e) => {
                warn!("dropping message {} of text frame: {}", index, e);
                None
            }
        })
        .collect()
}
