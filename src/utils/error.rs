//! The `error` module defines the error type used within `nettables`.
//!
//! Only operations that can genuinely fail (binding sockets, decoding frames,
//! loading configuration, talking to the persistence store) return `Result`.
//! Protocol and referential problems raised by a single client are logged and
//! dropped by the broker instead of being surfaced as errors.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum NtError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("MessagePack encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("MessagePack decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] sled::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Unsupported time sync version: {0}")]
    UnsupportedVersion(u8),

    #[error("Storage task is no longer running")]
    ChannelClosed,
}

pub type Result<T> = std::result::Result<T, NtError>;
