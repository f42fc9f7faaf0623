//! The `transport` module is responsible for network communication with
//! clients over WebSockets.
//!
//! It defines the JSON control messages the server sends, the per-client
//! periodic value sender, and the WebSocket server itself: handshake, reader,
//! writer and hand-off of decoded messages to the storage task.

pub mod message;
pub mod sender;
pub mod websocket;
