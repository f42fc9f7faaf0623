//! # nettables
//!
//! `nettables` is the synchronization core of a NetworkTables-style
//! publish/subscribe network: a server-owned topic registry shared by many
//! WebSocket clients, with per-client subscriptions, periodic batched value
//! delivery, `$` meta topics describing who publishes and subscribes what, and
//! a UDP protocol for aligning client and server clocks.
//!
//! ## Core Modules
//!
//! - `broker`: topics, client sessions, subscription matching and meta topics.
//! - `client`: the outbound side of a session, for network and in-process clients.
//! - `config`: layered configuration loading.
//! - `instance`: the storage task and the in-process publish/subscribe API.
//! - `persistence`: sled-backed storage of persistent topics.
//! - `timesync`: UDP ping/pong clock offset estimation.
//! - `transport`: the WebSocket server and its wire messages.
//! - `utils`: errors, logging and clocks.

pub mod broker;
pub mod client;
pub mod config;
pub mod instance;
pub mod persistence;
pub mod timesync;
pub mod transport;
pub mod utils;
