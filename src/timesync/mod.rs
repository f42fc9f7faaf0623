//! UDP clock synchronization.
//!
//! A client sends a [`frame::Ping`] carrying its own time; the server answers
//! with a [`frame::Pong`] echoing that time plus its own. From the round trip
//! the client estimates `server_time - client_time`.

pub mod client;
pub mod frame;
pub mod server;

pub use client::{TimeSyncClient, TimeSyncHandle, TimeSyncSample, estimate_offset};
pub use frame::{Frame, Ping, Pong};
pub use server::TimeSyncServer;

#[cfg(test)]
mod tests;
