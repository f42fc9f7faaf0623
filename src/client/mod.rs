//! Outbound sides of a client session.
//!
//! The broker talks to every session through the [`Outbound`] trait.
//! [`NetworkOutbound`] turns calls into WebSocket frames for a remote client,
//! [`LocalOutbound`] feeds the in-process subscriber queues.

pub mod local;
pub mod outbound;

pub use local::{LocalHub, LocalOutbound, SubscriberQueue, TopicValue};
pub use outbound::{NetworkOutbound, Outbound, PendingValues, ValueTarget};
