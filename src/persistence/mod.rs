//! Storage of persistent topics across restarts.
//!
//! Topics whose `persistent` property is true are saved to an embedded `sled`
//! database and recreated when the instance starts.

pub mod sled_store;

pub use sled_store::{Persistence, StoredTopic};
