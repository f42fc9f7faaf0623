pub mod engine;
pub mod message;
pub mod meta;
pub mod session;
pub mod subscriber;
pub mod topic;
pub mod value;

pub use engine::Storage;

slotmap::new_key_type! {
    /// Arena key of a topic in [`Storage`].
    pub struct TopicId;
    /// Arena key of a connected client session.
    pub struct ClientId;
}

#[cfg(test)]
mod tests;
