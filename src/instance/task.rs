use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::broker::message::ClientMessage;
use crate::broker::topic::TopicInfo;
use crate::broker::{ClientId, Storage};
use crate::client::outbound::Outbound;
use crate::persistence::Persistence;
use crate::utils::error::{NtError, Result};

/// Requests handled by the storage task.
pub enum StorageCommand {
    Connect {
        name: String,
        conn_info: String,
        outbound: Box<dyn Outbound>,
        inbound: mpsc::Receiver<ClientMessage>,
        reply: oneshot::Sender<(ClientId, String)>,
    },
    /// The client's inbound queue has messages.
    Readable(ClientId),
    Disconnect(ClientId),
    /// A message from the in-process client.
    Local(ClientMessage),
    ListTopics(oneshot::Sender<Vec<TopicInfo>>),
    Shutdown,
}

/// Cloneable handle to the storage task.
#[derive(Debug, Clone)]
pub struct StorageHandle {
    tx: mpsc::UnboundedSender<StorageCommand>,
}

impl StorageHandle {
    pub(crate) fn new(tx: mpsc::UnboundedSender<StorageCommand>) -> Self {
        Self { tx }
    }

    fn send(&self, command: StorageCommand) -> Result<()> {
        self.tx.send(command).map_err(|_| NtError::ChannelClosed)
    }

    /// Registers a network client; returns its id and de-duplicated name.
    pub async fn connect(
        &self,
        name: String,
        conn_info: String,
        outbound: Box<dyn Outbound>,
        inbound: mpsc::Receiver<ClientMessage>,
    ) -> Result<(ClientId, String)> {
        let (reply, rx) = oneshot::channel();
        self.send(StorageCommand::Connect {
            name,
            conn_info,
            outbound,
            inbound,
            reply,
        })?;
        rx.await.map_err(|_| NtError::ChannelClosed)
    }

    pub fn readable(&self, client: ClientId) -> Result<()> {
        self.send(StorageCommand::Readable(client))
    }

    pub fn disconnect(&self, client: ClientId) {
        if self.send(StorageCommand::Disconnect(client)).is_err() {
            debug!("storage task gone, skipping disconnect");
        }
    }

    pub fn local(&self, message: ClientMessage) -> Result<()> {
        self.send(StorageCommand::Local(message))
    }

    pub async fn topics(&self) -> Result<Vec<TopicInfo>> {
        let (reply, rx) = oneshot::channel();
        self.send(StorageCommand::ListTopics(reply))?;
        rx.await.map_err(|_| NtError::ChannelClosed)
    }

    pub fn shutdown(&self) {
        let _ = self.send(StorageCommand::Shutdown);
    }
}

/// Owns the [`Storage`] and applies commands one at a time.
pub struct StorageTask {
    storage: Storage,
    local: ClientId,
    rx: mpsc::UnboundedReceiver<StorageCommand>,
    requeue: mpsc::WeakUnboundedSender<StorageCommand>,
    max_batch: usize,
    persistence: Option<Persistence>,
    save_interval: Duration,
}

impl StorageTask {
    pub fn new(
        storage: Storage,
        local: ClientId,
        rx: mpsc::UnboundedReceiver<StorageCommand>,
        requeue: mpsc::WeakUnboundedSender<StorageCommand>,
        max_batch: usize,
        persistence: Option<Persistence>,
        save_interval: Duration,
    ) -> Self {
        Self {
            storage,
            local,
            rx,
            requeue,
            max_batch: max_batch.max(1),
            persistence,
            save_interval: save_interval.max(Duration::from_millis(10)),
        }
    }

    pub async fn run(mut self) {
        let mut save_tick = tokio::time::interval(self.save_interval);
        loop {
            tokio::select! {
                command = self.rx.recv() => {
                    let Some(command) = command else { break };
                    if !self.handle(command) {
                        break;
                    }
                }
                _ = save_tick.tick() => self.save_persistent(),
            }
        }
        self.save_persistent();
        info!("storage task stopped");
    }

    /// Returns false when the task should stop.
    fn handle(&mut self, command: StorageCommand) -> bool {
        match command {
            StorageCommand::Connect {
                name,
                conn_info,
                outbound,
                inbound,
                reply,
            } => {
                let registered = self
                    .storage
                    .add_client(&name, &conn_info, false, outbound, Some(inbound));
                if let Err((client, _)) = reply.send(registered) {
                    warn!("connection went away during registration");
                    self.storage.remove_client(client);
                }
            }
            StorageCommand::Readable(client) => {
                if self.storage.process_incoming(client, self.max_batch) {
                    if let Some(tx) = self.requeue.upgrade() {
                        let _ = tx.send(StorageCommand::Readable(client));
                    }
                }
            }
            StorageCommand::Disconnect(client) => self.storage.remove_client(client),
            StorageCommand::Local(message) => self.storage.handle_message(self.local, message),
            StorageCommand::ListTopics(reply) => {
                let _ = reply.send(self.storage.list_topics());
            }
            StorageCommand::Shutdown => return false,
        }
        true
    }

    fn save_persistent(&mut self) {
        let Some(persistence) = &self.persistence else {
            return;
        };
        if !self.storage.take_persistent_changed() {
            return;
        }
        if let Err(e) = persistence.save_topics(&self.storage.persistent_topics()) {
            warn!("failed to save persistent topics: {}", e);
        }
    }
}
