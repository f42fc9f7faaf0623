//! WebSocket transport
//!
//! Accepts NT4-style WebSocket connections on `/nt/<client-name>` and bridges
//! each one to the storage task:
//! - a reader decodes text and binary frames into a bounded inbound queue and
//!   tells the storage task the client is readable
//! - a writer drains the client's outgoing channel into the socket
//! - a periodic sender flushes queued values once per negotiated period
//!
//! RTT pings (binary frames with id -1) are answered by the reader directly.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::{SinkExt, Stream, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::spawn;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio_tungstenite::accept_hdr_async;
use tracing::{debug, info, warn};
use tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tungstenite::http::HeaderValue;
use tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tungstenite::protocol::Message as WsMessage;

use crate::broker::ClientId;
use crate::broker::message::ClientMessage;
use crate::broker::value::{TimestampedValue, ValueFrame, decode_value_frames, encode_value_frames};
use crate::client::outbound::{NetworkOutbound, PendingValues};
use crate::config::Settings;
use crate::instance::StorageHandle;
use crate::transport::message::decode_text_frame;
use crate::transport::sender::run_periodic_sender;
use crate::utils::clock::Clock;
use crate::utils::error::Result;

/// Subprotocols accepted during the handshake, preferred first.
pub const SUBPROTOCOLS: [&str; 2] = [
    "v4.1.networktables.first.wpi.edu",
    "networktables.first.wpi.edu",
];

/// Path prefix of client connections.
pub const PATH_PREFIX: &str = "/nt/";

/// Pubuid that marks an RTT ping in a binary frame.
pub const RTT_PING_ID: i64 = -1;

/// Client name carried in a request path such as `/nt/dashboard`.
pub fn client_name_from_path(path: &str) -> String {
    path.strip_prefix(PATH_PREFIX).unwrap_or_default().to_string()
}

/// Picks the first offered subprotocol the server supports.
pub fn select_subprotocol(offered: &str) -> Option<&'static str> {
    let offered: Vec<&str> = offered.split(',').map(str::trim).collect();
    SUBPROTOCOLS
        .iter()
        .copied()
        .find(|supported| offered.contains(supported))
}

pub async fn start_websocket_server(
    addr: String,
    storage: StorageHandle,
    clock: Arc<dyn Clock>,
    settings: Settings,
) -> Result<()> {
    let listener = TcpListener::bind(&addr).await?;
    serve(listener, storage, clock, settings).await
}

/// Accepts connections on `listener` until it fails.
pub async fn serve(
    listener: TcpListener,
    storage: StorageHandle,
    clock: Arc<dyn Clock>,
    settings: Settings,
) -> Result<()> {
    info!("WebSocket server listening on ws://{}", listener.local_addr()?);
    let settings = Arc::new(settings);
    let connections = Arc::new(AtomicUsize::new(0));

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("failed to accept connection: {}", e);
                continue;
            }
        };

        if connections.load(Ordering::SeqCst) >= settings.broker.max_connections {
            warn!(%peer, "connection limit reached, rejecting client");
            drop(stream);
            continue;
        }
        connections.fetch_add(1, Ordering::SeqCst);

        let storage = storage.clone();
        let clock = Arc::clone(&clock);
        let settings = Arc::clone(&settings);
        let connections = Arc::clone(&connections);
        spawn(async move {
            if let Err(e) = handle_connection(stream, peer, storage, clock, settings).await {
                warn!(%peer, "connection ended with error: {}", e);
            }
            connections.fetch_sub(1, Ordering::SeqCst);
        });
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    storage: StorageHandle,
    clock: Arc<dyn Clock>,
    settings: Arc<Settings>,
) -> Result<()> {
    let mut path = String::new();
    let ws_stream = accept_hdr_async(
        stream,
        |request: &Request, mut response: Response| -> std::result::Result<Response, ErrorResponse> {
            path = request.uri().path().to_string();
            let offered = request
                .headers()
                .get(SEC_WEBSOCKET_PROTOCOL)
                .and_then(|v| v.to_str().ok());
            if let Some(protocol) = offered.and_then(select_subprotocol) {
                response
                    .headers_mut()
                    .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(protocol));
            }
            Ok(response)
        },
    )
    .await?;

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();
    let (inbound_tx, inbound_rx) =
        mpsc::channel::<ClientMessage>(settings.broker.inbound_queue_capacity.max(1));
    let pending = Arc::new(Mutex::new(PendingValues::default()));
    let (period_tx, period_rx) = watch::channel(None);

    let outbound = NetworkOutbound::new(tx.clone(), Arc::clone(&pending), period_tx);
    let (client_id, name) = storage
        .connect(
            client_name_from_path(&path),
            peer.to_string(),
            Box::new(outbound),
            inbound_rx,
        )
        .await?;

    {
        let name = name.clone();
        spawn(async move {
            while let Some(msg) = rx.recv().await {
                if let Err(e) = ws_sender.send(msg).await {
                    warn!(client = %name, "failed to send message: {}", e);
                    break;
                }
            }
            let _ = ws_sender.close().await;
            debug!(client = %name, "send loop closed");
        });
    }
    spawn(run_periodic_sender(pending, tx.clone(), period_rx));

    let reader = Reader {
        client_id,
        name: &name,
        storage: &storage,
        inbound: &inbound_tx,
        tx: &tx,
        clock: clock.as_ref(),
    };
    let result = reader.run(&mut ws_receiver).await;

    storage.disconnect(client_id);
    info!(client = %name, %peer, "connection closed");
    result
}

struct Reader<'a> {
    client_id: ClientId,
    name: &'a str,
    storage: &'a StorageHandle,
    inbound: &'a mpsc::Sender<ClientMessage>,
    tx: &'a mpsc::UnboundedSender<WsMessage>,
    clock: &'a dyn Clock,
}

impl Reader<'_> {
    async fn run<S>(&self, ws_receiver: &mut S) -> Result<()>
    where
        S: Stream<Item = std::result::Result<WsMessage, tungstenite::Error>> + Unpin,
    {
        while let Some(frame) = ws_receiver.next().await {
            let messages = match frame? {
                WsMessage::Text(text) => decode_text_frame(text.as_str()),
                WsMessage::Binary(data) => self.decode_values(&data),
                WsMessage::Close(_) => break,
                _ => continue,
            };
            if messages.is_empty() {
                continue;
            }
            for message in messages {
                if !self.enqueue(message).await {
                    return Ok(());
                }
            }
            if self.storage.readable(self.client_id).is_err() {
                return Ok(());
            }
        }
        Ok(())
    }

    /// Turns value frames into `SetValue` messages; RTT pings are answered
    /// here.
    fn decode_values(&self, data: &[u8]) -> Vec<ClientMessage> {
        let frames = match decode_value_frames(data) {
            Ok(frames) => frames,
            Err(e) => {
                warn!(client = %self.name, "dropping binary frame: {}", e);
                return Vec::new();
            }
        };

        let mut messages = Vec::with_capacity(frames.len());
        for frame in frames {
            if frame.id == RTT_PING_ID {
                self.answer_ping(frame);
                continue;
            }
            messages.push(ClientMessage::SetValue {
                pubuid: frame.id,
                value: TimestampedValue::new(frame.value, frame.time),
            });
        }
        messages
    }

    fn answer_ping(&self, ping: ValueFrame) {
        let pong = ValueFrame {
            id: RTT_PING_ID,
            time: self.clock.now_micros() as i64,
            value: ping.value,
        };
        match encode_value_frames(&[pong]) {
            Ok(bytes) => {
                let _ = self.tx.send(WsMessage::binary(bytes));
            }
            Err(e) => warn!(client = %self.name, "failed to encode RTT reply: {}", e),
        }
    }

    /// Queues a message for the storage task. A full queue pauses reading
    /// until the storage task catches up. Returns false once the session is
    /// gone.
    async fn enqueue(&self, message: ClientMessage) -> bool {
        match self.inbound.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(message)) => {
                warn!(client = %self.name, "inbound queue full, pausing reads");
                if self.storage.readable(self.client_id).is_err() {
                    return false;
                }
                self.inbound.send(message).await.is_ok()
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}
