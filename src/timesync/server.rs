use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use crate::timesync::frame::{Frame, PONG_LEN, Pong};
use crate::utils::clock::Clock;
use crate::utils::error::Result;

/// Answers time sync pings with the server clock.
pub struct TimeSyncServer {
    socket: UdpSocket,
    clock: Arc<dyn Clock>,
}

impl TimeSyncServer {
    pub async fn bind(addr: &str, clock: Arc<dyn Clock>) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self { socket, clock })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// The reply to one datagram, or `None` if it is not a valid ping.
    pub fn respond(&self, data: &[u8]) -> Option<[u8; PONG_LEN]> {
        match Frame::decode(data) {
            Ok(Frame::Ping(ping)) => Some(
                Pong {
                    client_time: ping.client_time,
                    server_time: self.clock.now_micros(),
                }
                .encode(),
            ),
            Ok(Frame::Pong(_)) => {
                warn!("dropping unexpected pong");
                None
            }
            Err(e) => {
                warn!("dropping time sync datagram: {}", e);
                None
            }
        }
    }

    pub async fn run(self) -> Result<()> {
        info!("time sync server listening on udp://{}", self.local_addr()?);
        let mut buf = [0u8; 64];
        loop {
            let (len, peer) = match self.socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(e) => {
                    warn!("time sync receive failed: {}", e);
                    continue;
                }
            };
            let Some(reply) = self.respond(&buf[..len]) else {
                continue;
            };
            if let Err(e) = self.socket.send_to(&reply, peer).await {
                warn!(%peer, "failed to send pong: {}", e);
            } else {
                debug!(%peer, "pong sent");
            }
        }
    }
}
