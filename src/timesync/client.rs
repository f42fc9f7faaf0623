use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::timesync::frame::{Frame, Ping};
use crate::utils::clock::Clock;
use crate::utils::error::Result;

/// Result of one ping/pong round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSyncSample {
    /// Microseconds to add to the client clock to get server time.
    pub offset: i64,
    pub rtt: u64,
}

/// Offset estimate for a ping sent at `t0` and answered at `t1` (client
/// clock) with `server_time`.
pub fn estimate_offset(t0: u64, t1: u64, server_time: u64) -> TimeSyncSample {
    let rtt = t1.saturating_sub(t0);
    let offset = server_time as i128 - (rtt / 2) as i128 - t0 as i128;
    TimeSyncSample {
        offset: offset as i64,
        rtt,
    }
}

pub struct TimeSyncClient {
    socket: UdpSocket,
    clock: Arc<dyn Clock>,
    interval: Duration,
    timeout: Duration,
}

impl TimeSyncClient {
    pub async fn connect(
        server: SocketAddr,
        clock: Arc<dyn Clock>,
        interval: Duration,
        timeout: Duration,
    ) -> Result<Self> {
        let local = if server.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(server).await?;
        Ok(Self {
            socket,
            clock,
            interval,
            timeout,
        })
    }

    /// Runs one round. `None` means no matching pong arrived in time.
    pub async fn sync_once(&self) -> Result<Option<TimeSyncSample>> {
        let t0 = self.clock.now_micros();
        self.socket.send(&Ping { client_time: t0 }.encode()).await?;

        let deadline = Instant::now() + self.timeout;
        let mut buf = [0u8; 64];
        loop {
            let len = match time::timeout_at(deadline, self.socket.recv(&mut buf)).await {
                Ok(received) => received?,
                Err(_) => return Ok(None),
            };
            match Frame::decode(&buf[..len]) {
                Ok(Frame::Pong(pong)) if pong.client_time == t0 => {
                    let t1 = self.clock.now_micros();
                    return Ok(Some(estimate_offset(t0, t1, pong.server_time)));
                }
                Ok(_) => debug!("ignoring stale time sync reply"),
                Err(e) => warn!("dropping time sync datagram: {}", e),
            }
        }
    }

    /// Runs rounds on a background task, publishing each new estimate.
    pub fn spawn(self) -> TimeSyncHandle {
        let (tx, rx) = watch::channel(None);
        let task = tokio::spawn(self.run(tx));
        TimeSyncHandle { rx, task }
    }

    async fn run(self, tx: watch::Sender<Option<TimeSyncSample>>) {
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match self.sync_once().await {
                Ok(Some(sample)) => {
                    debug!(offset = sample.offset, rtt = sample.rtt, "time sync sample");
                    tx.send_replace(Some(sample));
                }
                Ok(None) => warn!("time sync timed out"),
                Err(e) => warn!("time sync round failed: {}", e),
            }
            if tx.is_closed() {
                info!("time sync client stopped");
                break;
            }
        }
    }
}

/// Background time sync task; stopped when dropped.
pub struct TimeSyncHandle {
    rx: watch::Receiver<Option<TimeSyncSample>>,
    task: JoinHandle<()>,
}

impl TimeSyncHandle {
    pub fn latest(&self) -> Option<TimeSyncSample> {
        *self.rx.borrow()
    }

    pub fn offset(&self) -> Option<i64> {
        self.latest().map(|s| s.offset)
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<TimeSyncSample>> {
        self.rx.clone()
    }
}

impl Drop for TimeSyncHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
