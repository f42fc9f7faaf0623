use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc::UnboundedSender, watch};
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, warn};
use tungstenite::protocol::Message as WsMessage;

use crate::broker::value::encode_value_frames;
use crate::client::outbound::{PendingValues, lock_pending};

/// Period used before the client has any subscriber.
pub const IDLE_PERIOD: Duration = Duration::from_millis(100);

/// Sends all pending values as one binary frame. Returns false once the
/// client's writer is gone.
pub fn flush_pending(pending: &Mutex<PendingValues>, tx: &UnboundedSender<WsMessage>) -> bool {
    let mut guard = lock_pending(pending);
    if guard.is_empty() {
        return !tx.is_closed();
    }
    let frames = guard.take();
    match encode_value_frames(&frames) {
        Ok(bytes) => tx.send(WsMessage::binary(bytes)).is_ok(),
        Err(e) => {
            warn!("failed to encode {} values: {}", frames.len(), e);
            true
        }
    }
}

/// Flushes a client's pending values once per negotiated period until the
/// session is gone.
pub async fn run_periodic_sender(
    pending: Arc<Mutex<PendingValues>>,
    tx: UnboundedSender<WsMessage>,
    mut period: watch::Receiver<Option<Duration>>,
) {
    let mut current = (*period.borrow_and_update()).unwrap_or(IDLE_PERIOD);
    let mut ticker = time::interval(current);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if !flush_pending(&pending, &tx) {
                    break;
                }
            }
            changed = period.changed() => {
                if changed.is_err() {
                    flush_pending(&pending, &tx);
                    break;
                }
                let next = (*period.borrow_and_update()).unwrap_or(IDLE_PERIOD);
                if next != current {
                    debug!(?next, "send period changed");
                    current = next;
                    ticker = time::interval(current);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                }
            }
        }
    }
}
