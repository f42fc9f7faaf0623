//! Microsecond clocks.
//!
//! Value timestamps and time-sync frames are expressed in microseconds of a
//! monotonic clock local to each process. The `Clock` trait lets the broker and
//! the time-sync endpoints be driven by a skewed clock in simulations.

use std::sync::Arc;
use std::time::Instant;

pub trait Clock: Send + Sync {
    /// Current time in microseconds.
    fn now_micros(&self) -> u64;
}

/// Monotonic clock counting from its own creation.
///
/// Starts at 1 so that a freshly stamped value is never confused with the
/// "unset" timestamp 0.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    epoch: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_micros(&self) -> u64 {
        self.epoch.elapsed().as_micros() as u64 + 1
    }
}

/// A clock that reads another clock shifted by a fixed offset.
#[derive(Clone)]
pub struct OffsetClock {
    inner: Arc<dyn Clock>,
    offset_micros: i64,
}

impl OffsetClock {
    pub fn new(inner: Arc<dyn Clock>, offset_micros: i64) -> Self {
        Self {
            inner,
            offset_micros,
        }
    }
}

impl Clock for OffsetClock {
    fn now_micros(&self) -> u64 {
        self.inner.now_micros().saturating_add_signed(self.offset_micros)
    }
}

impl std::fmt::Debug for OffsetClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OffsetClock")
            .field("offset_micros", &self.offset_micros)
            .finish()
    }
}
