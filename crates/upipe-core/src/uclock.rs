//! Abstract monotonic / realtime time source.
//!
//! All timestamps in the pipeline are expressed in 27 MHz ticks (the
//! program-clock unit). A clock may additionally know how to map its ticks
//! to wall-clock time; sources that cannot answer return `Unhandled`.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use crate::error::{Error, Result};

/// Ticks per second of the program clock.
pub const UCLOCK_FREQ: u64 = 27_000_000;

/// Convert a [`Duration`] to 27 MHz ticks.
pub fn ticks_from_duration(d: Duration) -> u64 {
    d.as_secs() * UCLOCK_FREQ + u64::from(d.subsec_nanos()) * 27 / 1000
}

/// Convert 27 MHz ticks to a [`Duration`].
pub fn duration_from_ticks(ticks: u64) -> Duration {
    let secs = ticks / UCLOCK_FREQ;
    let rem = ticks % UCLOCK_FREQ;
    Duration::new(secs, (rem * 1000 / 27) as u32)
}

/// Abstract time source.
pub trait Uclock: Send + Sync {
    /// Current time in 27 MHz ticks. The origin is clock-specific; only
    /// differences are meaningful across calls on the same clock.
    fn now(&self) -> u64;

    /// Map a tick value from this clock to wall-clock time.
    fn to_real(&self, _ticks: u64) -> Result<SystemTime> {
        Err(Error::Unhandled)
    }

    /// Map wall-clock time to this clock's tick domain.
    fn from_real(&self, _real: SystemTime) -> Result<u64> {
        Err(Error::Unhandled)
    }
}

/// Shared clock handle.
pub type UclockRef = Arc<dyn Uclock>;

/// Standard clock backed by the OS monotonic clock, rebased to a
/// process-local epoch captured at construction.
pub struct UclockStd {
    epoch: Instant,
    epoch_real: SystemTime,
}

impl UclockStd {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            epoch: Instant::now(),
            epoch_real: SystemTime::now(),
        })
    }
}

impl Uclock for UclockStd {
    fn now(&self) -> u64 {
        ticks_from_duration(self.epoch.elapsed())
    }

    fn to_real(&self, ticks: u64) -> Result<SystemTime> {
        Ok(self.epoch_real + duration_from_ticks(ticks))
    }

    fn from_real(&self, real: SystemTime) -> Result<u64> {
        let since = real
            .duration_since(self.epoch_real)
            .map_err(|_| Error::Invalid)?;
        Ok(ticks_from_duration(since))
    }
}

/// Deterministic clock for tests: returns a manually advanced tick value.
pub struct UclockFixed {
    ticks: std::sync::atomic::AtomicU64,
}

impl UclockFixed {
    pub fn new(start: u64) -> Arc<Self> {
        Arc::new(Self {
            ticks: std::sync::atomic::AtomicU64::new(start),
        })
    }

    /// Advance the clock by `delta` ticks.
    pub fn advance(&self, delta: u64) {
        self.ticks
            .fetch_add(delta, std::sync::atomic::Ordering::Relaxed);
    }

    /// Set the absolute tick value.
    pub fn set(&self, ticks: u64) {
        self.ticks.store(ticks, std::sync::atomic::Ordering::Relaxed);
    }
}

impl Uclock for UclockFixed {
    fn now(&self) -> u64 {
        self.ticks.load(std::sync::atomic::Ordering::Relaxed)
    }
}
