//! Virtual clock for the timeline.
//!
//! Provides a pausable time source that is decoupled from wall time.
//! Wall time is read through a [`TimeSource`], so hosts and tests can
//! substitute a manually driven source for the system clock.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// A monotonic wall-time source read by the [`VirtualClock`].
pub trait TimeSource {
    /// Current wall time, measured from an arbitrary fixed origin.
    fn now(&self) -> Duration;
}

/// Wall time from the system's monotonic clock.
#[derive(Clone, Copy, Debug)]
pub struct SystemTimeSource {
    epoch: Instant,
}

impl SystemTimeSource {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for SystemTimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Duration {
        self.epoch.elapsed()
    }
}

/// A manually driven wall-time source.
///
/// Clones share the same time, so a test can keep one clone and hand the
/// other to a timeline.
#[derive(Clone, Debug, Default)]
pub struct ManualTimeSource {
    now: Rc<Cell<Duration>>,
}

impl ManualTimeSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the wall time. Moving backwards is ignored.
    pub fn set(&self, time: Duration) {
        if time > self.now.get() {
            self.now.set(time);
        }
    }

    /// Advance the wall time by `delta`.
    pub fn advance(&self, delta: Duration) {
        self.now.set(self.now.get() + delta);
    }

    /// Set the wall time in milliseconds.
    pub fn set_millis(&self, millis: u64) {
        self.set(Duration::from_millis(millis));
    }

    /// Advance the wall time by `millis` milliseconds.
    pub fn advance_millis(&self, millis: u64) {
        self.advance(Duration::from_millis(millis));
    }
}

impl TimeSource for ManualTimeSource {
    fn now(&self) -> Duration {
        self.now.get()
    }
}

/// A pausable virtual clock.
///
/// The clock can be:
/// - Paused/resumed, with paused wall time excluded from virtual time
/// - Reset to zero
///
/// `now()` never decreases while running and is frozen while paused.
pub struct VirtualClock {
    /// Wall-time source.
    source: Rc<dyn TimeSource>,
    /// Wall reading at the last reset.
    origin: Duration,
    /// Wall time accumulated while paused since the last reset.
    offset: Duration,
    /// Wall reading at the moment of pausing.
    paused_at: Option<Duration>,
}

impl VirtualClock {
    /// Create a clock reading the system's monotonic clock.
    pub fn new() -> Self {
        Self::with_source(Rc::new(SystemTimeSource::new()))
    }

    /// Create a clock reading `source`, starting at virtual zero.
    pub fn with_source(source: Rc<dyn TimeSource>) -> Self {
        let origin = source.now();
        Self {
            source,
            origin,
            offset: Duration::ZERO,
            paused_at: None,
        }
    }

    /// Current virtual time.
    pub fn now(&self) -> Duration {
        let wall = self.paused_at.unwrap_or_else(|| self.source.now());
        wall.saturating_sub(self.origin).saturating_sub(self.offset)
    }

    /// Freeze virtual time at its current value.
    pub fn pause(&mut self) {
        if self.paused_at.is_none() {
            self.paused_at = Some(self.source.now());
        }
    }

    /// Continue from the frozen value, excluding the paused wall time.
    pub fn resume(&mut self) {
        if let Some(paused_at) = self.paused_at.take() {
            self.offset += self.source.now().saturating_sub(paused_at);
        }
    }

    /// Return to virtual zero in the running state.
    pub fn reset(&mut self) {
        self.origin = self.source.now();
        self.offset = Duration::ZERO;
        self.paused_at = None;
    }

    /// Check if the clock is paused.
    pub fn is_paused(&self) -> bool {
        self.paused_at.is_some()
    }
}

impl Default for VirtualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for VirtualClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualClock")
            .field("now", &self.now())
            .field("offset", &self.offset)
            .field("paused", &self.is_paused())
            .finish()
    }
}
