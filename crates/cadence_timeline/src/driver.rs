//! Frame drivers
//!
//! The timeline does not own a render loop. It asks a [`FrameDriver`] for one
//! pulse at a time and sweeps its active chains when the pulse arrives:
//!
//! - [`ManualFrameDriver`] - pulses delivered by the caller (tests, headless hosts)
//! - [`FrameLoop`] - a blocking loop that pulses at the configured frame rate

use crate::config::TimelineConfig;
use std::cell::RefCell;
use std::future::Future;
use std::pin::pin;
use std::rc::Rc;
use std::task::{Context, Poll};
use std::time::Instant;

/// Callback delivered by a frame driver on the next pulse
pub type FrameCallback = Box<dyn FnOnce()>;

/// Host facility that invokes a callback once per display refresh.
pub trait FrameDriver {
    /// Subscribe `callback` to the next pulse, replacing any pending one
    fn request_frame(&mut self, callback: FrameCallback);

    /// Drop the pending subscription, if any
    fn cancel_frame(&mut self);
}

/// Shared single-slot subscription used by the bundled drivers
type PendingFrame = Rc<RefCell<Option<FrameCallback>>>;

fn take_pending(pending: &PendingFrame) -> Option<FrameCallback> {
    // Release the borrow before running the callback; it re-subscribes.
    pending.borrow_mut().take()
}

/// A frame driver pulsed explicitly by its owner.
///
/// Clones share the subscription slot: hand one clone to the timeline and
/// keep another to deliver pulses.
///
/// ```
/// use cadence_timeline::{ManualFrameDriver, Timeline};
///
/// let driver = ManualFrameDriver::new();
/// let timeline = Timeline::new(driver.clone());
/// let (_done, _handle) = timeline.delay(std::time::Duration::ZERO).unwrap();
///
/// assert!(driver.is_subscribed());
/// assert!(driver.pulse());
/// assert!(!driver.is_subscribed());
/// ```
#[derive(Clone, Default)]
pub struct ManualFrameDriver {
    pending: PendingFrame,
}

impl ManualFrameDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver one pulse. Returns false if nothing was subscribed.
    pub fn pulse(&self) -> bool {
        match take_pending(&self.pending) {
            Some(callback) => {
                callback();
                true
            }
            None => false,
        }
    }

    /// Check whether a pulse is currently requested
    pub fn is_subscribed(&self) -> bool {
        self.pending.borrow().is_some()
    }
}

impl FrameDriver for ManualFrameDriver {
    fn request_frame(&mut self, callback: FrameCallback) {
        *self.pending.borrow_mut() = Some(callback);
    }

    fn cancel_frame(&mut self) {
        self.pending.borrow_mut().take();
    }
}

/// A blocking, single-threaded frame loop.
///
/// `block_on` polls a future and, between polls, fires the pending frame
/// subscription at the configured frame rate, sleeping the thread until the
/// next frame is due.
///
/// ```no_run
/// use cadence_timeline::{FrameLoop, Timeline, TimelineConfig};
///
/// let config = TimelineConfig::default().with_target_fps(60);
/// let frame_loop = FrameLoop::new(&config);
/// let timeline = Timeline::with_config(frame_loop.driver(), config);
///
/// let (done, _handle) = timeline.delay(std::time::Duration::from_millis(250)).unwrap();
/// frame_loop.block_on(done).unwrap().unwrap();
/// ```
pub struct FrameLoop {
    pending: PendingFrame,
    config: TimelineConfig,
}

impl FrameLoop {
    pub fn new(config: &TimelineConfig) -> Self {
        Self {
            pending: Rc::default(),
            config: config.clone(),
        }
    }

    /// A driver feeding this loop, for handing to a timeline
    pub fn driver(&self) -> FrameLoopDriver {
        FrameLoopDriver {
            pending: self.pending.clone(),
        }
    }

    /// Run frames until `future` resolves.
    ///
    /// Returns `None` if the future is still pending while no frame is
    /// subscribed, since nothing could wake it any more.
    pub fn block_on<F: Future>(&self, future: F) -> Option<F::Output> {
        let mut future = pin!(future);
        let mut cx = Context::from_waker(futures::task::noop_waker_ref());
        let interval = self.config.frame_interval();
        let mut next_frame = Instant::now();
        let mut frames = 0u64;

        loop {
            if let Poll::Ready(output) = future.as_mut().poll(&mut cx) {
                tracing::debug!(label = %self.config.label, frames, "frame loop finished");
                return Some(output);
            }

            let Some(callback) = take_pending(&self.pending) else {
                tracing::warn!(
                    label = %self.config.label,
                    frames,
                    "frame loop stalled: future pending with no frame subscribed"
                );
                return None;
            };

            let now = Instant::now();
            if next_frame > now {
                std::thread::sleep(next_frame - now);
            }
            next_frame = Instant::now() + interval;

            callback();
            frames += 1;
        }
    }
}

/// Frame driver handed out by [`FrameLoop::driver`]
#[derive(Clone)]
pub struct FrameLoopDriver {
    pending: PendingFrame,
}

impl FrameDriver for FrameLoopDriver {
    fn request_frame(&mut self, callback: FrameCallback) {
        *self.pending.borrow_mut() = Some(callback);
    }

    fn cancel_frame(&mut self) {
        self.pending.borrow_mut().take();
    }
}
