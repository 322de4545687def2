//! Chain nodes
//!
//! A chain node is one instantiated, time-bound phase of a chain. Nodes live
//! in the timeline's arena and carry two kinds of links:
//!
//! - `next`: the following phase of the same chain, fixed when the chain is
//!   built and never changed afterwards
//! - `prev_active`/`next_active`: neighbours in the timeline's active-slot
//!   list, present only while the node is the occupant of its chain's slot
//!
//! The observable status of a phase lives in a shared [`PhaseStatus`] so that
//! chain handles can still read it after the node has left the arena.

use crate::error::TimelineError;
use crate::segment::{Effect, Segment, Timing};
use futures::channel::oneshot;
use slotmap::new_key_type;
use std::any::Any;
use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::time::Duration;

new_key_type! {
    /// Arena key of a chain node
    pub(crate) struct NodeId;
}

/// Sender half of a chain's completion signal
pub(crate) type CompletionSender = oneshot::Sender<Result<(), TimelineError>>;

/// Status of one phase, shared between its arena node and chain handles.
#[derive(Debug)]
pub(crate) struct PhaseStatus {
    pub(crate) duration: Duration,
    pub(crate) effect: Option<Effect>,
    pub(crate) timing: Option<Timing>,
    pub(crate) start_time: Cell<Option<Duration>>,
    /// Monotonic: set once, never cleared
    pub(crate) completed: Cell<bool>,
    pub(crate) errored: Cell<bool>,
}

impl PhaseStatus {
    fn new(segment: &Segment) -> Self {
        Self {
            duration: segment.duration,
            effect: segment.effect.clone(),
            timing: segment.timing.clone(),
            start_time: Cell::new(None),
            completed: Cell::new(false),
            errored: Cell::new(false),
        }
    }

    pub(crate) fn started(&self) -> bool {
        self.start_time.get().is_some()
    }

    /// Latch `completed`. Returns false if it was already set.
    pub(crate) fn mark_completed(&self) -> bool {
        !self.completed.replace(true)
    }
}

/// One phase of a chain, owned by the timeline's arena.
pub(crate) struct ChainNode {
    pub(crate) status: Rc<PhaseStatus>,
    /// Status of the chain's first phase, which reports errors for the whole chain
    pub(crate) chain: Rc<PhaseStatus>,
    pub(crate) next: Option<NodeId>,
    pub(crate) prev_active: Option<NodeId>,
    pub(crate) next_active: Option<NodeId>,
    pub(crate) active: bool,
    /// Present only on the chain's terminal node
    pub(crate) on_completed: Option<CompletionSender>,
    /// Failure caught during the last tick, waiting for `complete`
    pub(crate) failure: Option<TimelineError>,
}

impl ChainNode {
    /// Build the statuses for a chain's segments, first phase first.
    pub(crate) fn statuses(segments: &[Segment]) -> Vec<Rc<PhaseStatus>> {
        segments
            .iter()
            .map(|segment| Rc::new(PhaseStatus::new(segment)))
            .collect()
    }

    pub(crate) fn new(status: Rc<PhaseStatus>, chain: Rc<PhaseStatus>, next: Option<NodeId>) -> Self {
        Self {
            status,
            chain,
            next,
            prev_active: None,
            next_active: None,
            active: false,
            on_completed: None,
            failure: None,
        }
    }

    /// Advance the phase to virtual time `now`.
    ///
    /// Returns `Ok(true)` when the phase has reached its end (or was already
    /// done), `Ok(false)` while it is still running, and `Err` when the effect
    /// or timing callback failed.
    pub(crate) fn tick(&self, now: Duration) -> Result<bool, TimelineError> {
        let status = &self.status;
        if status.completed.get() || status.errored.get() {
            return Ok(true);
        }

        let start = match status.start_time.get() {
            Some(start) => start,
            None => {
                status.start_time.set(Some(now));
                now
            }
        };
        let raw = progress(now.saturating_sub(start), status.duration);

        let timing = status.timing.as_ref();
        let effect = status.effect.as_ref();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let applied = timing.map_or(raw, |timing| timing.apply(raw));
            match effect {
                Some(effect) => effect.call(applied, raw),
                None => Ok(()),
            }
        }));

        match outcome {
            Ok(Ok(())) => Ok(raw >= 1.0),
            Ok(Err(err)) => Err(TimelineError::Effect(err)),
            Err(payload) => Err(TimelineError::Panicked(panic_message(payload))),
        }
    }

    /// Record a failure caught during a tick.
    ///
    /// Flags this phase and the chain's first phase; the error itself is held
    /// until the node is completed.
    pub(crate) fn fail(&mut self, err: TimelineError) {
        self.status.errored.set(true);
        self.chain.errored.set(true);
        self.failure = Some(err);
    }
}

/// Raw progress of a phase, clamped to 0.0..=1.0.
///
/// A zero-length phase is complete as soon as it is ticked.
fn progress(elapsed: Duration, duration: Duration) -> f64 {
    if duration.is_zero() {
        return 1.0;
    }
    (elapsed.as_secs_f64() / duration.as_secs_f64()).clamp(0.0, 1.0)
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
