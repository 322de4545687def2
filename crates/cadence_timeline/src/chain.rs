//! Chain handles and completion signals
//!
//! [`Timeline::animate`](crate::Timeline::animate) returns a [`Completion`]
//! future and a [`ChainHandle`]. The handle stays valid for the whole life of
//! the chain, even as the timeline moves the chain's active slot from phase to
//! phase, and keeps answering status queries after the chain has finished.

use crate::error::{Result, TimelineError};
use crate::node::{CompletionSender, NodeId, PhaseStatus};
use crate::segment::{Effect, Timing};
use crate::timeline::TimelineInner;
use futures::channel::oneshot;
use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

/// One entry of a chain's static phase list
#[derive(Clone, Debug)]
pub(crate) struct Phase {
    pub(crate) id: NodeId,
    pub(crate) status: Rc<PhaseStatus>,
}

/// Stable reference to a chain, or to one phase of it.
///
/// The handle returned by `animate` designates the chain's first phase and
/// reports for the whole chain: [`error`](Self::error) is true if *any* phase
/// failed. Handles for later phases are obtained with [`sub`](Self::sub).
#[derive(Clone)]
pub struct ChainHandle {
    timeline: Weak<RefCell<TimelineInner>>,
    phases: Rc<[Phase]>,
    index: usize,
}

impl ChainHandle {
    pub(crate) fn new(timeline: Weak<RefCell<TimelineInner>>, phases: Rc<[Phase]>) -> Self {
        Self {
            timeline,
            phases,
            index: 0,
        }
    }

    fn phase(&self) -> &Phase {
        &self.phases[self.index]
    }

    pub(crate) fn id(&self) -> NodeId {
        self.phase().id
    }

    /// This phase and every phase after it, in chain order
    pub(crate) fn remaining(&self) -> &[Phase] {
        &self.phases[self.index..]
    }

    pub(crate) fn belongs_to(&self, timeline: &Rc<RefCell<TimelineInner>>) -> bool {
        std::ptr::eq(self.timeline.as_ptr(), Rc::as_ptr(timeline))
    }

    /// Whether this phase has finished (normally, by failure, or by revoke)
    pub fn completed(&self) -> bool {
        self.phase().status.completed.get()
    }

    /// Whether this phase has been ticked at least once
    pub fn started(&self) -> bool {
        self.phase().status.started()
    }

    /// Virtual time of this phase's first tick
    pub fn start_time(&self) -> Option<Duration> {
        self.phase().status.start_time.get()
    }

    /// Whether this phase failed; for the chain handle, whether any phase failed
    pub fn error(&self) -> bool {
        self.phase().status.errored.get()
    }

    pub fn duration(&self) -> Duration {
        self.phase().status.duration
    }

    /// The phase's effect; clones share the closure with the running phase
    pub fn effect(&self) -> Option<Effect> {
        self.phase().status.effect.clone()
    }

    pub fn has_effect(&self) -> bool {
        self.phase().status.effect.is_some()
    }

    pub fn timing(&self) -> Option<Timing> {
        self.phase().status.timing.clone()
    }

    /// Position of this phase in its chain
    pub fn index(&self) -> usize {
        self.index
    }

    /// Number of phases in the whole chain
    pub fn len(&self) -> usize {
        self.phases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    /// Handle for the phase at `index` in the chain; `sub(0)` is the first phase
    pub fn sub(&self, index: usize) -> Option<ChainHandle> {
        (index < self.phases.len()).then(|| ChainHandle {
            timeline: self.timeline.clone(),
            phases: self.phases.clone(),
            index,
        })
    }

    /// Cancel this phase and every phase after it.
    ///
    /// The chain's completion resolves with `Ok(())`; a revoke is not a
    /// failure. Revoking an already finished chain does nothing. Returns false
    /// if the timeline is gone or is in the middle of a sweep.
    pub fn revoke(&self) -> bool {
        let Some(inner) = self.timeline.upgrade() else {
            return false;
        };
        let Ok(mut inner) = inner.try_borrow_mut() else {
            tracing::warn!("ChainHandle::revoke called during a sweep; ignored");
            return false;
        };
        inner.revoke_phases(self.remaining());
        true
    }
}

impl fmt::Debug for ChainHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainHandle")
            .field("index", &self.index)
            .field("len", &self.phases.len())
            .field("completed", &self.completed())
            .field("error", &self.error())
            .finish()
    }
}

/// Completion signal of a chain.
///
/// Resolves with `Ok(())` when the chain's last phase finishes or the chain is
/// revoked, and with the phase's error when an effect or timing callback fails.
#[must_use = "a chain's completion reports its failures"]
pub struct Completion {
    receiver: oneshot::Receiver<Result<()>>,
    /// Set once the outcome has been handed out
    taken: bool,
}

impl Completion {
    pub(crate) fn channel() -> (CompletionSender, Self) {
        let (sender, receiver) = oneshot::channel();
        (
            sender,
            Self {
                receiver,
                taken: false,
            },
        )
    }

    /// Take the outcome if the chain has already settled, without waiting.
    ///
    /// The outcome is delivered once; later calls return `None`.
    pub fn try_take(&mut self) -> Option<Result<()>> {
        if self.taken {
            return None;
        }
        let outcome = match self.receiver.try_recv() {
            Ok(outcome) => outcome,
            Err(oneshot::Canceled) => Some(Err(TimelineError::Dropped)),
        };
        self.taken = outcome.is_some();
        outcome
    }
}

impl Future for Completion {
    type Output = Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let outcome = match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(outcome)) => outcome,
            Poll::Ready(Err(oneshot::Canceled)) => Err(TimelineError::Dropped),
            Poll::Pending => return Poll::Pending,
        };
        self.taken = true;
        Poll::Ready(outcome)
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion").finish_non_exhaustive()
    }
}
