//! Combinators built on top of [`Timeline::animate`]

use crate::chain::{ChainHandle, Completion};
use crate::error::{Result, TimelineError};
use crate::segment::Segment;
use crate::timeline::Timeline;
use futures::future::{join_all, LocalBoxFuture};
use futures::FutureExt;
use std::cell::Cell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};
use std::time::Duration;

impl Timeline {
    /// A chain with a single phase that does nothing for `duration`
    pub fn delay(&self, duration: Duration) -> Result<(Completion, ChainHandle)> {
        self.animate([duration])
    }

    /// One chain running `segments` back to back, `times` times over.
    ///
    /// The copies share their effects, and the single completion resolves
    /// only after all `times * segments.len()` phases have run in order.
    pub fn repeat<I, S>(&self, times: usize, segments: I) -> Result<(Completion, ChainHandle)>
    where
        I: IntoIterator<Item = S>,
        S: Into<Segment>,
    {
        let round: Vec<Segment> = segments.into_iter().map(Into::into).collect();
        if times == 0 || round.is_empty() {
            return Err(TimelineError::EmptyChain);
        }
        let mut all = Vec::with_capacity(times * round.len());
        for _ in 0..times {
            all.extend(round.iter().cloned());
        }
        self.animate(all)
    }

    /// Run rounds of animations until stopped.
    ///
    /// `round` is called with this timeline and returns the completions of
    /// the animations it started; the next round begins once all of them have
    /// resolved. [`Looping::stop`] ends the loop after the round in flight.
    /// The loop resolves with the first error a round reports, and ends on its
    /// own if a round starts nothing.
    pub fn looping<F, R>(&self, mut round: F) -> Looping
    where
        F: FnMut(&Timeline) -> Result<R> + 'static,
        R: IntoIterator<Item = Completion> + 'static,
    {
        let stopped = Rc::new(Cell::new(false));
        let timeline = self.clone();
        let label = self.config().label.clone();
        let flag = stopped.clone();

        let future = async move {
            let mut rounds = 0u64;
            while !flag.get() {
                let pending: Vec<Completion> = round(&timeline)?.into_iter().collect();
                if pending.is_empty() {
                    tracing::warn!(
                        label = %label,
                        rounds,
                        "loop round started no animations; ending loop"
                    );
                    break;
                }
                for outcome in join_all(pending).await {
                    outcome?;
                }
                rounds += 1;
            }
            tracing::debug!(label = %label, rounds, "loop finished");
            Ok::<(), TimelineError>(())
        }
        .boxed_local();

        Looping { future, stopped }
    }

    /// Bind `f` to this timeline for later calls
    pub fn define<F, R>(&self, f: F) -> impl Fn() -> R
    where
        F: Fn(&Timeline) -> R,
    {
        let timeline = self.clone();
        move || f(&timeline)
    }

    /// Call `f` with this timeline right away
    pub fn once<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&Timeline) -> R,
    {
        f(self)
    }
}

/// Future returned by [`Timeline::looping`].
///
/// Resolves with `Ok(())` once stopped, or with the error of a failed round.
#[must_use = "a loop does nothing unless polled"]
pub struct Looping {
    future: LocalBoxFuture<'static, Result<()>>,
    stopped: Rc<Cell<bool>>,
}

impl Looping {
    /// Stop after the round in flight finishes
    pub fn stop(&self) {
        self.stopped.set(true);
    }

    /// A handle that can stop the loop from elsewhere
    pub fn stopper(&self) -> LoopStopper {
        LoopStopper {
            stopped: self.stopped.clone(),
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.get()
    }
}

impl Future for Looping {
    type Output = Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.future.as_mut().poll(cx)
    }
}

impl fmt::Debug for Looping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Looping")
            .field("stopped", &self.stopped.get())
            .finish_non_exhaustive()
    }
}

/// Detached stop switch of a [`Looping`]
#[derive(Clone, Debug)]
pub struct LoopStopper {
    stopped: Rc<Cell<bool>>,
}

impl LoopStopper {
    pub fn stop(&self) {
        self.stopped.set(true);
    }
}
