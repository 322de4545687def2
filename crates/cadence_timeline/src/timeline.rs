//! Timeline scheduler
//!
//! The timeline owns every chain node in an arena and keeps a doubly-linked
//! list of *active slots*, one per running chain. The list is threaded through
//! the nodes themselves: the occupant of a slot is the phase of that chain that
//! is currently running.
//!
//! Each frame pulse runs one sweep:
//!
//! 1. read the virtual clock once
//! 2. tick every occupant in list order, collecting the ones that finished
//! 3. after the pass, *promote* each finished occupant to its successor phase
//!    in place, or *retire* it if the chain is over
//!
//! Mutations are deferred to step 3 so the pass never walks links it has
//! just rewritten. When the list empties, the timeline cancels its frame
//! subscription and zeroes its clock.
//!
//! The clock, the config and the running/active counters live outside the
//! sweep's borrow, so effects can read them while they are being ticked.

use crate::chain::{ChainHandle, Completion, Phase};
use crate::clock::{SystemTimeSource, TimeSource, VirtualClock};
use crate::config::TimelineConfig;
use crate::driver::FrameDriver;
use crate::error::{Result, TimelineError};
use crate::node::{ChainNode, NodeId};
use crate::segment::Segment;
use slotmap::SlotMap;
use smallvec::SmallVec;
use std::cell::{Cell, Ref, RefCell, RefMut};
use std::rc::{Rc, Weak};
use std::time::Duration;

// ============================================================================
// Shared State
// ============================================================================

/// State readable without borrowing [`TimelineInner`]
struct Shared {
    clock: RefCell<VirtualClock>,
    config: TimelineConfig,
    /// Whether a frame subscription is mounted (or suspended by a pause)
    running: Cell<bool>,
    /// Number of occupied active slots
    active: Cell<usize>,
}

/// Internal state of the timeline
pub(crate) struct TimelineInner {
    nodes: SlotMap<NodeId, ChainNode>,
    /// Earliest-enqueued chain still running
    head: Option<NodeId>,
    /// Most recently enqueued chain
    tail: Option<NodeId>,
    shared: Rc<Shared>,
    driver: Box<dyn FrameDriver>,
    weak_self: Weak<RefCell<TimelineInner>>,
}

impl TimelineInner {
    // Never held across a callback; readers borrow it from effects.
    fn clock(&self) -> RefMut<'_, VirtualClock> {
        self.shared.clock.borrow_mut()
    }

    fn label(&self) -> &str {
        &self.shared.config.label
    }

    // ------------------------------------------------------------------------
    // Active-slot list
    // ------------------------------------------------------------------------

    /// Append `id` at the tail of the active-slot list
    fn link_tail(&mut self, id: NodeId) {
        let prev = self.tail;
        if let Some(node) = self.nodes.get_mut(id) {
            node.prev_active = prev;
            node.next_active = None;
            node.active = true;
        }
        match prev.and_then(|prev| self.nodes.get_mut(prev)) {
            Some(prev) => prev.next_active = Some(id),
            None => self.head = Some(id),
        }
        self.tail = Some(id);
        self.shared.active.set(self.shared.active.get() + 1);
    }

    /// Remove `id` from the active-slot list, if it occupies a slot
    fn unlink(&mut self, id: NodeId) {
        let Some(node) = self.nodes.get_mut(id) else {
            return;
        };
        if !node.active {
            return;
        }
        let (prev, next) = (node.prev_active.take(), node.next_active.take());
        node.active = false;
        self.shared.active.set(self.shared.active.get().saturating_sub(1));

        match prev.and_then(|prev| self.nodes.get_mut(prev)) {
            Some(prev) => prev.next_active = next,
            None => self.head = next,
        }
        match next.and_then(|next| self.nodes.get_mut(next)) {
            Some(next) => next.prev_active = prev,
            None => self.tail = prev,
        }
    }

    /// Move `id`'s slot to `successor`, keeping its position in the list
    fn promote(&mut self, id: NodeId, successor: NodeId) {
        let Some(node) = self.nodes.get_mut(id) else {
            return;
        };
        let (prev, next) = (node.prev_active.take(), node.next_active.take());
        node.active = false;

        if let Some(successor) = self.nodes.get_mut(successor) {
            successor.prev_active = prev;
            successor.next_active = next;
            successor.active = true;
        }
        match prev.and_then(|prev| self.nodes.get_mut(prev)) {
            Some(prev) => prev.next_active = Some(successor),
            None => self.head = Some(successor),
        }
        match next.and_then(|next| self.nodes.get_mut(next)) {
            Some(next) => next.prev_active = Some(successor),
            None => self.tail = Some(successor),
        }
    }

    /// Unlink `id` and take it out of the arena, firing its completion sender
    fn retire(&mut self, id: NodeId) {
        self.unlink(id);
        if let Some(node) = self.nodes.remove(id) {
            if let Some(sender) = node.on_completed {
                // The receiver may already be gone; nobody is waiting then.
                let _ = sender.send(Ok(()));
            }
        }
    }

    /// Iterate the occupants of the active-slot list, head first
    fn occupants(&self) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.head, move |id| {
            self.nodes.get(*id).and_then(|node| node.next_active)
        })
    }

    /// Iterate the static chain starting at `id`
    fn chain_from(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(Some(id), move |id| {
            self.nodes.get(*id).and_then(|node| node.next)
        })
        .take_while(move |id| self.nodes.contains_key(*id))
    }

    // ------------------------------------------------------------------------
    // Chains
    // ------------------------------------------------------------------------

    /// Build a chain from `segments` and give it an active slot
    fn enqueue(&mut self, segments: Vec<Segment>) -> (Completion, Rc<[Phase]>) {
        let statuses = ChainNode::statuses(&segments);
        let chain = statuses[0].clone();
        let (sender, completion) = Completion::channel();
        let mut sender = Some(sender);

        // Built back to front so every node knows its successor.
        let mut next = None;
        let mut phases = Vec::with_capacity(segments.len());
        for status in statuses.into_iter().rev() {
            let mut node = ChainNode::new(status.clone(), chain.clone(), next);
            node.on_completed = sender.take();
            let id = self.nodes.insert(node);
            phases.push(Phase { id, status });
            next = Some(id);
        }
        phases.reverse();

        self.link_tail(phases[0].id);
        tracing::trace!(label = %self.label(), phases = phases.len(), "chain enqueued");
        (completion, phases.into())
    }

    /// Finish a phase whose tick reported completion
    fn complete(&mut self, id: NodeId) {
        let Some(node) = self.nodes.get_mut(id) else {
            return;
        };
        if !node.status.mark_completed() {
            return;
        }

        if let Some(err) = node.failure.take() {
            self.fail_chain(id, err);
            return;
        }

        match node.next.filter(|next| self.nodes.contains_key(*next)) {
            Some(successor) => {
                self.promote(id, successor);
                if let Some(node) = self.nodes.remove(id) {
                    if let Some(sender) = node.on_completed {
                        let _ = sender.send(Ok(()));
                    }
                }
            }
            None => self.retire(id),
        }
    }

    /// Reject the chain through its terminal node and drop its unrun phases
    fn fail_chain(&mut self, id: NodeId, err: TimelineError) {
        let doomed: Vec<NodeId> = self.chain_from(id).collect();
        tracing::debug!(
            label = %self.label(),
            error = %err,
            skipped = doomed.len() - 1,
            "chain failed"
        );

        let terminal = doomed.last().copied().unwrap_or(id);
        if let Some(sender) = self
            .nodes
            .get_mut(terminal)
            .and_then(|node| node.on_completed.take())
        {
            let _ = sender.send(Err(err));
        }

        for id in doomed {
            self.unlink(id);
            self.nodes.remove(id);
        }
    }

    /// Revoke `phases` in chain order, resolving the chain's completion
    pub(crate) fn revoke_phases(&mut self, phases: &[Phase]) {
        let mut revoked = 0usize;
        for phase in phases {
            if !phase.status.mark_completed() {
                continue;
            }
            self.retire(phase.id);
            revoked += 1;
        }
        if revoked > 0 {
            tracing::debug!(label = %self.label(), revoked, "chain revoked");
        }
    }

    /// Revoke every phase from `id` to the end of its chain
    fn revoke_from(&mut self, id: NodeId) {
        let ids: Vec<NodeId> = self.chain_from(id).collect();
        for id in ids {
            if let Some(node) = self.nodes.get(id) {
                if node.status.mark_completed() {
                    self.retire(id);
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Sweep
    // ------------------------------------------------------------------------

    /// Tick every occupant, then apply completions and schedule the next pulse
    fn sweep(&mut self) {
        let now = {
            let clock = self.clock();
            if clock.is_paused() {
                return;
            }
            clock.now()
        };

        let mut finished: SmallVec<[NodeId; 8]> = SmallVec::new();
        let mut ticked = 0usize;
        let mut cursor = self.head;
        while let Some(id) = cursor {
            let Some(node) = self.nodes.get_mut(id) else {
                break;
            };
            cursor = node.next_active;
            ticked += 1;

            match node.tick(now) {
                Ok(true) => finished.push(id),
                Ok(false) => {}
                Err(err) => {
                    node.fail(err);
                    finished.push(id);
                }
            }
        }

        tracing::trace!(
            label = %self.label(),
            now_ms = now.as_secs_f64() * 1000.0,
            ticked,
            finished = finished.len(),
            "sweep"
        );

        for id in finished {
            self.complete(id);
        }

        if self.head.is_none() {
            self.go_idle();
        } else {
            self.request_frame();
        }
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    fn request_frame(&mut self) {
        let weak = self.weak_self.clone();
        self.driver.request_frame(Box::new(move || {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            // Bind the borrow so it is released before `inner` is dropped.
            let borrowed = inner.try_borrow_mut();
            match borrowed {
                Ok(mut inner) => inner.sweep(),
                Err(_) => tracing::warn!("frame pulse delivered during a sweep; ignored"),
            }
        }));
    }

    fn start(&mut self) {
        if self.shared.running.get() || self.clock().is_paused() {
            return;
        }
        tracing::debug!(label = %self.label(), "timeline started");
        self.clock().reset();
        self.shared.running.set(true);
        self.request_frame();
    }

    fn pause(&mut self) {
        let now = {
            let mut clock = self.clock();
            if clock.is_paused() {
                return;
            }
            clock.pause();
            clock.now()
        };
        tracing::debug!(label = %self.label(), ?now, "timeline paused");
        self.driver.cancel_frame();
    }

    fn resume(&mut self) {
        let now = {
            let mut clock = self.clock();
            if !clock.is_paused() {
                return;
            }
            clock.resume();
            clock.now()
        };
        tracing::debug!(label = %self.label(), ?now, "timeline resumed");
        if self.shared.running.get() {
            self.request_frame();
        } else if self.head.is_some() {
            // Chains enqueued while paused never started the timeline.
            self.start();
        }
    }

    /// Detach from the frame driver and return to time zero
    fn go_idle(&mut self) {
        tracing::debug!(label = %self.label(), "timeline idle");
        self.driver.cancel_frame();
        self.shared.running.set(false);
        self.shared.active.set(0);
        self.head = None;
        self.tail = None;
        self.nodes.clear();
        self.clock().reset();
    }

    fn reset(&mut self) {
        let occupants: Vec<NodeId> = self.occupants().collect();
        for id in occupants {
            self.revoke_from(id);
        }
        self.go_idle();
    }
}

// ============================================================================
// Timeline
// ============================================================================

/// Scheduler advancing animation chains against a shared virtual clock.
///
/// `Timeline` is a cheap, single-threaded handle; clones refer to the same
/// scheduler.
///
/// # Example
///
/// ```
/// use cadence_timeline::{ManualFrameDriver, ManualTimeSource, Segment, Timeline, TimelineConfig};
/// use std::rc::Rc;
///
/// let driver = ManualFrameDriver::new();
/// let time = ManualTimeSource::new();
/// let timeline =
///     Timeline::with_time_source(driver.clone(), TimelineConfig::default(), Rc::new(time.clone()));
///
/// let (mut done, handle) = timeline
///     .animate([Segment::millis(100), Segment::millis(100)])
///     .unwrap();
///
/// for _ in 0..4 {
///     time.advance_millis(100);
///     driver.pulse();
/// }
///
/// assert!(handle.completed());
/// assert!(matches!(done.try_take(), Some(Ok(()))));
/// ```
#[derive(Clone)]
pub struct Timeline {
    inner: Rc<RefCell<TimelineInner>>,
    shared: Rc<Shared>,
}

impl Timeline {
    /// Create a timeline on the system clock with the default config
    pub fn new(driver: impl FrameDriver + 'static) -> Self {
        Self::with_config(driver, TimelineConfig::default())
    }

    /// Create a timeline on the system clock
    pub fn with_config(driver: impl FrameDriver + 'static, config: TimelineConfig) -> Self {
        Self::with_time_source(driver, config, Rc::new(SystemTimeSource::new()))
    }

    /// Create a timeline reading wall time from `source`
    pub fn with_time_source(
        driver: impl FrameDriver + 'static,
        config: TimelineConfig,
        source: Rc<dyn TimeSource>,
    ) -> Self {
        let shared = Rc::new(Shared {
            clock: RefCell::new(VirtualClock::with_source(source)),
            config,
            running: Cell::new(false),
            active: Cell::new(0),
        });
        let inner = Rc::new_cyclic(|weak_self| {
            RefCell::new(TimelineInner {
                nodes: SlotMap::with_key(),
                head: None,
                tail: None,
                shared: shared.clone(),
                driver: Box::new(driver),
                weak_self: weak_self.clone(),
            })
        });
        Self { inner, shared }
    }

    fn inner_mut(&self, op: &'static str) -> Result<RefMut<'_, TimelineInner>> {
        self.inner.try_borrow_mut().map_err(|_| {
            tracing::warn!("Timeline::{op} called during a sweep");
            TimelineError::Reentrant(op)
        })
    }

    // =========================================================================
    // Chains
    // =========================================================================

    /// Enqueue a chain of phases that run one after another.
    ///
    /// Fails with [`TimelineError::EmptyChain`] if `segments` is empty. The
    /// returned [`Completion`] resolves when the last phase finishes or the
    /// chain is revoked, and rejects if any phase's callback fails.
    pub fn animate<I, S>(&self, segments: I) -> Result<(Completion, ChainHandle)>
    where
        I: IntoIterator<Item = S>,
        S: Into<Segment>,
    {
        let segments: Vec<Segment> = segments.into_iter().map(Into::into).collect();
        if segments.is_empty() {
            return Err(TimelineError::EmptyChain);
        }

        let mut inner = self.inner_mut("animate")?;
        let (completion, phases) = inner.enqueue(segments);
        if !self.shared.running.get() {
            inner.start();
        }
        Ok((completion, ChainHandle::new(Rc::downgrade(&self.inner), phases)))
    }

    /// Revoke the chain phase designated by `handle`.
    ///
    /// The phase is looked up among the current occupants of the active-slot
    /// list. With `deep`, the remaining phases of every running chain are
    /// searched as well. Returns false if the handle belongs to another
    /// timeline or its phase is not running here.
    pub fn revoke(&self, handle: &ChainHandle, deep: bool) -> bool {
        if !handle.belongs_to(&self.inner) {
            return false;
        }
        let Ok(mut inner) = self.inner_mut("revoke") else {
            return false;
        };

        let target = handle.id();
        let mut found = inner.occupants().any(|id| id == target);
        if !found && deep {
            found = inner
                .occupants()
                .any(|occupant| inner.chain_from(occupant).any(|id| id == target));
        }

        if found {
            inner.revoke_phases(handle.remaining());
        }
        found
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Run one sweep. Called by the frame driver on every pulse.
    pub fn poll(&self) {
        if let Ok(mut inner) = self.inner_mut("poll") {
            inner.sweep();
        }
    }

    /// Mount the frame subscription; no-op if running or paused
    pub fn start(&self) {
        if let Ok(mut inner) = self.inner_mut("start") {
            inner.start();
        }
    }

    /// Freeze the clock and drop the frame subscription; no-op if paused
    pub fn pause(&self) {
        if let Ok(mut inner) = self.inner_mut("pause") {
            inner.pause();
        }
    }

    /// Continue from where `pause` froze the clock; no-op unless paused
    pub fn resume(&self) {
        if let Ok(mut inner) = self.inner_mut("resume") {
            inner.resume();
        }
    }

    /// Revoke every running chain, detach, and return the clock to zero
    pub fn reset(&self) {
        if let Ok(mut inner) = self.inner_mut("reset") {
            tracing::debug!(label = %inner.label(), "timeline reset");
            inner.reset();
        }
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    // The readers below never touch the sweep's state and are safe to call
    // from effect and timing callbacks.

    /// Borrow the virtual clock
    ///
    /// # Panics
    ///
    /// Panics if `start`, `pause`, `resume` or `reset` is called while the
    /// returned borrow is alive.
    pub fn clock(&self) -> Ref<'_, VirtualClock> {
        self.shared.clock.borrow()
    }

    /// Current virtual time
    pub fn now(&self) -> Duration {
        self.clock().now()
    }

    pub fn is_paused(&self) -> bool {
        self.clock().is_paused()
    }

    /// Whether the timeline has chains to advance
    pub fn is_running(&self) -> bool {
        self.shared.running.get()
    }

    /// Number of chains currently occupying an active slot
    pub fn active_chains(&self) -> usize {
        self.shared.active.get()
    }

    pub fn config(&self) -> &TimelineConfig {
        &self.shared.config
    }
}

impl std::fmt::Debug for Timeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Timeline")
            .field("label", &self.shared.config.label)
            .field("running", &self.shared.running.get())
            .field("active_chains", &self.shared.active.get())
            .field("clock", &self.shared.clock)
            .finish()
    }
}
