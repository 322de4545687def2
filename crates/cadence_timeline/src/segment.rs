//! Segment descriptions
//!
//! A [`Segment`] describes one phase of a chain: how long it lasts, what it
//! does with its progress, and how raw progress is reshaped before the effect
//! sees it. Segments are accepted in several forms through `Into<Segment>`:
//!
//! - a [`Segment`] built with its builder methods
//! - a tuple `(duration, effect)` or `(duration, effect, timing)`
//! - a bare duration (`u64` milliseconds or [`Duration`]) with no effect

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

/// Callback signature of an effect: `(applied_progress, raw_progress)`
pub type EffectFn = dyn FnMut(f64, f64) -> anyhow::Result<()>;

/// A caller-owned side effect invoked once per tick of a phase.
///
/// Clones share the same closure, so the same effect can drive several
/// phases (see [`Timeline::repeat`](crate::Timeline::repeat)).
#[derive(Clone)]
pub struct Effect(Rc<RefCell<EffectFn>>);

impl Effect {
    /// Wrap a fallible effect. Returning `Err` fails the chain.
    pub fn new<F>(f: F) -> Self
    where
        F: FnMut(f64, f64) -> anyhow::Result<()> + 'static,
    {
        Self(Rc::new(RefCell::new(f)))
    }

    /// Wrap an effect that cannot fail
    pub fn infallible<F>(mut f: F) -> Self
    where
        F: FnMut(f64, f64) + 'static,
    {
        Self::new(move |applied, raw| {
            f(applied, raw);
            Ok(())
        })
    }

    pub(crate) fn call(&self, applied: f64, raw: f64) -> anyhow::Result<()> {
        (self.0.borrow_mut())(applied, raw)
    }
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Effect(..)")
    }
}

/// A pure transform from raw progress (0.0 to 1.0) to applied progress.
#[derive(Clone)]
pub struct Timing(Rc<dyn Fn(f64) -> f64>);

impl Timing {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(f64) -> f64 + 'static,
    {
        Self(Rc::new(f))
    }

    /// Apply the transform to a raw progress value
    pub fn apply(&self, raw: f64) -> f64 {
        (self.0)(raw)
    }
}

impl fmt::Debug for Timing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Timing(..)")
    }
}

/// One phase of an animation chain.
#[derive(Clone, Debug)]
pub struct Segment {
    /// How long the phase runs in virtual time
    pub duration: Duration,
    /// Called with `(applied, raw)` progress on every tick
    pub effect: Option<Effect>,
    /// Reshapes raw progress before it reaches the effect
    pub timing: Option<Timing>,
}

impl Segment {
    /// A phase of the given duration with no effect
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            effect: None,
            timing: None,
        }
    }

    /// A phase lasting `millis` milliseconds with no effect
    pub fn millis(millis: u64) -> Self {
        Self::new(Duration::from_millis(millis))
    }

    /// Builder: set a fallible effect
    pub fn effect<F>(mut self, f: F) -> Self
    where
        F: FnMut(f64, f64) -> anyhow::Result<()> + 'static,
    {
        self.effect = Some(Effect::new(f));
        self
    }

    /// Builder: set a shared effect
    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effect = Some(effect);
        self
    }

    /// Builder: set the timing transform
    pub fn timing<F>(mut self, f: F) -> Self
    where
        F: Fn(f64) -> f64 + 'static,
    {
        self.timing = Some(Timing::new(f));
        self
    }

    /// Builder: set a shared timing transform
    pub fn with_timing(mut self, timing: Timing) -> Self {
        self.timing = Some(timing);
        self
    }
}

impl From<Duration> for Segment {
    fn from(duration: Duration) -> Self {
        Segment::new(duration)
    }
}

impl From<u64> for Segment {
    fn from(millis: u64) -> Self {
        Segment::millis(millis)
    }
}

impl From<(Duration, Effect)> for Segment {
    fn from((duration, effect): (Duration, Effect)) -> Self {
        Segment::new(duration).with_effect(effect)
    }
}

impl From<(u64, Effect)> for Segment {
    fn from((millis, effect): (u64, Effect)) -> Self {
        Segment::millis(millis).with_effect(effect)
    }
}

impl From<(Duration, Effect, Timing)> for Segment {
    fn from((duration, effect, timing): (Duration, Effect, Timing)) -> Self {
        Segment::new(duration).with_effect(effect).with_timing(timing)
    }
}

impl From<(u64, Effect, Timing)> for Segment {
    fn from((millis, effect, timing): (u64, Effect, Timing)) -> Self {
        Segment::millis(millis)
            .with_effect(effect)
            .with_timing(timing)
    }
}
