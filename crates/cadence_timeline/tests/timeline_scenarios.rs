//! End-to-end scenarios for the timeline
//!
//! These tests drive a timeline with a manual frame driver and a manual
//! wall-time source, and verify that:
//! - Chains take as long as their phases add up to
//! - Pausing never eats into in-flight progress
//! - Revokes resolve and failures reject, without touching sibling chains
//! - `repeat` behaves like the equivalent hand-written chain

use cadence_timeline::{
    ChainHandle, Completion, Effect, FrameLoop, LoopStopper, ManualFrameDriver, ManualTimeSource,
    Segment, TimeSource, Timeline, TimelineConfig, TimelineError, Timing,
};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

struct Rig {
    timeline: Timeline,
    driver: ManualFrameDriver,
    time: ManualTimeSource,
}

impl Rig {
    fn new() -> Self {
        init_tracing();
        let driver = ManualFrameDriver::new();
        let time = ManualTimeSource::new();
        let timeline = Timeline::with_time_source(
            driver.clone(),
            TimelineConfig::default().with_label("scenario"),
            Rc::new(time.clone()),
        );
        Self {
            timeline,
            driver,
            time,
        }
    }

    /// Advance wall time and deliver one pulse
    fn frame(&self, advance_ms: u64) {
        self.time.advance_millis(advance_ms);
        self.driver.pulse();
    }

    /// Pulse every `step_ms` until `done` settles; returns the outcome and
    /// the wall time it settled at
    fn run(&self, done: &mut Completion, step_ms: u64) -> (Result<(), TimelineError>, Duration) {
        self.driver.pulse();
        for _ in 0..10_000 {
            if let Some(outcome) = done.try_take() {
                return (outcome, self.time.now());
            }
            self.frame(step_ms);
        }
        panic!("chain never settled");
    }
}

fn counter() -> (Rc<Cell<u32>>, Effect) {
    let calls = Rc::new(Cell::new(0));
    let calls_clone = calls.clone();
    let effect = Effect::infallible(move |_, _| calls_clone.set(calls_clone.get() + 1));
    (calls, effect)
}

fn recorder() -> (Rc<RefCell<Vec<(f64, f64)>>>, Effect) {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let seen_clone = seen.clone();
    let effect = Effect::infallible(move |applied, raw| seen_clone.borrow_mut().push((applied, raw)));
    (seen, effect)
}

fn reverse_linear(t: f64) -> f64 {
    1.0 - t
}

fn ease_bounce(t: f64) -> f64 {
    const N1: f64 = 7.5625;
    const D1: f64 = 2.75;
    if t < 1.0 / D1 {
        N1 * t * t
    } else if t < 2.0 / D1 {
        let t = t - 1.5 / D1;
        N1 * t * t + 0.75
    } else if t < 2.5 / D1 {
        let t = t - 2.25 / D1;
        N1 * t * t + 0.9375
    } else {
        let t = t - 2.625 / D1;
        N1 * t * t + 0.984375
    }
}

#[derive(Debug, thiserror::Error)]
#[error("sensor offline")]
struct SensorOffline;

/// Test the two-phase reverse/bounce scenario end to end
#[test]
fn test_two_phase_timing_scenario() {
    let rig = Rig::new();
    let (seen, effect) = recorder();

    let (mut done, handle) = rig
        .timeline
        .animate([
            (500u64, effect.clone(), Timing::new(reverse_linear)),
            (500u64, effect, Timing::new(ease_bounce)),
        ])
        .unwrap();

    rig.frame(0);
    rig.frame(250);
    assert_eq!(seen.borrow().last(), Some(&(reverse_linear(0.5), 0.5)));

    // Phase one ends at 500; phase two latches its start on the next pulse
    rig.frame(250);
    assert!(handle.completed());
    rig.frame(0);
    let second = handle.sub(1).unwrap();
    assert_eq!(second.start_time(), Some(Duration::from_millis(500)));

    rig.frame(250);
    assert_eq!(seen.borrow().last(), Some(&(ease_bounce(0.5), 0.5)));
    assert!(done.try_take().is_none());

    rig.time.advance_millis(250);
    assert_eq!(rig.timeline.now(), Duration::from_millis(1000));
    rig.driver.pulse();

    assert!(matches!(done.try_take(), Some(Ok(()))));
    assert!(second.completed());
    assert!(!handle.error());
}

/// Test that `completed` latches once and never reverts
#[test]
fn test_completed_is_monotonic() {
    let rig = Rig::new();
    let (_done, handle) = rig.timeline.animate([40u64, 40, 40]).unwrap();
    let phases: Vec<ChainHandle> = (0..3).filter_map(|i| handle.sub(i)).collect();
    let mut latched = vec![false; phases.len()];

    rig.driver.pulse();
    for _ in 0..30 {
        rig.frame(10);
        for (phase, latched) in phases.iter().zip(latched.iter_mut()) {
            if *latched {
                assert!(phase.completed(), "phase {} reverted", phase.index());
            }
            *latched = phase.completed();
        }
    }
    assert!(latched.iter().all(|done| *done));
}

/// Test that a chain never resolves before the sum of its phase durations
#[test]
fn test_chain_duration_is_sum_of_phases() {
    let rig = Rig::new();
    let (mut done, handle) = rig.timeline.animate([30u64, 50, 20]).unwrap();

    let (outcome, settled_at) = rig.run(&mut done, 16);
    assert!(outcome.is_ok());
    assert!(settled_at >= Duration::from_millis(100));
    // Each phase may overshoot by a frame and each successor starts a frame later
    assert!(settled_at <= Duration::from_millis(100 + 2 * 16 * 3));
    assert_eq!(handle.start_time(), Some(Duration::ZERO));
}

/// Test that wall time spent paused adds no virtual time
#[test]
fn test_pause_resume_preserves_progress() {
    let rig = Rig::new();
    let (seen, effect) = recorder();
    let (mut done, _handle) = rig.timeline.animate([(100u64, effect)]).unwrap();

    rig.frame(0);
    rig.frame(25);
    assert_eq!(seen.borrow().last(), Some(&(0.25, 0.25)));

    rig.timeline.pause();
    rig.frame(5_000);
    assert_eq!(seen.borrow().len(), 2);
    assert_eq!(rig.timeline.now(), Duration::from_millis(25));

    rig.timeline.resume();
    rig.frame(0);
    assert_eq!(seen.borrow().last(), Some(&(0.25, 0.25)));

    rig.frame(74);
    assert!(done.try_take().is_none());
    rig.frame(1);
    assert!(matches!(done.try_take(), Some(Ok(()))));
}

/// Test that revoking an unstarted chain resolves it and skips every effect
#[test]
fn test_revoke_unstarted_chain_resolves() {
    let rig = Rig::new();
    let (first_calls, first) = counter();
    let (second_calls, second) = counter();
    let (mut done, handle) = rig
        .timeline
        .animate([(100u64, first), (100u64, second)])
        .unwrap();

    assert!(rig.timeline.revoke(&handle, false));
    assert!(handle.completed());
    assert!(!handle.started());
    assert!(matches!(done.try_take(), Some(Ok(()))));

    rig.frame(0);
    rig.frame(200);
    assert_eq!(first_calls.get(), 0);
    assert_eq!(second_calls.get(), 0);
    assert!(!rig.timeline.is_running());

    // The chain is gone from the timeline; revoking again finds nothing
    assert!(!rig.timeline.revoke(&handle, true));
}

/// Test that the chain handle still reaches the running phase after promotion
#[test]
fn test_handle_revoke_after_promotion() {
    let rig = Rig::new();
    let (calls, effect) = counter();
    let (mut done, handle) = rig
        .timeline
        .animate([
            Segment::millis(10),
            Segment::millis(10),
            Segment::millis(100).with_effect(effect),
        ])
        .unwrap();

    rig.frame(0);
    rig.frame(10);
    rig.frame(0);
    rig.frame(10);
    rig.frame(0);
    let ticks = calls.get();
    assert!(ticks > 0);

    assert!(handle.revoke());
    assert!(handle.sub(2).unwrap().completed());
    assert!(matches!(done.try_take(), Some(Ok(()))));

    rig.frame(50);
    assert_eq!(calls.get(), ticks);
    assert_eq!(rig.timeline.active_chains(), 0);
}

/// Test that a failing phase rejects with its own error and runs nothing after it
#[test]
fn test_failure_rejects_with_original_error() {
    let rig = Rig::new();
    let (after_calls, after) = counter();
    let (mut done, handle) = rig
        .timeline
        .animate([
            Segment::millis(20),
            Segment::millis(20).effect(|_, raw| {
                if raw >= 0.5 {
                    return Err(SensorOffline.into());
                }
                Ok(())
            }),
            Segment::millis(20).with_effect(after),
        ])
        .unwrap();

    let (outcome, _) = rig.run(&mut done, 5);
    let err = outcome.unwrap_err();
    assert!(err.is_phase_failure());
    match err {
        TimelineError::Effect(inner) => assert!(inner.downcast_ref::<SensorOffline>().is_some()),
        other => panic!("unexpected error: {other}"),
    }

    assert!(handle.error());
    assert!(handle.sub(1).unwrap().error());
    assert!(!handle.sub(2).unwrap().started());
    assert_eq!(after_calls.get(), 0);
    assert_eq!(rig.timeline.active_chains(), 0);
}

/// Test that a panicking timing transform rejects the chain instead of unwinding
#[test]
fn test_panicking_timing_rejects_chain() {
    let rig = Rig::new();
    let (mut done, handle) = rig
        .timeline
        .animate([Segment::millis(50).timing(|t| {
            if t > 0.5 {
                panic!("timing out of range");
            }
            t
        })])
        .unwrap();

    let (outcome, _) = rig.run(&mut done, 10);
    assert!(matches!(outcome, Err(TimelineError::Panicked(msg)) if msg == "timing out of range"));
    assert!(handle.error());
}

/// Test that `repeat` matches the equivalent hand-written chain
#[test]
fn test_repeat_matches_explicit_chain() {
    let repeated = Rig::new();
    let (repeated_calls, effect) = counter();
    let (mut repeated_done, repeated_handle) =
        repeated.timeline.repeat(3, [(100u64, effect)]).unwrap();
    let (repeated_outcome, repeated_at) = repeated.run(&mut repeated_done, 10);

    let explicit = Rig::new();
    let (explicit_calls, effect) = counter();
    let (mut explicit_done, explicit_handle) = explicit
        .timeline
        .animate([
            (100u64, effect.clone()),
            (100u64, effect.clone()),
            (100u64, effect),
        ])
        .unwrap();
    let (explicit_outcome, explicit_at) = explicit.run(&mut explicit_done, 10);

    assert!(repeated_outcome.is_ok() && explicit_outcome.is_ok());
    assert_eq!(repeated_handle.len(), explicit_handle.len());
    assert_eq!(repeated_at, explicit_at);
    assert_eq!(repeated_calls.get(), explicit_calls.get());
}

/// Test that failing or revoking one chain leaves its siblings untouched
#[test]
fn test_sibling_chains_are_independent() {
    fn run_b(with_neighbours: bool) -> (u32, Duration) {
        let rig = Rig::new();
        let (calls, effect) = counter();

        let failing = with_neighbours.then(|| {
            rig.timeline
                .animate([Segment::millis(30).effect(|_, raw| {
                    if raw >= 0.5 {
                        anyhow::bail!("neighbour failed");
                    }
                    Ok(())
                })])
                .unwrap()
        });
        let (mut done, _b) = rig
            .timeline
            .animate([(60u64, effect.clone()), (60u64, effect)])
            .unwrap();
        let revoked = with_neighbours.then(|| rig.timeline.animate([200u64, 200]).unwrap());

        rig.frame(0);
        rig.frame(20);
        if let Some((mut failed_done, _)) = failing {
            assert!(matches!(failed_done.try_take(), Some(Err(TimelineError::Effect(_)))));
        }
        if let Some((mut revoked_done, revoked)) = revoked {
            assert!(revoked.revoke());
            assert!(matches!(revoked_done.try_take(), Some(Ok(()))));
        }

        let (outcome, settled_at) = rig.run(&mut done, 20);
        assert!(outcome.is_ok());
        (calls.get(), settled_at)
    }

    assert_eq!(run_b(true), run_b(false));
}

/// Test that dropping the timeline settles pending chains as dropped
#[test]
fn test_dropped_timeline_settles_chains() {
    let rig = Rig::new();
    let (mut done, handle) = rig.timeline.animate([100u64, 100]).unwrap();
    rig.frame(0);

    let Rig {
        timeline, driver, ..
    } = rig;
    drop(timeline);

    assert!(matches!(done.try_take(), Some(Err(TimelineError::Dropped))));
    // The pending pulse finds no timeline and does nothing
    assert!(driver.pulse());
    assert!(!handle.revoke());
    assert!(!handle.completed());
}

/// Test that chains enqueued from a loop round run on the same timeline
#[test]
fn test_loop_rounds_on_frame_loop() {
    init_tracing();
    let config = TimelineConfig::default().with_target_fps(1000);
    let frame_loop = FrameLoop::new(&config);
    let timeline = Timeline::with_config(frame_loop.driver(), config);

    let rounds = Rc::new(Cell::new(0));
    let rounds_clone = rounds.clone();
    let stopper: Rc<RefCell<Option<LoopStopper>>> = Rc::new(RefCell::new(None));
    let stopper_clone = stopper.clone();

    let looping = timeline.looping(move |tl| {
        rounds_clone.set(rounds_clone.get() + 1);
        if rounds_clone.get() == 3 {
            if let Some(stopper) = stopper_clone.borrow().as_ref() {
                stopper.stop();
            }
        }
        let (a, _) = tl.delay(Duration::from_millis(3))?;
        let (b, _) = tl.animate([2u64, 2])?;
        Ok([a, b])
    });
    *stopper.borrow_mut() = Some(looping.stopper());

    let outcome = frame_loop.block_on(looping).expect("loop stalled");
    assert!(outcome.is_ok());
    assert_eq!(rounds.get(), 3);
    assert!(!timeline.is_running());
}

/// Test that a blocking frame loop drives a chain to completion
#[test]
fn test_frame_loop_drives_chain() {
    init_tracing();
    let config = TimelineConfig::from_toml_str("label = \"blocking\"\ntarget_fps = 500").unwrap();
    let frame_loop = FrameLoop::new(&config);
    let timeline = Timeline::with_config(frame_loop.driver(), config);

    let (calls, effect) = counter();
    let (done, handle) = timeline.animate([(10u64, effect)]).unwrap();

    let outcome = frame_loop.block_on(done).expect("frame loop stalled");
    assert!(outcome.is_ok());
    assert!(handle.completed());
    assert!(calls.get() >= 2);
    assert_eq!(timeline.active_chains(), 0);
}
