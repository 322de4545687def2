//! Cadence Timeline
//!
//! A single-threaded animation timeline that advances many independent chains
//! of timed phases against one pausable virtual clock.
//!
//! # Features
//!
//! - **Chains**: sequential phases with per-tick effects and timing transforms
//! - **Stable handles**: a chain handle keeps reporting after its phases move on
//! - **Single completion**: every chain resolves or rejects exactly once
//! - **Virtual time**: pause and resume without losing in-flight progress
//! - **Pluggable frame drivers**: pulse manually in tests, or run a frame loop
//!
//! # Example
//!
//! ```
//! use cadence_timeline::{ManualFrameDriver, ManualTimeSource, Segment, Timeline, TimelineConfig};
//! use std::cell::Cell;
//! use std::rc::Rc;
//!
//! let driver = ManualFrameDriver::new();
//! let time = ManualTimeSource::new();
//! let timeline =
//!     Timeline::with_time_source(driver.clone(), TimelineConfig::default(), Rc::new(time.clone()));
//!
//! let opacity = Rc::new(Cell::new(0.0));
//! let target = opacity.clone();
//! let (mut done, _handle) = timeline
//!     .animate([Segment::millis(200).effect(move |applied, _raw| {
//!         target.set(applied);
//!         Ok(())
//!     })])
//!     .unwrap();
//!
//! driver.pulse();
//! time.advance_millis(100);
//! driver.pulse();
//! assert_eq!(opacity.get(), 0.5);
//!
//! time.advance_millis(100);
//! driver.pulse();
//! assert!(matches!(done.try_take(), Some(Ok(()))));
//! ```

pub mod chain;
pub mod clock;
pub mod combinators;
pub mod config;
pub mod driver;
pub mod error;
mod node;
pub mod segment;
pub mod timeline;

pub use chain::{ChainHandle, Completion};
pub use clock::{ManualTimeSource, SystemTimeSource, TimeSource, VirtualClock};
pub use combinators::{LoopStopper, Looping};
pub use config::TimelineConfig;
pub use driver::{FrameCallback, FrameDriver, FrameLoop, FrameLoopDriver, ManualFrameDriver};
pub use error::{Result, TimelineError};
pub use segment::{Effect, EffectFn, Segment, Timing};
pub use timeline::Timeline;
