//! Timeline error types

use thiserror::Error;

/// Errors reported by the timeline and by chain completions
#[derive(Error, Debug)]
pub enum TimelineError {
    /// `animate`/`repeat` was called without any segment
    #[error("an animation chain needs at least one segment")]
    EmptyChain,

    /// A mutating timeline operation was called from inside a sweep
    #[error("`{0}` called while the timeline is sweeping")]
    Reentrant(&'static str),

    /// An effect callback returned an error; the original error is kept as-is
    #[error(transparent)]
    Effect(anyhow::Error),

    /// An effect or timing callback panicked during a tick
    #[error("phase callback panicked: {0}")]
    Panicked(String),

    /// The timeline was dropped before the chain finished
    #[error("timeline dropped before the chain finished")]
    Dropped,

    /// Failed to parse a timeline config
    #[error("invalid timeline config: {0}")]
    Config(#[from] toml::de::Error),
}

impl TimelineError {
    /// Whether this error was raised by a phase callback (effect or timing)
    pub fn is_phase_failure(&self) -> bool {
        matches!(self, TimelineError::Effect(_) | TimelineError::Panicked(_))
    }
}

/// Result type for timeline operations
pub type Result<T> = std::result::Result<T, TimelineError>;
