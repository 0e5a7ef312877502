//! Error types for the FDIR kernel
//!
//! One enum per component plus the [`FdirError`] umbrella used at the
//! orchestration and CLI layers. The taxonomy is:
//! - invalid input (unknown phase, disallowed transition)
//! - contention (transition already in progress)
//! - timeout (bounded execution guard)
//! - I/O and corruption (event log)

use crate::phase::Phase;
use std::path::PathBuf;
use std::time::Duration;

/// Umbrella error for the FDIR kernel
#[derive(Debug, thiserror::Error)]
pub enum FdirError {
    /// Phase state machine rejected a transition
    #[error("state machine error: {0}")]
    StateMachine(#[from] StateMachineError),

    /// Event log failure
    #[error("log error: {0}")]
    Log(#[from] LogError),

    /// Bounded execution guard failure
    #[error("guard error: {0}")]
    Guard(#[from] GuardError),

    /// Review workflow failure
    #[error("review error: {0}")]
    Review(#[from] ReviewError),

    /// Configuration failure
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl FdirError {
    /// Whether the caller may retry the operation that produced this error.
    ///
    /// Contention, hook failures and timeouts are transient. Invalid input is
    /// recoverable in the sense that no state was changed, but retrying the
    /// same request is pointless; I/O failures are outside the kernel's control.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::StateMachine(e) => e.is_transient(),
            Self::Guard(GuardError::Timeout { .. }) => true,
            Self::Guard(GuardError::Panicked(_) | GuardError::Cancelled) => false,
            Self::Log(LogError::Corrupt { .. }) => true,
            Self::Log(_) => false,
            Self::Review(_) | Self::Config(_) => false,
        }
    }
}

/// Phase state machine errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateMachineError {
    /// The requested phase name is not one of the known phases
    #[error("invalid phase: {0:?}")]
    InvalidPhase(String),

    /// Another ordinary transition currently holds the exclusive section
    #[error("transition already in progress")]
    TransitionInProgress,

    /// The active transition policy forbids this transition
    #[error("illegal transition from {from} to {to}")]
    IllegalTransition {
        /// Phase the machine was in
        from: Phase,
        /// Requested target
        to: Phase,
    },

    /// The transition hook failed while applying the change
    #[error("transition from {from} to {to} failed: {reason}")]
    TransitionFailed {
        /// Phase the machine was in
        from: Phase,
        /// Requested target
        to: Phase,
        /// Hook-provided reason
        reason: String,
    },
}

impl StateMachineError {
    /// Contention and hook failures leave the phase unchanged and may clear up,
    /// so re-issuing the same request can succeed. Invalid or illegal requests
    /// never will.
    #[inline]
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransitionInProgress | Self::TransitionFailed { .. })
    }
}

/// Event log errors
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    /// Reading or writing the durable sink failed
    #[error("i/o error on {path}: {source}")]
    Io {
        /// Log file path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The sink exists but does not hold a valid record sequence
    #[error("corrupt log {path}: {source}")]
    Corrupt {
        /// Log file path
        path: PathBuf,
        /// Parse failure
        #[source]
        source: serde_json::Error,
    },

    /// Records could not be encoded
    #[error("failed to encode records: {0}")]
    Serialize(#[source] serde_json::Error),
}

impl LogError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Bounded execution guard errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GuardError {
    /// The deadline elapsed before the work finished; the work has been torn down
    #[error("operation timed out after {deadline:?}")]
    Timeout {
        /// Deadline that elapsed
        deadline: Duration,
    },

    /// The work panicked
    #[error("guarded work panicked: {0}")]
    Panicked(String),

    /// The runtime cancelled the work before it produced a value (shutdown)
    #[error("guarded work was cancelled by the runtime")]
    Cancelled,
}

impl GuardError {
    /// Check if this is a timeout
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Review workflow errors
#[derive(Debug, thiserror::Error)]
pub enum ReviewError {
    /// Pending or processed log failure
    #[error(transparent)]
    Log(#[from] LogError),

    /// Terminal I/O failure while prompting
    #[error("prompt i/o failed: {0}")]
    Prompt(#[from] std::io::Error),
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("cannot read config {path}: {source}")]
    Read {
        /// Config path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid TOML for [`crate::config::FdirConfig`]
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}
