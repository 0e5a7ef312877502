//! FDIR safety core
//!
//! Three concurrency-hardened primitives for fault detection, isolation and
//! recovery:
//! - [`phase::PhaseStateMachine`]: mission phase with non-blocking reads,
//!   exclusive ordinary transitions and an always-winning SAFE_MODE override
//! - [`event_log::EventLog`]: append-only outcome log that stays well formed
//!   under concurrent writers
//! - [`guard::ExecutionGuard`]: deadline wrapper that tears down timed-out
//!   work before reporting the timeout
//!
//! [`recorder::RecoveryRecorder`] ties recovery actions to the log, and
//! [`review::ReviewSession`] lets an operator relabel what was recorded.

pub mod config;
pub mod error;
pub mod event_log;
pub mod guard;
pub mod observability;
pub mod phase;
pub mod record;
pub mod recorder;
pub mod review;
pub mod test_harness;

pub use config::FdirConfig;
pub use error::{FdirError, GuardError, LogError, ReviewError, StateMachineError};
pub use event_log::EventLog;
pub use guard::ExecutionGuard;
pub use phase::{Phase, PhaseStateMachine, TransitionResult};
pub use record::{FeedbackLabel, OutcomeRecord};
pub use recorder::{RecoveryAction, RecoveryRecorder};

use std::sync::Arc;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Components wired from one [`FdirConfig`]
#[derive(Debug, Clone)]
pub struct FdirKernel {
    phase: Arc<PhaseStateMachine>,
    recorder: RecoveryRecorder,
    guard: ExecutionGuard,
    config: FdirConfig,
}

impl FdirKernel {
    /// Build with default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(FdirConfig::default())
    }

    /// Build from `config`; recovery outcomes go to the pending log
    #[must_use]
    pub fn with_config(config: FdirConfig) -> Self {
        tracing::debug!(?config, "building fdir kernel");
        Self {
            phase: Arc::new(PhaseStateMachine::new(config.phase)),
            recorder: RecoveryRecorder::new(EventLog::open(&config.log.pending_path)),
            guard: ExecutionGuard::new(config.guard),
            config,
        }
    }

    /// Shared phase state machine
    #[inline]
    #[must_use]
    pub fn phase(&self) -> &Arc<PhaseStateMachine> {
        &self.phase
    }

    /// Recorder writing to the pending log
    #[inline]
    #[must_use]
    pub fn recorder(&self) -> &RecoveryRecorder {
        &self.recorder
    }

    /// Execution guard
    #[inline]
    #[must_use]
    pub fn guard(&self) -> &ExecutionGuard {
        &self.guard
    }

    /// Configuration the kernel was built from
    #[inline]
    #[must_use]
    pub fn config(&self) -> &FdirConfig {
        &self.config
    }

    /// Processed log named by the configuration
    #[must_use]
    pub fn processed_log(&self) -> EventLog {
        EventLog::open(&self.config.log.processed_path)
    }

    /// Run a recovery action under the default deadline and record its
    /// outcome against the current phase.
    ///
    /// A timeout is recorded as a failed action.
    ///
    /// # Errors
    /// Whatever [`ExecutionGuard::run_with_default_deadline`] reports.
    pub async fn recover<F>(&self, action: &RecoveryAction, work: F) -> Result<F::Output, GuardError>
    where
        F: std::future::Future + Send + 'static,
        F::Output: recorder::ActionOutcome + Send + 'static,
    {
        let guarded = async { Guarded(self.guard.run_with_default_deadline(work).await) };
        self.recorder.record_async(action, &self.phase, guarded).await.0
    }
}

/// Guarded outcome that succeeded only if the work finished and reported success
struct Guarded<T>(Result<T, GuardError>);

impl<T: recorder::ActionOutcome> recorder::ActionOutcome for Guarded<T> {
    fn succeeded(&self) -> bool {
        self.0.as_ref().is_ok_and(recorder::ActionOutcome::succeeded)
    }
}

impl Default for FdirKernel {
    fn default() -> Self {
        Self::new()
    }
}

/// Common imports
pub mod prelude {
    pub use crate::config::{FdirConfig, GuardConfig, LogConfig, PhaseConfig};
    pub use crate::error::{FdirError, GuardError, LogError, StateMachineError};
    pub use crate::event_log::EventLog;
    pub use crate::guard::ExecutionGuard;
    pub use crate::phase::{Phase, PhaseStateMachine, TransitionPolicy, TransitionResult};
    pub use crate::record::{FeedbackLabel, OutcomeRecord};
    pub use crate::recorder::{ActionOutcome, MissionContext, RecoveryAction, RecoveryRecorder};
    pub use crate::FdirKernel;
}
