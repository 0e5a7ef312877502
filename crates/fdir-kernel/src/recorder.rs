//! Instrumentation boundary for recovery actions
//!
//! [`RecoveryRecorder`] wraps a recovery action so that every invocation
//! appends one [`OutcomeRecord`] to the injected [`EventLog`]. Recording is a
//! side effect only: the action's return value, error or panic reaches the
//! caller unchanged, and a failing log write is reported through `tracing`
//! instead of to the caller.

use crate::event_log::EventLog;
use crate::phase::{Phase, PhaseStateMachine};
use crate::record::OutcomeRecord;
use futures::FutureExt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Source of the mission phase at invocation time
pub trait MissionContext {
    /// Current phase, if the context knows it
    fn mission_phase(&self) -> Option<Phase>;
}

impl MissionContext for Phase {
    fn mission_phase(&self) -> Option<Phase> {
        Some(*self)
    }
}

impl MissionContext for PhaseStateMachine {
    fn mission_phase(&self) -> Option<Phase> {
        Some(self.get_current_phase())
    }
}

impl<C: MissionContext + ?Sized> MissionContext for Arc<C> {
    fn mission_phase(&self) -> Option<Phase> {
        (**self).mission_phase()
    }
}

impl MissionContext for () {
    fn mission_phase(&self) -> Option<Phase> {
        None
    }
}

/// Whether a recovery action's return value counts as success
pub trait ActionOutcome {
    /// `true` if the action reports that it worked
    fn succeeded(&self) -> bool;
}

impl ActionOutcome for bool {
    fn succeeded(&self) -> bool {
        *self
    }
}

impl<T> ActionOutcome for Option<T> {
    fn succeeded(&self) -> bool {
        self.is_some()
    }
}

impl<T, E> ActionOutcome for Result<T, E> {
    fn succeeded(&self) -> bool {
        self.is_ok()
    }
}

/// An action that returns nothing has not reported success.
impl ActionOutcome for () {
    fn succeeded(&self) -> bool {
        false
    }
}

/// Identity of an instrumented recovery action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryAction {
    /// Anomaly the action addresses
    pub fault_id: String,
    /// Anomaly class
    pub anomaly_type: String,
    /// Action name recorded in the log
    pub recovery_action: String,
}

impl RecoveryAction {
    /// Describe an action
    #[must_use]
    pub fn new(
        fault_id: impl Into<String>,
        anomaly_type: impl Into<String>,
        recovery_action: impl Into<String>,
    ) -> Self {
        Self {
            fault_id: fault_id.into(),
            anomaly_type: anomaly_type.into(),
            recovery_action: recovery_action.into(),
        }
    }
}

/// Appends an outcome record for every wrapped invocation
#[derive(Debug, Clone)]
pub struct RecoveryRecorder {
    store: EventLog,
}

impl RecoveryRecorder {
    /// Record into `store`
    #[must_use]
    pub fn new(store: EventLog) -> Self {
        Self { store }
    }

    /// Log the records go to
    #[inline]
    #[must_use]
    pub fn store(&self) -> &EventLog {
        &self.store
    }

    /// Run `f` and record its outcome.
    ///
    /// A panic in `f` is recorded as a failure and then resumed.
    pub fn record<C, F, R>(&self, action: &RecoveryAction, ctx: &C, f: F) -> R
    where
        C: MissionContext + ?Sized,
        F: FnOnce() -> R,
        R: ActionOutcome,
    {
        let phase = phase_of(ctx);
        match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(value) => {
                self.log(action, phase, value.succeeded());
                value
            }
            Err(payload) => {
                self.log(action, phase, false);
                panic::resume_unwind(payload)
            }
        }
    }

    /// Await `fut` and record its outcome.
    ///
    /// The mission phase is sampled before the action starts.
    pub async fn record_async<C, Fut>(&self, action: &RecoveryAction, ctx: &C, fut: Fut) -> Fut::Output
    where
        C: MissionContext + ?Sized,
        Fut: Future,
        Fut::Output: ActionOutcome,
    {
        let phase = phase_of(ctx);
        match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(value) => {
                self.log(action, phase, value.succeeded());
                value
            }
            Err(payload) => {
                self.log(action, phase, false);
                panic::resume_unwind(payload)
            }
        }
    }

    fn log(&self, action: &RecoveryAction, phase: Phase, success: bool) {
        let record = OutcomeRecord::new(
            action.fault_id.clone(),
            action.anomaly_type.clone(),
            action.recovery_action.clone(),
            phase,
            success,
        );
        if let Err(e) = self.store.append(record) {
            tracing::warn!(
                fault_id = %action.fault_id,
                recovery_action = %action.recovery_action,
                error = %e,
                "failed to record recovery outcome"
            );
        }
    }
}

fn phase_of<C: MissionContext + ?Sized>(ctx: &C) -> Phase {
    ctx.mission_phase().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::FeedbackLabel;

    fn recorder() -> (tempfile::TempDir, RecoveryRecorder) {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::open(dir.path().join("pending.json"));
        (dir, RecoveryRecorder::new(log))
    }

    #[test]
    fn unit_context_defaults_to_nominal() {
        let (_dir, rec) = recorder();
        let action = RecoveryAction::new("f1", "test", "dummy");
        assert!(rec.record(&action, &(), || true));
        let logged = rec.store().read_all().unwrap();
        assert_eq!(logged[0].mission_phase, Phase::NominalOps);
    }

    #[test]
    fn none_is_failure() {
        let (_dir, rec) = recorder();
        let action = RecoveryAction::new("f1", "test", "lookup");
        let out: Option<u8> = rec.record(&action, &Phase::SafeMode, || None);
        assert_eq!(out, None);
        let logged = rec.store().read_all().unwrap();
        assert_eq!(logged[0].label, FeedbackLabel::Wrong);
        assert_eq!(logged[0].mission_phase, Phase::SafeMode);
    }

    #[test]
    fn log_failure_does_not_alter_result() {
        let dir = tempfile::tempdir().unwrap();
        // parent directory does not exist, so every append fails
        let rec = RecoveryRecorder::new(EventLog::open(dir.path().join("missing/dir/pending.json")));
        let action = RecoveryAction::new("f1", "test", "dummy");
        assert_eq!(rec.record(&action, &(), || Ok::<_, ()>(42)), Ok(42));
    }

    #[tokio::test]
    async fn async_actions_are_recorded() {
        let (_dir, rec) = recorder();
        let action = RecoveryAction::new("thermal_001", "thermal", "vent");
        let out = rec
            .record_async(&action, &Phase::PayloadOps, async { Err::<(), _>("stuck") })
            .await;
        assert_eq!(out, Err("stuck"));
        let logged = rec.store().read_all().unwrap();
        assert_eq!(logged.len(), 1);
        assert!((logged[0].confidence_score - 0.5).abs() < f64::EPSILON);
    }
}
