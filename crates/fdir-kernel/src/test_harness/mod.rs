//! Concurrent stress run over all three components
//!
//! Used by the `stress` subcommand and by the integration tests. Each
//! component is hammered in parallel and the run records every invariant
//! violation it observes instead of stopping at the first one.

use crate::config::{GuardConfig, PhaseConfig};
use crate::event_log::EventLog;
use crate::guard::ExecutionGuard;
use crate::phase::{Phase, PhaseStateMachine};
use crate::record::OutcomeRecord;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

/// Stress run parameters
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Directory for the scratch log; must exist
    pub log_dir: PathBuf,
    /// Concurrent log writers
    pub writers: usize,
    /// Records appended by each writer
    pub records_per_writer: usize,
    /// Threads issuing ordinary transitions
    pub phase_racers: usize,
    /// Transitions attempted by each racer
    pub transitions_per_racer: usize,
    /// Forced overrides issued while the racers run
    pub forced_overrides: usize,
    /// Guarded units of work; odd-numbered ones overrun their deadline
    pub guards: usize,
}

impl StressConfig {
    /// Defaults with the scratch log under `log_dir`
    #[must_use]
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
            writers: 5,
            records_per_writer: 10,
            phase_racers: 8,
            transitions_per_racer: 100,
            forced_overrides: 20,
            guards: 50,
        }
    }
}

/// Result of a stress run
#[derive(Debug, Clone, Default)]
pub struct StressReport {
    /// Records the log should hold
    pub expected_records: usize,
    /// Records the log actually held
    pub logged_records: usize,
    /// Ordinary transitions that committed
    pub committed_transitions: usize,
    /// Ordinary transitions refused because another was in progress
    pub contended_transitions: usize,
    /// Guarded units that timed out
    pub guard_timeouts: usize,
    /// Number of invariant violations
    pub violations: usize,
    /// Description of each violation
    pub details: Vec<String>,
    /// No violations observed
    pub success: bool,
}

impl StressReport {
    fn violation(&mut self, detail: impl Into<String>) {
        let detail = detail.into();
        tracing::error!(%detail, "stress invariant violated");
        self.details.push(detail);
    }
}

/// Run the stress scenario
pub async fn run_stress(config: StressConfig) -> StressReport {
    tracing::info!(
        writers = config.writers,
        records = config.records_per_writer,
        racers = config.phase_racers,
        guards = config.guards,
        "starting stress run"
    );

    let mut report = StressReport::default();
    let (phase, log, guard) = tokio::join!(
        tokio::task::spawn_blocking({
            let config = config.clone();
            move || stress_phase(&config)
        }),
        tokio::task::spawn_blocking({
            let config = config.clone();
            move || stress_log(&config)
        }),
        stress_guard(&config),
    );

    match phase {
        Ok(phase) => {
            report.committed_transitions = phase.committed;
            report.contended_transitions = phase.contended;
            for detail in phase.details {
                report.violation(detail);
            }
        }
        Err(e) => report.violation(format!("phase stress task failed: {e}")),
    }

    match log {
        Ok(log) => {
            report.expected_records = log.expected;
            report.logged_records = log.logged;
            for detail in log.details {
                report.violation(detail);
            }
        }
        Err(e) => report.violation(format!("log stress task failed: {e}")),
    }

    report.guard_timeouts = guard.timeouts;
    for detail in guard.details {
        report.violation(detail);
    }

    report.violations = report.details.len();
    report.success = report.violations == 0;
    tracing::info!(violations = report.violations, success = report.success, "stress run finished");
    report
}

#[derive(Default)]
struct PhaseTally {
    committed: usize,
    contended: usize,
    details: Vec<String>,
}

fn stress_phase(config: &StressConfig) -> PhaseTally {
    let machine = Arc::new(PhaseStateMachine::new(PhaseConfig::default()));

    let tallies: Vec<PhaseTally> = std::thread::scope(|s| {
        let racers: Vec<_> = (0..config.phase_racers)
            .map(|r| {
                let machine = &machine;
                s.spawn(move || {
                    let mut tally = PhaseTally::default();
                    for i in 0..config.transitions_per_racer {
                        let target = Phase::ALL[(r + i) % Phase::ALL.len()];
                        match machine.set_phase(target) {
                            Ok(res) if res.success && res.new_phase != target => tally.details.push(format!(
                                "committed transition to {target} reported {}",
                                res.new_phase
                            )),
                            Ok(res) if res.success => tally.committed += 1,
                            Ok(_) => {}
                            Err(e) if e.is_transient() => tally.contended += 1,
                            Err(e) => tally.details.push(format!("unexpected transition error: {e}")),
                        }
                    }
                    tally
                })
            })
            .collect();

        let forcer = s.spawn(|| {
            let mut tally = PhaseTally::default();
            for _ in 0..config.forced_overrides {
                let res = machine.force_safe_mode();
                if !res.success || res.new_phase != Phase::SafeMode {
                    tally.details.push(format!("forced override reported {res:?}"));
                }
                std::thread::yield_now();
            }
            tally
        });

        racers
            .into_iter()
            .chain(std::iter::once(forcer))
            .map(|h| {
                h.join().unwrap_or_else(|_| PhaseTally {
                    details: vec!["phase stress thread panicked".to_string()],
                    ..PhaseTally::default()
                })
            })
            .collect()
    });

    let mut total = tallies.into_iter().fold(PhaseTally::default(), |mut acc, t| {
        acc.committed += t.committed;
        acc.contended += t.contended;
        acc.details.extend(t.details);
        acc
    });

    if machine.is_transitioning() {
        total.details.push("transition marker still set after all racers finished".to_string());
    }
    machine.force_safe_mode();
    if machine.get_current_phase() != Phase::SafeMode {
        total.details.push("forced override did not land in SAFE_MODE".to_string());
    }
    if let Err(e) = machine.set_phase(Phase::NominalOps) {
        total.details.push(format!("ordinary transition unusable after override: {e}"));
    }
    total
}

struct LogTally {
    expected: usize,
    logged: usize,
    details: Vec<String>,
}

fn stress_log(config: &StressConfig) -> LogTally {
    let path = config
        .log_dir
        .join(format!("stress_{}.json", uuid::Uuid::new_v4()));
    let log = EventLog::open(&path);
    let mut details = Vec::new();

    std::thread::scope(|s| {
        let writers: Vec<_> = (0..config.writers)
            .map(|w| {
                let log = log.clone();
                s.spawn(move || {
                    let mut failures = Vec::new();
                    for r in 0..config.records_per_writer {
                        let record = OutcomeRecord::new(
                            format!("writer{w}_record{r}"),
                            "stress",
                            "append",
                            Phase::NominalOps,
                            true,
                        );
                        if let Err(e) = log.append(record) {
                            failures.push(format!("append failed: {e}"));
                        }
                    }
                    failures
                })
            })
            .collect();
        for h in writers {
            match h.join() {
                Ok(failures) => details.extend(failures),
                Err(_) => details.push("log writer thread panicked".to_string()),
            }
        }
    });

    let expected = config.writers * config.records_per_writer;
    let logged = match log.read_strict() {
        Ok(records) => {
            let unique: HashSet<_> = records.iter().map(|r| r.fault_id.as_str()).collect();
            if unique.len() != records.len() {
                details.push(format!("{} duplicated records", records.len() - unique.len()));
            }
            records.len()
        }
        Err(e) => {
            details.push(format!("log unreadable after stress: {e}"));
            0
        }
    };
    if logged != expected {
        details.push(format!("expected {expected} records, found {logged}"));
    }
    if let Err(e) = log.remove() {
        tracing::warn!(path = %path.display(), error = %e, "could not remove stress log");
    }

    LogTally {
        expected,
        logged,
        details,
    }
}

struct GuardTally {
    timeouts: usize,
    details: Vec<String>,
}

async fn stress_guard(config: &StressConfig) -> GuardTally {
    let guard = ExecutionGuard::new(GuardConfig {
        default_deadline_ms: 200,
        grace_period_ms: 20,
    });
    let baseline = guard.in_flight();
    let mut runs = JoinSet::new();

    for i in 0..config.guards {
        let guard = guard.clone();
        runs.spawn(async move {
            let overrun = i % 2 == 1;
            let (work, deadline) = if overrun {
                (Duration::from_secs(10), Duration::from_millis(20))
            } else {
                (Duration::from_millis(1), Duration::from_secs(2))
            };
            let outcome = guard.run(deadline, tokio::time::sleep(work)).await;
            (overrun, outcome)
        });
    }

    let mut tally = GuardTally {
        timeouts: 0,
        details: Vec::new(),
    };
    while let Some(joined) = runs.join_next().await {
        match joined {
            Ok((true, Err(e))) if e.is_timeout() => tally.timeouts += 1,
            Ok((false, Ok(()))) => {}
            Ok((overrun, outcome)) => tally
                .details
                .push(format!("guarded work (overrun: {overrun}) ended with {outcome:?}")),
            Err(e) => tally.details.push(format!("guard stress task failed: {e}")),
        }
    }

    let left = guard.in_flight();
    if left != baseline {
        tally
            .details
            .push(format!("{} guarded units still in flight", left - baseline));
    }
    tally
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn small_run_is_clean() {
        let dir = tempfile::tempdir().unwrap();
        let config = StressConfig {
            writers: 2,
            records_per_writer: 3,
            phase_racers: 2,
            transitions_per_racer: 10,
            forced_overrides: 2,
            guards: 4,
            ..StressConfig::new(dir.path())
        };
        let report = run_stress(config).await;
        assert!(report.success, "{:?}", report.details);
        assert_eq!(report.logged_records, 6);
        assert_eq!(report.guard_timeouts, 2);
    }
}
