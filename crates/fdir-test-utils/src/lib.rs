//! Testing utilities for FDIR workspace
//!
//! Shared test helpers, fixtures, and hooks.

#![allow(missing_docs)]

use fdir_kernel::config::PhaseConfig;
use fdir_kernel::phase::{Phase, PhaseStateMachine, TransitionHook};
use fdir_kernel::{EventLog, OutcomeRecord};
use parking_lot::{Condvar, Mutex};
use std::error::Error;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub fn create_record(fault_id: &str, success: bool) -> OutcomeRecord {
    OutcomeRecord::new(fault_id, "test", "test_action", Phase::NominalOps, success)
}

/// Log in a fresh temp dir; keep the dir alive for as long as the log is used
pub fn temp_log(name: &str) -> (TempDir, EventLog) {
    let dir = tempfile::tempdir().unwrap();
    let log = EventLog::open(dir.path().join(name));
    (dir, log)
}

pub fn machine_with_hook(hook: Arc<dyn TransitionHook>) -> Arc<PhaseStateMachine> {
    Arc::new(PhaseStateMachine::with_hook(PhaseConfig::default(), hook))
}

#[derive(Default)]
struct Gate {
    entered: usize,
    open: bool,
}

/// Blocks every transition inside the hook until [`GatedHook::release`]
#[derive(Default)]
pub struct GatedHook {
    gate: Mutex<Gate>,
    changed: Condvar,
}

impl GatedHook {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Wait until `n` transitions are parked in the hook
    pub fn wait_until_entered(&self, n: usize) {
        let mut gate = self.gate.lock();
        while gate.entered < n {
            self.changed.wait(&mut gate);
        }
    }

    pub fn release(&self) {
        self.gate.lock().open = true;
        self.changed.notify_all();
    }
}

impl TransitionHook for GatedHook {
    fn apply(&self, _from: Phase, _to: Phase) -> Result<(), Box<dyn Error + Send + Sync>> {
        let mut gate = self.gate.lock();
        gate.entered += 1;
        self.changed.notify_all();
        while !gate.open {
            self.changed.wait(&mut gate);
        }
        Ok(())
    }
}

/// Sleeps in every transition and counts the calls
pub struct SlowHook {
    pub delay: Duration,
    pub calls: AtomicUsize,
}

impl SlowHook {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TransitionHook for SlowHook {
    fn apply(&self, _from: Phase, _to: Phase) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        Ok(())
    }
}

/// Fails every transition with `reason`
pub struct FailingHook(pub &'static str);

impl TransitionHook for FailingHook {
    fn apply(&self, _from: Phase, _to: Phase) -> Result<(), Box<dyn Error + Send + Sync>> {
        Err(self.0.into())
    }
}
