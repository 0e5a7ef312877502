use super::policy::validate_transition;
use super::{Phase, TransitionPolicy, TransitionResult};
use crate::config::PhaseConfig;
use crate::error::StateMachineError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Low byte: phase index. Remaining bits: number of forced overrides so far.
const PHASE_BITS: u32 = 8;
const PHASE_MASK: u64 = (1 << PHASE_BITS) - 1;

/// Ticket value meaning "no ordinary transition in progress"
const FREE: u64 = 0;

type HookResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Applies the side effects of an ordinary phase change.
///
/// Called while the transition's exclusive section is held and before the
/// new phase is committed. Returning an error aborts the transition with
/// [`StateMachineError::TransitionFailed`] and leaves the phase unchanged.
pub trait TransitionHook: Send + Sync {
    /// Reconfigure for the move from `from` to `to`
    fn apply(&self, from: Phase, to: Phase) -> HookResult;
}

/// Hook that does nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHook;

impl TransitionHook for NoopHook {
    fn apply(&self, _from: Phase, _to: Phase) -> HookResult {
        Ok(())
    }
}

/// Owns the current mission phase.
///
/// Reads never block. Ordinary transitions take an owner ticket by
/// compare-and-swap and fail immediately when another transition holds it.
/// The committed phase and the forced-override generation share one atomic
/// word so an ordinary commit can detect, and yield to, an override that
/// landed while it was applying its change.
pub struct PhaseStateMachine {
    state: AtomicU64,
    owner: AtomicU64,
    next_ticket: AtomicU64,
    policy: TransitionPolicy,
    hook: Arc<dyn TransitionHook>,
}

impl PhaseStateMachine {
    /// Create a state machine with the no-op hook
    #[must_use]
    pub fn new(config: PhaseConfig) -> Self {
        Self::with_hook(config, Arc::new(NoopHook))
    }

    /// Create with a custom transition hook
    #[must_use]
    pub fn with_hook(config: PhaseConfig, hook: Arc<dyn TransitionHook>) -> Self {
        Self {
            state: AtomicU64::new(pack(0, config.initial_phase)),
            owner: AtomicU64::new(FREE),
            next_ticket: AtomicU64::new(1),
            policy: config.policy,
            hook,
        }
    }

    /// Current committed phase. Never blocks.
    #[must_use]
    pub fn get_current_phase(&self) -> Phase {
        unpack_phase(self.state.load(Ordering::SeqCst))
    }

    /// Whether an ordinary transition currently holds the exclusive section
    #[must_use]
    pub fn is_transitioning(&self) -> bool {
        self.owner.load(Ordering::SeqCst) != FREE
    }

    /// Active compatibility policy
    #[must_use]
    pub fn policy(&self) -> TransitionPolicy {
        self.policy
    }

    /// Ordinary transition by phase name.
    ///
    /// # Errors
    /// [`StateMachineError::InvalidPhase`] for an unknown name, otherwise as
    /// [`Self::set_phase`].
    pub fn set_phase_by_name(&self, name: &str) -> Result<TransitionResult, StateMachineError> {
        let target = name.parse::<Phase>().map_err(|e| {
            tracing::warn!(requested = name, "rejected unknown phase");
            e
        })?;
        self.set_phase(target)
    }

    /// Ordinary transition.
    ///
    /// Fails immediately if another ordinary transition is in progress; it
    /// never waits for the exclusive section.
    ///
    /// # Errors
    /// - [`StateMachineError::TransitionInProgress`] under contention
    /// - [`StateMachineError::IllegalTransition`] if the policy forbids it
    /// - [`StateMachineError::TransitionFailed`] if the hook fails
    pub fn set_phase(&self, target: Phase) -> Result<TransitionResult, StateMachineError> {
        let _ticket = self.acquire()?;

        let observed = self.state.load(Ordering::SeqCst);
        let from = unpack_phase(observed);

        validate_transition(self.policy, from, target)?;

        self.hook
            .apply(from, target)
            .map_err(|e| StateMachineError::TransitionFailed {
                from,
                to: target,
                reason: e.to_string(),
            })?;

        let committed = pack(generation(observed), target);
        match self
            .state
            .compare_exchange(observed, committed, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => {
                tracing::info!(from = %from, to = %target, "phase transition committed");
                metrics::counter!("fdir_phase_transitions_total", "kind" => "ordinary").increment(1);
                Ok(TransitionResult {
                    success: true,
                    previous_phase: from,
                    new_phase: target,
                    forced: false,
                })
            }
            Err(current) => {
                let current = unpack_phase(current);
                tracing::warn!(
                    from = %from,
                    to = %target,
                    current = %current,
                    "phase transition preempted by forced override"
                );
                metrics::counter!("fdir_phase_transitions_preempted_total").increment(1);
                Ok(TransitionResult {
                    success: false,
                    previous_phase: from,
                    new_phase: current,
                    forced: false,
                })
            }
        }
    }

    /// Emergency transition to [`Phase::SafeMode`].
    ///
    /// Always succeeds. Any in-flight ordinary transition loses its commit,
    /// and its in-progress marker is cleared so ordinary transitions are
    /// usable immediately afterwards.
    pub fn force_safe_mode(&self) -> TransitionResult {
        let held = self.owner.load(Ordering::SeqCst);
        let previous_phase = self.commit_override();
        self.release_preempted(held);

        tracing::warn!(from = %previous_phase, "forced transition to SAFE_MODE");
        metrics::counter!("fdir_phase_transitions_total", "kind" => "forced").increment(1);

        TransitionResult {
            success: true,
            previous_phase,
            new_phase: Phase::SafeMode,
            forced: true,
        }
    }

    /// Bumps the generation and commits SAFE_MODE; returns the phase it replaced
    fn commit_override(&self) -> Phase {
        let mut previous = self.state.load(Ordering::SeqCst);
        loop {
            let next = pack(generation(previous) + 1, Phase::SafeMode);
            match self
                .state
                .compare_exchange_weak(previous, next, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return unpack_phase(previous),
                Err(actual) => previous = actual,
            }
        }
    }

    /// Clears the marker only if it still belongs to the transition that was
    /// in flight when the override started. A transition that began after the
    /// override keeps its claim.
    fn release_preempted(&self, held: u64) {
        if held != FREE {
            let _ = self
                .owner
                .compare_exchange(held, FREE, Ordering::SeqCst, Ordering::SeqCst);
        }
    }

    fn acquire(&self) -> Result<OwnerTicket<'_>, StateMachineError> {
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        self.owner
            .compare_exchange(FREE, ticket, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| {
                tracing::debug!("phase transition rejected: another transition in progress");
                StateMachineError::TransitionInProgress
            })?;
        Ok(OwnerTicket {
            owner: &self.owner,
            ticket,
        })
    }
}

impl std::fmt::Debug for PhaseStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhaseStateMachine")
            .field("current_phase", &self.get_current_phase())
            .field("is_transitioning", &self.is_transitioning())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

/// Releases the exclusive section on every exit path, unwinding included.
///
/// Only clears the marker if it still holds this ticket: a forced override
/// may have cleared it and a later transition may own it by now.
struct OwnerTicket<'a> {
    owner: &'a AtomicU64,
    ticket: u64,
}

impl Drop for OwnerTicket<'_> {
    fn drop(&mut self) {
        let _ = self
            .owner
            .compare_exchange(self.ticket, FREE, Ordering::SeqCst, Ordering::SeqCst);
    }
}

const fn pack(generation: u64, phase: Phase) -> u64 {
    (generation << PHASE_BITS) | phase.index()
}

const fn generation(word: u64) -> u64 {
    word >> PHASE_BITS
}

fn unpack_phase(word: u64) -> Phase {
    // only ever written through `pack`
    Phase::ALL[(word & PHASE_MASK) as usize]
}
