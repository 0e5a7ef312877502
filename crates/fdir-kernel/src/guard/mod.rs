//! Bounded execution guard
//!
//! Runs a unit of work under a deadline. The guard owns the work's task
//! until it has observed the task terminate: on timeout it cancels the task
//! and then awaits it, so by the time the guard returns the work's future
//! has been dropped and nothing it spawned for the work is still scheduled.
//!
//! The outcome is decided at exactly one point, the race between the task
//! and the deadline (polled in that order). A value the work produces while
//! it is being torn down after a timeout decision is dropped.

use crate::config::GuardConfig;
use crate::error::GuardError;
use std::any::Any;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

/// Deadline wrapper for recovery actions. Clones share the in-flight count.
#[derive(Debug, Clone, Default)]
pub struct ExecutionGuard {
    config: GuardConfig,
    in_flight: Arc<AtomicUsize>,
}

impl ExecutionGuard {
    /// Create a guard
    #[must_use]
    pub fn new(config: GuardConfig) -> Self {
        Self {
            config,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Units of work started by this guard whose futures have not been dropped yet
    #[inline]
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Guard settings
    #[inline]
    #[must_use]
    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    /// Run `work` with the configured default deadline
    ///
    /// # Errors
    /// As [`Self::run`].
    pub async fn run_with_default_deadline<F>(&self, work: F) -> Result<F::Output, GuardError>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.run(self.config.default_deadline(), work).await
    }

    /// Run `work`, giving up after `deadline`.
    ///
    /// On timeout the work is aborted at its next suspension point and the
    /// guard waits for it to actually stop before returning.
    ///
    /// # Errors
    /// - [`GuardError::Timeout`] if the deadline elapsed first
    /// - [`GuardError::Panicked`] if the work panicked
    /// - [`GuardError::Cancelled`] if the runtime cancelled the work
    pub async fn run<F>(&self, deadline: Duration, work: F) -> Result<F::Output, GuardError>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let mut tasks = self.spawn(work);
        if let Some(outcome) = race(&mut tasks, deadline).await {
            return outcome;
        }

        tasks.abort_all();
        drain(&mut tasks).await;
        Err(self.timed_out(deadline))
    }

    /// Run the work built by `make_work`, which receives a token that is
    /// cancelled when the deadline elapses.
    ///
    /// After the deadline the work has the configured grace period to notice
    /// the token and return; if it does not, it is aborted. Either way the
    /// guard waits for it to stop before returning the timeout.
    ///
    /// # Errors
    /// As [`Self::run`].
    pub async fn run_cancellable<M, F>(
        &self,
        deadline: Duration,
        make_work: M,
    ) -> Result<F::Output, GuardError>
    where
        M: FnOnce(CancellationToken) -> F,
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let token = CancellationToken::new();
        let _cancel_on_exit = token.clone().drop_guard();

        let mut tasks = self.spawn(make_work(token.clone()));
        if let Some(outcome) = race(&mut tasks, deadline).await {
            return outcome;
        }

        token.cancel();
        let grace = self.config.grace_period();
        if tokio::time::timeout(grace, drain(&mut tasks)).await.is_err() {
            tracing::warn!(?grace, "guarded work ignored cancellation, aborting");
            tasks.abort_all();
            drain(&mut tasks).await;
        }
        Err(self.timed_out(deadline))
    }

    fn spawn<F>(&self, work: F) -> JoinSet<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let slot = Slot::take(&self.in_flight);
        let mut tasks = JoinSet::new();
        tasks.spawn(async move {
            let _slot = slot;
            work.await
        });
        tasks
    }

    fn timed_out(&self, deadline: Duration) -> GuardError {
        tracing::warn!(?deadline, in_flight = self.in_flight(), "guarded work timed out and was torn down");
        metrics::counter!("fdir_guard_timeouts_total").increment(1);
        GuardError::Timeout { deadline }
    }
}

/// Counts one unit of work as in flight until its future is dropped
struct Slot(Arc<AtomicUsize>);

impl Slot {
    fn take(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// `Some(outcome)` if the work finished before the deadline, `None` otherwise
async fn race<T: 'static>(
    tasks: &mut JoinSet<T>,
    deadline: Duration,
) -> Option<Result<T, GuardError>> {
    tokio::select! {
        biased;
        joined = tasks.join_next() => Some(completed(joined)),
        () = tokio::time::sleep(deadline) => None,
    }
}

/// Waits until every task in the set has terminated
async fn drain<T: 'static>(tasks: &mut JoinSet<T>) {
    while let Some(joined) = tasks.join_next().await {
        if joined.is_ok() {
            tracing::debug!("guarded work finished during teardown, result discarded");
        }
    }
}

fn completed<T>(joined: Option<Result<T, JoinError>>) -> Result<T, GuardError> {
    metrics::counter!("fdir_guard_completions_total").increment(1);
    match joined {
        Some(Ok(value)) => Ok(value),
        Some(Err(e)) if e.is_panic() => Err(GuardError::Panicked(panic_message(e.into_panic()))),
        Some(Err(_)) | None => Err(GuardError::Cancelled),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}
