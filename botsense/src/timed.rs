//! Deadline-bounded async work.
//!
//! `TimedOperation` races a unit of work against a timer. The work gets a
//! child `CancellationToken`; on expiry the token is cancelled and the work
//! future is dropped, so nothing keeps running on behalf of an abandoned call
//! unless a collaborator detached it and ignores the token.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{BotError, Result};

/// Wall-clock budget for one bounded operation, in milliseconds.
///
/// Signed so that misconfigured zero or negative budgets are representable
/// and can be rejected explicitly instead of wrapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimeoutBudget(i64);

impl TimeoutBudget {
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    pub const fn as_millis(self) -> i64 {
        self.0
    }

    /// `None` when the budget is already spent (zero or negative).
    pub fn duration(self) -> Option<Duration> {
        u64::try_from(self.0)
            .ok()
            .filter(|millis| *millis > 0)
            .map(Duration::from_millis)
    }

    /// Instant at which this budget, started at `start`, runs out.
    pub fn deadline_from(self, start: Instant) -> Instant {
        start + self.duration().unwrap_or_default()
    }
}

pub struct TimedOperation {
    label: String,
    budget: TimeoutBudget,
    expiry: Option<BotError>,
    parent: Option<CancellationToken>,
    deadline: Option<Instant>,
}

impl TimedOperation {
    pub fn new(label: impl Into<String>, budget: TimeoutBudget) -> Self {
        Self {
            label: label.into(),
            budget,
            expiry: None,
            parent: None,
            deadline: None,
        }
    }

    /// Error to raise when the budget runs out instead of `TimeoutExceeded`.
    pub fn on_expiry(mut self, error: BotError) -> Self {
        self.expiry = Some(error);
        self
    }

    /// Tie the work's token to a caller-owned token.
    pub fn with_parent(mut self, parent: &CancellationToken) -> Self {
        self.parent = Some(parent.clone());
        self
    }

    /// Share a deadline with earlier steps of the same operation. The work
    /// gets whatever is left of it, never more than the budget.
    pub fn until(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Run `work` under the budget.
    ///
    /// A non-positive budget fails before `work` is even constructed. When the
    /// work settles first its result is returned untouched, error or not.
    pub async fn run<T, F, Fut>(self, work: F) -> Result<T>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let Some(duration) = self.budget.duration() else {
            warn!(
                operation = %self.label,
                budget_ms = self.budget.as_millis(),
                "Operation budget is not positive, failing immediately"
            );
            return Err(self.into_expiry_error());
        };

        let now = Instant::now();
        let deadline = match self.deadline {
            Some(deadline) => deadline.min(now + duration),
            None => now + duration,
        };
        if deadline <= now {
            warn!(
                operation = %self.label,
                budget_ms = self.budget.as_millis(),
                "Operation deadline already passed, failing immediately"
            );
            return Err(self.into_expiry_error());
        }

        let token = match &self.parent {
            Some(parent) => parent.child_token(),
            None => CancellationToken::new(),
        };
        if token.is_cancelled() {
            return Err(BotError::Cancelled(self.label));
        }

        let race = tokio::time::timeout_at(deadline, work(token.clone()));

        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!(operation = %self.label, "Operation cancelled by caller");
                return Err(BotError::Cancelled(self.label));
            }
            outcome = race => outcome,
        };

        match outcome {
            Ok(result) => result,
            Err(_elapsed) => {
                token.cancel();
                warn!(
                    operation = %self.label,
                    budget_ms = self.budget.as_millis(),
                    "Operation exceeded its budget"
                );
                Err(self.into_expiry_error())
            }
        }
    }

    fn into_expiry_error(self) -> BotError {
        match self.expiry {
            Some(error) => error,
            None => BotError::timed_out(&self.label, self.budget.as_millis()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_budget_duration() {
        assert_eq!(
            TimeoutBudget::from_millis(1500).duration(),
            Some(Duration::from_millis(1500))
        );
        assert_eq!(TimeoutBudget::from_millis(0).duration(), None);
        assert_eq!(TimeoutBudget::from_millis(-20).duration(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_work_settling_first_returns_its_value() {
        let seen_token = Arc::new(std::sync::Mutex::new(None));
        let seen = Arc::clone(&seen_token);

        let result = TimedOperation::new("quick", TimeoutBudget::from_millis(1_000))
            .run(|token| async move {
                *seen.lock().unwrap() = Some(token);
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok::<_, BotError>(42)
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        let token = seen_token.lock().unwrap().take().unwrap();
        assert!(!token.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_work_error_propagates_unchanged() {
        let result: Result<()> = TimedOperation::new("failing", TimeoutBudget::from_millis(1_000))
            .run(|_| async { Err(BotError::Analysis("boom".to_string())) })
            .await;

        match result {
            Err(BotError::Analysis(msg)) => assert_eq!(msg, "boom"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_settling_work_times_out_after_budget() {
        let start = Instant::now();

        let result: Result<()> = TimedOperation::new("stuck", TimeoutBudget::from_millis(250))
            .run(|_| std::future::pending())
            .await;

        let elapsed = start.elapsed();
        assert!(matches!(
            result,
            Err(BotError::TimeoutExceeded { ref operation, budget_ms: 250 }) if operation == "stuck"
        ));
        assert!(elapsed >= Duration::from_millis(250));
        assert!(elapsed < Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_cancels_work_token() {
        let observed = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&observed);
        let watcher = Arc::new(std::sync::Mutex::new(None));
        let slot = Arc::clone(&watcher);

        let result: Result<()> = TimedOperation::new("slow", TimeoutBudget::from_millis(50))
            .run(|token| async move {
                *slot.lock().unwrap() = Some(token.clone());
                tokio::time::sleep(Duration::from_secs(60)).await;
                flag.store(true, Ordering::SeqCst);
                Ok(())
            })
            .await;

        assert!(result.unwrap_err().is_timeout());
        let token = watcher.lock().unwrap().take().unwrap();
        assert!(token.is_cancelled());

        tokio::time::advance(Duration::from_secs(120)).await;
        assert!(!observed.load(Ordering::SeqCst), "dropped work must not resume");
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_expiry_error() {
        let result: Result<()> = TimedOperation::new("fetch", TimeoutBudget::from_millis(10))
            .on_expiry(BotError::Fetch("body not read in time".to_string()))
            .run(|_| std::future::pending())
            .await;

        assert!(matches!(result, Err(BotError::Fetch(_))));
    }

    #[tokio::test]
    async fn test_non_positive_budget_fails_without_running_work() {
        let calls = Arc::new(AtomicUsize::new(0));

        for budget in [0, -1, i64::MIN] {
            let counter = Arc::clone(&calls);
            let result: Result<()> = TimedOperation::new("instant", TimeoutBudget::from_millis(budget))
                .run(|_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async { Ok(()) }
                })
                .await;
            assert!(result.unwrap_err().is_timeout());
        }

        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_parent_cancellation_surfaces_as_cancelled() {
        let parent = CancellationToken::new();
        let trigger = parent.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            trigger.cancel();
        });

        let result: Result<()> = TimedOperation::new("shutdown", TimeoutBudget::from_millis(10_000))
            .with_parent(&parent)
            .run(|_| std::future::pending())
            .await;

        assert!(matches!(result, Err(BotError::Cancelled(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shared_deadline_cuts_work_short() {
        let budget = TimeoutBudget::from_millis(1_000);
        let deadline = budget.deadline_from(Instant::now());
        tokio::time::sleep(Duration::from_millis(700)).await;

        let start = Instant::now();
        let result: Result<()> = TimedOperation::new("second step", budget)
            .until(deadline)
            .run(|_| std::future::pending())
            .await;

        let elapsed = start.elapsed();
        assert!(matches!(
            result,
            Err(BotError::TimeoutExceeded { budget_ms: 1_000, .. })
        ));
        assert!(elapsed >= Duration::from_millis(300));
        assert!(elapsed < Duration::from_millis(350));
    }

    #[tokio::test(start_paused = true)]
    async fn test_spent_deadline_fails_without_running_work() {
        let budget = TimeoutBudget::from_millis(200);
        let deadline = budget.deadline_from(Instant::now());
        tokio::time::sleep(Duration::from_millis(250)).await;

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let result: Result<()> = TimedOperation::new("late", budget)
            .until(deadline)
            .run(|_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;

        assert!(result.unwrap_err().is_timeout());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_later_deadline_never_extends_budget() {
        let start = Instant::now();
        let result: Result<()> = TimedOperation::new("capped", TimeoutBudget::from_millis(100))
            .until(start + Duration::from_secs(60))
            .run(|_| std::future::pending())
            .await;

        assert!(result.unwrap_err().is_timeout());
        assert!(start.elapsed() < Duration::from_millis(150));
    }

    #[tokio::test(start_paused = true)]
    async fn test_many_sequential_runs_do_not_accumulate() {
        for i in 0..1_000 {
            let value = TimedOperation::new("loop", TimeoutBudget::from_millis(100))
                .run(|_| async move { Ok::<_, BotError>(i) })
                .await
                .unwrap();
            assert_eq!(value, i);
        }
    }
}
