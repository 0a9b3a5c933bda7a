use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sentinel_types::SentinelError;
use tokio_util::sync::CancellationToken;

/// Injectable wall-clock seam so budget math is testable without real sleeps.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Named phase within the job budget hierarchy. Used only for error labels
/// and log fields.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BudgetPhase {
    Job,
    Planning,
    Validation,
    Step,
}

impl BudgetPhase {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Job => "job",
            Self::Planning => "planning",
            Self::Validation => "validation",
            Self::Step => "step",
        }
    }
}

/// A total duration, a start timestamp, and a label. Nested budgets (job ->
/// phase -> step) are built by repeatedly calling `cap`, never by sharing
/// mutable state between levels.
#[derive(Clone)]
pub struct TimeoutBudget {
    label: String,
    total: Duration,
    started_at: DateTime<Utc>,
    clock: Arc<dyn Clock>,
}

impl TimeoutBudget {
    pub fn new(label: impl Into<String>, total: Duration, clock: Arc<dyn Clock>) -> Self {
        let started_at = clock.now();
        Self { label: label.into(), total, started_at, clock }
    }

    pub fn with_system_clock(label: impl Into<String>, total: Duration) -> Self {
        Self::new(label, total, Arc::new(SystemClock))
    }

    pub fn elapsed(&self) -> Duration {
        let now = self.clock.now();
        (now - self.started_at).to_std().unwrap_or_default()
    }

    pub fn remaining(&self) -> Duration {
        self.total.saturating_sub(self.elapsed())
    }

    pub fn expired(&self) -> bool {
        self.remaining().is_zero()
    }

    /// `min(requested, remaining)`, or a *timeout* error when the budget is
    /// already exhausted. The returned duration belongs to the caller, who
    /// typically constructs a child `TimeoutBudget` for the next phase with it.
    pub fn cap(&self, requested: Duration, phase: BudgetPhase) -> Result<Duration, SentinelError> {
        if self.expired() {
            return Err(SentinelError::timeout(format!(
                "budget '{}' exhausted before phase '{}' could start",
                self.label,
                phase.as_str()
            )));
        }
        Ok(requested.min(self.remaining()))
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

/// Job -> planning/validation -> per-step budget hierarchy.
pub struct JobBudgetConfig {
    pub job_total: Duration,
    pub planning: Duration,
    pub validation: Duration,
    pub per_step: Duration,
}

impl Default for JobBudgetConfig {
    fn default() -> Self {
        Self {
            job_total: Duration::from_secs(300),
            planning: Duration::from_secs(60),
            validation: Duration::from_secs(30),
            per_step: Duration::from_secs(60),
        }
    }
}

/// A single cancellation handle that fires the first time any of: the local
/// timer elapses, a supplied parent token is cancelled, or the caller calls
/// `cancel()`. If any parent is already cancelled at construction, the
/// composite is cancelled synchronously before this function returns.
pub struct CompositeSignal {
    token: CancellationToken,
    _timer: Option<tokio::task::JoinHandle<()>>,
}

impl CompositeSignal {
    pub fn new(timeout: Option<Duration>, parents: &[CancellationToken]) -> Self {
        let token = CancellationToken::new();

        if parents.iter().any(CancellationToken::is_cancelled) {
            token.cancel();
            return Self { token, _timer: None };
        }

        for parent in parents {
            let child = token.clone();
            let parent = parent.clone();
            tokio::spawn(async move {
                parent.cancelled().await;
                child.cancel();
            });
        }

        let timer = timeout.map(|duration| {
            let child = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(duration).await;
                child.cancel();
            })
        });

        Self { token, _timer: timer }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Deregisters the timer task. Parent-watcher tasks self-terminate once
    /// the composite token is cancelled, since `token.cancelled()` also
    /// resolves when cancelled directly (not just by a parent).
    pub fn cleanup(self) {
        if let Some(timer) = self._timer {
            timer.abort();
        }
    }
}

/// Races `operation` against the composite signal built from `timeout`,
/// `budget`, and `parents`. On a timer win, the operation's own signal is
/// already cancelled so it can unwind; the returned error carries `label`.
pub async fn run_with_timeout<F, T>(
    label: &str,
    timeout: Duration,
    parents: &[CancellationToken],
    operation: F,
) -> Result<T, SentinelError>
where
    F: std::future::Future<Output = Result<T, SentinelError>>,
{
    let signal = CompositeSignal::new(Some(timeout), parents);
    let token = signal.token();

    tokio::select! {
        result = operation => {
            signal.cleanup();
            result
        }
        _ = token.cancelled() => {
            signal.cleanup();
            Err(SentinelError::timeout(format!("operation '{label}' timed out after {timeout:?}")))
        }
    }
}

/// `signal -> wait up to grace -> force`. Returns whether the operation
/// finished gracefully (true) or had to be force-killed (false).
pub async fn cancel_with_grace<F>(token: &CancellationToken, grace: Duration, operation_done: F) -> bool
where
    F: std::future::Future<Output = ()>,
{
    token.cancel();
    tokio::select! {
        _ = operation_done => true,
        _ = tokio::time::sleep(grace) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};

    struct FakeClock {
        offset_ms: AtomicI64,
        base: DateTime<Utc>,
    }

    impl FakeClock {
        fn new() -> Arc<Self> {
            Arc::new(Self { offset_ms: AtomicI64::new(0), base: Utc::now() })
        }

        fn advance(&self, ms: i64) {
            self.offset_ms.fetch_add(ms, Ordering::SeqCst);
        }
    }

    impl Clock for FakeClock {
        fn now(&self) -> DateTime<Utc> {
            self.base + chrono::Duration::milliseconds(self.offset_ms.load(Ordering::SeqCst))
        }
    }

    #[test]
    fn remaining_clamps_to_zero_past_total() {
        let clock = FakeClock::new();
        let budget = TimeoutBudget::new("job", Duration::from_secs(10), clock.clone());
        clock.advance(20_000);
        assert_eq!(budget.remaining(), Duration::ZERO);
        assert!(budget.expired());
    }

    #[test]
    fn cap_returns_min_of_requested_and_remaining() {
        let clock = FakeClock::new();
        let budget = TimeoutBudget::new("job", Duration::from_secs(10), clock.clone());
        clock.advance(4_000);
        let capped = budget.cap(Duration::from_secs(60), BudgetPhase::Planning).unwrap();
        assert_eq!(capped, Duration::from_secs(6));
    }

    #[test]
    fn cap_fails_with_timeout_when_budget_exhausted() {
        let clock = FakeClock::new();
        let budget = TimeoutBudget::new("job", Duration::from_secs(10), clock.clone());
        clock.advance(10_000);
        let err = budget.cap(Duration::from_secs(5), BudgetPhase::Validation).unwrap_err();
        assert_eq!(err.kind, sentinel_types::ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn composite_signal_fires_on_timer() {
        let signal = CompositeSignal::new(Some(Duration::from_millis(10)), &[]);
        let token = signal.token();
        token.cancelled().await;
    }

    #[tokio::test]
    async fn composite_signal_is_cancelled_synchronously_if_parent_already_cancelled() {
        let parent = CancellationToken::new();
        parent.cancel();
        let signal = CompositeSignal::new(None, &[parent]);
        assert!(signal.token().is_cancelled());
    }

    #[tokio::test]
    async fn run_with_timeout_returns_timeout_error_on_slow_operation() {
        let result = run_with_timeout::<_, ()>("slow-op", Duration::from_millis(10), &[], async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        assert!(result.is_err());
        assert_eq!(result.unwrap_err().kind, sentinel_types::ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn run_with_timeout_returns_ok_when_operation_wins() {
        let result = run_with_timeout("fast-op", Duration::from_secs(5), &[], async { Ok::<_, SentinelError>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }
}
