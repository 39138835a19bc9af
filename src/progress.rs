/**
 * Progress Estimation
 *
 * Backends do not always report a real percentage, so a running task shows a
 * time-based estimate instead. The estimate never reaches 100 on its own:
 * only a confirmed completion does that.
 */
use std::time::Duration;

use tokio::time::Instant;

use crate::config::DEFAULT_PROGRESS_BUDGET_MS;

/// Highest value an estimate (or any non-terminal progress) may take
pub const MAX_ESTIMATE: u8 = 99;

/// Time source for the poller. The default follows tokio's clock, which tests
/// can pause and advance.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressEstimator {
    budget: Duration,
}

impl Default for ProgressEstimator {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_PROGRESS_BUDGET_MS))
    }
}

impl ProgressEstimator {
    pub fn new(budget: Duration) -> Self {
        Self { budget }
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    pub fn estimate(&self, start: Instant, now: Instant) -> u8 {
        estimate(start, now, self.budget)
    }
}

/// Linear share of `budget` elapsed between `start` and `now`, floored and
/// clamped to `0..=99`. A `now` before `start` counts as no time elapsed.
pub fn estimate(start: Instant, now: Instant, budget: Duration) -> u8 {
    let budget_ms = budget.as_millis();
    if budget_ms == 0 {
        return MAX_ESTIMATE;
    }
    let elapsed_ms = now.saturating_duration_since(start).as_millis();
    let percent = elapsed_ms.saturating_mul(100) / budget_ms;
    percent.min(u128::from(MAX_ESTIMATE)) as u8
}
