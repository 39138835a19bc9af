/**
 * Task Poller
 *
 * One repeating tick per live task. Each tick queries the backend once and
 * folds the answer into the shared record; a terminal answer (or a failed
 * query) ends the loop. The next tick is only scheduled after the current one
 * has finished, so ticks for a task never overlap.
 */
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use super::model::{TaskRecord, TaskStatus};
use super::store::TaskStore;
use crate::api::{AnalysisBackend, StatusReport};
use crate::config::{ClientConfig, DEFAULT_POLL_INTERVAL_MS};
use crate::progress::{Clock, ProgressEstimator, MAX_ESTIMATE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerConfig {
    pub interval: Duration,
    pub estimator: ProgressEstimator,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            estimator: ProgressEstimator::default(),
        }
    }
}

impl From<&ClientConfig> for PollerConfig {
    fn from(config: &ClientConfig) -> Self {
        Self {
            interval: config.poll_interval(),
            estimator: ProgressEstimator::new(config.progress_budget()),
        }
    }
}

/// Result of folding one tick into a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Applied {
    pub changed: bool,
    pub terminal: bool,
}

/// Fold a status report into `record`.
///
/// Terminal records are left alone. `Processing` takes the backend's
/// percentage when it sends one and the time estimate otherwise, capped at 99
/// and never lower than what the record already shows. A `Pending` report
/// changes nothing, including after the task has been seen processing.
pub fn apply_report(record: &mut TaskRecord, report: &StatusReport, estimated: u8) -> Applied {
    if record.is_terminal() {
        return Applied {
            changed: false,
            terminal: true,
        };
    }
    if report.message.is_some() {
        record.message = report.message.clone();
    }

    match report.status {
        TaskStatus::Pending => Applied {
            changed: false,
            terminal: false,
        },
        TaskStatus::Processing => {
            let target = report.progress.unwrap_or(estimated).min(MAX_ESTIMATE);
            let progress = record.progress.max(target);
            let changed = record.status != TaskStatus::Processing || record.progress != progress;
            record.set(TaskStatus::Processing, progress);
            Applied {
                changed,
                terminal: false,
            }
        }
        TaskStatus::Completed => {
            record.set(TaskStatus::Completed, 100);
            Applied {
                changed: true,
                terminal: true,
            }
        }
        TaskStatus::Failed => apply_failure(record),
    }
}

/// A failed status query ends the task as `Failed` at 0%.
pub fn apply_failure(record: &mut TaskRecord) -> Applied {
    if record.is_terminal() {
        return Applied {
            changed: false,
            terminal: true,
        };
    }
    record.set(TaskStatus::Failed, 0);
    Applied {
        changed: true,
        terminal: true,
    }
}

/// Owner of a running poll loop. Cancelling (or dropping) the handle stops
/// the loop before its next tick, or aborts the query in flight.
#[derive(Debug)]
pub struct PollHandle {
    task_id: String,
    cancel: Option<oneshot::Sender<()>>,
    join: JoinHandle<()>,
}

impl PollHandle {
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// False once the loop has returned, for whatever reason.
    pub fn is_live(&self) -> bool {
        !self.join.is_finished()
    }

    /// Stop the loop. Only the first call does anything; returns whether
    /// the loop was still listening.
    pub fn cancel(&mut self) -> bool {
        match self.cancel.take() {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

pub struct TaskPoller {
    backend: Arc<dyn AnalysisBackend>,
    store: TaskStore,
    clock: Arc<dyn Clock>,
    config: PollerConfig,
}

impl TaskPoller {
    pub(crate) fn new(
        backend: Arc<dyn AnalysisBackend>,
        store: TaskStore,
        clock: Arc<dyn Clock>,
        config: PollerConfig,
    ) -> Self {
        Self {
            backend,
            store,
            clock,
            config,
        }
    }

    /// Start polling `task_id` on behalf of `data_id`. Must be called from
    /// within a tokio runtime.
    pub fn spawn(self, data_id: String, task_id: String) -> PollHandle {
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let handle_task_id = task_id.clone();
        let join = tokio::spawn(self.run(data_id, task_id, cancel_rx));
        PollHandle {
            task_id: handle_task_id,
            cancel: Some(cancel_tx),
            join,
        }
    }

    async fn run(self, data_id: String, task_id: String, mut cancel_rx: oneshot::Receiver<()>) {
        let started = self.clock.now();
        let period = self.config.interval;
        let mut ticker = time::interval_at(time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!("[Poller] Watching task {} (data {})", task_id, data_id);

        loop {
            tokio::select! {
                biased;
                _ = &mut cancel_rx => {
                    tracing::debug!("[Poller] Task {} cancelled", task_id);
                    return;
                }
                _ = ticker.tick() => {}
            }

            let result = tokio::select! {
                biased;
                _ = &mut cancel_rx => {
                    tracing::debug!("[Poller] Task {} cancelled mid-query", task_id);
                    return;
                }
                result = self.backend.task_status(&task_id) => result,
            };

            let outcome = match result {
                Ok(report) => {
                    let estimated = self.config.estimator.estimate(started, self.clock.now());
                    tracing::debug!(
                        "[Poller] Task {}: remote {} ({:?}), estimate {}%",
                        task_id,
                        report.status,
                        report.progress,
                        estimated
                    );
                    self.store.update(&data_id, &task_id, |record| {
                        let applied = apply_report(record, &report, estimated);
                        (applied.changed, applied)
                    })
                }
                Err(e) => {
                    tracing::error!("[Poller] Status query for task {} failed: {}", task_id, e);
                    self.store.update(&data_id, &task_id, |record| {
                        let applied = apply_failure(record);
                        (applied.changed, applied)
                    })
                }
            };

            match outcome {
                None => {
                    tracing::info!("[Poller] Task {} superseded or cleared, stopping", task_id);
                    return;
                }
                Some(applied) if applied.terminal => {
                    if let Some(record) = self.store.get(&data_id) {
                        tracing::info!(
                            "[Poller] Task {} finished: {} ({}%)",
                            task_id,
                            record.status,
                            record.progress
                        );
                    }
                    return;
                }
                Some(_) => {}
            }
        }
    }
}
