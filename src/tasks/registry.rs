/**
 * Task Registry
 *
 * Maps each dataset to its current analysis task. The registry is the only
 * place that creates or replaces records; the poller it starts for a task is
 * the only thing that advances that record afterwards. At most one poller is
 * live per dataset (and therefore per task id).
 */
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::{Stream, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use super::model::{status_label_cn, TaskEvent, TaskRecord, TaskStatus};
use super::poller::{PollHandle, PollerConfig, TaskPoller};
use super::store::TaskStore;
use crate::api::{AnalysisBackend, AnalysisResult};
use crate::error::{ClientError, Result};
use crate::progress::{Clock, TokioClock};

/// Counts local replacements of each record. A backend listing compares
/// against the counts taken before its request to spot datasets that moved on
/// while it was in flight.
#[derive(Debug, Clone, Default)]
struct Generations {
    epoch: u64,
    per_data: HashMap<String, u64>,
}

impl Generations {
    fn bump(&mut self, data_id: &str) {
        *self.per_data.entry(data_id.to_string()).or_insert(0) += 1;
    }

    fn changed_since(&self, earlier: &Generations, data_id: &str) -> bool {
        self.epoch != earlier.epoch || self.per_data.get(data_id) != earlier.per_data.get(data_id)
    }
}

pub struct TaskRegistry {
    backend: Arc<dyn AnalysisBackend>,
    clock: Arc<dyn Clock>,
    config: PollerConfig,
    store: TaskStore,
    pollers: Mutex<HashMap<String, PollHandle>>,
    // Taken before the pollers lock whenever both are held
    generations: Mutex<Generations>,
}

impl TaskRegistry {
    pub fn new(backend: Arc<dyn AnalysisBackend>, config: PollerConfig) -> Self {
        Self::with_clock(backend, config, Arc::new(TokioClock))
    }

    pub fn with_clock(
        backend: Arc<dyn AnalysisBackend>,
        config: PollerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            backend,
            clock,
            config,
            store: TaskStore::new(),
            pollers: Mutex::new(HashMap::new()),
            generations: Mutex::new(Generations::default()),
        }
    }

    fn pollers(&self) -> MutexGuard<'_, HashMap<String, PollHandle>> {
        self.pollers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn generations(&self) -> MutexGuard<'_, Generations> {
        self.generations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Ask the backend for a new analysis of `data_id` and start watching it.
    ///
    /// On failure the dataset is recorded as `Failed` with no task id and no
    /// poller; the error is returned for the caller to report.
    pub async fn start(&self, data_id: &str) -> Result<String> {
        match self.backend.create_task(data_id).await {
            Ok(created) => {
                tracing::info!(
                    "[Registry] Analysis started for data {}: task {}",
                    data_id,
                    created.task_id
                );
                let mut generations = self.generations();
                generations.bump(data_id);
                self.store
                    .put(TaskRecord::created(data_id, &created.task_id));
                self.watch(data_id, &created.task_id);
                Ok(created.task_id)
            }
            Err(e) => {
                tracing::error!("[Registry] Failed to start analysis for data {}: {}", data_id, e);
                let mut generations = self.generations();
                generations.bump(data_id);
                self.stop_poller(data_id);
                self.store
                    .put(TaskRecord::start_failed(data_id, e.to_string()));
                Err(e)
            }
        }
    }

    /// Poll `task_id` for `data_id`, replacing any poller the dataset had.
    fn watch(&self, data_id: &str, task_id: &str) {
        let poller = TaskPoller::new(
            Arc::clone(&self.backend),
            self.store.clone(),
            Arc::clone(&self.clock),
            self.config,
        );
        let handle = poller.spawn(data_id.to_string(), task_id.to_string());
        let previous = self.pollers().insert(data_id.to_string(), handle);
        if let Some(mut old) = previous {
            if old.cancel() {
                tracing::info!(
                    "[Registry] Task {} superseded by {} for data {}",
                    old.task_id(),
                    task_id,
                    data_id
                );
            }
        }
    }

    fn stop_poller(&self, data_id: &str) -> bool {
        let removed = self.pollers().remove(data_id);
        removed.is_some_and(|mut handle| handle.cancel())
    }

    pub fn task_id(&self, data_id: &str) -> Option<String> {
        self.store.get(data_id).and_then(|r| r.task_id)
    }

    pub fn status(&self, data_id: &str) -> Option<TaskStatus> {
        self.store.get(data_id).map(|r| r.status)
    }

    pub fn record(&self, data_id: &str) -> Option<TaskRecord> {
        self.store.get(data_id)
    }

    /// All records, ordered by data id.
    pub fn records(&self) -> Vec<TaskRecord> {
        self.store.all()
    }

    /// Dashboard label, including "not analysed" for unknown datasets.
    pub fn label(&self, data_id: &str) -> &'static str {
        status_label_cn(self.status(data_id))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.store.subscribe()
    }

    /// Record changes as a stream. Events missed by a lagging consumer are
    /// skipped; the registry itself stays authoritative.
    pub fn events(&self) -> impl Stream<Item = TaskEvent> + Send + 'static {
        BroadcastStream::new(self.subscribe()).filter_map(|msg| async move {
            match msg {
                Ok(event) => Some(event),
                Err(lag) => {
                    tracing::warn!("[Registry] Event subscriber lagged: {}", lag);
                    None
                }
            }
        })
    }

    /// Number of poll loops still running.
    pub fn active_pollers(&self) -> usize {
        let mut pollers = self.pollers();
        pollers.retain(|_, handle| handle.is_live());
        pollers.len()
    }

    /// Load the backend's task list. Terminal tasks are recorded as they are;
    /// unfinished ones are polled. A dataset listed more than once keeps its
    /// last entry. Datasets already tracking the same task are left alone, and
    /// so are datasets started or cleared while the listing was in flight.
    pub async fn hydrate(&self) -> Result<usize> {
        let before = self.generations().clone();
        let summaries = self.backend.list_tasks().await?;

        let mut latest: HashMap<String, _> = HashMap::new();
        for summary in summaries {
            latest.insert(summary.data_id.clone(), summary);
        }

        let mut generations = self.generations();
        let mut loaded = 0;
        for (data_id, summary) in latest {
            if generations.changed_since(&before, &data_id) {
                tracing::debug!(
                    "[Registry] Data {} changed during hydration, keeping local task",
                    data_id
                );
                continue;
            }
            if self.task_id(&data_id).as_deref() == Some(summary.task_id.as_str()) {
                continue;
            }
            generations.bump(&data_id);
            let mut record = TaskRecord::created(&data_id, &summary.task_id);
            record.set(summary.status, summary.status.baseline_progress());
            self.stop_poller(&data_id);
            self.store.put(record);
            if !summary.status.is_terminal() {
                self.watch(&data_id, &summary.task_id);
            }
            loaded += 1;
        }
        tracing::info!("[Registry] Hydrated {} task(s) from backend", loaded);
        Ok(loaded)
    }

    /// Results of the completed analysis for `data_id`.
    pub async fn results(&self, data_id: &str) -> Result<AnalysisResult> {
        let record = self
            .store
            .get(data_id)
            .ok_or_else(|| ClientError::not_found(format!("no analysis for data {}", data_id)))?;
        match (&record.task_id, record.status) {
            (Some(task_id), TaskStatus::Completed) => self.backend.task_results(task_id).await,
            _ => Err(ClientError::not_found(format!(
                "analysis for data {} is {}",
                data_id,
                status_label_cn(Some(record.status))
            ))),
        }
    }

    /// Stop watching `data_id` without touching its record. Returns whether
    /// a poll loop was actually stopped.
    pub fn cancel(&self, data_id: &str) -> bool {
        let stopped = self.stop_poller(data_id);
        if stopped {
            tracing::info!("[Registry] Stopped polling data {}", data_id);
        }
        stopped
    }

    /// Stop every poller and forget every record (sign-out).
    pub fn clear(&self) {
        self.generations().epoch += 1;
        let handles: Vec<PollHandle> = self.pollers().drain().map(|(_, h)| h).collect();
        let stopped = handles
            .into_iter()
            .filter_map(|mut handle| handle.cancel().then_some(()))
            .count();
        let dropped = self.store.clear();
        tracing::info!(
            "[Registry] Cleared {} record(s), stopped {} poller(s)",
            dropped,
            stopped
        );
    }
}

impl Drop for TaskRegistry {
    fn drop(&mut self) {
        for (_, mut handle) in self.pollers().drain() {
            handle.cancel();
        }
    }
}
