use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::broadcast;

use super::model::{TaskEvent, TaskRecord};

/// Capacity of the event channel; slow subscribers see `Lagged` past this.
const EVENT_CAPACITY: usize = 256;

/// Records keyed by data id, plus the broadcast channel that announces every
/// change to them. Cloning shares the same state.
#[derive(Clone)]
pub(crate) struct TaskStore {
    records: Arc<Mutex<HashMap<String, TaskRecord>>>,
    tx: broadcast::Sender<TaskEvent>,
}

impl TaskStore {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CAPACITY);
        Self {
            records: Arc::new(Mutex::new(HashMap::new())),
            tx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, TaskRecord>> {
        // A panic while holding the lock cannot leave a record half-written
        // (status and progress are assigned together), so keep going.
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.tx.subscribe()
    }

    fn publish(&self, record: &TaskRecord) {
        // No subscribers is fine
        let _ = self.tx.send(TaskEvent::from(record));
    }

    pub(crate) fn get(&self, data_id: &str) -> Option<TaskRecord> {
        self.lock().get(data_id).cloned()
    }

    pub(crate) fn all(&self) -> Vec<TaskRecord> {
        let mut records: Vec<_> = self.lock().values().cloned().collect();
        records.sort_by(|a, b| a.data_id.cmp(&b.data_id));
        records
    }

    /// Insert or replace the record for its data id.
    pub(crate) fn put(&self, record: TaskRecord) {
        // Publish under the lock so event order matches mutation order
        let mut records = self.lock();
        self.publish(&record);
        records.insert(record.data_id.clone(), record);
    }

    /// Mutate the record for `data_id` only while it still belongs to
    /// `task_id`. Returns `None` when the record is gone or has been
    /// superseded by another run. `f` reports whether it changed anything.
    pub(crate) fn update<F, R>(&self, data_id: &str, task_id: &str, f: F) -> Option<R>
    where
        F: FnOnce(&mut TaskRecord) -> (bool, R),
    {
        let mut records = self.lock();
        let record = records.get_mut(data_id)?;
        if record.task_id.as_deref() != Some(task_id) {
            return None;
        }
        let (changed, out) = f(record);
        if changed {
            self.publish(record);
        }
        Some(out)
    }

    pub(crate) fn clear(&self) -> usize {
        let mut records = self.lock();
        let n = records.len();
        records.clear();
        n
    }
}
