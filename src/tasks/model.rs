use serde::{Deserialize, Serialize};

/// Analysis task status.
///
/// Progression is strictly `Pending -> Processing -> {Completed | Failed}`;
/// the derived ordering follows it. The backend's `CANCELLED` is read as
/// `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskStatus {
    #[serde(alias = "pending")]
    Pending,
    #[serde(alias = "processing")]
    Processing,
    #[serde(alias = "completed")]
    Completed,
    #[serde(alias = "failed", alias = "CANCELLED", alias = "cancelled")]
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Processing => "PROCESSING",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
        }
    }

    /// Progress a record carries when it enters this status without any
    /// other information.
    pub fn baseline_progress(self) -> u8 {
        match self {
            TaskStatus::Completed => 100,
            _ => 0,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dashboard label for a status; `None` means analysis was never started.
pub fn status_label_cn(status: Option<TaskStatus>) -> &'static str {
    match status {
        Some(TaskStatus::Pending) => "等待中",
        Some(TaskStatus::Processing) => "分析中",
        Some(TaskStatus::Completed) => "已分析",
        Some(TaskStatus::Failed) => "分析失败",
        None => "未分析",
    }
}

/// Current state of the analysis for one dataset.
///
/// `task_id` is `None` only when the start request itself failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskRecord {
    pub data_id: String,
    pub task_id: Option<String>,
    pub status: TaskStatus,
    pub progress: u8,
    pub message: Option<String>,
}

impl TaskRecord {
    pub fn created(data_id: &str, task_id: &str) -> Self {
        Self {
            data_id: data_id.to_string(),
            task_id: Some(task_id.to_string()),
            status: TaskStatus::Pending,
            progress: 0,
            message: None,
        }
    }

    pub fn start_failed(data_id: &str, message: impl Into<String>) -> Self {
        Self {
            data_id: data_id.to_string(),
            task_id: None,
            status: TaskStatus::Failed,
            progress: 0,
            message: Some(message.into()),
        }
    }

    pub fn label(&self) -> &'static str {
        status_label_cn(Some(self.status))
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Status and progress change together.
    pub(crate) fn set(&mut self, status: TaskStatus, progress: u8) {
        self.status = status;
        self.progress = progress;
    }
}

/// Pushed to subscribers after every change to a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskEvent {
    pub data_id: String,
    pub task_id: Option<String>,
    pub status: TaskStatus,
    pub progress: u8,
    pub label: &'static str,
}

impl From<&TaskRecord> for TaskEvent {
    fn from(record: &TaskRecord) -> Self {
        Self {
            data_id: record.data_id.clone(),
            task_id: record.task_id.clone(),
            status: record.status,
            progress: record.progress,
            label: record.label(),
        }
    }
}
