#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use analysis_client::api::{
    AnalysisBackend, AnalysisResult, ChatBackend, ChatMessage, ChatRoom, CreatedTask,
    StatusReport, TaskSummary,
};
use analysis_client::stream::ByteStream;
use analysis_client::{ClientError, Result, TaskStatus};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;

/// One scripted answer to a status query
pub enum Tick {
    Report(StatusReport),
    TransportError,
}

pub fn report(status: TaskStatus) -> Tick {
    Tick::Report(StatusReport::new(status))
}

pub fn report_at(status: TaskStatus, progress: u8) -> Tick {
    Tick::Report(StatusReport::new(status).with_progress(progress))
}

/// In-memory backend replaying a fixed script per task id. When a script runs
/// out the last answer repeats.
#[derive(Default)]
pub struct ScriptedBackend {
    next_task: AtomicUsize,
    fail_create: Mutex<Option<String>>,
    scripts: Mutex<HashMap<String, VecDeque<Tick>>>,
    last: Mutex<HashMap<String, StatusReport>>,
    status_calls: Mutex<HashMap<String, usize>>,
    summaries: Mutex<Vec<TaskSummary>>,
    list_delay: Mutex<Option<Duration>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script for the task that the next `create_task` call will return.
    pub fn script_next(&self, ticks: Vec<Tick>) -> String {
        let id = format!("task-{}", self.next_task.load(Ordering::SeqCst) + 1);
        self.script(&id, ticks);
        id
    }

    pub fn script(&self, task_id: &str, ticks: Vec<Tick>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(task_id.to_string(), ticks.into_iter().collect());
    }

    pub fn fail_next_create(&self, message: &str) {
        *self.fail_create.lock().unwrap() = Some(message.to_string());
    }

    pub fn set_summaries(&self, rows: Vec<(&str, &str, TaskStatus)>) {
        *self.summaries.lock().unwrap() = rows
            .into_iter()
            .map(|(data_id, task_id, status)| TaskSummary {
                data_id: data_id.to_string(),
                task_id: task_id.to_string(),
                status,
            })
            .collect();
    }

    /// Make `list_tasks` take this long before answering.
    pub fn delay_listing(&self, delay: Duration) {
        *self.list_delay.lock().unwrap() = Some(delay);
    }

    pub fn status_calls(&self, task_id: &str) -> usize {
        self.status_calls
            .lock()
            .unwrap()
            .get(task_id)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl AnalysisBackend for ScriptedBackend {
    async fn list_tasks(&self) -> Result<Vec<TaskSummary>> {
        let delay = *self.list_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.summaries.lock().unwrap().clone())
    }

    async fn create_task(&self, _data_id: &str) -> Result<CreatedTask> {
        if let Some(message) = self.fail_create.lock().unwrap().take() {
            return Err(ClientError::Api {
                status: 404,
                message,
            });
        }
        let n = self.next_task.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(CreatedTask {
            task_id: format!("task-{}", n),
            status: TaskStatus::Pending,
        })
    }

    async fn task_status(&self, task_id: &str) -> Result<StatusReport> {
        *self
            .status_calls
            .lock()
            .unwrap()
            .entry(task_id.to_string())
            .or_insert(0) += 1;

        let next = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(task_id)
            .and_then(|script| script.pop_front());
        match next {
            Some(Tick::Report(report)) => {
                self.last
                    .lock()
                    .unwrap()
                    .insert(task_id.to_string(), report.clone());
                Ok(report)
            }
            Some(Tick::TransportError) => Err(ClientError::Stream("connection reset".into())),
            None => self
                .last
                .lock()
                .unwrap()
                .get(task_id)
                .cloned()
                .ok_or_else(|| ClientError::not_found(task_id.to_string())),
        }
    }

    async fn task_results(&self, task_id: &str) -> Result<AnalysisResult> {
        Ok(serde_json::from_value(serde_json::json!({
            "taskid": task_id,
            "dataid": "7",
            "created_at": "2025-03-01T08:30:00Z",
            "summary": "ok",
            "detailed_results": {"rows": 3}
        }))?)
    }
}

/// Chat backend that answers every question with the same chunked body.
pub struct ScriptedChat {
    pub chunks: Vec<std::result::Result<Vec<u8>, String>>,
    pub history: Vec<ChatMessage>,
    pub questions: Mutex<Vec<(String, Option<String>, String)>>,
}

impl ScriptedChat {
    pub fn new(chunks: Vec<&str>) -> Self {
        Self::from_bytes(chunks.into_iter().map(|c| c.as_bytes().to_vec()).collect())
    }

    pub fn from_bytes(chunks: Vec<Vec<u8>>) -> Self {
        Self {
            chunks: chunks.into_iter().map(Ok).collect(),
            history: Vec::new(),
            questions: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ChatBackend for ScriptedChat {
    async fn chat_room(&self, task_id: &str) -> Result<ChatRoom> {
        Ok(ChatRoom {
            id: format!("room-{}", task_id),
            task_id: task_id.to_string(),
            user_id: None,
        })
    }

    async fn history(&self, _chat_id: &str) -> Result<Vec<ChatMessage>> {
        Ok(self.history.clone())
    }

    async fn send_stream(
        &self,
        chat_id: &str,
        kb_id: Option<&str>,
        question: &str,
    ) -> Result<ByteStream> {
        self.questions.lock().unwrap().push((
            chat_id.to_string(),
            kb_id.map(str::to_string),
            question.to_string(),
        ));
        let chunks: Vec<Result<Bytes>> = self
            .chunks
            .iter()
            .map(|c| match c {
                Ok(bytes) => Ok(Bytes::from(bytes.clone())),
                Err(e) => Err(ClientError::Stream(e.clone())),
            })
            .collect();
        Ok(futures_util::stream::iter(chunks).boxed())
    }
}
