/**
 * Backend API
 *
 * The traits are the injection points for the task registry and the chat
 * session; `HttpBackend` implements both against the REST endpoints.
 */
mod client;
pub mod types;

use async_trait::async_trait;

pub use client::HttpBackend;
pub use types::{
    AnalysisResult, ChatMessage, ChatRole, ChatRoom, CreatedTask, StatusReport, TaskSummary,
};

use crate::error::Result;
use crate::stream::ByteStream;

#[async_trait]
pub trait AnalysisBackend: Send + Sync {
    /// `GET /analysis`
    async fn list_tasks(&self) -> Result<Vec<TaskSummary>>;

    /// `POST /analysis/start`
    async fn create_task(&self, data_id: &str) -> Result<CreatedTask>;

    /// `GET /analysis/status/{taskId}`
    async fn task_status(&self, task_id: &str) -> Result<StatusReport>;

    /// `GET /analysis/results/{taskId}`
    async fn task_results(&self, task_id: &str) -> Result<AnalysisResult>;
}

#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// `GET /chat/{taskId}`: the chat room attached to an analysis task
    async fn chat_room(&self, task_id: &str) -> Result<ChatRoom>;

    /// `GET /chat/history/{chatId}`
    async fn history(&self, chat_id: &str) -> Result<Vec<ChatMessage>>;

    /// `POST /chat/send/{chatId}`: opens the streamed answer body
    async fn send_stream(
        &self,
        chat_id: &str,
        kb_id: Option<&str>,
        question: &str,
    ) -> Result<ByteStream>;
}
