use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::types::{
    parse_payload, AnalysisResult, ChatMessage, ChatRoom, CreatedTask, QuestionRequest,
    StartAnalysisRequest, StatusReport, TaskSummary,
};
use super::{AnalysisBackend, ChatBackend};
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::stream::ByteStream;

/// REST client for the analysis backend.
#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
    token: Option<String>,
    timeout: Duration,
}

impl HttpBackend {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        // Only the connect phase is bounded client-wide; streamed answers can
        // legitimately run longer than a JSON request.
        let client = Client::builder()
            .connect_timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            timeout: config.request_timeout(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.client.request(method, self.url(path));
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self
            .request(Method::GET, path)
            .timeout(self.timeout)
            .send()
            .await?;
        read_payload(response).await
    }

    async fn post_json<T, B>(&self, path: &str, body: &B) -> Result<T>
    where
        T: DeserializeOwned,
        B: serde::Serialize + Sync,
    {
        let response = self
            .request(Method::POST, path)
            .timeout(self.timeout)
            .json(body)
            .send()
            .await?;
        read_payload(response).await
    }
}

async fn ensure_success(response: Response) -> Result<Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Err(ClientError::Status { status, body })
}

async fn read_payload<T: DeserializeOwned>(response: Response) -> Result<T> {
    let response = ensure_success(response).await?;
    let text = response.text().await?;
    let value: Value = serde_json::from_str(&text)?;
    parse_payload(value)
}

fn encode(segment: &str) -> String {
    urlencoding::encode(segment).into_owned()
}

#[async_trait]
impl AnalysisBackend for HttpBackend {
    async fn list_tasks(&self) -> Result<Vec<TaskSummary>> {
        self.get_json("analysis").await
    }

    async fn create_task(&self, data_id: &str) -> Result<CreatedTask> {
        self.post_json("analysis/start", &StartAnalysisRequest { dataid: data_id })
            .await
    }

    async fn task_status(&self, task_id: &str) -> Result<StatusReport> {
        self.get_json(&format!("analysis/status/{}", encode(task_id)))
            .await
    }

    async fn task_results(&self, task_id: &str) -> Result<AnalysisResult> {
        self.get_json(&format!("analysis/results/{}", encode(task_id)))
            .await
    }
}

#[async_trait]
impl ChatBackend for HttpBackend {
    async fn chat_room(&self, task_id: &str) -> Result<ChatRoom> {
        self.get_json(&format!("chat/{}", encode(task_id))).await
    }

    async fn history(&self, chat_id: &str) -> Result<Vec<ChatMessage>> {
        self.get_json(&format!("chat/history/{}", encode(chat_id)))
            .await
    }

    async fn send_stream(
        &self,
        chat_id: &str,
        kb_id: Option<&str>,
        question: &str,
    ) -> Result<ByteStream> {
        let mut builder = self
            .request(Method::POST, &format!("chat/send/{}", encode(chat_id)))
            .json(&QuestionRequest { question });
        if let Some(kb_id) = kb_id {
            builder = builder.query(&[("kb_id", kb_id)]);
        }

        let response = ensure_success(builder.send().await?).await?;
        tracing::debug!("[Chat] Stream opened for chat {}", chat_id);

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| ClientError::Stream(e.to_string())));
        Ok(body.boxed())
    }
}
