//! Wire shapes for the analysis and chat endpoints.
//!
//! Every JSON reply is wrapped as `{http_status, message}`. Parsing is strict:
//! anything that does not match is a `ClientError::Decode`, which the task
//! lifecycle treats as a failed request.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::de::{self, DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ClientError, Result};
use crate::tasks::TaskStatus;

#[derive(Debug, Deserialize)]
struct Envelope {
    http_status: u16,
    #[serde(default)]
    message: Value,
}

/// Unwrap the `{http_status, message}` envelope and decode the payload.
/// A bare payload without an envelope is decoded directly.
pub fn parse_payload<T: DeserializeOwned>(value: Value) -> Result<T> {
    let is_envelope = value
        .as_object()
        .is_some_and(|obj| obj.contains_key("http_status"));
    if !is_envelope {
        return serde_json::from_value(value).map_err(|e| ClientError::decode(e.to_string()));
    }

    let envelope: Envelope = serde_json::from_value(value)?;
    if envelope.http_status >= 400 {
        let message = match envelope.message {
            Value::String(s) => s,
            other => other.to_string(),
        };
        return Err(ClientError::Api {
            status: envelope.http_status,
            message,
        });
    }
    serde_json::from_value(envelope.message).map_err(|e| ClientError::decode(e.to_string()))
}

/// `POST /analysis/start`
#[derive(Debug, Clone, Serialize)]
pub struct StartAnalysisRequest<'a> {
    pub dataid: &'a str,
}

/// Reply to a start request
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CreatedTask {
    #[serde(alias = "taskid", deserialize_with = "string_or_number")]
    pub task_id: String,
    #[serde(default = "pending")]
    pub status: TaskStatus,
}

/// One row of `GET /analysis`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TaskSummary {
    #[serde(alias = "dataid", deserialize_with = "string_or_number")]
    pub data_id: String,
    #[serde(alias = "taskid", deserialize_with = "string_or_number")]
    pub task_id: String,
    pub status: TaskStatus,
}

/// `GET /analysis/status/{taskId}`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StatusReport {
    #[serde(
        default,
        alias = "taskid",
        deserialize_with = "optional_string_or_number"
    )]
    pub task_id: Option<String>,
    pub status: TaskStatus,
    #[serde(default, deserialize_with = "optional_percent")]
    pub progress: Option<u8>,
    #[serde(default)]
    pub message: Option<String>,
}

impl StatusReport {
    pub fn new(status: TaskStatus) -> Self {
        Self {
            task_id: None,
            status,
            progress: None,
            message: None,
        }
    }

    pub fn with_progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress.min(100));
        self
    }
}

/// `GET /analysis/results/{taskId}`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AnalysisResult {
    #[serde(alias = "taskid", deserialize_with = "string_or_number")]
    pub task_id: String,
    #[serde(alias = "dataid", deserialize_with = "string_or_number")]
    pub data_id: String,
    #[serde(deserialize_with = "flexible_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub summary: Value,
    #[serde(default)]
    pub detailed_results: Value,
}

/// `GET /chat/{taskId}`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatRoom {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(alias = "taskid", deserialize_with = "string_or_number")]
    pub task_id: String,
    #[serde(
        default,
        alias = "userid",
        deserialize_with = "optional_string_or_number"
    )]
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
    System,
}

/// One transcript entry, as stored by the backend or created locally
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatMessage {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(alias = "chatid", deserialize_with = "string_or_number")]
    pub chat_id: String,
    pub role: ChatRole,
    #[serde(default)]
    pub content: String,
    #[serde(deserialize_with = "flexible_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(default, deserialize_with = "optional_flexible_datetime")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ChatMessage {
    pub fn local(chat_id: &str, role: ChatRole, content: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            chat_id: chat_id.to_string(),
            role,
            content: content.into(),
            created_at: now,
            updated_at: Some(now),
        }
    }
}

/// Body of `POST /chat/send/{chatId}`
#[derive(Debug, Clone, Serialize)]
pub struct QuestionRequest<'a> {
    pub question: &'a str,
}

fn pending() -> TaskStatus {
    TaskStatus::Pending
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    Str(String),
    Int(i64),
    Float(f64),
}

impl From<StringOrNumber> for String {
    fn from(v: StringOrNumber) -> Self {
        match v {
            StringOrNumber::Str(s) => s,
            StringOrNumber::Int(i) => i.to_string(),
            StringOrNumber::Float(f) => f.to_string(),
        }
    }
}

/// Ids arrive as strings from some endpoints and as integers from others.
fn string_or_number<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<String, D::Error> {
    StringOrNumber::deserialize(d).map(String::from)
}

fn optional_string_or_number<'de, D: Deserializer<'de>>(
    d: D,
) -> std::result::Result<Option<String>, D::Error> {
    Ok(Option::<StringOrNumber>::deserialize(d)?.map(String::from))
}

/// Percent as float or integer, rounded and clamped to `0..=100`.
fn optional_percent<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<u8>, D::Error> {
    let Some(raw) = Option::<f64>::deserialize(d)? else {
        return Ok(None);
    };
    if !raw.is_finite() {
        return Err(de::Error::custom("progress is not a finite number"));
    }
    Ok(Some(raw.round().clamp(0.0, 100.0) as u8))
}

fn parse_datetime(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    // Naive timestamps from the backend are UTC
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .map(|naive| naive.and_utc())
}

fn flexible_datetime<'de, D: Deserializer<'de>>(
    d: D,
) -> std::result::Result<DateTime<Utc>, D::Error> {
    let raw = String::deserialize(d)?;
    parse_datetime(&raw).ok_or_else(|| de::Error::custom(format!("invalid timestamp: {}", raw)))
}

fn optional_flexible_datetime<'de, D: Deserializer<'de>>(
    d: D,
) -> std::result::Result<Option<DateTime<Utc>>, D::Error> {
    match Option::<String>::deserialize(d)? {
        None => Ok(None),
        Some(raw) => parse_datetime(&raw)
            .map(Some)
            .ok_or_else(|| de::Error::custom(format!("invalid timestamp: {}", raw))),
    }
}
