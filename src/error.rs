use thiserror::Error;

/// Errors raised at the boundary with the analysis backend.
///
/// Task lifecycle code never propagates these to the presentation layer as
/// panics: a failed start or poll is folded into the task's `FAILED` status and
/// the error is only returned to the caller that asked for the operation.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Transport-level failure (connect, timeout, body read)
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-2xx HTTP status
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The response envelope carried an error status
    #[error("backend error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The response did not match the expected shape
    #[error("unexpected response shape: {0}")]
    Decode(String),

    /// The response stream broke before it finished
    #[error("stream interrupted: {0}")]
    Stream(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ClientError>;

impl ClientError {
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}
