//! Client-side coordination for the analysis dashboard: starting backend
//! analysis jobs and polling them to completion, and decoding streamed chat
//! answers.

// Backend endpoints and wire types
pub mod api;
// Streamed chat answers
pub mod chat;
pub mod config;
pub mod error;
// Time-based fallback progress
pub mod progress;
// Response stream framing
pub mod stream;
// Task records, poller and registry
pub mod tasks;

pub use api::{AnalysisBackend, ChatBackend, HttpBackend};
pub use chat::ChatSession;
pub use config::ClientConfig;
pub use error::{ClientError, Result};
pub use progress::{Clock, ProgressEstimator, TokioClock};
pub use stream::{StreamDecoder, StreamEvent};
pub use tasks::{PollerConfig, TaskEvent, TaskRecord, TaskRegistry, TaskStatus};
