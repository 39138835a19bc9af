/**
 * Chat Session
 *
 * Sends a question to the chat attached to an analysis and accumulates the
 * streamed answer into a local transcript.
 */
use std::sync::Arc;

use futures_util::StreamExt;

use crate::api::{ChatBackend, ChatMessage, ChatRole};
use crate::error::Result;
use crate::stream::{decode_events, drive, EventStream, StreamEvent};

/// Open the streamed answer to `question` as a sequence of decoded events.
pub async fn stream_answer(
    backend: &dyn ChatBackend,
    chat_id: &str,
    kb_id: Option<&str>,
    question: &str,
) -> Result<EventStream> {
    let body = backend.send_stream(chat_id, kb_id, question).await?;
    Ok(decode_events(body))
}

/// Send `question` and report every event as `on_message(token, done)`.
/// Returns whether the answer ran to its end marker.
pub async fn send_streamed<F>(
    backend: &dyn ChatBackend,
    chat_id: &str,
    kb_id: Option<&str>,
    question: &str,
    on_message: F,
) -> Result<bool>
where
    F: FnMut(&str, bool),
{
    let events = stream_answer(backend, chat_id, kb_id, question).await?;
    drive(events, on_message).await
}

pub struct ChatSession {
    backend: Arc<dyn ChatBackend>,
    chat_id: String,
    kb_id: Option<String>,
    messages: Vec<ChatMessage>,
}

impl ChatSession {
    pub fn new(backend: Arc<dyn ChatBackend>, chat_id: &str, kb_id: Option<&str>) -> Self {
        Self {
            backend,
            chat_id: chat_id.to_string(),
            kb_id: kb_id.map(str::to_string),
            messages: Vec::new(),
        }
    }

    /// Join the chat room of an analysis task and load its history.
    pub async fn open(
        backend: Arc<dyn ChatBackend>,
        task_id: &str,
        kb_id: Option<&str>,
    ) -> Result<Self> {
        let room = backend.chat_room(task_id).await?;
        let mut session = Self::new(backend, &room.id, kb_id);
        session.load_history().await?;
        Ok(session)
    }

    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub async fn load_history(&mut self) -> Result<()> {
        self.messages = self.backend.history(&self.chat_id).await?;
        tracing::debug!(
            "[Chat] Loaded {} message(s) for chat {}",
            self.messages.len(),
            self.chat_id
        );
        Ok(())
    }

    /// Append the question and an empty assistant reply to the transcript,
    /// then grow the reply token by token. `on_token` sees every token as it
    /// arrives and a final `("", true)` at the end marker.
    ///
    /// If the stream breaks, the partial reply stays in the transcript and
    /// the error is returned.
    pub async fn send<F>(&mut self, question: &str, mut on_token: F) -> Result<String>
    where
        F: FnMut(&str, bool),
    {
        self.messages
            .push(ChatMessage::local(&self.chat_id, ChatRole::User, question));
        self.messages
            .push(ChatMessage::local(&self.chat_id, ChatRole::Assistant, ""));
        let reply_idx = self.messages.len() - 1;

        let mut events = stream_answer(
            self.backend.as_ref(),
            &self.chat_id,
            self.kb_id.as_deref(),
            question,
        )
        .await?;

        while let Some(event) = events.next().await {
            match event {
                Ok(StreamEvent::Token { token }) => {
                    let reply = &mut self.messages[reply_idx];
                    reply.content.push_str(&token);
                    reply.updated_at = Some(chrono::Utc::now());
                    on_token(&token, false);
                }
                Ok(StreamEvent::Done { .. }) => {
                    on_token("", true);
                    break;
                }
                Err(e) => {
                    tracing::warn!("[Chat] Answer for chat {} cut short: {}", self.chat_id, e);
                    return Err(e);
                }
            }
        }

        Ok(self.messages[reply_idx].content.clone())
    }
}
