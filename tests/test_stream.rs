mod common;

use std::sync::Arc;

use analysis_client::api::{ChatMessage, ChatRole};
use analysis_client::chat::{self, ChatSession};
use analysis_client::stream::DeltaTracker;
use analysis_client::{ClientError, StreamDecoder, StreamEvent};
use common::ScriptedChat;
use proptest::prelude::*;

fn hello_world() -> Vec<StreamEvent> {
    vec![
        StreamEvent::token("Hello"),
        StreamEvent::token("World"),
        StreamEvent::done(),
    ]
}

fn decode_all(chunks: &[&[u8]]) -> Vec<StreamEvent> {
    let mut decoder = StreamDecoder::new();
    let mut events = Vec::new();
    for chunk in chunks {
        events.extend(decoder.consume_bytes(chunk));
    }
    events.extend(decoder.finish());
    events
}

#[test]
fn test_boundary_split_across_calls() {
    let mut decoder = StreamDecoder::new();
    let mut events = decoder.consume("data: Hello\n");
    assert!(events.is_empty());
    events.extend(decoder.consume("\ndata: World\n\ndata: [DONE]\n"));
    events.extend(decoder.consume("\n"));
    assert_eq!(events, hello_world());
}

#[test]
fn test_cumulative_transport_through_delta_tracker() {
    let snapshots = [
        "data: Hel",
        "data: Hello\n\ndata: Wor",
        "data: Hello\n\ndata: World\n\ndata: [DONE]\n\n",
    ];
    let mut tracker = DeltaTracker::new();
    let mut decoder = StreamDecoder::new();
    let mut events = Vec::new();
    for snapshot in snapshots {
        events.extend(decoder.consume(tracker.advance(snapshot)));
    }
    assert_eq!(events, hello_world());
}

fn token_text() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9 ,.!?分析结果数据]{1,12}"
}

proptest! {
    #[test]
    fn prop_chunking_does_not_change_events(
        tokens in prop::collection::vec(token_text(), 0..6),
        cuts in prop::collection::vec(any::<prop::sample::Index>(), 0..8),
    ) {
        let mut wire = String::new();
        for token in &tokens {
            wire.push_str("data: ");
            wire.push_str(token);
            wire.push_str("\n\n");
        }
        wire.push_str("data: [DONE]\n\n");
        let bytes = wire.as_bytes();

        let whole = decode_all(&[bytes]);

        let mut offsets: Vec<usize> = cuts.iter().map(|i| i.index(bytes.len() + 1)).collect();
        offsets.sort_unstable();
        offsets.dedup();
        let mut pieces: Vec<&[u8]> = Vec::new();
        let mut from = 0;
        for at in offsets {
            pieces.push(&bytes[from..at]);
            from = at;
        }
        pieces.push(&bytes[from..]);
        let split = decode_all(&pieces);

        prop_assert_eq!(&split, &whole);
        prop_assert_eq!(whole.len(), tokens.len() + 1);
        prop_assert!(whole.last().unwrap().is_done());
    }
}

fn session(chat: ScriptedChat) -> (Arc<ScriptedChat>, ChatSession) {
    let chat = Arc::new(chat);
    let session = ChatSession::new(chat.clone(), "c-1", Some("kb-9"));
    (chat, session)
}

#[tokio::test]
async fn test_session_accumulates_reply() {
    let (chat, mut session) = session(ScriptedChat::new(vec![
        "data: 你",
        "好\n\ndata: 世界\n",
        "\ndata: [DONE]\n\n",
        "data: ignored\n\n",
    ]));

    let mut seen = Vec::new();
    let reply = session
        .send("总结一下", |token, done| seen.push((token.to_string(), done)))
        .await
        .unwrap();

    assert_eq!(reply, "你好世界");
    assert_eq!(
        seen,
        vec![
            ("你好".to_string(), false),
            ("世界".to_string(), false),
            (String::new(), true),
        ]
    );

    let messages = session.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, ChatRole::User);
    assert_eq!(messages[0].content, "总结一下");
    assert_eq!(messages[1].role, ChatRole::Assistant);
    assert_eq!(messages[1].content, "你好世界");

    let questions = chat.questions.lock().unwrap();
    assert_eq!(
        questions[0],
        (
            "c-1".to_string(),
            Some("kb-9".to_string()),
            "总结一下".to_string()
        )
    );
}

#[tokio::test]
async fn test_broken_stream_keeps_partial_reply() {
    let mut chat = ScriptedChat::new(vec!["data: partial\n\n"]);
    chat.chunks.push(Err("connection reset".to_string()));
    chat.chunks.push(Ok(b"data: never\n\n".to_vec()));
    let (_chat, mut session) = session(chat);

    let err = session.send("q", |_, _| {}).await.unwrap_err();
    assert!(matches!(err, ClientError::Stream(_)));
    assert_eq!(session.messages()[1].content, "partial");
}

#[tokio::test]
async fn test_open_loads_history() {
    let mut chat = ScriptedChat::new(vec!["data: [DONE]\n\n"]);
    chat.history = vec![
        ChatMessage::local("room-t-1", ChatRole::User, "上次的问题"),
        ChatMessage::local("room-t-1", ChatRole::Assistant, "上次的回答"),
    ];
    let chat = Arc::new(chat);

    let mut session = ChatSession::open(chat.clone(), "t-1", None).await.unwrap();
    assert_eq!(session.chat_id(), "room-t-1");
    assert_eq!(session.messages().len(), 2);

    let reply = session.send("再问一次", |_, _| {}).await.unwrap();
    assert_eq!(reply, "");
    assert_eq!(session.messages().len(), 4);
    assert_eq!(chat.questions.lock().unwrap()[0].1, None);
}

#[tokio::test]
async fn test_send_streamed_reports_missing_end_marker() {
    let chat = ScriptedChat::new(vec!["data: a\n\n", "data: b"]);
    let mut tokens = Vec::new();
    let finished = chat::send_streamed(&chat, "c-1", None, "q", |token, done| {
        if !done {
            tokens.push(token.to_string());
        }
    })
    .await
    .unwrap();

    assert!(!finished);
    assert_eq!(tokens, vec!["a", "b"]);
}
