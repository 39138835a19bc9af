use std::collections::VecDeque;

use bytes::Bytes;
use futures_util::stream::{self, BoxStream, Stream, StreamExt};

use super::decoder::{StreamDecoder, StreamEvent};
use crate::error::Result;

/// Raw response body as delivered by the transport
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Decoded events; ends after `Done`, on connection close, or after the
/// first transport error.
pub type EventStream = BoxStream<'static, Result<StreamEvent>>;

struct DecodeState {
    body: ByteStream,
    decoder: StreamDecoder,
    queue: VecDeque<StreamEvent>,
    closed: bool,
}

/// Lazily decode a response body. The body is dropped (closing the
/// connection) as soon as the sentinel is seen.
pub fn decode_events<S>(body: S) -> EventStream
where
    S: Stream<Item = Result<Bytes>> + Send + 'static,
{
    let state = DecodeState {
        body: body.boxed(),
        decoder: StreamDecoder::new(),
        queue: VecDeque::new(),
        closed: false,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(event) = st.queue.pop_front() {
                return Some((Ok(event), st));
            }
            if st.closed || st.decoder.is_finished() {
                return None;
            }
            match st.body.next().await {
                Some(Ok(chunk)) => {
                    let events = st.decoder.consume_bytes(&chunk);
                    st.queue.extend(events);
                }
                Some(Err(e)) => {
                    tracing::warn!("[Stream] Body interrupted: {}", e);
                    st.closed = true;
                    return Some((Err(e), st));
                }
                None => {
                    st.closed = true;
                    let events = st.decoder.finish();
                    st.queue.extend(events);
                }
            }
        }
    })
    .boxed()
}

/// Push every event into `on_message(token, done)`. Returns whether the
/// sentinel was reached before the stream ended.
pub async fn drive<F>(mut events: EventStream, mut on_message: F) -> Result<bool>
where
    F: FnMut(&str, bool),
{
    while let Some(event) = events.next().await {
        match event? {
            StreamEvent::Token { token } => on_message(&token, false),
            StreamEvent::Done { .. } => {
                on_message("", true);
                return Ok(true);
            }
        }
    }
    Ok(false)
}
