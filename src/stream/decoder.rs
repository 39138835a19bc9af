/**
 * Response stream decoder
 *
 * Turns an append-only `data: <payload>\n\n` body into discrete events.
 * Segments are only cut on a blank-line boundary that is fully contained in
 * the accumulated text, so a boundary split across two deliveries is found
 * once its second half arrives.
 */
use serde::Serialize;

/// Blank line separating two segments on the wire
pub const BOUNDARY: &str = "\n\n";
pub const DATA_MARKER: &str = "data:";
pub const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum StreamEvent {
    Token { token: String },
    Done { done: bool },
}

impl StreamEvent {
    pub fn token(text: impl Into<String>) -> Self {
        StreamEvent::Token { token: text.into() }
    }

    pub fn done() -> Self {
        StreamEvent::Done { done: true }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, StreamEvent::Done { .. })
    }
}

#[derive(Debug, Default)]
pub struct StreamDecoder {
    /// Text received but not yet closed by a boundary
    carry: String,
    /// Trailing bytes of a UTF-8 sequence cut by a chunk edge
    pending_bytes: Vec<u8>,
    finished: bool,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once the `[DONE]` sentinel has been decoded.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Unprocessed tail, for diagnostics.
    pub fn carry(&self) -> &str {
        &self.carry
    }

    /// Feed only the newly arrived text since the previous call.
    pub fn consume(&mut self, delta: &str) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }
        self.carry.push_str(delta);

        let mut events = Vec::new();
        while let Some(pos) = self.carry.find(BOUNDARY) {
            let segment: String = self.carry.drain(..pos + BOUNDARY.len()).collect();
            if let Some(event) = parse_segment(&segment) {
                let done = event.is_done();
                events.push(event);
                if done {
                    self.finish_stream();
                    break;
                }
            }
        }
        events
    }

    /// Feed a raw body chunk. An incomplete multi-byte character at the end
    /// of `chunk` is held back until the rest of it arrives.
    pub fn consume_bytes(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }
        self.pending_bytes.extend_from_slice(chunk);
        let text = take_utf8_prefix(&mut self.pending_bytes);
        self.consume(&text)
    }

    /// The connection closed: whatever is left in the carry buffer is treated
    /// as one last segment.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }
        if !self.pending_bytes.is_empty() {
            let tail = String::from_utf8_lossy(&self.pending_bytes).into_owned();
            self.pending_bytes.clear();
            self.carry.push_str(&tail);
        }
        let rest = std::mem::take(&mut self.carry);
        self.finished = true;
        parse_segment(&rest).into_iter().collect()
    }

    fn finish_stream(&mut self) {
        self.finished = true;
        self.carry.clear();
        self.pending_bytes.clear();
    }
}

/// Decode one segment. Segments that do not open with the data marker are
/// keep-alives or comments and yield nothing.
fn parse_segment(segment: &str) -> Option<StreamEvent> {
    let trimmed = segment.trim();
    let Some(rest) = trimmed.strip_prefix(DATA_MARKER) else {
        if !trimmed.is_empty() {
            tracing::trace!("[Stream] Discarding segment without data marker: {:?}", trimmed);
        }
        return None;
    };

    // Everything after the marker is payload, inner newlines included
    let payload = rest.trim();
    if payload == DONE_SENTINEL {
        Some(StreamEvent::done())
    } else {
        Some(StreamEvent::token(payload))
    }
}

/// Split off the longest valid UTF-8 prefix of `buf`, leaving an incomplete
/// trailing sequence in place. Invalid bytes become U+FFFD.
fn take_utf8_prefix(buf: &mut Vec<u8>) -> String {
    let mut out = String::new();
    loop {
        match std::str::from_utf8(buf) {
            Ok(text) => {
                out.push_str(text);
                buf.clear();
                return out;
            }
            Err(e) => {
                let valid = e.valid_up_to();
                out.push_str(&String::from_utf8_lossy(&buf[..valid]));
                match e.error_len() {
                    Some(bad) => {
                        out.push(char::REPLACEMENT_CHARACTER);
                        buf.drain(..valid + bad);
                    }
                    None => {
                        buf.drain(..valid);
                        return out;
                    }
                }
            }
        }
    }
}

/// Converts a transport that reports the whole body received so far into the
/// incremental deltas `StreamDecoder::consume` expects.
#[derive(Debug, Default)]
pub struct DeltaTracker {
    seen: usize,
}

impl DeltaTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance<'a>(&mut self, cumulative: &'a str) -> &'a str {
        // A shorter buffer means the transport restarted; treat it as new.
        if cumulative.len() < self.seen || !cumulative.is_char_boundary(self.seen) {
            self.seen = 0;
        }
        let delta = &cumulative[self.seen..];
        self.seen = cumulative.len();
        delta
    }
}
