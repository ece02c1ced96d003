//! SSE stream relay.
//!
//! Reads the upstream event stream incrementally, reassembles complete lines
//! across network chunk boundaries with [`SseLineDecoder`], extracts text
//! deltas and writes them downstream as `data: {"content": ...}` frames, one
//! frame per delta and in arrival order.

use std::convert::Infallible;
use std::fmt::Display;

use axum::body::Body;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::types::{ChatCompletionChunk, RelayEvent};

/// End-of-stream marker used by both sides.
pub const DONE_SENTINEL: &str = "[DONE]";

/// A partial line longer than this without a newline is dropped.
const MAX_LINE_BYTES: usize = 64 * 1024;

/// Frames buffered between the relay task and the response body.
const RELAY_CHANNEL_CAPACITY: usize = 32;

/// Line reassembly across chunk boundaries.
///
/// Bytes are held until a `\n` arrives, so a frame or a multi-byte UTF-8
/// character split between two reads is decoded only once it is whole.
/// At most one partial line is retained.
/// An oversized line is dropped whole: once the cap is hit, bytes are
/// skipped up to and including the next `\n`.
#[derive(Debug, Default)]
pub struct SseLineDecoder {
    buffer: Vec<u8>,
    discarding: bool,
}

impl SseLineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every line it completes.
    pub fn push(&mut self, mut bytes: &[u8]) -> Vec<String> {
        if self.discarding {
            match bytes.iter().position(|&b| b == b'\n') {
                Some(pos) => {
                    self.discarding = false;
                    bytes = &bytes[pos + 1..];
                }
                None => return Vec::new(),
            }
        }
        self.buffer.extend_from_slice(bytes);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.buffer[start..].iter().position(|&b| b == b'\n') {
            let end = start + offset;
            lines.push(decode_line(&self.buffer[start..end]));
            start = end + 1;
        }
        self.buffer.drain(..start);

        if self.buffer.len() > MAX_LINE_BYTES {
            tracing::warn!(
                buffered = self.buffer.len(),
                "SSE line exceeded size cap without newline, discarding"
            );
            self.buffer.clear();
            self.discarding = true;
        }

        lines
    }

    /// Consume the decoder, returning any trailing unterminated line.
    pub fn finish(self) -> Option<String> {
        if self.discarding || self.buffer.is_empty() {
            None
        } else {
            Some(decode_line(&self.buffer))
        }
    }
}

fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

/// One downstream event.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayFrame {
    Content(serde_json::Value),
    Done,
}

impl RelayFrame {
    /// Serialize as a complete SSE frame.
    pub fn encode(&self) -> Bytes {
        match self {
            RelayFrame::Done => Bytes::from(format!("data: {}\n\n", DONE_SENTINEL)),
            RelayFrame::Content(content) => {
                let event = RelayEvent {
                    content: content.clone(),
                };
                // A parsed serde_json::Value always serializes.
                let json = serde_json::to_string(&event).unwrap_or_default();
                Bytes::from(format!("data: {}\n\n", json))
            }
        }
    }
}

/// What a single upstream line contributes downstream.
#[derive(Debug, Clone, PartialEq)]
pub enum LineOutcome {
    Frame(RelayFrame),
    /// A `data:` payload that was not valid JSON.
    Malformed,
    /// Comments, other SSE fields, blank lines, or chunks with no text.
    Ignored,
}

/// Interpret one complete upstream line.
pub fn relay_frame(line: &str) -> LineOutcome {
    let Some(payload) = line.strip_prefix("data:") else {
        return LineOutcome::Ignored;
    };
    let payload = payload.strip_prefix(' ').unwrap_or(payload);

    if payload == DONE_SENTINEL {
        return LineOutcome::Frame(RelayFrame::Done);
    }

    match serde_json::from_str::<ChatCompletionChunk>(payload) {
        Ok(chunk) => match chunk.into_content() {
            Some(content) => LineOutcome::Frame(RelayFrame::Content(content)),
            None => LineOutcome::Ignored,
        },
        Err(e) => {
            tracing::warn!(error = %e, payload = %payload, "Skipping malformed upstream frame");
            LineOutcome::Malformed
        }
    }
}

/// Why the relay loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Upstream finished its body.
    Completed,
    /// Reading from upstream failed mid-stream.
    UpstreamError,
    /// The downstream write failed; the client went away.
    ClientGone,
}

/// Counters for one relayed stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelaySummary {
    pub frames_sent: usize,
    pub frames_skipped: usize,
    pub done_forwarded: bool,
    pub outcome: RelayOutcome,
}

impl RelaySummary {
    fn new() -> Self {
        Self {
            frames_sent: 0,
            frames_skipped: 0,
            done_forwarded: false,
            outcome: RelayOutcome::Completed,
        }
    }

    /// Apply one line; returns `false` once the downstream is gone.
    async fn forward_line(&mut self, line: &str, sink: &mpsc::Sender<Bytes>) -> bool {
        match relay_frame(line) {
            LineOutcome::Frame(frame) => {
                if sink.send(frame.encode()).await.is_err() {
                    self.outcome = RelayOutcome::ClientGone;
                    return false;
                }
                self.frames_sent += 1;
                if frame == RelayFrame::Done {
                    self.done_forwarded = true;
                }
            }
            LineOutcome::Malformed => self.frames_skipped += 1,
            LineOutcome::Ignored => {}
        }
        true
    }
}

/// Relay an upstream byte stream into `sink` until one side finishes.
///
/// The sentinel is forwarded but does not end the loop; only upstream
/// completion, an upstream read error or a failed downstream write does.
/// No synthetic frame is written on error.
pub async fn relay<S, B, E>(upstream: S, sink: mpsc::Sender<Bytes>) -> RelaySummary
where
    S: Stream<Item = std::result::Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
{
    let mut upstream = std::pin::pin!(upstream);
    let mut decoder = SseLineDecoder::new();
    let mut summary = RelaySummary::new();

    while let Some(chunk) = upstream.next().await {
        let bytes = match chunk {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(error = %e, "Error reading upstream stream");
                summary.outcome = RelayOutcome::UpstreamError;
                return summary;
            }
        };

        for line in decoder.push(bytes.as_ref()) {
            if !summary.forward_line(&line, &sink).await {
                return summary;
            }
        }
    }

    if let Some(line) = decoder.finish() {
        summary.forward_line(&line, &sink).await;
    }

    summary
}

/// Run [`relay`] on its own task and return the downstream body.
///
/// The body ends when the task drops its sender.
pub fn spawn_relay<S, B, E>(upstream: S, request_id: String) -> Body
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    let (tx, rx) = mpsc::channel(RELAY_CHANNEL_CAPACITY);

    tokio::spawn(async move {
        let summary = relay(upstream, tx).await;
        tracing::info!(
            request_id = %request_id,
            frames_sent = summary.frames_sent,
            frames_skipped = summary.frames_skipped,
            done_forwarded = summary.done_forwarded,
            outcome = ?summary.outcome,
            "Relay closed"
        );
    });

    Body::from_stream(ReceiverStream::new(rx).map(Ok::<_, Infallible>))
}
