//! Server-Sent Events (SSE) parsing for streaming provider responses.
//!
//! Turns a byte stream into a stream of [`SseEvent`]s. Only the `event:` and
//! `data:` fields are interpreted; `id:`, `retry:` and comment lines are
//! ignored.

use bytes::Bytes;
use futures::Stream;
use std::io;
use tokio::io::AsyncBufReadExt;
use tokio_util::io::StreamReader;

/// A single SSE event parsed from the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// The event type, when the server sent an `event:` field.
    pub event: Option<String>,
    /// The event data. Multiple `data:` lines are joined with `\n`.
    pub data: String,
}

/// Parse an SSE byte stream into events.
///
/// The returned stream ends when the underlying byte stream ends; a trailing
/// event without a terminating blank line is still emitted.
pub fn parse_sse<S>(bytes: S) -> impl Stream<Item = io::Result<SseEvent>> + Send
where
    S: Stream<Item = io::Result<Bytes>> + Send + 'static,
{
    async_stream::stream! {
        let reader = tokio::io::BufReader::new(StreamReader::new(Box::pin(bytes)));
        let mut lines = reader.lines();

        let mut current_event: Option<String> = None;
        let mut current_data = String::new();

        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };

            if line.is_empty() {
                if !current_data.is_empty() {
                    yield Ok(SseEvent {
                        event: current_event.take(),
                        data: std::mem::take(&mut current_data),
                    });
                }
                current_event = None;
                continue;
            }

            if let Some(event_type) = line.strip_prefix("event:") {
                current_event = Some(event_type.trim_start().to_string());
            } else if let Some(data) = line.strip_prefix("data:") {
                if !current_data.is_empty() {
                    current_data.push('\n');
                }
                current_data.push_str(data.strip_prefix(' ').unwrap_or(data));
            }
        }

        if !current_data.is_empty() {
            yield Ok(SseEvent {
                event: current_event,
                data: current_data,
            });
        }
    }
}
