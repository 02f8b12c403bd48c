//! Normalized event schema published by the completion relay.

use std::time::Duration;

use async_stream::stream;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::client::DeltaStream;
use crate::error::LlmError;
use crate::segmenter::sentence_chunks;
use crate::sse::SseFrame;

/// SSE event name of the terminal success marker.
pub const DONE_EVENT: &str = "done";
/// SSE event name of the terminal failure marker.
pub const ERROR_EVENT: &str = "error";

/// Payload of a `data:` block: one sentence chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncrementalTextEvent {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayErrorPayload {
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    Chunk(String),
    Done,
    Error(String),
}

impl RelayEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RelayEvent::Chunk(_))
    }

    /// Event name and JSON payload as written to the wire.
    pub fn to_wire(&self) -> (Option<&'static str>, String) {
        let payload = match self {
            RelayEvent::Chunk(text) => {
                serde_json::to_string(&IncrementalTextEvent { text: text.clone() })
            }
            RelayEvent::Done => Ok("{}".to_string()),
            RelayEvent::Error(reason) => {
                serde_json::to_string(&RelayErrorPayload { error: reason.clone() })
            }
        };
        // Serializing a struct of strings cannot fail.
        let payload = payload.unwrap_or_else(|_| "{}".to_string());
        match self {
            RelayEvent::Chunk(_) => (None, payload),
            RelayEvent::Done => (Some(DONE_EVENT), payload),
            RelayEvent::Error(_) => (Some(ERROR_EVENT), payload),
        }
    }

    /// Interpret one SSE frame received from the relay.
    pub fn from_frame(frame: &SseFrame) -> Result<Self, serde_json::Error> {
        match frame.event.as_deref() {
            Some(DONE_EVENT) => Ok(RelayEvent::Done),
            Some(ERROR_EVENT) => {
                let reason = serde_json::from_str::<RelayErrorPayload>(&frame.data)
                    .map(|p| p.error)
                    .unwrap_or_else(|_| "unknown".to_string());
                Ok(RelayEvent::Error(reason))
            }
            _ => {
                let event: IncrementalTextEvent = serde_json::from_str(&frame.data)?;
                Ok(RelayEvent::Chunk(event.text))
            }
        }
    }
}

/// Re-chunk an upstream delta stream into relay events.
///
/// Emits one `Chunk` per sentence, the residual flush, then `Done`. Any
/// upstream failure, including `idle_timeout` passing without a delta, ends
/// the stream with a single `Error` carrying [`LlmError::reason`].
pub fn relay_events(deltas: DeltaStream, idle_timeout: Duration) -> impl Stream<Item = RelayEvent> {
    stream! {
        let chunks = sentence_chunks(with_idle_timeout(deltas, idle_timeout));
        let mut chunks = std::pin::pin!(chunks);
        let mut count = 0usize;
        while let Some(chunk) = chunks.next().await {
            match chunk {
                Ok(sentence) => {
                    count += 1;
                    yield RelayEvent::Chunk(sentence);
                }
                Err(e) => {
                    error!(error = %e, "completion stream failed");
                    yield RelayEvent::Error(e.reason().to_string());
                    return;
                }
            }
        }
        info!(chunks = count, "completion stream finished");
        yield RelayEvent::Done;
    }
}

/// Ends `deltas` with [`LlmError::Timeout`] once `idle_timeout` passes without an item.
fn with_idle_timeout(
    mut deltas: DeltaStream,
    idle_timeout: Duration,
) -> impl Stream<Item = Result<String, LlmError>> {
    stream! {
        loop {
            match tokio::time::timeout(idle_timeout, deltas.next()).await {
                Ok(Some(item)) => yield item,
                Ok(None) => break,
                Err(_) => {
                    yield Err(LlmError::Timeout(idle_timeout.as_secs()));
                    break;
                }
            }
        }
    }
}

/// Open the upstream stream and relay it; a failure to open becomes a terminal `Error`.
pub fn relay_prompt(
    opened: Result<DeltaStream, LlmError>,
    idle_timeout: Duration,
) -> impl Stream<Item = RelayEvent> {
    stream! {
        match opened {
            Ok(deltas) => {
                let events = relay_events(deltas, idle_timeout);
                let mut events = std::pin::pin!(events);
                while let Some(event) = events.next().await {
                    yield event;
                }
            }
            Err(e) => {
                error!(error = %e, "could not open completion stream");
                yield RelayEvent::Error(e.reason().to_string());
            }
        }
    }
}
