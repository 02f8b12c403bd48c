//! Client side of `POST /api/stream`.

use std::pin::Pin;

use async_stream::stream;
use futures_util::{Stream, StreamExt};
use serde::Serialize;
use tracing::{debug, warn};

use llm_core::{RelayEvent, SseDecoder, SseFrame};

use crate::turn::TurnError;

pub const DEFAULT_RELAY_URL: &str = "http://127.0.0.1:8085/api/stream";

/// Relay events in arrival order. Ends after the first terminal event.
pub type RelayEvents = Pin<Box<dyn Stream<Item = Result<RelayEvent, TurnError>> + Send>>;

#[derive(Serialize)]
struct StreamRequest<'a> {
    text: &'a str,
}

#[derive(Debug, Clone)]
pub struct RelayClient {
    client: reqwest::Client,
    url: String,
}

impl RelayClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Submit a prompt and stream back the relay's events.
    pub async fn stream(&self, prompt: &str) -> Result<RelayEvents, TurnError> {
        let response = self
            .client
            .post(&self.url)
            .json(&StreamRequest { text: prompt })
            .send()
            .await
            .map_err(|e| TurnError::Relay(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TurnError::Rejected {
                status: status.as_u16(),
            });
        }

        Ok(Box::pin(relay_events_from_bytes(response.bytes_stream())))
    }
}

/// Parse relay SSE framing. Malformed frames are skipped.
pub fn relay_events_from_bytes<S, B, E>(bytes: S) -> impl Stream<Item = Result<RelayEvent, TurnError>>
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    stream! {
        let mut bytes = std::pin::pin!(bytes);
        let mut decoder = SseDecoder::new();
        while let Some(chunk) = bytes.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    yield Err(TurnError::Relay(e.to_string()));
                    return;
                }
            };
            for frame in decoder.push(chunk.as_ref()) {
                if let Some(event) = parse_frame(&frame) {
                    let terminal = event.is_terminal();
                    yield Ok(event);
                    if terminal {
                        return;
                    }
                }
            }
        }
        if let Some(event) = decoder.finish().as_ref().and_then(parse_frame) {
            let terminal = event.is_terminal();
            yield Ok(event);
            if terminal {
                return;
            }
        }
        yield Err(TurnError::Relay("relay stream ended without a terminal event".to_string()));
    }
}

fn parse_frame(frame: &SseFrame) -> Option<RelayEvent> {
    match RelayEvent::from_frame(frame) {
        Ok(event) => {
            debug!(?event, "relay event");
            Some(event)
        }
        Err(e) => {
            warn!(error = %e, data = %frame.data, "skipping malformed relay event");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    async fn collect(parts: Vec<&'static str>) -> Vec<Result<RelayEvent, TurnError>> {
        let bytes = stream::iter(parts.into_iter().map(Ok::<_, std::io::Error>));
        relay_events_from_bytes(bytes).collect().await
    }

    #[tokio::test]
    async fn test_parses_chunks_and_done() {
        let events = collect(vec![
            "data: {\"text\":\"Hello there.\"}\n\n",
            "data: {\"te",
            "xt\":\" How are you.\"}\n\nevent: done\ndata: {}\n\n",
        ])
        .await;
        let events: Vec<RelayEvent> = events.into_iter().map(Result::unwrap).collect();
        assert_eq!(
            events,
            vec![
                RelayEvent::Chunk("Hello there.".into()),
                RelayEvent::Chunk(" How are you.".into()),
                RelayEvent::Done,
            ]
        );
    }

    #[tokio::test]
    async fn test_error_event_is_terminal() {
        let events = collect(vec![
            "data: {\"text\":\"Partial.\"}\n\n",
            "event: error\ndata: {\"error\":\"upstream_status\"}\n\n",
            "data: {\"text\":\"never seen.\"}\n\n",
        ])
        .await;
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[1], Ok(RelayEvent::Error(r)) if r == "upstream_status"));
    }

    #[tokio::test]
    async fn test_malformed_frame_is_skipped() {
        let events = collect(vec![
            "data: not json\n\n",
            "data: {\"text\":\"Fine.\"}\n\nevent: done\ndata: {}\n\n",
        ])
        .await;
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], Ok(RelayEvent::Chunk(t)) if t == "Fine."));
    }

    #[tokio::test]
    async fn test_missing_terminal_event_is_an_error() {
        let events = collect(vec!["data: {\"text\":\"Cut.\"}\n\n"]).await;
        assert_eq!(events.len(), 2);
        assert!(matches!(events[1], Err(TurnError::Relay(_))));
    }
}
