use std::pin::Pin;

use async_stream::stream;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::LlmError;
use crate::provider::CompletionConfig;
use crate::sse::{parse_completion_chunk, CompletionChunk, SseDecoder, SseFrame};

/// Incremental text deltas in arrival order.
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

/// Anything that can turn a prompt into a stream of completion deltas.
#[async_trait]
pub trait CompletionSource: Send + Sync {
    async fn stream(&self, prompt: &str) -> Result<DeltaStream, LlmError>;
}

/// Structure for the chat completion request
#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    temperature: f32,
    top_p: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

/// Streaming client for OpenAI-compatible chat completion endpoints.
#[derive(Clone)]
pub struct CompletionClient {
    client: Client,
    config: CompletionConfig,
}

impl CompletionClient {
    pub fn new(config: CompletionConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    pub fn with_http_client(config: CompletionConfig, client: Client) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &CompletionConfig {
        &self.config
    }
}

#[async_trait]
impl CompletionSource for CompletionClient {
    async fn stream(&self, prompt: &str) -> Result<DeltaStream, LlmError> {
        let req_body = ChatRequest {
            model: &self.config.model,
            messages: vec![
                Message { role: "system", content: &self.config.system_prompt },
                Message { role: "user", content: prompt },
            ],
            temperature: self.config.temperature,
            top_p: self.config.top_p,
            max_tokens: self.config.max_tokens,
            stream: true,
        };

        let mut request = self.client.post(&self.config.url).json(&req_body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(LlmError::Request)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status { status: status.as_u16(), body });
        }

        debug!(model = %self.config.model, "completion stream opened");
        Ok(Box::pin(deltas_from_bytes(response.bytes_stream())))
    }
}

/// Decode a provider byte stream into content deltas.
///
/// Unparseable `data:` payloads are logged and skipped. The stream ends at the
/// `[DONE]` marker or when the body ends, whichever comes first.
pub fn deltas_from_bytes<S, B, E>(bytes: S) -> impl Stream<Item = Result<String, LlmError>>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    stream! {
        let mut decoder = SseDecoder::new();
        let mut bytes = std::pin::pin!(bytes);
        while let Some(chunk) = bytes.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    yield Err(LlmError::Stream(e.to_string()));
                    return;
                }
            };
            for frame in decoder.push(chunk.as_ref()) {
                match delta_from_frame(&frame) {
                    Some(CompletionChunk::Done) => return,
                    Some(CompletionChunk::Delta(text)) if !text.is_empty() => yield Ok(text),
                    _ => {}
                }
            }
        }
        if let Some(frame) = decoder.finish() {
            if let Some(CompletionChunk::Delta(text)) = delta_from_frame(&frame) {
                if !text.is_empty() {
                    yield Ok(text);
                }
            }
        }
    }
}

fn delta_from_frame(frame: &SseFrame) -> Option<CompletionChunk> {
    if frame.data.is_empty() {
        return None;
    }
    match parse_completion_chunk(&frame.data) {
        Ok(chunk) => Some(chunk),
        Err(e) => {
            warn!(error = %e, data = %frame.data, "skipping malformed completion chunk");
            None
        }
    }
}
