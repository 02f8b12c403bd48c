//! Common utilities for integration tests
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use futures_util::stream;
use tokio::net::TcpListener;

use llm_core::{CompletionSource, DeltaStream, LlmError, SseDecoder, SseFrame};
use voice_server::config::ServerConfig;
use voice_server::routes::{app, router, AppState};

/// Scripted upstream behaviour for one prompt.
#[derive(Clone)]
pub enum Script {
    /// Emit these deltas, then end normally.
    Deltas(Vec<&'static str>),
    /// Emit these deltas, then fail mid-stream.
    FailAfter(Vec<&'static str>),
    /// Reject the request before any delta.
    Rejected(u16),
    /// Open the stream and never produce anything.
    Stall,
}

pub struct ScriptedCompletion {
    pub script: Script,
}

#[async_trait]
impl CompletionSource for ScriptedCompletion {
    async fn stream(&self, _prompt: &str) -> Result<DeltaStream, LlmError> {
        let deltas = |parts: &[&'static str]| -> Vec<Result<String, LlmError>> {
            parts.iter().map(|p| Ok(p.to_string())).collect()
        };
        match &self.script {
            Script::Deltas(parts) => Ok(Box::pin(stream::iter(deltas(parts)))),
            Script::FailAfter(parts) => {
                let mut items = deltas(parts);
                items.push(Err(LlmError::Stream("connection reset".into())));
                Ok(Box::pin(stream::iter(items)))
            }
            Script::Rejected(status) => Err(LlmError::Status {
                status: *status,
                body: "rejected".into(),
            }),
            Script::Stall => Ok(Box::pin(stream::pending())),
        }
    }
}

pub fn test_config() -> ServerConfig {
    ServerConfig {
        llm_timeout_secs: 1,
        ..ServerConfig::default()
    }
}

pub fn test_state(script: Script) -> AppState {
    AppState::new(Arc::new(ScriptedCompletion { script }), test_config())
}

/// Create a test app instance with the full middleware stack
pub fn create_test_app(script: Script) -> Router {
    app(test_state(script)).unwrap()
}

/// Serve the relay on an ephemeral port and return its stream URL.
pub async fn spawn_relay(script: Script) -> (SocketAddr, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = router(test_state(script));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, format!("http://{addr}/api/stream"))
}

/// Split an SSE body into frames.
pub fn parse_sse(body: &[u8]) -> Vec<SseFrame> {
    let mut decoder = SseDecoder::new();
    let mut frames = decoder.push(body);
    frames.extend(decoder.finish());
    frames
}
