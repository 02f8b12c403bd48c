use thiserror::Error;

/// Failures talking to the generation service.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("missing configuration: {0}")]
    Config(String),

    #[error("request to generation service failed: {0}")]
    Request(#[source] reqwest::Error),

    #[error("generation service returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("generation stream interrupted: {0}")]
    Stream(String),

    #[error("no data from generation service for {0} seconds")]
    Timeout(u64),
}

impl LlmError {
    /// Machine-readable reason carried by the relay's terminal error event.
    pub fn reason(&self) -> &'static str {
        match self {
            LlmError::Config(_) | LlmError::Request(_) => "upstream_request_failed",
            LlmError::Status { .. } => "upstream_status",
            LlmError::Stream(_) => "upstream_stream_interrupted",
            LlmError::Timeout(_) => "upstream_timeout",
        }
    }
}
