//! Speech-to-text seam.
//!
//! Recognition itself is done elsewhere; the assistant only needs one
//! finalized transcript per utterance.

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};

#[derive(Debug, Error)]
pub enum RecognitionError {
    /// The recognizer reported an error code for this utterance.
    #[error("speech recognition error: {0}")]
    Failed(String),

    /// No more utterances will arrive.
    #[error("speech input closed")]
    Closed,

    #[error("speech input error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait SpeechRecognizer: Send {
    /// Wait for one utterance. `Ok(None)` means recognition ended without a result.
    async fn recognize(&mut self) -> Result<Option<String>, RecognitionError>;
}

/// Reads one finalized transcript per line.
///
/// A blank line is an utterance without a result; a line of the form
/// `!error <code>` reports a recognition error.
pub struct LineRecognizer<R> {
    lines: Lines<R>,
}

impl<R: AsyncBufRead + Unpin> LineRecognizer<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
        }
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> SpeechRecognizer for LineRecognizer<R> {
    async fn recognize(&mut self) -> Result<Option<String>, RecognitionError> {
        let line = self
            .lines
            .next_line()
            .await?
            .ok_or(RecognitionError::Closed)?;
        let line = line.trim();
        if let Some(code) = line.strip_prefix("!error") {
            return Err(RecognitionError::Failed(code.trim().to_string()));
        }
        Ok((!line.is_empty()).then(|| line.to_string()))
    }
}
