use thiserror::Error;

use crate::session::SessionState;

/// Failures of a synthesis session.
#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("missing configuration: {0}")]
    Config(String),

    #[error("synthesis transport error: {0}")]
    Transport(String),

    #[error("synthesis socket closed before the final fragment")]
    ClosedBeforeFinal,

    #[error("invalid session transition: {event} in state {state:?}")]
    InvalidTransition {
        state: SessionState,
        event: &'static str,
    },
}

impl From<tokio_tungstenite::tungstenite::Error> for SynthesisError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        SynthesisError::Transport(e.to_string())
    }
}

/// Failures between the assembled buffer and the speaker.
#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("audio decoding failed after {attempts} attempts: {last}")]
    Decode { attempts: u32, last: String },

    #[error("audio output failed: {0}")]
    Output(String),
}
