//! One utterance end to end: transcript, relay, synthesis, playback.

use std::sync::Arc;

use futures_util::StreamExt;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{error, info, warn};

use llm_core::RelayEvent;
use tts_core::{
    play_fragments, AudioDecoder, AudioOutput, PlaybackError, PlaybackOutcome, SpeechStreamer,
    SynthesisError,
};

use crate::relay_client::RelayClient;

#[derive(Debug, Error)]
pub enum TurnError {
    #[error("relay request failed: {0}")]
    Relay(String),

    #[error("relay rejected the prompt with status {status}")]
    Rejected { status: u16 },

    #[error("completion failed: {0}")]
    Completion(String),

    #[error(transparent)]
    Synthesis(#[from] SynthesisError),

    #[error(transparent)]
    Playback(#[from] PlaybackError),
}

/// Observable state of the current turn. Replaced wholesale when a new utterance starts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseState {
    pub transcript: String,
    /// Sentence chunks received so far.
    pub streaming_text: String,
    pub final_text: Option<String>,
    pub loading: bool,
    pub speaking: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnOutcome {
    pub reply: String,
    /// `None` when the reply was blank and nothing was synthesized.
    pub playback: Option<PlaybackOutcome>,
}

/// Runs turns against a relay and a synthesis endpoint.
pub struct Assistant {
    relay: RelayClient,
    streamer: SpeechStreamer,
    decoder: Arc<dyn AudioDecoder>,
    output: Arc<dyn AudioOutput>,
    state: watch::Sender<ResponseState>,
}

impl Assistant {
    pub fn new(
        relay: RelayClient,
        streamer: SpeechStreamer,
        decoder: Arc<dyn AudioDecoder>,
        output: Arc<dyn AudioOutput>,
    ) -> Self {
        let (state, _) = watch::channel(ResponseState::default());
        Self {
            relay,
            streamer,
            decoder,
            output,
            state,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ResponseState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> ResponseState {
        self.state.borrow().clone()
    }

    /// Warm up the synthesis endpoint in the background.
    pub fn preload(&self) -> tokio::task::JoinHandle<()> {
        self.streamer.preload()
    }

    /// Answer one finalized transcript and speak the reply.
    ///
    /// Failures are also recorded in [`ResponseState::error`] and always leave
    /// `loading` and `speaking` cleared.
    pub async fn run_turn(&self, transcript: &str) -> Result<TurnOutcome, TurnError> {
        self.state.send_replace(ResponseState {
            transcript: transcript.to_string(),
            loading: true,
            ..ResponseState::default()
        });
        info!(chars = transcript.chars().count(), "turn started");

        let reply = match self.collect_reply(transcript).await {
            Ok(reply) => reply,
            Err(e) => return Err(self.fail(e)),
        };

        self.state.send_modify(|s| {
            s.final_text = Some(reply.clone());
            s.loading = false;
        });

        if reply.trim().is_empty() {
            warn!("empty reply, nothing to speak");
            return Ok(TurnOutcome {
                reply,
                playback: None,
            });
        }

        self.state.send_modify(|s| s.speaking = true);
        let playback = self.speak(&reply).await;
        self.state.send_modify(|s| s.speaking = false);

        match playback {
            Ok(outcome) => {
                info!(?outcome, "turn finished");
                Ok(TurnOutcome {
                    reply,
                    playback: Some(outcome),
                })
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    async fn collect_reply(&self, transcript: &str) -> Result<String, TurnError> {
        let mut events = self.relay.stream(transcript).await?;
        let mut reply = String::new();
        while let Some(event) = events.next().await {
            match event? {
                RelayEvent::Chunk(text) => {
                    reply.push_str(&text);
                    self.state.send_modify(|s| s.streaming_text.push_str(&text));
                }
                RelayEvent::Done => break,
                RelayEvent::Error(reason) => return Err(TurnError::Completion(reason)),
            }
        }
        Ok(reply)
    }

    async fn speak(&self, reply: &str) -> Result<PlaybackOutcome, TurnError> {
        let session = self.streamer.synthesize(reply).await?;
        let attempts = self.streamer.config().decode_attempts;
        let outcome = play_fragments(
            session.fragments(),
            self.decoder.as_ref(),
            self.output.as_ref(),
            attempts,
        )
        .await?;
        Ok(outcome)
    }

    fn fail(&self, e: TurnError) -> TurnError {
        error!(error = %e, "turn failed");
        self.state.send_modify(|s| {
            s.loading = false;
            s.speaking = false;
            s.error = Some(e.to_string());
        });
        e
    }
}
