//! WebSocket driver for synthesis sessions.
//!
//! The socket is only a source of [`SessionEvent`]s; every decision about
//! fragments, completion and the speaking flag is taken by
//! [`SynthesisSession`]. A session is opened with the complete response text:
//! primer, text and end-of-input are sent up front, then inbound messages are
//! fed to the state machine until the final fragment arrives.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::config::SynthesisConfig;
use crate::error::SynthesisError;
use crate::protocol::{session_messages, SynthesisResponse, PRELOAD_TEXT, PRIMER_TEXT};
use crate::session::{CloseReason, SessionAction, SessionEvent, SessionState, SynthesisSession};

/// Opens synthesis sessions against one voice endpoint.
#[derive(Debug, Clone)]
pub struct SpeechStreamer {
    config: Arc<SynthesisConfig>,
}

impl SpeechStreamer {
    pub fn new(config: SynthesisConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &SynthesisConfig {
        &self.config
    }

    /// Run one session for `text` and hand back its fragments once the final flag is seen.
    ///
    /// A transport error returns immediately. A close without the final flag
    /// returns [`SynthesisError::ClosedBeforeFinal`] only after the grace delay.
    pub async fn synthesize(&self, text: &str) -> Result<SynthesisSession, SynthesisError> {
        let mut session = SynthesisSession::new();
        session.apply(SessionEvent::Connect)?;

        let url = self.config.url();
        let mut ws = match connect_async(url).await {
            Ok((ws, _)) => ws,
            Err(e) => return self.fail(&mut session, e.to_string()).await,
        };
        session.apply(SessionEvent::Connected)?;
        info!(chars = text.len(), voice = %self.config.voice_id, "synthesis session opened");

        let messages = session_messages(
            text,
            &self.config.api_key,
            self.config.voice_settings,
            PRIMER_TEXT,
        )
        .map_err(|e| SynthesisError::Transport(format!("encoding session message: {e}")))?;
        for message in messages {
            if let Err(e) = ws.send(Message::text(message)).await {
                return self.fail(&mut session, e.to_string()).await;
            }
        }

        let receive_timeout = self.config.receive_timeout();
        loop {
            let next = match tokio::time::timeout(receive_timeout, ws.next()).await {
                Ok(next) => next,
                Err(_) => {
                    let _ = ws.close(None).await;
                    return self
                        .fail(&mut session, format!("no message for {}s", receive_timeout.as_secs()))
                        .await;
                }
            };

            let event = match next {
                Some(Ok(Message::Text(payload))) => {
                    match serde_json::from_str::<SynthesisResponse>(payload.as_str()) {
                        Ok(response) => SessionEvent::Message(response),
                        Err(e) => {
                            warn!(error = %e, "skipping malformed synthesis message");
                            continue;
                        }
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "synthesis socket closed by peer");
                    SessionEvent::TransportClosed
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => SessionEvent::TransportError(e.to_string()),
                None => SessionEvent::TransportClosed,
            };

            match session.apply(event)? {
                SessionAction::None => {}
                SessionAction::Play => {
                    info!(
                        fragments = session.fragments().len(),
                        dropped = session.dropped(),
                        "final synthesis fragment received"
                    );
                    let _ = ws.close(None).await;
                    session.apply(SessionEvent::TransportClosed)?;
                    return Ok(session);
                }
                SessionAction::ClearSpeaking => {
                    return Err(SynthesisError::Transport(close_detail(&session)));
                }
                SessionAction::ClearSpeakingAfterGrace => {
                    warn!(
                        grace_ms = self.config.grace_ms,
                        "synthesis socket closed before final fragment"
                    );
                    tokio::time::sleep(self.config.grace_delay()).await;
                    return Err(SynthesisError::ClosedBeforeFinal);
                }
            }
        }
    }

    async fn fail(
        &self,
        session: &mut SynthesisSession,
        detail: String,
    ) -> Result<SynthesisSession, SynthesisError> {
        warn!(error = %detail, "synthesis transport error");
        session.apply(SessionEvent::TransportError(detail.clone()))?;
        Err(SynthesisError::Transport(detail))
    }

    /// Open a throwaway session with placeholder text to warm up the endpoint.
    ///
    /// Responses are discarded and failures are only logged.
    pub fn preload(&self) -> JoinHandle<()> {
        let config = self.config.clone();
        tokio::spawn(async move {
            if let Err(e) = run_preload(&config).await {
                warn!(error = %e, "preload synthesis session failed (expected when offline)");
            }
            debug!("preload synthesis session closed");
        })
    }
}

async fn run_preload(config: &SynthesisConfig) -> Result<(), SynthesisError> {
    let (mut ws, _) = connect_async(config.url()).await?;
    info!("preloading synthesis socket");
    let [init, _, end] = session_messages(
        "",
        &config.api_key,
        config.voice_settings,
        PRELOAD_TEXT,
    )
    .map_err(|e| SynthesisError::Transport(e.to_string()))?;
    ws.send(Message::text(init)).await?;
    ws.send(Message::text(end)).await?;

    let drain = async {
        while let Some(msg) = ws.next().await {
            if msg.is_err() {
                break;
            }
        }
    };
    let _ = tokio::time::timeout(config.receive_timeout(), drain).await;
    Ok(())
}

fn close_detail(session: &SynthesisSession) -> String {
    match session.state() {
        SessionState::Closed(CloseReason::TransportError(e)) => e.clone(),
        other => format!("{other:?}"),
    }
}
