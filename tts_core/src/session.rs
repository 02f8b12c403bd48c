//! Transport-independent state machine of one synthesis session.
//!
//! ```text
//! Idle --Connect--> Opening --Connected--> Streaming --final msg--> Finalized --Closed--> Closed(Completed)
//!                      |                      |                        |
//!                      +------ error / close -+-----> Closed(..) <-----+ error
//! ```
//!
//! No state is re-entered; `Closed` is terminal and rejects every event.

use tracing::{debug, warn};

use crate::error::SynthesisError;
use crate::protocol::SynthesisResponse;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Closed after the final fragment was observed.
    Completed,
    TransportError(String),
    ClosedBeforeFinal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Opening,
    Streaming,
    Finalized,
    Closed(CloseReason),
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closed(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Connect,
    Connected,
    Message(SynthesisResponse),
    TransportError(String),
    TransportClosed,
}

impl SessionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::Connect => "connect",
            SessionEvent::Connected => "connected",
            SessionEvent::Message(_) => "message",
            SessionEvent::TransportError(_) => "transport_error",
            SessionEvent::TransportClosed => "transport_closed",
        }
    }
}

/// What the driver must do after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionAction {
    None,
    /// The final fragment arrived: assemble and play.
    Play,
    /// Mark the turn as not speaking now.
    ClearSpeaking,
    /// Mark the turn as not speaking once the grace delay has passed.
    ClearSpeakingAfterGrace,
}

/// One synthesis session and the audio fragments it owns.
#[derive(Debug)]
pub struct SynthesisSession {
    state: SessionState,
    fragments: Vec<Vec<u8>>,
    dropped: usize,
}

impl Default for SynthesisSession {
    fn default() -> Self {
        Self::new()
    }
}

impl SynthesisSession {
    pub fn new() -> Self {
        Self {
            state: SessionState::Idle,
            fragments: Vec::new(),
            dropped: 0,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn fragments(&self) -> &[Vec<u8>] {
        &self.fragments
    }

    /// Fragments whose payload could not be decoded.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn into_fragments(self) -> Vec<Vec<u8>> {
        self.fragments
    }

    /// Apply one event following the transition table.
    pub fn apply(&mut self, event: SessionEvent) -> Result<SessionAction, SynthesisError> {
        use SessionEvent as E;
        use SessionState as S;

        let (next, action) = match (self.state.clone(), event) {
            (S::Idle, E::Connect) => (S::Opening, SessionAction::None),
            (S::Opening, E::Connected) => (S::Streaming, SessionAction::None),
            (S::Streaming, E::Message(msg)) => {
                self.append(&msg);
                if msg.is_final() {
                    (S::Finalized, SessionAction::Play)
                } else {
                    (S::Streaming, SessionAction::None)
                }
            }
            (S::Finalized, E::Message(_)) => {
                debug!("ignoring synthesis message after final fragment");
                (S::Finalized, SessionAction::None)
            }
            (S::Finalized, E::TransportClosed) => {
                (S::Closed(CloseReason::Completed), SessionAction::None)
            }
            // Playback already owns the speaking flag once the final fragment is in.
            (S::Finalized, E::TransportError(e)) => {
                (S::Closed(CloseReason::TransportError(e)), SessionAction::None)
            }
            (S::Opening | S::Streaming, E::TransportError(e)) => {
                (S::Closed(CloseReason::TransportError(e)), SessionAction::ClearSpeaking)
            }
            (S::Opening | S::Streaming, E::TransportClosed) => (
                S::Closed(CloseReason::ClosedBeforeFinal),
                SessionAction::ClearSpeakingAfterGrace,
            ),
            (state, event) => {
                return Err(SynthesisError::InvalidTransition {
                    state,
                    event: event.name(),
                })
            }
        };

        debug!(from = ?self.state, to = ?next, ?action, "synthesis session transition");
        self.state = next;
        Ok(action)
    }

    fn append(&mut self, msg: &SynthesisResponse) {
        match msg.fragment() {
            Some(Ok(bytes)) => self.fragments.push(bytes),
            Some(Err(e)) => {
                self.dropped += 1;
                warn!(error = %e, "dropping undecodable audio fragment");
            }
            None => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn audio(b64: &str) -> SessionEvent {
        SessionEvent::Message(SynthesisResponse { audio: Some(b64.into()), is_final: None })
    }

    fn final_msg() -> SessionEvent {
        SessionEvent::Message(SynthesisResponse { audio: None, is_final: Some(true) })
    }

    fn streaming() -> SynthesisSession {
        let mut session = SynthesisSession::new();
        session.apply(SessionEvent::Connect).unwrap();
        session.apply(SessionEvent::Connected).unwrap();
        session
    }

    #[test]
    fn test_happy_path() {
        let mut session = streaming();
        assert_eq!(session.state(), &SessionState::Streaming);
        assert_eq!(session.apply(audio("AQI=")).unwrap(), SessionAction::None);
        assert_eq!(session.apply(audio("Aw==")).unwrap(), SessionAction::None);
        assert_eq!(session.apply(final_msg()).unwrap(), SessionAction::Play);
        assert_eq!(session.state(), &SessionState::Finalized);
        assert_eq!(session.apply(SessionEvent::TransportClosed).unwrap(), SessionAction::None);
        assert_eq!(session.state(), &SessionState::Closed(CloseReason::Completed));
        assert_eq!(session.into_fragments(), vec![vec![1u8, 2], vec![3]]);
    }

    #[test]
    fn test_final_message_may_carry_audio() {
        let mut session = streaming();
        let msg = SynthesisResponse { audio: Some("BAU=".into()), is_final: Some(true) };
        assert_eq!(session.apply(SessionEvent::Message(msg)).unwrap(), SessionAction::Play);
        assert_eq!(session.fragments(), &[vec![4u8, 5]]);
    }

    #[test]
    fn test_bad_fragment_is_dropped_not_fatal() {
        let mut session = streaming();
        session.apply(audio("!!not base64!!")).unwrap();
        session.apply(audio("AQI=")).unwrap();
        assert_eq!(session.state(), &SessionState::Streaming);
        assert_eq!(session.dropped(), 1);
        assert_eq!(session.fragments(), &[vec![1u8, 2]]);
    }

    #[test]
    fn test_transport_error_clears_speaking_immediately() {
        let mut session = streaming();
        let action = session.apply(SessionEvent::TransportError("reset".into())).unwrap();
        assert_eq!(action, SessionAction::ClearSpeaking);
        assert_eq!(
            session.state(),
            &SessionState::Closed(CloseReason::TransportError("reset".into()))
        );
    }

    #[test]
    fn test_error_while_opening() {
        let mut session = SynthesisSession::new();
        session.apply(SessionEvent::Connect).unwrap();
        let action = session.apply(SessionEvent::TransportError("dns".into())).unwrap();
        assert_eq!(action, SessionAction::ClearSpeaking);
        assert!(session.state().is_terminal());
    }

    #[test]
    fn test_close_without_final_uses_grace_delay() {
        let mut session = streaming();
        session.apply(audio("AQI=")).unwrap();
        let action = session.apply(SessionEvent::TransportClosed).unwrap();
        assert_eq!(action, SessionAction::ClearSpeakingAfterGrace);
        assert_eq!(session.state(), &SessionState::Closed(CloseReason::ClosedBeforeFinal));
    }

    #[test]
    fn test_messages_after_final_are_ignored() {
        let mut session = streaming();
        session.apply(final_msg()).unwrap();
        session.apply(audio("AQI=")).unwrap();
        assert!(session.fragments().is_empty());
    }

    #[test]
    fn test_closed_is_terminal() {
        let mut session = streaming();
        session.apply(SessionEvent::TransportClosed).unwrap();
        for event in [SessionEvent::Connect, SessionEvent::Connected, final_msg(), SessionEvent::TransportClosed] {
            assert!(matches!(
                session.apply(event),
                Err(SynthesisError::InvalidTransition { .. })
            ));
        }
    }

    #[test]
    fn test_no_message_before_connected() {
        let mut session = SynthesisSession::new();
        assert!(session.apply(audio("AQI=")).is_err());
        assert_eq!(session.state(), &SessionState::Idle);
        session.apply(SessionEvent::Connect).unwrap();
        assert!(session.apply(SessionEvent::Connect).is_err());
        assert!(session.apply(audio("AQI=")).is_err());
    }
}
