//! Wire messages of the `stream-input` synthesis socket.

use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};

/// Leading whitespace sent with the init message to warm up the voice.
pub const PRIMER_TEXT: &str = " ";
/// Placeholder text spoken by the preload session.
pub const PRELOAD_TEXT: &str = "Hi";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VoiceSettings {
    pub stability: f32,
    pub similarity_boost: f32,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            stability: 0.5,
            similarity_boost: 0.8,
        }
    }
}

/// First message of a session: voice configuration, credential and primer text.
#[derive(Debug, Clone, Serialize)]
pub struct InitMessage<'a> {
    pub text: &'a str,
    pub voice_settings: VoiceSettings,
    pub xi_api_key: &'a str,
}

/// Text to synthesize; an empty `text` marks end of input.
#[derive(Debug, Clone, Serialize)]
pub struct TextMessage<'a> {
    pub text: &'a str,
}

impl TextMessage<'static> {
    pub const END_OF_INPUT: TextMessage<'static> = TextMessage { text: "" };
}

/// One inbound message. Fields the pipeline does not use (alignment data) are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SynthesisResponse {
    #[serde(default)]
    pub audio: Option<String>,
    #[serde(default, rename = "isFinal")]
    pub is_final: Option<bool>,
}

impl SynthesisResponse {
    pub fn is_final(&self) -> bool {
        self.is_final.unwrap_or(false)
    }

    /// Decode the base64 audio payload, if the message carries one.
    pub fn fragment(&self) -> Option<Result<Vec<u8>, base64::DecodeError>> {
        self.audio
            .as_deref()
            .filter(|a| !a.is_empty())
            .map(|a| general_purpose::STANDARD.decode(a))
    }
}

/// The three outbound frames of a session, in send order.
pub fn session_messages(
    text: &str,
    api_key: &str,
    voice_settings: VoiceSettings,
    primer: &str,
) -> serde_json::Result<[String; 3]> {
    Ok([
        serde_json::to_string(&InitMessage {
            text: primer,
            voice_settings,
            xi_api_key: api_key,
        })?,
        serde_json::to_string(&TextMessage { text })?,
        serde_json::to_string(&TextMessage::END_OF_INPUT)?,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_messages_shape() {
        let [init, text, end] =
            session_messages("Hello there.", "xi-key", VoiceSettings::default(), PRIMER_TEXT).unwrap();
        let init: serde_json::Value = serde_json::from_str(&init).unwrap();
        assert_eq!(init["text"], " ");
        assert_eq!(init["xi_api_key"], "xi-key");
        assert_eq!(init["voice_settings"]["stability"], 0.5);
        assert!((init["voice_settings"]["similarity_boost"].as_f64().unwrap() - 0.8).abs() < 1e-6);
        assert_eq!(text, r#"{"text":"Hello there."}"#);
        assert_eq!(end, r#"{"text":""}"#);
    }

    #[test]
    fn test_response_parsing() {
        let msg: SynthesisResponse =
            serde_json::from_str(r#"{"audio":"AQID","isFinal":null,"alignment":{"chars":["a"]}}"#).unwrap();
        assert!(!msg.is_final());
        assert_eq!(msg.fragment().unwrap().unwrap(), vec![1, 2, 3]);

        let last: SynthesisResponse = serde_json::from_str(r#"{"isFinal":true}"#).unwrap();
        assert!(last.is_final());
        assert!(last.fragment().is_none());
    }

    #[test]
    fn test_bad_base64_is_reported() {
        let msg = SynthesisResponse { audio: Some("***".into()), is_final: None };
        assert!(msg.fragment().unwrap().is_err());
    }
}
