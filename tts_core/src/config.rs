// Synthesis service configuration

use std::time::Duration;

use crate::error::SynthesisError;
use crate::protocol::VoiceSettings;

pub const DEFAULT_WS_BASE: &str = "wss://api.elevenlabs.io";
pub const DEFAULT_VOICE_ID: &str = "EXAVITQu4vr4xnSDxMaL";
pub const DEFAULT_MODEL_ID: &str = "eleven_flash_v2_5";

#[derive(Debug, Clone)]
pub struct SynthesisConfig {
    pub ws_base: String,
    pub voice_id: String,
    pub model_id: String,
    pub api_key: String,
    pub voice_settings: VoiceSettings,
    /// Delay before clearing the speaking flag when the socket closes without a final fragment.
    pub grace_ms: u64,
    /// Longest wait for the next inbound message before the session is aborted.
    pub receive_timeout_secs: u64,
    pub decode_attempts: u32,
}

impl SynthesisConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            ws_base: DEFAULT_WS_BASE.to_string(),
            voice_id: DEFAULT_VOICE_ID.to_string(),
            model_id: DEFAULT_MODEL_ID.to_string(),
            api_key: api_key.into(),
            voice_settings: VoiceSettings::default(),
            grace_ms: 2000,
            receive_timeout_secs: 20,
            decode_attempts: 3,
        }
    }

    pub fn from_env() -> Result<Self, SynthesisError> {
        let api_key = std::env::var("ELEVENLABS_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                SynthesisError::Config("ELEVENLABS_API_KEY must be set in the environment".into())
            })?;

        let mut config = Self::new(api_key);

        if let Ok(base) = std::env::var("ELEVENLABS_WS_BASE") {
            config.ws_base = base.trim_end_matches('/').to_string();
        }
        if let Ok(voice) = std::env::var("ELEVENLABS_VOICE_ID") {
            config.voice_id = voice;
        }
        if let Ok(model) = std::env::var("ELEVENLABS_MODEL_ID") {
            config.model_id = model;
        }
        config.grace_ms = std::env::var("SYNTHESIS_GRACE_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(config.grace_ms);
        config.receive_timeout_secs = std::env::var("SYNTHESIS_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(config.receive_timeout_secs);
        config.decode_attempts = std::env::var("DECODE_ATTEMPTS")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|n: &u32| *n > 0)
            .unwrap_or(config.decode_attempts);

        Ok(config)
    }

    /// Per-voice, per-model `stream-input` endpoint.
    pub fn url(&self) -> String {
        format!(
            "{}/v1/text-to-speech/{}/stream-input?model_id={}",
            self.ws_base, self.voice_id, self.model_id
        )
    }

    pub fn grace_delay(&self) -> Duration {
        Duration::from_millis(self.grace_ms)
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_secs(self.receive_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_url() {
        let config = SynthesisConfig::new("key");
        assert_eq!(
            config.url(),
            "wss://api.elevenlabs.io/v1/text-to-speech/EXAVITQu4vr4xnSDxMaL/stream-input?model_id=eleven_flash_v2_5"
        );
        assert_eq!(config.grace_delay(), Duration::from_secs(2));
        assert_eq!(config.decode_attempts, 3);
    }
}
