use std::env;

use crate::error::LlmError;

/// Instruction prepended to every user prompt.
pub const SYSTEM_PROMPT: &str = "You are a friendly voice assistant. \
Your answers are read aloud, so avoid markdown and lists. \
Answer the question being asked in less than 500 characters.";

/// OpenAI-compatible chat completion backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    Groq,
    OpenAI,
    Ollama,
}

impl LlmProvider {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "groq" => Some(Self::Groq),
            "openai" => Some(Self::OpenAI),
            "ollama" => Some(Self::Ollama),
            _ => None,
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Self::Groq => "llama-3.3-70b-versatile",
            Self::OpenAI => "gpt-4o-mini",
            Self::Ollama => "llama3.2",
        }
    }

    pub fn default_url(&self) -> &'static str {
        match self {
            Self::Groq => "https://api.groq.com/openai/v1/chat/completions",
            Self::OpenAI => "https://api.openai.com/v1/chat/completions",
            Self::Ollama => "http://localhost:11434/v1/chat/completions",
        }
    }

    /// Environment variable holding the API key; Ollama needs none.
    pub fn api_key_var(&self) -> Option<&'static str> {
        match self {
            Self::Groq => Some("GROQ_API_KEY"),
            Self::OpenAI => Some("OPENAI_API_KEY"),
            Self::Ollama => None,
        }
    }
}

/// Chat completions endpoint under an OpenAI-style base URL such as `…/v1`.
///
/// A URL that already names the endpoint is kept as is.
pub fn completions_url(base: &str) -> String {
    let base = base.trim().trim_end_matches('/');
    if base.ends_with(COMPLETIONS_PATH) {
        base.to_string()
    } else {
        format!("{base}{COMPLETIONS_PATH}")
    }
}

const COMPLETIONS_PATH: &str = "/chat/completions";

/// Everything needed to issue a streaming completion.
#[derive(Debug, Clone)]
pub struct CompletionConfig {
    pub provider: LlmProvider,
    pub model: String,
    pub url: String,
    pub api_key: Option<String>,
    pub system_prompt: String,
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
}

impl CompletionConfig {
    pub fn new(provider: LlmProvider) -> Self {
        Self {
            provider,
            model: provider.default_model().to_string(),
            url: provider.default_url().to_string(),
            api_key: None,
            system_prompt: SYSTEM_PROMPT.to_string(),
            temperature: 0.7,
            top_p: 1.0,
            max_tokens: 1024,
        }
    }

    /// Read `LLM_PROVIDER`, `LLM_MODEL`, `LLM_BASE_URL` and the provider's key variable.
    pub fn from_env() -> Result<Self, LlmError> {
        let provider_env = env::var("LLM_PROVIDER").unwrap_or_else(|_| "groq".into());
        let provider = LlmProvider::parse(&provider_env)
            .ok_or_else(|| LlmError::Config(format!("unknown LLM_PROVIDER {provider_env:?}")))?;

        let mut config = Self::new(provider);
        if let Ok(model) = env::var("LLM_MODEL") {
            if !model.trim().is_empty() {
                config.model = model;
            }
        }
        if let Ok(base) = env::var("LLM_BASE_URL") {
            if !base.trim().is_empty() {
                config.url = completions_url(&base);
            }
        }
        if let Some(var) = provider.api_key_var() {
            let key = env::var(var)
                .ok()
                .filter(|k| !k.trim().is_empty())
                .ok_or_else(|| LlmError::Config(format!("{var} must be set in the environment")))?;
            config.api_key = Some(key);
        }
        Ok(config)
    }
}
