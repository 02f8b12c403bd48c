//! Completion side of the voice pipeline.
//!
//! A prompt is sent to an OpenAI-compatible chat completion endpoint with
//! streaming enabled; the provider's SSE framing is decoded into text deltas,
//! re-chunked into sentences and republished as [`RelayEvent`]s.

pub mod client;
pub mod error;
pub mod provider;
pub mod relay;
pub mod segmenter;
pub mod sse;

pub use client::{deltas_from_bytes, CompletionClient, CompletionSource, DeltaStream};
pub use error::LlmError;
pub use provider::{CompletionConfig, LlmProvider, SYSTEM_PROMPT};
pub use relay::{relay_events, relay_prompt, IncrementalTextEvent, RelayEvent};
pub use segmenter::{segment, sentence_chunks, SentenceSegmenter, SENTENCE_TERMINATOR};
pub use sse::{SseDecoder, SseFrame};
