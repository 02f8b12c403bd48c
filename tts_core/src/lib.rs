//! Speech side of the voice pipeline.
//!
//! A finalized reply is streamed to a `stream-input` synthesis socket; the
//! base64 audio fragments it returns are collected by a [`SynthesisSession`],
//! concatenated in arrival order, decoded and handed to an [`AudioOutput`].

pub mod config;
pub mod error;
pub mod playback;
pub mod protocol;
pub mod session;
pub mod stream;
pub mod wav;

pub use config::SynthesisConfig;
pub use error::{PlaybackError, SynthesisError};
#[cfg(feature = "playback")]
pub use playback::RodioOutput;
pub use playback::{
    assemble, decode_with_retry, play_fragments, AssembledAudio, AudioDecoder, AudioOutput,
    DecodedAudio, Mp3Decoder, NullOutput, PlaybackOutcome,
};
pub use protocol::{SynthesisResponse, VoiceSettings};
pub use session::{CloseReason, SessionAction, SessionEvent, SessionState, SynthesisSession};
pub use stream::SpeechStreamer;
pub use wav::{encode_wav, write_wav};
