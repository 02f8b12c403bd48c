//! Reassembly of synthesis fragments and hand-off to the audio device.

use std::io::Cursor;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::error::PlaybackError;

/// Concatenated fragments of one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssembledAudio {
    /// The session produced no fragments. Nothing is decoded or played.
    Empty,
    Audio(Vec<u8>),
}

/// Concatenate fragments byte-for-byte in arrival order.
pub fn assemble(fragments: &[Vec<u8>]) -> AssembledAudio {
    if fragments.is_empty() {
        return AssembledAudio::Empty;
    }
    let total = fragments.iter().map(Vec::len).sum();
    let mut out = Vec::with_capacity(total);
    for fragment in fragments {
        out.extend_from_slice(fragment);
    }
    AssembledAudio::Audio(out)
}

/// Interleaved 16-bit PCM.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl DecodedAudio {
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 || self.channels == 0 {
            return Duration::ZERO;
        }
        let frames = self.samples.len() as f64 / self.channels as f64;
        Duration::from_secs_f64(frames / self.sample_rate as f64)
    }

    /// Samples scaled to `[-1.0, 1.0]`.
    pub fn to_f32(&self) -> Vec<f32> {
        self.samples.iter().map(|&s| f32::from(s) / 32768.0).collect()
    }
}

pub trait AudioDecoder: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> anyhow::Result<DecodedAudio>;
}

/// Audio sink. `play` returns once playback has ended.
#[async_trait]
pub trait AudioOutput: Send + Sync {
    async fn play(&self, audio: DecodedAudio) -> Result<(), PlaybackError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    Played,
    Empty,
}

/// Decode `bytes`, retrying immediately up to `attempts` times.
pub fn decode_with_retry(
    decoder: &dyn AudioDecoder,
    bytes: &[u8],
    attempts: u32,
) -> Result<DecodedAudio, PlaybackError> {
    let attempts = attempts.max(1);
    let mut last = String::new();
    for attempt in 1..=attempts {
        match decoder.decode(bytes) {
            Ok(decoded) => return Ok(decoded),
            Err(e) => {
                warn!(attempt, attempts, error = %e, "audio decode failed");
                last = e.to_string();
            }
        }
    }
    Err(PlaybackError::Decode { attempts, last })
}

/// Assemble, decode and play one session's fragments.
pub async fn play_fragments(
    fragments: &[Vec<u8>],
    decoder: &dyn AudioDecoder,
    output: &dyn AudioOutput,
    attempts: u32,
) -> Result<PlaybackOutcome, PlaybackError> {
    let bytes = match assemble(fragments) {
        AssembledAudio::Empty => {
            info!("no audio fragments to play");
            return Ok(PlaybackOutcome::Empty);
        }
        AssembledAudio::Audio(bytes) => bytes,
    };
    debug!(fragments = fragments.len(), bytes = bytes.len(), "assembled audio");

    let decoded = decode_with_retry(decoder, &bytes, attempts)?;
    info!(
        duration_ms = decoded.duration().as_millis() as u64,
        sample_rate = decoded.sample_rate,
        "playing synthesized audio"
    );
    output.play(decoded).await?;
    Ok(PlaybackOutcome::Played)
}

/// MP3 decoder backed by minimp3.
#[derive(Debug, Default, Clone, Copy)]
pub struct Mp3Decoder;

impl AudioDecoder for Mp3Decoder {
    fn decode(&self, bytes: &[u8]) -> anyhow::Result<DecodedAudio> {
        let mut decoder = minimp3::Decoder::new(Cursor::new(bytes));
        let mut samples = Vec::new();
        let mut format: Option<(u32, u16)> = None;

        loop {
            match decoder.next_frame() {
                Ok(frame) => {
                    let frame_format = (frame.sample_rate as u32, frame.channels as u16);
                    match format {
                        None => format = Some(frame_format),
                        Some(f) if f != frame_format => {
                            anyhow::bail!("mp3 format changed mid-stream: {f:?} -> {frame_format:?}")
                        }
                        Some(_) => {}
                    }
                    samples.extend_from_slice(&frame.data);
                }
                Err(minimp3::Error::Eof) => break,
                Err(e) => anyhow::bail!("mp3 decode error: {e}"),
            }
        }

        let (sample_rate, channels) =
            format.ok_or_else(|| anyhow::anyhow!("no mp3 frames in {} bytes", bytes.len()))?;
        Ok(DecodedAudio {
            samples,
            sample_rate,
            channels,
        })
    }
}

/// Output for hosts without a sound device: logs and waits out the clip.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullOutput;

#[async_trait]
impl AudioOutput for NullOutput {
    async fn play(&self, audio: DecodedAudio) -> Result<(), PlaybackError> {
        let duration = audio.duration();
        info!(duration_ms = duration.as_millis() as u64, "discarding audio (no output device)");
        tokio::time::sleep(duration).await;
        Ok(())
    }
}

/// Default system output through rodio.
#[cfg(feature = "playback")]
#[derive(Debug, Default, Clone, Copy)]
pub struct RodioOutput;

#[cfg(feature = "playback")]
#[async_trait]
impl AudioOutput for RodioOutput {
    async fn play(&self, audio: DecodedAudio) -> Result<(), PlaybackError> {
        // The output stream is not Send; it lives and dies on the blocking thread.
        tokio::task::spawn_blocking(move || {
            let stream = rodio::OutputStreamBuilder::open_default_stream()
                .map_err(|e| PlaybackError::Output(e.to_string()))?;
            let sink = rodio::Sink::connect_new(stream.mixer());
            sink.append(rodio::buffer::SamplesBuffer::new(
                audio.channels,
                audio.sample_rate,
                audio.to_f32(),
            ));
            sink.sleep_until_end();
            Ok(())
        })
        .await
        .map_err(|e| PlaybackError::Output(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Fails the first `failures` calls, then returns the input bytes as samples.
    struct FlakyDecoder {
        failures: u32,
        calls: AtomicU32,
    }

    impl FlakyDecoder {
        fn new(failures: u32) -> Self {
            Self { failures, calls: AtomicU32::new(0) }
        }
    }

    impl AudioDecoder for FlakyDecoder {
        fn decode(&self, bytes: &[u8]) -> anyhow::Result<DecodedAudio> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                anyhow::bail!("decode failure {call}");
            }
            Ok(DecodedAudio {
                samples: bytes.iter().map(|&b| i16::from(b)).collect(),
                sample_rate: 8000,
                channels: 1,
            })
        }
    }

    #[derive(Default)]
    struct RecordingOutput {
        played: Mutex<Vec<DecodedAudio>>,
    }

    #[async_trait]
    impl AudioOutput for RecordingOutput {
        async fn play(&self, audio: DecodedAudio) -> Result<(), PlaybackError> {
            self.played.lock().unwrap().push(audio);
            Ok(())
        }
    }

    #[test]
    fn test_assemble_preserves_order() {
        let fragments = vec![vec![1u8, 2], vec![], vec![3], vec![4, 5, 6]];
        assert_eq!(assemble(&fragments), AssembledAudio::Audio(vec![1, 2, 3, 4, 5, 6]));
    }

    #[test]
    fn test_assemble_empty() {
        assert_eq!(assemble(&[]), AssembledAudio::Empty);
    }

    #[tokio::test]
    async fn test_retry_succeeds_on_third_attempt() {
        let decoder = FlakyDecoder::new(2);
        let output = RecordingOutput::default();
        let outcome = play_fragments(&[vec![7u8], vec![9]], &decoder, &output, 3)
            .await
            .unwrap();
        assert_eq!(outcome, PlaybackOutcome::Played);
        assert_eq!(decoder.calls.load(Ordering::SeqCst), 3);
        let played = output.played.lock().unwrap();
        assert_eq!(played.len(), 1);
        assert_eq!(played[0].samples, vec![7, 9]);
    }

    #[tokio::test]
    async fn test_three_failures_never_play() {
        let decoder = FlakyDecoder::new(3);
        let output = RecordingOutput::default();
        let err = play_fragments(&[vec![1u8]], &decoder, &output, 3).await.unwrap_err();
        assert!(matches!(err, PlaybackError::Decode { attempts: 3, .. }));
        assert_eq!(decoder.calls.load(Ordering::SeqCst), 3);
        assert!(output.played.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_no_fragments_is_empty_not_error() {
        let decoder = FlakyDecoder::new(0);
        let output = RecordingOutput::default();
        let outcome = play_fragments(&[], &decoder, &output, 3).await.unwrap();
        assert_eq!(outcome, PlaybackOutcome::Empty);
        assert_eq!(decoder.calls.load(Ordering::SeqCst), 0);
        assert!(output.played.lock().unwrap().is_empty());
    }

    #[test]
    fn test_mp3_decoder_rejects_garbage() {
        assert!(Mp3Decoder.decode(b"definitely not an mp3 stream").is_err());
        assert!(Mp3Decoder.decode(&[]).is_err());
    }

    #[test]
    fn test_duration() {
        let audio = DecodedAudio { samples: vec![0; 44100], sample_rate: 22050, channels: 2 };
        assert_eq!(audio.duration(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_null_output_waits_for_clip() {
        let audio = DecodedAudio { samples: vec![0; 16000], sample_rate: 8000, channels: 1 };
        let start = tokio::time::Instant::now();
        NullOutput.play(audio).await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }
}
