use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;
use tokio::io::BufReader;
use tracing::{debug, info, warn};

use tts_core::{
    write_wav, AudioOutput, DecodedAudio, Mp3Decoder, NullOutput, PlaybackError, SpeechStreamer,
    SynthesisConfig,
};
use voice_server::recognizer::{LineRecognizer, RecognitionError, SpeechRecognizer};
use voice_server::relay_client::{RelayClient, DEFAULT_RELAY_URL};
use voice_server::turn::Assistant;

/// Voice assistant: one transcript per stdin line, replies spoken aloud.
#[derive(Parser)]
#[command(name = "voice-assistant", version, about)]
struct Cli {
    /// Completion relay endpoint
    #[arg(long, env = "RELAY_URL", default_value = DEFAULT_RELAY_URL)]
    relay_url: String,

    /// Also write every spoken reply as WAV into this directory
    #[arg(long)]
    save_wav: Option<PathBuf>,

    /// Skip the warm-up synthesis session at startup
    #[arg(long)]
    no_preload: bool,

    /// Do not open a sound device (for headless hosts)
    #[arg(long, env = "VOICE_DISABLE_AUDIO")]
    no_audio: bool,
}

/// Writes each reply to `dir` before handing it to the real output.
struct SavingOutput {
    inner: Arc<dyn AudioOutput>,
    dir: PathBuf,
    counter: AtomicU32,
}

#[async_trait]
impl AudioOutput for SavingOutput {
    async fn play(&self, audio: DecodedAudio) -> Result<(), PlaybackError> {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        let path = self.dir.join(format!("reply-{n:03}.wav"));
        match write_wav(&audio, &path) {
            Ok(()) => info!(path = %path.display(), "saved reply"),
            Err(e) => warn!(path = %path.display(), error = %e, "could not save reply"),
        }
        self.inner.play(audio).await
    }
}

#[cfg(feature = "playback")]
fn audio_output(no_audio: bool) -> Arc<dyn AudioOutput> {
    if no_audio {
        Arc::new(NullOutput)
    } else {
        Arc::new(tts_core::RodioOutput)
    }
}

#[cfg(not(feature = "playback"))]
fn audio_output(no_audio: bool) -> Arc<dyn AudioOutput> {
    if !no_audio {
        warn!("built without the `playback` feature, replies will not be audible");
    }
    Arc::new(NullOutput)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let _ = dotenv::dotenv();
    let cli = Cli::parse();

    let synthesis = SynthesisConfig::from_env()?;
    let streamer = SpeechStreamer::new(synthesis);

    let mut output = audio_output(cli.no_audio);
    if let Some(dir) = cli.save_wav {
        std::fs::create_dir_all(&dir)?;
        output = Arc::new(SavingOutput {
            inner: output,
            dir,
            counter: AtomicU32::new(0),
        });
    }

    let assistant = Assistant::new(
        RelayClient::new(cli.relay_url),
        streamer,
        Arc::new(Mp3Decoder),
        output,
    );

    let mut updates = assistant.subscribe();
    tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let state = updates.borrow_and_update().clone();
            debug!(
                loading = state.loading,
                speaking = state.speaking,
                chars = state.streaming_text.len(),
                error = ?state.error,
                "response state"
            );
        }
    });

    if !cli.no_preload {
        assistant.preload();
    }

    info!("Ready. Type an utterance per line (Ctrl-D to quit).");
    let mut recognizer = LineRecognizer::new(BufReader::new(tokio::io::stdin()));
    loop {
        match recognizer.recognize().await {
            Ok(Some(transcript)) => match assistant.run_turn(&transcript).await {
                Ok(outcome) => println!("{}", outcome.reply),
                Err(e) => eprintln!("error: {e}"),
            },
            Ok(None) => info!("no speech recognized"),
            Err(RecognitionError::Closed) => break,
            Err(e) => warn!(error = %e, "recognition failed"),
        }
    }

    info!("Input closed, exiting");
    Ok(())
}
