use std::io::Cursor;
use std::path::Path;

use crate::playback::DecodedAudio;

fn spec_for(audio: &DecodedAudio) -> hound::WavSpec {
    hound::WavSpec {
        channels: audio.channels,
        sample_rate: audio.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    }
}

/// Encode decoded audio as 16-bit PCM WAV (RIFF) in memory.
pub fn encode_wav(audio: &DecodedAudio) -> anyhow::Result<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec_for(audio))?;
        for &s in &audio.samples {
            writer.write_sample(s)?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

/// Write decoded audio to `path` as 16-bit PCM WAV.
pub fn write_wav(audio: &DecodedAudio, path: impl AsRef<Path>) -> anyhow::Result<()> {
    let mut writer = hound::WavWriter::create(path, spec_for(audio))?;
    for &s in &audio.samples {
        writer.write_sample(s)?;
    }
    writer.finalize()?;
    Ok(())
}
