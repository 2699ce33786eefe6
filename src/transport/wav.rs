//! WAV assembly for the batched strategy.

use crate::audio::{TARGET_CHANNELS, TARGET_RATE};
use hound::{SampleFormat, WavSpec, WavWriter};
use std::io::Cursor;

/// Wrap 16 kHz mono PCM16 in a RIFF/WAVE container, in memory.
pub(super) fn wrap_pcm16(samples: &[i16]) -> Result<Vec<u8>, hound::Error> {
    let spec = WavSpec {
        channels: TARGET_CHANNELS,
        sample_rate: TARGET_RATE,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    let mut writer = WavWriter::new(&mut cursor, spec)?;
    for &sample in samples {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;
    Ok(cursor.into_inner())
}
