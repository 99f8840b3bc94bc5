use anyhow::{Context, Result};
use std::path::Path;
use tracing::{info, warn};

pub const CHANNELS: u16 = 1;
pub const SAMPLE_RATE_HZ: u32 = 24_000;
pub const SAMPLE_WIDTH_BYTES: u16 = 2;

/// Write little-endian 16-bit mono PCM into a WAV container at `path`.
///
/// A trailing odd byte cannot form a sample and is dropped.
pub fn write_wav(path: &Path, pcm: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }
    }

    let spec = hound::WavSpec {
        channels: CHANNELS,
        sample_rate: SAMPLE_RATE_HZ,
        bits_per_sample: SAMPLE_WIDTH_BYTES * 8,
        sample_format: hound::SampleFormat::Int,
    };

    let chunks = pcm.chunks_exact(SAMPLE_WIDTH_BYTES as usize);
    if !chunks.remainder().is_empty() {
        warn!("audio: dropping {} trailing byte(s) of incomplete sample", chunks.remainder().len());
    }

    let mut writer = hound::WavWriter::create(path, spec)
        .with_context(|| format!("failed to create {}", path.display()))?;
    for sample in chunks {
        writer
            .write_sample(i16::from_le_bytes([sample[0], sample[1]]))
            .context("failed to write audio sample")?;
    }
    writer.finalize().context("failed to finalize WAV file")?;

    info!("audio: saved {} ({} bytes of PCM)", path.display(), pcm.len());
    Ok(())
}
