//! The WAV file sink boundary (§6). The core depends only on the
//! `WavFile` trait; the `hound` backend provides the RIFF/WAVE
//! container, including the size-patch-at-close `hound` already
//! performs on `finalize`.

use crate::error::Result;
use std::path::Path;

/// A 16-bit PCM WAV sink.
pub trait WavFile {
    /// Writes one interleaved int16 block. A write failure is a hard
    /// error for file sinks (§7): propagated, not retried.
    fn write(&mut self, data: &[i16]) -> Result<()>;
    /// Finalizes the container (patches the `RIFF`/`data` chunk sizes).
    fn close(&mut self) -> Result<()>;
}

/// `hound`-backed WAV writer.
pub struct HoundWavFile {
    writer: Option<hound::WavWriter<std::io::BufWriter<std::fs::File>>>,
}

impl HoundWavFile {
    pub fn create(path: impl AsRef<Path>, channels: u16, sample_rate: u32) -> Result<Self> {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let writer = hound::WavWriter::create(path, spec)
            .map_err(|e| crate::error::SynthError::AudioDevice(e.to_string()))?;
        Ok(HoundWavFile { writer: Some(writer) })
    }
}

impl WavFile for HoundWavFile {
    fn write(&mut self, data: &[i16]) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .expect("write after close on HoundWavFile");
        for &sample in data {
            writer
                .write_sample(sample)
                .map_err(|e| crate::error::SynthError::AudioDevice(e.to_string()))?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            writer
                .finalize()
                .map_err(|e| crate::error::SynthError::AudioDevice(e.to_string()))?;
        }
        Ok(())
    }
}

impl Drop for HoundWavFile {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
