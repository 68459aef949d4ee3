//! The render loop: drives a [`Generator`] in fixed-size blocks and
//! fans each block out to zero, one, or both configured sinks. See
//! SPEC_FULL.md §4.6.

use crate::audio_io::AudioDev;
use crate::error::Result;
use crate::generator::Generator;
use crate::wav_sink::WavFile;

/// How the loop reacts when the audio device insists on a different
/// sample rate than the one the Program was built for (§4.6).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum RateMismatchPolicy {
    /// Adopt the device's rate for every sink, including the WAV file.
    #[default]
    AdoptDeviceRate,
    /// Run two independent Generators in parallel against the same
    /// Program, one per rate, each feeding only its own sink.
    DualGenerator,
}

/// Render loop configuration.
#[derive(Clone, Copy, Debug)]
pub struct RenderConfig {
    /// Requested sample rate, Hz.
    pub sample_rate: u32,
    /// Block length target, in samples; clamped to at least 1. Chosen to
    /// be roughly 256ms worth of audio per the source's render loop.
    pub block_len: usize,
    pub stereo: bool,
    pub rate_mismatch: RateMismatchPolicy,
}

impl RenderConfig {
    pub fn new(sample_rate: u32) -> Self {
        let block_len = ((sample_rate as usize) / 4).max(1);
        RenderConfig {
            sample_rate,
            block_len,
            stereo: true,
            rate_mismatch: RateMismatchPolicy::default(),
        }
    }
}

/// Drives `generator` to completion, writing each produced block to
/// `device` and/or `wav` as configured. Returns once the generator
/// reports no further work.
pub fn run_loop(
    generator: &mut Generator,
    config: &RenderConfig,
    mut device: Option<&mut dyn AudioDev>,
    mut wav: Option<&mut dyn WavFile>,
) -> Result<u64> {
    let channels = if config.stereo { 2 } else { 1 };
    let mut block = vec![0i16; config.block_len * channels];
    let mut total_frames = 0u64;

    loop {
        let (produced, more) = generator.run(&mut block, config.stereo);
        let frames = produced / channels;
        total_frames += frames as u64;

        let slice = &block[..produced];
        if let Some(dev) = device.as_deref_mut() {
            if !dev.write(slice) {
                log::warn!("audio device write underrun at frame {total_frames}");
            }
        }
        if let Some(sink) = wav.as_deref_mut() {
            sink.write(slice)?;
        }

        if !more {
            break;
        }
    }

    Ok(total_frames)
}
