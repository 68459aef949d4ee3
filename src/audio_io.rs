//! The system-audio sink boundary (§6). The core only depends on the
//! `AudioDev` trait; the `cpal` backend is the out-of-core adapter
//! SPEC_FULL.md's ambient stack calls for.

use crate::error::{Result, SynthError};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream, StreamConfig};
use std::sync::mpsc::{sync_channel, SyncSender};

/// Interleaved-int16 audio output device.
pub trait AudioDev {
    /// Writes one interleaved block. Returns `false` on underrun (a soft
    /// error, per §7): the render loop logs and continues.
    fn write(&mut self, data: &[i16]) -> bool;
    fn close(&mut self);
}

/// Opens the platform default output device via `cpal`, feeding it
/// through a bounded channel from the render loop's blocking `write`
/// calls.
pub struct CpalAudioDev {
    stream: Stream,
    sender: SyncSender<i16>,
}

impl CpalAudioDev {
    /// Opens the default output device, preferring `requested_srate` but
    /// falling back to whatever the device reports as supported.
    /// Returns the device and the sample rate it actually opened at.
    pub fn open(channels: u16, requested_srate: u32) -> Result<(Self, u32)> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| SynthError::AudioDevice("no default output device".into()))?;

        let supported = device
            .supported_output_configs()
            .map_err(|e| SynthError::AudioDevice(e.to_string()))?
            .find(|c| c.channels() == channels && c.sample_format() == SampleFormat::I16)
            .or_else(|| {
                device
                    .supported_output_configs()
                    .ok()
                    .and_then(|mut configs| configs.next())
            })
            .ok_or_else(|| SynthError::AudioDevice("no supported output config".into()))?;

        let actual_srate = requested_srate
            .clamp(supported.min_sample_rate().0, supported.max_sample_rate().0);
        let config: StreamConfig = supported
            .with_sample_rate(cpal::SampleRate(actual_srate))
            .config();

        let (sender, receiver) = sync_channel::<i16>(config.sample_rate.0 as usize * config.channels as usize);

        let stream = device
            .build_output_stream(
                &config,
                move |out: &mut [i16], _| {
                    for slot in out.iter_mut() {
                        *slot = receiver.try_recv().unwrap_or(0);
                    }
                },
                |err| log::error!("audio stream error: {err}"),
                None,
            )
            .map_err(|e| SynthError::AudioDevice(e.to_string()))?;

        stream.play().map_err(|e| SynthError::AudioDevice(e.to_string()))?;

        Ok((CpalAudioDev { stream, sender }, actual_srate))
    }
}

impl AudioDev for CpalAudioDev {
    fn write(&mut self, data: &[i16]) -> bool {
        let mut ok = true;
        for &sample in data {
            if self.sender.try_send(sample).is_err() {
                ok = false;
            }
        }
        ok
    }

    fn close(&mut self) {
        let _ = self.stream.pause();
    }
}
