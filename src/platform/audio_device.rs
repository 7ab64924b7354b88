//! The audio device half of the media I/O subsystem (§6): opened with a
//! desired spec, returns an obtained spec whose `size` becomes
//! `audio_hw_buf_size`, and pulls samples through a callback.
//!
//! Grounded on `audio/player.rs`'s `spawn_audio`, which already does the
//! cpal host/device/stream dance; generalized here to (a) request a
//! specific sample rate/channel count instead of always following the
//! device default, and (b) call the pull callback directly from cpal's
//! audio thread instead of draining a pre-filled ring buffer, matching the
//! spec's "device invokes a callback with a destination buffer" model.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tracing::{error, warn};

use crate::error::{PlayerError, Result};

#[derive(Debug, Clone, Copy)]
pub struct DesiredSpec {
    pub sample_rate: u32,
    pub channels: u16,
    /// frames per callback invocation, analogous to SDL's `samples` field.
    pub samples: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct ObtainedSpec {
    pub sample_rate: u32,
    pub channels: u16,
    /// hardware buffer size in bytes of signed-16-bit samples, i.e.
    /// `samples * channels * 2` — stored by the caller as `audio_hw_buf_size`.
    pub size: usize,
}

/// Owns the live output stream; dropping it stops playback.
pub struct AudioDevice {
    #[allow(unused)]
    stream: cpal::Stream,
}

/// Opens the default output device for `desired`, converting straight from
/// the pull callback's `i16` buffer to whatever native sample format the
/// device actually requires.
pub fn open(
    desired: DesiredSpec,
    mut pull: impl FnMut(&mut [i16]) + Send + 'static,
) -> Result<(AudioDevice, ObtainedSpec)> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| PlayerError::Startup("no audio output device available".into()))?;

    let (config, sample_format) = pick_config(&device, desired)?;
    let channels = config.channels;
    let sample_rate = config.sample_rate.0;
    let obtained = ObtainedSpec {
        sample_rate,
        channels,
        size: desired.samples as usize * channels as usize * 2,
    };

    let err_fn = |err| error!("audio stream error: {err}");
    let mut scratch: Vec<i16> = Vec::new();

    let stream = match sample_format {
        cpal::SampleFormat::I16 => device
            .build_output_stream(
                &config,
                move |data: &mut [i16], _| pull(data),
                err_fn,
                None,
            )
            .map_err(|e| PlayerError::Startup(format!("failed to build i16 output stream: {e}")))?,
        cpal::SampleFormat::F32 => device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _| {
                    scratch.resize(data.len(), 0);
                    pull(&mut scratch);
                    for (dst, src) in data.iter_mut().zip(scratch.iter()) {
                        *dst = *src as f32 / i16::MAX as f32;
                    }
                },
                err_fn,
                None,
            )
            .map_err(|e| PlayerError::Startup(format!("failed to build f32 output stream: {e}")))?,
        other => {
            return Err(PlayerError::Startup(format!(
                "unsupported device sample format: {other:?}"
            )));
        }
    };

    stream
        .play()
        .map_err(|e| PlayerError::Startup(format!("failed to start output stream: {e}")))?;

    Ok((AudioDevice { stream }, obtained))
}

fn pick_config(
    device: &cpal::Device,
    desired: DesiredSpec,
) -> Result<(cpal::StreamConfig, cpal::SampleFormat)> {
    let ranges = device
        .supported_output_configs()
        .map_err(|e| PlayerError::Startup(format!("failed to query output configs: {e}")))?;

    let mut best: Option<cpal::SupportedStreamConfig> = None;
    for range in ranges {
        if range.channels() != desired.channels {
            continue;
        }
        if desired.sample_rate >= range.min_sample_rate().0
            && desired.sample_rate <= range.max_sample_rate().0
        {
            let candidate = range.with_sample_rate(cpal::SampleRate(desired.sample_rate));
            let is_i16 = candidate.sample_format() == cpal::SampleFormat::I16;
            if is_i16 || best.is_none() {
                best = Some(candidate);
            }
            if is_i16 {
                break;
            }
        }
    }

    let chosen = match best {
        Some(c) => c,
        None => {
            warn!(
                "no exact output config for {} Hz / {} ch; falling back to device default",
                desired.sample_rate, desired.channels
            );
            device
                .default_output_config()
                .map_err(|e| PlayerError::Startup(format!("no default output config: {e}")))?
        }
    };

    let format = chosen.sample_format();
    let mut config: cpal::StreamConfig = chosen.into();
    config.buffer_size = cpal::BufferSize::Fixed(desired.samples);
    Ok((config, format))
}
