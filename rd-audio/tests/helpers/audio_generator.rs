//! Audio Test File Generation Utilities
//!
//! Generate WAV files with known content so decoder, sample and stream tests
//! can check exact sample values and counts.

use hound::{WavSpec, WavWriter};
use std::f32::consts::PI;
use std::path::Path;

fn spec(rate: u32, channels: u16) -> WavSpec {
    WavSpec {
        channels,
        sample_rate: rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    }
}

/// Generate a WAV file where every sample has the same value
///
/// # Arguments
/// * `path` - Output file path
/// * `rate` - Sample rate in Hz
/// * `channels` - 1 (mono) or 2 (stereo)
/// * `frames` - Number of frames to write
/// * `value` - Sample value written to every channel of every frame
pub fn generate_constant_wav<P: AsRef<Path>>(
    path: P,
    rate: u32,
    channels: u16,
    frames: u64,
    value: i16,
) -> Result<(), hound::Error> {
    let mut writer = WavWriter::create(path, spec(rate, channels))?;

    for _ in 0..frames * channels as u64 {
        writer.write_sample(value)?;
    }

    writer.finalize()?;
    Ok(())
}

/// Generate a WAV file whose frame `i` holds `(i % 30000) as i16` on every channel
///
/// Lets a test tell exactly which frame it is looking at.
pub fn generate_ramp_wav<P: AsRef<Path>>(
    path: P,
    rate: u32,
    channels: u16,
    frames: u64,
) -> Result<(), hound::Error> {
    let mut writer = WavWriter::create(path, spec(rate, channels))?;

    for frame_idx in 0..frames {
        let value = (frame_idx % 30000) as i16;
        for _ in 0..channels {
            writer.write_sample(value)?;
        }
    }

    writer.finalize()?;
    Ok(())
}

/// Generate a sine wave WAV file
///
/// # Arguments
/// * `path` - Output file path
/// * `rate` - Sample rate in Hz
/// * `channels` - 1 (mono) or 2 (stereo)
/// * `duration_ms` - Duration in milliseconds
/// * `frequency_hz` - Sine wave frequency in Hz (e.g., 440.0 for A4)
/// * `amplitude` - Amplitude 0.0-1.0 (0.5 recommended to avoid clipping)
pub fn generate_sine_wav<P: AsRef<Path>>(
    path: P,
    rate: u32,
    channels: u16,
    duration_ms: u64,
    frequency_hz: f32,
    amplitude: f32,
) -> Result<(), hound::Error> {
    let mut writer = WavWriter::create(path, spec(rate, channels))?;

    let total_frames = (rate as u64 * duration_ms) / 1000;
    let amplitude_i16 = (amplitude * i16::MAX as f32) as i16;

    for frame_idx in 0..total_frames {
        let t = frame_idx as f32 / rate as f32;
        let sample_value = (2.0 * PI * frequency_hz * t).sin();
        let sample_i16 = (sample_value * amplitude_i16 as f32) as i16;

        for _ in 0..channels {
            writer.write_sample(sample_i16)?;
        }
    }

    writer.finalize()?;
    Ok(())
}
