//! Audio resampling
//!
//! Two converters live here:
//! - [`Resampler`]: one-shot rubato conversion of a whole decoded buffer, used
//!   when a sample loads.
//! - [`StreamResampler`]: stateful linear interpolation for the stream read
//!   path. It keeps phase across calls and never allocates, so its ratio can
//!   follow pitch changes block by block.

use crate::audio::convert;
use crate::error::{Error, Result};
use rubato::{FastFixedIn, PolynomialDegree, Resampler as RubatoResampler};
use std::sync::Mutex;
use tracing::debug;

/// Serialises one-shot resampler construction across loader threads.
static RESAMPLER_LOCK: Mutex<()> = Mutex::new(());

/// Upper bound on zero-input chunks fed to drain the filter delay.
const MAX_FLUSH_CHUNKS: usize = 16;

/// One-shot resampler over complete interleaved int16 buffers.
pub struct Resampler;

impl Resampler {
    /// Resample a whole buffer by `ratio` (output frames per input frame).
    ///
    /// # Arguments
    /// - `input`: Interleaved int16 samples
    /// - `ratio`: `(target_rate / pitch) / native_rate`
    /// - `channels`: Number of interleaved channels
    ///
    /// # Notes
    /// A ratio of exactly 1.0 returns a copy without resampling.
    pub fn resample(input: &[i16], ratio: f64, channels: u16) -> Result<Vec<i16>> {
        if !ratio.is_finite() || ratio <= 0.0 {
            return Err(Error::Resample(format!("Invalid resample ratio {}", ratio)));
        }
        if channels == 0 {
            return Err(Error::Resample("Channel count must be non-zero".to_string()));
        }

        if ratio == 1.0 {
            debug!("Resample ratio is 1.0, skipping resample");
            return Ok(input.to_vec());
        }

        let planar_input = convert::deinterleave(input, channels as usize);
        let input_frames = planar_input[0].len();
        if input_frames == 0 {
            return Ok(Vec::new());
        }

        debug!(
            "Resampling {} frames by ratio {:.6} ({} channels)",
            input_frames, ratio, channels
        );

        let planar_output = {
            let _guard = RESAMPLER_LOCK
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());

            let mut resampler = Self::create_resampler(ratio, channels, input_frames)?;
            let delay = resampler.output_delay();
            let expected = (input_frames as f64 * ratio).round() as usize;

            let mut planar = resampler
                .process(&planar_input, None)
                .map_err(|e| Error::Resample(format!("Resampling failed: {}", e)))?;

            // Flush the filter so the tail is not cut short by its delay
            for _ in 0..MAX_FLUSH_CHUNKS {
                if planar[0].len() >= delay + expected {
                    break;
                }
                let tail = resampler
                    .process_partial(None::<&[Vec<f32>]>, None)
                    .map_err(|e| Error::Resample(format!("Resampler flush failed: {}", e)))?;
                if tail[0].is_empty() {
                    break;
                }
                for (channel, rest) in planar.iter_mut().zip(tail) {
                    channel.extend(rest);
                }
            }

            for channel in planar.iter_mut() {
                channel.drain(..delay.min(channel.len()));
                channel.truncate(expected);
            }
            planar
        };

        let interleaved_output = convert::interleave(&planar_output);

        debug!(
            "Resampled {} input frames to {} output frames",
            input_frames,
            interleaved_output.len() / channels as usize
        );

        Ok(interleaved_output)
    }

    /// Create a rubato resampler sized to process the whole buffer as one chunk.
    fn create_resampler(ratio: f64, channels: u16, chunk_size: usize) -> Result<FastFixedIn<f32>> {
        FastFixedIn::<f32>::new(
            ratio,
            1.0, // fixed ratio for a one-shot conversion
            PolynomialDegree::Septic,
            chunk_size,
            channels as usize,
        )
        .map_err(|e| Error::Resample(format!("Failed to create resampler: {}", e)))
    }
}

/// Stateful stereo linear-interpolating resampler for streaming reads.
///
/// Output frame `k` of a call is taken at input position `pos + k * step`,
/// interpolating between the frame before that position and the frame at it.
/// The frame before the first input frame is the last frame of the previous
/// call. Starting `pos` at 1.0 primes the interpolator so a 1.0 ratio is an
/// exact passthrough.
#[derive(Debug, Clone)]
pub struct StreamResampler {
    /// Input frames advanced per output frame (1 / ratio)
    step: f64,
    /// Fractional read position relative to the current input block
    pos: f64,
    /// Last frame of the previous input block
    prev: [i16; 2],
}

impl StreamResampler {
    /// Stereo output frames per call are interleaved `[L, R]`.
    pub const CHANNELS: usize = 2;

    /// Create a resampler producing `ratio` output frames per input frame.
    pub fn new(ratio: f64) -> Self {
        let mut resampler = Self {
            step: 1.0,
            pos: 1.0,
            prev: [0; 2],
        };
        resampler.set_ratio(ratio);
        resampler
    }

    /// Update the conversion ratio. Takes effect on the next [`process`](Self::process) call.
    ///
    /// Non-finite or non-positive ratios are ignored.
    pub fn set_ratio(&mut self, ratio: f64) {
        if ratio.is_finite() && ratio > 0.0 {
            self.step = 1.0 / ratio;
        }
    }

    /// Current ratio (output frames per input frame)
    pub fn ratio(&self) -> f64 {
        1.0 / self.step
    }

    /// Forget interpolation history (after a seek).
    pub fn reset(&mut self) {
        self.pos = 1.0;
        self.prev = [0; 2];
    }

    /// Number of input frames whose processing yields at most `out_frames` outputs.
    pub fn input_frames_for(&self, out_frames: usize) -> usize {
        if out_frames == 0 {
            return 0;
        }
        (self.pos + out_frames as f64 * self.step).floor() as usize
    }

    /// Resample interleaved stereo `input` into interleaved stereo `output`.
    ///
    /// Consumes all of `input` and returns the number of frames written.
    pub fn process(&mut self, input: &[i16], output: &mut [i16]) -> usize {
        let in_frames = input.len() / Self::CHANNELS;
        let out_capacity = output.len() / Self::CHANNELS;
        if in_frames == 0 {
            return 0;
        }

        let mut t = self.pos;
        let mut written = 0;

        while written < out_capacity {
            let idx = t as usize;
            if idx >= in_frames {
                break;
            }
            let frac = t - idx as f64;

            for ch in 0..Self::CHANNELS {
                let a = if idx == 0 {
                    self.prev[ch]
                } else {
                    input[(idx - 1) * Self::CHANNELS + ch]
                };
                let b = input[idx * Self::CHANNELS + ch];
                let value = a as f64 + (b as f64 - a as f64) * frac;
                output[written * Self::CHANNELS + ch] =
                    value.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16;
            }

            written += 1;
            t += self.step;
        }

        // Input left unvisited (output ran out) is dropped, never replayed.
        self.pos = (t - in_frames as f64).max(0.0);
        let last = (in_frames - 1) * Self::CHANNELS;
        self.prev = [input[last], input[last + 1]];

        written
    }
}
