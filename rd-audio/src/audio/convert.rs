//! PCM format conversion helpers
//!
//! int16 <-> float normalisation, mono -> stereo expansion, and the
//! interleaved <-> planar reshaping rubato needs.

/// Convert one int16 sample to normalized float.
///
/// Positive samples are divided by `i16::MAX`, negative samples by `-i16::MIN`,
/// so both extremes map to magnitude 1.0 with their sign kept.
#[inline]
pub fn s16_to_f32(sample: i16) -> f32 {
    if sample < 0 {
        -(sample as f32) / i16::MIN as f32
    } else {
        sample as f32 / i16::MAX as f32
    }
}

/// Inverse of [`s16_to_f32`], clamped to [-1.0, 1.0] and rounded.
#[inline]
pub fn f32_to_s16(sample: f32) -> i16 {
    let clamped = sample.clamp(-1.0, 1.0);
    if clamped < 0.0 {
        (-clamped * i16::MIN as f32).round() as i16
    } else {
        (clamped * i16::MAX as f32).round() as i16
    }
}

/// Convert a slice of int16 samples into `output`.
///
/// Converts `min(input.len(), output.len())` samples and returns that count.
pub fn s16_slice_to_f32(input: &[i16], output: &mut [f32]) -> usize {
    let count = input.len().min(output.len());
    for (dst, &src) in output[..count].iter_mut().zip(&input[..count]) {
        *dst = s16_to_f32(src);
    }
    count
}

/// Duplicate mono samples into interleaved stereo without allocating.
///
/// `[a, b, c]` -> `[a, a, b, b, c, c]`. Returns the number of stereo samples
/// written, bounded by `output.len()`.
pub fn mono_to_stereo(input: &[i16], output: &mut [i16]) -> usize {
    let frames = input.len().min(output.len() / 2);
    for (pair, &sample) in output.chunks_exact_mut(2).zip(&input[..frames]) {
        pair[0] = sample;
        pair[1] = sample;
    }
    frames * 2
}

/// Allocating variant of [`mono_to_stereo`] used by whole-buffer loads.
pub fn expand_mono(samples: &[i16]) -> Vec<i16> {
    let mut stereo = vec![0i16; samples.len() * 2];
    mono_to_stereo(samples, &mut stereo);
    stereo
}

/// Convert interleaved samples to planar float format.
///
/// Input:  [L, R, L, R, L, R, ...]
/// Output: [[L, L, L, ...], [R, R, R, ...]]
pub fn deinterleave(samples: &[i16], channels: usize) -> Vec<Vec<f32>> {
    let num_frames = samples.len() / channels;
    let mut planar = vec![Vec::with_capacity(num_frames); channels];

    for frame in samples.chunks_exact(channels) {
        for (ch_idx, &sample) in frame.iter().enumerate() {
            planar[ch_idx].push(s16_to_f32(sample));
        }
    }

    planar
}

/// Convert planar float samples back to interleaved int16.
///
/// Input:  [[L, L, L, ...], [R, R, R, ...]]
/// Output: [L, R, L, R, L, R, ...]
pub fn interleave(planar: &[Vec<f32>]) -> Vec<i16> {
    if planar.is_empty() {
        return Vec::new();
    }

    let num_channels = planar.len();
    let num_frames = planar.iter().map(Vec::len).min().unwrap_or(0);
    let mut interleaved = Vec::with_capacity(num_frames * num_channels);

    for frame_idx in 0..num_frames {
        for channel in planar {
            interleaved.push(f32_to_s16(channel[frame_idx]));
        }
    }

    interleaved
}
