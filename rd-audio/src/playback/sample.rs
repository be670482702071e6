//! Sample engine
//!
//! A sample is decoded, expanded to stereo and resampled exactly once. The
//! result is frozen behind an `Arc<[i16]>`; playback is a playhead walking
//! that buffer. Loading can run on a background thread whose result comes
//! back through its `JoinHandle`, so the worker never writes into memory the
//! sample owns.

use crate::audio::convert;
use crate::audio::decoder::{source_from_path, AudioDataSource};
use crate::audio::resampler::Resampler;
use crate::error::{Error, Result};
use crate::playback::mixer::{Mixer, Registration, VoiceKind};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

/// Samples read per chunk while loading a whole source
pub const DEFAULT_LOAD_CHUNK: usize = 65536;

/// Output of a completed load
struct LoadedAudio {
    data: Arc<[i16]>,
    rate: u32,
}

/// One-shot sound: frozen stereo PCM plus a playhead.
pub struct Sample {
    data: Option<Arc<[i16]>>,
    loader: Option<JoinHandle<Option<LoadedAudio>>>,

    rate: u32,
    pitch: f64,
    looping: bool,
    playing: bool,

    /// Slice bounds in seconds. `audio_end` is unset until a load completes.
    audio_start: f64,
    audio_end: Option<f64>,

    /// Playhead in interleaved samples
    counter: usize,

    load_chunk: usize,
    registration: Option<Registration>,
}

impl Default for Sample {
    fn default() -> Self {
        Self::new()
    }
}

impl Sample {
    /// Sample without a mixer. Loads keep the source's native rate.
    pub fn new() -> Self {
        Self {
            data: None,
            loader: None,
            rate: 0,
            pitch: 1.0,
            looping: false,
            playing: false,
            audio_start: 0.0,
            audio_end: None,
            counter: 0,
            load_chunk: DEFAULT_LOAD_CHUNK,
            registration: None,
        }
    }

    /// Sample registered with `mixer`. Loads resample to the mixer's rate.
    pub fn with_mixer(mixer: &Arc<dyn Mixer>) -> Self {
        let mut sample = Self::new();
        sample.registration = Some(Registration::new(mixer, VoiceKind::Sample));
        sample
    }

    /// Chunk size (in samples) used to read a source during load
    pub fn set_load_chunk(&mut self, samples: usize) {
        self.load_chunk = samples.max(2);
    }

    /// Open and decode `path`, applying the `.wav`/`.ogg` fallback.
    ///
    /// Returns false if no decoder could be opened, or if a synchronous load
    /// produced no audio. An async load returns true once the loader is running.
    pub fn open(&mut self, path: &Path, async_load: bool) -> bool {
        match source_from_path(path) {
            Some(decoder) => self.open_source(Box::new(decoder), async_load),
            None => {
                debug!("Sample open failed: {}", path.display());
                false
            }
        }
    }

    /// Decode all of `source` into this sample.
    pub fn open_source(&mut self, source: Box<dyn AudioDataSource>, async_load: bool) -> bool {
        if !source.is_valid() {
            return false;
        }

        // Finish (and discard) any load still in flight before replacing it
        self.await_load();
        self.data = None;
        self.audio_start = 0.0;
        self.audio_end = None;
        self.counter = 0;
        self.playing = false;

        let target_rate = self.target_rate(source.rate());
        let pitch = self.pitch;
        let chunk = self.load_chunk;

        if !async_load {
            let loaded = load_source(source, target_rate, pitch, chunk);
            return self.install(loaded);
        }

        let slot = Arc::new(Mutex::new(Some(source)));
        let worker_slot = Arc::clone(&slot);

        let spawned = thread::Builder::new()
            .name("sample-loader".to_string())
            .spawn(move || {
                let source = worker_slot.lock().ok()?.take()?;
                load_source(source, target_rate, pitch, chunk)
            });

        match spawned {
            Ok(handle) => {
                self.loader = Some(handle);
                true
            }
            Err(e) => {
                warn!("Failed to spawn sample loader, loading synchronously: {}", e);
                let source = slot.lock().ok().and_then(|mut s| s.take());
                match source {
                    Some(source) => {
                        let loaded = load_source(source, target_rate, pitch, chunk);
                        self.install(loaded)
                    }
                    None => false,
                }
            }
        }
    }

    fn target_rate(&self, native_rate: u32) -> u32 {
        self.registration
            .as_ref()
            .and_then(Registration::mixer)
            .map(|mixer| mixer.rate())
            .unwrap_or(native_rate)
    }

    fn install(&mut self, loaded: Option<LoadedAudio>) -> bool {
        match loaded {
            Some(audio) => {
                let frames = audio.data.len() / 2;
                self.rate = audio.rate;
                self.audio_end = Some(frames as f64 / audio.rate as f64);
                self.data = Some(audio.data);
                self.counter = 0;
                true
            }
            None => false,
        }
    }

    /// Install a finished background load without blocking.
    ///
    /// Returns whether the buffer is loaded.
    pub fn poll_load(&mut self) -> bool {
        if self.loader.as_ref().is_some_and(JoinHandle::is_finished) {
            self.await_load();
        }
        self.data.is_some()
    }

    /// Block until a background load finishes.
    ///
    /// Returns true if there was a load to wait for.
    pub fn await_load(&mut self) -> bool {
        let Some(handle) = self.loader.take() else {
            return false;
        };

        let loaded = handle.join().unwrap_or_else(|_| {
            warn!("Sample loader thread panicked");
            None
        });
        self.install(loaded);
        true
    }

    pub fn is_loaded(&self) -> bool {
        self.data.is_some()
    }

    /// Loaded with at least one frame of audio
    pub fn is_valid(&self) -> bool {
        self.data.as_ref().is_some_and(|d| !d.is_empty())
    }

    /// Fill `buffer` with normalized float samples from the playhead.
    ///
    /// Returns the count written. Never blocks: an unfinished load reads 0.
    pub fn read(&mut self, buffer: &mut [f32]) -> usize {
        if !self.playing || !self.poll_load() {
            return 0;
        }

        let Some(data) = self.data.as_ref() else {
            return 0;
        };
        if data.is_empty() || buffer.is_empty() {
            return 0;
        }

        let len = data.len();
        let limit = time_to_index(self.audio_end.unwrap_or(0.0), self.rate, len);
        let start = time_to_index(self.audio_start, self.rate, len).min(limit);
        // A slice set mid-playback can leave the playhead before its start
        self.counter = self.counter.max(start);
        let mut written = 0;

        loop {
            if self.counter < limit {
                let n = (limit - self.counter).min(buffer.len() - written);
                convert::s16_slice_to_f32(
                    &data[self.counter..self.counter + n],
                    &mut buffer[written..written + n],
                );
                self.counter += n;
                written += n;
            }

            if self.counter < limit {
                break;
            }

            if !self.looping {
                self.playing = false;
                break;
            }

            self.counter = start;
            if start >= limit || written == buffer.len() {
                break;
            }
        }

        written
    }

    /// Restrict playback to `[start, end]` seconds of unpitched time.
    ///
    /// Bounds are divided by pitch and clamped into the loaded duration.
    pub fn slice(&mut self, start: f64, end: f64) {
        self.await_load();

        let duration = self.buffer_duration();
        let pitch = if self.pitch > 0.0 { self.pitch } else { 1.0 };
        self.audio_start = (start / pitch).clamp(0.0, duration);
        self.audio_end = Some((end / pitch).clamp(self.audio_start, duration));
    }

    /// New sample sharing this buffer, with its own slice, pitch and loop state.
    ///
    /// # Errors
    /// - [`Error::NoBuffer`]: nothing loaded (slice end unset)
    /// - [`Error::InvalidSlice`]: slice end before slice start
    pub fn copy_slice(&mut self) -> Result<Sample> {
        self.await_load();

        let end = self.audio_end.ok_or(Error::NoBuffer)?;
        if end <= 0.0 || self.data.is_none() {
            return Err(Error::NoBuffer);
        }
        if end < self.audio_start {
            return Err(Error::InvalidSlice {
                start: self.audio_start,
                end,
            });
        }

        let registration = self
            .registration
            .as_ref()
            .and_then(Registration::mixer)
            .map(|mixer| Registration::new(&mixer, VoiceKind::Sample));

        Ok(Sample {
            data: self.data.clone(),
            loader: None,
            rate: self.rate,
            pitch: self.pitch,
            looping: self.looping,
            playing: false,
            audio_start: self.audio_start,
            audio_end: self.audio_end,
            counter: 0,
            load_chunk: self.load_chunk,
            registration,
        })
    }

    /// Move the playhead to an interleaved sample offset
    pub fn seek(&mut self, offset: usize) {
        let aligned = offset - offset % 2;
        self.counter = self.clamp_counter(aligned);
    }

    /// Move the playhead to `seconds` into the buffer
    pub fn seek_time(&mut self, seconds: f64) {
        let len = self.data.as_ref().map(|d| d.len()).unwrap_or(0);
        self.counter = time_to_index(seconds, self.rate, len);
    }

    /// Move the playhead to frame `frame`
    pub fn seek_sample(&mut self, frame: usize) {
        self.counter = self.clamp_counter(frame.saturating_mul(2));
    }

    fn clamp_counter(&self, counter: usize) -> usize {
        let len = self.data.as_ref().map(|d| d.len()).unwrap_or(0);
        counter.min(len)
    }

    /// Start playing from the slice start. No-op while invalid.
    pub fn play(&mut self) {
        self.await_load();
        if !self.is_valid() {
            return;
        }
        self.playing = true;
        self.seek_time(self.audio_start);
    }

    pub fn stop(&mut self) {
        self.playing = false;
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// Slice length in seconds
    pub fn duration(&mut self) -> f64 {
        self.await_load();
        self.audio_end.map(|end| end - self.audio_start).unwrap_or(0.0)
    }

    /// Rate of the loaded buffer (0 before a load completes)
    pub fn rate(&self) -> u32 {
        self.rate
    }

    /// Always 2 once loaded
    pub fn channels(&self) -> u16 {
        if self.data.is_some() {
            2
        } else {
            0
        }
    }

    /// Playhead in interleaved samples
    pub fn position(&self) -> usize {
        self.counter
    }

    /// Pitch applied on the next load. Must be positive and finite.
    pub fn set_pitch(&mut self, pitch: f64) {
        if pitch.is_finite() && pitch > 0.0 {
            self.pitch = pitch;
        }
    }

    pub fn pitch(&self) -> f64 {
        self.pitch
    }

    pub fn set_looping(&mut self, looping: bool) {
        self.looping = looping;
    }

    pub fn is_looping(&self) -> bool {
        self.looping
    }

    fn buffer_duration(&self) -> f64 {
        match (&self.data, self.rate) {
            (Some(data), rate) if rate > 0 => (data.len() / 2) as f64 / rate as f64,
            _ => 0.0,
        }
    }
}

impl Drop for Sample {
    fn drop(&mut self) {
        // Leave the mixer before waiting on the loader
        self.registration.take();
        if let Some(handle) = self.loader.take() {
            let _ = handle.join();
        }
    }
}

impl std::fmt::Debug for Sample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sample")
            .field("samples", &self.data.as_ref().map(|d| d.len()))
            .field("loading", &self.loader.is_some())
            .field("rate", &self.rate)
            .field("pitch", &self.pitch)
            .field("looping", &self.looping)
            .field("playing", &self.playing)
            .field("audio_start", &self.audio_start)
            .field("audio_end", &self.audio_end)
            .field("counter", &self.counter)
            .finish()
    }
}

/// Seconds to an interleaved stereo index, rounded to a frame and clamped to `len`.
fn time_to_index(seconds: f64, rate: u32, len: usize) -> usize {
    let frame = (seconds.max(0.0) * rate as f64).round() as usize;
    frame.saturating_mul(2).min(len)
}

/// Read `source` to exhaustion, expand to stereo and resample once.
fn load_source(
    mut source: Box<dyn AudioDataSource>,
    target_rate: u32,
    pitch: f64,
    chunk: usize,
) -> Option<LoadedAudio> {
    let channels = source.channels();
    let native_rate = source.rate();

    if !(1..=2).contains(&channels) || native_rate == 0 {
        warn!(
            "Cannot load sample: {} channels at {}Hz",
            channels, native_rate
        );
        return None;
    }

    source.set_looping(false);

    let chunk = chunk.max(channels as usize);
    let mut buffer = vec![0i16; chunk];
    let mut pcm: Vec<i16> = Vec::new();
    loop {
        let n = source.read(&mut buffer);
        if n == 0 {
            break;
        }
        pcm.extend_from_slice(&buffer[..n]);
    }

    if pcm.is_empty() {
        debug!("Sample source produced no frames");
        return None;
    }

    if channels == 1 {
        pcm = convert::expand_mono(&pcm);
    }

    let mut rate = native_rate;
    if native_rate != target_rate || pitch != 1.0 {
        let ratio = (target_rate as f64 / pitch) / native_rate as f64;
        match Resampler::resample(&pcm, ratio, 2) {
            Ok(resampled) => {
                pcm = resampled;
                rate = target_rate;
            }
            Err(e) => {
                warn!("Sample resample failed: {}", e);
                return None;
            }
        }
    }

    debug!(
        "Sample loaded: {} frames at {}Hz (native {}Hz, {} channels, pitch {})",
        pcm.len() / 2,
        rate,
        native_rate,
        channels,
        pitch
    );

    Some(LoadedAudio {
        data: pcm.into(),
        rate,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::decoder::Metadata;

    /// In-memory source yielding a fixed sample buffer
    struct VecSource {
        data: Vec<i16>,
        pos: usize,
        rate: u32,
        channels: u16,
    }

    impl VecSource {
        fn boxed(data: Vec<i16>, rate: u32, channels: u16) -> Box<dyn AudioDataSource> {
            Box::new(Self {
                data,
                pos: 0,
                rate,
                channels,
            })
        }
    }

    impl AudioDataSource for VecSource {
        fn read(&mut self, buffer: &mut [i16]) -> usize {
            let n = buffer.len().min(self.data.len() - self.pos);
            buffer[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            n
        }

        fn seek(&mut self, seconds: f64) {
            let sample = (seconds * self.rate as f64) as usize * self.channels as usize;
            self.pos = sample.min(self.data.len());
        }

        fn rate(&self) -> u32 {
            self.rate
        }

        fn channels(&self) -> u16 {
            self.channels
        }

        fn length(&self) -> u64 {
            (self.data.len() / self.channels as usize) as u64
        }

        fn is_valid(&self) -> bool {
            true
        }

        fn has_data_left(&self) -> bool {
            self.pos < self.data.len()
        }

        fn set_looping(&mut self, _looping: bool) {}

        fn metadata(&self) -> Metadata {
            Metadata::default()
        }
    }

    fn stereo_ramp(frames: usize) -> Vec<i16> {
        (0..frames).flat_map(|i| [i as i16, -(i as i16)]).collect()
    }

    #[test]
    fn test_time_to_index() {
        assert_eq!(time_to_index(0.5, 100, 1000), 100);
        assert_eq!(time_to_index(100.0, 100, 1000), 1000);
        assert_eq!(time_to_index(-1.0, 100, 1000), 0);
    }

    #[test]
    fn test_read_before_play_is_silent() {
        let mut sample = Sample::new();
        assert!(sample.open_source(VecSource::boxed(stereo_ramp(10), 1000, 2), false));

        let mut out = [0.0f32; 8];
        assert_eq!(sample.read(&mut out), 0);
        assert_eq!(sample.position(), 0);
    }

    #[test]
    fn test_empty_source_stays_invalid() {
        let mut sample = Sample::new();
        assert!(!sample.open_source(VecSource::boxed(Vec::new(), 1000, 2), false));
        assert!(!sample.is_valid());

        sample.play();
        assert!(!sample.is_playing());
        assert!(matches!(sample.copy_slice(), Err(Error::NoBuffer)));
    }

    #[test]
    fn test_seek_clamps() {
        let mut sample = Sample::new();
        sample.open_source(VecSource::boxed(stereo_ramp(100), 100, 2), false);

        sample.seek(1_000_000);
        assert_eq!(sample.position(), 200);

        sample.seek(31);
        assert_eq!(sample.position(), 30);

        sample.seek_time(0.25);
        assert_eq!(sample.position(), 50);

        sample.seek_sample(usize::MAX);
        assert_eq!(sample.position(), 200);
    }

    #[test]
    fn test_seek_time_saturates_at_end() {
        let mut sample = Sample::new();
        sample.open_source(VecSource::boxed(stereo_ramp(1000), 1000, 2), false);

        sample.seek_time(f64::INFINITY);
        assert_eq!(sample.position(), 2000);

        sample.seek_time(1e300);
        assert_eq!(sample.position(), 2000);

        sample.seek_time(f64::NAN);
        assert_eq!(sample.position(), 0);
    }

    #[test]
    fn test_slice_while_playing_skips_to_slice_start() {
        let mut sample = Sample::new();
        sample.open_source(VecSource::boxed(stereo_ramp(1000), 1000, 2), false);
        sample.play();

        let mut out = [0.0f32; 20];
        assert_eq!(sample.read(&mut out), 20);

        sample.slice(0.5, 1.0);
        assert_eq!(sample.read(&mut out), 20);
        assert_eq!(out[0], convert::s16_to_f32(500));
        assert_eq!(out[1], convert::s16_to_f32(-500));
        assert_eq!(sample.position(), 1020);
    }

    #[test]
    fn test_slice_divides_by_pitch() {
        let mut sample = Sample::new();
        sample.open_source(VecSource::boxed(stereo_ramp(1000), 1000, 2), false);
        // Pitch only affects later loads and slice math
        sample.set_pitch(2.0);
        sample.slice(0.5, 1.0);
        assert!((sample.duration() - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_set_pitch_ignores_invalid() {
        let mut sample = Sample::new();
        sample.set_pitch(0.0);
        sample.set_pitch(f64::NAN);
        assert_eq!(sample.pitch(), 1.0);
    }
}
