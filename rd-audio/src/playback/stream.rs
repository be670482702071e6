//! Stream engine
//!
//! A stream keeps its decoder open and runs on two cadences:
//! - **feeder** (`update`): non-real-time, pulls decoded PCM into the ring
//! - **output** (`read`): real-time, drains the ring, resamples and converts
//!
//! The halves share nothing but the SPSC ring and a block of atomics
//! ([`StreamControl`]). [`Stream`] bundles both for single-threaded use;
//! [`Stream::split`] hands them to separate threads.
//!
//! Seeking happens on the feeder, which owns the decoder. The ring and the
//! resampler belong to the output, so a seek raises a flush request that the
//! output applies on its next `read`. Until then the feeder pushes nothing.

use crate::audio::convert;
use crate::audio::decoder::{rearrange_filename, AudioDataSource, Decoder, Metadata};
use crate::audio::resampler::StreamResampler;
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::playback::mixer::{Mixer, Registration, VoiceKind};
use crate::playback::ring_buffer::{PcmConsumer, PcmProducer, PcmRingBuffer, RingBufferStats};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, trace, warn};

/// f64 stored as its bit pattern
#[derive(Debug)]
struct AtomicF64(AtomicU64);

impl AtomicF64 {
    fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Acquire))
    }

    fn store(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Release);
    }
}

/// Control state shared by the feeder and output halves
#[derive(Debug)]
struct StreamState {
    playing: AtomicBool,
    looping: AtomicBool,
    /// Cleared by the feeder when the decoder fails
    valid: AtomicBool,
    pitch: AtomicF64,
    /// Seconds of source audio consumed by the output
    streamed_time: AtomicF64,
    /// Mixer clock captured at `play`
    start_time: AtomicF64,
    /// Set by a feeder seek, cleared by the output once the ring is flushed
    flush_requested: AtomicBool,
    seek_target: AtomicF64,
}

/// Lock-free handle to a stream's transport and clock.
///
/// Cloneable, so any thread can start, stop, re-pitch or query a stream whose
/// halves live elsewhere.
#[derive(Clone)]
pub struct StreamControl {
    state: Arc<StreamState>,
    mixer: Option<Weak<dyn Mixer>>,
}

impl StreamControl {
    fn new(mixer: Option<&Arc<dyn Mixer>>) -> Self {
        Self {
            state: Arc::new(StreamState {
                playing: AtomicBool::new(false),
                looping: AtomicBool::new(false),
                valid: AtomicBool::new(true),
                pitch: AtomicF64::new(1.0),
                streamed_time: AtomicF64::new(0.0),
                start_time: AtomicF64::new(0.0),
                flush_requested: AtomicBool::new(false),
                seek_target: AtomicF64::new(0.0),
            }),
            mixer: mixer.map(|m| Arc::downgrade(m)),
        }
    }

    fn mixer(&self) -> Option<Arc<dyn Mixer>> {
        self.mixer.as_ref().and_then(Weak::upgrade)
    }

    /// Start playback. No-op once the decoder has failed.
    pub fn play(&self) {
        if !self.is_valid() {
            return;
        }
        let start = self.mixer().map(|m| m.time()).unwrap_or(0.0);
        self.state.start_time.store(start);
        self.state.playing.store(true, Ordering::Release);
    }

    pub fn stop(&self) {
        self.state.playing.store(false, Ordering::Release);
    }

    pub fn is_playing(&self) -> bool {
        self.state.playing.load(Ordering::Acquire)
    }

    pub fn is_valid(&self) -> bool {
        self.state.valid.load(Ordering::Acquire)
    }

    /// Takes effect on the next `read`. Must be positive and finite.
    pub fn set_pitch(&self, pitch: f64) {
        if pitch.is_finite() && pitch > 0.0 {
            self.state.pitch.store(pitch);
        }
    }

    pub fn pitch(&self) -> f64 {
        self.state.pitch.load()
    }

    pub fn set_looping(&self, looping: bool) {
        self.state.looping.store(looping, Ordering::Release);
    }

    pub fn is_looping(&self) -> bool {
        self.state.looping.load(Ordering::Acquire)
    }

    /// Seconds of source audio delivered so far (or the last seek target)
    pub fn streamed_time(&self) -> f64 {
        self.state.streamed_time.load()
    }

    /// Time since `play` on the mixer clock, or the streamed time without a mixer.
    pub fn played_time_dac(&self) -> f64 {
        match self.mixer() {
            Some(mixer) => (mixer.time() - self.state.start_time.load()).max(0.0),
            None => self.streamed_time(),
        }
    }

    fn request_flush(&self, target: f64) {
        self.state.seek_target.store(target);
        self.state.flush_requested.store(true, Ordering::Release);
    }

    fn flush_pending(&self) -> bool {
        self.state.flush_requested.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for StreamControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamControl")
            .field("playing", &self.is_playing())
            .field("looping", &self.is_looping())
            .field("valid", &self.is_valid())
            .field("pitch", &self.pitch())
            .field("streamed_time", &self.streamed_time())
            .finish()
    }
}

/// Producer half: owns the decoder and fills the ring.
pub struct StreamFeeder {
    source: Box<dyn AudioDataSource>,
    producer: PcmProducer,
    scratch: Vec<i16>,
    control: StreamControl,
}

impl StreamFeeder {
    /// Pull as much decoded audio as fits into the ring.
    ///
    /// Returns the number of samples pushed. Never pushes more than the free
    /// space. Stops the stream once the decoder is drained, the ring is
    /// empty and looping is off.
    pub fn update(&mut self) -> usize {
        if self.control.flush_pending() {
            return 0;
        }

        if !self.source.is_valid() {
            self.control.state.valid.store(false, Ordering::Release);
            return 0;
        }

        let looping = self.control.is_looping();
        self.source.set_looping(looping);

        let channels = self.source.channels().max(1) as usize;
        let vacant = self.producer.vacant_len().min(self.scratch.len());
        let wanted = vacant - vacant % channels;

        let read = if wanted > 0 {
            self.source.read(&mut self.scratch[..wanted])
        } else {
            0
        };

        if !self.source.is_valid() {
            warn!("Stream decoder became invalid");
            self.control.state.valid.store(false, Ordering::Release);
        }

        let pushed = self.producer.push_slice(&self.scratch[..read]);

        if read == 0
            && self.producer.occupied_len() == 0
            && !self.source.has_data_left()
            && !looping
            && self.control.is_playing()
        {
            debug!("Stream drained, stopping");
            self.control.stop();
        }

        trace!(
            "Stream update: pushed {} samples ({} buffered)",
            pushed,
            self.producer.occupied_len()
        );

        pushed
    }

    /// Seek the decoder and request a flush of everything buffered.
    ///
    /// Seeking past a known end is ignored.
    pub fn seek_time(&mut self, seconds: f64) {
        let seconds = seconds.max(0.0);
        let length = self.source.length();
        let frame = (seconds * self.source.rate() as f64).round() as u64;
        if length > 0 && frame > length {
            warn!(
                "Ignoring stream seek past end ({:.3}s, {} > {} frames)",
                seconds, frame, length
            );
            return;
        }

        self.source.seek(seconds);
        self.control.request_flush(seconds);
        debug!("Stream seek to {:.3}s", seconds);
    }

    /// Seek to frame `frame` at the native rate
    pub fn seek_sample(&mut self, frame: u64) {
        let rate = self.source.rate().max(1) as f64;
        self.seek_time(frame as f64 / rate);
    }

    pub fn has_data_left(&self) -> bool {
        self.source.has_data_left()
    }

    pub fn metadata(&self) -> Metadata {
        self.source.metadata()
    }

    pub fn control(&self) -> &StreamControl {
        &self.control
    }

    pub fn buffered_samples(&self) -> usize {
        self.producer.occupied_len()
    }
}

/// Consumer half: drains the ring on the real-time path.
///
/// `read` takes no locks and never allocates; every buffer is sized at open.
pub struct StreamOutput {
    consumer: PcmConsumer,
    resampler: StreamResampler,
    /// Source-format samples popped from the ring
    scratch_in: Vec<i16>,
    /// Stereo expansion of mono input
    scratch_stereo: Vec<i16>,
    /// Resampled stereo output
    scratch_out: Vec<i16>,
    control: StreamControl,
    native_rate: u32,
    target_rate: u32,
    channels: u16,
    _registration: Option<Registration>,
}

impl StreamOutput {
    /// Fill `buffer` with interleaved stereo float samples.
    ///
    /// Returns the count written: 0 when stopped or when the ring is empty,
    /// short when the ring holds less than a full block.
    pub fn read(&mut self, buffer: &mut [f32]) -> usize {
        if self.control.flush_pending() {
            self.apply_flush();
        }

        if !self.control.is_valid() {
            self.control.stop();
            return 0;
        }
        if !self.control.is_playing() {
            return 0;
        }

        let out_frames = (buffer.len() / 2).min(self.scratch_out.len() / 2);
        if out_frames == 0 {
            return 0;
        }

        let ratio = (self.target_rate as f64 / self.control.pitch()) / self.native_rate as f64;
        self.resampler.set_ratio(ratio);

        let channels = self.channels as usize;
        let max_in_frames = self.scratch_in.len() / channels;
        let wanted = self
            .resampler
            .input_frames_for(out_frames)
            .max(1)
            .min(max_in_frames);

        let popped = self.consumer.pop_slice(&mut self.scratch_in[..wanted * channels]);
        let frames = popped / channels;
        if frames == 0 {
            return 0;
        }

        let stereo: &[i16] = if channels == 1 {
            convert::mono_to_stereo(&self.scratch_in[..frames], &mut self.scratch_stereo);
            &self.scratch_stereo[..frames * 2]
        } else {
            &self.scratch_in[..frames * 2]
        };

        let produced = self
            .resampler
            .process(stereo, &mut self.scratch_out[..out_frames * 2]);
        convert::s16_slice_to_f32(&self.scratch_out[..produced * 2], &mut buffer[..produced * 2]);

        let state = &self.control.state;
        state
            .streamed_time
            .store(state.streamed_time.load() + frames as f64 / self.native_rate as f64);

        produced * 2
    }

    /// Drop buffered audio after a feeder seek
    fn apply_flush(&mut self) {
        self.consumer.clear();
        self.resampler.reset();
        let state = &self.control.state;
        state.streamed_time.store(state.seek_target.load());
        state.flush_requested.store(false, Ordering::Release);
    }

    pub fn buffered_samples(&self) -> usize {
        self.consumer.occupied_len()
    }

    pub fn ring_stats(&self) -> RingBufferStats {
        self.consumer.stats()
    }

    pub fn control(&self) -> &StreamControl {
        &self.control
    }

    /// Rate the output is converted to
    pub fn target_rate(&self) -> u32 {
        self.target_rate
    }
}

/// Streamed background audio: decoder, ring buffer and real-time resampler.
pub struct Stream {
    feeder: StreamFeeder,
    output: StreamOutput,
}

impl Stream {
    /// Open `path` (with the `.wav`/`.ogg` fallback) as a stream.
    ///
    /// The ring is sized by `config.stream_buffer_samples`, and one `read`
    /// fills at most `config.stream_max_block_samples`.
    pub fn open(
        path: &Path,
        mixer: Option<&Arc<dyn Mixer>>,
        config: &EngineConfig,
    ) -> Result<Self> {
        let resolved = rearrange_filename(path);
        let decoder = Decoder::open(&resolved)?;
        debug!("Opened stream: {} ({:?})", resolved.display(), decoder);
        Self::from_source(Box::new(decoder), mixer, config)
    }

    /// Build a stream over an already opened source.
    pub fn from_source(
        source: Box<dyn AudioDataSource>,
        mixer: Option<&Arc<dyn Mixer>>,
        config: &EngineConfig,
    ) -> Result<Self> {
        if !source.is_valid() {
            return Err(Error::Decode("Stream source is not valid".to_string()));
        }

        let channels = source.channels();
        let native_rate = source.rate();
        if !(1..=2).contains(&channels) {
            return Err(Error::UnsupportedFormat(format!(
                "{} channels (only mono and stereo are supported)",
                channels
            )));
        }
        if native_rate == 0 {
            return Err(Error::UnsupportedFormat("zero sample rate".to_string()));
        }

        let target_rate = mixer.map(|m| m.rate()).unwrap_or(native_rate);

        let ring = PcmRingBuffer::new(Some(config.stream_buffer_samples), channels);
        let (producer, consumer) = ring.split();
        let capacity = producer.capacity();
        let capacity_frames = capacity / channels as usize;
        let block_frames = (config.stream_max_block_samples / 2).max(1);

        let control = StreamControl::new(mixer);
        let registration = mixer.map(|m| Registration::new(m, VoiceKind::Stream));

        debug!(
            "Stream buffers: ring={} samples, block={} frames, {}Hz -> {}Hz, {} channels",
            capacity, block_frames, native_rate, target_rate, channels
        );

        let feeder = StreamFeeder {
            source,
            producer,
            scratch: vec![0; capacity],
            control: control.clone(),
        };

        let output = StreamOutput {
            consumer,
            resampler: StreamResampler::new(target_rate as f64 / native_rate as f64),
            scratch_in: vec![0; capacity],
            scratch_stereo: vec![0; capacity_frames * 2],
            scratch_out: vec![0; block_frames * 2],
            control,
            native_rate,
            target_rate,
            channels,
            _registration: registration,
        };

        Ok(Self { feeder, output })
    }

    /// Hand the producer and consumer cadences to different threads.
    pub fn split(self) -> (StreamFeeder, StreamOutput) {
        (self.feeder, self.output)
    }

    /// Producer step; see [`StreamFeeder::update`].
    pub fn update(&mut self) -> usize {
        self.feeder.update()
    }

    /// Consumer step; see [`StreamOutput::read`].
    pub fn read(&mut self, buffer: &mut [f32]) -> usize {
        self.output.read(buffer)
    }

    /// Seek and flush immediately.
    pub fn seek_time(&mut self, seconds: f64) {
        self.feeder.seek_time(seconds);
        if self.output.control.flush_pending() {
            self.output.apply_flush();
        }
    }

    /// Seek to frame `frame` at the native rate and flush immediately.
    pub fn seek_sample(&mut self, frame: u64) {
        self.feeder.seek_sample(frame);
        if self.output.control.flush_pending() {
            self.output.apply_flush();
        }
    }

    pub fn control(&self) -> StreamControl {
        self.output.control.clone()
    }

    pub fn play(&self) {
        self.output.control.play();
    }

    pub fn stop(&self) {
        self.output.control.stop();
    }

    pub fn is_playing(&self) -> bool {
        self.output.control.is_playing()
    }

    pub fn is_valid(&self) -> bool {
        self.output.control.is_valid()
    }

    pub fn set_pitch(&self, pitch: f64) {
        self.output.control.set_pitch(pitch);
    }

    pub fn pitch(&self) -> f64 {
        self.output.control.pitch()
    }

    pub fn set_looping(&self, looping: bool) {
        self.output.control.set_looping(looping);
    }

    pub fn is_looping(&self) -> bool {
        self.output.control.is_looping()
    }

    pub fn streamed_time(&self) -> f64 {
        self.output.control.streamed_time()
    }

    pub fn played_time_dac(&self) -> f64 {
        self.output.control.played_time_dac()
    }

    /// Samples currently waiting in the ring
    pub fn buffered_samples(&self) -> usize {
        self.output.buffered_samples()
    }

    /// Native rate of the source
    pub fn rate(&self) -> u32 {
        self.output.native_rate
    }

    /// Native channel count of the source
    pub fn channels(&self) -> u16 {
        self.output.channels
    }

    pub fn has_data_left(&self) -> bool {
        self.feeder.has_data_left()
    }

    pub fn metadata(&self) -> Metadata {
        self.feeder.metadata()
    }

    pub fn ring_stats(&self) -> RingBufferStats {
        self.output.ring_stats()
    }
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("rate", &self.rate())
            .field("channels", &self.channels())
            .field("buffered", &self.buffered_samples())
            .field("control", &self.output.control)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Endless source of one constant value
    struct ConstantSource {
        value: i16,
        rate: u32,
        channels: u16,
        remaining: Option<usize>,
    }

    impl AudioDataSource for ConstantSource {
        fn read(&mut self, buffer: &mut [i16]) -> usize {
            let n = match self.remaining {
                Some(left) => buffer.len().min(left),
                None => buffer.len(),
            };
            buffer[..n].fill(self.value);
            if let Some(left) = self.remaining.as_mut() {
                *left -= n;
            }
            n
        }

        fn seek(&mut self, _seconds: f64) {}

        fn rate(&self) -> u32 {
            self.rate
        }

        fn channels(&self) -> u16 {
            self.channels
        }

        fn length(&self) -> u64 {
            0
        }

        fn is_valid(&self) -> bool {
            true
        }

        fn has_data_left(&self) -> bool {
            self.remaining != Some(0)
        }

        fn set_looping(&mut self, _looping: bool) {}
    }

    fn config(ring: usize, block: usize) -> EngineConfig {
        EngineConfig {
            stream_buffer_samples: ring,
            stream_max_block_samples: block,
            ..EngineConfig::default()
        }
    }

    fn constant_stream(value: i16, channels: u16, remaining: Option<usize>) -> Stream {
        let source = Box::new(ConstantSource {
            value,
            rate: 44100,
            channels,
            remaining,
        });
        Stream::from_source(source, None, &config(1024, 256)).unwrap()
    }

    #[test]
    fn test_read_zero_when_stopped() {
        let mut stream = constant_stream(100, 2, None);
        stream.update();
        let mut out = [0.0f32; 64];
        assert_eq!(stream.read(&mut out), 0);
        assert_eq!(stream.buffered_samples(), 1024);
    }

    #[test]
    fn test_update_respects_capacity() {
        let mut stream = constant_stream(1, 2, None);
        assert_eq!(stream.update(), 1024);
        assert_eq!(stream.update(), 0);
        assert_eq!(stream.buffered_samples(), 1024);
    }

    #[test]
    fn test_block_size_bounds_read() {
        let mut stream = constant_stream(1, 2, None);
        stream.update();
        stream.play();

        let mut out = vec![0.0f32; 4096];
        let n = stream.read(&mut out);
        assert!(n <= 256);
        assert!(n > 0);
    }

    #[test]
    fn test_auto_stop_when_drained() {
        let mut stream = constant_stream(1, 2, Some(100));
        stream.play();

        assert_eq!(stream.update(), 100);
        let mut out = [0.0f32; 512];
        while stream.read(&mut out) > 0 {}
        assert_eq!(stream.buffered_samples(), 0);

        stream.update();
        assert!(!stream.is_playing());
    }

    #[test]
    fn test_flush_blocks_feeder_until_applied() {
        let stream = constant_stream(1, 2, None);
        let (mut feeder, mut output) = stream.split();

        feeder.update();
        feeder.seek_time(1.5);
        assert_eq!(feeder.update(), 0);
        assert_eq!(output.buffered_samples(), 1024);

        output.control().play();
        let mut out = [0.0f32; 16];
        // Flush empties the ring, nothing to read yet
        assert_eq!(output.read(&mut out), 0);
        assert_eq!(output.buffered_samples(), 0);
        assert!((output.control().streamed_time() - 1.5).abs() < 1e-12);

        assert_eq!(feeder.update(), 1024);
    }

    #[test]
    fn test_played_time_without_mixer_is_streamed_time() {
        let mut stream = constant_stream(1, 2, None);
        stream.update();
        stream.play();
        let mut out = [0.0f32; 200];
        stream.read(&mut out);
        assert!(stream.streamed_time() > 0.0);
        assert_eq!(stream.played_time_dac(), stream.streamed_time());
    }
}
