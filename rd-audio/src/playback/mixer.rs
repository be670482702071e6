//! Mixer collaborator interface
//!
//! The mixer that owns voices and drives the global clock lives outside this
//! crate. Samples and streams only need to ask it for the output rate and the
//! current time, and to tell it when they come and go.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tracing::trace;

/// Process-unique identity handed to the mixer on registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VoiceId(u64);

impl VoiceId {
    fn next() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        VoiceId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

/// What kind of voice a registration represents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceKind {
    Sample,
    Stream,
}

/// Mixer collaborator consumed by samples and streams
pub trait Mixer: Send + Sync {
    /// Output sample rate in Hz
    fn rate(&self) -> u32;

    /// Global playback clock in seconds
    fn time(&self) -> f64;

    fn add_sample(&self, id: VoiceId);
    fn remove_sample(&self, id: VoiceId);
    fn add_stream(&self, id: VoiceId);
    fn remove_stream(&self, id: VoiceId);
}

/// Non-owning link from a voice back to its mixer.
///
/// Registers on creation and deregisters on drop. Holds only a `Weak`, so a
/// voice never keeps its mixer alive.
pub struct Registration {
    mixer: Weak<dyn Mixer>,
    id: VoiceId,
    kind: VoiceKind,
}

impl Registration {
    pub fn new(mixer: &Arc<dyn Mixer>, kind: VoiceKind) -> Self {
        let id = VoiceId::next();
        match kind {
            VoiceKind::Sample => mixer.add_sample(id),
            VoiceKind::Stream => mixer.add_stream(id),
        }
        trace!("Registered {:?} voice {}", kind, id.get());

        Self {
            mixer: Arc::downgrade(mixer),
            id,
            kind,
        }
    }

    pub fn id(&self) -> VoiceId {
        self.id
    }

    /// The mixer, if it is still alive
    pub fn mixer(&self) -> Option<Arc<dyn Mixer>> {
        self.mixer.upgrade()
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Some(mixer) = self.mixer.upgrade() {
            match self.kind {
                VoiceKind::Sample => mixer.remove_sample(self.id),
                VoiceKind::Stream => mixer.remove_stream(self.id),
            }
            trace!("Deregistered {:?} voice {}", self.kind, self.id.get());
        }
    }
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("mixer_alive", &(self.mixer.strong_count() > 0))
            .finish()
    }
}

/// Mixer with a fixed rate and a manually advanced clock.
///
/// Drives offline rendering and tests; it does no mixing of its own.
pub struct OfflineMixer {
    rate: u32,
    /// Clock in seconds, stored as f64 bits
    time_bits: AtomicU64,
    samples: Mutex<HashSet<VoiceId>>,
    streams: Mutex<HashSet<VoiceId>>,
}

impl OfflineMixer {
    pub fn new(rate: u32) -> Self {
        Self {
            rate,
            time_bits: AtomicU64::new(0f64.to_bits()),
            samples: Mutex::new(HashSet::new()),
            streams: Mutex::new(HashSet::new()),
        }
    }

    /// Advance the clock by `frames` output frames
    pub fn advance_frames(&self, frames: usize) {
        self.advance(frames as f64 / self.rate as f64);
    }

    /// Advance the clock by `seconds`
    pub fn advance(&self, seconds: f64) {
        let now = f64::from_bits(self.time_bits.load(Ordering::Acquire));
        self.time_bits
            .store((now + seconds).to_bits(), Ordering::Release);
    }

    pub fn sample_count(&self) -> usize {
        self.samples.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn stream_count(&self) -> usize {
        self.streams.lock().map(|s| s.len()).unwrap_or(0)
    }
}

impl Mixer for OfflineMixer {
    fn rate(&self) -> u32 {
        self.rate
    }

    fn time(&self) -> f64 {
        f64::from_bits(self.time_bits.load(Ordering::Acquire))
    }

    fn add_sample(&self, id: VoiceId) {
        if let Ok(mut samples) = self.samples.lock() {
            samples.insert(id);
        }
    }

    fn remove_sample(&self, id: VoiceId) {
        if let Ok(mut samples) = self.samples.lock() {
            samples.remove(&id);
        }
    }

    fn add_stream(&self, id: VoiceId) {
        if let Ok(mut streams) = self.streams.lock() {
            streams.insert(id);
        }
    }

    fn remove_stream(&self, id: VoiceId) {
        if let Ok(mut streams) = self.streams.lock() {
            streams.remove(&id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registration_lifecycle() {
        let offline = Arc::new(OfflineMixer::new(44100));
        let mixer: Arc<dyn Mixer> = offline.clone();

        let sample = Registration::new(&mixer, VoiceKind::Sample);
        let stream = Registration::new(&mixer, VoiceKind::Stream);
        assert_eq!(offline.sample_count(), 1);
        assert_eq!(offline.stream_count(), 1);
        assert_ne!(sample.id(), stream.id());

        drop(sample);
        assert_eq!(offline.sample_count(), 0);
        assert_eq!(offline.stream_count(), 1);

        drop(stream);
        assert_eq!(offline.stream_count(), 0);
    }

    #[test]
    fn test_registration_does_not_keep_mixer_alive() {
        let mixer: Arc<dyn Mixer> = Arc::new(OfflineMixer::new(48000));
        let registration = Registration::new(&mixer, VoiceKind::Sample);
        assert!(registration.mixer().is_some());

        drop(mixer);
        assert!(registration.mixer().is_none());
        // Dropping after the mixer is gone is a no-op
        drop(registration);
    }

    #[test]
    fn test_offline_clock() {
        let mixer = OfflineMixer::new(44100);
        assert_eq!(mixer.time(), 0.0);

        mixer.advance_frames(22050);
        assert!((mixer.time() - 0.5).abs() < 1e-12);

        mixer.advance(1.5);
        assert!((mixer.time() - 2.0).abs() < 1e-12);
    }
}
