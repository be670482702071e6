//! Playback voices and their plumbing
//!
//! - `sample`: fully decoded one-shot sounds
//! - `stream`: ring-buffered background audio with feeder/output halves
//! - `ring_buffer`: SPSC int16 ring between a stream's two cadences
//! - `mixer`: the collaborator interface voices register with

pub mod mixer;
pub mod ring_buffer;
pub mod sample;
pub mod stream;

pub use mixer::{Mixer, OfflineMixer, Registration, VoiceId, VoiceKind};
pub use ring_buffer::{PcmConsumer, PcmProducer, PcmRingBuffer, RingBufferStats};
pub use sample::Sample;
pub use stream::{Stream, StreamControl, StreamFeeder, StreamOutput};
