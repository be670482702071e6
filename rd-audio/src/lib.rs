//! # rd-audio
//!
//! Real-time audio playback engine for rhythm games.
//!
//! **Purpose:** Decode, resample, buffer and deliver audio for two kinds of
//! voices:
//! - **Samples** (hit sounds, keysounds): decoded and resampled once, then
//!   played from memory with pitch, slicing and looping.
//! - **Streams** (background music): decoded incrementally into a lock-free
//!   ring buffer and resampled on the real-time read path.
//!
//! **Architecture:** symphonia decoding, rubato one-shot resampling, ringbuf
//! SPSC buffering. The mixer that pulls voices and owns the clock is an
//! external collaborator behind [`playback::Mixer`].

pub mod audio;
pub mod config;
pub mod error;
pub mod playback;

pub use config::EngineConfig;
pub use error::{Error, Result};
