//! Test helper modules for rd-audio integration tests
//!
//! - audio_generator: deterministic WAV fixtures written with hound
//! - synthetic: in-memory sources implementing `AudioDataSource`

#![allow(dead_code)]

pub mod audio_generator;
pub mod synthetic;

pub use audio_generator::{generate_constant_wav, generate_ramp_wav, generate_sine_wav};
pub use synthetic::{ConstantSource, RampSource};
