//! Audio decoding, format conversion and resampling
//!
//! - `decoder`: pull-based int16 PCM sources (symphonia)
//! - `convert`: int16/float normalisation and channel reshaping
//! - `resampler`: one-shot (rubato) and streaming (stateful linear) conversion

pub mod convert;
pub mod decoder;
pub mod resampler;

pub use decoder::{
    init, rearrange_filename, source_from_path, AudioDataSource, Decoder, Metadata, SourceFormat,
};
pub use resampler::{Resampler, StreamResampler};
