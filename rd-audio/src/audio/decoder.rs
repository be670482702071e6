//! Audio decoder using symphonia
//!
//! Pull-based int16 PCM decoding behind one capability set ([`AudioDataSource`]).
//! The concrete [`Decoder`] is tagged by [`SourceFormat`]; the tag is picked
//! purely from the file extension and restricts which codecs the file may carry.
//!
//! Opening never panics: failures surface as [`Error::Open`] /
//! [`Error::UnsupportedFormat`], and [`source_from_path`] flattens them to `None`.

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use symphonia::core::audio::{SampleBuffer, SignalSpec};
use symphonia::core::codecs::{
    CodecRegistry, CodecType, Decoder as CodecDecoder, DecoderOptions, CODEC_TYPE_FLAC,
    CODEC_TYPE_MP1, CODEC_TYPE_MP2, CODEC_TYPE_MP3, CODEC_TYPE_NULL, CODEC_TYPE_PCM_ALAW,
    CODEC_TYPE_PCM_F32LE, CODEC_TYPE_PCM_F64LE, CODEC_TYPE_PCM_MULAW, CODEC_TYPE_PCM_S16BE,
    CODEC_TYPE_PCM_S16LE, CODEC_TYPE_PCM_S24LE, CODEC_TYPE_PCM_S32LE, CODEC_TYPE_PCM_S8,
    CODEC_TYPE_PCM_U8, CODEC_TYPE_VORBIS,
};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::{MetadataOptions, MetadataRevision, StandardTagKey};
use symphonia::core::probe::Hint;
use symphonia::core::units::Time;
use tracing::{debug, info, warn};

/// Get the process-wide codec registry.
fn codec_registry() -> &'static CodecRegistry {
    static CODEC_REGISTRY: OnceLock<CodecRegistry> = OnceLock::new();
    CODEC_REGISTRY.get_or_init(|| {
        let mut registry = CodecRegistry::new();
        registry.register_all::<symphonia::default::codecs::MpaDecoder>();
        registry.register_all::<symphonia::default::codecs::PcmDecoder>();
        registry.register_all::<symphonia::default::codecs::VorbisDecoder>();
        registry.register_all::<symphonia::default::codecs::FlacDecoder>();
        info!("Audio codec registry initialized");
        registry
    })
}

/// Initialize codec support once per process.
///
/// Idempotent; [`Decoder::open`] calls it too, so calling it up front only
/// moves the one-time setup cost out of the first open.
pub fn init() {
    codec_registry();
}

/// Best-effort track tags. Missing tags stay empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    pub artist: String,
    pub title: String,
}

impl Metadata {
    pub fn is_empty(&self) -> bool {
        self.artist.is_empty() && self.title.is_empty()
    }
}

/// Pull-based PCM source.
///
/// All counts are in int16 samples (interleaved), except [`length`](Self::length)
/// which is in frames.
pub trait AudioDataSource: Send {
    /// Fill `buffer` with interleaved samples; returns how many were written.
    ///
    /// Never writes more than `buffer.len()`. A short count means the source
    /// is exhausted and not looping; a looping source rewinds and keeps filling.
    fn read(&mut self, buffer: &mut [i16]) -> usize;

    /// Seek to `seconds`. Seeking past the end is ignored.
    fn seek(&mut self, seconds: f64);

    /// Native sample rate in Hz
    fn rate(&self) -> u32;

    /// Native channel count (1 or 2)
    fn channels(&self) -> u16;

    /// Length in frames, 0 when unknown
    fn length(&self) -> u64;

    fn is_valid(&self) -> bool;

    /// False once a non-looping read hit end of stream
    fn has_data_left(&self) -> bool;

    fn set_looping(&mut self, looping: bool);

    fn metadata(&self) -> Metadata {
        Metadata::default()
    }
}

/// Decoder family selected from the file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    /// MPEG audio (`.mp3`, and the `.ftb` alias)
    Mp3,
    /// Ogg Vorbis (`.ogg`)
    Ogg,
    /// Uncompressed / lossless sound files (`.wav`, `.flac`)
    SoundFile,
}

impl SourceFormat {
    /// Pick a format from a file extension (case-insensitive, without the dot).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "wav" | "flac" => Some(SourceFormat::SoundFile),
            "mp3" | "ftb" => Some(SourceFormat::Mp3),
            "ogg" => Some(SourceFormat::Ogg),
            _ => None,
        }
    }

    /// Pick a format from a path's extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }

    /// Whether a probed codec belongs to this format family
    fn accepts(&self, codec: CodecType) -> bool {
        match self {
            SourceFormat::Mp3 => [CODEC_TYPE_MP1, CODEC_TYPE_MP2, CODEC_TYPE_MP3].contains(&codec),
            SourceFormat::Ogg => codec == CODEC_TYPE_VORBIS,
            SourceFormat::SoundFile => [
                CODEC_TYPE_FLAC,
                CODEC_TYPE_PCM_S16LE,
                CODEC_TYPE_PCM_S16BE,
                CODEC_TYPE_PCM_S24LE,
                CODEC_TYPE_PCM_S32LE,
                CODEC_TYPE_PCM_S8,
                CODEC_TYPE_PCM_U8,
                CODEC_TYPE_PCM_F32LE,
                CODEC_TYPE_PCM_F64LE,
                CODEC_TYPE_PCM_ALAW,
                CODEC_TYPE_PCM_MULAW,
            ]
            .contains(&codec),
        }
    }

    /// Extension hint handed to the symphonia probe
    fn hint_extension(&self, path: &Path) -> String {
        match self {
            SourceFormat::Mp3 => "mp3".to_string(),
            SourceFormat::Ogg => "ogg".to_string(),
            SourceFormat::SoundFile => path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| ext.to_ascii_lowercase())
                .unwrap_or_else(|| "wav".to_string()),
        }
    }
}

/// Resolve a missing file to its `.wav` / `.ogg` sibling.
///
/// Existing paths are returned unchanged. A missing `.wav` is retried as `.ogg`;
/// any other missing extension is retried as `.wav`. If the alternate does not
/// exist either, the original path is returned.
pub fn rearrange_filename(path: &Path) -> PathBuf {
    if path.exists() {
        return path.to_path_buf();
    }

    let is_wav = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("wav"))
        .unwrap_or(false);

    let alternate = path.with_extension(if is_wav { "ogg" } else { "wav" });
    if alternate.exists() {
        debug!(
            "{} not found, using {}",
            path.display(),
            alternate.display()
        );
        alternate
    } else {
        path.to_path_buf()
    }
}

/// Open a decoder for `path`, applying the `.wav`/`.ogg` fallback.
///
/// Returns `None` for missing, corrupt or unrecognized files.
pub fn source_from_path(path: &Path) -> Option<Decoder> {
    let resolved = rearrange_filename(path);
    match Decoder::open(&resolved) {
        Ok(decoder) => Some(decoder),
        Err(e) => {
            debug!("No audio source for {}: {}", resolved.display(), e);
            None
        }
    }
}

/// symphonia-backed decoder producing interleaved int16 PCM.
pub struct Decoder {
    format: SourceFormat,
    reader: Box<dyn FormatReader>,
    codec: Box<dyn CodecDecoder>,
    track_id: u32,

    rate: u32,
    channels: u16,
    length: u64,
    metadata: Metadata,

    sample_buf: Option<SampleBuffer<i16>>,
    sample_spec: Option<SignalSpec>,
    sample_capacity: u64,
    pending: Vec<i16>,
    pending_pos: usize,
    /// Samples still to discard after a seek landed before its target
    skip: usize,

    looping: bool,
    data_left: bool,
    valid: bool,
}

impl std::fmt::Debug for Decoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Decoder")
            .field("format", &self.format)
            .field("rate", &self.rate)
            .field("channels", &self.channels)
            .field("length", &self.length)
            .field("looping", &self.looping)
            .field("data_left", &self.data_left)
            .field("valid", &self.valid)
            .finish()
    }
}

impl Decoder {
    /// Open `path` with the decoder family its extension selects.
    ///
    /// # Errors
    /// - Unknown extension
    /// - Failed to open file / probe format
    /// - Codec does not belong to the extension's family
    /// - More than two channels
    pub fn open(path: &Path) -> Result<Self> {
        let format = SourceFormat::from_path(path)
            .ok_or_else(|| Error::UnsupportedFormat(format!("{}", path.display())))?;
        Self::open_as(path, format)
    }

    /// Open `path` as an explicit format family, ignoring its extension.
    pub fn open_as(path: &Path, format: SourceFormat) -> Result<Self> {
        let open_err = |reason: String| Error::Open {
            path: path.to_path_buf(),
            reason,
        };

        debug!("Opening {:?} source: {}", format, path.display());

        let file = std::fs::File::open(path).map_err(|e| open_err(e.to_string()))?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        hint.with_extension(&format.hint_extension(path));

        let mut probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| open_err(format!("Failed to probe format: {}", e)))?;

        let mut metadata = Metadata::default();
        if let Some(rev) = probed.metadata.get().as_ref().and_then(|m| m.current()) {
            collect_tags(rev, &mut metadata);
        }

        let mut reader = probed.format;
        if let Some(rev) = reader.metadata().current() {
            collect_tags(rev, &mut metadata);
        }

        let track = reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| open_err("No audio track found".to_string()))?;

        let track_id = track.id;
        let codec_params = track.codec_params.clone();

        if !format.accepts(codec_params.codec) {
            return Err(Error::UnsupportedFormat(format!(
                "{}: codec does not match {:?}",
                path.display(),
                format
            )));
        }

        let rate = codec_params
            .sample_rate
            .ok_or_else(|| open_err("Sample rate not found".to_string()))?;

        let channels = codec_params
            .channels
            .map(|c| c.count() as u16)
            .ok_or_else(|| open_err("Channel count not found".to_string()))?;

        if !(1..=2).contains(&channels) {
            return Err(Error::UnsupportedFormat(format!(
                "{}: {} channels (only mono and stereo are supported)",
                path.display(),
                channels
            )));
        }

        let codec = codec_registry()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|e| open_err(format!("Failed to create decoder: {}", e)))?;

        let length = codec_params.n_frames.unwrap_or(0);

        debug!(
            "Audio format: sample_rate={}, channels={}, frames={}",
            rate, channels, length
        );

        Ok(Self {
            format,
            reader,
            codec,
            track_id,
            rate,
            channels,
            length,
            metadata,
            sample_buf: None,
            sample_spec: None,
            sample_capacity: 0,
            pending: Vec::new(),
            pending_pos: 0,
            skip: 0,
            looping: false,
            data_left: true,
            valid: true,
        })
    }

    /// Format family this decoder was opened as
    pub fn format(&self) -> SourceFormat {
        self.format
    }

    /// Decode the next packet of our track into `pending`.
    ///
    /// Returns `Ok(false)` at end of stream.
    fn decode_next_packet(&mut self) -> std::result::Result<bool, SymphoniaError> {
        loop {
            let packet = match self.reader.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(false);
                }
                Err(SymphoniaError::ResetRequired) => return Ok(false),
                Err(e) => return Err(e),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.codec.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(e)) => {
                    warn!("Decode error: {}", e);
                    continue;
                }
                Err(e) => return Err(e),
            };

            if decoded.frames() == 0 {
                continue;
            }

            let spec = *decoded.spec();
            let capacity = decoded.capacity() as u64;
            let need_new = self.sample_buf.is_none()
                || self.sample_capacity < capacity
                || self.sample_spec != Some(spec);
            if need_new {
                self.sample_buf = Some(SampleBuffer::<i16>::new(capacity, spec));
                self.sample_capacity = capacity;
                self.sample_spec = Some(spec);
            }

            if let Some(buf) = self.sample_buf.as_mut() {
                buf.copy_interleaved_ref(decoded);
                self.pending.clear();
                self.pending.extend_from_slice(buf.samples());
                self.pending_pos = self.skip.min(self.pending.len());
                self.skip -= self.pending_pos;
            }

            return Ok(true);
        }
    }
}

impl AudioDataSource for Decoder {
    fn read(&mut self, buffer: &mut [i16]) -> usize {
        if !self.valid || buffer.is_empty() {
            return 0;
        }

        let channels = self.channels as usize;
        let wanted = buffer.len() - buffer.len() % channels;
        let mut written = 0;
        let mut rewound_empty = false;

        while written < wanted {
            if self.pending_pos < self.pending.len() {
                let n = (wanted - written).min(self.pending.len() - self.pending_pos);
                buffer[written..written + n]
                    .copy_from_slice(&self.pending[self.pending_pos..self.pending_pos + n]);
                self.pending_pos += n;
                written += n;
                rewound_empty = false;
                continue;
            }

            match self.decode_next_packet() {
                Ok(true) => continue,
                Ok(false) => {
                    if self.looping && !rewound_empty {
                        self.seek(0.0);
                        rewound_empty = true;
                        continue;
                    }
                    if !self.looping {
                        self.data_left = false;
                    }
                    break;
                }
                Err(e) => {
                    warn!("Error reading packet: {}", e);
                    self.data_left = false;
                    self.valid = false;
                    break;
                }
            }
        }

        written
    }

    fn seek(&mut self, seconds: f64) {
        let frame = (self.rate as f64 * seconds.max(0.0)).round() as u64;

        if self.length > 0 && frame > self.length {
            warn!(
                "Attempt to seek after the stream's end ({} > {} frames)",
                frame, self.length
            );
            return;
        }

        let secs = frame as f64 / self.rate as f64;
        let time = Time {
            seconds: secs.trunc() as u64,
            frac: secs.fract(),
        };

        match self.reader.seek(
            SeekMode::Accurate,
            SeekTo::Time {
                time,
                track_id: Some(self.track_id),
            },
        ) {
            Ok(seeked) => {
                let early = seeked.required_ts.saturating_sub(seeked.actual_ts);
                self.codec.reset();
                self.pending.clear();
                self.pending_pos = 0;
                self.skip = early as usize * self.channels as usize;
                self.data_left = true;
            }
            Err(e) => warn!("Error seeking stream to {:.3}s: {}", seconds, e),
        }
    }

    fn rate(&self) -> u32 {
        self.rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn length(&self) -> u64 {
        self.length
    }

    fn is_valid(&self) -> bool {
        self.valid
    }

    fn has_data_left(&self) -> bool {
        self.data_left
    }

    fn set_looping(&mut self, looping: bool) {
        self.looping = looping;
    }

    fn metadata(&self) -> Metadata {
        self.metadata.clone()
    }
}

impl AudioDataSource for Box<dyn AudioDataSource> {
    fn read(&mut self, buffer: &mut [i16]) -> usize {
        (**self).read(buffer)
    }

    fn seek(&mut self, seconds: f64) {
        (**self).seek(seconds)
    }

    fn rate(&self) -> u32 {
        (**self).rate()
    }

    fn channels(&self) -> u16 {
        (**self).channels()
    }

    fn length(&self) -> u64 {
        (**self).length()
    }

    fn is_valid(&self) -> bool {
        (**self).is_valid()
    }

    fn has_data_left(&self) -> bool {
        (**self).has_data_left()
    }

    fn set_looping(&mut self, looping: bool) {
        (**self).set_looping(looping)
    }

    fn metadata(&self) -> Metadata {
        (**self).metadata()
    }
}

fn collect_tags(rev: &MetadataRevision, metadata: &mut Metadata) {
    for tag in rev.tags() {
        match tag.std_key {
            Some(StandardTagKey::Artist) if metadata.artist.is_empty() => {
                metadata.artist = tag.value.to_string().trim().to_string();
            }
            Some(StandardTagKey::TrackTitle) if metadata.title.is_empty() => {
                metadata.title = tag.value.to_string().trim().to_string();
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_extension() {
        assert_eq!(SourceFormat::from_extension("wav"), Some(SourceFormat::SoundFile));
        assert_eq!(SourceFormat::from_extension("FLAC"), Some(SourceFormat::SoundFile));
        assert_eq!(SourceFormat::from_extension("mp3"), Some(SourceFormat::Mp3));
        assert_eq!(SourceFormat::from_extension("ftb"), Some(SourceFormat::Mp3));
        assert_eq!(SourceFormat::from_extension("Ogg"), Some(SourceFormat::Ogg));
        assert_eq!(SourceFormat::from_extension("m4a"), None);
        assert_eq!(SourceFormat::from_extension(""), None);
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(
            SourceFormat::from_path(Path::new("songs/bgm.OGG")),
            Some(SourceFormat::Ogg)
        );
        assert_eq!(SourceFormat::from_path(Path::new("songs/noext")), None);
    }

    #[test]
    fn test_format_accepts_only_own_codecs() {
        assert!(SourceFormat::Mp3.accepts(CODEC_TYPE_MP3));
        assert!(!SourceFormat::Mp3.accepts(CODEC_TYPE_VORBIS));
        assert!(SourceFormat::Ogg.accepts(CODEC_TYPE_VORBIS));
        assert!(SourceFormat::SoundFile.accepts(CODEC_TYPE_PCM_S16LE));
        assert!(SourceFormat::SoundFile.accepts(CODEC_TYPE_FLAC));
        assert!(!SourceFormat::SoundFile.accepts(CODEC_TYPE_MP3));
    }

    #[test]
    fn test_open_unknown_extension() {
        let result = Decoder::open(Path::new("/tmp/definitely_missing.xyz"));
        assert!(matches!(result, Err(Error::UnsupportedFormat(_))));
    }

    #[test]
    fn test_open_missing_file() {
        let result = Decoder::open(Path::new("/nonexistent/dir/click.wav"));
        assert!(matches!(result, Err(Error::Open { .. })));
    }

    #[test]
    fn test_rearrange_missing_without_alternate() {
        let path = Path::new("/nonexistent/dir/kick.wav");
        assert_eq!(rearrange_filename(path), path.to_path_buf());
    }

    #[test]
    fn test_init_is_idempotent() {
        init();
        init();
    }
}
