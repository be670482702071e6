//! rd-audio - command-line driver for the playback engine
//!
//! - `info`: probe a file and print its format and tags
//! - `render`: play a file as a sample or stream against an offline mixer
//!   clock and report what came out

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use rd_audio::audio::decoder::{self, rearrange_filename, AudioDataSource, Decoder};
use rd_audio::playback::{Mixer, OfflineMixer, Sample, Stream};
use rd_audio::EngineConfig;

/// Command-line arguments for rd-audio
#[derive(Parser, Debug)]
#[command(name = "rd-audio")]
#[command(about = "Rhythm game audio engine driver")]
#[command(version)]
struct Args {
    /// Engine configuration file (TOML)
    #[arg(short, long, env = "RD_AUDIO_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print format, length and tags of an audio file
    Info {
        /// Audio file (.wav, .flac, .ogg, .mp3, .ftb)
        file: PathBuf,
    },

    /// Render a file through a sample or stream without an audio device
    Render {
        /// Audio file (.wav, .flac, .ogg, .mp3, .ftb)
        file: PathBuf,

        /// Play as a stream instead of a fully loaded sample
        #[arg(long)]
        stream: bool,

        /// Output rate in Hz (defaults to the configured output rate)
        #[arg(long)]
        rate: Option<u32>,

        /// Playback pitch (1.0 = unchanged)
        #[arg(long, default_value = "1.0")]
        pitch: f64,

        /// Seconds of output to render
        #[arg(long, default_value = "10.0")]
        seconds: f64,

        /// Loop the source
        #[arg(long)]
        looping: bool,

        /// Frames per block
        #[arg(long, default_value = "512")]
        block: usize,
    },
}

/// Totals gathered while rendering
#[derive(Debug, Default)]
struct RenderReport {
    frames: usize,
    peak: f32,
    still_playing: bool,
}

impl RenderReport {
    fn absorb(&mut self, block: &[f32]) {
        self.frames += block.len() / 2;
        for &s in block {
            self.peak = self.peak.max(s.abs());
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => EngineConfig::default(),
    };

    init_tracing(&config)?;
    decoder::init();

    match args.command {
        Command::Info { file } => print_info(&file),
        Command::Render {
            file,
            stream,
            rate,
            pitch,
            seconds,
            looping,
            block,
        } => {
            if !(pitch.is_finite() && pitch > 0.0) {
                bail!("Pitch must be positive, got {}", pitch);
            }
            if block == 0 {
                bail!("Block size must be non-zero");
            }

            let rate = rate.unwrap_or(config.output_rate);
            let offline = Arc::new(OfflineMixer::new(rate));
            let mixer: Arc<dyn Mixer> = offline.clone();
            info!(
                "Rendering {} as {} at {}Hz (pitch {}, {}s, looping={})",
                file.display(),
                if stream { "stream" } else { "sample" },
                rate,
                pitch,
                seconds,
                looping
            );

            let report = if stream {
                render_stream(&file, &mixer, &offline, &config, pitch, seconds, looping, block)?
            } else {
                render_sample(&file, &mixer, &offline, &config, pitch, seconds, looping, block)?
            };

            println!("frames rendered: {}", report.frames);
            println!("seconds rendered: {:.3}", report.frames as f64 / rate as f64);
            println!("peak level: {:.4}", report.peak);
            println!("mixer time: {:.3}", offline.time());
            println!("still playing: {}", report.still_playing);
            Ok(())
        }
    }
}

/// Install the tracing subscriber. `RUST_LOG` wins over the configured level.
fn init_tracing(config: &EngineConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("rd_audio={}", config.logging.level)));

    let file_layer = match &config.logging.file {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(Mutex::new(file))
                    .with_ansi(false),
            )
        }
        None => None,
    };
    let stderr_layer = file_layer
        .is_none()
        .then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();

    Ok(())
}

fn print_info(file: &Path) -> Result<()> {
    let resolved = rearrange_filename(file);
    let decoder = Decoder::open(&resolved)
        .with_context(|| format!("Failed to open {}", resolved.display()))?;

    let metadata = decoder.metadata();
    println!("file: {}", resolved.display());
    println!("format: {:?}", decoder.format());
    println!("rate: {} Hz", decoder.rate());
    println!("channels: {}", decoder.channels());
    if decoder.length() > 0 {
        println!(
            "length: {} frames ({:.3}s)",
            decoder.length(),
            decoder.length() as f64 / decoder.rate() as f64
        );
    } else {
        println!("length: unknown");
    }
    println!("artist: {}", metadata.artist);
    println!("title: {}", metadata.title);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn render_sample(
    file: &Path,
    mixer: &Arc<dyn Mixer>,
    offline: &OfflineMixer,
    config: &EngineConfig,
    pitch: f64,
    seconds: f64,
    looping: bool,
    block: usize,
) -> Result<RenderReport> {
    let mut sample = Sample::with_mixer(mixer);
    sample.set_load_chunk(config.loader_read_chunk);
    sample.set_pitch(pitch);
    sample.set_looping(looping);

    if !sample.open(file, false) {
        bail!("Failed to load sample {}", file.display());
    }
    debug!("Loaded {:?}", sample);
    info!(
        "Sample: {:.3}s at {}Hz, {} channels",
        sample.duration(),
        sample.rate(),
        sample.channels()
    );

    sample.play();

    let mut report = RenderReport::default();
    let mut buffer = vec![0.0f32; block * 2];
    while offline.time() < seconds && sample.is_playing() {
        let n = sample.read(&mut buffer);
        report.absorb(&buffer[..n]);
        offline.advance_frames(block);
    }
    report.still_playing = sample.is_playing();
    Ok(report)
}

#[allow(clippy::too_many_arguments)]
fn render_stream(
    file: &Path,
    mixer: &Arc<dyn Mixer>,
    offline: &OfflineMixer,
    config: &EngineConfig,
    pitch: f64,
    seconds: f64,
    looping: bool,
    block: usize,
) -> Result<RenderReport> {
    let mut stream = Stream::open(file, Some(mixer), config)
        .with_context(|| format!("Failed to open stream {}", file.display()))?;
    stream.set_pitch(pitch);
    stream.set_looping(looping);

    let metadata = stream.metadata();
    if !metadata.is_empty() {
        info!("Now streaming: {} - {}", metadata.artist, metadata.title);
    }

    stream.update();
    stream.play();

    let mut report = RenderReport::default();
    let mut buffer = vec![0.0f32; block * 2];
    while offline.time() < seconds && stream.is_playing() {
        stream.update();
        let n = stream.read(&mut buffer);
        report.absorb(&buffer[..n]);
        offline.advance_frames(block);
    }

    let stats = stream.ring_stats();
    info!(
        "Stream finished: streamed {:.3}s, played {:.3}s, ring {:.0}% full, {} underruns",
        stream.streamed_time(),
        stream.played_time_dac(),
        stats.fill_percent() * 100.0,
        stats.underruns
    );
    report.still_playing = stream.is_playing();
    Ok(report)
}
