//! In-memory audio sources
//!
//! Implement the same `AudioDataSource` contract as the file decoders so
//! samples and streams can be driven without touching the filesystem.

use rd_audio::audio::decoder::AudioDataSource;

/// Source of one repeated value, optionally bounded.
///
/// `frames: None` never runs out.
pub struct ConstantSource {
    pub value: i16,
    pub rate: u32,
    pub channels: u16,
    pub frames: Option<u64>,
    pos: u64,
    looping: bool,
}

impl ConstantSource {
    pub fn new(value: i16, rate: u32, channels: u16, frames: Option<u64>) -> Self {
        Self {
            value,
            rate,
            channels,
            frames,
            pos: 0,
            looping: false,
        }
    }

    pub fn boxed(value: i16, rate: u32, channels: u16, frames: Option<u64>) -> Box<dyn AudioDataSource> {
        Box::new(Self::new(value, rate, channels, frames))
    }
}

impl AudioDataSource for ConstantSource {
    fn read(&mut self, buffer: &mut [i16]) -> usize {
        let channels = self.channels as usize;
        let wanted_frames = (buffer.len() / channels) as u64;

        let frames = match self.frames {
            None => wanted_frames,
            Some(total) if self.looping && total > 0 => wanted_frames,
            Some(total) => wanted_frames.min(total - self.pos),
        };

        let n = frames as usize * channels;
        buffer[..n].fill(self.value);

        if let Some(total) = self.frames {
            if total > 0 {
                self.pos = if self.looping {
                    (self.pos + frames) % total
                } else {
                    self.pos + frames
                };
            }
        }
        n
    }

    fn seek(&mut self, seconds: f64) {
        let frame = (seconds * self.rate as f64) as u64;
        self.pos = match self.frames {
            Some(total) => frame.min(total),
            None => frame,
        };
    }

    fn rate(&self) -> u32 {
        self.rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn length(&self) -> u64 {
        self.frames.unwrap_or(0)
    }

    fn is_valid(&self) -> bool {
        true
    }

    fn has_data_left(&self) -> bool {
        match self.frames {
            Some(total) => self.looping || self.pos < total,
            None => true,
        }
    }

    fn set_looping(&mut self, looping: bool) {
        self.looping = looping;
    }
}

/// Source whose frame `i` holds `(i % period) as i16` on every channel.
///
/// Loops back to frame 0 when looping is enabled, like a file decoder.
pub struct RampSource {
    pub rate: u32,
    pub channels: u16,
    pub frames: u64,
    pub period: u64,
    pos: u64,
    looping: bool,
}

impl RampSource {
    pub fn new(rate: u32, channels: u16, frames: u64) -> Self {
        Self {
            rate,
            channels,
            frames,
            period: 30000,
            pos: 0,
            looping: false,
        }
    }

    pub fn boxed(rate: u32, channels: u16, frames: u64) -> Box<dyn AudioDataSource> {
        Box::new(Self::new(rate, channels, frames))
    }

    pub fn position(&self) -> u64 {
        self.pos
    }
}

impl AudioDataSource for RampSource {
    fn read(&mut self, buffer: &mut [i16]) -> usize {
        let channels = self.channels as usize;
        let wanted = buffer.len() / channels;
        let mut written = 0;

        while written < wanted {
            if self.pos >= self.frames {
                if self.looping && self.frames > 0 {
                    self.pos = 0;
                } else {
                    break;
                }
            }

            let value = (self.pos % self.period) as i16;
            buffer[written * channels..(written + 1) * channels].fill(value);
            self.pos += 1;
            written += 1;
        }

        written * channels
    }

    fn seek(&mut self, seconds: f64) {
        let frame = (seconds * self.rate as f64).round() as u64;
        if frame <= self.frames {
            self.pos = frame;
        }
    }

    fn rate(&self) -> u32 {
        self.rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn length(&self) -> u64 {
        self.frames
    }

    fn is_valid(&self) -> bool {
        true
    }

    fn has_data_left(&self) -> bool {
        self.looping || self.pos < self.frames
    }

    fn set_looping(&mut self, looping: bool) {
        self.looping = looping;
    }
}
