/// Lock-Free Ring Buffer for Stream PCM
///
/// Single-producer single-consumer ring of interleaved int16 samples between a
/// stream's decoder-side `update()` cadence and its real-time `read()`.
///
/// Design:
/// - Producer (feeder): writes only into vacant space
/// - Consumer (real-time read): takes only what is occupied
/// - Lock-free: neither side blocks or allocates after construction
/// - Overruns/underruns are counted and logged every 1000th occurrence

use ringbuf::{traits::*, HeapRb};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Default capacity in int16 samples (~186ms stereo @ 44.1kHz)
pub const DEFAULT_CAPACITY: usize = 16384;

/// Lock-free ring buffer for interleaved int16 samples
pub struct PcmRingBuffer {
    buffer: HeapRb<i16>,

    /// Underrun counter (consumer found buffer empty)
    underruns: Arc<AtomicU64>,

    /// Overrun counter (producer could not push everything it was given)
    overruns: Arc<AtomicU64>,
}

impl PcmRingBuffer {
    /// Create a ring holding `capacity` samples, rounded down to whole frames.
    ///
    /// # Arguments
    /// * `capacity` - Buffer size in samples (default: [`DEFAULT_CAPACITY`])
    /// * `channels` - Interleaved channel count the ring carries
    pub fn new(capacity: Option<usize>, channels: u16) -> Self {
        let channels = channels.max(1) as usize;
        let requested = capacity.unwrap_or(DEFAULT_CAPACITY);
        let capacity = (requested - requested % channels).max(channels);

        debug!(
            "Creating PCM ring buffer with capacity: {} samples ({} channels)",
            capacity, channels
        );

        Self {
            buffer: HeapRb::new(capacity),
            underruns: Arc::new(AtomicU64::new(0)),
            overruns: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Split into producer and consumer halves
    ///
    /// Each half can be moved to a different thread.
    pub fn split(self) -> (PcmProducer, PcmConsumer) {
        let capacity: usize = self.buffer.capacity().into();
        let (prod, cons) = self.buffer.split();

        let producer = PcmProducer {
            producer: prod,
            overruns: Arc::clone(&self.overruns),
            underruns: Arc::clone(&self.underruns),
        };

        let consumer = PcmConsumer {
            consumer: cons,
            capacity,
            underruns: Arc::clone(&self.underruns),
            overruns: Arc::clone(&self.overruns),
        };

        (producer, consumer)
    }

    /// Get statistics
    pub fn stats(&self) -> RingBufferStats {
        RingBufferStats {
            underruns: self.underruns.load(Ordering::Relaxed),
            overruns: self.overruns.load(Ordering::Relaxed),
            capacity: self.buffer.capacity().into(),
            occupied: self.buffer.occupied_len(),
        }
    }
}

/// Producer half of ring buffer (used by the stream feeder)
pub struct PcmProducer {
    producer: ringbuf::HeapProd<i16>,
    overruns: Arc<AtomicU64>,
    underruns: Arc<AtomicU64>,
}

impl PcmProducer {
    /// Push as many samples as fit; returns the count pushed.
    ///
    /// A short count is an overrun.
    pub fn push_slice(&mut self, samples: &[i16]) -> usize {
        let pushed = self.producer.push_slice(samples);
        if pushed < samples.len() {
            let count = self.overruns.fetch_add(1, Ordering::Relaxed) + 1;
            if count % 1000 == 0 {
                warn!("PCM ring buffer overrun (total: {})", count);
            }
        }
        pushed
    }

    /// Free space in samples
    pub fn vacant_len(&self) -> usize {
        self.producer.vacant_len()
    }

    /// Current buffer fill level in samples
    pub fn occupied_len(&self) -> usize {
        self.producer.occupied_len()
    }

    /// Get buffer capacity in samples
    pub fn capacity(&self) -> usize {
        self.producer.capacity().into()
    }

    pub fn stats(&self) -> RingBufferStats {
        RingBufferStats {
            underruns: self.underruns.load(Ordering::Relaxed),
            overruns: self.overruns.load(Ordering::Relaxed),
            capacity: self.capacity(),
            occupied: self.occupied_len(),
        }
    }
}

/// Consumer half of ring buffer (used by the real-time read)
pub struct PcmConsumer {
    consumer: ringbuf::HeapCons<i16>,
    capacity: usize,
    underruns: Arc<AtomicU64>,
    overruns: Arc<AtomicU64>,
}

impl PcmConsumer {
    /// Pop up to `output.len()` samples; returns the count popped.
    ///
    /// Finding the buffer empty on a non-empty request is an underrun. The
    /// caller outputs silence in that case.
    pub fn pop_slice(&mut self, output: &mut [i16]) -> usize {
        let popped = self.consumer.pop_slice(output);
        if popped == 0 && !output.is_empty() {
            let count = self.underruns.fetch_add(1, Ordering::Relaxed) + 1;
            if count % 1000 == 0 {
                warn!("PCM ring buffer underrun (total: {})", count);
            }
        }
        popped
    }

    /// Discard everything buffered; returns the number of samples dropped.
    pub fn clear(&mut self) -> usize {
        let dropped = self.consumer.clear();
        trace!("PCM ring buffer flushed ({} samples dropped)", dropped);
        dropped
    }

    /// Current buffer fill level in samples
    pub fn occupied_len(&self) -> usize {
        self.consumer.occupied_len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> RingBufferStats {
        RingBufferStats {
            underruns: self.underruns.load(Ordering::Relaxed),
            overruns: self.overruns.load(Ordering::Relaxed),
            capacity: self.capacity,
            occupied: self.occupied_len(),
        }
    }
}

/// Ring buffer statistics
#[derive(Debug, Clone, Copy)]
pub struct RingBufferStats {
    /// Total underruns (consumer found buffer empty)
    pub underruns: u64,

    /// Total overruns (producer found buffer full)
    pub overruns: u64,

    /// Buffer capacity in samples
    pub capacity: usize,

    /// Current occupied samples
    pub occupied: usize,
}

impl RingBufferStats {
    /// Get buffer fill percentage (0.0 to 1.0)
    pub fn fill_percent(&self) -> f32 {
        if self.capacity == 0 {
            return 0.0;
        }
        self.occupied as f32 / self.capacity as f32
    }

    /// Check if buffer health is good
    pub fn is_healthy(&self) -> bool {
        self.fill_percent() >= 0.25 && self.fill_percent() <= 0.90
    }
}
