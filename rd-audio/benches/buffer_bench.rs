//! Buffer Operations Performance Benchmark
//!
//! Measures the stream ring buffer and a full update/read cycle to verify the
//! real-time path stays cheap.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rd_audio::audio::decoder::AudioDataSource;
use rd_audio::playback::{PcmRingBuffer, Stream};
use rd_audio::EngineConfig;

/// Endless stereo source of silence
struct Silence;

impl AudioDataSource for Silence {
    fn read(&mut self, buffer: &mut [i16]) -> usize {
        buffer.fill(0);
        buffer.len()
    }

    fn seek(&mut self, _seconds: f64) {}

    fn rate(&self) -> u32 {
        48000
    }

    fn channels(&self) -> u16 {
        2
    }

    fn length(&self) -> u64 {
        0
    }

    fn is_valid(&self) -> bool {
        true
    }

    fn has_data_left(&self) -> bool {
        true
    }

    fn set_looping(&mut self, _looping: bool) {}
}

fn bench_ring_buffer_operations(c: &mut Criterion) {
    let mut group = c.benchmark_group("buffer_operations");

    group.bench_function("ring_buffer_push_pop_1024", |b| {
        let (mut producer, mut consumer) = PcmRingBuffer::new(Some(16384), 2).split();
        let data = vec![1i16; 1024];
        let mut out = vec![0i16; 1024];

        b.iter(|| {
            let pushed = producer.push_slice(black_box(&data));
            let popped = consumer.pop_slice(black_box(&mut out));
            black_box((pushed, popped));
        });
    });

    group.bench_function("stream_update_read_512", |b| {
        let config = EngineConfig::default();
        let mut stream =
            Stream::from_source(Box::new(Silence), None, &config).expect("stream open failed");
        stream.play();
        let mut out = vec![0.0f32; 1024];

        b.iter(|| {
            stream.update();
            let n = stream.read(black_box(&mut out));
            black_box(n);
        });
    });

    group.finish();
}

criterion_group!(benches, bench_ring_buffer_operations);
criterion_main!(benches);
