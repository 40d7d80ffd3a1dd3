use std::hint::black_box;

use audio_align::buffer::AudioBuffer;
use audio_align::config::Config;
use audio_align::features::chroma::ChromaExtractor;
use audio_align::features::energy::EnergyExtractor;
use audio_align::features::flux::FluxExtractor;
use audio_align::features::mfcc::MfccExtractor;
use audio_align::features::FeatureExtractor;
use criterion::{criterion_group, criterion_main, Criterion};

fn sine_buffer(freq: f64, duration_s: f64, sample_rate: u32) -> AudioBuffer {
    let n = (duration_s * f64::from(sample_rate)) as usize;
    let samples: Vec<f32> = (0..n)
        .map(|i| (2.0 * std::f64::consts::PI * freq * i as f64 / f64::from(sample_rate)).sin() as f32 * 0.5)
        .collect();
    AudioBuffer::construct(samples, sample_rate).unwrap()
}

fn bench_flux(c: &mut Criterion) {
    let buffer = sine_buffer(220.0, 8.0, 44100);
    let cfg = Config::default();
    c.bench_function("audio-align: features/flux.rs: extract", |b| {
        b.iter(|| {
            FluxExtractor.extract(black_box(&buffer), black_box(&cfg), None).unwrap();
        });
    });
}

fn bench_chroma(c: &mut Criterion) {
    let buffer = sine_buffer(220.0, 8.0, 44100);
    let cfg = Config::music();
    c.bench_function("audio-align: features/chroma.rs: extract", |b| {
        b.iter(|| {
            ChromaExtractor.extract(black_box(&buffer), black_box(&cfg), None).unwrap();
        });
    });
}

fn bench_energy(c: &mut Criterion) {
    let buffer = sine_buffer(220.0, 8.0, 44100);
    let cfg = Config::default();
    c.bench_function("audio-align: features/energy.rs: extract", |b| {
        b.iter(|| {
            EnergyExtractor.extract(black_box(&buffer), black_box(&cfg), None).unwrap();
        });
    });
}

fn bench_mfcc(c: &mut Criterion) {
    let buffer = sine_buffer(220.0, 8.0, 44100);
    let cfg = Config::speech();
    c.bench_function("audio-align: features/mfcc.rs: extract", |b| {
        b.iter(|| {
            MfccExtractor.extract(black_box(&buffer), black_box(&cfg), None).unwrap();
        });
    });
}

criterion_group!(benches, bench_flux, bench_chroma, bench_energy, bench_mfcc);
criterion_main!(benches);
