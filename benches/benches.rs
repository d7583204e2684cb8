use adaptive_sampler::{
    aggregate::{Denominator, SlidingWindow},
    f_engine::{hamming, SpectralAnalyzer},
    signal::Waveform,
    Pacing, BLOCK_SIZE, INIT_SAMPLE_RATE, NOISE_THRESHOLD, WINDOW_SIZE,
};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::prelude::*;

fn benchmark(c: &mut Criterion) {
    let mut rng = rand::thread_rng();

    let mut noisy = [0f32; BLOCK_SIZE];
    for (i, x) in noisy.iter_mut().enumerate() {
        *x = Waveform::MediumFreq.sample(i, INIT_SAMPLE_RATE) + rng.gen_range(-1.0..1.0);
    }

    // Containers
    let mut analyzer = SpectralAnalyzer::new(BLOCK_SIZE, NOISE_THRESHOLD).unwrap();
    let mut window = SlidingWindow::<WINDOW_SIZE>::new();

    c.bench_function("acquire block", |b| {
        b.iter(|| {
            analyzer.acquire(
                black_box(Waveform::LowFreq),
                black_box(INIT_SAMPLE_RATE),
                Pacing::Immediate,
            )
        })
    });

    c.bench_function("hamming window", |b| {
        let mut block = noisy;
        b.iter(|| hamming(black_box(&mut block)))
    });

    c.bench_function("analyze block", |b| {
        b.iter(|| {
            analyzer.load(black_box(&noisy)).unwrap();
            analyzer.analyze();
        })
    });

    analyzer.load(&noisy).unwrap();
    analyzer.analyze();
    c.bench_function("dominant frequency", |b| {
        b.iter(|| analyzer.dominant_frequency(black_box(INIT_SAMPLE_RATE)))
    });

    c.bench_function("window push + average", |b| {
        b.iter(|| {
            window.push(black_box(1.5));
            window.average(black_box(Denominator::Capacity))
        })
    });
}

criterion_group!(benches, benchmark);
criterion_main!(benches);
