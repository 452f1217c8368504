use criterion::{black_box, criterion_group, criterion_main, Criterion};
use klangfeld::nodes::{Gain, GainMessage};
use klangfeld::orientation::spherical_to_direction;
use klangfeld::{compute_mix, AudioContext, AudioSource, MixFrame, MixOptions, Scene};

fn ring(n: usize) -> Scene {
    Scene::builder("ring", "Ring")
        .sources((0..n).map(|i| {
            let az = -180.0 + 360.0 * i as f32 / n as f32;
            AudioSource::new(format!("s{}", i), format!("https://x.test/{}.ogg", i), az, 0.0)
        }))
        .build()
        .unwrap()
}

pub fn criterion_benchmark(c: &mut Criterion) {
    let scene = ring(64);
    let options = MixOptions::default();
    let forward = spherical_to_direction(33.0, 5.0);

    c.bench_function("compute_mix(64 sources)", |b| {
        b.iter(|| compute_mix(black_box(forward), &scene, &options))
    });

    c.bench_function("MixFrame::compute_into(64 sources)", |b| {
        let mut frame = MixFrame::default();
        b.iter(|| frame.compute_into(black_box(forward), &scene, &options))
    });

    c.bench_function("AudioContext::render(16 gains, 1024 frames)", |b| {
        let mut ctx = AudioContext::offline(48_000, 2).unwrap();
        for _ in 0..16 {
            let gain = ctx.add(Gain::new(0.5).with_channels(2)).unwrap();
            ctx.connect_to_master(&gain).unwrap();
        }
        ctx.master().send(GainMessage::SetGain(0.8)).ok();
        ctx.resume().unwrap();
        b.iter(|| ctx.render(black_box(1024)).unwrap())
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
