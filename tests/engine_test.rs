mod common;

use approx::assert_abs_diff_eq;
use common::{constant_wav, frames, init_tracing, MemoryFetcher, RATE};
use klangfeld::orientation::{spherical_to_direction, FORWARD};
use klangfeld::{
    AudioEngine, AudioError, AudioSource, ContextState, EngineConfig, EngineState, MixOptions, Scene,
};

fn engine(fetcher: &MemoryFetcher) -> AudioEngine {
    AudioEngine::with_cache(
        EngineConfig::offline(RATE, 1).with_master_gain(1.0),
        fetcher.cache(),
    )
}

fn plain_mix() -> MixOptions {
    MixOptions::default()
        .with_beam_width(60.0)
        .with_normalize(false)
        .with_master_gain(1.0)
}

fn render(engine: &mut AudioEngine, secs: f64) -> Vec<f32> {
    engine
        .context_mut()
        .expect("context")
        .render(frames(secs))
        .expect("render")
}

#[tokio::test]
async fn facing_a_source_plays_it_at_full_level() {
    init_tracing();
    let fetcher = MemoryFetcher::default().with("mem://front.wav", constant_wav(0.5, 1.0));
    let scene = Scene::builder("one", "One")
        .source(AudioSource::new("front", "mem://front.wav", 0.0, 0.0))
        .build()
        .unwrap();

    let mut engine = engine(&fetcher);
    engine.start(&scene).await.unwrap();
    assert_eq!(engine.state(), EngineState::Playing);
    assert_eq!(engine.context().unwrap().state(), ContextState::Running);

    engine.update_mix(FORWARD, &scene, &plain_mix());
    let out = render(&mut engine, 0.5);

    // nothing before the shared start lead
    assert!(out[..frames(0.04)].iter().all(|s| *s == 0.0));
    assert_abs_diff_eq!(*out.last().unwrap(), 0.5, epsilon = 1e-3);
    assert_abs_diff_eq!(engine.mix_gain("front").unwrap(), 1.0, epsilon = 1e-3);
    assert_abs_diff_eq!(engine.last_mix().gains[0], 1.0, epsilon = 1e-6);
}

#[tokio::test]
async fn sources_outside_the_beam_are_silent() {
    let fetcher = MemoryFetcher::default().with("mem://side.wav", constant_wav(0.5, 1.0));
    let scene = Scene::builder("side", "Side")
        .source(AudioSource::new("side", "mem://side.wav", 90.0, 0.0))
        .build()
        .unwrap();

    let mut engine = engine(&fetcher);
    engine.start(&scene).await.unwrap();
    engine.update_mix(FORWARD, &scene, &plain_mix());
    let out = render(&mut engine, 0.5);

    assert_abs_diff_eq!(*out.last().unwrap(), 0.0, epsilon = 1e-4);
    assert_abs_diff_eq!(engine.mix_gain("side").unwrap(), 0.0, epsilon = 1e-4);

    // turning toward it brings it in
    engine.update_mix(spherical_to_direction(90.0, 0.0), &scene, &plain_mix());
    let out = render(&mut engine, 0.5);
    assert_abs_diff_eq!(*out.last().unwrap(), 0.5, epsilon = 1e-3);
}

#[tokio::test]
async fn normalized_mix_keeps_total_weight() {
    let fetcher = MemoryFetcher::default()
        .with("mem://a.wav", constant_wav(0.25, 1.0))
        .with("mem://b.wav", constant_wav(0.25, 1.0));
    let scene = Scene::builder("pair", "Pair")
        .source(AudioSource::new("a", "mem://a.wav", -10.0, 0.0))
        .source(AudioSource::new("b", "mem://b.wav", 10.0, 0.0))
        .build()
        .unwrap();

    let mut engine = engine(&fetcher);
    engine.start(&scene).await.unwrap();
    engine.update_mix(FORWARD, &scene, &plain_mix().with_normalize(true));
    let out = render(&mut engine, 0.5);

    let mix = engine.last_mix();
    assert_abs_diff_eq!(mix.gains.iter().sum::<f32>(), 1.0, epsilon = 1e-5);
    assert_abs_diff_eq!(*out.last().unwrap(), 0.25, epsilon = 1e-3);
}

#[tokio::test]
async fn fade_in_ramps_the_envelope() {
    let fetcher = MemoryFetcher::default().with("mem://a.wav", constant_wav(0.5, 1.0));
    let scene = Scene::builder("fade", "Fade")
        .source(AudioSource::new("a", "mem://a.wav", 0.0, 0.0).with_fade_in(1.0))
        .build()
        .unwrap();

    let mut engine = engine(&fetcher);
    engine.start(&scene).await.unwrap();
    engine.update_mix(FORWARD, &scene, &plain_mix());

    render(&mut engine, 0.5);
    let halfway = engine.envelope_gain("a").unwrap();
    assert!(halfway > 0.4 && halfway < 0.6, "envelope at {}", halfway);

    render(&mut engine, 0.6);
    assert_abs_diff_eq!(engine.envelope_gain("a").unwrap(), 1.0, epsilon = 1e-6);
}

#[tokio::test]
async fn stop_fades_out_then_releases_the_chain() {
    let fetcher = MemoryFetcher::default().with("mem://a.wav", constant_wav(0.5, 1.0));
    let scene = Scene::builder("fade", "Fade")
        .source(AudioSource::new("a", "mem://a.wav", 0.0, 0.0).with_fade_out(2.0))
        .build()
        .unwrap();

    let mut engine = engine(&fetcher);
    engine.start(&scene).await.unwrap();
    engine.update_mix(FORWARD, &scene, &plain_mix());
    render(&mut engine, 0.5);

    let idle_nodes = 2;
    assert_eq!(engine.context().unwrap().node_count(), idle_nodes + 3);

    engine.stop();
    assert_eq!(engine.state(), EngineState::Idle);
    assert_eq!(engine.active_sources().count(), 0);

    let out = render(&mut engine, 1.0);
    // half way down the two second ramp
    assert_abs_diff_eq!(*out.last().unwrap(), 0.25, epsilon = 0.01);
    assert_eq!(engine.context().unwrap().node_count(), idle_nodes + 3);

    let out = render(&mut engine, 1.5);
    assert_abs_diff_eq!(*out.last().unwrap(), 0.0, epsilon = 1e-6);
    assert_eq!(engine.context().unwrap().node_count(), idle_nodes);
}

#[tokio::test]
async fn stop_without_fade_cuts_at_once() {
    let fetcher = MemoryFetcher::default().with("mem://a.wav", constant_wav(0.5, 1.0));
    let scene = Scene::builder("cut", "Cut")
        .source(AudioSource::new("a", "mem://a.wav", 0.0, 0.0))
        .build()
        .unwrap();

    let mut engine = engine(&fetcher);
    engine.start(&scene).await.unwrap();
    engine.update_mix(FORWARD, &scene, &plain_mix());
    // whole blocks, so nothing rendered before the stop is still waiting in the carry
    render(&mut engine, 0.512);

    engine.stop();
    assert_eq!(engine.context().unwrap().node_count(), 2);
    let out = render(&mut engine, 0.1);
    assert!(out.iter().all(|s| *s == 0.0));
}

#[tokio::test]
async fn failed_assets_are_all_reported() {
    let fetcher = MemoryFetcher::default().with("mem://ok.wav", constant_wav(0.5, 1.0));
    let scene = Scene::builder("broken", "Broken")
        .source(AudioSource::new("ok", "mem://ok.wav", 0.0, 0.0))
        .source(AudioSource::new("gone", "mem://gone.wav", 90.0, 0.0))
        .source(AudioSource::new("lost", "mem://lost.wav", 180.0, 0.0))
        .build()
        .unwrap();

    let mut engine = engine(&fetcher);
    let err = engine.start(&scene).await.unwrap_err();

    let AudioError::Preload(errors) = err else {
        panic!("expected a preload error, got {:?}", err);
    };
    let mut urls: Vec<&str> = errors.iter().filter_map(|e| e.url()).collect();
    urls.sort_unstable();
    assert_eq!(urls, vec!["mem://gone.wav", "mem://lost.wav"]);

    assert_eq!(engine.state(), EngineState::Idle);
    assert_eq!(engine.active_sources().count(), 0);
    // the good asset stays cached for the next attempt
    assert!(engine.cache().contains("mem://ok.wav"));
}

#[tokio::test]
async fn restarting_rebuilds_without_refetching() {
    let fetcher = MemoryFetcher::default().with("mem://a.wav", constant_wav(0.5, 1.0));
    let scene = Scene::builder("again", "Again")
        .source(AudioSource::new("a", "mem://a.wav", 0.0, 0.0))
        .build()
        .unwrap();

    let mut engine = engine(&fetcher);
    engine.start(&scene).await.unwrap();
    engine.start(&scene).await.unwrap();

    assert_eq!(fetcher.requests(), 1);
    assert_eq!(engine.context().unwrap().node_count(), 2 + 3);
    assert_eq!(engine.source_url("a"), Some("mem://a.wav"));
}

#[tokio::test]
async fn hits_boost_the_live_level() {
    let fetcher = MemoryFetcher::default().with("mem://a.wav", constant_wav(0.5, 1.0));
    let scene = Scene::builder("hit", "Hit")
        .source(AudioSource::new("a", "mem://a.wav", 30.0, 0.0))
        .build()
        .unwrap();

    let mut engine = engine(&fetcher);
    engine.start(&scene).await.unwrap();
    engine.update_mix(FORWARD, &scene, &plain_mix());
    render(&mut engine, 0.5);
    let before = engine.mix_gain("a").unwrap();
    assert_abs_diff_eq!(before, 0.5, epsilon = 1e-3);

    engine.on_hit("a");
    render(&mut engine, 0.5);
    assert_abs_diff_eq!(engine.mix_gain("a").unwrap(), 0.75, epsilon = 1e-3);

    // capped at the configured maximum
    engine.on_hit("a");
    render(&mut engine, 0.5);
    assert_abs_diff_eq!(engine.mix_gain("a").unwrap(), 1.0, epsilon = 1e-3);

    engine.on_hit("nobody");
}

#[tokio::test]
async fn master_level_follows_set_master_gain() {
    let fetcher = MemoryFetcher::default().with("mem://a.wav", constant_wav(0.5, 1.0));
    let scene = Scene::builder("m", "M")
        .source(AudioSource::new("a", "mem://a.wav", 0.0, 0.0))
        .build()
        .unwrap();

    let mut engine = engine(&fetcher);
    engine.start(&scene).await.unwrap();
    engine.set_master_gain(0.25).unwrap();
    render(&mut engine, 0.2);
    assert_abs_diff_eq!(engine.context().unwrap().master_gain(), 0.25, epsilon = 1e-3);

    engine.close();
    assert!(engine.context().is_none());
}
