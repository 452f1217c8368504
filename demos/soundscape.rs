//! Play a scene file and slowly turn the listener in a full circle.
//!
//! ```sh
//! cargo run --example soundscape --features cpal_sink -- scene.json
//! ```

use std::time::{Duration, Instant};

use klangfeld::orientation::spherical_to_direction;
use klangfeld::{EngineConfig, Scene, Session};
use tracing::info;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "klangfeld=debug".into()),
        )
        .init();

    let path = std::env::args().nth(1).ok_or("usage: soundscape <scene.json>")?;
    let scene = Scene::from_json_str(&std::fs::read_to_string(path)?)?;
    info!("loaded {} ({} sources)", scene.name(), scene.sources().len());

    let mut session = Session::default();
    session.set_scene(scene.clone());

    let mut engine = session.audio_engine(EngineConfig::default());
    engine.start(&scene).await?;

    // one turn every 20 seconds, mixed at 60 fps
    let started = Instant::now();
    let frame = Duration::from_millis(16);
    while started.elapsed() < Duration::from_secs(20) {
        let heading = started.elapsed().as_secs_f32() / 20.0 * 360.0 - 180.0;
        engine.update_mix(spherical_to_direction(heading, 0.0), &scene, &session.mix_options());
        tokio::time::sleep(frame).await;
    }

    engine.stop();
    // let fade-outs finish
    tokio::time::sleep(Duration::from_secs(3)).await;
    Ok(())
}
