//! Bind a scene to the eight compass sectors and sweep the heading.
//!
//! ```sh
//! cargo run --example compass --features cpal_sink -- scene.json
//! ```

use std::time::Duration;

use klangfeld::{CompassConfig, Scene, Session};
use tracing::info;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "klangfeld=debug".into()),
        )
        .init();

    let path = std::env::args().nth(1).ok_or("usage: compass <scene.json>")?;
    let scene = Scene::from_json_str(&std::fs::read_to_string(path)?)?;

    let mut session = Session::default();
    session.set_scene(scene);

    let mut compass = session.compass_engine(CompassConfig::default())?;
    compass.init().await?;
    compass.resume()?;

    // jittery heading walking clockwise in 5° steps
    let mut heading = 0.0f32;
    for step in 0..288 {
        let jitter = if step % 2 == 0 { 3.0 } else { -3.0 };
        compass.update_heading(heading + jitter);
        if let Some(sector) = compass.current_sector() {
            info!("heading {:>5.1}° -> {:?}", heading, sector);
        }
        heading = (heading + 5.0) % 360.0;

        if step == 144 {
            compass.set_muted(true);
        } else if step == 180 {
            compass.set_muted(false);
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    compass.stop();
    Ok(())
}
