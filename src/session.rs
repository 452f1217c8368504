//! Session state shared by the host and both engines.

use crate::assets::AssetCache;
use crate::compass::{CompassEngine, SectorSource};
use crate::config::{clamp_unit, CompassConfig, EngineConfig, MixOptions};
use crate::engine::AudioEngine;
use crate::error::AudioError;
use crate::orientation::clamp_beam_width;
use crate::scene::Scene;

/// What is loaded and how it is mixed.
///
/// Owned by the host and handed to the engines explicitly; engines never keep
/// a reference to it.
#[derive(Debug, Default)]
pub struct Session {
    scene: Option<Scene>,
    mix: MixOptions,
    cache: AssetCache,
}

impl Session {
    pub fn new(cache: AssetCache) -> Self {
        Self {
            scene: None,
            mix: MixOptions::default(),
            cache,
        }
    }

    pub fn scene(&self) -> Option<&Scene> {
        self.scene.as_ref()
    }

    /// Load a scene, adopting its beam width and normalization if it sets them.
    pub fn set_scene(&mut self, scene: Scene) {
        if let Some(deg) = scene.beam_width_deg() {
            self.set_beam_width_deg(deg);
        }
        if let Some(normalize) = scene.normalize() {
            self.mix.normalize = normalize;
        }
        self.scene = Some(scene);
    }

    pub fn clear_scene(&mut self) -> Option<Scene> {
        self.scene.take()
    }

    pub fn set_beam_width_deg(&mut self, deg: f32) {
        self.mix.beam_width_deg = clamp_beam_width(deg);
    }

    pub fn set_normalize(&mut self, normalize: bool) {
        self.mix.normalize = normalize;
    }

    pub fn set_master_gain(&mut self, gain: f32) {
        self.mix.master_gain = clamp_unit(gain);
    }

    /// Options to pass to [`AudioEngine::update_mix`].
    pub fn mix_options(&self) -> MixOptions {
        self.mix
    }

    pub fn cache(&self) -> &AssetCache {
        &self.cache
    }

    /// A directional engine sharing this session's asset cache.
    pub fn audio_engine(&self, config: EngineConfig) -> AudioEngine {
        let config = config.with_master_gain(self.mix.master_gain);
        AudioEngine::with_cache(config, self.cache.clone())
    }

    /// A compass engine bound to the current scene.
    pub fn compass_engine(&self, config: CompassConfig) -> Result<CompassEngine, AudioError> {
        let scene = self
            .scene
            .as_ref()
            .ok_or_else(|| AudioError::InvalidConfiguration("no scene loaded".into()))?;
        CompassEngine::with_cache(SectorSource::bind_scene(scene), config, self.cache.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::AudioSource;

    #[test]
    fn scene_globals_are_adopted() {
        let mut session = Session::default();
        session.set_scene(
            Scene::builder("s", "n")
                .beam_width_deg(120.0)
                .normalize(false)
                .source(AudioSource::new("a", "https://x.test/a.ogg", 0.0, 0.0))
                .build()
                .unwrap(),
        );
        let options = session.mix_options();
        assert_eq!(options.beam_width_deg, 120.0);
        assert!(!options.normalize);
        assert_eq!(options.master_gain, 0.8);
    }

    #[test]
    fn setters_clamp() {
        let mut session = Session::default();
        session.set_beam_width_deg(1000.0);
        session.set_master_gain(-1.0);
        assert_eq!(session.mix_options().beam_width_deg, 180.0);
        assert_eq!(session.mix_options().master_gain, 0.0);
    }

    #[test]
    fn compass_needs_a_scene() {
        let session = Session::default();
        assert!(matches!(
            session.compass_engine(CompassConfig::default()),
            Err(AudioError::InvalidConfiguration(_))
        ));
    }
}
