//! Engine configuration.
//!
//! Every config type has sensible defaults, builder-style setters, and can be
//! deserialized from JSON with any subset of fields present.

use serde::Deserialize;

use crate::orientation::clamp_beam_width;
use crate::scene::Scene;

/// Where an engine sends its audio.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum OutputTarget {
    /// The system's default output device.
    #[default]
    Device,
    /// An in-memory render target, driven by [`AudioContext::render`](crate::AudioContext::render).
    #[serde(rename_all = "camelCase")]
    Offline { sample_rate: u32, channels: usize },
}

/// Per-frame mixing parameters for directional mode.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MixOptions {
    /// Beam width in degrees, 5..=180
    pub beam_width_deg: f32,
    /// Keep the summed beam weight at 1
    pub normalize: bool,
    /// 0..=1
    pub master_gain: f32,
}

impl Default for MixOptions {
    fn default() -> Self {
        Self {
            beam_width_deg: 60.0,
            normalize: true,
            master_gain: 0.8,
        }
    }
}

impl MixOptions {
    /// Defaults overridden by the scene's own globals.
    pub fn for_scene(scene: &Scene, master_gain: f32) -> Self {
        let defaults = Self::default();
        Self {
            beam_width_deg: scene.beam_width_deg().unwrap_or(defaults.beam_width_deg),
            normalize: scene.normalize().unwrap_or(defaults.normalize),
            master_gain,
        }
    }

    pub fn with_beam_width(mut self, deg: f32) -> Self {
        self.beam_width_deg = deg;
        self
    }

    pub fn with_normalize(mut self, normalize: bool) -> Self {
        self.normalize = normalize;
        self
    }

    pub fn with_master_gain(mut self, gain: f32) -> Self {
        self.master_gain = gain;
        self
    }

    /// The same options with every value forced into range.
    pub fn clamped(self) -> Self {
        Self {
            beam_width_deg: clamp_beam_width(self.beam_width_deg),
            normalize: self.normalize,
            master_gain: clamp_unit(self.master_gain),
        }
    }
}

/// Clamp into `0..=1`, mapping NaN to 0.
#[inline]
pub(crate) fn clamp_unit(v: f32) -> f32 {
    if v.is_nan() { 0.0 } else { v.clamp(0.0, 1.0) }
}

/// Transient "hit" boost applied by [`AudioEngine::on_hit`](crate::AudioEngine::on_hit).
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HitBoost {
    pub factor: f32,
    pub max_gain: f32,
}

impl Default for HitBoost {
    fn default() -> Self {
        Self { factor: 1.5, max_gain: 1.0 }
    }
}

/// Settings for [`AudioEngine`](crate::AudioEngine).
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    pub output: OutputTarget,
    /// Master level the context starts at
    pub master_gain: f32,
    /// Delay between `start` and the first sample, shared by every source
    pub start_lead_secs: f64,
    /// Smoothing applied to per-frame mix changes
    pub mix_time_constant: f32,
    /// Smoothing applied to master level changes
    pub master_time_constant: f32,
    /// Extra time a faded-out chain is kept alive after its ramp ends
    pub release_margin_secs: f64,
    pub hit_boost: HitBoost,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            output: OutputTarget::Device,
            master_gain: 0.8,
            start_lead_secs: 0.05,
            mix_time_constant: 0.02,
            master_time_constant: 0.01,
            release_margin_secs: 0.05,
            hit_boost: HitBoost::default(),
        }
    }
}

impl EngineConfig {
    /// Defaults rendering into an offline context.
    pub fn offline(sample_rate: u32, channels: usize) -> Self {
        Self::default().with_output(OutputTarget::Offline { sample_rate, channels })
    }

    pub fn with_output(mut self, output: OutputTarget) -> Self {
        self.output = output;
        self
    }

    pub fn with_master_gain(mut self, gain: f32) -> Self {
        self.master_gain = gain;
        self
    }

    pub fn with_start_lead(mut self, secs: f64) -> Self {
        self.start_lead_secs = secs;
        self
    }

    pub fn with_hit_boost(mut self, factor: f32, max_gain: f32) -> Self {
        self.hit_boost = HitBoost { factor, max_gain };
        self
    }
}

/// Settings for [`CompassEngine`](crate::CompassEngine).
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CompassConfig {
    pub output: OutputTarget,
    pub crossfade_ms: f32,
    pub hysteresis_deg: f32,
    /// Minimum time between two sector switches
    pub change_cooldown_ms: f32,
    /// Minimum time between two triggers of the same one-shot sector
    pub oneshot_cooldown_ms: f32,
    /// Master level when unmuted
    pub output_gain: f32,
    pub mute_time_constant: f32,
}

impl Default for CompassConfig {
    fn default() -> Self {
        Self {
            output: OutputTarget::Device,
            crossfade_ms: 220.0,
            hysteresis_deg: 10.0,
            change_cooldown_ms: 300.0,
            oneshot_cooldown_ms: 1500.0,
            output_gain: 1.0,
            mute_time_constant: 0.02,
        }
    }
}

impl CompassConfig {
    pub fn offline(sample_rate: u32, channels: usize) -> Self {
        Self::default().with_output(OutputTarget::Offline { sample_rate, channels })
    }

    pub fn with_output(mut self, output: OutputTarget) -> Self {
        self.output = output;
        self
    }

    pub fn with_crossfade_ms(mut self, ms: f32) -> Self {
        self.crossfade_ms = ms;
        self
    }

    pub fn with_hysteresis_deg(mut self, deg: f32) -> Self {
        self.hysteresis_deg = deg;
        self
    }

    pub fn with_change_cooldown_ms(mut self, ms: f32) -> Self {
        self.change_cooldown_ms = ms;
        self
    }

    pub fn with_oneshot_cooldown_ms(mut self, ms: f32) -> Self {
        self.oneshot_cooldown_ms = ms;
        self
    }

    pub fn with_output_gain(mut self, gain: f32) -> Self {
        self.output_gain = gain;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::AudioSource;

    #[test]
    fn partial_json_keeps_defaults() {
        let config: CompassConfig = serde_json::from_str(r#"{ "crossfadeMs": 500 }"#).unwrap();
        assert_eq!(config.crossfade_ms, 500.0);
        assert_eq!(config.hysteresis_deg, 10.0);
        assert_eq!(config.output, OutputTarget::Device);

        let config: EngineConfig = serde_json::from_str(
            r#"{ "output": { "kind": "offline", "sampleRate": 8000, "channels": 1 } }"#,
        )
        .unwrap();
        assert_eq!(config.output, OutputTarget::Offline { sample_rate: 8000, channels: 1 });
        assert_eq!(config.master_gain, 0.8);
    }

    #[test]
    fn scene_globals_override_mix_defaults() {
        let scene = Scene::builder("s", "n")
            .beam_width_deg(90.0)
            .source(AudioSource::new("a", "https://x.test/a.ogg", 0.0, 0.0))
            .build()
            .unwrap();
        let options = MixOptions::for_scene(&scene, 0.5);
        assert_eq!(options.beam_width_deg, 90.0);
        assert!(options.normalize);
        assert_eq!(options.master_gain, 0.5);
    }

    #[test]
    fn clamped_forces_range() {
        let options = MixOptions::default()
            .with_beam_width(1.0)
            .with_master_gain(f32::NAN)
            .clamped();
        assert_eq!(options.beam_width_deg, 5.0);
        assert_eq!(options.master_gain, 0.0);
    }
}
