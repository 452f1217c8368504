//! Directional playback engine.
//!
//! Every scene source gets its own chain on the context's graph:
//!
//! ```text
//! SamplePlayer -> envelope Gain -> mix Gain -> master
//! ```
//!
//! The envelope stage shapes fade-in and fade-out, the mix stage follows the
//! listener's facing direction through [`AudioEngine::update_mix`].

use std::sync::Arc;

use glam::Vec3;
use hashbrown::HashMap;
use tracing::{debug, info, trace, warn};

use crate::assets::AssetCache;
use crate::buffer::AudioBuffer;
use crate::config::{clamp_unit, EngineConfig, MixOptions};
use crate::context::{AudioContext, Handle};
use crate::error::AudioError;
use crate::node::BLOCK_SIZE;
use crate::nodes::{Gain, GainMessage, GainMonitor, PlayerMessage, SamplePlayer};
use crate::orientation::{angle_between, directional_gain};
use crate::scene::Scene;

/// Playback lifecycle of an [`AudioEngine`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    /// Assets are loading and chains are being built.
    Preparing,
    Playing,
}

/// Per-source weights and gains for one listener direction.
///
/// `gains[i] = weights[i] * scale * master_gain * sources[i].gain`, where the
/// weight already includes the source gain once.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MixFrame {
    /// Beam weight times source gain, in scene order
    pub weights: Vec<f32>,
    pub sum: f32,
    /// `1 / sum` when normalizing a non-zero sum, else 1
    pub scale: f32,
    /// Final mix-stage gain, in scene order
    pub gains: Vec<f32>,
}

impl MixFrame {
    /// Recompute in place, reusing the existing allocations.
    pub fn compute_into(&mut self, forward: Vec3, scene: &Scene, options: &MixOptions) {
        let options = options.clamped();

        self.weights.clear();
        self.weights.extend(scene.sources().iter().map(|source| {
            let theta = angle_between(source.direction(), forward);
            directional_gain(theta, options.beam_width_deg) * source.gain
        }));

        self.sum = self.weights.iter().sum();
        self.scale = if options.normalize && self.sum > 0.0 { 1.0 / self.sum } else { 1.0 };

        let scale = self.scale;
        self.gains.clear();
        self.gains.extend(
            self.weights
                .iter()
                .zip(scene.sources())
                .map(|(w, source)| w * scale * options.master_gain * source.gain),
        );
    }
}

/// Compute the mix for `forward` without touching any audio graph.
pub fn compute_mix(forward: Vec3, scene: &Scene, options: &MixOptions) -> MixFrame {
    let mut frame = MixFrame::default();
    frame.compute_into(forward, scene, options);
    frame
}

/// Runtime state of one scene source
struct PlaybackNode {
    source_id: String,
    url: String,
    player: Handle<PlayerMessage>,
    envelope: Handle<GainMessage>,
    mix: Handle<GainMessage>,
    envelope_level: GainMonitor,
    mix_level: GainMonitor,
    fade_out_sec: f32,
}

impl PlaybackNode {
    fn ids(&self) -> [crate::NodeId; 3] {
        [self.player.id(), self.envelope.id(), self.mix.id()]
    }
}

/// Plays a scene and mixes it by listener direction.
///
/// The engine owns its [`AudioContext`], created lazily on first use, and a
/// shared [`AssetCache`].
///
/// ```no_run
/// # async fn run(scene: klangfeld::Scene) -> Result<(), klangfeld::AudioError> {
/// use klangfeld::{AudioEngine, EngineConfig, MixOptions};
/// use klangfeld::orientation::FORWARD;
///
/// let mut engine = AudioEngine::new(EngineConfig::default());
/// engine.start(&scene).await?;
///
/// // once per rendered frame
/// engine.update_mix(FORWARD, &scene, &MixOptions::for_scene(&scene, 0.8));
///
/// engine.stop();
/// # Ok(())
/// # }
/// ```
pub struct AudioEngine {
    config: EngineConfig,
    cache: AssetCache,
    context: Option<AudioContext>,
    nodes: Vec<PlaybackNode>,
    by_id: HashMap<String, usize>,
    state: EngineState,
    frame: MixFrame,
}

impl AudioEngine {
    /// Create an engine with its own asset cache.
    pub fn new(config: EngineConfig) -> Self {
        Self::with_cache(config, AssetCache::default())
    }

    /// Create an engine sharing `cache` with other engines.
    pub fn with_cache(config: EngineConfig, cache: AssetCache) -> Self {
        Self {
            config,
            cache,
            context: None,
            nodes: Vec::new(),
            by_id: HashMap::new(),
            state: EngineState::Idle,
            frame: MixFrame::default(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cache(&self) -> &AssetCache {
        &self.cache
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state == EngineState::Playing
    }

    /// The audio context, once created.
    pub fn context(&self) -> Option<&AudioContext> {
        self.context.as_ref()
    }

    pub fn context_mut(&mut self) -> Option<&mut AudioContext> {
        self.context.as_mut()
    }

    /// Create the audio context and master stage if they don't exist yet.
    pub fn ensure_audio_context(&mut self) -> Result<&mut AudioContext, AudioError> {
        if self.context.is_none() {
            let mut ctx = AudioContext::for_target(self.config.output)?;
            let level = clamp_unit(self.config.master_gain);
            if ctx.master().send(GainMessage::SetGain(level)).is_err() {
                warn!("master queue full while setting initial level");
            }
            info!("audio context ready ({} Hz, {} ch)", ctx.sample_rate(), ctx.channels());
            self.context = Some(ctx);
        }
        self.context.as_mut().ok_or(AudioError::ContextClosed)
    }

    /// Smoothly move the master level to `value` (0..=1).
    pub fn set_master_gain(&mut self, value: f32) -> Result<(), AudioError> {
        let time_constant = self.config.master_time_constant;
        let ctx = self.ensure_audio_context()?;
        let msg = GainMessage::SetTarget { target: clamp_unit(value), time_constant };
        if ctx.master().send(msg).is_err() {
            warn!("master queue full, dropped level change");
        }
        Ok(())
    }

    /// Fetch and decode `url` through the shared cache.
    pub async fn decode(&self, url: &str) -> Result<Arc<AudioBuffer>, AudioError> {
        self.cache.decode(url).await
    }

    /// Tear down the current chains, load the scene's assets and build one
    /// chain per source.
    ///
    /// Every asset is attempted; if any fail, [`AudioError::Preload`] carries
    /// all the failures and no chain is built.
    pub async fn prepare_graph(&mut self, scene: &Scene) -> Result<(), AudioError> {
        self.ensure_audio_context()?;
        self.teardown();

        let buffers = self.cache.load_all(scene.urls()).await?;

        let ctx = self.context.as_mut().ok_or(AudioError::ContextClosed)?;
        let channels = ctx.channels();

        for source in scene.sources() {
            let buffer = buffers.get(&source.url).cloned().ok_or_else(|| {
                AudioError::Playback(format!("missing buffer for {}", source.url))
            })?;

            let fade_in = source.fade_in();
            let envelope_stage = Gain::new(if fade_in > 0.0 { 0.0 } else { 1.0 }).with_channels(channels);
            let envelope_level = envelope_stage.monitor();
            let mix_stage = Gain::new(0.0).with_channels(channels);
            let mix_level = mix_stage.monitor();

            let player = ctx.add(SamplePlayer::new(buffer).looping(source.looping))?;
            let mut envelope = ctx.add(envelope_stage)?;
            let mix = ctx.add(mix_stage)?;
            ctx.connect(&player, &envelope)?;
            ctx.connect(&envelope, &mix)?;
            ctx.connect_to_master(&mix)?;

            if fade_in > 0.0 {
                let ramp = GainMessage::LinearRamp { target: 1.0, duration: fade_in };
                if envelope.send(ramp).is_err() {
                    warn!("envelope queue full, {} will not fade in", source.id);
                }
            }

            self.by_id.insert(source.id.clone(), self.nodes.len());
            self.nodes.push(PlaybackNode {
                source_id: source.id.clone(),
                url: source.url.clone(),
                player,
                envelope,
                mix,
                envelope_level,
                mix_level,
                fade_out_sec: source.fade_out(),
            });
        }

        debug!("prepared {} chains for scene {}", self.nodes.len(), scene.id());
        Ok(())
    }

    /// Remove every chain immediately
    fn teardown(&mut self) {
        let Some(ctx) = self.context.as_ref() else {
            self.nodes.clear();
            self.by_id.clear();
            return;
        };

        for mut node in self.nodes.drain(..) {
            if node.player.send(PlayerMessage::Stop { delay: 0.0 }).is_err() {
                debug!("could not stop {}, removing anyway", node.source_id);
            }
            for id in node.ids() {
                ctx.remove(id);
            }
        }
        self.by_id.clear();
    }

    /// Build the scene and start every source together.
    ///
    /// Playback begins `start_lead_secs` after the call so that all sources
    /// share the same first frame. Calling this while playing rebuilds
    /// everything.
    pub async fn start(&mut self, scene: &Scene) -> Result<(), AudioError> {
        self.ensure_audio_context()?.resume()?;
        self.state = EngineState::Preparing;

        if let Err(e) = self.prepare_graph(scene).await {
            self.state = EngineState::Idle;
            return Err(e);
        }

        let lead = self.config.start_lead_secs.max(0.0);
        for node in &mut self.nodes {
            if node.player.send(PlayerMessage::Start { delay: lead }).is_err() {
                debug!("source {} failed to start, skipping", node.source_id);
            }
        }

        self.state = EngineState::Playing;
        info!("playing scene {} ({} sources)", scene.id(), self.nodes.len());
        Ok(())
    }

    /// Stop every source, fading out those that ask for it.
    ///
    /// A source with a fade-out ramps its envelope from wherever it is down to
    /// 0 and stops right after; its chain is released once the ramp is done.
    /// Sources without one are cut and removed at once.
    pub fn stop(&mut self) {
        let Some(ctx) = self.context.as_ref() else {
            self.state = EngineState::Idle;
            return;
        };

        let block_secs = BLOCK_SIZE as f64 / ctx.sample_rate() as f64;
        let margin = self.config.release_margin_secs.max(0.0);

        for mut node in self.nodes.drain(..) {
            let fade = node.fade_out_sec;
            if fade > 0.0 {
                let ramp = GainMessage::LinearRamp { target: 0.0, duration: fade };
                if node.envelope.send(ramp).is_err() {
                    debug!("envelope queue full for {}", node.source_id);
                }
                let stop = PlayerMessage::Stop { delay: fade as f64 + block_secs };
                if node.player.send(stop).is_err() {
                    debug!("could not schedule stop for {}", node.source_id);
                }
                ctx.release_after(node.ids(), fade as f64 + block_secs + margin);
            } else {
                if node.player.send(PlayerMessage::Stop { delay: 0.0 }).is_err() {
                    debug!("could not stop {}", node.source_id);
                }
                for id in node.ids() {
                    ctx.remove(id);
                }
            }
        }
        self.by_id.clear();

        self.state = EngineState::Idle;
        info!("playback stopped");
    }

    /// Retarget every mix stage for the listener facing `forward`.
    ///
    /// Cheap enough to call every rendered frame: no graph changes and no
    /// allocation once the first frame has been mixed. Does nothing before a
    /// context exists.
    pub fn update_mix(&mut self, forward: Vec3, scene: &Scene, options: &MixOptions) {
        if self.context.is_none() {
            return;
        }

        self.frame.compute_into(forward, scene, options);
        let time_constant = self.config.mix_time_constant;

        for (source, &gain) in scene.sources().iter().zip(&self.frame.gains) {
            let Some(&i) = self.by_id.get(source.id.as_str()) else {
                continue;
            };
            let msg = GainMessage::SetTarget { target: gain, time_constant };
            if self.nodes[i].mix.send(msg).is_err() {
                trace!("mix queue full for {}", source.id);
            }
        }
        trace!("mix sum {:.3} scale {:.3}", self.frame.sum, self.frame.scale);
    }

    /// The mix computed by the last [`update_mix`](Self::update_mix).
    pub fn last_mix(&self) -> &MixFrame {
        &self.frame
    }

    /// Briefly lift a source: its *current* mix gain times `factor`, capped at
    /// `max_gain`.
    ///
    /// Reads the live, already time-varying gain, so repeated boosts compound
    /// until the next [`update_mix`](Self::update_mix) pulls the level back.
    pub fn boost_source(&mut self, source_id: &str, factor: f32, max_gain: f32) {
        if self.context.is_none() {
            return;
        }
        let Some(&i) = self.by_id.get(source_id) else {
            trace!("boost for unknown source {}", source_id);
            return;
        };

        let node = &mut self.nodes[i];
        let target = (node.mix_level.get() * factor).min(max_gain);
        if !target.is_finite() {
            return;
        }
        let msg = GainMessage::SetTarget {
            target,
            time_constant: self.config.mix_time_constant,
        };
        if node.mix.send(msg).is_err() {
            trace!("mix queue full for {}", source_id);
        }
        debug!("boosted {} to {:.3}", source_id, target);
    }

    /// Hit callback for the host's pointer/ray collaborator.
    pub fn on_hit(&mut self, source_id: &str) {
        let boost = self.config.hit_boost;
        self.boost_source(source_id, boost.factor, boost.max_gain);
    }

    /// Current level of a source's mix stage.
    pub fn mix_gain(&self, source_id: &str) -> Option<f32> {
        self.by_id.get(source_id).map(|&i| self.nodes[i].mix_level.get())
    }

    /// Current level of a source's envelope stage.
    pub fn envelope_gain(&self, source_id: &str) -> Option<f32> {
        self.by_id.get(source_id).map(|&i| self.nodes[i].envelope_level.get())
    }

    /// Ids of the sources with a live chain, in scene order.
    pub fn active_sources(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|n| n.source_id.as_str())
    }

    /// URL a live source is playing.
    pub fn source_url(&self, source_id: &str) -> Option<&str> {
        self.by_id.get(source_id).map(|&i| self.nodes[i].url.as_str())
    }

    /// Tear everything down and release the audio context.
    pub fn close(&mut self) {
        self.teardown();
        if let Some(mut ctx) = self.context.take() {
            ctx.close();
        }
        self.state = EngineState::Idle;
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        self.close();
    }
}
