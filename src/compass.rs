//! Sector ("compass") playback.
//!
//! The heading circle is cut into eight 45° sectors, each bound to one sound.
//! Turning crossfades from the current sector to the new one; a hysteresis
//! margin and a switch cooldown keep a heading that sits on a boundary from
//! flapping between two sectors.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info, trace, warn};

use crate::assets::AssetCache;
use crate::buffer::AudioBuffer;
use crate::config::CompassConfig;
use crate::context::{AudioContext, Handle};
use crate::error::AudioError;
use crate::nodes::{Gain, GainMessage, GainMonitor, PlayerMessage, SamplePlayer};
use crate::orientation::angular_distance_deg;
use crate::scene::{AudioSource, Scene};

pub const NUM_SECTORS: usize = 8;
/// Width of one sector in degrees.
pub const SECTOR_DEG: f32 = 360.0 / NUM_SECTORS as f32;

/// Extra time a finished one-shot is kept before it is removed
const ONESHOT_RELEASE_MARGIN_SECS: f64 = 0.05;

/// One of the eight compass sectors, clockwise from north.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Sector {
    N,
    NE,
    E,
    SE,
    S,
    SW,
    W,
    NW,
}

impl Sector {
    pub const ALL: [Sector; NUM_SECTORS] = [
        Sector::N,
        Sector::NE,
        Sector::E,
        Sector::SE,
        Sector::S,
        Sector::SW,
        Sector::W,
        Sector::NW,
    ];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Sector> {
        Self::ALL.get(index).copied()
    }

    /// Heading at the middle of the sector (0, 45, ... 315).
    #[inline]
    pub fn center_deg(self) -> f32 {
        self.index() as f32 * SECTOR_DEG
    }

    /// The sector whose centre is nearest to `heading_deg`.
    ///
    /// Any finite heading is accepted and wrapped into `[0, 360)` first.
    pub fn from_heading(heading_deg: f32) -> Sector {
        let h = heading_deg.rem_euclid(360.0);
        let index = (((h + SECTOR_DEG / 2.0) % 360.0) / SECTOR_DEG).floor() as usize;
        Self::ALL[index % NUM_SECTORS]
    }
}

/// How a sector's sound plays.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SectorMode {
    /// Loops continuously, audible only while the sector is selected.
    #[default]
    Loop,
    /// Plays once each time the sector is entered, subject to a cooldown.
    Oneshot,
}

/// The sound bound to one sector.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectorSource {
    pub url: String,
    #[serde(default = "unit_gain")]
    pub gain: f32,
    #[serde(default)]
    pub mode: SectorMode,
}

fn unit_gain() -> f32 {
    1.0
}

impl SectorSource {
    /// A looping sector at unit gain.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            gain: 1.0,
            mode: SectorMode::Loop,
        }
    }

    /// A one-shot sector at unit gain.
    pub fn oneshot(url: impl Into<String>) -> Self {
        Self {
            mode: SectorMode::Oneshot,
            ..Self::new(url)
        }
    }

    pub fn with_gain(mut self, gain: f32) -> Self {
        self.gain = gain;
        self
    }

    /// Bind each sector to the scene source nearest its centre.
    ///
    /// Ties go to the source listed first. Looping sources become
    /// [`SectorMode::Loop`] sectors, the rest [`SectorMode::Oneshot`].
    pub fn bind_scene(scene: &Scene) -> Vec<SectorSource> {
        Sector::ALL
            .iter()
            .filter_map(|sector| {
                let center = sector.center_deg();
                let mut best = None::<(f32, &AudioSource)>;
                for source in scene.sources() {
                    let d = angular_distance_deg(source.azimuth_deg, center);
                    if best.map_or(true, |(best_d, _)| d < best_d) {
                        best = Some((d, source));
                    }
                }
                best.map(|(_, source)| SectorSource {
                    url: source.url.clone(),
                    gain: source.gain,
                    mode: if source.looping { SectorMode::Loop } else { SectorMode::Oneshot },
                })
            })
            .collect()
    }
}

struct SectorChain {
    gain: Handle<GainMessage>,
    level: GainMonitor,
    buffer: Arc<AudioBuffer>,
    looper: Option<Handle<PlayerMessage>>,
}

/// Plays one sound per compass sector and crossfades as the heading turns.
///
/// The engine is built for a single session: [`stop`](Self::stop) releases
/// everything and a new session starts with [`init`](Self::init) again.
pub struct CompassEngine {
    config: CompassConfig,
    sources: Vec<SectorSource>,
    cache: AssetCache,
    context: Option<AudioContext>,
    sectors: Vec<SectorChain>,
    current: Option<Sector>,
    last_change: Option<f64>,
    last_oneshot: [Option<f64>; NUM_SECTORS],
    muted: bool,
}

impl CompassEngine {
    /// Create an engine for exactly eight bindings, in N, NE, E, SE, S, SW, W, NW order.
    pub fn new(sources: Vec<SectorSource>, config: CompassConfig) -> Result<Self, AudioError> {
        Self::with_cache(sources, config, AssetCache::default())
    }

    pub fn with_cache(
        sources: Vec<SectorSource>,
        config: CompassConfig,
        cache: AssetCache,
    ) -> Result<Self, AudioError> {
        if sources.len() != NUM_SECTORS {
            return Err(AudioError::InvalidConfiguration(format!(
                "expected {} sector sources (N, NE, E, SE, S, SW, W, NW), got {}",
                NUM_SECTORS,
                sources.len()
            )));
        }

        Ok(Self {
            config,
            sources,
            cache,
            context: None,
            sectors: Vec::new(),
            current: None,
            last_change: None,
            last_oneshot: [None; NUM_SECTORS],
            muted: false,
        })
    }

    pub fn config(&self) -> &CompassConfig {
        &self.config
    }

    pub fn sources(&self) -> &[SectorSource] {
        &self.sources
    }

    pub fn context(&self) -> Option<&AudioContext> {
        self.context.as_ref()
    }

    pub fn context_mut(&mut self) -> Option<&mut AudioContext> {
        self.context.as_mut()
    }

    fn output_level(&self) -> f32 {
        if self.muted { 0.0 } else { self.config.output_gain }
    }

    /// Create the audio context if it doesn't exist yet.
    pub fn ensure_audio_context(&mut self) -> Result<&mut AudioContext, AudioError> {
        if self.context.is_none() {
            let mut ctx = AudioContext::for_target(self.config.output)?;
            if ctx.master().send(GainMessage::SetGain(self.output_level())).is_err() {
                warn!("master queue full while setting output level");
            }
            self.context = Some(ctx);
        }
        self.context.as_mut().ok_or(AudioError::ContextClosed)
    }

    /// Load all eight sounds and build the sector stages.
    ///
    /// Every sector gets a gain stage resting at 0; loop sectors also get a
    /// looping player that runs from now on, silent until selected.
    pub async fn init(&mut self) -> Result<(), AudioError> {
        self.ensure_audio_context()?;
        self.remove_sectors();

        let buffers = self
            .cache
            .load_all(self.sources.iter().map(|s| s.url.clone()))
            .await?;

        let ctx = self.context.as_mut().ok_or(AudioError::ContextClosed)?;
        let channels = ctx.channels();
        let mut sectors = Vec::with_capacity(NUM_SECTORS);

        for (sector, source) in Sector::ALL.iter().zip(&self.sources) {
            let buffer = buffers.get(&source.url).cloned().ok_or_else(|| {
                AudioError::Playback(format!("missing buffer for {}", source.url))
            })?;

            let stage = Gain::new(0.0).with_channels(channels);
            let level = stage.monitor();
            let gain = ctx.add(stage)?;
            ctx.connect_to_master(&gain)?;

            let looper = match source.mode {
                SectorMode::Loop => {
                    let mut player = ctx.add(SamplePlayer::new(buffer.clone()).looping(true))?;
                    ctx.connect(&player, &gain)?;
                    if player.send(PlayerMessage::Start { delay: 0.0 }).is_err() {
                        debug!("loop for sector {:?} failed to start", sector);
                    }
                    Some(player)
                }
                SectorMode::Oneshot => None,
            };

            sectors.push(SectorChain { gain, level, buffer, looper });
        }
        self.sectors = sectors;

        info!("compass ready with {} sectors", self.sectors.len());
        Ok(())
    }

    /// Start (or restart) the audio clock.
    pub fn resume(&mut self) -> Result<(), AudioError> {
        self.ensure_audio_context()?.resume()
    }

    /// Feed the listener's heading in degrees.
    ///
    /// The first heading selects its sector at once. After that the nearest
    /// sector only takes over when it is closer than the current one by more
    /// than the hysteresis margin, and never sooner than the change cooldown
    /// after the previous switch. Does nothing before [`init`](Self::init).
    pub fn update_heading(&mut self, heading_deg: f32) {
        if self.sectors.is_empty() || !heading_deg.is_finite() {
            return;
        }

        let heading = heading_deg.rem_euclid(360.0);
        let next = Sector::from_heading(heading);

        match self.current {
            None => self.crossfade_to(next),
            Some(current) => {
                let dist_current = angular_distance_deg(heading, current.center_deg());
                let dist_next = angular_distance_deg(heading, next.center_deg());
                if dist_next + self.config.hysteresis_deg < dist_current {
                    self.crossfade_to(next);
                }
            }
        }
    }

    fn crossfade_to(&mut self, next: Sector) {
        if self.current == Some(next) {
            return;
        }
        let Some(ctx) = self.context.as_ref() else {
            return;
        };

        let now = ctx.current_time();
        if let Some(last) = self.last_change {
            if (now - last) * 1000.0 < self.config.change_cooldown_ms as f64 {
                trace!("switch to {:?} held back by cooldown", next);
                return;
            }
        }

        let fade = (self.config.crossfade_ms / 1000.0).max(0.0);

        if let Some(current) = self.current {
            let outgoing = &mut self.sectors[current.index()];
            if outgoing.gain.send(GainMessage::LinearRamp { target: 0.0, duration: fade }).is_err() {
                warn!("sector {:?} queue full, fade-out dropped", current);
            }
        }

        let source = &self.sources[next.index()];
        let target = if self.muted { 0.0 } else { source.gain };
        let incoming = &mut self.sectors[next.index()];
        if incoming.gain.send(GainMessage::LinearRamp { target, duration: fade }).is_err() {
            warn!("sector {:?} queue full, fade-in dropped", next);
        }

        if source.mode == SectorMode::Oneshot {
            let cooled_down = self.last_oneshot[next.index()]
                .map_or(true, |last| (now - last) * 1000.0 > self.config.oneshot_cooldown_ms as f64);
            if cooled_down {
                match fire_oneshot(ctx, incoming) {
                    Ok(()) => self.last_oneshot[next.index()] = Some(now),
                    Err(e) => debug!("one-shot for sector {:?} not fired: {}", next, e),
                }
            }
        }

        debug!("sector {:?} -> {:?} at {:.3}s", self.current, next, now);
        self.current = Some(next);
        self.last_change = Some(now);
    }

    /// Ramp the output toward silence or back to the configured level.
    ///
    /// Sector gains are left alone.
    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
        let level = self.output_level();
        let time_constant = self.config.mute_time_constant;
        if let Some(ctx) = self.context.as_mut() {
            let msg = GainMessage::SetTarget { target: level, time_constant };
            if ctx.master().send(msg).is_err() {
                warn!("master queue full, mute change dropped");
            }
        }
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    /// The selected sector, if any heading has been applied yet.
    pub fn current_sector(&self) -> Option<Sector> {
        self.current
    }

    /// Current level of a sector's gain stage.
    pub fn sector_gain(&self, sector: Sector) -> Option<f32> {
        self.sectors.get(sector.index()).map(|chain| chain.level.get())
    }

    /// Drop every sector chain and forget the selection that went with them
    fn remove_sectors(&mut self) {
        self.current = None;
        self.last_change = None;
        self.last_oneshot = [None; NUM_SECTORS];

        let chains = std::mem::take(&mut self.sectors);
        let Some(ctx) = self.context.as_ref() else {
            return;
        };
        for mut chain in chains {
            if let Some(mut looper) = chain.looper.take() {
                if looper.send(PlayerMessage::Stop { delay: 0.0 }).is_err() {
                    debug!("loop did not take stop message");
                }
                ctx.remove(looper.id());
            }
            ctx.remove(chain.gain.id());
        }
    }

    /// Tear everything down and release the audio context.
    pub fn stop(&mut self) {
        self.remove_sectors();
        if let Some(mut ctx) = self.context.take() {
            ctx.close();
        }
        info!("compass stopped");
    }
}

impl Drop for CompassEngine {
    fn drop(&mut self) {
        if self.context.is_some() {
            self.stop();
        }
    }
}

/// Play a sector's buffer once into its gain stage; the player is removed
/// once it has finished
fn fire_oneshot(ctx: &AudioContext, chain: &SectorChain) -> Result<(), AudioError> {
    let mut player = ctx.add(SamplePlayer::new(chain.buffer.clone()))?;
    ctx.connect(&player, &chain.gain)?;
    player
        .send(PlayerMessage::Start { delay: 0.0 })
        .map_err(|_| AudioError::Playback("one-shot queue full".into()))?;
    ctx.release_after([player.id()], chain.buffer.duration_secs() + ONESHOT_RELEASE_MARGIN_SECS);
    Ok(())
}
