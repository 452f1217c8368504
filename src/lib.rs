//! Directional soundscape mixing on a lock-free audio graph.
//!
//! A [`Scene`] places looping or one-shot sounds around a listener on a
//! sphere. Two playback strategies mix it:
//!
//! - [`AudioEngine`] weighs every source by the angle between the listener's
//!   facing direction and the source, through a raised-cosine beam.
//! - [`CompassEngine`] cuts the heading circle into eight sectors and
//!   crossfades between them as the listener turns.
//!
//! Both run on an [`AudioContext`]: a block-based graph of message-driven
//! [`AudioNode`]s feeding either an output device (`cpal_sink` feature) or an
//! in-memory render target.

mod graph;
mod node;

pub mod assets;
pub mod buffer;
pub mod compass;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod nodes;
pub mod orientation;
pub mod scene;
pub mod session;

#[cfg(feature = "cpal_sink")]
mod device;

pub use assets::{AssetCache, Fetch, HttpFetcher};
pub use buffer::AudioBuffer;
pub use compass::{CompassEngine, Sector, SectorMode, SectorSource};
pub use config::{CompassConfig, EngineConfig, HitBoost, MixOptions, OutputTarget};
pub use context::{AudioContext, ContextState, Handle};
pub use engine::{compute_mix, AudioEngine, EngineState, MixFrame};
pub use error::AudioError;
pub use node::{AudioNode, NodeId, ProcessContext, BLOCK_SIZE};
pub use scene::{AudioSource, Scene, SceneError};
pub use session::Session;

#[cfg(feature = "cpal_sink")]
pub use device::CpalDevice;
