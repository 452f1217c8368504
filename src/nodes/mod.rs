//! Built-in audio nodes.
//!
//! Nodes are organized into three categories:
//!
//! ## Sources ([`source`])
//!
//! Generate audio with no audio inputs:
//! - [`SamplePlayer`] - Play a shared, pre-decoded [`AudioBuffer`](crate::AudioBuffer)
//!
//! ## Effects ([`effect`])
//!
//! Process audio (inputs → outputs):
//! - [`Gain`] - Sums its inputs and applies an automated gain
//!
//! ## Sinks ([`sink`])
//!
//! Consume audio with no audio outputs:
//! - [`CpalSink`] - Output to system audio device (requires `cpal_sink` feature)
//! - [`RtrbSink`] - Write to ring buffer (offline rendering and capture)
//!
//! # Message Types
//!
//! - [`PlayerMessage`] - Start/stop scheduling and looping for [`SamplePlayer`]
//! - [`GainMessage`] - Jumps, exponential approaches and linear ramps for [`Gain`]
//!
//! Sinks have no parameters and use `()` as their message type.

pub mod source;
pub mod effect;
pub mod sink;

// Re-export common types at the top level for convenience
pub use source::{SamplePlayer, PlayerMessage};
pub use effect::{Gain, GainMessage, GainMonitor};
pub use sink::RtrbSink;

#[cfg(feature = "cpal_sink")]
pub use sink::CpalSink;
