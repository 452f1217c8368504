//! Source nodes - generate audio

mod player;

pub use player::{SamplePlayer, PlayerMessage};
