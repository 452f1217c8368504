//! Audio sample player.

use std::sync::Arc;

use dasp_graph::{Buffer, Input};

use crate::buffer::AudioBuffer;
use crate::node::{AudioNode, ProcessContext};

/// Messages to control a [`SamplePlayer`].
///
/// Delays are in seconds, counted from the start of the block the message is
/// drained in. Messages sent together are drained together, so players started
/// with the same delay in one burst begin on the same frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PlayerMessage {
    /// Begin playback after `delay`. Ignored once the player has started.
    Start { delay: f64 },
    /// End playback after `delay`. A stopped player never plays again.
    Stop { delay: f64 },
    /// Enable or disable looping.
    SetLooping(bool),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PlayState {
    Idle,
    Playing,
    Finished,
}

/// Plays a shared, pre-decoded [`AudioBuffer`].
///
/// A player is a one-shot generator: it waits for [`PlayerMessage::Start`],
/// plays (optionally looping) and finishes for good on [`PlayerMessage::Stop`]
/// or at the end of a non-looping buffer. Buffers recorded at a different rate
/// than the graph are read with linear interpolation.
pub struct SamplePlayer {
    buffer: Arc<AudioBuffer>,
    /// Read position in source frames
    position: f64,
    looping: bool,
    state: PlayState,
    start_in: Option<u64>,
    stop_in: Option<u64>,
}

impl SamplePlayer {
    /// Create an idle player for `buffer`.
    pub fn new(buffer: Arc<AudioBuffer>) -> Self {
        Self {
            buffer,
            position: 0.0,
            looping: false,
            state: PlayState::Idle,
            start_in: None,
            stop_in: None,
        }
    }

    /// Enable or disable looping.
    ///
    /// When enabled, playback wraps to the beginning when it reaches the end.
    pub fn set_looping(&mut self, looping: bool) {
        self.looping = looping;
    }

    /// Builder form of [`set_looping`](Self::set_looping).
    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    #[inline]
    pub fn buffer(&self) -> &Arc<AudioBuffer> {
        &self.buffer
    }

    /// Check if playback is currently active.
    #[inline]
    pub fn is_playing(&self) -> bool {
        self.state == PlayState::Playing
    }

    fn handle(&mut self, msg: PlayerMessage, ctx: &ProcessContext) {
        match msg {
            PlayerMessage::Start { delay } => {
                if self.state == PlayState::Idle && self.start_in.is_none() {
                    self.start_in = Some(ctx.frames(delay));
                }
            }
            PlayerMessage::Stop { delay } => {
                let frames = ctx.frames(delay);
                self.stop_in = Some(self.stop_in.map_or(frames, |pending| pending.min(frames)));
            }
            PlayerMessage::SetLooping(l) => self.looping = l,
        }
    }

    /// Run the start/stop countdowns for one frame
    #[inline]
    fn advance_schedule(&mut self) {
        if let Some(remaining) = self.stop_in {
            if remaining == 0 {
                self.state = PlayState::Finished;
                self.stop_in = None;
                self.start_in = None;
            } else {
                self.stop_in = Some(remaining - 1);
            }
        }

        if self.state == PlayState::Idle {
            if let Some(remaining) = self.start_in {
                if remaining == 0 {
                    self.state = PlayState::Playing;
                    self.start_in = None;
                } else {
                    self.start_in = Some(remaining - 1);
                }
            }
        }
    }
}

impl AudioNode for SamplePlayer {
    type Message = PlayerMessage;

    fn process(
        &mut self,
        ctx: &ProcessContext,
        messages: impl Iterator<Item = PlayerMessage>,
        _inputs: &[Input],
        outputs: &mut [Buffer],
    ) {
        for msg in messages {
            self.handle(msg, ctx);
        }

        if outputs.is_empty() {
            return;
        }

        // Fast path: finished, nothing pending - output silence
        if self.state == PlayState::Finished {
            for buffer in outputs.iter_mut() {
                buffer.iter_mut().for_each(|s| *s = 0.0);
            }
            return;
        }

        let buffer_len = outputs[0].len();
        let frames = self.buffer.frames();
        let src_channels = self.buffer.channels();
        let buffer = self.buffer.clone();
        let samples = buffer.samples();
        let step = self.buffer.sample_rate() as f64 / ctx.sample_rate as f64;

        for i in 0..buffer_len {
            self.advance_schedule();

            if self.state != PlayState::Playing || frames == 0 {
                if frames == 0 && self.state == PlayState::Playing {
                    self.state = PlayState::Finished;
                }
                for buffer in outputs.iter_mut() {
                    buffer[i] = 0.0;
                }
                continue;
            }

            let index = self.position as usize;
            let frac = (self.position - index as f64) as f32;
            let next = if index + 1 < frames {
                index + 1
            } else if self.looping {
                0
            } else {
                index
            };

            // Map output channel to source channel (wrap if more outputs than source)
            for (ch, buffer) in outputs.iter_mut().enumerate() {
                let src_ch = ch % src_channels;
                let a = samples[index * src_channels + src_ch];
                let b = samples[next * src_channels + src_ch];
                buffer[i] = a + frac * (b - a);
            }

            self.position += step;
            if self.position >= frames as f64 {
                if self.looping {
                    self.position %= frames as f64;
                } else {
                    self.state = PlayState::Finished;
                }
            }
        }
    }

    #[inline]
    fn num_inputs(&self) -> usize { 0 }

    #[inline]
    fn num_outputs(&self) -> usize {
        self.buffer.channels().min(2)
    }
}
