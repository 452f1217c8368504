//! Core node trait and context types.

use dasp_graph::{Buffer, Input};

/// Number of frames processed per block.
///
/// Fixed by `dasp_graph`'s [`Buffer`] length.
pub const BLOCK_SIZE: usize = 64;

/// Information available during audio processing.
///
/// Passed to every [`AudioNode::process`] call. Contains the graph's sample rate
/// and the buffer size (always [`BLOCK_SIZE`] frames).
#[derive(Clone, Copy, Debug)]
pub struct ProcessContext {
    /// Sample rate of the graph in Hz (e.g., 44100, 48000)
    pub sample_rate: u32,
    /// Number of frames per buffer
    pub buffer_size: usize,
}

impl ProcessContext {
    /// Convert a duration in seconds to a whole number of frames at this rate.
    #[inline]
    pub fn frames(&self, secs: f64) -> u64 {
        if secs.is_finite() && secs > 0.0 {
            (secs * self.sample_rate as f64).round() as u64
        } else {
            0
        }
    }
}

/// Unique identifier for a node within a graph.
///
/// Ids are never reused, so an id that outlived its node simply stops resolving.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct NodeId(pub(crate) u32);

/// The core trait for audio processing nodes.
///
/// Nodes can be:
/// - **Sources**: Generate audio (0 inputs, 1+ outputs) - sample players
/// - **Effects**: Process audio (1+ inputs, 1+ outputs) - gain stages
/// - **Sinks**: Consume audio (1+ inputs, 0 outputs) - device outputs, captures
///
/// # Message-Based Parameters
///
/// Nodes never share mutable state with the control side. Parameter changes and
/// scheduling requests arrive as messages, drained at the start of each block:
///
/// ```
/// use klangfeld::{AudioNode, ProcessContext};
/// use dasp_graph::{Buffer, Input};
///
/// enum DcMessage {
///     SetLevel(f32),
/// }
///
/// struct Dc {
///     level: f32,
/// }
///
/// impl AudioNode for Dc {
///     type Message = DcMessage;
///
///     fn process(
///         &mut self,
///         _ctx: &ProcessContext,
///         messages: impl Iterator<Item = DcMessage>,
///         _inputs: &[Input],
///         outputs: &mut [Buffer],
///     ) {
///         for msg in messages {
///             match msg {
///                 DcMessage::SetLevel(l) => self.level = l,
///             }
///         }
///
///         for buffer in outputs.iter_mut() {
///             buffer.iter_mut().for_each(|s| *s = self.level);
///         }
///     }
/// }
/// ```
pub trait AudioNode: Send + 'static {
    /// Message type for parameter updates.
    ///
    /// Use a custom enum for nodes with parameters, or `()` for nodes without.
    type Message: Send + 'static;

    /// Process one block of audio.
    ///
    /// Called once per block. Implementations should:
    /// 1. Drain and handle all pending messages
    /// 2. Read from `inputs` (if any)
    /// 3. Write every sample of `outputs`
    fn process(
        &mut self,
        ctx: &ProcessContext,
        messages: impl Iterator<Item = Self::Message>,
        inputs: &[Input],
        outputs: &mut [Buffer],
    );

    /// Number of audio input channels (0 for sources).
    fn num_inputs(&self) -> usize { 0 }

    /// Number of audio output channels.
    fn num_outputs(&self) -> usize { 1 }
}
