//! Decoded audio held in memory.

/// Interleaved `f32` samples at a fixed sample rate.
///
/// Buffers are immutable once decoded and shared between players through an
/// `Arc`, so any number of sources can play the same asset.
#[derive(Clone, Debug, PartialEq)]
pub struct AudioBuffer {
    samples: Vec<f32>,
    channels: usize,
    sample_rate: u32,
}

impl AudioBuffer {
    /// Wrap interleaved samples.
    ///
    /// A trailing partial frame is dropped.
    pub fn new(mut samples: Vec<f32>, channels: usize, sample_rate: u32) -> Self {
        let channels = channels.max(1);
        samples.truncate(samples.len() - samples.len() % channels);
        Self {
            samples,
            channels,
            sample_rate: sample_rate.max(1),
        }
    }

    /// Number of frames (samples per channel).
    #[inline]
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.channels
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Interleaved sample data.
    #[inline]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Playback length in seconds at the buffer's own rate.
    pub fn duration_secs(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_frames_are_dropped() {
        let buffer = AudioBuffer::new(vec![0.0; 5], 2, 48_000);
        assert_eq!(buffer.frames(), 2);
        assert_eq!(buffer.samples().len(), 4);
    }

    #[test]
    fn duration_follows_own_rate() {
        let buffer = AudioBuffer::new(vec![0.0; 22_050 * 2], 2, 22_050);
        assert_eq!(buffer.duration_secs(), 1.0);
    }
}
