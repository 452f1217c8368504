//! Gain stage with scheduled automation

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use dasp_graph::{Buffer, Input};

use crate::node::{AudioNode, ProcessContext, BLOCK_SIZE};

/// Messages to control a [`Gain`] stage.
///
/// Every message takes effect at the start of the block it is drained in and
/// replaces whatever automation was running.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum GainMessage {
    /// Jump to a value immediately.
    SetGain(f32),
    /// Approach `target` exponentially from the current value.
    ///
    /// After `time_constant` seconds the value has covered ~63% of the distance.
    SetTarget { target: f32, time_constant: f32 },
    /// Hold the current value, then move linearly to `target` over `duration` seconds.
    LinearRamp { target: f32, duration: f32 },
}

/// Read-only view of a [`Gain`] stage's current value.
///
/// Updated once per block from the audio side; reading never blocks.
#[derive(Clone, Debug)]
pub struct GainMonitor(Arc<AtomicU32>);

impl GainMonitor {
    fn new(value: f32) -> Self {
        Self(Arc::new(AtomicU32::new(value.to_bits())))
    }

    /// The gain applied at the end of the most recently processed block.
    #[inline]
    pub fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    #[inline]
    fn set(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

#[derive(Clone, Copy, Debug)]
enum Automation {
    Hold,
    Approach { target: f32, coeff: f32 },
    Ramp { start: f32, target: f32, elapsed: u64, total: u64 },
}

/// Sums every input and scales the result by an automated gain.
///
/// Inputs with fewer channels than the stage are upmixed (mono feeds every
/// output channel). With no inputs connected the stage outputs silence, but its
/// automation keeps running on the graph clock.
pub struct Gain {
    value: f32,
    automation: Automation,
    channels: usize,
    monitor: GainMonitor,
}

impl Gain {
    /// Create a stereo gain stage resting at `gain`.
    pub fn new(gain: f32) -> Self {
        let gain = sanitize(gain);
        Self {
            value: gain,
            automation: Automation::Hold,
            channels: 2,
            monitor: GainMonitor::new(gain),
        }
    }

    /// Set the number of output channels.
    pub fn with_channels(mut self, channels: usize) -> Self {
        self.channels = channels.max(1);
        self
    }

    /// A monitor that follows this stage once it is running in a graph.
    pub fn monitor(&self) -> GainMonitor {
        self.monitor.clone()
    }

    #[inline]
    pub fn gain(&self) -> f32 {
        self.value
    }

    fn handle(&mut self, msg: GainMessage, ctx: &ProcessContext) {
        self.automation = match msg {
            GainMessage::SetGain(g) => {
                self.value = sanitize(g);
                Automation::Hold
            }
            GainMessage::SetTarget { target, time_constant } => {
                let samples = time_constant * ctx.sample_rate as f32;
                if samples.is_finite() && samples >= 1.0 {
                    Automation::Approach {
                        target: sanitize(target),
                        coeff: (-1.0 / samples).exp(),
                    }
                } else {
                    self.value = sanitize(target);
                    Automation::Hold
                }
            }
            GainMessage::LinearRamp { target, duration } => {
                let total = ctx.frames(duration as f64);
                if total == 0 {
                    self.value = sanitize(target);
                    Automation::Hold
                } else {
                    Automation::Ramp {
                        start: self.value,
                        target: sanitize(target),
                        elapsed: 0,
                        total,
                    }
                }
            }
        };
    }

    /// Advance the automation by one sample and return the new value
    #[inline]
    fn tick(&mut self) -> f32 {
        match &mut self.automation {
            Automation::Hold => {}
            Automation::Approach { target, coeff } => {
                self.value = *target + *coeff * (self.value - *target);
                if (self.value - *target).abs() < 1e-6 {
                    self.value = *target;
                    self.automation = Automation::Hold;
                }
            }
            Automation::Ramp { start, target, elapsed, total } => {
                *elapsed += 1;
                if *elapsed >= *total {
                    self.value = *target;
                    self.automation = Automation::Hold;
                } else {
                    let t = *elapsed as f32 / *total as f32;
                    self.value = *start + (*target - *start) * t;
                }
            }
        }
        self.value
    }
}

#[inline]
fn sanitize(gain: f32) -> f32 {
    if gain.is_finite() { gain.max(0.0) } else { 0.0 }
}

impl AudioNode for Gain {
    type Message = GainMessage;

    fn process(
        &mut self,
        ctx: &ProcessContext,
        messages: impl Iterator<Item = GainMessage>,
        inputs: &[Input],
        outputs: &mut [Buffer],
    ) {
        for msg in messages {
            self.handle(msg, ctx);
        }

        let mut gains = [0.0f32; BLOCK_SIZE];
        for g in gains.iter_mut() {
            *g = self.tick();
        }
        self.monitor.set(self.value);

        for buffer in outputs.iter_mut() {
            buffer.iter_mut().for_each(|s| *s = 0.0);
        }

        // Sum all inputs
        for input in inputs {
            let in_buffers = input.buffers();
            if in_buffers.is_empty() {
                continue;
            }

            for (out_ch, out_buf) in outputs.iter_mut().enumerate() {
                let in_buf = &in_buffers[out_ch.min(in_buffers.len() - 1)];
                for (out_sample, in_sample) in out_buf.iter_mut().zip(in_buf.iter()) {
                    *out_sample += *in_sample;
                }
            }
        }

        for out_buf in outputs.iter_mut() {
            for (out_sample, g) in out_buf.iter_mut().zip(gains.iter()) {
                *out_sample *= *g;
            }
        }
    }

    #[inline]
    fn num_inputs(&self) -> usize { usize::MAX }

    #[inline]
    fn num_outputs(&self) -> usize { self.channels }
}
