//! Effect nodes - process audio

mod gain;

pub use gain::{Gain, GainMessage, GainMonitor};
