//! CPAL device discovery and sink creation.
//!
//! ```no_run
//! use klangfeld::{AudioContext, CpalDevice};
//!
//! // List all available output devices
//! for device in CpalDevice::list_outputs() {
//!     println!("{} ({} Hz, {} ch)", device.name(), device.sample_rate(), device.channels());
//! }
//!
//! // Use a specific device
//! let devices = CpalDevice::list_outputs();
//! let ctx = AudioContext::with_device(&devices[0]).unwrap();
//! ```

use cpal::traits::{DeviceTrait, HostTrait};
use tracing::warn;

use crate::error::AudioError;
use crate::nodes::CpalSink;

/// A discovered audio output device.
///
/// Use [`CpalDevice::default_output`] to get the system default, or
/// [`CpalDevice::list_outputs`] to enumerate all available devices.
pub struct CpalDevice {
    device: cpal::Device,
    config: cpal::SupportedStreamConfig,
    name: String,
    sample_rate: u32,
    channels: u16,
}

impl CpalDevice {
    fn from_device(device: cpal::Device) -> Option<Self> {
        let config = match device.default_output_config() {
            Ok(config) => config,
            Err(e) => {
                warn!("skipping output device without a usable config: {}", e);
                return None;
            }
        };
        let name = device.name().unwrap_or_else(|_| "Unknown".into());

        Some(Self {
            sample_rate: config.sample_rate().0,
            channels: config.channels(),
            name,
            device,
            config,
        })
    }

    /// Get the system's default output device.
    ///
    /// Returns `None` if no audio device is available.
    pub fn default_output() -> Option<Self> {
        let host = cpal::default_host();
        Self::from_device(host.default_output_device()?)
    }

    /// List all available audio output devices.
    ///
    /// Returns an empty list if no devices are found or if enumeration fails.
    pub fn list_outputs() -> Vec<Self> {
        let host = cpal::default_host();
        host.output_devices()
            .map(|devices| devices.filter_map(Self::from_device).collect())
            .unwrap_or_default()
    }

    /// Get the device name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the device's sample rate in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Get the number of output channels.
    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Open an output stream on this device.
    pub fn create_sink(&self) -> Result<CpalSink, AudioError> {
        CpalSink::new(&self.device, &self.config)
    }
}
