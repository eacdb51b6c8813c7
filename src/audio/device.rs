//! Audio device enumeration and lookup
//!
//! Devices are addressed by `input:<name>` / `output:<name>` ids so one
//! physical device can be picked for either direction.

use cpal::traits::{DeviceTrait, HostTrait};
use serde::Serialize;

use crate::error::AudioError;

/// Direction a device is opened for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Input,
    Output,
}

impl Direction {
    fn prefix(self) -> &'static str {
        match self {
            Direction::Input => "input:",
            Direction::Output => "output:",
        }
    }
}

/// Description of a device as listed at startup
#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    pub id: String,
    pub name: String,
    pub direction: Direction,
    pub is_default: bool,
    pub sample_rates: Vec<u32>,
    pub channels: Vec<u16>,
}

/// A resolved cpal device
pub struct AudioDevice {
    inner: cpal::Device,
    pub name: String,
    pub direction: Direction,
}

impl AudioDevice {
    fn new(inner: cpal::Device, direction: Direction) -> Self {
        let name = inner.name().unwrap_or_else(|_| "Unknown".to_string());
        Self { inner, name, direction }
    }

    pub fn inner(&self) -> &cpal::Device {
        &self.inner
    }

    pub fn into_inner(self) -> cpal::Device {
        self.inner
    }

    pub fn id(&self) -> String {
        format!("{}{}", self.direction.prefix(), self.name)
    }

    /// Whether the device accepts `channels` at `sample_rate`
    pub fn supports(&self, sample_rate: u32, channels: u16) -> bool {
        let rate = cpal::SampleRate(sample_rate);
        let fits = |c: &cpal::SupportedStreamConfigRange| {
            c.channels() == channels && c.min_sample_rate() <= rate && rate <= c.max_sample_rate()
        };
        match self.direction {
            Direction::Input => self
                .inner
                .supported_input_configs()
                .map(|mut configs| configs.any(|c| fits(&c)))
                .unwrap_or(false),
            Direction::Output => self
                .inner
                .supported_output_configs()
                .map(|mut configs| configs.any(|c| fits(&c)))
                .unwrap_or(false),
        }
    }
}

/// List all input and output devices of the default host
pub fn list_devices() -> Vec<DeviceInfo> {
    let host = cpal::default_host();
    let mut devices = Vec::new();

    let default_input = host.default_input_device().and_then(|d| d.name().ok());
    let default_output = host.default_output_device().and_then(|d| d.name().ok());

    if let Ok(inputs) = host.input_devices() {
        for device in inputs {
            if let Some(info) = describe(&device, Direction::Input, default_input.as_deref()) {
                devices.push(info);
            }
        }
    }
    if let Ok(outputs) = host.output_devices() {
        for device in outputs {
            if let Some(info) = describe(&device, Direction::Output, default_output.as_deref()) {
                devices.push(info);
            }
        }
    }

    devices
}

fn describe(device: &cpal::Device, direction: Direction, default_name: Option<&str>) -> Option<DeviceInfo> {
    let name = device.name().ok()?;
    let configs: Vec<cpal::SupportedStreamConfigRange> = match direction {
        Direction::Input => device.supported_input_configs().ok()?.collect(),
        Direction::Output => device.supported_output_configs().ok()?.collect(),
    };

    let mut sample_rates = Vec::new();
    let mut channels = Vec::new();
    for config in &configs {
        for rate in [44_100u32, 48_000, 88_200, 96_000] {
            let sample_rate = cpal::SampleRate(rate);
            if config.min_sample_rate() <= sample_rate
                && sample_rate <= config.max_sample_rate()
                && !sample_rates.contains(&rate)
            {
                sample_rates.push(rate);
            }
        }
        if !channels.contains(&config.channels()) {
            channels.push(config.channels());
        }
    }
    sample_rates.sort_unstable();
    channels.sort_unstable();

    Some(DeviceInfo {
        id: format!("{}{}", direction.prefix(), name),
        is_default: default_name == Some(name.as_str()),
        name,
        direction,
        sample_rates,
        channels,
    })
}

/// Split an id into its direction and device name. Bare names are inputs.
pub fn parse_device_id(id: &str) -> (Direction, &str) {
    if let Some(name) = id.strip_prefix(Direction::Input.prefix()) {
        (Direction::Input, name)
    } else if let Some(name) = id.strip_prefix(Direction::Output.prefix()) {
        (Direction::Output, name)
    } else {
        (Direction::Input, id)
    }
}

/// Get a device by its id
pub fn get_device_by_id(id: &str) -> Result<AudioDevice, AudioError> {
    let host = cpal::default_host();
    let (direction, name) = parse_device_id(id);

    let devices = match direction {
        Direction::Input => host.input_devices(),
        Direction::Output => host.output_devices(),
    }
    .map_err(|e| AudioError::DeviceNotFound(e.to_string()))?;

    for device in devices {
        if device.name().map(|n| n == name).unwrap_or(false) {
            return Ok(AudioDevice::new(device, direction));
        }
    }

    Err(AudioError::DeviceNotFound(id.to_string()))
}

/// Configured device when an id is given, otherwise the host default
pub fn resolve_device(id: Option<&str>, direction: Direction) -> Result<AudioDevice, AudioError> {
    if let Some(id) = id {
        return get_device_by_id(id);
    }
    let host = cpal::default_host();
    let device = match direction {
        Direction::Input => host.default_input_device(),
        Direction::Output => host.default_output_device(),
    };
    device
        .map(|d| AudioDevice::new(d, direction))
        .ok_or_else(|| AudioError::DeviceNotFound(format!("No default {:?} device", direction)))
}
