//! Device lookup and stream configuration.

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{Device, Host, SampleFormat, SampleRate, StreamConfig, SupportedStreamConfigRange};
use parley_core::audio::{AudioDeviceError, Direction, SAMPLE_RATE};

/// An audio endpoint as reported by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub direction: Direction,
    pub is_default: bool,
}

/// Lists every input and output device on the default host.
pub fn list_devices() -> Result<Vec<DeviceInfo>, AudioDeviceError> {
    let host = cpal::default_host();
    let mut devices = Vec::new();

    let default_input = host.default_input_device().and_then(|d| d.name().ok());
    let inputs = host.input_devices().map_err(|e| init_error(Direction::Capture, e))?;
    for device in inputs {
        let Ok(name) = device.name() else { continue };
        devices.push(DeviceInfo {
            is_default: default_input.as_deref() == Some(name.as_str()),
            name,
            direction: Direction::Capture,
        });
    }

    let default_output = host.default_output_device().and_then(|d| d.name().ok());
    let outputs = host.output_devices().map_err(|e| init_error(Direction::Playback, e))?;
    for device in outputs {
        let Ok(name) = device.name() else { continue };
        devices.push(DeviceInfo {
            is_default: default_output.as_deref() == Some(name.as_str()),
            name,
            direction: Direction::Playback,
        });
    }

    Ok(devices)
}

/// Finds the named device, or the host default when no name is given.
pub(crate) fn find_device(
    host: &Host,
    direction: Direction,
    name: Option<&str>,
) -> Result<Device, AudioDeviceError> {
    let Some(name) = name else {
        let device = match direction {
            Direction::Capture => host.default_input_device(),
            Direction::Playback => host.default_output_device(),
        };
        return device.ok_or(AudioDeviceError::NoDevice(direction));
    };

    let mut devices = match direction {
        Direction::Capture => host.input_devices(),
        Direction::Playback => host.output_devices(),
    }
    .map_err(|e| init_error(direction, e))?;

    devices
        .find(|d| d.name().is_ok_and(|n| n == name))
        .ok_or_else(|| AudioDeviceError::Init {
            direction,
            reason: format!("no device named {name:?}"),
        })
}

/// Picks an f32 configuration running at the pipeline rate, preferring mono.
pub(crate) fn at_pipeline_rate(
    ranges: impl Iterator<Item = SupportedStreamConfigRange>,
) -> Option<StreamConfig> {
    let rate = SampleRate(SAMPLE_RATE);
    let candidates: Vec<_> = ranges
        .filter(|c| c.sample_format() == SampleFormat::F32)
        .filter(|c| c.min_sample_rate() <= rate && c.max_sample_rate() >= rate && c.channels() > 0)
        .collect();
    candidates
        .iter()
        .find(|c| c.channels() == 1)
        .or_else(|| candidates.iter().min_by_key(|c| c.channels()))
        .map(|c| c.clone().with_sample_rate(rate).config())
}

/// The capture configuration. Falls back to the device's native rate, in
/// which case capture is resampled.
pub(crate) fn input_config(device: &Device) -> Result<StreamConfig, AudioDeviceError> {
    let direction = Direction::Capture;
    let ranges = device
        .supported_input_configs()
        .map_err(|e| init_error(direction, e))?;
    if let Some(config) = at_pipeline_rate(ranges) {
        return Ok(config);
    }

    let native = device
        .default_input_config()
        .map_err(|e| init_error(direction, e))?;
    if native.sample_format() != SampleFormat::F32 {
        return Err(AudioDeviceError::Unsupported {
            direction,
            reason: format!("sample format {:?}", native.sample_format()),
        });
    }
    Ok(native.config())
}

pub(crate) fn output_config(device: &Device) -> Result<StreamConfig, AudioDeviceError> {
    let direction = Direction::Playback;
    let ranges = device
        .supported_output_configs()
        .map_err(|e| init_error(direction, e))?;
    at_pipeline_rate(ranges).ok_or_else(|| AudioDeviceError::Unsupported {
        direction,
        reason: "no f32 configuration at the pipeline rate".to_string(),
    })
}

pub(crate) fn device_name(device: &Device) -> String {
    device.name().unwrap_or_else(|_| "unknown".to_string())
}

pub(crate) fn init_error(direction: Direction, error: impl std::fmt::Display) -> AudioDeviceError {
    AudioDeviceError::Init {
        direction,
        reason: error.to_string(),
    }
}
