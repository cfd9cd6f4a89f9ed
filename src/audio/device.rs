//! Input device enumeration and lookup

use cpal::traits::{DeviceTrait, HostTrait};

use crate::error::CaptureError;

/// Get the default input device
pub fn default_input_device() -> Result<cpal::Device, CaptureError> {
    let host = cpal::default_host();
    host.default_input_device()
        .ok_or_else(|| CaptureError::DeviceUnavailable("no default input device".to_string()))
}

/// Get an input device by name
pub fn input_device_by_name(name: &str) -> Result<cpal::Device, CaptureError> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?;

    for device in devices {
        if let Ok(device_name) = device.name() {
            if device_name == name {
                return Ok(device);
            }
        }
    }

    Err(CaptureError::DeviceUnavailable(name.to_string()))
}

/// List the names of all available input devices
pub fn list_input_devices() -> Vec<String> {
    let host = cpal::default_host();
    let mut names = Vec::new();

    if let Ok(devices) = host.input_devices() {
        for device in devices {
            if let Ok(name) = device.name() {
                names.push(name);
            }
        }
    }

    names
}
