//! Input device lookup using cpal

use crate::error::VoiceError;
use cpal::traits::{DeviceTrait, HostTrait};
use cpal::DeviceId;
use serde::Serialize;
use std::str::FromStr;

/// An audio input device as shown to the user
#[derive(Debug, Clone, Serialize)]
pub struct InputDeviceInfo {
    /// Stable identifier (survives restarts)
    pub id: String,
    /// Human-readable device name
    pub name: String,
    /// Whether this is the system default input device
    pub is_default: bool,
}

/// Display name for a device, preferring `description()` over the deprecated `name()`
pub fn device_display_name(device: &cpal::Device) -> String {
    device
        .description()
        .map(|desc| desc.name().to_string())
        .unwrap_or_else(|_| {
            #[allow(deprecated)]
            device.name().unwrap_or_else(|_| "Unknown".to_string())
        })
}

/// List all available input devices
pub fn list_input_devices() -> Vec<InputDeviceInfo> {
    let host = cpal::default_host();
    let default_id = host
        .default_input_device()
        .and_then(|d| d.id().ok())
        .map(|id| id.to_string());

    let devices: Vec<InputDeviceInfo> = host
        .input_devices()
        .map(|iter| {
            iter.filter_map(|device| {
                let id = device.id().ok()?.to_string();
                Some(InputDeviceInfo {
                    name: device_display_name(&device),
                    is_default: Some(&id) == default_id.as_ref(),
                    id,
                })
            })
            .collect()
        })
        .unwrap_or_default();

    tracing::debug!("Found {} input devices on host {}", devices.len(), host.id().name());
    devices
}

fn find_input_device_by_id(id_str: &str) -> Option<cpal::Device> {
    let device_id = DeviceId::from_str(id_str).ok()?;
    cpal::default_host().device_by_id(&device_id)
}

/// Resolve the capture device: the configured one if present, else the default.
///
/// Fails with `DeviceUnavailable` when the host has no input device at all.
pub fn resolve_input_device(device_id: Option<&str>) -> Result<cpal::Device, VoiceError> {
    if let Some(id) = device_id {
        if let Some(device) = find_input_device_by_id(id) {
            tracing::info!("Using configured input device: {}", device_display_name(&device));
            return Ok(device);
        }

        let available: Vec<String> = list_input_devices()
            .iter()
            .map(|d| format!("{} (id: {})", d.name, d.id))
            .collect();
        tracing::warn!(
            "Configured input device '{}' not found. Available: [{}]. Falling back to default.",
            id,
            available.join(", ")
        );
    }

    let device = cpal::default_host()
        .default_input_device()
        .ok_or_else(|| VoiceError::DeviceUnavailable("no input device present".to_string()))?;

    if let Ok(config) = device.default_input_config() {
        tracing::info!(
            "Using default input device: '{}', {}Hz, {}ch, format={:?}",
            device_display_name(&device),
            config.sample_rate(),
            config.channels(),
            config.sample_format()
        );
    }
    Ok(device)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_input_devices_does_not_panic() {
        for device in list_input_devices() {
            assert!(!device.id.is_empty());
        }
    }

    #[test]
    fn test_device_ids_parse_back() {
        for device in list_input_devices() {
            assert!(
                DeviceId::from_str(&device.id).is_ok(),
                "Device ID '{}' should be parseable as DeviceId",
                device.id
            );
        }
    }

    #[test]
    fn test_unknown_id_falls_back_or_reports_unavailable() {
        match resolve_input_device(Some("definitely-not-a-device")) {
            Ok(_) => {}
            Err(e) => assert!(matches!(e, VoiceError::DeviceUnavailable(_))),
        }
    }
}
