//! Host device enumeration using nokhwa (cameras) and cpal (microphones)
//!
//! Only enumeration and selection are provided here. Native devices expose
//! no exposure or torch controls, so configuration changes are accepted and
//! ignored.

use super::sample::MediaKind;
use super::traits::{
    CaptureDevice, DeviceDiscovery, DeviceInfo, DevicePosition, DeviceType, ExposureMode,
    TorchMode,
};
use crate::utils::error::CaptureResult;
use cpal::traits::{DeviceTrait, HostTrait};
use nokhwa::utils::{ApiBackend, CameraIndex};
use std::sync::Arc;

/// Get list of available cameras
pub fn list_cameras() -> Vec<DeviceInfo> {
    match nokhwa::query(ApiBackend::Auto) {
        Ok(cameras) => cameras
            .into_iter()
            .map(|info| {
                let id = match info.index() {
                    CameraIndex::Index(i) => i.to_string(),
                    CameraIndex::String(s) => s.to_string(),
                };
                let name = info.human_name().to_string();
                DeviceInfo {
                    id,
                    position: guess_position(&name),
                    name,
                    media_kind: MediaKind::Video,
                    device_type: DeviceType::External,
                    active_format: None,
                }
            })
            .collect(),
        Err(e) => {
            tracing::warn!("Failed to enumerate cameras: {:?}", e);
            Vec::new()
        }
    }
}

/// Get list of available microphones, default input first
pub fn list_microphones() -> Vec<DeviceInfo> {
    let host = cpal::default_host();
    let default_name = host
        .default_input_device()
        .and_then(|device| device.name().ok());

    let devices = match host.input_devices() {
        Ok(devices) => devices,
        Err(e) => {
            tracing::warn!("Failed to enumerate input devices: {}", e);
            return Vec::new();
        }
    };

    let mut microphones: Vec<DeviceInfo> = devices
        .filter_map(|device| device.name().ok())
        .map(|name| DeviceInfo {
            id: name.clone(),
            name,
            media_kind: MediaKind::Audio,
            position: DevicePosition::Unspecified,
            device_type: DeviceType::Microphone,
            active_format: None,
        })
        .collect();

    if let Some(default_name) = default_name {
        microphones.sort_by_key(|info| info.name != default_name);
    }
    microphones
}

/// Laptop and phone webcams usually name their facing; anything else is unspecified
fn guess_position(name: &str) -> DevicePosition {
    let lower = name.to_lowercase();
    if lower.contains("front") || lower.contains("facetime") || lower.contains("integrated") {
        DevicePosition::Front
    } else if lower.contains("back") || lower.contains("rear") {
        DevicePosition::Back
    } else {
        DevicePosition::Unspecified
    }
}

/// An enumerated host device
#[derive(Debug)]
pub struct NativeDevice {
    info: DeviceInfo,
}

impl CaptureDevice for NativeDevice {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn lock_for_configuration(&self) -> CaptureResult<()> {
        Ok(())
    }

    fn unlock_for_configuration(&self) {}

    fn set_exposure_target_bias(&self, bias: f32) {
        tracing::debug!("Ignoring exposure bias {} on {}", bias, self.info.name);
    }

    fn set_exposure_mode(&self, mode: ExposureMode) {
        tracing::debug!("Ignoring exposure mode {:?} on {}", mode, self.info.name);
    }

    fn has_torch(&self) -> bool {
        false
    }

    fn is_torch_mode_supported(&self, _mode: TorchMode) -> bool {
        false
    }

    fn set_torch_mode(&self, _mode: TorchMode) {}
}

/// Discovery over the host's cameras and microphones
#[derive(Debug, Default)]
pub struct NativeDiscovery;

impl DeviceDiscovery for NativeDiscovery {
    fn devices(&self, kind: MediaKind) -> Vec<Arc<dyn CaptureDevice>> {
        let infos = match kind {
            MediaKind::Video => list_cameras(),
            MediaKind::Audio => list_microphones(),
        };
        infos
            .into_iter()
            .map(|info| Arc::new(NativeDevice { info }) as Arc<dyn CaptureDevice>)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guess_position() {
        assert_eq!(guess_position("FaceTime HD Camera"), DevicePosition::Front);
        assert_eq!(guess_position("Rear Camera"), DevicePosition::Back);
        assert_eq!(guess_position("USB Video Device"), DevicePosition::Unspecified);
    }
}
