//! Device selection and configuration
//!
//! Owns the selected camera and microphone inputs, applies locked device
//! configuration (exposure, torch) and picks the target device for a camera
//! switch.

use crate::capture::sample::MediaKind;
use crate::capture::traits::{
    CaptureDevice, DeviceDiscovery, DeviceInput, DeviceOrientation, DevicePosition, DeviceType,
    ExposureMode, Resolution, TorchMode,
};
use crate::config::CaptureConfig;
use crate::utils::error::{CaptureError, CaptureResult};
use std::sync::Arc;

/// Holds a device's configuration lock; released on drop
pub struct ConfigurationLock<'a> {
    device: &'a dyn CaptureDevice,
}

impl<'a> ConfigurationLock<'a> {
    pub fn acquire(device: &'a dyn CaptureDevice) -> CaptureResult<Self> {
        device.lock_for_configuration()?;
        Ok(Self { device })
    }
}

impl<'a> std::ops::Deref for ConfigurationLock<'a> {
    type Target = dyn CaptureDevice + 'a;

    fn deref(&self) -> &Self::Target {
        self.device
    }
}

impl Drop for ConfigurationLock<'_> {
    fn drop(&mut self) {
        self.device.unlock_for_configuration();
    }
}

/// Outgoing and incoming camera inputs for a position switch
#[derive(Debug, Clone)]
pub struct DeviceSwitch {
    pub old_input: DeviceInput,
    pub new_input: DeviceInput,
}

/// Sub-types preferred when switching to a position, best first
fn preferred_types(position: DevicePosition) -> &'static [DeviceType] {
    match position {
        DevicePosition::Back => &[DeviceType::DualCamera, DeviceType::DualWideCamera],
        DevicePosition::Front => &[DeviceType::TrueDepthCamera],
        DevicePosition::Unspecified => &[],
    }
}

/// Pick the camera to switch to from `current`
///
/// Front (or unspecified) goes to back and back goes to front. A preferred
/// sub-type wins; otherwise any camera at the target position is used.
pub fn next_device(
    devices: &[Arc<dyn CaptureDevice>],
    current: DevicePosition,
) -> Option<Arc<dyn CaptureDevice>> {
    let target = match current {
        DevicePosition::Back => DevicePosition::Front,
        DevicePosition::Front | DevicePosition::Unspecified => DevicePosition::Back,
    };

    let candidates: Vec<&Arc<dyn CaptureDevice>> = devices
        .iter()
        .filter(|d| d.info().position == target)
        .collect();

    preferred_types(target)
        .iter()
        .find_map(|wanted| {
            candidates
                .iter()
                .find(|d| d.info().device_type == *wanted)
        })
        .or_else(|| candidates.first())
        .map(|d| (*d).clone())
}

/// Selects and configures the camera and microphone
pub struct DeviceManager {
    discovery: Arc<dyn DeviceDiscovery>,
    video_input: DeviceInput,
    audio_input: DeviceInput,
    torch_mode: Option<TorchMode>,
}

impl DeviceManager {
    /// Select the default front camera and default microphone
    pub fn new(discovery: Arc<dyn DeviceDiscovery>) -> CaptureResult<Self> {
        let camera = discovery
            .default_device(
                MediaKind::Video,
                Some(DeviceType::WideAngleCamera),
                Some(DevicePosition::Front),
            )
            .or_else(|| discovery.default_device(MediaKind::Video, None, Some(DevicePosition::Front)))
            .ok_or_else(|| CaptureError::NoDevice("front camera".to_string()))?;

        let microphone = discovery
            .default_device(MediaKind::Audio, None, None)
            .ok_or_else(|| CaptureError::NoDevice("microphone".to_string()))?;

        tracing::info!(
            "Selected camera '{}' and microphone '{}'",
            camera.info().name,
            microphone.info().name
        );

        Ok(Self {
            discovery,
            video_input: DeviceInput::new(camera),
            audio_input: DeviceInput::new(microphone),
            torch_mode: None,
        })
    }

    pub fn video_input(&self) -> &DeviceInput {
        &self.video_input
    }

    pub fn audio_input(&self) -> &DeviceInput {
        &self.audio_input
    }

    pub fn position(&self) -> DevicePosition {
        self.video_input.position()
    }

    /// Apply the configured exposure to the camera
    pub fn start(&self, config: &CaptureConfig) -> CaptureResult<()> {
        self.lock_and_adjust(config.exposure_target_bias, config.exposure_mode)
    }

    pub fn lock_and_adjust(&self, exposure_bias: f32, exposure_mode: ExposureMode) -> CaptureResult<()> {
        let device = ConfigurationLock::acquire(self.video_input.device().as_ref())?;
        device.set_exposure_target_bias(exposure_bias);
        device.set_exposure_mode(exposure_mode);
        tracing::debug!(
            "Exposure set to {:?} with bias {} on '{}'",
            exposure_mode,
            exposure_bias,
            device.info().name
        );
        Ok(())
    }

    /// Encoder dimensions for the camera's active format at this orientation
    ///
    /// Sensors are mounted landscape, so portrait orientations swap the axes.
    pub fn capture_resolution(&self, orientation: DeviceOrientation) -> Option<Resolution> {
        let native = self.video_input.device().info().active_format?;
        Some(if orientation.is_portrait() {
            native.swapped()
        } else {
            native
        })
    }

    /// Select a torch mode and apply it now
    pub fn set_torch_mode(&mut self, mode: TorchMode) -> CaptureResult<()> {
        self.apply_torch(mode)?;
        self.torch_mode = Some(mode);
        Ok(())
    }

    /// Re-apply the selected torch mode, if any
    pub fn enable_selected_torch(&self) -> CaptureResult<()> {
        match self.torch_mode {
            Some(mode) => self.apply_torch(mode),
            None => Ok(()),
        }
    }

    /// Turn the torch off; cameras without a torch are left alone
    pub fn disable_torch(&self) -> CaptureResult<()> {
        let device = self.video_input.device();
        if !device.has_torch() || !device.is_torch_mode_supported(TorchMode::Off) {
            return Ok(());
        }
        self.apply_torch(TorchMode::Off)
    }

    fn apply_torch(&self, mode: TorchMode) -> CaptureResult<()> {
        let device = self.video_input.device();
        if !device.has_torch() || !device.is_torch_mode_supported(mode) {
            return Err(CaptureError::TorchUnsupported(format!(
                "{:?} on '{}'",
                mode,
                device.info().name
            )));
        }
        let device = ConfigurationLock::acquire(device.as_ref())?;
        device.set_torch_mode(mode);
        Ok(())
    }

    /// Compute the camera switch; the current input is unchanged until [`adopt`](Self::adopt)
    pub fn switch_position(&self) -> CaptureResult<DeviceSwitch> {
        let devices = self.discovery.devices(MediaKind::Video);
        let current = self.position();
        let device = next_device(&devices, current).ok_or_else(|| {
            CaptureError::CameraSwitchUnavailable(format!("switching from {:?}", current))
        })?;

        tracing::info!(
            "Switching camera from {:?} to '{}' ({:?})",
            current,
            device.info().name,
            device.info().position
        );

        Ok(DeviceSwitch {
            old_input: self.video_input.clone(),
            new_input: DeviceInput::new(device),
        })
    }

    /// Make a spliced-in switch the current video input
    pub fn adopt(&mut self, switch: DeviceSwitch) {
        self.video_input = switch.new_input;
    }
}
