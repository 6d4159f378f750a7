//! Capture trait definitions
//!
//! Platform-agnostic traits for capture hardware: devices, the capture
//! session, and the one-shot photo output.

use super::sample::{MediaKind, PixelFormat, SampleDelegate};
use crate::utils::error::CaptureResult;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Video resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Same resolution with width and height exchanged
    pub fn swapped(&self) -> Self {
        Self {
            width: self.height,
            height: self.width,
        }
    }
}

/// Physical mounting position of a camera
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DevicePosition {
    Front,
    Back,
    Unspecified,
}

/// Hardware sub-type of a capture device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeviceType {
    WideAngleCamera,
    DualCamera,
    DualWideCamera,
    TrueDepthCamera,
    Microphone,
    External,
}

/// Information about a capture device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Unique device ID
    pub id: String,

    /// Device name
    pub name: String,

    /// Media the device produces
    pub media_kind: MediaKind,

    pub position: DevicePosition,

    pub device_type: DeviceType,

    /// Native sensor dimensions of the active format (cameras only)
    pub active_format: Option<Resolution>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExposureMode {
    Locked,
    AutoExpose,
    ContinuousAutoExposure,
}

impl Default for ExposureMode {
    fn default() -> Self {
        Self::ContinuousAutoExposure
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TorchMode {
    Off,
    On,
    Auto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlashMode {
    Off,
    On,
    Auto,
}

impl Default for FlashMode {
    fn default() -> Self {
        Self::Off
    }
}

/// Physical orientation of the host device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeviceOrientation {
    Portrait,
    PortraitUpsideDown,
    LandscapeLeft,
    LandscapeRight,
    FaceUp,
    FaceDown,
    Unknown,
}

impl DeviceOrientation {
    pub fn is_portrait(&self) -> bool {
        matches!(
            self,
            DeviceOrientation::Portrait | DeviceOrientation::PortraitUpsideDown
        )
    }
}

/// Orientation applied to a capture connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VideoOrientation {
    Portrait,
    LandscapeLeft,
    LandscapeRight,
}

impl From<DeviceOrientation> for VideoOrientation {
    /// Landscape is cross-swapped: the sensor is mounted rotated relative to
    /// the device, so a device turned left needs a right-landscape connection.
    fn from(orientation: DeviceOrientation) -> Self {
        match orientation {
            DeviceOrientation::LandscapeLeft => VideoOrientation::LandscapeRight,
            DeviceOrientation::LandscapeRight => VideoOrientation::LandscapeLeft,
            _ => VideoOrientation::Portrait,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StabilizationMode {
    Off,
    Standard,
    Cinematic,
    Auto,
}

/// Session quality presets, ordered from lowest to highest
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionPreset {
    Low,
    Medium,
    High,
    Hd1920x1080,
    Hd4K,
}

/// A physical camera or microphone
pub trait CaptureDevice: Send + Sync + fmt::Debug {
    fn info(&self) -> &DeviceInfo;

    /// Acquire exclusive configuration access
    fn lock_for_configuration(&self) -> CaptureResult<()>;

    fn unlock_for_configuration(&self);

    fn set_exposure_target_bias(&self, bias: f32);

    fn set_exposure_mode(&self, mode: ExposureMode);

    fn has_torch(&self) -> bool;

    fn is_torch_mode_supported(&self, mode: TorchMode) -> bool;

    fn set_torch_mode(&self, mode: TorchMode);
}

/// Enumerates the capture devices present on the host
pub trait DeviceDiscovery: Send + Sync {
    fn devices(&self, kind: MediaKind) -> Vec<Arc<dyn CaptureDevice>>;

    /// First device matching the requested kind, sub-type and position
    fn default_device(
        &self,
        kind: MediaKind,
        device_type: Option<DeviceType>,
        position: Option<DevicePosition>,
    ) -> Option<Arc<dyn CaptureDevice>> {
        self.devices(kind).into_iter().find(|device| {
            let info = device.info();
            device_type.map_or(true, |t| info.device_type == t)
                && position.map_or(true, |p| info.position == p)
        })
    }
}

/// A selected device wrapped for attachment to a capture session
///
/// Inputs are never mutated in place; a camera switch produces a new input.
#[derive(Debug, Clone)]
pub struct DeviceInput {
    id: Uuid,
    device: Arc<dyn CaptureDevice>,
}

impl DeviceInput {
    pub fn new(device: Arc<dyn CaptureDevice>) -> Self {
        Self {
            id: Uuid::new_v4(),
            device,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn device(&self) -> &Arc<dyn CaptureDevice> {
        &self.device
    }

    pub fn position(&self) -> DevicePosition {
        self.device.info().position
    }

    pub fn media_kind(&self) -> MediaKind {
        self.device.info().media_kind
    }
}

/// Kinds of outputs a session can feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OutputKind {
    VideoData,
    AudioData,
    Photo,
}

/// Identity of an output attached (or attachable) to a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutputHandle {
    pub id: Uuid,
    pub kind: OutputKind,
}

impl OutputHandle {
    pub fn new(kind: OutputKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
        }
    }
}

/// Hardware-backed capture pipeline
///
/// Safe for concurrent reads; topology mutations are serialized internally
/// and must be bracketed by `begin_configuration`/`commit_configuration`.
pub trait CaptureSession: Send + Sync {
    fn begin_configuration(&self);

    fn commit_configuration(&self);

    fn supported_presets(&self) -> Vec<SessionPreset>;

    fn set_preset(&self, preset: SessionPreset);

    fn can_add_input(&self, input: &DeviceInput) -> bool;

    fn add_input(&self, input: &DeviceInput);

    fn remove_input(&self, input: &DeviceInput);

    fn can_add_output(&self, output: &OutputHandle) -> bool;

    fn add_output(&self, output: &OutputHandle);

    fn is_stabilization_supported(&self, output: &OutputHandle) -> bool;

    /// Configure the output's connection; returns false when the output has no connection
    fn configure_connection(
        &self,
        output: &OutputHandle,
        orientation: VideoOrientation,
        stabilization: Option<StabilizationMode>,
    ) -> bool;

    /// Route live buffers from a data output to a delegate
    fn set_sample_delegate(&self, output: &OutputHandle, delegate: Arc<dyn SampleDelegate>);

    fn start_running(&self);

    fn stop_running(&self);

    fn is_running(&self) -> bool;
}

/// Still image codecs a photo output may advertise
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhotoCodec {
    Jpeg,
    Hevc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityPrioritization {
    Speed,
    Balanced,
    Quality,
}

/// Static configuration applied to a photo output when it joins the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoOutputConfig {
    pub high_resolution_capture: bool,
    pub live_photo_capture: bool,
    pub depth_data_delivery: bool,
    pub max_quality_prioritization: QualityPrioritization,
}

impl Default for PhotoOutputConfig {
    fn default() -> Self {
        Self {
            high_resolution_capture: true,
            live_photo_capture: false,
            depth_data_delivery: false,
            max_quality_prioritization: QualityPrioritization::Quality,
        }
    }
}

/// Settings for a single photo capture
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoSettings {
    /// `None` leaves the output's default codec
    pub codec: Option<PhotoCodec>,
    pub high_resolution: bool,
    pub quality_prioritization: QualityPrioritization,
    pub flash_mode: FlashMode,
    pub preview_pixel_format: Option<PixelFormat>,
    pub orientation: VideoOrientation,
}

/// Hardware callbacks for one photo capture
pub trait PhotoCaptureDelegate: Send + Sync {
    fn will_begin_capture(&self, request: Uuid);

    fn did_finish_processing(&self, request: Uuid, result: Result<Vec<u8>, String>);

    fn did_finish_capture(&self, request: Uuid, error: Option<String>);
}

/// One-shot still capture output
pub trait PhotoOutput: Send + Sync {
    fn handle(&self) -> OutputHandle;

    fn configure(&self, config: PhotoOutputConfig);

    fn available_codecs(&self) -> Vec<PhotoCodec>;

    fn supported_flash_modes(&self) -> Vec<FlashMode>;

    fn available_preview_pixel_formats(&self) -> Vec<PixelFormat>;

    /// Issue an asynchronous capture; completion arrives on `delegate`
    fn capture(&self, request: Uuid, settings: PhotoSettings, delegate: Arc<dyn PhotoCaptureDelegate>);
}
