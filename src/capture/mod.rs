//! Capture hardware abstraction
//!
//! This module provides the hardware-facing traits, the sample buffer types
//! delivered by capture outputs, and the available device backends.

pub mod loopback;
pub mod sample;
pub mod traits;

#[cfg(feature = "native-devices")]
pub mod native;

// Re-export traits
pub use sample::{
    AudioSampleFormat, AudioStreamDescription, FormatDescription, MediaKind, PixelFormat,
    SampleBuffer, SampleDelegate,
};
pub use traits::{
    CaptureDevice, CaptureSession, DeviceDiscovery, DeviceInfo, DeviceInput, DeviceOrientation,
    DevicePosition, DeviceType, ExposureMode, FlashMode, OutputHandle, OutputKind, PhotoCodec,
    PhotoOutput, PhotoSettings, Resolution, SessionPreset, TorchMode, VideoOrientation,
};
