//! Capture configuration
//!
//! Loaded from JSON (camelCase keys); every field has a default.

use crate::capture::traits::ExposureMode;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for the capture and recording pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CaptureConfig {
    /// Directory holding segment files; cleared at each new recording
    pub working_dir: PathBuf,

    /// Segment files are named `<prefix>-<index>.mov`
    pub segment_prefix: String,

    /// File name of the merged recording inside the working directory
    pub merged_file_name: String,

    /// Capacity of the capture ingress queue; samples beyond it are dropped
    pub frame_queue_depth: usize,

    /// Samples held while the first segment waits for both track formats
    pub lead_in_capacity: usize,

    /// Audio encoder bitrate in bits per second
    pub audio_bitrate: u32,

    /// Nominal frame rate handed to the video encoder
    pub video_frame_rate: u32,

    /// Upper bound on one segment finalize
    pub finalize_timeout_ms: u64,

    /// Upper bound on the merge export
    pub export_timeout_ms: u64,

    /// Upper bound on one still photo, from request to image data
    pub photo_timeout_ms: u64,

    /// Exposure bias applied when the session starts
    pub exposure_target_bias: f32,

    pub exposure_mode: ExposureMode,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            working_dir: std::env::temp_dir().join("segcam"),
            segment_prefix: "segment".to_string(),
            merged_file_name: "recording.mov".to_string(),
            frame_queue_depth: 64,
            lead_in_capacity: 120,
            audio_bitrate: 64_000,
            video_frame_rate: 30,
            finalize_timeout_ms: 10_000,
            export_timeout_ms: 120_000,
            photo_timeout_ms: 10_000,
            exposure_target_bias: 0.0,
            exposure_mode: ExposureMode::ContinuousAutoExposure,
        }
    }
}

impl CaptureConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        let config: CaptureConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file {:?}", path))?;
        Ok(config)
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    /// Path of the segment file with the given index
    pub fn segment_path(&self, index: usize) -> PathBuf {
        self.working_dir
            .join(format!("{}-{}.mov", self.segment_prefix, index))
    }

    pub fn merged_path(&self) -> PathBuf {
        self.working_dir.join(&self.merged_file_name)
    }

    pub fn finalize_timeout(&self) -> Duration {
        Duration::from_millis(self.finalize_timeout_ms)
    }

    pub fn export_timeout(&self) -> Duration {
        Duration::from_millis(self.export_timeout_ms)
    }

    pub fn photo_timeout(&self) -> Duration {
        Duration::from_millis(self.photo_timeout_ms)
    }
}
