//! Export types and collaborator traits
//!
//! This module defines the composition model used to concatenate segments,
//! the export presets and statuses, and the probe/exporter seams.

use crate::capture::sample::MediaKind;
use crate::utils::error::CaptureResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Export quality presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportPreset {
    Low,
    Medium,
    Highest,
}

impl ExportPreset {
    /// Get the CRF value for H.264 encoding
    /// Lower values = higher quality, larger files
    pub fn crf(&self) -> u8 {
        match self {
            ExportPreset::Low => 28,
            ExportPreset::Medium => 23,
            ExportPreset::Highest => 18,
        }
    }

    /// Get the FFmpeg preset for H.264 encoding
    pub fn h264_preset(&self) -> &'static str {
        match self {
            ExportPreset::Low => "faster",
            ExportPreset::Medium => "medium",
            ExportPreset::Highest => "slow",
        }
    }

    /// AAC bitrate for the exported audio track
    pub fn audio_bitrate(&self) -> &'static str {
        match self {
            ExportPreset::Low => "96k",
            ExportPreset::Medium => "128k",
            ExportPreset::Highest => "192k",
        }
    }
}

/// One track of a probed asset
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackInfo {
    pub kind: MediaKind,
    pub duration: Duration,
}

/// Track layout of a media file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetInfo {
    pub path: PathBuf,
    pub duration: Duration,
    pub video: Option<TrackInfo>,
    pub audio: Option<TrackInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeRange {
    pub start: Duration,
    pub duration: Duration,
}

impl TimeRange {
    pub fn end(&self) -> Duration {
        self.start + self.duration
    }
}

/// A source track range placed on the composition timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositionClip {
    pub source: PathBuf,
    pub source_range: TimeRange,
    /// Position on the composition timeline
    pub at: Duration,
}

/// Ordered video and audio clips of a concatenation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Composition {
    pub video: Vec<CompositionClip>,
    pub audio: Vec<CompositionClip>,
    pub duration: Duration,
}

impl Composition {
    pub fn clips(&self, kind: MediaKind) -> &[CompositionClip] {
        match kind {
            MediaKind::Video => &self.video,
            MediaKind::Audio => &self.audio,
        }
    }
}

/// Terminal status of an export session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportStatus {
    Completed,
    Failed(String),
    Cancelled,
}

/// The single deliverable file produced from a recording's segments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergedRecording {
    pub path: PathBuf,
    pub duration: Duration,
    pub segment_count: usize,
}

/// Reads the track layout of a media file
#[async_trait]
pub trait AssetProbe: Send + Sync {
    async fn probe(&self, path: &Path) -> CaptureResult<AssetInfo>;
}

/// Renders a composition to one file
#[async_trait]
pub trait Exporter: Send + Sync {
    async fn export(&self, composition: &Composition, output: &Path, preset: ExportPreset) -> ExportStatus;
}
