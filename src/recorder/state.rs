//! Recording state management
//!
//! Defines the recording state machine states and per-segment tracking.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Current state of the recording system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RecordingState {
    /// No recording in progress
    Idle,
    /// Writer exists and waits for its first usable frames
    PendingStart,
    /// Writer is accepting frames
    Recording,
    /// Segment finalized, no writer
    Paused,
}

impl Default for RecordingState {
    fn default() -> Self {
        Self::Idle
    }
}

impl RecordingState {
    /// Whether a top-level recording is in progress
    pub fn is_active(&self) -> bool {
        !matches!(self, RecordingState::Idle)
    }
}

/// One finalized segment file
///
/// A new segment is created at record start and at every resume.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    /// Segment index (0, 1, 2, ...)
    pub index: usize,

    pub path: PathBuf,

    /// Media duration from the writer's timeline origin to the last sample end
    pub duration_ms: f64,

    pub video_samples: u64,
    pub audio_samples: u64,

    /// Samples dropped because a track was not ready
    pub dropped_samples: u64,

    /// Wall-clock time the writer started
    pub started_at: DateTime<Utc>,

    /// Wall-clock time the segment was finalized
    pub finished_at: DateTime<Utc>,
}

impl Segment {
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.duration_ms.max(0.0) / 1000.0)
    }
}

/// Result of a completed recording
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingSummary {
    /// Path of the merged file at the time of hand-off
    pub merged_path: PathBuf,

    /// Duration of the merged file in milliseconds
    pub total_duration_ms: f64,

    /// Number of segments
    pub segment_count: usize,

    pub segments: Vec<Segment>,

    /// Identifier assigned by the gallery, when saved
    pub gallery_id: Option<String>,
}
