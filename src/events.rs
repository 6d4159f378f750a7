//! Events and observable status for the UI-facing context

use crate::capture::traits::DevicePosition;
use crate::recorder::state::{RecordingState, RecordingSummary, Segment};
use crate::utils::error::ErrorResponse;
use serde::Serialize;
use uuid::Uuid;

/// Events emitted by the capture controller and pipeline
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CaptureEvent {
    /// Recording started
    Started,
    /// Recording paused
    Paused,
    /// Recording resumed
    Resumed,
    /// A segment file was closed
    SegmentFinalized { segment: Segment },
    /// Recording stopped and handed off
    Stopped { summary: RecordingSummary },
    PhotoCaptured { request_id: Uuid, bytes: usize },
    CameraSwitched { position: DevicePosition },
    /// Error occurred
    Error { error: ErrorResponse },
}

/// Flags observed by the UI
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureStatus {
    pub recording_state: RecordingState,
    pub recording_active: bool,
    pub photo_in_progress: bool,
    pub camera_position: Option<DevicePosition>,
}
