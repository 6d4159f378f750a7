//! Error types and handling
//!
//! Common error types used across the capture, recording and export paths.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Crate-wide error type
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Configuration errors
    #[error("No capture device available: {0}")]
    NoDevice(String),

    #[error("Session rejected input: {0}")]
    InputRejected(String),

    #[error("Session rejected output: {0}")]
    OutputRejected(String),

    #[error("Torch mode not supported: {0}")]
    TorchUnsupported(String),

    #[error("Could not lock device for configuration: {0}")]
    DeviceLocked(String),

    #[error("No camera available at the target position: {0}")]
    CameraSwitchUnavailable(String),

    // Writer errors
    #[error("Could not create segment writer: {0}")]
    WriterCreation(String),

    #[error("Segment writer failed: {0}")]
    WriterFailed(String),

    #[error("Segment writer is not writing")]
    WriterNotWriting,

    #[error("No photo capture observer registered")]
    NoObserver,

    #[error("Photo capture failed: {0}")]
    PhotoFailed(String),

    #[error("Photo capture timed out after {0}ms")]
    PhotoTimeout(u64),

    #[error("Segment finalize timed out after {0}ms")]
    FinalizeTimeout(u64),

    // Merge errors
    #[error("Merge failed: {0}")]
    Merge(String),

    #[error("Export timed out after {0}ms")]
    ExportTimeout(u64),

    // Gallery errors
    #[error("Media library access denied: {0}")]
    LibraryAccess(String),

    #[error("Could not save to media library: {0}")]
    GallerySave(String),

    // State errors
    #[error("Recording already in progress")]
    AlreadyRecording,

    #[error("No recording in progress")]
    NotRecording,

    #[error("Recording is not paused")]
    NotPaused,

    #[error("Recording produced no segments")]
    EmptyRecording,

    #[error("Capture pipeline is closed")]
    PipelineClosed,

    #[error("A photo capture is already in progress")]
    PhotoInProgress,
}

/// Coarse classification of a [`CaptureError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    Configuration,
    Writer,
    Merge,
    Gallery,
    Photo,
    State,
    Io,
}

impl CaptureError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CaptureError::Io(_) | CaptureError::Serialization(_) => ErrorKind::Io,
            CaptureError::NoDevice(_)
            | CaptureError::InputRejected(_)
            | CaptureError::OutputRejected(_)
            | CaptureError::TorchUnsupported(_)
            | CaptureError::DeviceLocked(_)
            | CaptureError::CameraSwitchUnavailable(_) => ErrorKind::Configuration,
            CaptureError::WriterCreation(_)
            | CaptureError::WriterFailed(_)
            | CaptureError::WriterNotWriting
            | CaptureError::NoObserver
            | CaptureError::FinalizeTimeout(_) => ErrorKind::Writer,
            CaptureError::Merge(_) | CaptureError::ExportTimeout(_) => ErrorKind::Merge,
            CaptureError::LibraryAccess(_) | CaptureError::GallerySave(_) => ErrorKind::Gallery,
            CaptureError::PhotoFailed(_) | CaptureError::PhotoTimeout(_) => ErrorKind::Photo,
            CaptureError::AlreadyRecording
            | CaptureError::NotRecording
            | CaptureError::NotPaused
            | CaptureError::EmptyRecording
            | CaptureError::PipelineClosed
            | CaptureError::PhotoInProgress => ErrorKind::State,
        }
    }

    /// Writer and merge failures lose the in-flight recording.
    pub fn is_fatal_to_recording(&self) -> bool {
        matches!(self.kind(), ErrorKind::Writer | ErrorKind::Merge)
    }

    fn code(&self) -> &'static str {
        match self {
            CaptureError::Io(_) => "IO_ERROR",
            CaptureError::Serialization(_) => "SERIALIZATION_ERROR",
            CaptureError::NoDevice(_) => "NO_DEVICE",
            CaptureError::InputRejected(_) => "INPUT_REJECTED",
            CaptureError::OutputRejected(_) => "OUTPUT_REJECTED",
            CaptureError::TorchUnsupported(_) => "TORCH_UNSUPPORTED",
            CaptureError::DeviceLocked(_) => "DEVICE_LOCKED",
            CaptureError::CameraSwitchUnavailable(_) => "CAMERA_SWITCH_UNAVAILABLE",
            CaptureError::WriterCreation(_) => "WRITER_CREATION",
            CaptureError::WriterFailed(_) => "WRITER_FAILED",
            CaptureError::WriterNotWriting => "WRITER_NOT_WRITING",
            CaptureError::NoObserver => "NO_OBSERVER",
            CaptureError::PhotoFailed(_) => "PHOTO_FAILED",
            CaptureError::PhotoTimeout(_) => "PHOTO_TIMEOUT",
            CaptureError::FinalizeTimeout(_) => "FINALIZE_TIMEOUT",
            CaptureError::Merge(_) => "MERGE_ERROR",
            CaptureError::ExportTimeout(_) => "EXPORT_TIMEOUT",
            CaptureError::LibraryAccess(_) => "LIBRARY_ACCESS",
            CaptureError::GallerySave(_) => "GALLERY_SAVE",
            CaptureError::AlreadyRecording => "ALREADY_RECORDING",
            CaptureError::NotRecording => "NOT_RECORDING",
            CaptureError::NotPaused => "NOT_PAUSED",
            CaptureError::EmptyRecording => "EMPTY_RECORDING",
            CaptureError::PipelineClosed => "PIPELINE_CLOSED",
            CaptureError::PhotoInProgress => "PHOTO_IN_PROGRESS",
        }
    }
}

/// Error response for the UI-facing layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&CaptureError> for ErrorResponse {
    fn from(error: &CaptureError) -> Self {
        ErrorResponse {
            code: error.code().to_string(),
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

impl From<CaptureError> for ErrorResponse {
    fn from(error: CaptureError) -> Self {
        ErrorResponse::from(&error)
    }
}

/// Result type alias using CaptureError
pub type CaptureResult<T> = Result<T, CaptureError>;
