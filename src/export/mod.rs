//! Segment export module
//!
//! This module concatenates finalized segments into the deliverable recording,
//! with an ffmpeg backend and an in-process manifest backend.

pub mod ffmpeg;
pub mod loopback;
pub mod merger;
pub mod types;

pub use ffmpeg::{FfmpegExporter, FfmpegProbe, FfmpegWriterFactory};
pub use loopback::MemoryMediaStore;
pub use merger::SegmentMerger;
pub use types::{
    AssetInfo, AssetProbe, Composition, CompositionClip, ExportPreset, ExportStatus, Exporter,
    MergedRecording, TimeRange, TrackInfo,
};
