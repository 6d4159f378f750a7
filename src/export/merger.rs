//! Segment merging
//!
//! Concatenates finalized segment files, in order, into one deliverable file.

use crate::export::types::{
    AssetProbe, Composition, CompositionClip, ExportPreset, ExportStatus, Exporter,
    MergedRecording, TimeRange,
};
use crate::utils::error::{CaptureError, CaptureResult};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub struct SegmentMerger {
    probe: Arc<dyn AssetProbe>,
    exporter: Arc<dyn Exporter>,
    preset: ExportPreset,
}

impl SegmentMerger {
    /// Merger exporting at the highest preset
    pub fn new(probe: Arc<dyn AssetProbe>, exporter: Arc<dyn Exporter>) -> Self {
        Self {
            probe,
            exporter,
            preset: ExportPreset::Highest,
        }
    }

    /// Lay every segment's tracks end to end
    ///
    /// Each segment's video (and audio, when present) is inserted at the
    /// running duration of the segments before it.
    pub async fn build_composition(&self, segments: &[PathBuf]) -> CaptureResult<Composition> {
        let mut composition = Composition::default();
        let mut cursor = Duration::ZERO;

        for path in segments {
            let asset = self
                .probe
                .probe(path)
                .await
                .map_err(|e| CaptureError::Merge(format!("{:?}: {}", path, e)))?;

            let video = asset
                .video
                .ok_or_else(|| CaptureError::Merge(format!("{:?} has no video track", path)))?;

            composition.video.push(CompositionClip {
                source: path.clone(),
                source_range: TimeRange {
                    start: Duration::ZERO,
                    duration: video.duration,
                },
                at: cursor,
            });

            if let Some(audio) = asset.audio {
                composition.audio.push(CompositionClip {
                    source: path.clone(),
                    source_range: TimeRange {
                        start: Duration::ZERO,
                        duration: audio.duration,
                    },
                    at: cursor,
                });
            }

            cursor += asset.duration;
        }

        composition.duration = cursor;
        Ok(composition)
    }

    /// Merge `segments` into `output`
    pub async fn merge(&self, segments: &[PathBuf], output: &Path) -> CaptureResult<MergedRecording> {
        if segments.is_empty() {
            return Err(CaptureError::EmptyRecording);
        }

        tracing::info!("Merging {} segments into {:?}", segments.len(), output);
        let composition = self.build_composition(segments).await?;

        if output.exists() {
            tokio::fs::remove_file(output).await?;
        }

        match self.exporter.export(&composition, output, self.preset).await {
            ExportStatus::Completed => {}
            ExportStatus::Failed(message) => {
                tracing::error!("Export failed: {}", message);
                return Err(CaptureError::Merge(message));
            }
            ExportStatus::Cancelled => {
                return Err(CaptureError::Merge("export cancelled".to_string()));
            }
        }

        tracing::info!(
            "Merged recording written: {:?} ({:.0}ms)",
            output,
            composition.duration.as_secs_f64() * 1000.0
        );

        Ok(MergedRecording {
            path: output.to_path_buf(),
            duration: composition.duration,
            segment_count: segments.len(),
        })
    }
}
