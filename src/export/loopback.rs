//! In-process media store
//!
//! Writes segment and merged files as JSON sample manifests instead of encoded
//! media. Implements the writer factory, asset probe and exporter seams, with
//! switches to simulate track back-pressure and writer or export failures.

use crate::capture::sample::{MediaKind, SampleBuffer};
use crate::export::types::{
    AssetInfo, AssetProbe, Composition, ExportPreset, ExportStatus, Exporter, TrackInfo,
};
use crate::recorder::writer::{
    ContainerWriter, ContainerWriterFactory, TrackId, TrackSettings, WriterStatus,
};
use crate::utils::error::{CaptureError, CaptureResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// One written sample
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestSample {
    pub kind: MediaKind,
    pub pts_us: u64,
    pub duration_us: u64,
    pub data: Vec<u8>,
}

impl ManifestSample {
    fn end_us(&self) -> u64 {
        self.pts_us + self.duration_us
    }
}

/// File contents produced by the store
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaManifest {
    /// Source time of the timeline start
    #[serde(default)]
    pub origin_us: u64,
    pub tracks: Vec<TrackSettings>,
    pub samples: Vec<ManifestSample>,
}

impl MediaManifest {
    pub fn samples_of(&self, kind: MediaKind) -> impl Iterator<Item = &ManifestSample> {
        self.samples.iter().filter(move |s| s.kind == kind)
    }

    fn has_track(&self, kind: MediaKind) -> bool {
        self.samples_of(kind).next().is_some()
            || self.tracks.iter().any(|t| track_kind(t) == kind)
    }

    /// Duration of one track measured from the origin
    fn track_duration(&self, kind: MediaKind) -> Duration {
        let end = self.samples_of(kind).map(|s| s.end_us()).max().unwrap_or(0);
        Duration::from_micros(end.saturating_sub(self.origin_us))
    }
}

fn track_kind(settings: &TrackSettings) -> MediaKind {
    match settings {
        TrackSettings::Video(_) => MediaKind::Video,
        TrackSettings::Audio(_) => MediaKind::Audio,
    }
}

#[derive(Default)]
struct Controls {
    not_ready: Mutex<HashSet<MediaKind>>,
    writer_failure: Mutex<Option<String>>,
    export_failure: Mutex<Option<String>>,
    finish_delay: Mutex<Option<Duration>>,
    created: Mutex<Vec<PathBuf>>,
    cancelled: Mutex<Vec<PathBuf>>,
}

/// Manifest-backed writer factory, probe and exporter
#[derive(Clone, Default)]
pub struct MemoryMediaStore {
    controls: Arc<Controls>,
}

impl MemoryMediaStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report the given track kind as (not) ready for more data
    pub fn set_ready(&self, kind: MediaKind, ready: bool) {
        let mut not_ready = self.controls.not_ready.lock();
        if ready {
            not_ready.remove(&kind);
        } else {
            not_ready.insert(kind);
        }
    }

    /// Put every open writer into the failed status on its next operation
    pub fn fail_writers(&self, message: Option<String>) {
        *self.controls.writer_failure.lock() = message;
    }

    pub fn fail_export(&self, message: Option<String>) {
        *self.controls.export_failure.lock() = message;
    }

    /// Delay every `finish_writing`
    pub fn delay_finish(&self, delay: Option<Duration>) {
        *self.controls.finish_delay.lock() = delay;
    }

    /// Paths of every writer created so far
    pub fn created_paths(&self) -> Vec<PathBuf> {
        self.controls.created.lock().clone()
    }

    /// Paths of every writer cancelled after it started writing
    pub fn cancelled_paths(&self) -> Vec<PathBuf> {
        self.controls.cancelled.lock().clone()
    }

    pub fn read_manifest(path: &Path) -> CaptureResult<MediaManifest> {
        let content = std::fs::read(path)?;
        Ok(serde_json::from_slice(&content)?)
    }

    async fn load(path: &Path) -> CaptureResult<MediaManifest> {
        let content = tokio::fs::read(path).await?;
        Ok(serde_json::from_slice(&content)?)
    }

    async fn render(composition: &Composition, output: &Path) -> CaptureResult<()> {
        let mut sources: HashMap<&Path, MediaManifest> = HashMap::new();
        for clip in composition.video.iter().chain(composition.audio.iter()) {
            if !sources.contains_key(clip.source.as_path()) {
                sources.insert(clip.source.as_path(), Self::load(&clip.source).await?);
            }
        }

        let mut merged = MediaManifest::default();
        for kind in [MediaKind::Video, MediaKind::Audio] {
            for clip in composition.clips(kind) {
                let Some(source) = sources.get(clip.source.as_path()) else {
                    continue;
                };
                if merged.tracks.iter().all(|t| track_kind(t) != kind) {
                    if let Some(track) = source.tracks.iter().find(|t| track_kind(t) == kind) {
                        merged.tracks.push(*track);
                    }
                }

                let start = source.origin_us + clip.source_range.start.as_micros() as u64;
                let end = source.origin_us + clip.source_range.end().as_micros() as u64;
                let at = clip.at.as_micros() as u64;
                merged.samples.extend(
                    source
                        .samples_of(kind)
                        .filter(|s| s.pts_us >= start && s.pts_us < end)
                        .map(|s| ManifestSample {
                            pts_us: s.pts_us - start + at,
                            ..s.clone()
                        }),
                );
            }
        }
        merged.samples.sort_by_key(|s| s.pts_us);

        tokio::fs::write(output, serde_json::to_vec(&merged)?).await?;
        Ok(())
    }
}

impl ContainerWriterFactory for MemoryMediaStore {
    fn create(&self, path: &Path) -> CaptureResult<Box<dyn ContainerWriter>> {
        std::fs::File::create(path)?;
        self.controls.created.lock().push(path.to_path_buf());
        Ok(Box::new(MemoryWriter {
            path: path.to_path_buf(),
            status: WriterStatus::Unknown,
            manifest: MediaManifest::default(),
            controls: self.controls.clone(),
        }))
    }
}

#[async_trait]
impl AssetProbe for MemoryMediaStore {
    async fn probe(&self, path: &Path) -> CaptureResult<AssetInfo> {
        let manifest = Self::load(path).await?;
        let track = |kind: MediaKind| {
            manifest.has_track(kind).then(|| TrackInfo {
                kind,
                duration: manifest.track_duration(kind),
            })
        };
        let video = track(MediaKind::Video);
        let audio = track(MediaKind::Audio);
        let duration = [video, audio]
            .iter()
            .flatten()
            .map(|t| t.duration)
            .max()
            .unwrap_or_default();

        Ok(AssetInfo {
            path: path.to_path_buf(),
            duration,
            video,
            audio,
        })
    }
}

#[async_trait]
impl Exporter for MemoryMediaStore {
    async fn export(&self, composition: &Composition, output: &Path, _preset: ExportPreset) -> ExportStatus {
        let failure = self.controls.export_failure.lock().clone();
        if let Some(message) = failure {
            return ExportStatus::Failed(message);
        }
        match Self::render(composition, output).await {
            Ok(()) => ExportStatus::Completed,
            Err(e) => ExportStatus::Failed(e.to_string()),
        }
    }
}

struct MemoryWriter {
    path: PathBuf,
    status: WriterStatus,
    manifest: MediaManifest,
    controls: Arc<Controls>,
}

impl MemoryWriter {
    fn injected_failure(&mut self) -> bool {
        let failure = self.controls.writer_failure.lock().clone();
        match failure {
            Some(message) => {
                self.status = WriterStatus::Failed(message);
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl ContainerWriter for MemoryWriter {
    fn path(&self) -> &Path {
        &self.path
    }

    fn can_add(&self, settings: &TrackSettings) -> bool {
        self.status == WriterStatus::Unknown
            && self
                .manifest
                .tracks
                .iter()
                .all(|t| track_kind(t) != track_kind(settings))
    }

    fn add_track(&mut self, settings: TrackSettings) -> CaptureResult<TrackId> {
        if !self.can_add(&settings) {
            return Err(CaptureError::WriterFailed(format!(
                "cannot add {:?} track",
                track_kind(&settings)
            )));
        }
        self.manifest.tracks.push(settings);
        Ok(TrackId(self.manifest.tracks.len() - 1))
    }

    fn status(&self) -> WriterStatus {
        self.status.clone()
    }

    fn start_writing(&mut self, origin: Duration) -> CaptureResult<()> {
        if self.status != WriterStatus::Unknown {
            return Err(CaptureError::WriterFailed(format!(
                "cannot start writer in status {:?}",
                self.status
            )));
        }
        if !self.injected_failure() {
            self.manifest.origin_us = origin.as_micros() as u64;
            self.status = WriterStatus::Writing;
        }
        Ok(())
    }

    fn is_ready_for_more_media_data(&self, track: TrackId) -> bool {
        let Some(settings) = self.manifest.tracks.get(track.0) else {
            return false;
        };
        self.status == WriterStatus::Writing
            && !self.controls.not_ready.lock().contains(&track_kind(settings))
    }

    fn append(&mut self, track: TrackId, sample: &SampleBuffer) -> CaptureResult<()> {
        if self.status != WriterStatus::Writing {
            return Err(CaptureError::WriterNotWriting);
        }
        let kind = match self.manifest.tracks.get(track.0) {
            Some(settings) => track_kind(settings),
            None => return Err(CaptureError::WriterFailed(format!("unknown track {:?}", track))),
        };
        if self.injected_failure() {
            return Ok(());
        }
        self.manifest.samples.push(ManifestSample {
            kind,
            pts_us: sample.pts.as_micros() as u64,
            duration_us: sample.duration.as_micros() as u64,
            data: sample.data.to_vec(),
        });
        Ok(())
    }

    async fn finish_writing(&mut self) -> CaptureResult<()> {
        let delay = *self.controls.finish_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.injected_failure() {
            return Ok(());
        }
        tokio::fs::write(&self.path, serde_json::to_vec(&self.manifest)?).await?;
        self.status = WriterStatus::Completed;
        Ok(())
    }

    fn cancel_writing(&mut self) {
        if self.status == WriterStatus::Writing {
            self.controls.cancelled.lock().push(self.path.clone());
        }
        self.status = WriterStatus::Cancelled;
        if self.path.exists() {
            if let Err(e) = std::fs::remove_file(&self.path) {
                tracing::warn!("Failed to remove cancelled file {:?}: {}", self.path, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::sample::{FormatDescription, PixelFormat};
    use crate::recorder::writer::{VideoCodec, VideoSettings};

    fn frame(pts_ms: u64) -> SampleBuffer {
        SampleBuffer::new(
            FormatDescription::Video {
                width: 4,
                height: 4,
                pixel_format: PixelFormat::Bgra,
            },
            Duration::from_millis(pts_ms),
            Duration::from_millis(40),
            vec![pts_ms as u8],
        )
    }

    fn video_track() -> TrackSettings {
        TrackSettings::Video(VideoSettings {
            codec: VideoCodec::H264,
            width: 4,
            height: 4,
            frame_rate: 25,
        })
    }

    #[tokio::test]
    async fn test_writer_probe_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mov");
        let store = MemoryMediaStore::new();

        let mut writer = store.create(&path).unwrap();
        let track = writer.add_track(video_track()).unwrap();
        assert!(!writer.can_add(&video_track()));
        writer.start_writing(Duration::from_millis(1000)).unwrap();
        writer.append(track, &frame(1000)).unwrap();
        writer.append(track, &frame(1040)).unwrap();
        writer.finish_writing().await.unwrap();
        assert_eq!(writer.status(), WriterStatus::Completed);

        let info = store.probe(&path).await.unwrap();
        assert_eq!(info.duration, Duration::from_millis(80));
        assert!(info.audio.is_none());
        assert_eq!(store.created_paths(), vec![path]);
    }

    #[tokio::test]
    async fn test_cancel_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mov");
        let store = MemoryMediaStore::new();

        let mut writer = store.create(&path).unwrap();
        assert!(path.exists());
        writer.cancel_writing();
        assert!(!path.exists());
        assert_eq!(writer.status(), WriterStatus::Cancelled);
    }

    #[test]
    fn test_readiness_switch() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryMediaStore::new();
        let mut writer = store.create(&dir.path().join("clip.mov")).unwrap();
        let track = writer.add_track(video_track()).unwrap();
        assert!(!writer.is_ready_for_more_media_data(track));

        writer.start_writing(Duration::ZERO).unwrap();
        assert!(writer.is_ready_for_more_media_data(track));
        store.set_ready(MediaKind::Video, false);
        assert!(!writer.is_ready_for_more_media_data(track));
    }
}
