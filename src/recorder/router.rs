//! Frame routing state machine
//!
//! `FrameRouter` consumes the live sample stream and drives the segment
//! lifecycle: a writer is opened at record start and at every resume, samples
//! are forwarded to it under the per-track readiness policy, and segments are
//! finalized at pause or stop and merged at stop.

use crate::capture::sample::{MediaKind, SampleBuffer};
use crate::capture::traits::Resolution;
use crate::config::CaptureConfig;
use crate::export::merger::SegmentMerger;
use crate::export::types::MergedRecording;
use crate::recorder::state::{RecordingState, Segment};
use crate::recorder::writer::{ContainerWriterFactory, SegmentedWriter, WriterOptions};
use crate::utils::error::{CaptureError, CaptureResult};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;

/// Router state with the payload each state owns
enum RouterState {
    Idle,
    /// Writer open, tracks being configured; samples held until writing begins
    PendingStart {
        writer: SegmentedWriter,
        lead_in: VecDeque<SampleBuffer>,
    },
    Recording {
        writer: SegmentedWriter,
    },
    Paused,
}

impl RouterState {
    fn recording_state(&self) -> RecordingState {
        match self {
            RouterState::Idle => RecordingState::Idle,
            RouterState::PendingStart { .. } => RecordingState::PendingStart,
            RouterState::Recording { .. } => RecordingState::Recording,
            RouterState::Paused => RecordingState::Paused,
        }
    }
}

/// Output of a stopped recording
#[derive(Debug, Clone)]
pub struct RecordingOutput {
    pub merged: MergedRecording,
    pub segments: Vec<Segment>,
}

pub struct FrameRouter {
    config: CaptureConfig,
    writers: Arc<dyn ContainerWriterFactory>,
    merger: SegmentMerger,
    state: RouterState,
    segments: Vec<Segment>,
    next_index: usize,
    writer_options: WriterOptions,
    dropped_samples: u64,
}

impl FrameRouter {
    pub fn new(
        config: CaptureConfig,
        writers: Arc<dyn ContainerWriterFactory>,
        merger: SegmentMerger,
    ) -> Self {
        let writer_options = WriterOptions {
            frame_rate: config.video_frame_rate,
            audio_bitrate: config.audio_bitrate,
            video_resolution: None,
        };
        Self {
            config,
            writers,
            merger,
            state: RouterState::Idle,
            segments: Vec::new(),
            next_index: 0,
            writer_options,
            dropped_samples: 0,
        }
    }

    pub fn state(&self) -> RecordingState {
        self.state.recording_state()
    }

    /// Samples dropped by the readiness policy or a full lead-in buffer
    pub fn dropped_samples(&self) -> u64 {
        self.dropped_samples
    }

    /// Finalized segments of the current recording
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Begin a new top-level recording
    ///
    /// Clears the working directory and opens the first segment. A writer that
    /// cannot be opened leaves the router idle.
    pub async fn start(&mut self, video_resolution: Option<Resolution>) -> CaptureResult<()> {
        if !matches!(self.state, RouterState::Idle) {
            return Err(CaptureError::AlreadyRecording);
        }

        let dir = &self.config.working_dir;
        if tokio::fs::try_exists(dir).await? {
            tokio::fs::remove_dir_all(dir).await?;
        }
        tokio::fs::create_dir_all(dir).await?;

        self.segments.clear();
        self.next_index = 0;
        self.dropped_samples = 0;
        self.writer_options.video_resolution = video_resolution;

        let writer = self.open_segment()?;
        self.state = RouterState::PendingStart {
            writer,
            lead_in: VecDeque::new(),
        };
        tracing::info!("Recording started in {:?}", self.config.working_dir);
        Ok(())
    }

    fn open_segment(&mut self) -> CaptureResult<SegmentedWriter> {
        let index = self.next_index;
        let writer = SegmentedWriter::create(
            &self.writers,
            self.config.segment_path(index),
            index,
            self.writer_options,
        )?;
        self.next_index += 1;
        Ok(writer)
    }

    /// Route one sample according to the current state
    ///
    /// A writer failure resets the router to idle and is returned.
    pub fn handle_sample(&mut self, sample: SampleBuffer) -> CaptureResult<()> {
        let result = match &mut self.state {
            RouterState::Idle | RouterState::Paused => Ok(()),
            RouterState::PendingStart { .. } => self.handle_pending(sample),
            RouterState::Recording { writer } => {
                Self::forward(writer, &sample).map(|written| {
                    if !written {
                        self.dropped_samples += 1;
                    }
                })
            }
        };
        result.map_err(|e| self.fail(e))
    }

    fn forward(writer: &mut SegmentedWriter, sample: &SampleBuffer) -> CaptureResult<bool> {
        match sample.kind() {
            MediaKind::Video => writer.write_video(sample),
            MediaKind::Audio => writer.write_audio(sample),
        }
    }

    /// Configure tracks lazily and begin writing once both formats are known
    fn handle_pending(&mut self, sample: SampleBuffer) -> CaptureResult<()> {
        let capacity = self.config.lead_in_capacity.max(1);
        let RouterState::PendingStart { writer, lead_in } = &mut self.state else {
            return Ok(());
        };

        match sample.kind() {
            MediaKind::Video => {
                if let Some(resolution) = sample.format.dimensions() {
                    writer.setup_video_input(resolution)?;
                }
            }
            MediaKind::Audio => {
                if let Some(stream) = sample.format.audio_stream() {
                    writer.setup_audio_input(stream)?;
                }
            }
        }

        if lead_in.len() >= capacity {
            lead_in.pop_front();
            self.dropped_samples += 1;
        }
        lead_in.push_back(sample);

        // The earliest held video frame becomes the timeline origin
        let Some(origin) = lead_in.iter().find(|s| s.is_video()).map(|s| s.pts) else {
            return Ok(());
        };
        if !writer.start_if_ready(origin)? {
            return Ok(());
        }

        let RouterState::PendingStart { mut writer, lead_in } =
            std::mem::replace(&mut self.state, RouterState::Idle)
        else {
            return Ok(());
        };

        let mut dropped = 0;
        let mut result = Ok(());
        for held in &lead_in {
            match Self::forward(&mut writer, held) {
                Ok(true) => {}
                Ok(false) => dropped += 1,
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }
        self.dropped_samples += dropped;
        tracing::debug!(
            "Segment {} flushed {} held samples ({} dropped)",
            writer.index(),
            lead_in.len(),
            dropped
        );

        match result {
            Ok(()) => {
                self.state = RouterState::Recording { writer };
                Ok(())
            }
            Err(e) => {
                writer.cancel();
                Err(e)
            }
        }
    }

    /// Finalize the current segment and hold without a writer
    pub async fn pause(&mut self) -> CaptureResult<Option<Segment>> {
        let writer = match std::mem::replace(&mut self.state, RouterState::Paused) {
            RouterState::PendingStart { writer, .. } | RouterState::Recording { writer } => writer,
            other => {
                self.state = other;
                return Err(CaptureError::NotRecording);
            }
        };

        let segment = self.finalize(writer).await?;
        tracing::info!("Recording paused after {} segments", self.segments.len());
        Ok(segment)
    }

    /// Open the next segment
    pub async fn resume(&mut self) -> CaptureResult<()> {
        if !matches!(self.state, RouterState::Paused) {
            return Err(CaptureError::NotPaused);
        }

        let writer = self.open_segment().map_err(|e| self.fail(e))?;
        tracing::info!("Recording resumed with segment {}", writer.index());
        self.state = RouterState::PendingStart {
            writer,
            lead_in: VecDeque::new(),
        };
        Ok(())
    }

    /// Finalize any open segment and merge every segment in order
    pub async fn stop(&mut self) -> CaptureResult<RecordingOutput> {
        match std::mem::replace(&mut self.state, RouterState::Paused) {
            RouterState::Idle => {
                self.state = RouterState::Idle;
                return Err(CaptureError::NotRecording);
            }
            RouterState::PendingStart { writer, .. } | RouterState::Recording { writer } => {
                self.finalize(writer).await?;
            }
            RouterState::Paused => {}
        }

        if self.segments.is_empty() {
            tracing::warn!("Recording stopped before any segment was written");
            return Err(self.fail(CaptureError::EmptyRecording));
        }

        let paths: Vec<PathBuf> = self.segments.iter().map(|s| s.path.clone()).collect();
        let output = self.config.merged_path();
        let timeout = self.config.export_timeout();

        let merged = match tokio::time::timeout(timeout, self.merger.merge(&paths, &output)).await {
            Ok(Ok(merged)) => merged,
            Ok(Err(e)) => return Err(self.fail(e)),
            Err(_) => {
                remove_file(&output);
                return Err(self.fail(CaptureError::ExportTimeout(self.config.export_timeout_ms)));
            }
        };

        for path in &paths {
            remove_file(path);
        }
        let segments = std::mem::take(&mut self.segments);
        self.state = RouterState::Idle;
        tracing::info!(
            "Recording stopped: {} segments merged into {:?}",
            segments.len(),
            merged.path
        );

        Ok(RecordingOutput { merged, segments })
    }

    /// Finalize `writer` with the configured bound, recording its segment
    ///
    /// A failed or timed-out finalize cancels the writer, which stops its
    /// encoder and removes every partial output.
    async fn finalize(&mut self, mut writer: SegmentedWriter) -> CaptureResult<Option<Segment>> {
        let timeout = self.config.finalize_timeout();

        let result = match tokio::time::timeout(timeout, writer.finalize()).await {
            Ok(result) => result,
            Err(_) => Err(CaptureError::FinalizeTimeout(self.config.finalize_timeout_ms)),
        };

        match result {
            Ok(Some(segment)) => {
                self.segments.push(segment.clone());
                Ok(Some(segment))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                writer.cancel();
                Err(self.fail(e))
            }
        }
    }

    /// Discard the recording after an unrecoverable error
    ///
    /// The open writer is cancelled and every finalized segment file removed.
    fn fail(&mut self, error: CaptureError) -> CaptureError {
        match std::mem::replace(&mut self.state, RouterState::Idle) {
            RouterState::PendingStart { writer, .. } | RouterState::Recording { writer } => {
                writer.cancel()
            }
            RouterState::Idle | RouterState::Paused => {}
        }
        for segment in self.segments.drain(..) {
            remove_file(&segment.path);
        }
        tracing::error!("Recording reset after error: {}", error);
        error
    }

    /// Cancel any in-flight recording without merging
    pub fn abandon(&mut self) {
        if self.state.recording_state().is_active() {
            tracing::warn!("Abandoning recording in progress");
            self.fail(CaptureError::NotRecording);
        }
    }
}

fn remove_file(path: &std::path::Path) {
    if path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            tracing::warn!("Failed to remove {:?}: {}", path, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::sample::{
        AudioSampleFormat, AudioStreamDescription, FormatDescription, PixelFormat,
    };
    use crate::export::loopback::MemoryMediaStore;
    use std::time::Duration;

    fn video(i: u64) -> SampleBuffer {
        SampleBuffer::new(
            FormatDescription::Video {
                width: 1920,
                height: 1080,
                pixel_format: PixelFormat::Nv12,
            },
            Duration::from_millis(i * 33),
            Duration::from_millis(33),
            vec![i as u8],
        )
    }

    fn audio(i: u64) -> SampleBuffer {
        SampleBuffer::new(
            FormatDescription::Audio(AudioStreamDescription {
                sample_rate: 48_000.0,
                channels: 1,
                sample_format: AudioSampleFormat::F32,
            }),
            Duration::from_millis(i * 33),
            Duration::from_millis(20),
            vec![100 + i as u8],
        )
    }

    fn router(store: &MemoryMediaStore, dir: &std::path::Path) -> FrameRouter {
        let config = CaptureConfig::default().with_working_dir(dir.join("work"));
        FrameRouter::new(
            config,
            Arc::new(store.clone()),
            SegmentMerger::new(Arc::new(store.clone()), Arc::new(store.clone())),
        )
    }

    fn deliver(router: &mut FrameRouter, range: std::ops::Range<u64>) {
        for i in range {
            router.handle_sample(video(i)).unwrap();
            router.handle_sample(audio(i)).unwrap();
        }
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryMediaStore::new();
        let mut router = router(&store, dir.path());

        assert_eq!(router.state(), RecordingState::Idle);
        router.start(None).await.unwrap();
        assert_eq!(router.state(), RecordingState::PendingStart);

        router.handle_sample(video(0)).unwrap();
        assert_eq!(router.state(), RecordingState::PendingStart);
        router.handle_sample(audio(0)).unwrap();
        assert_eq!(router.state(), RecordingState::Recording);

        router.pause().await.unwrap();
        assert_eq!(router.state(), RecordingState::Paused);
        router.resume().await.unwrap();
        assert_eq!(router.state(), RecordingState::PendingStart);
    }

    #[tokio::test]
    async fn test_invalid_transitions() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryMediaStore::new();
        let mut router = router(&store, dir.path());

        assert!(matches!(router.pause().await, Err(CaptureError::NotRecording)));
        assert!(matches!(router.resume().await, Err(CaptureError::NotPaused)));
        assert!(matches!(router.stop().await, Err(CaptureError::NotRecording)));

        router.start(None).await.unwrap();
        assert!(matches!(router.start(None).await, Err(CaptureError::AlreadyRecording)));
        assert!(matches!(router.resume().await, Err(CaptureError::NotPaused)));
    }

    #[tokio::test]
    async fn test_pause_resume_merges_segments_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryMediaStore::new();
        let mut router = router(&store, dir.path());

        router.start(None).await.unwrap();
        deliver(&mut router, 0..5);
        let first = router.pause().await.unwrap().unwrap();
        assert_eq!((first.video_samples, first.audio_samples), (5, 5));

        router.resume().await.unwrap();
        deliver(&mut router, 5..8);
        let output = router.stop().await.unwrap();

        assert_eq!(output.segments.len(), 2);
        assert_eq!(output.segments[1].index, 1);
        assert_eq!(router.state(), RecordingState::Idle);

        let manifest = MemoryMediaStore::read_manifest(&output.merged.path).unwrap();
        let video: Vec<u8> = manifest
            .samples_of(MediaKind::Video)
            .map(|s| s.data[0])
            .collect();
        let audio: Vec<u8> = manifest
            .samples_of(MediaKind::Audio)
            .map(|s| s.data[0])
            .collect();
        assert_eq!(video, (0..8).collect::<Vec<u8>>());
        assert_eq!(audio, (100..108).collect::<Vec<u8>>());
        assert!(!output.segments[0].path.exists());
    }

    #[tokio::test]
    async fn test_audio_before_first_video_is_not_written() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryMediaStore::new();
        let mut router = router(&store, dir.path());

        router.start(None).await.unwrap();
        router.handle_sample(audio(0)).unwrap();
        router.handle_sample(audio(1)).unwrap();
        router.handle_sample(video(2)).unwrap();
        router.handle_sample(audio(2)).unwrap();

        let segment = router.pause().await.unwrap().unwrap();
        assert_eq!(segment.video_samples, 1);
        assert_eq!(segment.audio_samples, 1);

        let manifest = MemoryMediaStore::read_manifest(&segment.path).unwrap();
        assert_eq!(manifest.samples[0].kind, MediaKind::Video);
    }

    #[tokio::test]
    async fn test_not_ready_samples_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryMediaStore::new();
        let mut router = router(&store, dir.path());

        router.start(None).await.unwrap();
        deliver(&mut router, 0..2);
        store.set_ready(MediaKind::Video, false);
        router.handle_sample(video(2)).unwrap();
        router.handle_sample(video(3)).unwrap();
        store.set_ready(MediaKind::Video, true);
        router.handle_sample(video(4)).unwrap();

        assert_eq!(router.dropped_samples(), 2);
        let segment = router.pause().await.unwrap().unwrap();
        assert_eq!(segment.video_samples, 3);
    }

    #[tokio::test]
    async fn test_stop_right_after_start() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryMediaStore::new();
        let mut router = router(&store, dir.path());

        router.start(None).await.unwrap();
        let result = router.stop().await;
        assert!(matches!(result, Err(CaptureError::EmptyRecording)));
        assert_eq!(router.state(), RecordingState::Idle);
        assert!(!dir.path().join("work/segment-0.mov").exists());

        // The router is reusable after the failed stop
        router.start(None).await.unwrap();
        assert_eq!(router.state(), RecordingState::PendingStart);
    }

    #[tokio::test]
    async fn test_writer_failure_resets_everything() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryMediaStore::new();
        let mut router = router(&store, dir.path());

        router.start(None).await.unwrap();
        deliver(&mut router, 0..3);
        let first = router.pause().await.unwrap().unwrap();
        router.resume().await.unwrap();
        deliver(&mut router, 3..4);

        store.fail_writers(Some("encoder crashed".to_string()));
        let err = router.handle_sample(video(4)).unwrap_err();
        assert!(matches!(err, CaptureError::WriterFailed(_)));
        assert_eq!(router.state(), RecordingState::Idle);
        assert!(router.segments().is_empty());
        assert!(!first.path.exists());
    }

    #[tokio::test]
    async fn test_merge_failure_discards_recording() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryMediaStore::new();
        let mut router = router(&store, dir.path());

        router.start(None).await.unwrap();
        deliver(&mut router, 0..2);
        store.fail_export(Some("export session failed".to_string()));

        let err = router.stop().await.unwrap_err();
        assert!(matches!(err, CaptureError::Merge(ref m) if m == "export session failed"));
        assert_eq!(router.state(), RecordingState::Idle);
        assert!(!dir.path().join("work/recording.mov").exists());
    }

    #[tokio::test]
    async fn test_finalize_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryMediaStore::new();
        let mut config = CaptureConfig::default().with_working_dir(dir.path().join("work"));
        config.finalize_timeout_ms = 20;
        let mut router = FrameRouter::new(
            config,
            Arc::new(store.clone()),
            SegmentMerger::new(Arc::new(store.clone()), Arc::new(store.clone())),
        );

        router.start(None).await.unwrap();
        deliver(&mut router, 0..2);
        store.delay_finish(Some(Duration::from_secs(5)));

        let err = router.pause().await.unwrap_err();
        assert!(matches!(err, CaptureError::FinalizeTimeout(20)));
        assert_eq!(router.state(), RecordingState::Idle);

        let segment = dir.path().join("work/segment-0.mov");
        assert_eq!(store.cancelled_paths(), vec![segment.clone()]);
        assert!(!segment.exists());
    }

    #[tokio::test]
    async fn test_repeated_cycles_merge_every_segment() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryMediaStore::new();
        let mut router = router(&store, dir.path());

        router.start(None).await.unwrap();
        for cycle in 0..3 {
            deliver(&mut router, cycle * 4..cycle * 4 + 4);
            router.pause().await.unwrap().unwrap();
            router.resume().await.unwrap();
        }
        deliver(&mut router, 12..14);
        let output = router.stop().await.unwrap();

        assert_eq!(output.segments.len(), 4);
        assert_eq!(output.merged.segment_count, 4);
        let indices: Vec<usize> = output.segments.iter().map(|s| s.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);

        let sum: Duration = output.segments.iter().map(|s| s.duration()).sum();
        let diff = output.merged.duration.as_secs_f64() - sum.as_secs_f64();
        assert!(diff.abs() < 1e-6);

        let manifest = MemoryMediaStore::read_manifest(&output.merged.path).unwrap();
        let video: Vec<u8> = manifest
            .samples_of(MediaKind::Video)
            .map(|s| s.data[0])
            .collect();
        assert_eq!(video, (0..14).collect::<Vec<u8>>());
        assert!(store.cancelled_paths().is_empty());
    }

    #[tokio::test]
    async fn test_start_clears_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryMediaStore::new();
        let mut router = router(&store, dir.path());
        let stale = dir.path().join("work/stale.mov");
        std::fs::create_dir_all(stale.parent().unwrap()).unwrap();
        std::fs::write(&stale, b"old").unwrap();

        router.start(None).await.unwrap();
        assert!(!stale.exists());
        assert!(dir.path().join("work/segment-0.mov").exists());
    }

    #[tokio::test]
    async fn test_lead_in_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryMediaStore::new();
        let mut config = CaptureConfig::default().with_working_dir(dir.path().join("work"));
        config.lead_in_capacity = 3;
        let mut router = FrameRouter::new(
            config,
            Arc::new(store.clone()),
            SegmentMerger::new(Arc::new(store.clone()), Arc::new(store.clone())),
        );

        router.start(None).await.unwrap();
        for i in 0..5 {
            router.handle_sample(video(i)).unwrap();
        }
        assert_eq!(router.dropped_samples(), 2);

        router.handle_sample(audio(5)).unwrap();
        assert_eq!(router.state(), RecordingState::Recording);
        let segment = router.pause().await.unwrap().unwrap();
        // Oldest frames were evicted; frames 3 and 4 plus the audio remain
        assert_eq!(segment.video_samples, 2);
        assert_eq!(segment.audio_samples, 1);
    }
}
