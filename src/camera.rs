//! Camera controller
//!
//! Orchestrates the session topology, the capture pipeline, still photos and
//! the gallery hand-off, and publishes status and events for the UI.
//!
//! Session topology changes run under one async mutex and writer state lives
//! on the pipeline task. The observable status copies the pipeline's published
//! recording state, both after each request and whenever the pipeline resets
//! on its own.

use crate::capture::traits::{
    CaptureSession, DeviceDiscovery, DeviceOrientation, DevicePosition, FlashMode, OutputHandle,
    OutputKind, PhotoOutput, TorchMode, VideoOrientation,
};
use crate::config::CaptureConfig;
use crate::events::{CaptureEvent, CaptureStatus};
use crate::export::merger::SegmentMerger;
use crate::export::types::{AssetProbe, Exporter};
use crate::gallery::{self, Gallery};
use crate::photo::{PhotoCapture, PhotoCaptureObserver};
use crate::recorder::pipeline::PipelineHandle;
use crate::recorder::router::FrameRouter;
use crate::recorder::state::{RecordingState, RecordingSummary, Segment};
use crate::recorder::writer::ContainerWriterFactory;
use crate::session::{DeviceManager, SessionConfigurator, Topology};
use crate::utils::error::{CaptureError, CaptureResult, ErrorResponse};
use std::sync::Arc;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Platform collaborators the controller drives
pub struct CaptureBackends {
    pub discovery: Arc<dyn DeviceDiscovery>,
    pub session: Arc<dyn CaptureSession>,
    pub photo_output: Arc<dyn PhotoOutput>,
    pub writers: Arc<dyn ContainerWriterFactory>,
    pub probe: Arc<dyn AssetProbe>,
    pub exporter: Arc<dyn Exporter>,
    pub gallery: Arc<dyn Gallery>,
}

/// State owned by the session-topology context
struct SessionContext {
    configurator: SessionConfigurator,
    devices: DeviceManager,
    video_output: OutputHandle,
    audio_output: OutputHandle,
    orientation: DeviceOrientation,
}

pub struct CameraController {
    config: CaptureConfig,
    session: Mutex<SessionContext>,
    photo: PhotoCapture,
    gallery: Arc<dyn Gallery>,
    pipeline: PipelineHandle,
    pipeline_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
    status_task: JoinHandle<()>,
    status_tx: Arc<watch::Sender<CaptureStatus>>,
    event_tx: broadcast::Sender<CaptureEvent>,
}

/// Copy `state` into `status`; returns whether anything changed
fn apply_recording_state(status: &mut CaptureStatus, state: RecordingState) -> bool {
    if status.recording_state == state && status.recording_active == state.is_active() {
        return false;
    }
    status.recording_state = state;
    status.recording_active = state.is_active();
    true
}

/// Follow pipeline state changes into the observable status
async fn mirror_recording_state(
    mut state: watch::Receiver<RecordingState>,
    status: Arc<watch::Sender<CaptureStatus>>,
) {
    while state.changed().await.is_ok() {
        // Read under the status lock so a stale value never overwrites a newer one
        status.send_if_modified(|s| apply_recording_state(s, *state.borrow_and_update()));
    }
}

impl CameraController {
    /// Select devices and spawn the capture pipeline
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(config: CaptureConfig, backends: CaptureBackends) -> CaptureResult<Self> {
        let devices = DeviceManager::new(backends.discovery)?;
        let (event_tx, _) = broadcast::channel(100);

        let router = FrameRouter::new(
            config.clone(),
            backends.writers,
            SegmentMerger::new(backends.probe, backends.exporter),
        );
        let (pipeline, task) =
            PipelineHandle::spawn(router, config.frame_queue_depth, event_tx.clone());

        let (status_tx, _) = watch::channel(CaptureStatus {
            camera_position: Some(devices.position()),
            ..CaptureStatus::default()
        });
        let status_tx = Arc::new(status_tx);
        let status_task = tokio::spawn(mirror_recording_state(
            pipeline.watch_state(),
            status_tx.clone(),
        ));

        Ok(Self {
            config,
            session: Mutex::new(SessionContext {
                configurator: SessionConfigurator::new(backends.session),
                devices,
                video_output: OutputHandle::new(OutputKind::VideoData),
                audio_output: OutputHandle::new(OutputKind::AudioData),
                orientation: DeviceOrientation::Portrait,
            }),
            photo: PhotoCapture::new(backends.photo_output),
            gallery: backends.gallery,
            pipeline,
            pipeline_task: parking_lot::Mutex::new(Some(task)),
            status_task,
            status_tx,
            event_tx,
        })
    }

    pub fn status(&self) -> CaptureStatus {
        self.status_tx.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<CaptureStatus> {
        self.status_tx.subscribe()
    }

    /// Subscribe to capture events
    pub fn subscribe(&self) -> broadcast::Receiver<CaptureEvent> {
        self.event_tx.subscribe()
    }

    /// Recording state as seen by the pipeline, after every queued sample
    pub async fn recording_state(&self) -> CaptureResult<RecordingState> {
        let state = self.pipeline.state().await?;
        self.sync_recording_state();
        Ok(state)
    }

    /// Samples dropped at the pipeline queue
    pub fn dropped_samples(&self) -> u64 {
        self.pipeline.dropped_samples()
    }

    fn update_status(&self, update: impl FnOnce(&mut CaptureStatus)) {
        self.status_tx.send_modify(update);
    }

    /// Copy the pipeline's published state into the status
    fn sync_recording_state(&self) {
        self.status_tx
            .send_if_modified(|s| apply_recording_state(s, self.pipeline.current_state()));
    }

    fn emit(&self, event: CaptureEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Report a failed operation and resync the observable state
    fn report(&self, error: CaptureError) -> CaptureError {
        tracing::error!("Capture error: {}", error);
        self.emit(CaptureEvent::Error {
            error: ErrorResponse::from(&error),
        });
        self.sync_recording_state();
        error
    }

    /// Configure the devices and start the capture session
    pub async fn start_session(&self, orientation: DeviceOrientation) -> CaptureResult<()> {
        let mut guard = self.session.lock().await;
        let ctx = &mut *guard;
        ctx.orientation = orientation;

        ctx.devices.start(&self.config)?;

        let photo_output = self.photo.output().handle();
        let topology = Topology {
            video_input: ctx.devices.video_input(),
            audio_input: ctx.devices.audio_input(),
            video_output: &ctx.video_output,
            audio_output: &ctx.audio_output,
            photo_output: &photo_output,
        };

        let session = ctx.configurator.session();
        let sink = Arc::new(self.pipeline.sink());
        session.set_sample_delegate(&ctx.video_output, sink.clone());
        session.set_sample_delegate(&ctx.audio_output, sink);

        ctx.configurator.start(topology, orientation)?;
        ctx.devices.enable_selected_torch()?;
        Ok(())
    }

    /// Begin a new recording
    pub async fn start_recording(&self) -> CaptureResult<()> {
        let resolution = {
            let ctx = self.session.lock().await;
            ctx.devices.capture_resolution(ctx.orientation)
        };

        self.pipeline.start(resolution).await?;
        self.sync_recording_state();
        self.emit(CaptureEvent::Started);
        Ok(())
    }

    /// Close the current segment
    pub async fn pause_recording(&self) -> CaptureResult<Option<Segment>> {
        match self.pipeline.pause().await {
            Ok(segment) => {
                self.sync_recording_state();
                self.emit(CaptureEvent::Paused);
                Ok(segment)
            }
            Err(e) if e.is_fatal_to_recording() => Err(self.report(e)),
            Err(e) => Err(e),
        }
    }

    pub async fn resume_recording(&self) -> CaptureResult<()> {
        match self.pipeline.resume().await {
            Ok(()) => {
                self.sync_recording_state();
                self.emit(CaptureEvent::Resumed);
                Ok(())
            }
            Err(e) if e.is_fatal_to_recording() => Err(self.report(e)),
            Err(e) => Err(e),
        }
    }

    /// Stop, merge the segments and hand the result to the gallery
    ///
    /// The merged file is removed once the gallery has it; after a failed save
    /// it is left in the working directory.
    pub async fn stop_recording(&self) -> CaptureResult<RecordingSummary> {
        let output = match self.pipeline.stop().await {
            Ok(output) => output,
            Err(CaptureError::NotRecording) => return Err(CaptureError::NotRecording),
            Err(e) => return Err(self.report(e)),
        };
        self.sync_recording_state();

        let merged = output.merged;
        let gallery_id = match gallery::save_video(self.gallery.as_ref(), &merged.path).await {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!("Merged recording kept at {:?}", merged.path);
                return Err(self.report(e));
            }
        };

        if let Err(e) = tokio::fs::remove_file(&merged.path).await {
            tracing::warn!("Failed to remove merged recording {:?}: {}", merged.path, e);
        }

        let summary = RecordingSummary {
            merged_path: merged.path,
            total_duration_ms: merged.duration.as_secs_f64() * 1000.0,
            segment_count: merged.segment_count,
            segments: output.segments,
            gallery_id: Some(gallery_id),
        };
        tracing::info!(
            "Recording saved: {} segments, {:.0}ms",
            summary.segment_count,
            summary.total_duration_ms
        );
        self.emit(CaptureEvent::Stopped {
            summary: summary.clone(),
        });
        Ok(summary)
    }

    pub fn set_photo_observer(&self, observer: Option<Arc<dyn PhotoCaptureObserver>>) {
        self.photo.set_observer(observer);
    }

    /// Capture a still photo and save it to the gallery
    pub async fn take_photo(&self, flash_mode: FlashMode) -> CaptureResult<Uuid> {
        let mut busy = false;
        self.status_tx.send_if_modified(|s| {
            if s.photo_in_progress {
                busy = true;
                false
            } else {
                s.photo_in_progress = true;
                true
            }
        });
        if busy {
            return Err(CaptureError::PhotoInProgress);
        }

        let result = self.capture_photo(flash_mode).await;
        self.update_status(|s| s.photo_in_progress = false);
        result
    }

    async fn capture_photo(&self, flash_mode: FlashMode) -> CaptureResult<Uuid> {
        let orientation = {
            let ctx = self.session.lock().await;
            VideoOrientation::from(ctx.orientation)
        };

        let pending = self.photo.take_photo(flash_mode, orientation)?;
        let request_id = pending.id;
        let bytes = match tokio::time::timeout(self.config.photo_timeout(), pending.wait()).await {
            Ok(result) => result?,
            Err(_) => {
                self.photo.abandon(request_id, "timed out");
                return Err(CaptureError::PhotoTimeout(self.config.photo_timeout_ms));
            }
        };

        gallery::save_photo(self.gallery.as_ref(), &bytes).await?;
        self.emit(CaptureEvent::PhotoCaptured {
            request_id,
            bytes: bytes.len(),
        });
        Ok(request_id)
    }

    /// Swap between the front and back cameras
    pub async fn switch_camera(&self) -> CaptureResult<DevicePosition> {
        let mut ctx = self.session.lock().await;

        let switch = ctx.devices.switch_position()?;
        ctx.configurator.set_new_device(
            &switch.old_input,
            &switch.new_input,
            &ctx.video_output,
            ctx.orientation,
        )?;
        ctx.devices.adopt(switch);

        let position = ctx.devices.position();
        drop(ctx);

        self.update_status(|s| s.camera_position = Some(position));
        self.emit(CaptureEvent::CameraSwitched { position });
        Ok(position)
    }

    /// Apply a new device orientation to the video connection
    pub async fn set_orientation(&self, orientation: DeviceOrientation) -> VideoOrientation {
        let mut guard = self.session.lock().await;
        let ctx = &mut *guard;
        ctx.orientation = orientation;
        ctx.configurator.set_orientation(orientation, &ctx.video_output)
    }

    pub async fn set_torch_mode(&self, mode: TorchMode) -> CaptureResult<()> {
        self.session.lock().await.devices.set_torch_mode(mode)
    }

    /// Stop the pipeline and the capture session
    ///
    /// A recording in progress is discarded.
    pub async fn shutdown(&self) {
        self.pipeline.shutdown().await;
        let task = self.pipeline_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::error!("Capture pipeline task failed: {}", e);
            }
        }
        self.status_task.abort();
        self.status_tx
            .send_if_modified(|s| apply_recording_state(s, RecordingState::Idle));

        let ctx = self.session.lock().await;
        if let Err(e) = ctx.devices.disable_torch() {
            tracing::warn!("Failed to turn torch off: {}", e);
        }
        ctx.configurator.stop();
    }
}

impl Drop for CameraController {
    fn drop(&mut self) {
        self.status_task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::loopback::{LoopbackDiscovery, LoopbackPhotoOutput, LoopbackSession};
    use crate::capture::sample::{
        AudioSampleFormat, AudioStreamDescription, FormatDescription, MediaKind, PixelFormat,
        SampleBuffer,
    };
    use crate::export::loopback::{MediaManifest, MemoryMediaStore};
    use crate::gallery::{AuthorizationStatus, MemoryGallery, SavedAsset};
    use std::path::Path;
    use std::time::Duration;

    struct Harness {
        controller: CameraController,
        session: Arc<LoopbackSession>,
        photo_output: Arc<LoopbackPhotoOutput>,
        store: MemoryMediaStore,
        gallery: MemoryGallery,
    }

    fn harness(dir: &Path, gallery: MemoryGallery) -> Harness {
        harness_with_config(
            CaptureConfig::default().with_working_dir(dir.join("work")),
            gallery,
        )
    }

    fn harness_with_config(config: CaptureConfig, gallery: MemoryGallery) -> Harness {
        let session = Arc::new(LoopbackSession::new());
        let photo_output = Arc::new(LoopbackPhotoOutput::new());
        let store = MemoryMediaStore::new();

        let controller = CameraController::new(
            config,
            CaptureBackends {
                discovery: Arc::new(LoopbackDiscovery::phone()),
                session: session.clone(),
                photo_output: photo_output.clone(),
                writers: Arc::new(store.clone()),
                probe: Arc::new(store.clone()),
                exporter: Arc::new(store.clone()),
                gallery: Arc::new(gallery.clone()),
            },
        )
        .unwrap();

        Harness {
            controller,
            session,
            photo_output,
            store,
            gallery,
        }
    }

    fn video(i: u64) -> SampleBuffer {
        SampleBuffer::new(
            FormatDescription::Video {
                width: 1280,
                height: 720,
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
            Duration::from_millis(33),
            vec![100 + i as u8],
        )
    }

    fn deliver(session: &LoopbackSession, range: std::ops::Range<u64>) {
        for i in range {
            assert!(session.deliver(OutputKind::VideoData, video(i)));
            assert!(session.deliver(OutputKind::AudioData, audio(i)));
        }
    }

    fn saved_manifest(gallery: &MemoryGallery) -> MediaManifest {
        let assets = gallery.assets();
        let Some(SavedAsset::Video { bytes, .. }) = assets.first() else {
            panic!("no video saved");
        };
        serde_json::from_slice(bytes).unwrap()
    }

    #[tokio::test]
    async fn test_pause_resume_recording_saved_once() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path(), MemoryGallery::default());
        let mut events = h.controller.subscribe();

        h.controller
            .start_session(DeviceOrientation::Portrait)
            .await
            .unwrap();
        h.controller.start_recording().await.unwrap();
        assert!(h.controller.status().recording_active);

        deliver(&h.session, 0..5);
        h.controller.pause_recording().await.unwrap();
        assert_eq!(h.controller.status().recording_state, RecordingState::Paused);

        h.controller.resume_recording().await.unwrap();
        deliver(&h.session, 5..8);
        let summary = h.controller.stop_recording().await.unwrap();

        assert_eq!(summary.segment_count, 2);
        assert_eq!(summary.segments.len(), 2);
        assert_eq!(h.gallery.video_count(), 1);
        assert!(!summary.merged_path.exists());
        assert!(!h.controller.status().recording_active);

        let manifest = saved_manifest(&h.gallery);
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

        // Started, SegmentFinalized, Paused, Resumed, Stopped
        assert!(matches!(events.recv().await.unwrap(), CaptureEvent::Started));
        assert!(matches!(
            events.recv().await.unwrap(),
            CaptureEvent::SegmentFinalized { .. }
        ));
        assert!(matches!(events.recv().await.unwrap(), CaptureEvent::Paused));
        assert!(matches!(events.recv().await.unwrap(), CaptureEvent::Resumed));
        assert!(matches!(
            events.recv().await.unwrap(),
            CaptureEvent::Stopped { .. }
        ));
    }

    #[tokio::test]
    async fn test_encoder_uses_portrait_capture_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path(), MemoryGallery::default());

        h.controller
            .start_session(DeviceOrientation::Portrait)
            .await
            .unwrap();
        h.controller.start_recording().await.unwrap();
        deliver(&h.session, 0..2);
        h.controller.stop_recording().await.unwrap();

        let manifest = saved_manifest(&h.gallery);
        let video_track = manifest.tracks.iter().find_map(|t| match t {
            crate::recorder::writer::TrackSettings::Video(v) => Some(*v),
            _ => None,
        });
        let settings = video_track.unwrap();
        assert!(settings.height > settings.width);
    }

    #[tokio::test]
    async fn test_stop_immediately_after_start() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path(), MemoryGallery::default());

        h.controller
            .start_session(DeviceOrientation::Portrait)
            .await
            .unwrap();
        h.controller.start_recording().await.unwrap();
        let err = h.controller.stop_recording().await.unwrap_err();

        assert!(matches!(err, CaptureError::EmptyRecording));
        assert_eq!(h.gallery.video_count(), 0);
        assert_eq!(h.controller.status().recording_state, RecordingState::Idle);

        // Ready for another recording
        h.controller.start_recording().await.unwrap();
        deliver(&h.session, 0..3);
        h.controller.stop_recording().await.unwrap();
        assert_eq!(h.gallery.video_count(), 1);
    }

    #[tokio::test]
    async fn test_audio_before_video_not_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path(), MemoryGallery::default());

        h.controller
            .start_session(DeviceOrientation::Portrait)
            .await
            .unwrap();
        h.controller.start_recording().await.unwrap();
        h.session.deliver(OutputKind::AudioData, audio(0));
        h.session.deliver(OutputKind::AudioData, audio(1));
        deliver(&h.session, 2..4);
        h.controller.stop_recording().await.unwrap();

        let manifest = saved_manifest(&h.gallery);
        let audio: Vec<u8> = manifest
            .samples_of(MediaKind::Audio)
            .map(|s| s.data[0])
            .collect();
        assert_eq!(audio, vec![102, 103]);
    }

    #[tokio::test]
    async fn test_denied_gallery_keeps_merged_file() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path(), MemoryGallery::new(AuthorizationStatus::Denied));
        let mut events = h.controller.subscribe();

        h.controller
            .start_session(DeviceOrientation::Portrait)
            .await
            .unwrap();
        h.controller.start_recording().await.unwrap();
        deliver(&h.session, 0..2);
        let err = h.controller.stop_recording().await.unwrap_err();

        assert!(matches!(err, CaptureError::LibraryAccess(_)));
        assert!(dir.path().join("work/recording.mov").exists());
        assert!(!h.controller.status().recording_active);

        let mut saw_error = false;
        while let Ok(event) = events.try_recv() {
            if let CaptureEvent::Error { error } = event {
                assert_eq!(error.code, "LIBRARY_ACCESS");
                saw_error = true;
            }
        }
        assert!(saw_error);
    }

    #[tokio::test]
    async fn test_writer_failure_resets_recording() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path(), MemoryGallery::default());

        h.controller
            .start_session(DeviceOrientation::Portrait)
            .await
            .unwrap();
        h.controller.start_recording().await.unwrap();
        deliver(&h.session, 0..2);
        assert_eq!(
            h.controller.recording_state().await.unwrap(),
            RecordingState::Recording
        );
        h.store.fail_writers(Some("disk full".into()));

        let err = h.controller.pause_recording().await.unwrap_err();
        assert!(err.is_fatal_to_recording());
        assert_eq!(h.controller.status().recording_state, RecordingState::Idle);
        assert!(matches!(
            h.controller.stop_recording().await,
            Err(CaptureError::NotRecording)
        ));
    }

    #[tokio::test]
    async fn test_writer_failure_while_streaming_updates_status() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path(), MemoryGallery::default());
        let mut status = h.controller.watch_status();

        h.controller
            .start_session(DeviceOrientation::Portrait)
            .await
            .unwrap();
        h.controller.start_recording().await.unwrap();
        deliver(&h.session, 0..2);
        tokio::time::timeout(
            Duration::from_secs(2),
            status.wait_for(|s| s.recording_state == RecordingState::Recording),
        )
        .await
        .unwrap()
        .unwrap();

        let mut events = h.controller.subscribe();
        h.store.fail_writers(Some("disk full".into()));
        assert!(h.session.deliver(OutputKind::VideoData, video(2)));

        tokio::time::timeout(
            Duration::from_secs(2),
            status.wait_for(|s| s.recording_state == RecordingState::Idle && !s.recording_active),
        )
        .await
        .unwrap()
        .unwrap();
        match events.recv().await.unwrap() {
            CaptureEvent::Error { error } => assert_eq!(error.code, "WRITER_FAILED"),
            other => panic!("unexpected event {:?}", other),
        }

        // A fresh recording starts cleanly after the reset
        h.store.fail_writers(None);
        h.controller.start_recording().await.unwrap();
        assert_eq!(
            h.controller.status().recording_state,
            RecordingState::PendingStart
        );
    }

    #[tokio::test]
    async fn test_repeated_cycles_sum_segment_durations() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path(), MemoryGallery::default());

        h.controller
            .start_session(DeviceOrientation::Portrait)
            .await
            .unwrap();
        h.controller.start_recording().await.unwrap();
        deliver(&h.session, 0..3);
        h.controller.pause_recording().await.unwrap();
        h.controller.resume_recording().await.unwrap();
        deliver(&h.session, 3..7);
        h.controller.pause_recording().await.unwrap();
        h.controller.resume_recording().await.unwrap();
        deliver(&h.session, 7..9);
        let summary = h.controller.stop_recording().await.unwrap();

        assert_eq!(summary.segment_count, 3);
        let indices: Vec<usize> = summary.segments.iter().map(|s| s.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        let sum: f64 = summary.segments.iter().map(|s| s.duration_ms).sum();
        assert!((summary.total_duration_ms - sum).abs() < 0.01);

        let manifest = saved_manifest(&h.gallery);
        let video: Vec<u8> = manifest
            .samples_of(MediaKind::Video)
            .map(|s| s.data[0])
            .collect();
        assert_eq!(video, (0..9).collect::<Vec<u8>>());
    }

    #[tokio::test]
    async fn test_gallery_save_failure_keeps_merged_file() {
        let dir = tempfile::tempdir().unwrap();
        let gallery = MemoryGallery::default();
        gallery.fail_saves(Some("library full".into()));
        let h = harness(dir.path(), gallery);

        h.controller
            .start_session(DeviceOrientation::Portrait)
            .await
            .unwrap();
        h.controller.start_recording().await.unwrap();
        deliver(&h.session, 0..2);
        let err = h.controller.stop_recording().await.unwrap_err();

        assert!(matches!(err, CaptureError::GallerySave(ref m) if m == "library full"));
        assert!(dir.path().join("work/recording.mov").exists());
        assert_eq!(h.gallery.video_count(), 0);
        assert!(!h.controller.status().recording_active);

        h.gallery.fail_saves(None);
        h.controller.start_recording().await.unwrap();
        deliver(&h.session, 0..2);
        h.controller.stop_recording().await.unwrap();
        assert_eq!(h.gallery.video_count(), 1);
    }

    #[tokio::test]
    async fn test_photo_timeout_releases_guard() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = CaptureConfig::default().with_working_dir(dir.path().join("work"));
        config.photo_timeout_ms = 50;
        let h = harness_with_config(config, MemoryGallery::default());

        struct Quiet;
        impl PhotoCaptureObserver for Quiet {
            fn will_begin(&self, _request: Uuid) {}
            fn data_ready(&self, _request: Uuid, _bytes: &[u8]) {}
            fn did_finish(&self, _request: Uuid, _error: Option<&str>) {}
        }
        h.controller.set_photo_observer(Some(Arc::new(Quiet)));
        h.photo_output.hold_captures(true);

        let err = h.controller.take_photo(FlashMode::Off).await.unwrap_err();
        assert!(matches!(err, CaptureError::PhotoTimeout(50)));
        assert!(!h.controller.status().photo_in_progress);

        // A late completion is ignored and the next photo goes through
        assert_eq!(h.photo_output.release_held(), 1);
        h.photo_output.hold_captures(false);
        h.controller.take_photo(FlashMode::Off).await.unwrap();
        assert_eq!(h.gallery.photo_count(), 1);
    }

    #[tokio::test]
    async fn test_take_photo_saves_to_gallery() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path(), MemoryGallery::new(AuthorizationStatus::NotDetermined));

        assert!(matches!(
            h.controller.take_photo(FlashMode::Off).await,
            Err(CaptureError::NoObserver)
        ));
        assert!(!h.controller.status().photo_in_progress);

        struct Quiet;
        impl PhotoCaptureObserver for Quiet {
            fn will_begin(&self, _request: Uuid) {}
            fn data_ready(&self, _request: Uuid, _bytes: &[u8]) {}
            fn did_finish(&self, _request: Uuid, _error: Option<&str>) {}
        }
        h.controller.set_photo_observer(Some(Arc::new(Quiet)));
        h.photo_output.set_flash_modes(vec![FlashMode::Off]);

        let id = h.controller.take_photo(FlashMode::On).await.unwrap();
        let captures = h.photo_output.captures();
        assert_eq!(captures[0].0, id);
        assert_eq!(captures[0].1.flash_mode, FlashMode::Off);
        assert_eq!(h.gallery.photo_count(), 1);
        assert_eq!(h.gallery.authorization_requests(), 1);
        assert!(!h.controller.status().photo_in_progress);
    }

    #[tokio::test]
    async fn test_switch_camera_updates_position() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path(), MemoryGallery::default());
        h.controller
            .start_session(DeviceOrientation::Portrait)
            .await
            .unwrap();
        assert_eq!(
            h.controller.status().camera_position,
            Some(DevicePosition::Front)
        );

        let position = h.controller.switch_camera().await.unwrap();
        assert_eq!(position, DevicePosition::Back);
        assert!(h.session.input_devices().contains(&"back-dual".to_string()));
        assert_eq!(
            h.controller.status().camera_position,
            Some(DevicePosition::Back)
        );

        h.controller.set_torch_mode(TorchMode::On).await.unwrap();
        assert_eq!(
            h.controller.set_orientation(DeviceOrientation::LandscapeLeft).await,
            VideoOrientation::LandscapeRight
        );
    }

    #[tokio::test]
    async fn test_shutdown_discards_recording() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path(), MemoryGallery::default());
        h.controller
            .start_session(DeviceOrientation::Portrait)
            .await
            .unwrap();
        h.controller.start_recording().await.unwrap();
        deliver(&h.session, 0..2);

        h.controller.shutdown().await;
        assert!(!h.session.deliver(OutputKind::VideoData, video(9)));
        assert!(matches!(
            h.controller.start_recording().await,
            Err(CaptureError::PipelineClosed)
        ));
        assert_eq!(h.gallery.video_count(), 0);
    }
}
