//! Segment writer
//!
//! `SegmentedWriter` wraps one platform container writer for one segment. Track
//! inputs are configured lazily from the first observed sample formats, writing
//! begins once both exist, and appends are gated on per-track readiness.

use crate::capture::sample::{AudioStreamDescription, SampleBuffer};
use crate::capture::traits::Resolution;
use crate::recorder::state::Segment;
use crate::utils::error::{CaptureError, CaptureResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    H264,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioCodec {
    Aac,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoSettings {
    pub codec: VideoCodec,
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioSettings {
    pub codec: AudioCodec,
    pub channels: u32,
    pub sample_rate: f64,
    /// Bits per second
    pub bitrate: u32,
    /// Layout of the incoming PCM
    pub source: AudioStreamDescription,
}

/// Output settings for one writer track
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TrackSettings {
    Video(VideoSettings),
    Audio(AudioSettings),
}

/// Handle to a track added to a [`ContainerWriter`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrackId(pub usize);

/// Status of a platform container writer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriterStatus {
    Unknown,
    Writing,
    Completed,
    Failed(String),
    Cancelled,
}

/// A platform writer producing one container file
#[async_trait]
pub trait ContainerWriter: Send {
    fn path(&self) -> &Path;

    fn can_add(&self, settings: &TrackSettings) -> bool;

    fn add_track(&mut self, settings: TrackSettings) -> CaptureResult<TrackId>;

    fn status(&self) -> WriterStatus;

    /// Begin writing with `origin` as the source time of the timeline start
    fn start_writing(&mut self, origin: Duration) -> CaptureResult<()>;

    fn is_ready_for_more_media_data(&self, track: TrackId) -> bool;

    fn append(&mut self, track: TrackId, sample: &SampleBuffer) -> CaptureResult<()>;

    /// Flush and close the file
    async fn finish_writing(&mut self) -> CaptureResult<()>;

    /// Abandon the file and remove any partial output
    fn cancel_writing(&mut self);
}

/// Opens container writers at a path
pub trait ContainerWriterFactory: Send + Sync {
    fn create(&self, path: &Path) -> CaptureResult<Box<dyn ContainerWriter>>;
}

/// Encoder parameters shared by every segment of a recording
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WriterOptions {
    pub frame_rate: u32,
    pub audio_bitrate: u32,
    /// Encoder dimensions; the first video format is used when unset
    pub video_resolution: Option<Resolution>,
}

/// Writer for a single segment
pub struct SegmentedWriter {
    index: usize,
    path: PathBuf,
    writer: Box<dyn ContainerWriter>,
    options: WriterOptions,
    video_track: Option<TrackId>,
    audio_track: Option<TrackId>,
    origin: Option<Duration>,
    first_video_written: bool,
    last_end: Duration,
    video_samples: u64,
    audio_samples: u64,
    dropped_samples: u64,
    started_at: Option<DateTime<Utc>>,
}

impl SegmentedWriter {
    /// Open the segment file
    ///
    /// Fails with `WriterCreation` if the output path cannot be opened.
    pub fn create(
        factory: &Arc<dyn ContainerWriterFactory>,
        path: PathBuf,
        index: usize,
        options: WriterOptions,
    ) -> CaptureResult<Self> {
        let writer = factory.create(&path).map_err(|e| match e {
            CaptureError::WriterCreation(_) => e,
            other => CaptureError::WriterCreation(format!("{:?}: {}", path, other)),
        })?;

        tracing::info!("Opened segment {} at {:?}", index, path);

        Ok(Self {
            index,
            path,
            writer,
            options,
            video_track: None,
            audio_track: None,
            origin: None,
            first_video_written: false,
            last_end: Duration::ZERO,
            video_samples: 0,
            audio_samples: 0,
            dropped_samples: 0,
            started_at: None,
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Add the video track; later calls are no-ops
    ///
    /// Returns whether a track was added.
    pub fn setup_video_input(&mut self, format_resolution: Resolution) -> CaptureResult<bool> {
        if self.video_track.is_some() {
            return Ok(false);
        }

        let resolution = self.options.video_resolution.unwrap_or(format_resolution);
        let settings = TrackSettings::Video(VideoSettings {
            codec: VideoCodec::H264,
            width: resolution.width,
            height: resolution.height,
            frame_rate: self.options.frame_rate,
        });
        self.video_track = Some(self.add_track(settings)?);

        tracing::debug!(
            "Segment {} video input {}x{}",
            self.index,
            resolution.width,
            resolution.height
        );
        Ok(true)
    }

    /// Add the audio track from the first observed stream; later calls are no-ops
    pub fn setup_audio_input(&mut self, stream: &AudioStreamDescription) -> CaptureResult<bool> {
        if self.audio_track.is_some() {
            return Ok(false);
        }

        let settings = TrackSettings::Audio(AudioSettings {
            codec: AudioCodec::Aac,
            channels: stream.channels,
            sample_rate: stream.sample_rate,
            bitrate: self.options.audio_bitrate,
            source: *stream,
        });
        self.audio_track = Some(self.add_track(settings)?);

        tracing::debug!(
            "Segment {} audio input {}ch @ {}Hz",
            self.index,
            stream.channels,
            stream.sample_rate
        );
        Ok(true)
    }

    fn add_track(&mut self, settings: TrackSettings) -> CaptureResult<TrackId> {
        if !self.writer.can_add(&settings) {
            return Err(CaptureError::WriterFailed(format!(
                "writer cannot add track {:?}",
                settings
            )));
        }
        self.writer.add_track(settings)
    }

    pub fn is_writing(&self) -> bool {
        self.origin.is_some()
    }

    /// Begin writing once both inputs exist
    ///
    /// `origin` becomes the timeline start. Returns whether writing began on
    /// this call.
    pub fn start_if_ready(&mut self, origin: Duration) -> CaptureResult<bool> {
        if self.origin.is_some() || self.video_track.is_none() || self.audio_track.is_none() {
            return Ok(false);
        }

        self.writer.start_writing(origin)?;
        self.check_status()?;

        self.origin = Some(origin);
        self.last_end = origin;
        self.started_at = Some(Utc::now());
        tracing::info!("Segment {} writing from {:?}", self.index, origin);
        Ok(true)
    }

    pub fn is_video_ready(&self) -> bool {
        self.is_track_ready(self.video_track)
    }

    /// Audio is ready only after the first video sample was accepted
    pub fn is_audio_ready(&self) -> bool {
        self.first_video_written && self.is_track_ready(self.audio_track)
    }

    fn is_track_ready(&self, track: Option<TrackId>) -> bool {
        match track {
            Some(track) if self.is_writing() => self.writer.is_ready_for_more_media_data(track),
            _ => false,
        }
    }

    /// Append a video sample if the track is ready
    ///
    /// Returns whether the sample was written; a not-ready track drops it.
    pub fn write_video(&mut self, sample: &SampleBuffer) -> CaptureResult<bool> {
        let track = match self.video_track {
            Some(track) if self.is_video_ready() => track,
            _ => {
                self.dropped_samples += 1;
                return Ok(false);
            }
        };

        self.append(track, sample)?;
        if !self.first_video_written {
            tracing::debug!("Segment {} first video frame at {:?}", self.index, sample.pts);
        }
        self.first_video_written = true;
        self.video_samples += 1;
        Ok(true)
    }

    /// Append an audio sample if the track is ready and video has started
    pub fn write_audio(&mut self, sample: &SampleBuffer) -> CaptureResult<bool> {
        let track = match self.audio_track {
            Some(track) if self.is_audio_ready() => track,
            _ => {
                self.dropped_samples += 1;
                return Ok(false);
            }
        };

        self.append(track, sample)?;
        self.audio_samples += 1;
        Ok(true)
    }

    fn append(&mut self, track: TrackId, sample: &SampleBuffer) -> CaptureResult<()> {
        self.writer.append(track, sample)?;
        self.check_status()?;
        self.last_end = self.last_end.max(sample.end());
        Ok(())
    }

    fn check_status(&self) -> CaptureResult<()> {
        match self.writer.status() {
            WriterStatus::Failed(message) => {
                tracing::error!("Segment {} writer failed: {}", self.index, message);
                Err(CaptureError::WriterFailed(message))
            }
            _ => Ok(()),
        }
    }

    /// Close the segment
    ///
    /// A writer that never started is cancelled and yields `None`. Otherwise
    /// the writer must still be writing. The segment stays owned by the caller
    /// so an interrupted finalize can still be cancelled.
    pub async fn finalize(&mut self) -> CaptureResult<Option<Segment>> {
        let Some(origin) = self.origin else {
            tracing::info!("Segment {} never started; discarding", self.index);
            self.writer.cancel_writing();
            return Ok(None);
        };

        match self.writer.status() {
            WriterStatus::Writing => {}
            WriterStatus::Failed(message) => return Err(CaptureError::WriterFailed(message)),
            _ => return Err(CaptureError::WriterNotWriting),
        }

        self.writer.finish_writing().await?;

        match self.writer.status() {
            WriterStatus::Completed => {}
            WriterStatus::Failed(message) => return Err(CaptureError::WriterFailed(message)),
            other => {
                return Err(CaptureError::WriterFailed(format!(
                    "writer finished with status {:?}",
                    other
                )))
            }
        }

        let duration = self.last_end.saturating_sub(origin);
        let finished_at = Utc::now();
        tracing::info!(
            "Segment {} finalized: {:.0}ms, {} video / {} audio samples, {} dropped",
            self.index,
            duration.as_secs_f64() * 1000.0,
            self.video_samples,
            self.audio_samples,
            self.dropped_samples
        );

        Ok(Some(Segment {
            index: self.index,
            path: self.path.clone(),
            duration_ms: duration.as_secs_f64() * 1000.0,
            video_samples: self.video_samples,
            audio_samples: self.audio_samples,
            dropped_samples: self.dropped_samples,
            started_at: self.started_at.unwrap_or(finished_at),
            finished_at,
        }))
    }

    /// Abandon the segment after a failure
    pub fn cancel(mut self) {
        self.writer.cancel_writing();
        tracing::warn!("Segment {} cancelled", self.index);
    }
}
