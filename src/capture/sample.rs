//! Media sample buffers delivered by the capture hardware
//!
//! Every buffer carries its own presentation timestamp and a format
//! description, so each track can be timed independently of the others.

use super::traits::Resolution;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Kind of media carried by a sample or a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
}

/// Pixel layout of a raw video buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Nv12,
    Yuyv422,
    Bgra,
    Rgba,
}

impl PixelFormat {
    /// FFmpeg `-pixel_format` name
    pub fn ffmpeg_name(&self) -> &'static str {
        match self {
            PixelFormat::Nv12 => "nv12",
            PixelFormat::Yuyv422 => "yuyv422",
            PixelFormat::Bgra => "bgra",
            PixelFormat::Rgba => "rgba",
        }
    }
}

/// Sample encoding of raw PCM audio
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioSampleFormat {
    F32,
    S16,
}

impl AudioSampleFormat {
    /// FFmpeg raw demuxer name (little-endian)
    pub fn ffmpeg_name(&self) -> &'static str {
        match self {
            AudioSampleFormat::F32 => "f32le",
            AudioSampleFormat::S16 => "s16le",
        }
    }
}

/// Basic description of an audio stream, taken from the first audio buffer
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioStreamDescription {
    pub sample_rate: f64,
    pub channels: u32,
    pub sample_format: AudioSampleFormat,
}

/// Format tag attached to every sample buffer
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum FormatDescription {
    Video {
        width: u32,
        height: u32,
        pixel_format: PixelFormat,
    },
    Audio(AudioStreamDescription),
}

impl FormatDescription {
    pub fn media_kind(&self) -> MediaKind {
        match self {
            FormatDescription::Video { .. } => MediaKind::Video,
            FormatDescription::Audio(_) => MediaKind::Audio,
        }
    }

    /// Buffer dimensions, for video formats
    pub fn dimensions(&self) -> Option<Resolution> {
        match self {
            FormatDescription::Video { width, height, .. } => Some(Resolution {
                width: *width,
                height: *height,
            }),
            FormatDescription::Audio(_) => None,
        }
    }

    pub fn audio_stream(&self) -> Option<&AudioStreamDescription> {
        match self {
            FormatDescription::Audio(desc) => Some(desc),
            FormatDescription::Video { .. } => None,
        }
    }
}

/// One timestamped, format-tagged media buffer
#[derive(Debug, Clone)]
pub struct SampleBuffer {
    pub format: FormatDescription,
    /// Presentation timestamp on the capture clock
    pub pts: Duration,
    pub duration: Duration,
    pub data: Arc<[u8]>,
}

impl SampleBuffer {
    pub fn new(format: FormatDescription, pts: Duration, duration: Duration, data: Vec<u8>) -> Self {
        Self {
            format,
            pts,
            duration,
            data: data.into(),
        }
    }

    pub fn kind(&self) -> MediaKind {
        self.format.media_kind()
    }

    pub fn is_video(&self) -> bool {
        self.kind() == MediaKind::Video
    }

    /// Timestamp at which this buffer stops covering the timeline
    pub fn end(&self) -> Duration {
        self.pts + self.duration
    }
}

/// Receiver of live sample buffers from a capture output
///
/// Implementations are called on the hardware delivery thread and must not block.
pub trait SampleDelegate: Send + Sync {
    fn did_output(&self, sample: SampleBuffer);
}
