//! FFmpeg-backed writer, probe and exporter
//!
//! Segment files are produced by piping raw frames into an `ffmpeg` H.264
//! encoder while PCM audio is spooled to a side file; finalizing muxes the two
//! into one `.mov` with AAC audio. Frames reach the encoder through a bounded
//! queue drained by a dedicated thread, and the video track reports not ready
//! while that queue is full. Probing uses `ffprobe` JSON output, and the merge
//! export is a single `concat` filter graph across all segments.

use crate::capture::sample::{FormatDescription, MediaKind, SampleBuffer};
use crate::export::types::{
    AssetInfo, AssetProbe, Composition, ExportPreset, ExportStatus, Exporter, TrackInfo,
};
use crate::recorder::writer::{
    AudioSettings, ContainerWriter, ContainerWriterFactory, TrackId, TrackSettings, VideoSettings,
    WriterStatus,
};
use crate::utils::error::{CaptureError, CaptureResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Raw frames held for the encoder before the video track reports not ready
const DEFAULT_FRAME_QUEUE: usize = 8;

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Creates [`FfmpegContainerWriter`]s
#[derive(Debug, Clone)]
pub struct FfmpegWriterFactory {
    ffmpeg: PathBuf,
    frame_queue: usize,
}

impl Default for FfmpegWriterFactory {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl FfmpegWriterFactory {
    pub fn new(ffmpeg: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            frame_queue: DEFAULT_FRAME_QUEUE,
        }
    }

    /// Frames queued per encoder before new ones are dropped
    pub fn with_frame_queue(mut self, depth: usize) -> Self {
        self.frame_queue = depth.max(1);
        self
    }
}

impl ContainerWriterFactory for FfmpegWriterFactory {
    fn create(&self, path: &Path) -> CaptureResult<Box<dyn ContainerWriter>> {
        // Opening the output up front surfaces a bad path before any capture starts
        std::fs::File::create(path)?;
        Ok(Box::new(FfmpegContainerWriter::new(
            self.ffmpeg.clone(),
            path,
            self.frame_queue,
        )))
    }
}

/// Intermediate files next to the segment
fn side_paths(path: &Path) -> (PathBuf, PathBuf) {
    (path.with_extension("video.mov"), path.with_extension("audio.pcm"))
}

/// Arguments for the raw-frame H.264 encoder
fn video_encode_args(
    source_width: u32,
    source_height: u32,
    pixel_format: &str,
    settings: &VideoSettings,
    output: &Path,
) -> Vec<String> {
    let mut args = vec![
        "-y".to_string(),
        "-hide_banner".to_string(),
        "-nostats".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-f".to_string(),
        "rawvideo".to_string(),
        "-pix_fmt".to_string(),
        pixel_format.to_string(),
        "-s".to_string(),
        format!("{}x{}", source_width, source_height),
        "-r".to_string(),
        settings.frame_rate.to_string(),
        "-i".to_string(),
        "-".to_string(),
    ];

    if source_width != settings.width || source_height != settings.height {
        args.extend([
            "-vf".to_string(),
            format!(
                "scale={}:{}:force_original_aspect_ratio=decrease,pad={}:{}:(ow-iw)/2:(oh-ih)/2:black",
                settings.width, settings.height, settings.width, settings.height
            ),
        ]);
    }

    args.extend([
        "-c:v".to_string(),
        "libx264".to_string(),
        "-preset".to_string(),
        "veryfast".to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        output.to_string_lossy().to_string(),
    ]);
    args
}

/// Arguments muxing the encoded video with the spooled PCM audio
fn mux_args(video: &Path, audio: &Path, settings: &AudioSettings, output: &Path) -> Vec<String> {
    vec![
        "-y".to_string(),
        "-i".to_string(),
        video.to_string_lossy().to_string(),
        "-f".to_string(),
        settings.source.sample_format.ffmpeg_name().to_string(),
        "-ar".to_string(),
        format!("{}", settings.sample_rate.round() as u32),
        "-ac".to_string(),
        settings.channels.to_string(),
        "-i".to_string(),
        audio.to_string_lossy().to_string(),
        "-c:v".to_string(),
        "copy".to_string(),
        "-c:a".to_string(),
        "aac".to_string(),
        "-b:a".to_string(),
        settings.bitrate.to_string(),
        "-shortest".to_string(),
        "-f".to_string(),
        "mov".to_string(),
        output.to_string_lossy().to_string(),
    ]
}

/// Write queued frames to the encoder until the queue closes or a write fails
///
/// Dropping `stdin` on return signals EOF to ffmpeg.
fn feed_encoder(
    mut stdin: ChildStdin,
    frames: Receiver<Arc<[u8]>>,
    in_flight: &AtomicUsize,
    failure: &Mutex<Option<String>>,
) {
    let mut written: u64 = 0;
    for frame in frames {
        let result = stdin.write_all(&frame);
        in_flight.fetch_sub(1, Ordering::AcqRel);
        if let Err(e) = result {
            *failure.lock() = Some(format!("Failed to write frame: {}", e));
            break;
        }
        written += 1;
    }
    tracing::debug!("Encoder feed closed after {} frames", written);
}

/// An ffmpeg encoder process and the thread feeding it
struct VideoEncoder {
    process: Child,
    /// Closed at finish so the feeder drains and closes stdin
    frames: Option<SyncSender<Arc<[u8]>>>,
    /// Frames accepted but not yet written to the process
    in_flight: Arc<AtomicUsize>,
    capacity: usize,
    failure: Arc<Mutex<Option<String>>>,
    feeder: Option<JoinHandle<()>>,
    stderr: Option<JoinHandle<String>>,
}

impl VideoEncoder {
    fn spawn(ffmpeg: &Path, args: &[String], capacity: usize) -> std::io::Result<Self> {
        let mut process = Command::new(ffmpeg)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;

        let Some(stdin) = process.stdin.take() else {
            let _ = process.kill();
            return Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "FFmpeg stdin unavailable",
            ));
        };

        // Drained continuously so a chatty encoder never stalls on a full pipe
        let stderr = process.stderr.take().map(|mut pipe| {
            std::thread::spawn(move || {
                let mut log = String::new();
                let _ = pipe.read_to_string(&mut log);
                log
            })
        });

        let (frames, queue) = mpsc::sync_channel(capacity);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let failure = Arc::new(Mutex::new(None));

        let feeder = {
            let in_flight = in_flight.clone();
            let failure = failure.clone();
            std::thread::Builder::new()
                .name("segcam-encoder".to_string())
                .spawn(move || feed_encoder(stdin, queue, &in_flight, &failure))
        };
        let feeder = match feeder {
            Ok(handle) => handle,
            Err(e) => {
                let _ = process.kill();
                let _ = process.wait();
                return Err(e);
            }
        };

        Ok(Self {
            process,
            frames: Some(frames),
            in_flight,
            capacity,
            failure,
            feeder: Some(feeder),
            stderr,
        })
    }

    fn failure(&self) -> Option<String> {
        self.failure.lock().clone()
    }

    fn is_ready(&self) -> bool {
        self.frames.is_some()
            && self.failure.lock().is_none()
            && self.in_flight.load(Ordering::Acquire) < self.capacity
    }

    /// Queue one frame without blocking
    fn push(&self, frame: Arc<[u8]>) -> Result<(), String> {
        let Some(frames) = &self.frames else {
            return Err("encoder input already closed".to_string());
        };
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        match frames.try_send(frame) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.in_flight.fetch_sub(1, Ordering::AcqRel);
                Err(match e {
                    TrySendError::Full(_) => "encoder queue full".to_string(),
                    TrySendError::Disconnected(_) => self
                        .failure()
                        .unwrap_or_else(|| "encoder feed stopped".to_string()),
                })
            }
        }
    }

    /// Close the queue and wait for the process to exit without blocking the runtime
    async fn close(&mut self) -> std::io::Result<ExitStatus> {
        self.frames = None;
        loop {
            if let Some(status) = self.process.try_wait()? {
                return Ok(status);
            }
            tokio::time::sleep(EXIT_POLL_INTERVAL).await;
        }
    }

    /// Join the helper threads of an exited process; returns its stderr
    fn join(mut self) -> String {
        if let Some(feeder) = self.feeder.take() {
            let _ = feeder.join();
        }
        self.stderr
            .take()
            .and_then(|stderr| stderr.join().ok())
            .unwrap_or_default()
    }

    /// Kill the process; the feeder ends on the broken pipe
    fn kill(&mut self) {
        self.frames = None;
        let _ = self.process.kill();
        let _ = self.process.wait();
    }
}

/// Writer producing one `.mov` segment through ffmpeg
pub struct FfmpegContainerWriter {
    ffmpeg: PathBuf,
    path: PathBuf,
    frame_queue: usize,
    tracks: Vec<TrackSettings>,
    status: WriterStatus,
    encoder: Option<VideoEncoder>,
    audio_spool: Option<std::fs::File>,
}

impl FfmpegContainerWriter {
    fn new(ffmpeg: PathBuf, path: &Path, frame_queue: usize) -> Self {
        Self {
            ffmpeg,
            path: path.to_path_buf(),
            frame_queue,
            tracks: Vec::new(),
            status: WriterStatus::Unknown,
            encoder: None,
            audio_spool: None,
        }
    }

    fn video_settings(&self) -> Option<&VideoSettings> {
        self.tracks.iter().find_map(|t| match t {
            TrackSettings::Video(settings) => Some(settings),
            _ => None,
        })
    }

    fn audio_settings(&self) -> Option<&AudioSettings> {
        self.tracks.iter().find_map(|t| match t {
            TrackSettings::Audio(settings) => Some(settings),
            _ => None,
        })
    }

    fn fail(&mut self, message: String) -> CaptureError {
        tracing::error!("FFmpeg writer for {:?} failed: {}", self.path, message);
        self.status = WriterStatus::Failed(message.clone());
        CaptureError::WriterFailed(message)
    }

    /// Spawn the encoder once the source frame layout is known
    fn spawn_encoder(&mut self, width: u32, height: u32, pixel_format: &str) -> CaptureResult<()> {
        let Some(settings) = self.video_settings().copied() else {
            return Err(CaptureError::WriterFailed("no video track".to_string()));
        };
        let (video_path, _) = side_paths(&self.path);
        let args = video_encode_args(width, height, pixel_format, &settings, &video_path);

        tracing::info!("Starting FFmpeg segment encoder: {:?}", args);

        let encoder = VideoEncoder::spawn(&self.ffmpeg, &args, self.frame_queue)
            .map_err(|e| self.fail(format!("Failed to start FFmpeg encoder: {}", e)))?;
        self.encoder = Some(encoder);
        Ok(())
    }

    async fn finish_encoder(&mut self) -> CaptureResult<()> {
        // The encoder stays in place while waiting so a cancel can still kill it
        let exit = match self.encoder.as_mut() {
            Some(encoder) => encoder.close().await,
            None => return Err(self.fail("no video frames were written".to_string())),
        };
        let Some(encoder) = self.encoder.take() else {
            return Ok(());
        };
        let feed_failure = encoder.failure();
        let stderr = tokio::task::spawn_blocking(move || encoder.join())
            .await
            .unwrap_or_default();

        let status = exit.map_err(|e| self.fail(format!("Failed to wait for FFmpeg: {}", e)))?;
        if !status.success() {
            return Err(self.fail(format!("FFmpeg exited with error: {}", stderr.trim())));
        }
        if let Some(message) = feed_failure {
            return Err(self.fail(message));
        }
        Ok(())
    }

    async fn mux(&mut self) -> CaptureResult<()> {
        let (video_path, audio_path) = side_paths(&self.path);
        let Some(settings) = self.audio_settings().copied() else {
            tokio::fs::rename(&video_path, &self.path).await?;
            return Ok(());
        };

        let args = mux_args(&video_path, &audio_path, &settings, &self.path);
        tracing::debug!("Muxing segment audio: {:?}", args);

        let output = tokio::process::Command::new(&self.ffmpeg)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| self.fail(format!("Failed to start FFmpeg mux: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            return Err(self.fail(format!("FFmpeg mux failed: {}", stderr)));
        }

        remove_if_exists(&video_path);
        remove_if_exists(&audio_path);
        Ok(())
    }
}

fn remove_if_exists(path: &Path) {
    if path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            tracing::warn!("Failed to remove {:?}: {}", path, e);
        }
    }
}

#[async_trait]
impl ContainerWriter for FfmpegContainerWriter {
    fn path(&self) -> &Path {
        &self.path
    }

    fn can_add(&self, settings: &TrackSettings) -> bool {
        if self.status != WriterStatus::Unknown {
            return false;
        }
        match settings {
            TrackSettings::Video(_) => self.video_settings().is_none(),
            TrackSettings::Audio(_) => self.audio_settings().is_none(),
        }
    }

    fn add_track(&mut self, settings: TrackSettings) -> CaptureResult<TrackId> {
        if !self.can_add(&settings) {
            return Err(CaptureError::WriterFailed(format!("cannot add track {:?}", settings)));
        }
        self.tracks.push(settings);
        Ok(TrackId(self.tracks.len() - 1))
    }

    fn status(&self) -> WriterStatus {
        if self.status == WriterStatus::Writing {
            if let Some(message) = self.encoder.as_ref().and_then(VideoEncoder::failure) {
                return WriterStatus::Failed(message);
            }
        }
        self.status.clone()
    }

    fn start_writing(&mut self, _origin: Duration) -> CaptureResult<()> {
        if self.audio_settings().is_some() {
            let (_, audio_path) = side_paths(&self.path);
            let spool = std::fs::File::create(&audio_path)
                .map_err(|e| self.fail(format!("Failed to create audio spool: {}", e)))?;
            self.audio_spool = Some(spool);
        }
        self.status = WriterStatus::Writing;
        Ok(())
    }

    fn is_ready_for_more_media_data(&self, track: TrackId) -> bool {
        if self.status != WriterStatus::Writing {
            return false;
        }
        match self.tracks.get(track.0) {
            // The encoder is spawned by the first frame
            Some(TrackSettings::Video(_)) => self.encoder.as_ref().map_or(true, VideoEncoder::is_ready),
            Some(TrackSettings::Audio(_)) => true,
            None => false,
        }
    }

    fn append(&mut self, track: TrackId, sample: &SampleBuffer) -> CaptureResult<()> {
        if self.status != WriterStatus::Writing {
            return Err(CaptureError::WriterNotWriting);
        }

        let track_kind = match self.tracks.get(track.0) {
            Some(TrackSettings::Video(_)) => MediaKind::Video,
            Some(TrackSettings::Audio(_)) => MediaKind::Audio,
            None => return Err(CaptureError::WriterFailed(format!("unknown track {:?}", track))),
        };

        match (track_kind, sample.format) {
            (
                MediaKind::Video,
                FormatDescription::Video {
                    width,
                    height,
                    pixel_format,
                },
            ) => {
                if self.encoder.is_none() {
                    self.spawn_encoder(width, height, pixel_format.ffmpeg_name())?;
                }
                let result = match self.encoder.as_ref() {
                    Some(encoder) => encoder.push(sample.data.clone()),
                    None => Ok(()),
                };
                result.map_err(|message| self.fail(message))
            }
            (MediaKind::Audio, FormatDescription::Audio(_)) => {
                let result = match self.audio_spool.as_mut() {
                    Some(spool) => spool.write_all(&sample.data),
                    None => Ok(()),
                };
                result.map_err(|e| self.fail(format!("Failed to spool audio: {}", e)))
            }
            (kind, format) => Err(CaptureError::WriterFailed(format!(
                "{:?} sample sent to {:?} track",
                format.media_kind(),
                kind
            ))),
        }
    }

    async fn finish_writing(&mut self) -> CaptureResult<()> {
        if let Some(mut spool) = self.audio_spool.take() {
            spool
                .flush()
                .map_err(|e| self.fail(format!("Failed to flush audio spool: {}", e)))?;
        }
        self.finish_encoder().await?;
        self.mux().await?;
        self.status = WriterStatus::Completed;
        tracing::info!("FFmpeg segment finished: {:?}", self.path);
        Ok(())
    }

    fn cancel_writing(&mut self) {
        if let Some(mut encoder) = self.encoder.take() {
            encoder.kill();
        }
        self.audio_spool = None;
        let (video_path, audio_path) = side_paths(&self.path);
        remove_if_exists(&video_path);
        remove_if_exists(&audio_path);
        remove_if_exists(&self.path);
        self.status = WriterStatus::Cancelled;
    }
}

impl Drop for FfmpegContainerWriter {
    fn drop(&mut self) {
        if let Some(mut encoder) = self.encoder.take() {
            encoder.kill();
        }
    }
}

/// `ffprobe`-backed [`AssetProbe`]
#[derive(Debug, Clone)]
pub struct FfmpegProbe {
    ffprobe: PathBuf,
}

impl Default for FfmpegProbe {
    fn default() -> Self {
        Self {
            ffprobe: PathBuf::from("ffprobe"),
        }
    }
}

fn parse_seconds(value: Option<&serde_json::Value>) -> Option<Duration> {
    let seconds: f64 = value?.as_str()?.parse().ok()?;
    (seconds.is_finite() && seconds >= 0.0).then(|| Duration::from_secs_f64(seconds))
}

/// Build [`AssetInfo`] from `ffprobe -show_streams -show_format` JSON
fn parse_probe_output(path: &Path, json_str: &str) -> CaptureResult<AssetInfo> {
    let json: serde_json::Value = serde_json::from_str(json_str)?;

    let format_duration = parse_seconds(json.get("format").and_then(|f| f.get("duration")));

    let streams = json
        .get("streams")
        .and_then(|s| s.as_array())
        .cloned()
        .unwrap_or_default();

    let track = |codec_type: &str, kind: MediaKind| {
        streams
            .iter()
            .find(|s| s.get("codec_type").and_then(|c| c.as_str()) == Some(codec_type))
            .map(|s| TrackInfo {
                kind,
                duration: parse_seconds(s.get("duration"))
                    .or(format_duration)
                    .unwrap_or_default(),
            })
    };

    let video = track("video", MediaKind::Video);
    let audio = track("audio", MediaKind::Audio);
    let duration = format_duration
        .or_else(|| video.map(|t| t.duration))
        .unwrap_or_default();

    Ok(AssetInfo {
        path: path.to_path_buf(),
        duration,
        video,
        audio,
    })
}

#[async_trait]
impl AssetProbe for FfmpegProbe {
    async fn probe(&self, path: &Path) -> CaptureResult<AssetInfo> {
        let output = tokio::process::Command::new(&self.ffprobe)
            .args(["-v", "quiet", "-print_format", "json", "-show_streams", "-show_format"])
            .arg(path)
            .output()
            .await?;

        if !output.status.success() {
            return Err(CaptureError::Merge(format!(
                "ffprobe failed: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        parse_probe_output(path, &String::from_utf8_lossy(&output.stdout))
    }
}

/// `ffmpeg` concat-filter [`Exporter`]
#[derive(Debug, Clone)]
pub struct FfmpegExporter {
    ffmpeg: PathBuf,
}

impl Default for FfmpegExporter {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
        }
    }
}

/// Build the filter graph concatenating every clip of the composition
///
/// Returns the input files in order and the filter string. Segments without
/// audio get generated silence so that video and audio stay aligned.
fn build_concat_filter(composition: &Composition) -> (Vec<PathBuf>, String, bool) {
    let inputs: Vec<PathBuf> = composition.video.iter().map(|c| c.source.clone()).collect();
    let with_audio = !composition.audio.is_empty();

    let mut filters = Vec::new();
    let mut concat_inputs = String::new();

    for (i, clip) in composition.video.iter().enumerate() {
        let start = clip.source_range.start.as_secs_f64();
        let end = clip.source_range.end().as_secs_f64();
        filters.push(format!(
            "[{}:v]trim=start={}:end={},setpts=PTS-STARTPTS[v{}]",
            i, start, end, i
        ));
        concat_inputs.push_str(&format!("[v{}]", i));

        if with_audio {
            let audio = composition.audio.iter().find(|a| a.source == clip.source);
            match audio {
                Some(audio) => filters.push(format!(
                    "[{}:a]atrim=start={}:end={},asetpts=PTS-STARTPTS[a{}]",
                    i,
                    audio.source_range.start.as_secs_f64(),
                    audio.source_range.end().as_secs_f64(),
                    i
                )),
                None => filters.push(format!(
                    "anullsrc=r=48000:cl=stereo,atrim=duration={}[a{}]",
                    clip.source_range.duration.as_secs_f64(),
                    i
                )),
            }
            concat_inputs.push_str(&format!("[a{}]", i));
        }
    }

    let outputs = if with_audio { "[vout][aout]" } else { "[vout]" };
    filters.push(format!(
        "{}concat=n={}:v=1:a={}{}",
        concat_inputs,
        composition.video.len(),
        u8::from(with_audio),
        outputs
    ));

    (inputs, filters.join(";"), with_audio)
}

fn export_args(composition: &Composition, output: &Path, preset: ExportPreset) -> Vec<String> {
    let (inputs, filter_complex, with_audio) = build_concat_filter(composition);

    let mut args = vec!["-y".to_string()];
    for input in &inputs {
        args.extend(["-i".to_string(), input.to_string_lossy().to_string()]);
    }
    args.extend(["-filter_complex".to_string(), filter_complex]);
    args.extend(["-map".to_string(), "[vout]".to_string()]);
    if with_audio {
        args.extend(["-map".to_string(), "[aout]".to_string()]);
    }

    args.extend([
        "-c:v".to_string(),
        "libx264".to_string(),
        "-preset".to_string(),
        preset.h264_preset().to_string(),
        "-crf".to_string(),
        preset.crf().to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
    ]);
    if with_audio {
        args.extend([
            "-c:a".to_string(),
            "aac".to_string(),
            "-b:a".to_string(),
            preset.audio_bitrate().to_string(),
        ]);
    }
    args.extend([
        "-movflags".to_string(),
        "+faststart".to_string(),
        "-f".to_string(),
        "mov".to_string(),
        output.to_string_lossy().to_string(),
    ]);
    args
}

#[async_trait]
impl Exporter for FfmpegExporter {
    async fn export(&self, composition: &Composition, output: &Path, preset: ExportPreset) -> ExportStatus {
        if composition.video.is_empty() {
            return ExportStatus::Failed("composition has no video".to_string());
        }

        let args = export_args(composition, output, preset);
        tracing::info!("Starting FFmpeg merge export: {:?}", args);

        let result = tokio::process::Command::new(&self.ffmpeg)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .await;

        match result {
            Ok(out) if out.status.success() => ExportStatus::Completed,
            Ok(out) => ExportStatus::Failed(format!(
                "FFmpeg exited with error: {}",
                String::from_utf8_lossy(&out.stderr)
            )),
            Err(e) => ExportStatus::Failed(format!("Failed to start FFmpeg: {}", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::sample::{AudioSampleFormat, AudioStreamDescription};
    use crate::export::types::{CompositionClip, TimeRange};
    use crate::recorder::writer::{AudioCodec, VideoCodec};

    fn clip(source: &str, at_ms: u64, duration_ms: u64) -> CompositionClip {
        CompositionClip {
            source: PathBuf::from(source),
            source_range: TimeRange {
                start: Duration::ZERO,
                duration: Duration::from_millis(duration_ms),
            },
            at: Duration::from_millis(at_ms),
        }
    }

    #[test]
    fn test_encode_args_scale_only_when_needed() {
        let settings = VideoSettings {
            codec: VideoCodec::H264,
            width: 1920,
            height: 1080,
            frame_rate: 30,
        };
        let same = video_encode_args(1920, 1080, "nv12", &settings, Path::new("/tmp/s.video.mov"));
        assert!(!same.contains(&"-vf".to_string()));
        assert!(same.contains(&"1920x1080".to_string()));

        let scaled = video_encode_args(1280, 720, "bgra", &settings, Path::new("/tmp/s.video.mov"));
        let filter_index = scaled.iter().position(|a| a == "-vf").unwrap();
        assert!(scaled[filter_index + 1].starts_with("scale=1920:1080"));
    }

    #[test]
    fn test_mux_args_use_track_settings() {
        let settings = AudioSettings {
            codec: AudioCodec::Aac,
            channels: 1,
            sample_rate: 44_100.0,
            bitrate: 64_000,
            source: AudioStreamDescription {
                sample_rate: 44_100.0,
                channels: 1,
                sample_format: AudioSampleFormat::S16,
            },
        };
        let args = mux_args(
            Path::new("/tmp/s.video.mov"),
            Path::new("/tmp/s.audio.pcm"),
            &settings,
            Path::new("/tmp/s.mov"),
        );
        let joined = args.join(" ");
        assert!(joined.contains("-f s16le -ar 44100 -ac 1"));
        assert!(joined.contains("-b:a 64000"));
        assert_eq!(args.last().map(String::as_str), Some("/tmp/s.mov"));
    }

    /// Stand-in encoder that never reads its input
    #[cfg(unix)]
    fn stalled_encoder(dir: &Path) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let script = dir.join("stalled-ffmpeg");
        std::fs::write(&script, "#!/bin/sh\nexec sleep 30\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        script
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stalled_encoder_drops_frames_and_cancels() {
        use crate::capture::sample::PixelFormat;
        use crate::capture::traits::Resolution;
        use crate::recorder::writer::{SegmentedWriter, WriterOptions};

        let dir = tempfile::tempdir().unwrap();
        let factory: Arc<dyn ContainerWriterFactory> =
            Arc::new(FfmpegWriterFactory::new(stalled_encoder(dir.path())).with_frame_queue(4));
        let options = WriterOptions {
            frame_rate: 30,
            audio_bitrate: 64_000,
            video_resolution: None,
        };
        let path = dir.path().join("segment-0.mov");
        let mut writer = SegmentedWriter::create(&factory, path.clone(), 0, options).unwrap();
        writer.setup_video_input(Resolution::new(320, 240)).unwrap();
        writer
            .setup_audio_input(&AudioStreamDescription {
                sample_rate: 48_000.0,
                channels: 1,
                sample_format: AudioSampleFormat::S16,
            })
            .unwrap();
        assert!(writer.start_if_ready(Duration::ZERO).unwrap());

        // Each frame is larger than a pipe buffer, so the first write never completes
        let started = std::time::Instant::now();
        let mut written = 0;
        for i in 0..20u64 {
            let frame = SampleBuffer::new(
                FormatDescription::Video {
                    width: 320,
                    height: 240,
                    pixel_format: PixelFormat::Bgra,
                },
                Duration::from_millis(i * 33),
                Duration::from_millis(33),
                vec![0; 320 * 240 * 4],
            );
            if writer.write_video(&frame).unwrap() {
                written += 1;
            }
        }
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(written, 4);
        assert!(!writer.is_video_ready());

        // Finishing waits on the stuck encoder; cancelling kills it and cleans up
        let (video_side, audio_side) = side_paths(&path);
        assert!(audio_side.exists());
        let finish = tokio::time::timeout(Duration::from_millis(200), writer.finalize()).await;
        assert!(finish.is_err());
        writer.cancel();
        assert!(!audio_side.exists());
        assert!(!video_side.exists());
        assert!(!path.exists());
    }

    #[test]
    fn test_side_paths() {
        let (video, audio) = side_paths(Path::new("/tmp/segment-0.mov"));
        assert_eq!(video, PathBuf::from("/tmp/segment-0.video.mov"));
        assert_eq!(audio, PathBuf::from("/tmp/segment-0.audio.pcm"));
    }

    #[test]
    fn test_concat_filter_with_audio() {
        let composition = Composition {
            video: vec![clip("a.mov", 0, 2000), clip("b.mov", 2000, 1000)],
            audio: vec![clip("a.mov", 0, 2000), clip("b.mov", 2000, 1000)],
            duration: Duration::from_millis(3000),
        };
        let (inputs, filter, with_audio) = build_concat_filter(&composition);
        assert_eq!(inputs.len(), 2);
        assert!(with_audio);
        assert!(filter.contains("[1:v]trim=start=0:end=1,setpts=PTS-STARTPTS[v1]"));
        assert!(filter.ends_with("[v0][a0][v1][a1]concat=n=2:v=1:a=1[vout][aout]"));
    }

    #[test]
    fn test_concat_filter_fills_missing_audio() {
        let composition = Composition {
            video: vec![clip("a.mov", 0, 2000), clip("b.mov", 2000, 500)],
            audio: vec![clip("a.mov", 0, 2000)],
            duration: Duration::from_millis(2500),
        };
        let (_, filter, _) = build_concat_filter(&composition);
        assert!(filter.contains("anullsrc=r=48000:cl=stereo,atrim=duration=0.5[a1]"));
    }

    #[test]
    fn test_export_args_highest_preset() {
        let composition = Composition {
            video: vec![clip("a.mov", 0, 1000)],
            audio: Vec::new(),
            duration: Duration::from_millis(1000),
        };
        let args = export_args(&composition, Path::new("/tmp/out.mov"), ExportPreset::Highest);
        let joined = args.join(" ");
        assert!(joined.contains("-preset slow -crf 18"));
        assert!(!joined.contains("[aout]"));
        assert!(joined.ends_with("-f mov /tmp/out.mov"));
    }

    #[test]
    fn test_parse_probe_output() {
        let json = r#"{
            "streams": [
                { "codec_type": "video", "duration": "2.000000" },
                { "codec_type": "audio", "duration": "1.980000" }
            ],
            "format": { "duration": "2.010000" }
        }"#;
        let info = parse_probe_output(Path::new("a.mov"), json).unwrap();
        assert_eq!(info.duration, Duration::from_millis(2010));
        assert_eq!(info.video.unwrap().duration, Duration::from_secs(2));
        assert_eq!(info.audio.unwrap().duration, Duration::from_millis(1980));
    }

    #[test]
    fn test_parse_probe_output_without_video() {
        let json = r#"{ "streams": [ { "codec_type": "audio" } ], "format": { "duration": "1.5" } }"#;
        let info = parse_probe_output(Path::new("a.mov"), json).unwrap();
        assert!(info.video.is_none());
        assert_eq!(info.audio.unwrap().duration, Duration::from_millis(1500));
    }
}
