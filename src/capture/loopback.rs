//! In-process capture hardware
//!
//! Loopback devices, session and photo output that behave like real hardware
//! from the caller's point of view, but are driven by the host program. Used
//! for headless runs and throughout the test suite.

use super::sample::{MediaKind, PixelFormat, SampleBuffer, SampleDelegate};
use super::traits::{
    CaptureDevice, CaptureSession, DeviceDiscovery, DeviceInfo, DeviceInput, DevicePosition,
    DeviceType, ExposureMode, FlashMode, OutputHandle, OutputKind, PhotoCaptureDelegate,
    PhotoCodec, PhotoOutput, PhotoOutputConfig, PhotoSettings, Resolution, SessionPreset,
    StabilizationMode, TorchMode, VideoOrientation,
};
use crate::utils::error::{CaptureError, CaptureResult};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Observable configuration state of a loopback device
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceSettings {
    pub exposure_bias: f32,
    pub exposure_mode: ExposureMode,
    pub torch_mode: TorchMode,
    pub lock_count: u32,
}

/// A simulated camera or microphone
#[derive(Debug)]
pub struct LoopbackDevice {
    info: DeviceInfo,
    torch_modes: Vec<TorchMode>,
    locked: AtomicBool,
    refuse_lock: AtomicBool,
    settings: Mutex<DeviceSettings>,
}

impl LoopbackDevice {
    pub fn camera(id: &str, position: DevicePosition, device_type: DeviceType) -> Self {
        Self::new(DeviceInfo {
            id: id.to_string(),
            name: format!("{:?} {:?}", position, device_type),
            media_kind: MediaKind::Video,
            position,
            device_type,
            active_format: Some(Resolution::new(1920, 1080)),
        })
    }

    pub fn microphone(id: &str) -> Self {
        Self::new(DeviceInfo {
            id: id.to_string(),
            name: "Built-in Microphone".to_string(),
            media_kind: MediaKind::Audio,
            position: DevicePosition::Unspecified,
            device_type: DeviceType::Microphone,
            active_format: None,
        })
    }

    fn new(info: DeviceInfo) -> Self {
        Self {
            info,
            torch_modes: Vec::new(),
            locked: AtomicBool::new(false),
            refuse_lock: AtomicBool::new(false),
            settings: Mutex::new(DeviceSettings {
                exposure_bias: 1.0,
                exposure_mode: ExposureMode::AutoExpose,
                torch_mode: TorchMode::Off,
                lock_count: 0,
            }),
        }
    }

    /// Give the device a torch supporting every mode
    pub fn with_torch(mut self) -> Self {
        self.torch_modes = vec![TorchMode::Off, TorchMode::On, TorchMode::Auto];
        self
    }

    /// Make every later configuration lock attempt fail
    pub fn refuse_lock(&self, refuse: bool) {
        self.refuse_lock.store(refuse, Ordering::SeqCst);
    }

    pub fn settings(&self) -> DeviceSettings {
        self.settings.lock().clone()
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::SeqCst)
    }

    fn require_lock(&self, what: &str) {
        if !self.is_locked() {
            tracing::warn!("{} changed on {} without configuration lock", what, self.info.id);
        }
    }
}

impl CaptureDevice for LoopbackDevice {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn lock_for_configuration(&self) -> CaptureResult<()> {
        if self.refuse_lock.load(Ordering::SeqCst) {
            return Err(CaptureError::DeviceLocked(self.info.id.clone()));
        }
        if self.locked.swap(true, Ordering::SeqCst) {
            return Err(CaptureError::DeviceLocked(format!(
                "{} is already locked",
                self.info.id
            )));
        }
        self.settings.lock().lock_count += 1;
        Ok(())
    }

    fn unlock_for_configuration(&self) {
        self.locked.store(false, Ordering::SeqCst);
    }

    fn set_exposure_target_bias(&self, bias: f32) {
        self.require_lock("Exposure bias");
        self.settings.lock().exposure_bias = bias;
    }

    fn set_exposure_mode(&self, mode: ExposureMode) {
        self.require_lock("Exposure mode");
        self.settings.lock().exposure_mode = mode;
    }

    fn has_torch(&self) -> bool {
        !self.torch_modes.is_empty()
    }

    fn is_torch_mode_supported(&self, mode: TorchMode) -> bool {
        self.torch_modes.contains(&mode)
    }

    fn set_torch_mode(&self, mode: TorchMode) {
        self.require_lock("Torch mode");
        self.settings.lock().torch_mode = mode;
    }
}

/// Fixed set of loopback devices
#[derive(Debug, Default)]
pub struct LoopbackDiscovery {
    devices: Vec<Arc<LoopbackDevice>>,
}

impl LoopbackDiscovery {
    pub fn new(devices: Vec<Arc<LoopbackDevice>>) -> Self {
        Self { devices }
    }

    /// Front true-depth + wide cameras, back dual + wide cameras, one microphone
    pub fn phone() -> Self {
        Self::new(vec![
            Arc::new(LoopbackDevice::camera(
                "front-wide",
                DevicePosition::Front,
                DeviceType::WideAngleCamera,
            )),
            Arc::new(LoopbackDevice::camera(
                "front-truedepth",
                DevicePosition::Front,
                DeviceType::TrueDepthCamera,
            )),
            Arc::new(
                LoopbackDevice::camera("back-wide", DevicePosition::Back, DeviceType::WideAngleCamera)
                    .with_torch(),
            ),
            Arc::new(
                LoopbackDevice::camera("back-dual", DevicePosition::Back, DeviceType::DualCamera)
                    .with_torch(),
            ),
            Arc::new(LoopbackDevice::microphone("mic")),
        ])
    }

    pub fn device(&self, id: &str) -> Option<Arc<LoopbackDevice>> {
        self.devices.iter().find(|d| d.info.id == id).cloned()
    }
}

impl DeviceDiscovery for LoopbackDiscovery {
    fn devices(&self, kind: MediaKind) -> Vec<Arc<dyn CaptureDevice>> {
        self.devices
            .iter()
            .filter(|d| d.info.media_kind == kind)
            .map(|d| d.clone() as Arc<dyn CaptureDevice>)
            .collect()
    }
}

/// Connection configuration recorded per output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionState {
    pub orientation: VideoOrientation,
    pub stabilization: Option<StabilizationMode>,
}

#[derive(Default)]
struct SessionState {
    preset: Option<SessionPreset>,
    /// Attached inputs: input id -> device id
    inputs: Vec<(Uuid, String)>,
    outputs: Vec<OutputHandle>,
    connections: HashMap<Uuid, ConnectionState>,
    delegates: HashMap<OutputKind, Arc<dyn SampleDelegate>>,
    running: bool,
    config_depth: u32,
    commits: u32,
    unbracketed_mutations: u32,
}

/// Simulated capture session
pub struct LoopbackSession {
    presets: Vec<SessionPreset>,
    rejected_devices: Mutex<HashSet<String>>,
    rejected_outputs: Mutex<HashSet<OutputKind>>,
    state: Mutex<SessionState>,
}

impl Default for LoopbackSession {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackSession {
    pub fn new() -> Self {
        Self {
            presets: vec![
                SessionPreset::Low,
                SessionPreset::Medium,
                SessionPreset::High,
                SessionPreset::Hd1920x1080,
            ],
            rejected_devices: Mutex::new(HashSet::new()),
            rejected_outputs: Mutex::new(HashSet::new()),
            state: Mutex::new(SessionState::default()),
        }
    }

    /// Refuse any input backed by the given device
    pub fn reject_device(&self, device_id: &str) {
        self.rejected_devices.lock().insert(device_id.to_string());
    }

    pub fn reject_output(&self, kind: OutputKind) {
        self.rejected_outputs.lock().insert(kind);
    }

    /// Device ids of the currently attached inputs
    pub fn input_devices(&self) -> Vec<String> {
        self.state.lock().inputs.iter().map(|(_, d)| d.clone()).collect()
    }

    pub fn output_kinds(&self) -> Vec<OutputKind> {
        self.state.lock().outputs.iter().map(|o| o.kind).collect()
    }

    pub fn preset(&self) -> Option<SessionPreset> {
        self.state.lock().preset
    }

    pub fn connection(&self, output: &OutputHandle) -> Option<ConnectionState> {
        self.state.lock().connections.get(&output.id).copied()
    }

    pub fn commit_count(&self) -> u32 {
        self.state.lock().commits
    }

    pub fn is_configuring(&self) -> bool {
        self.state.lock().config_depth > 0
    }

    /// Topology mutations made outside a configuration bracket
    pub fn unbracketed_mutations(&self) -> u32 {
        self.state.lock().unbracketed_mutations
    }

    /// Push a buffer out of the given data output, as the hardware would
    ///
    /// Returns false when the session is not running or nothing is listening.
    pub fn deliver(&self, kind: OutputKind, sample: SampleBuffer) -> bool {
        let delegate = {
            let state = self.state.lock();
            if !state.running {
                return false;
            }
            state.delegates.get(&kind).cloned()
        };
        match delegate {
            Some(delegate) => {
                delegate.did_output(sample);
                true
            }
            None => false,
        }
    }

    fn track_mutation(state: &mut SessionState) {
        if state.config_depth == 0 {
            state.unbracketed_mutations += 1;
        }
    }
}

impl CaptureSession for LoopbackSession {
    fn begin_configuration(&self) {
        self.state.lock().config_depth += 1;
    }

    fn commit_configuration(&self) {
        let mut state = self.state.lock();
        state.config_depth = state.config_depth.saturating_sub(1);
        state.commits += 1;
    }

    fn supported_presets(&self) -> Vec<SessionPreset> {
        self.presets.clone()
    }

    fn set_preset(&self, preset: SessionPreset) {
        let mut state = self.state.lock();
        Self::track_mutation(&mut state);
        state.preset = Some(preset);
    }

    fn can_add_input(&self, input: &DeviceInput) -> bool {
        let info = input.device().info();
        if self.rejected_devices.lock().contains(&info.id) {
            return false;
        }
        let state = self.state.lock();
        !state.inputs.iter().any(|(id, _)| *id == input.id())
    }

    fn add_input(&self, input: &DeviceInput) {
        let mut state = self.state.lock();
        Self::track_mutation(&mut state);
        state
            .inputs
            .push((input.id(), input.device().info().id.clone()));
    }

    fn remove_input(&self, input: &DeviceInput) {
        let mut state = self.state.lock();
        Self::track_mutation(&mut state);
        state.inputs.retain(|(id, _)| *id != input.id());
    }

    fn can_add_output(&self, output: &OutputHandle) -> bool {
        if self.rejected_outputs.lock().contains(&output.kind) {
            return false;
        }
        !self.state.lock().outputs.iter().any(|o| o.id == output.id)
    }

    fn add_output(&self, output: &OutputHandle) {
        let mut state = self.state.lock();
        Self::track_mutation(&mut state);
        state.outputs.push(*output);
    }

    fn is_stabilization_supported(&self, output: &OutputHandle) -> bool {
        output.kind == OutputKind::VideoData
    }

    fn configure_connection(
        &self,
        output: &OutputHandle,
        orientation: VideoOrientation,
        stabilization: Option<StabilizationMode>,
    ) -> bool {
        let mut state = self.state.lock();
        if !state.outputs.iter().any(|o| o.id == output.id) {
            return false;
        }
        state.connections.insert(
            output.id,
            ConnectionState {
                orientation,
                stabilization,
            },
        );
        true
    }

    fn set_sample_delegate(&self, output: &OutputHandle, delegate: Arc<dyn SampleDelegate>) {
        self.state.lock().delegates.insert(output.kind, delegate);
    }

    fn start_running(&self) {
        self.state.lock().running = true;
    }

    fn stop_running(&self) {
        self.state.lock().running = false;
    }

    fn is_running(&self) -> bool {
        self.state.lock().running
    }
}

/// Simulated still-photo output that completes captures immediately unless held
pub struct LoopbackPhotoOutput {
    handle: OutputHandle,
    codecs: Vec<PhotoCodec>,
    flash_modes: Mutex<Vec<FlashMode>>,
    preview_formats: Vec<PixelFormat>,
    config: Mutex<Option<PhotoOutputConfig>>,
    photo_data: Vec<u8>,
    fail_processing: Mutex<Option<String>>,
    captures: Mutex<Vec<(Uuid, PhotoSettings)>>,
    hold: Mutex<bool>,
    held: Mutex<Vec<(Uuid, Arc<dyn PhotoCaptureDelegate>)>>,
}

impl Default for LoopbackPhotoOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackPhotoOutput {
    pub fn new() -> Self {
        Self {
            handle: OutputHandle::new(OutputKind::Photo),
            codecs: vec![PhotoCodec::Hevc, PhotoCodec::Jpeg],
            flash_modes: Mutex::new(vec![FlashMode::Off, FlashMode::On, FlashMode::Auto]),
            preview_formats: vec![PixelFormat::Bgra],
            config: Mutex::new(None),
            photo_data: vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0xFF, 0xD9],
            fail_processing: Mutex::new(None),
            captures: Mutex::new(Vec::new()),
            hold: Mutex::new(false),
            held: Mutex::new(Vec::new()),
        }
    }

    pub fn with_codecs(mut self, codecs: Vec<PhotoCodec>) -> Self {
        self.codecs = codecs;
        self
    }

    pub fn with_preview_formats(mut self, formats: Vec<PixelFormat>) -> Self {
        self.preview_formats = formats;
        self
    }

    /// Report only the given flash modes as currently supported
    pub fn set_flash_modes(&self, modes: Vec<FlashMode>) {
        *self.flash_modes.lock() = modes;
    }

    /// Make the next captures fail after `will_begin`
    pub fn fail_processing(&self, message: Option<String>) {
        *self.fail_processing.lock() = message;
    }

    pub fn photo_data(&self) -> &[u8] {
        &self.photo_data
    }

    pub fn config(&self) -> Option<PhotoOutputConfig> {
        *self.config.lock()
    }

    /// Settings of every capture issued so far
    pub fn captures(&self) -> Vec<(Uuid, PhotoSettings)> {
        self.captures.lock().clone()
    }

    /// Keep new captures pending instead of completing them
    pub fn hold_captures(&self, hold: bool) {
        *self.hold.lock() = hold;
    }

    /// Complete every held capture; returns how many were released
    pub fn release_held(&self) -> usize {
        let held = std::mem::take(&mut *self.held.lock());
        for (request, delegate) in &held {
            self.complete(*request, delegate.as_ref());
        }
        held.len()
    }

    fn complete(&self, request: Uuid, delegate: &dyn PhotoCaptureDelegate) {
        let failure = self.fail_processing.lock().clone();
        match failure {
            Some(message) => {
                delegate.did_finish_processing(request, Err(message.clone()));
                delegate.did_finish_capture(request, Some(message));
            }
            None => {
                delegate.did_finish_processing(request, Ok(self.photo_data.clone()));
                delegate.did_finish_capture(request, None);
            }
        }
    }
}

impl PhotoOutput for LoopbackPhotoOutput {
    fn handle(&self) -> OutputHandle {
        self.handle
    }

    fn configure(&self, config: PhotoOutputConfig) {
        *self.config.lock() = Some(config);
    }

    fn available_codecs(&self) -> Vec<PhotoCodec> {
        self.codecs.clone()
    }

    fn supported_flash_modes(&self) -> Vec<FlashMode> {
        self.flash_modes.lock().clone()
    }

    fn available_preview_pixel_formats(&self) -> Vec<PixelFormat> {
        self.preview_formats.clone()
    }

    fn capture(&self, request: Uuid, settings: PhotoSettings, delegate: Arc<dyn PhotoCaptureDelegate>) {
        self.captures.lock().push((request, settings));

        delegate.will_begin_capture(request);
        if *self.hold.lock() {
            self.held.lock().push((request, delegate));
            return;
        }
        self.complete(request, delegate.as_ref());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phone_discovery() {
        let discovery = LoopbackDiscovery::phone();
        assert_eq!(discovery.devices(MediaKind::Video).len(), 4);
        assert_eq!(discovery.devices(MediaKind::Audio).len(), 1);

        let front = discovery
            .default_device(
                MediaKind::Video,
                Some(DeviceType::WideAngleCamera),
                Some(DevicePosition::Front),
            )
            .map(|d| d.info().id.clone());
        assert_eq!(front.as_deref(), Some("front-wide"));
    }

    #[test]
    fn test_device_lock_is_exclusive() {
        let device = LoopbackDevice::microphone("mic");
        assert!(device.lock_for_configuration().is_ok());
        assert!(device.lock_for_configuration().is_err());
        device.unlock_for_configuration();
        assert!(device.lock_for_configuration().is_ok());
        assert_eq!(device.settings().lock_count, 2);
    }

    #[test]
    fn test_session_counts_unbracketed_mutations() {
        let session = LoopbackSession::new();
        let output = OutputHandle::new(OutputKind::VideoData);
        session.add_output(&output);
        assert_eq!(session.unbracketed_mutations(), 1);

        session.begin_configuration();
        session.set_preset(SessionPreset::High);
        session.commit_configuration();
        assert_eq!(session.unbracketed_mutations(), 1);
        assert_eq!(session.commit_count(), 1);
    }

    #[test]
    fn test_deliver_requires_running_session() {
        struct Count(Mutex<usize>);
        impl SampleDelegate for Count {
            fn did_output(&self, _sample: SampleBuffer) {
                *self.0.lock() += 1;
            }
        }

        let session = LoopbackSession::new();
        let output = OutputHandle::new(OutputKind::AudioData);
        let counter = Arc::new(Count(Mutex::new(0)));
        session.set_sample_delegate(&output, counter.clone());

        let sample = SampleBuffer::new(
            crate::capture::sample::FormatDescription::Audio(
                crate::capture::sample::AudioStreamDescription {
                    sample_rate: 44_100.0,
                    channels: 1,
                    sample_format: crate::capture::sample::AudioSampleFormat::S16,
                },
            ),
            std::time::Duration::ZERO,
            std::time::Duration::from_millis(10),
            vec![0; 4],
        );
        assert!(!session.deliver(OutputKind::AudioData, sample.clone()));
        session.start_running();
        assert!(session.deliver(OutputKind::AudioData, sample));
        assert_eq!(*counter.0.lock(), 1);
    }
}
