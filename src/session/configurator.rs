//! Capture session topology
//!
//! Adds and removes inputs and outputs inside configuration transactions,
//! applies per-connection orientation and stabilization, and starts or stops
//! the running session.

use crate::capture::traits::{
    CaptureSession, DeviceInput, DeviceOrientation, OutputHandle, StabilizationMode,
    VideoOrientation,
};
use crate::utils::error::{CaptureError, CaptureResult};
use std::sync::Arc;

/// Begin/commit bracket around topology mutations
///
/// The commit runs on drop, so an early return through `?` still releases
/// the session.
struct Transaction<'a> {
    session: &'a dyn CaptureSession,
}

impl<'a> Transaction<'a> {
    fn begin(session: &'a dyn CaptureSession) -> Self {
        session.begin_configuration();
        Self { session }
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        self.session.commit_configuration();
    }
}

/// Everything attached to the session at startup
#[derive(Debug, Clone, Copy)]
pub struct Topology<'a> {
    pub video_input: &'a DeviceInput,
    pub audio_input: &'a DeviceInput,
    pub video_output: &'a OutputHandle,
    pub audio_output: &'a OutputHandle,
    pub photo_output: &'a OutputHandle,
}

/// Owns the capture session and its topology changes
pub struct SessionConfigurator {
    session: Arc<dyn CaptureSession>,
}

impl SessionConfigurator {
    pub fn new(session: Arc<dyn CaptureSession>) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Arc<dyn CaptureSession> {
        &self.session
    }

    /// Attach the full topology in one transaction, then start running
    pub fn start(&self, topology: Topology<'_>, orientation: DeviceOrientation) -> CaptureResult<()> {
        {
            let _transaction = Transaction::begin(self.session.as_ref());

            if let Some(preset) = self.session.supported_presets().into_iter().max() {
                self.session.set_preset(preset);
                tracing::debug!("Session preset set to {:?}", preset);
            }

            self.add_input(topology.video_input)?;
            self.add_input(topology.audio_input)?;

            self.add_output(topology.video_output)?;
            self.apply_orientation(orientation, topology.video_output);

            self.add_output(topology.audio_output)?;
            self.add_output(topology.photo_output)?;
        }

        self.session.start_running();
        tracing::info!("Capture session running");
        Ok(())
    }

    /// Replace the camera input, restoring the old one if the new one is refused
    pub fn set_new_device(
        &self,
        old_input: &DeviceInput,
        new_input: &DeviceInput,
        video_output: &OutputHandle,
        orientation: DeviceOrientation,
    ) -> CaptureResult<()> {
        let _transaction = Transaction::begin(self.session.as_ref());

        self.session.remove_input(old_input);

        if !self.session.can_add_input(new_input) {
            if self.session.can_add_input(old_input) {
                self.session.add_input(old_input);
                tracing::warn!("New camera input rejected; previous input restored");
            } else {
                tracing::error!("New camera input rejected and previous input could not be restored");
            }
            return Err(CaptureError::InputRejected(
                new_input.device().info().name.clone(),
            ));
        }

        self.session.add_input(new_input);
        self.apply_orientation(orientation, video_output);
        Ok(())
    }

    /// Map the device rotation onto the output's connection
    pub fn set_orientation(&self, orientation: DeviceOrientation, output: &OutputHandle) -> VideoOrientation {
        let _transaction = Transaction::begin(self.session.as_ref());
        self.apply_orientation(orientation, output)
    }

    pub fn stop(&self) {
        self.session.stop_running();
        tracing::info!("Capture session stopped");
    }

    fn apply_orientation(&self, orientation: DeviceOrientation, output: &OutputHandle) -> VideoOrientation {
        let video_orientation = VideoOrientation::from(orientation);
        let stabilization = self
            .session
            .is_stabilization_supported(output)
            .then_some(StabilizationMode::Standard);

        if !self
            .session
            .configure_connection(output, video_orientation, stabilization)
        {
            tracing::warn!("Output {:?} has no connection to orient", output.kind);
        }
        video_orientation
    }

    fn add_input(&self, input: &DeviceInput) -> CaptureResult<()> {
        if !self.session.can_add_input(input) {
            let name = input.device().info().name.clone();
            tracing::error!("Couldn't add device input '{}' to the session", name);
            return Err(CaptureError::InputRejected(name));
        }
        self.session.add_input(input);
        Ok(())
    }

    fn add_output(&self, output: &OutputHandle) -> CaptureResult<()> {
        if !self.session.can_add_output(output) {
            tracing::error!("Couldn't add {:?} output to the session", output.kind);
            return Err(CaptureError::OutputRejected(format!("{:?}", output.kind)));
        }
        self.session.add_output(output);
        Ok(())
    }
}
