//! One-shot still photo capture
//!
//! `PhotoCapture` computes per-request settings from what the photo output
//! advertises, issues the capture, and routes the hardware callbacks back to
//! the observer registered when the request was made. Each request also gets a
//! [`PendingPhoto`] that resolves exactly once with the image bytes.

use crate::capture::traits::{
    FlashMode, PhotoCaptureDelegate, PhotoCodec, PhotoOutput, PhotoOutputConfig, PhotoSettings,
    QualityPrioritization, VideoOrientation,
};
use crate::utils::error::{CaptureError, CaptureResult};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::oneshot;
use uuid::Uuid;

/// Receiver of photo completion callbacks
pub trait PhotoCaptureObserver: Send + Sync {
    fn will_begin(&self, request: Uuid);

    /// Encoded image bytes are available
    fn data_ready(&self, request: Uuid, bytes: &[u8]);

    fn did_finish(&self, request: Uuid, error: Option<&str>);
}

/// In-flight request state
struct PendingRequest {
    observer: Arc<dyn PhotoCaptureObserver>,
    data: Option<Vec<u8>>,
    processing_error: Option<String>,
    reply: oneshot::Sender<CaptureResult<Vec<u8>>>,
}

/// Routes hardware callbacks to the request they belong to
#[derive(Default)]
struct CompletionRelay {
    pending: Mutex<HashMap<Uuid, PendingRequest>>,
}

impl CompletionRelay {
    fn observer(&self, request: Uuid) -> Option<Arc<dyn PhotoCaptureObserver>> {
        self.pending.lock().get(&request).map(|p| p.observer.clone())
    }
}

impl PhotoCaptureDelegate for CompletionRelay {
    fn will_begin_capture(&self, request: Uuid) {
        if let Some(observer) = self.observer(request) {
            observer.will_begin(request);
        }
    }

    fn did_finish_processing(&self, request: Uuid, result: Result<Vec<u8>, String>) {
        let (observer, bytes) = {
            let mut pending = self.pending.lock();
            let Some(entry) = pending.get_mut(&request) else {
                tracing::warn!("Photo data for unknown request {}", request);
                return;
            };
            match result {
                Ok(bytes) => {
                    entry.data = Some(bytes.clone());
                    (entry.observer.clone(), bytes)
                }
                Err(message) => {
                    tracing::warn!("Photo {} processing failed: {}", request, message);
                    entry.processing_error = Some(message);
                    return;
                }
            }
        };
        observer.data_ready(request, &bytes);
    }

    fn did_finish_capture(&self, request: Uuid, error: Option<String>) {
        let Some(entry) = self.pending.lock().remove(&request) else {
            return;
        };

        let failure = error.or(entry.processing_error);
        let result = match (failure.as_ref(), entry.data) {
            (Some(message), _) => Err(CaptureError::PhotoFailed(message.clone())),
            (None, Some(bytes)) => Ok(bytes),
            (None, None) => Err(CaptureError::PhotoFailed("no image data".into())),
        };

        entry.observer.did_finish(request, failure.as_deref());
        let _ = entry.reply.send(result);
    }
}

/// A photo request awaiting completion
pub struct PendingPhoto {
    pub id: Uuid,
    rx: oneshot::Receiver<CaptureResult<Vec<u8>>>,
}

impl PendingPhoto {
    /// Wait for the encoded image
    pub async fn wait(self) -> CaptureResult<Vec<u8>> {
        self.rx
            .await
            .map_err(|_| CaptureError::PhotoFailed("capture abandoned by the output".into()))?
    }
}

pub struct PhotoCapture {
    output: Arc<dyn PhotoOutput>,
    observer: RwLock<Option<Arc<dyn PhotoCaptureObserver>>>,
    relay: Arc<CompletionRelay>,
}

impl PhotoCapture {
    /// Wrap `output`, applying the still-capture configuration
    pub fn new(output: Arc<dyn PhotoOutput>) -> Self {
        output.configure(PhotoOutputConfig::default());
        Self {
            output,
            observer: RwLock::new(None),
            relay: Arc::new(CompletionRelay::default()),
        }
    }

    pub fn output(&self) -> &Arc<dyn PhotoOutput> {
        &self.output
    }

    pub fn set_observer(&self, observer: Option<Arc<dyn PhotoCaptureObserver>>) {
        *self.observer.write() = observer;
    }

    /// Settings for the next capture
    pub fn make_settings(&self, flash_mode: FlashMode, orientation: VideoOrientation) -> PhotoSettings {
        let codec = self
            .output
            .available_codecs()
            .contains(&PhotoCodec::Jpeg)
            .then_some(PhotoCodec::Jpeg);

        let flash_mode = if self.output.supported_flash_modes().contains(&flash_mode) {
            flash_mode
        } else {
            if flash_mode != FlashMode::Off {
                tracing::warn!("Flash mode {:?} unsupported, leaving flash off", flash_mode);
            }
            FlashMode::default()
        };

        PhotoSettings {
            codec,
            high_resolution: true,
            quality_prioritization: QualityPrioritization::Quality,
            flash_mode,
            preview_pixel_format: self.output.available_preview_pixel_formats().first().copied(),
            orientation,
        }
    }

    /// Issue one capture bound to the registered observer
    pub fn take_photo(
        &self,
        flash_mode: FlashMode,
        orientation: VideoOrientation,
    ) -> CaptureResult<PendingPhoto> {
        let observer = self.observer.read().clone().ok_or(CaptureError::NoObserver)?;
        let settings = self.make_settings(flash_mode, orientation);
        let id = Uuid::new_v4();
        let (reply, rx) = oneshot::channel();

        self.relay.pending.lock().insert(
            id,
            PendingRequest {
                observer,
                data: None,
                processing_error: None,
                reply,
            },
        );

        tracing::info!("Capturing photo {} with flash {:?}", id, settings.flash_mode);
        let delegate: Arc<dyn PhotoCaptureDelegate> = self.relay.clone();
        self.output.capture(id, settings, delegate);
        Ok(PendingPhoto { id, rx })
    }

    /// Give up on a request the output never completed
    ///
    /// The observer is told the capture finished with `reason`; callbacks
    /// arriving later for the request are ignored.
    pub fn abandon(&self, request: Uuid, reason: &str) -> bool {
        let Some(entry) = self.relay.pending.lock().remove(&request) else {
            return false;
        };
        tracing::warn!("Abandoning photo {}: {}", request, reason);
        entry.observer.did_finish(request, Some(reason));
        true
    }
}
