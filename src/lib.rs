//! segcam - segmented camera recording.
//!
//! Live camera and microphone samples are written to one file per recording
//! segment; pause closes a segment, resume opens the next, and stop merges
//! them into a single recording handed to the media library. Still photos
//! are captured alongside.

pub mod camera;
pub mod capture;
pub mod config;
pub mod events;
pub mod export;
pub mod gallery;
pub mod photo;
pub mod recorder;
pub mod session;
pub mod utils;

pub use camera::{CameraController, CaptureBackends};
pub use config::CaptureConfig;
pub use events::{CaptureEvent, CaptureStatus};
pub use utils::error::{CaptureError, CaptureResult};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the tracing subscriber
///
/// Honors `RUST_LOG`; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "segcam=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_init_tracing_twice() {
        super::init_tracing();
        super::init_tracing();
        tracing::debug!("tracing initialized");
    }
}
