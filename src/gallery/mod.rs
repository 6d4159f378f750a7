//! Media library hand-off
//!
//! Finished recordings and photos are handed to a [`Gallery`]. The core only
//! checks authorization and issues the save; storage is the gallery's concern.

use crate::utils::error::{CaptureError, CaptureResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

/// Library authorization as reported by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AuthorizationStatus {
    NotDetermined,
    Restricted,
    Denied,
    Authorized,
    /// Add-only access
    Limited,
}

impl AuthorizationStatus {
    pub fn can_add(&self) -> bool {
        matches!(self, AuthorizationStatus::Authorized | AuthorizationStatus::Limited)
    }
}

/// Platform media library
#[async_trait]
pub trait Gallery: Send + Sync {
    async fn authorization_status(&self) -> AuthorizationStatus;

    /// Prompt for add-only access
    async fn request_add_only_authorization(&self) -> AuthorizationStatus;

    /// Save a finished video file; returns the library's identifier for it
    async fn save_video(&self, path: &Path) -> CaptureResult<String>;

    async fn save_photo(&self, bytes: &[u8]) -> CaptureResult<String>;
}

/// Check add access, requesting it when the user has not been asked yet
pub async fn ensure_add_only_access(gallery: &dyn Gallery) -> CaptureResult<()> {
    let mut status = gallery.authorization_status().await;
    if status == AuthorizationStatus::NotDetermined {
        status = gallery.request_add_only_authorization().await;
    }

    if status.can_add() {
        Ok(())
    } else {
        tracing::warn!("Media library access unavailable: {:?}", status);
        Err(CaptureError::LibraryAccess(format!("{:?}", status)))
    }
}

/// Authorize, then hand a finished recording to the library
pub async fn save_video(gallery: &dyn Gallery, path: &Path) -> CaptureResult<String> {
    ensure_add_only_access(gallery).await?;
    let id = gallery.save_video(path).await?;
    tracing::info!("Saved recording {:?} to media library as {}", path, id);
    Ok(id)
}

pub async fn save_photo(gallery: &dyn Gallery, bytes: &[u8]) -> CaptureResult<String> {
    ensure_add_only_access(gallery).await?;
    let id = gallery.save_photo(bytes).await?;
    tracing::info!("Saved photo ({} bytes) to media library as {}", bytes.len(), id);
    Ok(id)
}

/// Library backed by a plain directory, always authorized
pub struct DirectoryGallery {
    root: PathBuf,
}

impl DirectoryGallery {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn asset_path(&self, extension: &str) -> (String, PathBuf) {
        let id = format!(
            "{}-{}",
            chrono::Utc::now().format("%Y%m%d-%H%M%S"),
            Uuid::new_v4().simple()
        );
        let path = self.root.join(format!("{}.{}", id, extension));
        (id, path)
    }
}

#[async_trait]
impl Gallery for DirectoryGallery {
    async fn authorization_status(&self) -> AuthorizationStatus {
        AuthorizationStatus::Authorized
    }

    async fn request_add_only_authorization(&self) -> AuthorizationStatus {
        AuthorizationStatus::Authorized
    }

    async fn save_video(&self, path: &Path) -> CaptureResult<String> {
        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("mov");
        let (id, target) = self.asset_path(extension);
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| CaptureError::GallerySave(e.to_string()))?;
        tokio::fs::copy(path, &target)
            .await
            .map_err(|e| CaptureError::GallerySave(format!("{:?}: {}", path, e)))?;
        Ok(id)
    }

    async fn save_photo(&self, bytes: &[u8]) -> CaptureResult<String> {
        let (id, target) = self.asset_path("jpg");
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| CaptureError::GallerySave(e.to_string()))?;
        tokio::fs::write(&target, bytes)
            .await
            .map_err(|e| CaptureError::GallerySave(e.to_string()))?;
        Ok(id)
    }
}

/// Saved asset held by [`MemoryGallery`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SavedAsset {
    Video { source: PathBuf, bytes: Vec<u8> },
    Photo { bytes: Vec<u8> },
}

struct MemoryGalleryState {
    status: AuthorizationStatus,
    /// Status granted when access is requested
    grant: AuthorizationStatus,
    requests: u32,
    assets: Vec<SavedAsset>,
    fail_saves: Option<String>,
}

/// In-memory library with scriptable authorization
#[derive(Clone)]
pub struct MemoryGallery {
    state: Arc<Mutex<MemoryGalleryState>>,
}

impl Default for MemoryGallery {
    fn default() -> Self {
        Self::new(AuthorizationStatus::Authorized)
    }
}

impl MemoryGallery {
    pub fn new(status: AuthorizationStatus) -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryGalleryState {
                status,
                grant: AuthorizationStatus::Limited,
                requests: 0,
                assets: Vec::new(),
                fail_saves: None,
            })),
        }
    }

    /// Status the simulated prompt resolves to
    pub fn grant_on_request(&self, status: AuthorizationStatus) {
        self.state.lock().grant = status;
    }

    pub fn fail_saves(&self, message: Option<String>) {
        self.state.lock().fail_saves = message;
    }

    pub fn authorization_requests(&self) -> u32 {
        self.state.lock().requests
    }

    pub fn assets(&self) -> Vec<SavedAsset> {
        self.state.lock().assets.clone()
    }

    pub fn video_count(&self) -> usize {
        self.assets()
            .iter()
            .filter(|a| matches!(a, SavedAsset::Video { .. }))
            .count()
    }

    pub fn photo_count(&self) -> usize {
        self.assets()
            .iter()
            .filter(|a| matches!(a, SavedAsset::Photo { .. }))
            .count()
    }

    fn store(&self, asset: SavedAsset) -> CaptureResult<String> {
        let mut state = self.state.lock();
        if let Some(message) = &state.fail_saves {
            return Err(CaptureError::GallerySave(message.clone()));
        }
        state.assets.push(asset);
        Ok(format!("asset-{}", state.assets.len()))
    }
}

#[async_trait]
impl Gallery for MemoryGallery {
    async fn authorization_status(&self) -> AuthorizationStatus {
        self.state.lock().status
    }

    async fn request_add_only_authorization(&self) -> AuthorizationStatus {
        let mut state = self.state.lock();
        state.requests += 1;
        state.status = state.grant;
        state.status
    }

    async fn save_video(&self, path: &Path) -> CaptureResult<String> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| CaptureError::GallerySave(format!("{:?}: {}", path, e)))?;
        self.store(SavedAsset::Video {
            source: path.to_path_buf(),
            bytes,
        })
    }

    async fn save_photo(&self, bytes: &[u8]) -> CaptureResult<String> {
        self.store(SavedAsset::Photo {
            bytes: bytes.to_vec(),
        })
    }
}
