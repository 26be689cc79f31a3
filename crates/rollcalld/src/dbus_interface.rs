use crate::engine::{EngineError, EngineHandle};
use rollcall_core::{MatchRecord, ServiceError};
use std::collections::HashMap;
use std::path::PathBuf;
use zbus::{interface, DBusError};

pub const BUS_NAME: &str = "io.rollcall.Gallery1";
pub const OBJECT_PATH: &str = "/io/rollcall/Gallery1";

/// Errors returned over D-Bus as `io.rollcall.Gallery1.Error.*`.
#[derive(Debug, DBusError)]
#[zbus(prefix = "io.rollcall.Gallery1.Error")]
pub enum GalleryError {
    #[zbus(error)]
    ZBus(zbus::Error),
    InvalidInput(String),
    NoFaceDetected(String),
    NotFound(String),
    NoMatch(String),
    Failed(String),
}

impl From<EngineError> for GalleryError {
    fn from(err: EngineError) -> Self {
        let msg = err.to_string();
        match err {
            EngineError::Service(ServiceError::InvalidInput(_))
            | EngineError::Service(ServiceError::DimensionMismatch { .. }) => {
                GalleryError::InvalidInput(msg)
            }
            EngineError::Service(ServiceError::NoFaceDetected(_)) => GalleryError::NoFaceDetected(msg),
            EngineError::Service(ServiceError::NotFound(_)) => GalleryError::NotFound(msg),
            _ => {
                tracing::error!(error = %msg, "request failed");
                GalleryError::Failed(msg)
            }
        }
    }
}

/// Shape identify results for the wire; an empty list becomes `NoMatch`.
fn attendance_reply(
    image: &str,
    matches: Vec<MatchRecord>,
) -> Result<Vec<(String, f64)>, GalleryError> {
    if matches.is_empty() {
        return Err(GalleryError::NoMatch(format!("no enrolled identity matches {image}")));
    }
    Ok(matches
        .into_iter()
        // Re-round in f64 so 0.9f32 is not sent as 0.8999999761581421.
        .map(|m| (m.name, (f64::from(m.confidence) * 100.0).round() / 100.0))
        .collect())
}

/// D-Bus interface for the Rollcall gallery daemon.
///
/// Bus name: io.rollcall.Gallery1
/// Object path: /io/rollcall/Gallery1
pub struct GalleryInterface {
    engine: EngineHandle,
}

impl GalleryInterface {
    pub fn new(engine: EngineHandle) -> Self {
        Self { engine }
    }
}

#[interface(name = "io.rollcall.Gallery1")]
impl GalleryInterface {
    /// Enroll an identity from image files. Returns the outcome as JSON.
    async fn enroll(&self, name: &str, images: Vec<String>) -> Result<String, GalleryError> {
        tracing::info!(name, images = images.len(), "enroll requested");
        let images = images.into_iter().map(PathBuf::from).collect();
        let outcome = self.engine.enroll(name.to_string(), images).await?;
        serde_json::to_string(&outcome).map_err(|e| GalleryError::Failed(e.to_string()))
    }

    /// Remove an identity and all its descriptors.
    async fn delete(&self, name: &str) -> Result<(), GalleryError> {
        tracing::info!(name, "delete requested");
        Ok(self.engine.delete(name.to_string()).await?)
    }

    /// List enrolled identity names.
    async fn list_names(&self) -> Result<Vec<String>, GalleryError> {
        Ok(self.engine.list_names().await?)
    }

    /// List enrolled identities with their descriptor counts.
    async fn list_with_counts(&self) -> Result<HashMap<String, u32>, GalleryError> {
        let counts = self.engine.list_with_counts().await?;
        Ok(counts
            .into_iter()
            .map(|(name, n)| (name, u32::try_from(n).unwrap_or(u32::MAX)))
            .collect())
    }

    /// Identify the faces in a probe image.
    ///
    /// Replies `NoMatch` when faces were found but none was recognized.
    async fn identify(&self, image: &str) -> Result<Vec<(String, f64)>, GalleryError> {
        tracing::info!(image, "identify requested");
        let matches = self.engine.identify(PathBuf::from(image)).await?;
        attendance_reply(image, matches)
    }

    /// Return daemon status information.
    async fn status(&self) -> Result<String, GalleryError> {
        let info = self.engine.info();
        let identities = self.engine.list_names().await?.len();
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "gallery": info.gallery_path.display().to_string(),
            "threshold": info.threshold,
            "match_policy": info.policy.to_string(),
            "identities": identities,
        })
        .to_string())
    }
}
