use crate::engine::{Engine, EngineError};
use sentinel_core::UserStoreError;
use sentinel_hw::{Frame, SourceKey};
use std::sync::Arc;
use zbus::interface;

pub const BUS_NAME: &str = "org.sentinel.Sentinel1";
pub const OBJECT_PATH: &str = "/org/sentinel/Sentinel1";

/// D-Bus interface for the Sentinel surveillance daemon.
///
/// Bus name: org.sentinel.Sentinel1
/// Object path: /org/sentinel/Sentinel1
pub struct SentinelService {
    engine: Arc<Engine>,
}

impl SentinelService {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }

    /// Run `f` on the blocking pool; engine calls take locks and touch the disk.
    async fn blocking<T, F>(&self, f: F) -> zbus::fdo::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Engine) -> T + Send + 'static,
    {
        let engine = Arc::clone(&self.engine);
        tokio::task::spawn_blocking(move || f(&engine))
            .await
            .map_err(|e| zbus::fdo::Error::Failed(format!("engine task failed: {e}")))
    }
}

fn to_fdo(err: EngineError) -> zbus::fdo::Error {
    match err {
        EngineError::Users(UserStoreError::InvalidName(name)) => {
            zbus::fdo::Error::InvalidArgs(format!("invalid user name: {name:?}"))
        }
        EngineError::UnknownSource(key) => {
            zbus::fdo::Error::InvalidArgs(format!("unknown source {key}; use the camera or enrollment camera"))
        }
        other => zbus::fdo::Error::Failed(other.to_string()),
    }
}

/// JPEG bytes of `frame`, or empty when there is none to send.
fn jpeg_or_empty(frame: Option<Frame>) -> zbus::fdo::Result<Vec<u8>> {
    match frame {
        Some(frame) => frame
            .to_jpeg()
            .map_err(|e| zbus::fdo::Error::Failed(format!("cannot encode frame: {e}"))),
        None => Ok(Vec::new()),
    }
}

#[interface(name = "org.sentinel.Sentinel1")]
impl SentinelService {
    /// Return daemon status as a JSON document.
    async fn status(&self) -> zbus::fdo::Result<String> {
        Ok(self.engine.status_json().to_string())
    }

    /// Rebuild the face gallery from the enrolled images.
    async fn retrain(&self) -> zbus::fdo::Result<bool> {
        tracing::info!("retrain requested");
        self.blocking(Engine::retrain).await
    }

    /// Latest annotated frame as JPEG; empty before the first processed frame.
    async fn latest_frame(&self) -> zbus::fdo::Result<Vec<u8>> {
        let frame = self.engine.latest_processed_frame();
        self.blocking(move |_| jpeg_or_empty(frame)).await?
    }

    /// Latest raw frame of `source` as JPEG. An empty source means the main camera;
    /// only the configured camera and enrollment camera are accepted.
    async fn raw_frame(&self, source: &str) -> zbus::fdo::Result<Vec<u8>> {
        let key = match source.trim() {
            "" => self.engine.camera_key().clone(),
            other => SourceKey::parse(other),
        };
        self.blocking(move |engine| {
            let frame = engine.raw_frame(&key).map_err(to_fdo)?;
            jpeg_or_empty(frame)
        })
        .await?
    }

    /// Save the enrollment camera's current frame for `user`; returns the image path.
    async fn capture_enrollment(&self, user: &str, index: u32) -> zbus::fdo::Result<String> {
        tracing::info!(user, index, "enrollment capture requested");
        let user = user.to_string();
        let path = self
            .blocking(move |engine| engine.capture_enrollment(&user, index))
            .await?
            .map_err(to_fdo)?;
        Ok(path.display().to_string())
    }

    /// Enrolled users as a JSON array.
    async fn list_users(&self) -> zbus::fdo::Result<String> {
        let users = self.blocking(Engine::list_users).await?.map_err(to_fdo)?;
        Ok(serde_json::json!(users).to_string())
    }

    /// Delete a user's enrollment images. Takes effect on the next retrain.
    async fn remove_user(&self, user: &str) -> zbus::fdo::Result<bool> {
        tracing::info!(user, "remove_user requested");
        let user = user.to_string();
        self.blocking(move |engine| engine.remove_user(&user))
            .await?
            .map_err(to_fdo)
    }
}
