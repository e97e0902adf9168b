//! Shared daemon state and the operations exposed to the control interface.
//!
//! The engine owns the source registry, the gallery, the face analyzer and the
//! latest processed frame. The monitor loop writes into it; D-Bus handlers read
//! from it and trigger retraining and enrollment captures.

use crate::monitor::MonitorStatus;
use sentinel_core::{gallery, FaceAnalyzer, FsUserStore, Gallery, GalleryCell, UserStoreError};
use sentinel_hw::{CaptureConfig, Frame, FrameSlot, FrameSource, SourceKey, SourceRegistry};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;

/// How long an enrollment capture waits for a freshly opened camera.
const ENROLL_FRAME_WAIT: Duration = Duration::from_secs(3);

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("no frame available from source {0}")]
    NoFrame(SourceKey),
    #[error("cannot start frame source {key}: {source}")]
    Spawn {
        key: SourceKey,
        #[source]
        source: std::io::Error,
    },
    #[error("source {0} is not a configured camera")]
    UnknownSource(SourceKey),
    #[error(transparent)]
    Users(#[from] UserStoreError),
}

/// Everything the engine needs at construction.
pub struct EngineParts {
    pub registry: Arc<SourceRegistry>,
    pub camera: SourceKey,
    pub enrollment_camera: SourceKey,
    pub capture: CaptureConfig,
    pub analyzer: Arc<Mutex<dyn FaceAnalyzer + Send>>,
    pub users: FsUserStore,
}

pub struct Engine {
    registry: Arc<SourceRegistry>,
    camera: SourceKey,
    enrollment_camera: SourceKey,
    capture: CaptureConfig,
    analyzer: Arc<Mutex<dyn FaceAnalyzer + Send>>,
    users: FsUserStore,
    gallery: GalleryCell,
    processed: FrameSlot<Frame>,
    status: FrameSlot<MonitorStatus>,
    /// Serializes retrains; the gallery itself is swapped atomically.
    retrain_lock: Mutex<()>,
}

impl Engine {
    pub fn new(parts: EngineParts) -> Self {
        Self {
            registry: parts.registry,
            camera: parts.camera,
            enrollment_camera: parts.enrollment_camera,
            capture: parts.capture,
            analyzer: parts.analyzer,
            users: parts.users,
            gallery: GalleryCell::default(),
            processed: FrameSlot::new(),
            status: FrameSlot::new(),
            retrain_lock: Mutex::new(()),
        }
    }

    pub fn camera_key(&self) -> &SourceKey {
        &self.camera
    }

    /// Open (or fetch) the surveillance camera's frame source.
    pub fn open_camera(&self) -> Result<Arc<FrameSource>, EngineError> {
        self.open(&self.camera)
    }

    fn open(&self, key: &SourceKey) -> Result<Arc<FrameSource>, EngineError> {
        self.registry
            .open(key, self.capture)
            .map_err(|source| EngineError::Spawn {
                key: key.clone(),
                source,
            })
    }

    pub fn analyzer(&self) -> &Mutex<dyn FaceAnalyzer + Send> {
        &*self.analyzer
    }

    pub fn gallery(&self) -> Option<Arc<Gallery>> {
        self.gallery.load()
    }

    /// Latest annotated frame, or `None` before the first processed frame.
    pub fn latest_processed_frame(&self) -> Option<Frame> {
        self.processed.latest()
    }

    pub(crate) fn latest_processed_shared(&self) -> Option<Arc<Frame>> {
        self.processed.latest_shared()
    }

    pub(crate) fn publish_processed(&self, frame: Frame) {
        self.processed.publish(frame);
    }

    /// Latest raw frame of the surveillance or enrollment camera. An unopened one is
    /// started on first request, in which case this returns `None` until it has
    /// captured. Any other key is rejected so callers cannot start arbitrary sources.
    pub fn raw_frame(&self, key: &SourceKey) -> Result<Option<Frame>, EngineError> {
        if *key != self.camera && *key != self.enrollment_camera {
            return Err(EngineError::UnknownSource(key.clone()));
        }
        Ok(self.open(key)?.read())
    }

    /// Rebuild the gallery from the user store and swap it in.
    ///
    /// Returns whether any usable embedding was found. Safe to call while the
    /// monitor runs; it only ever sees the old or the new gallery.
    pub fn retrain(&self) -> bool {
        let _guard = self.retrain_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let started = Instant::now();

        let built = gallery::build(&self.users, self.analyzer());
        let trained = built.is_some();
        let users = built.as_ref().map_or(0, Gallery::len);
        self.gallery.replace(built);

        if trained {
            tracing::info!(users, elapsed_ms = started.elapsed().as_millis() as u64, "gallery trained");
        } else {
            tracing::warn!("no usable face embeddings; every face will be treated as unknown");
        }
        trained
    }

    /// Save the enrollment camera's current frame as `<users>/<user>/img_<index>.jpg`.
    pub fn capture_enrollment(&self, user: &str, index: u32) -> Result<PathBuf, EngineError> {
        let source = self.open(&self.enrollment_camera)?;

        let deadline = Instant::now() + ENROLL_FRAME_WAIT;
        let frame = loop {
            if let Some(frame) = source.read_shared() {
                break frame;
            }
            if Instant::now() >= deadline {
                return Err(EngineError::NoFrame(self.enrollment_camera.clone()));
            }
            std::thread::sleep(Duration::from_millis(50));
        };

        Ok(self.users.save_image(user, index, &frame.image)?)
    }

    pub fn list_users(&self) -> Result<Vec<String>, EngineError> {
        use sentinel_core::UserStore;
        Ok(self.users.list_users()?)
    }

    /// Delete a user's images. The gallery keeps the user until the next retrain.
    pub fn remove_user(&self, user: &str) -> Result<bool, EngineError> {
        Ok(self.users.remove_user(user)?)
    }

    pub fn monitor_status(&self) -> Option<MonitorStatus> {
        self.status.latest()
    }

    pub(crate) fn publish_status(&self, status: MonitorStatus) {
        self.status.publish(status);
    }

    /// Status document served over D-Bus.
    pub fn status_json(&self) -> serde_json::Value {
        let camera = self.registry.get(&self.camera);
        let gallery = self.gallery();
        serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "camera": {
                "source": self.camera.to_string(),
                "running": camera.as_ref().is_some_and(|c| c.is_running()),
                "healthy": camera.as_ref().is_some_and(|c| c.is_healthy()),
            },
            "gallery": {
                "trained": gallery.is_some(),
                "users": gallery.as_ref().map(|g| g.names()).unwrap_or_default(),
            },
            "monitor": self.monitor_status(),
        })
    }
}
