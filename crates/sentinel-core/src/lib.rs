//! sentinel-core: face recognition and intruder alerting engine.
//!
//! Faces are detected with SCRFD and embedded with ArcFace via ONNX Runtime,
//! matched against a gallery of enrolled users, and fed to a presence tracker
//! that decides when an unknown face has lingered long enough to alert.

pub mod alignment;
pub mod analyzer;
pub mod annotate;
pub mod detector;
pub mod evidence;
pub mod gallery;
pub mod matcher;
pub mod notify;
pub mod presence;
pub mod recognizer;
pub mod types;
pub mod users;

use std::path::PathBuf;

pub use analyzer::{AnalyzerError, FaceAnalyzer, OnnxFaceAnalyzer};
pub use annotate::Annotator;
pub use evidence::{EvidenceError, EvidenceStore, FsEvidenceStore};
pub use gallery::{Gallery, GalleryCell, GalleryEntry};
pub use matcher::{Matcher, Recognition};
pub use notify::Notifier;
pub use presence::{AlertPolicy, PresenceStatus, PresenceTracker, Step};
pub use types::{BoundingBox, DetectedFace, Embedding, FaceMatch, FaceRect, Identity, UNKNOWN_NAME};
pub use users::{FsUserStore, UserStore, UserStoreError};

/// Per-user data directory: `$XDG_DATA_HOME/sentinel`, else `~/.local/share/sentinel`.
pub fn default_data_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os("XDG_DATA_HOME").filter(|d| !d.is_empty()) {
        return PathBuf::from(dir).join("sentinel");
    }
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(".local/share/sentinel"),
        None => PathBuf::from("/var/lib/sentinel"),
    }
}

/// Where `det_10g.onnx` and `w600k_r50.onnx` are looked up by default.
pub fn default_model_dir() -> String {
    default_data_dir().join("models").to_string_lossy().into_owned()
}
