//! Source identifiers and device opening.

use crate::camera::{self, CameraError, CaptureConfig, CaptureDevice, V4l2Camera};
use crate::http::HttpCamera;
use std::fmt;

/// Identifies one physical capture source.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SourceKey {
    /// Camera index, e.g. `0` → `/dev/video0`.
    Index(u32),
    /// Local device node path.
    Path(String),
    /// Stream URL (`http://`, `https://`, `rtsp://`, ...).
    Url(String),
}

impl SourceKey {
    /// Parse a configured source string: a bare integer is an index, `scheme://...`
    /// is a URL, anything else is a device path.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if let Ok(index) = raw.parse::<u32>() {
            return SourceKey::Index(index);
        }
        match url::Url::parse(raw) {
            Ok(url) if url.has_host() || url.scheme() == "file" => SourceKey::Url(raw.to_string()),
            _ => SourceKey::Path(raw.to_string()),
        }
    }
}

impl fmt::Display for SourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKey::Index(i) => write!(f, "{i}"),
            SourceKey::Path(p) => f.write_str(p),
            SourceKey::Url(u) => f.write_str(u),
        }
    }
}

/// Opens a capture device for a key. Called from the source's capture thread,
/// possibly many times while a device stays unavailable.
pub trait DeviceOpener: Send + Sync {
    fn open(&self, key: &SourceKey, config: CaptureConfig) -> Result<Box<dyn CaptureDevice>, CameraError>;
}

impl<F> DeviceOpener for F
where
    F: Fn(&SourceKey, CaptureConfig) -> Result<Box<dyn CaptureDevice>, CameraError> + Send + Sync,
{
    fn open(&self, key: &SourceKey, config: CaptureConfig) -> Result<Box<dyn CaptureDevice>, CameraError> {
        self(key, config)
    }
}

/// Real devices: V4L2 for indices and paths, HTTP for `http(s)://` URLs, GStreamer
/// for `rtsp://` when built with `rtsp-gstreamer`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemDevices;

impl DeviceOpener for SystemDevices {
    fn open(&self, key: &SourceKey, config: CaptureConfig) -> Result<Box<dyn CaptureDevice>, CameraError> {
        match key {
            SourceKey::Index(i) => Ok(Box::new(V4l2Camera::open(&camera::index_device_path(*i), config)?)),
            SourceKey::Path(p) => Ok(Box::new(V4l2Camera::open(p, config)?)),
            SourceKey::Url(u) => {
                let scheme = u.split("://").next().unwrap_or_default().to_ascii_lowercase();
                match scheme.as_str() {
                    "http" | "https" => Ok(Box::new(HttpCamera::open(u)?)),
                    #[cfg(feature = "rtsp-gstreamer")]
                    "rtsp" | "rtsps" => Ok(Box::new(crate::rtsp::RtspCamera::open(u, config)?)),
                    #[cfg(not(feature = "rtsp-gstreamer"))]
                    "rtsp" | "rtsps" => Err(CameraError::Unsupported(
                        "rtsp:// sources need sentinel-hw built with the rtsp-gstreamer feature".into(),
                    )),
                    other => Err(CameraError::Unsupported(format!("{other}:// sources are not supported"))),
                }
            }
        }
    }
}
