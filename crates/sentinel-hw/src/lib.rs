//! sentinel-hw: camera capture and shared frame sources.
//!
//! Provides V4L2, HTTP (MJPEG/JPEG) and, with the `rtsp-gstreamer` feature, RTSP
//! capture devices, a background [`FrameSource`] per device that always holds the
//! latest frame, and a [`SourceRegistry`] that keeps one source per key.

pub mod camera;
pub mod device;
pub mod frame;
pub mod http;
pub mod registry;
pub mod rtsp;
pub mod slot;
pub mod source;

pub use camera::{CameraError, CaptureConfig, CaptureDevice, PixelFormat, V4l2Camera};
pub use device::{DeviceOpener, SourceKey, SystemDevices};
pub use frame::{Frame, FrameError};
pub use http::HttpCamera;
pub use registry::SourceRegistry;
#[cfg(feature = "rtsp-gstreamer")]
pub use rtsp::RtspCamera;
pub use slot::FrameSlot;
pub use source::FrameSource;
