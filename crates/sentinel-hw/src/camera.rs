//! Capture devices: the [`CaptureDevice`] trait and V4L2 capture via the `v4l` crate.

use crate::frame;
use image::RgbImage;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

const STREAM_BUFFERS: u32 = 4;
const DEQUEUE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
    #[error("unsupported source: {0}")]
    Unsupported(String),
    #[error("stream error: {0}")]
    Stream(String),
}

/// Anything that yields RGB frames on demand. `grab` may block on I/O.
pub trait CaptureDevice: Send {
    fn grab(&mut self) -> Result<RgbImage, CameraError>;
}

/// Negotiated pixel format for a V4L2 camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed, 2 bytes/pixel.
    Yuyv,
    /// Motion-JPEG, one JPEG per buffer.
    Mjpeg,
    /// Packed 24-bit RGB.
    Rgb3,
    /// 8-bit grayscale.
    Grey,
}

impl PixelFormat {
    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"YUYV" => Some(Self::Yuyv),
            b"MJPG" => Some(Self::Mjpeg),
            b"RGB3" => Some(Self::Rgb3),
            b"GREY" => Some(Self::Grey),
            _ => None,
        }
    }
}

/// Requested capture geometry. Applied best-effort: the driver may pick another size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureConfig {
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// V4L2 camera with a live mmap stream.
pub struct V4l2Camera {
    // Declared before `_device` so the stream is torn down first.
    stream: MmapStream<'static>,
    _device: Device,
    pub device_path: String,
    pub width: u32,
    pub height: u32,
    pixel_format: PixelFormat,
}

impl V4l2Camera {
    /// Open a V4L2 device (e.g. "/dev/video0") and start streaming.
    pub fn open(device_path: &str, config: CaptureConfig) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| {
            if e.raw_os_error() == Some(16) || e.to_string().contains("busy") {
                CameraError::DeviceBusy
            } else {
                CameraError::DeviceNotFound(format!("{device_path}: {e}"))
            }
        })?;

        let caps = device.query_caps().map_err(|e| {
            CameraError::CaptureFailed(format!("failed to query capabilities: {e}"))
        })?;
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::StreamingNotSupported);
        }

        tracing::info!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            "opened camera"
        );

        let mut fmt = device.format().map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
        })?;
        if let Some(width) = config.width {
            fmt.width = width;
        }
        if let Some(height) = config.height {
            fmt.height = height;
        }
        fmt.fourcc = FourCC::new(b"MJPG");

        // Size and format are requests; fall back to whatever the driver keeps.
        let negotiated = match device.set_format(&fmt) {
            Ok(negotiated) => negotiated,
            Err(e) => {
                tracing::warn!(device = device_path, error = %e, "could not apply requested format");
                device.format().map_err(|e| {
                    CameraError::FormatNegotiationFailed(format!("failed to read format: {e}"))
                })?
            }
        };

        let pixel_format = match PixelFormat::from_fourcc(negotiated.fourcc) {
            Some(pf) => pf,
            None => {
                fmt.fourcc = FourCC::new(b"YUYV");
                let retry = device.set_format(&fmt).map_err(|e| {
                    CameraError::FormatNegotiationFailed(format!("failed to set format: {e}"))
                })?;
                PixelFormat::from_fourcc(retry.fourcc).ok_or_else(|| {
                    CameraError::FormatNegotiationFailed(format!(
                        "unsupported pixel format: {} (need MJPG, YUYV, RGB3, or GREY)",
                        retry.fourcc
                    ))
                })?
            }
        };
        let negotiated = device.format().map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to read format: {e}"))
        })?;

        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            fourcc = %negotiated.fourcc,
            "negotiated format"
        );

        let mut stream = MmapStream::with_buffers(&device, BufType::VideoCapture, STREAM_BUFFERS)
            .map_err(|e| CameraError::CaptureFailed(format!("failed to create mmap stream: {e}")))?;
        stream.set_timeout(DEQUEUE_TIMEOUT);

        Ok(Self {
            stream,
            _device: device,
            device_path: device_path.to_string(),
            width: negotiated.width,
            height: negotiated.height,
            pixel_format,
        })
    }

    fn buf_to_rgb(&self, buf: &[u8]) -> Result<RgbImage, CameraError> {
        let convert = |e: frame::FrameError| {
            CameraError::CaptureFailed(format!("{:?} conversion failed: {e}", self.pixel_format))
        };

        match self.pixel_format {
            PixelFormat::Yuyv => frame::yuyv_to_rgb(buf, self.width, self.height).map_err(convert),
            PixelFormat::Mjpeg => frame::decode_jpeg(buf).map_err(convert),
            PixelFormat::Grey => frame::grey_to_rgb(buf, self.width, self.height).map_err(convert),
            PixelFormat::Rgb3 => {
                let expected = (self.width * self.height * 3) as usize;
                if buf.len() < expected {
                    return Err(CameraError::CaptureFailed(format!(
                        "RGB3 buffer too short: expected {expected}, got {}",
                        buf.len()
                    )));
                }
                RgbImage::from_raw(self.width, self.height, buf[..expected].to_vec()).ok_or_else(
                    || CameraError::CaptureFailed("RGB3 buffer does not fit frame".into()),
                )
            }
        }
    }
}

impl CaptureDevice for V4l2Camera {
    fn grab(&mut self) -> Result<RgbImage, CameraError> {
        let (buf, meta) = self
            .stream
            .next()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}")))?;
        // MJPG buffers are larger than the payload.
        let used = (meta.bytesused as usize).min(buf.len());
        let payload = if used > 0 { &buf[..used] } else { buf };
        self.buf_to_rgb(payload)
    }
}

/// Map a numeric camera index to its device node.
pub fn index_device_path(index: u32) -> String {
    format!("/dev/video{index}")
}
