//! Network cameras over HTTP: MJPEG multipart streams or single-JPEG snapshot URLs.

use crate::camera::{CameraError, CaptureDevice};
use crate::frame;
use image::RgbImage;
use std::io::Read;
use std::time::Duration;

const MAX_JPEG_BYTES: usize = 5 * 1024 * 1024;
const READ_CHUNK: usize = 8192;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const READ_TIMEOUT: Duration = Duration::from_secs(10);

enum Mode {
    Mjpeg(MjpegReader),
    Snapshot,
}

/// HTTP camera. A `multipart/*` response is read as a continuous MJPEG stream;
/// anything else is treated as a snapshot endpoint and fetched once per grab.
pub struct HttpCamera {
    url: String,
    agent: ureq::Agent,
    mode: Mode,
}

impl HttpCamera {
    pub fn open(url: &str) -> Result<Self, CameraError> {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(CONNECT_TIMEOUT)
            .timeout_read(READ_TIMEOUT)
            .build();

        let response = agent
            .get(url)
            .call()
            .map_err(|e| CameraError::Stream(format!("connect to {url}: {e}")))?;

        let content_type = response.header("Content-Type").unwrap_or("").to_ascii_lowercase();
        let mode = if content_type.contains("multipart") {
            Mode::Mjpeg(MjpegReader::new(response.into_reader()))
        } else {
            Mode::Snapshot
        };

        tracing::info!(
            url,
            mjpeg = matches!(mode, Mode::Mjpeg(_)),
            "opened http camera"
        );

        Ok(Self {
            url: url.to_string(),
            agent,
            mode,
        })
    }

    fn fetch_snapshot(&self) -> Result<Vec<u8>, CameraError> {
        let response = self
            .agent
            .get(&self.url)
            .call()
            .map_err(|e| CameraError::Stream(format!("fetch snapshot from {}: {e}", self.url)))?;

        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(MAX_JPEG_BYTES as u64)
            .read_to_end(&mut bytes)
            .map_err(|e| CameraError::Stream(format!("read snapshot: {e}")))?;
        if bytes.is_empty() {
            return Err(CameraError::Stream("empty snapshot".into()));
        }
        Ok(bytes)
    }
}

impl CaptureDevice for HttpCamera {
    fn grab(&mut self) -> Result<RgbImage, CameraError> {
        let jpeg = match &mut self.mode {
            Mode::Mjpeg(reader) => reader.next_jpeg()?,
            Mode::Snapshot => self.fetch_snapshot()?,
        };
        frame::decode_jpeg(&jpeg).map_err(|e| CameraError::CaptureFailed(e.to_string()))
    }
}

/// Splits a byte stream into JPEG images by scanning for SOI/EOI markers,
/// ignoring multipart boundaries and headers in between.
pub(crate) struct MjpegReader {
    reader: Box<dyn Read + Send>,
    buffer: Vec<u8>,
}

impl MjpegReader {
    pub(crate) fn new(reader: impl Read + Send + 'static) -> Self {
        Self {
            reader: Box::new(reader),
            buffer: Vec::with_capacity(64 * 1024),
        }
    }

    pub(crate) fn next_jpeg(&mut self) -> Result<Vec<u8>, CameraError> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            if let Some((start, end)) = find_jpeg_bounds(&self.buffer) {
                let jpeg = self.buffer[start..end].to_vec();
                self.buffer.drain(..end);
                return Ok(jpeg);
            }

            let read = self
                .reader
                .read(&mut chunk)
                .map_err(|e| CameraError::Stream(format!("read mjpeg chunk: {e}")))?;
            if read == 0 {
                return Err(CameraError::Stream("mjpeg stream ended".into()));
            }
            self.buffer.extend_from_slice(&chunk[..read]);

            // No EOI within a sane size: drop everything but a possible split marker.
            if self.buffer.len() > MAX_JPEG_BYTES * 2 {
                let drain_len = self.buffer.len() - 1;
                self.buffer.drain(..drain_len);
            }
        }
    }
}

/// Byte range `[start, end)` of the first complete JPEG in `buffer`.
fn find_jpeg_bounds(buffer: &[u8]) -> Option<(usize, usize)> {
    let start = buffer.windows(2).position(|w| w == [0xFF, 0xD8])?;
    let len = buffer[start + 2..]
        .windows(2)
        .position(|w| w == [0xFF, 0xD9])?;
    Some((start, start + 2 + len + 2))
}
