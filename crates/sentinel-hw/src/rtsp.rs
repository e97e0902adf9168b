//! RTSP IP cameras through a GStreamer `rtspsrc ! decodebin ! appsink` pipeline.
//!
//! The device itself needs the `rtsp-gstreamer` feature. Pipeline construction and
//! buffer unpacking are plain functions so they are usable and testable without it.

use crate::camera::{CameraError, CaptureConfig};
use image::RgbImage;

/// How long `grab` waits for a decoded sample before reporting a stall.
pub const SAMPLE_TIMEOUT_SECS: u64 = 5;

/// gst-launch description decoding `url` to RGB into an appsink named `sink`.
///
/// Only the newest frame is kept; a requested size adds a `videoscale` step.
pub fn pipeline_description(url: &str, config: CaptureConfig) -> String {
    let location = url.replace('\\', "\\\\").replace('"', "\\\"");
    let mut caps = String::from("video/x-raw,format=RGB");
    if let (Some(w), Some(h)) = (config.width, config.height) {
        caps.push_str(&format!(",width={w},height={h}"));
    }
    format!(
        "rtspsrc location=\"{location}\" latency=0 protocols=tcp ! decodebin ! videoconvert ! \
         videoscale ! {caps} ! appsink name=sink sync=false max-buffers=1 drop=true"
    )
}

/// Copy a packed-RGB buffer whose rows are `stride` bytes apart into an image.
pub fn rgb_from_strided(data: &[u8], width: u32, height: u32, stride: usize) -> Result<RgbImage, CameraError> {
    let row_bytes = width as usize * 3;
    if stride < row_bytes {
        return Err(CameraError::CaptureFailed(format!(
            "stride {stride} shorter than row of {row_bytes} bytes"
        )));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let line = data.get(start..start + row_bytes).ok_or_else(|| {
            CameraError::CaptureFailed(format!("buffer too short for row {row} of {width}x{height}"))
        })?;
        pixels.extend_from_slice(line);
    }

    RgbImage::from_raw(width, height, pixels)
        .ok_or_else(|| CameraError::CaptureFailed("RGB buffer size mismatch".into()))
}

#[cfg(feature = "rtsp-gstreamer")]
pub use device::RtspCamera;

#[cfg(feature = "rtsp-gstreamer")]
mod device {
    use super::{pipeline_description, rgb_from_strided, SAMPLE_TIMEOUT_SECS};
    use crate::camera::{CameraError, CaptureConfig, CaptureDevice};
    use gstreamer::prelude::*;
    use image::RgbImage;

    pub struct RtspCamera {
        url: String,
        pipeline: gstreamer::Pipeline,
        sink: gstreamer_app::AppSink,
    }

    impl RtspCamera {
        /// Build the pipeline and start playing. Connection errors surface on the
        /// first `grab`, where the frame source's retry handles them.
        pub fn open(url: &str, config: CaptureConfig) -> Result<Self, CameraError> {
            gstreamer::init().map_err(|e| CameraError::Stream(format!("gstreamer init: {e}")))?;

            let pipeline = gstreamer::parse::launch(&pipeline_description(url, config))
                .map_err(|e| CameraError::Stream(format!("build RTSP pipeline: {e}")))?
                .downcast::<gstreamer::Pipeline>()
                .map_err(|_| CameraError::Stream("RTSP pipeline is not a Pipeline".into()))?;

            let sink = pipeline
                .by_name("sink")
                .ok_or_else(|| CameraError::Stream("appsink missing from pipeline".into()))?
                .downcast::<gstreamer_app::AppSink>()
                .map_err(|_| CameraError::Stream("sink element is not an appsink".into()))?;

            pipeline
                .set_state(gstreamer::State::Playing)
                .map_err(|e| CameraError::Stream(format!("start RTSP pipeline: {e}")))?;

            tracing::info!(url = %redact(url), "RTSP stream opened");
            Ok(Self {
                url: url.to_string(),
                pipeline,
                sink,
            })
        }

        /// Surface pipeline errors and end-of-stream posted since the last grab.
        fn check_bus(&self) -> Result<(), CameraError> {
            let Some(bus) = self.pipeline.bus() else {
                return Ok(());
            };
            while let Some(message) = bus.pop() {
                use gstreamer::MessageView;
                match message.view() {
                    MessageView::Error(err) => {
                        return Err(CameraError::Stream(format!("{}: {}", redact(&self.url), err.error())));
                    }
                    MessageView::Eos(..) => {
                        return Err(CameraError::Stream(format!("{}: end of stream", redact(&self.url))));
                    }
                    _ => {}
                }
            }
            Ok(())
        }
    }

    impl CaptureDevice for RtspCamera {
        fn grab(&mut self) -> Result<RgbImage, CameraError> {
            self.check_bus()?;

            let sample = self
                .sink
                .try_pull_sample(gstreamer::ClockTime::from_seconds(SAMPLE_TIMEOUT_SECS))
                .ok_or_else(|| CameraError::CaptureFailed("RTSP stream stalled".into()))?;

            let buffer = sample
                .buffer()
                .ok_or_else(|| CameraError::CaptureFailed("sample without buffer".into()))?;
            let caps = sample
                .caps()
                .ok_or_else(|| CameraError::CaptureFailed("sample without caps".into()))?;
            let info = gstreamer_video::VideoInfo::from_caps(caps)
                .map_err(|e| CameraError::FormatNegotiationFailed(e.to_string()))?;

            let map = buffer
                .map_readable()
                .map_err(|e| CameraError::CaptureFailed(format!("map buffer: {e}")))?;
            let stride = usize::try_from(info.stride()[0])
                .map_err(|_| CameraError::CaptureFailed("negative stride".into()))?;

            rgb_from_strided(map.as_slice(), info.width(), info.height(), stride)
        }
    }

    impl Drop for RtspCamera {
        fn drop(&mut self) {
            if let Err(e) = self.pipeline.set_state(gstreamer::State::Null) {
                tracing::warn!(error = %e, "failed to stop RTSP pipeline");
            }
        }
    }

    /// Strip credentials before logging a camera URL.
    fn redact(url: &str) -> String {
        match url::Url::parse(url) {
            Ok(mut parsed) if !parsed.username().is_empty() => {
                let _ = parsed.set_username("");
                let _ = parsed.set_password(None);
                parsed.to_string()
            }
            _ => url.to_string(),
        }
    }
}
