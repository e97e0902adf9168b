//! Background frame capture.
//!
//! A [`FrameSource`] owns one capture thread that opens the device, grabs frames
//! in a loop and publishes the latest into a [`FrameSlot`]. Failures never end the
//! thread: opening is retried, read errors back off briefly, and a device that keeps
//! failing is closed and reopened. Only [`FrameSource::stop`] ends it.

use crate::camera::{CaptureConfig, CaptureDevice};
use crate::device::{DeviceOpener, SourceKey};
use crate::frame::Frame;
use crate::slot::FrameSlot;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Pause after a failed grab before trying again.
pub const READ_BACKOFF: Duration = Duration::from_millis(20);
/// Pause between attempts to open an unavailable device.
pub const OPEN_RETRY: Duration = Duration::from_secs(1);
/// Consecutive grab failures after which the device is closed and reopened.
pub const REOPEN_AFTER_FAILURES: u32 = 50;
const SLEEP_SLICE: Duration = Duration::from_millis(25);

/// Flags shared between a source handle and its capture thread.
#[derive(Debug, Default)]
struct Shared {
    running: AtomicBool,
    healthy: AtomicBool,
    slot: FrameSlot<Frame>,
}

/// Live capture source with a dedicated thread.
pub struct FrameSource {
    key: SourceKey,
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl FrameSource {
    /// Start capturing from `key`. Returns immediately; the device is opened on the
    /// capture thread, so an unavailable device just means reads stay absent.
    pub fn spawn(
        key: SourceKey,
        config: CaptureConfig,
        opener: Arc<dyn DeviceOpener>,
    ) -> io::Result<Self> {
        let shared = Arc::new(Shared::default());
        shared.running.store(true, Ordering::Release);

        let worker = {
            let key = key.clone();
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name(format!("capture-{key}"))
                .spawn(move || capture_loop(key, config, opener, shared))?
        };

        Ok(Self {
            key,
            shared,
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn key(&self) -> &SourceKey {
        &self.key
    }

    /// Independent copy of the latest frame, or `None` before the first capture,
    /// while the device is unavailable, and after stop.
    pub fn read(&self) -> Option<Frame> {
        self.read_shared().map(|f| Frame::clone(&f))
    }

    /// Latest frame without copying pixels.
    pub fn read_shared(&self) -> Option<Arc<Frame>> {
        if !self.is_running() {
            return None;
        }
        self.shared.slot.latest_shared()
    }

    /// Whether the device is open and the last grab succeeded.
    pub fn is_healthy(&self) -> bool {
        self.shared.healthy.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Stop the capture thread, wait for it to exit and release the device.
    /// Later calls are no-ops.
    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::Release);
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(worker) = worker {
            if worker.join().is_err() {
                tracing::error!(source = %self.key, "capture thread panicked");
            }
            self.shared.slot.clear();
            tracing::info!(source = %self.key, "frame source stopped");
        }
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for FrameSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameSource")
            .field("key", &self.key)
            .field("running", &self.is_running())
            .field("healthy", &self.is_healthy())
            .finish()
    }
}

fn capture_loop(key: SourceKey, config: CaptureConfig, opener: Arc<dyn DeviceOpener>, shared: Arc<Shared>) {
    let mut device: Option<Box<dyn CaptureDevice>> = None;
    let mut sequence = 0u64;
    let mut read_failures = 0u32;
    let mut open_failures = 0u32;

    tracing::debug!(source = %key, "capture thread started");

    while shared.running.load(Ordering::Acquire) {
        let Some(dev) = device.as_mut() else {
            match opener.open(&key, config) {
                Ok(opened) => {
                    tracing::info!(source = %key, "capture device opened");
                    device = Some(opened);
                    open_failures = 0;
                    read_failures = 0;
                }
                Err(e) => {
                    if open_failures == 0 {
                        tracing::warn!(source = %key, error = %e, "capture device unavailable; retrying");
                    } else {
                        tracing::debug!(source = %key, error = %e, attempt = open_failures + 1, "open retry failed");
                    }
                    open_failures = open_failures.saturating_add(1);
                    sleep_while_running(&shared.running, OPEN_RETRY);
                }
            }
            continue;
        };

        match dev.grab() {
            Ok(image) => {
                sequence += 1;
                shared.slot.publish(Frame::new(image, sequence));
                shared.healthy.store(true, Ordering::Release);
                read_failures = 0;
            }
            Err(e) => {
                read_failures += 1;
                if read_failures == 1 {
                    tracing::warn!(source = %key, error = %e, "frame grab failed");
                } else {
                    tracing::debug!(source = %key, error = %e, failures = read_failures, "frame grab failed");
                }
                if read_failures >= REOPEN_AFTER_FAILURES {
                    tracing::warn!(source = %key, failures = read_failures, "device keeps failing; reopening");
                    device = None;
                    shared.healthy.store(false, Ordering::Release);
                    shared.slot.clear();
                }
                sleep_while_running(&shared.running, READ_BACKOFF);
            }
        }
    }

    drop(device);
    shared.healthy.store(false, Ordering::Release);
    tracing::debug!(source = %key, frames = sequence, "capture thread exiting");
}

/// Sleep up to `total`, waking early once `running` is cleared.
fn sleep_while_running(running: &AtomicBool, total: Duration) {
    let mut remaining = total;
    while !remaining.is_zero() && running.load(Ordering::Acquire) {
        let step = remaining.min(SLEEP_SLICE);
        thread::sleep(step);
        remaining -= step;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::camera::CameraError;
    use image::{Rgb, RgbImage};
    use std::sync::atomic::AtomicU32;
    use std::time::Instant;

    /// Device whose frames carry an incrementing value in pixel (0, 0).
    pub(crate) struct CountingDevice {
        pub next: u8,
        pub fail_every: Option<u8>,
    }

    impl CaptureDevice for CountingDevice {
        fn grab(&mut self) -> Result<RgbImage, CameraError> {
            thread::sleep(Duration::from_millis(2));
            self.next = self.next.wrapping_add(1);
            if self.fail_every.is_some_and(|n| self.next % n == 0) {
                return Err(CameraError::CaptureFailed("flaky".into()));
            }
            Ok(RgbImage::from_pixel(4, 4, Rgb([self.next, 0, 0])))
        }
    }

    struct DeadDevice;

    impl CaptureDevice for DeadDevice {
        fn grab(&mut self) -> Result<RgbImage, CameraError> {
            Err(CameraError::CaptureFailed("unplugged".into()))
        }
    }

    pub(crate) fn counting_opener() -> Arc<dyn DeviceOpener> {
        Arc::new(|_: &SourceKey, _: CaptureConfig| -> Result<Box<dyn CaptureDevice>, CameraError> {
            Ok(Box::new(CountingDevice { next: 0, fail_every: None }))
        })
    }

    pub(crate) fn wait_for<T>(mut f: impl FnMut() -> Option<T>) -> Option<T> {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if let Some(v) = f() {
                return Some(v);
            }
            thread::sleep(Duration::from_millis(5));
        }
        None
    }

    #[test]
    fn test_frames_flow_and_sequence_increases() {
        let source = FrameSource::spawn(SourceKey::Index(0), CaptureConfig::default(), counting_opener()).unwrap();

        let first = wait_for(|| source.read()).expect("no frame captured");
        let later = wait_for(|| source.read().filter(|f| f.sequence > first.sequence)).unwrap();
        assert!(later.sequence > first.sequence);
        assert!(source.is_healthy());
        source.stop();
    }

    #[test]
    fn test_read_returns_independent_copy() {
        let source = FrameSource::spawn(SourceKey::Index(0), CaptureConfig::default(), counting_opener()).unwrap();
        let shared = wait_for(|| source.read_shared()).unwrap();

        let mut copy = source.read().unwrap();
        copy.image.put_pixel(0, 0, Rgb([1, 2, 3]));
        assert_ne!(*shared.image.get_pixel(0, 0), Rgb([1, 2, 3]));
        source.stop();
    }

    #[test]
    fn test_transient_failures_do_not_stop_capture() {
        let opener: Arc<dyn DeviceOpener> =
            Arc::new(|_: &SourceKey, _: CaptureConfig| -> Result<Box<dyn CaptureDevice>, CameraError> {
                Ok(Box::new(CountingDevice { next: 0, fail_every: Some(3) }))
            });
        let source = FrameSource::spawn(SourceKey::Index(1), CaptureConfig::default(), opener).unwrap();

        let reached = wait_for(|| source.read().filter(|f| f.sequence >= 10));
        assert!(reached.is_some());
        assert!(source.is_running());
        source.stop();
    }

    #[test]
    fn test_unavailable_device_is_absent_then_recovers() {
        let attempts = Arc::new(AtomicU32::new(0));
        let opener: Arc<dyn DeviceOpener> = {
            let attempts = Arc::clone(&attempts);
            Arc::new(move |_: &SourceKey, _: CaptureConfig| -> Result<Box<dyn CaptureDevice>, CameraError> {
                if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(CameraError::DeviceNotFound("/dev/video9".into()))
                } else {
                    Ok(Box::new(CountingDevice { next: 0, fail_every: None }))
                }
            })
        };

        let source = FrameSource::spawn(SourceKey::Index(9), CaptureConfig::default(), opener).unwrap();
        thread::sleep(Duration::from_millis(100));
        assert!(source.read().is_none());
        assert!(!source.is_healthy());

        assert!(wait_for(|| source.read()).is_some());
        assert!(attempts.load(Ordering::SeqCst) >= 2);
        source.stop();
    }

    #[test]
    fn test_dead_device_reads_absent() {
        let opener: Arc<dyn DeviceOpener> =
            Arc::new(|_: &SourceKey, _: CaptureConfig| -> Result<Box<dyn CaptureDevice>, CameraError> {
                Ok(Box::new(DeadDevice))
            });
        let source = FrameSource::spawn(SourceKey::Index(3), CaptureConfig::default(), opener).unwrap();
        thread::sleep(Duration::from_millis(100));
        assert!(source.read().is_none());
        assert!(source.is_running());
        source.stop();
    }

    #[test]
    fn test_stop_is_permanent_and_repeatable() {
        let source = FrameSource::spawn(SourceKey::Index(0), CaptureConfig::default(), counting_opener()).unwrap();
        wait_for(|| source.read()).unwrap();

        let started = Instant::now();
        source.stop();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(!source.is_running());
        assert!(!source.is_healthy());
        assert!(source.read().is_none());

        source.stop();
        thread::sleep(Duration::from_millis(20));
        assert!(source.read().is_none());
    }
}
