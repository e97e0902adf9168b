//! The recognition loop: throttle frames, recognize, track presence, raise alerts.

use crate::engine::Engine;
use crate::notifier::NotifierHandle;
use sentinel_core::presence::{self, PresenceStatus};
use sentinel_core::{AlertPolicy, EvidenceStore, Matcher, PresenceTracker, Step};
use sentinel_hw::{Frame, FrameSource};
use serde::Serialize;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Sleep between polls when no new frame is due.
const IDLE_POLL: Duration = Duration::from_millis(10);
/// Sleep while the camera has produced nothing yet.
const NO_FRAME_POLL: Duration = Duration::from_millis(50);

/// Snapshot published after every processed frame.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MonitorStatus {
    pub frames_processed: u64,
    pub last_sequence: u64,
    pub faces_last_frame: usize,
    pub known_last_frame: usize,
    pub evidence_captured: u64,
    pub evidence_failures: u64,
    pub notifications_dispatched: u64,
    pub presence: PresenceStatus,
}

/// Per-frame recognition and alerting state. Owned by the monitor thread.
pub struct Monitor {
    engine: Arc<Engine>,
    matcher: Matcher,
    evidence: Box<dyn EvidenceStore + Send>,
    alerts: Option<NotifierHandle>,
    tracker: PresenceTracker,
    frame_skip: u64,
    next_sequence: u64,
    stats: MonitorStatus,
}

impl Monitor {
    pub fn new(
        engine: Arc<Engine>,
        matcher: Matcher,
        evidence: Box<dyn EvidenceStore + Send>,
        alerts: Option<NotifierHandle>,
        policy: AlertPolicy,
        frame_skip: u64,
    ) -> Self {
        Self {
            engine,
            matcher,
            evidence,
            alerts,
            tracker: PresenceTracker::new(policy),
            frame_skip: frame_skip.max(1),
            next_sequence: 0,
            stats: MonitorStatus::default(),
        }
    }

    /// Whether `frame` is due under the frame-skip policy.
    pub fn is_due(&self, frame: &Frame) -> bool {
        frame.sequence >= self.next_sequence
    }

    /// Process one frame: recognize, publish the annotated copy, advance the
    /// presence tracker and act on its decision. Never fails; every fault is logged.
    pub fn process(&mut self, frame: &Frame, now: Instant) {
        self.next_sequence = frame.sequence.saturating_add(self.frame_skip);

        let gallery = self.engine.gallery();
        let recognition = self
            .matcher
            .recognize(&frame.image, self.engine.analyzer(), gallery.as_deref());

        self.engine.publish_processed(Frame {
            image: recognition.annotated,
            sequence: frame.sequence,
            captured_at: frame.captured_at,
        });

        let all_unknown = presence::all_unknown(&recognition.matches, gallery.is_some());
        if let Step::CaptureEvidence { elapsed } = self.tracker.observe(now, all_unknown) {
            let saved = self.capture_evidence(frame);
            tracing::info!(
                elapsed_ms = elapsed.as_millis() as u64,
                saved = saved.is_some(),
                "intruder alert"
            );
            self.tracker.record_evidence(saved);
        }

        if let Some(path) = self.tracker.take_notification(now) {
            match &self.alerts {
                Some(alerts) => {
                    if alerts.dispatch(path) {
                        self.stats.notifications_dispatched += 1;
                    }
                }
                None => tracing::debug!("notification due but no notifier configured"),
            }
        }

        self.stats.frames_processed += 1;
        self.stats.last_sequence = frame.sequence;
        self.stats.faces_last_frame = recognition.matches.len();
        self.stats.known_last_frame = recognition.matches.iter().filter(|m| m.is_known()).count();
        self.stats.presence = self.tracker.status(now);
        self.engine.publish_status(self.stats.clone());
    }

    /// Persist the annotated frame, or the raw one if nothing was processed yet.
    fn capture_evidence(&mut self, raw: &Frame) -> Option<std::path::PathBuf> {
        let processed = self.engine.latest_processed_shared();
        let image = match &processed {
            Some(frame) => &frame.image,
            None => &raw.image,
        };

        match self.evidence.persist(image) {
            Ok(path) => {
                self.stats.evidence_captured += 1;
                Some(path)
            }
            Err(e) => {
                self.stats.evidence_failures += 1;
                tracing::warn!(error = %e, "failed to save intruder evidence");
                None
            }
        }
    }

    fn run(mut self, source: Arc<FrameSource>, running: Arc<AtomicBool>) {
        tracing::info!(source = %source.key(), frame_skip = self.frame_skip, "monitor started");

        while running.load(Ordering::Acquire) {
            let Some(frame) = source.read_shared() else {
                thread::sleep(NO_FRAME_POLL);
                continue;
            };
            if !self.is_due(&frame) {
                thread::sleep(IDLE_POLL);
                continue;
            }
            self.process(&frame, Instant::now());
        }

        tracing::info!(frames = self.stats.frames_processed, "monitor stopped");
    }
}

/// Handle to the running monitor thread.
pub struct MonitorHandle {
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl MonitorHandle {
    /// Signal the loop to exit and wait for it. The in-flight frame finishes first.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("monitor thread panicked");
            }
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Run `monitor` against `source` on a dedicated thread.
pub fn spawn_monitor(monitor: Monitor, source: Arc<FrameSource>) -> io::Result<MonitorHandle> {
    let running = Arc::new(AtomicBool::new(true));
    let worker = {
        let running = Arc::clone(&running);
        thread::Builder::new()
            .name("sentinel-monitor".into())
            .spawn(move || monitor.run(source, running))?
    };
    Ok(MonitorHandle {
        running,
        worker: Some(worker),
    })
}
