//! Presence tracking and alert gating.
//!
//! The tracker is fed once per processed frame with whether every face in it was
//! unknown. It opens an "unknown session" on the first such frame, asks for evidence
//! exactly once per session after the duration threshold, and gates notifications
//! with a cooldown that spans sessions.
//!
//! All methods take `now` explicitly; the tracker never reads the clock itself.

use crate::types::FaceMatch;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

pub const DEFAULT_UNKNOWN_DURATION: Duration = Duration::from_secs(2);
pub const DEFAULT_ALERT_COOLDOWN: Duration = Duration::from_secs(30);

/// Timing and channel settings for alerting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlertPolicy {
    /// How long an all-unknown condition must persist before evidence is captured.
    pub unknown_duration: Duration,
    /// Minimum spacing between notification dispatches, across sessions.
    pub cooldown: Duration,
    pub notifications_enabled: bool,
}

impl Default for AlertPolicy {
    fn default() -> Self {
        Self {
            unknown_duration: DEFAULT_UNKNOWN_DURATION,
            cooldown: DEFAULT_ALERT_COOLDOWN,
            notifications_enabled: false,
        }
    }
}

/// Whether a frame's results count toward an unknown session.
///
/// False for a frame with no faces. With no gallery every face is unknown;
/// otherwise all faces must be unmatched.
pub fn all_unknown(matches: &[FaceMatch], gallery_present: bool) -> bool {
    if matches.is_empty() {
        return false;
    }
    !gallery_present || matches.iter().all(|m| !m.is_known())
}

/// Evidence state of the open session.
#[derive(Debug, Clone, PartialEq)]
enum Evidence {
    /// Threshold not reached yet.
    Pending,
    /// Capture was requested; waiting for [`PresenceTracker::record_evidence`].
    Requested,
    Saved(PathBuf),
    /// Capture was attempted and failed. Not retried within this session.
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
enum Session {
    Idle,
    Unknown { started: Instant, evidence: Evidence },
}

/// What the caller should do after feeding a frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Step {
    /// No session open and none started.
    Idle,
    /// Session open (possibly just started); threshold not reached or evidence already handled.
    Tracking { elapsed: Duration },
    /// Threshold reached for the first time this session: persist evidence now and
    /// report the outcome via [`PresenceTracker::record_evidence`].
    CaptureEvidence { elapsed: Duration },
    /// A session was open and this frame ended it.
    Cleared,
}

/// Serializable view of the tracker for status endpoints.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PresenceStatus {
    pub session_open: bool,
    pub session_elapsed_secs: Option<f64>,
    pub alerted: bool,
    pub evidence: Option<PathBuf>,
    pub last_notification_secs_ago: Option<f64>,
}

/// Unknown-session state machine. Owned by the recognition loop.
#[derive(Debug, Clone)]
pub struct PresenceTracker {
    policy: AlertPolicy,
    session: Session,
    last_notification: Option<Instant>,
}

impl PresenceTracker {
    pub fn new(policy: AlertPolicy) -> Self {
        Self {
            policy,
            session: Session::Idle,
            last_notification: None,
        }
    }

    pub fn policy(&self) -> &AlertPolicy {
        &self.policy
    }

    /// Advance the state machine with one processed frame.
    pub fn observe(&mut self, now: Instant, all_unknown: bool) -> Step {
        if !all_unknown {
            return match std::mem::replace(&mut self.session, Session::Idle) {
                Session::Idle => Step::Idle,
                Session::Unknown { started, .. } => {
                    tracing::info!(
                        duration_ms = now.saturating_duration_since(started).as_millis() as u64,
                        "unknown session cleared"
                    );
                    Step::Cleared
                }
            };
        }

        if self.session == Session::Idle {
            tracing::info!("unknown session started");
            self.session = Session::Unknown {
                started: now,
                evidence: Evidence::Pending,
            };
        }

        let Session::Unknown { started, evidence } = &mut self.session else {
            return Step::Idle;
        };
        let elapsed = now.saturating_duration_since(*started);

        if *evidence == Evidence::Pending && elapsed >= self.policy.unknown_duration {
            // Marked before the capture runs so a failing store cannot cause a retry every frame.
            *evidence = Evidence::Requested;
            tracing::info!(elapsed_ms = elapsed.as_millis() as u64, "unknown face persisted; capturing evidence");
            return Step::CaptureEvidence { elapsed };
        }

        Step::Tracking { elapsed }
    }

    /// Report the outcome of a capture requested by [`Step::CaptureEvidence`].
    pub fn record_evidence(&mut self, path: Option<PathBuf>) {
        if let Session::Unknown { evidence, .. } = &mut self.session {
            if *evidence == Evidence::Requested {
                *evidence = match path {
                    Some(path) => Evidence::Saved(path),
                    None => Evidence::Failed,
                };
            }
        }
    }

    /// Evidence path to send, if a notification is due now.
    ///
    /// Due when notifications are enabled, the open session has saved evidence, and
    /// the cooldown has elapsed since the last dispatch. The cooldown advances on the
    /// attempt, whatever the delivery outcome. A session that outlives the cooldown
    /// is notified again with the same evidence.
    pub fn take_notification(&mut self, now: Instant) -> Option<PathBuf> {
        if !self.policy.notifications_enabled {
            return None;
        }
        let Session::Unknown {
            evidence: Evidence::Saved(path),
            ..
        } = &self.session
        else {
            return None;
        };

        let cooled = self
            .last_notification
            .map_or(true, |last| now.saturating_duration_since(last) >= self.policy.cooldown);
        if !cooled {
            tracing::debug!("notification suppressed by cooldown");
            return None;
        }

        self.last_notification = Some(now);
        Some(path.clone())
    }

    pub fn session_open(&self) -> bool {
        matches!(self.session, Session::Unknown { .. })
    }

    /// Whether evidence capture has been triggered for the current session.
    pub fn alerted(&self) -> bool {
        matches!(
            self.session,
            Session::Unknown { ref evidence, .. } if *evidence != Evidence::Pending
        )
    }

    pub fn evidence(&self) -> Option<&Path> {
        match &self.session {
            Session::Unknown {
                evidence: Evidence::Saved(path),
                ..
            } => Some(path),
            _ => None,
        }
    }

    pub fn last_notification(&self) -> Option<Instant> {
        self.last_notification
    }

    pub fn status(&self, now: Instant) -> PresenceStatus {
        let session_elapsed_secs = match &self.session {
            Session::Unknown { started, .. } => {
                Some(now.saturating_duration_since(*started).as_secs_f64())
            }
            Session::Idle => None,
        };
        PresenceStatus {
            session_open: self.session_open(),
            session_elapsed_secs,
            alerted: self.alerted(),
            evidence: self.evidence().map(Path::to_path_buf),
            last_notification_secs_ago: self
                .last_notification
                .map(|t| now.saturating_duration_since(t).as_secs_f64()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FaceRect, Identity};

    fn policy(unknown_secs: f64, cooldown_secs: f64, notify: bool) -> AlertPolicy {
        AlertPolicy {
            unknown_duration: Duration::from_secs_f64(unknown_secs),
            cooldown: Duration::from_secs_f64(cooldown_secs),
            notifications_enabled: notify,
        }
    }

    fn ms(base: Instant, millis: u64) -> Instant {
        base + Duration::from_millis(millis)
    }

    fn face(identity: Identity) -> FaceMatch {
        FaceMatch {
            identity,
            score: Some(0.1),
            rect: FaceRect { x: 0, y: 0, width: 1, height: 1 },
        }
    }

    /// Feed one frame and, if asked, "persist" evidence. Returns whether a capture
    /// happened and any notification path.
    fn drive(tracker: &mut PresenceTracker, now: Instant, unknown: bool) -> (bool, Option<PathBuf>) {
        let captured = match tracker.observe(now, unknown) {
            Step::CaptureEvidence { .. } => {
                tracker.record_evidence(Some(PathBuf::from("/tmp/intruder.jpg")));
                true
            }
            _ => false,
        };
        (captured, tracker.take_notification(now))
    }

    #[test]
    fn test_all_unknown_rules() {
        let alice = face(Identity::Known { label: 0, name: "alice".into() });
        let stranger = face(Identity::Unknown);

        assert!(!all_unknown(&[], true));
        assert!(!all_unknown(&[], false));
        assert!(all_unknown(&[stranger.clone()], true));
        assert!(all_unknown(&[stranger.clone(), stranger.clone()], true));
        assert!(!all_unknown(&[stranger.clone(), alice.clone()], true));
        // No gallery: any face counts as unknown.
        assert!(all_unknown(&[alice], false));
    }

    #[test]
    fn test_session_starts_and_clears() {
        let t0 = Instant::now();
        let mut tracker = PresenceTracker::new(policy(2.0, 30.0, false));

        assert_eq!(tracker.observe(t0, false), Step::Idle);
        assert_eq!(
            tracker.observe(t0, true),
            Step::Tracking { elapsed: Duration::ZERO }
        );
        assert!(tracker.session_open());
        assert_eq!(tracker.observe(ms(t0, 500), false), Step::Cleared);
        assert!(!tracker.session_open());
        assert_eq!(tracker.observe(ms(t0, 600), false), Step::Idle);
    }

    #[test]
    fn test_capture_at_threshold_boundary() {
        let t0 = Instant::now();
        let mut tracker = PresenceTracker::new(policy(2.0, 30.0, false));

        tracker.observe(t0, true);
        assert!(matches!(tracker.observe(ms(t0, 1999), true), Step::Tracking { .. }));
        assert_eq!(
            tracker.observe(ms(t0, 2000), true),
            Step::CaptureEvidence { elapsed: Duration::from_secs(2) }
        );
        assert!(tracker.alerted());
    }

    #[test]
    fn test_zero_duration_captures_on_first_frame() {
        let t0 = Instant::now();
        let mut tracker = PresenceTracker::new(policy(0.0, 30.0, false));
        assert!(matches!(tracker.observe(t0, true), Step::CaptureEvidence { .. }));
    }

    #[test]
    fn test_long_session_captures_once() {
        let t0 = Instant::now();
        let mut tracker = PresenceTracker::new(policy(2.0, 30.0, false));

        let captures = (0..=100)
            .filter(|i| drive(&mut tracker, ms(t0, i * 100), true).0)
            .count();
        assert_eq!(captures, 1);
    }

    #[test]
    fn test_no_gallery_three_seconds_one_capture() {
        let t0 = Instant::now();
        let mut tracker = PresenceTracker::new(policy(2.0, 30.0, true));
        let frame = [face(Identity::Unknown)];

        let mut capture_times = Vec::new();
        for i in 0..=30 {
            let now = ms(t0, i * 100);
            if let Step::CaptureEvidence { elapsed } = tracker.observe(now, all_unknown(&frame, false)) {
                capture_times.push(elapsed);
                tracker.record_evidence(Some(PathBuf::from("/tmp/a.jpg")));
            }
        }
        assert_eq!(capture_times, vec![Duration::from_secs(2)]);
    }

    #[test]
    fn test_recognized_face_resets_session() {
        let t0 = Instant::now();
        let mut tracker = PresenceTracker::new(policy(2.0, 30.0, false));

        tracker.observe(t0, true);
        tracker.observe(ms(t0, 1500), true);
        tracker.observe(ms(t0, 1600), false);
        // Timer restarts: 1.9 s after the new start is still below threshold.
        tracker.observe(ms(t0, 1700), true);
        assert!(matches!(tracker.observe(ms(t0, 3600), true), Step::Tracking { .. }));
        assert!(matches!(tracker.observe(ms(t0, 3700), true), Step::CaptureEvidence { .. }));
    }

    #[test]
    fn test_new_session_captures_again() {
        let t0 = Instant::now();
        let mut tracker = PresenceTracker::new(policy(1.0, 30.0, false));

        assert!(!drive(&mut tracker, t0, true).0);
        assert!(drive(&mut tracker, ms(t0, 1000), true).0);
        drive(&mut tracker, ms(t0, 1100), false);
        assert!(!drive(&mut tracker, ms(t0, 1200), true).0);
        assert!(drive(&mut tracker, ms(t0, 2200), true).0);
    }

    #[test]
    fn test_cooldown_suppresses_close_sessions() {
        let t0 = Instant::now();
        let mut tracker = PresenceTracker::new(policy(1.0, 30.0, true));
        let mut notifications = 0;

        // Session one at t=0, alert at t=1.
        for (t, unknown) in [(0, true), (1000, true), (1500, false)] {
            notifications += drive(&mut tracker, ms(t0, t), unknown).1.is_some() as usize;
        }
        // Session two starts 10 s later, well inside the cooldown.
        for (t, unknown) in [(10_000, true), (11_000, true), (11_500, false)] {
            notifications += drive(&mut tracker, ms(t0, t), unknown).1.is_some() as usize;
        }
        assert_eq!(notifications, 1);
    }

    #[test]
    fn test_cooldown_allows_distant_sessions() {
        let t0 = Instant::now();
        let mut tracker = PresenceTracker::new(policy(1.0, 30.0, true));
        let mut notifications = 0;

        for (t, unknown) in [(0, true), (1000, true), (1500, false)] {
            notifications += drive(&mut tracker, ms(t0, t), unknown).1.is_some() as usize;
        }
        for (t, unknown) in [(40_000, true), (41_000, true), (41_500, false)] {
            notifications += drive(&mut tracker, ms(t0, t), unknown).1.is_some() as usize;
        }
        assert_eq!(notifications, 2);
    }

    #[test]
    fn test_long_session_renotifies_after_cooldown() {
        let t0 = Instant::now();
        let mut tracker = PresenceTracker::new(policy(1.0, 5.0, true));

        let mut sent = Vec::new();
        for i in 0..=70 {
            if let (_, Some(path)) = drive(&mut tracker, ms(t0, i * 100), true) {
                sent.push((i * 100, path));
            }
        }
        let times: Vec<u64> = sent.iter().map(|(t, _)| *t).collect();
        assert_eq!(times, vec![1000, 6000]);
        assert!(sent.iter().all(|(_, p)| p == Path::new("/tmp/intruder.jpg")));
    }

    #[test]
    fn test_notifications_disabled() {
        let t0 = Instant::now();
        let mut tracker = PresenceTracker::new(policy(0.0, 0.0, false));
        assert_eq!(drive(&mut tracker, t0, true), (true, None));
        assert_eq!(tracker.last_notification(), None);
    }

    #[test]
    fn test_failed_capture_is_not_retried() {
        let t0 = Instant::now();
        let mut tracker = PresenceTracker::new(policy(1.0, 0.0, true));

        tracker.observe(t0, true);
        assert!(matches!(tracker.observe(ms(t0, 1000), true), Step::CaptureEvidence { .. }));
        tracker.record_evidence(None);

        for i in 11..50 {
            assert!(matches!(tracker.observe(ms(t0, i * 100), true), Step::Tracking { .. }));
            assert_eq!(tracker.take_notification(ms(t0, i * 100)), None);
        }
        assert!(tracker.alerted());
        assert!(tracker.session_open());
    }

    #[test]
    fn test_status_snapshot() {
        let t0 = Instant::now();
        let mut tracker = PresenceTracker::new(policy(1.0, 30.0, true));
        assert_eq!(tracker.status(t0), PresenceStatus::default());

        drive(&mut tracker, t0, true);
        drive(&mut tracker, ms(t0, 1000), true);
        let status = tracker.status(ms(t0, 1500));
        assert!(status.session_open && status.alerted);
        assert_eq!(status.session_elapsed_secs, Some(1.5));
        assert_eq!(status.last_notification_secs_ago, Some(0.5));
        assert_eq!(status.evidence, Some(PathBuf::from("/tmp/intruder.jpg")));
    }
}
