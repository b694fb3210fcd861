//! The session state machine.
//!
//! Transitions are checked once per frame, always in this order:
//!
//! 1. `Idle → Tracking` when the count rises to three or more from a frame
//!    with fewer. Fingers left down after an evaluation never re-arm.
//! 2. Peak upgrade: more fingers than the current peak restarts the session
//!    at the new peak (start time, start centroid, drift all reset).
//! 3. Drift sampling, only on frames at the peak count.
//! 4. Evaluation as soon as the count drops below the peak.
//! 5. Safety reset to `Idle` on any zero-finger frame.

use std::fmt;

use tap_frame::{Point, TouchFrame};
use tracing::debug;

use crate::{ActionId, Bindings, Tunables, TRACKING_THRESHOLD};

// ════════════════════════════════════════════════════════════════════════════
// GestureSession
// ════════════════════════════════════════════════════════════════════════════

/// One in-progress multi-finger contact.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GestureSession {
    pub start_time:        f64,
    pub peak_finger_count: usize,
    /// `None` when the frame that opened the session had no decodable
    /// positions; drift is then never sampled.
    pub start_centroid:    Option<Point>,
    /// Largest centroid displacement seen at the peak count.
    pub max_deviation:     f64,
}

impl GestureSession {
    fn begin(frame: &TouchFrame) -> Self {
        GestureSession {
            start_time:        frame.timestamp,
            peak_finger_count: frame.finger_count,
            start_centroid:    frame.centroid(),
            max_deviation:     0.0,
        }
    }

    fn sample(&mut self, centroid: Option<Point>) {
        if let (Some(start), Some(now)) = (self.start_centroid, centroid) {
            self.max_deviation = self.max_deviation.max(start.distance(now));
        }
    }
}

/// Tracker state.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SessionState {
    Idle,
    Tracking(GestureSession),
}

// ════════════════════════════════════════════════════════════════════════════
// RejectReason / RejectReasons
// ════════════════════════════════════════════════════════════════════════════

/// One violated acceptance criterion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RejectReason {
    /// Not longer than `min_tap_duration`.
    TooShort,
    /// Not shorter than `max_tap_duration`.
    TooLong,
    /// Drift reached `max_movement`.
    Movement,
    /// Nothing is bound to the peak finger count.
    Unbound,
}

impl RejectReason {
    const ALL: [RejectReason; 4] = [
        RejectReason::TooShort,
        RejectReason::TooLong,
        RejectReason::Movement,
        RejectReason::Unbound,
    ];

    fn bit(self) -> u8 { 1 << self as u8 }

    pub fn label(self) -> &'static str {
        match self {
            RejectReason::TooShort => "too short",
            RejectReason::TooLong  => "too long",
            RejectReason::Movement => "movement",
            RejectReason::Unbound  => "unbound",
        }
    }

    /// Both duration reasons map to the same criterion.
    pub fn is_duration(self) -> bool {
        matches!(self, RejectReason::TooShort | RejectReason::TooLong)
    }
}

/// Every criterion a session failed. Empty means accepted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RejectReasons(u8);

impl RejectReasons {
    pub fn insert(&mut self, r: RejectReason) { self.0 |= r.bit(); }
    pub fn contains(&self, r: RejectReason) -> bool { self.0 & r.bit() != 0 }
    pub fn is_empty(&self) -> bool { self.0 == 0 }
    pub fn len(&self) -> usize { self.0.count_ones() as usize }

    pub fn iter(&self) -> impl Iterator<Item = RejectReason> + '_ {
        RejectReason::ALL.into_iter().filter(move |r| self.contains(*r))
    }
}

impl fmt::Display for RejectReasons {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for r in self.iter() {
            if !first { f.write_str(", ")?; }
            f.write_str(r.label())?;
            first = false;
        }
        Ok(())
    }
}

// ════════════════════════════════════════════════════════════════════════════
// GestureDecision
// ════════════════════════════════════════════════════════════════════════════

/// Outcome of one evaluated session.
#[derive(Clone, Debug, PartialEq)]
pub struct GestureDecision {
    /// Peak finger count of the session.
    pub finger_count:     usize,
    pub accepted:         bool,
    /// Resolved binding; only set when accepted.
    pub action:           Option<ActionId>,
    /// Seconds from session start to the first lift.
    pub duration:         f64,
    pub max_deviation:    f64,
    /// False when no start centroid was available (stride undetected), in
    /// which case the movement criterion passed vacuously.
    pub movement_checked: bool,
    pub rejections:       RejectReasons,
    /// Timestamp of the frame that triggered evaluation.
    pub timestamp:        f64,
}

impl GestureDecision {
    /// One-line description with measured values for every failed criterion,
    /// e.g. `duration(150ms), movement(0.0500)`.
    pub fn describe_rejections(&self) -> String {
        let ms = self.duration * 1000.0;
        let mut parts = Vec::new();
        if self.rejections.iter().any(RejectReason::is_duration) {
            parts.push(format!("duration({:.0}ms)", ms));
        }
        if self.rejections.contains(RejectReason::Movement) {
            parts.push(format!("movement({:.4})", self.max_deviation));
        }
        if self.rejections.contains(RejectReason::Unbound) {
            parts.push(format!("unbound({})", self.finger_count));
        }
        parts.join(", ")
    }
}

// ════════════════════════════════════════════════════════════════════════════
// SessionTracker
// ════════════════════════════════════════════════════════════════════════════

/// Streaming tap classifier. One live session at most.
#[derive(Clone, Debug)]
pub struct SessionTracker {
    state:      SessionState,
    tunables:   Tunables,
    bindings:   Bindings,
    /// Finger count of the previous frame.
    prev_count: usize,
}

impl SessionTracker {
    pub fn new(tunables: Tunables, bindings: Bindings) -> Self {
        SessionTracker { state: SessionState::Idle, tunables, bindings, prev_count: 0 }
    }

    pub fn state(&self) -> &SessionState { &self.state }

    pub fn session(&self) -> Option<&GestureSession> {
        match &self.state {
            SessionState::Tracking(s) => Some(s),
            SessionState::Idle        => None,
        }
    }

    pub fn is_tracking(&self) -> bool { self.session().is_some() }

    pub fn tunables(&self) -> &Tunables { &self.tunables }
    pub fn bindings(&self) -> &Bindings { &self.bindings }

    pub fn set_tunables(&mut self, tunables: Tunables) { self.tunables = tunables; }
    pub fn set_bindings(&mut self, bindings: Bindings) { self.bindings = bindings; }

    /// Drop any live session and forget the previous count.
    pub fn reset(&mut self) {
        self.state = SessionState::Idle;
        self.prev_count = 0;
    }

    /// Advance the state machine by one frame. Returns a decision when this
    /// frame ended a session, accepted or not.
    pub fn process_frame(&mut self, frame: &TouchFrame) -> Option<GestureDecision> {
        let count = frame.finger_count;
        let rising = self.prev_count < TRACKING_THRESHOLD && count >= TRACKING_THRESHOLD;
        self.prev_count = count;

        if self.state == SessionState::Idle && rising {
            let session = GestureSession::begin(frame);
            debug!(
                fingers = count,
                t = frame.timestamp,
                centroid = ?session.start_centroid,
                "session started"
            );
            self.state = SessionState::Tracking(session);
        }

        let ended = match &mut self.state {
            SessionState::Idle => None,
            SessionState::Tracking(session) => {
                if count > session.peak_finger_count {
                    debug!(from = session.peak_finger_count, to = count, "session peak upgraded");
                    *session = GestureSession::begin(frame);
                }
                if count == session.peak_finger_count {
                    session.sample(frame.centroid());
                }
                (count < session.peak_finger_count).then_some(*session)
            }
        };

        let decision = ended.map(|session| {
            self.state = SessionState::Idle;
            self.evaluate(&session, frame.timestamp)
        });

        if count == 0 {
            self.state = SessionState::Idle;
        }

        decision
    }

    fn evaluate(&self, session: &GestureSession, now: f64) -> GestureDecision {
        let t = &self.tunables;
        let duration = now - session.start_time;
        let binding  = self.bindings.get(session.peak_finger_count);

        let mut rejections = RejectReasons::default();
        if !(duration > t.min_tap_duration) { rejections.insert(RejectReason::TooShort); }
        if !(duration < t.max_tap_duration) { rejections.insert(RejectReason::TooLong); }
        if !(session.max_deviation < t.max_movement) { rejections.insert(RejectReason::Movement); }
        if binding.is_none() { rejections.insert(RejectReason::Unbound); }

        let accepted = rejections.is_empty();
        let decision = GestureDecision {
            finger_count:     session.peak_finger_count,
            accepted,
            action:           if accepted { binding.cloned() } else { None },
            duration,
            max_deviation:    session.max_deviation,
            movement_checked: session.start_centroid.is_some(),
            rejections,
            timestamp:        now,
        };

        if accepted {
            debug!(
                fingers = decision.finger_count,
                duration_ms = duration * 1000.0,
                moved = decision.max_deviation,
                "tap accepted"
            );
        } else {
            debug!(
                fingers = decision.finger_count,
                duration_ms = duration * 1000.0,
                moved = decision.max_deviation,
                reasons = %decision.describe_rejections(),
                "tap rejected"
            );
        }
        decision
    }
}

// ════════════════════════════════════════════════════════════════════════════
// Tests
// ════════════════════════════════════════════════════════════════════════════
