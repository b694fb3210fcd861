//! # tap_session
//!
//! Classifies multi-finger contact episodes as taps.
//!
//! [`SessionTracker`] is fed one decoded [`TouchFrame`] at a time and never
//! looks ahead. It opens a session when three or more fingers are down, keeps
//! the peak finger count and the worst centroid drift at that peak, and judges
//! the session the moment any finger lifts from the peak.
//!
//! [`TapEngine`] puts a [`tap_frame::FrameDecoder`] in front of the tracker
//! and is the per-device entry point for raw frames.
//!
//! ## Acceptance
//!
//! | Criterion | Rule (all bounds exclusive) |
//! |---|---|
//! | duration | `min_tap_duration < d < max_tap_duration` |
//! | movement | `max_deviation < max_movement` |
//! | binding  | an action is bound to the peak finger count |
//!
//! ## Quick start
//!
//! ```rust
//! use tap_frame::{Point, TouchFrame};
//! use tap_session::{ActionId, Bindings, SessionTracker, Tunables};
//!
//! let bindings = Bindings::default().with(4, ActionId::new("middle_click"));
//! let mut tracker = SessionTracker::new(Tunables::default(), bindings);
//!
//! let down = [Point::new(0.5, 0.5); 4];
//! assert!(tracker.process_frame(&TouchFrame::from_positions(&down, 10.00)).is_none());
//! let decision = tracker.process_frame(&TouchFrame::from_positions(&[], 10.06)).unwrap();
//!
//! assert!(decision.accepted);
//! assert_eq!(decision.finger_count, 4);
//! assert_eq!(decision.action.unwrap().as_str(), "middle_click");
//! ```

use std::fmt;

pub use tap_frame::{Point, TouchFrame};

mod engine;
mod tracker;

pub use engine::TapEngine;
pub use tracker::{
    GestureDecision, GestureSession, RejectReason, RejectReasons, SessionState, SessionTracker,
};

/// Finger count at which a session starts.
pub const TRACKING_THRESHOLD: usize = 3;

/// Finger counts that can carry a binding.
pub const BINDABLE_FINGER_COUNTS: [usize; 3] = [3, 4, 5];

// ════════════════════════════════════════════════════════════════════════════
// ActionId: opaque action identifier
// ════════════════════════════════════════════════════════════════════════════

/// Identifier of the action bound to a finger count.
///
/// The engine never interprets it; it is handed to the dispatcher as-is.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ActionId(String);

impl ActionId {
    pub fn new(id: impl Into<String>) -> Self { ActionId(id.into()) }
    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ActionId {
    fn from(s: &str) -> Self { ActionId::new(s) }
}

// ════════════════════════════════════════════════════════════════════════════
// Tunables
// ════════════════════════════════════════════════════════════════════════════

/// Duration and movement tolerances.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Tunables {
    /// Seconds. Shorter contacts are bounce or phantom touches.
    pub min_tap_duration: f64,
    /// Seconds. Longer contacts are deliberate swipes or pinches.
    pub max_tap_duration: f64,
    /// Largest allowed centroid drift, in normalized surface units.
    pub max_movement:     f64,
}

impl Tunables {
    pub const DEFAULT_MIN_TAP_DURATION: f64 = 0.02;
    pub const DEFAULT_MAX_TAP_DURATION: f64 = 0.12;
    pub const DEFAULT_MAX_MOVEMENT:     f64 = 0.03;

    /// Movement tolerance that a tap on the unit surface cannot realistically
    /// reach; turns the movement check off without a separate code path.
    pub const MOVEMENT_DISABLED: f64 = 1.0;

    pub fn movement_check_disabled(&self) -> bool {
        self.max_movement >= Self::MOVEMENT_DISABLED
    }
}

impl Default for Tunables {
    fn default() -> Self {
        Tunables {
            min_tap_duration: Self::DEFAULT_MIN_TAP_DURATION,
            max_tap_duration: Self::DEFAULT_MAX_TAP_DURATION,
            max_movement:     Self::DEFAULT_MAX_MOVEMENT,
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// Bindings: finger count → action
// ════════════════════════════════════════════════════════════════════════════

/// Per-finger-count action bindings for 3, 4 and 5 fingers.
///
/// `None` means the finger count is disabled.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Bindings {
    slots: [Option<ActionId>; 3],
}

impl Bindings {
    fn slot(finger_count: usize) -> Option<usize> {
        BINDABLE_FINGER_COUNTS.iter().position(|&n| n == finger_count)
    }

    /// Action bound to `finger_count`, if any.
    pub fn get(&self, finger_count: usize) -> Option<&ActionId> {
        Self::slot(finger_count).and_then(|i| self.slots[i].as_ref())
    }

    /// Bind or clear `finger_count`. Returns false for counts that cannot be
    /// bound.
    pub fn set(&mut self, finger_count: usize, action: Option<ActionId>) -> bool {
        match Self::slot(finger_count) {
            Some(i) => { self.slots[i] = action; true }
            None    => false,
        }
    }

    /// Builder form of [`Bindings::set`].
    pub fn with(mut self, finger_count: usize, action: ActionId) -> Self {
        self.set(finger_count, Some(action));
        self
    }

    /// `(finger_count, binding)` for every bindable count.
    pub fn iter(&self) -> impl Iterator<Item = (usize, Option<&ActionId>)> + '_ {
        BINDABLE_FINGER_COUNTS.iter().zip(&self.slots).map(|(&n, a)| (n, a.as_ref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_tunables() {
        let t = Tunables::default();
        assert_eq!(t.min_tap_duration, 0.02);
        assert_eq!(t.max_tap_duration, 0.12);
        assert_eq!(t.max_movement, 0.03);
        assert!(!t.movement_check_disabled());
    }

    #[test]
    fn sentinel_disables_movement_check() {
        let t = Tunables { max_movement: Tunables::MOVEMENT_DISABLED, ..Tunables::default() };
        assert!(t.movement_check_disabled());
    }

    #[test]
    fn bindings_only_cover_three_to_five() {
        let mut b = Bindings::default();
        assert!(b.set(3, Some("copy".into())));
        assert!(!b.set(2, Some("paste".into())));
        assert!(!b.set(6, Some("paste".into())));
        assert_eq!(b.get(3).map(ActionId::as_str), Some("copy"));
        assert_eq!(b.get(2), None);
        assert_eq!(b.get(4), None);
    }

    #[test]
    fn bindings_iter_in_order() {
        let b = Bindings::default().with(5, "spotlight".into());
        let counts: Vec<usize> = b.iter().map(|(n, _)| n).collect();
        assert_eq!(counts, vec![3, 4, 5]);
        assert_eq!(b.iter().filter(|(_, a)| a.is_some()).count(), 1);
    }
}
