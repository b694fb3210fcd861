//! Per-device engine: raw bytes in, decisions out.

use tap_frame::{FrameDecoder, TouchFrame};
use tracing::warn;

use crate::tracker::{GestureDecision, SessionTracker};
use crate::{Bindings, Tunables};

/// Decoder plus tracker for one device.
///
/// Each device gets its own engine; sessions from different devices never
/// interleave.
#[derive(Clone, Debug)]
pub struct TapEngine {
    decoder:           FrameDecoder,
    tracker:           SessionTracker,
    enabled:           bool,
    degraded_reported: bool,
}

impl TapEngine {
    pub fn new(tunables: Tunables, bindings: Bindings) -> Self {
        TapEngine {
            decoder:           FrameDecoder::new(),
            tracker:           SessionTracker::new(tunables, bindings),
            enabled:           true,
            degraded_reported: false,
        }
    }

    /// Engine whose decoder skips stride detection.
    pub fn with_stride(tunables: Tunables, bindings: Bindings, stride: usize) -> Self {
        TapEngine { decoder: FrameDecoder::with_stride(stride), ..Self::new(tunables, bindings) }
    }

    /// Decode and process one raw frame.
    ///
    /// While disabled every frame is dropped and `None` is returned.
    pub fn process_raw(&mut self, raw: &[u8], finger_count: usize, timestamp: f64)
        -> Option<GestureDecision>
    {
        if !self.enabled { return None; }
        let frame = self.decode_raw(raw, finger_count, timestamp);
        self.tracker.process_frame(&frame)
    }

    /// Decode without advancing the tracker. Stride detection still runs.
    pub fn decode_raw(&mut self, raw: &[u8], finger_count: usize, timestamp: f64) -> TouchFrame {
        let frame = self.decoder.decode(raw, finger_count, timestamp);
        if finger_count >= 2 && self.decoder.stride().is_none() && !self.degraded_reported {
            warn!(
                finger_count,
                bytes = raw.len(),
                "contact record stride not detected; movement filter inactive"
            );
            self.degraded_reported = true;
        }
        frame
    }

    /// Process an already decoded frame.
    pub fn process_frame(&mut self, frame: &TouchFrame) -> Option<GestureDecision> {
        if !self.enabled { return None; }
        self.tracker.process_frame(frame)
    }

    /// Disabling drops any live session.
    pub fn set_enabled(&mut self, enabled: bool) {
        if !enabled { self.tracker.reset(); }
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool { self.enabled }

    pub fn set_tunables(&mut self, tunables: Tunables) { self.tracker.set_tunables(tunables); }
    pub fn set_bindings(&mut self, bindings: Bindings) { self.tracker.set_bindings(bindings); }

    pub fn tracker(&self) -> &SessionTracker { &self.tracker }
    pub fn stride(&self) -> Option<usize> { self.decoder.stride() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ActionId;
    use tap_frame::{FrameEncoder, Point};

    fn engine() -> TapEngine {
        TapEngine::new(Tunables::default(), Bindings::default().with(4, ActionId::new("middle_click")))
    }

    fn fingers(c: Point, n: usize) -> Vec<Point> {
        // Spread the fingers so stride probes see distinct second records.
        (0..n).map(|i| Point::new(c.x + 0.02 * i as f64, c.y)).collect()
    }

    #[test]
    fn raw_tap_is_accepted_and_stride_detected() {
        let enc = FrameEncoder::new(96);
        let mut e = engine();
        let down = enc.encode(&fingers(Point::new(0.4, 0.5), 4));

        assert!(e.process_raw(&down, 4, 5.00).is_none());
        assert_eq!(e.stride(), Some(96));
        assert!(e.process_raw(&down, 4, 5.03).is_none());
        let d = e.process_raw(&[], 0, 5.07).unwrap();

        assert!(d.accepted);
        assert!(d.movement_checked);
        assert_eq!(d.action.unwrap().as_str(), "middle_click");
    }

    #[test]
    fn raw_drift_is_rejected() {
        let enc = FrameEncoder::new(80);
        let mut e = engine();
        e.process_raw(&enc.encode(&fingers(Point::new(0.30, 0.5), 4)), 4, 0.00);
        e.process_raw(&enc.encode(&fingers(Point::new(0.40, 0.5), 4)), 4, 0.04);
        let d = e.process_raw(&[], 0, 0.06).unwrap();
        assert!(!d.accepted);
        assert!(d.max_deviation > 0.09);
    }

    #[test]
    fn undetectable_layout_degrades_to_count_and_duration() {
        let mut e = engine();
        let garbage = vec![0u8; 4 * 96];
        e.process_raw(&garbage, 4, 0.00);
        assert_eq!(e.stride(), None);
        let d = e.process_raw(&[], 0, 0.06).unwrap();
        assert!(d.accepted);
        assert!(!d.movement_checked);
        assert!(e.degraded_reported);
    }

    #[test]
    fn disabled_engine_drops_frames_and_session() {
        let enc = FrameEncoder::new(96);
        let mut e = engine();
        let down = enc.encode(&fingers(Point::new(0.4, 0.5), 4));
        e.process_raw(&down, 4, 0.00);
        assert!(e.tracker().is_tracking());

        e.set_enabled(false);
        assert!(!e.tracker().is_tracking());
        assert!(e.process_raw(&down, 4, 0.01).is_none());
        assert!(e.process_raw(&[], 0, 0.05).is_none());

        e.set_enabled(true);
        assert!(e.process_raw(&[], 0, 0.06).is_none());
    }

    #[test]
    fn known_stride_skips_detection() {
        let e = TapEngine::with_stride(Tunables::default(), Bindings::default(), 104);
        assert_eq!(e.stride(), Some(104));
    }

    #[test]
    fn rebinding_applies_to_next_session() {
        let mut e = engine();
        let frame = |n, t| TouchFrame::from_positions(&vec![Point::new(0.5, 0.5); n], t);
        e.process_frame(&frame(3, 0.0));
        assert!(!e.process_frame(&frame(0, 0.05)).unwrap().accepted);

        e.set_bindings(Bindings::default().with(3, ActionId::new("copy")));
        e.process_frame(&frame(3, 1.0));
        let d = e.process_frame(&frame(0, 1.05)).unwrap();
        assert_eq!(d.action.unwrap().as_str(), "copy");
    }
}
