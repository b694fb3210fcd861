//! Raw frame sources: real trackpads, the keyboard simulator, and trace replay.
//!
//! Every source runs on its own thread and pushes [`RawFrame`]s through a
//! [`FrameSink`]. The engine thread does not know which kind of source it
//! is listening to.

use std::str::FromStr;
use std::sync::mpsc::{Receiver, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tap_frame::{FrameEncoder, Point};
use tracing::debug;

use crate::engine::EngineInput;

// ════════════════════════════════════════════════════════════════════════════
// RawFrame
// ════════════════════════════════════════════════════════════════════════════

/// One undecoded contact frame as delivered by a device.
#[derive(Clone, Debug, PartialEq)]
pub struct RawFrame {
    /// Source-assigned device index; each gets its own engine.
    pub device:       usize,
    /// Contact records, `finger_count × stride` bytes when well formed.
    pub data:         Vec<u8>,
    pub finger_count: usize,
    /// Device clock, seconds.
    pub timestamp:    f64,
}

// ════════════════════════════════════════════════════════════════════════════
// FrameSink / FrameSource
// ════════════════════════════════════════════════════════════════════════════

/// Sending half handed to a source.
#[derive(Clone, Debug)]
pub struct FrameSink {
    tx: Sender<EngineInput>,
}

impl FrameSink {
    pub fn new(tx: Sender<EngineInput>) -> Self { FrameSink { tx } }

    /// Returns false once the engine has gone away.
    pub fn send(&self, frame: RawFrame) -> bool {
        self.tx.send(EngineInput::Frame(frame)).is_ok()
    }
}

/// Anything that can deliver raw frames.
pub trait FrameSource: Send + 'static {
    /// Produce frames until exhausted or until the sink closes.
    fn run(self: Box<Self>, sink: FrameSink);
}

/// Run a source on its own thread. The engine is told when it finishes.
pub fn spawn_frame_source<S: FrameSource>(source: S, tx: Sender<EngineInput>) -> JoinHandle<()> {
    thread::spawn(move || {
        Box::new(source).run(FrameSink::new(tx.clone()));
        let _ = tx.send(EngineInput::SourceFinished);
    })
}

// ════════════════════════════════════════════════════════════════════════════
// Simulated gestures
// ════════════════════════════════════════════════════════════════════════════

/// Scripted contact patterns the simulator can play.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SimGesture {
    /// Quick, still tap.
    Tap(usize),
    /// Same contact held too long.
    SlowPress(usize),
    /// Four fingers sliding sideways during the tap.
    Wiggle,
    /// Three fingers, a fourth joins, then one lifts.
    Ramp,
    /// Quick tap whose fingers then lift one at a time, each count held
    /// for a couple of frames.
    Stagger(usize),
}

/// Input to the simulator, sent by the status window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SimInput {
    Play(SimGesture),
    Quit,
}

/// One scripted frame: time since script start and finger positions.
#[derive(Clone, Debug, PartialEq)]
pub struct ScriptFrame {
    pub offset:    f64,
    pub positions: Vec<Point>,
}

const TAP_HOLD:        f64 = 0.06;
const SLOW_HOLD:       f64 = 0.30;
const WIGGLE_TRAVEL:   f64 = 0.08;
const RAMP_JOIN:       f64 = 0.03;
const RAMP_HOLD:       f64 = 0.04;
const STAGGER_FRAMES:  usize = 2;
const FINGER_SPACING:  f64 = 0.06;
const PAD_CENTER:      Point = Point::new(0.5, 0.45);

/// `n` fingers in a horizontal row centred on `center`.
pub fn finger_row(n: usize, center: Point) -> Vec<Point> {
    let half = (n.saturating_sub(1)) as f64 / 2.0;
    (0..n)
        .map(|i| Point::new(center.x + (i as f64 - half) * FINGER_SPACING, center.y))
        .collect()
}

fn hold(out: &mut Vec<ScriptFrame>, t: &mut f64, dt: f64, until: f64, at: impl Fn(f64) -> Vec<Point>) {
    while *t < until {
        out.push(ScriptFrame { offset: *t, positions: at(*t) });
        *t += dt;
    }
}

impl SimGesture {
    /// Frames spaced `dt` seconds apart. The last frame always has zero
    /// fingers.
    pub fn script(self, dt: f64) -> Vec<ScriptFrame> {
        let mut out = Vec::new();
        let mut t = 0.0;

        match self {
            SimGesture::Tap(n) => {
                hold(&mut out, &mut t, dt, TAP_HOLD, |_| finger_row(n, PAD_CENTER));
            }
            SimGesture::SlowPress(n) => {
                hold(&mut out, &mut t, dt, SLOW_HOLD, |_| finger_row(n, PAD_CENTER));
            }
            SimGesture::Wiggle => {
                hold(&mut out, &mut t, dt, TAP_HOLD, |t| {
                    let shift = WIGGLE_TRAVEL * t / TAP_HOLD;
                    finger_row(4, Point::new(PAD_CENTER.x + shift, PAD_CENTER.y))
                });
            }
            SimGesture::Ramp => {
                hold(&mut out, &mut t, dt, RAMP_JOIN, |_| finger_row(3, PAD_CENTER));
                hold(&mut out, &mut t, dt, RAMP_JOIN + RAMP_HOLD, |_| finger_row(4, PAD_CENTER));
                out.push(ScriptFrame { offset: t, positions: finger_row(3, PAD_CENTER) });
                t += dt;
            }
            SimGesture::Stagger(n) => {
                hold(&mut out, &mut t, dt, TAP_HOLD, |_| finger_row(n, PAD_CENTER));
                for left in (1..n).rev() {
                    for _ in 0..STAGGER_FRAMES {
                        out.push(ScriptFrame { offset: t, positions: finger_row(left, PAD_CENTER) });
                        t += dt;
                    }
                }
            }
        }
        out.push(ScriptFrame { offset: t, positions: Vec::new() });
        out
    }
}

impl FromStr for SimGesture {
    type Err = String;

    /// `tap3`..`tap5`, `slow3`..`slow5`, `stagger3`..`stagger5`, `wiggle`,
    /// `ramp`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fingers = |digits: &str| match digits.parse::<usize>() {
            Ok(n @ 3..=5) => Ok(n),
            _ => Err(format!("finger count must be 3, 4 or 5 in '{}'", s)),
        };
        match s.to_ascii_lowercase().as_str() {
            "wiggle" => Ok(SimGesture::Wiggle),
            "ramp"   => Ok(SimGesture::Ramp),
            g => {
                if let Some(n) = g.strip_prefix("tap") {
                    fingers(n).map(SimGesture::Tap)
                } else if let Some(n) = g.strip_prefix("slow") {
                    fingers(n).map(SimGesture::SlowPress)
                } else if let Some(n) = g.strip_prefix("stagger") {
                    fingers(n).map(SimGesture::Stagger)
                } else {
                    Err(format!("unknown gesture '{}'", s))
                }
            }
        }
    }
}

/// Gap left between gestures in [`synthesize`].
pub const SYNTH_GAP: f64 = 0.5;

/// Encode a series of gestures as one raw frame stream on device 0, starting
/// at `t0` and separated by [`SYNTH_GAP`].
pub fn synthesize(gestures: &[SimGesture], stride: usize, dt: f64, t0: f64) -> Vec<RawFrame> {
    let encoder = FrameEncoder::new(stride);
    let mut frames = Vec::new();
    let mut t = t0;
    for g in gestures {
        let script = g.script(dt);
        let span = script.last().map_or(0.0, |f| f.offset);
        frames.extend(script.into_iter().map(|f| RawFrame {
            device:       0,
            data:         encoder.encode(&f.positions),
            finger_count: f.positions.len(),
            timestamp:    t + f.offset,
        }));
        t += span + SYNTH_GAP;
    }
    frames
}

// ════════════════════════════════════════════════════════════════════════════
// SimFrameSource: keyboard simulation (always available)
// ════════════════════════════════════════════════════════════════════════════

/// Plays [`SimGesture`] scripts as raw frames in real time.
///
/// Frames are encoded with [`FrameEncoder`], so the engine exercises the same
/// stride detection and decoding it would on hardware.
pub struct SimFrameSource {
    pub rx:       Receiver<SimInput>,
    pub encoder:  FrameEncoder,
    pub interval: Duration,
    pub device:   usize,
    epoch:        Instant,
}

impl SimFrameSource {
    pub fn new(rx: Receiver<SimInput>, stride: usize, interval: Duration) -> Self {
        SimFrameSource {
            rx,
            encoder: FrameEncoder::new(stride),
            interval,
            device: 0,
            epoch: Instant::now(),
        }
    }

    fn play(&self, gesture: SimGesture, sink: &FrameSink) -> bool {
        let start = self.epoch.elapsed().as_secs_f64();
        let began = Instant::now();
        debug!(?gesture, "simulating");

        for frame in gesture.script(self.interval.as_secs_f64()) {
            let due = Duration::from_secs_f64(frame.offset);
            if let Some(wait) = due.checked_sub(began.elapsed()) {
                thread::sleep(wait);
            }
            let raw = RawFrame {
                device:       self.device,
                data:         self.encoder.encode(&frame.positions),
                finger_count: frame.positions.len(),
                timestamp:    start + frame.offset,
            };
            if !sink.send(raw) { return false; }
        }
        true
    }
}

impl FrameSource for SimFrameSource {
    fn run(self: Box<Self>, sink: FrameSink) {
        for input in &self.rx {
            match input {
                SimInput::Play(gesture) => {
                    if !self.play(gesture, &sink) { return; }
                }
                SimInput::Quit => return,
            }
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// Tests
// ════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use tap_session::{ActionId, Bindings, GestureDecision, RejectReason, TapEngine, Tunables};

    const DT: f64 = 0.008;

    fn all_bound() -> Bindings {
        Bindings::default()
            .with(3, ActionId::new("copy"))
            .with(4, ActionId::new("middle_click"))
            .with(5, ActionId::new("spotlight"))
    }

    fn decide(gesture: SimGesture, bindings: Bindings) -> Vec<GestureDecision> {
        let enc = FrameEncoder::new(96);
        let mut engine = TapEngine::new(Tunables::default(), bindings);
        gesture
            .script(DT)
            .iter()
            .filter_map(|f| {
                engine.process_raw(&enc.encode(&f.positions), f.positions.len(), 100.0 + f.offset)
            })
            .collect()
    }

    // ── scripts ───────────────────────────────────────────────────────────
    #[test]
    fn finger_row_is_centred() {
        let row = finger_row(3, Point::new(0.5, 0.5));
        assert_eq!(row.len(), 3);
        assert!((row[1].x - 0.5).abs() < 1e-12);
        let c = Point::mean(row.iter().copied()).unwrap();
        assert!(c.distance(Point::new(0.5, 0.5)) < 1e-12);
    }

    #[test]
    fn scripts_end_with_a_lift() {
        for g in [
            SimGesture::Tap(4), SimGesture::SlowPress(3), SimGesture::Wiggle,
            SimGesture::Ramp, SimGesture::Stagger(5),
        ] {
            let s = g.script(DT);
            assert!(s.last().unwrap().positions.is_empty());
            assert!(s.windows(2).all(|w| w[0].offset < w[1].offset));
        }
    }

    // ── scripts through the engine ────────────────────────────────────────
    #[test]
    fn tap_is_accepted_for_every_bound_count() {
        for n in [3, 4, 5] {
            let ds = decide(SimGesture::Tap(n), all_bound());
            assert_eq!(ds.len(), 1, "{} fingers", n);
            assert!(ds[0].accepted, "{} fingers: {}", n, ds[0].describe_rejections());
            assert_eq!(ds[0].finger_count, n);
            assert!(ds[0].movement_checked);
        }
    }

    #[test]
    fn tap_on_unbound_count_is_rejected() {
        let ds = decide(SimGesture::Tap(3), Bindings::default().with(4, ActionId::new("middle_click")));
        assert_eq!(ds.len(), 1);
        assert!(ds[0].rejections.contains(RejectReason::Unbound));
    }

    #[test]
    fn slow_press_is_too_long() {
        let ds = decide(SimGesture::SlowPress(4), all_bound());
        assert_eq!(ds.len(), 1);
        assert!(ds[0].rejections.contains(RejectReason::TooLong));
    }

    #[test]
    fn wiggle_is_too_much_movement() {
        let ds = decide(SimGesture::Wiggle, all_bound());
        assert_eq!(ds.len(), 1);
        assert!(ds[0].rejections.contains(RejectReason::Movement));
        assert!(!ds[0].rejections.contains(RejectReason::TooLong));
    }

    #[test]
    fn ramp_counts_as_four_fingers() {
        let ds = decide(SimGesture::Ramp, all_bound());
        assert_eq!(ds.len(), 1);
        assert_eq!(ds[0].finger_count, 4);
        assert!(ds[0].accepted);
    }

    #[test]
    fn stagger_lifts_one_finger_at_a_time() {
        let counts: Vec<usize> = SimGesture::Stagger(4).script(DT).iter().map(|f| f.positions.len()).collect();
        let after_tap = counts.iter().position(|&c| c < 4).unwrap();
        assert_eq!(&counts[after_tap..], &[3, 3, 2, 2, 1, 1, 0]);
    }

    #[test]
    fn staggered_lift_is_one_tap() {
        for n in [3, 4, 5] {
            let ds = decide(SimGesture::Stagger(n), all_bound());
            assert_eq!(ds.len(), 1, "{} fingers", n);
            assert_eq!(ds[0].finger_count, n);
            assert!(ds[0].accepted, "{} fingers: {}", n, ds[0].describe_rejections());
        }
    }

    #[test]
    fn gesture_names_parse() {
        assert_eq!("tap4".parse::<SimGesture>(), Ok(SimGesture::Tap(4)));
        assert_eq!("Slow5".parse::<SimGesture>(), Ok(SimGesture::SlowPress(5)));
        assert_eq!("wiggle".parse::<SimGesture>(), Ok(SimGesture::Wiggle));
        assert_eq!("ramp".parse::<SimGesture>(), Ok(SimGesture::Ramp));
        assert_eq!("stagger4".parse::<SimGesture>(), Ok(SimGesture::Stagger(4)));
        assert!("tap2".parse::<SimGesture>().is_err());
        assert!("swipe".parse::<SimGesture>().is_err());
    }

    #[test]
    fn synthesized_gestures_are_spaced_apart() {
        let frames = synthesize(&[SimGesture::Tap(3), SimGesture::Tap(4)], 80, DT, 10.0);
        assert_eq!(frames[0].timestamp, 10.0);
        assert!(frames.windows(2).all(|w| w[0].timestamp < w[1].timestamp));

        let second = frames.iter().position(|f| f.finger_count == 4).unwrap();
        let gap = frames[second].timestamp - frames[second - 1].timestamp;
        assert!((gap - SYNTH_GAP).abs() < 1e-9);
        assert_eq!(frames[second].data.len(), 4 * 80);
    }

    // ── live source ───────────────────────────────────────────────────────
    #[test]
    fn sim_source_streams_encoded_frames_then_finishes() {
        let (sim_tx, sim_rx) = mpsc::channel();
        let (tx, rx) = mpsc::channel();
        let src = SimFrameSource::new(sim_rx, 96, Duration::from_millis(1));
        let handle = spawn_frame_source(src, tx);

        sim_tx.send(SimInput::Play(SimGesture::Tap(4))).unwrap();
        sim_tx.send(SimInput::Quit).unwrap();
        handle.join().unwrap();

        let inputs: Vec<EngineInput> = rx.try_iter().collect();
        let frames: Vec<&RawFrame> = inputs.iter().filter_map(|i| match i {
            EngineInput::Frame(f) => Some(f),
            _ => None,
        }).collect();
        assert!(frames.len() > 2);
        assert_eq!(frames[0].finger_count, 4);
        assert_eq!(frames[0].data.len(), 4 * 96);
        assert_eq!(frames.last().unwrap().finger_count, 0);
        assert!(matches!(inputs.last(), Some(EngineInput::SourceFinished)));
    }
}
