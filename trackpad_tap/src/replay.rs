//! Recorded frame traces.
//!
//! A trace is JSON lines, one raw frame per line:
//!
//! ```text
//! {"device":0,"finger_count":4,"timestamp":12.5,"data":[0,0,128,63, ...]}
//! ```
//!
//! Blank lines and lines starting with `#` are skipped. `device` defaults to
//! 0.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tap_session::GestureDecision;
use tracing::debug;

use crate::engine::Engine;
use crate::source::{FrameSink, FrameSource, RawFrame};
use crate::{Error, Result};

/// Longest pause honoured between frames in real-time replay.
pub const MAX_REPLAY_GAP: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct TraceFrame {
    #[serde(default)]
    device:       usize,
    finger_count: usize,
    timestamp:    f64,
    data:         Vec<u8>,
}

impl From<TraceFrame> for RawFrame {
    fn from(t: TraceFrame) -> Self {
        RawFrame { device: t.device, data: t.data, finger_count: t.finger_count, timestamp: t.timestamp }
    }
}

impl From<&RawFrame> for TraceFrame {
    fn from(f: &RawFrame) -> Self {
        TraceFrame {
            device:       f.device,
            finger_count: f.finger_count,
            timestamp:    f.timestamp,
            data:         f.data.clone(),
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// Reading and writing
// ════════════════════════════════════════════════════════════════════════════

/// Parse a trace from any line source.
pub fn parse_trace<R: BufRead>(reader: R) -> Result<Vec<RawFrame>> {
    let mut frames = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') { continue; }

        let frame: TraceFrame = serde_json::from_str(trimmed)
            .map_err(|e| Error::Trace { line: i + 1, message: e.to_string() })?;
        if !frame.timestamp.is_finite() {
            return Err(Error::Trace { line: i + 1, message: "timestamp is not finite".to_string() });
        }
        frames.push(frame.into());
    }
    Ok(frames)
}

pub fn load_trace(path: &Path) -> Result<Vec<RawFrame>> {
    let frames = parse_trace(BufReader::new(File::open(path)?))?;
    debug!(path = %path.display(), frames = frames.len(), "trace loaded");
    Ok(frames)
}

pub fn write_trace<W: Write>(mut out: W, frames: &[RawFrame]) -> Result<()> {
    for f in frames {
        serde_json::to_writer(&mut out, &TraceFrame::from(f))?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}

pub fn save_trace(path: &Path, frames: &[RawFrame]) -> Result<()> {
    write_trace(BufWriter::new(File::create(path)?), frames)
}

// ════════════════════════════════════════════════════════════════════════════
// Offline evaluation
// ════════════════════════════════════════════════════════════════════════════

/// Run every frame through `engine` synchronously and collect the decisions
/// as `(device, decision)`.
pub fn evaluate_trace(engine: &mut Engine, frames: &[RawFrame]) -> Vec<(usize, GestureDecision)> {
    frames
        .iter()
        .filter_map(|f| engine.handle_frame(f).and_then(|(_, d)| d).map(|d| (f.device, d)))
        .collect()
}

// ════════════════════════════════════════════════════════════════════════════
// ReplaySource
// ════════════════════════════════════════════════════════════════════════════

/// Feeds a loaded trace to the engine, optionally paced by its timestamps.
pub struct ReplaySource {
    pub frames:   Vec<RawFrame>,
    pub realtime: bool,
}

impl ReplaySource {
    pub fn new(frames: Vec<RawFrame>, realtime: bool) -> Self {
        ReplaySource { frames, realtime }
    }
}

impl FrameSource for ReplaySource {
    fn run(self: Box<Self>, sink: FrameSink) {
        let mut prev: Option<f64> = None;
        for frame in self.frames {
            if self.realtime {
                if let Some(p) = prev {
                    let gap = (frame.timestamp - p).max(0.0);
                    thread::sleep(Duration::from_secs_f64(gap).min(MAX_REPLAY_GAP));
                }
                prev = Some(frame.timestamp);
            }
            if !sink.send(frame) { return; }
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// Tests
// ════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineInput;
    use crate::source::{spawn_frame_source, SimGesture};
    use std::io::Cursor;
    use std::sync::mpsc;
    use tap_frame::FrameEncoder;
    use tap_session::{ActionId, Bindings, Tunables};
    use proptest::prelude::*;
    use tempfile::TempDir;

    fn sim_frames(gesture: SimGesture, t0: f64) -> Vec<RawFrame> {
        let enc = FrameEncoder::new(96);
        gesture.script(0.008).into_iter().map(|f| RawFrame {
            device:       0,
            data:         enc.encode(&f.positions),
            finger_count: f.positions.len(),
            timestamp:    t0 + f.offset,
        }).collect()
    }

    // ── parsing ───────────────────────────────────────────────────────────
    #[test]
    fn parses_lines_skipping_comments_and_blanks() {
        let text = "# captured on a trackpad\n\
                    {\"device\":1,\"finger_count\":0,\"timestamp\":1.5,\"data\":[]}\n\
                    \n\
                    {\"finger_count\":2,\"timestamp\":1.6,\"data\":[1,2,3]}\n";
        let frames = parse_trace(Cursor::new(text)).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].device, 1);
        assert_eq!(frames[1].device, 0);
        assert_eq!(frames[1].data, vec![1, 2, 3]);
    }

    #[test]
    fn bad_line_reports_its_number() {
        let text = "{\"finger_count\":0,\"timestamp\":0.0,\"data\":[]}\n{\"finger_count\":\"four\"}\n";
        match parse_trace(Cursor::new(text)) {
            Err(Error::Trace { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected trace error, got {:?}", other),
        }
    }

    #[test]
    fn byte_values_out_of_range_are_rejected() {
        let text = "{\"finger_count\":1,\"timestamp\":0.0,\"data\":[256]}\n";
        assert!(parse_trace(Cursor::new(text)).is_err());
    }

    proptest! {
        #[test]
        fn arbitrary_text_never_panics(text in "(\\PC{0,60}\n){0,8}") {
            let _ = parse_trace(Cursor::new(text));
        }
    }

    // ── files ─────────────────────────────────────────────────────────────
    #[test]
    fn save_then_load_preserves_frames() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tap.jsonl");
        let frames = sim_frames(SimGesture::Tap(4), 3.0);
        save_trace(&path, &frames).unwrap();
        let back = load_trace(&path).unwrap();
        assert_eq!(back.len(), frames.len());
        for (a, b) in back.iter().zip(&frames) {
            assert_eq!(a.data, b.data);
            assert_eq!(a.finger_count, b.finger_count);
            assert!((a.timestamp - b.timestamp).abs() < 1e-9);
        }
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(load_trace(&dir.path().join("nope.jsonl")), Err(Error::Io(_))));
    }

    // ── evaluation ────────────────────────────────────────────────────────
    #[test]
    fn offline_evaluation_matches_gestures() {
        let mut frames = sim_frames(SimGesture::Tap(4), 0.0);
        frames.extend(sim_frames(SimGesture::Wiggle, 1.0));
        frames.extend(sim_frames(SimGesture::Ramp, 2.0));

        let bindings = Bindings::default().with(4, ActionId::new("middle_click"));
        let mut engine = Engine::new(Tunables::default(), bindings, true);
        let decisions = evaluate_trace(&mut engine, &frames);

        let outcome: Vec<(usize, bool)> =
            decisions.iter().map(|(_, d)| (d.finger_count, d.accepted)).collect();
        assert_eq!(outcome, vec![(4, true), (4, false), (4, true)]);
    }

    #[test]
    fn replay_source_delivers_every_frame_in_order() {
        let frames = sim_frames(SimGesture::Tap(3), 0.0);
        let (tx, rx) = mpsc::channel();
        spawn_frame_source(ReplaySource::new(frames.clone(), false), tx).join().unwrap();

        let got: Vec<RawFrame> = rx.try_iter().filter_map(|i| match i {
            EngineInput::Frame(f) => Some(f),
            _ => None,
        }).collect();
        assert_eq!(got, frames);
    }
}
