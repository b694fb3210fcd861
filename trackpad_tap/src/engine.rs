//! The engine thread.
//!
//! Owns one [`TapEngine`] per device and is the only place frames are
//! decoded and sessions tracked. Sources, the status window and the signal
//! handler all talk to it through a single [`EngineInput`] channel, so frames
//! and commands are handled in the order they were sent.

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

use tap_actions::TapAction;
use tap_frame::Point;
use tap_session::{Bindings, GestureDecision, TapEngine, Tunables};
use tracing::{debug, info, warn};

use crate::dispatch::DispatchSender;
use crate::source::RawFrame;

// ════════════════════════════════════════════════════════════════════════════
// Messages
// ════════════════════════════════════════════════════════════════════════════

pub enum EngineCommand {
    /// Global on/off. Turning off drops live sessions.
    SetEnabled(bool),
    /// New tolerances and bindings; live sessions keep running.
    Reconfigure { tunables: Tunables, bindings: Bindings },
    /// Terminate the thread.
    Quit,
}

/// Everything the engine thread receives.
pub enum EngineInput {
    Frame(RawFrame),
    Command(EngineCommand),
    /// A source ran out of frames.
    SourceFinished,
}

/// Published to the status display.
#[derive(Clone, Debug, PartialEq)]
pub enum EngineStatus {
    /// Decoded contact state after a frame.
    Contacts {
        device:       usize,
        finger_count: usize,
        positions:    Vec<Point>,
        stride:       Option<usize>,
        /// Peak finger count of the live session, if any.
        peak:         Option<usize>,
    },
    /// A session ended.
    Decision { device: usize, decision: GestureDecision },
    Enabled(bool),
    SourceFinished,
}

/// Totals reported when the thread exits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EngineSummary {
    pub frames:     usize,
    pub accepted:   usize,
    pub rejected:   usize,
    pub dispatched: usize,
}

// ════════════════════════════════════════════════════════════════════════════
// Engine: synchronous core
// ════════════════════════════════════════════════════════════════════════════

/// Per-device tap engines plus the shared configuration they follow.
#[derive(Debug)]
pub struct Engine {
    tunables: Tunables,
    bindings: Bindings,
    enabled:  bool,
    devices:  HashMap<usize, TapEngine>,
    summary:  EngineSummary,
}

impl Engine {
    pub fn new(tunables: Tunables, bindings: Bindings, enabled: bool) -> Self {
        Engine {
            tunables,
            bindings,
            enabled,
            devices: HashMap::new(),
            summary: EngineSummary::default(),
        }
    }

    fn device(&mut self, device: usize) -> &mut TapEngine {
        let (tunables, bindings, enabled) = (self.tunables, &self.bindings, self.enabled);
        self.devices.entry(device).or_insert_with(|| {
            debug!(device, "new device engine");
            let mut e = TapEngine::new(tunables, bindings.clone());
            e.set_enabled(enabled);
            e
        })
    }

    /// Process one frame. Returns the decoded contacts (for display) and a
    /// decision if a session ended. Disabled engines return `None` and do not
    /// decode.
    pub fn handle_frame(&mut self, frame: &RawFrame) -> Option<(Vec<Point>, Option<GestureDecision>)> {
        self.summary.frames += 1;
        if !self.enabled { return None; }

        let engine = self.device(frame.device);
        let decoded = engine.decode_raw(&frame.data, frame.finger_count, frame.timestamp);
        let decision = engine.process_frame(&decoded);

        match &decision {
            Some(d) if d.accepted => self.summary.accepted += 1,
            Some(_)               => self.summary.rejected += 1,
            None                  => {}
        }
        Some((decoded.valid_positions().collect(), decision))
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        for e in self.devices.values_mut() { e.set_enabled(enabled); }
    }

    pub fn reconfigure(&mut self, tunables: Tunables, bindings: Bindings) {
        for e in self.devices.values_mut() {
            e.set_tunables(tunables);
            e.set_bindings(bindings.clone());
        }
        self.tunables = tunables;
        self.bindings = bindings;
    }

    pub fn is_enabled(&self) -> bool { self.enabled }

    pub fn stride(&self, device: usize) -> Option<usize> {
        self.devices.get(&device).and_then(TapEngine::stride)
    }

    pub fn is_tracking(&self, device: usize) -> bool {
        self.devices.get(&device).map_or(false, |e| e.tracker().is_tracking())
    }

    pub fn peak(&self, device: usize) -> Option<usize> {
        self.devices.get(&device)?.tracker().session().map(|s| s.peak_finger_count)
    }

    pub fn summary(&self) -> EngineSummary { self.summary }
}

/// Resolve an accepted decision to the action it names.
pub fn resolve_action(decision: &GestureDecision) -> Option<TapAction> {
    let id = decision.action.as_ref()?;
    match id.as_str().parse() {
        Ok(action) => Some(action),
        Err(e) => {
            warn!(error = %e, "bound action cannot be executed");
            None
        }
    }
}

/// Log line for a decision.
pub fn log_decision(device: usize, d: &GestureDecision) {
    let ms = d.duration * 1000.0;
    match (&d.action, d.accepted) {
        (Some(action), true) => info!(
            device,
            "TAP {} fingers, {:.0}ms, moved {:.4} → {}", d.finger_count, ms, d.max_deviation, action
        ),
        _ => debug!(
            device,
            "rejected {} fingers: {}", d.finger_count, d.describe_rejections()
        ),
    }
}

// ════════════════════════════════════════════════════════════════════════════
// Engine thread
// ════════════════════════════════════════════════════════════════════════════

/// Handle to the engine thread.
pub struct EngineHandle {
    pub tx:     Sender<EngineInput>,
    handle:     JoinHandle<EngineSummary>,
}

impl EngineHandle {
    pub fn set_enabled(&self, enabled: bool) {
        let _ = self.tx.send(EngineInput::Command(EngineCommand::SetEnabled(enabled)));
    }

    pub fn reconfigure(&self, tunables: Tunables, bindings: Bindings) {
        let _ = self.tx.send(EngineInput::Command(EngineCommand::Reconfigure { tunables, bindings }));
    }

    pub fn quit(&self) {
        let _ = self.tx.send(EngineInput::Command(EngineCommand::Quit));
    }

    /// Wait for the thread to exit.
    pub fn join(self) -> EngineSummary {
        drop(self.tx);
        self.handle.join().unwrap_or_else(|_| {
            warn!("engine thread panicked");
            EngineSummary::default()
        })
    }
}

/// Spawn the engine thread.
///
/// Accepted taps go to `dispatch`. When `status` is given, every frame and
/// decision is mirrored there for display. The thread exits on
/// [`EngineCommand::Quit`], when a source finishes, or when every sender is
/// gone.
pub fn spawn_engine(
    engine:   Engine,
    dispatch: DispatchSender,
    status:   Option<Sender<EngineStatus>>,
) -> EngineHandle {
    let (tx, rx) = mpsc::channel::<EngineInput>();
    let handle = thread::spawn(move || engine_thread(engine, rx, dispatch, status));
    EngineHandle { tx, handle }
}

fn engine_thread(
    mut engine: Engine,
    rx:         Receiver<EngineInput>,
    dispatch:   DispatchSender,
    status:     Option<Sender<EngineStatus>>,
) -> EngineSummary {
    let publish = |s: EngineStatus| {
        if let Some(tx) = &status { let _ = tx.send(s); }
    };

    for input in rx {
        match input {
            EngineInput::Frame(frame) => {
                let Some((positions, decision)) = engine.handle_frame(&frame) else { continue };
                publish(EngineStatus::Contacts {
                    device:       frame.device,
                    finger_count: frame.finger_count,
                    positions,
                    stride:       engine.stride(frame.device),
                    peak:         engine.peak(frame.device),
                });

                if let Some(d) = decision {
                    log_decision(frame.device, &d);
                    if d.accepted {
                        if let Some(action) = resolve_action(&d) {
                            if dispatch.dispatch(d.finger_count, action) {
                                engine.summary.dispatched += 1;
                            }
                        }
                    }
                    publish(EngineStatus::Decision { device: frame.device, decision: d });
                }
            }
            EngineInput::Command(EngineCommand::SetEnabled(on)) => {
                info!(enabled = on, "recognition toggled");
                engine.set_enabled(on);
                publish(EngineStatus::Enabled(on));
            }
            EngineInput::Command(EngineCommand::Reconfigure { tunables, bindings }) => {
                debug!(?tunables, "reconfigured");
                engine.reconfigure(tunables, bindings);
            }
            EngineInput::Command(EngineCommand::Quit) => break,
            EngineInput::SourceFinished => {
                publish(EngineStatus::SourceFinished);
                break;
            }
        }
    }
    engine.summary()
}

// ════════════════════════════════════════════════════════════════════════════
// Tests
// ════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::Dispatcher;
    use crate::source::{finger_row, SimGesture};
    use tap_actions::RecordingExecutor;
    use tap_frame::FrameEncoder;
    use tap_session::ActionId;

    fn bindings() -> Bindings {
        Bindings::default()
            .with(4, ActionId::new("middle_click"))
            .with(5, ActionId::new("not_an_action"))
    }

    fn frames(device: usize, gesture: SimGesture, t0: f64) -> Vec<RawFrame> {
        let enc = FrameEncoder::new(88);
        gesture.script(0.008).into_iter().map(|f| RawFrame {
            device,
            data:         enc.encode(&f.positions),
            finger_count: f.positions.len(),
            timestamp:    t0 + f.offset,
        }).collect()
    }

    // ── synchronous core ──────────────────────────────────────────────────
    #[test]
    fn devices_are_tracked_independently() {
        let mut e = Engine::new(Tunables::default(), bindings(), true);
        let a = frames(0, SimGesture::Tap(4), 10.0);
        let b = frames(1, SimGesture::SlowPress(4), 10.0);

        // Interleave the two devices frame by frame.
        let mut decisions = Vec::new();
        for i in 0..a.len().max(b.len()) {
            for f in [a.get(i), b.get(i)].into_iter().flatten() {
                if let Some((_, Some(d))) = e.handle_frame(f) {
                    decisions.push((f.device, d.accepted));
                }
            }
        }
        assert_eq!(decisions, vec![(0, true), (1, false)]);
        assert_eq!(e.stride(0), Some(88));
        assert_eq!(e.stride(1), Some(88));
    }

    #[test]
    fn disabled_engine_ignores_frames_entirely() {
        let mut e = Engine::new(Tunables::default(), bindings(), false);
        for f in frames(0, SimGesture::Tap(4), 0.0) {
            assert!(e.handle_frame(&f).is_none());
        }
        // Nothing was decoded, so no stride was learned.
        assert_eq!(e.stride(0), None);
        assert_eq!(e.summary().accepted, 0);
    }

    #[test]
    fn disabling_mid_session_drops_it() {
        let mut e = Engine::new(Tunables::default(), bindings(), true);
        let fs = frames(0, SimGesture::Tap(4), 0.0);
        e.handle_frame(&fs[0]);
        assert!(e.is_tracking(0));
        e.set_enabled(false);
        e.set_enabled(true);
        assert!(!e.is_tracking(0));

        // The next frame opens a fresh session, so duration counts from it.
        let d = fs[1..].iter().filter_map(|f| e.handle_frame(f)).find_map(|(_, d)| d).unwrap();
        let expected = fs.last().unwrap().timestamp - fs[1].timestamp;
        assert!((d.duration - expected).abs() < 1e-9);
    }

    #[test]
    fn reconfigure_reaches_existing_devices() {
        let mut e = Engine::new(Tunables::default(), Bindings::default(), true);
        let first = frames(0, SimGesture::Tap(4), 0.0);
        let last = first.iter().filter_map(|f| e.handle_frame(f)).filter_map(|(_, d)| d).last();
        assert!(!last.unwrap().accepted);

        e.reconfigure(Tunables::default(), bindings());
        let again = frames(0, SimGesture::Tap(4), 1.0);
        let last = again.iter().filter_map(|f| e.handle_frame(f)).filter_map(|(_, d)| d).last();
        assert!(last.unwrap().accepted);
    }

    #[test]
    fn unknown_bound_id_resolves_to_nothing() {
        let mut e = Engine::new(Tunables::default(), bindings(), true);
        let d = frames(0, SimGesture::Tap(5), 0.0)
            .iter()
            .filter_map(|f| e.handle_frame(f))
            .find_map(|(_, d)| d)
            .unwrap();
        assert!(d.accepted);
        assert_eq!(resolve_action(&d), None);
    }

    #[test]
    fn decoded_positions_are_reported() {
        let mut e = Engine::new(Tunables::default(), bindings(), true);
        let enc = FrameEncoder::new(96);
        let row = finger_row(4, Point::new(0.5, 0.5));
        let (positions, _) = e.handle_frame(&RawFrame {
            device: 0, data: enc.encode(&row), finger_count: 4, timestamp: 0.0,
        }).unwrap();
        assert_eq!(positions.len(), 4);
        assert!((positions[0].x - row[0].x).abs() < 1e-6);
    }

    #[test]
    fn peak_follows_the_live_session() {
        let mut e = Engine::new(Tunables::default(), bindings(), true);
        let fs = frames(0, SimGesture::Ramp, 0.0);
        assert_eq!(e.peak(0), None);
        e.handle_frame(&fs[0]);
        assert_eq!(e.peak(0), Some(3));

        let joined = fs.iter().position(|f| f.finger_count == 4).unwrap();
        e.handle_frame(&fs[joined]);
        assert_eq!(e.peak(0), Some(4));

        for f in &fs[joined + 1..] { e.handle_frame(f); }
        assert_eq!(e.peak(0), None);
    }

    // ── thread ────────────────────────────────────────────────────────────
    #[test]
    fn thread_dispatches_accepted_taps_and_reports_status() {
        let rec = RecordingExecutor::new();
        let dispatcher = Dispatcher::spawn(Box::new(rec.clone()));
        let (status_tx, status_rx) = mpsc::channel();
        let engine = spawn_engine(
            Engine::new(Tunables::default(), bindings(), true),
            dispatcher.sender(),
            Some(status_tx),
        );

        for f in frames(0, SimGesture::Tap(4), 0.0) {
            engine.tx.send(EngineInput::Frame(f)).unwrap();
        }
        for f in frames(0, SimGesture::Wiggle, 1.0) {
            engine.tx.send(EngineInput::Frame(f)).unwrap();
        }
        engine.tx.send(EngineInput::SourceFinished).unwrap();

        let summary = engine.join();
        dispatcher.shutdown();

        assert_eq!(summary.accepted, 1);
        assert_eq!(summary.rejected, 1);
        assert_eq!(summary.dispatched, 1);
        assert_eq!(rec.recorded(), vec![TapAction::MiddleClick]);

        let statuses: Vec<EngineStatus> = status_rx.try_iter().collect();
        let decisions = statuses.iter().filter(|s| matches!(s, EngineStatus::Decision { .. })).count();
        assert_eq!(decisions, 2);
        assert_eq!(statuses.last(), Some(&EngineStatus::SourceFinished));
    }

    #[test]
    fn toggle_command_is_published() {
        let dispatcher = Dispatcher::spawn(Box::new(RecordingExecutor::new()));
        let (status_tx, status_rx) = mpsc::channel();
        let engine = spawn_engine(
            Engine::new(Tunables::default(), bindings(), true),
            dispatcher.sender(),
            Some(status_tx),
        );
        engine.set_enabled(false);
        engine.quit();
        engine.join();
        assert_eq!(status_rx.try_iter().collect::<Vec<_>>(), vec![EngineStatus::Enabled(false)]);
    }
}
