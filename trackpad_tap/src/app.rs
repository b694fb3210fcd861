//! Top-level application wiring.
//!
//! [`run`] starts the dispatcher, the engine thread and one frame source, then
//! either drives the status window at ~60 fps or waits headless for Ctrl-C
//! or the end of a replay. [`AppState`] is the window's view of the engine,
//! built only from [`EngineStatus`] and [`DispatchReport`] messages.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tap_actions::{platform_executor, TapAction};
use tap_frame::Point;
use tap_session::GestureDecision;
use tracing::{info, warn};

use crate::config::Config;
use crate::dispatch::{DispatchReport, Dispatcher};
use crate::engine::{spawn_engine, Engine, EngineCommand, EngineHandle, EngineInput, EngineStatus, EngineSummary};
use crate::replay::{evaluate_trace, load_trace, ReplaySource};
use crate::source::{spawn_frame_source, SimFrameSource, SimInput};
use crate::visualizer::{UiCommand, Visualizer};
use crate::{Error, Result};

/// Decisions kept for the status window.
pub const HISTORY_LEN: usize = 12;

// ════════════════════════════════════════════════════════════════════════════
// RunOptions
// ════════════════════════════════════════════════════════════════════════════

/// Where frames come from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceKind {
    /// Keyboard-driven synthetic frames (needs the window).
    Simulator,
    /// Real trackpads; requires the `multitouch` feature on macOS.
    Multitouch,
    /// A recorded JSON-lines trace.
    Replay(PathBuf),
}

impl SourceKind {
    pub fn label(&self) -> &'static str {
        match self {
            SourceKind::Simulator  => "simulator",
            SourceKind::Multitouch => "multitouch",
            SourceKind::Replay(_)  => "replay",
        }
    }
}

#[derive(Clone, Debug)]
pub struct RunOptions {
    pub source:   SourceKind,
    pub headless: bool,
    /// Pace replays by their timestamps.
    pub realtime: bool,
}

// ════════════════════════════════════════════════════════════════════════════
// AppState
// ════════════════════════════════════════════════════════════════════════════

pub struct AppState {
    enabled:      bool,
    contacts:     Vec<Point>,
    finger_count: usize,
    peak:         Option<usize>,
    stride:       Option<usize>,
    history:      VecDeque<GestureDecision>,
    source_label: &'static str,
    backend:      &'static str,
    finished:     bool,
    pub status:   String,
}

impl AppState {
    pub fn new(enabled: bool, source_label: &'static str, backend: &'static str) -> Self {
        AppState {
            enabled,
            contacts:     Vec::new(),
            finger_count: 0,
            peak:         None,
            stride:       None,
            history:      VecDeque::with_capacity(HISTORY_LEN),
            source_label,
            backend,
            finished:     false,
            status:       format!("Ready: {} source, {} executor", source_label, backend),
        }
    }

    pub fn handle_status(&mut self, status: EngineStatus) {
        match status {
            EngineStatus::Contacts { finger_count, positions, stride, peak, .. } => {
                self.finger_count = finger_count;
                self.contacts = positions;
                self.stride = stride;
                self.peak = peak;
            }
            EngineStatus::Decision { decision, .. } => {
                self.status = decision_line(&decision);
                if self.history.len() == HISTORY_LEN {
                    self.history.pop_back();
                }
                self.history.push_front(decision);
            }
            EngineStatus::Enabled(on) => {
                self.enabled = on;
                if !on {
                    self.contacts.clear();
                    self.finger_count = 0;
                    self.peak = None;
                }
                self.status = format!("Recognition {}", if on { "enabled" } else { "disabled" });
            }
            EngineStatus::SourceFinished => {
                self.finished = true;
                self.status = format!("{} finished", self.source_label);
            }
        }
    }

    pub fn handle_report(&mut self, report: &DispatchReport) {
        if let Some(e) = &report.error {
            self.status = format!("{} failed: {}", report.action.id(), e);
        }
    }

    /// Flip the local flag; the engine confirms with [`EngineStatus::Enabled`].
    pub fn toggle_enabled(&mut self) -> bool {
        self.enabled = !self.enabled;
        self.enabled
    }

    /// Newest first, with whether each was accepted.
    pub fn history_lines(&self) -> impl Iterator<Item = (String, bool)> + '_ {
        self.history.iter().map(|d| (decision_line(d), d.accepted))
    }

    pub fn is_enabled(&self)       -> bool           { self.enabled }
    pub fn contacts(&self)         -> &[Point]       { &self.contacts }
    pub fn finger_count(&self)     -> usize          { self.finger_count }
    pub fn peak(&self)             -> Option<usize>  { self.peak }
    pub fn stride(&self)           -> Option<usize>  { self.stride }
    pub fn source_label(&self)     -> &'static str   { self.source_label }
    pub fn backend(&self)          -> &'static str   { self.backend }
    pub fn is_finished(&self)      -> bool           { self.finished }
    pub fn history(&self)          -> &VecDeque<GestureDecision> { &self.history }
}

/// One-line summary of a decision, shared by the window and `trace`.
pub fn decision_line(d: &GestureDecision) -> String {
    let ms = d.duration * 1000.0;
    match (&d.action, d.accepted) {
        (Some(action), true) => format!(
            "{} fingers {:.0}ms moved {:.4} -> {}", d.finger_count, ms, d.max_deviation, action
        ),
        _ => format!("{} fingers rejected: {}", d.finger_count, d.describe_rejections()),
    }
}

// ════════════════════════════════════════════════════════════════════════════
// Running sources
// ════════════════════════════════════════════════════════════════════════════

/// The started frame source plus whatever steers it.
struct RunningSource {
    handle: JoinHandle<()>,
    sim_tx: Option<Sender<SimInput>>,
    #[cfg(all(feature = "multitouch", target_os = "macos"))]
    control: Option<crate::multitouch::MultitouchControl>,
}

impl RunningSource {
    fn restart(&self) {
        #[cfg(all(feature = "multitouch", target_os = "macos"))]
        if let Some(c) = &self.control {
            c.restart();
            return;
        }
        info!("restart only applies to hardware touch detection");
    }

    /// Ask the source to stop and wait for its thread.
    fn stop(self) {
        if let Some(tx) = &self.sim_tx {
            let _ = tx.send(SimInput::Quit);
        }
        #[cfg(all(feature = "multitouch", target_os = "macos"))]
        if let Some(c) = &self.control {
            c.stop();
        }
        if self.handle.join().is_err() {
            warn!("frame source thread panicked");
        }
    }
}

fn start_source(config: &Config, opts: &RunOptions, tx: Sender<EngineInput>) -> Result<RunningSource> {
    match &opts.source {
        SourceKind::Simulator => {
            if opts.headless {
                return Err(Error::Config(
                    "the simulator is driven from the status window; drop --headless".to_string(),
                ));
            }
            let (sim_tx, sim_rx) = mpsc::channel::<SimInput>();
            let sim = SimFrameSource::new(
                sim_rx,
                config.simulator.stride,
                Duration::from_millis(config.simulator.frame_interval_ms),
            );
            Ok(RunningSource {
                handle: spawn_frame_source(sim, tx),
                sim_tx: Some(sim_tx),
                #[cfg(all(feature = "multitouch", target_os = "macos"))]
                control: None,
            })
        }
        SourceKind::Replay(path) => {
            let frames = load_trace(path)?;
            info!(path = %path.display(), frames = frames.len(), realtime = opts.realtime, "replaying trace");
            Ok(RunningSource {
                handle: spawn_frame_source(ReplaySource::new(frames, opts.realtime), tx),
                sim_tx: None,
                #[cfg(all(feature = "multitouch", target_os = "macos"))]
                control: None,
            })
        }
        #[cfg(all(feature = "multitouch", target_os = "macos"))]
        SourceKind::Multitouch => {
            if !tap_actions::accessibility_trusted() {
                warn!("accessibility access not granted; taps are detected but actions may not post");
            }
            let source = crate::multitouch::MultitouchSource::new();
            let control = source.control();
            Ok(RunningSource {
                handle: spawn_frame_source(source, tx),
                sim_tx: None,
                control: Some(control),
            })
        }
        #[cfg(not(all(feature = "multitouch", target_os = "macos")))]
        SourceKind::Multitouch => Err(Error::Device(
            "hardware touch detection needs macOS and the `multitouch` feature".to_string(),
        )),
    }
}

// ════════════════════════════════════════════════════════════════════════════
// run(): the main application loop
// ════════════════════════════════════════════════════════════════════════════

/// Run until the window closes, Ctrl-C (headless), or a replay ends
/// (headless).
pub fn run(config: &Config, opts: RunOptions) -> Result<EngineSummary> {
    let dispatcher = Dispatcher::spawn(platform_executor());
    let (status_tx, status_rx) = mpsc::channel::<EngineStatus>();
    let engine = spawn_engine(
        Engine::new(config.tunables(), config.bindings(), config.enabled),
        dispatcher.sender(),
        (!opts.headless).then_some(status_tx),
    );

    let source = match start_source(config, &opts, engine.tx.clone()) {
        Ok(s) => s,
        Err(e) => {
            engine.quit();
            engine.join();
            dispatcher.shutdown();
            return Err(e);
        }
    };
    info!(
        source = opts.source.label(),
        executor = dispatcher.backend(),
        enabled = config.enabled,
        "touch detection running"
    );

    let loop_result = if opts.headless {
        wait_headless(&engine)
    } else {
        run_windowed(&engine, &source, &status_rx, &dispatcher, opts.source.label(), config.enabled)
    };
    if loop_result.is_err() {
        engine.quit();
    }

    let summary = engine.join();
    source.stop();
    let failed = dispatcher.shutdown().iter().filter(|r| r.error.is_some()).count();
    info!(
        frames = summary.frames,
        accepted = summary.accepted,
        rejected = summary.rejected,
        dispatched = summary.dispatched,
        failed,
        "stopped"
    );
    loop_result.map(|_| summary)
}

fn wait_headless(engine: &EngineHandle) -> Result<()> {
    let tx = engine.tx.clone();
    ctrlc::set_handler(move || {
        let _ = tx.send(EngineInput::Command(EngineCommand::Quit));
    })?;
    info!("running headless; press Ctrl-C to stop");
    Ok(())
}

fn run_windowed(
    engine:     &EngineHandle,
    source:     &RunningSource,
    status_rx:  &Receiver<EngineStatus>,
    dispatcher: &Dispatcher,
    label:      &'static str,
    enabled:    bool,
) -> Result<()> {
    let mut vis = Visualizer::new(source.sim_tx.clone())?;
    let mut app = AppState::new(enabled, label, dispatcher.backend());

    while vis.is_open() {
        // 1. Window input
        match vis.poll_input() {
            Some(UiCommand::Quit) => break,
            Some(UiCommand::ToggleEnabled) => engine.set_enabled(app.toggle_enabled()),
            Some(UiCommand::Restart) => source.restart(),
            None => {}
        }

        // 2. Engine and dispatcher messages
        for s in status_rx.try_iter() { app.handle_status(s); }
        for r in dispatcher.drain_reports() { app.handle_report(&r); }

        // 3. Render
        vis.render(&app);
    }

    engine.quit();
    Ok(())
}

// ════════════════════════════════════════════════════════════════════════════
// One-shot commands
// ════════════════════════════════════════════════════════════════════════════

/// Decode a recorded trace offline. No actions are executed.
pub fn evaluate_file(config: &Config, path: &Path) -> Result<Vec<(usize, GestureDecision)>> {
    let frames = load_trace(path)?;
    let mut engine = Engine::new(config.tunables(), config.bindings(), true);
    Ok(evaluate_trace(&mut engine, &frames))
}

/// Run one action through the platform executor after `delay`.
pub fn test_action(action: TapAction, delay: Duration) -> Result<()> {
    let mut executor = platform_executor();
    info!(action = action.id(), executor = executor.name(), "running in {:?}", delay);
    thread::sleep(delay);
    executor.execute(action)?;
    Ok(())
}

// ════════════════════════════════════════════════════════════════════════════
// Tests
// ════════════════════════════════════════════════════════════════════════════
