//! Action dispatch thread.
//!
//! Accepted taps are queued here and executed strictly in arrival order. The
//! engine only ever enqueues; posting input events (with their press/release
//! gap) happens on this thread.

use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

use tap_actions::{ActionExecutor, TapAction};
use tracing::{info, warn};

// ════════════════════════════════════════════════════════════════════════════
// DispatchCommand: sent to the dispatch thread
// ════════════════════════════════════════════════════════════════════════════

pub enum DispatchCommand {
    /// Execute `action` for a tap with `finger_count` fingers.
    Run { finger_count: usize, action: TapAction },
    /// Finish queued work, then terminate the thread.
    Quit,
}

// ════════════════════════════════════════════════════════════════════════════
// DispatchReport: sent back for the status display
// ════════════════════════════════════════════════════════════════════════════

/// Outcome of one executed action.
#[derive(Clone, Debug, PartialEq)]
pub struct DispatchReport {
    pub finger_count: usize,
    pub action:       TapAction,
    /// Error text when the executor failed.
    pub error:        Option<String>,
}

// ════════════════════════════════════════════════════════════════════════════
// DispatchSender: cloneable enqueue handle
// ════════════════════════════════════════════════════════════════════════════

#[derive(Clone, Debug)]
pub struct DispatchSender {
    tx: Sender<DispatchCommand>,
}

impl DispatchSender {
    /// Enqueue without waiting. Returns false if the thread has exited.
    pub fn dispatch(&self, finger_count: usize, action: TapAction) -> bool {
        self.tx.send(DispatchCommand::Run { finger_count, action }).is_ok()
    }
}

// ════════════════════════════════════════════════════════════════════════════
// Dispatcher: the thread handle
// ════════════════════════════════════════════════════════════════════════════

/// Handle to the dispatch thread.
pub struct Dispatcher {
    sender:    DispatchSender,
    report_rx: Receiver<DispatchReport>,
    handle:    Option<JoinHandle<()>>,
    backend:   &'static str,
}

impl Dispatcher {
    /// Spawn the dispatch thread around `executor`.
    pub fn spawn(executor: Box<dyn ActionExecutor>) -> Self {
        let (tx, rx) = mpsc::channel::<DispatchCommand>();
        let (report_tx, report_rx) = mpsc::channel::<DispatchReport>();
        let backend = executor.name();

        let handle = thread::Builder::new()
            .name("tap-dispatch".to_string())
            .spawn(move || dispatch_thread(executor, rx, report_tx))
            .ok();
        if handle.is_none() {
            warn!("could not spawn dispatch thread; actions will be dropped");
        }

        Dispatcher { sender: DispatchSender { tx }, report_rx, handle, backend }
    }

    pub fn sender(&self) -> DispatchSender { self.sender.clone() }

    pub fn backend(&self) -> &'static str { self.backend }

    pub fn dispatch(&self, finger_count: usize, action: TapAction) -> bool {
        self.sender.dispatch(finger_count, action)
    }

    /// Drain any pending reports (non-blocking).
    pub fn drain_reports(&self) -> Vec<DispatchReport> {
        self.report_rx.try_iter().collect()
    }

    /// Run everything already queued, then stop the thread.
    pub fn shutdown(mut self) -> Vec<DispatchReport> {
        let _ = self.sender.tx.send(DispatchCommand::Quit);
        if let Some(h) = self.handle.take() {
            if h.join().is_err() {
                warn!("dispatch thread panicked");
            }
        }
        self.drain_reports()
    }
}

// ════════════════════════════════════════════════════════════════════════════
// dispatch_thread: the actual loop
// ════════════════════════════════════════════════════════════════════════════

fn dispatch_thread(
    mut executor: Box<dyn ActionExecutor>,
    rx:           Receiver<DispatchCommand>,
    report_tx:    Sender<DispatchReport>,
) {
    for cmd in rx {
        let (finger_count, action) = match cmd {
            DispatchCommand::Run { finger_count, action } => (finger_count, action),
            DispatchCommand::Quit => break,
        };

        let error = match executor.execute(action) {
            Ok(()) => {
                info!(fingers = finger_count, action = action.id(), "action executed");
                None
            }
            Err(e) => {
                warn!(fingers = finger_count, action = action.id(), error = %e, "action failed");
                Some(e.to_string())
            }
        };
        let _ = report_tx.send(DispatchReport { finger_count, action, error });
    }
}

// ════════════════════════════════════════════════════════════════════════════
// Tests
// ════════════════════════════════════════════════════════════════════════════
