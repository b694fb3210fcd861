//! # trackpad_tap
//!
//! Recognizes short, still multi-finger taps on a trackpad and turns them
//! into mouse clicks and keyboard shortcuts.
//!
//! ## Pipeline
//!
//! ```text
//!  FrameSource ──RawFrame──▶ engine thread ──TapAction──▶ Dispatcher ──▶ ActionExecutor
//!  (sim / multitouch /        (TapEngine per                 (FIFO thread)   (Quartz / null)
//!   replay)                    device)
//!                                  │
//!                                  └──EngineStatus──▶ status window / log
//! ```
//!
//! ## Default bindings
//!
//! | Fingers | Action |
//! |---|---|
//! | 3 | disabled |
//! | 4 | middle click |
//! | 5 | disabled |
//!
//! ## Feature flags
//!
//! * (default): **Simulation mode**: keyboard keys synthesize raw frames.
//! * `multitouch`: **Hardware mode**: real trackpads via MultitouchSupport
//!   (macOS only).
//!
//! ### Simulation keyboard shortcuts
//!
//! | Key | Frames produced |
//! |---|---|
//! | `3` / `4` / `5` | quick still tap with that many fingers |
//! | `Shift` + `3`/`4`/`5` | slow press (too long) |
//! | `W` | four fingers that wiggle (too much movement) |
//! | `R` | three fingers, a fourth joins, then lift |
//! | `Space` | toggle recognition on/off |
//! | `Q` / `Escape` | quit |

pub mod app;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod engine;
#[cfg(all(feature = "multitouch", target_os = "macos"))]
pub mod multitouch;
pub mod replay;
pub mod source;
pub mod visualizer;

/// Result type alias for trackpad_tap.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Trace line {line}: {message}")]
    Trace { line: usize, message: String },

    #[error("Window error: {0}")]
    Window(String),

    #[error("Device error: {0}")]
    Device(String),

    #[error("Signal handler error: {0}")]
    Signal(#[from] ctrlc::Error),

    #[error(transparent)]
    Action(#[from] tap_actions::ActionError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("Config write error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
