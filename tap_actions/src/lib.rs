//! # tap_actions
//!
//! The actions a tap can be bound to, and the executors that carry them out.
//!
//! Every [`TapAction`] resolves to a [`Synthesis`]: a mouse click at the
//! current pointer position, a key combination, or the Launchpad key. The
//! [`ActionExecutor`] trait turns that into real input events.
//!
//! | Executor | Platform | Effect |
//! |---|---|---|
//! | [`QuartzExecutor`] | macOS | posts CGEvents to the HID event tap |
//! | [`NullExecutor`]   | any   | logs the action, posts nothing |
//! | [`RecordingExecutor`] | any | appends to a shared list (tests, replay) |
//!
//! ## Catalogue
//!
//! | id | name | category | input |
//! |---|---|---|---|
//! | `middle_click`    | Middle Click    | Mouse   | button 2 |
//! | `right_click`     | Right Click     | Mouse   | right button |
//! | `close_tab`       | Close Tab       | Browser | ⌘W |
//! | `new_tab`         | New Tab         | Browser | ⌘T |
//! | `reopen_tab`      | Reopen Tab      | Browser | ⇧⌘T |
//! | `refresh_page`    | Refresh Page    | Browser | ⌘R |
//! | `copy`            | Copy            | Edit    | ⌘C |
//! | `paste`           | Paste           | Edit    | ⌘V |
//! | `undo`            | Undo            | Edit    | ⌘Z |
//! | `mission_control` | Mission Control | System  | ⌃↑ |
//! | `launchpad`       | Launchpad       | System  | key 160 |
//! | `spotlight`       | Spotlight       | System  | ⌘Space |

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use tracing::{info, warn};

#[cfg(target_os = "macos")]
mod quartz;

#[cfg(target_os = "macos")]
pub use quartz::QuartzExecutor;

// ════════════════════════════════════════════════════════════════════════════
// ActionError
// ════════════════════════════════════════════════════════════════════════════

#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("unknown action '{0}'")]
    Unknown(String),

    #[error("failed to execute {action}: {reason}")]
    Execution { action: TapAction, reason: String },
}

// ════════════════════════════════════════════════════════════════════════════
// Virtual key codes and modifier flags (ANSI layout)
// ════════════════════════════════════════════════════════════════════════════

pub mod keys {
    pub const W:        u16 = 0x0D;
    pub const T:        u16 = 0x11;
    pub const R:        u16 = 0x0F;
    pub const C:        u16 = 0x08;
    pub const V:        u16 = 0x09;
    pub const Z:        u16 = 0x06;
    pub const UP_ARROW: u16 = 0x7E;
    pub const SPACE:    u16 = 0x31;
    /// Dedicated Launchpad key on Apple keyboards.
    pub const LAUNCHPAD: u16 = 160;
}

/// Modifier mask in CGEventFlags bit layout.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Modifiers(pub u64);

impl Modifiers {
    pub const NONE:    Modifiers = Modifiers(0);
    pub const SHIFT:   Modifiers = Modifiers(0x0002_0000);
    pub const CONTROL: Modifiers = Modifiers(0x0004_0000);
    pub const COMMAND: Modifiers = Modifiers(0x0010_0000);

    pub const fn union(self, other: Modifiers) -> Modifiers { Modifiers(self.0 | other.0) }
    pub const fn contains(self, other: Modifiers) -> bool { self.0 & other.0 == other.0 }
    pub fn bits(self) -> u64 { self.0 }
}

impl fmt::Display for Modifiers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.contains(Modifiers::CONTROL) { f.write_str("⌃")?; }
        if self.contains(Modifiers::SHIFT)   { f.write_str("⇧")?; }
        if self.contains(Modifiers::COMMAND) { f.write_str("⌘")?; }
        Ok(())
    }
}

// ════════════════════════════════════════════════════════════════════════════
// Synthesis: what input an action produces
// ════════════════════════════════════════════════════════════════════════════

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MouseButton {
    Right,
    /// "Other" button number 2.
    Center,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Synthesis {
    /// Press and release at the current pointer location.
    Click(MouseButton),
    /// Key down and up with `modifiers` held.
    Keys { key: u16, modifiers: Modifiers },
    /// Launchpad key, or opening the Launchpad app when no key event can be
    /// created.
    Launchpad,
}

// ════════════════════════════════════════════════════════════════════════════
// TapAction: the catalogue
// ════════════════════════════════════════════════════════════════════════════

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Category {
    Mouse,
    Browser,
    Edit,
    System,
}

impl Category {
    pub const ALL: [Category; 4] = [Category::Mouse, Category::Browser, Category::Edit, Category::System];

    pub fn label(self) -> &'static str {
        match self {
            Category::Mouse   => "Mouse",
            Category::Browser => "Browser",
            Category::Edit    => "Edit",
            Category::System  => "System",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TapAction {
    MiddleClick,
    RightClick,
    CloseTab,
    NewTab,
    ReopenTab,
    RefreshPage,
    Copy,
    Paste,
    Undo,
    MissionControl,
    Launchpad,
    Spotlight,
}

impl TapAction {
    pub const ALL: [TapAction; 12] = [
        TapAction::MiddleClick,
        TapAction::RightClick,
        TapAction::CloseTab,
        TapAction::NewTab,
        TapAction::ReopenTab,
        TapAction::RefreshPage,
        TapAction::Copy,
        TapAction::Paste,
        TapAction::Undo,
        TapAction::MissionControl,
        TapAction::Launchpad,
        TapAction::Spotlight,
    ];

    /// Stable identifier used in config files and on the command line.
    pub fn id(self) -> &'static str {
        match self {
            TapAction::MiddleClick    => "middle_click",
            TapAction::RightClick     => "right_click",
            TapAction::CloseTab       => "close_tab",
            TapAction::NewTab         => "new_tab",
            TapAction::ReopenTab      => "reopen_tab",
            TapAction::RefreshPage    => "refresh_page",
            TapAction::Copy           => "copy",
            TapAction::Paste          => "paste",
            TapAction::Undo           => "undo",
            TapAction::MissionControl => "mission_control",
            TapAction::Launchpad      => "launchpad",
            TapAction::Spotlight      => "spotlight",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            TapAction::MiddleClick    => "Middle Click",
            TapAction::RightClick     => "Right Click",
            TapAction::CloseTab       => "Close Tab",
            TapAction::NewTab         => "New Tab",
            TapAction::ReopenTab      => "Reopen Tab",
            TapAction::RefreshPage    => "Refresh Page",
            TapAction::Copy           => "Copy",
            TapAction::Paste          => "Paste",
            TapAction::Undo           => "Undo",
            TapAction::MissionControl => "Mission Control",
            TapAction::Launchpad      => "Launchpad",
            TapAction::Spotlight      => "Spotlight",
        }
    }

    pub fn category(self) -> Category {
        match self {
            TapAction::MiddleClick | TapAction::RightClick => Category::Mouse,
            TapAction::CloseTab | TapAction::NewTab
            | TapAction::ReopenTab | TapAction::RefreshPage => Category::Browser,
            TapAction::Copy | TapAction::Paste | TapAction::Undo => Category::Edit,
            TapAction::MissionControl | TapAction::Launchpad
            | TapAction::Spotlight => Category::System,
        }
    }

    pub fn synthesis(self) -> Synthesis {
        use Modifiers as M;
        let combo = |key, modifiers| Synthesis::Keys { key, modifiers };
        match self {
            TapAction::MiddleClick    => Synthesis::Click(MouseButton::Center),
            TapAction::RightClick     => Synthesis::Click(MouseButton::Right),
            TapAction::CloseTab       => combo(keys::W, M::COMMAND),
            TapAction::NewTab         => combo(keys::T, M::COMMAND),
            TapAction::ReopenTab      => combo(keys::T, M::COMMAND.union(M::SHIFT)),
            TapAction::RefreshPage    => combo(keys::R, M::COMMAND),
            TapAction::Copy           => combo(keys::C, M::COMMAND),
            TapAction::Paste          => combo(keys::V, M::COMMAND),
            TapAction::Undo           => combo(keys::Z, M::COMMAND),
            TapAction::MissionControl => combo(keys::UP_ARROW, M::CONTROL),
            TapAction::Launchpad      => Synthesis::Launchpad,
            TapAction::Spotlight      => combo(keys::SPACE, M::COMMAND),
        }
    }

    /// Human-readable input, e.g. `⇧⌘T`.
    pub fn shortcut(self) -> String {
        match self.synthesis() {
            Synthesis::Click(MouseButton::Center) => "middle button".to_string(),
            Synthesis::Click(MouseButton::Right)  => "right button".to_string(),
            Synthesis::Launchpad                  => "Launchpad key".to_string(),
            Synthesis::Keys { key, modifiers }    => format!("{}{}", modifiers, key_label(key)),
        }
    }

    /// Actions in `category`, in catalogue order.
    pub fn in_category(category: Category) -> impl Iterator<Item = TapAction> {
        Self::ALL.into_iter().filter(move |a| a.category() == category)
    }
}

fn key_label(key: u16) -> &'static str {
    match key {
        keys::W        => "W",
        keys::T        => "T",
        keys::R        => "R",
        keys::C        => "C",
        keys::V        => "V",
        keys::Z        => "Z",
        keys::UP_ARROW => "↑",
        keys::SPACE    => "Space",
        _              => "?",
    }
}

impl fmt::Display for TapAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for TapAction {
    type Err = ActionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TapAction::ALL
            .into_iter()
            .find(|a| a.id() == s)
            .ok_or_else(|| ActionError::Unknown(s.to_string()))
    }
}

// ════════════════════════════════════════════════════════════════════════════
// ActionExecutor: abstraction over Quartz / null / recording
// ════════════════════════════════════════════════════════════════════════════

/// Carries out actions. Implementations may block for a few milliseconds
/// (press/release gap), so they run off the engine thread.
pub trait ActionExecutor: Send {
    fn execute(&mut self, action: TapAction) -> Result<(), ActionError>;

    fn name(&self) -> &'static str;
}

// ── null backend ──────────────────────────────────────────────────────────

/// Logs instead of posting events. Used off macOS and in dry runs.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullExecutor;

impl ActionExecutor for NullExecutor {
    fn execute(&mut self, action: TapAction) -> Result<(), ActionError> {
        info!(action = action.id(), input = %action.shortcut(), "dry run: action not posted");
        Ok(())
    }

    fn name(&self) -> &'static str { "null" }
}

// ── recording backend ─────────────────────────────────────────────────────

/// Appends every action to a list shared with its clones.
#[derive(Clone, Debug, Default)]
pub struct RecordingExecutor {
    log: Arc<Mutex<Vec<TapAction>>>,
}

impl RecordingExecutor {
    pub fn new() -> Self { Self::default() }

    /// Snapshot of everything executed so far.
    pub fn recorded(&self) -> Vec<TapAction> {
        self.log.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

impl ActionExecutor for RecordingExecutor {
    fn execute(&mut self, action: TapAction) -> Result<(), ActionError> {
        self.log.lock().unwrap_or_else(|p| p.into_inner()).push(action);
        Ok(())
    }

    fn name(&self) -> &'static str { "recording" }
}

// ════════════════════════════════════════════════════════════════════════════
// Platform selection
// ════════════════════════════════════════════════════════════════════════════

/// Event-posting executor for this platform, or [`NullExecutor`] where there
/// is none.
pub fn platform_executor() -> Box<dyn ActionExecutor> {
    #[cfg(target_os = "macos")]
    {
        if !accessibility_trusted() {
            warn!("accessibility access not granted; posted events will be ignored by the system");
        }
        Box::new(QuartzExecutor::new())
    }
    #[cfg(not(target_os = "macos"))]
    {
        warn!("no event backend on this platform; actions are logged only");
        Box::new(NullExecutor)
    }
}

/// Whether this process may post input events. Platforms without an
/// accessibility gate always report true.
pub fn accessibility_trusted() -> bool {
    #[cfg(target_os = "macos")]
    { quartz::accessibility_trusted() }
    #[cfg(not(target_os = "macos"))]
    { true }
}

// ════════════════════════════════════════════════════════════════════════════
// Tests
// ════════════════════════════════════════════════════════════════════════════
