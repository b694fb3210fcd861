//! Quartz event posting.
//!
//! Every event is created with a null event source and posted to the HID
//! event tap, so it is indistinguishable from hardware input. Press and
//! release are separated by [`PRESS_GAP`].
//!
//! # Permissions
//!
//! Posting requires Accessibility access. Without it the calls succeed but
//! the window server drops the events.

use std::ffi::c_void;
use std::process::Command;
use std::ptr;
use std::thread;
use std::time::Duration;

use core_foundation::base::{CFRelease, CFTypeRef};
use tracing::{debug, warn};

use crate::{keys, ActionError, ActionExecutor, Modifiers, MouseButton, Synthesis, TapAction};

/// Delay between the down and up halves of a click or key press.
pub const PRESS_GAP: Duration = Duration::from_millis(15);

const LAUNCHPAD_APP: &str = "/System/Applications/Launchpad.app";

type CGEventRef = CFTypeRef;
type CGEventSourceRef = *const c_void;

#[repr(C)]
#[derive(Copy, Clone, Debug)]
struct CGPoint {
    x: f64,
    y: f64,
}

// CGEventType values
const CG_EVENT_RIGHT_MOUSE_DOWN: u32 = 3;
const CG_EVENT_RIGHT_MOUSE_UP:   u32 = 4;
const CG_EVENT_OTHER_MOUSE_DOWN: u32 = 25;
const CG_EVENT_OTHER_MOUSE_UP:   u32 = 26;

// CGMouseButton
const CG_MOUSE_BUTTON_RIGHT:  u32 = 1;
const CG_MOUSE_BUTTON_CENTER: u32 = 2;

// CGEventField
const CG_MOUSE_EVENT_BUTTON_NUMBER: u32 = 3;

// CGEventTapLocation
const CG_HID_EVENT_TAP: u32 = 0;

#[link(name = "CoreGraphics", kind = "framework")]
extern "C" {
    fn CGEventCreate(source: CGEventSourceRef) -> CGEventRef;
    fn CGEventGetLocation(event: CGEventRef) -> CGPoint;
    fn CGEventCreateMouseEvent(
        source: CGEventSourceRef,
        mouse_type: u32,
        location: CGPoint,
        button: u32,
    ) -> CGEventRef;
    fn CGEventCreateKeyboardEvent(
        source: CGEventSourceRef,
        keycode: u16,
        key_down: bool,
    ) -> CGEventRef;
    fn CGEventSetFlags(event: CGEventRef, flags: u64);
    fn CGEventSetIntegerValueField(event: CGEventRef, field: u32, value: i64);
    fn CGEventPost(tap: u32, event: CGEventRef);
}

extern "C" {
    fn AXIsProcessTrusted() -> bool;
}

pub(crate) fn accessibility_trusted() -> bool {
    unsafe { AXIsProcessTrusted() }
}

// ════════════════════════════════════════════════════════════════════════════
// OwnedEvent: releases on drop
// ════════════════════════════════════════════════════════════════════════════

struct OwnedEvent(CGEventRef);

impl OwnedEvent {
    /// Wrap a +1 reference from a `Create` call. Null means creation failed.
    fn from_create(raw: CGEventRef) -> Option<Self> {
        (!raw.is_null()).then_some(OwnedEvent(raw))
    }

    fn post(&self) {
        unsafe { CGEventPost(CG_HID_EVENT_TAP, self.0) }
    }
}

impl Drop for OwnedEvent {
    fn drop(&mut self) {
        unsafe { CFRelease(self.0) }
    }
}

/// Run a helper process and wait for it, so no child is left unreaped.
fn run_to_completion(cmd: &mut Command, action: TapAction) -> Result<(), ActionError> {
    let status = cmd
        .status()
        .map_err(|e| ActionError::Execution { action, reason: e.to_string() })?;
    if status.success() {
        Ok(())
    } else {
        Err(ActionError::Execution { action, reason: format!("helper exited with {}", status) })
    }
}

fn post_pair(down: &OwnedEvent, up: &OwnedEvent) {
    down.post();
    thread::sleep(PRESS_GAP);
    up.post();
}

// ════════════════════════════════════════════════════════════════════════════
// QuartzExecutor
// ════════════════════════════════════════════════════════════════════════════

/// Posts actions as CGEvents.
#[derive(Debug, Default)]
pub struct QuartzExecutor;

impl QuartzExecutor {
    pub fn new() -> Self { QuartzExecutor }

    fn pointer_location() -> Option<CGPoint> {
        let probe = OwnedEvent::from_create(unsafe { CGEventCreate(ptr::null()) })?;
        Some(unsafe { CGEventGetLocation(probe.0) })
    }

    fn click(&self, action: TapAction, button: MouseButton) -> Result<(), ActionError> {
        let fail = |reason: &str| ActionError::Execution { action, reason: reason.to_string() };
        let at = Self::pointer_location().ok_or_else(|| fail("cannot read pointer location"))?;

        let (down_type, up_type, cg_button) = match button {
            MouseButton::Right  => (CG_EVENT_RIGHT_MOUSE_DOWN, CG_EVENT_RIGHT_MOUSE_UP, CG_MOUSE_BUTTON_RIGHT),
            MouseButton::Center => (CG_EVENT_OTHER_MOUSE_DOWN, CG_EVENT_OTHER_MOUSE_UP, CG_MOUSE_BUTTON_CENTER),
        };

        let make = |kind| OwnedEvent::from_create(unsafe {
            CGEventCreateMouseEvent(ptr::null(), kind, at, cg_button)
        });
        let (down, up) = make(down_type).zip(make(up_type))
            .ok_or_else(|| fail("cannot create mouse event"))?;

        if button == MouseButton::Center {
            unsafe {
                CGEventSetIntegerValueField(down.0, CG_MOUSE_EVENT_BUTTON_NUMBER, CG_MOUSE_BUTTON_CENTER as i64);
                CGEventSetIntegerValueField(up.0, CG_MOUSE_EVENT_BUTTON_NUMBER, CG_MOUSE_BUTTON_CENTER as i64);
            }
        }
        post_pair(&down, &up);
        Ok(())
    }

    fn key_events(key: u16, modifiers: Modifiers) -> Option<(OwnedEvent, OwnedEvent)> {
        let make = |is_down| OwnedEvent::from_create(unsafe {
            CGEventCreateKeyboardEvent(ptr::null(), key, is_down)
        });
        let (down, up) = make(true).zip(make(false))?;
        if modifiers != Modifiers::NONE {
            unsafe {
                CGEventSetFlags(down.0, modifiers.bits());
                CGEventSetFlags(up.0, modifiers.bits());
            }
        }
        Some((down, up))
    }

    fn key_combo(&self, action: TapAction, key: u16, modifiers: Modifiers) -> Result<(), ActionError> {
        let (down, up) = Self::key_events(key, modifiers).ok_or_else(|| ActionError::Execution {
            action,
            reason: "cannot create keyboard event".to_string(),
        })?;
        post_pair(&down, &up);
        Ok(())
    }

    fn launchpad(&self, action: TapAction) -> Result<(), ActionError> {
        if let Some((down, up)) = Self::key_events(keys::LAUNCHPAD, Modifiers::NONE) {
            post_pair(&down, &up);
            return Ok(());
        }
        warn!("launchpad key event unavailable, opening {}", LAUNCHPAD_APP);
        run_to_completion(Command::new("open").arg(LAUNCHPAD_APP), action)
    }
}

impl ActionExecutor for QuartzExecutor {
    fn execute(&mut self, action: TapAction) -> Result<(), ActionError> {
        debug!(action = action.id(), "posting");
        match action.synthesis() {
            Synthesis::Click(button)           => self.click(action, button),
            Synthesis::Keys { key, modifiers } => self.key_combo(action, key, modifiers),
            Synthesis::Launchpad               => self.launchpad(action),
        }
    }

    fn name(&self) -> &'static str { "quartz" }
}

// ════════════════════════════════════════════════════════════════════════════
// Tests
// ════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    // ── helper processes ──────────────────────────────────────────────────
    #[test]
    fn helper_is_waited_for() {
        assert!(run_to_completion(&mut Command::new("true"), TapAction::Launchpad).is_ok());
    }

    #[test]
    fn failing_helper_is_an_execution_error() {
        let err = run_to_completion(&mut Command::new("false"), TapAction::Launchpad).unwrap_err();
        assert!(matches!(err, ActionError::Execution { action: TapAction::Launchpad, .. }));
    }

    #[test]
    fn missing_helper_is_an_execution_error() {
        let err = run_to_completion(&mut Command::new("/nonexistent/helper"), TapAction::Launchpad);
        assert!(err.is_err());
    }
}
