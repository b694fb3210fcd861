//! Software-rendered status window using `minifb`.
//!
//! Layout:
//!
//! ```text
//! ┌──────────────────────────────────────────┬─────────────────────┐
//! │  TRACKPAD                                │  RECOGNITION ON     │
//! │  ┌────────────────────────────────────┐  │  source / executor  │
//! │  │                                    │  │  fingers / peak     │
//! │  │        ●   ●   ●   ●               │  │  stride             │
//! │  │                                    │  │                     │
//! │  └────────────────────────────────────┘  │  RECENT TAPS        │
//! │                                          │  [decision 0]       │
//! │  status bar                              │  [decision 1] ...   │
//! └──────────────────────────────────────────┴─────────────────────┘
//! ```
//!
//! Drawing goes to a [`Canvas`], which has no window and can be tested on its
//! own.

use std::sync::mpsc::Sender;
use std::time::Duration;

use minifb::{Key, KeyRepeat, Window, WindowOptions};
use tap_frame::Point;

use crate::app::AppState;
use crate::source::{SimGesture, SimInput};
use crate::{Error, Result};

// ════════════════════════════════════════════════════════════════════════════
// Layout constants
// ════════════════════════════════════════════════════════════════════════════

pub const WIN_W:       usize = 900;
pub const WIN_H:       usize = 500;
const PAD_X:           usize = 30;
const PAD_Y:           usize = 50;
const PAD_W:           usize = 520;
const PAD_H:           usize = 360;
const PANEL_X:         usize = 590;
const STATUS_Y:        usize = WIN_H - 36;
const FINGER_R:        usize = 9;
const LINE_H:          usize = 10;
const BG_COLOR:        u32   = 0xFF1A1A2E;
const PANEL_BG:        u32   = 0xFF16213E;
const PAD_BG:          u32   = 0xFF22304A;
const TEXT_BG:         u32   = 0xFF0F3460;
const ON_COLOR:        u32   = 0xFF5FD38D;
const OFF_COLOR:       u32   = 0xFFE05A5A;
const TRACK_COLOR:     u32   = 0xFFFFD700;  // gold while a session is live
const FINGER_COLOR:    u32   = 0xFFAADDFF;
const DIM_TEXT:        u32   = 0xFF888888;
const TEXT_COLOR:      u32   = 0xFFEEEEEE;

// ════════════════════════════════════════════════════════════════════════════
// UiCommand
// ════════════════════════════════════════════════════════════════════════════

/// Window input the application loop acts on. Simulator keys are forwarded
/// straight to the simulator and never show up here.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UiCommand {
    Quit,
    ToggleEnabled,
    /// Restart hardware touch detection.
    Restart,
}

// ════════════════════════════════════════════════════════════════════════════
// Visualizer
// ════════════════════════════════════════════════════════════════════════════

pub struct Visualizer {
    window: Window,
    canvas: Canvas,
    /// Present only when the simulator is the frame source.
    sim_tx: Option<Sender<SimInput>>,
}

impl Visualizer {
    pub fn new(sim_tx: Option<Sender<SimInput>>) -> Result<Self> {
        let mut window = Window::new(
            "trackpad_tap",
            WIN_W, WIN_H,
            WindowOptions {
                resize: false,
                ..WindowOptions::default()
            },
        ).map_err(|e| Error::Window(e.to_string()))?;

        window.limit_update_rate(Some(Duration::from_millis(16)));

        Ok(Visualizer { window, canvas: Canvas::new(), sim_tx })
    }

    pub fn is_open(&self) -> bool { self.window.is_open() }

    /// Poll the keyboard. Simulator keys are sent to the simulator.
    pub fn poll_input(&mut self) -> Option<UiCommand> {
        if !self.window.is_open() { return Some(UiCommand::Quit); }

        let one_shot = |k: Key| self.window.is_key_pressed(k, KeyRepeat::No);

        if one_shot(Key::Q) || one_shot(Key::Escape) {
            return Some(UiCommand::Quit);
        }
        if one_shot(Key::Space) {
            return Some(UiCommand::ToggleEnabled);
        }

        let Some(sim_tx) = &self.sim_tx else {
            return one_shot(Key::R).then_some(UiCommand::Restart);
        };

        let shift = self.window.is_key_down(Key::LeftShift)
                 || self.window.is_key_down(Key::RightShift);
        let gesture = [(Key::Key3, 3), (Key::Key4, 4), (Key::Key5, 5)]
            .into_iter()
            .find(|&(k, _)| one_shot(k))
            .map(|(_, n)| if shift { SimGesture::SlowPress(n) } else { SimGesture::Tap(n) })
            .or_else(|| one_shot(Key::W).then_some(SimGesture::Wiggle))
            .or_else(|| one_shot(Key::R).then_some(SimGesture::Ramp))
            .or_else(|| one_shot(Key::L).then_some(SimGesture::Stagger(4)));

        if let Some(g) = gesture {
            let _ = sim_tx.send(SimInput::Play(g));
        }
        None
    }

    /// Render one frame.
    pub fn render(&mut self, app: &AppState) {
        self.canvas.draw(app, self.sim_tx.is_some());
        self.window.update_with_buffer(&self.canvas.buf, WIN_W, WIN_H).ok();
    }
}

// ════════════════════════════════════════════════════════════════════════════
// Canvas
// ════════════════════════════════════════════════════════════════════════════

/// ARGB frame buffer of `WIN_W × WIN_H` pixels.
pub struct Canvas {
    pub buf: Vec<u32>,
}

impl Default for Canvas {
    fn default() -> Self { Self::new() }
}

impl Canvas {
    pub fn new() -> Self {
        Canvas { buf: vec![BG_COLOR; WIN_W * WIN_H] }
    }

    pub fn pixel(&self, x: usize, y: usize) -> Option<u32> {
        (x < WIN_W && y < WIN_H).then(|| self.buf[y * WIN_W + x])
    }

    /// Paint the whole status view.
    pub fn draw(&mut self, app: &AppState, simulated: bool) {
        self.buf.fill(BG_COLOR);

        // ── Pad ───────────────────────────────────────────────────────────
        self.draw_label("TRACKPAD", PAD_X, PAD_Y - 16, DIM_TEXT);
        self.fill_rect(PAD_X, PAD_Y, PAD_W, PAD_H, PAD_BG);
        let border = match (app.is_enabled(), app.peak().is_some()) {
            (false, _)    => OFF_COLOR,
            (true, true)  => TRACK_COLOR,
            (true, false) => ON_COLOR,
        };
        self.draw_border(PAD_X, PAD_Y, PAD_W, PAD_H, border);

        let dot = if app.peak().is_some() { TRACK_COLOR } else { FINGER_COLOR };
        for &p in app.contacts() {
            let (x, y) = pad_to_screen(p);
            self.fill_circle(x, y, FINGER_R, dot);
        }
        if let Some(c) = Point::mean(app.contacts().iter().copied()) {
            let (x, y) = pad_to_screen(c);
            self.fill_rect(x.saturating_sub(4), y, 9, 1, TEXT_COLOR);
            self.fill_rect(x, y.saturating_sub(4), 1, 9, TEXT_COLOR);
        }

        // ── Panel ─────────────────────────────────────────────────────────
        self.fill_rect(PANEL_X, 0, WIN_W - PANEL_X, WIN_H, PANEL_BG);
        let x = PANEL_X + 10;
        let mut y = 14;
        let (label, color) = if app.is_enabled() {
            ("RECOGNITION ON", ON_COLOR)
        } else {
            ("RECOGNITION OFF", OFF_COLOR)
        };
        self.draw_label(label, x, y, color);
        y += 2 * LINE_H;

        let peak = app.peak().map_or_else(|| "-".to_string(), |p| p.to_string());
        let stride = app.stride().map_or_else(|| "detecting".to_string(), |s| format!("{} bytes", s));
        for line in [
            format!("source   {}", app.source_label()),
            format!("executor {}", app.backend()),
            format!("fingers  {}   peak {}", app.finger_count(), peak),
            format!("stride   {}", stride),
        ] {
            self.draw_label(&line, x, y, TEXT_COLOR);
            y += LINE_H;
        }

        y += LINE_H;
        self.draw_label("RECENT TAPS", x, y, TRACK_COLOR);
        y += 2 * LINE_H;
        for (line, accepted) in app.history_lines() {
            if y + LINE_H > STATUS_Y { break; }
            self.draw_label(&line, x, y, if accepted { ON_COLOR } else { OFF_COLOR });
            y += LINE_H;
        }

        // ── Status bar ────────────────────────────────────────────────────
        self.fill_rect(0, STATUS_Y, PANEL_X, WIN_H - STATUS_Y, TEXT_BG);
        self.draw_label(&app.status, 10, STATUS_Y + 10, TEXT_COLOR);

        let legend = if simulated {
            "3/4/5=tap  Shift+3/4/5=slow  W=wiggle  R=ramp  L=stagger  Space=on/off  Q=quit"
        } else {
            "R=restart detection  Space=on/off  Q=quit"
        };
        self.draw_label(legend, 10, WIN_H - 12, DIM_TEXT);
    }

    // ── Primitive drawing helpers ─────────────────────────────────────────

    fn fill_rect(&mut self, x: usize, y: usize, w: usize, h: usize, color: u32) {
        for row in y..(y + h).min(WIN_H) {
            for col in x..(x + w).min(WIN_W) {
                self.buf[row * WIN_W + col] = color;
            }
        }
    }

    fn draw_border(&mut self, x: usize, y: usize, w: usize, h: usize, color: u32) {
        if w == 0 || h == 0 { return; }
        self.fill_rect(x, y, w, 1, color);
        self.fill_rect(x, y + h - 1, w, 1, color);
        self.fill_rect(x, y, 1, h, color);
        self.fill_rect(x + w - 1, y, 1, h, color);
    }

    fn set_pixel(&mut self, x: usize, y: usize, color: u32) {
        if x < WIN_W && y < WIN_H {
            self.buf[y * WIN_W + x] = color;
        }
    }

    fn fill_circle(&mut self, cx: usize, cy: usize, r: usize, color: u32) {
        let r = r as isize;
        for dy in -r..=r {
            for dx in -r..=r {
                if dx * dx + dy * dy > r * r { continue; }
                let (x, y) = (cx as isize + dx, cy as isize + dy);
                if x >= 0 && y >= 0 {
                    self.set_pixel(x as usize, y as usize, color);
                }
            }
        }
    }

    /// 3×5 bitmap text, one pixel gap between characters.
    fn draw_label(&mut self, text: &str, x: usize, y: usize, color: u32) {
        let mut cx = x;
        for ch in text.chars() {
            for (row, &bits) in char_glyph(ch).iter().enumerate() {
                for col in 0..3usize {
                    if bits & (1 << (2 - col)) != 0 {
                        self.set_pixel(cx + col, y + row, color);
                    }
                }
            }
            cx += 4;
            if cx + 4 > WIN_W { break; }
        }
    }
}

/// Surface coordinates to window pixels. Surface y grows upwards.
pub fn pad_to_screen(p: Point) -> (usize, usize) {
    let x = p.x.clamp(0.0, 1.0);
    let y = p.y.clamp(0.0, 1.0);
    (
        PAD_X + (x * (PAD_W - 1) as f64).round() as usize,
        PAD_Y + ((1.0 - y) * (PAD_H - 1) as f64).round() as usize,
    )
}

// ────────────────────────────────────────────────────────────────────────────
// Minimal 3×5 bitmap font
// ────────────────────────────────────────────────────────────────────────────

fn char_glyph(c: char) -> [u8; 5] {
    match c.to_ascii_lowercase() {
        '0' => [0b111, 0b101, 0b101, 0b101, 0b111],
        '1' => [0b010, 0b110, 0b010, 0b010, 0b111],
        '2' => [0b111, 0b001, 0b111, 0b100, 0b111],
        '3' => [0b111, 0b001, 0b111, 0b001, 0b111],
        '4' => [0b101, 0b101, 0b111, 0b001, 0b001],
        '5' => [0b111, 0b100, 0b111, 0b001, 0b111],
        '6' => [0b111, 0b100, 0b111, 0b101, 0b111],
        '7' => [0b111, 0b001, 0b001, 0b001, 0b001],
        '8' => [0b111, 0b101, 0b111, 0b101, 0b111],
        '9' => [0b111, 0b101, 0b111, 0b001, 0b111],
        'a' => [0b111, 0b101, 0b111, 0b101, 0b101],
        'b' => [0b110, 0b101, 0b110, 0b101, 0b110],
        'c' => [0b111, 0b100, 0b100, 0b100, 0b111],
        'd' => [0b110, 0b101, 0b101, 0b101, 0b110],
        'e' => [0b111, 0b100, 0b111, 0b100, 0b111],
        'f' => [0b111, 0b100, 0b111, 0b100, 0b100],
        'g' => [0b111, 0b100, 0b101, 0b101, 0b111],
        'h' => [0b101, 0b101, 0b111, 0b101, 0b101],
        'i' => [0b111, 0b010, 0b010, 0b010, 0b111],
        'j' => [0b001, 0b001, 0b001, 0b101, 0b111],
        'k' => [0b101, 0b101, 0b110, 0b101, 0b101],
        'l' => [0b100, 0b100, 0b100, 0b100, 0b111],
        'm' => [0b101, 0b111, 0b101, 0b101, 0b101],
        'n' => [0b111, 0b101, 0b101, 0b101, 0b101],
        'o' => [0b111, 0b101, 0b101, 0b101, 0b111],
        'p' => [0b111, 0b101, 0b111, 0b100, 0b100],
        'q' => [0b111, 0b101, 0b101, 0b111, 0b001],
        'r' => [0b110, 0b101, 0b110, 0b101, 0b101],
        's' => [0b111, 0b100, 0b111, 0b001, 0b111],
        't' => [0b111, 0b010, 0b010, 0b010, 0b010],
        'u' => [0b101, 0b101, 0b101, 0b101, 0b111],
        'v' => [0b101, 0b101, 0b101, 0b010, 0b010],
        'w' => [0b101, 0b101, 0b101, 0b111, 0b101],
        'x' => [0b101, 0b101, 0b010, 0b101, 0b101],
        'y' => [0b101, 0b101, 0b111, 0b010, 0b010],
        'z' => [0b111, 0b001, 0b010, 0b100, 0b111],
        '(' => [0b010, 0b100, 0b100, 0b100, 0b010],
        ')' => [0b010, 0b001, 0b001, 0b001, 0b010],
        '>' => [0b100, 0b010, 0b001, 0b010, 0b100],
        '_' => [0b000, 0b000, 0b000, 0b000, 0b111],
        '/' => [0b001, 0b001, 0b010, 0b100, 0b100],
        '-' => [0b000, 0b000, 0b111, 0b000, 0b000],
        '.' => [0b000, 0b000, 0b000, 0b000, 0b010],
        ',' => [0b000, 0b000, 0b000, 0b010, 0b100],
        ':' => [0b000, 0b010, 0b000, 0b010, 0b000],
        '=' => [0b000, 0b111, 0b000, 0b111, 0b000],
        '+' => [0b000, 0b010, 0b111, 0b010, 0b000],
        ' ' => [0b000, 0b000, 0b000, 0b000, 0b000],
        _   => [0b000, 0b000, 0b010, 0b000, 0b000],
    }
}

// ════════════════════════════════════════════════════════════════════════════
// Tests
// ════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineStatus;

    fn app_with_contacts(positions: Vec<Point>, peak: Option<usize>) -> AppState {
        let mut app = AppState::new(true, "sim", "null");
        app.handle_status(EngineStatus::Contacts {
            device: 0,
            finger_count: positions.len(),
            positions,
            stride: Some(96),
            peak,
        });
        app
    }

    // ── geometry ──────────────────────────────────────────────────────────
    #[test]
    fn pad_corners_map_to_pad_rect() {
        assert_eq!(pad_to_screen(Point::new(0.0, 1.0)), (PAD_X, PAD_Y));
        assert_eq!(pad_to_screen(Point::new(1.0, 0.0)), (PAD_X + PAD_W - 1, PAD_Y + PAD_H - 1));
    }

    #[test]
    fn out_of_range_points_are_clamped() {
        assert_eq!(pad_to_screen(Point::new(-3.0, 7.0)), (PAD_X, PAD_Y));
    }

    // ── glyphs ────────────────────────────────────────────────────────────
    #[test]
    fn upper_and_lower_case_share_glyphs() {
        assert_eq!(char_glyph('Q'), char_glyph('q'));
        assert_ne!(char_glyph('q'), char_glyph('?'));
    }

    // ── drawing ───────────────────────────────────────────────────────────
    #[test]
    fn primitives_clip_at_the_window_edge() {
        let mut c = Canvas::new();
        c.fill_rect(WIN_W - 2, WIN_H - 2, 50, 50, 0xFF123456);
        c.fill_circle(0, 0, 5, 0xFF654321);
        assert_eq!(c.pixel(WIN_W - 1, WIN_H - 1), Some(0xFF123456));
        assert_eq!(c.pixel(0, 0), Some(0xFF654321));
        assert_eq!(c.pixel(WIN_W, 0), None);
    }

    #[test]
    fn finger_dots_follow_session_state() {
        let p = Point::new(0.25, 0.75);
        let (x, y) = pad_to_screen(p);

        let mut c = Canvas::new();
        c.draw(&app_with_contacts(vec![p], None), true);
        assert_eq!(c.pixel(x + 5, y + 5), Some(FINGER_COLOR));
        assert_eq!(c.pixel(x, y), Some(TEXT_COLOR));

        c.draw(&app_with_contacts(vec![p; 3], Some(3)), true);
        assert_eq!(c.pixel(x + 5, y + 5), Some(TRACK_COLOR));
        assert_eq!(c.pixel(PAD_X, PAD_Y + 1), Some(TRACK_COLOR));
    }

    #[test]
    fn disabled_pad_gets_the_off_border() {
        let mut app = AppState::new(false, "replay", "null");
        app.handle_status(EngineStatus::Enabled(false));
        let mut c = Canvas::new();
        c.draw(&app, false);
        assert_eq!(c.pixel(PAD_X + 5, PAD_Y), Some(OFF_COLOR));
    }
}
