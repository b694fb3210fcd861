//! Configuration management.
//!
//! ```toml
//! enabled = true
//! debug = false
//!
//! [tunables]
//! min_tap_duration = 0.02
//! max_tap_duration = 0.12
//! max_movement = 0.03      # 1.0 disables the movement check
//!
//! [bindings]
//! three = "disabled"
//! four = "middle_click"
//! five = "disabled"
//!
//! [simulator]
//! stride = 96
//! frame_interval_ms = 8
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tap_actions::TapAction;
use tap_frame::{MAX_STRIDE, MIN_RECORD_LEN};
use tap_session::{ActionId, Bindings, Tunables};

use crate::Error;

/// Binding value that leaves a finger count unbound.
pub const DISABLED: &str = "disabled";

/// Maximum tap duration choices, in milliseconds.
pub const DURATION_PRESETS_MS: [u32; 7] = [80, 100, 120, 150, 200, 250, 350];

/// Movement tolerance choices. The last one turns the check off.
pub const MOVEMENT_PRESETS: [(&str, f64); 5] = [
    ("strict",     0.015),
    ("default",    0.03),
    ("loose",      0.05),
    ("very-loose", 0.08),
    ("disabled",   Tunables::MOVEMENT_DISABLED),
];

/// Look up a movement preset by label.
pub fn movement_preset(label: &str) -> Option<f64> {
    MOVEMENT_PRESETS.iter().find(|(l, _)| *l == label).map(|(_, v)| *v)
}

// ════════════════════════════════════════════════════════════════════════════
// Config
// ════════════════════════════════════════════════════════════════════════════

/// Main configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Global recognition switch
    pub enabled: bool,
    /// Log every accept/reject decision
    pub debug: bool,
    pub tunables: TunablesConfig,
    pub bindings: BindingsConfig,
    pub simulator: SimulatorConfig,
}

/// Acceptance tolerances
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunablesConfig {
    /// Seconds
    pub min_tap_duration: f64,
    /// Seconds
    pub max_tap_duration: f64,
    /// Normalized surface units; 1.0 disables the check
    pub max_movement: f64,
}

/// Action id or "disabled" per finger count
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BindingsConfig {
    pub three: String,
    pub four: String,
    pub five: String,
}

/// Keyboard simulator settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Record stride of synthesized frames, in bytes
    pub stride: usize,
    /// Spacing of synthesized frames, in milliseconds
    pub frame_interval_ms: u64,
}

/// Synthesized record strides must hold a record and stay within the
/// detectable range.
pub fn check_stride(stride: usize) -> Result<(), String> {
    if (MIN_RECORD_LEN..=MAX_STRIDE).contains(&stride) {
        Ok(())
    } else {
        Err(format!(
            "stride must be {}..={} bytes, got {}", MIN_RECORD_LEN, MAX_STRIDE, stride
        ))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: true,
            debug: false,
            tunables: TunablesConfig::default(),
            bindings: BindingsConfig::default(),
            simulator: SimulatorConfig::default(),
        }
    }
}

impl Default for TunablesConfig {
    fn default() -> Self {
        let t = Tunables::default();
        Self {
            min_tap_duration: t.min_tap_duration,
            max_tap_duration: t.max_tap_duration,
            max_movement: t.max_movement,
        }
    }
}

impl Default for BindingsConfig {
    fn default() -> Self {
        Self {
            three: DISABLED.to_string(),
            four: TapAction::MiddleClick.id().to_string(),
            five: DISABLED.to_string(),
        }
    }
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self { stride: 96, frame_interval_ms: 8 }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// BindingsConfig accessors
// ════════════════════════════════════════════════════════════════════════════

impl BindingsConfig {
    fn slot(&self, finger_count: usize) -> Option<&String> {
        match finger_count {
            3 => Some(&self.three),
            4 => Some(&self.four),
            5 => Some(&self.five),
            _ => None,
        }
    }

    fn slot_mut(&mut self, finger_count: usize) -> Option<&mut String> {
        match finger_count {
            3 => Some(&mut self.three),
            4 => Some(&mut self.four),
            5 => Some(&mut self.five),
            _ => None,
        }
    }

    /// Raw value for `finger_count`.
    pub fn get(&self, finger_count: usize) -> Option<&str> {
        self.slot(finger_count).map(String::as_str)
    }

    /// Parsed action for `finger_count`; `Ok(None)` when disabled.
    pub fn action(&self, finger_count: usize) -> Result<Option<TapAction>, Error> {
        match self.get(finger_count) {
            None | Some(DISABLED) => Ok(None),
            Some(id) => id.parse().map(Some).map_err(Error::from),
        }
    }

    /// Bind `finger_count` to `value` (an action id or "disabled").
    pub fn set(&mut self, finger_count: usize, value: &str) -> Result<(), Error> {
        if value != DISABLED {
            value.parse::<TapAction>()?;
        }
        let slot = self.slot_mut(finger_count).ok_or_else(|| {
            Error::Config(format!("only 3, 4 or 5 fingers can be bound, got {}", finger_count))
        })?;
        *slot = value.to_string();
        Ok(())
    }
}

// ════════════════════════════════════════════════════════════════════════════
// Validation, conversion, persistence
// ════════════════════════════════════════════════════════════════════════════

impl Config {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), Error> {
        let t = &self.tunables;
        for (name, v) in [
            ("min_tap_duration", t.min_tap_duration),
            ("max_tap_duration", t.max_tap_duration),
        ] {
            if !v.is_finite() || v <= 0.0 {
                return Err(Error::Config(format!("{} must be a positive number, got {}", name, v)));
            }
        }
        if t.min_tap_duration >= t.max_tap_duration {
            return Err(Error::Config(format!(
                "min_tap_duration ({}) must be below max_tap_duration ({})",
                t.min_tap_duration, t.max_tap_duration
            )));
        }
        if !(t.max_movement > 0.0 && t.max_movement <= Tunables::MOVEMENT_DISABLED) {
            return Err(Error::Config(format!(
                "max_movement must be in (0, 1], got {}", t.max_movement
            )));
        }
        for n in tap_session::BINDABLE_FINGER_COUNTS {
            self.bindings.action(n)?;
        }
        check_stride(self.simulator.stride)
            .map_err(|e| Error::Config(format!("simulator.{}", e)))?;
        if self.simulator.frame_interval_ms == 0 {
            return Err(Error::Config("simulator.frame_interval_ms must be > 0".to_string()));
        }
        Ok(())
    }

    /// Tolerances in engine form.
    pub fn tunables(&self) -> Tunables {
        Tunables {
            min_tap_duration: self.tunables.min_tap_duration,
            max_tap_duration: self.tunables.max_tap_duration,
            max_movement: self.tunables.max_movement,
        }
    }

    /// Bindings in engine form. Call [`Config::validate`] first; unknown ids
    /// are left unbound here.
    pub fn bindings(&self) -> Bindings {
        let mut b = Bindings::default();
        for n in tap_session::BINDABLE_FINGER_COUNTS {
            if let Ok(Some(action)) = self.bindings.action(n) {
                b.set(n, Some(ActionId::new(action.id())));
            }
        }
        b
    }

    /// Set the maximum tap duration from a millisecond value.
    pub fn set_max_duration_ms(&mut self, ms: u32) -> Result<(), Error> {
        let mut next = self.clone();
        next.tunables.max_tap_duration = f64::from(ms) / 1000.0;
        next.validate()?;
        *self = next;
        Ok(())
    }

    /// Set the movement tolerance from a preset label or a number.
    pub fn set_max_movement(&mut self, value: &str) -> Result<(), Error> {
        let v = match movement_preset(value) {
            Some(v) => v,
            None => value.parse::<f64>().map_err(|_| {
                Error::Config(format!("'{}' is neither a movement preset nor a number", value))
            })?,
        };
        let mut next = self.clone();
        next.tunables.max_movement = v;
        next.validate()?;
        *self = next;
        Ok(())
    }

    /// Load config from file
    pub fn load(path: &Path) -> Result<Self, Error> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`, falling back to defaults when it does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self, Error> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from default location
    pub fn load_default() -> Result<Self, Error> {
        Self::load_or_default(&Self::default_path())
    }

    /// Save config to file, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), Error> {
        let content = self.to_toml()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Default config path
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("trackpad_tap").join("config.toml"))
            .unwrap_or_else(|| PathBuf::from("trackpad_tap.toml"))
    }

    /// Generate TOML representation
    pub fn to_toml(&self) -> Result<String, Error> {
        Ok(toml::to_string_pretty(self)?)
    }
}

// ════════════════════════════════════════════════════════════════════════════
// Tests
// ════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    // ── defaults ──────────────────────────────────────────────────────────
    #[test]
    fn default_config_is_valid() {
        let c = Config::default();
        assert!(c.validate().is_ok());
        assert!(c.enabled);
        assert!(!c.debug);
        assert_eq!(c.tunables(), Tunables::default());
    }

    #[test]
    fn default_bindings_only_four_fingers() {
        let b = Config::default().bindings();
        assert_eq!(b.get(3), None);
        assert_eq!(b.get(4).map(ActionId::as_str), Some("middle_click"));
        assert_eq!(b.get(5), None);
    }

    // ── parsing ───────────────────────────────────────────────────────────
    #[test]
    fn partial_file_fills_in_defaults() {
        let c: Config = toml::from_str("[bindings]\nthree = \"copy\"\n").unwrap();
        assert_eq!(c.bindings.three, "copy");
        assert_eq!(c.bindings.four, "middle_click");
        assert_eq!(c.tunables, TunablesConfig::default());
        assert!(c.enabled);
    }

    #[test]
    fn invalid_toml_is_an_error() {
        assert!(toml::from_str::<Config>("enabled = [").is_err());
    }

    #[test]
    fn roundtrip_through_toml() {
        let mut c = Config::default();
        c.debug = true;
        c.bindings.set(5, "spotlight").unwrap();
        let back: Config = toml::from_str(&c.to_toml().unwrap()).unwrap();
        assert_eq!(back, c);
    }

    // ── validation ────────────────────────────────────────────────────────
    #[test]
    fn min_must_be_below_max() {
        let mut c = Config::default();
        c.tunables.min_tap_duration = 0.12;
        assert!(matches!(c.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn non_finite_duration_rejected() {
        let mut c = Config::default();
        c.tunables.max_tap_duration = f64::NAN;
        assert!(c.validate().is_err());
        c.tunables.max_tap_duration = f64::INFINITY;
        assert!(c.validate().is_err());
    }

    #[test]
    fn movement_range() {
        let mut c = Config::default();
        c.tunables.max_movement = 0.0;
        assert!(c.validate().is_err());
        c.tunables.max_movement = 1.5;
        assert!(c.validate().is_err());
        c.tunables.max_movement = 1.0;
        assert!(c.validate().is_ok());
    }

    #[test]
    fn unknown_binding_rejected() {
        let mut c = Config::default();
        c.bindings.three = "triple_click".to_string();
        assert!(matches!(c.validate(), Err(Error::Action(_))));
    }

    #[test]
    fn simulator_stride_must_hold_a_record() {
        let mut c = Config::default();
        c.simulator.stride = 32;
        assert!(c.validate().is_err());
    }

    #[test]
    fn simulator_stride_is_bounded_above() {
        let mut c = Config::default();
        c.simulator.stride = MAX_STRIDE;
        assert!(c.validate().is_ok());
        c.simulator.stride = MAX_STRIDE + 1;
        assert!(matches!(c.validate(), Err(Error::Config(m)) if m.starts_with("simulator.stride")));
        c.simulator.stride = usize::MAX;
        assert!(c.validate().is_err());
    }

    // ── setters ───────────────────────────────────────────────────────────
    #[test]
    fn bind_rejects_bad_counts_and_ids() {
        let mut b = BindingsConfig::default();
        assert!(b.set(2, "copy").is_err());
        assert!(b.set(4, "bogus").is_err());
        assert!(b.set(4, DISABLED).is_ok());
        assert_eq!(b.action(4).unwrap(), None);
        assert!(b.set(3, "undo").is_ok());
        assert_eq!(b.action(3).unwrap(), Some(TapAction::Undo));
    }

    #[test]
    fn duration_presets_apply() {
        let mut c = Config::default();
        for ms in DURATION_PRESETS_MS {
            c.set_max_duration_ms(ms).unwrap();
            assert!((c.tunables.max_tap_duration - f64::from(ms) / 1000.0).abs() < 1e-12);
        }
    }

    #[test]
    fn duration_below_min_leaves_config_untouched() {
        let mut c = Config::default();
        assert!(c.set_max_duration_ms(10).is_err());
        assert_eq!(c.tunables.max_tap_duration, Tunables::DEFAULT_MAX_TAP_DURATION);
    }

    #[test]
    fn movement_presets_and_numbers() {
        let mut c = Config::default();
        c.set_max_movement("loose").unwrap();
        assert_eq!(c.tunables.max_movement, 0.05);
        c.set_max_movement("disabled").unwrap();
        assert!(c.tunables().movement_check_disabled());
        c.set_max_movement("0.04").unwrap();
        assert_eq!(c.tunables.max_movement, 0.04);
        assert!(c.set_max_movement("wobbly").is_err());
    }

    // ── persistence ───────────────────────────────────────────────────────
    #[test]
    fn save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut c = Config::default();
        c.enabled = false;
        c.save(&path).unwrap();
        assert_eq!(Config::load(&path).unwrap(), c);
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let c = Config::load_or_default(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(c, Config::default());
        assert!(Config::load(&dir.path().join("absent.toml")).is_err());
    }

    #[test]
    fn invalid_file_fails_validation_on_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[tunables]\nmax_movement = 3.0\n").unwrap();
        assert!(matches!(Config::load(&path), Err(Error::Config(_))));
    }

    #[test]
    fn default_path_ends_in_app_dir() {
        let p = Config::default_path();
        assert!(p.ends_with("trackpad_tap/config.toml") || p.ends_with("trackpad_tap.toml"));
    }
}
