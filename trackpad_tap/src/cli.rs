//! Command-Line Interface

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::app::SourceKind;
use crate::source::SimGesture;

/// trackpad_tap - turn short multi-finger trackpad taps into clicks and shortcuts
#[derive(Parser, Debug)]
#[command(name = "trackpad_tap")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,

    /// Log every accept/reject decision
    #[arg(short, long, global = true)]
    pub debug: bool,

    /// Config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

/// Frame source choices for `run`
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum SourceArg {
    /// Keyboard simulator in the status window
    Sim,
    /// Real trackpads (macOS, `multitouch` feature)
    Multitouch,
    /// A recorded trace, see --trace
    Replay,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Recognize taps and run their actions
    Run {
        /// Frame source (defaults to replay when --trace is given, else sim)
        #[arg(short, long, value_enum)]
        source: Option<SourceArg>,

        /// Trace file for the replay source
        #[arg(short, long)]
        trace: Option<PathBuf>,

        /// No status window; stop with Ctrl-C or at the end of a replay
        #[arg(long)]
        headless: bool,

        /// Replay at the recorded pace instead of as fast as possible
        #[arg(long)]
        realtime: bool,
    },

    /// Decode a trace offline and print every decision (no actions run)
    Trace {
        /// JSON-lines trace file
        path: PathBuf,
    },

    /// Write a synthetic trace (tap3..tap5, slow3..slow5, stagger3..stagger5, wiggle, ramp)
    Synth {
        /// Gestures, in order
        #[arg(required = true)]
        gestures: Vec<SimGesture>,

        /// Output trace file
        #[arg(short, long)]
        out: PathBuf,

        /// Record stride in bytes (defaults to the simulator setting)
        #[arg(long)]
        stride: Option<usize>,
    },

    /// Run one action after a delay, to check permissions
    TestAction {
        /// Action id, see `actions`
        action: String,

        /// Seconds to wait first
        #[arg(long, default_value = "2")]
        delay: u64,
    },

    /// List the available actions
    Actions,

    /// View or modify configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Print the config file path
    Path,

    /// Write the default configuration
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Set the maximum tap duration in milliseconds
    SetDuration {
        /// e.g. 80, 100, 120, 150, 200, 250, 350
        ms: u32,
    },

    /// Set the movement tolerance (strict, default, loose, very-loose, disabled, or a number)
    SetMovement {
        value: String,
    },

    /// Bind a finger count to an action id or "disabled"
    Bind {
        /// 3, 4 or 5
        fingers: usize,
        action: String,
    },

    /// Turn recognition on
    Enable,

    /// Turn recognition off
    Disable,

    /// List duration and movement presets
    Presets,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

/// Resolve `run`'s source flags.
pub fn source_kind(source: Option<SourceArg>, trace: Option<PathBuf>) -> Result<SourceKind, String> {
    match (source, trace) {
        (None | Some(SourceArg::Replay), Some(path)) => Ok(SourceKind::Replay(path)),
        (Some(SourceArg::Replay), None) => Err("--source replay needs --trace <file>".to_string()),
        (None | Some(SourceArg::Sim), None) => Ok(SourceKind::Simulator),
        (Some(SourceArg::Multitouch), None) => Ok(SourceKind::Multitouch),
        (Some(_), Some(_)) => Err("--trace only applies to the replay source".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_defaults() {
        let cli = Cli::try_parse_from(["trackpad_tap", "run"]).unwrap();
        match cli.command {
            Commands::Run { source, trace, headless, realtime } => {
                assert!(source.is_none());
                assert!(trace.is_none());
                assert!(!headless);
                assert!(!realtime);
            }
            _ => panic!("Expected Run command"),
        }
        assert!(!cli.debug);
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "trackpad_tap", "run", "--source", "multitouch", "--headless", "--debug", "--config", "/tmp/t.toml",
        ]).unwrap();
        assert!(cli.debug);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/t.toml")));
        assert!(matches!(cli.command, Commands::Run { source: Some(SourceArg::Multitouch), headless: true, .. }));
    }

    #[test]
    fn test_synth_parses_gestures() {
        let cli = Cli::try_parse_from(["trackpad_tap", "synth", "tap4", "wiggle", "slow3", "-o", "out.jsonl"]).unwrap();
        match cli.command {
            Commands::Synth { gestures, out, stride } => {
                assert_eq!(gestures, vec![SimGesture::Tap(4), SimGesture::Wiggle, SimGesture::SlowPress(3)]);
                assert_eq!(out, PathBuf::from("out.jsonl"));
                assert!(stride.is_none());
            }
            _ => panic!("Expected Synth command"),
        }
        assert!(Cli::try_parse_from(["trackpad_tap", "synth", "swipe", "-o", "x"]).is_err());
        assert!(Cli::try_parse_from(["trackpad_tap", "synth", "-o", "x"]).is_err());
    }

    #[test]
    fn test_test_action_default_delay() {
        let cli = Cli::try_parse_from(["trackpad_tap", "test-action", "launchpad"]).unwrap();
        match cli.command {
            Commands::TestAction { action, delay } => {
                assert_eq!(action, "launchpad");
                assert_eq!(delay, 2);
            }
            _ => panic!("Expected TestAction command"),
        }
    }

    #[test]
    fn test_config_bind() {
        let cli = Cli::try_parse_from(["trackpad_tap", "config", "bind", "3", "copy"]).unwrap();
        match cli.command {
            Commands::Config { action: ConfigAction::Bind { fingers, action } } => {
                assert_eq!(fingers, 3);
                assert_eq!(action, "copy");
            }
            _ => panic!("Expected Config Bind command"),
        }
    }

    #[test]
    fn test_source_kind_resolution() {
        let trace = || Some(PathBuf::from("t.jsonl"));
        assert_eq!(source_kind(None, None), Ok(SourceKind::Simulator));
        assert_eq!(source_kind(None, trace()), Ok(SourceKind::Replay(PathBuf::from("t.jsonl"))));
        assert_eq!(source_kind(Some(SourceArg::Multitouch), None), Ok(SourceKind::Multitouch));
        assert!(source_kind(Some(SourceArg::Replay), None).is_err());
        assert!(source_kind(Some(SourceArg::Sim), trace()).is_err());
    }
}
