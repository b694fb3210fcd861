//! trackpad_tap: command-line entry point.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context};
use tap_actions::{Category, TapAction};
use tracing_subscriber::EnvFilter;

use trackpad_tap::app::{self, RunOptions};
use trackpad_tap::cli::{source_kind, Cli, Commands, ConfigAction};
use trackpad_tap::config::{check_stride, Config, DISABLED, DURATION_PRESETS_MS, MOVEMENT_PRESETS};
use trackpad_tap::replay::save_trace;
use trackpad_tap::source::{synthesize, SimGesture};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse_args();

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    // `config init` must work even when the existing file no longer parses
    let config = match &cli.command {
        Commands::Config { action: ConfigAction::Init { .. } } => Config::default(),
        _ => Config::load_or_default(&config_path)
            .with_context(|| format!("loading {}", config_path.display()))?,
    };

    // --debug or `debug = true` raises the level; RUST_LOG wins over both
    let default_level = if cli.debug || config.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    match cli.command {
        Commands::Run { source, trace, headless, realtime } => {
            let source = source_kind(source, trace).map_err(anyhow::Error::msg)?;
            run(&config, RunOptions { source, headless, realtime })?;
        }
        Commands::Trace { path } => run_trace(&config, &path)?,
        Commands::Synth { gestures, out, stride } => {
            run_synth(&config, &gestures, &out, stride)?;
        }
        Commands::TestAction { action, delay } => {
            let action: TapAction = action.parse()?;
            app::test_action(action, Duration::from_secs(delay))?;
            println!("Ran {} ({})", action.display_name(), action.shortcut());
        }
        Commands::Actions => print_actions(),
        Commands::Config { action } => run_config(action, config, &config_path)?,
    }

    Ok(())
}

fn run(config: &Config, opts: RunOptions) -> anyhow::Result<()> {
    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║          trackpad_tap - multi-finger tap recognizer          ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
    println!("  Source:   {}", opts.source.label());
    for n in tap_session::BINDABLE_FINGER_COUNTS {
        println!("  {} fingers → {}", n, config.bindings.get(n).unwrap_or(DISABLED));
    }
    println!(
        "  Tap window {:.0}–{:.0} ms, movement < {}",
        config.tunables.min_tap_duration * 1000.0,
        config.tunables.max_tap_duration * 1000.0,
        config.tunables.max_movement,
    );
    println!();

    let summary = app::run(config, opts)?;
    println!(
        "  {} frames, {} taps accepted, {} rejected, {} actions dispatched",
        summary.frames, summary.accepted, summary.rejected, summary.dispatched
    );
    Ok(())
}

fn run_trace(config: &Config, path: &Path) -> anyhow::Result<()> {
    let decisions = app::evaluate_file(config, path)
        .with_context(|| format!("evaluating {}", path.display()))?;
    if decisions.is_empty() {
        println!("No sessions in {}", path.display());
        return Ok(());
    }
    for (device, d) in &decisions {
        let mark = if d.accepted { "✓" } else { "✗" };
        println!("{:>10.3}s  dev {}  {} {}", d.timestamp, device, mark, app::decision_line(d));
    }
    let accepted = decisions.iter().filter(|(_, d)| d.accepted).count();
    println!("{} sessions, {} accepted", decisions.len(), accepted);
    Ok(())
}

fn run_synth(config: &Config, gestures: &[SimGesture], out: &Path, stride: Option<usize>) -> anyhow::Result<()> {
    let stride = stride.unwrap_or(config.simulator.stride);
    check_stride(stride).map_err(anyhow::Error::msg)?;
    let dt = config.simulator.frame_interval_ms as f64 / 1000.0;
    let frames = synthesize(gestures, stride, dt, 0.0);
    save_trace(out, &frames).with_context(|| format!("writing {}", out.display()))?;
    println!("Wrote {} frames to {}", frames.len(), out.display());
    Ok(())
}

fn print_actions() {
    for category in Category::ALL {
        println!("{}:", category.label());
        for a in TapAction::in_category(category) {
            println!("  {:<16} {:<18} {}", a.id(), a.display_name(), a.shortcut());
        }
    }
}

fn run_config(action: ConfigAction, mut config: Config, path: &Path) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show => {
            println!("# {}", path.display());
            print!("{}", config.to_toml()?);
            return Ok(());
        }
        ConfigAction::Path => {
            println!("{}", path.display());
            return Ok(());
        }
        ConfigAction::Presets => {
            let ms: Vec<String> = DURATION_PRESETS_MS.iter().map(u32::to_string).collect();
            println!("Tap duration (ms): {}", ms.join(", "));
            println!("Movement:");
            for (label, v) in MOVEMENT_PRESETS {
                println!("  {:<12} {}", label, v);
            }
            return Ok(());
        }
        ConfigAction::Init { force } => {
            if path.exists() && !force {
                bail!("{} already exists (use --force to overwrite)", path.display());
            }
            config = Config::default();
        }
        ConfigAction::SetDuration { ms } => {
            config.set_max_duration_ms(ms)?;
            if !DURATION_PRESETS_MS.contains(&ms) {
                println!("note: {} ms is not one of the presets", ms);
            }
        }
        ConfigAction::SetMovement { value } => config.set_max_movement(&value)?,
        ConfigAction::Bind { fingers, action } => {
            config.bindings.set(fingers, &action)?;
            config.validate()?;
        }
        ConfigAction::Enable => config.enabled = true,
        ConfigAction::Disable => config.enabled = false,
    }
    config.save(path).with_context(|| format!("saving {}", path.display()))?;
    println!("Saved {}", path.display());
    Ok(())
}
