//! # Butler
//!
//! Runs periodic automation tasks against many instances of a target
//! application while sharing one keyboard, mouse and foreground.
//!
//! Usage:
//!   butler run                       # Run until Ctrl-C
//!   butler run --duration 30 --json  # Run 30 s, print status as JSON
//!   butler check-config              # Print the resolved config
//!   butler init-config               # Write a starter config

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use butler_core::sim::{SimCapture, SimDesktop, SimProbe};
use butler_core::{
    ButlerConfig, MouseButton, ProbedProcess, ProcessId, TaskConfig, TaskKindConfig,
    config::SimProcessConfig,
};
use butler_scheduler::{EngineStatus, ProcessWatcher, SchedulerEngine};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "butler",
    version,
    about = "🎮 Butler: multi-instance task scheduling with serialized input"
)]
struct Cli {
    /// Config file (default: ~/.butler/config.toml)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler against the simulated desktop
    Run {
        /// Stop after this many seconds (default: run until Ctrl-C)
        #[arg(short, long)]
        duration: Option<u64>,

        /// Print the final status as JSON
        #[arg(long)]
        json: bool,
    },
    /// Parse the config and print it with defaults filled in
    CheckConfig,
    /// Write a starter config
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn config_path(cli: &Cli) -> PathBuf {
    match &cli.config {
        Some(p) => PathBuf::from(shellexpand::tilde(p).to_string()),
        None => ButlerConfig::default_path(),
    }
}

fn load_config(path: &PathBuf) -> Result<ButlerConfig> {
    if path.exists() {
        ButlerConfig::load_from(path).with_context(|| format!("loading {}", path.display()))
    } else {
        tracing::warn!("⚠️ No config at {}, using defaults", path.display());
        Ok(ButlerConfig::default())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // "butler" prefixes every workspace crate target
    let filter = if cli.verbose { "butler=debug" } else { "butler=info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let path = config_path(&cli);
    match cli.command {
        Command::Run { duration, json } => {
            let config = load_config(&path)?;
            run(config, duration.map(Duration::from_secs), json).await
        }
        Command::CheckConfig => {
            let config = load_config(&path)?;
            println!("{}", config.to_toml()?);
            Ok(())
        }
        Command::InitConfig { force } => {
            if path.exists() && !force {
                println!("⚠️  {} already exists (use --force to overwrite)", path.display());
                return Ok(());
            }
            starter_config().save_to(&path)?;
            println!("✅ Wrote {}", path.display());
            Ok(())
        }
    }
}

async fn run(config: ButlerConfig, duration: Option<Duration>, json: bool) -> Result<()> {
    let desktop = Arc::new(SimDesktop::new());
    desktop.set_grant_focus(config.sim.grant_focus);
    desktop.set_cursor_inside(config.sim.cursor_inside);
    let capture = Arc::new(SimCapture::new());
    let probe = Arc::new(SimProbe::new(
        config
            .sim
            .processes
            .iter()
            .map(|p| ProbedProcess {
                id: p.id,
                disconnected: p.disconnected,
            })
            .collect(),
    ));

    let engine = SchedulerEngine::from_config(&config, desktop, capture);
    let shutdown = CancellationToken::new();

    // Prime the registry so configured tasks find their processes.
    let mut watcher = ProcessWatcher::new(probe, config.watcher.check_interval());
    for event in watcher.poll()? {
        engine.handle_event(event)?;
    }
    let watcher_handle = watcher.spawn(engine.events(), shutdown.child_token());

    for task in butler_tasks::build_all(&config.tasks)? {
        let (id, kind, process) = (task.id(), task.kind().clone(), task.process());
        if let Err(e) = engine.add_task(task) {
            tracing::warn!("⚠️ Skipping {kind} on {process}: {e}");
            continue;
        }
        tracing::info!("📅 Registered {id} ({kind}) on {process}");
    }

    engine.start()?;
    println!("🎮 Butler v{}", env!("CARGO_PKG_VERSION"));
    println!("   👀 Watching:  {}", config.watcher.process_name);
    println!("   ⏱️  Step:      {} ms", config.scheduler.fixed_step_ms);
    println!("   📅 Tasks:     {}", config.tasks.len());
    println!();

    match duration {
        Some(d) => {
            tokio::select! {
                _ = tokio::time::sleep(d) => {}
                _ = tokio::signal::ctrl_c() => {}
            }
        }
        None => {
            tokio::signal::ctrl_c().await?;
        }
    }

    shutdown.cancel();
    engine.stop().await?;
    watcher_handle.await.ok();

    let status = engine.status();
    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        print_status(&status);
    }
    Ok(())
}

fn print_status(status: &EngineStatus) {
    println!(
        "⏱️  {} frames, {} steps, {:.1} s elapsed",
        status.ticks,
        status.fixed_ticks,
        status.uptime_ms as f64 / 1000.0
    );
    println!(
        "🎯 {} actions run, {} failed, {} cancelled, {} deferred, {} focus switches",
        status.arbiter.executed,
        status.arbiter.failed,
        status.arbiter.cancelled,
        status.arbiter.deferred,
        status.arbiter.focus_switches
    );
    for process in &status.processes {
        let state = if process.disconnected { "🔌 disconnected" } else { "🟢 connected" };
        println!("\n🪟 {} {state}", process.id);
        println!("   {:<10} {:<18} {:>5} {:>6} {:<8} STATUS", "TASK", "KIND", "PRIO", "RUNS", "STATE");
        for task in &process.tasks {
            let state = if task.cancelled {
                "cancelled"
            } else if task.paused {
                "paused"
            } else if task.running {
                "running"
            } else if task.enabled {
                "idle"
            } else {
                "stopped"
            };
            println!(
                "   {:<10} {:<18} {:>5} {:>6} {:<8} {}",
                task.id.to_string(),
                task.kind,
                task.priority,
                task.run_count,
                state,
                task.status
            );
            if let Some(err) = &task.last_error {
                println!("   {:<10} ⚠️ {err}", "");
            }
        }
    }
}

/// Two simulated instances with one task of each input style.
fn starter_config() -> ButlerConfig {
    let mut config = ButlerConfig::default();
    config.sim.processes = vec![
        SimProcessConfig {
            id: ProcessId(1001),
            disconnected: false,
        },
        SimProcessConfig {
            id: ProcessId(1002),
            disconnected: false,
        },
    ];
    let task = |process: u32, kind: TaskKindConfig| TaskConfig {
        process: ProcessId(process),
        kind,
        interval_ms: 0,
        interval_variance_ms: 0,
        priority: None,
        paused: false,
    };
    config.tasks = vec![
        task(1001, TaskKindConfig::StatsWatcher),
        task(1001, TaskKindConfig::Mining),
        task(
            1002,
            TaskKindConfig::Click {
                button: MouseButton::Left,
                hold_ctrl: false,
                wait_ms: 500,
            },
        ),
        task(1002, TaskKindConfig::ItemFindPause),
        task(1002, TaskKindConfig::Hunting),
    ];
    config
}
