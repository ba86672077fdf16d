//! hostwarden: keeps the gateway, the model server and the database
//! container alive, and restores the agent state tree from a snapshot when
//! the gateway stays down.
//!
//! # Usage
//!
//! ```bash
//! # Daemon: poll every interval, self-heal when needed
//! hostwarden run --status-addr 127.0.0.1:18800
//!
//! # One-off probe report, no state change
//! hostwarden check
//!
//! # Lifecycle and snapshots
//! hostwarden restart gateway
//! hostwarden snapshot create
//! hostwarden restore 20260101-030000-manual
//! ```
//!
//! # Environment Variables
//!
//! - `HOSTWARDEN_CONFIG`: path to the TOML config file
//! - `RUST_LOG`: logging level (default: info)
//! - `SELF_HEAL_*`, `AUTO_BACKUP_*`, `TELEGRAM_*`, ...: see `config`

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use hostwarden::config::WardenConfig;
use hostwarden::control::{cleanup_containers, ControlReport, ServiceControl, ServiceController};
use hostwarden::health::{HttpCheck, ProbeSet, ReqwestCheck, ServiceId};
use hostwarden::lockfile::ProcessLock;
use hostwarden::notify::sink_from_config;
use hostwarden::runner::{CommandRunner, SystemRunner};
use hostwarden::selfheal::SelfHealer;
use hostwarden::snapshot::{SnapshotKind, SnapshotStore};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "hostwarden")]
#[command(about = "Host service health monitor with snapshot-based self-healing")]
#[command(version)]
struct CliArgs {
    /// Path to hostwarden.toml (overrides HOSTWARDEN_CONFIG)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Serve the status endpoint on this address (overrides [api] bind)
    #[arg(long, value_name = "HOST:PORT")]
    status_addr: Option<String>,

    #[command(subcommand)]
    command: SubCommand,
}

#[derive(clap::Subcommand, Debug)]
enum SubCommand {
    /// Run the monitoring and self-heal loop until interrupted
    Run,
    /// Probe every service once and print the report
    Check,
    /// Run one full self-heal cycle and print its outcome as JSON
    Cycle,
    /// Start a service (no-op when it is already healthy)
    Start { service: ServiceId },
    /// Stop a service
    Stop { service: ServiceId },
    /// Restart a service
    Restart { service: ServiceId },
    /// Prune unused containers, volumes and images
    Cleanup,
    /// Manage snapshot points
    #[command(subcommand)]
    Snapshot(SnapshotCommand),
    /// Restore a snapshot point and restart the gateway
    Restore { point: String },
    /// Print the last status document
    Status,
}

#[derive(clap::Subcommand, Debug)]
enum SnapshotCommand {
    /// Create a manual snapshot point
    Create,
    /// List snapshot points, newest first
    List,
    /// Apply retention to automatic points
    Prune,
}

impl SubCommand {
    /// Read-only commands may run next to a live daemon.
    const fn needs_lock(&self) -> bool {
        !matches!(self, Self::Check | Self::Status | Self::Snapshot(SnapshotCommand::List))
    }
}

// ============================================================================
// Wiring
// ============================================================================

/// Shared components built once from the config.
struct Components {
    runner: Arc<dyn CommandRunner>,
    probes: ProbeSet,
    controller: Arc<ServiceController>,
}

impl Components {
    fn build(config: &WardenConfig) -> Self {
        let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner);
        let http: Arc<dyn HttpCheck> = Arc::new(ReqwestCheck::new());
        let probes = ProbeSet::from_config(config, runner.clone(), http.clone());
        let controller = Arc::new(ServiceController::new(config, runner.clone(), http, probes.clone()));
        Self {
            runner,
            probes,
            controller,
        }
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Cancel `token` on Ctrl+C or SIGTERM.
fn spawn_shutdown_listener(token: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut term) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => info!("Received Ctrl+C, shutting down"),
                        _ = term.recv() => info!("Received SIGTERM, shutting down"),
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Could not install SIGTERM handler, Ctrl+C only");
                    tokio::signal::ctrl_c().await.ok();
                    info!("Received Ctrl+C, shutting down");
                }
            }
        }
        #[cfg(not(unix))]
        {
            tokio::signal::ctrl_c().await.ok();
            info!("Received Ctrl+C, shutting down");
        }
        token.cancel();
    });
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).context("Failed to render JSON")?);
    Ok(())
}

fn print_control(report: &ControlReport) {
    let marker = if report.is_certain() { "ok" } else { "unconfirmed" };
    println!("[{marker}] {} {}: {}", report.action, report.service, report.message);
}

// ============================================================================
// Commands
// ============================================================================

async fn run_daemon(config: &WardenConfig, status_addr: Option<String>) -> Result<()> {
    let parts = Components::build(config);
    let store = SnapshotStore::open(&config.snapshots).context("Failed to open snapshot store")?;
    let notifier = sink_from_config(&config.notify);
    let healer = SelfHealer::new(config, parts.probes, store, parts.controller, notifier);

    let cancel = CancellationToken::new();
    spawn_shutdown_listener(cancel.clone());

    let api_task = status_addr.or_else(|| config.api.bind.clone()).map(|addr| {
        let status = healer.status_handle();
        let token = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = hostwarden::api::serve(&addr, status, token).await {
                error!(addr = %addr, error = %e, "Status API failed");
            }
        })
    });

    healer.run(cancel.clone()).await;

    cancel.cancel();
    if let Some(task) = api_task {
        task.await.ok();
    }
    info!("hostwarden stopped");
    Ok(())
}

async fn run_command(config: &WardenConfig, args: CliArgs) -> Result<()> {
    match args.command {
        SubCommand::Run => run_daemon(config, args.status_addr).await?,

        SubCommand::Check => {
            let parts = Components::build(config);
            let report = parts.probes.run(Utc::now()).await;
            println!("{}", report.render());
        }

        SubCommand::Cycle => {
            let parts = Components::build(config);
            let store = SnapshotStore::open(&config.snapshots).context("Failed to open snapshot store")?;
            let healer = SelfHealer::new(config, parts.probes, store, parts.controller, sink_from_config(&config.notify));
            let outcome = healer.run_cycle_at(Utc::now()).await.context("Self-heal cycle failed")?;
            print_json(&outcome)?;
        }

        SubCommand::Start { service } => {
            let report = Components::build(config).controller.start(service).await?;
            print_control(&report);
        }
        SubCommand::Stop { service } => {
            let report = Components::build(config).controller.stop(service).await?;
            print_control(&report);
        }
        SubCommand::Restart { service } => {
            let report = Components::build(config).controller.restart(service).await?;
            print_control(&report);
        }

        SubCommand::Cleanup => {
            let parts = Components::build(config);
            let report = cleanup_containers(
                parts.runner.as_ref(),
                &config.container.runtime,
                std::time::Duration::from_secs(config.control.command_timeout_secs),
            )
            .await;
            println!("{}", report.message);
            for failure in &report.failures {
                println!("  failed: {failure}");
            }
        }

        SubCommand::Snapshot(cmd) => {
            let store = SnapshotStore::open(&config.snapshots).context("Failed to open snapshot store")?;
            match cmd {
                SnapshotCommand::Create => {
                    let point = store
                        .create_snapshot(SnapshotKind::Manual, Utc::now())
                        .await
                        .context("Failed to create snapshot")?;
                    println!("{} ({} bytes)", point.name, point.size_bytes);
                }
                SnapshotCommand::List => {
                    let points = store.list_details().context("Failed to list snapshots")?;
                    if points.is_empty() {
                        println!("No snapshot points in {}", store.root().display());
                    }
                    for p in points {
                        println!(
                            "{:<32} {:<13} {:>12} bytes  {}",
                            p.name,
                            p.source_type.as_str(),
                            p.size_bytes,
                            p.created_at.format("%Y-%m-%d %H:%M:%S")
                        );
                    }
                }
                SnapshotCommand::Prune => {
                    let report = store
                        .prune_auto_points(config.snapshots.max_age_days, config.snapshots.max_count, Utc::now())
                        .context("Retention pass failed")?;
                    print_json(&report)?;
                }
            }
        }

        SubCommand::Restore { point } => {
            let parts = Components::build(config);
            let store = SnapshotStore::open(&config.snapshots).context("Failed to open snapshot store")?;
            let outcome = store
                .restore(&point, parts.controller.as_ref(), Utc::now())
                .await
                .with_context(|| format!("Failed to restore {point}"))?;
            print_json(&outcome)?;
            if !outcome.ok {
                anyhow::bail!("restore of {point} incomplete: {}", outcome.message);
            }
        }

        SubCommand::Status => {
            let path = config.status_path();
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("No status file at {} (has a cycle run yet?)", path.display()))?;
            println!("{contents}");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let args = CliArgs::parse();
    init_tracing(args.log_json);

    let config = WardenConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    let _lock = if args.command.needs_lock() {
        Some(ProcessLock::acquire(&config.monitor.data_dir).context("Failed to acquire process lock")?)
    } else {
        None
    };

    run_command(&config, args).await
}
