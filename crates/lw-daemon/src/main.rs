//! livewire: watch a project while you work, report problems when you pause.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use lw_bridge::LiveEvent;
use lw_core::config::LiveConfig;
use lw_daemon::LiveController;
use lw_telemetry::LogFormat;
use tracing::{info, warn};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Debug, Parser)]
#[command(name = "livewire", version, about = "Live development monitoring and auto-remediation")]
struct Args {
    /// Project root to monitor.
    #[arg(short, long, default_value = ".")]
    project: PathBuf,

    /// Config file (defaults to <project>/.live/config.toml).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let project = args
        .project
        .canonicalize()
        .with_context(|| format!("project directory {} not found", args.project.display()))?;

    let config = match &args.config {
        Some(path) => LiveConfig::load_from(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => LiveConfig::load(&project).context("failed to load project config")?,
    };
    config.validate().context("invalid config")?;

    lw_telemetry::init_logging(
        "livewire",
        &config.logging.level,
        LogFormat::from_json_flag(args.json_logs || config.logging.json),
    );

    let controller = LiveController::new(&project, config).context("failed to create controller")?;
    let events = controller.subscribe();
    let activation = controller
        .activate()
        .await
        .context("failed to activate live mode")?;
    for component in activation.components.iter().filter(|c| !c.started) {
        warn!(component = %component.name, error = %component.detail, "component disabled");
    }
    info!(project = %project.display(), session_id = %activation.session_id, "livewire running, ctrl-c to stop");

    let log_events = tokio::spawn(async move {
        while let Ok(event) = events.recv_async().await {
            match event {
                // Shown notifications are already logged by the scheduler.
                LiveEvent::Notification(_) => {}
                other => match serde_json::to_string(&other) {
                    Ok(json) => info!(event = %json, "live event"),
                    Err(e) => warn!(error = %e, "unserialisable live event"),
                },
            }
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("received ctrl-c, shutting down");

    let report = controller
        .deactivate()
        .await
        .context("failed to deactivate live mode")?;
    log_events.abort();

    match (&report.report_path, &report.error) {
        (Some(path), _) => println!("Session report: {}", path.display()),
        (None, Some(error)) => println!("Session report not written: {error}"),
        (None, None) => {}
    }
    Ok(())
}
