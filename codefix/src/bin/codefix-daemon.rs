// codefix-daemon: background HTTP server for project file access
//
// Responsibilities:
// - Hold the in-memory session registry and push channels
// - Serve the authenticated file and session routes on localhost
// - Sweep idle sessions and exit when none remain (unless --server)
//
// Never prompts; the CLI prepares settings before spawning it.

use anyhow::{Context, Result};
use clap::Parser;
use codefix_lib::server;
use codefix_lib::session::config::{self, DaemonConfig, Settings, DEFAULT_HOST, DEFAULT_PORT};
use codefix_lib::session::lifecycle::LifecycleMode;
use codefix_lib::session::registry::IdentityMode;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(name = "codefix-daemon", version, about = "Local file-access daemon")]
struct Args {
    /// Port to listen on (defaults to the settings file, then 60280)
    #[arg(long)]
    port: Option<u16>,

    /// Address to bind
    #[arg(long, default_value = DEFAULT_HOST)]
    host: String,

    /// Shared secret (defaults to CODEFIX_KEY, then the settings file)
    #[arg(long)]
    key: Option<String>,

    /// Project directory registered at startup
    #[arg(long)]
    project: Option<PathBuf>,

    /// Identifier for the startup project
    #[arg(long)]
    id: Option<String>,

    #[arg(long, value_enum, default_value_t = IdentityMode::Path)]
    identity_mode: IdentityMode,

    /// Keep running with no registered projects
    #[arg(long)]
    server: bool,

    /// Seconds without a keepalive before a session expires
    #[arg(long, default_value_t = 60, value_parser = clap::value_parser!(u64).range(1..))]
    inactivity_secs: u64,

    /// Require the shared secret on /sync as well
    #[arg(long)]
    sync_requires_key: bool,

    /// Settings directory (defaults to CODEFIX_CONFIG_DIR, then ~/.codespin)
    #[arg(long)]
    config_dir: Option<PathBuf>,
}

fn build_config(args: Args) -> Result<DaemonConfig> {
    let dir = args.config_dir.unwrap_or_else(config::config_dir);
    let settings = Settings::load(&dir)?;
    let secret = config::resolve_secret(args.key, settings.as_ref())?;

    let project = match args.project {
        Some(path) if path.is_relative() => Some(
            std::env::current_dir()
                .context("Failed to read current directory")?
                .join(path),
        ),
        other => other,
    };

    let window = Duration::from_secs(args.inactivity_secs);
    let mut config = DaemonConfig::new(secret);
    config.host = args.host;
    config.port = args
        .port
        .or_else(|| settings.as_ref().and_then(|s| s.port))
        .unwrap_or(DEFAULT_PORT);
    config.project = project.map(|p| p.to_string_lossy().into_owned());
    config.project_id = args.id;
    config.identity_mode = args.identity_mode;
    config.lifecycle_mode = if args.server {
        LifecycleMode::Server
    } else {
        LifecycleMode::AutoExit
    };
    config.inactivity_window = window;
    config.sweep_interval = window;
    config.sync_requires_key = args.sync_requires_key;

    Ok(config)
}

async fn run(args: Args) -> Result<()> {
    let config = build_config(args)?;
    let reason = server::run(config).await?;
    tracing::info!("Daemon stopped ({})", reason);
    Ok(())
}

fn main() {
    codefix_lib::init_tracing();
    let args = Args::parse();

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("codefix-daemon: failed to start runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run(args)) {
        tracing::error!("{:#}", e);
        eprintln!("codefix-daemon: {:#}", e);
        std::process::exit(1);
    }
}
