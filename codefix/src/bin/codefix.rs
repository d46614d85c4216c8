// codefix: CLI for starting and managing codefix-daemon
//
// Commands:
//   codefix [start] [--project <path>] [--id <id>] [--foreground] [--server] [--identity-mode <mode>]
//   codefix key [<key>]
//   codefix port [<port>]
//   codefix kill
//   codefix stop-all

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use codefix_lib::server;
use codefix_lib::session::config::{self, DaemonConfig, Settings, KEY_ENV};
use codefix_lib::session::daemon_client::{self, DAEMON_BIN_NAME};
use codefix_lib::session::lifecycle::LifecycleMode;
use codefix_lib::session::path_guard;
use codefix_lib::session::registry::IdentityMode;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

const READY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Parser)]
#[command(name = "codefix", version, about = "Give browser coding agents access to local projects")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    start: StartArgs,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the daemon (or register with a running one)
    Start(StartArgs),
    /// Show or set the shared secret
    Key { key: Option<String> },
    /// Show or set the port
    Port { port: Option<u16> },
    /// Ask the running daemon to exit
    Kill,
    /// Terminate every codefix-daemon process
    StopAll,
}

#[derive(Debug, Clone, Default, Args)]
struct StartArgs {
    /// Project directory (defaults to the current directory)
    #[arg(long)]
    project: Option<PathBuf>,

    /// Identifier for the project
    #[arg(long)]
    id: Option<String>,

    /// Run the server in this process instead of detaching
    #[arg(long)]
    foreground: bool,

    /// Keep running with no registered projects
    #[arg(long)]
    server: bool,

    #[arg(long, value_enum, default_value_t = IdentityMode::Path)]
    identity_mode: IdentityMode,
}

/// Ask for a key on stdin
fn prompt_for_key() -> Result<String> {
    print!("No key configured. Enter a key for codefix: ");
    io::stdout().flush().ok();

    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read key from stdin")?;

    let key = line.trim().to_string();
    if key.is_empty() {
        bail!("Key cannot be empty");
    }
    Ok(key)
}

/// Load settings, creating them interactively on first run
fn load_or_init_settings(dir: &Path) -> Result<Settings> {
    if let Some(settings) = Settings::load(dir)? {
        return Ok(settings);
    }

    let key = match std::env::var(KEY_ENV) {
        Ok(key) if !key.trim().is_empty() => key,
        _ => prompt_for_key()?,
    };
    let settings = Settings::new(key);
    settings.save(dir)?;
    println!(
        "Saved settings to {}",
        config::settings_file(dir).display()
    );
    Ok(settings)
}

fn resolve_project(project: Option<PathBuf>) -> Result<String> {
    let cwd = std::env::current_dir().context("Failed to read current directory")?;
    let path = match project {
        Some(path) if path.is_relative() => cwd.join(path),
        Some(path) => path,
        None => cwd,
    };
    let root = path_guard::normalize_root(&path.to_string_lossy())?;
    if !root.is_dir() {
        bail!("{} is not a directory", root.display());
    }
    Ok(root.to_string_lossy().into_owned())
}

async fn cmd_start(args: StartArgs, dir: &Path) -> Result<()> {
    let settings = load_or_init_settings(dir)?;
    let key = config::resolve_secret(None, Some(&settings))?;
    let port = settings.port();
    let project = resolve_project(args.project)?;
    let url = daemon_client::daemon_url(port);

    if let Some(about) = daemon_client::query_about(port).await {
        let session =
            daemon_client::register_project(port, &key, &project, args.id.as_deref()).await?;
        println!(
            "codefix {} already running at {}; registered {} as {}",
            about.version, url, session.root_path, session.identifier
        );
        return Ok(());
    }

    if args.foreground {
        codefix_lib::init_tracing();
        let mut config = DaemonConfig::new(key);
        config.port = port;
        config.project = Some(project);
        config.project_id = args.id;
        config.identity_mode = args.identity_mode;
        if args.server {
            config.lifecycle_mode = LifecycleMode::Server;
        }
        println!("codefix listening at {}", url);
        let reason = server::run(config).await?;
        println!("codefix stopped ({})", reason);
        return Ok(());
    }

    let daemon_path = daemon_client::resolve_daemon_path().with_context(|| {
        format!(
            "Could not find {} next to this executable",
            DAEMON_BIN_NAME
        )
    })?;

    let mut daemon_args = vec![
        "--port".to_string(),
        port.to_string(),
        "--project".to_string(),
        project.clone(),
        "--identity-mode".to_string(),
        args.identity_mode.to_string(),
        "--config-dir".to_string(),
        dir.to_string_lossy().into_owned(),
    ];
    if let Some(id) = args.id {
        daemon_args.push("--id".to_string());
        daemon_args.push(id);
    }
    if args.server {
        daemon_args.push("--server".to_string());
    }

    let pid = daemon_client::spawn_detached(&daemon_path, &daemon_args)?;
    daemon_client::wait_until_ready(port, READY_TIMEOUT).await?;
    println!("codefix running at {} (pid {}) serving {}", url, pid, project);
    Ok(())
}

fn cmd_key(key: Option<String>, dir: &Path) -> Result<()> {
    let existing = Settings::load(dir)?;
    match key {
        None => match existing {
            Some(settings) => println!("{}", settings.key),
            None => println!("No key set. Run `codefix key <KEY>`."),
        },
        Some(key) => {
            if key.trim().is_empty() {
                bail!("Key cannot be empty");
            }
            let mut settings = existing.unwrap_or_else(|| Settings::new(""));
            settings.key = key.trim().to_string();
            settings.save(dir)?;
            println!("Key updated");
        }
    }
    Ok(())
}

fn cmd_port(port: Option<u16>, dir: &Path) -> Result<()> {
    let existing = Settings::load(dir)?;
    match port {
        None => {
            let port = existing
                .map(|s| s.port())
                .unwrap_or(config::DEFAULT_PORT);
            println!("{}", port);
        }
        Some(port) => {
            let Some(mut settings) = existing else {
                bail!("No key set. Run `codefix key <KEY>` first.");
            };
            settings.port = Some(port);
            settings.save(dir)?;
            println!("Port set to {}", port);
        }
    }
    Ok(())
}

async fn cmd_kill(dir: &Path) -> Result<()> {
    let settings = Settings::load(dir)?;
    let key = config::resolve_secret(None, settings.as_ref())?;
    let port = settings
        .as_ref()
        .map(|s| s.port())
        .unwrap_or(config::DEFAULT_PORT);

    let message = daemon_client::kill_server(port, &key).await?;
    println!("{}", message);
    Ok(())
}

fn cmd_stop_all() -> Result<()> {
    let count = daemon_client::kill_by_name(DAEMON_BIN_NAME)?;
    println!("Stopped {} {} process(es)", count, DAEMON_BIN_NAME);
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let dir = config::config_dir();

    match cli.command {
        None => cmd_start(cli.start, &dir).await,
        Some(Command::Start(args)) => cmd_start(args, &dir).await,
        Some(Command::Key { key }) => cmd_key(key, &dir),
        Some(Command::Port { port }) => cmd_port(port, &dir),
        Some(Command::Kill) => cmd_kill(&dir).await,
        Some(Command::StopAll) => cmd_stop_all(),
    }
}
