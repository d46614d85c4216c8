// Client side of the daemon: about query, detached start, kill, kill-by-name
// Used by the `codefix` CLI; the daemon itself never calls into this module.

use crate::session::protocol::{AboutInfo, ApiResponse, MessageResult, RegisterRequest, Session};
use anyhow::{anyhow, bail, Context, Result};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

/// Process name of the background server binary
pub const DAEMON_BIN_NAME: &str = "codefix-daemon";

const ABOUT_TIMEOUT: Duration = Duration::from_secs(1);

/// Base URL of a daemon listening on the local machine
pub fn daemon_url(port: u16) -> String {
    format!("http://127.0.0.1:{}", port)
}

fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .context("Failed to build HTTP client")
}

/// `GET /about`; `None` when nothing answers on the port
pub async fn query_about(port: u16) -> Option<AboutInfo> {
    let client = reqwest::Client::builder()
        .timeout(ABOUT_TIMEOUT)
        .build()
        .ok()?;

    let response = client
        .get(format!("{}/about", daemon_url(port)))
        .send()
        .await
        .ok()?;

    let envelope: ApiResponse<AboutInfo> = response.json().await.ok()?;
    if envelope.success {
        envelope.result
    } else {
        None
    }
}

fn into_result<T>(envelope: ApiResponse<T>, action: &str) -> Result<T> {
    if envelope.success {
        return envelope
            .result
            .ok_or_else(|| anyhow!("{}: daemon returned an empty result", action));
    }

    let kind = envelope
        .error
        .map(|kind| kind.to_string())
        .unwrap_or_else(|| "UNKNOWN".to_string());
    match envelope.message {
        Some(message) => bail!("{} failed: {} ({})", action, kind, message),
        None => bail!("{} failed: {}", action, kind),
    }
}

/// Register `project_path` with a running daemon
pub async fn register_project(
    port: u16,
    key: &str,
    project_path: &str,
    identifier: Option<&str>,
) -> Result<Session> {
    let request = RegisterRequest {
        identifier: identifier.map(str::to_string),
        project_path: Some(project_path.to_string()),
    };

    let envelope: ApiResponse<Session> = http_client()?
        .post(format!("{}/register", daemon_url(port)))
        .bearer_auth(key)
        .json(&request)
        .send()
        .await
        .with_context(|| format!("Failed to reach daemon on port {}", port))?
        .json()
        .await
        .context("Failed to parse register response")?;

    into_result(envelope, "Register")
}

/// `POST /kill?key=...`
pub async fn kill_server(port: u16, key: &str) -> Result<String> {
    let envelope: ApiResponse<MessageResult> = http_client()?
        .post(format!("{}/kill", daemon_url(port)))
        .query(&[("key", key)])
        .send()
        .await
        .with_context(|| format!("No daemon answered on port {}", port))?
        .json()
        .await
        .context("Failed to parse kill response")?;

    into_result(envelope, "Kill").map(|r| r.message)
}

/// Locate the daemon binary next to the running executable
pub fn resolve_daemon_path() -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    let dir = exe.parent()?;
    let name = if cfg!(windows) {
        format!("{}.exe", DAEMON_BIN_NAME)
    } else {
        DAEMON_BIN_NAME.to_string()
    };

    let candidate = dir.join(name);
    candidate.is_file().then_some(candidate)
}

/// Start the daemon binary in its own session with null stdio
pub fn spawn_detached(daemon_path: &Path, args: &[String]) -> Result<u32> {
    let mut cmd = Command::new(daemon_path);
    cmd.args(args);

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        unsafe {
            cmd.pre_exec(|| {
                if libc::setsid() == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }
    }

    let child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .with_context(|| format!("Failed to start daemon at {}", daemon_path.display()))?;

    Ok(child.id())
}

/// Poll `/about` until the daemon answers or `timeout` passes
pub async fn wait_until_ready(port: u16, timeout: Duration) -> Result<AboutInfo> {
    let start = std::time::Instant::now();
    loop {
        if let Some(about) = query_about(port).await {
            return Ok(about);
        }
        if start.elapsed() >= timeout {
            bail!(
                "Daemon did not answer on port {} within {:?}",
                port,
                timeout
            );
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

// ============================================================================
// Kill by process name
// ============================================================================

/// Parse `ps -axo pid=,comm=` output into `(pid, command)` pairs
pub fn parse_ps_output(output: &str) -> Vec<(u32, String)> {
    output
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            let (pid, command) = line.split_once(char::is_whitespace)?;
            let pid = pid.parse().ok()?;
            Some((pid, command.trim().to_string()))
        })
        .collect()
}

/// Pids whose command is `name` (or a path ending in `/name`), excluding `own_pid`
pub fn matching_pids(processes: &[(u32, String)], name: &str, own_pid: u32) -> Vec<u32> {
    let suffix = format!("/{}", name);
    processes
        .iter()
        .filter(|(pid, command)| {
            *pid != own_pid && (command == name || command.ends_with(&suffix))
        })
        .map(|(pid, _)| *pid)
        .collect()
}

/// Send SIGTERM to every process named `name`; returns how many were signalled
#[cfg(unix)]
pub fn kill_by_name(name: &str) -> Result<usize> {
    let output = Command::new("ps")
        .args(["-axo", "pid=,comm="])
        .output()
        .context("Failed to list processes")?;

    if !output.status.success() {
        bail!("ps exited with {}", output.status);
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let processes = parse_ps_output(&stdout);
    let mut killed = 0;

    for pid in matching_pids(&processes, name, std::process::id()) {
        let result = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
        if result == 0 {
            tracing::info!(pid, "Sent SIGTERM");
            killed += 1;
        } else {
            tracing::warn!(
                pid,
                "Failed to signal process: {}",
                std::io::Error::last_os_error()
            );
        }
    }

    Ok(killed)
}

// TODO(windows): enumerate processes with the Toolhelp API
#[cfg(not(unix))]
pub fn kill_by_name(_name: &str) -> Result<usize> {
    bail!("stop-all is only supported on Unix")
}
