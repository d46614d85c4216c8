use super::polling::{wait_for_port, WaitError};
use std::fmt;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const READY_TIMEOUT: Duration = Duration::from_secs(10);

/// RAII wrapper that ensures the daemon process is cleaned up.
pub struct DaemonGuard {
    child: Child,
    pub port: u16,
}

impl DaemonGuard {
    /// Spawn the compiled daemon without waiting for it to listen.
    pub fn spawn(config_dir: &Path, port: u16, extra_args: &[&str]) -> Result<Self, DaemonError> {
        let child = Command::new(daemon_binary())
            .env("CODEFIX_CONFIG_DIR", config_dir)
            .env_remove("CODEFIX_KEY")
            .arg("--port")
            .arg(port.to_string())
            .args(extra_args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(DaemonError::SpawnFailed)?;

        Ok(Self { child, port })
    }

    /// Spawn the daemon and wait until its port accepts connections.
    pub fn start(config_dir: &Path, port: u16, extra_args: &[&str]) -> Result<Self, DaemonError> {
        let guard = Self::spawn(config_dir, port, extra_args)?;
        println!("Started codefix-daemon (pid {}) on port {}", guard.pid(), port);
        wait_for_port(port, READY_TIMEOUT).map_err(DaemonError::ReadyTimeout)?;
        Ok(guard)
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{}", self.port, path)
    }

    /// Wait for the daemon to exit on its own.
    pub fn wait_for_exit(&mut self, timeout: Duration) -> Option<ExitStatus> {
        let start = Instant::now();
        loop {
            match self.child.try_wait() {
                Ok(Some(status)) => return Some(status),
                Ok(None) if start.elapsed() < timeout => {
                    thread::sleep(Duration::from_millis(50));
                }
                _ => return None,
            }
        }
    }
}

impl Drop for DaemonGuard {
    fn drop(&mut self) {
        if let Ok(Some(_)) = self.child.try_wait() {
            return;
        }

        if let Err(err) = self.child.kill() {
            eprintln!(
                "Failed to terminate codefix-daemon pid {}: {}",
                self.child.id(),
                err
            );
            return;
        }

        let _ = self.child.wait();
    }
}

fn daemon_binary() -> &'static str {
    env!("CARGO_BIN_EXE_codefix-daemon")
}

/// Errors that can occur when starting the daemon for tests.
#[derive(Debug)]
pub enum DaemonError {
    SpawnFailed(std::io::Error),
    ReadyTimeout(WaitError),
}

impl fmt::Display for DaemonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SpawnFailed(err) => write!(f, "failed to spawn daemon: {}", err),
            Self::ReadyTimeout(err) => write!(f, "daemon never became ready: {}", err),
        }
    }
}

impl std::error::Error for DaemonError {}
