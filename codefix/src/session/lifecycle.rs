// Process lifetime: inactivity sweep, shutdown policy, shutdown signalling

use crate::session::channel::ChannelRouter;
use crate::session::protocol::Session;
use crate::session::registry::Registry;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;

/// Whether the daemon exits once it has nothing left to serve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LifecycleMode {
    /// Exit when the last session expires
    #[default]
    AutoExit,
    /// Keep serving with an empty registry
    Server,
}

/// Why the server is stopping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// `POST /kill`
    Killed,
    /// Registry emptied in auto-exit mode
    Inactive,
    /// SIGINT / SIGTERM
    Signal,
}

impl std::fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownReason::Killed => write!(f, "kill request"),
            ShutdownReason::Inactive => write!(f, "no active sessions"),
            ShutdownReason::Signal => write!(f, "signal"),
        }
    }
}

pub struct ShutdownPolicy;

impl ShutdownPolicy {
    pub fn should_shutdown(mode: LifecycleMode, remaining_sessions: usize) -> bool {
        mode == LifecycleMode::AutoExit && remaining_sessions == 0
    }
}

/// Cloneable handle that requests a graceful shutdown
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: mpsc::Sender<ShutdownReason>,
}

/// Receiving side, awaited by the server
#[derive(Debug)]
pub struct ShutdownSignal {
    rx: mpsc::Receiver<ShutdownReason>,
}

pub fn shutdown_channel() -> (Shutdown, ShutdownSignal) {
    let (tx, rx) = mpsc::channel(4);
    (Shutdown { tx }, ShutdownSignal { rx })
}

impl Shutdown {
    /// Request shutdown; a full queue means one is already pending
    pub fn trigger(&self, reason: ShutdownReason) {
        if let Err(mpsc::error::TrySendError::Closed(_)) = self.tx.try_send(reason) {
            tracing::debug!("Shutdown requested ({}) after server stopped", reason);
        }
    }
}

impl ShutdownSignal {
    /// Wait for the first shutdown request or a termination signal
    pub async fn wait(mut self) -> ShutdownReason {
        tokio::select! {
            reason = self.rx.recv() => reason.unwrap_or(ShutdownReason::Signal),
            _ = termination_signal() => ShutdownReason::Signal,
        }
    }
}

#[cfg(unix)]
async fn termination_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(e) => {
            tracing::warn!("Failed to install SIGTERM handler: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn termination_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

/// Periodic sweep over the registry
pub struct Supervisor {
    registry: Arc<RwLock<Registry>>,
    channels: Arc<ChannelRouter>,
    mode: LifecycleMode,
    shutdown: Shutdown,
}

impl Supervisor {
    pub fn new(
        registry: Arc<RwLock<Registry>>,
        channels: Arc<ChannelRouter>,
        mode: LifecycleMode,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            registry,
            channels,
            mode,
            shutdown,
        }
    }

    /// Evict expired sessions, close their channels, apply the shutdown policy
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> Vec<Session> {
        // Channels are dropped under the registry write lock so a session
        // re-registered and re-bound meanwhile keeps its new connection
        let (evicted, remaining) = {
            let mut registry = self.registry.write().await;
            let evicted = registry.sweep(now);
            for session in &evicted {
                tracing::info!(
                    identifier = %session.identifier,
                    root = %session.root_path,
                    "Session expired"
                );
                self.channels.disconnect(&session.identifier).await;
            }
            (evicted, registry.len())
        };

        if ShutdownPolicy::should_shutdown(self.mode, remaining) {
            tracing::info!("No active sessions remain, shutting down");
            self.shutdown.trigger(ShutdownReason::Inactive);
        }

        evicted
    }

    /// Run [`Supervisor::sweep_once`] every `interval`, first tick one interval in
    pub fn spawn(self, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                self.sweep_once(Utc::now()).await;
            }
        })
    }
}
