// HTTP surface of the daemon
// Routes, shared state, and the serve loop with graceful shutdown.

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod sync;

use crate::session::auth::AuthGate;
use crate::session::channel::ChannelRouter;
use crate::session::config::DaemonConfig;
use crate::session::lifecycle::{shutdown_channel, Shutdown, ShutdownReason, Supervisor};
use crate::session::path_guard;
use crate::session::protocol::{ErrorKind, Session};
use crate::session::registry::{IdentityMode, Registry};
use anyhow::{Context, Result};
use axum::http::{header, HeaderName, HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use chrono::Utc;
use error::ApiError;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, RwLock};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

/// Version reported by `GET /about`, fixed at build time
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Browser origins allowed to call the daemon
pub const ALLOWED_ORIGINS: &[&str] = &[
    "https://chatgpt.com",
    "https://chat.openai.com",
    "https://claude.ai",
];

/// Shared state handed to every handler and to the sweeper
pub struct AppState {
    pub registry: Arc<RwLock<Registry>>,
    pub channels: Arc<ChannelRouter>,
    pub auth: AuthGate,
    pub identity_mode: IdentityMode,
    pub sync_requires_key: bool,
    pub shutdown: Shutdown,
    /// Session registered at startup; target of routes without an identifier
    pub default_project: Option<String>,
}

impl AppState {
    pub fn new(config: &DaemonConfig, shutdown: Shutdown) -> Self {
        Self {
            registry: Arc::new(RwLock::new(Registry::new(config.inactivity_window))),
            channels: Arc::new(ChannelRouter::new()),
            auth: AuthGate::new(&config.secret),
            identity_mode: config.identity_mode,
            sync_requires_key: config.sync_requires_key,
            shutdown,
            default_project: None,
        }
    }

    /// Create or refresh the session for `project_path`.
    ///
    /// A caller-supplied identifier is used as given and must match the
    /// session already serving the root, if any. Without one, the serving
    /// session is refreshed; a new root is keyed by its normalized path or a
    /// fresh token depending on the identity mode.
    pub async fn register_project(
        &self,
        identifier: Option<&str>,
        project_path: &str,
    ) -> Result<Session, ApiError> {
        let root = path_guard::normalize_root(project_path)
            .map_err(|e| ApiError::with_message(ErrorKind::InvalidPath, e.to_string()))?;
        if !tokio::fs::metadata(&root)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
        {
            return Err(ApiError::with_message(
                ErrorKind::InvalidPath,
                format!("{} is not a directory", root.display()),
            ));
        }
        let root = root.to_string_lossy().into_owned();

        let mut registry = self.registry.write().await;
        let requested = identifier.filter(|id| !id.trim().is_empty());
        let identifier = match (requested, registry.find_by_root(&root)) {
            (Some(id), _) => id.to_string(),
            (None, Some(existing)) => existing.identifier.clone(),
            (None, None) => match self.identity_mode {
                IdentityMode::Path => root.clone(),
                IdentityMode::GeneratedToken => registry.unused_identifier(),
            },
        };

        let session = registry.register(&identifier, &root, Utc::now())?;
        tracing::info!(
            identifier = %session.identifier,
            root = %session.root_path,
            "Registered project"
        );
        Ok(session)
    }

    /// Root of a live session
    pub async fn session_root(&self, identifier: &str) -> Result<PathBuf, ApiError> {
        self.registry
            .read()
            .await
            .get(identifier)
            .map(|s| PathBuf::from(&s.root_path))
            .ok_or_else(|| {
                ApiError::with_message(
                    ErrorKind::InvalidProjectId,
                    format!("Unknown project '{}'", identifier),
                )
            })
    }

    /// Identifier given by the caller, or the startup project
    pub fn project_or_default(&self, identifier: Option<String>) -> Result<String, ApiError> {
        identifier
            .filter(|id| !id.trim().is_empty())
            .or_else(|| self.default_project.clone())
            .ok_or_else(|| {
                ApiError::with_message(ErrorKind::InvalidProjectId, "No project specified")
            })
    }
}

fn cors_layer() -> CorsLayer {
    let origins = ALLOWED_ORIGINS
        .iter()
        .map(|origin| HeaderValue::from_static(*origin));

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static("access-control-allow-private-network"),
        ])
        .allow_private_network(true)
}

/// Build the router over `state`
pub fn router(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route("/register", post(handlers::register))
        .route("/keepalive", post(handlers::keepalive))
        .route("/projects", get(handlers::list_projects))
        .route("/files", get(handlers::read_default_root))
        .route(
            "/files/*path",
            get(handlers::read_default).post(handlers::write_default),
        )
        .route(
            "/projects/:identifier/files",
            get(handlers::read_project_root),
        )
        .route(
            "/projects/:identifier/files/*path",
            get(handlers::read_project).post(handlers::write_project),
        )
        .route("/send", post(handlers::send))
        .route("/kill", post(handlers::kill))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::require_key,
        ));

    Router::new()
        .route("/about", get(handlers::about))
        .route("/sync", get(sync::sync_by_query))
        .route("/sync/:identifier", get(sync::sync_by_path))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer())
        .with_state(state)
}

/// Bind `host:port` and serve until shutdown
pub async fn run(config: DaemonConfig) -> Result<ShutdownReason> {
    let addr = config.bind_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    serve(listener, config).await
}

/// Serve on an already-bound listener until shutdown
pub async fn serve(listener: TcpListener, config: DaemonConfig) -> Result<ShutdownReason> {
    let (shutdown, signal) = shutdown_channel();
    let mut state = AppState::new(&config, shutdown.clone());

    if let Some(project) = &config.project {
        let session = state
            .register_project(config.project_id.as_deref(), project)
            .await
            .with_context(|| format!("Failed to register project {}", project))?;
        state.default_project = Some(session.identifier);
    }

    let state = Arc::new(state);
    let sweeper = Supervisor::new(
        state.registry.clone(),
        state.channels.clone(),
        config.lifecycle_mode,
        shutdown,
    )
    .spawn(config.sweep_interval);

    let local_addr = listener.local_addr().context("Listener has no address")?;
    tracing::info!(
        mode = ?config.lifecycle_mode,
        identity = %config.identity_mode,
        "Listening on http://{}",
        local_addr
    );

    let (reason_tx, reason_rx) = oneshot::channel();
    axum::serve(listener, router(state.clone()))
        .with_graceful_shutdown(async move {
            let reason = signal.wait().await;
            tracing::info!("Shutting down: {}", reason);
            let _ = reason_tx.send(reason);
        })
        .await
        .context("Server error")?;

    sweeper.abort();
    let closed = state.channels.close_all().await;
    tracing::info!(closed, "Closed push connections");

    Ok(reason_rx.await.unwrap_or(ShutdownReason::Signal))
}
