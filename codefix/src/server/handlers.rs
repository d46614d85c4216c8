// Route handlers
// Each handler validates its input, touches the registry or filesystem,
// and answers with the JSON envelope.

use super::error::ApiError;
use super::AppState;
use crate::session::files;
use crate::session::lifecycle::ShutdownReason;
use crate::session::protocol::{
    AboutInfo, ApiResponse, ChannelNotification, ErrorKind, KeepaliveRequest, MessageResult,
    PathContents, RegisterRequest, SendRequest, SendResult, Session, WriteFileRequest,
};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;

pub type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

fn ok<T>(result: T) -> ApiResult<T> {
    Ok(Json(ApiResponse::ok(result)))
}

fn message(text: impl Into<String>) -> ApiResult<MessageResult> {
    ok(MessageResult {
        message: text.into(),
    })
}

/// `?project=<identifier>` on the default-project file routes
#[derive(Debug, Default, Deserialize)]
pub struct ProjectQuery {
    #[serde(default)]
    pub project: Option<String>,
}

pub async fn about() -> ApiResult<AboutInfo> {
    ok(AboutInfo {
        name: "codefix".to_string(),
        version: super::VERSION.to_string(),
    })
}

pub async fn register(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> ApiResult<Session> {
    let Json(request) = payload?;
    let identifier = request.identifier.filter(|id| !id.trim().is_empty());

    let Some(project_path) = request.project_path.filter(|p| !p.trim().is_empty()) else {
        // Without a path, only an existing session can be refreshed
        if let Some(id) = identifier.as_deref() {
            let mut registry = state.registry.write().await;
            if registry.touch(id, Utc::now()) {
                if let Some(session) = registry.get(id) {
                    return ok(session.clone());
                }
            }
        }
        return Err(ApiError::new(ErrorKind::MissingProjectPath));
    };

    let session = state
        .register_project(identifier.as_deref(), &project_path)
        .await?;
    ok(session)
}

pub async fn keepalive(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<KeepaliveRequest>, JsonRejection>,
) -> ApiResult<Session> {
    let Json(request) = payload?;
    let identifier = request
        .identifier
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ApiError::with_message(ErrorKind::InvalidProjectId, "Missing identifier"))?;

    let mut registry = state.registry.write().await;
    if !registry.touch(&identifier, Utc::now()) {
        return Err(ApiError::with_message(
            ErrorKind::InvalidProjectId,
            format!("Project '{}' is not registered", identifier),
        ));
    }

    registry
        .get(&identifier)
        .cloned()
        .map(|session| Json(ApiResponse::ok(session)))
        .ok_or_else(|| ApiError::new(ErrorKind::InvalidProjectId))
}

pub async fn list_projects(State(state): State<Arc<AppState>>) -> ApiResult<Vec<Session>> {
    ok(state.registry.read().await.list())
}

// ============================================================================
// File routes
// ============================================================================

async fn read_in_project(
    state: &AppState,
    identifier: &str,
    request_path: String,
) -> ApiResult<PathContents> {
    let root = state.session_root(identifier).await?;

    let contents = tokio::task::spawn_blocking(move || files::read_path(&root, &request_path))
        .await
        .map_err(|e| {
            tracing::error!("Read task failed: {}", e);
            ApiError::new(ErrorKind::UnableToReadPath)
        })?
        .map_err(ApiError::from_read)?;

    ok(contents)
}

async fn write_in_project(
    state: &AppState,
    identifier: &str,
    request_path: String,
    payload: Result<Json<WriteFileRequest>, JsonRejection>,
) -> ApiResult<MessageResult> {
    let Json(request) = payload?;
    let contents = request
        .contents
        .ok_or_else(|| ApiError::with_message(ErrorKind::InvalidRequest, "Missing contents"))?;
    let root = state.session_root(identifier).await?;

    let (path, body) = (request_path.clone(), contents.clone());
    let written = tokio::task::spawn_blocking(move || files::write_file(&root, &path, &body))
        .await
        .map_err(|e| {
            tracing::error!("Write task failed: {}", e);
            ApiError::new(ErrorKind::CannotWriteFile)
        })?
        .map_err(ApiError::from_write)?;

    tracing::info!(identifier, path = %written.display(), "File written");

    // The session may have been swept while the write was running
    if state.registry.read().await.contains(identifier) {
        let notification = ChannelNotification::FileWritten {
            file_path: request_path,
            contents,
        };
        if let Err(e) = state
            .channels
            .send_to_session(identifier, &notification)
            .await
        {
            tracing::warn!("{}", e);
        }
    }

    message("File written successfully")
}

pub async fn read_default_root(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ProjectQuery>,
) -> ApiResult<PathContents> {
    let identifier = state.project_or_default(query.project)?;
    read_in_project(&state, &identifier, String::new()).await
}

pub async fn read_default(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
    Query(query): Query<ProjectQuery>,
) -> ApiResult<PathContents> {
    let identifier = state.project_or_default(query.project)?;
    read_in_project(&state, &identifier, path).await
}

pub async fn write_default(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
    Query(query): Query<ProjectQuery>,
    payload: Result<Json<WriteFileRequest>, JsonRejection>,
) -> ApiResult<MessageResult> {
    let identifier = state.project_or_default(query.project)?;
    write_in_project(&state, &identifier, path, payload).await
}

pub async fn read_project_root(
    State(state): State<Arc<AppState>>,
    Path(identifier): Path<String>,
) -> ApiResult<PathContents> {
    read_in_project(&state, &identifier, String::new()).await
}

pub async fn read_project(
    State(state): State<Arc<AppState>>,
    Path((identifier, path)): Path<(String, String)>,
) -> ApiResult<PathContents> {
    read_in_project(&state, &identifier, path).await
}

pub async fn write_project(
    State(state): State<Arc<AppState>>,
    Path((identifier, path)): Path<(String, String)>,
    payload: Result<Json<WriteFileRequest>, JsonRejection>,
) -> ApiResult<MessageResult> {
    write_in_project(&state, &identifier, path, payload).await
}

// ============================================================================
// Push and lifecycle
// ============================================================================

pub async fn send(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<SendRequest>, JsonRejection>,
) -> ApiResult<SendResult> {
    let Json(request) = payload?;
    let message = request
        .message
        .ok_or_else(|| ApiError::with_message(ErrorKind::InvalidRequest, "Missing message"))?;
    let identifier = state.project_or_default(request.identifier)?;

    if !state.registry.read().await.contains(&identifier) {
        return Err(ApiError::with_message(
            ErrorKind::InvalidProjectId,
            format!("Project '{}' is not registered", identifier),
        ));
    }

    let delivered = match state.channels.send_to_session(&identifier, &message).await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!("{}", e);
            false
        }
    };

    ok(SendResult { delivered })
}

pub async fn kill(State(state): State<Arc<AppState>>) -> ApiResult<MessageResult> {
    tracing::info!("Kill requested");
    // Graceful shutdown drains this response before the listener closes
    state.shutdown.trigger(ShutdownReason::Killed);
    message("Server shutting down")
}
