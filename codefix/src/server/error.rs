// Request-scoped failures and their HTTP rendering

use crate::session::files::FileError;
use crate::session::protocol::{ApiResponse, ErrorKind};
use crate::session::registry::RegistryError;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub kind: ErrorKind,
    pub message: Option<String>,
}

impl ApiError {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
        }
    }

    pub fn with_message(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: Some(message.into()),
        }
    }

    /// Map a file-operation failure for the read routes
    pub fn from_read(err: FileError) -> Self {
        if err.is_containment() {
            return Self::new(ErrorKind::InvalidPath);
        }
        tracing::error!("Read failed: {}", err);
        Self::new(ErrorKind::UnableToReadPath)
    }

    /// Map a file-operation failure for the write routes
    pub fn from_write(err: FileError) -> Self {
        if err.is_containment() {
            return Self::new(ErrorKind::PathOutsideProject);
        }
        tracing::error!("Write failed: {}", err);
        Self::new(ErrorKind::CannotWriteFile)
    }
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorKind::DuplicateIdentifier => StatusCode::CONFLICT,
        ErrorKind::CannotWriteFile | ErrorKind::UnableToReadPath | ErrorKind::CannotLoadVersion => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        ErrorKind::InvalidProjectId
        | ErrorKind::InvalidPath
        | ErrorKind::PathOutsideProject
        | ErrorKind::MissingProjectPath
        | ErrorKind::InvalidRequest => StatusCode::BAD_REQUEST,
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{}: {}", self.kind, message),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body: ApiResponse<()> = ApiResponse::error(self.kind, self.message);
        (status_for(self.kind), Json(body)).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::with_message(ErrorKind::InvalidRequest, rejection.body_text())
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        Self::with_message(ErrorKind::DuplicateIdentifier, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::path_guard::PathGuardError;

    #[test]
    fn test_status_codes() {
        assert_eq!(status_for(ErrorKind::Unauthorized), StatusCode::UNAUTHORIZED);
        assert_eq!(status_for(ErrorKind::DuplicateIdentifier), StatusCode::CONFLICT);
        assert_eq!(status_for(ErrorKind::InvalidProjectId), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_for(ErrorKind::CannotWriteFile),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_guard_failures_differ_by_direction() {
        let escape = || FileError::Guard(PathGuardError::Escape("../x".to_string()));
        assert_eq!(ApiError::from_read(escape()).kind, ErrorKind::InvalidPath);
        assert_eq!(
            ApiError::from_write(escape()).kind,
            ErrorKind::PathOutsideProject
        );
    }

    #[test]
    fn test_io_failures_do_not_leak_detail() {
        let err = FileError::Read {
            path: "/secret/place".into(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        let api = ApiError::from_read(err);
        assert_eq!(api, ApiError::new(ErrorKind::UnableToReadPath));
    }
}
