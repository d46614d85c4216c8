// Wire protocol - shared structs for daemon <-> client communication
// Every HTTP response is a JSON envelope carrying a `success` flag

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Close code sent to a push connection whose identifier is not registered
pub const CHANNEL_REJECT_CODE: u16 = 4001;

/// Close reason paired with [`CHANNEL_REJECT_CODE`]
pub const CHANNEL_REJECT_REASON: &str = "invalid identifier";

/// A live project/workspace tracked by the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Unique key naming the session (normalized path or generated token)
    pub identifier: String,
    /// Absolute, normalized project root; never changes after creation
    pub root_path: String,
    /// Most recent register/keepalive event
    pub last_seen: DateTime<Utc>,
}

impl Session {
    pub fn new(identifier: String, root_path: String, now: DateTime<Utc>) -> Self {
        Self {
            identifier,
            root_path,
            last_seen: now,
        }
    }

    /// True once the session has gone `window` without a keepalive
    pub fn is_expired(&self, now: DateTime<Utc>, window: Duration) -> bool {
        now.signed_duration_since(self.last_seen) >= window
    }
}

// ============================================================================
// Error kinds
// ============================================================================

/// Machine-readable error code carried by failed responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Unauthorized,
    InvalidProjectId,
    InvalidPath,
    PathOutsideProject,
    DuplicateIdentifier,
    MissingProjectPath,
    InvalidRequest,
    CannotWriteFile,
    UnableToReadPath,
    CannotLoadVersion,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Unauthorized => "UNAUTHORIZED",
            ErrorKind::InvalidProjectId => "INVALID_PROJECT_ID",
            ErrorKind::InvalidPath => "INVALID_PATH",
            ErrorKind::PathOutsideProject => "PATH_OUTSIDE_PROJECT",
            ErrorKind::DuplicateIdentifier => "DUPLICATE_IDENTIFIER",
            ErrorKind::MissingProjectPath => "MISSING_PROJECT_PATH",
            ErrorKind::InvalidRequest => "INVALID_REQUEST",
            ErrorKind::CannotWriteFile => "CANNOT_WRITE_FILE",
            ErrorKind::UnableToReadPath => "UNABLE_TO_READ_PATH",
            ErrorKind::CannotLoadVersion => "CANNOT_LOAD_VERSION",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Response envelope
// ============================================================================

/// `{success: true, result}` or `{success: false, error, message?}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(result: T) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
            message: None,
        }
    }

    pub fn error(kind: ErrorKind, message: Option<String>) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(kind),
            message,
        }
    }
}

// ============================================================================
// Client -> Daemon request bodies
// ============================================================================

/// Body of `POST /register`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_path: Option<String>,
}

/// Body of `POST /keepalive`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeepaliveRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
}

/// Body of `POST /files/*path`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WriteFileRequest {
    #[serde(default)]
    pub contents: Option<String>,
}

/// Body of `POST /send`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SendRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<serde_json::Value>,
}

// ============================================================================
// Daemon -> Client results
// ============================================================================

/// Result of `GET /about`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AboutInfo {
    pub name: String,
    pub version: String,
}

/// Generic acknowledgement carrying a human-readable message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageResult {
    pub message: String,
}

/// Result of `POST /send`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendResult {
    pub delivered: bool,
}

/// Result of reading a path: a file with its contents or a directory tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PathContents {
    File {
        name: String,
        contents: String,
        length: u64,
    },
    Dir {
        contents: Vec<FileNode>,
    },
}

/// One entry of a recursive directory listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FileNode {
    File { name: String, length: u64 },
    Dir { name: String, contents: Vec<FileNode> },
}

impl FileNode {
    pub fn name(&self) -> &str {
        match self {
            FileNode::File { name, .. } | FileNode::Dir { name, .. } => name,
        }
    }
}

// ============================================================================
// Daemon -> Client push notifications (channel)
// ============================================================================

/// Message pushed over a session's channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ChannelNotification {
    /// A file under the session root was written through the HTTP surface
    FileWritten {
        #[serde(rename = "filePath")]
        file_path: String,
        contents: String,
    },
}
