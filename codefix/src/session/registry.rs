// In-memory registry of live project sessions
// Sessions are keyed by identifier and listed in insertion order.
// Nothing here survives a daemon restart.

use crate::session::protocol::Session;
use chrono::{DateTime, Duration, Utc};
use indexmap::IndexMap;
use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};

/// Sessions without a keepalive for this long are evicted by the sweep
pub const DEFAULT_INACTIVITY_WINDOW: std::time::Duration = std::time::Duration::from_secs(60);

/// Length of server-generated identifiers
pub const IDENTIFIER_LEN: usize = 16;

/// How sessions are named
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum IdentityMode {
    /// The normalized project path is the identifier
    #[default]
    Path,
    /// A random token names the session; the path is metadata
    GeneratedToken,
}

impl std::fmt::Display for IdentityMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdentityMode::Path => write!(f, "path"),
            IdentityMode::GeneratedToken => write!(f, "generated-token"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("identifier '{identifier}' is already registered for {existing_root}")]
    DuplicateIdentifier {
        identifier: String,
        existing_root: String,
    },
    #[error("{root_path} is already registered as '{existing_identifier}'")]
    RootAlreadyRegistered {
        root_path: String,
        existing_identifier: String,
    },
}

/// Generate a 16-character alphanumeric identifier
pub fn generate_identifier() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(IDENTIFIER_LEN)
        .map(char::from)
        .collect()
}

/// Live sessions keyed by identifier
#[derive(Debug, Clone)]
pub struct Registry {
    sessions: IndexMap<String, Session>,
    window: Duration,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(DEFAULT_INACTIVITY_WINDOW)
    }
}

impl Registry {
    pub fn new(window: std::time::Duration) -> Self {
        let window = Duration::from_std(window).unwrap_or_else(|_| Duration::seconds(60));
        Self {
            sessions: IndexMap::new(),
            window,
        }
    }

    /// Inactivity window used by [`Registry::sweep`]
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Create a session or refresh an existing one.
    ///
    /// Re-registering an identifier with the same root refreshes `last_seen`.
    /// A different root for a known identifier, or a second identifier for a
    /// root already served, is rejected and the existing session left intact.
    pub fn register(
        &mut self,
        identifier: &str,
        root_path: &str,
        now: DateTime<Utc>,
    ) -> Result<Session, RegistryError> {
        if let Some(owner) = self.find_by_root(root_path) {
            if owner.identifier != identifier {
                return Err(RegistryError::RootAlreadyRegistered {
                    root_path: root_path.to_string(),
                    existing_identifier: owner.identifier.clone(),
                });
            }
        }

        if let Some(existing) = self.sessions.get_mut(identifier) {
            if existing.root_path != root_path {
                return Err(RegistryError::DuplicateIdentifier {
                    identifier: identifier.to_string(),
                    existing_root: existing.root_path.clone(),
                });
            }
            existing.last_seen = now;
            return Ok(existing.clone());
        }

        let session = Session::new(identifier.to_string(), root_path.to_string(), now);
        self.sessions
            .insert(identifier.to_string(), session.clone());
        Ok(session)
    }

    /// Find the session serving a given root
    pub fn find_by_root(&self, root_path: &str) -> Option<&Session> {
        self.sessions.values().find(|s| s.root_path == root_path)
    }

    /// Generate an identifier not currently in use
    pub fn unused_identifier(&self) -> String {
        loop {
            let candidate = generate_identifier();
            if !self.sessions.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    /// Refresh `last_seen`; false if the identifier is unknown
    pub fn touch(&mut self, identifier: &str, now: DateTime<Utc>) -> bool {
        match self.sessions.get_mut(identifier) {
            Some(session) => {
                session.last_seen = now;
                true
            }
            None => false,
        }
    }

    /// Remove and return every session idle for at least the window
    pub fn sweep(&mut self, now: DateTime<Utc>) -> Vec<Session> {
        let expired: Vec<String> = self
            .sessions
            .values()
            .filter(|s| s.is_expired(now, self.window))
            .map(|s| s.identifier.clone())
            .collect();

        expired
            .iter()
            .filter_map(|identifier| self.sessions.shift_remove(identifier))
            .collect()
    }

    pub fn get(&self, identifier: &str) -> Option<&Session> {
        self.sessions.get(identifier)
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.sessions.contains_key(identifier)
    }

    /// All sessions in registration order
    pub fn list(&self) -> Vec<Session> {
        self.sessions.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
