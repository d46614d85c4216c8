// Settings file and daemon runtime configuration
// Settings live in ~/.codespin/codefix.json (or $CODEFIX_CONFIG_DIR/codefix.json)

use crate::session::lifecycle::LifecycleMode;
use crate::session::registry::{IdentityMode, DEFAULT_INACTIVITY_WINDOW};
use anyhow::{bail, Context, Result};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Port used when neither the settings file nor the CLI names one
pub const DEFAULT_PORT: u16 = 60280;

/// Default bind address; the daemon only serves the local machine
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Overrides the settings directory
pub const CONFIG_DIR_ENV: &str = "CODEFIX_CONFIG_DIR";

/// Supplies the shared secret without touching the settings file
pub const KEY_ENV: &str = "CODEFIX_KEY";

const SETTINGS_FILE: &str = "codefix.json";

/// Resolve the settings directory, honoring `CODEFIX_CONFIG_DIR`
pub fn config_dir() -> PathBuf {
    if let Ok(override_dir) = std::env::var(CONFIG_DIR_ENV) {
        if !override_dir.trim().is_empty() {
            return PathBuf::from(override_dir);
        }
    }

    dirs::home_dir()
        .map(|h| h.join(".codespin"))
        .unwrap_or_else(|| PathBuf::from("/tmp/codespin"))
}

/// Path to the settings file inside `dir`
pub fn settings_file(dir: &Path) -> PathBuf {
    dir.join(SETTINGS_FILE)
}

/// Per-user settings persisted as JSON
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

impl Settings {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            port: None,
        }
    }

    /// Configured port, or [`DEFAULT_PORT`]
    pub fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PORT)
    }

    /// Load settings from `dir`; `Ok(None)` when no settings file exists yet
    pub fn load(dir: &Path) -> Result<Option<Self>> {
        let path = settings_file(dir);

        if !path.exists() {
            return Ok(None);
        }

        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read settings file: {}", path.display()))?;

        if contents.trim().is_empty() {
            return Ok(None);
        }

        let settings = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse settings file: {}", path.display()))?;
        Ok(Some(settings))
    }

    /// Save settings to `dir` with exclusive file locking
    pub fn save(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create settings directory: {}", dir.display()))?;

        let path = settings_file(dir);
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .with_context(|| {
                format!(
                    "Failed to open settings file for writing: {}",
                    path.display()
                )
            })?;

        file.lock_exclusive()
            .with_context(|| "Failed to acquire exclusive lock on settings file")?;

        let contents =
            serde_json::to_string_pretty(self).with_context(|| "Failed to serialize settings")?;

        file.write_all(contents.as_bytes())
            .with_context(|| "Failed to write settings file")?;

        // The secret is readable by the owner only
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o600))
                .with_context(|| format!("Failed to restrict {}", path.display()))?;
        }

        Ok(())
    }
}

/// Pick the secret: explicit flag, then `CODEFIX_KEY`, then the settings file
pub fn resolve_secret(flag: Option<String>, settings: Option<&Settings>) -> Result<String> {
    let secret = flag
        .filter(|k| !k.trim().is_empty())
        .or_else(|| std::env::var(KEY_ENV).ok().filter(|k| !k.trim().is_empty()))
        .or_else(|| settings.map(|s| s.key.clone()).filter(|k| !k.trim().is_empty()));

    match secret {
        Some(secret) => Ok(secret),
        None => bail!(
            "No key configured. Run `codefix key <KEY>` or set {}",
            KEY_ENV
        ),
    }
}

/// Everything `server::run` needs to start serving
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub host: String,
    pub port: u16,
    /// Shared secret; never empty
    pub secret: String,
    /// Project registered at startup, if any
    pub project: Option<String>,
    /// Identifier for the startup project (generated-token mode only)
    pub project_id: Option<String>,
    pub identity_mode: IdentityMode,
    pub lifecycle_mode: LifecycleMode,
    pub inactivity_window: Duration,
    pub sweep_interval: Duration,
    /// Also require the secret on `/sync`
    pub sync_requires_key: bool,
}

impl DaemonConfig {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            secret: secret.into(),
            project: None,
            project_id: None,
            identity_mode: IdentityMode::default(),
            lifecycle_mode: LifecycleMode::default(),
            inactivity_window: DEFAULT_INACTIVITY_WINDOW,
            sweep_interval: DEFAULT_INACTIVITY_WINDOW,
            sync_requires_key: false,
        }
    }

    /// `host:port` string handed to the listener
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_settings_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let mut settings = Settings::new("s3cret");
        settings.port = Some(61000);

        settings.save(temp_dir.path()).unwrap();

        let loaded = Settings::load(temp_dir.path()).unwrap().unwrap();
        assert_eq!(loaded, settings);
        assert_eq!(loaded.port(), 61000);
    }

    #[test]
    fn test_missing_settings_is_none() {
        let temp_dir = TempDir::new().unwrap();
        assert!(Settings::load(temp_dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_port_defaults_when_absent() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(settings_file(temp_dir.path()), r#"{"key":"abc"}"#).unwrap();

        let loaded = Settings::load(temp_dir.path()).unwrap().unwrap();
        assert_eq!(loaded.port, None);
        assert_eq!(loaded.port(), DEFAULT_PORT);
    }

    #[test]
    fn test_corrupt_settings_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(settings_file(temp_dir.path()), "{not json").unwrap();
        assert!(Settings::load(temp_dir.path()).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_settings_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        Settings::new("k").save(temp_dir.path()).unwrap();

        let mode = fs::metadata(settings_file(temp_dir.path()))
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[test]
    fn test_explicit_flag_wins_over_settings() {
        let settings = Settings::new("from-file");
        let secret = resolve_secret(Some("from-flag".to_string()), Some(&settings)).unwrap();
        assert_eq!(secret, "from-flag");
    }

    #[test]
    fn test_daemon_config_defaults() {
        let config = DaemonConfig::new("k");
        assert_eq!(config.bind_addr(), "127.0.0.1:60280");
        assert_eq!(config.identity_mode, IdentityMode::Path);
        assert_eq!(config.lifecycle_mode, LifecycleMode::AutoExit);
        assert_eq!(config.inactivity_window, Duration::from_secs(60));
        assert!(!config.sync_requires_key);
    }
}
