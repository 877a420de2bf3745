//! # Sync Configuration
//!
//! Configuration management for the sync engine.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     HARBOR_API_URL=https://api.example.com                             │
//! │     HARBOR_USER_ID=staff-42                                          │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/harbor/harbor.toml (Linux)                               │
//! │     ~/Library/Application Support/com.harbor.sync/harbor.toml (macOS)  │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     localhost API, 2s debounce, 30s recovery timer, 3 retries          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # harbor.toml
//! [api]
//! base_url = "https://api.example.com"
//! auth_token = "eyJhbGciOi..."
//! request_timeout_secs = 30
//! probe_path = "/api/health"
//!
//! [session]
//! user_id = "staff-42"
//!
//! [sync]
//! debounce_ms = 2000
//! periodic_interval_secs = 30
//! max_retries = 3
//! probe_interval_secs = 15
//!
//! [storage]
//! stale_after_days = 30
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use harbor_core::{
    Endpoint, UserScope, DEFAULT_DEBOUNCE_MS, DEFAULT_PERIODIC_INTERVAL_SECS, MAX_RETRY_ATTEMPTS,
};

use crate::error::{SyncError, SyncResult};

// =============================================================================
// API Settings
// =============================================================================

/// Where the remote API lives and how to talk to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiSettings {
    /// Base URL that relative endpoints are joined onto.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Bearer token sent with every request, if any.
    #[serde(default)]
    pub auth_token: Option<String>,

    /// Transport timeout (seconds). The engine adds no deadline of its own.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Lightweight endpoint polled by the connectivity probe.
    #[serde(default = "default_probe_path")]
    pub probe_path: String,
}

fn default_base_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_probe_path() -> String {
    "/api/health".to_string()
}

impl Default for ApiSettings {
    fn default() -> Self {
        ApiSettings {
            base_url: default_base_url(),
            auth_token: None,
            request_timeout_secs: default_request_timeout(),
            probe_path: default_probe_path(),
        }
    }
}

// =============================================================================
// Session Settings
// =============================================================================

/// The user whose queue and cache this process owns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    #[serde(default = "default_user_id")]
    pub user_id: String,
}

fn default_user_id() -> String {
    "default-user".to_string()
}

impl Default for SessionSettings {
    fn default() -> Self {
        SessionSettings {
            user_id: default_user_id(),
        }
    }
}

// =============================================================================
// Sync Settings
// =============================================================================

/// Drain-pass scheduling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Quiet period between a trigger and the pass it starts (milliseconds).
    #[serde(default = "default_debounce")]
    pub debounce_ms: u64,

    /// Recovery timer interval (seconds).
    #[serde(default = "default_periodic_interval")]
    pub periodic_interval_secs: u64,

    /// Replay attempts before an operation is skipped.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Interval of the host's connectivity probe (seconds).
    #[serde(default = "default_probe_interval")]
    pub probe_interval_secs: u64,
}

fn default_debounce() -> u64 {
    DEFAULT_DEBOUNCE_MS
}
fn default_periodic_interval() -> u64 {
    DEFAULT_PERIODIC_INTERVAL_SECS
}
fn default_max_retries() -> u32 {
    MAX_RETRY_ATTEMPTS
}
fn default_probe_interval() -> u64 {
    15
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            debounce_ms: default_debounce(),
            periodic_interval_secs: default_periodic_interval(),
            max_retries: default_max_retries(),
            probe_interval_secs: default_probe_interval(),
        }
    }
}

// =============================================================================
// Storage Settings
// =============================================================================

/// Local database location and retention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// SQLite file. Defaults to `harbor.db` in the platform data directory.
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// Synced cache entries older than this are removed at startup.
    #[serde(default = "default_stale_after_days")]
    pub stale_after_days: u32,
}

fn default_stale_after_days() -> u32 {
    30
}

impl Default for StorageSettings {
    fn default() -> Self {
        StorageSettings {
            database_path: None,
            stale_after_days: default_stale_after_days(),
        }
    }
}

// =============================================================================
// Main Sync Configuration
// =============================================================================

/// Complete engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub api: ApiSettings,

    #[serde(default)]
    pub session: SessionSettings,

    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub storage: StorageSettings,
}

impl SyncConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (harbor.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading sync config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load sync config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents).map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;

        info!(?path, "Sync config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        UserScope::new(self.session.user_id.as_str())
            .map_err(|e| SyncError::InvalidConfig(format!("session.user_id: {}", e)))?;

        let base = url::Url::parse(&self.api.base_url)?;
        if base.scheme() != "http" && base.scheme() != "https" {
            return Err(SyncError::InvalidUrl(format!(
                "API base URL must start with http:// or https://, got: {}",
                self.api.base_url
            )));
        }

        Endpoint::parse(self.api.probe_path.as_str())
            .map_err(|e| SyncError::InvalidConfig(format!("api.probe_path: {}", e)))?;

        if self.sync.max_retries == 0 {
            return Err(SyncError::InvalidConfig(
                "max_retries must be greater than 0".into(),
            ));
        }

        if self.sync.periodic_interval_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "periodic_interval_secs must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("HARBOR_API_URL") {
            debug!(url = %url, "Overriding API URL from environment");
            self.api.base_url = url;
        }

        if let Some(token) = lookup("HARBOR_AUTH_TOKEN") {
            self.api.auth_token = Some(token);
        }

        if let Some(user_id) = lookup("HARBOR_USER_ID") {
            debug!(user_id = %user_id, "Overriding user id from environment");
            self.session.user_id = user_id;
        }

        if let Some(path) = lookup("HARBOR_DB_PATH") {
            self.storage.database_path = Some(PathBuf::from(path));
        }

        if let Some(debounce) = lookup("HARBOR_DEBOUNCE_MS") {
            match debounce.parse::<u64>() {
                Ok(ms) => self.sync.debounce_ms = ms,
                Err(_) => warn!(value = %debounce, "Ignoring invalid HARBOR_DEBOUNCE_MS"),
            }
        }
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "harbor", "sync")
            .map(|dirs| dirs.config_dir().join("harbor.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// The configured user as a validated scope.
    pub fn user(&self) -> SyncResult<UserScope> {
        UserScope::new(self.session.user_id.as_str())
            .map_err(|e| SyncError::InvalidConfig(format!("session.user_id: {}", e)))
    }

    /// Database file, falling back to the platform data directory.
    pub fn database_path(&self) -> Option<PathBuf> {
        self.storage.database_path.clone().or_else(|| {
            directories::ProjectDirs::from("com", "harbor", "sync")
                .map(|dirs| dirs.data_dir().join("harbor.db"))
        })
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.sync.debounce_ms)
    }

    pub fn periodic_interval(&self) -> Duration {
        Duration::from_secs(self.sync.periodic_interval_secs)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.sync.probe_interval_secs.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.api.request_timeout_secs)
    }
}
