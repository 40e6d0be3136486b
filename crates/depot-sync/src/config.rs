//! # Depot Configuration
//!
//! Configuration for the sync engine, the backend client and the gateway.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                            │
//! │     DEPOT_API_URL=https://erp.example.com/api                           │
//! │     DEPOT_FLUSH_INTERVAL_SECS=15                                        │
//! │                                                                         │
//! │  2. TOML Config File                                                    │
//! │     ~/.config/depot/depot.toml (Linux)                                  │
//! │     ~/Library/Application Support/com.depot.agent/depot.toml (macOS)    │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [device]
//! id = "550e8400-e29b-41d4-a716-446655440000"
//! name = "Van 4"
//!
//! [api]
//! base_url = "https://erp.example.com/api"
//! auth_token = "..."
//! request_timeout_secs = 30
//!
//! [sync]
//! flush_interval_secs = 30
//! backoff_enabled = false
//!
//! [gateway]
//! listen_addr = "127.0.0.1:8787"
//! origin_url = "http://localhost:3000"
//! cache_version = "v1"
//! precache = ["/static/app.js", "/static/app.css"]  # assets set; start_url goes to pages
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Device Configuration
// =============================================================================

/// Identity of this device, sent with every submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Unique device identifier (UUID v4).
    /// Auto-generated on first run if not provided.
    pub id: String,

    /// Human-readable device name.
    #[serde(default = "default_device_name")]
    pub name: String,
}

fn default_device_name() -> String {
    "Depot Client".to_string()
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            id: Uuid::new_v4().to_string(),
            name: default_device_name(),
        }
    }
}

// =============================================================================
// Backend API Settings
// =============================================================================

/// Where and how queued entries are submitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiSettings {
    /// Base URL; `/orders`, `/vouchers` and `/cash-entries` are appended.
    #[serde(default = "default_api_url")]
    pub base_url: String,

    /// Bearer token sent in the `Authorization` header.
    #[serde(default)]
    pub auth_token: Option<String>,

    /// Per-request timeout (seconds). The scheduler adds none of its own.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_api_url() -> String {
    "http://localhost:8000/api".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for ApiSettings {
    fn default() -> Self {
        ApiSettings {
            base_url: default_api_url(),
            auth_token: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl ApiSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

// =============================================================================
// Sync Settings
// =============================================================================

/// Scheduler behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Master switch. When false the schedulers still run but never see a
    /// connectivity change, so entries accumulate until a manual retry.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Period of the flush timer while online (seconds).
    #[serde(default = "default_flush_interval")]
    pub flush_interval_secs: u64,

    /// Stretch the periodic timer exponentially after batches with failures.
    /// Manual retries and the online edge are never delayed.
    #[serde(default)]
    pub backoff_enabled: bool,

    /// First backoff delay (milliseconds).
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Upper bound on the backoff delay (seconds).
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,
}

fn default_true() -> bool {
    true
}
fn default_flush_interval() -> u64 {
    30
}
fn default_initial_backoff() -> u64 {
    500
}
fn default_max_backoff() -> u64 {
    300
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            enabled: true,
            flush_interval_secs: default_flush_interval(),
            backoff_enabled: false,
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_secs: default_max_backoff(),
        }
    }
}

impl SyncSettings {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }
}

// =============================================================================
// Storage Settings
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageSettings {
    /// SQLite file. Defaults to `depot.db` in the platform data directory.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
}

impl StorageSettings {
    /// Resolves the database path, falling back to the platform data dir and
    /// finally the working directory.
    pub fn resolved_path(&self) -> PathBuf {
        if let Some(path) = &self.database_path {
            return path.clone();
        }

        project_dirs()
            .map(|dirs| dirs.data_dir().join("depot.db"))
            .unwrap_or_else(|| PathBuf::from("depot.db"))
    }
}

// =============================================================================
// Gateway Settings
// =============================================================================

/// Cache gateway and local proxy settings.
///
/// ## Cache Sets
/// ```text
/// cache_version = "v3"   ──►   whitelist = { pages-v3, assets-v3, images-v3 }
///                              everything else is deleted on activate
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewaySettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Address the proxy listens on.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Upstream application origin.
    #[serde(default = "default_origin_url")]
    pub origin_url: String,

    /// Version suffix for the cache-set names.
    #[serde(default = "default_cache_version")]
    pub cache_version: String,

    /// Start page, the last-resort fallback for navigations.
    #[serde(default = "default_start_url")]
    pub start_url: String,

    /// Paths fetched into the assets set on install.
    #[serde(default)]
    pub precache: Vec<String>,
}

fn default_listen_addr() -> String {
    "127.0.0.1:8787".to_string()
}

fn default_origin_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_cache_version() -> String {
    "v1".to_string()
}

fn default_start_url() -> String {
    "/".to_string()
}

impl Default for GatewaySettings {
    fn default() -> Self {
        GatewaySettings {
            enabled: true,
            listen_addr: default_listen_addr(),
            origin_url: default_origin_url(),
            cache_version: default_cache_version(),
            start_url: default_start_url(),
            precache: Vec::new(),
        }
    }
}

// =============================================================================
// Main Configuration
// =============================================================================

/// Complete agent configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DepotConfig {
    #[serde(default)]
    pub device: DeviceConfig,

    #[serde(default)]
    pub api: ApiSettings,

    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub storage: StorageSettings,

    #[serde(default)]
    pub gateway: GatewaySettings,
}

impl DepotConfig {
    /// Creates a new config with defaults and a generated device ID.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (depot.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading config from file");
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
            warn!("Failed to load config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if self.device.id.trim().is_empty() {
            return Err(SyncError::MissingDeviceId);
        }

        let api = Url::parse(&self.api.base_url)?;
        if !matches!(api.scheme(), "http" | "https") {
            return Err(SyncError::InvalidUrl(format!(
                "api.base_url must be http(s), got: {}",
                self.api.base_url
            )));
        }

        if self.api.request_timeout_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "api.request_timeout_secs must be greater than 0".into(),
            ));
        }

        if self.sync.flush_interval_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "sync.flush_interval_secs must be greater than 0".into(),
            ));
        }

        if self.sync.backoff_enabled && self.sync.initial_backoff_ms == 0 {
            return Err(SyncError::InvalidConfig(
                "sync.initial_backoff_ms must be greater than 0".into(),
            ));
        }

        if self.gateway.enabled {
            let origin = Url::parse(&self.gateway.origin_url)?;
            if !matches!(origin.scheme(), "http" | "https") {
                return Err(SyncError::InvalidUrl(format!(
                    "gateway.origin_url must be http(s), got: {}",
                    self.gateway.origin_url
                )));
            }

            if self.gateway.listen_addr.parse::<std::net::SocketAddr>().is_err() {
                return Err(SyncError::InvalidConfig(format!(
                    "gateway.listen_addr is not a socket address: {}",
                    self.gateway.listen_addr
                )));
            }

            let version = &self.gateway.cache_version;
            if version.is_empty() || !version.chars().all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_') {
                return Err(SyncError::InvalidConfig(format!(
                    "gateway.cache_version must be a non-empty token, got: '{}'",
                    version
                )));
            }

            if !self.gateway.start_url.starts_with('/') {
                return Err(SyncError::InvalidConfig(
                    "gateway.start_url must be an absolute path".into(),
                ));
            }
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(id) = var("DEPOT_DEVICE_ID") {
            debug!(device_id = %id, "Overriding device ID from environment");
            self.device.id = id;
        }

        if let Some(url) = var("DEPOT_API_URL") {
            debug!(url = %url, "Overriding API URL from environment");
            self.api.base_url = url;
        }

        if let Some(token) = var("DEPOT_API_TOKEN") {
            self.api.auth_token = Some(token);
        }

        if let Some(path) = var("DEPOT_DB_PATH") {
            self.storage.database_path = Some(PathBuf::from(path));
        }

        if let Some(secs) = var("DEPOT_FLUSH_INTERVAL_SECS") {
            match secs.parse::<u64>() {
                Ok(s) => self.sync.flush_interval_secs = s,
                Err(_) => warn!(value = %secs, "Ignoring non-numeric DEPOT_FLUSH_INTERVAL_SECS"),
            }
        }

        if let Some(url) = var("DEPOT_ORIGIN_URL") {
            debug!(url = %url, "Overriding origin URL from environment");
            self.gateway.origin_url = url;
        }

        if let Some(version) = var("DEPOT_CACHE_VERSION") {
            self.gateway.cache_version = version;
        }

        if let Some(addr) = var("DEPOT_LISTEN_ADDR") {
            self.gateway.listen_addr = addr;
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join("depot.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    pub fn device_id(&self) -> &str {
        &self.device.id
    }

    pub fn is_sync_enabled(&self) -> bool {
        self.sync.enabled
    }
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("com", "depot", "agent")
}
