//! Configuration management using Figment
//!
//! Configuration is loaded from multiple sources with the following precedence (highest to lowest):
//! 1. Environment variables (prefix: `CREDLOCK_`, nested keys split on `__`)
//! 2. A TOML file (`./credlock.toml` or an explicit path)
//! 3. Default values
//!
//! A loaded [`Settings`] value is never edited in place. [`SharedSettings`]
//! hands out immutable snapshots and swaps in a whole new one on reload.

use std::path::Path;
use std::sync::Arc;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::{Error, Result};
use crate::lockout::LockoutConfig;

/// Default configuration file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "credlock.toml";

/// Environment variable prefix
pub const ENV_PREFIX: &str = "CREDLOCK_";

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,

    /// Password composition rules
    #[serde(default)]
    pub password: PasswordConfig,

    /// Login soft-lockout
    #[serde(default)]
    pub lockout: LockoutConfig,

    /// Password history
    #[serde(default)]
    pub history: HistoryConfig,

    /// Background synchronization
    #[serde(default)]
    pub sync: SyncConfig,

    /// Durable storage for account lists and password history
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
}

/// Service-level configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Service name, used in log output
    #[serde(default = "default_service_name")]
    pub name: String,

    /// Log level (trace, debug, info, warn, error) or a full filter directive
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
        }
    }
}

/// Password composition configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordConfig {
    /// Minimum length in bytes
    #[serde(default = "default_min_length")]
    pub min_length: usize,

    /// Minimum number of characters that are neither letters nor digits
    #[serde(default = "default_one")]
    pub min_special: u32,

    /// Minimum number of ASCII digits
    #[serde(default = "default_one")]
    pub min_digits: u32,

    /// Minimum number of upper case ASCII letters
    #[serde(default = "default_one")]
    pub min_upper: u32,

    /// Minimum number of lower case ASCII letters
    #[serde(default = "default_one")]
    pub min_lower: u32,

    /// Reject credentials set without an expiration time
    #[serde(default)]
    pub require_expiration: bool,

    /// Run the dictionary check on plaintext credentials
    #[serde(default)]
    pub enable_dictionary_check: bool,
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self {
            min_length: default_min_length(),
            min_special: 1,
            min_digits: 1,
            min_upper: 1,
            min_lower: 1,
            require_expiration: false,
            enable_dictionary_check: false,
        }
    }
}

/// Password history configuration (boot-only)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Capacity of the history store
    #[serde(default = "default_history_max_accounts")]
    pub max_accounts: usize,

    /// Fingerprints retained per account (0 disables reuse checks)
    #[serde(default = "default_history_max_entries")]
    pub max_entries_per_account: usize,
}

impl HistoryConfig {
    /// Whether password history is kept at all
    pub fn enabled(&self) -> bool {
        self.max_entries_per_account > 0
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_accounts: default_history_max_accounts(),
            max_entries_per_account: default_history_max_entries(),
        }
    }
}

/// Background synchronization configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Seconds between reconciliation cycles
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Reload history from durable storage on every cycle, not only at startup
    #[serde(default)]
    pub reload_history_each_cycle: bool,
}

impl SyncConfig {
    /// Interval between cycles
    pub fn interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.interval_secs)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            reload_history_each_cycle: false,
        }
    }
}

/// Database configuration for the durable repositories
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database connection URL
    pub url: String,

    /// Schema holding the lockable account list and the history table
    #[serde(default = "default_schema")]
    pub schema: String,

    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_secs: u64,

    /// Maximum number of connection retry attempts
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay between retries in seconds (doubled on every attempt)
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,
}

impl DatabaseConfig {
    /// The connection URL with its password hidden, for logs and output
    pub fn redacted_url(&self) -> String {
        redact_connection_url(&self.url)
    }
}

/// Hide the password part of a connection URL
///
/// The last `@` ends the credentials, so passwords containing `@` are
/// hidden whole. URLs without a password are returned unchanged.
pub fn redact_connection_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let Some((credentials, host)) = rest.rsplit_once('@') else {
        return url.to_string();
    };
    match credentials.split_once(':') {
        Some((user, _)) => format!("{scheme}://{user}:***@{host}"),
        None => url.to_string(),
    }
}

// Default value functions
fn default_service_name() -> String {
    "credlock".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_min_length() -> usize {
    15
}

fn default_one() -> u32 {
    1
}

fn default_history_max_accounts() -> usize {
    100
}

fn default_history_max_entries() -> usize {
    5
}

fn default_interval_secs() -> u64 {
    60
}

fn default_schema() -> String {
    "credlock".to_string()
}

fn default_max_connections() -> u32 {
    4
}

fn default_connection_timeout() -> u64 {
    10
}

fn default_max_retries() -> u32 {
    5
}

fn default_retry_delay() -> u64 {
    2
}

impl Settings {
    /// Load configuration from defaults, `./credlock.toml` and the environment
    pub fn load() -> Result<Self> {
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    /// Load configuration from a specific file
    ///
    /// A missing file is not an error; defaults and environment variables
    /// still apply.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            tracing::info!("Loading configuration from: {}", path.display());
        } else {
            tracing::debug!("No configuration file at {}", path.display());
        }

        let settings: Settings = Self::figment(path).extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// The provider chain used by [`Settings::load_from`]
    pub fn figment(path: &Path) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Check values that deserialize fine but cannot be used
    pub fn validate(&self) -> Result<()> {
        self.lockout.validate().map_err(Error::InvalidConfig)?;
        if self.history.max_accounts == 0 {
            return Err(Error::InvalidConfig(
                "history.max_accounts must be greater than 0".to_string(),
            ));
        }
        if self.sync.interval_secs == 0 {
            return Err(Error::InvalidConfig(
                "sync.interval_secs must be greater than 0".to_string(),
            ));
        }
        if let Some(database) = &self.database {
            let schema_ok = !database.schema.is_empty()
                && database
                    .schema
                    .bytes()
                    .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_');
            if !schema_ok {
                return Err(Error::InvalidConfig(format!(
                    "database.schema '{}' must be a lower case identifier",
                    database.schema
                )));
            }
        }
        Ok(())
    }

    fn boot_limits(&self) -> BootLimits {
        BootLimits {
            max_accounts: self.lockout.max_accounts,
            history_max_accounts: self.history.max_accounts,
            history_max_entries: self.history.max_entries_per_account,
        }
    }
}

/// Settings that size the shared tables and cannot change after startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BootLimits {
    max_accounts: usize,
    history_max_accounts: usize,
    history_max_entries: usize,
}

/// Process-wide configuration snapshot holder
///
/// Cloning is cheap; every clone observes the same snapshots. Readers call
/// [`SharedSettings::current`] once per operation and work from that
/// snapshot.
#[derive(Debug, Clone)]
pub struct SharedSettings {
    tx: Arc<watch::Sender<Arc<Settings>>>,
    boot: BootLimits,
}

impl SharedSettings {
    /// Validate and publish the startup configuration
    pub fn new(settings: Settings) -> Result<Self> {
        settings.validate()?;
        let boot = settings.boot_limits();
        let (tx, _rx) = watch::channel(Arc::new(settings));
        Ok(Self {
            tx: Arc::new(tx),
            boot,
        })
    }

    /// The current snapshot
    pub fn current(&self) -> Arc<Settings> {
        self.tx.borrow().clone()
    }

    /// Replace the whole snapshot
    ///
    /// Fails with `InvalidConfig` if the new settings are invalid or change
    /// a boot-only capacity; the previous snapshot stays in effect.
    pub fn reload(&self, next: Settings) -> Result<()> {
        next.validate()?;
        let limits = next.boot_limits();
        if limits != self.boot {
            tracing::warn!(
                boot = ?self.boot,
                requested = ?limits,
                "Configuration reload rejected: capacities are fixed at startup"
            );
            return Err(Error::InvalidConfig(
                "lockout.max_accounts, history.max_accounts and history.max_entries_per_account require a restart".to_string(),
            ));
        }
        self.tx.send_replace(Arc::new(next));
        tracing::info!("Configuration reloaded");
        Ok(())
    }

    /// Watch for reloads
    pub fn subscribe(&self) -> watch::Receiver<Arc<Settings>> {
        self.tx.subscribe()
    }
}

impl Default for SharedSettings {
    fn default() -> Self {
        let settings = Settings::default();
        let boot = settings.boot_limits();
        let (tx, _rx) = watch::channel(Arc::new(settings));
        Self {
            tx: Arc::new(tx),
            boot,
        }
    }
}
