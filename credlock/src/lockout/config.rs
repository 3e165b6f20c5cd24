//! Login soft-lockout configuration
//!
//! Configures the failure threshold, automatic unlock and tar-pit delay.

use serde::{Deserialize, Serialize};

/// Login soft-lockout configuration
///
/// All durations are in seconds. `max_accounts` sizes the account registry
/// and is only read at startup.
///
/// # Example (config.toml)
///
/// ```toml
/// [lockout]
/// threshold = 5
/// track_all_accounts = true
/// auto_unlock = true
/// auto_unlock_after_secs = 300
/// failure_delay_secs = 5
/// max_accounts = 100
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct LockoutConfig {
    /// Failed attempts before the account is soft-locked (0 disables enforcement)
    #[serde(default = "default_threshold")]
    pub threshold: u32,

    /// Track every account, or only the curated lockable subset
    #[serde(default = "default_true")]
    pub track_all_accounts: bool,

    /// Whether a soft-locked account is let through once the unlock delay passed
    #[serde(default = "default_true")]
    pub auto_unlock: bool,

    /// Seconds after the last failure before a locked account is let through
    #[serde(default)]
    pub auto_unlock_after_secs: u64,

    /// Seconds to stall a locked-out connection before rejecting it
    #[serde(default = "default_failure_delay_secs")]
    pub failure_delay_secs: u64,

    /// Capacity of the account registry (boot-only)
    #[serde(default = "default_max_accounts")]
    pub max_accounts: usize,
}

impl LockoutConfig {
    /// Validate the configuration, returning an error message if invalid
    pub fn validate(&self) -> Result<(), String> {
        if self.max_accounts == 0 {
            return Err("lockout.max_accounts must be greater than 0".to_string());
        }
        Ok(())
    }

    /// Whether lockout enforcement is active at all
    pub fn enabled(&self) -> bool {
        self.threshold > 0
    }
}

impl Default for LockoutConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            track_all_accounts: true,
            auto_unlock: true,
            auto_unlock_after_secs: 0,
            failure_delay_secs: default_failure_delay_secs(),
            max_accounts: default_max_accounts(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_threshold() -> u32 {
    5
}

fn default_failure_delay_secs() -> u64 {
    5
}

fn default_max_accounts() -> usize {
    100
}
