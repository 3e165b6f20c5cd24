//! Error types for the lockout and password history engine

use thiserror::Error;

/// Result type alias using the crate error
pub type Result<T> = std::result::Result<T, Error>;

/// Which fixed-capacity table rejected an insertion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    /// The account registry used for soft-lockout
    Accounts,
    /// The password history store
    History,
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Accounts => write!(f, "accounts"),
            Self::History => write!(f, "history"),
        }
    }
}

/// Reason a presented credential was refused
///
/// Variants are listed in the order the validator evaluates them; the
/// first violated rule wins.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum Rejection {
    /// Expiration time is mandatory but none was provided
    #[error("password expiration time must be provided")]
    ExpirationRequiredButMissing,

    /// Shorter than the configured minimum
    #[error("password is too short")]
    TooShort,

    /// Contains the account name (or, for hashed forms, equals it)
    #[error("password cannot contain user name")]
    ContainsAccountName,

    /// Not enough digits
    #[error("password must contain at least {0} numeric characters")]
    InsufficientDigits(u32),

    /// Not enough characters outside letters and digits
    #[error("password must contain at least {0} special characters")]
    InsufficientSpecial(u32),

    /// Not enough upper case ASCII letters
    #[error("password must contain at least {0} upper case letters")]
    InsufficientUpper(u32),

    /// Not enough lower case ASCII letters
    #[error("password must contain at least {0} lower case letters")]
    InsufficientLower(u32),

    /// Refused by the dictionary check
    #[error("password is easily cracked")]
    FailedDictionaryCheck,

    /// Matches one of the passwords retained in history
    #[error("password cannot be one of the last {0} passwords used")]
    PasswordReused(usize),
}

/// Main error type for the crate
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A fixed-capacity table is full; the capacity must be raised and the
    /// process restarted
    #[error("not enough capacity to add entry to {table} table (capacity {capacity}); increase the configured maximum")]
    CapacityExceeded {
        /// Table that is full
        table: Table,
        /// Configured capacity
        capacity: usize,
    },

    /// Administrative operation referenced an untracked account
    #[error("account '{0}' not found in lockable list")]
    AccountNotFound(String),

    /// Account name is empty or longer than the identifier limit
    #[error("invalid account name: {0}")]
    InvalidAccountName(String),

    /// Credential refused by a credential check
    #[error(transparent)]
    CredentialRejected(#[from] Rejection),

    /// Too many failed logins; the message is the same for every account
    /// and never reveals whether the last credential was valid
    #[error("maximum number of failed connections exceeded for '{account}'")]
    LockoutExceeded {
        /// Account that is soft-locked
        account: String,
    },

    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(Box<figment::Error>),

    /// Configuration loaded but holds unusable values
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A sync worker already runs over the same tables
    #[error("a sync worker is already running for this policy state")]
    WorkerRunning,

    /// Account source or durable history store failed
    #[error("Repository error: {0}")]
    Repository(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the failure is expected to clear on the next sync cycle
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Repository(_) | Self::Io(_))
    }

    /// The credential rejection, if this error is one
    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            Self::CredentialRejected(r) => Some(r),
            _ => None,
        }
    }
}

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Error::Config(Box::new(err))
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Error::Repository(err.to_string())
    }
}
