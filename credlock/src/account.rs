//! Account identifiers
//!
//! Account names are the keys of both the lockout registry and the password
//! history store. They are compared byte-for-byte (case-sensitive) and are
//! bounded by the database server's identifier length.

use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// A validated account name
///
/// # Example
///
/// ```rust
/// use credlock::account::AccountKey;
///
/// let key = AccountKey::new("alice").unwrap();
/// assert_eq!(key.as_str(), "alice");
/// assert!(AccountKey::new("").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccountKey(String);

impl AccountKey {
    /// Maximum length of an account name in bytes
    pub const MAX_LEN: usize = 63;

    /// Validate and wrap an account name
    pub fn new(name: impl Into<String>) -> Result<Self, Error> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::InvalidAccountName(
                "account name must not be empty".to_string(),
            ));
        }
        if name.len() > Self::MAX_LEN {
            return Err(Error::InvalidAccountName(format!(
                "account name exceeds {} bytes",
                Self::MAX_LEN
            )));
        }
        Ok(Self(name))
    }

    /// Returns the account name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for AccountKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for AccountKey {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for AccountKey {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<AccountKey> for String {
    fn from(key: AccountKey) -> Self {
        key.0
    }
}

impl AsRef<str> for AccountKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// Lets maps keyed by `AccountKey` be queried with a plain `&str`.
impl Borrow<str> for AccountKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}
