//! Password composition rules
//!
//! Rules are evaluated in a fixed order and the first violation is
//! reported:
//!
//! 1. expiration time required but missing
//! 2. minimum length (in bytes)
//! 3. account name contained in the password
//! 4. digits, special characters, upper case, lower case minimums
//!
//! Each byte is put in exactly one class. Bytes outside ASCII are never
//! letters or digits and count as special characters.

use std::sync::Arc;

use async_trait::async_trait;

use super::chain::{CredentialCheck, CredentialForm, PresentedCredential};
use super::shadow::ShadowVerifier;
use crate::config::{PasswordConfig, SharedSettings};
use crate::error::{Rejection, Result};

/// Per-class byte counts of a candidate password
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Composition {
    /// Total length in bytes
    pub length: usize,
    /// ASCII digits
    pub digits: u32,
    /// Everything that is not an ASCII letter or digit
    pub special: u32,
    /// ASCII upper case letters
    pub upper: u32,
    /// ASCII lower case letters
    pub lower: u32,
}

impl Composition {
    /// Classify every byte of `password`
    pub fn of(password: &str) -> Self {
        password.bytes().fold(
            Self {
                length: password.len(),
                ..Self::default()
            },
            |mut acc, b| {
                if b.is_ascii_uppercase() {
                    acc.upper += 1;
                } else if b.is_ascii_lowercase() {
                    acc.lower += 1;
                } else if b.is_ascii_digit() {
                    acc.digits += 1;
                } else {
                    acc.special += 1;
                }
                acc
            },
        )
    }
}

/// Apply the plaintext rules to `password` for `account`
pub fn check_plaintext(
    config: &PasswordConfig,
    account: &str,
    password: &str,
) -> std::result::Result<(), Rejection> {
    if password.len() < config.min_length {
        return Err(Rejection::TooShort);
    }
    if !account.is_empty() && password.contains(account) {
        return Err(Rejection::ContainsAccountName);
    }

    let composition = Composition::of(password);
    if composition.digits < config.min_digits {
        return Err(Rejection::InsufficientDigits(config.min_digits));
    }
    if composition.special < config.min_special {
        return Err(Rejection::InsufficientSpecial(config.min_special));
    }
    if composition.upper < config.min_upper {
        return Err(Rejection::InsufficientUpper(config.min_upper));
    }
    if composition.lower < config.min_lower {
        return Err(Rejection::InsufficientLower(config.min_lower));
    }
    Ok(())
}

/// The composition validator as a chain interceptor
pub struct PasswordPolicyValidator {
    settings: SharedSettings,
    shadow: Arc<dyn ShadowVerifier>,
}

impl PasswordPolicyValidator {
    /// Create a validator reading rules from the current settings snapshot
    pub fn new(settings: SharedSettings, shadow: Arc<dyn ShadowVerifier>) -> Self {
        Self { settings, shadow }
    }

    /// Validate synchronously
    pub fn validate(&self, credential: &PresentedCredential) -> std::result::Result<(), Rejection> {
        let settings = self.settings.current();
        let config = &settings.password;

        if config.require_expiration && !credential.expiration_provided {
            return Err(Rejection::ExpirationRequiredButMissing);
        }

        let account = credential.account.as_str();
        match credential.form {
            CredentialForm::Plaintext => check_plaintext(config, account, &credential.secret),
            // Only account-name-as-password can be detected in a hashed form.
            CredentialForm::Hashed => {
                if self.shadow.verifies(&credential.secret, account) {
                    Err(Rejection::ContainsAccountName)
                } else {
                    Ok(())
                }
            }
        }
    }
}

#[async_trait]
impl CredentialCheck for PasswordPolicyValidator {
    fn name(&self) -> &'static str {
        "password_policy"
    }

    async fn check(&self, credential: &PresentedCredential) -> Result<()> {
        self.validate(credential)?;
        Ok(())
    }
}
