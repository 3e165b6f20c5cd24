//! Credential checks run when a password is set or changed
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use credlock::credential::PresentedCredential;
//!
//! let credential = PresentedCredential::plaintext(account, new_password)
//!     .with_expiration(valid_until.is_some());
//! state.check_credential(&credential).await?;
//! ```

pub mod chain;
pub mod dictionary;
pub mod reuse;
pub mod shadow;
pub mod validator;

pub use chain::{CheckChain, CredentialCheck, CredentialForm, PresentedCredential};
pub use dictionary::{DictionaryCheck, PasswordDictionary, WordListDictionary};
pub use reuse::ReuseCheck;
#[cfg(feature = "argon2")]
pub use shadow::Argon2Verifier;
pub use shadow::{NoShadowVerifier, ShadowVerifier};
pub use validator::{check_plaintext, Composition, PasswordPolicyValidator};
