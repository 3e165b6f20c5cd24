//! Password fingerprints stored in history
//!
//! A fingerprint is a keyed BLAKE3 hash of the plaintext candidate. It is
//! only ever computed from plaintext; hashed credentials presented by the
//! host never enter the history.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Key-derivation context; changing it invalidates every stored fingerprint
const CONTEXT: &str = "credlock 2024-05-01 password history fingerprint";

/// Fixed-length fingerprint of a plaintext password
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PasswordFingerprint([u8; 32]);

impl PasswordFingerprint {
    /// Fingerprint a plaintext password
    pub fn of(password: &str) -> Self {
        Self(blake3::derive_key(CONTEXT, password.as_bytes()))
    }

    /// Raw fingerprint bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex, the durable storage form
    pub fn to_hex(&self) -> String {
        blake3::Hash::from(self.0).to_hex().to_string()
    }

    /// Parse the durable storage form
    pub fn from_hex(hex: &str) -> Result<Self> {
        blake3::Hash::from_hex(hex)
            .map(|hash| Self(*hash.as_bytes()))
            .map_err(|e| Error::Repository(format!("malformed password fingerprint: {e}")))
    }
}

// Never print the bytes, not even in debug output.
impl fmt::Debug for PasswordFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PasswordFingerprint(..)")
    }
}

impl FromStr for PasswordFingerprint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic() {
        assert_eq!(
            PasswordFingerprint::of("Correct-Horse-9"),
            PasswordFingerprint::of("Correct-Horse-9")
        );
        assert_ne!(
            PasswordFingerprint::of("Correct-Horse-9"),
            PasswordFingerprint::of("correct-Horse-9")
        );
    }

    #[test]
    fn test_hex_form() {
        let fingerprint = PasswordFingerprint::of("Tr0ub4dor&3-long");
        let hex = fingerprint.to_hex();
        assert_eq!(hex.len(), 64);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(hex.parse::<PasswordFingerprint>().unwrap(), fingerprint);
    }

    #[test]
    fn test_not_a_plain_hash() {
        let fingerprint = PasswordFingerprint::of("hunter2");
        assert_ne!(fingerprint.as_bytes(), blake3::hash(b"hunter2").as_bytes());
    }

    #[test]
    fn test_malformed_hex_rejected() {
        assert!(matches!(
            PasswordFingerprint::from_hex("abc"),
            Err(Error::Repository(_))
        ));
        assert!(PasswordFingerprint::from_hex(&"zz".repeat(32)).is_err());
    }

    #[test]
    fn test_debug_hides_bytes() {
        let rendered = format!("{:?}", PasswordFingerprint::of("secret"));
        assert_eq!(rendered, "PasswordFingerprint(..)");
    }
}
