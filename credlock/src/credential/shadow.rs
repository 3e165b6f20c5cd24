//! Verification of already-hashed credentials
//!
//! When the host only sees a hashed form, composition rules cannot be
//! applied. The one thing left to test is whether the hash verifies against
//! the account name used as password.

use tracing::debug;

/// Checks whether a stored (hashed) credential accepts a plaintext guess
pub trait ShadowVerifier: Send + Sync {
    /// `true` when `plaintext` verifies against `shadow`
    ///
    /// Unknown or malformed hash formats verify nothing.
    fn verifies(&self, shadow: &str, plaintext: &str) -> bool;
}

/// Verifier that recognises no hash format
#[derive(Debug, Default, Clone, Copy)]
pub struct NoShadowVerifier;

impl ShadowVerifier for NoShadowVerifier {
    fn verifies(&self, _shadow: &str, _plaintext: &str) -> bool {
        false
    }
}

#[cfg(feature = "argon2")]
pub use argon2_verifier::Argon2Verifier;

#[cfg(feature = "argon2")]
mod argon2_verifier {
    use argon2::{
        password_hash::{PasswordHash, PasswordVerifier},
        Argon2,
    };

    use super::*;

    /// Verifier for Argon2 PHC strings (`$argon2id$v=19$...`)
    ///
    /// Parameters are read from the hash itself.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct Argon2Verifier;

    impl ShadowVerifier for Argon2Verifier {
        fn verifies(&self, shadow: &str, plaintext: &str) -> bool {
            let Ok(parsed) = PasswordHash::new(shadow) else {
                debug!("Hashed credential is not a PHC string, skipping verification");
                return false;
            };
            match Argon2::default().verify_password(plaintext.as_bytes(), &parsed) {
                Ok(()) => true,
                Err(argon2::password_hash::Error::Password) => false,
                Err(e) => {
                    debug!(error = %e, "Hashed credential could not be verified");
                    false
                }
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use argon2::{
            password_hash::{PasswordHasher, SaltString},
            Algorithm, Params, Version,
        };

        fn phc(password: &str) -> String {
            let salt = SaltString::encode_b64(b"credlock-test-salt").unwrap();
            let params = Params::new(8, 1, 1, None).unwrap();
            Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
                .hash_password(password.as_bytes(), &salt)
                .unwrap()
                .to_string()
        }

        #[test]
        fn test_verifies_matching_password() {
            let shadow = phc("alice");
            assert!(Argon2Verifier.verifies(&shadow, "alice"));
            assert!(!Argon2Verifier.verifies(&shadow, "bob"));
        }

        #[test]
        fn test_foreign_formats_verify_nothing() {
            assert!(!Argon2Verifier.verifies("md5d7f8a0c2c5b0f3b1e2c9c6e9d1f4a3b2", "alice"));
            assert!(!Argon2Verifier.verifies("", "alice"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_verifier_accepts_nothing() {
        assert!(!NoShadowVerifier.verifies("$argon2id$anything", "alice"));
    }
}
