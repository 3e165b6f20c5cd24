//! Dictionary check for easily cracked passwords

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use super::chain::{CredentialCheck, CredentialForm, PresentedCredential};
use crate::config::SharedSettings;
use crate::error::{Rejection, Result};

/// Source of known weak passwords
pub trait PasswordDictionary: Send + Sync {
    /// A short reason when `password` is considered weak, `None` otherwise
    fn weakness(&self, password: &str) -> Option<String>;
}

/// In-memory word list
///
/// A password is weak when, ignoring case, it is a listed word or becomes
/// one once every character that is not a letter is removed
/// (`Password123!` → `password`).
#[derive(Debug, Default, Clone)]
pub struct WordListDictionary {
    words: HashSet<String>,
}

impl WordListDictionary {
    /// Build from any list of words; blank entries are ignored
    pub fn from_words<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let words = words
            .into_iter()
            .map(|w| w.as_ref().trim().to_lowercase())
            .filter(|w| !w.is_empty())
            .collect();
        Self { words }
    }

    /// Load a newline separated word list
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let dictionary = Self::from_words(contents.lines());
        info!(path = %path.display(), words = dictionary.len(), "Loaded password dictionary");
        Ok(dictionary)
    }

    /// Number of distinct words
    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// Whether the list is empty
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

impl PasswordDictionary for WordListDictionary {
    fn weakness(&self, password: &str) -> Option<String> {
        let lowered = password.to_lowercase();
        if self.words.contains(&lowered) {
            return Some("it is a dictionary word".to_string());
        }
        let letters: String = lowered.chars().filter(|c| c.is_alphabetic()).collect();
        if !letters.is_empty() && self.words.contains(&letters) {
            return Some("it is based on a dictionary word".to_string());
        }
        None
    }
}

/// Rejects plaintext passwords found in a dictionary
///
/// Inactive unless `password.enable_dictionary_check` is set in the
/// current snapshot.
pub struct DictionaryCheck {
    settings: SharedSettings,
    dictionary: Arc<dyn PasswordDictionary>,
}

impl DictionaryCheck {
    /// Create the check over a dictionary
    pub fn new(settings: SharedSettings, dictionary: Arc<dyn PasswordDictionary>) -> Self {
        Self {
            settings,
            dictionary,
        }
    }
}

#[async_trait]
impl CredentialCheck for DictionaryCheck {
    fn name(&self) -> &'static str {
        "dictionary"
    }

    async fn check(&self, credential: &PresentedCredential) -> Result<()> {
        if credential.form != CredentialForm::Plaintext
            || !self.settings.current().password.enable_dictionary_check
        {
            return Ok(());
        }
        if let Some(reason) = self.dictionary.weakness(&credential.secret) {
            // The reason goes to the log only.
            debug!(account = %credential.account, reason = %reason, "Password failed dictionary check");
            return Err(Rejection::FailedDictionaryCheck.into());
        }
        Ok(())
    }
}
