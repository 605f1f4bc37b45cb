//! API keys and channel tokens, held in the OS keyring rather than on disk.

use keyring::Entry;

const SERVICE_NAME: &str = "cowork";

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("OS keychain unavailable: {0}")]
    Unavailable(String),
}

pub struct SecretStore;

impl SecretStore {
    pub fn new() -> Self {
        Self
    }

    pub fn set(&self, key: &str, value: &str) -> Result<(), SecretError> {
        let entry = Entry::new(SERVICE_NAME, key).map_err(|e| SecretError::Unavailable(e.to_string()))?;
        entry.set_password(value).map_err(|e| SecretError::Unavailable(e.to_string()))
    }

    pub fn get(&self, key: &str) -> Option<String> {
        let entry = Entry::new(SERVICE_NAME, key).ok()?;
        entry.get_password().ok()
    }

    pub fn delete(&self, key: &str) -> Result<(), SecretError> {
        let entry = Entry::new(SERVICE_NAME, key).map_err(|e| SecretError::Unavailable(e.to_string()))?;
        entry.delete_password().map_err(|e| SecretError::Unavailable(e.to_string()))
    }

    /// A display-safe stand-in for a secret: never echo the value back, only
    /// whether one is configured.
    pub fn mask(&self, key: &str) -> &'static str {
        if self.get(key).is_some() {
            "***configured***"
        } else {
            "***unset***"
        }
    }
}

impl Default for SecretStore {
    fn default() -> Self {
        Self::new()
    }
}
