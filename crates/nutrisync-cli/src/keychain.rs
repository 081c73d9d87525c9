use anyhow::{Context, Result};
use keyring::Entry;

const SERVICE_NAME: &str = "nutrisync";

/// Remembered passwords in the OS keychain, keyed by email.
pub struct PasswordStore;

impl PasswordStore {
    pub fn store(email: &str, password: &str) -> Result<()> {
        let entry = Entry::new(SERVICE_NAME, email).context("Failed to create keyring entry")?;
        entry
            .set_password(password)
            .context("Failed to store password in keychain")?;
        Ok(())
    }

    /// The remembered password, if there is one.
    pub fn get(email: &str) -> Option<String> {
        Entry::new(SERVICE_NAME, email)
            .ok()
            .and_then(|entry| entry.get_password().ok())
    }

    pub fn delete(email: &str) -> Result<()> {
        let entry = Entry::new(SERVICE_NAME, email).context("Failed to create keyring entry")?;
        match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete password from keychain"),
        }
    }
}
