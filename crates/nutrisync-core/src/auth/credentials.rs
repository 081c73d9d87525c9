use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Credential file name in cache directory
const CREDENTIAL_FILE: &str = "credential.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredCredential {
    token: String,
    issued_at: DateTime<Utc>,
}

/// On-disk home of the bearer token.
///
/// Only the API client writes through this; everything else asks the client.
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: Option<PathBuf>,
}

impl TokenStore {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self {
            path: Some(cache_dir.join(CREDENTIAL_FILE)),
        }
    }

    /// A store that keeps nothing between runs.
    pub fn in_memory() -> Self {
        Self { path: None }
    }

    pub fn load(&self) -> Result<Option<String>> {
        let Some(ref path) = self.path else {
            return Ok(None);
        };
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path).context("Failed to read credential file")?;
        let stored: StoredCredential =
            serde_json::from_str(&contents).context("Failed to parse credential file")?;
        Ok(Some(stored.token).filter(|t| !t.is_empty()))
    }

    pub fn save(&self, token: &str) -> Result<()> {
        if let Some(ref path) = self.path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let stored = StoredCredential {
                token: token.to_string(),
                issued_at: Utc::now(),
            };
            std::fs::write(path, serde_json::to_string_pretty(&stored)?)
                .context("Failed to write credential file")?;
        }
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        if let Some(ref path) = self.path {
            if path.exists() {
                std::fs::remove_file(path).context("Failed to remove credential file")?;
            }
        }
        Ok(())
    }
}
