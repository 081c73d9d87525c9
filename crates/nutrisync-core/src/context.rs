use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, warn};

use crate::api::ApiClient;
use crate::auth::{SessionState, TokenStore};
use crate::cache::CacheManager;
use crate::config::{Config, Timeouts};
use crate::store::{ProfileStore, StoreConfig};

/// Session, client and profile store wired to one cache directory.
#[derive(Clone)]
pub struct SyncContext {
    pub session: Arc<SessionState>,
    pub api: Arc<ApiClient>,
    pub profiles: ProfileStore,
}

impl SyncContext {
    /// Open everything under the configured cache directory.
    pub fn open(config: &Config) -> Result<Self> {
        let cache_dir = config.cache_dir().unwrap_or_else(|e| {
            warn!(error = %e, "No cache directory available, using ./cache");
            PathBuf::from("./cache")
        });
        debug!(?cache_dir, "Cache directory configured");
        Self::with_dir(
            cache_dir,
            &config.api_base_url,
            config.http.timeouts(),
            StoreConfig::default(),
        )
    }

    pub fn with_dir(
        cache_dir: PathBuf,
        base_url: &str,
        timeouts: Timeouts,
        store_config: StoreConfig,
    ) -> Result<Self> {
        let cache = CacheManager::new(cache_dir.clone())?;
        let session = Arc::new(SessionState::load(cache_dir.clone()));
        let api = Arc::new(ApiClient::new(
            base_url,
            timeouts,
            Arc::clone(&session),
            TokenStore::new(cache_dir),
        )?);

        // A credential without an identity belongs to nobody.
        if !session.is_authenticated() && api.has_credential() {
            warn!("Discarding credential left without a signed-in identity");
            api.logout();
        }

        let profiles = ProfileStore::new(Arc::clone(&api), cache, store_config);
        Ok(Self {
            session,
            api,
            profiles,
        })
    }

    pub fn logout(&self) {
        self.api.logout();
    }
}
