use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::debug;

use crate::models::Profile;

/// Profile cache file name
const PROFILE_CACHE: &str = "profile";

/// Persisted snapshot of a profile, tagged with its owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub profile: Profile,
    pub owner_id: String,
    pub fetched_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(profile: Profile, fetched_at: DateTime<Utc>) -> Self {
        Self {
            owner_id: profile.owner_id.clone(),
            profile,
            fetched_at,
        }
    }

    /// Time since the fetch, or `None` if the timestamp is in the future.
    pub fn age(&self) -> Option<Duration> {
        (Utc::now() - self.fetched_at).to_std().ok()
    }

    pub fn age_minutes(&self) -> i64 {
        (Utc::now() - self.fetched_at).num_minutes()
    }

    pub fn age_display(&self) -> String {
        let minutes = self.age_minutes();
        if minutes < 1 {
            // Includes clock skew
            "just now".to_string()
        } else if minutes < 60 {
            format!("{}m ago", minutes)
        } else if minutes < 1440 {
            let hours = minutes / 60;
            let remaining_mins = minutes % 60;
            if remaining_mins >= 30 {
                format!("{}h ago", hours + 1)
            } else {
                format!("{}h ago", hours)
            }
        } else {
            let days = minutes / 1440;
            let remaining_hours = (minutes % 1440) / 60;
            if remaining_hours >= 12 {
                format!("{}d ago", days + 1)
            } else {
                format!("{}d ago", days)
            }
        }
    }

    /// Older than `max_age`. Entries from the future count as stale.
    pub fn is_stale(&self, max_age: Duration) -> bool {
        self.age().map_or(true, |age| age >= max_age)
    }

    /// Usable for `owner_id` if it belongs to them and is younger than `max_age`.
    pub fn is_usable_for(&self, owner_id: &str, max_age: Duration) -> bool {
        self.owner_id == owner_id && self.profile.belongs_to(owner_id) && !self.is_stale(max_age)
    }
}

/// JSON files under the cache directory.
#[derive(Debug, Clone)]
pub struct CacheManager {
    cache_dir: PathBuf,
}

impl CacheManager {
    pub fn new(cache_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&cache_dir)
            .with_context(|| format!("Failed to create cache directory {}", cache_dir.display()))?;
        Ok(Self { cache_dir })
    }

    pub fn cache_dir(&self) -> &PathBuf {
        &self.cache_dir
    }

    fn cache_path(&self, name: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.json", name))
    }

    fn load<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        let path = self.cache_path(name);
        if !path.exists() {
            return Ok(None);
        }

        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read cache file: {}", name))?;

        let cached: T = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse cache file: {}", name))?;

        Ok(Some(cached))
    }

    fn save<T: Serialize>(&self, name: &str, data: &T) -> Result<()> {
        let path = self.cache_path(name);
        let contents = serde_json::to_string_pretty(data)?;
        // Write then rename so a crash never leaves half a file behind
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, contents)
            .with_context(|| format!("Failed to write cache file: {}", name))?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("Failed to replace cache file: {}", name))?;
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<()> {
        let path = self.cache_path(name);
        if path.exists() {
            std::fs::remove_file(&path)
                .with_context(|| format!("Failed to remove cache file: {}", name))?;
            debug!(cache = name, "Cache file removed");
        }
        Ok(())
    }

    // ===== Profile =====

    pub fn load_profile(&self) -> Result<Option<CacheEntry>> {
        self.load(PROFILE_CACHE)
    }

    pub fn save_profile(&self, entry: &CacheEntry) -> Result<()> {
        self.save(PROFILE_CACHE, entry)
    }

    pub fn clear_profile(&self) -> Result<()> {
        self.remove(PROFILE_CACHE)
    }

    /// Owner of the persisted profile, if one is readable.
    pub fn profile_owner(&self) -> Option<String> {
        match self.load_profile() {
            Ok(entry) => entry.map(|e| e.owner_id),
            Err(e) => {
                debug!(error = %e, "Failed to read profile cache owner");
                None
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ActivityLevel, DietaryFlags, Gender};
    use chrono::Duration as ChronoDuration;

    const HOUR: Duration = Duration::from_secs(3600);

    fn profile(owner: &str) -> Profile {
        Profile {
            owner_id: owner.to_string(),
            age: 30,
            gender: Gender::Female,
            activity_level: ActivityLevel::ModeratelyActive,
            calorie_target: 2000,
            dietary: DietaryFlags::default(),
            updated_at: None,
        }
    }

    #[test]
    fn test_cache_entry_age_display_just_now() {
        let entry = CacheEntry::new(profile("u1"), Utc::now());
        assert_eq!(entry.age_display(), "just now");
    }

    #[test]
    fn test_cache_entry_age_display_rounding() {
        let mut entry = CacheEntry::new(profile("u1"), Utc::now());
        entry.fetched_at = Utc::now() - ChronoDuration::minutes(95);
        assert_eq!(entry.age_display(), "2h ago");
        entry.fetched_at = Utc::now() - ChronoDuration::minutes(10);
        assert_eq!(entry.age_display(), "10m ago");
        entry.fetched_at = Utc::now() - ChronoDuration::hours(30);
        assert_eq!(entry.age_display(), "1d ago");
    }

    #[test]
    fn test_cache_entry_is_stale() {
        let fresh = CacheEntry::new(profile("u1"), Utc::now());
        assert!(!fresh.is_stale(HOUR));

        let old = CacheEntry::new(profile("u1"), Utc::now() - ChronoDuration::minutes(61));
        assert!(old.is_stale(HOUR));

        let future = CacheEntry::new(profile("u1"), Utc::now() + ChronoDuration::hours(2));
        assert!(future.is_stale(HOUR));
    }

    #[test]
    fn test_cache_entry_usable_only_for_owner() {
        let entry = CacheEntry::new(profile("u1"), Utc::now());
        assert!(entry.is_usable_for("u1", HOUR));
        assert!(!entry.is_usable_for("u2", HOUR));
    }

    #[test]
    fn test_profile_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheManager::new(dir.path().join("nested")).unwrap();
        assert_eq!(cache.load_profile().unwrap(), None);

        let entry = CacheEntry::new(profile("u1"), Utc::now());
        cache.save_profile(&entry).unwrap();
        assert_eq!(cache.load_profile().unwrap(), Some(entry));
        assert_eq!(cache.profile_owner().as_deref(), Some("u1"));

        cache.clear_profile().unwrap();
        assert_eq!(cache.load_profile().unwrap(), None);
        // Clearing twice is fine
        cache.clear_profile().unwrap();
    }

    #[test]
    fn test_persisted_field_names() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheManager::new(dir.path().to_path_buf()).unwrap();
        cache
            .save_profile(&CacheEntry::new(profile("u1"), Utc::now()))
            .unwrap();

        let raw = std::fs::read_to_string(dir.path().join("profile.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["owner_id"], "u1");
        assert_eq!(value["profile"]["user_id"], "u1");
        assert!(value["fetched_at"].is_string());
    }

    #[test]
    fn test_corrupt_cache_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheManager::new(dir.path().to_path_buf()).unwrap();
        std::fs::write(dir.path().join("profile.json"), "garbage").unwrap();
        assert!(cache.load_profile().is_err());
        assert_eq!(cache.profile_owner(), None);
    }
}
