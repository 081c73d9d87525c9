//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::path::Path;
use std::time::Duration;

use nutrisync_core::config::Timeouts;
use nutrisync_core::models::{ActivityLevel, DietaryFlags, Gender, Profile};
use nutrisync_core::store::RetryPolicy;
use nutrisync_core::{StoreConfig, SyncContext};
use serde_json::{json, Value};
use wiremock::MockServer;

pub fn fast_timeouts() -> Timeouts {
    Timeouts {
        request: Duration::from_secs(2),
        resource: Duration::from_secs(2),
        health: Duration::from_millis(200),
    }
}

pub fn store_config() -> StoreConfig {
    StoreConfig {
        retry: RetryPolicy {
            max_attempts: 3,
            transport_delay: Duration::from_millis(20),
            server_error_delay: Duration::from_millis(20),
        },
        prefetch_on_login: false,
        ..StoreConfig::default()
    }
}

pub fn context(server: &MockServer, dir: &Path) -> SyncContext {
    context_with(server, dir, fast_timeouts(), store_config())
}

pub fn context_with(
    server: &MockServer,
    dir: &Path,
    timeouts: Timeouts,
    config: StoreConfig,
) -> SyncContext {
    SyncContext::with_dir(dir.to_path_buf(), &server.uri(), timeouts, config).unwrap()
}

pub fn profile_json(user_id: &str, calorie_target: i32) -> Value {
    json!({
        "user_id": user_id,
        "age": 34,
        "gender": "female",
        "activity_level": 3,
        "calorie_target": calorie_target,
        "is_vegetarian": true,
        "is_keto": false,
        "is_gluten_free": false,
        "updated_at": null
    })
}

pub fn profile(user_id: &str, calorie_target: i32) -> Profile {
    Profile {
        owner_id: user_id.to_string(),
        age: 34,
        gender: Gender::Female,
        activity_level: ActivityLevel::ModeratelyActive,
        calorie_target,
        dietary: DietaryFlags {
            vegetarian: true,
            ..DietaryFlags::default()
        },
        updated_at: None,
    }
}
