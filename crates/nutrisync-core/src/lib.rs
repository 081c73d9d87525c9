//! nutrisync core - authenticated data sync for the nutrition tracker.
//!
//! The pieces, bottom up:
//!
//! - [`auth::SessionState`]: who is signed in, with synchronous change
//!   notifications
//! - [`api::ApiClient`]: bearer-authenticated JSON calls with one error
//!   taxonomy and sign-out on 401
//! - [`store::ProfileStore`]: the current user's profile, cached on disk,
//!   deduplicated and retried
//!
//! [`SyncContext`] wires them together over one cache directory.

pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod context;
pub mod models;
pub mod store;

pub use api::{ApiClient, ApiError};
pub use auth::{Identity, SessionState};
pub use config::Config;
pub use context::SyncContext;
pub use store::{FetchStatus, ProfileState, ProfileStore, StoreConfig, StoreError, StoreSnapshot};
