//! Local caching module for the profile.
//!
//! This module provides the `CacheManager` for storing and retrieving
//! the signed-in user's profile between runs. Entries carry their owner
//! and fetch time; the profile store decides when an entry is still usable.

pub mod manager;

pub use manager::{CacheEntry, CacheManager};
