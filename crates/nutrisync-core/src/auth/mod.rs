//! Authentication module for tracking who is signed in.
//!
//! This module provides:
//! - `SessionState`: the current identity, its persistence, and change
//!   notifications
//! - `TokenStore`: on-disk persistence of the bearer token
//!
//! Signing in and out always goes through `SessionState` so that observers
//! (the profile store) see every transition.

pub mod credentials;
pub mod session;

pub use credentials::TokenStore;
pub use session::{Identity, SessionEvent, SessionObserver, SessionState};
