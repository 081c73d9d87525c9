//! REST API client module for the nutrition backend.
//!
//! This module provides the `ApiClient` for signing in, reading and writing
//! the user's profile, and logging meals.
//!
//! Requests carry a bearer token when one was issued at sign-in. A 401 from
//! any endpoint clears the token and signs the user out.

pub mod client;
pub mod error;

pub use client::ApiClient;
pub use error::{ApiError, TransportKind};
