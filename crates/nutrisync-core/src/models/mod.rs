//! Data models for nutrisync entities.
//!
//! This module contains the data structures exchanged with the backend:
//!
//! - `Profile`: per-user nutrition preferences
//! - `Meal`, `NewMeal`: logged meal history
//! - `AuthResponse`: login/registration result

pub mod account;
pub mod meal;
pub mod profile;

pub use account::AuthResponse;
pub use meal::{Meal, NewMeal};
pub use profile::{ActivityLevel, DietaryFlags, Gender, InvalidActivityLevel, Profile};
