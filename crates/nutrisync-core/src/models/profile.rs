//! The per-user nutrition profile.
//!
//! Field names on the wire are fixed by the backend and must round-trip
//! exactly, so every rename lives here rather than in the client.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user's nutrition preferences, one per account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    /// Identifier of the account this profile belongs to.
    #[serde(rename = "user_id")]
    pub owner_id: String,
    pub age: i32,
    pub gender: Gender,
    pub activity_level: ActivityLevel,
    pub calorie_target: i32,
    #[serde(flatten)]
    pub dietary: DietaryFlags,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Profile {
    pub fn belongs_to(&self, owner_id: &str) -> bool {
        self.owner_id == owner_id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    Other,
}

impl Gender {
    pub fn display_name(&self) -> &'static str {
        match self {
            Gender::Male => "Male",
            Gender::Female => "Female",
            Gender::Other => "Other",
        }
    }
}

impl std::str::FromStr for Gender {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "male" => Ok(Gender::Male),
            "female" => Ok(Gender::Female),
            "other" => Ok(Gender::Other),
            other => Err(format!("unknown gender: {}", other)),
        }
    }
}

/// Activity level, encoded on the wire as an integer in `1..=4`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ActivityLevel {
    Sedentary = 1,
    LightlyActive = 2,
    ModeratelyActive = 3,
    VeryActive = 4,
}

impl ActivityLevel {
    pub fn display_name(&self) -> &'static str {
        match self {
            ActivityLevel::Sedentary => "Sedentary",
            ActivityLevel::LightlyActive => "Lightly active",
            ActivityLevel::ModeratelyActive => "Moderately active",
            ActivityLevel::VeryActive => "Very active",
        }
    }
}

impl TryFrom<u8> for ActivityLevel {
    type Error = InvalidActivityLevel;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(ActivityLevel::Sedentary),
            2 => Ok(ActivityLevel::LightlyActive),
            3 => Ok(ActivityLevel::ModeratelyActive),
            4 => Ok(ActivityLevel::VeryActive),
            other => Err(InvalidActivityLevel(other)),
        }
    }
}

impl From<ActivityLevel> for u8 {
    fn from(level: ActivityLevel) -> Self {
        level as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidActivityLevel(pub u8);

impl fmt::Display for InvalidActivityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "activity level must be between 1 and 4, got {}", self.0)
    }
}

impl std::error::Error for InvalidActivityLevel {}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DietaryFlags {
    #[serde(rename = "is_vegetarian", default)]
    pub vegetarian: bool,
    #[serde(rename = "is_keto", default)]
    pub keto: bool,
    #[serde(rename = "is_gluten_free", default)]
    pub gluten_free: bool,
}

impl DietaryFlags {
    /// Human-readable list of the enabled flags, or "None".
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        if self.vegetarian {
            parts.push("vegetarian");
        }
        if self.keto {
            parts.push("keto");
        }
        if self.gluten_free {
            parts.push("gluten-free");
        }
        if parts.is_empty() {
            "None".to_string()
        } else {
            parts.join(", ")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Profile {
        Profile {
            owner_id: "u1".to_string(),
            age: 30,
            gender: Gender::Male,
            activity_level: ActivityLevel::LightlyActive,
            calorie_target: 2200,
            dietary: DietaryFlags {
                vegetarian: true,
                keto: false,
                gluten_free: true,
            },
            updated_at: None,
        }
    }

    #[test]
    fn test_profile_wire_field_names() {
        let value = serde_json::to_value(sample()).unwrap();
        assert_eq!(
            value,
            json!({
                "user_id": "u1",
                "age": 30,
                "gender": "male",
                "activity_level": 2,
                "calorie_target": 2200,
                "is_vegetarian": true,
                "is_keto": false,
                "is_gluten_free": true,
                "updated_at": null
            })
        );
    }

    #[test]
    fn test_profile_parses_server_document() {
        // The backend returns the stored document, including its own _id
        let json = r#"{"_id":"66a1","user_id":"u1","age":41,"gender":"other","activity_level":4,"calorie_target":1800,"is_vegetarian":false,"is_keto":true,"is_gluten_free":false,"updated_at":"2025-03-01T12:00:00Z"}"#;
        let profile: Profile = serde_json::from_str(json).unwrap();
        assert_eq!(profile.owner_id, "u1");
        assert_eq!(profile.gender, Gender::Other);
        assert_eq!(profile.activity_level, ActivityLevel::VeryActive);
        assert!(profile.dietary.keto);
        assert!(profile.updated_at.is_some());
    }

    #[test]
    fn test_activity_level_out_of_range_rejected() {
        let json = r#"{"user_id":"u1","age":30,"gender":"male","activity_level":5,"calorie_target":2000}"#;
        let err = serde_json::from_str::<Profile>(json).unwrap_err();
        assert!(err.to_string().contains("between 1 and 4"));
    }

    #[test]
    fn test_missing_dietary_flags_default_to_false() {
        let json = r#"{"user_id":"u1","age":30,"gender":"female","activity_level":1,"calorie_target":2000}"#;
        let profile: Profile = serde_json::from_str(json).unwrap();
        assert_eq!(profile.dietary, DietaryFlags::default());
        assert_eq!(profile.updated_at, None);
    }

    #[test]
    fn test_gender_from_str() {
        assert_eq!("Male".parse::<Gender>(), Ok(Gender::Male));
        assert_eq!(" female ".parse::<Gender>(), Ok(Gender::Female));
        assert!("robot".parse::<Gender>().is_err());
    }

    #[test]
    fn test_dietary_summary() {
        assert_eq!(DietaryFlags::default().summary(), "None");
        assert_eq!(sample().dietary.summary(), "vegetarian, gluten-free");
    }
}
