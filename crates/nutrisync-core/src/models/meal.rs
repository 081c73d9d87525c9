//! Logged meals.
//!
//! Nutrition info is produced by the backend's image analysis and has no
//! fixed shape, so it is carried as raw JSON.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A meal as submitted to `/save-meal`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMeal {
    pub user_id: String,
    pub dish_prediction: String,
    pub image_description: String,
    pub nutrition_info: Value,
    #[serde(default)]
    pub hidden_ingredients: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// A meal as returned by `/user-meals`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meal {
    #[serde(rename = "_id", default)]
    pub id: Option<String>,
    pub user_id: String,
    pub dish_prediction: String,
    #[serde(default)]
    pub image_description: String,
    #[serde(default)]
    pub nutrition_info: Value,
    #[serde(default)]
    pub hidden_ingredients: String,
}

impl Meal {
    /// Calories if the analysis reported them as a number.
    pub fn calories(&self) -> Option<f64> {
        let info = &self.nutrition_info;
        info.get("calories")
            .or_else(|| info.get("Calories"))
            .and_then(Value::as_f64)
    }
}
