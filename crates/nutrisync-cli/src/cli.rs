use clap::{Parser, Subcommand};
use nutrisync_core::models::Gender;

#[derive(Parser)]
#[command(name = "nutrisync")]
#[command(about = "Sign in, manage your nutrition profile, and log meals")]
#[command(version)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub(crate) command: Commands,

    /// API base URL (overrides config and NUTRISYNC_API_URL)
    #[arg(long, global = true)]
    pub(crate) server: Option<String>,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub(crate) json: bool,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Check that the backend is reachable
    Health,

    /// Create an account and sign in
    Register {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
    },

    /// Sign in
    Login {
        /// Defaults to the last email used
        #[arg(long)]
        email: Option<String>,
        /// Keep the password in the OS keychain
        #[arg(long)]
        remember: bool,
    },

    /// Sign out and drop the cached profile
    Logout {
        /// Also remove the password from the OS keychain
        #[arg(long)]
        forget: bool,
    },

    /// Show who is signed in
    Whoami,

    /// Profile operations
    Profile {
        #[command(subcommand)]
        action: ProfileCommands,
    },

    /// Meal history operations
    Meals {
        #[command(subcommand)]
        action: MealCommands,
    },
}

#[derive(Subcommand)]
pub(crate) enum ProfileCommands {
    /// Show the profile, from cache when fresh
    Show {
        /// Always ask the server
        #[arg(long)]
        force: bool,
    },
    /// Create or update the profile
    Set {
        #[arg(long)]
        age: Option<i32>,
        /// male, female or other
        #[arg(long)]
        gender: Option<Gender>,
        /// 1 (sedentary) to 4 (very active)
        #[arg(long)]
        activity_level: Option<u8>,
        #[arg(long)]
        calorie_target: Option<i32>,
        #[arg(long)]
        vegetarian: Option<bool>,
        #[arg(long)]
        keto: Option<bool>,
        #[arg(long)]
        gluten_free: Option<bool>,
    },
}

#[derive(Subcommand)]
pub(crate) enum MealCommands {
    /// List logged meals
    List,
    /// Log a meal
    Add {
        /// Dish name
        dish: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long)]
        calories: Option<f64>,
        /// Full nutrition info as JSON (overrides --calories)
        #[arg(long)]
        nutrition: Option<String>,
        #[arg(long, default_value = "")]
        hidden_ingredients: String,
    },
}
