use anyhow::{anyhow, bail, Context, Result};
use nutrisync_core::auth::Identity;
use nutrisync_core::models::{ActivityLevel, DietaryFlags, Gender, Meal, NewMeal, Profile};
use nutrisync_core::{ApiError, Config, ProfileState, SyncContext};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::cli::{Cli, Commands, MealCommands, ProfileCommands};
use crate::keychain::PasswordStore;

/// Password used instead of prompting, for scripted sign-in.
const PASSWORD_ENV: &str = "NUTRISYNC_PASSWORD";

pub(crate) async fn run(cli: Cli, mut config: Config) -> Result<()> {
    if let Some(server) = cli.server {
        config.api_base_url = server;
    }
    let ctx = SyncContext::open(&config)?;
    let json = cli.json;

    match cli.command {
        Commands::Health => health(&ctx, json).await,
        Commands::Register { name, email } => register(&ctx, &mut config, &name, &email, json).await,
        Commands::Login { email, remember } => login(&ctx, &mut config, email, remember, json).await,
        Commands::Logout { forget } => logout(&ctx, &config, forget),
        Commands::Whoami => whoami(&ctx, json),
        Commands::Profile { action } => match action {
            ProfileCommands::Show { force } => show_profile(&ctx, force, json).await,
            ProfileCommands::Set {
                age,
                gender,
                activity_level,
                calorie_target,
                vegetarian,
                keto,
                gluten_free,
            } => {
                let changes = ProfileChanges {
                    age,
                    gender,
                    activity_level,
                    calorie_target,
                    vegetarian,
                    keto,
                    gluten_free,
                };
                set_profile(&ctx, changes, json).await
            }
        },
        Commands::Meals { action } => match action {
            MealCommands::List => list_meals(&ctx, json).await,
            MealCommands::Add {
                dish,
                description,
                calories,
                nutrition,
                hidden_ingredients,
            } => {
                let nutrition_info = nutrition_info(calories, nutrition.as_deref())?;
                add_meal(&ctx, dish, description, nutrition_info, hidden_ingredients).await
            }
        },
    }
}

fn friendly(err: ApiError) -> anyhow::Error {
    anyhow!(err.user_message())
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn require_identity(ctx: &SyncContext) -> Result<Identity> {
    ctx.session
        .current()
        .ok_or_else(|| anyhow!("Not signed in. Run `nutrisync login` first."))
}

fn prompt_password(prompt: &str) -> Result<String> {
    rpassword::prompt_password(prompt).context("Failed to read password")
}

fn remember_email(config: &mut Config, email: &str) {
    if config.last_email.as_deref() == Some(email) {
        return;
    }
    config.last_email = Some(email.to_string());
    if let Err(e) = config.save() {
        warn!(error = %e, "Failed to save config");
    }
}

// ===== Account =====

async fn health(ctx: &SyncContext, json: bool) -> Result<()> {
    let healthy = ctx.api.health().await.map_err(friendly)?;
    if json {
        print_json(&json!({ "healthy": healthy }))?;
    } else if healthy {
        println!("Backend is healthy");
    }
    if !healthy {
        bail!("Backend reported an unhealthy status");
    }
    Ok(())
}

async fn register(
    ctx: &SyncContext,
    config: &mut Config,
    name: &str,
    email: &str,
    json: bool,
) -> Result<()> {
    let password = prompt_password("Password: ")?;
    let confirm = prompt_password("Confirm password: ")?;
    if password != confirm {
        bail!("Passwords do not match");
    }

    let auth = ctx
        .api
        .register(name, email, &password)
        .await
        .map_err(friendly)?;
    remember_email(config, email);

    if json {
        print_json(&json!({ "user_id": auth.user_id, "name": auth.name }))?;
    } else {
        println!("Account created. Signed in as {}.", auth.name);
        println!("Next: set up your profile with `nutrisync profile set`.");
    }
    Ok(())
}

async fn login(
    ctx: &SyncContext,
    config: &mut Config,
    email: Option<String>,
    remember: bool,
    json: bool,
) -> Result<()> {
    let email = email
        .or_else(|| config.last_email.clone())
        .ok_or_else(|| anyhow!("No email given. Use --email."))?;

    let password = match std::env::var(PASSWORD_ENV) {
        Ok(password) if !password.is_empty() => password,
        _ => match PasswordStore::get(&email) {
            Some(password) => {
                debug!("Using password from keychain");
                password
            }
            None => prompt_password("Password: ")?,
        },
    };

    let auth = ctx.api.login(&email, &password).await.map_err(friendly)?;
    remember_email(config, &email);
    if remember {
        if let Err(e) = PasswordStore::store(&email, &password) {
            warn!(error = %e, "Failed to remember password");
            eprintln!("Could not save password to keychain: {:#}", e);
        }
    }

    // Joins the prefetch started by signing in.
    let profile = match ctx.profiles.fetch(false).await {
        Ok(state) => Some(state),
        Err(e) => {
            warn!(error = %e, "Profile fetch after sign-in failed");
            None
        }
    };

    if json {
        print_json(&json!({
            "user_id": auth.user_id,
            "name": auth.name,
            "needs_setup": matches!(profile, Some(ProfileState::NeedsSetup)),
        }))?;
    } else {
        println!("Signed in as {}.", auth.name);
        if let Some(ProfileState::NeedsSetup) = profile {
            println!("No profile yet. Create one with `nutrisync profile set`.");
        }
    }
    Ok(())
}

fn logout(ctx: &SyncContext, config: &Config, forget: bool) -> Result<()> {
    ctx.logout();
    if forget {
        if let Some(ref email) = config.last_email {
            PasswordStore::delete(email)?;
            info!("Remembered password removed");
        }
    }
    println!("Signed out.");
    Ok(())
}

fn whoami(ctx: &SyncContext, json: bool) -> Result<()> {
    let identity = ctx.session.current();
    let entry = ctx.profiles.entry();

    if json {
        return print_json(&json!({
            "signed_in": identity.is_some(),
            "user_id": identity.as_ref().map(|i| i.id.clone()),
            "name": identity.as_ref().map(|i| i.name.clone()),
            "profile_fetched_at": entry.as_ref().map(|e| e.fetched_at.to_rfc3339()),
        }));
    }

    match identity {
        Some(identity) => {
            println!("{} ({})", identity.name, identity.id);
            match entry {
                Some(entry) => println!("Profile cached {}", entry.age_display()),
                None => println!("No cached profile"),
            }
        }
        None => println!("Not signed in"),
    }
    Ok(())
}

// ===== Profile =====

struct ProfileChanges {
    age: Option<i32>,
    gender: Option<Gender>,
    activity_level: Option<u8>,
    calorie_target: Option<i32>,
    vegetarian: Option<bool>,
    keto: Option<bool>,
    gluten_free: Option<bool>,
}

impl ProfileChanges {
    fn apply(self, profile: &mut Profile) -> Result<()> {
        if let Some(age) = self.age {
            profile.age = age;
        }
        if let Some(gender) = self.gender {
            profile.gender = gender;
        }
        if let Some(level) = self.activity_level {
            profile.activity_level = ActivityLevel::try_from(level)?;
        }
        if let Some(target) = self.calorie_target {
            profile.calorie_target = target;
        }
        if let Some(vegetarian) = self.vegetarian {
            profile.dietary.vegetarian = vegetarian;
        }
        if let Some(keto) = self.keto {
            profile.dietary.keto = keto;
        }
        if let Some(gluten_free) = self.gluten_free {
            profile.dietary.gluten_free = gluten_free;
        }
        Ok(())
    }

    /// A first profile needs every required field.
    fn into_new_profile(self) -> Result<Profile> {
        const HINT: &str = "is required for a new profile";
        Ok(Profile {
            owner_id: String::new(),
            age: self.age.with_context(|| format!("--age {}", HINT))?,
            gender: self.gender.with_context(|| format!("--gender {}", HINT))?,
            activity_level: ActivityLevel::try_from(
                self.activity_level
                    .with_context(|| format!("--activity-level {}", HINT))?,
            )?,
            calorie_target: self
                .calorie_target
                .with_context(|| format!("--calorie-target {}", HINT))?,
            dietary: DietaryFlags {
                vegetarian: self.vegetarian.unwrap_or(false),
                keto: self.keto.unwrap_or(false),
                gluten_free: self.gluten_free.unwrap_or(false),
            },
            updated_at: None,
        })
    }
}

fn validate(profile: &Profile) -> Result<()> {
    if profile.age <= 0 {
        bail!("Age must be positive");
    }
    if profile.calorie_target <= 0 {
        bail!("Calorie target must be positive");
    }
    Ok(())
}

fn print_profile(profile: &Profile) {
    println!("Age:             {}", profile.age);
    println!("Gender:          {}", profile.gender.display_name());
    println!("Activity level:  {}", profile.activity_level.display_name());
    println!("Calorie target:  {} kcal", profile.calorie_target);
    println!("Diet:            {}", profile.dietary.summary());
}

async fn show_profile(ctx: &SyncContext, force: bool, json: bool) -> Result<()> {
    let state = ctx.profiles.fetch(force).await?;
    match state {
        ProfileState::Ready(profile) => {
            if json {
                return print_json(&serde_json::to_value(&profile)?);
            }
            print_profile(&profile);
            if let Some(entry) = ctx.profiles.entry() {
                println!("Updated {}", entry.age_display());
            }
        }
        ProfileState::NeedsSetup => {
            if json {
                return print_json(&json!({ "needs_setup": true }));
            }
            println!("No profile yet. Create one with `nutrisync profile set`.");
        }
    }
    Ok(())
}

async fn set_profile(ctx: &SyncContext, changes: ProfileChanges, json: bool) -> Result<()> {
    let profile = match ctx.profiles.fetch(false).await? {
        ProfileState::Ready(mut profile) => {
            changes.apply(&mut profile)?;
            profile
        }
        ProfileState::NeedsSetup => changes.into_new_profile()?,
    };
    validate(&profile)?;

    let saved = ctx.profiles.save(profile).await?;
    if json {
        print_json(&serde_json::to_value(&saved)?)?;
    } else {
        println!("Profile saved.");
        print_profile(&saved);
    }
    Ok(())
}

// ===== Meals =====

fn nutrition_info(calories: Option<f64>, raw: Option<&str>) -> Result<Value> {
    if let Some(raw) = raw {
        return serde_json::from_str(raw).context("--nutrition must be valid JSON");
    }
    Ok(match calories {
        Some(calories) => json!({ "calories": calories }),
        None => json!({}),
    })
}

fn meal_line(meal: &Meal) -> String {
    match meal.calories() {
        Some(calories) => format!("{} ({:.0} kcal)", meal.dish_prediction, calories),
        None => meal.dish_prediction.clone(),
    }
}

async fn list_meals(ctx: &SyncContext, json: bool) -> Result<()> {
    let identity = require_identity(ctx)?;
    let meals = ctx.api.fetch_meals(&identity.id).await.map_err(friendly)?;

    if json {
        return print_json(&serde_json::to_value(&meals)?);
    }
    if meals.is_empty() {
        println!("No meals logged yet");
        return Ok(());
    }
    for meal in &meals {
        println!("- {}", meal_line(meal));
    }
    let total: f64 = meals.iter().filter_map(Meal::calories).sum();
    println!("{} meals, {:.0} kcal total", meals.len(), total);
    Ok(())
}

async fn add_meal(
    ctx: &SyncContext,
    dish: String,
    description: String,
    nutrition_info: Value,
    hidden_ingredients: String,
) -> Result<()> {
    let identity = require_identity(ctx)?;
    let meal = NewMeal {
        user_id: identity.id,
        dish_prediction: dish,
        image_description: description,
        nutrition_info,
        hidden_ingredients,
        image: None,
    };
    ctx.api.save_meal(&meal).await.map_err(friendly)?;
    println!("Logged {}", meal.dish_prediction);
    Ok(())
}
