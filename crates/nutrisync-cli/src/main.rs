//! nutrisync - command-line client for the nutrition tracker.
//!
//! # Examples
//!
//! ```bash
//! # Sign in and keep the password in the keychain
//! nutrisync login --email ada@example.com --remember
//!
//! # Show the profile (served from cache when fresh)
//! nutrisync profile show
//!
//! # Update the calorie target
//! nutrisync profile set --calorie-target 2100
//! ```

mod cli;
mod commands;
mod keychain;

use std::io;
use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use nutrisync_core::Config;
use tracing::{debug, info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::Cli;

/// Rotated log files kept in the cache directory
const MAX_LOG_FILES: usize = 7;

/// Initialize the tracing subscriber for logging.
///
/// Console output honours `RUST_LOG` (default `warn`); a daily log file is
/// written under the cache directory when one is available.
fn init_tracing(log_dir: Option<&Path>) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let file_layer = log_dir.and_then(|dir| {
        let logs_dir = dir.join("logs");
        std::fs::create_dir_all(&logs_dir).ok()?;
        RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .max_log_files(MAX_LOG_FILES)
            .filename_prefix("nutrisync")
            .filename_suffix("log")
            .build(&logs_dir)
            .ok()
            .map(|appender| fmt::layer().with_ansi(false).with_writer(appender))
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config, using defaults: {:#}", e);
            Config::default()
        }
    };

    let log_dir = config.cache_dir().ok();
    init_tracing(log_dir.as_deref());
    info!(api = %config.api_base_url, "nutrisync starting");
    if log_dir.is_none() {
        warn!("No cache directory available, file logging disabled");
    }

    match commands::run(cli, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            debug!(error = %e, "Command failed");
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
