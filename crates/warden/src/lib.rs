//! # Warden - Main Entry Point
//!
//! Runs one instance of the log warden. Start one process with
//! `--role primary` and another with `--role backup` against the same
//! database file; the backup takes over when the primary goes silent.
//!
//! ```bash
//! warden --config warden.toml --role primary
//! warden --config warden.toml --role backup --name warden-b --json-logs
//! ```
//!
//! A missing configuration file is created with defaults. SIGINT/SIGTERM
//! stop the instance gracefully; a second signal exits immediately.

use tracing::error;

mod app;
mod cli;
mod config;
mod logging;
mod signals;

use app::Application;
use cli::CliArgs;
use config::AppConfig;

/// Parses arguments, sets up logging and runs the application.
///
/// Exits the process with status 1 on startup or runtime failure.
pub async fn init() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    let mut config = AppConfig::load_from_file(&args.config_path)
        .await
        .unwrap_or_default();
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }

    if let Err(e) = logging::setup_logging(&config.logging, args.json_logs) {
        eprintln!("❌ Failed to setup logging: {e}");
        std::process::exit(1);
    }

    match Application::new(args).await {
        Ok(app) => {
            if let Err(e) = app.run().await {
                error!("❌ Application error: {:?}", e);
                std::process::exit(1);
            }
        }
        Err(e) => {
            error!("❌ Failed to start application: {e:?}");
            std::process::exit(1);
        }
    }

    Ok(())
}

pub use config::{
    EnforcementSettings, InstanceSettings, LoggingSettings, RegistrySettings, StoreSettings,
    TransportKind, TransportSettings,
};
