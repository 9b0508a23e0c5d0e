//! Logging system setup and configuration.
//!
//! Human-readable output by default, JSON when asked for. `RUST_LOG` wins over
//! the configured level and filters when set.

use crate::config::LoggingSettings;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// The base level followed by the per-target directives, in `EnvFilter`
/// syntax. Later directives for the same target win.
pub fn filter_directives(config: &LoggingSettings) -> String {
    std::iter::once(config.level.as_str())
        .chain(config.filters.iter().map(String::as_str).filter(|d| !d.trim().is_empty()))
        .collect::<Vec<_>>()
        .join(",")
}

/// Initializes the global subscriber.
///
/// `json_format` forces JSON output regardless of the config file.
pub fn setup_logging(
    config: &LoggingSettings,
    json_format: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let directives = filter_directives(config);
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&directives)?,
    };

    let registry = tracing_subscriber::registry().with(filter);

    if json_format || config.json_format {
        registry
            .with(fmt::layer()
                .json()
                .with_target(true)
                .with_file(false)
                .with_line_number(false)
                .with_thread_names(true)
            )
            .try_init()?;
    } else {
        registry
            .with(fmt::layer()
                .with_ansi(true)
                .with_target(true)
                .with_file(false)
                .with_line_number(false)
                .with_thread_names(true)
            )
            .try_init()?;
    }

    info!("🔧 Logging initialized: {}", directives);
    Ok(())
}

pub fn display_banner(role: &str) {
    let version = option_env!("CARGO_PKG_VERSION").unwrap_or("UNK");
    info!("🛡️ Warden v{} starting as {}", version, role);
    info!("   📜 admin log tailing");
    info!("   🚨 anti-cheat and base protection");
    info!("   💰 rewards with a local effect queue");
    info!("   🔁 primary/backup failover");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filters_quiet_dependencies() {
        let directives = filter_directives(&LoggingSettings::default());
        assert_eq!(directives, "info,rusqlite=warn,suppaftp=warn,rustls=warn");
        assert!(EnvFilter::try_new(&directives).is_ok());
    }

    #[test]
    fn test_custom_filters_follow_the_level() {
        let settings = LoggingSettings {
            level: "warn".to_string(),
            json_format: false,
            filters: vec!["warden_core::tail=debug".to_string(), " ".to_string()],
        };
        assert_eq!(filter_directives(&settings), "warn,warden_core::tail=debug");
    }
}
