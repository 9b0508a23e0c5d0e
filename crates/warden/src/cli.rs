//! Command-line interface handling for the warden binary.
//!
//! Flags override the matching configuration file entries so the same file
//! can be shared by the primary and the backup.

use clap::{Arg, Command};
use std::path::PathBuf;
use warden_core::Role;

pub const DEFAULT_CONFIG_PATH: &str = "warden.toml";

/// Command line arguments parsed from user input.
#[derive(Debug, Clone)]
pub struct CliArgs {
    /// Path to the configuration file
    pub config_path: PathBuf,
    /// Optional override for the instance role
    pub role: Option<Role>,
    /// Optional override for the instance name
    pub name: Option<String>,
    /// Optional override for the shared SQLite database
    pub store_path: Option<PathBuf>,
    /// Optional override for the effect queue database
    pub queue_path: Option<PathBuf>,
    /// Optional override for the territory registry file
    pub registry_path: Option<PathBuf>,
    /// Optional override for log level
    pub log_level: Option<String>,
    /// Whether to force JSON log output
    pub json_logs: bool,
}

impl CliArgs {
    /// Parses command line arguments using clap.
    pub fn parse() -> Self {
        Self::from_matches(Self::command().get_matches())
    }

    fn command() -> Command {
        Command::new("Warden")
            .version(env!("CARGO_PKG_VERSION"))
            .about("Tails game server admin logs, enforces base rules and pays rewards with primary/backup failover")
            .arg(
                Arg::new("config")
                    .short('c')
                    .long("config")
                    .value_name("FILE")
                    .help("Configuration file path")
                    .default_value(DEFAULT_CONFIG_PATH),
            )
            .arg(
                Arg::new("role")
                    .short('r')
                    .long("role")
                    .value_name("ROLE")
                    .help("Instance role")
                    .value_parser(["primary", "backup"]),
            )
            .arg(
                Arg::new("name")
                    .short('n')
                    .long("name")
                    .value_name("NAME")
                    .help("Instance name used in logs"),
            )
            .arg(
                Arg::new("store")
                    .short('s')
                    .long("store")
                    .value_name("FILE")
                    .help("Shared SQLite database path"),
            )
            .arg(
                Arg::new("queue")
                    .short('q')
                    .long("queue")
                    .value_name("FILE")
                    .help("SQLite effect queue path"),
            )
            .arg(
                Arg::new("registry")
                    .long("registry")
                    .value_name("FILE")
                    .help("Territory and roster JSON file"),
            )
            .arg(
                Arg::new("log-level")
                    .short('l')
                    .long("log-level")
                    .value_name("LEVEL")
                    .help("Log level (trace, debug, info, warn, error)"),
            )
            .arg(
                Arg::new("json-logs")
                    .long("json-logs")
                    .help("Output logs in JSON format")
                    .action(clap::ArgAction::SetTrue),
            )
    }

    fn from_matches(matches: clap::ArgMatches) -> Self {
        Self {
            config_path: matches
                .get_one::<String>("config")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH)),
            role: matches
                .get_one::<String>("role")
                .and_then(|role| role.parse().ok()),
            name: matches.get_one::<String>("name").cloned(),
            store_path: matches.get_one::<String>("store").map(PathBuf::from),
            queue_path: matches.get_one::<String>("queue").map(PathBuf::from),
            registry_path: matches.get_one::<String>("registry").map(PathBuf::from),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_from(args: &[&str]) -> CliArgs {
        CliArgs::from_matches(CliArgs::command().get_matches_from(args.iter().copied()))
    }

    #[test]
    fn test_defaults() {
        let args = parse_from(&["warden"]);
        assert_eq!(args.config_path, PathBuf::from(DEFAULT_CONFIG_PATH));
        assert!(args.role.is_none());
        assert!(!args.json_logs);
    }

    #[test]
    fn test_overrides() {
        let args = parse_from(&[
            "warden",
            "--config",
            "/etc/warden/backup.toml",
            "--role",
            "backup",
            "--name",
            "warden-b",
            "--store",
            "/srv/warden.db",
            "--queue",
            "/var/lib/warden/queue-b.db",
            "--json-logs",
        ]);
        assert_eq!(args.config_path, PathBuf::from("/etc/warden/backup.toml"));
        assert_eq!(args.role, Some(Role::Backup));
        assert_eq!(args.name.as_deref(), Some("warden-b"));
        assert_eq!(args.store_path, Some(PathBuf::from("/srv/warden.db")));
        assert_eq!(args.queue_path, Some(PathBuf::from("/var/lib/warden/queue-b.db")));
        assert!(args.json_logs);
    }

    #[test]
    fn test_unknown_role_is_rejected() {
        let result = CliArgs::command().try_get_matches_from(["warden", "--role", "tertiary"]);
        assert!(result.is_err());
    }
}
