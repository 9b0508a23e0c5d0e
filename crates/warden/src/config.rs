//! Configuration management for the warden binary.
//!
//! One TOML file carries the instance identity, where logs and the shared
//! database live, and every pipeline section understood by `warden_core`.
//! The same file is re-read on the refresh interval through
//! [`TomlSettingsSource`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;
use warden_core::config::{
    FailoverSettings, GeoSettings, HotzoneSettings, RewardSettings, RuleSettings,
    ScheduleSettings, TailSettings,
};
use warden_core::{FtpConfig, Role, SettingsSource, WardenError, WardenSettings};

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

fn default_role() -> Role { Role::Primary }
fn default_instance_name() -> String { "warden-primary".to_string() }
fn default_transport_root() -> String { ".".to_string() }
fn default_ftp_port() -> u16 { 21 }
fn default_ftp_username() -> String { "anonymous".to_string() }
fn default_transport_timeout_secs() -> u64 { 30 }
fn default_store_path() -> String { "warden.db".to_string() }
fn default_queue_path() -> String { "warden-queue.db".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_log_filters() -> Vec<String> {
    vec!["rusqlite=warn".to_string(), "suppaftp=warn".to_string(), "rustls=warn".to_string()]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceSettings {
    #[serde(default = "default_role")]
    pub role: Role,
    #[serde(default = "default_instance_name")]
    pub name: String,
}

impl Default for InstanceSettings {
    fn default() -> Self {
        Self {
            role: default_role(),
            name: default_instance_name(),
        }
    }
}

/// How the game server's log directory is reached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Mounted or synced directory
    #[default]
    Local,
    /// FTP host, FTPS when `tls` is set
    Ftp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportSettings {
    #[serde(default)]
    pub kind: TransportKind,
    /// Local base directory; `tail.roots` are resolved against it
    #[serde(default = "default_transport_root")]
    pub root: String,
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_ftp_port")]
    pub port: u16,
    #[serde(default = "default_ftp_username")]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub tls: bool,
    /// Connect and read timeout for remote hosts
    #[serde(default = "default_transport_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            kind: TransportKind::default(),
            root: default_transport_root(),
            host: String::new(),
            port: default_ftp_port(),
            username: default_ftp_username(),
            password: String::new(),
            tls: false,
            timeout_secs: default_transport_timeout_secs(),
        }
    }
}

impl TransportSettings {
    pub fn ftp_config(&self) -> FtpConfig {
        FtpConfig {
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
            password: self.password.clone(),
            tls: self.tls,
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }

    fn validate(&self) -> Result<(), String> {
        match self.kind {
            TransportKind::Local if self.root.trim().is_empty() => {
                Err("transport.root cannot be empty".to_string())
            }
            TransportKind::Local => Ok(()),
            TransportKind::Ftp => {
                if self.host.trim().is_empty() {
                    return Err("transport.host is required for ftp".to_string());
                }
                if self.port == 0 {
                    return Err("transport.port must be greater than 0".to_string());
                }
                if !(1..=300).contains(&self.timeout_secs) {
                    return Err("transport.timeout_secs must be between 1 and 300".to_string());
                }
                Ok(())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreSettings {
    /// SQLite file shared by the primary and the backup
    #[serde(default = "default_store_path")]
    pub path: String,
    /// Effect queue, kept apart from the account database so effects can
    /// still be journaled while it is down. Both instances point at the same
    /// queue file so the primary can see the backup's journal.
    #[serde(default = "default_queue_path")]
    pub queue_path: String,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            queue_path: default_queue_path(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistrySettings {
    /// Territories and roster JSON, reloaded on every refresh
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnforcementSettings {
    /// Ban file in the `identity // reason` format. Without one, bans are
    /// only logged.
    #[serde(default)]
    pub ban_list_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Whether to output logs in JSON format
    #[serde(default)]
    pub json_format: bool,
    /// Extra `target=level` directives, e.g. `warden_core::tail=debug`
    #[serde(default = "default_log_filters")]
    pub filters: Vec<String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
            filters: default_log_filters(),
        }
    }
}

/// Application configuration loaded from TOML file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub instance: InstanceSettings,
    #[serde(default)]
    pub transport: TransportSettings,
    #[serde(default)]
    pub store: StoreSettings,
    #[serde(default)]
    pub registry: RegistrySettings,
    #[serde(default)]
    pub enforcement: EnforcementSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub tail: TailSettings,
    #[serde(default)]
    pub rules: RuleSettings,
    #[serde(default)]
    pub hotzone: HotzoneSettings,
    #[serde(default)]
    pub rewards: RewardSettings,
    #[serde(default)]
    pub geo: GeoSettings,
    #[serde(default)]
    pub failover: FailoverSettings,
    #[serde(default)]
    pub schedule: ScheduleSettings,
}

impl AppConfig {
    /// Loads configuration from `path`, writing the defaults there first if
    /// the file does not exist.
    pub async fn load_from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// The pipeline sections, as handed to the service.
    pub fn to_settings(&self) -> WardenSettings {
        WardenSettings {
            tail: self.tail.clone(),
            rules: self.rules.clone(),
            hotzone: self.hotzone.clone(),
            rewards: self.rewards.clone(),
            geo: self.geo.clone(),
            failover: self.failover.clone(),
            schedule: self.schedule.clone(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.instance.name.trim().is_empty() {
            return Err("instance.name cannot be empty".to_string());
        }
        self.transport.validate()?;
        if self.store.path.trim().is_empty() || self.store.queue_path.trim().is_empty() {
            return Err("store.path and store.queue_path cannot be empty".to_string());
        }
        if self.store.path == self.store.queue_path {
            return Err("store.queue_path must differ from the shared store.path".to_string());
        }
        if let Some(bad) = self.logging.filters.iter().find(|d| !d.contains('=')) {
            return Err(format!("logging filter '{bad}' must look like target=level"));
        }
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level '{}', expected one of: {}",
                self.logging.level,
                VALID_LOG_LEVELS.join(", ")
            ));
        }

        self.to_settings().validate()
    }
}

/// Re-reads the configuration file for hot reloads.
#[derive(Debug, Clone)]
pub struct TomlSettingsSource {
    path: PathBuf,
}

impl TomlSettingsSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SettingsSource for TomlSettingsSource {
    async fn load(&self) -> Result<WardenSettings, WardenError> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|err| {
            WardenError::Config(format!("cannot read {}: {err}", self.path.display()))
        })?;
        let config: AppConfig = toml::from_str(&content).map_err(|err| {
            WardenError::Config(format!("cannot parse {}: {err}", self.path.display()))
        })?;
        Ok(config.to_settings())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_core::ResumePolicy;

    #[test]
    fn test_app_config_default() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.instance.role, Role::Primary);
        assert_eq!(config.store.path, "warden.db");
        assert_eq!(config.store.queue_path, "warden-queue.db");
        assert_eq!(config.transport.kind, TransportKind::Local);
        assert_eq!(config.to_settings(), WardenSettings::default());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.instance.name = " ".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.failover.heartbeat_timeout_secs = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_ftp_transport_needs_a_host() {
        let mut config = AppConfig::default();
        config.transport.kind = TransportKind::Ftp;
        assert!(config.validate().is_err());

        config.transport.host = "ftp.example.net".to_string();
        config.transport.tls = true;
        assert!(config.validate().is_ok());
        let ftp = config.transport.ftp_config();
        assert_eq!(ftp.port, 21);
        assert_eq!(ftp.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_queue_must_not_share_the_store_file() {
        let mut config = AppConfig::default();
        config.store.queue_path = config.store.path.clone();
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_load_from_nonexistent_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("warden.toml");

        let config = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(config, AppConfig::default());
        assert!(path.exists());

        let reloaded = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(reloaded, config);
    }

    #[tokio::test]
    async fn test_load_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backup.toml");
        tokio::fs::write(
            &path,
            r#"
[instance]
role = "backup"
name = "warden-b"

[rewards]
kill_reward = 75

[failover]
resume_policy = "reconcile"

[transport]
kind = "ftp"
host = "203.0.113.7"
port = 2121
username = "dayz"
password = "secret"
"#,
        )
        .await
        .unwrap();

        let config = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(config.instance.role, Role::Backup);
        assert_eq!(config.rewards.kill_reward, 75);
        assert_eq!(config.rewards.daily_bonus, 500);
        assert_eq!(config.failover.resume_policy, ResumePolicy::Reconcile);
        assert_eq!(config.transport.kind, TransportKind::Ftp);
        assert_eq!(config.transport.port, 2121);
        assert!(!config.transport.tls);
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_settings_source_follows_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("warden.toml");
        AppConfig::load_from_file(&path).await.unwrap();

        let source = TomlSettingsSource::new(&path);
        assert_eq!(source.load().await.unwrap().schedule.tail_interval_secs, 30);

        tokio::fs::write(&path, "[schedule]\ntail_interval_secs = 15\n")
            .await
            .unwrap();
        assert_eq!(source.load().await.unwrap().schedule.tail_interval_secs, 15);

        tokio::fs::write(&path, "[schedule\n").await.unwrap();
        assert!(matches!(source.load().await, Err(WardenError::Config(_))));
    }
}
