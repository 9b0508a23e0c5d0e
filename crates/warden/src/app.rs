//! Application lifecycle: build the collaborators from configuration, run the
//! service until a signal arrives, then stop in order.

use crate::{
    cli::CliArgs,
    config::{AppConfig, TomlSettingsSource, TransportKind, TransportSettings},
    logging::display_banner,
    signals::{next_signal, wait_for_shutdown},
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};
use warden_core::{
    BanListEnforcer, Enforcer, FtpTransport, LocalDirTransport, LogEnforcer, RemoteTransport,
    ShutdownState, Stores, TerritoryIndex, WardenService,
};
use warden_store::SqliteStore;

pub struct Application {
    config: AppConfig,
    config_path: PathBuf,
}

impl Application {
    /// Loads configuration, applies CLI overrides and validates the result.
    pub async fn new(args: CliArgs) -> Result<Self, Box<dyn std::error::Error>> {
        info!("🔧 Loading configuration from: {}", args.config_path.display());
        let mut config = AppConfig::load_from_file(&args.config_path).await?;

        if let Some(role) = args.role {
            config.instance.role = role;
        }
        if let Some(name) = args.name {
            config.instance.name = name;
        }
        if let Some(store_path) = args.store_path {
            config.store.path = store_path.to_string_lossy().to_string();
        }
        if let Some(queue_path) = args.queue_path {
            config.store.queue_path = queue_path.to_string_lossy().to_string();
        }
        if let Some(registry_path) = args.registry_path {
            config.registry.path = Some(registry_path.to_string_lossy().to_string());
        }
        if let Some(log_level) = args.log_level {
            config.logging.level = log_level;
        }
        if args.json_logs {
            config.logging.json_format = true;
        }

        if let Err(e) = config.validate() {
            return Err(format!("Configuration validation failed: {e}").into());
        }
        info!("✅ Configuration loaded and validated successfully");

        display_banner(config.instance.role.as_str());

        Ok(Self {
            config,
            config_path: args.config_path,
        })
    }

    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        self.log_configuration_summary();

        let store = Arc::new(SqliteStore::open(&self.config.store.path)?);
        let queue = Arc::new(SqliteStore::open(&self.config.store.queue_path)?);
        let stores = Stores::shared(store).with_local_queue(queue);
        let transport = build_transport(&self.config.transport);
        let enforcer: Arc<dyn Enforcer> = match &self.config.enforcement.ban_list_path {
            Some(path) => Arc::new(BanListEnforcer::new(path)),
            None => Arc::new(LogEnforcer),
        };

        let index = match &self.config.registry.path {
            Some(path) => load_registry(Path::new(path)).await,
            None => TerritoryIndex::default(),
        };

        let mut service = WardenService::new(
            self.config.instance.name.clone(),
            self.config.instance.role,
            self.config.to_settings(),
            stores,
            transport,
            enforcer,
            index,
        )
        .with_settings_source(Arc::new(TomlSettingsSource::new(&self.config_path)));
        if let Some(path) = &self.config.registry.path {
            service = service.with_registry(path);
        }

        let shutdown_state = ShutdownState::new();
        let signal_state = shutdown_state.clone();
        tokio::spawn(async move {
            let reason = match wait_for_shutdown(&signal_state).await {
                Ok(reason) => reason,
                Err(e) => {
                    error!("❌ Failed to set up shutdown signal handler: {e}");
                    return;
                }
            };

            // merciless shutdown
            match next_signal().await {
                Ok(again) => warn!("Received {again} after {reason}! I'll make this quick."),
                Err(e) => {
                    error!("Failed to set up merciless shutdown signal handler: {e}");
                    return;
                }
            }
            std::process::exit(1);
        });

        info!("✅ Warden is now running!");
        info!("🛑 Press Ctrl+C to gracefully shutdown");

        service.run(shutdown_state).await?;

        info!("✅ Warden shutdown complete");
        Ok(())
    }

    fn log_configuration_summary(&self) {
        info!("📋 Configuration Summary:");
        info!(
            "  🏷️ Instance: {} ({})",
            self.config.instance.name, self.config.instance.role
        );
        let transport = &self.config.transport;
        match transport.kind {
            TransportKind::Local => info!("  📂 Logs: {} / {:?}", transport.root, self.config.tail.roots),
            TransportKind::Ftp => info!(
                "  📂 Logs: ftp{}://{}@{}:{} / {:?}",
                if transport.tls { "s" } else { "" },
                transport.username,
                transport.host,
                transport.port,
                self.config.tail.roots
            ),
        }
        info!(
            "  💾 Store: {} (queue: {})",
            self.config.store.path, self.config.store.queue_path
        );
        info!(
            "  🔁 Failover: timeout {}s, resume policy {:?}",
            self.config.failover.heartbeat_timeout_secs, self.config.failover.resume_policy
        );
        match &self.config.enforcement.ban_list_path {
            Some(path) => info!("  🔨 Ban list: {}", path),
            None => info!("  🔨 Ban list: none, bans are logged only"),
        }
    }
}

fn build_transport(settings: &TransportSettings) -> Arc<dyn RemoteTransport> {
    match settings.kind {
        TransportKind::Local => Arc::new(LocalDirTransport::new(&settings.root)),
        TransportKind::Ftp => Arc::new(FtpTransport::new(settings.ftp_config())),
    }
}

/// A missing or broken registry at startup is not fatal; refreshes retry it.
async fn load_registry(path: &Path) -> TerritoryIndex {
    match TerritoryIndex::load_json(path).await {
        Ok(index) => {
            info!(
                "🗺️ Loaded {} territories and {} members from {}",
                index.territory_count(),
                index.member_count(),
                path.display()
            );
            index
        }
        Err(e) => {
            warn!("⚠️ Starting without a registry: {}", e);
            TerritoryIndex::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_follows_configured_kind() {
        let mut settings = TransportSettings::default();
        assert_eq!(build_transport(&settings).name(), "local");

        settings.kind = TransportKind::Ftp;
        settings.host = "ftp.example.net".to_string();
        assert_eq!(build_transport(&settings).name(), "ftp");

        settings.tls = true;
        assert_eq!(build_transport(&settings).name(), "ftps");
    }
}
