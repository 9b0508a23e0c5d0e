//! The per-instance service loop.
//!
//! A single task owns the tailer, the pipeline and the failover coordinator
//! and drives them from one `tokio::select!` over four intervals plus the
//! shutdown signal. Errors inside a cycle are logged and retried on the next
//! tick; only shutdown bookkeeping can fail [`WardenService::run`].

use crate::config::WardenSettings;
use crate::enforcement::Enforcer;
use crate::error::WardenError;
use crate::failover::{Decision, FailoverCoordinator, Phase};
use crate::geo::TerritoryIndex;
use crate::health::CircuitBreakerConfig;
use crate::pipeline::{CycleReport, Pipeline};
use crate::rewards::{ReplayReport, RewardDispatcher};
use crate::shutdown::ShutdownState;
use crate::store::{Role, Stores};
use crate::tail::{RemoteTransport, Tailer};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Where refreshed settings come from, e.g. the TOML file the binary loaded.
#[async_trait]
pub trait SettingsSource: Send + Sync {
    async fn load(&self) -> Result<WardenSettings, WardenError>;
}

struct Timers {
    tail: Interval,
    reconcile: Interval,
    maintenance: Interval,
    refresh: Interval,
}

impl Timers {
    fn new(settings: &WardenSettings) -> Self {
        let schedule = &settings.schedule;
        let make = |period| {
            let mut timer = interval(period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
            timer
        };
        Self {
            tail: make(schedule.tail_interval()),
            reconcile: make(schedule.reconcile_interval()),
            maintenance: make(schedule.maintenance_interval()),
            refresh: make(schedule.refresh_interval()),
        }
    }
}

pub struct WardenService {
    name: String,
    role: Role,
    settings: WardenSettings,
    stores: Stores,
    tailer: Tailer,
    pipeline: Pipeline,
    coordinator: FailoverCoordinator,
    registry_path: Option<PathBuf>,
    settings_source: Option<Arc<dyn SettingsSource>>,
}

impl WardenService {
    pub fn new(
        name: impl Into<String>,
        role: Role,
        settings: WardenSettings,
        stores: Stores,
        transport: Arc<dyn RemoteTransport>,
        enforcer: Arc<dyn Enforcer>,
        index: TerritoryIndex,
    ) -> Self {
        let tailer = Tailer::new(
            transport,
            stores.cursors.clone(),
            role.as_str(),
            settings.tail.clone(),
        );
        let dispatcher = RewardDispatcher::new(
            role,
            settings.rewards.clone(),
            stores.accounts.clone(),
            stores.effects.clone(),
        );
        let pipeline = Pipeline::new(
            &settings,
            dispatcher,
            index,
            enforcer,
            stores.infractions.clone(),
        );
        let coordinator = FailoverCoordinator::new(
            role,
            settings.failover.clone(),
            stores.status.clone(),
            stores.effects.clone(),
        );

        Self {
            name: name.into(),
            role,
            settings,
            stores,
            tailer,
            pipeline,
            coordinator,
            registry_path: None,
            settings_source: None,
        }
    }

    /// Reloads territories and roster from this JSON file on every refresh.
    pub fn with_registry(mut self, path: impl Into<PathBuf>) -> Self {
        self.registry_path = Some(path.into());
        self
    }

    pub fn with_settings_source(mut self, source: Arc<dyn SettingsSource>) -> Self {
        self.settings_source = Some(source);
        self
    }

    pub fn with_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.pipeline.dispatcher_mut().set_breaker(config);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn phase(&self) -> Phase {
        self.coordinator.phase()
    }

    pub fn settings(&self) -> &WardenSettings {
        &self.settings
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Runs until `shutdown` is initiated, then persists state.
    pub async fn run(&mut self, shutdown: ShutdownState) -> Result<(), WardenError> {
        info!(
            "🚀 Warden instance '{}' running as {} (tailing via {})",
            self.name,
            self.role,
            self.tailer.transport_name()
        );
        let mut timers = Timers::new(&self.settings);

        loop {
            tokio::select! {
                _ = shutdown.wait_for_shutdown() => break,
                _ = timers.tail.tick() => {
                    if let Err(err) = self.tail_cycle(Utc::now()).await {
                        warn!("⚠️ Tail cycle failed, retrying next tick: {}", err);
                    }
                }
                _ = timers.reconcile.tick() => {
                    if let Err(err) = self.reconcile_pass(Utc::now()).await {
                        warn!("⚠️ Reconciliation pass failed: {}", err);
                    }
                }
                _ = timers.maintenance.tick() => {
                    if let Err(err) = self.maintenance_pass(Utc::now()).await {
                        warn!("⚠️ Maintenance pass failed: {}", err);
                    }
                }
                _ = timers.refresh.tick() => {
                    let schedule = self.settings.schedule.clone();
                    self.refresh().await;
                    if self.settings.schedule != schedule {
                        info!("⏱️ Schedule changed, restarting timers");
                        timers = Timers::new(&self.settings);
                    }
                }
            }
        }

        self.shutdown(Utc::now()).await?;
        shutdown.complete_shutdown();
        Ok(())
    }

    /// Heartbeats, follows the failover decision and, when serving, tails
    /// and processes one batch. Returns `None` when this instance is idle.
    pub async fn tail_cycle(&mut self, now: DateTime<Utc>) -> Result<Option<CycleReport>, WardenError> {
        let mut decision = self.coordinator.evaluate(now).await?;

        if decision == Decision::Reconcile {
            let report = self
                .pipeline
                .dispatcher()
                .replay_pending(Some(Role::Backup), self.settings.schedule.reconcile_batch, now)
                .await?;
            decision = self.coordinator.after_reconcile(report.remaining, now).await?;
        }

        let journal = match decision {
            Decision::Idle | Decision::Reconcile => {
                debug!("'{}' idle in phase {:?}", self.name, self.coordinator.phase());
                return Ok(None);
            }
            Decision::Serve { journal } => journal,
            Decision::TakeOver => {
                match self.stores.cursors.load_cursor(Role::Primary.as_str()).await? {
                    Some(peer) => self.tailer.seed_from(&peer, now).await?,
                    None => info!("📍 Primary never saved a cursor, discovering the log from scratch"),
                }
                true
            }
            Decision::Resume => {
                if let Some(peer) = self.stores.cursors.load_cursor(Role::Backup.as_str()).await? {
                    if self.tailer.adopt_if_ahead(&peer, now).await? {
                        info!("📍 Adopted the backup's cursor");
                    }
                }
                self.coordinator.journaling()
            }
        };

        let batch = self.tailer.poll(now).await?;
        let report = self.pipeline.process(&batch, now, journal).await?;
        self.tailer.commit(&batch).await?;
        self.coordinator.cycle_completed();

        if report.events > 0 {
            info!(
                "📊 {} lines, {} events, {} actions, {} effects",
                report.lines, report.events, report.actions, report.effects
            );
        }
        Ok(Some(report))
    }

    /// Replays this instance's own queued effects.
    pub async fn reconcile_pass(&mut self, now: DateTime<Utc>) -> Result<ReplayReport, WardenError> {
        let report = self
            .pipeline
            .dispatcher()
            .replay_pending(Some(self.role), self.settings.schedule.reconcile_batch, now)
            .await?;
        Ok(report)
    }

    /// Evicts stale sessions, purges old synced effects and reports queue health.
    pub async fn maintenance_pass(&mut self, now: DateTime<Utc>) -> Result<(), WardenError> {
        let evicted = self.pipeline.maintain(now);
        if evicted > 0 {
            info!("🧹 Evicted {} sessions without a logout", evicted);
        }

        let cutoff = now - Duration::days(self.settings.schedule.effect_retention_days);
        let purged = self.stores.effects.purge_synced_before(cutoff).await?;
        if purged > 0 {
            info!("🧹 Purged {} synced effects", purged);
        }

        let stats = self
            .stores
            .effects
            .stats(self.settings.schedule.max_attempts_warning)
            .await?;
        info!(
            "📊 Effect queue: {} total, {} pending ({} primary, {} backup), {} synced",
            stats.total, stats.pending, stats.pending_primary, stats.pending_backup, stats.synced
        );
        if stats.over_attempts > 0 {
            warn!(
                "⚠️ {} queued effects failed more than {} times",
                stats.over_attempts, self.settings.schedule.max_attempts_warning
            );
        }
        Ok(())
    }

    /// Reloads the registry and settings. Invalid input keeps the previous
    /// state in place.
    pub async fn refresh(&mut self) {
        if let Some(path) = &self.registry_path {
            match TerritoryIndex::load_json(path).await {
                Ok(index) => {
                    debug!(
                        "Registry refreshed: {} territories, {} members",
                        index.territory_count(),
                        index.member_count()
                    );
                    self.pipeline.set_index(index);
                }
                Err(err) => warn!("⚠️ Keeping previous registry: {}", err),
            }
        }

        let Some(source) = &self.settings_source else {
            return;
        };
        let settings = match source.load().await {
            Ok(settings) => settings,
            Err(err) => {
                warn!("⚠️ Keeping previous settings: {}", err);
                return;
            }
        };
        if settings == self.settings {
            return;
        }
        if let Err(err) = settings.validate() {
            warn!("⚠️ Ignoring invalid settings: {}", err);
            return;
        }

        info!("🔧 Settings reloaded");
        self.tailer.update_settings(settings.tail.clone());
        self.pipeline.update_settings(&settings);
        self.coordinator.update_settings(settings.failover.clone());
        self.settings = settings;
    }

    /// Persists the cursor, flushes this instance's queue and marks the
    /// status row stopped.
    pub async fn shutdown(&mut self, now: DateTime<Utc>) -> Result<(), WardenError> {
        info!("🛑 Stopping '{}'", self.name);

        if let Err(err) = self.tailer.persist().await {
            error!("❌ Failed to persist cursor: {}", err);
        }

        match self.reconcile_pass(now).await {
            Ok(report) if report.remaining > 0 => {
                warn!("💾 {} effects stay queued for the next start", report.remaining)
            }
            Ok(_) => {}
            Err(err) => warn!("⚠️ Final flush failed: {}", err),
        }

        self.coordinator.mark_stopped(now).await?;
        info!("👋 '{}' stopped", self.name);
        Ok(())
    }
}
