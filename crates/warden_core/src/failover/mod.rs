//! Primary/backup coordination over the shared status table.
//!
//! Each instance writes its own row (keyed by role name) on every cycle and
//! reads its peer's. There is no lease: a peer whose heartbeat is older than
//! the timeout, or whose row says it is inactive, is treated as gone.

use crate::config::{FailoverSettings, ResumePolicy};
use crate::error::StoreError;
use crate::store::{EffectQueue, InstanceState, InstanceStatus, Role, StatusStore};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, warn};

/// Where this instance stands in the handoff protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Unknown,
    Standby,
    TakingOver,
    Active,
    Reconciling,
    /// Primary holding off while the backup still has unsynced work
    Waiting,
}

/// What the service loop should do this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Heartbeat only
    Idle,
    /// Tail and dispatch. `journal` records every effect for reconciliation.
    Serve { journal: bool },
    /// Seed the cursor from the primary, then serve journaled
    TakeOver,
    /// Adopt the backup's cursor if it is ahead, then serve
    Resume,
    /// Replay the backup's unsynced effects and report back through
    /// [`FailoverCoordinator::after_reconcile`]
    Reconcile,
}

pub struct FailoverCoordinator {
    role: Role,
    settings: FailoverSettings,
    status: Arc<dyn StatusStore>,
    effects: Arc<dyn EffectQueue>,
    phase: Phase,
    waiting_since: Option<DateTime<Utc>>,
}

impl FailoverCoordinator {
    pub fn new(
        role: Role,
        settings: FailoverSettings,
        status: Arc<dyn StatusStore>,
        effects: Arc<dyn EffectQueue>,
    ) -> Self {
        Self {
            role,
            settings,
            status,
            effects,
            phase: Phase::Unknown,
            waiting_since: None,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn update_settings(&mut self, settings: FailoverSettings) {
        self.settings = settings;
    }

    /// Heartbeats and decides this cycle's work.
    pub async fn evaluate(&mut self, now: DateTime<Utc>) -> Result<Decision, StoreError> {
        match self.role {
            Role::Primary => self.evaluate_primary(now).await,
            Role::Backup => self.evaluate_backup(now).await,
        }
    }

    async fn evaluate_primary(&mut self, now: DateTime<Utc>) -> Result<Decision, StoreError> {
        match self.phase {
            Phase::Unknown | Phase::Standby | Phase::TakingOver => {
                let backup_busy = self.peer_is_serving(now).await?
                    && self.effects.count_pending(Some(Role::Backup)).await? > 0;
                if !backup_busy {
                    self.enter(Phase::Active, now).await?;
                    return Ok(Decision::Resume);
                }

                match self.settings.resume_policy {
                    ResumePolicy::Wait => {
                        info!("⏳ Backup is still serving with unsynced effects, waiting for it to stand down");
                        self.waiting_since = Some(now);
                        self.enter(Phase::Waiting, now).await?;
                        Ok(Decision::Idle)
                    }
                    ResumePolicy::Reconcile => {
                        info!("🔁 Replaying the backup's unsynced effects before resuming");
                        self.enter(Phase::Reconciling, now).await?;
                        Ok(Decision::Reconcile)
                    }
                    ResumePolicy::Concurrent => {
                        info!("⚡ Resuming alongside the backup");
                        self.enter(Phase::Active, now).await?;
                        Ok(Decision::Resume)
                    }
                }
            }
            Phase::Waiting => {
                let since = self.waiting_since.unwrap_or(now);
                let grace_over = now.signed_duration_since(since) >= self.settings.resume_grace();
                let backup_done = !self.peer_is_serving(now).await?
                    || self.effects.count_pending(Some(Role::Backup)).await? == 0;

                if backup_done || grace_over {
                    if grace_over && !backup_done {
                        warn!("⏰ Resume grace elapsed with the backup still serving, resuming anyway");
                    } else {
                        info!("✅ Backup stood down, resuming");
                    }
                    self.waiting_since = None;
                    self.enter(Phase::Active, now).await?;
                    Ok(Decision::Resume)
                } else {
                    self.heartbeat(now).await?;
                    Ok(Decision::Idle)
                }
            }
            Phase::Reconciling => {
                self.heartbeat(now).await?;
                Ok(Decision::Reconcile)
            }
            Phase::Active => {
                self.heartbeat(now).await?;
                Ok(Decision::Serve { journal: false })
            }
        }
    }

    async fn evaluate_backup(&mut self, now: DateTime<Utc>) -> Result<Decision, StoreError> {
        let primary_alive = self.peer_is_serving(now).await?;

        match self.phase {
            Phase::Unknown | Phase::Standby | Phase::Waiting => {
                if primary_alive {
                    if self.phase != Phase::Standby {
                        info!("😴 Primary is alive, standing by");
                    }
                    self.enter(Phase::Standby, now).await?;
                    Ok(Decision::Idle)
                } else {
                    warn!("🚨 Primary heartbeat is stale or missing, taking over ingestion");
                    self.enter(Phase::TakingOver, now).await?;
                    Ok(Decision::TakeOver)
                }
            }
            Phase::TakingOver | Phase::Active => {
                if primary_alive {
                    info!("🔁 Primary is back, reconciling journaled effects");
                    self.enter(Phase::Reconciling, now).await?;
                    Ok(Decision::Reconcile)
                } else {
                    self.heartbeat(now).await?;
                    Ok(Decision::Serve { journal: true })
                }
            }
            Phase::Reconciling => {
                self.heartbeat(now).await?;
                Ok(Decision::Reconcile)
            }
        }
    }

    /// Reports how many effects are still unsynced after a reconcile pass.
    pub async fn after_reconcile(
        &mut self,
        remaining: u64,
        now: DateTime<Utc>,
    ) -> Result<Decision, StoreError> {
        match (self.role, remaining) {
            (Role::Backup, 0) => {
                info!("✅ Reconciliation complete, returning to standby");
                self.enter(Phase::Standby, now).await?;
                Ok(Decision::Idle)
            }
            (Role::Backup, _) => {
                info!("🔁 {remaining} journaled effects still unsynced, serving until the next pass");
                Ok(Decision::Serve { journal: true })
            }
            (Role::Primary, 0) => {
                info!("✅ Backup journal replayed, resuming");
                self.enter(Phase::Active, now).await?;
                Ok(Decision::Resume)
            }
            (Role::Primary, _) => Ok(Decision::Idle),
        }
    }

    /// Marks the first successful cycle after a takeover.
    pub fn cycle_completed(&mut self) {
        if self.phase == Phase::TakingOver {
            info!("✅ Backup is now active");
            self.phase = Phase::Active;
        }
    }

    /// Whether effects produced now must be journaled.
    pub fn journaling(&self) -> bool {
        self.role == Role::Backup
            && matches!(
                self.phase,
                Phase::TakingOver | Phase::Active | Phase::Reconciling
            )
    }

    pub async fn mark_stopped(&mut self, now: DateTime<Utc>) -> Result<(), StoreError> {
        self.write(InstanceState::Stopped, false, now).await
    }

    pub async fn mark_failed(&mut self, now: DateTime<Utc>) -> Result<(), StoreError> {
        self.write(InstanceState::Failed, false, now).await
    }

    async fn enter(&mut self, phase: Phase, now: DateTime<Utc>) -> Result<(), StoreError> {
        self.phase = phase;
        self.heartbeat(now).await
    }

    async fn heartbeat(&self, now: DateTime<Utc>) -> Result<(), StoreError> {
        let (state, active) = match self.phase {
            Phase::Unknown => (InstanceState::Starting, false),
            Phase::Standby => (InstanceState::Standby, false),
            Phase::TakingOver => (InstanceState::TakingOver, true),
            Phase::Active => (InstanceState::Running, true),
            Phase::Reconciling => (InstanceState::Reconciling, true),
            Phase::Waiting => (InstanceState::Waiting, true),
        };
        self.write(state, active, now).await
    }

    async fn write(&self, status: InstanceState, is_active: bool, now: DateTime<Utc>) -> Result<(), StoreError> {
        self.status
            .write_status(&InstanceStatus {
                instance_name: self.role.as_str().to_string(),
                last_heartbeat: now,
                is_active,
                status,
            })
            .await
    }

    /// True when the peer claims to be active and its heartbeat is fresh.
    async fn peer_is_serving(&self, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let peer = self.status.read_status(self.role.peer().as_str()).await?;
        Ok(peer.is_some_and(|peer| peer.is_live(now, self.settings.heartbeat_timeout())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{EffectPayload, MemoryStore, QueuedEffect};
    use chrono::{Duration, TimeZone};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 11, 24, 12, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn coordinator(role: Role, store: &Arc<MemoryStore>, policy: ResumePolicy) -> FailoverCoordinator {
        FailoverCoordinator::new(
            role,
            FailoverSettings {
                resume_policy: policy,
                ..FailoverSettings::default()
            },
            store.clone(),
            store.clone(),
        )
    }

    async fn journal_backup_effect(store: &MemoryStore) -> QueuedEffect {
        let effect = QueuedEffect::new(
            "credit:logs/a.ADM:0",
            EffectPayload::Credit {
                player: "Alpha".to_string(),
                amount: 5,
                reason: "test".to_string(),
            },
            Role::Backup,
            at(0),
        );
        store.enqueue(&effect).await.unwrap();
        effect
    }

    #[tokio::test]
    async fn test_backup_stands_by_while_primary_heartbeats() {
        let store = Arc::new(MemoryStore::new());
        let mut primary = coordinator(Role::Primary, &store, ResumePolicy::Wait);
        let mut backup = coordinator(Role::Backup, &store, ResumePolicy::Wait);

        assert_eq!(primary.evaluate(at(0)).await.unwrap(), Decision::Resume);
        assert_eq!(primary.evaluate(at(30)).await.unwrap(), Decision::Serve { journal: false });
        assert_eq!(backup.evaluate(at(31)).await.unwrap(), Decision::Idle);
        assert_eq!(backup.phase(), Phase::Standby);
    }

    #[tokio::test]
    async fn test_backup_takes_over_in_one_cycle() {
        let store = Arc::new(MemoryStore::new());
        let mut primary = coordinator(Role::Primary, &store, ResumePolicy::Wait);
        let mut backup = coordinator(Role::Backup, &store, ResumePolicy::Wait);

        primary.evaluate(at(0)).await.unwrap();
        assert_eq!(backup.evaluate(at(100)).await.unwrap(), Decision::Idle);
        assert_eq!(backup.evaluate(at(121)).await.unwrap(), Decision::TakeOver);
        assert!(backup.journaling());

        backup.cycle_completed();
        assert_eq!(backup.phase(), Phase::Active);
        assert_eq!(backup.evaluate(at(151)).await.unwrap(), Decision::Serve { journal: true });

        let row = store.read_status("backup").await.unwrap().unwrap();
        assert!(row.is_active);
        assert_eq!(row.status, InstanceState::Running);
    }

    #[tokio::test]
    async fn test_stopped_primary_is_taken_over_immediately() {
        let store = Arc::new(MemoryStore::new());
        let mut primary = coordinator(Role::Primary, &store, ResumePolicy::Wait);
        let mut backup = coordinator(Role::Backup, &store, ResumePolicy::Wait);

        primary.evaluate(at(0)).await.unwrap();
        primary.mark_stopped(at(5)).await.unwrap();
        assert_eq!(backup.evaluate(at(6)).await.unwrap(), Decision::TakeOver);
    }

    #[tokio::test]
    async fn test_backup_reconciles_before_standing_down() {
        let store = Arc::new(MemoryStore::new());
        let mut backup = coordinator(Role::Backup, &store, ResumePolicy::Wait);
        let mut primary = coordinator(Role::Primary, &store, ResumePolicy::Concurrent);

        assert_eq!(backup.evaluate(at(0)).await.unwrap(), Decision::TakeOver);
        backup.cycle_completed();
        journal_backup_effect(&store).await;

        assert_eq!(primary.evaluate(at(10)).await.unwrap(), Decision::Resume);
        assert_eq!(backup.evaluate(at(30)).await.unwrap(), Decision::Reconcile);

        // Partial pass keeps the backup serving
        assert_eq!(
            backup.after_reconcile(1, at(31)).await.unwrap(),
            Decision::Serve { journal: true }
        );
        assert_eq!(backup.evaluate(at(60)).await.unwrap(), Decision::Reconcile);
        assert_eq!(backup.after_reconcile(0, at(61)).await.unwrap(), Decision::Idle);
        assert_eq!(backup.phase(), Phase::Standby);
        assert!(!store.read_status("backup").await.unwrap().unwrap().is_active);
    }

    #[tokio::test]
    async fn test_primary_waits_for_backup_journal() {
        let store = Arc::new(MemoryStore::new());
        let mut backup = coordinator(Role::Backup, &store, ResumePolicy::Wait);
        let mut primary = coordinator(Role::Primary, &store, ResumePolicy::Wait);

        backup.evaluate(at(0)).await.unwrap();
        let effect = journal_backup_effect(&store).await;

        assert_eq!(primary.evaluate(at(10)).await.unwrap(), Decision::Idle);
        assert_eq!(primary.phase(), Phase::Waiting);
        assert_eq!(primary.evaluate(at(40)).await.unwrap(), Decision::Idle);

        store.mark_synced(effect.id, at(50)).await.unwrap();
        assert_eq!(primary.evaluate(at(70)).await.unwrap(), Decision::Resume);
        assert_eq!(primary.phase(), Phase::Active);
    }

    #[tokio::test]
    async fn test_primary_wait_gives_up_after_grace() {
        let store = Arc::new(MemoryStore::new());
        let mut backup = coordinator(Role::Backup, &store, ResumePolicy::Wait);
        let mut primary = coordinator(Role::Primary, &store, ResumePolicy::Wait);

        backup.evaluate(at(0)).await.unwrap();
        journal_backup_effect(&store).await;
        assert_eq!(primary.evaluate(at(10)).await.unwrap(), Decision::Idle);

        // Keep the backup's heartbeat fresh so only the grace period can end the wait
        backup.cycle_completed();
        backup.evaluate(at(600)).await.unwrap();
        assert_eq!(primary.evaluate(at(610)).await.unwrap(), Decision::Resume);
    }

    #[tokio::test]
    async fn test_primary_reconcile_policy() {
        let store = Arc::new(MemoryStore::new());
        let mut backup = coordinator(Role::Backup, &store, ResumePolicy::Wait);
        let mut primary = coordinator(Role::Primary, &store, ResumePolicy::Reconcile);

        backup.evaluate(at(0)).await.unwrap();
        journal_backup_effect(&store).await;

        assert_eq!(primary.evaluate(at(10)).await.unwrap(), Decision::Reconcile);
        assert_eq!(primary.after_reconcile(1, at(11)).await.unwrap(), Decision::Idle);
        assert_eq!(primary.evaluate(at(40)).await.unwrap(), Decision::Reconcile);
        assert_eq!(primary.after_reconcile(0, at(41)).await.unwrap(), Decision::Resume);
        assert_eq!(primary.evaluate(at(70)).await.unwrap(), Decision::Serve { journal: false });
    }
}
