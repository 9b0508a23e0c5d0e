//! Economy rewards with a durable local fallback.
//!
//! Every mutation is first tried against the account store. When that fails
//! the effect is queued and replayed by the reconciliation pass. A backup
//! instance journals everything it does, applied or not, so the primary's
//! return can be reconciled effect by effect.

pub mod sessions;

pub use sessions::{Session, SessionTable};

use crate::config::RewardSettings;
use crate::error::{StoreError, WardenError};
use crate::events::{Event, ParsedEvent};
use crate::health::{CircuitBreaker, CircuitBreakerConfig};
use crate::store::{AccountStore, EffectPayload, EffectQueue, QueuedEffect, Role};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What happened when an effect reached the account store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied { account: String, balance: i64 },
    /// The player has no linked account
    NoAccount,
    /// A daily bonus already paid inside its window
    AlreadyPaid,
}

/// Result of one replay pass over the queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayReport {
    pub replayed: usize,
    pub failed: usize,
    pub remaining: u64,
}

/// Salary for a finished session, zero when it was too short.
pub fn session_salary(settings: &RewardSettings, duration: Duration) -> i64 {
    let secs = duration.num_seconds();
    if secs <= settings.min_session_secs {
        return 0;
    }

    let hours = secs as f64 / 3600.0;
    let mut salary = (hours * settings.hourly_rate as f64).floor() as i64;
    if duration >= Duration::hours(settings.long_session_hours) {
        salary += settings.long_session_bonus;
    }
    salary
}

pub struct RewardDispatcher {
    role: Role,
    settings: RewardSettings,
    sessions: SessionTable,
    accounts: Arc<dyn AccountStore>,
    effects: Arc<dyn EffectQueue>,
    breaker: CircuitBreaker,
}

impl RewardDispatcher {
    pub fn new(
        role: Role,
        settings: RewardSettings,
        accounts: Arc<dyn AccountStore>,
        effects: Arc<dyn EffectQueue>,
    ) -> Self {
        Self::with_breaker(role, settings, accounts, effects, CircuitBreakerConfig::default())
    }

    pub fn with_breaker(
        role: Role,
        settings: RewardSettings,
        accounts: Arc<dyn AccountStore>,
        effects: Arc<dyn EffectQueue>,
        breaker: CircuitBreakerConfig,
    ) -> Self {
        Self {
            role,
            settings,
            sessions: SessionTable::new(),
            accounts,
            effects,
            breaker: CircuitBreaker::new("account-store", breaker),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn update_settings(&mut self, settings: RewardSettings) {
        self.settings = settings;
    }

    /// Replaces the account store circuit breaker, resetting its state.
    pub fn set_breaker(&mut self, config: CircuitBreakerConfig) {
        self.breaker = CircuitBreaker::new("account-store", config);
    }

    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    /// Turns an event into the effects it earns. Updates the session table.
    pub fn effects_for(&mut self, parsed: &ParsedEvent) -> Vec<QueuedEffect> {
        let at = parsed.occurred_at;
        let payload = match &parsed.event {
            Event::Kill { killer, victim, .. } => Some(EffectPayload::KillReward {
                killer: killer.clone(),
                victim: victim.clone(),
                base: self.settings.kill_reward,
            }),
            Event::Login { player } => {
                if self.sessions.login(player, at).is_some() {
                    debug!("{player} logged in again without a logout, session restarted");
                }
                Some(EffectPayload::DailyBonus {
                    player: player.clone(),
                    amount: self.settings.daily_bonus,
                    window_hours: self.settings.daily_window_hours,
                })
            }
            Event::Logout { player } => self.sessions.logout(player, at).and_then(|duration| {
                let salary = session_salary(&self.settings, duration);
                (salary > 0).then(|| EffectPayload::Credit {
                    player: player.clone(),
                    amount: salary,
                    reason: format!(
                        "session salary ({}h {}m)",
                        duration.num_hours(),
                        duration.num_minutes() % 60
                    ),
                })
            }),
            _ => None,
        };

        payload
            .map(|payload| {
                QueuedEffect::new(parsed.dedup_key(payload.kind()), payload, self.role, at)
            })
            .into_iter()
            .collect()
    }

    /// Applies an effect, journaling it when `journal` is set and queueing
    /// it when the store rejects it. Fails only when the effect could be
    /// neither applied nor queued.
    pub async fn dispatch(&self, effect: QueuedEffect, journal: bool) -> Result<(), WardenError> {
        let queued = if journal {
            Some(self.effects.enqueue(&effect).await)
        } else {
            None
        };

        let applied = self.apply_effect(&effect).await;
        match (applied, queued) {
            (Ok(outcome), queued) => {
                self.log_outcome(&effect, &outcome);
                if let Some(Err(err)) = queued {
                    warn!("⚠️ Applied {} but could not journal it: {}", effect.dedup_key, err);
                }
                Ok(())
            }
            (Err(err), Some(Ok(()))) => {
                debug!("Journaled {} for replay after: {}", effect.dedup_key, err);
                Ok(())
            }
            (Err(apply_err), Some(Err(queue_err))) => {
                Err(WardenError::Internal(format!(
                    "effect {} neither applied ({apply_err}) nor journaled ({queue_err})",
                    effect.dedup_key
                )))
            }
            (Err(err), None) => {
                warn!("💾 Account store rejected {}: {}; queued for replay", effect.dedup_key, err);
                self.effects.enqueue(&effect).await?;
                Ok(())
            }
        }
    }

    /// Applies one effect through the circuit breaker.
    pub async fn apply_effect(&self, effect: &QueuedEffect) -> Result<ApplyOutcome, StoreError> {
        if !self.breaker.can_execute().await {
            return Err(StoreError::CircuitOpen(self.breaker.name().to_string()));
        }

        let result = self.apply_unguarded(effect).await;
        match result {
            Ok(_) => self.breaker.record_success().await,
            Err(_) => self.breaker.record_failure().await,
        }
        result
    }

    async fn apply_unguarded(&self, effect: &QueuedEffect) -> Result<ApplyOutcome, StoreError> {
        let player = effect.payload.player();
        let Some(account) = self.accounts.resolve_account(player).await? else {
            debug!("No linked account for {player}, skipping {}", effect.payload.kind());
            return Ok(ApplyOutcome::NoAccount);
        };

        let balance = match &effect.payload {
            EffectPayload::Credit { amount, reason, .. } => {
                self.accounts
                    .apply_delta(&account, *amount, reason, &effect.dedup_key)
                    .await?
            }
            EffectPayload::KillReward { victim, base, .. } => {
                let bounty = self.accounts.claim_bounty(victim, &effect.dedup_key).await?;
                let reason = if bounty > 0 {
                    format!("kill reward: {victim} (+{bounty} bounty)")
                } else {
                    format!("kill reward: {victim}")
                };
                self.accounts
                    .apply_delta(&account, base + bounty, &reason, &effect.dedup_key)
                    .await?
            }
            EffectPayload::DailyBonus {
                amount,
                window_hours,
                ..
            } => {
                let last = self.accounts.last_daily(&account).await?;
                let paid_recently = last.is_some_and(|last| {
                    effect.produced_at.signed_duration_since(last) < Duration::hours(*window_hours)
                });
                if paid_recently {
                    return Ok(ApplyOutcome::AlreadyPaid);
                }
                let balance = self
                    .accounts
                    .apply_delta(&account, *amount, "daily login bonus", &effect.dedup_key)
                    .await?;
                self.accounts.record_daily(&account, effect.produced_at).await?;
                balance
            }
        };

        Ok(ApplyOutcome::Applied { account, balance })
    }

    /// Replays unsynced effects, oldest first. Stops early while the
    /// circuit is open.
    pub async fn replay_pending(
        &self,
        produced_by: Option<Role>,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<ReplayReport, StoreError> {
        let mut report = ReplayReport::default();

        for effect in self.effects.pending(produced_by, limit).await? {
            match self.apply_effect(&effect).await {
                Ok(outcome) => {
                    self.log_outcome(&effect, &outcome);
                    self.effects.mark_synced(effect.id, now).await?;
                    report.replayed += 1;
                }
                Err(StoreError::CircuitOpen(name)) => {
                    debug!("Circuit '{name}' open, replay postponed");
                    break;
                }
                Err(err) => {
                    self.effects.record_failure(effect.id, &err.to_string()).await?;
                    report.failed += 1;
                }
            }
        }

        report.remaining = self.effects.count_pending(produced_by).await?;
        if report.replayed > 0 || report.failed > 0 {
            info!(
                "🔁 Replayed {} queued effects ({} failed, {} remaining)",
                report.replayed, report.failed, report.remaining
            );
        }
        Ok(report)
    }

    /// Forgets sessions that never saw a logout.
    pub fn evict_sessions(&mut self, now: DateTime<Utc>) -> usize {
        self.sessions
            .evict(now, Duration::hours(self.settings.max_session_hours))
    }

    fn log_outcome(&self, effect: &QueuedEffect, outcome: &ApplyOutcome) {
        match outcome {
            ApplyOutcome::Applied { account, balance } => debug!(
                "💰 {} applied to {account}, balance {balance}",
                effect.dedup_key
            ),
            ApplyOutcome::NoAccount => {}
            ApplyOutcome::AlreadyPaid => debug!(
                "{} already received the daily bonus",
                effect.payload.player()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::LogLine;
    use crate::store::MemoryStore;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 11, 24, 12, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn parsed(event: Event, offset: u64, secs: i64) -> ParsedEvent {
        ParsedEvent {
            origin: LogLine::new("logs/a.ADM", offset, ""),
            occurred_at: at(secs),
            event,
        }
    }

    fn kill(offset: u64) -> ParsedEvent {
        parsed(
            Event::Kill {
                killer: "Hunter".to_string(),
                victim: "Prey".to_string(),
                weapon: "SKS".to_string(),
                distance: 80.0,
                position: None,
            },
            offset,
            0,
        )
    }

    fn quick_breaker() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 3,
            open_duration: std::time::Duration::ZERO,
            success_threshold: 1,
        }
    }

    async fn setup(role: Role) -> (Arc<MemoryStore>, RewardDispatcher) {
        let store = Arc::new(MemoryStore::new());
        store.link_account("Hunter", "acc-hunter").await;
        store.set_balance("acc-hunter", 100).await;
        let dispatcher = RewardDispatcher::with_breaker(
            role,
            RewardSettings::default(),
            store.clone(),
            store.clone(),
            quick_breaker(),
        );
        (store, dispatcher)
    }

    async fn run(dispatcher: &mut RewardDispatcher, event: &ParsedEvent, journal: bool) {
        for effect in dispatcher.effects_for(event) {
            dispatcher.dispatch(effect, journal).await.unwrap();
        }
    }

    #[test]
    fn test_session_salary() {
        let settings = RewardSettings::default();
        assert_eq!(session_salary(&settings, Duration::seconds(600)), 0);
        assert_eq!(session_salary(&settings, Duration::seconds(601)), 166);
        assert_eq!(session_salary(&settings, Duration::minutes(90)), 1500);
        assert_eq!(session_salary(&settings, Duration::hours(10)), 10_000 + 5000);
    }

    #[tokio::test]
    async fn test_kill_reward_without_bounty() {
        let (store, mut dispatcher) = setup(Role::Primary).await;
        run(&mut dispatcher, &kill(10), false).await;
        assert_eq!(store.get_balance("acc-hunter").await.unwrap(), 150);
    }

    #[tokio::test]
    async fn test_kill_reward_claims_bounty() {
        let (store, mut dispatcher) = setup(Role::Primary).await;
        store.place_bounty("prey", 200).await;
        run(&mut dispatcher, &kill(10), false).await;
        assert_eq!(store.get_balance("acc-hunter").await.unwrap(), 350);
        assert_eq!(store.bounty("Prey").await, 0);
    }

    #[tokio::test]
    async fn test_same_line_never_pays_twice() {
        let (store, mut dispatcher) = setup(Role::Primary).await;
        run(&mut dispatcher, &kill(10), false).await;
        run(&mut dispatcher, &kill(10), false).await;
        assert_eq!(store.get_balance("acc-hunter").await.unwrap(), 150);
    }

    #[tokio::test]
    async fn test_unlinked_player_earns_nothing() {
        let (store, mut dispatcher) = setup(Role::Primary).await;
        let event = parsed(
            Event::Kill {
                killer: "Ghost".to_string(),
                victim: "Prey".to_string(),
                weapon: "SKS".to_string(),
                distance: 1.0,
                position: None,
            },
            20,
            0,
        );
        run(&mut dispatcher, &event, false).await;
        assert_eq!(store.ledger_entries().await, 0);
        assert_eq!(store.count_pending(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_daily_bonus_once_per_window() {
        let (store, mut dispatcher) = setup(Role::Primary).await;
        let login = |offset, secs| parsed(Event::Login { player: "Hunter".to_string() }, offset, secs);

        run(&mut dispatcher, &login(1, 0), false).await;
        run(&mut dispatcher, &login(2, 3600), false).await;
        assert_eq!(store.get_balance("acc-hunter").await.unwrap(), 600);

        run(&mut dispatcher, &login(3, 25 * 3600), false).await;
        assert_eq!(store.get_balance("acc-hunter").await.unwrap(), 1100);
    }

    #[tokio::test]
    async fn test_logout_pays_salary() {
        let (store, mut dispatcher) = setup(Role::Primary).await;
        store.set_balance("acc-hunter", 0).await;
        store.record_daily("acc-hunter", at(0)).await.unwrap();

        run(&mut dispatcher, &parsed(Event::Login { player: "Hunter".to_string() }, 1, 0), false).await;
        run(&mut dispatcher, &parsed(Event::Logout { player: "hunter".to_string() }, 2, 7200), false).await;
        assert_eq!(store.get_balance("acc-hunter").await.unwrap(), 2000);
    }

    #[tokio::test]
    async fn test_offline_store_queues_then_replays() {
        let (store, mut dispatcher) = setup(Role::Primary).await;
        store.set_accounts_offline(true);
        run(&mut dispatcher, &kill(10), false).await;
        run(&mut dispatcher, &kill(20), false).await;
        assert_eq!(store.count_pending(Some(Role::Primary)).await.unwrap(), 2);

        let report = dispatcher.replay_pending(None, 100, at(60)).await.unwrap();
        assert_eq!(report.failed, 2);
        assert_eq!(report.remaining, 2);

        store.set_accounts_offline(false);
        let report = dispatcher.replay_pending(None, 100, at(120)).await.unwrap();
        assert_eq!(report, ReplayReport { replayed: 2, failed: 0, remaining: 0 });
        assert_eq!(store.get_balance("acc-hunter").await.unwrap(), 200);

        let effects = store.all_effects().await;
        assert!(effects.iter().all(|effect| effect.synced && effect.attempts == 1));
    }

    #[tokio::test]
    async fn test_backup_journals_applied_effects() {
        let (store, mut dispatcher) = setup(Role::Backup).await;
        run(&mut dispatcher, &kill(10), true).await;

        assert_eq!(store.get_balance("acc-hunter").await.unwrap(), 150);
        assert_eq!(store.count_pending(Some(Role::Backup)).await.unwrap(), 1);

        // Reconciliation confirms the journal without paying again
        let report = dispatcher
            .replay_pending(Some(Role::Backup), 100, at(60))
            .await
            .unwrap();
        assert_eq!(report.replayed, 1);
        assert_eq!(report.remaining, 0);
        assert_eq!(store.get_balance("acc-hunter").await.unwrap(), 150);
    }

    #[tokio::test]
    async fn test_open_circuit_stops_replay() {
        let store = Arc::new(MemoryStore::new());
        let dispatcher = RewardDispatcher::new(
            Role::Primary,
            RewardSettings::default(),
            store.clone(),
            store.clone(),
        );
        store.set_accounts_offline(true);
        for offset in 0..5 {
            let effect = QueuedEffect::new(
                format!("credit:logs/a.ADM:{offset}"),
                EffectPayload::Credit {
                    player: "Hunter".to_string(),
                    amount: 1,
                    reason: "test".to_string(),
                },
                Role::Primary,
                at(offset),
            );
            store.enqueue(&effect).await.unwrap();
        }

        let report = dispatcher.replay_pending(None, 100, at(60)).await.unwrap();
        assert_eq!(report.failed, 3);
        assert_eq!(report.remaining, 5);
    }
}
