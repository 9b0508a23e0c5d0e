//! Per-batch processing: parse, classify, reward.

use crate::config::WardenSettings;
use crate::enforcement::{deliver, Enforcer, ModerationAction};
use crate::error::WardenError;
use crate::events::{Event, ParsedEvent};
use crate::geo::{LocationTable, TerritoryIndex};
use crate::hotzone::HotzoneTracker;
use crate::parser::parse_batch;
use crate::rewards::RewardDispatcher;
use crate::security::AntiCheatEngine;
use crate::store::{Infraction, InfractionLog};
use crate::tail::Batch;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, warn};

/// Counters for one processed batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub lines: usize,
    pub events: usize,
    /// Events already handled by an earlier delivery of the same lines
    pub skipped: usize,
    pub actions: usize,
    pub effects: usize,
}

/// Owns every stateful consumer of parsed events.
pub struct Pipeline {
    engine: AntiCheatEngine,
    hotzone: HotzoneTracker,
    dispatcher: RewardDispatcher,
    index: TerritoryIndex,
    locations: LocationTable,
    enforcer: Arc<dyn Enforcer>,
    infractions: Arc<dyn InfractionLog>,
    /// Last line seen by the rule engine and the hotzone tracker
    rules_mark: Option<(String, u64)>,
    /// Last line whose effects were all handed to the dispatcher
    effects_mark: Option<(String, u64)>,
}

impl Pipeline {
    pub fn new(
        settings: &WardenSettings,
        dispatcher: RewardDispatcher,
        index: TerritoryIndex,
        enforcer: Arc<dyn Enforcer>,
        infractions: Arc<dyn InfractionLog>,
    ) -> Self {
        Self {
            engine: AntiCheatEngine::new(settings.rules.clone()),
            hotzone: HotzoneTracker::new(settings.hotzone.clone()),
            dispatcher,
            index,
            locations: LocationTable::new(settings.geo.locations.clone(), settings.geo.urban_radius),
            enforcer,
            infractions,
            rules_mark: None,
            effects_mark: None,
        }
    }

    pub fn dispatcher(&self) -> &RewardDispatcher {
        &self.dispatcher
    }

    pub fn dispatcher_mut(&mut self) -> &mut RewardDispatcher {
        &mut self.dispatcher
    }

    pub fn index(&self) -> &TerritoryIndex {
        &self.index
    }

    pub fn set_index(&mut self, index: TerritoryIndex) {
        self.index = index;
    }

    pub fn update_settings(&mut self, settings: &WardenSettings) {
        self.engine.update_rules(settings.rules.clone());
        self.hotzone.update_settings(settings.hotzone.clone());
        self.dispatcher.update_settings(settings.rewards.clone());
        self.locations = LocationTable::new(settings.geo.locations.clone(), settings.geo.urban_radius);
    }

    /// Runs every consumer over the batch in line order.
    ///
    /// Rules and effects keep separate marks. When a dispatch fails the batch
    /// is redelivered, and lines the rule engine already saw are not fed to
    /// it again, so windows and hotzone counts stay exact.
    pub async fn process(
        &mut self,
        batch: &Batch,
        observed_at: DateTime<Utc>,
        journal: bool,
    ) -> Result<CycleReport, WardenError> {
        if batch.rotated {
            self.rules_mark = None;
            self.effects_mark = None;
        }

        let mut report = CycleReport {
            lines: batch.lines.len(),
            ..CycleReport::default()
        };

        for parsed in parse_batch(&batch.lines, observed_at) {
            report.events += 1;
            let (path, offset) = (&parsed.origin.path, parsed.origin.offset);
            let rules_done = is_past(&self.rules_mark, path, offset);
            let effects_done = is_past(&self.effects_mark, path, offset);
            if rules_done && effects_done {
                report.skipped += 1;
                continue;
            }

            if !rules_done {
                report.actions += self.apply_rules(&parsed).await;
                self.rules_mark = Some((path.clone(), offset));
            }

            if !effects_done {
                for effect in self.dispatcher.effects_for(&parsed) {
                    self.dispatcher.dispatch(effect, journal).await?;
                    report.effects += 1;
                }
                self.effects_mark = Some((path.clone(), offset));
            }
        }

        if let Some(last) = batch.lines.last() {
            let mark = Some((last.path.clone(), last.offset));
            if !is_past(&self.rules_mark, &last.path, last.offset) {
                self.rules_mark = mark.clone();
            }
            if !is_past(&self.effects_mark, &last.path, last.offset) {
                self.effects_mark = mark;
            }
        }

        if report.skipped > 0 {
            debug!("Skipped {} events handled by an earlier delivery", report.skipped);
        }
        Ok(report)
    }

    /// Rule engine and hotzone tracker for one event. Returns how many
    /// actions were delivered.
    async fn apply_rules(&mut self, parsed: &ParsedEvent) -> usize {
        let mut delivered = 0;
        for action in self.engine.evaluate(parsed, &self.index, &self.locations) {
            if let ModerationAction::Ban { identity, reason, violation } = &action {
                let infraction = Infraction {
                    player: identity.clone(),
                    kind: violation.kind().to_string(),
                    severity: violation.severity(),
                    description: reason.clone(),
                    evidence: format!(
                        "{}:{} {}",
                        parsed.origin.path, parsed.origin.offset, parsed.origin.text
                    ),
                    detected_at: parsed.occurred_at,
                };
                if let Err(e) = self.infractions.record_infraction(&infraction).await {
                    warn!("⚠️ Failed to record infraction for {}: {}", identity, e);
                }
            }
            deliver(self.enforcer.as_ref(), &action).await;
            delivered += 1;
        }

        if let Event::Kill { position: Some(pos), .. } = &parsed.event {
            if let Some(alert) = self.hotzone.record_kill(*pos, parsed.occurred_at, &self.locations) {
                deliver(self.enforcer.as_ref(), &alert).await;
                delivered += 1;
            }
        }
        delivered
    }

    /// Drops expired rule windows and stale sessions.
    pub fn maintain(&mut self, now: DateTime<Utc>) -> usize {
        self.engine.cleanup(now);
        self.dispatcher.evict_sessions(now)
    }
}

fn is_past(mark: &Option<(String, u64)>, path: &str, offset: u64) -> bool {
    mark.as_ref()
        .is_some_and(|(seen_path, seen_offset)| seen_path == path && offset <= *seen_offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enforcement::RecordingEnforcer;
    use crate::events::LogLine;
    use crate::geo::Registry;
    use crate::error::StoreError;
    use crate::security::Severity;
    use crate::store::{
        AccountStore, EffectId, EffectQueue, InfractionLog, LogCursor, MemoryStore, QueueStats,
        QueuedEffect, Role,
    };
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const KILL: &str = r#"12:00:00 | Player "Prey" (id=1) killed by Player "Hunter" (id=2) with SKS from 80 meters <6500.0, 10.0, 2500.0>"#;

    fn observed() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 11, 24, 12, 5, 0).unwrap()
    }

    fn batch(lines: Vec<LogLine>, rotated: bool) -> Batch {
        Batch {
            lines,
            cursor: LogCursor::empty("primary", observed()),
            rotated,
        }
    }

    async fn setup() -> (Arc<MemoryStore>, Arc<RecordingEnforcer>, Pipeline) {
        let store = Arc::new(MemoryStore::new());
        store.link_account("Hunter", "acc-hunter").await;
        let enforcer = Arc::new(RecordingEnforcer::new());
        let settings = WardenSettings::default();
        let dispatcher = RewardDispatcher::new(
            Role::Primary,
            settings.rewards.clone(),
            store.clone(),
            store.clone(),
        );
        let pipeline = Pipeline::new(
            &settings,
            dispatcher,
            TerritoryIndex::new(Registry::default()),
            enforcer.clone(),
            store.clone(),
        );
        (store, enforcer, pipeline)
    }

    /// Rejects the first `failures` enqueues, then behaves like the store.
    struct FlakyQueue {
        store: Arc<MemoryStore>,
        failures: AtomicUsize,
    }

    #[async_trait]
    impl EffectQueue for FlakyQueue {
        async fn enqueue(&self, effect: &QueuedEffect) -> Result<(), StoreError> {
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err(StoreError::Unavailable("queue disk full".to_string()));
            }
            self.store.enqueue(effect).await
        }

        async fn pending(&self, produced_by: Option<Role>, limit: usize) -> Result<Vec<QueuedEffect>, StoreError> {
            self.store.pending(produced_by, limit).await
        }

        async fn count_pending(&self, produced_by: Option<Role>) -> Result<u64, StoreError> {
            self.store.count_pending(produced_by).await
        }

        async fn mark_synced(&self, id: EffectId, at: DateTime<Utc>) -> Result<(), StoreError> {
            self.store.mark_synced(id, at).await
        }

        async fn record_failure(&self, id: EffectId, error: &str) -> Result<(), StoreError> {
            self.store.record_failure(id, error).await
        }

        async fn purge_synced_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
            self.store.purge_synced_before(cutoff).await
        }

        async fn stats(&self, attempt_warning: u32) -> Result<QueueStats, StoreError> {
            self.store.stats(attempt_warning).await
        }
    }

    #[tokio::test]
    async fn test_redelivered_batch_is_skipped() {
        let (store, enforcer, mut pipeline) = setup().await;
        let lines: Vec<LogLine> = (0..3)
            .map(|i| LogLine::new("logs/a.ADM", i * 200, KILL))
            .collect();

        let report = pipeline.process(&batch(lines.clone(), false), observed(), false).await.unwrap();
        assert_eq!(report.effects, 3);
        assert_eq!(enforcer.alerts().await.len(), 1);

        let report = pipeline.process(&batch(lines, false), observed(), false).await.unwrap();
        assert_eq!(report.skipped, 3);
        assert_eq!(report.effects, 0);
        assert_eq!(enforcer.alerts().await.len(), 1);
        assert_eq!(store.get_balance("acc-hunter").await.unwrap(), 150);
    }

    #[tokio::test]
    async fn test_rotation_resets_marks() {
        let (store, _enforcer, mut pipeline) = setup().await;
        pipeline
            .process(&batch(vec![LogLine::new("logs/a.ADM", 0, KILL)], false), observed(), false)
            .await
            .unwrap();
        // Same name, truncated and rewritten
        let report = pipeline
            .process(&batch(vec![LogLine::new("logs/a.ADM", 0, KILL)], true), observed(), false)
            .await
            .unwrap();
        assert_eq!(report.skipped, 0);
        // The dedup key is the same line identity, so no second payment
        assert_eq!(store.get_balance("acc-hunter").await.unwrap(), 50);
    }

    #[tokio::test]
    async fn test_violations_reach_the_enforcer() {
        let (_store, enforcer, mut pipeline) = setup().await;
        let line = LogLine::new(
            "logs/a.ADM",
            0,
            r#"20:00:00 | Player "Glitcher" (id=1) placed "GardenPlot" at <1000, 100, 1000>"#,
        );
        let report = pipeline.process(&batch(vec![line], false), observed(), false).await.unwrap();
        assert_eq!(report.actions, 2);
        let bans = enforcer.bans().await;
        assert_eq!(bans.len(), 1);
        assert_eq!(bans[0].0, "Glitcher");
    }

    #[tokio::test]
    async fn test_failed_dispatch_does_not_rerun_rules() {
        let store = Arc::new(MemoryStore::new());
        store.link_account("Hunter", "acc-hunter").await;
        store.set_accounts_offline(true);
        let queue = Arc::new(FlakyQueue {
            store: store.clone(),
            failures: AtomicUsize::new(1),
        });
        let enforcer = Arc::new(RecordingEnforcer::new());
        let settings = WardenSettings::default();
        let dispatcher = RewardDispatcher::new(Role::Primary, settings.rewards.clone(), store.clone(), queue);
        let mut pipeline = Pipeline::new(
            &settings,
            dispatcher,
            TerritoryIndex::new(Registry::default()),
            enforcer.clone(),
            store.clone(),
        );

        let lines: Vec<LogLine> = (0..3)
            .map(|i| LogLine::new("logs/a.ADM", i * 200, KILL))
            .collect();
        assert!(pipeline.process(&batch(lines.clone(), false), observed(), false).await.is_err());
        assert_eq!(pipeline.hotzone.tracked_kills(), 1);

        let report = pipeline.process(&batch(lines, false), observed(), false).await.unwrap();
        assert_eq!(report.effects, 3);
        assert_eq!(pipeline.hotzone.tracked_kills(), 3);
        assert_eq!(enforcer.alerts().await.len(), 1);
        assert_eq!(store.count_pending(None).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_violations_are_recorded_as_infractions() {
        let (store, _enforcer, mut pipeline) = setup().await;
        let line = LogLine::new(
            "logs/a.ADM",
            40,
            r#"20:00:00 | Player "Glitcher" (id=1) placed "GardenPlot" at <1000, 100, 1000>"#,
        );
        pipeline.process(&batch(vec![line], false), observed(), false).await.unwrap();

        let recorded = store.infractions_for("glitcher").await.unwrap();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].kind, "banned_type");
        assert_eq!(recorded[0].severity, Severity::Serious);
        assert!(recorded[0].evidence.starts_with("logs/a.ADM:40 "));
        assert!(recorded[0].evidence.contains("GardenPlot"));
    }
}
