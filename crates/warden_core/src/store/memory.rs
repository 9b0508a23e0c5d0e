//! In-process store used by tests and single-host dry runs.

use super::{
    AccountStore, CursorStore, EffectId, EffectQueue, Infraction, InfractionLog, InstanceStatus,
    LogCursor, QueueStats, QueuedEffect, Role, StatusStore,
};
use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct Inner {
    cursors: HashMap<String, LogCursor>,
    statuses: HashMap<String, InstanceStatus>,
    effects: Vec<QueuedEffect>,
    balances: HashMap<String, i64>,
    ledger: HashMap<String, i64>,
    links: HashMap<String, String>,
    bounties: HashMap<String, i64>,
    claims: HashMap<String, i64>,
    daily: HashMap<String, DateTime<Utc>>,
    infractions: Vec<Infraction>,
}

/// Everything in one lock. The account side can be switched offline to
/// exercise the deferred-durability path.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
    accounts_offline: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every [`AccountStore`] call fail until switched back.
    pub fn set_accounts_offline(&self, offline: bool) {
        self.accounts_offline.store(offline, Ordering::Release);
    }

    pub async fn link_account(&self, player: &str, account: &str) {
        self.inner
            .write()
            .await
            .links
            .insert(player.to_lowercase(), account.to_string());
    }

    pub async fn set_balance(&self, account: &str, balance: i64) {
        self.inner
            .write()
            .await
            .balances
            .insert(account.to_string(), balance);
    }

    pub async fn place_bounty(&self, victim: &str, amount: i64) {
        *self
            .inner
            .write()
            .await
            .bounties
            .entry(victim.to_lowercase())
            .or_insert(0) += amount;
    }

    pub async fn bounty(&self, victim: &str) -> i64 {
        self.inner
            .read()
            .await
            .bounties
            .get(&victim.to_lowercase())
            .copied()
            .unwrap_or(0)
    }

    pub async fn all_effects(&self) -> Vec<QueuedEffect> {
        self.inner.read().await.effects.clone()
    }

    pub async fn ledger_entries(&self) -> usize {
        self.inner.read().await.ledger.len()
    }

    fn check_accounts(&self) -> Result<(), StoreError> {
        if self.accounts_offline.load(Ordering::Acquire) {
            Err(StoreError::Unavailable("account store offline".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CursorStore for MemoryStore {
    async fn load_cursor(&self, source_id: &str) -> Result<Option<LogCursor>, StoreError> {
        Ok(self.inner.read().await.cursors.get(source_id).cloned())
    }

    async fn save_cursor(&self, cursor: &LogCursor) -> Result<(), StoreError> {
        self.inner
            .write()
            .await
            .cursors
            .insert(cursor.source_id.clone(), cursor.clone());
        Ok(())
    }
}

#[async_trait]
impl StatusStore for MemoryStore {
    async fn write_status(&self, status: &InstanceStatus) -> Result<(), StoreError> {
        self.inner
            .write()
            .await
            .statuses
            .insert(status.instance_name.clone(), status.clone());
        Ok(())
    }

    async fn read_status(&self, instance_name: &str) -> Result<Option<InstanceStatus>, StoreError> {
        Ok(self.inner.read().await.statuses.get(instance_name).cloned())
    }
}

#[async_trait]
impl EffectQueue for MemoryStore {
    async fn enqueue(&self, effect: &QueuedEffect) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let duplicate = inner.effects.iter().any(|queued| {
            !queued.synced
                && queued.dedup_key == effect.dedup_key
                && queued.produced_by == effect.produced_by
        });
        if !duplicate {
            inner.effects.push(effect.clone());
        }
        Ok(())
    }

    async fn pending(
        &self,
        produced_by: Option<Role>,
        limit: usize,
    ) -> Result<Vec<QueuedEffect>, StoreError> {
        let inner = self.inner.read().await;
        let mut pending: Vec<QueuedEffect> = inner
            .effects
            .iter()
            .filter(|effect| !effect.synced)
            .filter(|effect| produced_by.map_or(true, |role| effect.produced_by == role))
            .cloned()
            .collect();
        pending.sort_by_key(|effect| effect.produced_at);
        pending.truncate(limit);
        Ok(pending)
    }

    async fn count_pending(&self, produced_by: Option<Role>) -> Result<u64, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .effects
            .iter()
            .filter(|effect| !effect.synced)
            .filter(|effect| produced_by.map_or(true, |role| effect.produced_by == role))
            .count() as u64)
    }

    async fn mark_synced(&self, id: EffectId, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if let Some(effect) = inner.effects.iter_mut().find(|effect| effect.id == id) {
            effect.synced = true;
            effect.synced_at = Some(at);
        }
        Ok(())
    }

    async fn record_failure(&self, id: EffectId, error: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if let Some(effect) = inner.effects.iter_mut().find(|effect| effect.id == id) {
            effect.attempts += 1;
            effect.last_error = Some(error.to_string());
        }
        Ok(())
    }

    async fn purge_synced_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut inner = self.inner.write().await;
        let before = inner.effects.len();
        inner
            .effects
            .retain(|effect| !(effect.synced && effect.produced_at < cutoff));
        Ok((before - inner.effects.len()) as u64)
    }

    async fn stats(&self, attempt_warning: u32) -> Result<QueueStats, StoreError> {
        let inner = self.inner.read().await;
        let mut stats = QueueStats {
            total: inner.effects.len() as u64,
            ..QueueStats::default()
        };
        for effect in &inner.effects {
            if effect.synced {
                stats.synced += 1;
                continue;
            }
            stats.pending += 1;
            match effect.produced_by {
                Role::Primary => stats.pending_primary += 1,
                Role::Backup => stats.pending_backup += 1,
            }
            if effect.attempts > attempt_warning {
                stats.over_attempts += 1;
            }
        }
        Ok(stats)
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn resolve_account(&self, player: &str) -> Result<Option<String>, StoreError> {
        self.check_accounts()?;
        Ok(self.inner.read().await.links.get(&player.to_lowercase()).cloned())
    }

    async fn get_balance(&self, account: &str) -> Result<i64, StoreError> {
        self.check_accounts()?;
        Ok(self.inner.read().await.balances.get(account).copied().unwrap_or(0))
    }

    async fn apply_delta(
        &self,
        account: &str,
        amount: i64,
        _reason: &str,
        dedup_key: &str,
    ) -> Result<i64, StoreError> {
        self.check_accounts()?;
        let mut inner = self.inner.write().await;
        let current = inner.balances.get(account).copied().unwrap_or(0);
        if inner.ledger.contains_key(dedup_key) {
            return Ok(current);
        }

        let updated = (current + amount).max(0);
        inner.ledger.insert(dedup_key.to_string(), amount);
        inner.balances.insert(account.to_string(), updated);
        Ok(updated)
    }

    async fn claim_bounty(&self, victim: &str, claim_key: &str) -> Result<i64, StoreError> {
        self.check_accounts()?;
        let mut inner = self.inner.write().await;
        if let Some(amount) = inner.claims.get(claim_key) {
            return Ok(*amount);
        }

        let amount = inner.bounties.remove(&victim.to_lowercase()).unwrap_or(0);
        inner.claims.insert(claim_key.to_string(), amount);
        Ok(amount)
    }

    async fn last_daily(&self, account: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        self.check_accounts()?;
        Ok(self.inner.read().await.daily.get(account).copied())
    }

    async fn record_daily(&self, account: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.check_accounts()?;
        self.inner.write().await.daily.insert(account.to_string(), at);
        Ok(())
    }
}

#[async_trait]
impl InfractionLog for MemoryStore {
    async fn record_infraction(&self, infraction: &Infraction) -> Result<(), StoreError> {
        self.inner.write().await.infractions.push(infraction.clone());
        Ok(())
    }

    async fn infractions_for(&self, player: &str) -> Result<Vec<Infraction>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .infractions
            .iter()
            .filter(|infraction| infraction.player.eq_ignore_ascii_case(player))
            .cloned()
            .collect())
    }
}
