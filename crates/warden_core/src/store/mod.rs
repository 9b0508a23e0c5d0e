//! Durable store seams.
//!
//! Instances never talk to each other directly; everything they share goes
//! through these traits. The in-memory implementation backs the tests, the
//! `warden_store` crate provides the SQLite one used in production.

pub mod memory;
pub mod types;

pub use memory::MemoryStore;
pub use types::{
    EffectId, EffectPayload, Infraction, InstanceState, InstanceStatus, LogCursor, QueueStats,
    QueuedEffect, Role,
};

use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Persists tailing progress per instance.
#[async_trait]
pub trait CursorStore: Send + Sync {
    async fn load_cursor(&self, source_id: &str) -> Result<Option<LogCursor>, StoreError>;
    async fn save_cursor(&self, cursor: &LogCursor) -> Result<(), StoreError>;
}

/// The shared liveness table.
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Inserts or replaces the row for `status.instance_name`.
    async fn write_status(&self, status: &InstanceStatus) -> Result<(), StoreError>;
    async fn read_status(&self, instance_name: &str) -> Result<Option<InstanceStatus>, StoreError>;
}

/// Locally journaled balance mutations awaiting replay.
#[async_trait]
pub trait EffectQueue: Send + Sync {
    /// Adds an effect. An unsynced effect with the same dedup key and
    /// producer already in the queue makes this a no-op.
    async fn enqueue(&self, effect: &QueuedEffect) -> Result<(), StoreError>;

    /// Oldest unsynced effects first, optionally restricted to one producer.
    async fn pending(
        &self,
        produced_by: Option<Role>,
        limit: usize,
    ) -> Result<Vec<QueuedEffect>, StoreError>;

    async fn count_pending(&self, produced_by: Option<Role>) -> Result<u64, StoreError>;

    async fn mark_synced(&self, id: EffectId, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Bumps the attempt counter and keeps the last error message.
    async fn record_failure(&self, id: EffectId, error: &str) -> Result<(), StoreError>;

    /// Deletes synced effects produced before `cutoff`, returning how many went.
    async fn purge_synced_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;

    async fn stats(&self, attempt_warning: u32) -> Result<QueueStats, StoreError>;
}

/// Balances, account links, bounties and daily bonus bookkeeping.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Account linked to an in-game name, matched case-insensitively.
    async fn resolve_account(&self, player: &str) -> Result<Option<String>, StoreError>;

    async fn get_balance(&self, account: &str) -> Result<i64, StoreError>;

    /// Applies `amount` once per `dedup_key` and returns the resulting balance.
    /// Balances never go below zero. A repeated key returns the current balance.
    async fn apply_delta(
        &self,
        account: &str,
        amount: i64,
        reason: &str,
        dedup_key: &str,
    ) -> Result<i64, StoreError>;

    /// Takes the outstanding bounty on `victim`. Repeating a `claim_key`
    /// returns the amount claimed the first time.
    async fn claim_bounty(&self, victim: &str, claim_key: &str) -> Result<i64, StoreError>;

    async fn last_daily(&self, account: &str) -> Result<Option<DateTime<Utc>>, StoreError>;

    async fn record_daily(&self, account: &str, at: DateTime<Utc>) -> Result<(), StoreError>;
}

/// Audit trail of detected violations.
#[async_trait]
pub trait InfractionLog: Send + Sync {
    async fn record_infraction(&self, infraction: &Infraction) -> Result<(), StoreError>;

    /// Infractions for `player`, matched case-insensitively, oldest first.
    async fn infractions_for(&self, player: &str) -> Result<Vec<Infraction>, StoreError>;
}

/// The store seams an instance works with.
#[derive(Clone)]
pub struct Stores {
    pub cursors: Arc<dyn CursorStore>,
    pub status: Arc<dyn StatusStore>,
    pub effects: Arc<dyn EffectQueue>,
    pub accounts: Arc<dyn AccountStore>,
    pub infractions: Arc<dyn InfractionLog>,
}

impl Stores {
    /// Uses one backend for every seam.
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: CursorStore + StatusStore + EffectQueue + AccountStore + InfractionLog + 'static,
    {
        Self {
            cursors: store.clone(),
            status: store.clone(),
            effects: store.clone(),
            infractions: store.clone(),
            accounts: store,
        }
    }

    /// Keeps the effect queue in its own backend, so effects can still be
    /// journaled while the shared database is unreachable.
    pub fn with_local_queue(mut self, queue: Arc<dyn EffectQueue>) -> Self {
        self.effects = queue;
        self
    }
}
