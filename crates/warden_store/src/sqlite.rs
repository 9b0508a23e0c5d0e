//! rusqlite implementation of the durable store traits.
//!
//! The connection sits behind a blocking mutex and every call runs on the
//! blocking pool. Timestamps are stored as Unix milliseconds, effect payloads
//! as JSON.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Transaction, TransactionBehavior};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};
use warden_core::error::StoreError;
use warden_core::security::Severity;
use warden_core::store::{
    AccountStore, CursorStore, EffectId, EffectPayload, EffectQueue, Infraction, InfractionLog,
    InstanceStatus, LogCursor, QueueStats, QueuedEffect, Role, StatusStore,
};

const CURRENT_SCHEMA_VERSION: u32 = 2;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

fn db_error(err: rusqlite::Error) -> StoreError {
    match &err {
        rusqlite::Error::SqliteFailure(failure, _)
            if matches!(failure.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) =>
        {
            StoreError::Unavailable(err.to_string())
        }
        _ => StoreError::Persistence(err.to_string()),
    }
}

fn millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(value: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(value)
        .ok_or_else(|| StoreError::Serialization(format!("timestamp {value} out of range")))
}

/// Raw `queued_effects` row before decoding.
struct EffectRow {
    id: String,
    dedup_key: String,
    payload: String,
    produced_by: String,
    synced: bool,
    produced_at: i64,
    synced_at: Option<i64>,
    attempts: u32,
    last_error: Option<String>,
}

impl EffectRow {
    fn into_effect(self) -> Result<QueuedEffect, StoreError> {
        Ok(QueuedEffect {
            id: self
                .id
                .parse::<EffectId>()
                .map_err(|err| StoreError::Serialization(format!("bad effect id '{}': {err}", self.id)))?,
            dedup_key: self.dedup_key,
            payload: serde_json::from_str::<EffectPayload>(&self.payload)?,
            produced_by: self.produced_by.parse::<Role>().map_err(StoreError::Serialization)?,
            produced_at: from_millis(self.produced_at)?,
            synced: self.synced,
            synced_at: self.synced_at.map(from_millis).transpose()?,
            attempts: self.attempts,
            last_error: self.last_error,
        })
    }
}

#[derive(Debug, Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Opens or creates the database file shared by both instances.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref()).map_err(db_error)?;
        conn.busy_timeout(BUSY_TIMEOUT).map_err(db_error)?;
        let mode: String = conn
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
            .map_err(db_error)?;
        debug!("SQLite journal mode: {}", mode);
        conn.pragma_update(None, "synchronous", "NORMAL").map_err(db_error)?;
        let store = Self::from_connection(conn);
        store.bootstrap()?;
        info!("💾 Opened store at {}", path.as_ref().display());
        Ok(store)
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(db_error)?;
        let store = Self::from_connection(conn);
        store.bootstrap()?;
        Ok(store)
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    pub fn schema_version(&self) -> Result<u32, StoreError> {
        let conn = self.lock()?;
        Self::current_schema_version(&conn)
    }

    /// Links an in-game name to an account.
    pub async fn link_account(&self, player: &str, account: &str) -> Result<(), StoreError> {
        let (player, account) = (player.to_string(), account.to_string());
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO links (player_lower, player, account_id) VALUES (?1, ?2, ?3)
                 ON CONFLICT(player_lower) DO UPDATE SET player = excluded.player, account_id = excluded.account_id",
                params![player.to_lowercase(), player, account],
            )
            .map_err(db_error)?;
            Ok(())
        })
        .await
    }

    /// Adds to the outstanding bounty on `victim`.
    pub async fn place_bounty(&self, victim: &str, amount: i64) -> Result<(), StoreError> {
        let victim = victim.to_lowercase();
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO bounties (victim_lower, amount) VALUES (?1, ?2)
                 ON CONFLICT(victim_lower) DO UPDATE SET amount = amount + excluded.amount",
                params![victim, amount],
            )
            .map_err(db_error)?;
            Ok(())
        })
        .await
    }

    pub async fn set_balance(&self, account: &str, balance: i64) -> Result<(), StoreError> {
        let account = account.to_string();
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO accounts (account_id, balance) VALUES (?1, ?2)
                 ON CONFLICT(account_id) DO UPDATE SET balance = excluded.balance",
                params![account, balance.max(0)],
            )
            .map_err(db_error)?;
            Ok(())
        })
        .await
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Persistence("connection mutex poisoned".to_string()))
    }

    /// Runs `f` against the connection on the blocking pool.
    async fn call<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| StoreError::Persistence("connection mutex poisoned".to_string()))?;
            f(&mut guard)
        })
        .await
        .map_err(|err| StoreError::Unavailable(format!("store task failed: {err}")))?
    }

    fn bootstrap(&self) -> Result<(), StoreError> {
        let mut conn = self.lock()?;
        let current = Self::current_schema_version(&conn)?;
        if current > CURRENT_SCHEMA_VERSION {
            return Err(StoreError::Persistence(format!(
                "database schema version {current} is newer than supported version {CURRENT_SCHEMA_VERSION}"
            )));
        }
        Self::apply_pending_migrations(&mut conn, current)
    }

    fn table_exists(conn: &Connection, name: &str) -> Result<bool, StoreError> {
        conn.query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1 LIMIT 1",
            params![name],
            |_| Ok(()),
        )
        .optional()
        .map(|found| found.is_some())
        .map_err(db_error)
    }

    fn current_schema_version(conn: &Connection) -> Result<u32, StoreError> {
        if !Self::table_exists(conn, "schema_migrations")? {
            return Ok(0);
        }
        conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(db_error)
    }

    fn apply_pending_migrations(conn: &mut Connection, current: u32) -> Result<(), StoreError> {
        for version in (current + 1)..=CURRENT_SCHEMA_VERSION {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(db_error)?;
            Self::apply_migration(&tx, version)?;
            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                params![version, millis(Utc::now())],
            )
            .map_err(db_error)?;
            tx.commit().map_err(db_error)?;
            debug!("Applied store migration {}", version);
        }
        Ok(())
    }

    fn apply_migration(tx: &Transaction<'_>, version: u32) -> Result<(), StoreError> {
        match version {
            1 => tx
                .execute_batch(
                    "
                    CREATE TABLE schema_migrations (
                        version INTEGER PRIMARY KEY,
                        applied_at INTEGER NOT NULL
                    );

                    CREATE TABLE cursors (
                        source_id TEXT PRIMARY KEY,
                        path TEXT,
                        byte_offset INTEGER NOT NULL,
                        updated_at INTEGER NOT NULL
                    );

                    CREATE TABLE instance_status (
                        instance_name TEXT PRIMARY KEY,
                        last_heartbeat INTEGER NOT NULL,
                        is_active INTEGER NOT NULL,
                        status TEXT NOT NULL
                    );

                    CREATE TABLE queued_effects (
                        id TEXT PRIMARY KEY,
                        dedup_key TEXT NOT NULL,
                        kind TEXT NOT NULL,
                        payload TEXT NOT NULL,
                        produced_by TEXT NOT NULL,
                        synced INTEGER NOT NULL DEFAULT 0,
                        produced_at INTEGER NOT NULL,
                        synced_at INTEGER,
                        attempts INTEGER NOT NULL DEFAULT 0,
                        last_error TEXT
                    );
                    CREATE UNIQUE INDEX queued_effects_unsynced_dedup
                        ON queued_effects (dedup_key, produced_by) WHERE synced = 0;
                    CREATE INDEX queued_effects_pending
                        ON queued_effects (synced, produced_by, produced_at);

                    CREATE TABLE accounts (
                        account_id TEXT PRIMARY KEY,
                        balance INTEGER NOT NULL DEFAULT 0 CHECK (balance >= 0)
                    );

                    CREATE TABLE ledger (
                        dedup_key TEXT PRIMARY KEY,
                        account_id TEXT NOT NULL,
                        amount INTEGER NOT NULL,
                        reason TEXT NOT NULL,
                        created_at INTEGER NOT NULL
                    );

                    CREATE TABLE links (
                        player_lower TEXT PRIMARY KEY,
                        player TEXT NOT NULL,
                        account_id TEXT NOT NULL
                    );

                    CREATE TABLE bounties (
                        victim_lower TEXT PRIMARY KEY,
                        amount INTEGER NOT NULL
                    );

                    CREATE TABLE bounty_claims (
                        claim_key TEXT PRIMARY KEY,
                        victim_lower TEXT NOT NULL,
                        amount INTEGER NOT NULL,
                        claimed_at INTEGER NOT NULL
                    );

                    CREATE TABLE daily_rewards (
                        account_id TEXT PRIMARY KEY,
                        last_paid_at INTEGER NOT NULL
                    );
                    ",
                )
                .map_err(db_error),
            2 => tx
                .execute_batch(
                    "
                    CREATE TABLE infractions (
                        id INTEGER PRIMARY KEY AUTOINCREMENT,
                        player TEXT NOT NULL,
                        player_lower TEXT NOT NULL,
                        kind TEXT NOT NULL,
                        severity TEXT NOT NULL,
                        description TEXT NOT NULL,
                        evidence TEXT NOT NULL,
                        detected_at INTEGER NOT NULL
                    );
                    CREATE INDEX infractions_player
                        ON infractions (player_lower, detected_at);
                    ",
                )
                .map_err(db_error),
            other => Err(StoreError::Persistence(format!(
                "no migration defined for schema version {other}"
            ))),
        }
    }

    fn balance_of(conn: &Connection, account: &str) -> Result<i64, StoreError> {
        conn.query_row(
            "SELECT balance FROM accounts WHERE account_id = ?1",
            params![account],
            |row| row.get(0),
        )
        .optional()
        .map(|balance| balance.unwrap_or(0))
        .map_err(db_error)
    }
}

fn producer_filter(produced_by: Option<Role>) -> Option<&'static str> {
    produced_by.map(|role| role.as_str())
}

#[async_trait]
impl CursorStore for SqliteStore {
    async fn load_cursor(&self, source_id: &str) -> Result<Option<LogCursor>, StoreError> {
        let source_id = source_id.to_string();
        self.call(move |conn| {
            let row = conn
                .query_row(
                    "SELECT path, byte_offset, updated_at FROM cursors WHERE source_id = ?1",
                    params![source_id],
                    |row| {
                        Ok((
                            row.get::<_, Option<String>>(0)?,
                            row.get::<_, i64>(1)?,
                            row.get::<_, i64>(2)?,
                        ))
                    },
                )
                .optional()
                .map_err(db_error)?;

            row.map(|(path, byte_offset, updated_at)| {
                Ok(LogCursor {
                    source_id: source_id.clone(),
                    path,
                    byte_offset: byte_offset.max(0) as u64,
                    updated_at: from_millis(updated_at)?,
                })
            })
            .transpose()
        })
        .await
    }

    async fn save_cursor(&self, cursor: &LogCursor) -> Result<(), StoreError> {
        let cursor = cursor.clone();
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO cursors (source_id, path, byte_offset, updated_at) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(source_id) DO UPDATE SET
                    path = excluded.path,
                    byte_offset = excluded.byte_offset,
                    updated_at = excluded.updated_at",
                params![
                    cursor.source_id,
                    cursor.path,
                    cursor.byte_offset as i64,
                    millis(cursor.updated_at)
                ],
            )
            .map_err(db_error)?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl StatusStore for SqliteStore {
    async fn write_status(&self, status: &InstanceStatus) -> Result<(), StoreError> {
        let status = status.clone();
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO instance_status (instance_name, last_heartbeat, is_active, status)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(instance_name) DO UPDATE SET
                    last_heartbeat = excluded.last_heartbeat,
                    is_active = excluded.is_active,
                    status = excluded.status",
                params![
                    status.instance_name,
                    millis(status.last_heartbeat),
                    status.is_active,
                    status.status.as_str()
                ],
            )
            .map_err(db_error)?;
            Ok(())
        })
        .await
    }

    async fn read_status(&self, instance_name: &str) -> Result<Option<InstanceStatus>, StoreError> {
        let instance_name = instance_name.to_string();
        self.call(move |conn| {
            let row = conn
                .query_row(
                    "SELECT last_heartbeat, is_active, status FROM instance_status WHERE instance_name = ?1",
                    params![instance_name],
                    |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, bool>(1)?,
                            row.get::<_, String>(2)?,
                        ))
                    },
                )
                .optional()
                .map_err(db_error)?;

            row.map(|(last_heartbeat, is_active, status)| {
                Ok(InstanceStatus {
                    instance_name: instance_name.clone(),
                    last_heartbeat: from_millis(last_heartbeat)?,
                    is_active,
                    status: status.parse().map_err(StoreError::Serialization)?,
                })
            })
            .transpose()
        })
        .await
    }
}

#[async_trait]
impl EffectQueue for SqliteStore {
    async fn enqueue(&self, effect: &QueuedEffect) -> Result<(), StoreError> {
        let effect = effect.clone();
        let payload = serde_json::to_string(&effect.payload)?;
        self.call(move |conn| {
            let inserted = conn
                .execute(
                    "INSERT OR IGNORE INTO queued_effects
                        (id, dedup_key, kind, payload, produced_by, synced, produced_at, synced_at, attempts, last_error)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    params![
                        effect.id.to_string(),
                        effect.dedup_key,
                        effect.payload.kind(),
                        payload,
                        effect.produced_by.as_str(),
                        effect.synced,
                        millis(effect.produced_at),
                        effect.synced_at.map(millis),
                        effect.attempts,
                        effect.last_error,
                    ],
                )
                .map_err(db_error)?;
            if inserted == 0 {
                debug!("{} already queued by {}", effect.dedup_key, effect.produced_by);
            }
            Ok(())
        })
        .await
    }

    async fn pending(
        &self,
        produced_by: Option<Role>,
        limit: usize,
    ) -> Result<Vec<QueuedEffect>, StoreError> {
        let producer = producer_filter(produced_by);
        self.call(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, dedup_key, payload, produced_by, synced, produced_at, synced_at, attempts, last_error
                     FROM queued_effects
                     WHERE synced = 0 AND (?1 IS NULL OR produced_by = ?1)
                     ORDER BY produced_at ASC, rowid ASC
                     LIMIT ?2",
                )
                .map_err(db_error)?;

            let rows = stmt
                .query_map(params![producer, limit as i64], |row| {
                    Ok(EffectRow {
                        id: row.get(0)?,
                        dedup_key: row.get(1)?,
                        payload: row.get(2)?,
                        produced_by: row.get(3)?,
                        synced: row.get(4)?,
                        produced_at: row.get(5)?,
                        synced_at: row.get(6)?,
                        attempts: row.get(7)?,
                        last_error: row.get(8)?,
                    })
                })
                .map_err(db_error)?;

            let effects = rows
                .map(|row| row.map_err(db_error).and_then(EffectRow::into_effect))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(effects)
        })
        .await
    }

    async fn count_pending(&self, produced_by: Option<Role>) -> Result<u64, StoreError> {
        let producer = producer_filter(produced_by);
        self.call(move |conn| {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM queued_effects WHERE synced = 0 AND (?1 IS NULL OR produced_by = ?1)",
                    params![producer],
                    |row| row.get(0),
                )
                .map_err(db_error)?;
            Ok(count.max(0) as u64)
        })
        .await
    }

    async fn mark_synced(&self, id: EffectId, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.call(move |conn| {
            conn.execute(
                "UPDATE queued_effects SET synced = 1, synced_at = ?2 WHERE id = ?1",
                params![id.to_string(), millis(at)],
            )
            .map_err(db_error)?;
            Ok(())
        })
        .await
    }

    async fn record_failure(&self, id: EffectId, error: &str) -> Result<(), StoreError> {
        let error = error.to_string();
        self.call(move |conn| {
            conn.execute(
                "UPDATE queued_effects SET attempts = attempts + 1, last_error = ?2 WHERE id = ?1",
                params![id.to_string(), error],
            )
            .map_err(db_error)?;
            Ok(())
        })
        .await
    }

    async fn purge_synced_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        self.call(move |conn| {
            let deleted = conn
                .execute(
                    "DELETE FROM queued_effects WHERE synced = 1 AND produced_at < ?1",
                    params![millis(cutoff)],
                )
                .map_err(db_error)?;
            Ok(deleted as u64)
        })
        .await
    }

    async fn stats(&self, attempt_warning: u32) -> Result<QueueStats, StoreError> {
        self.call(move |conn| {
            conn.query_row(
                "SELECT
                    COUNT(*),
                    COALESCE(SUM(synced = 0), 0),
                    COALESCE(SUM(synced = 1), 0),
                    COALESCE(SUM(synced = 0 AND produced_by = 'primary'), 0),
                    COALESCE(SUM(synced = 0 AND produced_by = 'backup'), 0),
                    COALESCE(SUM(synced = 0 AND attempts > ?1), 0)
                 FROM queued_effects",
                params![attempt_warning],
                |row| {
                    let count = |idx: usize| row.get::<_, i64>(idx).map(|value| value.max(0) as u64);
                    Ok(QueueStats {
                        total: count(0)?,
                        pending: count(1)?,
                        synced: count(2)?,
                        pending_primary: count(3)?,
                        pending_backup: count(4)?,
                        over_attempts: count(5)?,
                    })
                },
            )
            .map_err(db_error)
        })
        .await
    }
}

#[async_trait]
impl AccountStore for SqliteStore {
    async fn resolve_account(&self, player: &str) -> Result<Option<String>, StoreError> {
        let player = player.to_lowercase();
        self.call(move |conn| {
            conn.query_row(
                "SELECT account_id FROM links WHERE player_lower = ?1",
                params![player],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_error)
        })
        .await
    }

    async fn get_balance(&self, account: &str) -> Result<i64, StoreError> {
        let account = account.to_string();
        self.call(move |conn| Self::balance_of(conn, &account)).await
    }

    async fn apply_delta(
        &self,
        account: &str,
        amount: i64,
        reason: &str,
        dedup_key: &str,
    ) -> Result<i64, StoreError> {
        let (account, reason, dedup_key) =
            (account.to_string(), reason.to_string(), dedup_key.to_string());
        self.call(move |conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(db_error)?;
            let current = Self::balance_of(&tx, &account)?;

            let seen = tx
                .query_row(
                    "SELECT 1 FROM ledger WHERE dedup_key = ?1",
                    params![dedup_key],
                    |_| Ok(()),
                )
                .optional()
                .map_err(db_error)?
                .is_some();
            if seen {
                return Ok(current);
            }

            let updated = (current + amount).max(0);
            tx.execute(
                "INSERT INTO ledger (dedup_key, account_id, amount, reason, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![dedup_key, account, amount, reason, millis(Utc::now())],
            )
            .map_err(db_error)?;
            tx.execute(
                "INSERT INTO accounts (account_id, balance) VALUES (?1, ?2)
                 ON CONFLICT(account_id) DO UPDATE SET balance = excluded.balance",
                params![account, updated],
            )
            .map_err(db_error)?;
            tx.commit().map_err(db_error)?;
            Ok(updated)
        })
        .await
    }

    async fn claim_bounty(&self, victim: &str, claim_key: &str) -> Result<i64, StoreError> {
        let (victim, claim_key) = (victim.to_lowercase(), claim_key.to_string());
        self.call(move |conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(db_error)?;

            let claimed: Option<i64> = tx
                .query_row(
                    "SELECT amount FROM bounty_claims WHERE claim_key = ?1",
                    params![claim_key],
                    |row| row.get(0),
                )
                .optional()
                .map_err(db_error)?;
            if let Some(amount) = claimed {
                return Ok(amount);
            }

            let amount: i64 = tx
                .query_row(
                    "SELECT amount FROM bounties WHERE victim_lower = ?1",
                    params![victim],
                    |row| row.get(0),
                )
                .optional()
                .map_err(db_error)?
                .unwrap_or(0);
            tx.execute("DELETE FROM bounties WHERE victim_lower = ?1", params![victim])
                .map_err(db_error)?;
            tx.execute(
                "INSERT INTO bounty_claims (claim_key, victim_lower, amount, claimed_at) VALUES (?1, ?2, ?3, ?4)",
                params![claim_key, victim, amount, millis(Utc::now())],
            )
            .map_err(db_error)?;
            tx.commit().map_err(db_error)?;
            Ok(amount)
        })
        .await
    }

    async fn last_daily(&self, account: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        let account = account.to_string();
        self.call(move |conn| {
            let paid: Option<i64> = conn
                .query_row(
                    "SELECT last_paid_at FROM daily_rewards WHERE account_id = ?1",
                    params![account],
                    |row| row.get(0),
                )
                .optional()
                .map_err(db_error)?;
            paid.map(from_millis).transpose()
        })
        .await
    }

    async fn record_daily(&self, account: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        let account = account.to_string();
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO daily_rewards (account_id, last_paid_at) VALUES (?1, ?2)
                 ON CONFLICT(account_id) DO UPDATE SET last_paid_at = MAX(last_paid_at, excluded.last_paid_at)",
                params![account, millis(at)],
            )
            .map_err(db_error)?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl InfractionLog for SqliteStore {
    async fn record_infraction(&self, infraction: &Infraction) -> Result<(), StoreError> {
        let infraction = infraction.clone();
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO infractions
                    (player, player_lower, kind, severity, description, evidence, detected_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    infraction.player,
                    infraction.player.to_lowercase(),
                    infraction.kind,
                    infraction.severity.as_str(),
                    infraction.description,
                    infraction.evidence,
                    millis(infraction.detected_at)
                ],
            )
            .map_err(db_error)?;
            Ok(())
        })
        .await
    }

    async fn infractions_for(&self, player: &str) -> Result<Vec<Infraction>, StoreError> {
        let player = player.to_lowercase();
        self.call(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT player, kind, severity, description, evidence, detected_at
                     FROM infractions WHERE player_lower = ?1 ORDER BY detected_at, id",
                )
                .map_err(db_error)?;
            let rows = stmt
                .query_map(params![player], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, i64>(5)?,
                    ))
                })
                .map_err(db_error)?;

            let mut infractions = Vec::new();
            for row in rows {
                let (player, kind, severity, description, evidence, detected_at) = row.map_err(db_error)?;
                infractions.push(Infraction {
                    player,
                    kind,
                    severity: severity.parse::<Severity>().map_err(StoreError::Serialization)?,
                    description,
                    evidence,
                    detected_at: from_millis(detected_at)?,
                });
            }
            Ok(infractions)
        })
        .await
    }
}
