//! Records shared between instances through the durable store.

use crate::security::Severity;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Which side of the primary/backup pair an instance plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Primary,
    Backup,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Primary => "primary",
            Role::Backup => "backup",
        }
    }

    pub fn peer(&self) -> Role {
        match self {
            Role::Primary => Role::Backup,
            Role::Backup => Role::Primary,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "primary" => Ok(Role::Primary),
            "backup" => Ok(Role::Backup),
            other => Err(format!("unknown role '{other}', expected primary or backup")),
        }
    }
}

/// How far an instance has read, and in which file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogCursor {
    pub source_id: String,
    /// Tracked remote file, `None` until discovery succeeds
    pub path: Option<String>,
    pub byte_offset: u64,
    pub updated_at: DateTime<Utc>,
}

impl LogCursor {
    pub fn empty(source_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            source_id: source_id.into(),
            path: None,
            byte_offset: 0,
            updated_at: now,
        }
    }
}

/// Lifecycle values written to the status table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    Starting,
    Running,
    Standby,
    Waiting,
    TakingOver,
    Reconciling,
    Stopped,
    Failed,
}

impl InstanceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceState::Starting => "starting",
            InstanceState::Running => "running",
            InstanceState::Standby => "standby",
            InstanceState::Waiting => "waiting",
            InstanceState::TakingOver => "taking_over",
            InstanceState::Reconciling => "reconciling",
            InstanceState::Stopped => "stopped",
            InstanceState::Failed => "failed",
        }
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstanceState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "starting" => InstanceState::Starting,
            "running" => InstanceState::Running,
            "standby" => InstanceState::Standby,
            "waiting" => InstanceState::Waiting,
            "taking_over" => InstanceState::TakingOver,
            "reconciling" => InstanceState::Reconciling,
            "stopped" => InstanceState::Stopped,
            "failed" => InstanceState::Failed,
            other => return Err(format!("unknown instance state '{other}'")),
        })
    }
}

/// One row per role, written only by that role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceStatus {
    pub instance_name: String,
    pub last_heartbeat: DateTime<Utc>,
    /// Whether the instance is currently serving (tailing and dispatching)
    pub is_active: bool,
    pub status: InstanceState,
}

impl InstanceStatus {
    /// Serving and heard from within `timeout`.
    pub fn is_live(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        self.is_active && now.signed_duration_since(self.last_heartbeat) <= timeout
    }
}

/// Unique identifier for a queued effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EffectId(pub Uuid);

impl EffectId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EffectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EffectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EffectId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(EffectId)
    }
}

/// A balance mutation, addressed by in-game name so it can be queued
/// while the account store is unreachable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EffectPayload {
    Credit {
        player: String,
        amount: i64,
        reason: String,
    },
    /// Base reward plus whatever bounty is on the victim when applied
    KillReward {
        killer: String,
        victim: String,
        base: i64,
    },
    /// Paid at most once per `window_hours` per account
    DailyBonus {
        player: String,
        amount: i64,
        window_hours: i64,
    },
}

impl EffectPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            EffectPayload::Credit { .. } => "credit",
            EffectPayload::KillReward { .. } => "kill_reward",
            EffectPayload::DailyBonus { .. } => "daily_bonus",
        }
    }

    pub fn player(&self) -> &str {
        match self {
            EffectPayload::Credit { player, .. } | EffectPayload::DailyBonus { player, .. } => {
                player
            }
            EffectPayload::KillReward { killer, .. } => killer,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedEffect {
    pub id: EffectId,
    pub dedup_key: String,
    pub payload: EffectPayload,
    pub produced_by: Role,
    pub produced_at: DateTime<Utc>,
    pub synced: bool,
    pub synced_at: Option<DateTime<Utc>>,
    pub attempts: u32,
    pub last_error: Option<String>,
}

impl QueuedEffect {
    pub fn new(
        dedup_key: impl Into<String>,
        payload: EffectPayload,
        produced_by: Role,
        produced_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: EffectId::new(),
            dedup_key: dedup_key.into(),
            payload,
            produced_by,
            produced_at,
            synced: false,
            synced_at: None,
            attempts: 0,
            last_error: None,
        }
    }
}

/// A rule violation kept for operator review, next to the ban it caused.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Infraction {
    pub player: String,
    /// Violation kind, e.g. `duplication` or `lag_machine`
    pub kind: String,
    pub severity: Severity,
    pub description: String,
    /// Raw log line and its position
    pub evidence: String,
    pub detected_at: DateTime<Utc>,
}

/// Snapshot of the effect queue for diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub total: u64,
    pub pending: u64,
    pub synced: u64,
    pub pending_primary: u64,
    pub pending_backup: u64,
    /// Pending effects that have failed more often than the warning threshold
    pub over_attempts: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parsing() {
        assert_eq!("Primary".parse::<Role>(), Ok(Role::Primary));
        assert_eq!(Role::Backup.peer(), Role::Primary);
        assert!("tertiary".parse::<Role>().is_err());
    }

    #[test]
    fn test_state_names_round_trip() {
        for state in [
            InstanceState::Starting,
            InstanceState::TakingOver,
            InstanceState::Stopped,
        ] {
            assert_eq!(state.as_str().parse::<InstanceState>(), Ok(state));
        }
    }

    #[test]
    fn test_liveness_requires_active_and_fresh() {
        let now = Utc::now();
        let mut status = InstanceStatus {
            instance_name: "primary".to_string(),
            last_heartbeat: now - Duration::seconds(100),
            is_active: true,
            status: InstanceState::Running,
        };
        assert!(status.is_live(now, Duration::seconds(120)));

        status.last_heartbeat = now - Duration::seconds(121);
        assert!(!status.is_live(now, Duration::seconds(120)));

        status.last_heartbeat = now;
        status.is_active = false;
        assert!(!status.is_live(now, Duration::seconds(120)));
    }

    #[test]
    fn test_payload_serializes_with_kind_tag() {
        let payload = EffectPayload::KillReward {
            killer: "Bandit".to_string(),
            victim: "Survivor".to_string(),
            base: 50,
        };
        let json = serde_json::to_string(&payload).unwrap();
        assert!(json.contains(r#""kind":"kill_reward""#));
        assert_eq!(serde_json::from_str::<EffectPayload>(&json).unwrap(), payload);
    }
}
