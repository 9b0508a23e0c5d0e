//! Runtime settings for the ingestion pipeline.
//!
//! Every field has a serde default so partial TOML sections deserialize
//! cleanly. The application crate embeds these structs in its own file
//! format and hands a [`WardenSettings`] to the service on startup and on
//! every hot reload.

use crate::geo::{chernarus, NamedLocation};
use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_roots() -> Vec<String> { vec!["logs".to_string()] }
fn default_max_fetch_bytes() -> u64 { 1024 * 1024 }
fn default_max_depth() -> usize { 4 }

fn default_spam_items() -> Vec<String> { vec!["fencekit".to_string()] }
fn default_spam_window_secs() -> u64 { 60 }
fn default_spam_threshold() -> usize { 10 }
fn default_banned_types() -> Vec<String> { vec!["gardenplot".to_string()] }
fn default_territory_banned_items() -> Vec<String> {
    vec!["wheel".to_string(), "tire".to_string(), "improvisedshelter".to_string()]
}
fn default_absolute_max_height() -> f64 { 1000.0 }
fn default_urban_ceiling() -> f64 { 120.0 }
fn default_wilderness_ceiling() -> f64 { 500.0 }
fn default_min_height() -> f64 { -10.0 }
fn default_duplication_window_secs() -> u64 { 300 }
fn default_duplication_threshold() -> usize { 2 }

fn default_hotzone_retention_secs() -> u64 { 900 }
fn default_hotzone_radius() -> f64 { 500.0 }
fn default_hotzone_threshold() -> usize { 3 }

fn default_kill_reward() -> i64 { 50 }
fn default_daily_bonus() -> i64 { 500 }
fn default_daily_window_hours() -> i64 { 24 }
fn default_hourly_rate() -> i64 { 1000 }
fn default_min_session_secs() -> i64 { 600 }
fn default_long_session_hours() -> i64 { 10 }
fn default_long_session_bonus() -> i64 { 5000 }
fn default_max_session_hours() -> i64 { 24 }

fn default_urban_radius() -> f64 { 600.0 }

fn default_heartbeat_timeout_secs() -> u64 { 120 }
fn default_resume_grace_secs() -> u64 { 600 }

fn default_tail_interval_secs() -> u64 { 30 }
fn default_reconcile_interval_secs() -> u64 { 300 }
fn default_maintenance_interval_secs() -> u64 { 3600 }
fn default_refresh_interval_secs() -> u64 { 60 }
fn default_reconcile_batch() -> usize { 500 }
fn default_max_attempts_warning() -> u32 { 10 }
fn default_effect_retention_days() -> i64 { 7 }

const DAY_SECS: u64 = 86_400;
const MAX_WINDOW_SECS: u64 = 7 * DAY_SECS;
const MAX_HOURS: i64 = 8_760;
const MAX_RETENTION_DAYS: i64 = 3_650;

/// Where to look for logs and how much to pull per cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TailSettings {
    /// Remote directories searched for `.ADM`/`.RPT` files
    #[serde(default = "default_roots")]
    pub roots: Vec<String>,
    /// Upper bound on bytes fetched in a single cycle
    #[serde(default = "default_max_fetch_bytes")]
    pub max_fetch_bytes: u64,
    /// How deep discovery recurses below each root
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

impl Default for TailSettings {
    fn default() -> Self {
        Self {
            roots: default_roots(),
            max_fetch_bytes: default_max_fetch_bytes(),
            max_depth: default_max_depth(),
        }
    }
}

/// Anti-cheat and base protection thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSettings {
    /// Item types whose placement rate is limited
    #[serde(default = "default_spam_items")]
    pub spam_items: Vec<String>,
    #[serde(default = "default_spam_window_secs")]
    pub spam_window_secs: u64,
    /// Placements allowed inside the window before flagging
    #[serde(default = "default_spam_threshold")]
    pub spam_threshold: usize,
    /// Construction types that are never allowed
    #[serde(default = "default_banned_types")]
    pub banned_types: Vec<String>,
    /// Items illegal inside any territory, owner included
    #[serde(default = "default_territory_banned_items")]
    pub territory_banned_items: Vec<String>,
    #[serde(default = "default_absolute_max_height")]
    pub absolute_max_height: f64,
    #[serde(default = "default_urban_ceiling")]
    pub urban_ceiling: f64,
    #[serde(default = "default_wilderness_ceiling")]
    pub wilderness_ceiling: f64,
    /// Anything placed below this is treated as under the map
    #[serde(default = "default_min_height")]
    pub min_height: f64,
    #[serde(default = "default_duplication_window_secs")]
    pub duplication_window_secs: u64,
    /// Pickups of one item instance tolerated inside the window
    #[serde(default = "default_duplication_threshold")]
    pub duplication_threshold: usize,
}

impl Default for RuleSettings {
    fn default() -> Self {
        Self {
            spam_items: default_spam_items(),
            spam_window_secs: default_spam_window_secs(),
            spam_threshold: default_spam_threshold(),
            banned_types: default_banned_types(),
            territory_banned_items: default_territory_banned_items(),
            absolute_max_height: default_absolute_max_height(),
            urban_ceiling: default_urban_ceiling(),
            wilderness_ceiling: default_wilderness_ceiling(),
            min_height: default_min_height(),
            duplication_window_secs: default_duplication_window_secs(),
            duplication_threshold: default_duplication_threshold(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HotzoneSettings {
    #[serde(default = "default_hotzone_retention_secs")]
    pub retention_secs: u64,
    #[serde(default = "default_hotzone_radius")]
    pub radius: f64,
    /// Kill count at which the area is announced
    #[serde(default = "default_hotzone_threshold")]
    pub threshold: usize,
}

impl Default for HotzoneSettings {
    fn default() -> Self {
        Self {
            retention_secs: default_hotzone_retention_secs(),
            radius: default_hotzone_radius(),
            threshold: default_hotzone_threshold(),
        }
    }
}

/// Economy amounts, all in whole coins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardSettings {
    #[serde(default = "default_kill_reward")]
    pub kill_reward: i64,
    #[serde(default = "default_daily_bonus")]
    pub daily_bonus: i64,
    #[serde(default = "default_daily_window_hours")]
    pub daily_window_hours: i64,
    #[serde(default = "default_hourly_rate")]
    pub hourly_rate: i64,
    /// Sessions this short earn no salary
    #[serde(default = "default_min_session_secs")]
    pub min_session_secs: i64,
    #[serde(default = "default_long_session_hours")]
    pub long_session_hours: i64,
    #[serde(default = "default_long_session_bonus")]
    pub long_session_bonus: i64,
    /// Sessions without a logout are forgotten after this long
    #[serde(default = "default_max_session_hours")]
    pub max_session_hours: i64,
}

impl Default for RewardSettings {
    fn default() -> Self {
        Self {
            kill_reward: default_kill_reward(),
            daily_bonus: default_daily_bonus(),
            daily_window_hours: default_daily_window_hours(),
            hourly_rate: default_hourly_rate(),
            min_session_secs: default_min_session_secs(),
            long_session_hours: default_long_session_hours(),
            long_session_bonus: default_long_session_bonus(),
            max_session_hours: default_max_session_hours(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoSettings {
    /// Distance from a town center inside which the urban ceiling applies
    #[serde(default = "default_urban_radius")]
    pub urban_radius: f64,
    #[serde(default = "chernarus")]
    pub locations: Vec<NamedLocation>,
}

impl Default for GeoSettings {
    fn default() -> Self {
        Self {
            urban_radius: default_urban_radius(),
            locations: chernarus(),
        }
    }
}

/// What a restarted primary does while the backup still holds unsynced work.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResumePolicy {
    /// Heartbeat but do not tail until the backup stands down
    #[default]
    Wait,
    /// Replay the backup's journal, then resume
    Reconcile,
    /// Resume at once and rely on idempotent effects
    Concurrent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailoverSettings {
    /// A peer heartbeat older than this is considered silent
    #[serde(default = "default_heartbeat_timeout_secs")]
    pub heartbeat_timeout_secs: u64,
    #[serde(default)]
    pub resume_policy: ResumePolicy,
    /// Longest a primary waits for the backup before resuming anyway
    #[serde(default = "default_resume_grace_secs")]
    pub resume_grace_secs: u64,
}

impl Default for FailoverSettings {
    fn default() -> Self {
        Self {
            heartbeat_timeout_secs: default_heartbeat_timeout_secs(),
            resume_policy: ResumePolicy::default(),
            resume_grace_secs: default_resume_grace_secs(),
        }
    }
}

impl FailoverSettings {
    pub fn heartbeat_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.heartbeat_timeout_secs as i64)
    }

    pub fn resume_grace(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.resume_grace_secs as i64)
    }
}

/// Service loop cadence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleSettings {
    #[serde(default = "default_tail_interval_secs")]
    pub tail_interval_secs: u64,
    #[serde(default = "default_reconcile_interval_secs")]
    pub reconcile_interval_secs: u64,
    #[serde(default = "default_maintenance_interval_secs")]
    pub maintenance_interval_secs: u64,
    /// Registry and settings reload cadence
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    /// Queued effects replayed per reconciliation pass
    #[serde(default = "default_reconcile_batch")]
    pub reconcile_batch: usize,
    #[serde(default = "default_max_attempts_warning")]
    pub max_attempts_warning: u32,
    /// Synced effects older than this are purged
    #[serde(default = "default_effect_retention_days")]
    pub effect_retention_days: i64,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            tail_interval_secs: default_tail_interval_secs(),
            reconcile_interval_secs: default_reconcile_interval_secs(),
            maintenance_interval_secs: default_maintenance_interval_secs(),
            refresh_interval_secs: default_refresh_interval_secs(),
            reconcile_batch: default_reconcile_batch(),
            max_attempts_warning: default_max_attempts_warning(),
            effect_retention_days: default_effect_retention_days(),
        }
    }
}

impl ScheduleSettings {
    pub fn tail_interval(&self) -> Duration {
        Duration::from_secs(self.tail_interval_secs)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }
}

/// Everything the service needs besides its collaborators.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WardenSettings {
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

impl WardenSettings {
    /// Checks ranges and cross-field consistency.
    pub fn validate(&self) -> Result<(), String> {
        if self.tail.roots.is_empty() {
            return Err("tail.roots must name at least one directory".to_string());
        }
        if self.tail.max_fetch_bytes == 0 {
            return Err("tail.max_fetch_bytes must be greater than 0".to_string());
        }

        if self.rules.min_height >= self.rules.urban_ceiling {
            return Err("rules.min_height must be below rules.urban_ceiling".to_string());
        }
        if self.rules.urban_ceiling > self.rules.wilderness_ceiling
            || self.rules.wilderness_ceiling > self.rules.absolute_max_height
        {
            return Err(
                "height ceilings must satisfy urban <= wilderness <= absolute".to_string(),
            );
        }
        if self.rules.spam_window_secs == 0 || self.rules.duplication_window_secs == 0 {
            return Err("rule windows must be greater than 0 seconds".to_string());
        }

        let week = MAX_WINDOW_SECS;
        if self.rules.spam_window_secs > week || self.rules.duplication_window_secs > week {
            return Err(format!("rule windows cannot exceed {week} seconds"));
        }
        if self.hotzone.retention_secs == 0 || self.hotzone.retention_secs > week {
            return Err(format!("hotzone.retention_secs must be between 1 and {week}"));
        }

        if self.hotzone.threshold < 2 {
            return Err("hotzone.threshold must be at least 2".to_string());
        }
        if self.hotzone.radius <= 0.0 {
            return Err("hotzone.radius must be positive".to_string());
        }

        if self.rewards.kill_reward < 0
            || self.rewards.daily_bonus < 0
            || self.rewards.hourly_rate < 0
            || self.rewards.long_session_bonus < 0
        {
            return Err("reward amounts cannot be negative".to_string());
        }
        if self.rewards.max_session_hours <= 0 {
            return Err("rewards.max_session_hours must be greater than 0".to_string());
        }
        let hours = [
            self.rewards.daily_window_hours,
            self.rewards.long_session_hours,
            self.rewards.max_session_hours,
        ];
        if hours.iter().any(|h| !(0..=MAX_HOURS).contains(h)) {
            return Err(format!("reward hour settings must be between 0 and {MAX_HOURS}"));
        }
        if !(0..=MAX_HOURS * 3600).contains(&self.rewards.min_session_secs) {
            return Err("rewards.min_session_secs is out of range".to_string());
        }

        if self.failover.heartbeat_timeout_secs > DAY_SECS || self.failover.resume_grace_secs > DAY_SECS {
            return Err(format!("failover timeouts cannot exceed {DAY_SECS} seconds"));
        }

        if self.failover.heartbeat_timeout_secs <= self.schedule.tail_interval_secs {
            return Err(format!(
                "failover.heartbeat_timeout_secs ({}) must exceed schedule.tail_interval_secs ({})",
                self.failover.heartbeat_timeout_secs, self.schedule.tail_interval_secs
            ));
        }

        let intervals = [
            self.schedule.tail_interval_secs,
            self.schedule.reconcile_interval_secs,
            self.schedule.maintenance_interval_secs,
            self.schedule.refresh_interval_secs,
        ];
        if intervals.contains(&0) {
            return Err("schedule intervals must be greater than 0".to_string());
        }
        if intervals.iter().any(|secs| *secs > DAY_SECS) {
            return Err(format!("schedule intervals cannot exceed {DAY_SECS} seconds"));
        }
        if !(1..=MAX_RETENTION_DAYS).contains(&self.schedule.effect_retention_days) {
            return Err(format!(
                "schedule.effect_retention_days must be between 1 and {MAX_RETENTION_DAYS}"
            ));
        }
        if self.schedule.reconcile_batch == 0 {
            return Err("schedule.reconcile_batch must be greater than 0".to_string());
        }

        Ok(())
    }
}
