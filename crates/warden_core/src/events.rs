//! Typed events produced from administration log lines.
//!
//! Every event carries the [`LogLine`] it came from. The `(path, offset)` pair
//! of that line is the identity used to build deduplication keys, so replaying
//! a batch after a crash or after a failover overlap never applies a reward
//! twice.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One complete raw line and where it starts in its file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    pub path: String,
    pub offset: u64,
    pub text: String,
}

impl LogLine {
    pub fn new(path: impl Into<String>, offset: u64, text: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            offset,
            text: text.into(),
        }
    }

    /// Deduplication key for a mutation of `kind` derived from this line.
    pub fn dedup_key(&self, kind: &str) -> String {
        format!("{kind}:{}:{}", self.path, self.offset)
    }
}

/// A point on the map plane. The log's vertical axis is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GroundPos {
    pub x: f64,
    pub z: f64,
}

impl GroundPos {
    pub fn new(x: f64, z: f64) -> Self {
        Self { x, z }
    }

    pub fn distance_to(&self, other: &GroundPos) -> f64 {
        ((self.x - other.x).powi(2) + (self.z - other.z).powi(2)).sqrt()
    }
}

impl fmt::Display for GroundPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{:.0}, {:.0}>", self.x, self.z)
    }
}

/// Everything the pipeline understands from the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Kill {
        killer: String,
        victim: String,
        weapon: String,
        distance: f64,
        /// Victim position, absent when the line had no coordinates
        position: Option<GroundPos>,
    },
    Death {
        victim: String,
        position: Option<GroundPos>,
    },
    Login {
        player: String,
    },
    Logout {
        player: String,
    },
    Placement {
        player: String,
        item: String,
        x: f64,
        /// Height above sea level
        y: f64,
        z: f64,
    },
    Pickup {
        player: String,
        item: String,
        item_id: Option<String>,
    },
}

impl Event {
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Kill { .. } => "kill",
            Event::Death { .. } => "death",
            Event::Login { .. } => "login",
            Event::Logout { .. } => "logout",
            Event::Placement { .. } => "placement",
            Event::Pickup { .. } => "pickup",
        }
    }

    /// The player the event is primarily about.
    pub fn subject(&self) -> &str {
        match self {
            Event::Kill { killer, .. } => killer,
            Event::Death { victim, .. } => victim,
            Event::Login { player }
            | Event::Logout { player }
            | Event::Placement { player, .. }
            | Event::Pickup { player, .. } => player,
        }
    }

    /// Ground position for events that happen somewhere on the map.
    pub fn position(&self) -> Option<GroundPos> {
        match self {
            Event::Kill { position, .. } | Event::Death { position, .. } => *position,
            Event::Placement { x, z, .. } => Some(GroundPos::new(*x, *z)),
            _ => None,
        }
    }
}

/// An event together with its source line and the time it happened.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedEvent {
    pub origin: LogLine,
    pub occurred_at: DateTime<Utc>,
    pub event: Event,
}

impl ParsedEvent {
    pub fn dedup_key(&self, kind: &str) -> String {
        self.origin.dedup_key(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup_key_uses_path_and_offset() {
        let line = LogLine::new("/logs/server.ADM", 4096, "irrelevant");
        assert_eq!(line.dedup_key("kill"), "kill:/logs/server.ADM:4096");
    }

    #[test]
    fn test_event_subject_and_position() {
        let event = Event::Kill {
            killer: "Bandit".to_string(),
            victim: "Survivor".to_string(),
            weapon: "M4A1".to_string(),
            distance: 12.0,
            position: Some(GroundPos::new(1000.0, 3000.0)),
        };
        assert_eq!(event.kind(), "kill");
        assert_eq!(event.subject(), "Bandit");
        assert_eq!(event.position(), Some(GroundPos::new(1000.0, 3000.0)));

        let login = Event::Login { player: "Novato".to_string() };
        assert_eq!(login.position(), None);
    }

    #[test]
    fn test_ground_distance() {
        let a = GroundPos::new(0.0, 0.0);
        let b = GroundPos::new(300.0, 400.0);
        assert_eq!(a.distance_to(&b), 500.0);
    }
}
