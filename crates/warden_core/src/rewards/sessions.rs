//! Online sessions used for logout salaries.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub player_name: String,
    pub login_at: DateTime<Utc>,
}

/// Open sessions keyed by lowercased player name.
#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: HashMap<String, Session>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a session, replacing any previous one for the same name.
    pub fn login(&mut self, player: &str, at: DateTime<Utc>) -> Option<Session> {
        self.sessions.insert(
            player.to_lowercase(),
            Session {
                player_name: player.to_string(),
                login_at: at,
            },
        )
    }

    /// Closes the session and returns how long it lasted.
    pub fn logout(&mut self, player: &str, at: DateTime<Utc>) -> Option<Duration> {
        self.sessions
            .remove(&player.to_lowercase())
            .map(|session| at.signed_duration_since(session.login_at))
    }

    /// Forgets sessions older than `max_age`, returning how many went.
    pub fn evict(&mut self, now: DateTime<Utc>, max_age: Duration) -> usize {
        let before = self.sessions.len();
        self.sessions
            .retain(|_, session| now.signed_duration_since(session.login_at) <= max_age);
        before - self.sessions.len()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 11, 24, 12, 0, 0).unwrap() + Duration::seconds(secs)
    }

    #[test]
    fn test_login_logout_case_insensitive() {
        let mut sessions = SessionTable::new();
        assert!(sessions.login("Survivor", at(0)).is_none());
        assert_eq!(sessions.logout("survivor", at(3600)), Some(Duration::hours(1)));
        assert!(sessions.logout("Survivor", at(3700)).is_none());
    }

    #[test]
    fn test_relogin_replaces_session() {
        let mut sessions = SessionTable::new();
        sessions.login("Survivor", at(0));
        let previous = sessions.login("Survivor", at(100));
        assert_eq!(previous.map(|s| s.login_at), Some(at(0)));
        assert_eq!(sessions.logout("Survivor", at(700)), Some(Duration::seconds(600)));
    }

    #[test]
    fn test_evict_stale_sessions() {
        let mut sessions = SessionTable::new();
        sessions.login("Old", at(0));
        sessions.login("Fresh", at(90_000));
        assert_eq!(sessions.evict(at(100_000), Duration::hours(24)), 1);
        assert_eq!(sessions.len(), 1);
    }
}
