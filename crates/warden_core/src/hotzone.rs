//! Kill density tracking.

use crate::config::HotzoneSettings;
use crate::enforcement::{ModerationAction, Recipient};
use crate::events::GroundPos;
use crate::geo::LocationTable;
use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;
use tracing::info;

/// Rolling window of recent kill positions.
#[derive(Debug)]
pub struct HotzoneTracker {
    settings: HotzoneSettings,
    kills: VecDeque<(GroundPos, DateTime<Utc>)>,
}

impl HotzoneTracker {
    pub fn new(settings: HotzoneSettings) -> Self {
        Self {
            settings,
            kills: VecDeque::new(),
        }
    }

    pub fn update_settings(&mut self, settings: HotzoneSettings) {
        self.settings = settings;
    }

    /// Records a kill and returns a public alert when this kill brings the
    /// surrounding cluster to exactly the threshold.
    pub fn record_kill(
        &mut self,
        pos: GroundPos,
        at: DateTime<Utc>,
        locations: &LocationTable,
    ) -> Option<ModerationAction> {
        let retention = Duration::seconds(self.settings.retention_secs as i64);
        self.kills
            .retain(|(_, seen)| at.signed_duration_since(*seen) < retention);
        self.kills.push_back((pos, at));

        let nearby = self
            .kills
            .iter()
            .filter(|(other, _)| other.distance_to(&pos) <= self.settings.radius)
            .count();
        if nearby != self.settings.threshold {
            return None;
        }

        let label = locations.describe(&pos);
        info!("🔥 Hotzone detected {label} ({nearby} kills)");
        Some(ModerationAction::alert(
            Recipient::Public,
            format!("🔥 Hotzone: {nearby} kills {label} in the last {} minutes", self.settings.retention_secs / 60),
        ))
    }

    pub fn tracked_kills(&self) -> usize {
        self.kills.len()
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
    fn test_third_kill_alerts_once() {
        let locations = LocationTable::default();
        let mut tracker = HotzoneTracker::new(HotzoneSettings::default());

        assert!(tracker.record_kill(GroundPos::new(6500.0, 2500.0), at(0), &locations).is_none());
        assert!(tracker.record_kill(GroundPos::new(6600.0, 2500.0), at(60), &locations).is_none());

        let alert = tracker.record_kill(GroundPos::new(6500.0, 2600.0), at(120), &locations);
        match alert {
            Some(ModerationAction::Alert { recipient, message }) => {
                assert_eq!(recipient, Recipient::Public);
                assert!(message.contains("Chernogorsk"), "{message}");
            }
            other => panic!("expected a public alert, got {other:?}"),
        }

        assert!(tracker.record_kill(GroundPos::new(6550.0, 2550.0), at(180), &locations).is_none());
    }

    #[test]
    fn test_spread_out_kills_do_not_alert() {
        let locations = LocationTable::default();
        let mut tracker = HotzoneTracker::new(HotzoneSettings::default());
        assert!(tracker.record_kill(GroundPos::new(0.0, 0.0), at(0), &locations).is_none());
        assert!(tracker.record_kill(GroundPos::new(2000.0, 0.0), at(10), &locations).is_none());
        assert!(tracker.record_kill(GroundPos::new(4000.0, 0.0), at(20), &locations).is_none());
    }

    #[test]
    fn test_old_kills_expire() {
        let locations = LocationTable::default();
        let mut tracker = HotzoneTracker::new(HotzoneSettings::default());
        tracker.record_kill(GroundPos::new(0.0, 0.0), at(0), &locations);
        tracker.record_kill(GroundPos::new(10.0, 0.0), at(10), &locations);
        assert!(tracker
            .record_kill(GroundPos::new(20.0, 0.0), at(2000), &locations)
            .is_none());
        assert_eq!(tracker.tracked_kills(), 1);
    }

    #[test]
    fn test_kill_at_retention_boundary_has_expired() {
        let locations = LocationTable::default();
        let mut tracker = HotzoneTracker::new(HotzoneSettings::default());
        tracker.record_kill(GroundPos::new(0.0, 0.0), at(0), &locations);
        tracker.record_kill(GroundPos::new(10.0, 0.0), at(100), &locations);
        assert!(tracker
            .record_kill(GroundPos::new(20.0, 0.0), at(900), &locations)
            .is_none());
        assert_eq!(tracker.tracked_kills(), 2);
    }
}
