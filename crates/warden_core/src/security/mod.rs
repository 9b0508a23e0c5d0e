//! Anti-cheat and base protection.
//!
//! The [`AntiCheatEngine`] classifies placements, pickups and combat events
//! against the territory index and emits [`ModerationAction`]s. It owns its
//! sliding windows; nothing here is shared across tasks.

pub mod construction;
pub mod window;

pub use construction::{check_placement, matches_any, normalize_item, Placement};
pub use window::SlidingWindow;

use crate::config::RuleSettings;
use crate::enforcement::{ModerationAction, Recipient};
use crate::events::{Event, ParsedEvent};
use crate::geo::{LocationTable, TerritoryIndex};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    /// Permanent ban
    Critical,
    /// Ban pending operator review
    Serious,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "CRITICAL",
            Severity::Serious => "SERIOUS",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CRITICAL" => Ok(Severity::Critical),
            "SERIOUS" => Ok(Severity::Serious),
            other => Err(format!("unknown severity '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Violation {
    BannedType {
        item: String,
    },
    ExcessiveHeight {
        item: String,
        y: f64,
        ceiling: f64,
    },
    Underground {
        item: String,
        y: f64,
    },
    BannedInTerritory {
        item: String,
        territory: String,
    },
    UnauthorizedInTerritory {
        item: String,
        territory: String,
        owner_id: String,
        group_id: Option<String>,
    },
    Duplication {
        item: String,
        item_id: String,
        count: usize,
    },
    LagMachine {
        item: String,
        count: usize,
    },
}

impl Violation {
    pub fn kind(&self) -> &'static str {
        match self {
            Violation::BannedType { .. } => "banned_type",
            Violation::ExcessiveHeight { .. } => "excessive_height",
            Violation::Underground { .. } => "underground",
            Violation::BannedInTerritory { .. } => "banned_in_territory",
            Violation::UnauthorizedInTerritory { .. } => "unauthorized_in_territory",
            Violation::Duplication { .. } => "duplication",
            Violation::LagMachine { .. } => "lag_machine",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            Violation::BannedType { .. } => Severity::Serious,
            _ => Severity::Critical,
        }
    }

    /// Text written next to the ban.
    pub fn reason(&self) -> String {
        match self {
            Violation::BannedType { item } => format!("banned construction: {item}"),
            Violation::ExcessiveHeight { item, y, ceiling } => {
                format!("{item} placed at height {y:.0} above ceiling {ceiling:.0}")
            }
            Violation::Underground { item, y } => format!("{item} placed under the map at {y:.0}"),
            Violation::BannedInTerritory { item, territory } => {
                format!("{item} is banned inside territories ({territory})")
            }
            Violation::UnauthorizedInTerritory { item, territory, .. } => {
                format!("unauthorized {item} inside territory {territory}")
            }
            Violation::Duplication { item, item_id, count } => {
                format!("item duplication: {item} (id={item_id}) picked up {count} times")
            }
            Violation::LagMachine { item, count } => {
                format!("lag machine: {count} {item} placed within the spam window")
            }
        }
    }
}

pub struct AntiCheatEngine {
    rules: RuleSettings,
    placements: SlidingWindow<String>,
    pickups: SlidingWindow<(String, String)>,
}

impl AntiCheatEngine {
    pub fn new(rules: RuleSettings) -> Self {
        Self {
            placements: SlidingWindow::new(Duration::seconds(rules.spam_window_secs as i64)),
            pickups: SlidingWindow::new(Duration::seconds(rules.duplication_window_secs as i64)),
            rules,
        }
    }

    pub fn update_rules(&mut self, rules: RuleSettings) {
        self.placements
            .set_window(Duration::seconds(rules.spam_window_secs as i64));
        self.pickups
            .set_window(Duration::seconds(rules.duplication_window_secs as i64));
        self.rules = rules;
    }

    pub fn rules(&self) -> &RuleSettings {
        &self.rules
    }

    /// Classifies one event. Returns the actions to deliver, in order.
    pub fn evaluate(
        &mut self,
        parsed: &ParsedEvent,
        index: &TerritoryIndex,
        locations: &LocationTable,
    ) -> Vec<ModerationAction> {
        let mut actions = Vec::new();
        let at = parsed.occurred_at;

        match &parsed.event {
            Event::Placement { player, item, x, y, z } => {
                let violation = self.check_spam(player, item, at).or_else(|| {
                    check_placement(
                        &self.rules,
                        index,
                        locations,
                        Placement { player, item, x: *x, y: *y, z: *z },
                    )
                });
                if let Some(violation) = violation {
                    self.sanction(player, violation, &mut actions);
                }
            }
            Event::Pickup {
                player,
                item,
                item_id: Some(item_id),
            } => {
                let count = self
                    .pickups
                    .record((player.to_lowercase(), item_id.clone()), at);
                if count == self.rules.duplication_threshold + 1 {
                    let violation = Violation::Duplication {
                        item: item.clone(),
                        item_id: item_id.clone(),
                        count,
                    };
                    self.sanction(player, violation, &mut actions);
                }
            }
            Event::Kill { killer, victim, position: Some(pos), .. } => {
                for territory in index.containing(pos) {
                    let message = format!(
                        "⚔️ {killer} killed {victim} inside your territory {} {}",
                        territory.name,
                        locations.describe(pos)
                    );
                    intrusion_alerts(territory.owner_id.as_str(), territory.group_id.as_deref(), &message, &mut actions);
                }
            }
            Event::Death { victim, position: Some(pos) } => {
                for territory in index.containing(pos) {
                    let message = format!(
                        "💀 {victim} died inside your territory {} {}",
                        territory.name,
                        locations.describe(pos)
                    );
                    intrusion_alerts(territory.owner_id.as_str(), territory.group_id.as_deref(), &message, &mut actions);
                }
            }
            _ => {}
        }

        actions
    }

    /// Flags the placement that first pushes a player over the spam threshold.
    fn check_spam(&mut self, player: &str, item: &str, at: DateTime<Utc>) -> Option<Violation> {
        if !matches_any(item, &self.rules.spam_items) {
            return None;
        }
        let count = self.placements.record(player.to_lowercase(), at);
        debug!("{player} placed {item} ({count} in window)");
        (count == self.rules.spam_threshold + 1).then(|| Violation::LagMachine {
            item: item.to_string(),
            count,
        })
    }

    fn sanction(&self, player: &str, violation: Violation, actions: &mut Vec<ModerationAction>) {
        let reason = violation.reason();
        warn!("🚨 [{}] {player}: {reason}", violation.severity());

        actions.push(ModerationAction::alert(
            Recipient::Operators,
            format!("🚨 [{}] {player}: {reason}", violation.severity()),
        ));
        if let Violation::UnauthorizedInTerritory { territory, owner_id, .. } = &violation {
            actions.push(ModerationAction::alert(
                Recipient::Account(owner_id.clone()),
                format!("🏗️ {player} tried to build inside your territory {territory}"),
            ));
        }
        actions.push(ModerationAction::Ban {
            identity: player.to_string(),
            reason,
            violation,
        });
    }

    /// Drops expired window entries.
    pub fn cleanup(&mut self, now: DateTime<Utc>) {
        self.placements.cleanup(now);
        self.pickups.cleanup(now);
    }
}

fn intrusion_alerts(
    owner_id: &str,
    group_id: Option<&str>,
    message: &str,
    actions: &mut Vec<ModerationAction>,
) {
    actions.push(ModerationAction::alert(
        Recipient::Account(owner_id.to_string()),
        message,
    ));
    if let Some(group) = group_id {
        actions.push(ModerationAction::alert(
            Recipient::Group(group.to_string()),
            message,
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{GroundPos, LogLine};
    use crate::geo::{Registry, Territory};
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 11, 24, 12, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn parsed(event: Event, secs: i64) -> ParsedEvent {
        ParsedEvent {
            origin: LogLine::new("logs/a.ADM", secs as u64, ""),
            occurred_at: at(secs),
            event,
        }
    }

    fn pickup(id: &str, secs: i64) -> ParsedEvent {
        parsed(
            Event::Pickup {
                player: "Duper".to_string(),
                item: "M4A1".to_string(),
                item_id: Some(id.to_string()),
            },
            secs,
        )
    }

    fn fence(secs: i64) -> ParsedEvent {
        parsed(
            Event::Placement {
                player: "Spammer".to_string(),
                item: "Fence Kit".to_string(),
                x: 15000.0,
                y: 10.0,
                z: 0.0,
            },
            secs,
        )
    }

    fn bans(actions: &[ModerationAction]) -> Vec<&Violation> {
        actions
            .iter()
            .filter_map(|action| match action {
                ModerationAction::Ban { violation, .. } => Some(violation),
                _ => None,
            })
            .collect()
    }

    fn engine() -> (AntiCheatEngine, TerritoryIndex, LocationTable) {
        let index = TerritoryIndex::new(Registry {
            territories: vec![Territory {
                id: "t1".to_string(),
                owner_id: "acc-owner".to_string(),
                group_id: Some("clan-a".to_string()),
                name: "Fort".to_string(),
                x: 200.0,
                z: 200.0,
                radius: 100.0,
                grants: vec![],
            }],
            members: vec![],
        });
        (AntiCheatEngine::new(RuleSettings::default()), index, LocationTable::default())
    }

    #[test]
    fn test_third_pickup_within_window_flags_duplication() {
        let (mut engine, index, locations) = engine();
        assert!(engine.evaluate(&pickup("777", 0), &index, &locations).is_empty());
        assert!(engine.evaluate(&pickup("777", 60), &index, &locations).is_empty());

        let actions = engine.evaluate(&pickup("777", 120), &index, &locations);
        assert!(matches!(bans(&actions).as_slice(), [Violation::Duplication { count: 3, .. }]));
    }

    #[test]
    fn test_spread_out_pickups_never_flag() {
        let (mut engine, index, locations) = engine();
        for secs in [0, 60, 400] {
            assert!(engine.evaluate(&pickup("777", secs), &index, &locations).is_empty());
        }
    }

    #[test]
    fn test_pickups_without_id_are_ignored() {
        let (mut engine, index, locations) = engine();
        for secs in 0..5 {
            let event = parsed(
                Event::Pickup { player: "Looter".to_string(), item: "Apple".to_string(), item_id: None },
                secs,
            );
            assert!(engine.evaluate(&event, &index, &locations).is_empty());
        }
    }

    #[test]
    fn test_lag_machine_flags_once() {
        let (mut engine, index, locations) = engine();
        for secs in 0..10 {
            assert!(engine.evaluate(&fence(secs), &index, &locations).is_empty());
        }
        let actions = engine.evaluate(&fence(10), &index, &locations);
        assert_eq!(bans(&actions).len(), 1);
        assert_eq!(bans(&actions)[0].severity(), Severity::Critical);
        assert!(bans(&engine.evaluate(&fence(11), &index, &locations)).is_empty());
    }

    #[test]
    fn test_unauthorized_build_alerts_owner_and_operators() {
        let (mut engine, index, locations) = engine();
        let event = parsed(
            Event::Placement {
                player: "Raider".to_string(),
                item: "Wall".to_string(),
                x: 210.0,
                y: 5.0,
                z: 190.0,
            },
            0,
        );
        let actions = engine.evaluate(&event, &index, &locations);
        assert_eq!(actions.len(), 3);
        assert!(actions.contains(&ModerationAction::alert(
            Recipient::Account("acc-owner".to_string()),
            "🏗️ Raider tried to build inside your territory Fort",
        )));
    }

    #[test]
    fn test_kill_inside_territory_alerts_owner_and_group() {
        let (mut engine, index, locations) = engine();
        let event = parsed(
            Event::Kill {
                killer: "Raider".to_string(),
                victim: "Owner".to_string(),
                weapon: "SKS".to_string(),
                distance: 10.0,
                position: Some(GroundPos::new(220.0, 220.0)),
            },
            0,
        );
        let actions = engine.evaluate(&event, &index, &locations);
        let recipients: Vec<_> = actions
            .iter()
            .filter_map(|action| match action {
                ModerationAction::Alert { recipient, .. } => Some(recipient.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(
            recipients,
            vec![Recipient::Account("acc-owner".to_string()), Recipient::Group("clan-a".to_string())]
        );
    }

    #[test]
    fn test_kill_without_position_is_not_an_intrusion() {
        let (mut engine, index, locations) = engine();
        let event = parsed(
            Event::Kill {
                killer: "Raider".to_string(),
                victim: "Owner".to_string(),
                weapon: "SKS".to_string(),
                distance: 10.0,
                position: None,
            },
            0,
        );
        assert!(engine.evaluate(&event, &index, &locations).is_empty());
    }
}
