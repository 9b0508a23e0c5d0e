//! Line-to-event parser for administration logs.
//!
//! Matching is marker based and case-insensitive. A line produces at most one
//! event; lines that match nothing are ignored silently, lines that match a
//! marker but lack the data the event needs are reported as [`ParseIssue`]s
//! and dropped by [`parse_batch`].

use crate::events::{Event, GroundPos, LogLine, ParsedEvent};
use chrono::{DateTime, Duration, NaiveTime, Utc};
use tracing::{debug, warn};

const SUICIDE: &str = "committed suicide";
const KILLED_BY: &str = "killed by";
const DIED: &str = "died";
const PLACED: &str = "placed";
const PICKED_UP: &str = "picked up";
const CONNECTED: &str = "is connected";
const DISCONNECTED: &str = "has been disconnected";

/// Why a line that looked like an event was dropped.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseIssue {
    #[error("no player name could be extracted")]
    MissingPlayer,

    #[error("construction line without a coordinate group")]
    MissingCoordinates,
}

/// Parses a batch of lines in order. `observed_at` anchors the `HH:MM:SS`
/// clock prefix of each line to a full timestamp.
pub fn parse_batch(lines: &[LogLine], observed_at: DateTime<Utc>) -> Vec<ParsedEvent> {
    let mut events = Vec::with_capacity(lines.len() / 4);

    for line in lines {
        let (clock, body) = split_clock(&line.text);
        match parse_body(body) {
            Ok(Some(event)) => events.push(ParsedEvent {
                origin: line.clone(),
                occurred_at: clock
                    .map(|time| resolve_clock(observed_at, time))
                    .unwrap_or(observed_at),
                event,
            }),
            Ok(None) => {}
            Err(ParseIssue::MissingCoordinates) => {
                warn!("⚠️ Dropping construction line at {}:{}: {}", line.path, line.offset, line.text);
            }
            Err(issue) => {
                debug!("Dropping ambiguous line at {}:{} ({issue})", line.path, line.offset);
            }
        }
    }

    events
}

/// Parses a single raw line, clock prefix included.
pub fn parse_line(text: &str) -> Result<Option<Event>, ParseIssue> {
    parse_body(split_clock(text).1)
}

fn parse_body(text: &str) -> Result<Option<Event>, ParseIssue> {
    // Markers are ASCII so byte offsets in the lowered copy match the original.
    let lower = text.to_ascii_lowercase();

    if lower.contains(SUICIDE) {
        return Ok(None);
    }

    if let Some(idx) = lower.find(KILLED_BY) {
        return parse_kill(text, &lower, idx).map(Some);
    }

    if lower.contains(DIED) {
        let victim = player_name(text).ok_or(ParseIssue::MissingPlayer)?;
        return Ok(Some(Event::Death {
            victim,
            position: first_coords(text).map(|(x, _, z)| GroundPos::new(x, z)),
        }));
    }

    if let Some(idx) = lower.find(PLACED) {
        let player = player_name(&text[..idx]).ok_or(ParseIssue::MissingPlayer)?;
        let rest = &text[idx + PLACED.len()..];
        let (x, y, z) = first_coords(rest).ok_or(ParseIssue::MissingCoordinates)?;
        return Ok(Some(Event::Placement {
            player,
            item: placed_item(rest),
            x,
            y,
            z,
        }));
    }

    if let Some(idx) = lower.find(PICKED_UP) {
        let player = player_name(&text[..idx]).ok_or(ParseIssue::MissingPlayer)?;
        let rest = &text[idx + PICKED_UP.len()..];
        let item = quoted(rest)
            .map(|(item, _)| item)
            .unwrap_or_else(|| "unknown".to_string());
        return Ok(Some(Event::Pickup {
            player,
            item,
            item_id: item_instance_id(rest),
        }));
    }

    if lower.contains(DISCONNECTED) {
        let player = player_name(text).ok_or(ParseIssue::MissingPlayer)?;
        return Ok(Some(Event::Logout { player }));
    }

    if lower.contains(CONNECTED) {
        let player = player_name(text).ok_or(ParseIssue::MissingPlayer)?;
        return Ok(Some(Event::Login { player }));
    }

    Ok(None)
}

fn parse_kill(text: &str, lower: &str, idx: usize) -> Result<Event, ParseIssue> {
    let victim = player_name(&text[..idx]).ok_or(ParseIssue::MissingPlayer)?;
    let position = first_coords(text).map(|(x, _, z)| GroundPos::new(x, z));
    let after = &text[idx + KILLED_BY.len()..];

    // Only player kills pay out; infected, animals and the environment count as deaths.
    let Some(killer) = player_name(after) else {
        return Ok(Event::Death { victim, position });
    };

    let after_lower = &lower[idx + KILLED_BY.len()..];
    Ok(Event::Kill {
        killer,
        victim,
        weapon: weapon(after, after_lower),
        distance: distance(after, after_lower),
        position,
    })
}

/// Splits a leading `HH:MM:SS | ` clock prefix off a line.
fn split_clock(text: &str) -> (Option<NaiveTime>, &str) {
    if let Some((head, body)) = text.split_once(" | ") {
        if let Ok(time) = NaiveTime::parse_from_str(head.trim(), "%H:%M:%S") {
            return (Some(time), body);
        }
    }
    (None, text)
}

/// Anchors a wall clock time to the day it was observed on. A clock that is
/// ahead of the observation time belongs to the previous day.
fn resolve_clock(observed_at: DateTime<Utc>, time: NaiveTime) -> DateTime<Utc> {
    let candidate = observed_at.date_naive().and_time(time).and_utc();
    if candidate > observed_at + Duration::minutes(5) {
        candidate - Duration::days(1)
    } else {
        candidate
    }
}

/// Name following the first `Player` token, quoted or bare.
fn player_name(segment: &str) -> Option<String> {
    let idx = segment.to_ascii_lowercase().find("player")?;
    let rest = segment[idx + "player".len()..].trim_start();

    let name = if let Some(stripped) = rest.strip_prefix('"') {
        stripped.split('"').next().unwrap_or_default()
    } else {
        rest.split(|c: char| c.is_whitespace() || c == '(').next().unwrap_or_default()
    };

    let name = name.trim();
    (!name.is_empty()).then(|| name.to_string())
}

/// First `"..."` in `segment` and the byte index just past its closing quote.
fn quoted(segment: &str) -> Option<(String, usize)> {
    let start = segment.find('"')? + 1;
    let len = segment[start..].find('"')?;
    let value = segment[start..start + len].trim();
    (!value.is_empty()).then(|| (value.to_string(), start + len + 1))
}

fn placed_item(rest: &str) -> String {
    let coords_at = rest.find('<').unwrap_or(rest.len());
    if let Some((item, end)) = quoted(rest) {
        if end <= coords_at {
            return item;
        }
    }

    let head = &rest[..coords_at];
    let head = head
        .trim_end()
        .strip_suffix(" at")
        .unwrap_or(head)
        .trim();
    if head.is_empty() {
        "unknown".to_string()
    } else {
        head.to_string()
    }
}

/// Trailing `(id=...)` after the item name; the player id precedes the marker.
fn item_instance_id(rest: &str) -> Option<String> {
    let start = rest.rfind("(id=")? + "(id=".len();
    let end = rest[start..].find(')')?;
    let id = rest[start..start + end].trim();
    (!id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric()))
        .then(|| id.to_string())
}

fn weapon(after: &str, after_lower: &str) -> String {
    let Some(idx) = after_lower.find(" with ") else {
        return "unknown".to_string();
    };
    let rest = &after[idx + " with ".len()..];
    let rest_lower = &after_lower[idx + " with ".len()..];
    let end = [" from ", "<", "(", " at "]
        .iter()
        .filter_map(|stop| rest_lower.find(stop))
        .min()
        .unwrap_or(rest.len());

    let name = rest[..end].trim().trim_matches('"');
    if name.is_empty() {
        "unknown".to_string()
    } else {
        name.to_string()
    }
}

fn distance(after: &str, after_lower: &str) -> f64 {
    let start = after_lower
        .find(" from ")
        .map(|idx| idx + " from ".len())
        .or_else(|| after_lower.find("distance=").map(|idx| idx + "distance=".len()));

    start
        .and_then(|start| {
            after[start..]
                .split(|c: char| c.is_whitespace() || c == ')' || c == ',')
                .next()
        })
        .and_then(|token| token.parse::<f64>().ok())
        .unwrap_or(0.0)
}

/// First `<x, y, z>` group in the segment.
fn first_coords(segment: &str) -> Option<(f64, f64, f64)> {
    let start = segment.find('<')? + 1;
    let len = segment[start..].find('>')?;
    let mut parts = segment[start..start + len]
        .split(',')
        .map(|part| part.trim().parse::<f64>());

    let x = parts.next()?.ok()?;
    let y = parts.next()?.ok()?;
    let z = parts.next()?.ok()?;
    parts.next().is_none().then_some((x, y, z))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_kill_line() {
        let line = r#"12:00:00 | Player "Survivor" (id=AbC=) killed by Player "Bandit" (id=XyZ=) with M4A1 from 120.5 meters <1000.0, 200.0, 3000.0>"#;
        let event = parse_line(line).unwrap().unwrap();
        assert_eq!(
            event,
            Event::Kill {
                killer: "Bandit".to_string(),
                victim: "Survivor".to_string(),
                weapon: "M4A1".to_string(),
                distance: 120.5,
                position: Some(GroundPos::new(1000.0, 3000.0)),
            }
        );
    }

    #[test]
    fn test_kill_without_coordinates_or_weapon() {
        let line = r#"Player "Survivor" (12345) killed by Player "Bandit" (67890)"#;
        match parse_line(line).unwrap().unwrap() {
            Event::Kill { weapon, distance, position, .. } => {
                assert_eq!(weapon, "unknown");
                assert_eq!(distance, 0.0);
                assert!(position.is_none());
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_environment_kill_is_a_death() {
        let line = r#"Player "Survivor" (DEAD) (id=1 pos=<10.0, 5.0, 20.0>) killed by Infected"#;
        assert_eq!(
            parse_line(line).unwrap(),
            Some(Event::Death {
                victim: "Survivor".to_string(),
                position: Some(GroundPos::new(10.0, 20.0)),
            })
        );
    }

    #[test]
    fn test_suicide_is_ignored() {
        let line = r#"Player "Sad" (id=1) committed suicide"#;
        assert_eq!(parse_line(line), Ok(None));
    }

    #[test]
    fn test_death_line() {
        let line = r#"Player "Lonely" (DEAD) (id=1 pos=<1.0, 2.0, 3.0>) died. Stats> Water: 0 Energy: 0"#;
        assert!(matches!(parse_line(line), Ok(Some(Event::Death { .. }))));
    }

    #[test]
    fn test_placement_line() {
        let line = r#"20:00:00 | Player "Glitcher" (id=Unknown) placed "GardenPlot" at <1000, 100, 1000>"#;
        assert_eq!(
            parse_line(line).unwrap(),
            Some(Event::Placement {
                player: "Glitcher".to_string(),
                item: "GardenPlot".to_string(),
                x: 1000.0,
                y: 100.0,
                z: 1000.0,
            })
        );
    }

    #[test]
    fn test_placement_with_bare_item() {
        let line = r#"Player "Builder" (id=1) placed Fence Kit at <5.0, 12.5, 6.0>"#;
        match parse_line(line).unwrap().unwrap() {
            Event::Placement { item, y, .. } => {
                assert_eq!(item, "Fence Kit");
                assert_eq!(y, 12.5);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_placement_without_coordinates_is_dropped() {
        let line = r#"Player "Builder" (id=1) placed "FenceKit" at <broken>"#;
        assert_eq!(parse_line(line), Err(ParseIssue::MissingCoordinates));
    }

    #[test]
    fn test_pickup_captures_item_instance() {
        let line = r#"Player "Duper" (id=PlayerId=) picked up "M4A1" (id=12345)"#;
        assert_eq!(
            parse_line(line).unwrap(),
            Some(Event::Pickup {
                player: "Duper".to_string(),
                item: "M4A1".to_string(),
                item_id: Some("12345".to_string()),
            })
        );

        let no_id = r#"Player "Looter" (id=abc=) picked up "Apple""#;
        match parse_line(no_id).unwrap().unwrap() {
            Event::Pickup { item_id, .. } => assert!(item_id.is_none()),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_connection_lines() {
        assert_eq!(
            parse_line(r#"10:00:00 | Player "Jogador Alfa" (id=123 ip=1.1.1.1) is connected"#).unwrap(),
            Some(Event::Login { player: "Jogador Alfa".to_string() })
        );
        assert_eq!(
            parse_line(r#"10:15:00 | Player "Jogador Alfa" has been disconnected"#).unwrap(),
            Some(Event::Logout { player: "Jogador Alfa".to_string() })
        );
    }

    #[test]
    fn test_unrelated_and_ambiguous_lines() {
        assert_eq!(parse_line("AdminLog started on 2025-11-24 at 10:00:00"), Ok(None));
        assert_eq!(parse_line("Someone is connected"), Err(ParseIssue::MissingPlayer));
    }

    #[test]
    fn test_batch_resolves_clock_and_keeps_order() {
        let observed = Utc.with_ymd_and_hms(2025, 11, 24, 0, 2, 0).unwrap();
        let lines = vec![
            LogLine::new("/a.ADM", 0, r#"23:59:00 | Player "Late" is connected"#),
            LogLine::new("/a.ADM", 40, "noise"),
            LogLine::new("/a.ADM", 46, r#"00:01:00 | Player "Late" has been disconnected"#),
        ];

        let events = parse_batch(&lines, observed);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].occurred_at, Utc.with_ymd_and_hms(2025, 11, 23, 23, 59, 0).unwrap());
        assert_eq!(events[1].occurred_at, Utc.with_ymd_and_hms(2025, 11, 24, 0, 1, 0).unwrap());
        assert_eq!(events[1].origin.offset, 46);
    }
}
