//! Construction legality rules.

use super::Violation;
use crate::config::RuleSettings;
use crate::events::GroundPos;
use crate::geo::{LocationTable, TerritoryIndex};

/// Lowercases and drops separators so `Fence Kit`, `fence_kit` and
/// `FenceKit` all compare equal.
pub fn normalize_item(item: &str) -> String {
    item.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

pub fn matches_any(item: &str, list: &[String]) -> bool {
    let item = normalize_item(item);
    list.iter()
        .map(|entry| normalize_item(entry))
        .any(|entry| !entry.is_empty() && item.contains(&entry))
}

/// A single placement to check.
#[derive(Debug, Clone, Copy)]
pub struct Placement<'a> {
    pub player: &'a str,
    pub item: &'a str,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Applies the construction rules in order; the first failing rule wins.
pub fn check_placement(
    rules: &RuleSettings,
    index: &TerritoryIndex,
    locations: &LocationTable,
    placement: Placement<'_>,
) -> Option<Violation> {
    let item = placement.item.to_string();
    let pos = GroundPos::new(placement.x, placement.z);

    if matches_any(placement.item, &rules.banned_types) {
        return Some(Violation::BannedType { item });
    }

    let context_ceiling = if locations.is_urban(&pos) {
        rules.urban_ceiling
    } else {
        rules.wilderness_ceiling
    };
    let ceiling = context_ceiling.min(rules.absolute_max_height);
    if placement.y > ceiling {
        return Some(Violation::ExcessiveHeight {
            item,
            y: placement.y,
            ceiling,
        });
    }

    if placement.y < rules.min_height {
        return Some(Violation::Underground {
            item,
            y: placement.y,
        });
    }

    let territories = index.containing(&pos);
    if territories.is_empty() {
        return None;
    }

    if matches_any(placement.item, &rules.territory_banned_items) {
        return Some(Violation::BannedInTerritory {
            item,
            territory: territories[0].name.clone(),
        });
    }

    let member = index.member(placement.player);
    territories
        .into_iter()
        .find(|territory| !member.is_some_and(|member| territory.authorizes(member)))
        .map(|territory| Violation::UnauthorizedInTerritory {
            item,
            territory: territory.name.clone(),
            owner_id: territory.owner_id.clone(),
            group_id: territory.group_id.clone(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::{Member, Registry, Territory};

    fn index() -> TerritoryIndex {
        TerritoryIndex::new(Registry {
            territories: vec![
                Territory {
                    id: "t1".to_string(),
                    owner_id: "acc-owner".to_string(),
                    group_id: Some("clan-a".to_string()),
                    name: "Owner Base".to_string(),
                    x: 200.0,
                    z: 200.0,
                    radius: 100.0,
                    grants: vec![],
                },
                Territory {
                    id: "t2".to_string(),
                    owner_id: "acc-neighbour".to_string(),
                    group_id: None,
                    name: "Neighbour Base".to_string(),
                    x: 350.0,
                    z: 200.0,
                    radius: 100.0,
                    grants: vec![],
                },
            ],
            members: vec![
                Member { player: "Owner".to_string(), account_id: "acc-owner".to_string(), group_id: Some("clan-a".to_string()) },
                Member { player: "Mate".to_string(), account_id: "acc-mate".to_string(), group_id: Some("clan-a".to_string()) },
                Member { player: "Stranger".to_string(), account_id: "acc-x".to_string(), group_id: None },
            ],
        })
    }

    fn place<'a>(player: &'a str, item: &'a str, x: f64, y: f64, z: f64) -> Placement<'a> {
        Placement { player, item, x, y, z }
    }

    fn check(placement: Placement<'_>) -> Option<Violation> {
        check_placement(&RuleSettings::default(), &index(), &LocationTable::default(), placement)
    }

    #[test]
    fn test_normalize_item() {
        assert_eq!(normalize_item("Fence Kit"), "fencekit");
        assert!(matches_any("Improvised_Shelter", &["improvisedshelter".to_string()]));
        assert!(!matches_any("Tent", &[String::new()]));
    }

    #[test]
    fn test_banned_type_wins_first() {
        assert!(matches!(
            check(place("Owner", "GardenPlot", 200.0, 5000.0, 200.0)),
            Some(Violation::BannedType { .. })
        ));
    }

    #[test]
    fn test_height_ceilings() {
        // Chernogorsk is urban
        assert!(matches!(
            check(place("Anyone", "Wall", 6500.0, 150.0, 2500.0)),
            Some(Violation::ExcessiveHeight { ceiling, .. }) if ceiling == 120.0
        ));
        assert!(check(place("Anyone", "Wall", 15000.0, 150.0, 0.0)).is_none());
        assert!(matches!(
            check(place("Anyone", "Wall", 15000.0, 501.0, 0.0)),
            Some(Violation::ExcessiveHeight { ceiling, .. }) if ceiling == 500.0
        ));
        assert!(matches!(
            check(place("Anyone", "Wall", 15000.0, -11.0, 0.0)),
            Some(Violation::Underground { .. })
        ));
    }

    #[test]
    fn test_hard_banned_item_illegal_for_owner() {
        assert!(matches!(
            check(place("Owner", "Wheel", 200.0, 10.0, 200.0)),
            Some(Violation::BannedInTerritory { .. })
        ));
        // Outside any territory the same item is fine
        assert!(check(place("Owner", "Wheel", 15000.0, 10.0, 0.0)).is_none());
    }

    #[test]
    fn test_authorization() {
        assert!(check(place("Owner", "Wall", 200.0, 10.0, 200.0)).is_none());
        assert!(check(place("Mate", "Wall", 200.0, 10.0, 200.0)).is_none());
        assert!(matches!(
            check(place("Stranger", "Wall", 200.0, 10.0, 200.0)),
            Some(Violation::UnauthorizedInTerritory { ref owner_id, .. }) if owner_id == "acc-owner"
        ));
        assert!(matches!(
            check(place("Unknown Player", "Wall", 200.0, 10.0, 200.0)),
            Some(Violation::UnauthorizedInTerritory { .. })
        ));
    }

    #[test]
    fn test_overlap_requires_every_territory() {
        // (280, 200) is inside both bases; the owner is not authorized next door
        assert!(matches!(
            check(place("Owner", "Wall", 280.0, 10.0, 200.0)),
            Some(Violation::UnauthorizedInTerritory { ref territory, .. }) if territory == "Neighbour Base"
        ));
    }
}
