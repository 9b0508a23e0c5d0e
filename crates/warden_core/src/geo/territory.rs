//! Territory registry and member roster.

use crate::error::WardenError;
use crate::events::GroundPos;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// A radius-bounded ownership zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Territory {
    pub id: String,
    /// Account that owns the territory
    pub owner_id: String,
    #[serde(default)]
    pub group_id: Option<String>,
    pub name: String,
    pub x: f64,
    pub z: f64,
    pub radius: f64,
    /// Accounts explicitly allowed to build here
    #[serde(default)]
    pub grants: Vec<String>,
}

impl Territory {
    pub fn center(&self) -> GroundPos {
        GroundPos::new(self.x, self.z)
    }

    pub fn contains(&self, pos: &GroundPos) -> bool {
        self.center().distance_to(pos) <= self.radius
    }

    /// Owner, then explicit grants, then the owner's group.
    pub fn authorizes(&self, member: &Member) -> bool {
        if member.account_id == self.owner_id || self.grants.contains(&member.account_id) {
            return true;
        }
        matches!(
            (&self.group_id, &member.group_id),
            (Some(territory_group), Some(member_group)) if territory_group == member_group
        )
    }
}

/// Links an in-game name to an account and an optional group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub player: String,
    pub account_id: String,
    #[serde(default)]
    pub group_id: Option<String>,
}

/// On-disk registry format.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Registry {
    #[serde(default)]
    pub territories: Vec<Territory>,
    #[serde(default)]
    pub members: Vec<Member>,
}

/// Read-only lookup structure rebuilt whenever the registry is refreshed.
#[derive(Debug, Clone, Default)]
pub struct TerritoryIndex {
    territories: Vec<Territory>,
    members: HashMap<String, Member>,
}

impl TerritoryIndex {
    pub fn new(registry: Registry) -> Self {
        let members = registry
            .members
            .into_iter()
            .map(|member| (member.player.to_lowercase(), member))
            .collect();
        Self {
            territories: registry.territories,
            members,
        }
    }

    /// Loads a registry from a JSON file.
    pub async fn load_json(path: &Path) -> Result<Self, WardenError> {
        let content = tokio::fs::read_to_string(path).await.map_err(|err| {
            WardenError::Config(format!("cannot read registry {}: {err}", path.display()))
        })?;
        let registry: Registry = serde_json::from_str(&content).map_err(|err| {
            WardenError::Config(format!("invalid registry {}: {err}", path.display()))
        })?;
        Ok(Self::new(registry))
    }

    /// All territories whose radius covers `pos`.
    pub fn containing(&self, pos: &GroundPos) -> Vec<&Territory> {
        self.territories
            .iter()
            .filter(|territory| territory.contains(pos))
            .collect()
    }

    pub fn member(&self, player: &str) -> Option<&Member> {
        self.members.get(&player.to_lowercase())
    }

    pub fn territory_count(&self) -> usize {
        self.territories.len()
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }
}
