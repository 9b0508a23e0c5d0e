//! Named map locations used for urban height ceilings and alert labels.

use crate::events::GroundPos;
use serde::{Deserialize, Serialize};

/// Within this distance a point is reported as being in a location.
const IN_LOCATION: f64 = 600.0;
/// Within this distance a point is reported as being near a location.
const NEAR_LOCATION: f64 = 2000.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedLocation {
    pub name: String,
    pub x: f64,
    pub z: f64,
    /// Towns get the tighter urban construction ceiling
    #[serde(default)]
    pub urban: bool,
}

impl NamedLocation {
    fn new(name: &str, x: f64, z: f64, urban: bool) -> Self {
        Self {
            name: name.to_string(),
            x,
            z,
            urban,
        }
    }

    pub fn center(&self) -> GroundPos {
        GroundPos::new(self.x, self.z)
    }
}

/// Default Chernarus gazetteer.
pub fn chernarus() -> Vec<NamedLocation> {
    vec![
        NamedLocation::new("NWAF", 4600.0, 10000.0, false),
        NamedLocation::new("Berezino", 12000.0, 9000.0, true),
        NamedLocation::new("Chernogorsk", 6500.0, 2500.0, true),
        NamedLocation::new("Elektrozavodsk", 10500.0, 2300.0, true),
        NamedLocation::new("Krasnostav", 11000.0, 12300.0, true),
        NamedLocation::new("Stary Sobor", 6000.0, 7700.0, true),
        NamedLocation::new("Vybor", 3800.0, 8900.0, true),
        NamedLocation::new("Zelenogorsk", 2700.0, 5300.0, true),
        NamedLocation::new("Tisy Military", 1700.0, 14000.0, false),
        NamedLocation::new("Balota AF", 4500.0, 2500.0, false),
        NamedLocation::new("Svetlojarsk", 13900.0, 13300.0, true),
        NamedLocation::new("Novodmitrovsk", 11500.0, 14500.0, true),
        NamedLocation::new("Severograd", 8400.0, 13700.0, true),
        NamedLocation::new("Gorka", 9500.0, 8800.0, true),
        NamedLocation::new("Kabanino", 5300.0, 8600.0, true),
        NamedLocation::new("Grishino", 7200.0, 9700.0, true),
        NamedLocation::new("Pavlovo", 1700.0, 3800.0, true),
        NamedLocation::new("Kamenka", 1800.0, 2200.0, true),
        NamedLocation::new("Myshkino", 2000.0, 7300.0, true),
        NamedLocation::new("VMC", 4500.0, 8300.0, false),
    ]
}

#[derive(Debug, Clone)]
pub struct LocationTable {
    locations: Vec<NamedLocation>,
    urban_radius: f64,
}

impl LocationTable {
    pub fn new(locations: Vec<NamedLocation>, urban_radius: f64) -> Self {
        Self {
            locations,
            urban_radius,
        }
    }

    pub fn nearest(&self, pos: &GroundPos) -> Option<(&NamedLocation, f64)> {
        self.locations
            .iter()
            .map(|location| (location, location.center().distance_to(pos)))
            .min_by(|a, b| a.1.total_cmp(&b.1))
    }

    /// True when `pos` lies within the urban radius of any town.
    pub fn is_urban(&self, pos: &GroundPos) -> bool {
        self.locations
            .iter()
            .filter(|location| location.urban)
            .any(|location| location.center().distance_to(pos) <= self.urban_radius)
    }

    /// Human-readable label such as `in Berezino` or `near Gorka (850m)`.
    pub fn describe(&self, pos: &GroundPos) -> String {
        match self.nearest(pos) {
            Some((location, dist)) if dist < IN_LOCATION => format!("in {}", location.name),
            Some((location, dist)) if dist < NEAR_LOCATION => {
                format!("near {} ({dist:.0}m)", location.name)
            }
            _ => "in the wilderness".to_string(),
        }
    }
}

impl Default for LocationTable {
    fn default() -> Self {
        Self::new(chernarus(), 600.0)
    }
}
