//! Spatial lookups: territories with their member roster, and named locations.

pub mod locations;
pub mod territory;

pub use locations::{chernarus, LocationTable, NamedLocation};
pub use territory::{Member, Registry, Territory, TerritoryIndex};
