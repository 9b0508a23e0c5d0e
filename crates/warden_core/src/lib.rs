//! # Warden core
//!
//! Ingestion and failover pipeline for game server administration logs.
//!
//! A [`service::WardenService`] tails the active log through a
//! [`tail::RemoteTransport`], parses new lines into [`events::Event`]s and
//! feeds them to the anti-cheat engine, the hotzone tracker and the reward
//! dispatcher. Two instances (primary and backup) share one durable store;
//! the [`failover::FailoverCoordinator`] decides which of them is serving.
//!
//! ## Modules
//!
//! * [`tail`] - cursor-based incremental reads and rotation handling
//! * [`parser`] - raw lines to typed events
//! * [`security`] - construction legality, duplication and lag machines
//! * [`hotzone`] - kill density alerts
//! * [`rewards`] - economy effects with a durable local queue
//! * [`failover`] - heartbeats, takeover and reconciliation
//! * [`store`] - durable store seams and the in-memory backend

pub mod config;
pub mod enforcement;
pub mod error;
pub mod events;
pub mod failover;
pub mod geo;
pub mod health;
pub mod hotzone;
pub mod parser;
pub mod pipeline;
pub mod rewards;
pub mod security;
pub mod service;
pub mod shutdown;
pub mod store;
pub mod tail;

pub use config::{ResumePolicy, WardenSettings};
pub use enforcement::{BanListEnforcer, Enforcer, LogEnforcer, ModerationAction, Recipient};
pub use error::{StoreError, TransportError, WardenError};
pub use events::{Event, GroundPos, LogLine, ParsedEvent};
pub use failover::{Decision, FailoverCoordinator, Phase};
pub use geo::{LocationTable, TerritoryIndex};
pub use service::{SettingsSource, WardenService};
pub use shutdown::ShutdownState;
pub use store::{MemoryStore, Role, Stores};
pub use tail::{FtpConfig, FtpTransport, LocalDirTransport, MemoryTransport, RemoteTransport};
