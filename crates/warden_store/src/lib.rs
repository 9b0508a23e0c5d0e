//! # Warden store
//!
//! SQLite backend shared by the primary and backup instances. Both processes
//! open the same database file; WAL mode and a busy timeout let them write
//! concurrently without a coordinator.

pub mod sqlite;

pub use sqlite::SqliteStore;
