//! # Courtside Sync
//!
//! Offline-first sync engine for the Courtside tennis club app.
//!
//! Mutations made while offline are captured as durable queue operations
//! and replayed against the remote store once connectivity returns, in the
//! order they were made, with exponential-backoff retries and a dead-letter
//! bucket for operations that cannot succeed. A local SQLite mirror holds
//! the last confirmed server state per entity.
//!
//! The entry point is [`sync::SyncOrchestrator`]:
//!
//! ```no_run
//! use std::path::PathBuf;
//! use std::sync::Arc;
//! use courtside_sync::db::Database;
//! use courtside_sync::sync::{HttpRemoteStore, SyncConfig, SyncOrchestrator};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::new(PathBuf::from("courtside.db"))?;
//! let remote = Arc::new(HttpRemoteStore::new("https://api.courtside.example/v1")?);
//! let sync = SyncOrchestrator::new(db, remote, SyncConfig::default())?;
//! # Ok(())
//! # }
//! ```

pub mod db;
pub mod sync;

pub use db::Database;
pub use sync::{SyncConfig, SyncError, SyncOrchestrator, SyncStatus};
