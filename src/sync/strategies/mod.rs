//! Built-in Sync Strategies
//!
//! One strategy per (entity, operation) pair. Every strategy follows the
//! same shape: cheap structural validation, an optional idempotent payload
//! transform at enqueue time, then remote execution followed by a local
//! mirror write. The mirror is derived state rebuilt from confirmed remote
//! records, so a mirror write failure after a successful remote call is
//! logged but never triggers a second remote call.

pub mod challenges;
pub mod clubs;
pub mod invitations;
pub mod matches;
pub mod users;

pub use challenges::{ChallengeCreateStrategy, ChallengeRespondStrategy};
pub use clubs::{ClubJoinStrategy, ClubLeaveStrategy};
pub use invitations::{
    InvitationCancelStrategy, InvitationConfirmStrategy, InvitationCreateStrategy,
    InvitationRespondStrategy,
};
pub use matches::{MatchCreateStrategy, MatchDeleteStrategy, MatchUpdateStrategy};
pub use users::ProfileUpdateStrategy;

use super::manager::QueueManager;
use super::models::ExecutionOutcome;
use super::registry::RegistryError;
use super::remote::{RemoteError, RemoteStore};
use crate::db::Database;
use serde_json::Value;
use std::sync::Arc;

/// Register every built-in strategy on the manager
pub fn register_builtin(
    manager: &QueueManager,
    db: Database,
    remote: Arc<dyn RemoteStore>,
) -> Result<(), RegistryError> {
    manager.register_strategy(Arc::new(MatchCreateStrategy::new(
        db.clone(),
        remote.clone(),
    )))?;
    manager.register_strategy(Arc::new(MatchUpdateStrategy::new(
        db.clone(),
        remote.clone(),
    )))?;
    manager.register_strategy(Arc::new(MatchDeleteStrategy::new(
        db.clone(),
        remote.clone(),
    )))?;
    manager.register_strategy(Arc::new(ClubJoinStrategy::new(db.clone(), remote.clone())))?;
    manager.register_strategy(Arc::new(ClubLeaveStrategy::new(db.clone(), remote.clone())))?;
    manager.register_strategy(Arc::new(ProfileUpdateStrategy::new(
        db.clone(),
        remote.clone(),
    )))?;
    manager.register_strategy(Arc::new(ChallengeCreateStrategy::new(
        db.clone(),
        remote.clone(),
    )))?;
    manager.register_strategy(Arc::new(ChallengeRespondStrategy::new(
        db.clone(),
        remote.clone(),
    )))?;
    manager.register_strategy(Arc::new(InvitationCreateStrategy::new(
        db.clone(),
        remote.clone(),
    )))?;
    manager.register_strategy(Arc::new(InvitationRespondStrategy::new(
        db.clone(),
        remote.clone(),
    )))?;
    manager.register_strategy(Arc::new(InvitationCancelStrategy::new(
        db.clone(),
        remote.clone(),
    )))?;
    manager.register_strategy(Arc::new(InvitationConfirmStrategy::new(db, remote)))?;

    Ok(())
}

/// Map a remote error to an execution outcome, preserving retryability
pub(crate) fn remote_failure(context: &str, error: RemoteError) -> ExecutionOutcome {
    let message = format!("{context}: {error}");
    if error.is_retryable() {
        ExecutionOutcome::retryable(message)
    } else {
        ExecutionOutcome::permanent(message)
    }
}

/// Mirror a freshly created record, replacing any provisional local row.
///
/// Offline creates are mirrored under a client-generated id before the
/// remote id exists. Once the remote store confirms the insert, the
/// provisional row is dropped and the record re-keyed under the remote id.
pub(crate) fn adopt_created(
    db: &Database,
    entity: &str,
    local_id: Option<&str>,
    record: &Value,
) -> Result<(), crate::db::DbError> {
    let remote_id = record.get("id").and_then(Value::as_str);

    let id = match (remote_id, local_id) {
        (Some(remote), Some(local)) => {
            if remote != local {
                db.delete_record(entity, local)?;
            }
            remote
        }
        (Some(remote), None) => remote,
        (None, Some(local)) => local,
        (None, None) => {
            log::warn!("Created {entity} record carries no id, skipping mirror write");
            return Ok(());
        }
    };

    db.upsert_record(entity, id, record)
}

// ============================================================================
// Test Support
// ============================================================================
