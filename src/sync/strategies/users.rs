//! Profile Strategy
//!
//! Partial profile edits with snapshot-based conflict detection, same flow
//! as match updates.

use super::remote_failure;
use crate::db::Database;
use crate::sync::conflict;
use crate::sync::models::{ExecutionOutcome, Operation, OperationPayload};
use crate::sync::registry::SyncStrategy;
use crate::sync::remote::RemoteStore;
use async_trait::async_trait;
use std::sync::Arc;

const ENTITY: &str = "user";

pub struct ProfileUpdateStrategy {
    db: Database,
    remote: Arc<dyn RemoteStore>,
}

impl ProfileUpdateStrategy {
    pub fn new(db: Database, remote: Arc<dyn RemoteStore>) -> Self {
        Self { db, remote }
    }
}

#[async_trait]
impl SyncStrategy for ProfileUpdateStrategy {
    fn entity(&self) -> &'static str {
        ENTITY
    }

    fn operation_name(&self) -> &'static str {
        "update_profile"
    }

    fn validate(&self, payload: &OperationPayload) -> bool {
        match payload {
            OperationPayload::UpdateProfile(p) => {
                !p.user_id.is_empty()
                    && p.fields.as_object().map(|o| !o.is_empty()).unwrap_or(false)
            }
            _ => false,
        }
    }

    async fn execute(&self, op: &Operation) -> ExecutionOutcome {
        let OperationPayload::UpdateProfile(p) = &op.payload else {
            return ExecutionOutcome::permanent("Payload does not match update_profile");
        };

        let remote_record = match self.remote.fetch(ENTITY, &p.user_id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                return ExecutionOutcome::permanent(format!(
                    "Profile {} does not exist remotely",
                    p.user_id
                ))
            }
            Err(e) => return remote_failure("Profile fetch failed", e),
        };

        let final_record = if conflict::is_remote_newer(p.snapshot_updated_at, &remote_record) {
            let resolution = conflict::resolve(
                p.conflict_policy,
                &format!("profile {}", p.user_id),
                &p.fields,
                &remote_record,
            );
            match resolution.push_fields {
                Some(fields) => match self.remote.update(ENTITY, &p.user_id, &fields).await {
                    Ok(updated) => updated,
                    Err(e) => return remote_failure("Profile update failed", e),
                },
                None => resolution.record,
            }
        } else {
            match self.remote.update(ENTITY, &p.user_id, &p.fields).await {
                Ok(updated) => updated,
                Err(e) => return remote_failure("Profile update failed", e),
            }
        };

        if let Err(e) = self.db.upsert_record(ENTITY, &p.user_id, &final_record) {
            log::error!("Mirror write failed for profile {}: {e}", p.user_id);
        }

        ExecutionOutcome::ok(Some(final_record))
    }
}
