//! Challenge Strategies
//!
//! Issuing a challenge to another club member and answering one.

use super::{adopt_created, remote_failure};
use crate::db::Database;
use crate::sync::models::{ExecutionOutcome, Operation, OperationPayload};
use crate::sync::registry::SyncStrategy;
use crate::sync::remote::RemoteStore;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;

const ENTITY: &str = "challenge";

fn valid_response(response: &str) -> bool {
    matches!(response, "accepted" | "declined")
}

// ============================================================================
// Create
// ============================================================================

pub struct ChallengeCreateStrategy {
    db: Database,
    remote: Arc<dyn RemoteStore>,
}

impl ChallengeCreateStrategy {
    pub fn new(db: Database, remote: Arc<dyn RemoteStore>) -> Self {
        Self { db, remote }
    }
}

#[async_trait]
impl SyncStrategy for ChallengeCreateStrategy {
    fn entity(&self) -> &'static str {
        ENTITY
    }

    fn operation_name(&self) -> &'static str {
        "create_challenge"
    }

    fn validate(&self, payload: &OperationPayload) -> bool {
        match payload {
            OperationPayload::CreateChallenge(p) => {
                !p.club_id.is_empty()
                    && !p.challenger_id.is_empty()
                    && !p.challenged_id.is_empty()
                    // A member cannot challenge themselves
                    && p.challenger_id != p.challenged_id
            }
            _ => false,
        }
    }

    fn transform(&self, payload: OperationPayload) -> OperationPayload {
        match payload {
            OperationPayload::CreateChallenge(mut p) => {
                if p.proposed_at.is_none() {
                    p.proposed_at = Some(Utc::now());
                }
                OperationPayload::CreateChallenge(p)
            }
            other => other,
        }
    }

    async fn execute(&self, op: &Operation) -> ExecutionOutcome {
        let OperationPayload::CreateChallenge(p) = &op.payload else {
            return ExecutionOutcome::permanent("Payload does not match create_challenge");
        };

        let mut record = match serde_json::to_value(p) {
            Ok(record) => record,
            Err(e) => return ExecutionOutcome::permanent(format!("Unserializable payload: {e}")),
        };
        record["status"] = json!("pending");

        let created = match self.remote.insert(ENTITY, &record).await {
            Ok(created) => created,
            Err(e) => return remote_failure("Challenge creation failed", e),
        };

        if let Err(e) = adopt_created(
            &self.db,
            ENTITY,
            op.metadata.local_id.as_deref(),
            &created,
        ) {
            log::error!("Mirror write failed for created challenge: {e}");
        }

        ExecutionOutcome::ok(Some(created))
    }
}

// ============================================================================
// Respond
// ============================================================================

pub struct ChallengeRespondStrategy {
    db: Database,
    remote: Arc<dyn RemoteStore>,
}

impl ChallengeRespondStrategy {
    pub fn new(db: Database, remote: Arc<dyn RemoteStore>) -> Self {
        Self { db, remote }
    }
}

#[async_trait]
impl SyncStrategy for ChallengeRespondStrategy {
    fn entity(&self) -> &'static str {
        ENTITY
    }

    fn operation_name(&self) -> &'static str {
        "respond_challenge"
    }

    fn validate(&self, payload: &OperationPayload) -> bool {
        matches!(
            payload,
            OperationPayload::RespondChallenge(p)
                if !p.challenge_id.is_empty() && valid_response(&p.response)
        )
    }

    async fn execute(&self, op: &Operation) -> ExecutionOutcome {
        let OperationPayload::RespondChallenge(p) = &op.payload else {
            return ExecutionOutcome::permanent("Payload does not match respond_challenge");
        };

        let fields = json!({"status": p.response});
        let updated = match self.remote.update(ENTITY, &p.challenge_id, &fields).await {
            Ok(updated) => updated,
            Err(e) => return remote_failure("Challenge response failed", e),
        };

        if let Err(e) = self.db.upsert_record(ENTITY, &p.challenge_id, &updated) {
            log::error!(
                "Mirror write failed for challenge {}: {e}",
                p.challenge_id
            );
        }

        ExecutionOutcome::ok(Some(updated))
    }
}

// ============================================================================
// Tests
// ============================================================================
