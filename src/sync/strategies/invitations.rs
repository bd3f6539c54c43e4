//! Invitation Strategies
//!
//! Match invitations with per-participant responses. Participant records
//! are keyed `{invitation_id}:{participant_id}`, mirroring the composite
//! scheme used for club memberships.
//!
//! Confirmation touches the invitation and every named participant as one
//! logical transaction: forward steps apply in order and any failure rolls
//! back the already-applied steps in reverse, restoring the statuses read
//! before the first write.

use super::{adopt_created, remote_failure};
use crate::db::Database;
use crate::sync::models::{ExecutionOutcome, Operation, OperationPayload};
use crate::sync::registry::SyncStrategy;
use crate::sync::remote::{RemoteError, RemoteStore};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

const ENTITY: &str = "invitation";
const PARTICIPANT_ENTITY: &str = "invitation_participant";

fn participant_id(invitation_id: &str, user_id: &str) -> String {
    format!("{invitation_id}:{user_id}")
}

fn valid_response(response: &str) -> bool {
    matches!(response, "accepted" | "declined")
}

// ============================================================================
// Create
// ============================================================================

pub struct InvitationCreateStrategy {
    db: Database,
    remote: Arc<dyn RemoteStore>,
}

impl InvitationCreateStrategy {
    pub fn new(db: Database, remote: Arc<dyn RemoteStore>) -> Self {
        Self { db, remote }
    }
}

#[async_trait]
impl SyncStrategy for InvitationCreateStrategy {
    fn entity(&self) -> &'static str {
        ENTITY
    }

    fn operation_name(&self) -> &'static str {
        "create_invitation"
    }

    fn validate(&self, payload: &OperationPayload) -> bool {
        match payload {
            OperationPayload::CreateInvitation(p) => {
                if p.club_id.is_empty() || p.inviter_id.is_empty() || p.invitee_ids.is_empty() {
                    return false;
                }
                // Singles needs exactly one opponent; doubles up to three
                // further players
                match p.match_type.as_str() {
                    "singles" => p.invitee_ids.len() == 1,
                    "doubles" => p.invitee_ids.len() <= 3,
                    _ => false,
                }
            }
            _ => false,
        }
    }

    async fn execute(&self, op: &Operation) -> ExecutionOutcome {
        let OperationPayload::CreateInvitation(p) = &op.payload else {
            return ExecutionOutcome::permanent("Payload does not match create_invitation");
        };

        let mut record = match serde_json::to_value(p) {
            Ok(record) => record,
            Err(e) => return ExecutionOutcome::permanent(format!("Unserializable payload: {e}")),
        };
        record["status"] = json!("pending");

        let created = match self.remote.insert(ENTITY, &record).await {
            Ok(created) => created,
            Err(e) => return remote_failure("Invitation creation failed", e),
        };

        if let Err(e) = adopt_created(
            &self.db,
            ENTITY,
            op.metadata.local_id.as_deref(),
            &created,
        ) {
            log::error!("Mirror write failed for created invitation: {e}");
        }

        // Mirror one pending participant row per invitee so responses have a
        // local record to land on
        if let Some(invitation_id) = created.get("id").and_then(Value::as_str) {
            for invitee in &p.invitee_ids {
                let pid = participant_id(invitation_id, invitee);
                let row = json!({
                    "id": pid,
                    "invitation_id": invitation_id,
                    "user_id": invitee,
                    "status": "pending",
                });
                if let Err(e) = self.db.upsert_record(PARTICIPANT_ENTITY, &pid, &row) {
                    log::error!("Mirror write failed for participant {pid}: {e}");
                }
            }
        }

        ExecutionOutcome::ok(Some(created))
    }
}

// ============================================================================
// Respond
// ============================================================================

pub struct InvitationRespondStrategy {
    db: Database,
    remote: Arc<dyn RemoteStore>,
}

impl InvitationRespondStrategy {
    pub fn new(db: Database, remote: Arc<dyn RemoteStore>) -> Self {
        Self { db, remote }
    }
}

#[async_trait]
impl SyncStrategy for InvitationRespondStrategy {
    fn entity(&self) -> &'static str {
        ENTITY
    }

    fn operation_name(&self) -> &'static str {
        "respond_invitation"
    }

    fn validate(&self, payload: &OperationPayload) -> bool {
        matches!(
            payload,
            OperationPayload::RespondInvitation(p)
                if !p.invitation_id.is_empty()
                    && !p.participant_id.is_empty()
                    && valid_response(&p.response)
        )
    }

    async fn execute(&self, op: &Operation) -> ExecutionOutcome {
        let OperationPayload::RespondInvitation(p) = &op.payload else {
            return ExecutionOutcome::permanent("Payload does not match respond_invitation");
        };

        let pid = participant_id(&p.invitation_id, &p.participant_id);
        let fields = json!({"status": p.response});

        let updated = match self.remote.update(PARTICIPANT_ENTITY, &pid, &fields).await {
            Ok(updated) => updated,
            Err(e) => return remote_failure("Invitation response failed", e),
        };

        if let Err(e) = self.db.upsert_record(PARTICIPANT_ENTITY, &pid, &updated) {
            log::error!("Mirror write failed for participant {pid}: {e}");
        }

        ExecutionOutcome::ok(Some(updated))
    }
}

// ============================================================================
// Cancel
// ============================================================================

pub struct InvitationCancelStrategy {
    db: Database,
    remote: Arc<dyn RemoteStore>,
}

impl InvitationCancelStrategy {
    pub fn new(db: Database, remote: Arc<dyn RemoteStore>) -> Self {
        Self { db, remote }
    }
}

#[async_trait]
impl SyncStrategy for InvitationCancelStrategy {
    fn entity(&self) -> &'static str {
        ENTITY
    }

    fn operation_name(&self) -> &'static str {
        "cancel_invitation"
    }

    fn validate(&self, payload: &OperationPayload) -> bool {
        matches!(
            payload,
            OperationPayload::CancelInvitation(p) if !p.invitation_id.is_empty()
        )
    }

    async fn execute(&self, op: &Operation) -> ExecutionOutcome {
        let OperationPayload::CancelInvitation(p) = &op.payload else {
            return ExecutionOutcome::permanent("Payload does not match cancel_invitation");
        };

        let fields = json!({"status": "cancelled"});
        match self.remote.update(ENTITY, &p.invitation_id, &fields).await {
            Ok(updated) => {
                if let Err(e) = self.db.upsert_record(ENTITY, &p.invitation_id, &updated) {
                    log::error!(
                        "Mirror write failed for invitation {}: {e}",
                        p.invitation_id
                    );
                }
                ExecutionOutcome::ok(Some(updated))
            }
            // Deleted remotely: the cancellation it expressed already holds
            Err(RemoteError::NotFound(_)) => {
                log::info!("Invitation {} already gone remotely", p.invitation_id);
                if let Err(e) = self.db.delete_record(ENTITY, &p.invitation_id) {
                    log::error!(
                        "Mirror delete failed for invitation {}: {e}",
                        p.invitation_id
                    );
                }
                ExecutionOutcome::ok(None)
            }
            Err(e) => remote_failure("Invitation cancellation failed", e),
        }
    }
}

// ============================================================================
// Confirm (multi-record transaction)
// ============================================================================

/// One forward step of the confirmation transaction
#[derive(Debug, Clone, Copy)]
enum ConfirmStep {
    Invitation,
    Participant(usize),
}

pub struct InvitationConfirmStrategy {
    db: Database,
    remote: Arc<dyn RemoteStore>,
}

impl InvitationConfirmStrategy {
    pub fn new(db: Database, remote: Arc<dyn RemoteStore>) -> Self {
        Self { db, remote }
    }

    fn step_target<'a>(
        step: ConfirmStep,
        invitation_id: &'a str,
        participant_ids: &'a [String],
    ) -> (&'static str, String) {
        match step {
            ConfirmStep::Invitation => (ENTITY, invitation_id.to_string()),
            ConfirmStep::Participant(i) => (
                PARTICIPANT_ENTITY,
                participant_id(invitation_id, &participant_ids[i]),
            ),
        }
    }

    /// Restore the statuses of already-applied steps, newest first. Returns
    /// the first rollback error, if any.
    async fn rollback(
        &self,
        applied: &[ConfirmStep],
        originals: &[Value],
        invitation_id: &str,
        participant_ids: &[String],
    ) -> Option<String> {
        for (idx, step) in applied.iter().enumerate().rev() {
            let (entity, id) = Self::step_target(*step, invitation_id, participant_ids);
            let status = originals[idx]
                .get("status")
                .cloned()
                .unwrap_or_else(|| json!("pending"));

            if let Err(e) = self.remote.update(entity, &id, &json!({"status": status})).await {
                return Some(format!("rollback failed for {entity} {id}: {e}"));
            }
        }
        None
    }
}

#[async_trait]
impl SyncStrategy for InvitationConfirmStrategy {
    fn entity(&self) -> &'static str {
        ENTITY
    }

    fn operation_name(&self) -> &'static str {
        "confirm_invitation"
    }

    fn validate(&self, payload: &OperationPayload) -> bool {
        matches!(
            payload,
            OperationPayload::ConfirmInvitation(p)
                if !p.invitation_id.is_empty() && !p.participant_ids.is_empty()
        )
    }

    async fn execute(&self, op: &Operation) -> ExecutionOutcome {
        let OperationPayload::ConfirmInvitation(p) = &op.payload else {
            return ExecutionOutcome::permanent("Payload does not match confirm_invitation");
        };

        // Snapshot every record first; the snapshots are the rollback state
        let steps: Vec<ConfirmStep> = std::iter::once(ConfirmStep::Invitation)
            .chain((0..p.participant_ids.len()).map(ConfirmStep::Participant))
            .collect();

        let mut snapshots = Vec::with_capacity(steps.len());
        for step in &steps {
            let (entity, id) = Self::step_target(*step, &p.invitation_id, &p.participant_ids);
            match self.remote.fetch(entity, &id).await {
                Ok(Some(record)) => snapshots.push(record),
                Ok(None) => {
                    return ExecutionOutcome::permanent(format!(
                        "{entity} {id} does not exist remotely, cannot confirm"
                    ))
                }
                Err(e) => return remote_failure("Confirmation pre-read failed", e),
            }
        }

        // Forward pass
        let mut applied: Vec<ConfirmStep> = Vec::with_capacity(steps.len());
        let mut confirmed: Vec<Value> = Vec::with_capacity(steps.len());
        let confirm = json!({"status": "confirmed"});

        for step in &steps {
            let (entity, id) = Self::step_target(*step, &p.invitation_id, &p.participant_ids);
            match self.remote.update(entity, &id, &confirm).await {
                Ok(updated) => {
                    applied.push(*step);
                    confirmed.push(updated);
                }
                Err(e) => {
                    let retryable = e.is_retryable();
                    let mut error = format!("Confirmation failed at {entity} {id}: {e}");

                    if let Some(rollback_error) = self
                        .rollback(&applied, &snapshots, &p.invitation_id, &p.participant_ids)
                        .await
                    {
                        // Remote state is now inconsistent; surface both
                        // failures so the dead-letter entry tells the whole
                        // story
                        log::error!("Confirmation rollback incomplete: {rollback_error}");
                        error = format!("{error}; {rollback_error}");
                    }

                    return if retryable {
                        ExecutionOutcome::retryable(error)
                    } else {
                        ExecutionOutcome::permanent(error)
                    };
                }
            }
        }

        // All steps applied: mirror the confirmed records
        for (step, record) in steps.iter().zip(&confirmed) {
            let (entity, id) = Self::step_target(*step, &p.invitation_id, &p.participant_ids);
            if let Err(e) = self.db.upsert_record(entity, &id, record) {
                log::error!("Mirror write failed for {entity} {id}: {e}");
            }
        }

        ExecutionOutcome::ok(Some(confirmed[0].clone()))
    }
}

// ============================================================================
// Tests
// ============================================================================
