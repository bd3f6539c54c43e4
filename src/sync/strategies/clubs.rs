//! Club Membership Strategies
//!
//! Joining and leaving a club act on the `club_member` entity. Membership
//! records are keyed by a composite `{club_id}:{user_id}` id on both the
//! remote store and the local mirror, so leave operations can address the
//! record without a lookup.

use super::remote_failure;
use crate::db::Database;
use crate::sync::models::{ExecutionOutcome, Operation, OperationPayload};
use crate::sync::registry::SyncStrategy;
use crate::sync::remote::{RemoteError, RemoteStore};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

const MEMBER_ENTITY: &str = "club_member";

pub(crate) fn membership_id(club_id: &str, user_id: &str) -> String {
    format!("{club_id}:{user_id}")
}

// ============================================================================
// Join
// ============================================================================

pub struct ClubJoinStrategy {
    db: Database,
    remote: Arc<dyn RemoteStore>,
}

impl ClubJoinStrategy {
    pub fn new(db: Database, remote: Arc<dyn RemoteStore>) -> Self {
        Self { db, remote }
    }
}

#[async_trait]
impl SyncStrategy for ClubJoinStrategy {
    fn entity(&self) -> &'static str {
        "club"
    }

    fn operation_name(&self) -> &'static str {
        "join_club"
    }

    fn validate(&self, payload: &OperationPayload) -> bool {
        matches!(
            payload,
            OperationPayload::JoinClub(p) if !p.club_id.is_empty() && !p.user_id.is_empty()
        )
    }

    /// Default role for new members
    fn transform(&self, payload: OperationPayload) -> OperationPayload {
        match payload {
            OperationPayload::JoinClub(mut p) => {
                if p.role.is_none() {
                    p.role = Some("member".to_string());
                }
                OperationPayload::JoinClub(p)
            }
            other => other,
        }
    }

    async fn execute(&self, op: &Operation) -> ExecutionOutcome {
        let OperationPayload::JoinClub(p) = &op.payload else {
            return ExecutionOutcome::permanent("Payload does not match join_club");
        };

        let id = membership_id(&p.club_id, &p.user_id);
        let record = json!({
            "id": id,
            "club_id": p.club_id,
            "user_id": p.user_id,
            "role": p.role,
        });

        let created = match self.remote.insert(MEMBER_ENTITY, &record).await {
            Ok(created) => created,
            // Already a member: adopt the existing membership
            Err(RemoteError::Conflict(_)) => {
                log::info!("Membership {id} already exists remotely");
                record.clone()
            }
            Err(e) => return remote_failure("Club join failed", e),
        };

        if let Err(e) = self.db.upsert_record(MEMBER_ENTITY, &id, &created) {
            log::error!("Mirror write failed for membership {id}: {e}");
        }

        ExecutionOutcome::ok(Some(created))
    }
}

// ============================================================================
// Leave
// ============================================================================

pub struct ClubLeaveStrategy {
    db: Database,
    remote: Arc<dyn RemoteStore>,
}

impl ClubLeaveStrategy {
    pub fn new(db: Database, remote: Arc<dyn RemoteStore>) -> Self {
        Self { db, remote }
    }
}

#[async_trait]
impl SyncStrategy for ClubLeaveStrategy {
    fn entity(&self) -> &'static str {
        "club"
    }

    fn operation_name(&self) -> &'static str {
        "leave_club"
    }

    fn validate(&self, payload: &OperationPayload) -> bool {
        matches!(
            payload,
            OperationPayload::LeaveClub(p) if !p.club_id.is_empty() && !p.user_id.is_empty()
        )
    }

    async fn execute(&self, op: &Operation) -> ExecutionOutcome {
        let OperationPayload::LeaveClub(p) = &op.payload else {
            return ExecutionOutcome::permanent("Payload does not match leave_club");
        };

        let id = membership_id(&p.club_id, &p.user_id);

        match self.remote.delete(MEMBER_ENTITY, &id).await {
            Ok(()) => {}
            Err(RemoteError::NotFound(_)) => {
                log::info!("Membership {id} already removed remotely");
            }
            Err(e) => return remote_failure("Club leave failed", e),
        }

        if let Err(e) = self.db.delete_record(MEMBER_ENTITY, &id) {
            log::error!("Mirror delete failed for membership {id}: {e}");
        }

        ExecutionOutcome::ok(None)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::super::testing::MockRemote;
    use super::*;
    use crate::sync::models::{ClubJoinPayload, ClubLeavePayload, OperationMetadata};

    fn join_payload() -> OperationPayload {
        OperationPayload::JoinClub(ClubJoinPayload {
            club_id: "c1".to_string(),
            user_id: "u1".to_string(),
            role: None,
        })
    }

    #[test]
    fn test_transform_defaults_role() {
        let db = Database::in_memory().unwrap();
        let strategy = ClubJoinStrategy::new(db, Arc::new(MockRemote::default()));

        let OperationPayload::JoinClub(p) = strategy.transform(join_payload()) else {
            panic!("variant changed");
        };
        assert_eq!(p.role.as_deref(), Some("member"));

        let explicit = OperationPayload::JoinClub(ClubJoinPayload {
            club_id: "c1".to_string(),
            user_id: "u1".to_string(),
            role: Some("admin".to_string()),
        });
        let OperationPayload::JoinClub(p) = strategy.transform(explicit) else {
            panic!("variant changed");
        };
        assert_eq!(p.role.as_deref(), Some("admin"));
    }

    #[tokio::test]
    async fn test_join_then_leave_round_trip() {
        let db = Database::in_memory().unwrap();
        let remote = Arc::new(MockRemote::default());

        let join = ClubJoinStrategy::new(db.clone(), remote.clone());
        let op = Operation::new(join.transform(join_payload()), OperationMetadata::default());
        assert!(join.execute(&op).await.success);

        assert!(db.get_record("club_member", "c1:u1").unwrap().is_some());
        assert!(remote.get("club_member", "c1:u1").is_some());

        let leave = ClubLeaveStrategy::new(db.clone(), remote.clone());
        let op = Operation::new(
            OperationPayload::LeaveClub(ClubLeavePayload {
                club_id: "c1".to_string(),
                user_id: "u1".to_string(),
            }),
            OperationMetadata::default(),
        );
        assert!(leave.execute(&op).await.success);

        assert!(db.get_record("club_member", "c1:u1").unwrap().is_none());
        assert!(remote.get("club_member", "c1:u1").is_none());
    }

    #[tokio::test]
    async fn test_join_adopts_existing_membership() {
        let db = Database::in_memory().unwrap();
        let remote = Arc::new(MockRemote::default());
        remote.seed(
            "club_member",
            "c1:u1",
            serde_json::json!({"id": "c1:u1", "club_id": "c1", "user_id": "u1", "role": "member"}),
        );

        let join = ClubJoinStrategy::new(db.clone(), remote.clone());
        let op = Operation::new(join.transform(join_payload()), OperationMetadata::default());

        let outcome = join.execute(&op).await;
        assert!(outcome.success);

        // The membership lands in the local mirror despite the remote conflict
        assert!(db.get_record("club_member", "c1:u1").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_leave_tolerates_missing_membership() {
        let db = Database::in_memory().unwrap();
        let leave = ClubLeaveStrategy::new(db, Arc::new(MockRemote::default()));

        let op = Operation::new(
            OperationPayload::LeaveClub(ClubLeavePayload {
                club_id: "c1".to_string(),
                user_id: "ghost".to_string(),
            }),
            OperationMetadata::default(),
        );

        assert!(leave.execute(&op).await.success);
    }
}
