//! Match Strategies
//!
//! Create, update and delete for recorded match results. Updates carry the
//! snapshot timestamp the edit was built from and run through conflict
//! resolution when the remote record has moved on since.

use super::{adopt_created, remote_failure};
use crate::db::Database;
use crate::sync::conflict;
use crate::sync::models::{ExecutionOutcome, Operation, OperationPayload};
use crate::sync::registry::SyncStrategy;
use crate::sync::remote::{RemoteError, RemoteStore};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;

const ENTITY: &str = "match";

fn valid_match_type(match_type: &str) -> bool {
    matches!(match_type, "singles" | "doubles")
}

// ============================================================================
// Create
// ============================================================================

pub struct MatchCreateStrategy {
    db: Database,
    remote: Arc<dyn RemoteStore>,
}

impl MatchCreateStrategy {
    pub fn new(db: Database, remote: Arc<dyn RemoteStore>) -> Self {
        Self { db, remote }
    }
}

#[async_trait]
impl SyncStrategy for MatchCreateStrategy {
    fn entity(&self) -> &'static str {
        ENTITY
    }

    fn operation_name(&self) -> &'static str {
        "create_match"
    }

    fn validate(&self, payload: &OperationPayload) -> bool {
        match payload {
            OperationPayload::CreateMatch(p) => {
                !p.club_id.is_empty() && !p.scores.is_empty() && valid_match_type(&p.match_type)
            }
            _ => false,
        }
    }

    /// Default the played-at timestamp to enqueue time; a payload that
    /// already carries one passes through unchanged
    fn transform(&self, payload: OperationPayload) -> OperationPayload {
        match payload {
            OperationPayload::CreateMatch(mut p) => {
                if p.played_at.is_none() {
                    p.played_at = Some(Utc::now());
                }
                OperationPayload::CreateMatch(p)
            }
            other => other,
        }
    }

    async fn execute(&self, op: &Operation) -> ExecutionOutcome {
        let OperationPayload::CreateMatch(p) = &op.payload else {
            return ExecutionOutcome::permanent("Payload does not match create_match");
        };

        let record = match serde_json::to_value(p) {
            Ok(record) => record,
            Err(e) => return ExecutionOutcome::permanent(format!("Unserializable payload: {e}")),
        };

        let created = match self.remote.insert(ENTITY, &record).await {
            Ok(created) => created,
            Err(e) => return remote_failure("Match creation failed", e),
        };

        if let Err(e) = adopt_created(
            &self.db,
            ENTITY,
            op.metadata.local_id.as_deref(),
            &created,
        ) {
            log::error!("Mirror write failed for created match: {e}");
        }

        ExecutionOutcome::ok(Some(created))
    }
}

// ============================================================================
// Update
// ============================================================================

pub struct MatchUpdateStrategy {
    db: Database,
    remote: Arc<dyn RemoteStore>,
}

impl MatchUpdateStrategy {
    pub fn new(db: Database, remote: Arc<dyn RemoteStore>) -> Self {
        Self { db, remote }
    }
}

#[async_trait]
impl SyncStrategy for MatchUpdateStrategy {
    fn entity(&self) -> &'static str {
        ENTITY
    }

    fn operation_name(&self) -> &'static str {
        "update_match"
    }

    fn validate(&self, payload: &OperationPayload) -> bool {
        match payload {
            OperationPayload::UpdateMatch(p) => {
                !p.id.is_empty()
                    && p.fields.as_object().map(|o| !o.is_empty()).unwrap_or(false)
            }
            _ => false,
        }
    }

    async fn execute(&self, op: &Operation) -> ExecutionOutcome {
        let OperationPayload::UpdateMatch(p) = &op.payload else {
            return ExecutionOutcome::permanent("Payload does not match update_match");
        };

        let remote_record = match self.remote.fetch(ENTITY, &p.id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                return ExecutionOutcome::permanent(format!(
                    "Match {} no longer exists remotely",
                    p.id
                ))
            }
            Err(e) => return remote_failure("Match fetch failed", e),
        };

        // The remote record moved on since this edit was drafted: resolve
        // before writing
        let final_record = if conflict::is_remote_newer(p.snapshot_updated_at, &remote_record) {
            let resolution = conflict::resolve(
                p.conflict_policy,
                &format!("match {}", p.id),
                &p.fields,
                &remote_record,
            );
            match resolution.push_fields {
                Some(fields) => match self.remote.update(ENTITY, &p.id, &fields).await {
                    Ok(updated) => updated,
                    Err(e) => return remote_failure("Match update failed", e),
                },
                None => resolution.record,
            }
        } else {
            match self.remote.update(ENTITY, &p.id, &p.fields).await {
                Ok(updated) => updated,
                Err(e) => return remote_failure("Match update failed", e),
            }
        };

        if let Err(e) = self.db.upsert_record(ENTITY, &p.id, &final_record) {
            log::error!("Mirror write failed for updated match {}: {e}", p.id);
        }

        ExecutionOutcome::ok(Some(final_record))
    }
}

// ============================================================================
// Delete
// ============================================================================

pub struct MatchDeleteStrategy {
    db: Database,
    remote: Arc<dyn RemoteStore>,
}

impl MatchDeleteStrategy {
    pub fn new(db: Database, remote: Arc<dyn RemoteStore>) -> Self {
        Self { db, remote }
    }
}

#[async_trait]
impl SyncStrategy for MatchDeleteStrategy {
    fn entity(&self) -> &'static str {
        ENTITY
    }

    fn operation_name(&self) -> &'static str {
        "delete_match"
    }

    fn validate(&self, payload: &OperationPayload) -> bool {
        matches!(payload, OperationPayload::DeleteMatch(p) if !p.id.is_empty())
    }

    async fn execute(&self, op: &Operation) -> ExecutionOutcome {
        let OperationPayload::DeleteMatch(p) = &op.payload else {
            return ExecutionOutcome::permanent("Payload does not match delete_match");
        };

        match self.remote.delete(ENTITY, &p.id).await {
            Ok(()) => {}
            // Already gone remotely counts as done
            Err(RemoteError::NotFound(_)) => {
                log::info!("Match {} already deleted remotely", p.id);
            }
            Err(e) => return remote_failure("Match deletion failed", e),
        }

        if let Err(e) = self.db.delete_record(ENTITY, &p.id) {
            log::error!("Mirror delete failed for match {}: {e}", p.id);
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
    use crate::sync::models::{ConflictPolicy, MatchCreatePayload, MatchUpdatePayload,
        MatchDeletePayload, OperationMetadata};
    use serde_json::json;

    fn create_payload() -> OperationPayload {
        OperationPayload::CreateMatch(MatchCreatePayload {
            club_id: "c1".to_string(),
            opponent_id: Some("u2".to_string()),
            scores: "6-4,6-3".to_string(),
            match_type: "singles".to_string(),
            played_at: None,
        })
    }

    #[test]
    fn test_create_validation() {
        let db = Database::in_memory().unwrap();
        let strategy = MatchCreateStrategy::new(db, Arc::new(MockRemote::default()));

        assert!(strategy.validate(&create_payload()));

        let bad = OperationPayload::CreateMatch(MatchCreatePayload {
            club_id: String::new(),
            opponent_id: None,
            scores: "6-0".to_string(),
            match_type: "triples".to_string(),
            played_at: None,
        });
        assert!(!strategy.validate(&bad));

        // Wrong variant is rejected outright
        assert!(!strategy.validate(&OperationPayload::DeleteMatch(MatchDeletePayload {
            id: "m1".to_string(),
        })));
    }

    #[test]
    fn test_create_transform_is_idempotent() {
        let db = Database::in_memory().unwrap();
        let strategy = MatchCreateStrategy::new(db, Arc::new(MockRemote::default()));

        let once = strategy.transform(create_payload());
        let OperationPayload::CreateMatch(ref p) = once else {
            panic!("variant changed");
        };
        let filled = p.played_at.expect("timestamp defaulted");

        let twice = strategy.transform(once.clone());
        let OperationPayload::CreateMatch(p) = twice else {
            panic!("variant changed");
        };
        assert_eq!(p.played_at, Some(filled));
    }

    #[tokio::test]
    async fn test_create_splices_remote_id() {
        let db = Database::in_memory().unwrap();
        let remote = Arc::new(MockRemote::default());

        // Provisional row written while offline, under a client id
        db.upsert_record("match", "local-1", &json!({"id": "local-1", "scores": "6-4,6-3"}))
            .unwrap();

        let strategy = MatchCreateStrategy::new(db.clone(), remote.clone());
        let op = Operation::new(
            strategy.transform(create_payload()),
            OperationMetadata {
                local_id: Some("local-1".to_string()),
                ..OperationMetadata::default()
            },
        );

        let outcome = strategy.execute(&op).await;
        assert!(outcome.success);

        let remote_id = outcome.data.unwrap()["id"].as_str().unwrap().to_string();
        assert_eq!(remote_id, "srv-1");

        // Provisional row gone, record re-keyed under the remote id
        assert!(db.get_record("match", "local-1").unwrap().is_none());
        assert!(db.get_record("match", &remote_id).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_create_offline_is_retryable() {
        let db = Database::in_memory().unwrap();
        let remote = Arc::new(MockRemote::default());
        remote.set_offline(true);

        let strategy = MatchCreateStrategy::new(db, remote);
        let op = Operation::new(create_payload(), OperationMetadata::default());

        let outcome = strategy.execute(&op).await;
        assert!(!outcome.success);
        assert!(outcome.should_retry);
    }

    #[tokio::test]
    async fn test_update_without_conflict() {
        let db = Database::in_memory().unwrap();
        let remote = Arc::new(MockRemote::default());
        remote.seed(
            "match",
            "m1",
            json!({"id": "m1", "scores": "6-4,6-3", "updated_at": "2026-08-01T10:00:00Z"}),
        );

        let strategy = MatchUpdateStrategy::new(db.clone(), remote.clone());
        let op = Operation::new(
            OperationPayload::UpdateMatch(MatchUpdatePayload {
                id: "m1".to_string(),
                fields: json!({"scores": "6-4,7-5"}),
                snapshot_updated_at: Some("2026-08-01T10:00:00Z".parse().unwrap()),
                conflict_policy: ConflictPolicy::RemoteWins,
            }),
            OperationMetadata::default(),
        );

        let outcome = strategy.execute(&op).await;
        assert!(outcome.success);

        assert_eq!(remote.get("match", "m1").unwrap()["scores"], "6-4,7-5");
        assert_eq!(
            db.get_record("match", "m1").unwrap().unwrap()["scores"],
            "6-4,7-5"
        );
    }

    #[tokio::test]
    async fn test_update_remote_wins_discards_local_edit() {
        let db = Database::in_memory().unwrap();
        let remote = Arc::new(MockRemote::default());
        remote.seed(
            "match",
            "m1",
            json!({"id": "m1", "scores": "6-2,6-2", "updated_at": "2026-08-02T12:00:00Z"}),
        );

        let strategy = MatchUpdateStrategy::new(db.clone(), remote.clone());
        let op = Operation::new(
            OperationPayload::UpdateMatch(MatchUpdatePayload {
                id: "m1".to_string(),
                fields: json!({"scores": "6-4,7-5"}),
                // Older snapshot than the remote record
                snapshot_updated_at: Some("2026-08-01T10:00:00Z".parse().unwrap()),
                conflict_policy: ConflictPolicy::RemoteWins,
            }),
            OperationMetadata::default(),
        );

        let outcome = strategy.execute(&op).await;
        assert!(outcome.success);

        // No update pushed, local mirror adopts the remote record
        assert_eq!(remote.get("match", "m1").unwrap()["scores"], "6-2,6-2");
        assert_eq!(
            db.get_record("match", "m1").unwrap().unwrap()["scores"],
            "6-2,6-2"
        );
        let calls = remote.calls.lock().unwrap().clone();
        assert!(!calls.iter().any(|c| c.starts_with("update")));
    }

    #[tokio::test]
    async fn test_update_missing_record_is_permanent() {
        let db = Database::in_memory().unwrap();
        let strategy = MatchUpdateStrategy::new(db, Arc::new(MockRemote::default()));

        let op = Operation::new(
            OperationPayload::UpdateMatch(MatchUpdatePayload {
                id: "ghost".to_string(),
                fields: json!({"scores": "6-0,6-0"}),
                snapshot_updated_at: None,
                conflict_policy: ConflictPolicy::RemoteWins,
            }),
            OperationMetadata::default(),
        );

        let outcome = strategy.execute(&op).await;
        assert!(!outcome.success);
        assert!(!outcome.should_retry);
    }

    #[tokio::test]
    async fn test_delete_tolerates_missing_remote() {
        let db = Database::in_memory().unwrap();
        db.upsert_record("match", "m1", &json!({"id": "m1"})).unwrap();

        let strategy = MatchDeleteStrategy::new(db.clone(), Arc::new(MockRemote::default()));
        let op = Operation::new(
            OperationPayload::DeleteMatch(MatchDeletePayload {
                id: "m1".to_string(),
            }),
            OperationMetadata::default(),
        );

        let outcome = strategy.execute(&op).await;
        assert!(outcome.success);
        assert!(db.get_record("match", "m1").unwrap().is_none());
    }
}
