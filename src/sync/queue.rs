//! Durable Operation Queue Store
//!
//! SQLite-backed persistence for pending mutations. Operations are persisted
//! before the caller is acknowledged, survive process restarts, and are
//! drained in enqueue order (FIFO by the `seq` column).
//!
//! Features:
//! - Exponential backoff retry scheduling
//! - Max retry limit with a dead-letter bucket for exhausted operations
//! - Manual reset of failed/dead-lettered operations
//! - Queue statistics reporting

use super::models::{BackoffPolicy, Operation, OperationKind, OperationMetadata, OperationPayload, OperationStatus};
use crate::db::Database;
use chrono::{DateTime, Duration, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};

// ============================================================================
// Errors & Stats
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Operation not found: {0}")]
    NotFound(String),

    #[error("Corrupt queue record {0}: {1}")]
    Corrupt(String, String),
}

impl From<crate::db::DbError> for QueueError {
    fn from(e: crate::db::DbError) -> Self {
        Self::Database(e.to_string())
    }
}

/// Queue statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending_count: i64,
    pub processing_count: i64,
    pub failed_count: i64,
    pub dead_letter_count: i64,
    pub succeeded_count: i64,
    pub total_count: i64,
}

// ============================================================================
// Queue Store
// ============================================================================

const SELECT_COLUMNS: &str = "id, kind, entity, operation_name, payload, metadata, status, \
     retry_count, max_retries, next_retry_at, last_error, created_at, updated_at";

/// SQLite-backed store for operation records
#[derive(Clone)]
pub struct QueueStore {
    db: Database,
}

impl QueueStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Persist a new operation. Must complete before the enqueue call
    /// acknowledges the caller.
    pub fn enqueue(&self, op: &Operation) -> Result<(), QueueError> {
        let payload = serde_json::to_string(&op.payload)
            .map_err(|e| QueueError::Database(e.to_string()))?;
        let metadata = serde_json::to_string(&op.metadata)
            .map_err(|e| QueueError::Database(e.to_string()))?;

        self.db.execute(
            r#"
            INSERT INTO sync_queue (
                id, kind, entity, operation_name, payload, metadata, status,
                retry_count, max_retries, next_retry_at, last_error,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
            params![
                op.id,
                op.kind.as_str(),
                op.entity,
                op.operation_name,
                payload,
                metadata,
                op.status.as_str(),
                op.retry_count,
                op.max_retries,
                op.next_retry_at.map(|dt| dt.to_rfc3339()),
                op.last_error,
                op.created_at.to_rfc3339(),
                op.updated_at.to_rfc3339(),
            ],
        )?;

        log::debug!("Persisted operation {} ({})", op.id, op.operation_name);
        Ok(())
    }

    /// Pending operations whose retry time has arrived, in enqueue order.
    ///
    /// FIFO across entities as well: a later update must never race ahead of
    /// the create it depends on.
    pub fn eligible_operations(&self) -> Result<Vec<Operation>, QueueError> {
        let now = Utc::now().to_rfc3339();

        let ops = self.db.query(
            &format!(
                "SELECT {SELECT_COLUMNS} FROM sync_queue
                 WHERE status = 'pending'
                   AND (next_retry_at IS NULL OR next_retry_at <= ?1)
                 ORDER BY seq ASC"
            ),
            params![now],
            row_to_operation,
        )?;

        Ok(ops)
    }

    /// Fetch one operation by id
    pub fn get_by_id(&self, id: &str) -> Result<Operation, QueueError> {
        let ops = self.db.query(
            &format!("SELECT {SELECT_COLUMNS} FROM sync_queue WHERE id = ?1"),
            params![id],
            row_to_operation,
        )?;

        ops.into_iter()
            .next()
            .ok_or_else(|| QueueError::NotFound(id.to_string()))
    }

    /// Snapshot of all operations, optionally filtered by status, in
    /// enqueue order
    pub fn get_operations(
        &self,
        status: Option<OperationStatus>,
    ) -> Result<Vec<Operation>, QueueError> {
        let ops = match status {
            Some(status) => self.db.query(
                &format!(
                    "SELECT {SELECT_COLUMNS} FROM sync_queue WHERE status = ?1 ORDER BY seq ASC"
                ),
                params![status.as_str()],
                row_to_operation,
            )?,
            None => self.db.query(
                &format!("SELECT {SELECT_COLUMNS} FROM sync_queue ORDER BY seq ASC"),
                params![],
                row_to_operation,
            )?,
        };

        Ok(ops)
    }

    /// Update an operation's status
    pub fn set_status(
        &self,
        id: &str,
        status: OperationStatus,
        last_error: Option<&str>,
    ) -> Result<(), QueueError> {
        let affected = self.db.execute(
            "UPDATE sync_queue SET status = ?1, last_error = ?2, updated_at = ?3 WHERE id = ?4",
            params![status.as_str(), last_error, Utc::now().to_rfc3339(), id],
        )?;

        if affected == 0 {
            return Err(QueueError::NotFound(id.to_string()));
        }
        Ok(())
    }

    /// Record a transient failure: either reschedule with backoff or, when
    /// the retry budget is spent, dead-letter.
    ///
    /// Returns the resulting status.
    pub fn mark_failed(
        &self,
        id: &str,
        error: &str,
        backoff: &BackoffPolicy,
    ) -> Result<OperationStatus, QueueError> {
        let op = self.get_by_id(id)?;
        let now = Utc::now();

        if op.retry_count + 1 <= op.max_retries {
            let new_retry_count = op.retry_count + 1;
            let next_retry = backoff.next_retry_at(op.retry_count, now);

            self.db.execute(
                r#"
                UPDATE sync_queue
                SET status = 'pending', retry_count = ?1, next_retry_at = ?2,
                    last_error = ?3, updated_at = ?4
                WHERE id = ?5
                "#,
                params![
                    new_retry_count,
                    next_retry.to_rfc3339(),
                    error,
                    now.to_rfc3339(),
                    id
                ],
            )?;

            log::info!(
                "Operation {} failed, retry {}/{} at {}",
                id,
                new_retry_count,
                op.max_retries,
                next_retry
            );
            Ok(OperationStatus::Pending)
        } else {
            self.set_status(id, OperationStatus::DeadLetter, Some(error))?;
            log::warn!("Operation {} exhausted {} retries, dead-lettered", id, op.max_retries);
            Ok(OperationStatus::DeadLetter)
        }
    }

    /// Move an operation straight to the dead-letter bucket (permanent
    /// failures, no retry budget consumed)
    pub fn mark_dead_letter(&self, id: &str, error: &str) -> Result<(), QueueError> {
        self.set_status(id, OperationStatus::DeadLetter, Some(error))
    }

    /// Remove a completed operation from the queue
    pub fn remove(&self, id: &str) -> Result<(), QueueError> {
        self.db
            .execute("DELETE FROM sync_queue WHERE id = ?1", params![id])?;
        Ok(())
    }

    /// Reset failed and dead-lettered operations to pending with a fresh
    /// retry budget (explicit user-initiated retry)
    pub fn reset_failed(&self) -> Result<usize, QueueError> {
        let updated = self.db.execute(
            r#"
            UPDATE sync_queue
            SET status = 'pending', retry_count = 0, next_retry_at = NULL,
                last_error = NULL, updated_at = ?1
            WHERE status IN ('failed', 'dead_letter')
            "#,
            params![Utc::now().to_rfc3339()],
        )?;

        if updated > 0 {
            log::info!("Reset {} failed operations for retry", updated);
        }
        Ok(updated)
    }

    /// Prune residual succeeded rows, optionally only those older than
    /// `older_than_days`. Success normally removes the record, so this is
    /// idempotent cleanup.
    pub fn clear_succeeded(&self, older_than_days: Option<i64>) -> Result<usize, QueueError> {
        let deleted = match older_than_days {
            Some(days) => {
                let cutoff = (Utc::now() - Duration::days(days)).to_rfc3339();
                self.db.execute(
                    "DELETE FROM sync_queue WHERE status = 'succeeded' AND updated_at < ?1",
                    params![cutoff],
                )?
            }
            None => self.db.execute(
                "DELETE FROM sync_queue WHERE status = 'succeeded'",
                params![],
            )?,
        };
        Ok(deleted)
    }

    /// Reset operations stranded in `processing` by a crashed run.
    ///
    /// Called once at manager startup, before any drain attempt.
    pub fn recover_in_flight(&self) -> Result<usize, QueueError> {
        let recovered = self.db.execute(
            "UPDATE sync_queue SET status = 'pending', updated_at = ?1 WHERE status = 'processing'",
            params![Utc::now().to_rfc3339()],
        )?;

        if recovered > 0 {
            log::warn!("Recovered {} operations left in-flight by a previous run", recovered);
        }
        Ok(recovered)
    }

    /// Count operations in a given status
    pub fn count(&self, status: OperationStatus) -> Result<i64, QueueError> {
        let count = self.db.query_row(
            "SELECT COUNT(*) FROM sync_queue WHERE status = ?1",
            params![status.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Queue statistics
    pub fn stats(&self) -> Result<QueueStats, QueueError> {
        let stats = self.db.query_row(
            r#"
            SELECT
                SUM(CASE WHEN status = 'pending' THEN 1 ELSE 0 END),
                SUM(CASE WHEN status = 'processing' THEN 1 ELSE 0 END),
                SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END),
                SUM(CASE WHEN status = 'dead_letter' THEN 1 ELSE 0 END),
                SUM(CASE WHEN status = 'succeeded' THEN 1 ELSE 0 END),
                COUNT(*)
            FROM sync_queue
            "#,
            params![],
            |row| {
                Ok(QueueStats {
                    pending_count: row.get::<_, Option<i64>>(0)?.unwrap_or(0),
                    processing_count: row.get::<_, Option<i64>>(1)?.unwrap_or(0),
                    failed_count: row.get::<_, Option<i64>>(2)?.unwrap_or(0),
                    dead_letter_count: row.get::<_, Option<i64>>(3)?.unwrap_or(0),
                    succeeded_count: row.get::<_, Option<i64>>(4)?.unwrap_or(0),
                    total_count: row.get(5)?,
                })
            },
        )?;

        Ok(stats)
    }

    /// Replace a persisted operation's payload (applied once by the
    /// strategy `transform` hook before first execution)
    pub fn update_payload(&self, id: &str, payload: &OperationPayload) -> Result<(), QueueError> {
        let json =
            serde_json::to_string(payload).map_err(|e| QueueError::Database(e.to_string()))?;

        let affected = self.db.execute(
            "UPDATE sync_queue SET payload = ?1, updated_at = ?2 WHERE id = ?3",
            params![json, Utc::now().to_rfc3339(), id],
        )?;

        if affected == 0 {
            return Err(QueueError::NotFound(id.to_string()));
        }
        Ok(())
    }
}

/// Map a sync_queue row to an Operation
fn row_to_operation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Operation> {
    let payload_json: String = row.get(4)?;
    let metadata_json: String = row.get(5)?;

    let payload: OperationPayload =
        serde_json::from_str(&payload_json).map_err(|_| rusqlite::Error::InvalidQuery)?;
    let metadata: OperationMetadata =
        serde_json::from_str(&metadata_json).map_err(|_| rusqlite::Error::InvalidQuery)?;

    Ok(Operation {
        id: row.get(0)?,
        kind: OperationKind::from_str(&row.get::<_, String>(1)?),
        entity: row.get(2)?,
        operation_name: row.get(3)?,
        payload,
        metadata,
        status: OperationStatus::from_str(&row.get::<_, String>(6)?),
        retry_count: row.get(7)?,
        max_retries: row.get(8)?,
        next_retry_at: row
            .get::<_, Option<String>>(9)?
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc)),
        last_error: row.get(10)?,
        created_at: DateTime::parse_from_rfc3339(&row.get::<_, String>(11)?)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|_| rusqlite::Error::InvalidQuery)?,
        updated_at: DateTime::parse_from_rfc3339(&row.get::<_, String>(12)?)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|_| rusqlite::Error::InvalidQuery)?,
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::models::{InvitationCancelPayload, MatchCreatePayload, MatchDeletePayload};

    fn test_store() -> QueueStore {
        let db = Database::in_memory().expect("test db");
        QueueStore::new(db)
    }

    fn match_create_op() -> Operation {
        Operation::new(
            OperationPayload::CreateMatch(MatchCreatePayload {
                club_id: "c1".to_string(),
                opponent_id: Some("u2".to_string()),
                scores: "6-4,6-3".to_string(),
                match_type: "singles".to_string(),
                played_at: None,
            }),
            OperationMetadata {
                user_id: Some("u1".to_string()),
                club_id: Some("c1".to_string()),
                local_id: Some("local-1".to_string()),
            },
        )
    }

    #[test]
    fn test_enqueue_and_fetch() {
        let store = test_store();
        let op = match_create_op();

        store.enqueue(&op).unwrap();

        let loaded = store.get_by_id(&op.id).unwrap();
        assert_eq!(loaded.entity, "match");
        assert_eq!(loaded.operation_name, "create_match");
        assert_eq!(loaded.status, OperationStatus::Pending);
        assert_eq!(loaded.metadata.local_id, Some("local-1".to_string()));
        assert_eq!(loaded.payload, op.payload);
    }

    #[test]
    fn test_eligible_fifo_order() {
        let store = test_store();

        let first = match_create_op();
        let second = Operation::new(
            OperationPayload::DeleteMatch(MatchDeletePayload {
                id: "m9".to_string(),
            }),
            OperationMetadata::default(),
        );

        store.enqueue(&first).unwrap();
        store.enqueue(&second).unwrap();

        let eligible = store.eligible_operations().unwrap();
        assert_eq!(eligible.len(), 2);
        assert_eq!(eligible[0].id, first.id);
        assert_eq!(eligible[1].id, second.id);
    }

    #[test]
    fn test_future_retry_not_eligible() {
        let store = test_store();

        let mut op = match_create_op();
        op.next_retry_at = Some(Utc::now() + chrono::Duration::hours(1));
        store.enqueue(&op).unwrap();

        assert!(store.eligible_operations().unwrap().is_empty());
    }

    #[test]
    fn test_mark_failed_schedules_backoff() {
        let store = test_store();
        let op = match_create_op();
        store.enqueue(&op).unwrap();

        let backoff = BackoffPolicy::default();
        let status = store.mark_failed(&op.id, "network blip", &backoff).unwrap();
        assert_eq!(status, OperationStatus::Pending);

        let loaded = store.get_by_id(&op.id).unwrap();
        assert_eq!(loaded.retry_count, 1);
        assert_eq!(loaded.last_error, Some("network blip".to_string()));
        assert!(loaded.next_retry_at.unwrap() > Utc::now());
    }

    #[test]
    fn test_backoff_gaps_grow() {
        let store = test_store();
        let op = match_create_op();
        store.enqueue(&op).unwrap();

        let backoff = BackoffPolicy::default();
        let mut schedule = Vec::new();
        for _ in 0..3 {
            store.mark_failed(&op.id, "err", &backoff).unwrap();
            let loaded = store.get_by_id(&op.id).unwrap();
            schedule.push((loaded.updated_at, loaded.next_retry_at.unwrap()));
        }

        let gaps: Vec<i64> = schedule
            .iter()
            .map(|(failed_at, next)| (*next - *failed_at).num_seconds())
            .collect();

        assert!(gaps[1] > gaps[0]);
        assert!(gaps[2] > gaps[1]);
    }

    #[test]
    fn test_dead_letter_exactly_at_max_retries() {
        let store = test_store();
        let mut op = match_create_op();
        op.max_retries = 3;
        store.enqueue(&op).unwrap();

        let backoff = BackoffPolicy::default();

        // Failures 1..=3 stay pending (retry budget not yet spent)
        for attempt in 1..=3 {
            let status = store.mark_failed(&op.id, "err", &backoff).unwrap();
            assert_eq!(status, OperationStatus::Pending, "attempt {attempt}");
        }

        let loaded = store.get_by_id(&op.id).unwrap();
        assert_eq!(loaded.retry_count, 3);

        // Next failure exceeds the budget
        let status = store.mark_failed(&op.id, "err", &backoff).unwrap();
        assert_eq!(status, OperationStatus::DeadLetter);

        // retry_count never exceeds max_retries
        let loaded = store.get_by_id(&op.id).unwrap();
        assert_eq!(loaded.retry_count, 3);
    }

    #[test]
    fn test_reset_failed_restores_budget() {
        let store = test_store();
        let mut op = match_create_op();
        op.max_retries = 0;
        store.enqueue(&op).unwrap();

        let status = store
            .mark_failed(&op.id, "err", &BackoffPolicy::default())
            .unwrap();
        assert_eq!(status, OperationStatus::DeadLetter);

        let reset = store.reset_failed().unwrap();
        assert_eq!(reset, 1);

        let loaded = store.get_by_id(&op.id).unwrap();
        assert_eq!(loaded.status, OperationStatus::Pending);
        assert_eq!(loaded.retry_count, 0);
        assert!(loaded.next_retry_at.is_none());
        assert!(loaded.last_error.is_none());
    }

    #[test]
    fn test_remove_and_stats() {
        let store = test_store();
        let op = match_create_op();
        store.enqueue(&op).unwrap();

        let other = Operation::new(
            OperationPayload::CancelInvitation(InvitationCancelPayload {
                invitation_id: "i1".to_string(),
            }),
            OperationMetadata::default(),
        );
        store.enqueue(&other).unwrap();
        store.mark_dead_letter(&other.id, "no strategy").unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.pending_count, 1);
        assert_eq!(stats.dead_letter_count, 1);
        assert_eq!(stats.total_count, 2);

        store.remove(&op.id).unwrap();
        let stats = store.stats().unwrap();
        assert_eq!(stats.pending_count, 0);
        assert_eq!(stats.total_count, 1);
    }

    #[test]
    fn test_recover_in_flight() {
        let store = test_store();
        let op = match_create_op();
        store.enqueue(&op).unwrap();
        store
            .set_status(&op.id, OperationStatus::Processing, None)
            .unwrap();

        let recovered = store.recover_in_flight().unwrap();
        assert_eq!(recovered, 1);

        let loaded = store.get_by_id(&op.id).unwrap();
        assert_eq!(loaded.status, OperationStatus::Pending);
    }

    #[test]
    fn test_get_operations_filter() {
        let store = test_store();
        let op = match_create_op();
        store.enqueue(&op).unwrap();

        let pending = store
            .get_operations(Some(OperationStatus::Pending))
            .unwrap();
        assert_eq!(pending.len(), 1);

        let dead = store
            .get_operations(Some(OperationStatus::DeadLetter))
            .unwrap();
        assert!(dead.is_empty());

        let all = store.get_operations(None).unwrap();
        assert_eq!(all.len(), 1);
    }

    #[test]
    fn test_update_payload() {
        let store = test_store();
        let op = match_create_op();
        store.enqueue(&op).unwrap();

        let transformed = OperationPayload::CreateMatch(MatchCreatePayload {
            club_id: "c1".to_string(),
            opponent_id: Some("u2".to_string()),
            scores: "6-4,6-3".to_string(),
            match_type: "singles".to_string(),
            played_at: Some(Utc::now()),
        });

        store.update_payload(&op.id, &transformed).unwrap();

        let loaded = store.get_by_id(&op.id).unwrap();
        assert_eq!(loaded.payload, transformed);
    }

    #[test]
    fn test_clear_succeeded_respects_age_cutoff() {
        let store = test_store();

        let old = match_create_op();
        let recent = match_create_op();
        store.enqueue(&old).unwrap();
        store.enqueue(&recent).unwrap();
        store.set_status(&old.id, OperationStatus::Succeeded, None).unwrap();
        store.set_status(&recent.id, OperationStatus::Succeeded, None).unwrap();

        // Backdate one row past the cutoff
        let stale = (Utc::now() - Duration::days(30)).to_rfc3339();
        store
            .db
            .execute(
                "UPDATE sync_queue SET updated_at = ?1 WHERE id = ?2",
                params![stale, old.id],
            )
            .unwrap();

        assert_eq!(store.clear_succeeded(Some(7)).unwrap(), 1);
        assert!(store.get_by_id(&recent.id).is_ok());

        assert_eq!(store.clear_succeeded(None).unwrap(), 1);
        assert!(matches!(store.get_by_id(&recent.id), Err(QueueError::NotFound(_))));
    }
}
