//! Conflict Resolver
//!
//! Invoked by strategies when the remote record has moved past the local
//! snapshot an operation was built from. Detection compares the snapshot's
//! `updated_at` with the remote record's; resolution is a pure function over
//! the two JSON records so policies are testable without any store.

use super::models::ConflictPolicy;
use chrono::{DateTime, Utc};
use serde_json::Value;

/// Fields that always come from remote in a merge, to keep causal ordering
/// sane
fn is_timestamp_field(key: &str) -> bool {
    key == "created_at" || key == "updated_at" || key.ends_with("_at")
}

/// Parse the remote record's last-modified timestamp
pub fn remote_updated_at(remote: &Value) -> Option<DateTime<Utc>> {
    remote
        .get("updated_at")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// Whether the remote record was mutated after the local snapshot the
/// operation was built from.
///
/// With no snapshot timestamp there is nothing to compare, so no conflict is
/// reported.
pub fn is_remote_newer(snapshot: Option<DateTime<Utc>>, remote: &Value) -> bool {
    match (snapshot, remote_updated_at(remote)) {
        (Some(local), Some(remote)) => remote > local,
        _ => false,
    }
}

/// Outcome of resolving a conflict
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    /// The record the local mirror must reflect after resolution
    pub record: Value,

    /// Fields to push to the remote store, `None` when the resolution adopts
    /// remote state as-is
    pub push_fields: Option<Value>,
}

/// Resolve a conflict between a local field set and a newer remote record.
///
/// `context` identifies the record (entity/id) for audit logging.
pub fn resolve(
    policy: ConflictPolicy,
    context: &str,
    local_fields: &Value,
    remote: &Value,
) -> Resolution {
    match policy {
        ConflictPolicy::RemoteWins => {
            log::info!("Conflict on {context}: remote-wins, local changes discarded");
            Resolution {
                record: remote.clone(),
                push_fields: None,
            }
        }
        ConflictPolicy::LocalWins => {
            log::info!("Conflict on {context}: local-wins, forcing local payload");
            let mut record = remote.clone();
            apply_fields(&mut record, local_fields, |_| true);
            Resolution {
                record,
                push_fields: Some(local_fields.clone()),
            }
        }
        ConflictPolicy::Merge => {
            let mut record = remote.clone();
            let mut pushed = serde_json::Map::new();

            if let Some(locals) = local_fields.as_object() {
                for (key, value) in locals {
                    if value.is_null() || is_timestamp_field(key) {
                        continue;
                    }
                    if let Some(target) = record.as_object_mut() {
                        target.insert(key.clone(), value.clone());
                    }
                    pushed.insert(key.clone(), value.clone());
                }
            }

            log::info!(
                "Conflict on {context}: merged {} local fields over remote",
                pushed.len()
            );
            Resolution {
                record,
                push_fields: if pushed.is_empty() {
                    None
                } else {
                    Some(Value::Object(pushed))
                },
            }
        }
        ConflictPolicy::PromptUser => {
            // No UI round-trip available inside the engine; this fallback is
            // deliberate and must be auditable, not silently lossy.
            log::warn!(
                "Conflict on {context}: prompt-user requested but no UI hook is wired, \
                 falling back to remote-wins"
            );
            resolve(ConflictPolicy::RemoteWins, context, local_fields, remote)
        }
    }
}

fn apply_fields(target: &mut Value, fields: &Value, keep: impl Fn(&str) -> bool) {
    if let (Some(target), Some(fields)) = (target.as_object_mut(), fields.as_object()) {
        for (key, value) in fields {
            if keep(key) {
                target.insert(key.clone(), value.clone());
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn remote_record() -> Value {
        json!({
            "id": "m1",
            "scores": "7-5,6-4",
            "match_type": "singles",
            "notes": null,
            "updated_at": "2026-02-01T10:00:00Z"
        })
    }

    #[test]
    fn test_is_remote_newer() {
        let remote = remote_record();

        let older = "2026-01-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap();
        assert!(is_remote_newer(Some(older), &remote));

        let newer = "2026-03-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap();
        assert!(!is_remote_newer(Some(newer), &remote));

        // No snapshot timestamp: no conflict to detect
        assert!(!is_remote_newer(None, &remote));

        // Remote without updated_at: no conflict to detect
        assert!(!is_remote_newer(Some(older), &json!({"id": "m1"})));
    }

    #[test]
    fn test_remote_wins_discards_local() {
        let remote = remote_record();
        let local = json!({"scores": "6-2,6-1"});

        let resolution = resolve(ConflictPolicy::RemoteWins, "match/m1", &local, &remote);

        assert_eq!(resolution.record["scores"], "7-5,6-4");
        assert!(resolution.push_fields.is_none());
    }

    #[test]
    fn test_local_wins_pushes_local_payload() {
        let remote = remote_record();
        let local = json!({"scores": "6-2,6-1"});

        let resolution = resolve(ConflictPolicy::LocalWins, "match/m1", &local, &remote);

        assert_eq!(resolution.record["scores"], "6-2,6-1");
        assert_eq!(resolution.push_fields, Some(local));
    }

    #[test]
    fn test_merge_prefers_non_null_local_except_timestamps() {
        let remote = remote_record();
        let local = json!({
            "scores": "6-2,6-1",
            "notes": null,
            "updated_at": "2026-01-15T00:00:00Z"
        });

        let resolution = resolve(ConflictPolicy::Merge, "match/m1", &local, &remote);

        // Non-null local value wins
        assert_eq!(resolution.record["scores"], "6-2,6-1");
        // Null local value does not clobber remote
        assert_eq!(resolution.record["notes"], Value::Null);
        // Timestamps always come from remote
        assert_eq!(resolution.record["updated_at"], "2026-02-01T10:00:00Z");

        let pushed = resolution.push_fields.unwrap();
        assert_eq!(pushed, json!({"scores": "6-2,6-1"}));
    }

    #[test]
    fn test_merge_with_nothing_to_push() {
        let remote = remote_record();
        let local = json!({"updated_at": "2026-01-15T00:00:00Z", "notes": null});

        let resolution = resolve(ConflictPolicy::Merge, "match/m1", &local, &remote);

        assert!(resolution.push_fields.is_none());
        assert_eq!(resolution.record, remote);
    }

    #[test]
    fn test_prompt_user_falls_back_to_remote_wins() {
        let remote = remote_record();
        let local = json!({"scores": "6-2,6-1"});

        let resolution = resolve(ConflictPolicy::PromptUser, "match/m1", &local, &remote);
        let expected = resolve(ConflictPolicy::RemoteWins, "match/m1", &local, &remote);

        assert_eq!(resolution, expected);
    }
}
