//! Strategy Registry
//!
//! Maps an (entity, operation-name) pair to the pluggable unit that knows
//! how to validate, transform, and apply one queued operation. Registered
//! once at startup; a duplicate pair is a programming error and is rejected.

use super::models::{ExecutionOutcome, Operation, OperationPayload};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Strategy already registered for ({entity}, {operation})")]
    Duplicate { entity: String, operation: String },
}

/// Pluggable execution unit for one (entity, operation-name) pair
#[async_trait]
pub trait SyncStrategy: Send + Sync {
    fn entity(&self) -> &'static str;
    fn operation_name(&self) -> &'static str;

    /// Cheap structural precondition, run before any network call. A payload
    /// failing validation is dead-lettered immediately - retrying garbage
    /// cannot succeed.
    fn validate(&self, payload: &OperationPayload) -> bool;

    /// Fill in defaulted fields before first execution. Must be idempotent:
    /// it runs again when an operation is reset from the dead-letter bucket.
    fn transform(&self, payload: OperationPayload) -> OperationPayload {
        payload
    }

    /// Apply the mutation against the remote store and, on success, mirror
    /// the confirmed state into the local store before reporting.
    async fn execute(&self, op: &Operation) -> ExecutionOutcome;
}

/// Registry of strategies keyed by (entity, operation-name)
#[derive(Default)]
pub struct StrategyRegistry {
    strategies: HashMap<(String, String), Arc<dyn SyncStrategy>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, strategy: Arc<dyn SyncStrategy>) -> Result<(), RegistryError> {
        let key = (
            strategy.entity().to_string(),
            strategy.operation_name().to_string(),
        );

        if self.strategies.contains_key(&key) {
            return Err(RegistryError::Duplicate {
                entity: key.0,
                operation: key.1,
            });
        }

        log::debug!("Registered strategy for ({}, {})", key.0, key.1);
        self.strategies.insert(key, strategy);
        Ok(())
    }

    pub fn lookup(&self, entity: &str, operation_name: &str) -> Option<Arc<dyn SyncStrategy>> {
        self.strategies
            .get(&(entity.to_string(), operation_name.to_string()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    struct StubStrategy;

    #[async_trait]
    impl SyncStrategy for StubStrategy {
        fn entity(&self) -> &'static str {
            "match"
        }

        fn operation_name(&self) -> &'static str {
            "create_match"
        }

        fn validate(&self, _payload: &OperationPayload) -> bool {
            true
        }

        async fn execute(&self, _op: &Operation) -> ExecutionOutcome {
            ExecutionOutcome::ok(None)
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = StrategyRegistry::new();
        registry.register(Arc::new(StubStrategy)).unwrap();

        assert!(registry.lookup("match", "create_match").is_some());
        assert!(registry.lookup("match", "delete_match").is_none());
        assert!(registry.lookup("club", "create_match").is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = StrategyRegistry::new();
        registry.register(Arc::new(StubStrategy)).unwrap();

        let err = registry.register(Arc::new(StubStrategy)).unwrap_err();
        assert!(matches!(err, RegistryError::Duplicate { .. }));
        assert_eq!(registry.len(), 1);
    }
}
