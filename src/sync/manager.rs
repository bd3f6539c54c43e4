//! Queue Manager - Operation Lifecycle Orchestrator
//!
//! Owns the durable queue, computes retry schedules, drains eligible
//! operations through their registered strategies, moves exhausted
//! operations to the dead-letter bucket, and emits lifecycle hooks.
//!
//! Invariants:
//! - An operation is persisted before `add_operation` returns
//! - Only one drain pass runs at a time; re-entrant calls are coalesced
//! - Operations are drained strictly in enqueue order, across entities
//! - A persistence failure degrades to memory-only retention, never a panic

use super::models::{
    BackoffPolicy, ExecutionOutcome, Operation, OperationMetadata, OperationPayload,
    OperationStatus,
};
use super::network::NetworkMonitor;
use super::queue::{QueueError, QueueStats, QueueStore};
use super::registry::{RegistryError, StrategyRegistry, SyncStrategy};
use crate::db::Database;
use chrono::Utc;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

// ============================================================================
// Configuration, Hooks & Metrics
// ============================================================================

#[derive(Debug, Clone)]
pub struct QueueManagerConfig {
    pub backoff: BackoffPolicy,
    pub default_max_retries: i32,
    /// Deadline for a single strategy execution, so one hung remote call
    /// cannot starve the rest of the queue
    pub operation_timeout: std::time::Duration,
}

impl Default for QueueManagerConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffPolicy::default(),
            default_max_retries: super::models::DEFAULT_MAX_RETRIES,
            operation_timeout: std::time::Duration::from_secs(30),
        }
    }
}

/// Summary handed to `on_drain_completed`
#[derive(Debug, Clone, Default)]
pub struct DrainSummary {
    pub attempted: usize,
    pub succeeded: usize,
    pub retried: usize,
    pub dead_lettered: usize,
    /// True when this call was ignored because a drain was already running
    pub coalesced: bool,
    /// True when the drain stopped early because the network went offline
    pub stopped_offline: bool,
}

type OperationHook = Box<dyn Fn(&Operation) + Send + Sync>;
type SuccessHook = Box<dyn Fn(&Operation, Option<&Value>) + Send + Sync>;
type FailureHook = Box<dyn Fn(&Operation, &str) + Send + Sync>;
type DrainHook = Box<dyn Fn() + Send + Sync>;
type DrainCompletedHook = Box<dyn Fn(&DrainSummary) + Send + Sync>;

/// Fire-and-forget lifecycle notifications - never load-bearing for
/// correctness
#[derive(Default)]
pub struct SyncHooks {
    pub on_operation_added: Option<OperationHook>,
    pub on_operation_started: Option<OperationHook>,
    pub on_operation_success: Option<SuccessHook>,
    pub on_operation_failed: Option<FailureHook>,
    pub on_operation_dead_letter: Option<FailureHook>,
    pub on_drain_started: Option<DrainHook>,
    pub on_drain_completed: Option<DrainCompletedHook>,
}

/// Injected telemetry sink; the engine never depends on a concrete storage
/// mechanism for metrics
pub trait MetricsSink: Send + Sync {
    fn operation_enqueued(&self, _entity: &str, _operation_name: &str) {}
    fn operation_succeeded(&self, _entity: &str, _operation_name: &str) {}
    fn operation_retried(&self, _entity: &str, _operation_name: &str) {}
    fn operation_dead_lettered(&self, _entity: &str, _operation_name: &str) {}
    fn drain_completed(&self, _summary: &DrainSummary) {}
}

/// Default sink that records nothing
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {}

// ============================================================================
// Queue Manager
// ============================================================================

/// Outcome of processing one operation, before queue state is applied
enum AttemptResult {
    Success(Option<Value>),
    Retry(String),
    Dead(String),
}

pub struct QueueManager {
    store: QueueStore,
    registry: RwLock<StrategyRegistry>,
    hooks: RwLock<SyncHooks>,
    metrics: Arc<dyn MetricsSink>,
    config: QueueManagerConfig,
    draining: AtomicBool,
    monitor: RwLock<Option<Arc<NetworkMonitor>>>,
    /// Operations that could not be persisted; kept in memory so they are
    /// not lost mid-process, surfaced through `is_degraded`
    memory_overflow: Mutex<Vec<Operation>>,
    degraded: AtomicBool,
}

impl QueueManager {
    /// Build the manager over an existing database. Restores the persisted
    /// queue (including operations stranded in-flight by a crash) before any
    /// drain can run.
    pub fn new(db: Database, config: QueueManagerConfig) -> Result<Self, QueueError> {
        let store = QueueStore::new(db);
        let recovered = store.recover_in_flight()?;
        let stats = store.stats()?;

        log::info!(
            "Queue manager started: {} pending, {} dead-lettered, {} recovered",
            stats.pending_count,
            stats.dead_letter_count,
            recovered
        );

        Ok(Self {
            store,
            registry: RwLock::new(StrategyRegistry::new()),
            hooks: RwLock::new(SyncHooks::default()),
            metrics: Arc::new(NoopMetrics),
            config,
            draining: AtomicBool::new(false),
            monitor: RwLock::new(None),
            memory_overflow: Mutex::new(Vec::new()),
            degraded: AtomicBool::new(false),
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Wire the network monitor used for the mid-drain offline check
    pub fn set_monitor(&self, monitor: Arc<NetworkMonitor>) {
        *self.monitor.write().expect("monitor lock poisoned") = Some(monitor);
    }

    pub fn register_strategy(&self, strategy: Arc<dyn SyncStrategy>) -> Result<(), RegistryError> {
        self.registry
            .write()
            .expect("registry lock poisoned")
            .register(strategy)
    }

    pub fn set_hooks(&self, hooks: SyncHooks) {
        *self.hooks.write().expect("hooks lock poisoned") = hooks;
    }

    fn with_hooks(&self, f: impl FnOnce(&SyncHooks)) {
        let guard = self.hooks.read().expect("hooks lock poisoned");
        f(&guard);
    }

    // ========================================================================
    // Public contract
    // ========================================================================

    /// Enqueue a mutation. Persists before returning and never touches the
    /// network, so it is safe to call while offline.
    ///
    /// A persistence failure does not surface to the caller: the operation
    /// is retained in memory, the manager reports itself degraded, and the
    /// id is still returned.
    pub fn add_operation(
        &self,
        payload: OperationPayload,
        metadata: OperationMetadata,
    ) -> String {
        // The strategy's transform hook runs once, at enqueue time, before
        // the payload is first persisted.
        let payload = {
            let registry = self.registry.read().expect("registry lock poisoned");
            match registry.lookup(payload.entity(), payload.operation_name()) {
                Some(strategy) => strategy.transform(payload),
                None => payload,
            }
        };

        let mut op = Operation::new(payload, metadata);
        op.max_retries = self.config.default_max_retries;

        if let Err(e) = self.store.enqueue(&op) {
            log::error!(
                "Failed to persist operation {} ({}), retaining in memory only: {e}",
                op.id,
                op.operation_name
            );
            self.degraded.store(true, Ordering::SeqCst);
            self.memory_overflow
                .lock()
                .expect("overflow lock poisoned")
                .push(op.clone());
        }

        log::info!("Queued {} for {} ({})", op.operation_name, op.entity, op.id);
        self.metrics.operation_enqueued(&op.entity, &op.operation_name);
        self.with_hooks(|hooks| {
            if let Some(hook) = &hooks.on_operation_added {
                hook(&op);
            }
        });

        op.id
    }

    /// Drain everything currently eligible. Idempotent and safe to call
    /// repeatedly; a call made while a drain is in flight is coalesced into
    /// a no-op so the same operation is never submitted twice.
    pub async fn process_queue(&self) -> Result<DrainSummary, QueueError> {
        if self
            .draining
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            log::debug!("Drain already in flight, coalescing");
            return Ok(DrainSummary {
                coalesced: true,
                ..DrainSummary::default()
            });
        }

        let result = self.drain().await;
        self.draining.store(false, Ordering::SeqCst);
        result
    }

    async fn drain(&self) -> Result<DrainSummary, QueueError> {
        self.with_hooks(|hooks| {
            if let Some(hook) = &hooks.on_drain_started {
                hook();
            }
        });

        self.flush_overflow();

        let mut summary = DrainSummary::default();
        let eligible = self.store.eligible_operations()?;

        log::info!("Drain pass: {} eligible operations", eligible.len());

        for op in eligible {
            if self.is_offline() {
                log::info!("Network went offline mid-drain, stopping");
                summary.stopped_offline = true;
                break;
            }

            summary.attempted += 1;
            self.store
                .set_status(&op.id, OperationStatus::Processing, None)?;
            self.with_hooks(|hooks| {
                if let Some(hook) = &hooks.on_operation_started {
                    hook(&op);
                }
            });

            match self.attempt(&op).await {
                AttemptResult::Success(data) => {
                    self.store.remove(&op.id)?;
                    summary.succeeded += 1;
                    self.metrics
                        .operation_succeeded(&op.entity, &op.operation_name);
                    self.with_hooks(|hooks| {
                        if let Some(hook) = &hooks.on_operation_success {
                            hook(&op, data.as_ref());
                        }
                    });
                }
                AttemptResult::Retry(error) => {
                    let status = self.store.mark_failed(&op.id, &error, &self.config.backoff)?;
                    if status == OperationStatus::DeadLetter {
                        summary.dead_lettered += 1;
                        self.metrics
                            .operation_dead_lettered(&op.entity, &op.operation_name);
                        self.with_hooks(|hooks| {
                            if let Some(hook) = &hooks.on_operation_dead_letter {
                                hook(&op, &error);
                            }
                        });
                    } else {
                        summary.retried += 1;
                        self.metrics
                            .operation_retried(&op.entity, &op.operation_name);
                        self.with_hooks(|hooks| {
                            if let Some(hook) = &hooks.on_operation_failed {
                                hook(&op, &error);
                            }
                        });
                    }
                }
                AttemptResult::Dead(error) => {
                    self.store.mark_dead_letter(&op.id, &error)?;
                    summary.dead_lettered += 1;
                    self.metrics
                        .operation_dead_lettered(&op.entity, &op.operation_name);
                    self.with_hooks(|hooks| {
                        if let Some(hook) = &hooks.on_operation_dead_letter {
                            hook(&op, &error);
                        }
                    });
                }
            }
        }

        self.drain_overflow(&mut summary).await;

        log::info!(
            "Drain completed: {} attempted, {} succeeded, {} retried, {} dead-lettered",
            summary.attempted,
            summary.succeeded,
            summary.retried,
            summary.dead_lettered
        );
        self.metrics.drain_completed(&summary);
        self.with_hooks(|hooks| {
            if let Some(hook) = &hooks.on_drain_completed {
                hook(&summary);
            }
        });

        Ok(summary)
    }

    /// Process one operation: strategy lookup, validation, then execution
    /// under the per-operation timeout.
    async fn attempt(&self, op: &Operation) -> AttemptResult {
        let strategy = {
            let registry = self.registry.read().expect("registry lock poisoned");
            registry.lookup(&op.entity, &op.operation_name)
        };

        // No registered strategy: retrying cannot help
        let Some(strategy) = strategy else {
            return AttemptResult::Dead(format!(
                "No strategy registered for ({}, {})",
                op.entity, op.operation_name
            ));
        };

        // Structurally invalid payloads are dead-lettered before any network
        // call, with the retry budget untouched
        if !strategy.validate(&op.payload) {
            return AttemptResult::Dead(format!(
                "Payload failed validation for {}",
                op.operation_name
            ));
        }

        let outcome =
            match tokio::time::timeout(self.config.operation_timeout, strategy.execute(op)).await {
                Ok(outcome) => outcome,
                Err(_) => ExecutionOutcome::retryable(format!(
                    "Execution timed out after {:?}",
                    self.config.operation_timeout
                )),
            };

        if outcome.success {
            AttemptResult::Success(outcome.data)
        } else {
            let error = outcome
                .error
                .unwrap_or_else(|| "Unknown execution failure".to_string());
            if outcome.should_retry {
                AttemptResult::Retry(error)
            } else {
                AttemptResult::Dead(error)
            }
        }
    }

    // ========================================================================
    // Degraded-mode overflow
    // ========================================================================

    /// Try to move memory-only operations into the durable queue.
    ///
    /// A re-persisted operation takes a fresh queue position: FIFO relative
    /// to operations that were persisted while it sat in memory is not
    /// preserved, only the order within the overflow set itself.
    fn flush_overflow(&self) {
        let mut overflow = self.memory_overflow.lock().expect("overflow lock poisoned");
        if overflow.is_empty() {
            return;
        }

        overflow.retain(|op| match self.store.enqueue(op) {
            Ok(()) => {
                log::info!("Persisted previously memory-only operation {}", op.id);
                false
            }
            Err(e) => {
                log::warn!("Operation {} still cannot be persisted: {e}", op.id);
                true
            }
        });

        if overflow.is_empty() {
            self.degraded.store(false, Ordering::SeqCst);
        }
    }

    /// Drain operations that still live only in memory. Runs after the
    /// persisted pass, so a memory-only operation can execute later than a
    /// persisted one enqueued after it.
    async fn drain_overflow(&self, summary: &mut DrainSummary) {
        let ops: Vec<Operation> = {
            let overflow = self.memory_overflow.lock().expect("overflow lock poisoned");
            overflow
                .iter()
                .filter(|op| op.is_eligible(Utc::now()))
                .cloned()
                .collect()
        };

        for mut op in ops {
            if self.is_offline() {
                summary.stopped_offline = true;
                break;
            }

            summary.attempted += 1;
            match self.attempt(&op).await {
                AttemptResult::Success(data) => {
                    summary.succeeded += 1;
                    self.metrics
                        .operation_succeeded(&op.entity, &op.operation_name);
                    self.with_hooks(|hooks| {
                        if let Some(hook) = &hooks.on_operation_success {
                            hook(&op, data.as_ref());
                        }
                    });
                    self.memory_overflow
                        .lock()
                        .expect("overflow lock poisoned")
                        .retain(|o| o.id != op.id);
                }
                AttemptResult::Retry(error) => {
                    let now = Utc::now();
                    if op.retry_count + 1 <= op.max_retries {
                        op.retry_count += 1;
                        op.next_retry_at =
                            Some(self.config.backoff.next_retry_at(op.retry_count - 1, now));
                        op.last_error = Some(error);
                        summary.retried += 1;
                    } else {
                        op.status = OperationStatus::DeadLetter;
                        op.last_error = Some(error);
                        summary.dead_lettered += 1;
                    }
                    op.updated_at = now;
                    let mut overflow =
                        self.memory_overflow.lock().expect("overflow lock poisoned");
                    if let Some(slot) = overflow.iter_mut().find(|o| o.id == op.id) {
                        *slot = op;
                    }
                }
                AttemptResult::Dead(error) => {
                    summary.dead_lettered += 1;
                    let mut overflow =
                        self.memory_overflow.lock().expect("overflow lock poisoned");
                    if let Some(slot) = overflow.iter_mut().find(|o| o.id == op.id) {
                        slot.status = OperationStatus::DeadLetter;
                        slot.last_error = Some(error);
                        slot.updated_at = Utc::now();
                    }
                }
            }
        }
    }

    // ========================================================================
    // Maintenance & inspection
    // ========================================================================

    /// Reset dead-lettered and failed operations to pending with a fresh
    /// retry budget, re-applying the strategy transform (which is required
    /// to be idempotent)
    pub fn retry_failed_operations(&self) -> Result<usize, QueueError> {
        let reset = self.store.reset_failed()?;

        if reset > 0 {
            let registry = self.registry.read().expect("registry lock poisoned");
            for op in self.store.get_operations(Some(OperationStatus::Pending))? {
                if let Some(strategy) = registry.lookup(&op.entity, &op.operation_name) {
                    let transformed = strategy.transform(op.payload.clone());
                    if transformed != op.payload {
                        self.store.update_payload(&op.id, &transformed)?;
                    }
                }
            }
        }

        let mut overflow = self.memory_overflow.lock().expect("overflow lock poisoned");
        for op in overflow.iter_mut() {
            if matches!(
                op.status,
                OperationStatus::Failed | OperationStatus::DeadLetter
            ) {
                op.status = OperationStatus::Pending;
                op.retry_count = 0;
                op.next_retry_at = None;
                op.last_error = None;
            }
        }

        Ok(reset)
    }

    /// Prune residual succeeded rows (normally unnecessary - success removes
    /// the record), keeping anything newer than `older_than_days` when set
    pub fn clear_completed_operations(&self, older_than_days: Option<i64>) -> Result<usize, QueueError> {
        self.store.clear_succeeded(older_than_days)
    }

    /// Read-only snapshot, optionally filtered by status
    pub fn get_operations(
        &self,
        status: Option<OperationStatus>,
    ) -> Result<Vec<Operation>, QueueError> {
        let mut ops = self.store.get_operations(status)?;

        let overflow = self.memory_overflow.lock().expect("overflow lock poisoned");
        ops.extend(
            overflow
                .iter()
                .filter(|op| status.is_none() || status == Some(op.status))
                .cloned(),
        );

        Ok(ops)
    }

    pub fn stats(&self) -> Result<QueueStats, QueueError> {
        let mut stats = self.store.stats()?;

        let overflow = self.memory_overflow.lock().expect("overflow lock poisoned");
        for op in overflow.iter() {
            stats.total_count += 1;
            match op.status {
                OperationStatus::Pending => stats.pending_count += 1,
                OperationStatus::Processing => stats.processing_count += 1,
                OperationStatus::Failed => stats.failed_count += 1,
                OperationStatus::DeadLetter => stats.dead_letter_count += 1,
                OperationStatus::Succeeded => stats.succeeded_count += 1,
            }
        }

        Ok(stats)
    }

    pub fn is_processing(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    /// True when at least one operation survives only in memory and would
    /// be lost on process restart
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    fn is_offline(&self) -> bool {
        self.monitor
            .read()
            .expect("monitor lock poisoned")
            .as_ref()
            .map(|m| !m.is_connected())
            .unwrap_or(false)
    }
}

// ============================================================================
// Tests
// ============================================================================
