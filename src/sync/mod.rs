//! Offline Sync Engine
//!
//! Durable at-least-once operation queue for offline-first clients:
//! - Persistent FIFO queue with exponential-backoff retries
//! - Dead-letter bucket for exhausted or permanently failed operations
//! - Pluggable per-entity strategies behind a registry
//! - Snapshot-based conflict detection and resolution
//! - Network-aware draining with automatic sync on connectivity regain

pub mod conflict;
pub mod manager;
pub mod models;
pub mod network;
pub mod orchestrator;
pub mod queue;
pub mod registry;
pub mod remote;
pub mod strategies;


pub use manager::{
    DrainSummary, MetricsSink, NoopMetrics, QueueManager, QueueManagerConfig, SyncHooks,
};
pub use models::{
    BackoffPolicy, ConflictPolicy, ConnectionQuality, ExecutionOutcome, NetworkState, Operation,
    OperationKind, OperationMetadata, OperationPayload, OperationStatus, Transport,
};
pub use network::{ConnectivityProbe, NetworkMonitor};
pub use orchestrator::{SyncConfig, SyncError, SyncOrchestrator, SyncStatus};
pub use queue::{QueueError, QueueStats, QueueStore};
pub use registry::{RegistryError, StrategyRegistry, SyncStrategy};
pub use remote::{HttpRemoteStore, RemoteError, RemoteStore};
