//! Sync Orchestrator
//!
//! Composition root and public facade: owns the queue manager, the network
//! monitor and the local database, wires the built-in strategies, and turns
//! connectivity regains into drain passes.
//!
//! The platform layer feeds connectivity changes into
//! `update_network_state`; an offline-to-online transition schedules an
//! automatic drain, rate-limited by a cooldown so flapping radios do not
//! hammer the remote store. `sync_now` bypasses the cooldown but refuses to
//! run while offline.

use super::manager::{DrainSummary, QueueManager, QueueManagerConfig, SyncHooks};
use super::models::{
    ChallengeCreatePayload, ChallengeRespondPayload, ClubJoinPayload, ClubLeavePayload,
    ConnectionQuality, InvitationCancelPayload, InvitationConfirmPayload, InvitationCreatePayload,
    InvitationRespondPayload, MatchCreatePayload, MatchDeletePayload, MatchUpdatePayload,
    NetworkState, Operation, OperationMetadata, OperationPayload, OperationStatus,
    ProfileUpdatePayload,
};
use super::network::NetworkMonitor;
use super::queue::{QueueError, QueueStats};
use super::registry::RegistryError;
use super::remote::RemoteStore;
use super::strategies;
use crate::db::{Database, DbError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const LAST_SYNC_SETTING: &str = "sync.last_sync_at";
const MIN_DRAIN_COOLDOWN: Duration = Duration::from_secs(1);

// ============================================================================
// Errors & Config
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Cannot sync while offline")]
    Offline,

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Strategy registration error: {0}")]
    Registry(#[from] RegistryError),
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub manager: QueueManagerConfig,
    /// Minimum gap between automatic drains triggered by connectivity
    /// regains. Values below one second are raised to one second.
    pub drain_cooldown: Duration,
    /// Whether regaining connectivity drains the queue automatically.
    /// When disabled, queued operations wait for an explicit `sync_now`.
    pub auto_sync: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            manager: QueueManagerConfig::default(),
            drain_cooldown: Duration::from_secs(1),
            auto_sync: true,
        }
    }
}

/// Snapshot of engine state for UI surfaces
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncStatus {
    pub is_online: bool,
    pub quality: ConnectionQuality,
    pub connection_label: String,
    pub is_processing: bool,
    pub pending_count: i64,
    pub failed_count: i64,
    pub dead_letter_count: i64,
    pub last_sync_at: Option<DateTime<Utc>>,
    /// True when operations are held in memory only after a persistence
    /// failure
    pub degraded: bool,
}

// ============================================================================
// Orchestrator
// ============================================================================

pub struct SyncOrchestrator {
    db: Database,
    manager: Arc<QueueManager>,
    monitor: Arc<NetworkMonitor>,
    cooldown: Duration,
    last_auto_drain: Mutex<Option<Instant>>,
    auto_sync: AtomicBool,
}

impl SyncOrchestrator {
    pub fn new(
        db: Database,
        remote: Arc<dyn RemoteStore>,
        config: SyncConfig,
    ) -> Result<Arc<Self>, SyncError> {
        let manager = Arc::new(QueueManager::new(db.clone(), config.manager)?);
        strategies::register_builtin(&manager, db.clone(), remote)?;

        let monitor = Arc::new(NetworkMonitor::new(NetworkState::unknown()));
        manager.set_monitor(monitor.clone());

        Ok(Arc::new(Self {
            db,
            manager,
            monitor,
            cooldown: config.drain_cooldown.max(MIN_DRAIN_COOLDOWN),
            last_auto_drain: Mutex::new(None),
            auto_sync: AtomicBool::new(config.auto_sync),
        }))
    }

    pub fn manager(&self) -> &Arc<QueueManager> {
        &self.manager
    }

    pub fn set_hooks(&self, hooks: SyncHooks) {
        self.manager.set_hooks(hooks);
    }

    // ========================================================================
    // Connectivity
    // ========================================================================

    /// Enable or disable automatic drains on connectivity regains.
    /// Queued operations still drain through `sync_now` while disabled.
    pub fn set_auto_sync(&self, enabled: bool) {
        self.auto_sync.store(enabled, Ordering::SeqCst);
        log::info!("Auto sync {}", if enabled { "enabled" } else { "disabled" });
    }

    pub fn auto_sync_enabled(&self) -> bool {
        self.auto_sync.load(Ordering::SeqCst)
    }

    /// Feed a connectivity change from the platform layer. Regaining
    /// connectivity schedules a background drain when auto sync is on,
    /// subject to the cooldown.
    pub fn update_network_state(self: &Arc<Self>, state: NetworkState) {
        let regained = self.monitor.handle_transition(state);
        if !regained {
            return;
        }

        log::info!("Connectivity regained");
        if !self.auto_sync_enabled() {
            log::debug!("Auto drain skipped, auto sync is disabled");
            return;
        }
        if !self.cooldown_elapsed() {
            log::debug!("Auto drain suppressed by cooldown");
            return;
        }

        let orchestrator = self.clone();
        tokio::spawn(async move {
            match orchestrator.manager.process_queue().await {
                Ok(summary) => {
                    if !summary.coalesced {
                        orchestrator.record_sync_completed();
                    }
                }
                Err(e) => log::error!("Automatic drain failed: {e}"),
            }
        });
    }

    fn cooldown_elapsed(&self) -> bool {
        let mut last = self.last_auto_drain.lock().expect("cooldown lock poisoned");
        let now = Instant::now();
        match *last {
            Some(previous) if now.duration_since(previous) < self.cooldown => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }

    pub fn network_state(&self) -> NetworkState {
        self.monitor.current_state()
    }

    // ========================================================================
    // Syncing
    // ========================================================================

    /// Drain the queue immediately. Bypasses the cooldown but fails fast
    /// when offline rather than burning the retry budget of every queued
    /// operation.
    pub async fn sync_now(&self) -> Result<DrainSummary, SyncError> {
        if !self.monitor.is_connected() {
            return Err(SyncError::Offline);
        }

        let summary = self.manager.process_queue().await?;
        if !summary.coalesced {
            self.record_sync_completed();
        }
        Ok(summary)
    }

    fn record_sync_completed(&self) {
        if let Err(e) = self.db.set_setting(LAST_SYNC_SETTING, &Utc::now()) {
            log::warn!("Failed to persist last sync timestamp: {e}");
        }
    }

    pub fn retry_failed(&self) -> Result<usize, SyncError> {
        Ok(self.manager.retry_failed_operations()?)
    }

    pub fn clear_completed(&self, older_than_days: Option<i64>) -> Result<usize, SyncError> {
        Ok(self.manager.clear_completed_operations(older_than_days)?)
    }

    pub fn get_operations(
        &self,
        status: Option<OperationStatus>,
    ) -> Result<Vec<Operation>, SyncError> {
        Ok(self.manager.get_operations(status)?)
    }

    pub fn status(&self) -> Result<SyncStatus, SyncError> {
        let stats: QueueStats = self.manager.stats()?;
        let state = self.monitor.current_state();
        let last_sync_at = self.db.get_setting(LAST_SYNC_SETTING)?;

        Ok(SyncStatus {
            is_online: state.connected,
            quality: state.quality(),
            connection_label: state.describe().to_string(),
            is_processing: self.manager.is_processing(),
            pending_count: stats.pending_count,
            failed_count: stats.failed_count,
            dead_letter_count: stats.dead_letter_count,
            last_sync_at,
            degraded: self.manager.is_degraded(),
        })
    }

    // ========================================================================
    // Enqueue conveniences
    // ========================================================================

    pub fn queue_match_creation(
        &self,
        payload: MatchCreatePayload,
        metadata: OperationMetadata,
    ) -> String {
        self.manager
            .add_operation(OperationPayload::CreateMatch(payload), metadata)
    }

    pub fn queue_match_update(
        &self,
        payload: MatchUpdatePayload,
        metadata: OperationMetadata,
    ) -> String {
        self.manager
            .add_operation(OperationPayload::UpdateMatch(payload), metadata)
    }

    pub fn queue_match_deletion(
        &self,
        payload: MatchDeletePayload,
        metadata: OperationMetadata,
    ) -> String {
        self.manager
            .add_operation(OperationPayload::DeleteMatch(payload), metadata)
    }

    pub fn queue_club_join(&self, payload: ClubJoinPayload, metadata: OperationMetadata) -> String {
        self.manager
            .add_operation(OperationPayload::JoinClub(payload), metadata)
    }

    pub fn queue_club_leave(
        &self,
        payload: ClubLeavePayload,
        metadata: OperationMetadata,
    ) -> String {
        self.manager
            .add_operation(OperationPayload::LeaveClub(payload), metadata)
    }

    pub fn queue_profile_update(
        &self,
        payload: ProfileUpdatePayload,
        metadata: OperationMetadata,
    ) -> String {
        self.manager
            .add_operation(OperationPayload::UpdateProfile(payload), metadata)
    }

    pub fn queue_challenge_creation(
        &self,
        payload: ChallengeCreatePayload,
        metadata: OperationMetadata,
    ) -> String {
        self.manager
            .add_operation(OperationPayload::CreateChallenge(payload), metadata)
    }

    pub fn queue_challenge_response(
        &self,
        payload: ChallengeRespondPayload,
        metadata: OperationMetadata,
    ) -> String {
        self.manager
            .add_operation(OperationPayload::RespondChallenge(payload), metadata)
    }

    pub fn queue_invitation_creation(
        &self,
        payload: InvitationCreatePayload,
        metadata: OperationMetadata,
    ) -> String {
        self.manager
            .add_operation(OperationPayload::CreateInvitation(payload), metadata)
    }

    pub fn queue_invitation_response(
        &self,
        payload: InvitationRespondPayload,
        metadata: OperationMetadata,
    ) -> String {
        self.manager
            .add_operation(OperationPayload::RespondInvitation(payload), metadata)
    }

    pub fn queue_invitation_cancellation(
        &self,
        payload: InvitationCancelPayload,
        metadata: OperationMetadata,
    ) -> String {
        self.manager
            .add_operation(OperationPayload::CancelInvitation(payload), metadata)
    }

    pub fn queue_invitation_confirmation(
        &self,
        payload: InvitationConfirmPayload,
        metadata: OperationMetadata,
    ) -> String {
        self.manager
            .add_operation(OperationPayload::ConfirmInvitation(payload), metadata)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::strategies::testing::MockRemote;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn build(remote: Arc<MockRemote>) -> Arc<SyncOrchestrator> {
        let db = Database::in_memory().expect("test db");
        SyncOrchestrator::new(db, remote, SyncConfig::default()).expect("orchestrator")
    }

    fn match_payload() -> MatchCreatePayload {
        MatchCreatePayload {
            club_id: "c1".to_string(),
            opponent_id: Some("u2".to_string()),
            scores: "6-4,6-3".to_string(),
            match_type: "singles".to_string(),
            played_at: None,
        }
    }

    #[tokio::test]
    async fn test_sync_now_refuses_offline() {
        let orchestrator = build(Arc::new(MockRemote::default()));
        orchestrator.update_network_state(NetworkState::offline());

        let result = orchestrator.sync_now().await;
        assert!(matches!(result, Err(SyncError::Offline)));
    }

    #[tokio::test]
    async fn test_offline_enqueue_then_online_drain() {
        let remote = Arc::new(MockRemote::default());
        let orchestrator = build(remote.clone());
        orchestrator.update_network_state(NetworkState::offline());

        orchestrator.queue_match_creation(
            match_payload(),
            OperationMetadata {
                local_id: Some("local-1".to_string()),
                ..OperationMetadata::default()
            },
        );

        // Queued but untouched while offline
        assert!(orchestrator.sync_now().await.is_err());
        assert_eq!(orchestrator.status().unwrap().pending_count, 1);

        orchestrator.update_network_state(NetworkState::wifi());
        // The automatic drain may be in flight; a manual sync either does the
        // work or coalesces, so poll until the queue settles
        for _ in 0..50 {
            let _ = orchestrator.sync_now().await;
            if orchestrator.status().unwrap().pending_count == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let status = orchestrator.status().unwrap();
        assert_eq!(status.pending_count, 0);
        assert!(status.last_sync_at.is_some());
        assert!(remote.get("match", "srv-1").is_some());
    }

    #[tokio::test]
    async fn test_regain_triggers_auto_drain() {
        let orchestrator = build(Arc::new(MockRemote::default()));

        let drains = Arc::new(AtomicUsize::new(0));
        let counter = drains.clone();
        orchestrator.set_hooks(SyncHooks {
            on_drain_started: Some(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })),
            ..SyncHooks::default()
        });

        orchestrator.update_network_state(NetworkState::offline());
        orchestrator.update_network_state(NetworkState::wifi());

        for _ in 0..50 {
            if drains.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(drains.load(Ordering::SeqCst), 1);

        // A second flap inside the cooldown window is suppressed
        orchestrator.update_network_state(NetworkState::offline());
        orchestrator.update_network_state(NetworkState::wifi());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(drains.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_regain_with_auto_sync_disabled_drains_nothing() {
        let db = Database::in_memory().expect("test db");
        let orchestrator = SyncOrchestrator::new(
            db,
            Arc::new(MockRemote::default()),
            SyncConfig {
                auto_sync: false,
                ..SyncConfig::default()
            },
        )
        .expect("orchestrator");

        let drains = Arc::new(AtomicUsize::new(0));
        let counter = drains.clone();
        orchestrator.set_hooks(SyncHooks {
            on_drain_started: Some(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })),
            ..SyncHooks::default()
        });

        orchestrator.queue_match_creation(match_payload(), OperationMetadata::default());

        orchestrator.update_network_state(NetworkState::offline());
        orchestrator.update_network_state(NetworkState::wifi());
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(drains.load(Ordering::SeqCst), 0);
        assert_eq!(orchestrator.status().unwrap().pending_count, 1);

        // Manual sync still drains, and re-enabling restores the automatic path
        orchestrator.set_auto_sync(true);
        orchestrator.sync_now().await.unwrap();
        assert_eq!(orchestrator.status().unwrap().pending_count, 0);
        assert_eq!(drains.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_status_reports_connection_label() {
        let orchestrator = build(Arc::new(MockRemote::default()));

        orchestrator.update_network_state(NetworkState::wifi());
        let status = orchestrator.status().unwrap();
        assert!(status.is_online);
        assert_eq!(status.quality, ConnectionQuality::Excellent);

        orchestrator.update_network_state(NetworkState::offline());
        let status = orchestrator.status().unwrap();
        assert!(!status.is_online);
        assert_eq!(status.quality, ConnectionQuality::Offline);
    }

    #[tokio::test]
    async fn test_retry_failed_via_facade() {
        let orchestrator = build(Arc::new(MockRemote::default()));
        orchestrator.update_network_state(NetworkState::wifi());

        // An empty id fails validation and dead-letters on the first drain
        orchestrator.queue_invitation_cancellation(
            InvitationCancelPayload {
                invitation_id: String::new(),
            },
            OperationMetadata::default(),
        );

        orchestrator.sync_now().await.unwrap();
        assert_eq!(orchestrator.status().unwrap().dead_letter_count, 1);

        let reset = orchestrator.retry_failed().unwrap();
        assert_eq!(reset, 1);
        assert_eq!(orchestrator.status().unwrap().pending_count, 1);
    }
}
