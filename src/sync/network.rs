//! Network Monitor
//!
//! Maintains the current network state, notifies subscribers on transitions,
//! and answers "is it worth trying" for the drain loop. Wraps a platform
//! connectivity probe and degrades to an unknown/offline state when the
//! probe is unavailable rather than crashing.

use super::models::{ConnectionQuality, NetworkState};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("Connectivity probe failed: {0}")]
    ProbeFailed(String),
}

/// Platform connectivity signal the monitor wraps
pub trait ConnectivityProbe: Send + Sync {
    /// Synchronous fetch of the current connectivity state
    fn current_state(&self) -> Result<NetworkState, NetworkError>;
}

pub type SubscriberId = u64;
type Subscriber = Arc<dyn Fn(NetworkState) + Send + Sync>;

/// Observes connectivity transitions and exposes a subscription interface
pub struct NetworkMonitor {
    state: RwLock<NetworkState>,
    subscribers: Mutex<HashMap<SubscriberId, Subscriber>>,
    next_id: AtomicU64,
}

impl NetworkMonitor {
    pub fn new(initial: NetworkState) -> Self {
        Self {
            state: RwLock::new(initial),
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Initialize from a platform probe. A failing probe degrades to the
    /// unknown state instead of propagating.
    pub fn from_probe(probe: &dyn ConnectivityProbe) -> Self {
        let initial = match probe.current_state() {
            Ok(state) => state,
            Err(e) => {
                log::warn!("Connectivity probe unavailable at startup: {e}");
                NetworkState::unknown()
            }
        };
        Self::new(initial)
    }

    pub fn current_state(&self) -> NetworkState {
        *self.state.read().expect("network state lock poisoned")
    }

    pub fn is_connected(&self) -> bool {
        self.current_state().connected
    }

    pub fn quality(&self) -> ConnectionQuality {
        self.current_state().quality()
    }

    /// Register a subscriber invoked on every state transition
    pub fn subscribe(&self, f: impl Fn(NetworkState) + Send + Sync + 'static) -> SubscriberId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .lock()
            .expect("subscriber lock poisoned")
            .insert(id, Arc::new(f));
        id
    }

    pub fn unsubscribe(&self, id: SubscriberId) {
        self.subscribers
            .lock()
            .expect("subscriber lock poisoned")
            .remove(&id);
    }

    #[cfg(test)]
    pub(crate) fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }

    /// Feed a connectivity transition from the platform signal.
    ///
    /// Recomputes the state and notifies all subscribers with the new value.
    /// Returns true when this was an offline-to-online transition.
    pub fn handle_transition(&self, new_state: NetworkState) -> bool {
        let previous = {
            let mut guard = self.state.write().expect("network state lock poisoned");
            let previous = *guard;
            *guard = new_state;
            previous
        };

        if previous == new_state {
            return false;
        }

        log::info!(
            "Network transition: {} -> {}",
            previous.describe(),
            new_state.describe()
        );

        // Collect outside the lock so a slow subscriber cannot block
        // subscribe/unsubscribe.
        let subscribers: Vec<Subscriber> = self
            .subscribers
            .lock()
            .expect("subscriber lock poisoned")
            .values()
            .cloned()
            .collect();

        for subscriber in subscribers {
            subscriber(new_state);
        }

        !previous.connected && new_state.connected
    }

    /// Re-read the probe and apply whatever it reports now
    pub fn refresh(&self, probe: &dyn ConnectivityProbe) -> bool {
        match probe.current_state() {
            Ok(state) => self.handle_transition(state),
            Err(e) => {
                log::warn!("Connectivity probe failed, treating as unknown: {e}");
                self.handle_transition(NetworkState::unknown())
            }
        }
    }

    /// Wait until connected, up to `timeout`.
    ///
    /// Resolves true immediately when already connected, true on the next
    /// connected transition, false when the timeout elapses first. The
    /// subscription is removed on every exit path.
    pub async fn wait_for_connection(&self, timeout: std::time::Duration) -> bool {
        if self.is_connected() {
            return true;
        }

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let tx = Arc::new(Mutex::new(Some(tx)));

        let id = self.subscribe(move |state| {
            if state.connected {
                if let Some(tx) = tx.lock().expect("waiter lock poisoned").take() {
                    let _ = tx.send(());
                }
            }
        });

        // The transition may have happened between the check and the
        // subscription; re-check so the waiter cannot miss it.
        if self.is_connected() {
            self.unsubscribe(id);
            return true;
        }

        let connected = tokio::time::timeout(timeout, rx).await.is_ok();
        self.unsubscribe(id);
        connected
    }
}

// ============================================================================
// Tests
// ============================================================================
