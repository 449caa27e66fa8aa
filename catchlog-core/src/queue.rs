//! Offline queue facade for UI layers
//!
//! [`OfflineQueue`] is what banners and buttons bind to: pending count,
//! syncing flag, offline flag, a manual "sync now" trigger, and an observer
//! subscription. It owns no policy of its own; everything is delegated to
//! the store, the engine and the connectivity monitor.
//!
//! Build one at app start and call [`OfflineQueue::reset`] on logout.

use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::api::{CatchEndpoint, SubmitError, SubmitErrorKind};
use crate::config::SyncConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::db::Database;
use crate::error::Result;
use crate::sync::{PassOutcome, SyncEngine, SyncEvent};
use crate::types::{new_local_id, CatchCreateInput, CatchRecord, PendingCatchMutation};

/// Aggregate state for a banner
#[derive(Debug, Clone, PartialEq)]
pub struct QueueStatus {
    pub pending_count: usize,
    pub is_syncing: bool,
    pub is_offline: bool,
    /// Terminal failures the user has to retry, edit or discard
    pub needs_attention: Vec<PendingCatchMutation>,
}

/// Why a submitted catch went to the queue instead of the server
#[derive(Debug, Clone, PartialEq)]
pub enum QueueReason {
    Offline,
    /// Older entries are still queued; sending now would break ordering
    BehindQueue,
    /// Direct submission failed transiently
    Transient(SubmitError),
}

/// Result of [`OfflineQueue::submit`]
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// The server created the catch right away
    Created(CatchRecord),
    /// The catch is stored locally and will be synced later
    Queued {
        local_id: String,
        reason: QueueReason,
    },
    /// The server refused it (validation or auth); nothing was queued
    Rejected(SubmitError),
}

/// Observer handle. Dropping it unsubscribes.
pub struct Subscription {
    rx: broadcast::Receiver<SyncEvent>,
}

impl Subscription {
    /// Next event, or `None` once the queue is gone.
    ///
    /// A slow subscriber that falls behind skips the events it missed.
    pub async fn recv(&mut self) -> Option<SyncEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Queue subscriber lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

/// Offline catch queue, as seen by the UI
pub struct OfflineQueue {
    engine: Arc<SyncEngine>,
    monitor: Arc<ConnectivityMonitor>,
    endpoint: Arc<dyn CatchEndpoint>,
    auto_sync: bool,
    auto_sync_task: Mutex<Option<JoinHandle<()>>>,
}

impl OfflineQueue {
    /// Wire up the queue. Entries a crash left mid-sync are made pending again.
    pub fn new(
        db: Arc<Database>,
        endpoint: Arc<dyn CatchEndpoint>,
        monitor: Arc<ConnectivityMonitor>,
        config: &SyncConfig,
    ) -> Result<Self> {
        config.validate()?;
        db.recover_interrupted()?;

        let engine = Arc::new(SyncEngine::new(
            db,
            Arc::clone(&endpoint),
            config.max_attempts,
        ));

        Ok(Self {
            engine,
            monitor,
            endpoint,
            auto_sync: config.auto_sync,
            auto_sync_task: Mutex::new(None),
        })
    }

    /// Start syncing on reconnect (if enabled). Must run inside a tokio runtime.
    pub fn start(&self) {
        if !self.auto_sync {
            return;
        }
        let mut task = self.auto_sync_task.lock().unwrap();
        if task.is_none() {
            *task = Some(self.engine.spawn_auto_sync(self.monitor.reconnects()));
            tracing::debug!("Auto-sync started");
        }
    }

    /// Stop syncing on reconnect
    pub fn stop(&self) {
        if let Some(task) = self.auto_sync_task.lock().unwrap().take() {
            task.abort();
        }
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    fn db(&self) -> &Database {
        self.engine.database()
    }

    // ============================================
    // Observation
    // ============================================

    pub fn pending_count(&self) -> Result<usize> {
        self.db().count()
    }

    pub fn is_syncing(&self) -> bool {
        self.engine.is_syncing()
    }

    pub fn is_offline(&self) -> bool {
        self.monitor.is_offline()
    }

    pub fn list(&self) -> Result<Vec<PendingCatchMutation>> {
        self.db().list()
    }

    pub fn snapshot(&self) -> Result<QueueStatus> {
        Ok(QueueStatus {
            pending_count: self.pending_count()?,
            is_syncing: self.is_syncing(),
            is_offline: self.is_offline(),
            needs_attention: self.db().list_needing_attention(self.engine.max_attempts())?,
        })
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription {
            rx: self.engine.subscribe(),
        }
    }

    // ============================================
    // Actions
    // ============================================

    /// Trigger a pass in the background.
    ///
    /// Returns `None` without doing anything while offline or while a pass is
    /// already running.
    pub fn sync_now(&self) -> Option<JoinHandle<PassOutcome>> {
        if self.is_offline() {
            tracing::debug!("Offline, sync trigger ignored");
            return None;
        }
        self.engine.sync_now()
    }

    /// Store a catch for later sync
    pub fn enqueue(&self, payload: &CatchCreateInput) -> Result<String> {
        let local_id = self.db().enqueue(payload)?;
        self.notify_changed();
        Ok(local_id)
    }

    /// Log a catch: send it now when possible, queue it otherwise.
    ///
    /// Catches go through the queue while older entries are waiting, so the
    /// server sees them in the order they were logged.
    pub async fn submit(&self, payload: CatchCreateInput) -> Result<SubmitOutcome> {
        if self.is_offline() {
            let local_id = self.enqueue(&payload)?;
            return Ok(SubmitOutcome::Queued {
                local_id,
                reason: QueueReason::Offline,
            });
        }

        if !self.db().list_syncable(self.engine.max_attempts())?.is_empty() {
            let local_id = self.enqueue(&payload)?;
            self.sync_now();
            return Ok(SubmitOutcome::Queued {
                local_id,
                reason: QueueReason::BehindQueue,
            });
        }

        let local_id = new_local_id();
        match self.endpoint.create_catch(&payload, &local_id).await {
            Ok(record) => Ok(SubmitOutcome::Created(record)),
            Err(error) if error.kind == SubmitErrorKind::Transient => {
                tracing::info!(local_id = %local_id, error = %error, "Submission failed, queueing catch");
                let mutation =
                    PendingCatchMutation::with_local_id(local_id.clone(), payload, chrono::Utc::now());
                self.db().enqueue_mutation(&mutation)?;
                self.notify_changed();
                Ok(SubmitOutcome::Queued {
                    local_id,
                    reason: QueueReason::Transient(error),
                })
            }
            Err(error) => Ok(SubmitOutcome::Rejected(error)),
        }
    }

    /// Make a failed entry eligible for automatic sync again
    pub fn retry(&self, local_id: &str) -> Result<()> {
        self.db().retry_mutation(local_id)?;
        self.notify_changed();
        Ok(())
    }

    /// Replace a failed entry's payload after the user fixed it
    pub fn update_payload(&self, local_id: &str, payload: &CatchCreateInput) -> Result<()> {
        self.db().update_payload(local_id, payload)?;
        self.notify_changed();
        Ok(())
    }

    /// Drop an entry without sending it
    pub fn discard(&self, local_id: &str) -> Result<()> {
        self.db().discard_mutation(local_id)?;
        self.notify_changed();
        Ok(())
    }

    /// Logout: forget every unsent catch of the signed-out angler
    pub fn reset(&self) -> Result<usize> {
        let cleared = self.db().clear_queue()?;
        tracing::info!(cleared, "Offline queue reset");
        self.notify_changed();
        Ok(cleared)
    }

    fn notify_changed(&self) {
        match self.pending_count() {
            Ok(pending) => self.engine.emit(SyncEvent::QueueChanged { pending }),
            Err(e) => tracing::warn!(error = %e, "Failed to count queued catches"),
        }
    }
}

impl Drop for OfflineQueue {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectivity::NetworkStatus;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Always answers with the same result
    struct Fixed {
        error: Option<SubmitError>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CatchEndpoint for Fixed {
        async fn create_catch(
            &self,
            _input: &CatchCreateInput,
            idempotency_key: &str,
        ) -> std::result::Result<CatchRecord, SubmitError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.error {
                Some(err) => Err(err.clone()),
                None => Ok(CatchRecord {
                    id: format!("remote-{}", idempotency_key),
                    spot_id: None,
                    species_id: None,
                    caught_at: None,
                }),
            }
        }
    }

    fn queue_with(error: Option<SubmitError>, status: NetworkStatus) -> (OfflineQueue, Arc<Fixed>) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.migrate().unwrap();
        let endpoint = Arc::new(Fixed {
            error,
            calls: AtomicUsize::new(0),
        });
        let monitor = Arc::new(ConnectivityMonitor::new(status));
        let queue =
            OfflineQueue::new(db, endpoint.clone(), monitor, &SyncConfig::default()).unwrap();
        (queue, endpoint)
    }

    fn catch() -> CatchCreateInput {
        CatchCreateInput::new("spot-3", "carp", chrono::Utc::now())
    }

    #[tokio::test]
    async fn test_submit_offline_queues_without_network() {
        let (queue, endpoint) = queue_with(None, NetworkStatus::Offline);

        let outcome = queue.submit(catch()).await.unwrap();
        assert!(matches!(
            outcome,
            SubmitOutcome::Queued {
                reason: QueueReason::Offline,
                ..
            }
        ));
        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 0);
        assert_eq!(queue.pending_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_submit_online_creates_directly() {
        let (queue, _) = queue_with(None, NetworkStatus::Online);

        let outcome = queue.submit(catch()).await.unwrap();
        assert!(matches!(outcome, SubmitOutcome::Created(_)));
        assert_eq!(queue.pending_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_transient_failure_queues_under_same_local_id() {
        let (queue, _) = queue_with(Some(SubmitError::from_status(502, "gateway")), NetworkStatus::Online);

        let outcome = queue.submit(catch()).await.unwrap();
        let SubmitOutcome::Queued { local_id, reason } = outcome else {
            panic!("expected catch to be queued");
        };
        assert!(matches!(reason, QueueReason::Transient(_)));
        assert!(queue.list().unwrap().iter().any(|m| m.local_id == local_id));
    }

    #[tokio::test]
    async fn test_validation_failure_is_returned_not_queued() {
        let (queue, _) = queue_with(Some(SubmitError::validation("no species")), NetworkStatus::Online);

        let outcome = queue.submit(catch()).await.unwrap();
        assert!(matches!(outcome, SubmitOutcome::Rejected(_)));
        assert_eq!(queue.pending_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_sync_now_is_noop_offline() {
        let (queue, endpoint) = queue_with(None, NetworkStatus::Offline);
        queue.enqueue(&catch()).unwrap();

        assert!(queue.sync_now().is_none());
        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_subscribers_see_queue_changes() {
        let (queue, _) = queue_with(None, NetworkStatus::Offline);
        let mut sub = queue.subscribe();

        let local_id = queue.enqueue(&catch()).unwrap();
        assert_eq!(sub.recv().await, Some(SyncEvent::QueueChanged { pending: 1 }));

        queue.discard(&local_id).unwrap();
        assert_eq!(sub.recv().await, Some(SyncEvent::QueueChanged { pending: 0 }));
    }

    #[tokio::test]
    async fn test_reset_clears_queue() {
        let (queue, _) = queue_with(None, NetworkStatus::Offline);
        queue.enqueue(&catch()).unwrap();
        queue.enqueue(&catch()).unwrap();

        assert_eq!(queue.reset().unwrap(), 2);
        let status = queue.snapshot().unwrap();
        assert_eq!(status.pending_count, 0);
        assert!(status.is_offline);
        assert!(!status.is_syncing);
    }
}
