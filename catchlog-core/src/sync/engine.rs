//! Queue-draining sync engine
//!
//! A pass walks the syncable entries oldest first and submits them one at a
//! time, forwarding each entry's local id as the idempotency token. Outcomes:
//!
//! | Endpoint result | Entry becomes | Pass |
//! |-----------------|---------------|------|
//! | success | removed | continues |
//! | transient (network, 408, 429, 5xx) | FAILED, retried next pass; terminal at the attempt cap | continues |
//! | validation (other 4xx) | FAILED, terminal | continues |
//! | auth (401) | PENDING again, attempt not counted | aborts |
//!
//! Only one pass runs per engine; a trigger that arrives while a pass is in
//! flight is a no-op.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::api::{CatchEndpoint, SubmitErrorKind};
use crate::connectivity::Reconnects;
use crate::db::Database;
use crate::error::Error;
use crate::types::PendingCatchMutation;

use super::events::{AbortReason, PassOutcome, SyncEvent, SyncReport};

const EVENT_CAPACITY: usize = 64;

/// Drains the offline queue against a [`CatchEndpoint`]
pub struct SyncEngine {
    db: Arc<Database>,
    endpoint: Arc<dyn CatchEndpoint>,
    max_attempts: u32,
    syncing: AtomicBool,
    syncing_tx: watch::Sender<bool>,
    events: broadcast::Sender<SyncEvent>,
}

/// Clears the in-flight flag however the pass ends, including task abort.
struct PassGuard<'a> {
    engine: &'a SyncEngine,
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.engine.syncing.store(false, Ordering::Release);
        self.engine.syncing_tx.send_replace(false);
    }
}

/// What happened to one entry
enum ItemOutcome {
    Synced,
    Failed,
    Terminal,
    Skipped,
    Abort(AbortReason),
}

impl SyncEngine {
    pub fn new(db: Arc<Database>, endpoint: Arc<dyn CatchEndpoint>, max_attempts: u32) -> Self {
        let (syncing_tx, _) = watch::channel(false);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            db,
            endpoint,
            max_attempts: max_attempts.max(1),
            syncing: AtomicBool::new(false),
            syncing_tx,
            events,
        }
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::Acquire)
    }

    /// Syncing/idle flag for UI bindings
    pub fn syncing_watch(&self) -> watch::Receiver<bool> {
        self.syncing_tx.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub(crate) fn emit(&self, event: SyncEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Start a pass in the background and return immediately.
    ///
    /// Returns `None` when a pass is already running.
    pub fn sync_now(self: &Arc<Self>) -> Option<JoinHandle<PassOutcome>> {
        if self.is_syncing() {
            tracing::debug!("Sync already in progress, trigger coalesced");
            return None;
        }
        let engine = Arc::clone(self);
        Some(tokio::spawn(async move { engine.run_pass().await }))
    }

    /// Run one pass on every offline → online transition until the monitor
    /// goes away.
    pub fn spawn_auto_sync(self: &Arc<Self>, mut reconnects: Reconnects) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            while reconnects.next().await.is_some() {
                tracing::info!("Connectivity regained, starting sync pass");
                engine.run_pass().await;
            }
            tracing::debug!("Connectivity monitor closed, auto-sync stopped");
        })
    }

    /// Run a pass on the current task. Never fails; problems are in the report.
    pub async fn run_pass(&self) -> PassOutcome {
        if self
            .syncing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Sync already in progress, trigger coalesced");
            return PassOutcome::AlreadyRunning;
        }
        let _guard = PassGuard { engine: self };
        self.syncing_tx.send_replace(true);
        self.emit(SyncEvent::PassStarted);

        let mut report = SyncReport::started();
        self.drain(&mut report).await;
        report.finished_at = Utc::now();

        if let Err(e) = self.db.record_sync_pass(&report.to_record()) {
            tracing::warn!(error = %e, "Failed to record sync pass");
        }

        tracing::info!(
            submitted = report.submitted,
            synced = report.synced,
            failed = report.failed,
            terminal = report.terminal,
            aborted = ?report.aborted,
            "Sync pass finished"
        );
        self.emit(SyncEvent::PassFinished(report.clone()));

        PassOutcome::Completed(report)
    }

    async fn drain(&self, report: &mut SyncReport) {
        let queue = match self.db.list_syncable(self.max_attempts) {
            Ok(queue) => queue,
            Err(e) => {
                tracing::error!(error = %e, "Failed to read offline queue");
                report.aborted = Some(AbortReason::Storage(e.to_string()));
                return;
            }
        };

        tracing::debug!(count = queue.len(), "Draining offline queue");

        for mutation in queue {
            match self.sync_one(&mutation, report).await {
                ItemOutcome::Synced => report.synced += 1,
                ItemOutcome::Failed => report.failed += 1,
                ItemOutcome::Terminal => report.terminal += 1,
                ItemOutcome::Skipped => {}
                ItemOutcome::Abort(reason) => {
                    report.aborted = Some(reason);
                    break;
                }
            }
        }
    }

    async fn sync_one(&self, mutation: &PendingCatchMutation, report: &mut SyncReport) -> ItemOutcome {
        let local_id = mutation.local_id.as_str();

        match self.db.mark_syncing(local_id) {
            Ok(()) => {}
            // Discarded by the user since the pass read the queue
            Err(Error::MutationNotFound(_)) => return ItemOutcome::Skipped,
            Err(e) => return storage_abort(local_id, e),
        }
        report.submitted += 1;

        let error = match self.endpoint.create_catch(&mutation.payload, local_id).await {
            Ok(record) => {
                match self.db.mark_synced(local_id) {
                    Ok(()) | Err(Error::MutationNotFound(_)) => {}
                    Err(e) => return storage_abort(local_id, e),
                }
                tracing::debug!(local_id, remote_id = %record.id, "Catch synced");
                self.emit(SyncEvent::ItemSynced {
                    local_id: local_id.to_string(),
                    remote_id: record.id,
                });
                return ItemOutcome::Synced;
            }
            Err(error) => error,
        };

        if error.kind == SubmitErrorKind::Auth {
            tracing::warn!(local_id, error = %error, "Catch API rejected credentials, aborting pass");
            return match self.db.mark_pending(local_id) {
                Ok(()) | Err(Error::MutationNotFound(_)) => {
                    ItemOutcome::Abort(AbortReason::Auth(error.message))
                }
                // Left SYNCING, no pass would pick it up again
                Err(e) => storage_abort(local_id, e),
            };
        }

        // The cap is checked against the stored count, not the one read at
        // the start of the pass
        let recorded = match error.kind {
            SubmitErrorKind::Transient => {
                self.db
                    .record_transient_failure(local_id, &error.to_string(), self.max_attempts)
            }
            _ => self
                .db
                .mark_failed(local_id, &error.to_string(), true)
                .map(|attempts| (attempts, true)),
        };

        let (attempts, terminal) = match recorded {
            Ok(recorded) => recorded,
            Err(Error::MutationNotFound(_)) => return ItemOutcome::Skipped,
            Err(e) => return storage_abort(local_id, e),
        };

        if terminal {
            tracing::warn!(local_id, attempts, error = %error, "Catch needs user attention");
        } else {
            tracing::info!(local_id, attempts, error = %error, "Catch sync failed, will retry");
        }

        self.emit(SyncEvent::ItemFailed {
            local_id: local_id.to_string(),
            error,
            attempts,
            terminal,
        });

        if terminal {
            ItemOutcome::Terminal
        } else {
            ItemOutcome::Failed
        }
    }
}

fn storage_abort(local_id: &str, error: Error) -> ItemOutcome {
    tracing::error!(local_id, error = %error, "Failed to persist sync state, aborting pass");
    ItemOutcome::Abort(AbortReason::Storage(error.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::SubmitError;
    use crate::types::{CatchCreateInput, CatchRecord, MutationStatus};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::sync::Mutex;

    /// Replies with a fixed error for listed ids, success otherwise
    struct Scripted {
        failures: Vec<(&'static str, SubmitError)>,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CatchEndpoint for Scripted {
        async fn create_catch(
            &self,
            _input: &CatchCreateInput,
            idempotency_key: &str,
        ) -> std::result::Result<CatchRecord, SubmitError> {
            self.calls.lock().unwrap().push(idempotency_key.to_string());
            match self.failures.iter().find(|(id, _)| *id == idempotency_key) {
                Some((_, err)) => Err(err.clone()),
                None => Ok(CatchRecord {
                    id: format!("remote-{}", idempotency_key),
                    spot_id: None,
                    species_id: None,
                    caught_at: None,
                }),
            }
        }
    }

    fn engine_with(ids: &[&str], failures: Vec<(&'static str, SubmitError)>) -> (SyncEngine, Arc<Scripted>) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.migrate().unwrap();
        for (i, id) in ids.iter().enumerate() {
            let at = Utc.timestamp_opt(1_700_000_000 + i as i64, 0).unwrap();
            let payload = CatchCreateInput::new("spot", "bass", at);
            db.enqueue_mutation(&PendingCatchMutation::with_local_id(*id, payload, at))
                .unwrap();
        }
        let endpoint = Arc::new(Scripted {
            failures,
            calls: Mutex::new(Vec::new()),
        });
        let engine = SyncEngine::new(db, endpoint.clone(), 5);
        (engine, endpoint)
    }

    /// Holds every submission until the test releases it
    struct Gated {
        failures: Vec<(&'static str, SubmitError)>,
        calls: Mutex<Vec<String>>,
        gate: tokio::sync::Semaphore,
        entered: tokio::sync::Notify,
    }

    #[async_trait]
    impl CatchEndpoint for Gated {
        async fn create_catch(
            &self,
            _input: &CatchCreateInput,
            idempotency_key: &str,
        ) -> std::result::Result<CatchRecord, SubmitError> {
            self.calls.lock().unwrap().push(idempotency_key.to_string());
            self.entered.notify_one();
            self.gate.acquire().await.unwrap().forget();
            match self.failures.iter().find(|(id, _)| *id == idempotency_key) {
                Some((_, err)) => Err(err.clone()),
                None => Ok(CatchRecord {
                    id: format!("remote-{}", idempotency_key),
                    spot_id: None,
                    species_id: None,
                    caught_at: None,
                }),
            }
        }
    }

    fn gated_engine(
        ids: &[&str],
        failures: Vec<(&'static str, SubmitError)>,
    ) -> (Arc<SyncEngine>, Arc<Gated>) {
        let (engine, _) = engine_with(ids, vec![]);
        let endpoint = Arc::new(Gated {
            failures,
            calls: Mutex::new(Vec::new()),
            gate: tokio::sync::Semaphore::new(0),
            entered: tokio::sync::Notify::new(),
        });
        let engine = SyncEngine::new(engine.database().clone(), endpoint.clone(), 5);
        (Arc::new(engine), endpoint)
    }

    /// Start a pass and wait until the first submission is in flight
    async fn start_held_pass(
        engine: &Arc<SyncEngine>,
        endpoint: &Gated,
    ) -> JoinHandle<PassOutcome> {
        let pass = engine.sync_now().expect("no pass running");
        endpoint.entered.notified().await;
        pass
    }

    fn report(outcome: PassOutcome) -> SyncReport {
        match outcome {
            PassOutcome::Completed(report) => report,
            PassOutcome::AlreadyRunning => panic!("expected a pass to run"),
        }
    }

    #[tokio::test]
    async fn test_validation_error_is_terminal_and_pass_continues() {
        let (engine, endpoint) =
            engine_with(&["a", "b", "c"], vec![("b", SubmitError::validation("bad weight"))]);

        let report = report(engine.run_pass().await);
        assert_eq!(report.synced, 2);
        assert_eq!(report.terminal, 1);
        assert!(report.aborted.is_none());
        assert_eq!(*endpoint.calls.lock().unwrap(), vec!["a", "b", "c"]);

        let b = engine.database().get_mutation("b").unwrap().unwrap();
        assert!(b.needs_attention(5));
        assert_eq!(b.attempts, 1);
    }

    #[tokio::test]
    async fn test_transient_error_stays_retryable() {
        let (engine, _) = engine_with(
            &["a", "b"],
            vec![("a", SubmitError::from_status(503, "busy"))],
        );

        let report = report(engine.run_pass().await);
        assert_eq!(report.failed, 1);
        assert_eq!(report.synced, 1);

        let a = engine.database().get_mutation("a").unwrap().unwrap();
        assert_eq!(a.status, MutationStatus::Failed);
        assert!(!a.terminal);
        assert_eq!(engine.database().list_syncable(5).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_pass_records_history_and_resets_flag() {
        let (engine, _) = engine_with(&["a"], vec![]);
        let mut syncing = engine.syncing_watch();

        report(engine.run_pass().await);

        assert!(!engine.is_syncing());
        assert!(!*syncing.borrow_and_update());
        let last = engine.database().last_sync_pass().unwrap().unwrap();
        assert_eq!(last.synced, 1);
    }

    #[tokio::test]
    async fn test_events_emitted_in_order() {
        let (engine, _) = engine_with(&["a"], vec![]);
        let mut events = engine.subscribe();

        report(engine.run_pass().await);

        assert_eq!(events.recv().await.unwrap(), SyncEvent::PassStarted);
        assert!(matches!(
            events.recv().await.unwrap(),
            SyncEvent::ItemSynced { ref local_id, .. } if local_id == "a"
        ));
        assert!(matches!(
            events.recv().await.unwrap(),
            SyncEvent::PassFinished(ref r) if r.synced == 1
        ));
    }

    #[tokio::test]
    async fn test_retry_during_pass_restarts_attempt_count() {
        let (engine, endpoint) = gated_engine(
            &["a", "b"],
            vec![("b", SubmitError::from_status(503, "unavailable"))],
        );
        let db = engine.database().clone();
        for _ in 0..4 {
            db.mark_failed("b", "timeout", false).unwrap();
        }

        let pass = start_held_pass(&engine, &endpoint).await;
        // User retries "b" while "a" is still being sent
        db.retry_mutation("b").unwrap();
        endpoint.gate.add_permits(10);

        let report = report(pass.await.unwrap());
        assert_eq!(report.failed, 1);
        assert_eq!(report.terminal, 0);

        let b = db.get_mutation("b").unwrap().unwrap();
        assert_eq!(b.attempts, 1);
        assert!(!b.terminal);
        assert!(!b.needs_attention(5));
    }

    #[tokio::test]
    async fn test_discard_during_pass_skips_entry() {
        let (engine, endpoint) = gated_engine(&["a", "b", "c"], vec![]);
        let db = engine.database().clone();

        let pass = start_held_pass(&engine, &endpoint).await;
        db.discard_mutation("a").unwrap();
        db.discard_mutation("b").unwrap();
        endpoint.gate.add_permits(10);

        let report = report(pass.await.unwrap());
        assert_eq!(*endpoint.calls.lock().unwrap(), vec!["a", "c"]);
        assert_eq!(report.submitted, 2);
        assert_eq!(report.synced, 2);
        assert!(report.aborted.is_none());
        assert_eq!(db.count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failure_of_discarded_entry_is_not_recorded() {
        let (engine, endpoint) = gated_engine(
            &["a", "b"],
            vec![("a", SubmitError::from_status(503, "unavailable"))],
        );
        let db = engine.database().clone();
        let mut events = engine.subscribe();

        let pass = start_held_pass(&engine, &endpoint).await;
        db.discard_mutation("a").unwrap();
        endpoint.gate.add_permits(10);

        let report = report(pass.await.unwrap());
        assert_eq!(report.failed, 0);
        assert_eq!(report.synced, 1);
        assert!(report.is_clean());
        assert!(db.get_mutation("a").unwrap().is_none());

        while let Ok(event) = events.try_recv() {
            assert!(!matches!(event, SyncEvent::ItemFailed { .. }));
        }
    }

    #[tokio::test]
    async fn test_auth_revert_failure_aborts_as_storage() {
        let (engine, endpoint) =
            gated_engine(&["a", "b"], vec![("a", SubmitError::auth("token expired"))]);
        let db = engine.database().clone();

        let pass = start_held_pass(&engine, &endpoint).await;
        db.connection()
            .execute_batch("DROP TABLE pending_catches")
            .unwrap();
        endpoint.gate.add_permits(10);

        let report = report(pass.await.unwrap());
        assert!(matches!(report.aborted, Some(AbortReason::Storage(_))));
        assert!(!report.is_clean());
        assert_eq!(*endpoint.calls.lock().unwrap(), vec!["a"]);
        assert!(!engine.is_syncing());
    }
}
