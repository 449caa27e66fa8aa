//! Events and reports emitted by sync passes

use chrono::{DateTime, Utc};

use crate::api::SubmitError;
use crate::db::SyncPassRecord;

/// Why a pass stopped before reaching the end of the queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    /// The endpoint answered 401; remaining entries wait for re-authentication
    Auth(String),
    /// The queue could not record an outcome
    Storage(String),
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AbortReason::Auth(msg) => write!(f, "auth: {}", msg),
            AbortReason::Storage(msg) => write!(f, "storage: {}", msg),
        }
    }
}

/// Per-pass counters
#[derive(Debug, Clone, PartialEq)]
pub struct SyncReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Entries handed to the endpoint
    pub submitted: usize,
    /// Entries confirmed and removed
    pub synced: usize,
    /// Entries that failed transiently and stay retryable
    pub failed: usize,
    /// Entries that failed terminally in this pass
    pub terminal: usize,
    pub aborted: Option<AbortReason>,
}

impl SyncReport {
    pub(crate) fn started() -> Self {
        let now = Utc::now();
        Self {
            started_at: now,
            finished_at: now,
            submitted: 0,
            synced: 0,
            failed: 0,
            terminal: 0,
            aborted: None,
        }
    }

    /// True if nothing failed and the pass ran to the end
    pub fn is_clean(&self) -> bool {
        self.aborted.is_none() && self.failed == 0 && self.terminal == 0
    }

    pub fn to_record(&self) -> SyncPassRecord {
        SyncPassRecord {
            started_at: self.started_at,
            finished_at: self.finished_at,
            submitted: self.submitted,
            synced: self.synced,
            failed: self.failed,
            terminal: self.terminal,
            aborted: self.aborted.as_ref().map(|r| r.to_string()),
        }
    }
}

/// Result of asking the engine for a pass
#[derive(Debug, Clone, PartialEq)]
pub enum PassOutcome {
    /// This call ran the pass
    Completed(SyncReport),
    /// Another pass was in flight; this trigger was coalesced into it
    AlreadyRunning,
}

/// Observer notifications from the queue and its engine
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    PassStarted,
    ItemSynced {
        local_id: String,
        remote_id: String,
    },
    ItemFailed {
        local_id: String,
        error: SubmitError,
        attempts: u32,
        terminal: bool,
    },
    PassFinished(SyncReport),
    /// The set of queued entries changed outside a pass (enqueue, discard, ...)
    QueueChanged {
        pending: usize,
    },
}
