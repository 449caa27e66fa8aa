//! Sync engine for the offline catch queue
//!
//! The engine drains queued catch creations against the remote endpoint
//! whenever connectivity is available:
//! - Entries are submitted sequentially, oldest first
//! - Each submission carries the entry's local id as idempotency token
//! - At most one pass runs at a time; extra triggers are coalesced

mod engine;
mod events;

pub use engine::SyncEngine;
pub use events::{AbortReason, PassOutcome, SyncEvent, SyncReport};
