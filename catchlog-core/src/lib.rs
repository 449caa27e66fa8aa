//! # catchlog-core
//!
//! Core library for catchlog - the offline queue behind catch logging.
//!
//! Catches logged without connectivity are stored locally and pushed to the
//! catch API once the device is back online.
//!
//! This library provides:
//! - Domain types for catches and queued mutations
//! - A durable SQLite queue store
//! - A connectivity monitor
//! - The sync engine that drains the queue
//! - [`OfflineQueue`], the facade UI layers bind to
//! - Configuration management and logging infrastructure
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use catchlog_core::{CatchClient, Config, ConnectivityMonitor, Database, NetworkStatus, OfflineQueue};
//!
//! # async fn run() -> catchlog_core::Result<()> {
//! let config = Config::load()?;
//!
//! let db = Arc::new(Database::open(&Config::database_path())?);
//! db.migrate()?;
//!
//! let client = Arc::new(CatchClient::new(&config.api)?);
//! let monitor = Arc::new(ConnectivityMonitor::new(NetworkStatus::Offline));
//! let _poller = monitor.spawn_poller(client.clone(), config.sync.poll_interval());
//!
//! let queue = OfflineQueue::new(db, client, monitor, &config.sync)?;
//! queue.start();
//! println!("{} catch(es) waiting", queue.pending_count()?);
//! # Ok(())
//! # }
//! ```

// Re-export commonly used items at the crate root
pub use api::{CatchClient, CatchEndpoint, ConnectivityProbe, SubmitError, SubmitErrorKind};
pub use config::Config;
pub use connectivity::{ConnectivityMonitor, NetworkStatus};
pub use db::{Database, SyncPassRecord};
pub use error::{Error, Result};
pub use queue::{OfflineQueue, QueueReason, QueueStatus, SubmitOutcome, Subscription};
pub use sync::{AbortReason, PassOutcome, SyncEngine, SyncEvent, SyncReport};
pub use types::*;

// Public modules
pub mod api;
pub mod config;
pub mod connectivity;
pub mod db;
pub mod error;
pub mod logging;
pub mod queue;
pub mod sync;
pub mod types;
