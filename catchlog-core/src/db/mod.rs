//! Database layer for catchlog
//!
//! This module provides the storage layer using SQLite with:
//! - Schema migrations
//! - The durable offline catch queue
//! - Sync pass history

pub mod repo;
pub mod schema;

pub use repo::{Database, SyncPassRecord};
