//! Database repository layer
//!
//! Durable storage for the offline catch queue. Every method commits before it
//! returns, so a status change is on disk before the network call that depends
//! on it starts.

use crate::error::{Error, Result};
use crate::types::*;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use std::path::PathBuf;
use std::sync::Mutex;

/// Columns selected for every mutation query, in `row_to_raw` order.
const MUTATION_COLUMNS: &str =
    "local_id, payload, status, terminal, attempts, created_at, updated_at, last_error";

/// Oldest first; insertion sequence breaks ties between equal timestamps.
const QUEUE_ORDER: &str = "ORDER BY created_at ASC, seq ASC";

/// One recorded sync pass, for status displays.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncPassRecord {
    /// When the pass started
    pub started_at: DateTime<Utc>,
    /// When the pass finished or was aborted
    pub finished_at: DateTime<Utc>,
    /// Mutations handed to the endpoint
    pub submitted: usize,
    /// Mutations confirmed and removed
    pub synced: usize,
    /// Mutations that failed and stay retryable
    pub failed: usize,
    /// Mutations that failed terminally
    pub terminal: usize,
    /// Why the pass stopped early, if it did
    pub aborted: Option<String>,
}

/// Database handle with connection pooling (single connection for now)
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open(path: &PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        // FULL sync: a queued catch must survive power loss, not just a crash
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = FULL;
            PRAGMA busy_timeout = 5000;
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run migrations on this database
    pub fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        super::schema::run_migrations(&conn)
    }

    /// Get the underlying connection (for advanced use)
    pub fn connection(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap()
    }

    // ============================================
    // Enqueue
    // ============================================

    /// Queue a catch creation and return its local id
    pub fn enqueue(&self, payload: &CatchCreateInput) -> Result<String> {
        let mutation = PendingCatchMutation::new(payload.clone());
        self.enqueue_mutation(&mutation)?;
        Ok(mutation.local_id)
    }

    /// Queue a caller-built mutation.
    ///
    /// Fails with [`Error::Storage`] if the local id is already queued.
    pub fn enqueue_mutation(&self, mutation: &PendingCatchMutation) -> Result<()> {
        let payload = serde_json::to_string(&mutation.payload)?;
        let conn = self.conn.lock().unwrap();
        let inserted = conn.execute(
            r#"
            INSERT INTO pending_catches
                (local_id, payload, status, terminal, attempts, created_at, updated_at, last_error)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                mutation.local_id,
                payload,
                mutation.status.as_str(),
                mutation.terminal,
                mutation.attempts,
                format_ts(&mutation.created_at),
                format_ts(&mutation.updated_at),
                mutation.last_error,
            ],
        );

        match inserted {
            Ok(_) => {
                tracing::debug!(local_id = %mutation.local_id, "Queued catch");
                Ok(())
            }
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                Err(Error::Storage(format!(
                    "local id {} is already queued",
                    mutation.local_id
                )))
            }
            Err(e) => Err(e.into()),
        }
    }

    // ============================================
    // Queries
    // ============================================

    /// All queued mutations, oldest first
    pub fn list(&self) -> Result<Vec<PendingCatchMutation>> {
        self.query_mutations(&format!(
            "SELECT {MUTATION_COLUMNS} FROM pending_catches WHERE status != 'SYNCED' {QUEUE_ORDER}"
        ), [])
    }

    /// Mutations a sync pass may submit, oldest first.
    ///
    /// PENDING entries, plus FAILED entries that are neither terminal nor
    /// at the attempt cap.
    pub fn list_syncable(&self, max_attempts: u32) -> Result<Vec<PendingCatchMutation>> {
        self.query_mutations(
            &format!(
                "SELECT {MUTATION_COLUMNS} FROM pending_catches
                 WHERE status = 'PENDING'
                    OR (status = 'FAILED' AND terminal = 0 AND attempts < ?1)
                 {QUEUE_ORDER}"
            ),
            [max_attempts],
        )
    }

    /// FAILED entries no pass will pick up again, oldest first.
    ///
    /// Covers terminal failures and entries already at `max_attempts`, which
    /// happens when the cap is lowered after they failed.
    pub fn list_needing_attention(&self, max_attempts: u32) -> Result<Vec<PendingCatchMutation>> {
        self.query_mutations(
            &format!(
                "SELECT {MUTATION_COLUMNS} FROM pending_catches
                 WHERE status = 'FAILED' AND (terminal = 1 OR attempts >= ?1)
                 {QUEUE_ORDER}"
            ),
            [max_attempts],
        )
    }

    /// Get a queued mutation by local id
    pub fn get_mutation(&self, local_id: &str) -> Result<Option<PendingCatchMutation>> {
        let raw = {
            let conn = self.conn.lock().unwrap();
            conn.query_row(
                &format!("SELECT {MUTATION_COLUMNS} FROM pending_catches WHERE local_id = ?1"),
                [local_id],
                row_to_raw,
            )
            .optional()?
        };
        raw.map(RawMutation::into_mutation).transpose()
    }

    /// Number of entries not yet synced
    pub fn count(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM pending_catches WHERE status != 'SYNCED'",
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn query_mutations<P: rusqlite::Params>(
        &self,
        sql: &str,
        params: P,
    ) -> Result<Vec<PendingCatchMutation>> {
        let raws = {
            let conn = self.conn.lock().unwrap();
            let mut stmt = conn.prepare(sql)?;
            let rows = stmt.query_map(params, row_to_raw)?;
            rows.collect::<std::result::Result<Vec<_>, _>>()?
        };
        raws.into_iter().map(RawMutation::into_mutation).collect()
    }

    // ============================================
    // Status transitions
    // ============================================

    /// PENDING/FAILED → SYNCING
    pub fn mark_syncing(&self, local_id: &str) -> Result<()> {
        self.update_one(
            "UPDATE pending_catches SET status = 'SYNCING', updated_at = ?2 WHERE local_id = ?1",
            local_id,
        )
    }

    /// Confirmed by the server: the entry is removed.
    pub fn mark_synced(&self, local_id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute("DELETE FROM pending_catches WHERE local_id = ?1", [local_id])?;
        if deleted == 0 {
            return Err(Error::MutationNotFound(local_id.to_string()));
        }
        Ok(())
    }

    /// Record a failed attempt. Returns the new attempt count.
    pub fn mark_failed(&self, local_id: &str, error: &str, terminal: bool) -> Result<u32> {
        let conn = self.conn.lock().unwrap();
        let attempts: Option<u32> = conn
            .query_row(
                r#"
                UPDATE pending_catches
                SET status = 'FAILED',
                    terminal = ?3,
                    attempts = attempts + 1,
                    last_error = ?2,
                    updated_at = ?4
                WHERE local_id = ?1
                RETURNING attempts
                "#,
                params![local_id, error, terminal, format_ts(&Utc::now())],
                |row| row.get(0),
            )
            .optional()?;
        attempts.ok_or_else(|| Error::MutationNotFound(local_id.to_string()))
    }

    /// Record a transient failure against the attempt cap.
    ///
    /// The entry turns terminal when the stored count reaches `max_attempts`,
    /// so a `retry` that lands mid-pass starts the count over. Returns the new
    /// attempt count and whether the entry is now terminal.
    pub fn record_transient_failure(
        &self,
        local_id: &str,
        error: &str,
        max_attempts: u32,
    ) -> Result<(u32, bool)> {
        let conn = self.conn.lock().unwrap();
        let row: Option<(u32, bool)> = conn
            .query_row(
                r#"
                UPDATE pending_catches
                SET status = 'FAILED',
                    terminal = (attempts + 1 >= ?3),
                    attempts = attempts + 1,
                    last_error = ?2,
                    updated_at = ?4
                WHERE local_id = ?1
                RETURNING attempts, terminal
                "#,
                params![local_id, error, max_attempts, format_ts(&Utc::now())],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        row.ok_or_else(|| Error::MutationNotFound(local_id.to_string()))
    }

    /// SYNCING → PENDING without counting an attempt (auth abort)
    pub fn mark_pending(&self, local_id: &str) -> Result<()> {
        self.update_one(
            "UPDATE pending_catches SET status = 'PENDING', updated_at = ?2 WHERE local_id = ?1",
            local_id,
        )
    }

    fn update_one(&self, sql: &str, local_id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(sql, params![local_id, format_ts(&Utc::now())])?;
        if updated == 0 {
            return Err(Error::MutationNotFound(local_id.to_string()));
        }
        Ok(())
    }

    // ============================================
    // User actions
    // ============================================

    /// Make an entry eligible for automatic sync again
    pub fn retry_mutation(&self, local_id: &str) -> Result<()> {
        self.update_one(
            r#"
            UPDATE pending_catches
            SET status = 'PENDING', terminal = 0, attempts = 0, last_error = NULL, updated_at = ?2
            WHERE local_id = ?1
            "#,
            local_id,
        )
    }

    /// Replace the payload of a queued entry and reset it to PENDING.
    ///
    /// The local id is kept, so an earlier delivery that did reach the server
    /// is still deduplicated by it.
    pub fn update_payload(&self, local_id: &str, payload: &CatchCreateInput) -> Result<()> {
        let payload = serde_json::to_string(payload)?;
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            r#"
            UPDATE pending_catches
            SET payload = ?2, status = 'PENDING', terminal = 0, attempts = 0,
                last_error = NULL, updated_at = ?3
            WHERE local_id = ?1
            "#,
            params![local_id, payload, format_ts(&Utc::now())],
        )?;
        if updated == 0 {
            return Err(Error::MutationNotFound(local_id.to_string()));
        }
        Ok(())
    }

    /// Drop an entry without sending it
    pub fn discard_mutation(&self, local_id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute("DELETE FROM pending_catches WHERE local_id = ?1", [local_id])?;
        if deleted == 0 {
            return Err(Error::MutationNotFound(local_id.to_string()));
        }
        tracing::info!(local_id = %local_id, "Discarded queued catch");
        Ok(())
    }

    /// Revert entries a crashed pass left in SYNCING. Returns how many.
    pub fn recover_interrupted(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let recovered = conn.execute(
            "UPDATE pending_catches SET status = 'PENDING', updated_at = ?1 WHERE status = 'SYNCING'",
            [format_ts(&Utc::now())],
        )?;
        if recovered > 0 {
            tracing::warn!(recovered, "Recovered catches interrupted mid-sync");
        }
        Ok(recovered)
    }

    /// Delete every queued entry (logout). Returns how many were dropped.
    pub fn clear_queue(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let cleared = conn.execute("DELETE FROM pending_catches", [])?;
        Ok(cleared)
    }

    // ============================================
    // Sync pass history
    // ============================================

    /// Store the outcome of a sync pass
    pub fn record_sync_pass(&self, pass: &SyncPassRecord) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO sync_passes
                (started_at, finished_at, submitted, synced, failed, terminal, aborted)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                format_ts(&pass.started_at),
                format_ts(&pass.finished_at),
                pass.submitted as i64,
                pass.synced as i64,
                pass.failed as i64,
                pass.terminal as i64,
                pass.aborted,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Most recent sync pass, if any
    pub fn last_sync_pass(&self) -> Result<Option<SyncPassRecord>> {
        let conn = self.conn.lock().unwrap();
        let record = conn
            .query_row(
                r#"
                SELECT started_at, finished_at, submitted, synced, failed, terminal, aborted
                FROM sync_passes
                ORDER BY id DESC
                LIMIT 1
                "#,
                [],
                |row| {
                    let started: String = row.get(0)?;
                    let finished: String = row.get(1)?;
                    Ok(SyncPassRecord {
                        started_at: parse_ts(&started).unwrap_or_else(Utc::now),
                        finished_at: parse_ts(&finished).unwrap_or_else(Utc::now),
                        submitted: row.get::<_, i64>(2)? as usize,
                        synced: row.get::<_, i64>(3)? as usize,
                        failed: row.get::<_, i64>(4)? as usize,
                        terminal: row.get::<_, i64>(5)? as usize,
                        aborted: row.get(6)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }
}

/// Row as stored, before the payload JSON is decoded
struct RawMutation {
    local_id: String,
    payload: String,
    status: String,
    terminal: bool,
    attempts: u32,
    created_at: String,
    updated_at: String,
    last_error: Option<String>,
}

fn row_to_raw(row: &Row<'_>) -> rusqlite::Result<RawMutation> {
    Ok(RawMutation {
        local_id: row.get(0)?,
        payload: row.get(1)?,
        status: row.get(2)?,
        terminal: row.get(3)?,
        attempts: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
        last_error: row.get(7)?,
    })
}

impl RawMutation {
    fn into_mutation(self) -> Result<PendingCatchMutation> {
        let payload: CatchCreateInput = serde_json::from_str(&self.payload).map_err(|e| {
            Error::Storage(format!("corrupt payload for {}: {}", self.local_id, e))
        })?;
        let status = self
            .status
            .parse::<MutationStatus>()
            .map_err(Error::Storage)?;
        let created_at = parse_ts(&self.created_at).ok_or_else(|| {
            Error::Storage(format!("corrupt created_at for {}", self.local_id))
        })?;

        Ok(PendingCatchMutation {
            local_id: self.local_id,
            payload,
            status,
            terminal: self.terminal,
            attempts: self.attempts,
            created_at,
            updated_at: parse_ts(&self.updated_at).unwrap_or(created_at),
            last_error: self.last_error,
        })
    }
}

/// Fixed-width UTC timestamps so text order equals time order.
fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
