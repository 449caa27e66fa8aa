//! Database schema and migrations
//!
//! Uses SQLite with embedded migrations managed via PRAGMA user_version.

use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// SQL migrations, indexed by version number
const MIGRATIONS: &[&str] = &[
    // Version 1: offline catch queue
    r#"
    -- ============================================
    -- Pending catch creations
    -- ============================================

    CREATE TABLE IF NOT EXISTS pending_catches (
        seq              INTEGER PRIMARY KEY AUTOINCREMENT,
        local_id         TEXT NOT NULL UNIQUE,
        payload          JSON NOT NULL,
        status           TEXT NOT NULL
                         CHECK (status IN ('PENDING', 'SYNCING', 'FAILED', 'SYNCED')),
        terminal         INTEGER NOT NULL DEFAULT 0,
        attempts         INTEGER NOT NULL DEFAULT 0,
        created_at       DATETIME NOT NULL,
        updated_at       DATETIME NOT NULL,
        last_error       TEXT
    );

    -- ============================================
    -- Sync pass history
    -- ============================================

    CREATE TABLE IF NOT EXISTS sync_passes (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        started_at       DATETIME NOT NULL,
        finished_at      DATETIME NOT NULL,
        submitted        INTEGER NOT NULL,
        synced           INTEGER NOT NULL,
        failed           INTEGER NOT NULL,
        terminal         INTEGER NOT NULL,
        aborted          TEXT
    );

    -- ============================================
    -- Indexes
    -- ============================================

    CREATE INDEX IF NOT EXISTS idx_pending_catches_order ON pending_catches(created_at, seq);
    CREATE INDEX IF NOT EXISTS idx_pending_catches_status ON pending_catches(status);
    "#,
];

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> crate::error::Result<()> {
    let current_version: i32 = conn
        .query_row("PRAGMA user_version", [], |r| r.get(0))
        .unwrap_or(0);

    tracing::info!(
        current_version,
        target_version = SCHEMA_VERSION,
        "Checking database migrations"
    );

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i32;
        if version > current_version {
            tracing::info!(version, "Running migration");
            conn.execute_batch(migration)?;
            conn.execute(&format!("PRAGMA user_version = {}", version), [])?;
        }
    }

    if current_version < SCHEMA_VERSION {
        tracing::info!(
            from = current_version,
            to = SCHEMA_VERSION,
            "Migrations complete"
        );
    }

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> crate::error::Result<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    Ok(version)
}
