//! SQLite connection pool and schema for the two entities that must survive
//! a restart: quarantine rules and quarantined messages.

use std::fs;
use std::path::Path;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::error::TriageResult;

pub type DbConn = r2d2::PooledConnection<SqliteConnectionManager>;

/// Durable store handle. Cheap to share behind an `Arc`; each operation
/// checks a pooled connection out for its own duration.
pub struct Database {
    pool: Pool<SqliteConnectionManager>,
}

impl Database {
    pub fn new(database_url: &str) -> TriageResult<Self> {
        if let Some(parent) = Path::new(database_url).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let manager = SqliteConnectionManager::file(database_url);
        let pool = Pool::builder().max_size(8).build(manager)?;

        let db = Self { pool };
        db.init_schema()?;
        Ok(db)
    }

    pub(crate) fn conn(&self) -> TriageResult<DbConn> {
        Ok(self.pool.get()?)
    }

    fn init_schema(&self) -> TriageResult<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS quarantine_rules (
                id               TEXT PRIMARY KEY,
                expression       TEXT NOT NULL,
                quarantine       INTEGER NOT NULL DEFAULT 0,
                suppress_logging INTEGER NOT NULL DEFAULT 0,
                throw_away       INTEGER NOT NULL DEFAULT 0,
                expires_at       TEXT
            );
            CREATE TABLE IF NOT EXISTS quarantined_messages (
                id              TEXT PRIMARY KEY,
                message_hash    TEXT NOT NULL,
                message_payload BLOB NOT NULL,
                content_type    TEXT,
                headers         TEXT NOT NULL DEFAULT '{}',
                queue           TEXT NOT NULL,
                routing_key     TEXT NOT NULL,
                service         TEXT NOT NULL,
                error_reports   TEXT NOT NULL,
                skipped_at      TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_quarantined_messages_hash
                ON quarantined_messages(message_hash);",
        )?;
        Ok(())
    }
}
