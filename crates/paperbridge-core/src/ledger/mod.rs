//! Identity ledger: durable record of papers that already have an issue.
//!
//! An entry exists iff the remote service acknowledged creation of the
//! paper's issue. The sync core only ever inserts; removal is a manual
//! operator action used to force a re-post.
//!
//! Runtime defaults for the SQLite file:
//! - `journal_mode = WAL` so `ledger list` can read during a pass
//! - `synchronous = FULL` so an acknowledged write survives power loss
//! - `busy_timeout = 5s` to absorb short contention from readers

pub mod migrations;
pub mod schema;

use crate::error::ErrorCode;
use crate::model::IssueRef;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Busy timeout used for ledger connections.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Ledger persistence failure. Always fatal for the running pass.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("failed to prepare ledger directory {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("ledger database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("ledger row for {paper_id} is corrupt: {reason}")]
    Corrupt { paper_id: String, reason: String },
}

impl LedgerError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        ErrorCode::LedgerUnavailable
    }
}

/// One successful delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryRecord {
    pub paper_id: String,
    pub issue_number: u64,
    pub recorded_at: DateTime<Utc>,
}

/// Contract the delivery engine writes through.
pub trait IdentityLedger {
    /// Whether `paper_id` already produced a remote issue.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] when the backing store cannot be read.
    fn has(&self, paper_id: &str) -> Result<bool, LedgerError>;

    /// Record a confirmed creation. Callers must only invoke this after the
    /// remote service acknowledged the issue.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] when the write cannot be made durable.
    fn record(&mut self, paper_id: &str, issue: IssueRef) -> Result<(), LedgerError>;
}

/// SQLite-backed ledger.
#[derive(Debug)]
pub struct SqliteLedger {
    conn: Connection,
    path: PathBuf,
}

impl SqliteLedger {
    /// Open (or create) the ledger at `path` and migrate it to the latest schema.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory, connection, pragmas or migrations fail.
    pub fn open(path: &Path) -> Result<Self, LedgerError> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| LedgerError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let mut conn = Connection::open(path)?;
        configure_connection(&conn)?;
        migrations::migrate(&mut conn)?;

        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    /// In-memory ledger, mostly for tests and dry runs.
    ///
    /// # Errors
    ///
    /// Returns an error if migrations fail.
    pub fn open_in_memory() -> Result<Self, LedgerError> {
        let mut conn = Connection::open_in_memory()?;
        migrations::migrate(&mut conn)?;
        Ok(Self {
            conn,
            path: PathBuf::from(":memory:"),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Look up the delivery record for one paper.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or the row is corrupt.
    pub fn get(&self, paper_id: &str) -> Result<Option<DeliveryRecord>, LedgerError> {
        let row = self
            .conn
            .query_row(
                "SELECT paper_id, issue_number, recorded_at_us
                 FROM delivery_ledger
                 WHERE paper_id = ?1",
                [paper_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(id, number, at)| decode_row(id, number, at))
            .transpose()
    }

    /// Every delivery record, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or any row is corrupt.
    pub fn entries(&self) -> Result<Vec<DeliveryRecord>, LedgerError> {
        let mut stmt = self.conn.prepare(
            "SELECT paper_id, issue_number, recorded_at_us
             FROM delivery_ledger
             ORDER BY recorded_at_us DESC, paper_id ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (id, number, at) = row?;
            entries.push(decode_row(id, number, at)?);
        }
        Ok(entries)
    }

    /// Remove the entry for `paper_id` so the next pass posts it again.
    ///
    /// Returns whether an entry existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn forget(&mut self, paper_id: &str) -> Result<bool, LedgerError> {
        let removed = self
            .conn
            .execute("DELETE FROM delivery_ledger WHERE paper_id = ?1", [paper_id])?;
        if removed > 0 {
            tracing::info!(paper_id, "removed ledger entry");
        }
        Ok(removed > 0)
    }
}

impl IdentityLedger for SqliteLedger {
    fn has(&self, paper_id: &str) -> Result<bool, LedgerError> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM delivery_ledger WHERE paper_id = ?1)",
            [paper_id],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    fn record(&mut self, paper_id: &str, issue: IssueRef) -> Result<(), LedgerError> {
        let number = i64::try_from(issue.number).map_err(|_| LedgerError::Corrupt {
            paper_id: paper_id.to_string(),
            reason: format!("issue number {} out of range", issue.number),
        })?;
        let inserted = self.conn.execute(
            "INSERT INTO delivery_ledger (paper_id, issue_number, recorded_at_us)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(paper_id) DO NOTHING",
            params![paper_id, number, Utc::now().timestamp_micros()],
        )?;

        if inserted == 0 {
            tracing::warn!(
                paper_id,
                issue = issue.number,
                "ledger already had an entry; keeping the original"
            );
        }
        Ok(())
    }
}

fn configure_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "synchronous", "FULL")?;
    let _journal_mode: String =
        conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)?;
    Ok(())
}

fn decode_row(paper_id: String, number: i64, at_us: i64) -> Result<DeliveryRecord, LedgerError> {
    let Ok(issue_number) = u64::try_from(number) else {
        return Err(LedgerError::Corrupt {
            paper_id,
            reason: format!("negative issue number {number}"),
        });
    };
    let Some(recorded_at) = DateTime::from_timestamp_micros(at_us) else {
        return Err(LedgerError::Corrupt {
            paper_id,
            reason: format!("timestamp {at_us} out of range"),
        });
    };

    Ok(DeliveryRecord {
        paper_id,
        issue_number,
        recorded_at,
    })
}
