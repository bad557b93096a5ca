//! SQLite schema for the delivery ledger.
//!
//! - `delivery_ledger` holds one row per paper whose issue creation was
//!   acknowledged by the remote service
//! - `ledger_meta` tracks the applied schema version

/// Migration v1: ledger table plus metadata row.
pub const MIGRATION_V1_SQL: &str = r"
CREATE TABLE IF NOT EXISTS delivery_ledger (
    paper_id TEXT PRIMARY KEY CHECK (length(trim(paper_id)) > 0),
    issue_number INTEGER NOT NULL CHECK (issue_number > 0),
    recorded_at_us INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS ledger_meta (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    schema_version INTEGER NOT NULL
);

INSERT OR IGNORE INTO ledger_meta (id, schema_version) VALUES (1, 1);
";

/// Migration v2: read-path indexes for `ledger list` and issue lookups.
pub const MIGRATION_V2_SQL: &str = r"
CREATE INDEX IF NOT EXISTS idx_delivery_ledger_issue
    ON delivery_ledger(issue_number);

CREATE INDEX IF NOT EXISTS idx_delivery_ledger_recorded
    ON delivery_ledger(recorded_at_us DESC);
";

/// Indexes the latest schema must contain.
pub const REQUIRED_INDEXES: &[&str] = &[
    "idx_delivery_ledger_issue",
    "idx_delivery_ledger_recorded",
];
