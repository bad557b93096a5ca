//! Sync pass: dataset rows in, at most one remote issue per paper out.
//!
//! A pass walks the dataset strictly one record at a time. Which papers are
//! already delivered is decided by exactly one configured authority, either
//! the local ledger or the remote issue listing.

use crate::credential::{AuthError, CredentialCache};
use crate::dataset::{DatasetError, load_dataset};
use crate::delivery::{DeliveryEngine, DeliveryError};
use crate::directory::{DirectoryError, RemoteDirectory};
use crate::error::ErrorCode;
use crate::ledger::{IdentityLedger, LedgerError};
use crate::lock::{LockError, SyncLock};
use crate::model::DatasetRecord;
use crate::remote::{IssueTracker, RemoteError};
use crate::render::render;
use crate::retry::{RetryPolicy, Sleeper};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::time::{Duration, Instant};

/// Source of truth for "this paper already has an issue".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconcileStrategy {
    /// The local identity ledger.
    #[default]
    Ledger,
    /// Labels and titles of every remote issue, open or closed.
    Remote,
}

impl ReconcileStrategy {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ledger => "ledger",
            Self::Remote => "remote",
        }
    }
}

impl fmt::Display for ReconcileStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Dataset(#[from] DatasetError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("remote reconciliation failed: {0}")]
    Remote(#[from] RemoteError),

    #[error("another sync pass is running: {0}")]
    Busy(#[from] LockError),
}

impl SyncError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Dataset(err) => err.code(),
            Self::Ledger(err) => err.code(),
            Self::Auth(err) => err.code(),
            Self::Remote(err) => err.code(),
            Self::Busy(err) => err.code(),
        }
    }
}

impl From<DirectoryError> for SyncError {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::Auth(err) => Self::Auth(err),
            DirectoryError::Remote(err) => Self::Remote(err),
        }
    }
}

/// Everything a pass needs besides the dataset and the ledger.
#[derive(Clone, Copy)]
pub struct SyncContext<'a> {
    pub tracker: &'a dyn IssueTracker,
    pub credentials: &'a CredentialCache,
    pub policy: RetryPolicy,
    pub sleeper: &'a dyn Sleeper,
    pub strategy: ReconcileStrategy,
}

impl SyncContext<'_> {
    fn directory(&self) -> RemoteDirectory<'_> {
        RemoteDirectory::new(self.tracker, self.credentials)
    }

    fn engine(&self) -> DeliveryEngine<'_> {
        DeliveryEngine::new(self.tracker, self.credentials, self.policy, self.sleeper)
    }

    // The remote listing is only taken when it is the authority.
    fn remote_snapshot(&self) -> Result<Option<HashSet<String>>, SyncError> {
        match self.strategy {
            ReconcileStrategy::Ledger => Ok(None),
            ReconcileStrategy::Remote => Ok(Some(self.directory().delivered_ids()?)),
        }
    }
}

fn already_delivered(
    remote: Option<&HashSet<String>>,
    ledger: &dyn IdentityLedger,
    paper_id: &str,
) -> Result<bool, LedgerError> {
    match remote {
        Some(ids) => Ok(ids.contains(paper_id)),
        None => ledger.has(paper_id),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PostedRecord {
    pub paper_id: String,
    pub issue_number: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordFailure {
    pub paper_id: String,
    pub code: &'static str,
    pub message: String,
}

/// Outcome of one pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    pub strategy: ReconcileStrategy,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub records: usize,
    pub posted: Vec<PostedRecord>,
    pub skipped_existing: usize,
    pub skipped_duplicate: usize,
    pub failed: Vec<RecordFailure>,
}

impl SyncSummary {
    fn new(strategy: ReconcileStrategy, records: usize) -> Self {
        Self {
            strategy,
            started_at: Utc::now(),
            duration_ms: 0,
            records,
            posted: Vec::new(),
            skipped_existing: 0,
            skipped_duplicate: 0,
            failed: Vec::new(),
        }
    }

    /// No record failed.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Records that a pass would post, first occurrence of each paper only.
///
/// # Errors
///
/// Returns [`SyncError::Ledger`] or a remote/auth error from the
/// configured authority.
pub fn pending_records(
    ctx: &SyncContext<'_>,
    records: &[DatasetRecord],
    ledger: &dyn IdentityLedger,
) -> Result<Vec<DatasetRecord>, SyncError> {
    let remote = ctx.remote_snapshot()?;
    Ok(collect_pending(records, remote.as_ref(), ledger)?)
}

/// [`pending_records`] with the ledger as the authority. Needs no network.
///
/// # Errors
///
/// Returns [`LedgerError`] when the ledger cannot be read.
pub fn pending_from_ledger(
    records: &[DatasetRecord],
    ledger: &dyn IdentityLedger,
) -> Result<Vec<DatasetRecord>, LedgerError> {
    collect_pending(records, None, ledger)
}

fn collect_pending(
    records: &[DatasetRecord],
    remote: Option<&HashSet<String>>,
    ledger: &dyn IdentityLedger,
) -> Result<Vec<DatasetRecord>, LedgerError> {
    let mut seen = HashSet::new();
    let mut pending = Vec::new();
    for record in records {
        if !seen.insert(record.paper_id.as_str()) {
            continue;
        }
        if !already_delivered(remote, ledger, &record.paper_id)? {
            pending.push(record.clone());
        }
    }
    Ok(pending)
}

/// Deliver every pending record in `records`.
///
/// Per-record delivery failures are collected in the summary. Ledger and
/// credential failures abort the pass.
///
/// # Errors
///
/// Returns [`SyncError::Ledger`], [`SyncError::Auth`] or
/// [`SyncError::Remote`] when the pass cannot continue.
pub fn sync_records(
    ctx: &SyncContext<'_>,
    records: &[DatasetRecord],
    ledger: &mut dyn IdentityLedger,
) -> Result<SyncSummary, SyncError> {
    let started = Instant::now();
    let mut summary = SyncSummary::new(ctx.strategy, records.len());
    let remote = ctx.remote_snapshot()?;
    let engine = ctx.engine();
    let mut handled: HashSet<&str> = HashSet::new();

    for record in records {
        let paper_id = record.paper_id.as_str();
        if handled.contains(paper_id) {
            tracing::debug!(paper_id, "duplicate row already handled in this pass");
            summary.skipped_duplicate += 1;
            continue;
        }
        if already_delivered(remote.as_ref(), &*ledger, paper_id)? {
            tracing::debug!(paper_id, strategy = %ctx.strategy, "already delivered");
            summary.skipped_existing += 1;
            handled.insert(paper_id);
            continue;
        }

        match engine.deliver(paper_id, &render(record), ledger) {
            Ok(issue) => {
                handled.insert(paper_id);
                summary.posted.push(PostedRecord {
                    paper_id: paper_id.to_string(),
                    issue_number: issue.number,
                });
            }
            Err(DeliveryError::Ledger(err)) => return Err(SyncError::Ledger(err)),
            Err(DeliveryError::Auth(err)) => return Err(SyncError::Auth(err)),
            Err(err) => {
                tracing::warn!(paper_id, code = %err.code(), %err, "record failed; continuing");
                summary.failed.push(RecordFailure {
                    paper_id: paper_id.to_string(),
                    code: err.code().code(),
                    message: err.to_string(),
                });
            }
        }
    }

    summary.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    tracing::info!(
        strategy = %summary.strategy,
        records = summary.records,
        posted = summary.posted.len(),
        skipped_existing = summary.skipped_existing,
        skipped_duplicate = summary.skipped_duplicate,
        failed = summary.failed.len(),
        duration_ms = summary.duration_ms,
        "sync pass finished"
    );
    Ok(summary)
}

/// Full pass: take the sync lock, load the dataset, deliver.
///
/// # Errors
///
/// Returns [`SyncError::Busy`] when another pass holds the lock after
/// `lock_timeout`, [`SyncError::Dataset`] when the dataset cannot be read,
/// and anything [`sync_records`] returns.
pub fn run_sync_pass(
    ctx: &SyncContext<'_>,
    dataset: &Path,
    ledger: &mut dyn IdentityLedger,
    lock_path: &Path,
    lock_timeout: Duration,
) -> Result<SyncSummary, SyncError> {
    let lock = SyncLock::acquire(lock_path, lock_timeout)?;
    tracing::debug!(lock = %lock.path().display(), "sync lock acquired");

    let records = load_dataset(dataset).inspect_err(|err| {
        tracing::error!(
            dataset = %dataset.display(),
            code = %err.code(),
            %err,
            "dataset load failed"
        );
    })?;
    let summary = sync_records(ctx, &records, ledger);
    lock.release();
    summary
}
