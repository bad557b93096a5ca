//! Long-lived handles shared by the CLI commands and the webhook server.

use anyhow::Result;
use paperbridge_core::config::Config;
use paperbridge_core::credential::CredentialCache;
use paperbridge_core::dataset::load_dataset;
use paperbridge_core::ledger::SqliteLedger;
use paperbridge_core::model::DatasetRecord;
use paperbridge_core::remote::IssueTracker;
use paperbridge_core::retry::{RetryPolicy, Sleeper, ThreadSleeper};
use paperbridge_core::router::RouterContext;
use paperbridge_core::sync::{
    ReconcileStrategy, SyncContext, SyncError, SyncSummary, pending_records, run_sync_pass,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub struct Runtime {
    pub tracker: Arc<dyn IssueTracker>,
    pub credentials: Arc<CredentialCache>,
    pub sleeper: Arc<dyn Sleeper>,
    pub policy: RetryPolicy,
    pub strategy: ReconcileStrategy,
    pub dataset: PathBuf,
    pub ledger: PathBuf,
    pub lock_path: PathBuf,
    pub lock_timeout: Duration,
}

impl Runtime {
    /// Build the GitHub tracker and credential cache from `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let sleeper: Arc<dyn Sleeper> = Arc::new(ThreadSleeper);
        let tracker = config.build_tracker()?;
        let credentials = config.build_credentials(Arc::clone(&sleeper))?;
        tracing::info!(
            repo = %tracker.repo().full_name(),
            strategy = %config.reconcile,
            "runtime configured"
        );

        Ok(Self {
            tracker: Arc::new(tracker),
            credentials: Arc::new(credentials),
            sleeper,
            policy: config.retry.policy(),
            strategy: config.reconcile,
            dataset: config.dataset.clone(),
            ledger: config.ledger.clone(),
            lock_path: config.lock_path(),
            lock_timeout: config.lock_timeout(),
        })
    }

    pub fn sync_context(&self) -> SyncContext<'_> {
        SyncContext {
            tracker: self.tracker.as_ref(),
            credentials: self.credentials.as_ref(),
            policy: self.policy,
            sleeper: self.sleeper.as_ref(),
            strategy: self.strategy,
        }
    }

    pub fn router(&self) -> RouterContext<'_> {
        RouterContext {
            tracker: self.tracker.as_ref(),
            credentials: self.credentials.as_ref(),
        }
    }

    /// One full sync pass against the on-disk ledger.
    pub fn run_sync(&self) -> Result<SyncSummary, SyncError> {
        let mut ledger = SqliteLedger::open(&self.ledger)?;
        run_sync_pass(
            &self.sync_context(),
            &self.dataset,
            &mut ledger,
            &self.lock_path,
            self.lock_timeout,
        )
    }

    /// Pending records under the configured authority.
    pub fn pending(&self) -> Result<Vec<DatasetRecord>, SyncError> {
        let records = load_dataset(&self.dataset)?;
        let ledger = SqliteLedger::open(&self.ledger)?;
        pending_records(&self.sync_context(), &records, &ledger)
    }
}
