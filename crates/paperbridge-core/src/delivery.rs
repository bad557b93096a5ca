//! Issue creation with bounded retry.
//!
//! Only a `201 Created` whose body carries an issue `number` counts as a
//! delivery. The ledger is written strictly after that confirmation.

use crate::credential::{AuthError, CredentialCache};
use crate::error::ErrorCode;
use crate::ledger::{IdentityLedger, LedgerError};
use crate::model::{IssueRef, RenderedIssue};
use crate::remote::{IssueTracker, RemoteError};
use crate::retry::{RetryPolicy, Sleeper};
use std::fmt;

/// Why a single creation attempt did not count as a delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptFailure {
    /// The remote answered with something other than `201`.
    Status { status: u16, message: String },
    /// `201` without a usable issue number.
    Malformed { status: u16 },
    /// The credential was rejected; it has been invalidated.
    Unauthorized,
    /// No response was received.
    Transport(String),
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Status { status, message } => write!(f, "status {status}: {message}"),
            Self::Malformed { status } => write!(f, "status {status} without an issue number"),
            Self::Unauthorized => f.write_str("credential rejected (401)"),
            Self::Transport(message) => write!(f, "transport: {message}"),
        }
    }
}

impl From<RemoteError> for AttemptFailure {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Transport(message) => Self::Transport(message),
            RemoteError::Unauthorized => Self::Unauthorized,
            RemoteError::Status { status, message } => Self::Status { status, message },
            RemoteError::Decode(message) => Self::Transport(message),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("delivery attempt failed: {0}")]
    Transient(AttemptFailure),

    #[error("delivery gave up after {attempts} attempts; last failure: {last}")]
    Exhausted { attempts: u32, last: AttemptFailure },

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("issue created but the ledger write failed: {0}")]
    Ledger(#[from] LedgerError),
}

impl DeliveryError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Transient(AttemptFailure::Transport(_)) => ErrorCode::RemoteTransport,
            Self::Transient(AttemptFailure::Unauthorized) => ErrorCode::AuthFailed,
            Self::Transient(_) => ErrorCode::RemoteRejected,
            Self::Exhausted { .. } => ErrorCode::DeliveryExhausted,
            Self::Auth(err) => err.code(),
            Self::Ledger(err) => err.code(),
        }
    }
}

/// Creates issues one at a time under a [`RetryPolicy`].
pub struct DeliveryEngine<'a> {
    tracker: &'a dyn IssueTracker,
    credentials: &'a CredentialCache,
    policy: RetryPolicy,
    sleeper: &'a dyn Sleeper,
}

impl<'a> DeliveryEngine<'a> {
    #[must_use]
    pub fn new(
        tracker: &'a dyn IssueTracker,
        credentials: &'a CredentialCache,
        policy: RetryPolicy,
        sleeper: &'a dyn Sleeper,
    ) -> Self {
        Self {
            tracker,
            credentials,
            policy,
            sleeper,
        }
    }

    /// One creation attempt.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::Transient`] for any outcome other than a
    /// confirmed creation, or [`DeliveryError::Auth`] when no credential can
    /// be obtained.
    pub fn attempt_once(&self, rendered: &RenderedIssue) -> Result<IssueRef, DeliveryError> {
        let token = self.credentials.token()?;
        let response = self
            .tracker
            .create_issue(&token, rendered)
            .map_err(|err| DeliveryError::Transient(err.into()))?;

        if response.is_unauthorized() {
            self.credentials.invalidate();
            return Err(DeliveryError::Transient(AttemptFailure::Unauthorized));
        }
        if !response.is_created() {
            return Err(DeliveryError::Transient(AttemptFailure::Status {
                status: response.status,
                message: response.message(),
            }));
        }
        response
            .number()
            .map(|number| IssueRef { number })
            .ok_or_else(|| {
                DeliveryError::Transient(AttemptFailure::Malformed {
                    status: response.status,
                })
            })
    }

    /// Create the issue, retrying transient failures with fixed backoff.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::Exhausted`] once every attempt failed, or
    /// [`DeliveryError::Auth`] immediately when credentials are unavailable.
    pub fn create_issue(&self, rendered: &RenderedIssue) -> Result<IssueRef, DeliveryError> {
        let mut attempt = 0_u32;
        loop {
            attempt += 1;
            match self.attempt_once(rendered) {
                Ok(issue) => {
                    tracing::debug!(title = %rendered.title, attempt, %issue, "issue created");
                    return Ok(issue);
                }
                Err(DeliveryError::Transient(failure)) => {
                    tracing::warn!(
                        title = %rendered.title,
                        attempt,
                        max_attempts = self.policy.max_attempts(),
                        %failure,
                        "issue creation attempt failed"
                    );
                    let Some(delay) = self.policy.delay_after(attempt) else {
                        return Err(DeliveryError::Exhausted {
                            attempts: attempt,
                            last: failure,
                        });
                    };
                    self.sleeper.sleep(delay);
                }
                Err(other) => return Err(other),
            }
        }
    }

    /// Create the issue for `paper_id` and record it in `ledger`.
    ///
    /// # Errors
    ///
    /// See [`Self::create_issue`]; additionally [`DeliveryError::Ledger`]
    /// when the issue exists remotely but could not be recorded.
    pub fn deliver(
        &self,
        paper_id: &str,
        rendered: &RenderedIssue,
        ledger: &mut dyn IdentityLedger,
    ) -> Result<IssueRef, DeliveryError> {
        let issue = self.create_issue(rendered)?;
        ledger.record(paper_id, issue).inspect_err(|err| {
            tracing::error!(paper_id, %issue, %err, "issue created but not recorded in ledger");
        })?;
        tracing::info!(paper_id, %issue, "delivered");
        Ok(issue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        InMemoryTracker, MemoryLedger, RecordingSleeper, Scripted, ScriptedCredentials,
        scripted_credentials, static_credentials,
    };
    use std::time::Duration;

    fn rendered(id: &str) -> RenderedIssue {
        crate::render::render(&crate::model::DatasetRecord::new(id))
    }

    fn policy(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(attempts, Duration::from_millis(10))
    }

    #[test]
    fn first_attempt_success_records_ledger() {
        let tracker = InMemoryTracker::new();
        let credentials = static_credentials("t");
        let sleeper = RecordingSleeper::default();
        let engine = DeliveryEngine::new(&tracker, &credentials, policy(3), &sleeper);
        let mut ledger = MemoryLedger::new();

        let issue = engine
            .deliver("P1", &rendered("P1"), &mut ledger)
            .expect("delivered");
        assert_eq!(ledger.get("P1"), Some(issue));
        assert_eq!(tracker.create_calls(), 1);
        assert_eq!(sleeper.total_sleeps(), 0);
    }

    #[test]
    fn non_created_success_statuses_are_failures() {
        let tracker = InMemoryTracker::new();
        tracker.fail_next_creates(1, Scripted::Status(200));
        let credentials = static_credentials("t");
        let sleeper = RecordingSleeper::default();
        let engine = DeliveryEngine::new(&tracker, &credentials, RetryPolicy::once(), &sleeper);

        let err = engine.create_issue(&rendered("P1")).expect_err("200 is not 201");
        assert!(matches!(
            err,
            DeliveryError::Exhausted {
                attempts: 1,
                last: AttemptFailure::Status { status: 200, .. }
            }
        ));
    }

    #[test]
    fn created_without_number_is_malformed() {
        let tracker = InMemoryTracker::new();
        tracker.fail_next_creates(1, Scripted::Malformed);
        let credentials = static_credentials("t");
        let sleeper = RecordingSleeper::default();
        let engine = DeliveryEngine::new(&tracker, &credentials, policy(1), &sleeper);

        let err = engine.attempt_once(&rendered("P1")).expect_err("no number");
        assert!(matches!(
            err,
            DeliveryError::Transient(AttemptFailure::Malformed { status: 201 })
        ));
    }

    #[test]
    fn exhausted_retries_leave_ledger_empty() {
        let tracker = InMemoryTracker::new();
        tracker.fail_next_creates(10, Scripted::Status(502));
        let credentials = static_credentials("t");
        let sleeper = RecordingSleeper::default();
        let engine = DeliveryEngine::new(&tracker, &credentials, policy(4), &sleeper);
        let mut ledger = MemoryLedger::new();

        let err = engine
            .deliver("P1", &rendered("P1"), &mut ledger)
            .expect_err("always failing");
        assert!(matches!(err, DeliveryError::Exhausted { attempts: 4, .. }));
        assert_eq!(err.code(), ErrorCode::DeliveryExhausted);
        assert!(ledger.is_empty());
        assert_eq!(tracker.create_calls(), 4);
        assert_eq!(sleeper.durations(), vec![Duration::from_millis(10); 3]);
    }

    #[test]
    fn unauthorized_attempt_refreshes_credential() {
        let tracker = InMemoryTracker::new();
        tracker.reject_token("token-1");
        let source = ScriptedCredentials::never_expiring();
        let calls = source.calls();
        let credentials = scripted_credentials(source);
        let sleeper = RecordingSleeper::default();
        let engine = DeliveryEngine::new(&tracker, &credentials, policy(2), &sleeper);

        engine.create_issue(&rendered("P1")).expect("second attempt succeeds");
        assert_eq!(calls.get(), 2);
        assert_eq!(tracker.tokens_seen(), vec!["token-1", "token-2"]);
    }

    #[test]
    fn auth_failure_aborts_without_remote_calls() {
        let tracker = InMemoryTracker::new();
        let credentials =
            scripted_credentials(ScriptedCredentials::never_expiring().failing_first(99));
        let sleeper = RecordingSleeper::default();
        let engine = DeliveryEngine::new(&tracker, &credentials, policy(5), &sleeper);

        let err = engine.create_issue(&rendered("P1")).expect_err("no credential");
        assert!(matches!(err, DeliveryError::Auth(AuthError::Exhausted { .. })));
        assert_eq!(tracker.create_calls(), 0);
    }

    #[test]
    fn ledger_failure_surfaces_after_creation() {
        let tracker = InMemoryTracker::new();
        let credentials = static_credentials("t");
        let sleeper = RecordingSleeper::default();
        let engine = DeliveryEngine::new(&tracker, &credentials, policy(1), &sleeper);
        let mut ledger = MemoryLedger::failing();

        let err = engine
            .deliver("P1", &rendered("P1"), &mut ledger)
            .expect_err("ledger write fails");
        assert!(matches!(err, DeliveryError::Ledger(_)));
        assert_eq!(tracker.issues().len(), 1);
    }
}
