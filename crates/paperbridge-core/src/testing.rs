//! In-memory fakes for the tracker, ledger, sleeper and credential seams.
//!
//! Compiled for this crate's tests and, through the `test-support` feature,
//! for downstream test suites.

use crate::credential::{AuthError, BearerToken, CredentialCache, CredentialSource, StaticToken};
use crate::ledger::{IdentityLedger, LedgerError};
use crate::model::{IssueRef, IssueState, RemoteIssue, RenderedIssue};
use crate::remote::{IssueFilter, IssueTracker, RemoteError, RemoteResponse, StateFilter};
use crate::render::paper_label;
use crate::retry::{RetryPolicy, Sleeper};
use chrono::{DateTime, Utc};
use serde_json::{Value as JsonValue, json};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Shared call counter handle.
#[derive(Debug, Clone, Default)]
pub struct CallCounter(Arc<AtomicU32>);

impl CallCounter {
    #[must_use]
    pub fn get(&self) -> u32 {
        self.0.load(Ordering::SeqCst)
    }

    fn bump(&self) -> u32 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Sleeper that records requested delays and returns immediately.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    slept: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    #[must_use]
    pub fn durations(&self) -> Vec<Duration> {
        locked(&self.slept).clone()
    }

    #[must_use]
    pub fn total_sleeps(&self) -> usize {
        locked(&self.slept).len()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        locked(&self.slept).push(duration);
    }
}

/// Credential source issuing `token-<n>` on the n-th call.
#[derive(Debug, Clone)]
pub struct ScriptedCredentials {
    calls: CallCounter,
    expires_at: Option<DateTime<Utc>>,
    fail_first: u32,
}

impl ScriptedCredentials {
    #[must_use]
    pub fn never_expiring() -> Self {
        Self {
            calls: CallCounter::default(),
            expires_at: None,
            fail_first: 0,
        }
    }

    #[must_use]
    pub fn expiring_at(expires_at: DateTime<Utc>) -> Self {
        Self {
            expires_at: Some(expires_at),
            ..Self::never_expiring()
        }
    }

    /// The first `count` calls fail with a retryable exchange error.
    #[must_use]
    pub const fn failing_first(mut self, count: u32) -> Self {
        self.fail_first = count;
        self
    }

    #[must_use]
    pub fn calls(&self) -> CallCounter {
        self.calls.clone()
    }
}

impl CredentialSource for ScriptedCredentials {
    fn acquire(&self) -> Result<BearerToken, AuthError> {
        let call = self.calls.bump();
        if call <= self.fail_first {
            return Err(AuthError::Exchange(format!("scripted failure {call}")));
        }
        Ok(BearerToken::new(format!("token-{call}"), self.expires_at))
    }

    fn describe(&self) -> &'static str {
        "scripted"
    }
}

/// Credential cache over a fixed token that never retries.
#[must_use]
pub fn static_credentials(secret: &str) -> Arc<CredentialCache> {
    Arc::new(CredentialCache::new(
        Box::new(StaticToken::new(secret)),
        RetryPolicy::once(),
        Arc::new(RecordingSleeper::default()),
    ))
}

/// Credential cache over [`ScriptedCredentials`].
#[must_use]
pub fn scripted_credentials(source: ScriptedCredentials) -> Arc<CredentialCache> {
    Arc::new(CredentialCache::new(
        Box::new(source),
        RetryPolicy::new(3, Duration::ZERO),
        Arc::new(RecordingSleeper::default()),
    ))
}

/// Failure a scripted tracker call should produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scripted {
    /// Respond with this HTTP status and an error message body.
    Status(u16),
    /// Respond `201` with no usable body.
    Malformed,
    /// No response at all.
    Transport,
}

impl Scripted {
    fn outcome(self) -> Result<RemoteResponse, RemoteError> {
        match self {
            Self::Status(status) => Ok(RemoteResponse::new(
                status,
                json!({ "message": format!("scripted status {status}") }),
            )),
            Self::Malformed => Ok(RemoteResponse::new(201, JsonValue::Null)),
            Self::Transport => Err(RemoteError::Transport(
                "scripted transport failure".to_string(),
            )),
        }
    }
}

#[derive(Debug, Default)]
struct TrackerState {
    issues: Vec<RemoteIssue>,
    comments: Vec<(u64, String)>,
    create_script: VecDeque<Scripted>,
    comment_script: VecDeque<Scripted>,
    failing_papers: HashMap<String, Scripted>,
    rejected_tokens: HashSet<String>,
    list_failure: Option<RemoteError>,
    tokens_seen: Vec<String>,
    list_calls: u32,
    create_calls: u32,
    comment_calls: u32,
}

/// Issue tracker held entirely in memory, in creation order.
#[derive(Debug, Default)]
pub struct InMemoryTracker {
    state: Mutex<TrackerState>,
}

impl InMemoryTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an existing issue and return its number.
    pub fn seed_issue(&self, title: &str, labels: &[&str], state: IssueState) -> u64 {
        let mut inner = locked(&self.state);
        let number = next_number(&inner.issues);
        inner.issues.push(RemoteIssue {
            number,
            title: title.to_string(),
            body: None,
            labels: labels.iter().map(ToString::to_string).collect(),
            state,
        });
        number
    }

    /// The next `count` create calls fail with `outcome`.
    pub fn fail_next_creates(&self, count: usize, outcome: Scripted) {
        let mut inner = locked(&self.state);
        inner.create_script.extend(std::iter::repeat_n(outcome, count));
    }

    /// The next `count` comment calls fail with `outcome`.
    pub fn fail_next_comments(&self, count: usize, outcome: Scripted) {
        let mut inner = locked(&self.state);
        inner.comment_script.extend(std::iter::repeat_n(outcome, count));
    }

    /// Creating an issue for `paper_id` always fails with `outcome`.
    pub fn always_fail_paper(&self, paper_id: &str, outcome: Scripted) {
        locked(&self.state)
            .failing_papers
            .insert(paper_label(paper_id), outcome);
    }

    /// Every call made with `token` is answered with `401`.
    pub fn reject_token(&self, token: &str) {
        locked(&self.state).rejected_tokens.insert(token.to_string());
    }

    /// Every listing fails with `err`.
    pub fn fail_listings(&self, err: RemoteError) {
        locked(&self.state).list_failure = Some(err);
    }

    #[must_use]
    pub fn issues(&self) -> Vec<RemoteIssue> {
        locked(&self.state).issues.clone()
    }

    #[must_use]
    pub fn comments(&self) -> Vec<(u64, String)> {
        locked(&self.state).comments.clone()
    }

    #[must_use]
    pub fn tokens_seen(&self) -> Vec<String> {
        locked(&self.state).tokens_seen.clone()
    }

    #[must_use]
    pub fn list_calls(&self) -> u32 {
        locked(&self.state).list_calls
    }

    #[must_use]
    pub fn create_calls(&self) -> u32 {
        locked(&self.state).create_calls
    }

    #[must_use]
    pub fn comment_calls(&self) -> u32 {
        locked(&self.state).comment_calls
    }

    #[must_use]
    pub fn total_calls(&self) -> u32 {
        let inner = locked(&self.state);
        inner.list_calls + inner.create_calls + inner.comment_calls
    }
}

fn next_number(issues: &[RemoteIssue]) -> u64 {
    issues.iter().map(|issue| issue.number).max().unwrap_or(0) + 1
}

fn unauthorized() -> RemoteResponse {
    RemoteResponse::new(401, json!({ "message": "Bad credentials" }))
}

impl IssueTracker for InMemoryTracker {
    fn list_issues(
        &self,
        token: &str,
        filter: &IssueFilter,
    ) -> Result<Vec<RemoteIssue>, RemoteError> {
        let mut inner = locked(&self.state);
        inner.list_calls += 1;
        inner.tokens_seen.push(token.to_string());
        if inner.rejected_tokens.contains(token) {
            return Err(RemoteError::Unauthorized);
        }
        if let Some(err) = inner.list_failure.clone() {
            return Err(err);
        }

        Ok(inner
            .issues
            .iter()
            .filter(|issue| filter.state == StateFilter::All || issue.state == IssueState::Open)
            .filter(|issue| filter.labels.iter().all(|label| issue.has_label(label)))
            .cloned()
            .collect())
    }

    fn create_issue(
        &self,
        token: &str,
        issue: &RenderedIssue,
    ) -> Result<RemoteResponse, RemoteError> {
        let mut inner = locked(&self.state);
        inner.create_calls += 1;
        inner.tokens_seen.push(token.to_string());
        if inner.rejected_tokens.contains(token) {
            return Ok(unauthorized());
        }
        if let Some(scripted) = inner.create_script.pop_front() {
            return scripted.outcome();
        }
        let failing = issue
            .labels
            .iter()
            .find_map(|label| inner.failing_papers.get(label).copied());
        if let Some(scripted) = failing {
            return scripted.outcome();
        }

        let number = next_number(&inner.issues);
        inner.issues.push(RemoteIssue {
            number,
            title: issue.title.clone(),
            body: Some(issue.body.clone()),
            labels: issue.labels.clone(),
            state: IssueState::Open,
        });
        Ok(RemoteResponse::new(
            201,
            json!({ "number": number, "title": issue.title }),
        ))
    }

    fn create_comment(
        &self,
        token: &str,
        number: u64,
        body: &str,
    ) -> Result<RemoteResponse, RemoteError> {
        let mut inner = locked(&self.state);
        inner.comment_calls += 1;
        inner.tokens_seen.push(token.to_string());
        if inner.rejected_tokens.contains(token) {
            return Ok(unauthorized());
        }
        if let Some(scripted) = inner.comment_script.pop_front() {
            return scripted.outcome();
        }
        if !inner.issues.iter().any(|issue| issue.number == number) {
            return Ok(RemoteResponse::new(404, json!({ "message": "Not Found" })));
        }

        inner.comments.push((number, body.to_string()));
        let id = inner.comments.len();
        Ok(RemoteResponse::new(201, json!({ "id": id })))
    }
}

/// Ledger kept in a map, optionally failing every write.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    entries: HashMap<String, IssueRef>,
    order: Vec<String>,
    fail_writes: bool,
}

impl MemoryLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A ledger whose every `record` fails.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail_writes: true,
            ..Self::default()
        }
    }

    /// Pre-populate an entry as if a previous pass delivered it.
    #[must_use]
    pub fn with_entry(mut self, paper_id: &str, number: u64) -> Self {
        self.order.push(paper_id.to_string());
        self.entries.insert(paper_id.to_string(), IssueRef { number });
        self
    }

    #[must_use]
    pub fn get(&self, paper_id: &str) -> Option<IssueRef> {
        self.entries.get(paper_id).copied()
    }

    /// Paper ids in recording order.
    #[must_use]
    pub fn paper_ids(&self) -> Vec<String> {
        self.order.clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl IdentityLedger for MemoryLedger {
    fn has(&self, paper_id: &str) -> Result<bool, LedgerError> {
        Ok(self.entries.contains_key(paper_id))
    }

    fn record(&mut self, paper_id: &str, issue: IssueRef) -> Result<(), LedgerError> {
        if self.fail_writes {
            return Err(LedgerError::Io {
                path: "memory".into(),
                source: std::io::Error::other("scripted ledger failure"),
            });
        }
        if !self.entries.contains_key(paper_id) {
            self.order.push(paper_id.to_string());
            self.entries.insert(paper_id.to_string(), issue);
        }
        Ok(())
    }
}
