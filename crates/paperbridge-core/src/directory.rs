//! Read path over the remote issue tracker.
//!
//! Issues are identified by their structured `paper_id=<id>` label first and
//! by the first token of their title second. Listings that are rejected with
//! a `401` drop the cached credential and are retried exactly once.

use crate::credential::{AuthError, CredentialCache};
use crate::error::ErrorCode;
use crate::model::RemoteIssue;
use crate::remote::{IssueFilter, IssueTracker, RemoteError};
use crate::render::{paper_id_from_label, paper_id_from_title, paper_label};
use std::collections::HashSet;

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Remote(#[from] RemoteError),
}

impl DirectoryError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Auth(err) => err.code(),
            Self::Remote(err) => err.code(),
        }
    }
}

/// Paper id an issue belongs to: structured label, else title prefix.
#[must_use]
pub fn identifying_paper_id(issue: &RemoteIssue) -> Option<&str> {
    issue
        .labels
        .iter()
        .find_map(|label| paper_id_from_label(label))
        .or_else(|| paper_id_from_title(&issue.title))
}

/// Issue listings bound to one tracker and credential cache.
pub struct RemoteDirectory<'a> {
    tracker: &'a dyn IssueTracker,
    credentials: &'a CredentialCache,
}

impl<'a> RemoteDirectory<'a> {
    #[must_use]
    pub fn new(tracker: &'a dyn IssueTracker, credentials: &'a CredentialCache) -> Self {
        Self {
            tracker,
            credentials,
        }
    }

    /// List issues matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::Auth`] when no credential can be obtained and
    /// [`DirectoryError::Remote`] when the listing fails, including a second
    /// consecutive `401`.
    pub fn list(&self, filter: &IssueFilter) -> Result<Vec<RemoteIssue>, DirectoryError> {
        let token = self.credentials.token()?;
        match self.tracker.list_issues(&token, filter) {
            Err(RemoteError::Unauthorized) => {
                tracing::warn!("issue listing rejected the credential; re-acquiring once");
                self.credentials.invalidate();
                let token = self.credentials.token()?;
                Ok(self.tracker.list_issues(&token, filter)?)
            }
            other => Ok(other?),
        }
    }

    /// Paper ids that already have an issue in any state.
    ///
    /// # Errors
    ///
    /// See [`Self::list`].
    pub fn delivered_ids(&self) -> Result<HashSet<String>, DirectoryError> {
        let issues = self.list(&IssueFilter::all())?;
        let ids: HashSet<String> = issues
            .iter()
            .filter_map(identifying_paper_id)
            .map(ToString::to_string)
            .collect();
        tracing::debug!(
            issues = issues.len(),
            ids = ids.len(),
            "derived delivered set from remote"
        );
        Ok(ids)
    }

    /// Open issues for `paper_id`, in listing order.
    ///
    /// Issues carrying the structured label win. Only when none do is the
    /// open listing scanned for a matching title prefix, and an issue labeled
    /// for another paper never matches by title.
    ///
    /// # Errors
    ///
    /// See [`Self::list`].
    pub fn open_issues_for(&self, paper_id: &str) -> Result<Vec<RemoteIssue>, DirectoryError> {
        let labeled = self.list(&IssueFilter::open().with_label(paper_label(paper_id)))?;
        if !labeled.is_empty() {
            return Ok(labeled);
        }

        let by_title: Vec<RemoteIssue> = self
            .list(&IssueFilter::open())?
            .into_iter()
            .filter(|issue| identifying_paper_id(issue) == Some(paper_id))
            .collect();
        if !by_title.is_empty() {
            tracing::debug!(
                paper_id,
                matches = by_title.len(),
                "resolved issue by title prefix"
            );
        }
        Ok(by_title)
    }
}
