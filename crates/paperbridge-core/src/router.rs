//! Webhook event routing: resolve the paper's open issue and comment on it.
//!
//! Validation failures are decided before any remote call. The comment is
//! appended once, never retried, and the router never creates issues.

use crate::credential::{AuthError, CredentialCache};
use crate::directory::{DirectoryError, RemoteDirectory};
use crate::error::ErrorCode;
use crate::event::{EventKind, InboundEvent};
use crate::model::IssueRef;
use crate::remote::{IssueTracker, RemoteError};
use crate::render::render_comment;

#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("unknown event kind '{0}'")]
    UnknownKind(String),

    #[error("event has no paper_id")]
    MissingPaperId,

    #[error("no open issue for paper_id '{0}'")]
    NoMatchingIssue(String),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("issue tracker request failed: {0}")]
    Remote(#[from] RemoteError),
}

impl RouterError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::UnknownKind(_) => ErrorCode::UnknownEventKind,
            Self::MissingPaperId => ErrorCode::MissingPaperId,
            Self::NoMatchingIssue(_) => ErrorCode::NoMatchingIssue,
            Self::Auth(err) => err.code(),
            Self::Remote(err) => err.code(),
        }
    }

    /// The caller sent something unroutable, as opposed to the remote failing.
    #[must_use]
    pub const fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::UnknownKind(_) | Self::MissingPaperId | Self::NoMatchingIssue(_)
        )
    }
}

impl From<DirectoryError> for RouterError {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::Auth(err) => Self::Auth(err),
            DirectoryError::Remote(err) => Self::Remote(err),
        }
    }
}

/// Validated event ready for lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidEvent<'e> {
    pub kind: EventKind,
    pub paper_id: &'e str,
}

/// Check kind and paper id without touching the network.
///
/// # Errors
///
/// Returns [`RouterError::UnknownKind`] or [`RouterError::MissingPaperId`].
pub fn validate(event: &InboundEvent) -> Result<ValidEvent<'_>, RouterError> {
    let kind = EventKind::parse(&event.kind)
        .ok_or_else(|| RouterError::UnknownKind(event.kind.clone()))?;
    let paper_id = event.paper_id.trim();
    if paper_id.is_empty() {
        return Err(RouterError::MissingPaperId);
    }
    Ok(ValidEvent { kind, paper_id })
}

#[derive(Clone, Copy)]
pub struct RouterContext<'a> {
    pub tracker: &'a dyn IssueTracker,
    pub credentials: &'a CredentialCache,
}

impl RouterContext<'_> {
    /// Resolve the event's issue and append the rendered comment.
    ///
    /// # Errors
    ///
    /// Caller errors ([`RouterError::UnknownKind`],
    /// [`RouterError::MissingPaperId`], [`RouterError::NoMatchingIssue`])
    /// or remote/auth failures. A rejected comment is not retried.
    pub fn route(&self, event: &InboundEvent) -> Result<IssueRef, RouterError> {
        let valid = validate(event)?;
        let directory = RemoteDirectory::new(self.tracker, self.credentials);
        let matches = directory.open_issues_for(valid.paper_id)?;

        let Some(first) = matches.first() else {
            tracing::info!(
                kind = %valid.kind,
                paper_id = valid.paper_id,
                "no open issue for event"
            );
            return Err(RouterError::NoMatchingIssue(valid.paper_id.to_string()));
        };
        if matches.len() > 1 {
            tracing::warn!(
                paper_id = valid.paper_id,
                chosen = first.number,
                candidates = ?matches.iter().map(|issue| issue.number).collect::<Vec<_>>(),
                "ambiguous issue match; commenting on the first"
            );
        }

        let issue = IssueRef {
            number: first.number,
        };
        let body = render_comment(valid.kind, event);
        self.append_comment(issue, &body)?;
        tracing::info!(kind = %valid.kind, paper_id = valid.paper_id, %issue, "event relayed");
        Ok(issue)
    }

    fn append_comment(&self, issue: IssueRef, body: &str) -> Result<(), RouterError> {
        let token = self.credentials.token()?;
        let response = self.tracker.create_comment(&token, issue.number, body)?;
        if response.is_unauthorized() {
            self.credentials.invalidate();
            return Err(RouterError::Remote(RemoteError::Unauthorized));
        }
        if !response.is_created() {
            return Err(RouterError::Remote(RemoteError::Status {
                status: response.status,
                message: response.message(),
            }));
        }
        Ok(())
    }
}
