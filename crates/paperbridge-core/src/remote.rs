//! Transport seam to the remote issue tracker.
//!
//! Write calls return the raw status and body instead of judging them: the
//! delivery engine alone decides what counts as a confirmed creation.

use crate::error::ErrorCode;
use crate::model::{RemoteIssue, RenderedIssue};
use serde_json::Value as JsonValue;

pub const STATUS_CREATED: u16 = 201;
pub const STATUS_UNAUTHORIZED: u16 = 401;

/// Raw outcome of a write call that reached the remote service.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteResponse {
    pub status: u16,
    pub body: JsonValue,
}

impl RemoteResponse {
    #[must_use]
    pub const fn new(status: u16, body: JsonValue) -> Self {
        Self { status, body }
    }

    #[must_use]
    pub const fn is_created(&self) -> bool {
        self.status == STATUS_CREATED
    }

    #[must_use]
    pub const fn is_unauthorized(&self) -> bool {
        self.status == STATUS_UNAUTHORIZED
    }

    /// Remote-assigned `number` in the body, if present and well formed.
    #[must_use]
    pub fn number(&self) -> Option<u64> {
        self.body.get("number").and_then(JsonValue::as_u64)
    }

    /// Best-effort error message from the body.
    #[must_use]
    pub fn message(&self) -> String {
        self.body
            .get("message")
            .and_then(JsonValue::as_str)
            .map_or_else(|| format!("status {}", self.status), ToString::to_string)
    }
}

/// Which issue states a listing should include.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StateFilter {
    #[default]
    Open,
    All,
}

impl StateFilter {
    #[must_use]
    pub const fn as_query(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::All => "all",
        }
    }
}

/// Listing filter. All `labels` must be present on a returned issue.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IssueFilter {
    pub state: StateFilter,
    pub labels: Vec<String>,
}

impl IssueFilter {
    #[must_use]
    pub fn open() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn all() -> Self {
        Self {
            state: StateFilter::All,
            labels: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.labels.push(label.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    #[error("request to the issue tracker failed in transport: {0}")]
    Transport(String),

    #[error("issue tracker rejected the credential")]
    Unauthorized,

    #[error("issue tracker returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("failed to decode issue tracker response: {0}")]
    Decode(String),
}

impl RemoteError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Transport(_) => ErrorCode::RemoteTransport,
            Self::Unauthorized => ErrorCode::AuthFailed,
            Self::Status { .. } | Self::Decode(_) => ErrorCode::RemoteRejected,
        }
    }
}

/// Remote issue tracker operations the core depends on.
///
/// Every implementation must bound each call with a timeout.
pub trait IssueTracker: Send + Sync {
    /// List issues matching `filter`, in the service's listing order.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Unauthorized`] on a rejected token, other
    /// variants on transport, status or decoding failures.
    fn list_issues(
        &self,
        token: &str,
        filter: &IssueFilter,
    ) -> Result<Vec<RemoteIssue>, RemoteError>;

    /// Create an issue and return the raw response.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Transport`] only when no response was received.
    fn create_issue(
        &self,
        token: &str,
        issue: &RenderedIssue,
    ) -> Result<RemoteResponse, RemoteError>;

    /// Append a comment to issue `number` and return the raw response.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Transport`] only when no response was received.
    fn create_comment(
        &self,
        token: &str,
        number: u64,
        body: &str,
    ) -> Result<RemoteResponse, RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn created_requires_exact_status() {
        assert!(RemoteResponse::new(201, json!({"number": 4})).is_created());
        assert!(!RemoteResponse::new(200, json!({"number": 4})).is_created());
        assert!(RemoteResponse::new(401, JsonValue::Null).is_unauthorized());
    }

    #[test]
    fn number_requires_integer_field() {
        assert_eq!(RemoteResponse::new(201, json!({"number": 4})).number(), Some(4));
        assert_eq!(RemoteResponse::new(201, json!({"number": "4"})).number(), None);
        assert_eq!(RemoteResponse::new(201, JsonValue::Null).number(), None);
    }

    #[test]
    fn message_falls_back_to_status() {
        let with_message = RemoteResponse::new(422, json!({"message": "Validation Failed"}));
        assert_eq!(with_message.message(), "Validation Failed");
        assert_eq!(RemoteResponse::new(502, JsonValue::Null).message(), "status 502");
    }

    #[test]
    fn filter_builders() {
        let filter = IssueFilter::open().with_label("paper_id=P1");
        assert_eq!(filter.state.as_query(), "open");
        assert_eq!(filter.labels, vec!["paper_id=P1"]);
        assert_eq!(IssueFilter::all().state.as_query(), "all");
    }
}
