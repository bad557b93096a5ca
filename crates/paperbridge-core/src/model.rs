//! Shared domain types: dataset rows, remote issues and issue references.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One row of the papers dataset.
///
/// `paper_id` is the business key; every other column may be blank.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetRecord {
    pub paper_id: String,
    #[serde(default)]
    pub paper: Option<String>,
    #[serde(default)]
    pub coder: Option<String>,
    #[serde(default)]
    pub coder_id: Option<String>,
    #[serde(default)]
    pub supervisor: Option<String>,
    #[serde(default)]
    pub supervisor_id: Option<String>,
    #[serde(default)]
    pub paper_coder: Option<String>,
}

impl DatasetRecord {
    /// Minimal record with only the business key set.
    #[must_use]
    pub fn new(paper_id: impl Into<String>) -> Self {
        Self {
            paper_id: paper_id.into(),
            paper: None,
            coder: None,
            coder_id: None,
            supervisor: None,
            supervisor_id: None,
            paper_coder: None,
        }
    }

    /// Trim every cell and turn blank optional cells into `None`.
    #[must_use]
    pub fn normalized(self) -> Self {
        fn clean(value: Option<String>) -> Option<String> {
            value
                .map(|raw| raw.trim().to_string())
                .filter(|raw| !raw.is_empty())
        }

        Self {
            paper_id: self.paper_id.trim().to_string(),
            paper: clean(self.paper),
            coder: clean(self.coder),
            coder_id: clean(self.coder_id),
            supervisor: clean(self.supervisor),
            supervisor_id: clean(self.supervisor_id),
            paper_coder: clean(self.paper_coder),
        }
    }
}

/// Open/closed lifecycle of a remote issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueState {
    Open,
    Closed,
}

impl IssueState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for IssueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An issue as returned by the remote listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteIssue {
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    pub state: IssueState,
}

impl RemoteIssue {
    #[must_use]
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|candidate| candidate == label)
    }
}

/// Reference to a remote issue the core created or resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IssueRef {
    pub number: u64,
}

impl fmt::Display for IssueRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.number)
    }
}

/// Title, body and labels ready to be posted as a new issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedIssue {
    pub title: String,
    pub body: String,
    pub labels: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalized_trims_and_blanks_to_none() {
        let record = DatasetRecord {
            paper_id: "  P7 ".to_string(),
            paper: Some("  ".to_string()),
            coder: Some(" Ana ".to_string()),
            coder_id: None,
            supervisor: Some(String::new()),
            supervisor_id: Some("s-1".to_string()),
            paper_coder: None,
        }
        .normalized();

        assert_eq!(record.paper_id, "P7");
        assert_eq!(record.paper, None);
        assert_eq!(record.coder.as_deref(), Some("Ana"));
        assert_eq!(record.supervisor, None);
        assert_eq!(record.supervisor_id.as_deref(), Some("s-1"));
    }

    #[test]
    fn remote_issue_label_lookup() {
        let issue = RemoteIssue {
            number: 3,
            title: "P1 a + b".to_string(),
            body: None,
            labels: vec!["paper_id=P1".to_string(), "P1".to_string()],
            state: IssueState::Open,
        };
        assert!(issue.has_label("paper_id=P1"));
        assert!(!issue.has_label("paper_id=P2"));
    }

    #[test]
    fn issue_state_serializes_lowercase() {
        let raw = serde_json::to_string(&IssueState::Closed).expect("serialize");
        assert_eq!(raw, "\"closed\"");
        assert_eq!(IssueRef { number: 12 }.to_string(), "#12");
    }
}
