//! GitHub REST implementation of [`IssueTracker`] on a blocking `ureq` agent.

use crate::model::{IssueState, RemoteIssue, RenderedIssue};
use crate::remote::{IssueFilter, IssueTracker, RemoteError, RemoteResponse, STATUS_UNAUTHORIZED};
use anyhow::Result;
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};
use std::time::Duration;

pub const DEFAULT_API_BASE: &str = "https://api.github.com";
const PAGE_SIZE: usize = 100;
const USER_AGENT: &str = concat!("paperbridge/", env!("CARGO_PKG_VERSION"));

/// `<owner>/<repo>` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoSlug {
    pub owner: String,
    pub repo: String,
}

impl RepoSlug {
    /// Parse `owner/repo`.
    ///
    /// # Errors
    ///
    /// Returns an error unless the input is exactly two non-empty segments.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        let Some((owner, repo)) = trimmed.split_once('/') else {
            anyhow::bail!("invalid repo slug '{trimmed}': expected <owner>/<repo>");
        };

        if owner.is_empty() || repo.is_empty() || repo.contains('/') {
            anyhow::bail!("invalid repo slug '{trimmed}': expected <owner>/<repo>");
        }

        Ok(Self {
            owner: owner.to_string(),
            repo: repo.to_string(),
        })
    }

    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }
}

#[derive(Debug, Clone, Deserialize)]
struct GitHubIssue {
    number: u64,
    title: String,
    #[serde(default)]
    body: Option<String>,
    state: String,
    #[serde(default)]
    labels: Vec<GitHubLabel>,
    #[serde(default)]
    pull_request: Option<JsonValue>,
}

#[derive(Debug, Clone, Deserialize)]
struct GitHubLabel {
    name: String,
}

impl GitHubIssue {
    fn into_remote(self) -> Option<RemoteIssue> {
        if self.pull_request.is_some() {
            return None;
        }
        let state = if self.state.eq_ignore_ascii_case("closed") {
            IssueState::Closed
        } else {
            IssueState::Open
        };
        Some(RemoteIssue {
            number: self.number,
            title: self.title,
            body: self.body,
            labels: self.labels.into_iter().map(|label| label.name).collect(),
            state,
        })
    }
}

/// Blocking GitHub client scoped to one repository.
#[derive(Debug, Clone)]
pub struct GitHubClient {
    agent: ureq::Agent,
    api_base: String,
    repo: RepoSlug,
}

impl GitHubClient {
    /// Build a client whose every request is bounded by `timeout`.
    #[must_use]
    pub fn new(api_base: &str, repo: RepoSlug, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build();
        Self {
            agent,
            api_base: api_base.trim_end_matches('/').to_string(),
            repo,
        }
    }

    #[must_use]
    pub const fn repo(&self) -> &RepoSlug {
        &self.repo
    }

    fn issues_url(&self) -> String {
        format!(
            "{}/repos/{}/{}/issues",
            self.api_base, self.repo.owner, self.repo.repo
        )
    }

    fn request(&self, method: &str, url: &str, token: &str) -> ureq::Request {
        self.agent
            .request(method, url)
            .set("Accept", "application/vnd.github+json")
            .set("X-GitHub-Api-Version", "2022-11-28")
            .set("Authorization", &format!("Bearer {token}"))
    }

    fn fetch_page(
        &self,
        token: &str,
        filter: &IssueFilter,
        page: u32,
    ) -> Result<Vec<GitHubIssue>, RemoteError> {
        let url = self.issues_url();
        let mut request = self
            .request("GET", &url, token)
            .query("state", filter.state.as_query())
            .query("per_page", &PAGE_SIZE.to_string())
            .query("page", &page.to_string())
            .query("sort", "created")
            .query("direction", "asc");
        if !filter.labels.is_empty() {
            request = request.query("labels", &filter.labels.join(","));
        }

        match request.call() {
            Ok(response) => response
                .into_json::<Vec<GitHubIssue>>()
                .map_err(|err| RemoteError::Decode(err.to_string())),
            Err(ureq::Error::Status(STATUS_UNAUTHORIZED, _)) => Err(RemoteError::Unauthorized),
            Err(ureq::Error::Status(status, response)) => Err(RemoteError::Status {
                status,
                message: response_message(status, response),
            }),
            Err(ureq::Error::Transport(err)) => Err(RemoteError::Transport(err.to_string())),
        }
    }

    fn send_write(
        &self,
        url: &str,
        token: &str,
        payload: &JsonValue,
    ) -> Result<RemoteResponse, RemoteError> {
        match self.request("POST", url, token).send_json(payload) {
            Ok(response) => Ok(capture(response.status(), response)),
            Err(ureq::Error::Status(status, response)) => Ok(capture(status, response)),
            Err(ureq::Error::Transport(err)) => Err(RemoteError::Transport(err.to_string())),
        }
    }
}

impl IssueTracker for GitHubClient {
    fn list_issues(
        &self,
        token: &str,
        filter: &IssueFilter,
    ) -> Result<Vec<RemoteIssue>, RemoteError> {
        let mut issues = Vec::new();
        let mut page = 1_u32;

        loop {
            let batch = self.fetch_page(token, filter, page)?;
            let raw_len = batch.len();
            issues.extend(batch.into_iter().filter_map(GitHubIssue::into_remote));

            if raw_len < PAGE_SIZE {
                break;
            }
            page += 1;
        }

        tracing::debug!(
            repo = %self.repo.full_name(),
            state = filter.state.as_query(),
            labels = ?filter.labels,
            count = issues.len(),
            "listed issues"
        );
        Ok(issues)
    }

    fn create_issue(
        &self,
        token: &str,
        issue: &RenderedIssue,
    ) -> Result<RemoteResponse, RemoteError> {
        let payload = json!({
            "title": issue.title,
            "body": issue.body,
            "labels": issue.labels,
        });
        self.send_write(&self.issues_url(), token, &payload)
    }

    fn create_comment(
        &self,
        token: &str,
        number: u64,
        body: &str,
    ) -> Result<RemoteResponse, RemoteError> {
        let url = format!("{}/{number}/comments", self.issues_url());
        self.send_write(&url, token, &json!({ "body": body }))
    }
}

// A body that is absent or not JSON becomes `Null`; the caller judges it.
fn capture(status: u16, response: ureq::Response) -> RemoteResponse {
    let body = response.into_json::<JsonValue>().unwrap_or(JsonValue::Null);
    RemoteResponse::new(status, body)
}

fn response_message(status: u16, response: ureq::Response) -> String {
    capture(status, response).message()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_repo_slug_accepts_valid_input() {
        let slug = RepoSlug::parse(" lab/papers ").expect("slug should parse");
        assert_eq!(slug.owner, "lab");
        assert_eq!(slug.repo, "papers");
        assert_eq!(slug.full_name(), "lab/papers");
    }

    #[test]
    fn parse_repo_slug_rejects_invalid_input() {
        assert!(RepoSlug::parse("papers").is_err());
        assert!(RepoSlug::parse("/papers").is_err());
        assert!(RepoSlug::parse("lab/").is_err());
        assert!(RepoSlug::parse("lab/papers/extra").is_err());
    }

    #[test]
    fn listing_payload_drops_pull_requests() {
        let raw = serde_json::json!([
            {"number": 1, "title": "P1 a + b", "state": "open",
             "labels": [{"name": "paper_id=P1"}, {"name": "P1"}]},
            {"number": 2, "title": "Fix typo", "state": "open",
             "pull_request": {"url": "https://example.invalid"}},
            {"number": 3, "title": "P3 c + d", "state": "closed", "body": "x"}
        ]);
        let parsed: Vec<GitHubIssue> = serde_json::from_value(raw).expect("payload decodes");
        let issues: Vec<RemoteIssue> = parsed
            .into_iter()
            .filter_map(GitHubIssue::into_remote)
            .collect();

        assert_eq!(issues.len(), 2);
        assert_eq!(issues[0].labels, vec!["paper_id=P1", "P1"]);
        assert_eq!(issues[0].state, IssueState::Open);
        assert_eq!(issues[1].number, 3);
        assert_eq!(issues[1].state, IssueState::Closed);
        assert_eq!(issues[1].body.as_deref(), Some("x"));
    }

    #[test]
    fn api_base_trailing_slash_is_trimmed() {
        let client = GitHubClient::new(
            "https://ghe.example.com/api/v3/",
            RepoSlug::parse("lab/papers").expect("slug"),
            Duration::from_secs(1),
        );
        assert_eq!(
            client.issues_url(),
            "https://ghe.example.com/api/v3/repos/lab/papers/issues"
        );
    }
}
