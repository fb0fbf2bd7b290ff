//! GitHub surface used by the reconcilers.
//!
//! [`GhCli`] drives the `gh` CLI against the real API. [`memory::InMemoryGitHub`]
//! is an in-process stand-in with the same semantics.

mod gh;
pub mod memory;

pub use gh::GhCli;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{PrRef, Result};

/// Context name of the status check this bot owns.
pub const STATUS_CONTEXT: &str = "verify-conformance";

/// State of a commit status, as GitHub reports it.
///
/// Serializes lowercase; deserializes through [`StatusState::parse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StatusState {
    Success,
    Failure,
    #[default]
    Pending,
    Error,
}

impl StatusState {
    /// Returns the lowercase API value.
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusState::Success => "success",
            StatusState::Failure => "failure",
            StatusState::Pending => "pending",
            StatusState::Error => "error",
        }
    }

    /// Parses a state case-insensitively (GraphQL reports `SUCCESS`, REST `success`).
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "success" => Some(StatusState::Success),
            "failure" => Some(StatusState::Failure),
            "pending" | "expected" => Some(StatusState::Pending),
            "error" => Some(StatusState::Error),
            _ => None,
        }
    }
}

impl<'de> Deserialize<'de> for StatusState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        StatusState::parse(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown status state '{}'", raw)))
    }
}

/// One status context recorded on a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusContext {
    /// Context name, e.g. `verify-conformance`.
    pub context: String,
    /// Raw state string as reported.
    pub state: String,
}

/// A recent commit of a PR and its status contexts.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CommitStatus {
    /// Commit SHA.
    pub oid: String,
    /// Status contexts recorded on the commit.
    #[serde(default)]
    pub contexts: Vec<StatusContext>,
}

/// Snapshot of a pull request as returned by search.
///
/// Never updated in place from the remote; a fresh fetch is needed to see
/// changes made by an earlier reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestSummary {
    /// Identity of the PR.
    pub pr: PrRef,
    /// SHA of the head commit.
    pub head_sha: String,
    /// PR title.
    pub title: String,
    /// Login of the PR author.
    pub author: String,
    /// Labels at fetch time.
    #[serde(default)]
    pub labels: Vec<String>,
    /// Paths of changed files at fetch time.
    #[serde(default)]
    pub files: Vec<String>,
    /// Most recent commits with their status contexts.
    #[serde(default)]
    pub commits: Vec<CommitStatus>,
}

impl PullRequestSummary {
    /// Returns the recorded state of `context` on the head commit, if any.
    pub fn head_context_state(&self, context: &str) -> Option<&str> {
        self.commits
            .iter()
            .filter(|c| c.oid == self.head_sha)
            .flat_map(|c| c.contexts.iter())
            .find(|c| c.context.eq_ignore_ascii_case(context))
            .map(|c| c.state.as_str())
    }
}

/// A comment on an issue or PR.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueComment {
    /// Comment ID.
    pub id: u64,
    /// Comment body (Markdown).
    pub body: String,
    /// Login of the author.
    pub author: String,
}

/// A file changed by a PR.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangedFile {
    /// Repository-relative path.
    pub filename: String,
    /// Change kind (`added`, `modified`, `removed`, ...).
    #[serde(default)]
    pub status: String,
    /// Blob URL on github.com.
    #[serde(default)]
    pub blob_url: String,
}

impl ChangedFile {
    /// Returns true if the file no longer exists at the head commit.
    pub fn is_removed(&self) -> bool {
        self.status == "removed"
    }
}

/// The combined status of a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombinedStatus {
    /// SHA the status was computed for.
    pub sha: String,
    /// Aggregate state.
    pub state: StatusState,
}

/// A status entry to create on a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewStatus {
    /// Context name.
    pub context: String,
    /// Desired state.
    pub state: StatusState,
    /// Human-readable description.
    pub description: String,
}

/// Rate-limit telemetry returned with every GraphQL page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RateLimit {
    /// Points this page cost.
    pub cost: u32,
    /// Points remaining in the window.
    pub remaining: u32,
}

/// One page of search results.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SearchPage {
    /// Rate-limit telemetry for this page.
    pub rate_limit: RateLimit,
    /// Whether another page follows.
    pub has_next_page: bool,
    /// Cursor to request the next page.
    pub end_cursor: Option<String>,
    /// Pull requests on this page.
    pub nodes: Vec<PullRequestSummary>,
}

/// Identity of the bot account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotUser {
    login: String,
}

impl BotUser {
    /// Creates a bot identity from its login (with or without `[bot]`).
    pub fn new(login: impl Into<String>) -> Self {
        let login = login.into();
        let login = login.strip_suffix("[bot]").unwrap_or(&login).to_string();
        Self { login }
    }

    /// Returns the login without the `[bot]` suffix.
    pub fn login(&self) -> &str {
        &self.login
    }

    /// Returns true if `candidate` is this bot; app accounts carry a `[bot]` suffix.
    pub fn matches(&self, candidate: &str) -> bool {
        candidate.strip_suffix("[bot]").unwrap_or(candidate) == self.login
    }
}

/// Operations against GitHub needed to verify and reconcile conformance PRs.
///
/// Every call is awaited to completion before the next one is issued.
#[async_trait]
pub trait GitHubClient: Send + Sync {
    /// Runs one page of a PR search within the scope of `org`.
    async fn search_page(&self, query: &str, cursor: Option<&str>, org: &str)
        -> Result<SearchPage>;

    /// Fetches a single PR in the same shape search returns.
    async fn get_pull_request(&self, pr: &PrRef) -> Result<PullRequestSummary>;

    /// Lists the label names currently on the PR.
    async fn get_issue_labels(&self, pr: &PrRef) -> Result<Vec<String>>;

    /// Lists the files changed by the PR.
    async fn get_pull_request_changes(&self, pr: &PrRef) -> Result<Vec<ChangedFile>>;

    /// Fetches the raw contents of `path` at `git_ref`.
    async fn get_file_contents(&self, pr: &PrRef, path: &str, git_ref: &str) -> Result<String>;

    /// Adds a label to the PR.
    async fn add_label(&self, pr: &PrRef, label: &str) -> Result<()>;

    /// Removes a label from the PR.
    async fn remove_label(&self, pr: &PrRef, label: &str) -> Result<()>;

    /// Lists comments on the PR, oldest first.
    async fn list_issue_comments(&self, pr: &PrRef) -> Result<Vec<IssueComment>>;

    /// Deletes a comment by ID.
    async fn delete_comment(&self, pr: &PrRef, comment_id: u64) -> Result<()>;

    /// Posts a new comment on the PR.
    async fn create_comment(&self, pr: &PrRef, body: &str) -> Result<()>;

    /// Returns the identity the bot comments as.
    async fn bot_user(&self) -> Result<BotUser>;

    /// Fetches the combined status of a commit.
    async fn get_combined_status(&self, pr: &PrRef, sha: &str) -> Result<CombinedStatus>;

    /// Creates a status entry on a commit.
    async fn create_status(&self, pr: &PrRef, sha: &str, status: &NewStatus) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary_with_contexts(head: &str, commits: Vec<CommitStatus>) -> PullRequestSummary {
        PullRequestSummary {
            pr: PrRef::new("cncf", "k8s-conformance", 1),
            head_sha: head.to_string(),
            title: "Conformance results for v1.31/Foo".to_string(),
            author: "someone".to_string(),
            labels: vec![],
            files: vec![],
            commits,
        }
    }

    #[test]
    fn bot_user_matches_with_and_without_suffix() {
        let bot = BotUser::new("k8s-ci-robot");
        assert!(bot.matches("k8s-ci-robot"));
        assert!(bot.matches("k8s-ci-robot[bot]"));
        assert!(!bot.matches("someone-else"));

        let app = BotUser::new("conformance-bot[bot]");
        assert_eq!(app.login(), "conformance-bot");
        assert!(app.matches("conformance-bot"));
    }

    #[test]
    fn status_state_parses_graphql_and_rest_forms() {
        assert_eq!(StatusState::parse("SUCCESS"), Some(StatusState::Success));
        assert_eq!(StatusState::parse("failure"), Some(StatusState::Failure));
        assert_eq!(StatusState::parse("EXPECTED"), Some(StatusState::Pending));
        assert_eq!(StatusState::parse("bogus"), None);
        assert_eq!(StatusState::Error.as_str(), "error");
    }

    #[test]
    fn status_state_deserializes_any_case() {
        let states: Vec<StatusState> =
            serde_json::from_str(r#"["SUCCESS", "failure", "Pending", "EXPECTED"]"#).unwrap();
        assert_eq!(
            states,
            vec![
                StatusState::Success,
                StatusState::Failure,
                StatusState::Pending,
                StatusState::Pending
            ]
        );
        assert!(serde_json::from_str::<StatusState>(r#""bogus""#).is_err());
        assert_eq!(
            serde_json::to_string(&StatusState::Success).unwrap(),
            r#""success""#
        );
    }

    #[test]
    fn head_context_state_only_reads_head_commit() {
        let summary = summary_with_contexts(
            "bbb",
            vec![
                CommitStatus {
                    oid: "aaa".to_string(),
                    contexts: vec![StatusContext {
                        context: "verify-conformance".to_string(),
                        state: "SUCCESS".to_string(),
                    }],
                },
                CommitStatus {
                    oid: "bbb".to_string(),
                    contexts: vec![StatusContext {
                        context: "Verify-Conformance".to_string(),
                        state: "FAILURE".to_string(),
                    }],
                },
            ],
        );
        assert_eq!(summary.head_context_state(STATUS_CONTEXT), Some("FAILURE"));

        let none = summary_with_contexts("ccc", summary.commits.clone());
        assert_eq!(none.head_context_state(STATUS_CONTEXT), None);
    }

    #[test]
    fn status_state_serializes_lowercase() {
        let json = serde_json::to_string(&StatusState::Pending).unwrap();
        assert_eq!(json, "\"pending\"");
    }
}
