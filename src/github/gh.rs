//! GitHub client backed by the `gh` CLI.
//!
//! REST calls go through `gh api <path>`, search and PR lookups through
//! `gh api graphql`. Authentication is whatever `gh` is logged in as.

use std::process::Stdio;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::process::Command;

use crate::error::{Error, PrRef, Result};

use super::{
    BotUser, ChangedFile, CombinedStatus, CommitStatus, GitHubClient, IssueComment, NewStatus,
    PullRequestSummary, RateLimit, SearchPage, StatusContext,
};

const PULL_REQUEST_FIELDS: &str = "fragment PullRequestFields on PullRequest {
  number
  headRefOid
  title
  author { login }
  repository { name owner { login } }
  labels(first: 100) { nodes { name } }
  files(first: 100) { nodes { path } }
  commits(last: 5) { nodes { commit { oid status { contexts { context state } } } } }
}";

const SEARCH_QUERY: &str = "query($searchQuery: String!, $searchCursor: String) {
  rateLimit { cost remaining }
  search(type: ISSUE, first: 100, after: $searchCursor, query: $searchQuery) {
    pageInfo { hasNextPage endCursor }
    nodes { ... on PullRequest { ...PullRequestFields } }
  }
}";

const PULL_REQUEST_QUERY: &str = "query($owner: String!, $name: String!, $number: Int!) {
  repository(owner: $owner, name: $name) {
    pullRequest(number: $number) { ...PullRequestFields }
  }
}";

/// GitHub client that shells out to `gh api`.
#[derive(Debug, Clone)]
pub struct GhCli {
    /// Path to the gh CLI binary.
    cli_path: String,
    /// Bot login override; otherwise the authenticated user is used.
    bot_login: Option<String>,
}

impl Default for GhCli {
    fn default() -> Self {
        Self::new()
    }
}

impl GhCli {
    /// Creates a client using the default `gh` command.
    pub fn new() -> Self {
        Self {
            cli_path: "gh".to_string(),
            bot_login: None,
        }
    }

    /// Creates a client with a custom CLI path.
    pub fn with_cli_path(cli_path: impl Into<String>) -> Self {
        Self {
            cli_path: cli_path.into(),
            bot_login: None,
        }
    }

    /// Uses a fixed bot login instead of asking GitHub who we are.
    pub fn with_bot_login(mut self, login: Option<String>) -> Self {
        self.bot_login = login;
        self
    }

    /// Runs `gh api` with the given arguments and returns stdout.
    async fn api(&self, args: Vec<String>) -> Result<String> {
        tracing::debug!(cli = %self.cli_path, args = ?args, "gh api");

        let output = Command::new(&self.cli_path)
            .arg("api")
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| Error::GitHub(format!("failed to run gh: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            let endpoint = args
                .iter()
                .find(|a| a.starts_with("repos/") || *a == "graphql" || *a == "user")
                .map(String::as_str)
                .unwrap_or("request");
            return Err(Error::GitHub(format!(
                "gh api {} failed: {} {}",
                endpoint,
                stderr.trim(),
                stdout.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn api_json<T: DeserializeOwned>(&self, args: Vec<String>) -> Result<T> {
        let body = self.api(args).await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn api_paginated<T: DeserializeOwned>(&self, path: String) -> Result<Vec<T>> {
        let body = self.api(vec!["--paginate".to_string(), path]).await?;
        parse_paginated(&body)
    }

    async fn graphql<T: DeserializeOwned>(&self, query: &str, fields: Vec<String>) -> Result<T> {
        let mut args = vec![
            "graphql".to_string(),
            "-f".to_string(),
            format!("query={}\n{}", query, PULL_REQUEST_FIELDS),
        ];
        args.extend(fields);
        let response: GraphQlResponse<T> = self.api_json(args).await?;
        response.into_data()
    }
}

fn issue_path(pr: &PrRef) -> String {
    format!("repos/{}/{}/issues/{}", pr.org, pr.repo, pr.number)
}

fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Parses the output of `gh api --paginate`, which concatenates one JSON array per page.
pub(crate) fn parse_paginated<T: DeserializeOwned>(body: &str) -> Result<Vec<T>> {
    let mut items = Vec::new();
    for page in serde_json::Deserializer::from_str(body).into_iter::<Vec<T>>() {
        items.extend(page?);
    }
    Ok(items)
}

#[async_trait]
impl GitHubClient for GhCli {
    async fn search_page(
        &self,
        query: &str,
        cursor: Option<&str>,
        org: &str,
    ) -> Result<SearchPage> {
        tracing::debug!(org = %org, cursor = ?cursor, "requesting search page");

        let mut fields = vec!["-f".to_string(), format!("searchQuery={}", query)];
        if let Some(cursor) = cursor {
            fields.push("-f".to_string());
            fields.push(format!("searchCursor={}", cursor));
        }

        let data: WireSearchData = self.graphql(SEARCH_QUERY, fields).await?;
        Ok(data.into_page())
    }

    async fn get_pull_request(&self, pr: &PrRef) -> Result<PullRequestSummary> {
        let fields = vec![
            "-f".to_string(),
            format!("owner={}", pr.org),
            "-f".to_string(),
            format!("name={}", pr.repo),
            "-F".to_string(),
            format!("number={}", pr.number),
        ];

        let data: WireRepositoryData = self.graphql(PULL_REQUEST_QUERY, fields).await?;
        data.repository
            .and_then(|r| r.pull_request)
            .and_then(WirePullRequest::into_summary)
            .ok_or_else(|| Error::GitHub(format!("pull request {} not found", pr)))
    }

    async fn get_issue_labels(&self, pr: &PrRef) -> Result<Vec<String>> {
        let labels: Vec<WireName> = self
            .api_paginated(format!("{}/labels?per_page=100", issue_path(pr)))
            .await?;
        Ok(labels.into_iter().map(|l| l.name).collect())
    }

    async fn get_pull_request_changes(&self, pr: &PrRef) -> Result<Vec<ChangedFile>> {
        self.api_paginated(format!(
            "repos/{}/{}/pulls/{}/files?per_page=100",
            pr.org, pr.repo, pr.number
        ))
        .await
    }

    async fn get_file_contents(&self, pr: &PrRef, path: &str, git_ref: &str) -> Result<String> {
        self.api(vec![
            "-H".to_string(),
            "Accept: application/vnd.github.raw+json".to_string(),
            format!(
                "repos/{}/{}/contents/{}?ref={}",
                pr.org,
                pr.repo,
                encode_path(path),
                urlencoding::encode(git_ref)
            ),
        ])
        .await
    }

    async fn add_label(&self, pr: &PrRef, label: &str) -> Result<()> {
        self.api(vec![
            "-X".to_string(),
            "POST".to_string(),
            format!("{}/labels", issue_path(pr)),
            "-f".to_string(),
            format!("labels[]={}", label),
        ])
        .await?;
        Ok(())
    }

    async fn remove_label(&self, pr: &PrRef, label: &str) -> Result<()> {
        self.api(vec![
            "-X".to_string(),
            "DELETE".to_string(),
            format!("{}/labels/{}", issue_path(pr), urlencoding::encode(label)),
        ])
        .await?;
        Ok(())
    }

    async fn list_issue_comments(&self, pr: &PrRef) -> Result<Vec<IssueComment>> {
        let comments: Vec<WireComment> = self
            .api_paginated(format!("{}/comments?per_page=100", issue_path(pr)))
            .await?;
        Ok(comments.into_iter().map(IssueComment::from).collect())
    }

    async fn delete_comment(&self, pr: &PrRef, comment_id: u64) -> Result<()> {
        self.api(vec![
            "-X".to_string(),
            "DELETE".to_string(),
            format!("repos/{}/{}/issues/comments/{}", pr.org, pr.repo, comment_id),
        ])
        .await?;
        Ok(())
    }

    async fn create_comment(&self, pr: &PrRef, body: &str) -> Result<()> {
        self.api(vec![
            "-X".to_string(),
            "POST".to_string(),
            format!("{}/comments", issue_path(pr)),
            "-f".to_string(),
            format!("body={}", body),
        ])
        .await?;
        Ok(())
    }

    async fn bot_user(&self) -> Result<BotUser> {
        if let Some(login) = &self.bot_login {
            return Ok(BotUser::new(login.clone()));
        }
        let user: WireLogin = self.api_json(vec!["user".to_string()]).await?;
        Ok(BotUser::new(user.login))
    }

    async fn get_combined_status(&self, pr: &PrRef, sha: &str) -> Result<CombinedStatus> {
        self.api_json(vec![format!(
            "repos/{}/{}/commits/{}/status",
            pr.org, pr.repo, sha
        )])
        .await
    }

    async fn create_status(&self, pr: &PrRef, sha: &str, status: &NewStatus) -> Result<()> {
        self.api(vec![
            "-X".to_string(),
            "POST".to_string(),
            format!("repos/{}/{}/statuses/{}", pr.org, pr.repo, sha),
            "-f".to_string(),
            format!("state={}", status.state.as_str()),
            "-f".to_string(),
            format!("context={}", status.context),
            "-f".to_string(),
            format!("description={}", status.description),
        ])
        .await?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

impl<T> GraphQlResponse<T> {
    fn into_data(self) -> Result<T> {
        if !self.errors.is_empty() {
            let messages: Vec<_> = self.errors.into_iter().map(|e| e.message).collect();
            return Err(Error::GitHub(format!("graphql: {}", messages.join("; "))));
        }
        self.data
            .ok_or_else(|| Error::GitHub("graphql response has no data".to_string()))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireSearchData {
    #[serde(default)]
    rate_limit: Option<RateLimit>,
    search: WireSearch,
}

impl WireSearchData {
    fn into_page(self) -> SearchPage {
        SearchPage {
            rate_limit: self.rate_limit.unwrap_or_default(),
            has_next_page: self.search.page_info.has_next_page,
            end_cursor: self.search.page_info.end_cursor,
            nodes: self
                .search
                .nodes
                .into_iter()
                .filter_map(WirePullRequest::into_summary)
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireSearch {
    page_info: WirePageInfo,
    #[serde(default)]
    nodes: Vec<WirePullRequest>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePageInfo {
    has_next_page: bool,
    end_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireRepositoryData {
    repository: Option<WireRepositoryPr>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireRepositoryPr {
    pull_request: Option<WirePullRequest>,
}

#[derive(Debug, Deserialize)]
struct WireNodes<T> {
    #[serde(default = "Vec::new")]
    nodes: Vec<T>,
}

impl<T> Default for WireNodes<T> {
    fn default() -> Self {
        Self { nodes: Vec::new() }
    }
}

#[derive(Debug, Deserialize)]
struct WireLogin {
    login: String,
}

#[derive(Debug, Deserialize)]
struct WireName {
    name: String,
}

#[derive(Debug, Deserialize)]
struct WirePath {
    path: String,
}

#[derive(Debug, Deserialize)]
struct WireRepository {
    name: String,
    owner: WireLogin,
}

#[derive(Debug, Deserialize)]
struct WireCommitNode {
    commit: WireCommit,
}

#[derive(Debug, Deserialize)]
struct WireCommit {
    oid: String,
    #[serde(default)]
    status: Option<WireStatus>,
}

#[derive(Debug, Deserialize)]
struct WireStatus {
    #[serde(default)]
    contexts: Vec<StatusContext>,
}

/// A search node. Nodes that are not pull requests come back as `{}`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct WirePullRequest {
    number: Option<u64>,
    head_ref_oid: String,
    title: String,
    author: Option<WireLogin>,
    repository: Option<WireRepository>,
    labels: Option<WireNodes<WireName>>,
    files: Option<WireNodes<WirePath>>,
    commits: Option<WireNodes<WireCommitNode>>,
}

impl WirePullRequest {
    fn into_summary(self) -> Option<PullRequestSummary> {
        let number = self.number?;
        let repository = self.repository?;
        Some(PullRequestSummary {
            pr: PrRef::new(repository.owner.login, repository.name, number),
            head_sha: self.head_ref_oid,
            title: self.title,
            // Deleted accounts come back as a null author.
            author: self.author.map(|a| a.login).unwrap_or_default(),
            labels: self
                .labels
                .unwrap_or_default()
                .nodes
                .into_iter()
                .map(|l| l.name)
                .collect(),
            files: self
                .files
                .unwrap_or_default()
                .nodes
                .into_iter()
                .map(|f| f.path)
                .collect(),
            commits: self
                .commits
                .unwrap_or_default()
                .nodes
                .into_iter()
                .map(|n| CommitStatus {
                    oid: n.commit.oid,
                    contexts: n.commit.status.map(|s| s.contexts).unwrap_or_default(),
                })
                .collect(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct WireComment {
    id: u64,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    user: Option<WireLogin>,
}

impl From<WireComment> for IssueComment {
    fn from(c: WireComment) -> Self {
        IssueComment {
            id: c.id,
            body: c.body.unwrap_or_default(),
            author: c.user.map(|u| u.login).unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::github::StatusState;

    #[test]
    fn parses_concatenated_pages() {
        let body = r#"[{"name":"lgtm"},{"name":"release-v1.30"}][{"name":"evidence-missing"}]"#;
        let labels: Vec<WireName> = parse_paginated(body).unwrap();
        let names: Vec<_> = labels.into_iter().map(|l| l.name).collect();
        assert_eq!(names, vec!["lgtm", "release-v1.30", "evidence-missing"]);
    }

    #[test]
    fn parses_empty_pagination_output() {
        let labels: Vec<WireName> = parse_paginated("").unwrap();
        assert!(labels.is_empty());
    }

    #[test]
    fn converts_search_response_and_skips_non_pr_nodes() {
        let body = r#"{
          "data": {
            "rateLimit": {"cost": 1, "remaining": 4999},
            "search": {
              "pageInfo": {"hasNextPage": true, "endCursor": "Y3Vyc29yOjE="},
              "nodes": [
                {
                  "number": 3120,
                  "headRefOid": "abc123",
                  "title": "Conformance results for v1.31/Acme",
                  "author": {"login": "acme-dev"},
                  "repository": {"name": "k8s-conformance", "owner": {"login": "cncf"}},
                  "labels": {"nodes": [{"name": "release-v1.31"}]},
                  "files": {"nodes": [{"path": "v1.31/acme/PRODUCT.yaml"}]},
                  "commits": {"nodes": [
                    {"commit": {"oid": "abc123", "status": {"contexts": [
                      {"context": "verify-conformance", "state": "SUCCESS"}
                    ]}}},
                    {"commit": {"oid": "def456", "status": null}}
                  ]}
                },
                {}
              ]
            }
          }
        }"#;

        let response: GraphQlResponse<WireSearchData> = serde_json::from_str(body).unwrap();
        let page = response.into_data().unwrap().into_page();

        assert!(page.has_next_page);
        assert_eq!(page.end_cursor.as_deref(), Some("Y3Vyc29yOjE="));
        assert_eq!(page.rate_limit, RateLimit { cost: 1, remaining: 4999 });
        assert_eq!(page.nodes.len(), 1);

        let pr = &page.nodes[0];
        assert_eq!(pr.pr, PrRef::new("cncf", "k8s-conformance", 3120));
        assert_eq!(pr.labels, vec!["release-v1.31"]);
        assert_eq!(pr.files, vec!["v1.31/acme/PRODUCT.yaml"]);
        assert_eq!(pr.commits.len(), 2);
        assert!(pr.commits[1].contexts.is_empty());
        assert_eq!(pr.head_context_state("verify-conformance"), Some("SUCCESS"));
    }

    #[test]
    fn graphql_errors_become_github_errors() {
        let body = r#"{"data": null, "errors": [{"message": "rate limited"}]}"#;
        let response: GraphQlResponse<WireSearchData> = serde_json::from_str(body).unwrap();
        let err = response.into_data().unwrap_err();
        assert!(err.to_string().contains("rate limited"));
    }

    #[test]
    fn comment_with_null_user_and_body() {
        let body = r#"[{"id": 9, "body": null, "user": null}]"#;
        let comments: Vec<WireComment> = parse_paginated(body).unwrap();
        let comment = IssueComment::from(comments.into_iter().next().unwrap());
        assert_eq!(comment.id, 9);
        assert!(comment.body.is_empty());
        assert!(comment.author.is_empty());
    }

    #[test]
    fn combined_status_deserializes() {
        let status: CombinedStatus =
            serde_json::from_str(r#"{"sha": "abc", "state": "failure", "total_count": 2}"#)
                .unwrap();
        assert_eq!(status.state, StatusState::Failure);
    }

    #[test]
    fn encodes_each_path_segment() {
        assert_eq!(
            encode_path("v1.31/acme corp/PRODUCT.yaml"),
            "v1.31/acme%20corp/PRODUCT.yaml"
        );
    }

    #[test]
    fn gh_cli_with_custom_path() {
        let gh = GhCli::with_cli_path("/usr/local/bin/gh");
        assert_eq!(gh.cli_path, "/usr/local/bin/gh");
    }

    #[tokio::test]
    async fn bot_login_override_skips_api_call() {
        let gh = GhCli::with_cli_path("/nonexistent/gh").with_bot_login(Some("bot".into()));
        let bot = gh.bot_user().await.unwrap();
        assert!(bot.matches("bot[bot]"));
    }
}
