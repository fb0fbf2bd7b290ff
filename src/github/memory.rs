//! In-memory GitHub for tests and embedding.
//!
//! Keeps labels, comments and statuses per PR, records every mutating call in
//! order, and can be told to fail specific operations.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::error::{Error, PrRef, Result};

use super::{
    BotUser, ChangedFile, CombinedStatus, CommitStatus, GitHubClient, IssueComment, NewStatus,
    PullRequestSummary, SearchPage, StatusContext, StatusState,
};

/// A mutating call, in the order it was made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    AddLabel { pr: PrRef, label: String },
    RemoveLabel { pr: PrRef, label: String },
    DeleteComment { pr: PrRef, id: u64 },
    CreateComment { pr: PrRef, body: String },
    CreateStatus { pr: PrRef, sha: String, status: NewStatus },
}

/// Operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    SearchPage,
    GetPullRequest,
    GetIssueLabels,
    GetChanges,
    GetFileContents,
    AddLabel,
    RemoveLabel,
    ListComments,
    DeleteComment,
    CreateComment,
    BotUser,
    GetCombinedStatus,
    CreateStatus,
}

#[derive(Debug)]
struct PrState {
    summary: PullRequestSummary,
    labels: Vec<String>,
    comments: Vec<IssueComment>,
    files: Vec<ChangedFile>,
    contents: HashMap<String, String>,
}

#[derive(Debug, Default)]
struct State {
    prs: HashMap<PrRef, PrState>,
    /// Statuses per SHA, oldest first.
    statuses: HashMap<String, Vec<NewStatus>>,
    search_pages: Vec<SearchPage>,
    search_queries: Vec<(String, String)>,
    mutations: Vec<Mutation>,
    /// Failure points, optionally restricted to one argument (label, path, `org/repo#n`).
    failures: Vec<(FailPoint, Option<String>)>,
    next_comment_id: u64,
}

impl State {
    fn check(&self, point: FailPoint, arg: Option<&str>) -> Result<()> {
        let hit = self.failures.iter().any(|(p, filter)| {
            *p == point
                && match filter {
                    Some(f) => arg == Some(f.as_str()),
                    None => true,
                }
        });
        if hit {
            return Err(Error::GitHub(format!("injected failure at {:?}", point)));
        }
        Ok(())
    }

    fn pr(&self, pr: &PrRef) -> Result<&PrState> {
        self.prs
            .get(pr)
            .ok_or_else(|| Error::GitHub(format!("pull request {} not found", pr)))
    }

    fn pr_mut(&mut self, pr: &PrRef) -> Result<&mut PrState> {
        self.prs
            .get_mut(pr)
            .ok_or_else(|| Error::GitHub(format!("pull request {} not found", pr)))
    }

    /// Latest status per context on `sha`.
    fn latest_statuses(&self, sha: &str) -> Vec<NewStatus> {
        let mut latest: Vec<NewStatus> = Vec::new();
        for status in self.statuses.get(sha).into_iter().flatten() {
            latest.retain(|s| s.context != status.context);
            latest.push(status.clone());
        }
        latest
    }

    fn current_summary(&self, pr: &PrState) -> PullRequestSummary {
        let mut summary = pr.summary.clone();
        summary.labels = pr.labels.clone();
        let head = summary.head_sha.clone();
        let contexts: Vec<StatusContext> = self
            .latest_statuses(&head)
            .into_iter()
            .map(|s| StatusContext {
                context: s.context,
                state: s.state.as_str().to_ascii_uppercase(),
            })
            .collect();
        if !contexts.is_empty() {
            summary.commits.retain(|c| c.oid != head);
            summary.commits.push(CommitStatus {
                oid: head,
                contexts,
            });
        }
        summary
    }
}

/// In-memory [`GitHubClient`].
#[derive(Debug)]
pub struct InMemoryGitHub {
    bot_login: String,
    state: Mutex<State>,
}

impl InMemoryGitHub {
    /// Creates an empty GitHub whose bot comments as `bot_login`.
    pub fn new(bot_login: impl Into<String>) -> Self {
        Self {
            bot_login: bot_login.into(),
            state: Mutex::new(State::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Registers a PR with the given files and their contents.
    ///
    /// The summary's labels become the PR's current labels.
    pub fn add_pull_request(&self, summary: PullRequestSummary, files: &[(&str, &str)]) {
        let changed = files
            .iter()
            .map(|(path, _)| ChangedFile {
                filename: path.to_string(),
                status: "added".to_string(),
                blob_url: format!(
                    "https://github.com/{}/blob/{}/{}",
                    summary.pr.slug(),
                    summary.head_sha,
                    path
                ),
            })
            .collect();
        let contents = files
            .iter()
            .map(|(path, body)| (path.to_string(), body.to_string()))
            .collect();
        let state = PrState {
            labels: summary.labels.clone(),
            summary,
            comments: Vec::new(),
            files: changed,
            contents,
        };
        let mut guard = self.state();
        guard.prs.insert(state.summary.pr.clone(), state);
    }

    /// Seeds an existing comment without recording a mutation.
    pub fn seed_comment(&self, pr: &PrRef, author: &str, body: &str) -> u64 {
        let mut state = self.state();
        state.next_comment_id += 1;
        let id = state.next_comment_id;
        if let Some(p) = state.prs.get_mut(pr) {
            p.comments.push(IssueComment {
                id,
                body: body.to_string(),
                author: author.to_string(),
            });
        }
        id
    }

    /// Seeds a status on a commit without recording a mutation.
    pub fn seed_status(&self, sha: &str, context: &str, state: StatusState) {
        self.state()
            .statuses
            .entry(sha.to_string())
            .or_default()
            .push(NewStatus {
                context: context.to_string(),
                state,
                description: String::new(),
            });
    }

    /// Sets the pages returned by search, in cursor order.
    pub fn set_search_pages(&self, pages: Vec<SearchPage>) {
        self.state().search_pages = pages;
    }

    /// Makes every call at `point` fail.
    pub fn fail_on(&self, point: FailPoint) {
        self.state().failures.push((point, None));
    }

    /// Makes calls at `point` fail when their label, path, cursor or PR argument equals `arg`.
    pub fn fail_on_arg(&self, point: FailPoint, arg: &str) {
        self.state().failures.push((point, Some(arg.to_string())));
    }

    /// Removes all injected failures.
    pub fn clear_failures(&self) {
        self.state().failures.clear();
    }

    /// Current labels on a PR.
    pub fn labels(&self, pr: &PrRef) -> Vec<String> {
        self.state()
            .prs
            .get(pr)
            .map(|p| p.labels.clone())
            .unwrap_or_default()
    }

    /// Current comments on a PR, oldest first.
    pub fn comments(&self, pr: &PrRef) -> Vec<IssueComment> {
        self.state()
            .prs
            .get(pr)
            .map(|p| p.comments.clone())
            .unwrap_or_default()
    }

    /// Latest status of `context` on `sha`.
    pub fn status(&self, sha: &str, context: &str) -> Option<NewStatus> {
        self.state()
            .latest_statuses(sha)
            .into_iter()
            .find(|s| s.context == context)
    }

    /// All mutating calls so far.
    pub fn mutations(&self) -> Vec<Mutation> {
        self.state().mutations.clone()
    }

    /// Forgets recorded mutations.
    pub fn clear_mutations(&self) {
        self.state().mutations.clear();
    }

    /// `(query, org)` pairs searched so far, one per page.
    pub fn search_queries(&self) -> Vec<(String, String)> {
        self.state().search_queries.clone()
    }
}

#[async_trait]
impl GitHubClient for InMemoryGitHub {
    async fn search_page(
        &self,
        query: &str,
        cursor: Option<&str>,
        org: &str,
    ) -> Result<SearchPage> {
        let mut state = self.state();
        state.check(FailPoint::SearchPage, cursor)?;
        state
            .search_queries
            .push((query.to_string(), org.to_string()));

        let index = match cursor {
            None => 0,
            Some(c) => {
                state
                    .search_pages
                    .iter()
                    .position(|p| p.end_cursor.as_deref() == Some(c))
                    .ok_or_else(|| Error::GitHub(format!("unknown search cursor '{}'", c)))?
                    + 1
            }
        };
        Ok(state.search_pages.get(index).cloned().unwrap_or_default())
    }

    async fn get_pull_request(&self, pr: &PrRef) -> Result<PullRequestSummary> {
        let state = self.state();
        state.check(FailPoint::GetPullRequest, Some(&pr.to_string()))?;
        let p = state.pr(pr)?;
        Ok(state.current_summary(p))
    }

    async fn get_issue_labels(&self, pr: &PrRef) -> Result<Vec<String>> {
        let state = self.state();
        state.check(FailPoint::GetIssueLabels, Some(&pr.to_string()))?;
        Ok(state.pr(pr)?.labels.clone())
    }

    async fn get_pull_request_changes(&self, pr: &PrRef) -> Result<Vec<ChangedFile>> {
        let state = self.state();
        state.check(FailPoint::GetChanges, Some(&pr.to_string()))?;
        Ok(state.pr(pr)?.files.clone())
    }

    async fn get_file_contents(&self, pr: &PrRef, path: &str, _git_ref: &str) -> Result<String> {
        let state = self.state();
        state.check(FailPoint::GetFileContents, Some(path))?;
        state
            .pr(pr)?
            .contents
            .get(path)
            .cloned()
            .ok_or_else(|| Error::GitHub(format!("{} not found in {}", path, pr)))
    }

    async fn add_label(&self, pr: &PrRef, label: &str) -> Result<()> {
        let mut state = self.state();
        state.check(FailPoint::AddLabel, Some(label))?;
        let p = state.pr_mut(pr)?;
        if !p.labels.iter().any(|l| l == label) {
            p.labels.push(label.to_string());
        }
        state.mutations.push(Mutation::AddLabel {
            pr: pr.clone(),
            label: label.to_string(),
        });
        Ok(())
    }

    async fn remove_label(&self, pr: &PrRef, label: &str) -> Result<()> {
        let mut state = self.state();
        state.check(FailPoint::RemoveLabel, Some(label))?;
        let p = state.pr_mut(pr)?;
        if !p.labels.iter().any(|l| l == label) {
            return Err(Error::GitHub(format!("Label does not exist: {}", label)));
        }
        p.labels.retain(|l| l != label);
        state.mutations.push(Mutation::RemoveLabel {
            pr: pr.clone(),
            label: label.to_string(),
        });
        Ok(())
    }

    async fn list_issue_comments(&self, pr: &PrRef) -> Result<Vec<IssueComment>> {
        let state = self.state();
        state.check(FailPoint::ListComments, None)?;
        Ok(state.pr(pr)?.comments.clone())
    }

    async fn delete_comment(&self, pr: &PrRef, comment_id: u64) -> Result<()> {
        let mut state = self.state();
        state.check(FailPoint::DeleteComment, None)?;
        let p = state.pr_mut(pr)?;
        let before = p.comments.len();
        p.comments.retain(|c| c.id != comment_id);
        if p.comments.len() == before {
            return Err(Error::GitHub(format!("comment {} not found", comment_id)));
        }
        state.mutations.push(Mutation::DeleteComment {
            pr: pr.clone(),
            id: comment_id,
        });
        Ok(())
    }

    async fn create_comment(&self, pr: &PrRef, body: &str) -> Result<()> {
        let mut state = self.state();
        state.check(FailPoint::CreateComment, None)?;
        state.next_comment_id += 1;
        let id = state.next_comment_id;
        let author = self.bot_login.clone();
        state.pr_mut(pr)?.comments.push(IssueComment {
            id,
            body: body.to_string(),
            author,
        });
        state.mutations.push(Mutation::CreateComment {
            pr: pr.clone(),
            body: body.to_string(),
        });
        Ok(())
    }

    async fn bot_user(&self) -> Result<BotUser> {
        self.state().check(FailPoint::BotUser, None)?;
        Ok(BotUser::new(self.bot_login.clone()))
    }

    async fn get_combined_status(&self, _pr: &PrRef, sha: &str) -> Result<CombinedStatus> {
        let state = self.state();
        state.check(FailPoint::GetCombinedStatus, None)?;
        let latest = state.latest_statuses(sha);
        let combined = if latest.is_empty() {
            StatusState::Pending
        } else if latest
            .iter()
            .any(|s| matches!(s.state, StatusState::Failure | StatusState::Error))
        {
            StatusState::Failure
        } else if latest.iter().any(|s| s.state == StatusState::Pending) {
            StatusState::Pending
        } else {
            StatusState::Success
        };
        Ok(CombinedStatus {
            sha: sha.to_string(),
            state: combined,
        })
    }

    async fn create_status(&self, pr: &PrRef, sha: &str, status: &NewStatus) -> Result<()> {
        let mut state = self.state();
        state.check(FailPoint::CreateStatus, None)?;
        state
            .statuses
            .entry(sha.to_string())
            .or_default()
            .push(status.clone());
        state.mutations.push(Mutation::CreateStatus {
            pr: pr.clone(),
            sha: sha.to_string(),
            status: status.clone(),
        });
        Ok(())
    }
}
