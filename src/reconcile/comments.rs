//! Status comment reconciliation.

use serde::Serialize;

use crate::error::{Error, PrRef, Result};
use crate::github::{GitHubClient, IssueComment};

/// What happened to the bot's comment thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum CommentChange {
    /// The latest bot comment already says this.
    Unchanged,
    /// A new comment was posted after pruning older bot comments.
    Posted { pruned: Vec<u64> },
}

/// Makes `body` the latest bot comment on the PR.
///
/// Only non-empty bot comments are considered. If the newest one already
/// equals `body` nothing happens. Otherwise every bot comment except the
/// newest is deleted and `body` is posted, so at most one old and one new
/// bot comment remain.
pub async fn reconcile_comment(
    github: &dyn GitHubClient,
    pr: &PrRef,
    body: &str,
) -> Result<CommentChange> {
    let comments = github
        .list_issue_comments(pr)
        .await
        .map_err(|e| comment_error("list comments", pr, e))?;
    let bot = github
        .bot_user()
        .await
        .map_err(|e| comment_error("resolve bot identity", pr, e))?;

    let bot_comments: Vec<&IssueComment> = comments
        .iter()
        .filter(|c| bot.matches(&c.author) && !c.body.is_empty())
        .collect();

    let Some((latest, stale)) = bot_comments.split_last() else {
        return post(github, pr, body, Vec::new()).await;
    };

    if latest.body == body {
        tracing::info!(pr = %pr, "nothing new to comment");
        return Ok(CommentChange::Unchanged);
    }

    let mut pruned = Vec::with_capacity(stale.len());
    for comment in stale {
        github
            .delete_comment(pr, comment.id)
            .await
            .map_err(|e| comment_error("prune stale comments", pr, e))?;
        pruned.push(comment.id);
    }
    if !pruned.is_empty() {
        tracing::info!(pr = %pr, count = pruned.len(), "pruned stale bot comments");
    }

    post(github, pr, body, pruned).await
}

async fn post(
    github: &dyn GitHubClient,
    pr: &PrRef,
    body: &str,
    pruned: Vec<u64>,
) -> Result<CommentChange> {
    github
        .create_comment(pr, body)
        .await
        .map_err(|e| comment_error("create comment", pr, e))?;
    tracing::info!(pr = %pr, "posted status comment");
    Ok(CommentChange::Posted { pruned })
}

fn comment_error(action: &'static str, pr: &PrRef, source: Error) -> Error {
    Error::Comment {
        action,
        pr: pr.clone(),
        source: Box::new(source),
    }
}
