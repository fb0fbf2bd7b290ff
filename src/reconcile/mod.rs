//! Reconciliation of GitHub-visible PR state with a verdict.
//!
//! Labels, then the status comment, then the commit status. Each step only
//! calls GitHub when the observed state differs from the target, so running
//! the same reconciliation twice is a no-op the second time.

mod comments;
mod labels;
mod status;

pub use comments::{reconcile_comment, CommentChange};
pub use labels::{reconcile_labels, LabelChanges, LabelPlan};
pub use status::{reconcile_status, status_description};

use serde::Serialize;

use crate::error::Result;
use crate::github::{GitHubClient, StatusState};
use crate::labels::ManagedLabels;
use crate::snapshot::PrSnapshot;

/// Target GitHub-visible state for one PR.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Desired managed labels.
    pub labels: Vec<String>,
    /// Desired latest bot comment.
    pub comment: String,
    /// Desired status check state.
    pub state: StatusState,
}

/// What one reconciliation changed on GitHub.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconciliationDelta {
    /// Labels added this pass.
    pub labels_added: Vec<String>,
    /// Labels removed this pass.
    pub labels_removed: Vec<String>,
    /// Comment posted this pass, if any.
    pub comment_posted: Option<String>,
    /// IDs of stale bot comments deleted this pass.
    pub comments_pruned: Vec<u64>,
    /// Status written this pass, if any.
    pub status_set: Option<StatusState>,
}

impl ReconciliationDelta {
    /// Returns true if nothing was changed on GitHub.
    pub fn is_empty(&self) -> bool {
        self.labels_added.is_empty()
            && self.labels_removed.is_empty()
            && self.comment_posted.is_none()
            && self.comments_pruned.is_empty()
            && self.status_set.is_none()
    }
}

/// Applies `target` to the PR: labels, then comment, then status.
///
/// The first failure stops the remaining steps for this PR.
pub async fn apply(
    github: &dyn GitHubClient,
    managed: &ManagedLabels,
    snapshot: &mut PrSnapshot,
    target: &Target,
) -> Result<ReconciliationDelta> {
    let pr = snapshot.summary.pr.clone();
    let mut delta = ReconciliationDelta::default();

    let label_changes = reconcile_labels(
        github,
        &pr,
        &mut snapshot.labels,
        &target.labels,
        managed,
        &snapshot.release_version,
        &snapshot.missing_files,
    )
    .await?;
    delta.labels_added = label_changes.added;
    delta.labels_removed = label_changes.removed;

    if let CommentChange::Posted { pruned } =
        reconcile_comment(github, &pr, &target.comment).await?
    {
        delta.comment_posted = Some(target.comment.clone());
        delta.comments_pruned = pruned;
    }

    delta.status_set = reconcile_status(github, &snapshot.summary, target.state).await?;

    tracing::info!(
        pr = %pr,
        added = ?delta.labels_added,
        removed = ?delta.labels_removed,
        commented = delta.comment_posted.is_some(),
        status = ?delta.status_set,
        "reconciled"
    );
    Ok(delta)
}
