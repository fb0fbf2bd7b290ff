//! Commit status reconciliation.

use crate::error::{Error, Result};
use crate::github::{GitHubClient, NewStatus, PullRequestSummary, StatusState, STATUS_CONTEXT};

/// Description shown next to the status check for `state`.
pub fn status_description(state: StatusState) -> &'static str {
    match state {
        StatusState::Success => "All checks are passing",
        StatusState::Failure => "Please check failing requirements and update accordingly",
        _ => "Internal error",
    }
}

/// Sets the `verify-conformance` status on the head commit to `desired`.
///
/// Returns the state that was written, or `None` when no call was needed:
/// either the head commit is already verified (a later pass never regresses
/// it) or the combined status already equals `desired`.
pub async fn reconcile_status(
    github: &dyn GitHubClient,
    summary: &PullRequestSummary,
    desired: StatusState,
) -> Result<Option<StatusState>> {
    let pr = &summary.pr;

    let verified = summary
        .head_context_state(STATUS_CONTEXT)
        .and_then(StatusState::parse)
        == Some(StatusState::Success);
    if verified {
        tracing::info!(pr = %pr, "status already verified");
        return Ok(None);
    }

    let description = status_description(desired);
    if !matches!(desired, StatusState::Success | StatusState::Failure) {
        tracing::info!(pr = %pr, state = desired.as_str(), "status is not a final verdict");
    }

    let combined = github
        .get_combined_status(pr, &summary.head_sha)
        .await
        .map_err(|e| status_error(summary, e))?;
    if combined.sha == summary.head_sha && combined.state == desired {
        tracing::info!(pr = %pr, state = desired.as_str(), "status unchanged");
        return Ok(None);
    }

    tracing::info!(
        pr = %pr,
        state = desired.as_str(),
        description = %description,
        "setting status"
    );
    github
        .create_status(
            pr,
            &summary.head_sha,
            &NewStatus {
                context: STATUS_CONTEXT.to_string(),
                state: desired,
                description: description.to_string(),
            },
        )
        .await
        .map_err(|e| status_error(summary, e))?;

    Ok(Some(desired))
}

fn status_error(summary: &PullRequestSummary, source: Error) -> Error {
    Error::Status {
        pr: summary.pr.clone(),
        source: Box::new(source),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PrRef;
    use crate::github::memory::{FailPoint, InMemoryGitHub};
    use crate::github::{CommitStatus, StatusContext};

    fn summary(contexts: Vec<StatusContext>) -> PullRequestSummary {
        PullRequestSummary {
            pr: PrRef::new("cncf", "k8s-conformance", 21),
            head_sha: "head".to_string(),
            title: "Conformance results for v1.31/Acme".to_string(),
            author: "acme".to_string(),
            labels: vec![],
            files: vec![],
            commits: vec![CommitStatus {
                oid: "head".to_string(),
                contexts,
            }],
        }
    }

    fn verified() -> Vec<StatusContext> {
        vec![StatusContext {
            context: "verify-conformance".to_string(),
            state: "SUCCESS".to_string(),
        }]
    }

    #[test]
    fn descriptions_cover_every_state() {
        assert_eq!(
            status_description(StatusState::Success),
            "All checks are passing"
        );
        assert_eq!(
            status_description(StatusState::Failure),
            "Please check failing requirements and update accordingly"
        );
        assert_eq!(status_description(StatusState::Pending), "Internal error");
        assert_eq!(status_description(StatusState::Error), "Internal error");
    }

    #[tokio::test]
    async fn verified_head_is_never_regressed() {
        let gh = InMemoryGitHub::new("bot");
        let set = reconcile_status(&gh, &summary(verified()), StatusState::Failure)
            .await
            .unwrap();
        assert_eq!(set, None);
        assert!(gh.mutations().is_empty());
    }

    #[tokio::test]
    async fn matching_combined_state_is_left_alone() {
        let gh = InMemoryGitHub::new("bot");
        gh.seed_status("head", "other-ci", StatusState::Failure);

        let set = reconcile_status(&gh, &summary(vec![]), StatusState::Failure)
            .await
            .unwrap();
        assert_eq!(set, None);
        assert!(gh.mutations().is_empty());
    }

    #[tokio::test]
    async fn creates_status_with_description() {
        let gh = InMemoryGitHub::new("bot");
        let set = reconcile_status(&gh, &summary(vec![]), StatusState::Success)
            .await
            .unwrap();
        assert_eq!(set, Some(StatusState::Success));

        let status = gh.status("head", STATUS_CONTEXT).unwrap();
        assert_eq!(status.state, StatusState::Success);
        assert_eq!(status.description, "All checks are passing");
    }

    #[tokio::test]
    async fn pending_on_fresh_commit_needs_no_call() {
        // A commit with no statuses already reports a pending combined state.
        let gh = InMemoryGitHub::new("bot");
        let set = reconcile_status(&gh, &summary(vec![]), StatusState::Pending)
            .await
            .unwrap();
        assert_eq!(set, None);
    }

    #[tokio::test]
    async fn combined_status_failure_is_wrapped() {
        let gh = InMemoryGitHub::new("bot");
        gh.fail_on(FailPoint::GetCombinedStatus);
        let err = reconcile_status(&gh, &summary(vec![]), StatusState::Success)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Status { .. }));
        assert!(err.to_string().contains("cncf/k8s-conformance#21"));
    }
}
