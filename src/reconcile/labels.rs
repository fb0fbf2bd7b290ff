//! Label reconciliation.

use serde::Serialize;

use crate::error::{Error, LabelAction, PrRef, Result};
use crate::github::GitHubClient;
use crate::labels::ManagedLabels;

/// Labels to add and remove to converge on a desired set.
///
/// `add` and `remove` are disjoint: an added label is desired and a removed
/// one is not.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LabelPlan {
    /// Desired managed labels not yet present.
    pub add: Vec<String>,
    /// Present managed labels that are not desired.
    pub remove: Vec<String>,
}

impl LabelPlan {
    /// Computes the plan. Unmanaged labels never appear in either list.
    pub fn compute(
        current: &[String],
        desired: &[String],
        managed: &ManagedLabels,
        version: &str,
        missing_files: &[String],
    ) -> Self {
        let mut plan = LabelPlan::default();

        for label in desired {
            let class = managed.classify(label, version, missing_files);
            tracing::debug!(label = %label, class = ?class, "classified desired label");
            if !class.is_managed() {
                tracing::warn!(label = %label, "ignoring desired label that is not managed");
                continue;
            }
            if current.contains(label) || plan.add.contains(label) {
                continue;
            }
            plan.add.push(label.clone());
        }

        for label in current {
            let class = managed.classify(label, version, missing_files);
            tracing::debug!(label = %label, class = ?class, "classified current label");
            if !class.is_managed() || desired.contains(label) || plan.remove.contains(label) {
                continue;
            }
            plan.remove.push(label.clone());
        }

        plan
    }

    /// Returns true if nothing needs to change.
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }
}

/// Labels actually changed on GitHub during one reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LabelChanges {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

/// Converges the PR's labels on `desired`.
///
/// Adds go first, then removes. `labels` is updated after every confirmed
/// mutation, so it matches GitHub even when a later call fails. A failure
/// returns immediately; mutations already made are kept and the next pass
/// picks up from there.
pub async fn reconcile_labels(
    github: &dyn GitHubClient,
    pr: &PrRef,
    labels: &mut Vec<String>,
    desired: &[String],
    managed: &ManagedLabels,
    version: &str,
    missing_files: &[String],
) -> Result<LabelChanges> {
    let plan = LabelPlan::compute(labels, desired, managed, version, missing_files);
    let mut changes = LabelChanges::default();
    if plan.is_empty() {
        tracing::debug!(pr = %pr, "labels already converged");
        return Ok(changes);
    }

    for label in plan.add {
        github
            .add_label(pr, &label)
            .await
            .map_err(|e| label_error(LabelAction::Add, &label, pr, e))?;
        tracing::info!(pr = %pr, label = %label, "added label");
        labels.push(label.clone());
        changes.added.push(label);
    }

    for label in plan.remove {
        github
            .remove_label(pr, &label)
            .await
            .map_err(|e| label_error(LabelAction::Remove, &label, pr, e))?;
        tracing::info!(pr = %pr, label = %label, "removed label");
        labels.retain(|l| l != &label);
        changes.removed.push(label);
    }

    Ok(changes)
}

fn label_error(action: LabelAction, label: &str, pr: &PrRef, source: Error) -> Error {
    Error::Label {
        action,
        label: label.to_string(),
        pr: pr.clone(),
        source: Box::new(source),
    }
}
