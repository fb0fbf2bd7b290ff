//! Processing entry points.
//!
//! Webhook events, single-PR requests and periodic scans all end up in
//! [`Processor::process`], which runs the gates, asks the rule suite for a
//! verdict and reconciles the PR to it.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::Instrument;
use uuid::Uuid;

use crate::config::Config;
use crate::error::{Error, PrRef, Result};
use crate::gates::{run_gates, FsMetadataStore, GateContext, MetadataStore, ReleaseValidator, Stage};
use crate::github::{GhCli, GitHubClient, PullRequestSummary};
use crate::labels::ManagedLabels;
use crate::product_urls::{ContentTypeResolver, HttpContentTypes};
use crate::reconcile::{self, ReconciliationDelta, Target};
use crate::search::{search, SearchScope};
use crate::snapshot::PrSnapshot;
use crate::suite::{ExternalSuite, RuleSuite};

/// Outcome of processing one PR.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PassReport {
    pub pr: PrRef,
    /// Where processing stopped.
    pub stage: Stage,
    /// What was changed on GitHub.
    pub delta: ReconciliationDelta,
}

/// Outcome of a full scan.
#[derive(Debug, Default)]
pub struct ScanReport {
    /// Identifier recorded on every log line of the scan.
    pub run_id: String,
    /// PRs processed without error.
    pub processed: Vec<PassReport>,
    /// PRs whose processing reported an error.
    pub failed: Vec<(PrRef, Error)>,
}

impl ScanReport {
    /// Returns true if no PR reported an error.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Repository named in a webhook payload.
#[derive(Debug, Clone, Deserialize)]
pub struct EventRepository {
    pub name: String,
    pub owner: EventAccount,
}

/// Account named in a webhook payload.
#[derive(Debug, Clone, Deserialize)]
pub struct EventAccount {
    pub login: String,
}

/// Pull request named in a `pull_request` payload.
#[derive(Debug, Clone, Deserialize)]
pub struct EventPullRequest {
    pub number: u64,
}

/// `pull_request` webhook payload.
#[derive(Debug, Clone, Deserialize)]
pub struct PullRequestEvent {
    pub action: String,
    pub pull_request: EventPullRequest,
    pub repository: EventRepository,
}

/// Issue named in an `issue_comment` payload.
#[derive(Debug, Clone, Deserialize)]
pub struct EventIssue {
    pub number: u64,
    /// Present only when the issue is a pull request.
    #[serde(default)]
    pub pull_request: Option<serde_json::Value>,
}

/// `issue_comment` webhook payload.
#[derive(Debug, Clone, Deserialize)]
pub struct IssueCommentEvent {
    pub action: String,
    pub issue: EventIssue,
    pub repository: EventRepository,
}

/// Runs the processing state machine for PRs.
pub struct Processor {
    github: Arc<dyn GitHubClient>,
    suite: Arc<dyn RuleSuite>,
    releases: Arc<dyn ReleaseValidator>,
    metadata: Arc<dyn MetadataStore>,
    managed: ManagedLabels,
    required_files: Vec<String>,
    title_marker: String,
    scope: SearchScope,
    content_types: Option<Arc<dyn ContentTypeResolver>>,
}

impl Processor {
    /// Creates a processor with default settings and an empty scan scope.
    ///
    /// PRODUCT.yaml URLs are not resolved until a resolver is set.
    pub fn new(
        github: Arc<dyn GitHubClient>,
        suite: Arc<dyn RuleSuite>,
        releases: Arc<dyn ReleaseValidator>,
        metadata: Arc<dyn MetadataStore>,
    ) -> Self {
        let defaults = Config::default();
        Self {
            github,
            suite,
            releases,
            metadata,
            managed: ManagedLabels::default(),
            required_files: defaults.suite.required_files,
            title_marker: defaults.scan.title_marker,
            scope: SearchScope::default(),
            content_types: None,
        }
    }

    /// Builds the production processor from configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        let github = GhCli::with_cli_path(config.github.gh_path.clone())
            .with_bot_login(config.github.bot_login.clone());
        let suite = ExternalSuite::new(config.suite.command.clone(), config.suite.args.clone());
        let releases = config.releases.supported_releases()?;
        let metadata = FsMetadataStore::new(config.releases.metadata_root.clone());
        let content_types = HttpContentTypes::new(config.suite.url_timeout())?;

        Ok(Self::new(
            Arc::new(github),
            Arc::new(suite),
            Arc::new(releases),
            Arc::new(metadata),
        )
        .with_required_files(config.suite.required_files.clone())
        .with_title_marker(config.scan.title_marker.clone())
        .with_scope(config.scope.search_scope())
        .with_content_types(Arc::new(content_types)))
    }

    /// Sets the files every submission must contain.
    pub fn with_required_files(mut self, files: Vec<String>) -> Self {
        self.required_files = files;
        self
    }

    /// Sets the phrase marking a conformance PR title.
    pub fn with_title_marker(mut self, marker: impl Into<String>) -> Self {
        self.title_marker = marker.into();
        self
    }

    /// Sets the scope searched by [`Processor::handle_all`].
    pub fn with_scope(mut self, scope: SearchScope) -> Self {
        self.scope = scope;
        self
    }

    /// Sets the resolver for PRODUCT.yaml URL content types.
    pub fn with_content_types(mut self, resolver: Arc<dyn ContentTypeResolver>) -> Self {
        self.content_types = Some(resolver);
        self
    }

    /// Processes one PR from its summary.
    ///
    /// A gate that halts still reconciles the PR. For an unsupported release
    /// or missing metadata the escalation error is returned afterwards.
    pub async fn process(&self, summary: PullRequestSummary) -> Result<PassReport> {
        let pr = summary.pr.clone();
        let latest = self.releases.latest();
        let mut snapshot =
            PrSnapshot::fetch(&*self.github, summary, &self.required_files, &latest).await?;

        let ctx = GateContext {
            title_marker: &self.title_marker,
            releases: &*self.releases,
            metadata: &*self.metadata,
        };
        if let Some((stage, halt)) = run_gates(&ctx, &snapshot)? {
            let delta =
                reconcile::apply(&*self.github, &self.managed, &mut snapshot, &halt.target).await?;
            if let Some(escalation) = halt.escalation {
                tracing::warn!(pr = %pr, stage = stage.as_str(), changed = !delta.is_empty(), "unable to process");
                return Err(escalation);
            }
            return Ok(PassReport { pr, stage, delta });
        }

        if let Some(resolver) = &self.content_types {
            snapshot.resolve_product_urls(&**resolver).await;
        }

        let stage = Stage::RuleSuiteEvaluated;
        let verdict = self.suite.evaluate(&snapshot).await?;
        if verdict.is_empty() {
            tracing::info!(pr = %pr, "nothing new to apply");
            return Ok(PassReport {
                pr,
                stage,
                delta: ReconciliationDelta::default(),
            });
        }

        let target = Target {
            labels: verdict.labels,
            comment: verdict.comment,
            state: verdict.state,
        };
        let delta = reconcile::apply(&*self.github, &self.managed, &mut snapshot, &target).await?;
        Ok(PassReport { pr, stage, delta })
    }

    /// Fetches `pr` and processes it.
    pub async fn process_pr(&self, pr: &PrRef) -> Result<PassReport> {
        let summary = self
            .github
            .get_pull_request(pr)
            .await
            .map_err(|e| Error::Fetch {
                what: "pull request".to_string(),
                pr: pr.clone(),
                source: Box::new(e),
            })?;
        self.process(summary).await
    }

    /// Handles a `pull_request` event. Only `opened` and `reopened` are processed.
    pub async fn handle_pull_request_event(
        &self,
        event: &PullRequestEvent,
    ) -> Result<Option<PassReport>> {
        if !matches!(event.action.as_str(), "opened" | "reopened") {
            tracing::debug!(action = %event.action, "ignoring pull request action");
            return Ok(None);
        }
        let pr = PrRef::new(
            event.repository.owner.login.clone(),
            event.repository.name.clone(),
            event.pull_request.number,
        );
        tracing::info!(pr = %pr, action = %event.action, "pull request event");
        self.process_pr(&pr).await.map(Some)
    }

    /// Handles an `issue_comment` event. Only new comments on PRs are processed.
    pub async fn handle_issue_comment_event(
        &self,
        event: &IssueCommentEvent,
    ) -> Result<Option<PassReport>> {
        if event.issue.pull_request.is_none() {
            tracing::debug!(issue = event.issue.number, "ignoring comment on an issue");
            return Ok(None);
        }
        if event.action != "created" {
            tracing::debug!(action = %event.action, "ignoring issue comment action");
            return Ok(None);
        }
        let pr = PrRef::new(
            event.repository.owner.login.clone(),
            event.repository.name.clone(),
            event.issue.number,
        );
        tracing::info!(pr = %pr, "issue comment event");
        self.process_pr(&pr).await.map(Some)
    }

    /// Searches the whole scope and processes every open PR found.
    ///
    /// A search failure aborts the scan. Errors for individual PRs are logged
    /// and collected; the scan moves on to the next PR.
    pub async fn handle_all(&self) -> Result<ScanReport> {
        let run_id = Uuid::new_v4().to_string();
        let span = tracing::info_span!("scan", run_id = %run_id);
        self.scan(run_id).instrument(span).await
    }

    async fn scan(&self, run_id: String) -> Result<ScanReport> {
        let mut report = ScanReport {
            run_id,
            ..ScanReport::default()
        };
        if self.scope.is_empty() {
            tracing::warn!("no orgs or repos in scope, nothing to scan");
            return Ok(report);
        }

        let mut summaries = Vec::new();
        let mut seen = HashSet::new();
        for (org, query) in self.scope.queries() {
            let results = search(&*self.github, &query, &org).await?;
            for summary in results.pull_requests {
                if seen.insert(summary.pr.clone()) {
                    summaries.push(summary);
                }
            }
        }
        tracing::info!(count = summaries.len(), "processing pull requests");

        for summary in summaries {
            let pr = summary.pr.clone();
            match self.process(summary).await {
                Ok(pass) => report.processed.push(pass),
                Err(e) => {
                    if e.is_gate_escalation() {
                        tracing::warn!(pr = %pr, error = %e, "pull request needs attention");
                    } else {
                        tracing::error!(pr = %pr, error = %e, "failed to process pull request");
                    }
                    report.failed.push((pr, e));
                }
            }
        }

        tracing::info!(
            processed = report.processed.len(),
            failed = report.failed.len(),
            "scan complete"
        );
        Ok(report)
    }
}
