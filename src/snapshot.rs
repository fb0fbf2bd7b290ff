//! Per-pass PR snapshot.
//!
//! Gathers everything the gates and the rule suite look at: current labels,
//! changed files with their contents, the release version the submission
//! targets, and which required files are missing.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::{Error, PrRef, Result};
use crate::github::{GitHubClient, PullRequestSummary};
use crate::product_urls::{self, ContentTypeResolver};

/// Name of the product metadata file in a submission.
pub const PRODUCT_YAML: &str = "PRODUCT.yaml";

/// A file supplied by the PR, with its contents at the head commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SupportingFile {
    /// Repository-relative path.
    pub name: String,
    /// Final path component.
    pub base_name: String,
    /// Blob URL on github.com.
    pub blob_url: String,
    /// File contents.
    pub contents: String,
}

/// Everything known about one PR for one processing pass.
///
/// `labels` is the in-memory label sequence; reconciliation appends confirmed
/// adds and filters out confirmed removes so later steps see the new state.
#[derive(Debug, Clone, Serialize)]
pub struct PrSnapshot {
    /// Summary as fetched by search or lookup.
    pub summary: PullRequestSummary,
    /// Current labels, in GitHub order.
    pub labels: Vec<String>,
    /// Files supplied by the PR.
    pub files: Vec<SupportingFile>,
    /// Release the submission targets, e.g. `v1.31`. Empty if unknown.
    pub release_version: String,
    /// Product folder name of the submission.
    pub product_name: String,
    /// Latest stable release known to the verifier.
    pub latest_release: String,
    /// Required files absent from the PR.
    pub missing_files: Vec<String>,
    /// Parsed `PRODUCT.yaml` fields, empty if absent or unparsable.
    pub product: BTreeMap<String, serde_yaml::Value>,
    /// `Content-Type` served at each PRODUCT.yaml URL field, empty when unresolved.
    pub product_url_types: BTreeMap<String, String>,
}

impl PrSnapshot {
    /// Builds a snapshot from already-fetched parts.
    pub fn from_parts(
        summary: PullRequestSummary,
        labels: Vec<String>,
        files: Vec<SupportingFile>,
        required_files: &[String],
        latest_release: &str,
    ) -> Self {
        let (release_version, product_name) =
            submission_folder(files.iter().map(|f| f.name.as_str())).unwrap_or_default();

        let missing_files = required_files
            .iter()
            .filter(|r| !files.iter().any(|f| &f.base_name == *r))
            .cloned()
            .collect();

        let product = files
            .iter()
            .find(|f| f.base_name == PRODUCT_YAML)
            .and_then(|f| parse_product_yaml(&summary.pr, &f.contents))
            .unwrap_or_default();

        Self {
            summary,
            labels,
            files,
            release_version,
            product_name,
            latest_release: latest_release.to_string(),
            missing_files,
            product,
            product_url_types: BTreeMap::new(),
        }
    }

    /// Fetches labels, changed files and file contents for `summary`.
    ///
    /// Any fetch failure aborts the snapshot; the PR is retried next pass.
    pub async fn fetch(
        github: &dyn GitHubClient,
        summary: PullRequestSummary,
        required_files: &[String],
        latest_release: &str,
    ) -> Result<Self> {
        let pr = summary.pr.clone();

        let labels = github
            .get_issue_labels(&pr)
            .await
            .map_err(|e| fetch_error("issue labels", &pr, e))?;

        let changes = github
            .get_pull_request_changes(&pr)
            .await
            .map_err(|e| fetch_error("changes", &pr, e))?;

        let mut files = Vec::with_capacity(changes.len());
        for change in changes.into_iter().filter(|c| !c.is_removed()) {
            let contents = github
                .get_file_contents(&pr, &change.filename, &summary.head_sha)
                .await
                .map_err(|e| fetch_error(&format!("content of '{}'", change.filename), &pr, e))?;
            files.push(SupportingFile {
                base_name: base_name(&change.filename).to_string(),
                name: change.filename,
                blob_url: change.blob_url,
                contents,
            });
        }

        if !files.iter().any(|f| f.base_name == PRODUCT_YAML) {
            tracing::info!(pr = %pr, "no PRODUCT.yaml in the PR's files");
        }

        Ok(Self::from_parts(
            summary,
            labels,
            files,
            required_files,
            latest_release,
        ))
    }

    /// Fills `product_url_types` from the parsed PRODUCT.yaml.
    pub async fn resolve_product_urls(&mut self, resolver: &dyn ContentTypeResolver) {
        self.product_url_types =
            product_urls::resolve_product_urls(&self.summary.pr, &self.product, resolver).await;
    }

    /// Identity of the PR.
    pub fn pr(&self) -> &PrRef {
        &self.summary.pr
    }
}

fn fetch_error(what: &str, pr: &PrRef, source: Error) -> Error {
    Error::Fetch {
        what: what.to_string(),
        pr: pr.clone(),
        source: Box::new(source),
    }
}

fn base_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Extracts `(version, product)` from the first `<version>/<product>/<file>` path.
pub fn submission_folder<'a>(
    paths: impl IntoIterator<Item = &'a str>,
) -> Option<(String, String)> {
    paths.into_iter().find_map(|path| {
        let mut parts = path.split('/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(version), Some(product), Some(_)) if !version.is_empty() => {
                Some((version.to_string(), product.to_string()))
            }
            _ => None,
        }
    })
}

fn parse_product_yaml(pr: &PrRef, contents: &str) -> Option<BTreeMap<String, serde_yaml::Value>> {
    match serde_yaml::from_str(contents) {
        Ok(fields) => Some(fields),
        Err(e) => {
            tracing::warn!(pr = %pr, error = %e, "failed to parse PRODUCT.yaml");
            None
        }
    }
}
