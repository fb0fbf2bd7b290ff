//! Verify Conformance - reconciles Kubernetes conformance submission PRs
//!
//! This library runs conformance certification pull requests through a fixed
//! sequence of gates and a rule suite, then converges the PR's labels, status
//! comment and status check on the resulting verdict.

pub mod config;
pub mod error;
pub mod gates;
pub mod github;
pub mod handler;
pub mod labels;
pub mod product_urls;
pub mod reconcile;
pub mod search;
pub mod snapshot;
pub mod suite;

pub use config::{Config, Validate, ValidationResult};
pub use error::{Error, LabelAction, PrRef, Result};
pub use gates::{
    FsMetadataStore, MetadataStore, ReleaseError, ReleaseValidator, ReleaseVersion, Stage,
    SupportedReleases,
};
pub use github::{GhCli, GitHubClient, PullRequestSummary, StatusState};
pub use handler::{IssueCommentEvent, PassReport, Processor, PullRequestEvent, ScanReport};
pub use labels::{LabelClass, ManagedLabels};
pub use product_urls::{ContentTypeResolver, HttpContentTypes};
pub use reconcile::{ReconciliationDelta, Target};
pub use search::{SearchResults, SearchScope};
pub use snapshot::PrSnapshot;
pub use suite::{ExternalSuite, RuleSuite, Verdict};
