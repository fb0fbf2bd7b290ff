//! Error types for conformance PR verification.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifies a single pull request across the GitHub surface.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PrRef {
    /// Repository owner (user or organization).
    pub org: String,
    /// Repository name.
    pub repo: String,
    /// Pull request number.
    pub number: u64,
}

impl PrRef {
    /// Creates a new PR reference.
    pub fn new(org: impl Into<String>, repo: impl Into<String>, number: u64) -> Self {
        Self {
            org: org.into(),
            repo: repo.into(),
            number,
        }
    }

    /// Returns the `org/repo` slug.
    pub fn slug(&self) -> String {
        format!("{}/{}", self.org, self.repo)
    }
}

impl fmt::Display for PrRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}#{}", self.org, self.repo, self.number)
    }
}

/// Direction of a label mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelAction {
    Add,
    Remove,
}

impl fmt::Display for LabelAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LabelAction::Add => f.write_str("add"),
            LabelAction::Remove => f.write_str("remove"),
        }
    }
}

/// Top-level error type for verification passes.
#[derive(Error, Debug)]
pub enum Error {
    /// A call to the GitHub surface failed.
    #[error("GitHub operation failed: {0}")]
    GitHub(String),

    /// Adding or removing a label failed.
    #[error("failed to {action} label '{label}' on {pr}: {source}")]
    Label {
        action: LabelAction,
        label: String,
        pr: PrRef,
        #[source]
        source: Box<Error>,
    },

    /// Listing, pruning or posting comments failed.
    #[error("failed to {action} on {pr}: {source}")]
    Comment {
        action: &'static str,
        pr: PrRef,
        #[source]
        source: Box<Error>,
    },

    /// Reading or writing the commit status failed.
    #[error("failed to update status on {pr}: {source}")]
    Status {
        pr: PrRef,
        #[source]
        source: Box<Error>,
    },

    /// Fetching PR data needed to build a snapshot failed.
    #[error("error fetching {what} for {pr}: {source}")]
    Fetch {
        what: String,
        pr: PrRef,
        #[source]
        source: Box<Error>,
    },

    /// The search walk failed part way through.
    #[error("search for query \"{query}\" failed: {source}")]
    Search {
        query: String,
        #[source]
        source: Box<Error>,
    },

    /// The PR targets a release that cannot be verified.
    #[error("unable to process {pr}: {reason}")]
    UnsupportedRelease { pr: PrRef, reason: String },

    /// Reference metadata for the release is not available yet.
    #[error("unable to process {pr} as the metadata is missing for release {version}")]
    MetadataUnavailable { pr: PrRef, version: String },

    /// Reading release metadata failed for a reason other than absence.
    #[error("failed to read release metadata at {path}: {source}")]
    Metadata {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The rule suite could not produce a verdict.
    #[error("rule suite error: {0}")]
    Suite(String),

    /// An HTTP request outside the GitHub surface failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Returns true for gate escalations: the PR was handled but still needs attention.
    pub fn is_gate_escalation(&self) -> bool {
        matches!(
            self,
            Error::UnsupportedRelease { .. } | Error::MetadataUnavailable { .. }
        )
    }
}

/// Result type alias for verification operations.
pub type Result<T> = std::result::Result<T, Error>;
