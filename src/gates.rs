//! Preconditions checked before the rule suite runs.
//!
//! The gates form an ordered list. The first one that halts decides the PR's
//! labels, comment and status for this pass; later gates and the rule suite
//! are skipped.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;

use crate::error::{Error, Result};
use crate::github::StatusState;
use crate::labels::{CONFORMANCE_SUBMISSION, NOT_CONFORMANCE_SUBMISSION, UNABLE_TO_PROCESS};
use crate::reconcile::Target;
use crate::snapshot::PrSnapshot;

/// Name of the per-release reference metadata file.
pub const CONFORMANCE_METADATA: &str = "conformance.yaml";

/// Why a release cannot be verified.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReleaseError {
    /// No version could be read from the submission.
    #[error("unable to determine the release version from the submission folder structure")]
    Missing,

    /// The version string is malformed.
    #[error("'{0}' is not a valid release version, expected a version such as v1.31")]
    Unparseable(String),

    /// The version is well formed but outside the supported window.
    #[error("the release version {version} is not a supported release; supported releases are {supported}")]
    Unsupported { version: String, supported: String },
}

/// A Kubernetes minor release, e.g. `v1.31`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReleaseVersion {
    pub major: u32,
    pub minor: u32,
}

impl FromStr for ReleaseVersion {
    type Err = ReleaseError;

    /// Parses `vMAJOR.MINOR`, ignoring any patch component (`v1.31.2`).
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let invalid = || ReleaseError::Unparseable(s.to_string());
        let rest = s.trim().strip_prefix('v').ok_or_else(invalid)?;
        let mut parts = rest.split('.');
        let major = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(invalid)?;
        let minor = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(invalid)?;
        if let Some(patch) = parts.next() {
            patch.parse::<u32>().map_err(|_| invalid())?;
        }
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(Self { major, minor })
    }
}

impl fmt::Display for ReleaseVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}.{}", self.major, self.minor)
    }
}

/// Decides whether a release version may be verified.
pub trait ReleaseValidator: Send + Sync {
    /// Returns `Ok` if submissions for `version` can be processed.
    fn validate(&self, version: &str) -> std::result::Result<(), ReleaseError>;

    /// The latest stable release, handed to the rule suite.
    fn latest(&self) -> String;
}

/// Accepts the latest release and the `supported - 1` minors before it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupportedReleases {
    latest: ReleaseVersion,
    supported: u32,
}

impl SupportedReleases {
    /// Creates a validator for `latest` with a window of `supported` minors.
    pub fn new(latest: ReleaseVersion, supported: u32) -> Self {
        Self {
            latest,
            supported: supported.max(1),
        }
    }

    /// Builds a validator from `stable.txt` contents such as `v1.31.2`.
    pub fn from_stable_txt(
        contents: &str,
        supported: u32,
    ) -> std::result::Result<Self, ReleaseError> {
        Ok(Self::new(contents.trim().parse()?, supported))
    }

    /// Supported releases, oldest first.
    pub fn releases(&self) -> Vec<ReleaseVersion> {
        let oldest = self.latest.minor.saturating_sub(self.supported - 1);
        (oldest..=self.latest.minor)
            .map(|minor| ReleaseVersion {
                major: self.latest.major,
                minor,
            })
            .collect()
    }
}

impl ReleaseValidator for SupportedReleases {
    fn validate(&self, version: &str) -> std::result::Result<(), ReleaseError> {
        if version.trim().is_empty() {
            return Err(ReleaseError::Missing);
        }
        let parsed: ReleaseVersion = version.parse()?;
        let releases = self.releases();
        if releases.contains(&parsed) {
            return Ok(());
        }
        Err(ReleaseError::Unsupported {
            version: version.to_string(),
            supported: releases
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", "),
        })
    }

    fn latest(&self) -> String {
        self.latest.to_string()
    }
}

/// Read access to per-release reference metadata.
pub trait MetadataStore: Send + Sync {
    /// Returns the metadata for `version`, or `None` if it does not exist yet.
    fn conformance_metadata(&self, version: &str) -> Result<Option<String>>;
}

/// Metadata laid out as `<root>/<version>/conformance.yaml`.
#[derive(Debug, Clone)]
pub struct FsMetadataStore {
    root: PathBuf,
}

impl FsMetadataStore {
    /// Creates a store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Path of the metadata file for `version`.
    pub fn path_for(&self, version: &str) -> PathBuf {
        self.root.join(version).join(CONFORMANCE_METADATA)
    }
}

impl MetadataStore for FsMetadataStore {
    fn conformance_metadata(&self, version: &str) -> Result<Option<String>> {
        let path = self.path_for(version);
        match std::fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(Error::Metadata { path, source }),
        }
    }
}

/// Where processing of a PR stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// The title does not mark a conformance submission.
    NotConformancePr,
    /// The targeted release cannot be verified.
    UnsupportedRelease,
    /// Reference metadata for the release is not available yet.
    ReleaseMetadataUnavailable,
    /// All gates passed and the rule suite produced the verdict.
    RuleSuiteEvaluated,
}

impl Stage {
    /// Returns the stage name as used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::NotConformancePr => "not_conformance_pr",
            Stage::UnsupportedRelease => "unsupported_release",
            Stage::ReleaseMetadataUnavailable => "release_metadata_unavailable",
            Stage::RuleSuiteEvaluated => "rule_suite_evaluated",
        }
    }
}

/// Terminal result of a gate that halted.
#[derive(Debug)]
pub struct Halt {
    /// Labels, comment and status to reconcile to.
    pub target: Target,
    /// Error reported upward once reconciliation is done.
    pub escalation: Option<Error>,
}

/// What the gates need besides the snapshot.
pub struct GateContext<'a> {
    /// Case-insensitive phrase a conformance PR title contains.
    pub title_marker: &'a str,
    pub releases: &'a dyn ReleaseValidator,
    pub metadata: &'a dyn MetadataStore,
}

/// A gate predicate: `Some` halts processing with that outcome.
pub type GatePredicate = fn(&GateContext<'_>, &PrSnapshot) -> Result<Option<Halt>>;

/// The gates, in the order they are checked.
pub const GATES: &[(Stage, GatePredicate)] = &[
    (Stage::NotConformancePr, conformance_title_gate),
    (Stage::UnsupportedRelease, supported_release_gate),
    (Stage::ReleaseMetadataUnavailable, release_metadata_gate),
];

/// Runs [`GATES`] in order and returns the first halt.
pub fn run_gates(ctx: &GateContext<'_>, snapshot: &PrSnapshot) -> Result<Option<(Stage, Halt)>> {
    for (stage, gate) in GATES {
        if let Some(halt) = gate(ctx, snapshot)? {
            tracing::info!(pr = %snapshot.pr(), stage = stage.as_str(), "gate halted processing");
            return Ok(Some((*stage, halt)));
        }
    }
    Ok(None)
}

/// Returns true if `title` marks a conformance submission.
pub fn is_conformance_title(title: &str, marker: &str) -> bool {
    title.to_lowercase().contains(&marker.to_lowercase())
}

/// Capitalizes the first letter and ends the text with a period.
pub fn sentence_case(message: &str) -> String {
    let message = message.trim();
    let mut chars = message.chars();
    let mut out = match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
        None => return String::new(),
    };
    if !out.ends_with(['.', '!', '?']) {
        out.push('.');
    }
    out
}

fn not_conformance_comment() -> String {
    [
        "This pull request appears to not be a conformance results submission; Checks will not run.",
        "",
        "If this change is intended to be verified as a conformance results submission see: \
         [_content of the PR_](https://github.com/cncf/k8s-conformance/blob/master/instructions.md#contents-of-the-pr), \
         and [_requirements_](https://github.com/cncf/k8s-conformance/blob/master/instructions.md#requirements)",
    ]
    .join("\n")
}

fn unable_to_process(first: &str, comment: String, escalation: Option<Error>) -> Halt {
    Halt {
        target: Target {
            labels: vec![first.to_string(), UNABLE_TO_PROCESS.to_string()],
            comment,
            state: StatusState::Pending,
        },
        escalation,
    }
}

fn conformance_title_gate(ctx: &GateContext<'_>, snapshot: &PrSnapshot) -> Result<Option<Halt>> {
    if is_conformance_title(&snapshot.summary.title, ctx.title_marker) {
        return Ok(None);
    }
    Ok(Some(unable_to_process(
        NOT_CONFORMANCE_SUBMISSION,
        not_conformance_comment(),
        None,
    )))
}

fn supported_release_gate(ctx: &GateContext<'_>, snapshot: &PrSnapshot) -> Result<Option<Halt>> {
    let Err(err) = ctx.releases.validate(&snapshot.release_version) else {
        return Ok(None);
    };
    let reason = err.to_string();
    Ok(Some(unable_to_process(
        CONFORMANCE_SUBMISSION,
        sentence_case(&reason),
        Some(Error::UnsupportedRelease {
            pr: snapshot.pr().clone(),
            reason,
        }),
    )))
}

fn release_metadata_gate(ctx: &GateContext<'_>, snapshot: &PrSnapshot) -> Result<Option<Halt>> {
    let version = &snapshot.release_version;
    if ctx.metadata.conformance_metadata(version)?.is_some() {
        return Ok(None);
    }
    let comment = format!(
        "The release version {} is unable to be processed at this time; \
         Please wait as this version may become available soon.",
        version
    );
    Ok(Some(unable_to_process(
        CONFORMANCE_SUBMISSION,
        comment,
        Some(Error::MetadataUnavailable {
            pr: snapshot.pr().clone(),
            version: version.clone(),
        }),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PrRef;
    use crate::github::PullRequestSummary;
    use tempfile::TempDir;

    fn releases() -> SupportedReleases {
        SupportedReleases::new(ReleaseVersion { major: 1, minor: 31 }, 3)
    }

    fn snapshot(title: &str, version: &str) -> PrSnapshot {
        let mut snapshot = PrSnapshot::from_parts(
            PullRequestSummary {
                pr: PrRef::new("cncf", "k8s-conformance", 4),
                head_sha: "abc".to_string(),
                title: title.to_string(),
                author: "acme".to_string(),
                labels: vec![],
                files: vec![],
                commits: vec![],
            },
            vec![],
            vec![],
            &[],
            "v1.31",
        );
        snapshot.release_version = version.to_string();
        snapshot
    }

    #[test]
    fn parses_release_versions() {
        assert_eq!(
            "v1.31.2".parse::<ReleaseVersion>().unwrap(),
            ReleaseVersion { major: 1, minor: 31 }
        );
        assert!("1.31".parse::<ReleaseVersion>().is_err());
        assert!("v1".parse::<ReleaseVersion>().is_err());
        assert!("v1.x".parse::<ReleaseVersion>().is_err());
        assert!("v1.2.3.4".parse::<ReleaseVersion>().is_err());
    }

    #[test]
    fn supported_window_counts_back_from_latest() {
        let releases = releases();
        assert!(releases.validate("v1.31").is_ok());
        assert!(releases.validate("v1.29").is_ok());
        assert!(matches!(
            releases.validate("v1.28"),
            Err(ReleaseError::Unsupported { .. })
        ));
        assert!(matches!(
            releases.validate("v1.99"),
            Err(ReleaseError::Unsupported { .. })
        ));
        assert_eq!(releases.validate(""), Err(ReleaseError::Missing));
        assert_eq!(releases.latest(), "v1.31");
    }

    #[test]
    fn unsupported_message_lists_window() {
        let err = releases().validate("v1.99").unwrap_err();
        assert_eq!(
            err.to_string(),
            "the release version v1.99 is not a supported release; supported releases are v1.29, v1.30, v1.31"
        );
    }

    #[test]
    fn from_stable_txt_drops_patch() {
        let releases = SupportedReleases::from_stable_txt("v1.30.4\n", 2).unwrap();
        assert_eq!(releases.latest(), "v1.30");
        assert_eq!(releases.releases().len(), 2);
    }

    #[test]
    fn sentence_case_capitalizes_and_terminates() {
        assert_eq!(sentence_case("the release is bad"), "The release is bad.");
        assert_eq!(sentence_case("Done."), "Done.");
        assert_eq!(sentence_case(""), "");
    }

    #[test]
    fn title_marker_is_case_insensitive() {
        assert!(is_conformance_title(
            "Conformance Results for v1.31/Acme",
            "conformance results for"
        ));
        assert!(!is_conformance_title("Update README", "conformance results for"));
    }

    #[test]
    fn fs_store_distinguishes_not_found() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("v1.31")).unwrap();
        std::fs::write(dir.path().join("v1.31").join(CONFORMANCE_METADATA), "tests: []\n")
            .unwrap();
        let store = FsMetadataStore::new(dir.path());

        assert_eq!(
            store.conformance_metadata("v1.31").unwrap().as_deref(),
            Some("tests: []\n")
        );
        assert_eq!(store.conformance_metadata("v1.30").unwrap(), None);
    }

    #[test]
    fn fs_store_reports_unreadable_metadata() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("v1.31").join(CONFORMANCE_METADATA)).unwrap();
        let store = FsMetadataStore::new(dir.path());

        match store.conformance_metadata("v1.31") {
            Err(Error::Metadata { path, .. }) => assert_eq!(path, store.path_for("v1.31")),
            other => panic!("expected a metadata error, got {:?}", other),
        }
    }

    #[test]
    fn gates_halt_in_order() {
        let dir = TempDir::new().unwrap();
        let store = FsMetadataStore::new(dir.path());
        let releases = releases();
        let ctx = GateContext {
            title_marker: "conformance results for",
            releases: &releases,
            metadata: &store,
        };

        // Bad title and bad version: the title gate wins.
        let (stage, halt) = run_gates(&ctx, &snapshot("Update README", "v1.99"))
            .unwrap()
            .unwrap();
        assert_eq!(stage, Stage::NotConformancePr);
        assert!(halt.escalation.is_none());
        assert_eq!(
            halt.target.labels,
            vec!["not-conformance-product-submission", "unable-to-process"]
        );

        let (stage, halt) = run_gates(
            &ctx,
            &snapshot("Conformance results for v1.99/Acme", "v1.99"),
        )
        .unwrap()
        .unwrap();
        assert_eq!(stage, Stage::UnsupportedRelease);
        assert!(halt.target.comment.starts_with("The release version v1.99"));
        assert!(halt.escalation.unwrap().is_gate_escalation());

        let (stage, halt) = run_gates(
            &ctx,
            &snapshot("Conformance results for v1.31/Acme", "v1.31"),
        )
        .unwrap()
        .unwrap();
        assert_eq!(stage, Stage::ReleaseMetadataUnavailable);
        assert_eq!(halt.target.state, StatusState::Pending);
        assert!(halt.target.comment.contains("v1.31 is unable to be processed"));
    }

    #[test]
    fn gates_pass_when_metadata_exists() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("v1.30")).unwrap();
        std::fs::write(dir.path().join("v1.30").join(CONFORMANCE_METADATA), "").unwrap();
        let store = FsMetadataStore::new(dir.path());
        let releases = releases();
        let ctx = GateContext {
            title_marker: "conformance results for",
            releases: &releases,
            metadata: &store,
        };

        let halted = run_gates(
            &ctx,
            &snapshot("Conformance results for v1.30/Acme", "v1.30"),
        )
        .unwrap();
        assert!(halted.is_none());
    }
}
