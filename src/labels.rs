//! Managed label classification.
//!
//! Decides whether a label belongs to one of the categories this bot owns.
//! Only managed labels are ever added or removed; everything else on a PR
//! is left alone.

use serde::{Deserialize, Serialize};

/// Placeholder substituted with the release version in version templates.
pub const VERSION_PLACEHOLDER: &str = "{version}";

/// Placeholder substituted with a file name in file templates.
pub const FILE_PLACEHOLDER: &str = "{file}";

/// Marks a PR recognised as a conformance submission.
pub const CONFORMANCE_SUBMISSION: &str = "conformance-product-submission";
/// Marks a PR whose title does not look like a conformance submission.
pub const NOT_CONFORMANCE_SUBMISSION: &str = "not-conformance-product-submission";
/// Marks a PR that could not be evaluated this pass.
pub const UNABLE_TO_PROCESS: &str = "unable-to-process";

/// Fixed sentinel label names.
pub const FIXED_LABELS: &[&str] = &[
    CONFORMANCE_SUBMISSION,
    NOT_CONFORMANCE_SUBMISSION,
    "not-verifiable",
    "release-documents-checked",
    "required-tests-missing",
    "evidence-missing",
    UNABLE_TO_PROCESS,
];

/// Label templates carrying a release version.
pub const VERSION_TEMPLATES: &[&str] = &[
    "release-{version}",
    "no-failed-tests-{version}",
    "tests-verified-{version}",
];

/// Label templates carrying a missing file name.
pub const FILE_TEMPLATES: &[&str] = &["missing-file-{file}"];

/// Category a label falls into.
///
/// Categories are checked in declaration order, so a label is placed in
/// exactly one of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LabelClass {
    /// Not owned by the bot. Never touched.
    Unmanaged,
    /// One of the fixed sentinel names.
    Fixed,
    /// Rendered from a version template, for any version.
    Version,
    /// Rendered from a file template.
    File,
}

impl LabelClass {
    /// Returns true if reconciliation may add or remove labels of this class.
    pub fn is_managed(&self) -> bool {
        !matches!(self, LabelClass::Unmanaged)
    }
}

/// The set of label names and templates the bot manages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedLabels {
    /// Exact label names.
    pub fixed: Vec<String>,
    /// Templates containing [`VERSION_PLACEHOLDER`].
    pub version_templates: Vec<String>,
    /// Templates containing [`FILE_PLACEHOLDER`].
    pub file_templates: Vec<String>,
}

impl Default for ManagedLabels {
    fn default() -> Self {
        Self {
            fixed: FIXED_LABELS.iter().map(|s| s.to_string()).collect(),
            version_templates: VERSION_TEMPLATES.iter().map(|s| s.to_string()).collect(),
            file_templates: FILE_TEMPLATES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl ManagedLabels {
    /// Classifies `label` against the managed categories.
    ///
    /// Template matching strips the placeholder and looks for the remaining
    /// literal inside the label, so `release-v1.28` is still recognised
    /// while the current version is `v1.29`.
    pub fn classify(&self, label: &str, version: &str, missing_files: &[String]) -> LabelClass {
        if self.fixed.iter().any(|f| f == label) {
            return LabelClass::Fixed;
        }

        let version_match = self.version_templates.iter().any(|t| {
            template_family_matches(t, VERSION_PLACEHOLDER, label)
                || (!version.is_empty() && Self::version_label(t, version) == label)
        });
        if version_match {
            return LabelClass::Version;
        }

        let file_match = self.file_templates.iter().any(|t| {
            template_family_matches(t, FILE_PLACEHOLDER, label)
                || missing_files
                    .iter()
                    .any(|f| Self::file_label(t, f) == label)
        });
        if file_match {
            return LabelClass::File;
        }

        LabelClass::Unmanaged
    }

    /// Shorthand for `classify(..).is_managed()`.
    pub fn is_managed(&self, label: &str, version: &str, missing_files: &[String]) -> bool {
        self.classify(label, version, missing_files).is_managed()
    }

    /// Renders a version template for `version`.
    pub fn version_label(template: &str, version: &str) -> String {
        template.replace(VERSION_PLACEHOLDER, version)
    }

    /// Renders a file template for `file`.
    pub fn file_label(template: &str, file: &str) -> String {
        template.replace(FILE_PLACEHOLDER, file)
    }
}

fn template_family_matches(template: &str, placeholder: &str, label: &str) -> bool {
    let literal = template.replace(placeholder, "");
    !literal.is_empty() && label.contains(literal.as_str())
}
