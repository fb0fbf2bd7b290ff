//! Configuration loading and validation.
//!
//! Configuration is read from a TOML file. Every field has a default so an
//! empty file is accepted, apart from the release baseline, which must be
//! given either directly or through a `stable.txt` file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::gates::{ReleaseVersion, SupportedReleases};
use crate::search::{parse_repo, SearchScope};

/// Validation result containing all found issues.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    /// List of validation errors (fatal).
    pub errors: Vec<String>,
    /// List of validation warnings (non-fatal).
    pub warnings: Vec<String>,
}

impl ValidationResult {
    /// Returns true if validation passed (no errors).
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Adds an error to the result.
    pub fn add_error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    /// Adds a warning to the result.
    pub fn add_warning(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    /// Merges another validation result into this one.
    pub fn merge(&mut self, other: ValidationResult) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    /// Converts to a Result, failing if there are errors.
    pub fn into_result(self) -> Result<Vec<String>> {
        if self.is_valid() {
            Ok(self.warnings)
        } else {
            Err(Error::Config(self.errors.join("; ")))
        }
    }
}

/// Trait for validatable configuration types.
pub trait Validate {
    /// Validates the configuration and returns any issues found.
    fn validate(&self) -> ValidationResult;
}

/// GitHub access.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubConfig {
    /// Bot login; asked of GitHub when unset.
    #[serde(default)]
    pub bot_login: Option<String>,
    /// Path to the `gh` binary.
    #[serde(default = "default_gh_path")]
    pub gh_path: String,
}

fn default_gh_path() -> String {
    "gh".to_string()
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            bot_login: None,
            gh_path: default_gh_path(),
        }
    }
}

/// Orgs and repos scanned periodically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopeConfig {
    /// Orgs searched as a whole.
    #[serde(default)]
    pub orgs: Vec<String>,
    /// Repos in `org/repo` form.
    #[serde(default = "default_repos")]
    pub repos: Vec<String>,
}

fn default_repos() -> Vec<String> {
    vec!["cncf/k8s-conformance".to_string()]
}

impl Default for ScopeConfig {
    fn default() -> Self {
        Self {
            orgs: Vec::new(),
            repos: default_repos(),
        }
    }
}

impl ScopeConfig {
    /// Builds the search scope.
    pub fn search_scope(&self) -> SearchScope {
        SearchScope::new(&self.orgs, &self.repos)
    }
}

/// Release baseline and reference metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleasesConfig {
    /// Latest stable release, e.g. `v1.31`.
    #[serde(default)]
    pub latest: Option<String>,
    /// File with `stable.txt` contents; overrides `latest`.
    #[serde(default)]
    pub stable_txt: Option<PathBuf>,
    /// Number of minor releases supported, counting back from latest.
    #[serde(default = "default_supported")]
    pub supported: u32,
    /// Root of `<root>/<version>/conformance.yaml`.
    #[serde(default = "default_metadata_root")]
    pub metadata_root: PathBuf,
}

fn default_supported() -> u32 {
    3
}

fn default_metadata_root() -> PathBuf {
    PathBuf::from("conformance-testdata")
}

impl Default for ReleasesConfig {
    fn default() -> Self {
        Self {
            latest: None,
            stable_txt: None,
            supported: default_supported(),
            metadata_root: default_metadata_root(),
        }
    }
}

impl ReleasesConfig {
    /// Resolves the supported release window.
    pub fn supported_releases(&self) -> Result<SupportedReleases> {
        if let Some(path) = &self.stable_txt {
            let contents = std::fs::read_to_string(path).map_err(|e| {
                Error::Config(format!("failed to read {}: {}", path.display(), e))
            })?;
            return SupportedReleases::from_stable_txt(&contents, self.supported)
                .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)));
        }
        let latest = self
            .latest
            .as_deref()
            .ok_or_else(|| Error::Config("releases.latest or releases.stable_txt is required".into()))?;
        let latest: ReleaseVersion = latest
            .parse()
            .map_err(|e| Error::Config(format!("releases.latest: {}", e)))?;
        Ok(SupportedReleases::new(latest, self.supported))
    }
}

/// External rule suite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteConfig {
    /// Program to run.
    #[serde(default = "default_suite_command")]
    pub command: String,
    /// Arguments passed to the program.
    #[serde(default)]
    pub args: Vec<String>,
    /// Files every submission must contain.
    #[serde(default = "default_required_files")]
    pub required_files: Vec<String>,
    /// Seconds to wait for each PRODUCT.yaml URL lookup.
    #[serde(default = "default_url_timeout_secs")]
    pub url_timeout_secs: u64,
}

fn default_suite_command() -> String {
    "conformance-rules".to_string()
}

fn default_required_files() -> Vec<String> {
    ["README.md", "PRODUCT.yaml", "e2e.log", "junit_01.xml"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_url_timeout_secs() -> u64 {
    10
}

impl Default for SuiteConfig {
    fn default() -> Self {
        Self {
            command: default_suite_command(),
            args: Vec::new(),
            required_files: default_required_files(),
            url_timeout_secs: default_url_timeout_secs(),
        }
    }
}

impl SuiteConfig {
    /// Timeout for each PRODUCT.yaml URL lookup.
    pub fn url_timeout(&self) -> Duration {
        Duration::from_secs(self.url_timeout_secs)
    }
}

/// Periodic scans.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Seconds between scans in watch mode.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Phrase a conformance PR title contains, matched case-insensitively.
    #[serde(default = "default_title_marker")]
    pub title_marker: String,
}

fn default_interval_secs() -> u64 {
    3600
}

fn default_title_marker() -> String {
    "conformance results for".to_string()
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            title_marker: default_title_marker(),
        }
    }
}

impl ScanConfig {
    /// Interval between scans.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub github: GitHubConfig,
    #[serde(default)]
    pub scope: ScopeConfig,
    #[serde(default)]
    pub releases: ReleasesConfig,
    #[serde(default)]
    pub suite: SuiteConfig,
    #[serde(default)]
    pub scan: ScanConfig,
}

impl Config {
    /// Parses and validates configuration from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(contents).map_err(|e| Error::Config(format!("invalid TOML: {}", e)))?;
        for warning in config.validate().into_result()? {
            tracing::warn!(warning = %warning, "configuration warning");
        }
        Ok(config)
    }

    /// Reads, parses and validates the configuration file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {}", path.display(), e)))?;
        tracing::debug!(path = %path.display(), "loaded configuration");
        Self::from_toml_str(&contents)
    }
}

impl Validate for GitHubConfig {
    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        // CLI path must not be empty
        if self.gh_path.trim().is_empty() {
            result.add_error("github.gh_path cannot be empty");
        }

        // An explicit bot login must name someone
        if let Some(login) = &self.bot_login {
            if login.trim().is_empty() {
                result.add_error("github.bot_login cannot be empty when set");
            }
        }

        result
    }
}

impl Validate for ScopeConfig {
    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        // Malformed repos are skipped by the search, not fatal
        for repo in &self.repos {
            if parse_repo(repo).is_none() {
                result.add_warning(format!("repo '{}' is not of the form org/repo and is ignored", repo));
            }
        }

        // Empty scope
        if self.orgs.is_empty() && self.repos.is_empty() {
            result.add_warning("no orgs or repos in scope, scans will find nothing");
        }

        result
    }
}

impl Validate for ReleasesConfig {
    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        // Window must hold at least the latest release
        if self.supported == 0 {
            result.add_error("releases.supported must be at least 1");
        }

        // Baseline comes from latest or stable.txt
        match (&self.latest, &self.stable_txt) {
            (None, None) => result.add_error("releases.latest or releases.stable_txt is required"),
            (Some(latest), stable_txt) => {
                if let Err(e) = latest.parse::<ReleaseVersion>() {
                    result.add_error(format!("releases.latest: {}", e));
                }
                if stable_txt.is_some() {
                    result.add_warning("releases.stable_txt overrides releases.latest");
                }
            }
            (None, Some(_)) => {}
        }

        // Check metadata root exists
        if !self.metadata_root.exists() {
            result.add_warning(format!(
                "releases.metadata_root '{}' does not exist, every release will wait for metadata",
                self.metadata_root.display()
            ));
        }

        result
    }
}

impl Validate for SuiteConfig {
    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        // Command must not be empty
        if self.command.trim().is_empty() {
            result.add_error("suite.command cannot be empty");
        }

        if self.required_files.is_empty() {
            result.add_warning("suite.required_files is empty, no missing-file labels will be produced");
        }

        // URL lookups need a time limit
        if self.url_timeout_secs == 0 {
            result.add_error("suite.url_timeout_secs must be greater than zero");
        }

        result
    }
}

impl Validate for ScanConfig {
    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        // Title marker must not be empty
        if self.title_marker.trim().is_empty() {
            result.add_error("scan.title_marker cannot be empty");
        }

        // Validate interval
        if self.interval_secs == 0 {
            result.add_error("scan.interval_secs must be greater than zero");
        } else if self.interval_secs < 60 {
            result.add_warning("scan.interval_secs under a minute may exhaust the API rate limit");
        }

        result
    }
}

impl Validate for Config {
    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();
        result.merge(self.github.validate());
        result.merge(self.scope.validate());
        result.merge(self.releases.validate());
        result.merge(self.suite.validate());
        result.merge(self.scan.validate());
        result
    }
}
