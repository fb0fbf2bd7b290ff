//! Search cursor walker.
//!
//! Pages through a PR search until the server reports no further page and
//! returns the whole result set at once.

use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::github::{GitHubClient, PullRequestSummary};

/// Qualifiers every scan query starts with.
pub const BASE_QUERY: &str = "archived:false is:pr is:open";

/// Everything a search walk returned.
#[derive(Debug, Clone, Default)]
pub struct SearchResults {
    /// Pull requests across all pages, in page order.
    pub pull_requests: Vec<PullRequestSummary>,
    /// Sum of the rate-limit cost of every page.
    pub total_cost: u32,
    /// Rate-limit points remaining after the last page.
    pub remaining: u32,
    /// Number of pages fetched.
    pub pages: usize,
}

/// Walks every page of `query` within `org`.
///
/// The first failing page aborts the walk; nothing gathered so far is returned.
pub async fn search(github: &dyn GitHubClient, query: &str, org: &str) -> Result<SearchResults> {
    let mut results = SearchResults::default();
    let mut cursor: Option<String> = None;

    loop {
        let page = github
            .search_page(query, cursor.as_deref(), org)
            .await
            .map_err(|e| Error::Search {
                query: query.to_string(),
                source: Box::new(e),
            })?;

        results.pages += 1;
        results.total_cost += page.rate_limit.cost;
        results.remaining = page.rate_limit.remaining;
        results.pull_requests.extend(page.nodes);

        if !page.has_next_page {
            break;
        }
        match page.end_cursor {
            Some(next) => cursor = Some(next),
            None => {
                tracing::warn!(query = %query, "search reported another page without a cursor");
                break;
            }
        }
    }

    tracing::info!(
        org = %org,
        query = %query,
        pages = results.pages,
        count = results.pull_requests.len(),
        cost = results.total_cost,
        remaining = results.remaining,
        "search complete"
    );
    Ok(results)
}

/// Orgs and repos a scan covers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchScope {
    /// Orgs searched as a whole.
    pub orgs: Vec<String>,
    /// Individual repos as `(org, repo)`.
    pub repos: Vec<(String, String)>,
}

impl SearchScope {
    /// Builds a scope from org names and `org/repo` strings.
    ///
    /// Repo entries that are not of the form `org/repo` are skipped.
    pub fn new(orgs: &[String], repos: &[String]) -> Self {
        let repos = repos
            .iter()
            .filter_map(|entry| match parse_repo(entry) {
                Some(pair) => Some(pair),
                None => {
                    tracing::warn!(repo = %entry, "ignoring malformed repo, expected org/repo");
                    None
                }
            })
            .collect();
        Self {
            orgs: orgs.to_vec(),
            repos,
        }
    }

    /// Returns one `(org, query)` pair per distinct org in scope.
    ///
    /// An org listed as a whole is searched with an `org:` qualifier and its
    /// individual repo entries are redundant. Otherwise the org's repos are
    /// listed with `repo:` qualifiers.
    pub fn queries(&self) -> Vec<(String, String)> {
        let mut by_org: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for org in &self.orgs {
            by_org.entry(org.as_str()).or_default();
        }
        for (org, repo) in &self.repos {
            if self.orgs.contains(org) {
                continue;
            }
            let repos = by_org.entry(org.as_str()).or_default();
            if !repos.contains(&repo.as_str()) {
                repos.push(repo);
            }
        }

        by_org
            .into_iter()
            .map(|(org, repos)| {
                let mut query = BASE_QUERY.to_string();
                if repos.is_empty() {
                    query.push_str(&format!(" org:\"{}\"", org));
                } else {
                    for repo in repos {
                        query.push_str(&format!(" repo:\"{}/{}\"", org, repo));
                    }
                }
                (org.to_string(), query)
            })
            .collect()
    }

    /// Returns true if nothing is in scope.
    pub fn is_empty(&self) -> bool {
        self.orgs.is_empty() && self.repos.is_empty()
    }
}

/// Splits `org/repo`.
pub fn parse_repo(entry: &str) -> Option<(String, String)> {
    let (org, repo) = entry.trim().split_once('/')?;
    if org.is_empty() || repo.is_empty() || repo.contains('/') {
        return None;
    }
    Some((org.to_string(), repo.to_string()))
}
