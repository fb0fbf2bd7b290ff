//! Content types of the URLs a submission's PRODUCT.yaml points at.
//!
//! Each URL field is resolved with a `HEAD` request and the reported
//! `Content-Type` is recorded for the rule suite. Resolution never fails a
//! pass: bad or unreachable URLs are logged and recorded as empty.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Url;

use crate::error::{PrRef, Result};

/// PRODUCT.yaml fields holding URLs.
pub const PRODUCT_URL_FIELDS: &[&str] = &["website_url", "repo_url", "documentation_url"];

/// Looks up the content type served at a URL.
#[async_trait]
pub trait ContentTypeResolver: Send + Sync {
    /// Returns the `Content-Type` header, or `None` if the response has none.
    async fn content_type(&self, url: &Url) -> Result<Option<String>>;
}

/// Resolves content types with `HEAD` requests.
pub struct HttpContentTypes {
    client: reqwest::Client,
}

impl HttpContentTypes {
    /// Creates a resolver whose requests give up after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("verify-conformance/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ContentTypeResolver for HttpContentTypes {
    async fn content_type(&self, url: &Url) -> Result<Option<String>> {
        let response = self.client.head(url.clone()).send().await?;
        Ok(response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string))
    }
}

/// Parses a PRODUCT.yaml URL value, assuming `https` when no scheme is given.
pub fn normalize_url(raw: &str) -> Option<Url> {
    let raw = raw.trim();
    if raw.is_empty() || raw.contains(char::is_whitespace) {
        return None;
    }
    let url = if raw.contains("://") {
        Url::parse(raw).ok()?
    } else {
        Url::parse(&format!("https://{}", raw)).ok()?
    };
    match url.scheme() {
        "http" | "https" if url.host_str().is_some() => Some(url),
        _ => None,
    }
}

/// Resolves every URL field present in `product`.
///
/// A field with a non-empty value always gets an entry; it stays empty when
/// the URL is invalid or the request fails.
pub async fn resolve_product_urls(
    pr: &PrRef,
    product: &BTreeMap<String, serde_yaml::Value>,
    resolver: &dyn ContentTypeResolver,
) -> BTreeMap<String, String> {
    let mut types = BTreeMap::new();

    for &field in PRODUCT_URL_FIELDS {
        let raw = product.get(field).and_then(|v| v.as_str()).unwrap_or("");
        if raw.trim().is_empty() {
            tracing::debug!(pr = %pr, field = field, "PRODUCT.yaml URL field is empty");
            continue;
        }
        types.insert(field.to_string(), String::new());

        let Some(url) = normalize_url(raw) else {
            tracing::warn!(pr = %pr, field = field, value = raw, "invalid URL in PRODUCT.yaml");
            continue;
        };

        match resolver.content_type(&url).await {
            Ok(Some(content_type)) => {
                tracing::debug!(pr = %pr, field = field, url = %url, content_type = %content_type, "resolved URL");
                types.insert(field.to_string(), content_type);
            }
            Ok(None) => {
                tracing::debug!(pr = %pr, field = field, url = %url, "no content type reported");
            }
            Err(e) => {
                tracing::warn!(pr = %pr, field = field, url = %url, error = %e, "failed to resolve URL");
            }
        }
    }

    types
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::Mutex;

    struct FakeResolver {
        types: BTreeMap<String, String>,
        requested: Mutex<Vec<String>>,
    }

    impl FakeResolver {
        fn new(types: &[(&str, &str)]) -> Self {
            Self {
                types: types
                    .iter()
                    .map(|(u, t)| (u.to_string(), t.to_string()))
                    .collect(),
                requested: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ContentTypeResolver for FakeResolver {
        async fn content_type(&self, url: &Url) -> Result<Option<String>> {
            self.requested.lock().unwrap().push(url.to_string());
            match self.types.get(url.as_str()) {
                Some(t) if t.is_empty() => Ok(None),
                Some(t) => Ok(Some(t.clone())),
                None => Err(Error::GitHub(format!("unreachable: {}", url))),
            }
        }
    }

    fn product(yaml: &str) -> BTreeMap<String, serde_yaml::Value> {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn pr() -> PrRef {
        PrRef::new("cncf", "k8s-conformance", 3)
    }

    #[test]
    fn defaults_scheme_to_https() {
        assert_eq!(
            normalize_url("acme.example/docs").map(|u| u.to_string()),
            Some("https://acme.example/docs".to_string())
        );
        assert_eq!(
            normalize_url("http://acme.example").map(|u| u.to_string()),
            Some("http://acme.example/".to_string())
        );
        assert!(normalize_url("").is_none());
        assert!(normalize_url("not a url").is_none());
        assert!(normalize_url("ftp://acme.example").is_none());
    }

    #[tokio::test]
    async fn records_content_type_per_field() {
        let resolver = FakeResolver::new(&[
            ("https://acme.example/", "text/html; charset=utf-8"),
            ("https://github.com/acme/k8s", "text/html"),
        ]);
        let product = product(
            "vendor: Acme\nwebsite_url: acme.example\nrepo_url: https://github.com/acme/k8s\n",
        );

        let types = resolve_product_urls(&pr(), &product, &resolver).await;

        assert_eq!(types.len(), 2);
        assert_eq!(types["website_url"], "text/html; charset=utf-8");
        assert_eq!(types["repo_url"], "text/html");
        assert!(!types.contains_key("documentation_url"));
    }

    #[tokio::test]
    async fn failures_leave_empty_entries() {
        let resolver = FakeResolver::new(&[("https://acme.example/", "")]);
        let product = product(
            "website_url: acme.example\nrepo_url: \"has spaces in it\"\ndocumentation_url: https://down.example\n",
        );

        let types = resolve_product_urls(&pr(), &product, &resolver).await;

        assert_eq!(types["website_url"], "");
        assert_eq!(types["repo_url"], "");
        assert_eq!(types["documentation_url"], "");
        // The invalid URL is never requested.
        assert_eq!(
            *resolver.requested.lock().unwrap(),
            vec!["https://acme.example/", "https://down.example/"]
        );
    }

    #[tokio::test]
    async fn empty_fields_are_skipped() {
        let resolver = FakeResolver::new(&[]);
        let product = product("website_url: \"\"\nrepo_url: \"  \"\n");

        let types = resolve_product_urls(&pr(), &product, &resolver).await;

        assert!(types.is_empty());
        assert!(resolver.requested.lock().unwrap().is_empty());
    }
}
