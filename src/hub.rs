//! Docker Hub search and tags passthrough
//!
//! A buffered JSON pass-through to hub.docker.com with a bounded TTL cache
//! in front, so repeated searches do not hammer the Hub API.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use reqwest::{Client, Url};
use tracing::debug;

use crate::cache::TtlCache;
use crate::config::Config;
use crate::error::ProxyError;

const SEARCH_CACHE_CAPACITY: usize = 1000;
const SEARCH_CACHE_TTL: Duration = Duration::from_secs(30 * 60);

const HUB_SEARCH_URL: &str = "https://hub.docker.com/api/content/v1/products/search";
const HUB_TAGS_BASE: &str = "https://hub.docker.com/v2/repositories";

#[derive(Debug, Clone)]
struct CachedEntry {
    status: u16,
    content_type: Option<String>,
    body: Bytes,
}

/// Hub API passthrough with response caching.
#[derive(Debug)]
pub struct HubApi {
    client: Client,
    cache: TtlCache<CachedEntry>,
}

impl HubApi {
    pub fn new(config: Arc<Config>) -> Self {
        let mut builder = Client::builder().timeout(Duration::from_secs(30));
        if let Some(proxy_url) = &config.access.proxy {
            if let Ok(proxy) = reqwest::Proxy::all(proxy_url) {
                builder = builder.proxy(proxy);
            }
        }
        Self {
            client: builder.build().expect("failed to create hub client"),
            cache: TtlCache::new(SEARCH_CACHE_CAPACITY, SEARCH_CACHE_TTL),
        }
    }

    /// `GET /search` passthrough.
    pub async fn search(
        &self,
        query: &str,
        page: Option<u32>,
        page_size: Option<u32>,
    ) -> Result<Response, ProxyError> {
        let mut params = vec![("q".to_string(), query.to_string())];
        if let Some(page) = page {
            params.push(("page".to_string(), page.to_string()));
        }
        if let Some(size) = page_size {
            params.push(("page_size".to_string(), size.to_string()));
        }
        let url = Url::parse_with_params(HUB_SEARCH_URL, &params)
            .map_err(|_| ProxyError::Internal("bad search query".to_string()))?;
        self.passthrough(url).await
    }

    /// `GET /tags` passthrough.
    pub async fn tags(
        &self,
        namespace: &str,
        name: &str,
        page: Option<u32>,
        page_size: Option<u32>,
    ) -> Result<Response, ProxyError> {
        let mut params = Vec::new();
        if let Some(page) = page {
            params.push(("page".to_string(), page.to_string()));
        }
        if let Some(size) = page_size {
            params.push(("page_size".to_string(), size.to_string()));
        }
        let base = format!("{HUB_TAGS_BASE}/{namespace}/{name}/tags");
        let url = Url::parse_with_params(&base, &params)
            .map_err(|_| ProxyError::Internal("bad tags request".to_string()))?;
        self.passthrough(url).await
    }

    async fn passthrough(&self, url: Url) -> Result<Response, ProxyError> {
        let key = url.to_string();
        if let Some(entry) = self.cache.get(&key) {
            debug!(%url, "hub cache hit");
            return Ok(build_response(&entry));
        }

        let upstream = self.client.get(url).send().await.map_err(ProxyError::Upstream)?;
        let status = upstream.status().as_u16();
        let content_type = upstream
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let body = upstream.bytes().await.map_err(ProxyError::Upstream)?;

        let entry = CachedEntry {
            status,
            content_type,
            body,
        };
        if (200..300).contains(&status) {
            self.cache.set(key, entry.clone());
        }
        Ok(build_response(&entry))
    }
}

fn build_response(entry: &CachedEntry) -> Response {
    let mut builder = Response::builder()
        .status(StatusCode::from_u16(entry.status).unwrap_or(StatusCode::BAD_GATEWAY));
    if let Some(ct) = &entry.content_type {
        builder = builder.header(header::CONTENT_TYPE, ct);
    }
    builder
        .body(Body::from(entry.body.clone()))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}

/// Resolve the `/tags/:namespace/*name` path form.
///
/// Compatibility wart kept from the original route table: when the
/// namespace is `library` but the name itself contains a slash, the name's
/// first segment is re-interpreted as the real namespace.
pub fn split_namespace(namespace: &str, name: &str) -> (String, String) {
    if namespace == "library" {
        if let Some((real_ns, rest)) = name.split_once('/') {
            return (real_ns.to_string(), rest.to_string());
        }
    }
    (namespace.to_string(), name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    // Test 1: Plain namespace/name pass through unchanged
    #[test]
    fn test_split_namespace_plain() {
        assert_eq!(
            split_namespace("library", "nginx"),
            ("library".to_string(), "nginx".to_string())
        );
        assert_eq!(
            split_namespace("grafana", "loki"),
            ("grafana".to_string(), "loki".to_string())
        );
    }

    // Test 2: library + slashed name re-parses the namespace
    #[test]
    fn test_split_namespace_wart() {
        assert_eq!(
            split_namespace("library", "grafana/loki"),
            ("grafana".to_string(), "loki".to_string())
        );
        // only the first segment moves
        assert_eq!(
            split_namespace("library", "a/b/c"),
            ("a".to_string(), "b/c".to_string())
        );
    }

    // Test 3: Non-library namespaces never re-parse
    #[test]
    fn test_split_namespace_non_library() {
        assert_eq!(
            split_namespace("grafana", "loki/extra"),
            ("grafana".to_string(), "loki/extra".to_string())
        );
    }
}
