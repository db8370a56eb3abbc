//! HTTP router
//!
//! Routes registry traffic (`/v2`, `/token`), the Hub search/tags
//! passthrough, the readiness probe, and the static pages; everything else
//! falls through to the GitHub/HF fetch proxy.

use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use axum::extract::{Path, Query, Request, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{any, get};
use axum::Router;
use serde::Deserialize;

use crate::config::Config;
use crate::error::ProxyError;
use crate::fetch::FetchProxy;
use crate::hub::{split_namespace, HubApi};
use crate::ratelimit::RateLimiter;
use crate::registry::RegistryProxy;

use super::middleware::{proxy_base, rate_limit_middleware};

const SERVICE_NAME: &str = "fastpull";

const HOME_HTML: &str = concat!(
    "<!doctype html><html><head><meta charset=\"utf-8\">",
    "<title>fastpull</title></head><body>",
    "<h1>fastpull</h1>",
    "<p>Accelerator proxy for container images and GitHub / Hugging Face downloads.</p>",
    "<p>Pull images through <code>/v2/</code>, fetch files by prefixing their URL, ",
    "or try the <a href=\"/search.html\">image search</a>.</p>",
    "</body></html>"
);

const SEARCH_HTML: &str = concat!(
    "<!doctype html><html><head><meta charset=\"utf-8\">",
    "<title>fastpull search</title></head><body>",
    "<h1>Image search</h1>",
    "<form action=\"/search\" method=\"get\">",
    "<input name=\"q\" placeholder=\"image name\"><button>Search</button>",
    "</form></body></html>"
);

const IMAGES_HTML: &str = concat!(
    "<!doctype html><html><head><meta charset=\"utf-8\">",
    "<title>fastpull images</title></head><body>",
    "<h1>Images</h1>",
    "<p>Browse tags via <code>/tags?namespace=&amp;name=</code>.</p>",
    "</body></html>"
);

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub limiter: Arc<RateLimiter>,
    pub registry: Arc<RegistryProxy>,
    pub fetch: Arc<FetchProxy>,
    pub hub: Arc<HubApi>,
    started_unix: u64,
    started: Instant,
}

impl AppState {
    pub fn new(config: Arc<Config>, limiter: Arc<RateLimiter>) -> Self {
        let registry = Arc::new(RegistryProxy::new(Arc::clone(&config)));
        let fetch = Arc::new(FetchProxy::new(Arc::clone(&config)));
        let hub = Arc::new(HubApi::new(Arc::clone(&config)));
        Self::with_components(config, limiter, registry, fetch, hub)
    }

    /// Assemble from pre-built subsystems.
    pub fn with_components(
        config: Arc<Config>,
        limiter: Arc<RateLimiter>,
        registry: Arc<RegistryProxy>,
        fetch: Arc<FetchProxy>,
        hub: Arc<HubApi>,
    ) -> Self {
        let started_unix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        Self {
            config,
            limiter,
            registry,
            fetch,
            hub,
            started_unix,
            started: Instant::now(),
        }
    }
}

/// Build the application router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Static surface (rate-limit exempt)
        .route("/", get(home_handler))
        .route("/search.html", get(search_page_handler))
        .route("/images.html", get(images_page_handler))
        .route("/favicon.ico", get(favicon_handler))
        .route("/public/*path", get(public_handler))
        // Probes
        .route("/ready", get(ready_handler))
        // Hub API passthrough
        .route("/search", get(search_handler))
        .route("/tags", get(tags_query_handler))
        .route("/tags/:namespace/*name", get(tags_path_handler))
        // Registry v2 proxy
        .route("/v2", any(registry_handler))
        .route("/v2/", any(registry_handler))
        .route("/v2/*path", any(registry_handler))
        .route("/token", any(token_handler))
        .route("/token/*path", any(token_handler))
        // Everything else is a GitHub/HF fetch
        .fallback(fetch_handler)
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
        .with_state(state)
}

// =============================================================================
// Static handlers
// =============================================================================

async fn home_handler() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/html; charset=utf-8")], HOME_HTML)
}

async fn search_page_handler() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/html; charset=utf-8")], SEARCH_HTML)
}

async fn images_page_handler() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/html; charset=utf-8")], IMAGES_HTML)
}

async fn favicon_handler() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "image/x-icon")], &[] as &[u8])
}

async fn public_handler(Path(path): Path<String>) -> impl IntoResponse {
    (StatusCode::NOT_FOUND, format!("no such asset: {path}"))
}

// =============================================================================
// Probe
// =============================================================================

/// Largest-unit-first uptime, zero units skipped.
fn format_uptime(total_secs: u64) -> String {
    if total_secs == 0 {
        return "0s".to_string();
    }
    let days = total_secs / 86_400;
    let hours = (total_secs % 86_400) / 3600;
    let minutes = (total_secs % 3600) / 60;
    let secs = total_secs % 60;

    let mut out = String::new();
    for (value, unit) in [(days, "d"), (hours, "h"), (minutes, "m"), (secs, "s")] {
        if value > 0 {
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(&format!("{value}{unit}"));
        }
    }
    out
}

async fn ready_handler(State(state): State<AppState>) -> impl IntoResponse {
    let uptime = state.started.elapsed().as_secs();
    Json(serde_json::json!({
        "ready": true,
        "service": SERVICE_NAME,
        "start_time_unix": state.started_unix,
        "uptime_sec": uptime,
        "uptime_human": format_uptime(uptime),
    }))
}

// =============================================================================
// Hub API passthrough
// =============================================================================

#[derive(Debug, Deserialize)]
struct SearchParams {
    q: Option<String>,
    query: Option<String>,
    page: Option<u32>,
    page_size: Option<u32>,
}

async fn search_handler(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Response, ProxyError> {
    let Some(q) = params.q.or(params.query).filter(|q| !q.is_empty()) else {
        return Ok((
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "missing query" })),
        )
            .into_response());
    };
    state.hub.search(&q, params.page, params.page_size).await
}

#[derive(Debug, Deserialize)]
struct TagsParams {
    namespace: Option<String>,
    name: Option<String>,
    page: Option<u32>,
    page_size: Option<u32>,
}

async fn tags_query_handler(
    State(state): State<AppState>,
    Query(params): Query<TagsParams>,
) -> Result<Response, ProxyError> {
    let (Some(namespace), Some(name)) = (params.namespace, params.name) else {
        return Ok((
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "missing namespace or name" })),
        )
            .into_response());
    };
    state
        .hub
        .tags(&namespace, &name, params.page, params.page_size)
        .await
}

#[derive(Debug, Deserialize)]
struct PagingParams {
    page: Option<u32>,
    page_size: Option<u32>,
}

async fn tags_path_handler(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
    Query(params): Query<PagingParams>,
) -> Result<Response, ProxyError> {
    let (namespace, name) = split_namespace(&namespace, &name);
    state
        .hub
        .tags(&namespace, &name, params.page, params.page_size)
        .await
}

// =============================================================================
// Proxy handlers
// =============================================================================

async fn registry_handler(
    State(state): State<AppState>,
    req: Request,
) -> Result<Response, ProxyError> {
    let base = proxy_base(req.headers());
    state.registry.handle(req, &base).await
}

async fn token_handler(
    State(state): State<AppState>,
    req: Request,
) -> Result<Response, ProxyError> {
    let base = proxy_base(req.headers());
    state.registry.token_endpoint(req, &base).await
}

async fn fetch_handler(
    State(state): State<AppState>,
    req: Request,
) -> Result<Response, ProxyError> {
    let base = proxy_base(req.headers());
    state.fetch.handle(req, &base).await
}

#[cfg(test)]
mod tests {
    use super::*;

    // Test 1: Uptime formatting skips zero units
    #[test]
    fn test_format_uptime() {
        assert_eq!(format_uptime(0), "0s");
        assert_eq!(format_uptime(4), "4s");
        assert_eq!(format_uptime(60), "1m");
        assert_eq!(format_uptime(3600 + 120 + 5), "1h 2m 5s");
        assert_eq!(format_uptime(86_400 + 2 * 3600 + 3 * 60 + 4), "1d 2h 3m 4s");
        assert_eq!(format_uptime(2 * 86_400), "2d");
    }
}
