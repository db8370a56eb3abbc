//! Docker Registry v2 proxy
//!
//! Classifies `/v2/...` requests, acquires pull tokens per registry dialect,
//! dispatches upstream, and relays the response with the
//! `WWW-Authenticate` realm rewritten so clients re-auth through the proxy.

pub mod token;

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use axum::body::Body;
use axum::extract::Request;
use axum::http::{header, HeaderValue, Method};
use axum::response::Response;
use regex_lite::Regex;
use reqwest::{redirect, Client};
use tracing::debug;

use crate::access::AccessPolicy;
use crate::classify::{parse_registry_path, ApiKind, ParsedRegistryPath};
use crate::config::Config;
use crate::error::ProxyError;

use token::TokenSource;

/// Blob fetches bounce through CDNs; follow up to this many redirects.
const REDIRECT_CAP: usize = 20;

/// Bearer-token cache bound.
const TOKEN_CACHE_CAPACITY: usize = 500;

/// Registry host Docker Hub pulls are dialled against.
const DOCKER_HUB_UPSTREAM: &str = "registry-1.docker.io";

/// Injected for manifest requests when the client sends no `Accept`.
const MANIFEST_ACCEPT: &str = "application/vnd.docker.distribution.manifest.v2+json, \
     application/vnd.docker.distribution.manifest.list.v2+json, \
     application/vnd.oci.image.manifest.v1+json, \
     application/vnd.oci.image.index.v1+json";

/// Connection-scoped headers never forwarded in either direction.
const HOP_HEADERS: &[&str] = &[
    "connection",
    "host",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
    "content-length",
];

fn is_hop_header(name: &str) -> bool {
    HOP_HEADERS.iter().any(|h| name.eq_ignore_ascii_case(h))
}

/// Replace the `realm` of a bearer challenge with the proxy's own token
/// endpoint, preserving every other parameter verbatim.
pub fn rewrite_www_authenticate(value: &str, proxy_base: &str) -> String {
    static REALM: OnceLock<Regex> = OnceLock::new();
    let re = REALM.get_or_init(|| Regex::new(r#"realm="[^"]*""#).expect("invalid realm pattern"));
    match re.find(value) {
        Some(m) => {
            let mut out = String::with_capacity(value.len() + proxy_base.len());
            out.push_str(&value[..m.start()]);
            out.push_str(&format!(r#"realm="{proxy_base}/token""#));
            out.push_str(&value[m.end()..]);
            out
        }
        None => value.to_string(),
    }
}

fn upstream_url(upstream: &str, parsed: &ParsedRegistryPath, query: Option<&str>) -> String {
    // Upstreams are host names; an explicit scheme is honoured as-is.
    let mut url = if upstream.contains("://") {
        format!("{upstream}/v2/")
    } else {
        format!("https://{upstream}/v2/")
    };
    if !parsed.image.is_empty() {
        url.push_str(&parsed.image);
        match parsed.kind {
            ApiKind::Manifests => {
                url.push_str("/manifests/");
                url.push_str(&parsed.reference);
            }
            ApiKind::Blobs => {
                url.push_str("/blobs/");
                url.push_str(&parsed.reference);
            }
            ApiKind::Tags => url.push_str("/tags/list"),
            ApiKind::Base => {}
        }
    }
    if let Some(q) = query {
        url.push('?');
        url.push_str(q);
    }
    url
}

/// The Registry v2 proxy.
#[derive(Debug)]
pub struct RegistryProxy {
    config: Arc<Config>,
    policy: AccessPolicy,
    client: Client,
    tokens: TokenSource,
}

impl RegistryProxy {
    pub fn new(config: Arc<Config>) -> Self {
        let mut builder = Client::builder()
            .redirect(redirect::Policy::limited(REDIRECT_CAP))
            .connect_timeout(Duration::from_secs(10));
        if let Some(proxy_url) = &config.access.proxy {
            if let Ok(proxy) = reqwest::Proxy::all(proxy_url) {
                builder = builder.proxy(proxy);
            }
        }
        let client = builder.build().expect("failed to create registry client");

        let mut token_builder = Client::builder().timeout(Duration::from_secs(30));
        if let Some(proxy_url) = &config.access.proxy {
            if let Ok(proxy) = reqwest::Proxy::all(proxy_url) {
                token_builder = token_builder.proxy(proxy);
            }
        }
        let token_client = token_builder.build().expect("failed to create token client");

        Self::with_clients(config, client, token_client)
    }

    /// Build with caller-supplied HTTP clients.
    pub fn with_clients(config: Arc<Config>, client: Client, token_client: Client) -> Self {
        let tokens = TokenSource::new(
            token_client,
            TOKEN_CACHE_CAPACITY,
            config.token_cache.ttl(),
            config.token_cache.enabled,
        );
        let policy = AccessPolicy::from_config(&config.access);

        Self {
            config,
            policy,
            client,
            tokens,
        }
    }

    /// Proxy a `/v2/...` request.
    pub async fn handle(&self, req: Request, proxy_base: &str) -> Result<Response, ProxyError> {
        let path = req.uri().path();
        let sub = path.strip_prefix("/v2").unwrap_or(path);
        let parsed = parse_registry_path(sub, |h| self.config.registry(h).is_some());

        let registry = parsed
            .registry_host
            .as_deref()
            .and_then(|h| self.config.registry(h));

        if !parsed.image.is_empty() {
            let subject = match parsed.registry_host.as_deref() {
                Some(host) => format!("{host}/{}", parsed.image),
                None => parsed.image.clone(),
            };
            self.policy
                .check_docker(&subject)
                .map_err(|r| ProxyError::AccessDenied(r.as_str().to_string()))?;
        }

        let bearer = if parsed.image.is_empty() {
            None
        } else {
            self.tokens
                .bearer_for(parsed.registry_host.as_deref(), registry, &parsed.image)
                .await
        };

        let upstream = registry.map_or(DOCKER_HUB_UPSTREAM, |r| r.upstream.as_str());
        let url = upstream_url(upstream, &parsed, req.uri().query());
        debug!(%url, image = %parsed.image, "registry dispatch");

        let method = req.method().clone();
        let mut upstream_req = self.client.request(method.clone(), &url);

        let had_accept = req.headers().contains_key(header::ACCEPT);
        for (name, value) in req.headers() {
            if is_hop_header(name.as_str()) {
                continue;
            }
            upstream_req = upstream_req.header(name.clone(), value.clone());
        }
        if !had_accept && parsed.kind == ApiKind::Manifests {
            upstream_req = upstream_req.header(header::ACCEPT, MANIFEST_ACCEPT);
        }
        if let Some(token) = &bearer {
            upstream_req = upstream_req.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }

        if method != Method::GET && method != Method::HEAD {
            upstream_req =
                upstream_req.body(reqwest::Body::wrap_stream(req.into_body().into_data_stream()));
        }

        let upstream_resp = upstream_req.send().await.map_err(ProxyError::Upstream)?;
        Ok(relay_response(upstream_resp, proxy_base))
    }

    /// Proxy `/token` to Docker Hub's auth service, query passed through
    /// and `service` defaulted.
    pub async fn token_endpoint(&self, req: Request, proxy_base: &str) -> Result<Response, ProxyError> {
        let query = req.uri().query().unwrap_or("");
        let mut url = String::from("https://auth.docker.io/token?");
        if query.is_empty() {
            url.push_str("service=registry.docker.io");
        } else {
            url.push_str(query);
            let has_service = query.split('&').any(|p| p.starts_with("service="));
            if !has_service {
                url.push_str("&service=registry.docker.io");
            }
        }

        let mut upstream_req = self.client.get(&url);
        for (name, value) in req.headers() {
            if is_hop_header(name.as_str()) {
                continue;
            }
            upstream_req = upstream_req.header(name.clone(), value.clone());
        }

        let upstream_resp = upstream_req.send().await.map_err(ProxyError::Upstream)?;
        Ok(relay_response(upstream_resp, proxy_base))
    }
}

/// Stream an upstream response back, filtering connection-scoped headers
/// and rewriting any bearer challenge to point at the proxy.
fn relay_response(upstream: reqwest::Response, proxy_base: &str) -> Response {
    let status = upstream.status();
    let mut builder = Response::builder().status(status);

    for (name, value) in upstream.headers() {
        let lower = name.as_str();
        if lower.eq_ignore_ascii_case("transfer-encoding")
            || lower.eq_ignore_ascii_case("connection")
        {
            continue;
        }
        if lower.eq_ignore_ascii_case("www-authenticate") {
            if let Ok(text) = value.to_str() {
                let rewritten = rewrite_www_authenticate(text, proxy_base);
                if let Ok(v) = HeaderValue::from_str(&rewritten) {
                    builder = builder.header(name.clone(), v);
                }
            }
            continue;
        }
        builder = builder.header(name.clone(), value.clone());
    }

    builder
        .body(Body::from_stream(upstream.bytes_stream()))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}
