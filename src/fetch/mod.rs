//! GitHub / Hugging Face streaming proxy
//!
//! Fallback handler for everything that is not registry or Hub-API traffic.
//! Follows redirects manually so content gating applies only to terminal
//! responses, streams bodies through, and rewrites download URLs inside
//! shell/PowerShell install scripts to point back at the proxy.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use axum::body::Body;
use axum::extract::Request;
use axum::http::{header, Method, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use regex_lite::Regex;
use reqwest::{redirect, Client, Url};
use tracing::debug;

use crate::access::AccessPolicy;
use crate::classify::classify_fetch_url;
use crate::config::Config;
use crate::error::{format_size, ProxyError};

/// Manual redirect walk bound.
const REDIRECT_CAP: usize = 20;

/// Content types that mark a webpage rather than a file.
const BLOCKED_CONTENT_TYPES: &[&str] = &[
    "text/html",
    "application/xhtml+xml",
    "text/xml",
    "application/xml",
];

/// Headers never forwarded to or from the upstream.
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

/// Browser policy headers stripped from upstream responses.
const POLICY_HEADERS: &[&str] = &[
    "content-security-policy",
    "referrer-policy",
    "strict-transport-security",
];

fn is_hop_header(name: &str) -> bool {
    HOP_HEADERS.iter().any(|h| name.eq_ignore_ascii_case(h))
}

fn is_policy_header(name: &str) -> bool {
    POLICY_HEADERS.iter().any(|h| name.eq_ignore_ascii_case(h))
}

/// Canonicalise the raw path of a fallback request into an upstream URL:
/// duplicate leading slashes trimmed, missing scheme defaulted to https,
/// single-slash scheme artifacts repaired.
pub fn normalize_raw_path(raw: &str) -> String {
    let s = raw.trim_start_matches('/');
    if let Some(rest) = s.strip_prefix("https:/") {
        let rest = rest.trim_start_matches('/');
        return format!("https://{rest}");
    }
    if let Some(rest) = s.strip_prefix("http:/") {
        let rest = rest.trim_start_matches('/');
        return format!("http://{rest}");
    }
    format!("https://{s}")
}

/// Primary content-type token, lowercased, against the blocked set.
fn blocked_content_type(content_type: &str) -> Option<String> {
    let primary = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    BLOCKED_CONTENT_TYPES
        .iter()
        .find(|t| **t == primary)
        .map(|_| primary)
}

/// Does the URL path name a shell or PowerShell script?
fn is_script_path(url: &Url) -> bool {
    let path = url.path().to_ascii_lowercase();
    path.ends_with(".sh") || path.ends_with(".ps1")
}

/// Prefix every GitHub download URL in a script body with the proxy base,
/// so nested `curl`/`wget` calls loop back through the accelerator.
pub fn rewrite_script_urls(body: &str, proxy_base: &str) -> String {
    static URLS: OnceLock<Regex> = OnceLock::new();
    let re = URLS.get_or_init(|| {
        Regex::new(r"https?://(?:github\.com|raw\.githubusercontent\.com)/\S+")
            .expect("invalid script URL pattern")
    });
    re.replace_all(body, |caps: &regex_lite::Captures| {
        format!("{proxy_base}/{}", &caps[0])
    })
    .into_owned()
}

/// The GitHub/HF fetch proxy.
#[derive(Debug)]
pub struct FetchProxy {
    policy: AccessPolicy,
    client: Client,
    file_size: u64,
}

impl FetchProxy {
    pub fn new(config: Arc<Config>) -> Self {
        let mut builder = Client::builder()
            .redirect(redirect::Policy::none())
            .connect_timeout(Duration::from_secs(10));
        if let Some(proxy_url) = &config.access.proxy {
            if let Ok(proxy) = reqwest::Proxy::all(proxy_url) {
                builder = builder.proxy(proxy);
            }
        }
        let client = builder.build().expect("failed to create fetch client");
        Self::with_client(config, client)
    }

    /// Build with a caller-supplied HTTP client. The client must not follow
    /// redirects on its own.
    pub fn with_client(config: Arc<Config>, client: Client) -> Self {
        Self {
            policy: AccessPolicy::from_config(&config.access),
            client,
            file_size: config.server.file_size,
        }
    }

    /// Proxy one fallback request end to end.
    pub async fn handle(&self, req: Request, proxy_base: &str) -> Result<Response, ProxyError> {
        let raw = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let normalized = normalize_raw_path(raw);
        let target = classify_fetch_url(&normalized).ok_or(ProxyError::ClassifyMiss)?;

        if let Some(subject) = &target.subject {
            self.policy
                .check_github(subject)
                .map_err(|r| ProxyError::AccessDenied(r.as_str().to_string()))?;
        }

        let start_url = Url::parse(&target.url)
            .map_err(|_| ProxyError::Internal("unparseable upstream URL".to_string()))?;
        debug!(url = %start_url, "fetch dispatch");

        let method = req.method().clone();
        let (parts, body) = req.into_parts();

        // Redirect hops have to replay the body, so non-GET/HEAD bodies
        // (git smart-HTTP exchanges) are held in memory.
        let body_bytes = if method == Method::GET || method == Method::HEAD {
            None
        } else {
            let limit = usize::try_from(self.file_size).unwrap_or(usize::MAX);
            Some(
                axum::body::to_bytes(body, limit)
                    .await
                    .map_err(|_| ProxyError::TooLarge(format_size(self.file_size)))?,
            )
        };

        self.dispatch(start_url, method, &parts.headers, body_bytes, proxy_base)
            .await
    }

    /// Walk redirects from a classified upstream URL and relay the terminal
    /// response.
    pub async fn dispatch(
        &self,
        start_url: Url,
        method: Method,
        headers: &axum::http::HeaderMap,
        body_bytes: Option<Bytes>,
        proxy_base: &str,
    ) -> Result<Response, ProxyError> {
        let mut url = start_url.clone();
        let mut hops = 0usize;
        let upstream_resp = loop {
            let mut upstream_req = self.client.request(method.clone(), url.clone());
            for (name, value) in headers {
                if is_hop_header(name.as_str()) {
                    continue;
                }
                upstream_req = upstream_req.header(name.clone(), value.clone());
            }
            if let Some(bytes) = &body_bytes {
                upstream_req = upstream_req.body(bytes.clone());
            }

            let resp = upstream_req.send().await.map_err(ProxyError::Upstream)?;

            if resp.status().is_redirection() {
                if let Some(location) = resp
                    .headers()
                    .get(header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                {
                    hops += 1;
                    if hops > REDIRECT_CAP {
                        return Err(ProxyError::RedirectLoop);
                    }
                    url = url
                        .join(location)
                        .map_err(|_| ProxyError::Internal("bad redirect location".to_string()))?;
                    debug!(hop = hops, url = %url, "following redirect");
                    continue;
                }
            }
            break resp;
        };

        self.finish(upstream_resp, &method, &start_url, proxy_base)
            .await
    }

    /// Gate, filter headers, and stream (or rewrite) the terminal response.
    async fn finish(
        &self,
        upstream: reqwest::Response,
        method: &Method,
        request_url: &Url,
        proxy_base: &str,
    ) -> Result<Response, ProxyError> {
        let status = upstream.status();

        if *method == Method::GET && status.is_success() {
            if let Some(ct) = upstream
                .headers()
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
            {
                if let Some(blocked) = blocked_content_type(ct) {
                    return Err(ProxyError::ContentBlocked(blocked));
                }
            }
            if let Some(len) = upstream
                .headers()
                .get(header::CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
            {
                if len > self.file_size {
                    return Err(ProxyError::TooLarge(format_size(self.file_size)));
                }
            }
        }

        let rewrite_script = is_script_path(request_url) && status.is_success();

        let mut builder = Response::builder()
            .status(StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::BAD_GATEWAY));
        for (name, value) in upstream.headers() {
            let n = name.as_str();
            if n.eq_ignore_ascii_case("content-length") {
                // Rewriting changes the length; otherwise it passes through.
                if rewrite_script {
                    continue;
                }
            } else if is_hop_header(n) || is_policy_header(n) {
                continue;
            }
            builder = builder.header(name.clone(), value.clone());
        }

        let body = if rewrite_script {
            let bytes = upstream.bytes().await.map_err(ProxyError::Upstream)?;
            let text = String::from_utf8_lossy(&bytes);
            Body::from(Bytes::from(rewrite_script_urls(&text, proxy_base)))
        } else {
            Body::from_stream(upstream.bytes_stream())
        };

        builder
            .body(body)
            .map_err(|_| ProxyError::Internal("failed to build response".to_string()))
    }
}
