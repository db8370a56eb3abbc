//! HTTP middleware
//!
//! Client-IP extraction (proxy-header aware) and the per-IP rate-limit
//! gate applied in front of every non-exempt route.

use std::net::{IpAddr, SocketAddr};

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::cidr::parse_ip;
use crate::ratelimit::Decision;

use super::router::AppState;

/// Paths that never consume rate-limit tokens.
const EXEMPT_PATHS: &[&str] = &["/", "/favicon.ico", "/search.html", "/images.html"];

fn is_exempt(path: &str) -> bool {
    EXEMPT_PATHS.contains(&path) || path.starts_with("/public/")
}

/// Extract the client address, honouring `X-Forwarded-For` (leftmost
/// entry) and `X-Real-IP` before the socket peer. `::ffff:` prefixes and
/// surrounding brackets are stripped.
pub fn client_ip(headers: &HeaderMap, socket: Option<IpAddr>) -> Option<IpAddr> {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = forwarded.split(',').next() {
            if let Some(ip) = parse_ip(first) {
                return Some(ip);
            }
        }
    }
    if let Some(real) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        if let Some(ip) = parse_ip(real) {
            return Some(ip);
        }
    }
    socket.map(|ip| parse_ip(&ip.to_string()).unwrap_or(ip))
}

/// Externally visible origin of this proxy, used for the
/// `WWW-Authenticate` realm rewrite and script URL rewriting.
pub fn proxy_base(headers: &HeaderMap) -> String {
    let host = headers
        .get("x-forwarded-host")
        .or_else(|| headers.get(header::HOST))
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    let proto = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("https");
    format!("{proto}://{host}")
}

/// Rate-limit gate. Denied addresses get a 403, exhausted buckets a 429;
/// exempt static paths skip accounting entirely.
pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if is_exempt(request.uri().path()) {
        return next.run(request).await;
    }

    let socket = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip());
    let Some(ip) = client_ip(request.headers(), socket) else {
        return next.run(request).await;
    };

    match state.limiter.check(ip) {
        Decision::Allowed => next.run(request).await,
        Decision::Denied => (
            StatusCode::FORBIDDEN,
            Json(serde_json::json!({ "error": "access denied" })),
        )
            .into_response(),
        Decision::Limited => (
            StatusCode::TOO_MANY_REQUESTS,
            Json(serde_json::json!({ "error": "rate limited" })),
        )
            .into_response(),
    }
}
