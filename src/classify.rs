//! Upstream URL classification
//!
//! Recognises which upstream a request belongs to: the ordered GitHub/HF
//! pattern table for the fetch proxy, and `/v2/...` path decomposition for
//! the registry proxy.

use std::sync::OnceLock;

use regex_lite::Regex;

struct FetchPattern {
    re: Regex,
    // capture groups 1 and 2 form an owner/repo subject for access control
    has_subject: bool,
    // first `/blob/` is rewritten to `/raw/` before dispatch
    blob_rewrite: bool,
}

fn pattern(re: &str, has_subject: bool, blob_rewrite: bool) -> FetchPattern {
    FetchPattern {
        re: Regex::new(re).expect("invalid fetch pattern"),
        has_subject,
        blob_rewrite,
    }
}

/// Ordered pattern table; first match wins.
fn fetch_patterns() -> &'static [FetchPattern] {
    static PATTERNS: OnceLock<Vec<FetchPattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        vec![
            pattern(
                r"^(?:https?://)?github\.com/([^/]+)/([^/]+)/(?:releases|archive)/.*$",
                true,
                false,
            ),
            pattern(
                r"^(?:https?://)?github\.com/([^/]+)/([^/]+)/(?:blob|raw)/.*$",
                true,
                true,
            ),
            pattern(
                r"^(?:https?://)?github\.com/([^/]+)/([^/]+)/(?:info|git-).*$",
                true,
                false,
            ),
            pattern(
                r"^(?:https?://)?raw\.githubusercontent\.com/([^/]+)/([^/]+)/.+$",
                true,
                false,
            ),
            pattern(
                r"^(?:https?://)?raw\.github\.com/([^/]+)/([^/]+)/.+$",
                true,
                false,
            ),
            pattern(
                r"^(?:https?://)?gist\.(?:githubusercontent|github)\.com/([^/]+)/.+$",
                false,
                false,
            ),
            pattern(
                r"^(?:https?://)?api\.github\.com/repos/([^/]+)/([^/]+)/.*$",
                true,
                false,
            ),
            pattern(
                r"^(?:https?://)?huggingface\.co(?:/spaces)?/([^/]+)/(.+)$",
                true,
                false,
            ),
            pattern(
                r"^(?:https?://)?cdn-lfs\.hf\.co(?:/spaces)?/([^/]+)/([^/]+)(?:/.*)?$",
                false,
                false,
            ),
            pattern(
                r"^(?:https?://)?download\.docker\.com/([^/]+)/.*\.(?:tgz|zip)$",
                false,
                false,
            ),
            pattern(
                r"^(?:https?://)?github\.githubassets\.com/([^/]+)/.*$",
                false,
                false,
            ),
            pattern(
                r"^(?:https?://)?opengraph\.githubassets\.com/([^/]+)/.*$",
                false,
                false,
            ),
        ]
    })
}

/// A classified fetch-proxy target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTarget {
    /// Upstream URL, blob→raw rewrite already applied.
    pub url: String,
    /// `owner/repo` subject for the GitHub access check, when the matched
    /// pattern captures one.
    pub subject: Option<String>,
}

/// Classify a normalised URL against the GitHub/HF pattern table.
///
/// Returns `None` when no pattern matches; callers reject such requests.
pub fn classify_fetch_url(url: &str) -> Option<FetchTarget> {
    for p in fetch_patterns() {
        let Some(caps) = p.re.captures(url) else {
            continue;
        };

        let subject = if p.has_subject {
            let owner = caps.get(1).map(|m| m.as_str())?;
            let rest = caps.get(2).map(|m| m.as_str())?;
            let repo = rest.split('/').next().unwrap_or(rest);
            Some(format!("{owner}/{repo}"))
        } else {
            None
        };

        let url = if p.blob_rewrite {
            url.replacen("/blob/", "/raw/", 1)
        } else {
            url.to_string()
        };

        return Some(FetchTarget { url, subject });
    }
    None
}

/// Registry API resource kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiKind {
    Manifests,
    Blobs,
    Tags,
    Base,
}

/// The result of classifying a `/v2/...` request path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRegistryPath {
    /// `None` means Docker Hub.
    pub registry_host: Option<String>,
    /// Possibly multi-segment; `library/` is prepended for unscoped Hub
    /// images.
    pub image: String,
    pub kind: ApiKind,
    /// Digest or tag; empty for tags/base.
    pub reference: String,
}

/// Decompose the path after `/v2/`.
///
/// `is_known_host` identifies configured registry hosts; a leading image
/// segment naming one is stripped and recorded so that e.g.
/// `ghcr.io/owner/image/manifests/v1` routes to GHCR.
pub fn parse_registry_path<F>(path: &str, is_known_host: F) -> ParsedRegistryPath
where
    F: Fn(&str) -> bool,
{
    let path = path.trim_matches('/');

    if path.is_empty() {
        return ParsedRegistryPath {
            registry_host: None,
            image: String::new(),
            kind: ApiKind::Base,
            reference: String::new(),
        };
    }

    let (raw_image, kind, reference) = if let Some(pos) = path.rfind("/manifests/") {
        (
            &path[..pos],
            ApiKind::Manifests,
            path[pos + "/manifests/".len()..].to_string(),
        )
    } else if let Some(pos) = path.rfind("/blobs/") {
        (
            &path[..pos],
            ApiKind::Blobs,
            path[pos + "/blobs/".len()..].to_string(),
        )
    } else if let Some(stripped) = path.strip_suffix("/tags/list") {
        (stripped, ApiKind::Tags, String::new())
    } else {
        (path, ApiKind::Base, String::new())
    };

    let (registry_host, mut image) = match raw_image.split_once('/') {
        Some((first, rest)) if is_known_host(first) => {
            (Some(first.to_string()), rest.to_string())
        }
        _ => (None, raw_image.to_string()),
    };

    if registry_host.is_none() && !image.is_empty() && !image.contains('/') {
        image = format!("library/{image}");
    }

    ParsedRegistryPath {
        registry_host,
        image,
        kind,
        reference,
    }
}
