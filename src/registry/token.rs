//! Bearer-token acquisition
//!
//! Each registry speaks its own token dialect. Failures are degraded, not
//! fatal: the registry request proceeds unauthenticated and the origin's
//! 401 (with its challenge) is relayed to the client.

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::cache::TtlCache;
use crate::config::{AuthDialect, RegistryEntry};

/// Freshly fetched registry tokens are cached for this long.
const TOKEN_TTL: Duration = Duration::from_secs(15 * 60);

/// Pull scope for an image.
pub fn scope_for(image: &str) -> String {
    format!("repository:{image}:pull")
}

/// Cache key: `(registry ?? "dockerhub")` and scope, joined with `'|'`.
pub fn cache_key(registry_host: Option<&str>, scope: &str) -> String {
    format!("{}|{}", registry_host.unwrap_or("dockerhub"), scope)
}

/// Token endpoint for a registry's dialect. `None` for anonymous
/// registries; a missing descriptor means Docker Hub.
pub fn auth_url(registry: Option<&RegistryEntry>, scope: &str) -> Option<String> {
    let dialect = registry.map_or(AuthDialect::DockerHub, |r| r.auth_type);
    match dialect {
        AuthDialect::DockerHub => Some(format!(
            "https://auth.docker.io/token?service=registry.docker.io&scope={scope}"
        )),
        AuthDialect::Github => Some(format!("https://ghcr.io/token?scope={scope}")),
        AuthDialect::Google => Some(format!("https://gcr.io/v2/token?scope={scope}")),
        AuthDialect::Quay => Some(format!("https://quay.io/v2/auth?scope={scope}")),
        AuthDialect::Anonymous => None,
        AuthDialect::Generic => {
            let endpoint = registry.map(|r| r.auth_host.as_str()).unwrap_or_default();
            if endpoint.contains("://") {
                Some(format!("{endpoint}?scope={scope}"))
            } else {
                Some(format!("https://{endpoint}?scope={scope}"))
            }
        }
    }
}

/// The auth servers answer with either `token` or `access_token`.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: Option<String>,
    access_token: Option<String>,
}

impl TokenResponse {
    fn into_token(self) -> Option<String> {
        self.token.or(self.access_token).filter(|t| !t.is_empty())
    }
}

/// Cached bearer-token source for all configured registries.
#[derive(Debug)]
pub struct TokenSource {
    client: Client,
    cache: TtlCache<String>,
    cache_enabled: bool,
}

impl TokenSource {
    pub fn new(client: Client, cache_capacity: usize, default_ttl: Duration, enabled: bool) -> Self {
        Self {
            client,
            cache: TtlCache::new(cache_capacity, default_ttl),
            cache_enabled: enabled,
        }
    }

    /// Fetch (or reuse) a pull token for `image` on the given registry.
    ///
    /// Returns `None` for anonymous registries and on any acquisition
    /// failure.
    pub async fn bearer_for(
        &self,
        registry_host: Option<&str>,
        registry: Option<&RegistryEntry>,
        image: &str,
    ) -> Option<String> {
        let scope = scope_for(image);
        let key = cache_key(registry_host, &scope);

        if self.cache_enabled {
            if let Some(token) = self.cache.get(&key) {
                return Some(token);
            }
        }

        let url = auth_url(registry, &scope)?;
        let token = self.fetch(&url).await?;

        if self.cache_enabled {
            self.cache.set_with_ttl(key, token.clone(), TOKEN_TTL);
        }
        Some(token)
    }

    async fn fetch(&self, url: &str) -> Option<String> {
        let response = match self.client.get(url).send().await {
            Ok(r) => r,
            Err(e) => {
                debug!(error = %e, "token request failed");
                return None;
            }
        };
        if !response.status().is_success() {
            debug!(status = %response.status(), "token endpoint refused");
            return None;
        }
        match response.json::<TokenResponse>().await {
            Ok(body) => body.into_token(),
            Err(e) => {
                debug!(error = %e, "token response was not valid JSON");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(dialect: AuthDialect, auth_host: &str) -> RegistryEntry {
        RegistryEntry {
            upstream: "upstream.example".to_string(),
            auth_host: auth_host.to_string(),
            auth_type: dialect,
            enabled: true,
        }
    }

    // Test 1: Scope format
    #[test]
    fn test_scope_format() {
        assert_eq!(scope_for("library/nginx"), "repository:library/nginx:pull");
        assert_eq!(scope_for("owner/image"), "repository:owner/image:pull");
    }

    // Test 2: Cache key defaults the registry to dockerhub
    #[test]
    fn test_cache_key() {
        assert_eq!(
            cache_key(None, "repository:library/nginx:pull"),
            "dockerhub|repository:library/nginx:pull"
        );
        assert_eq!(
            cache_key(Some("ghcr.io"), "repository:a/b:pull"),
            "ghcr.io|repository:a/b:pull"
        );
    }

    // Test 3: Auth URL per dialect
    #[test]
    fn test_auth_url_dialects() {
        let scope = "repository:owner/image:pull";

        assert_eq!(
            auth_url(None, scope).unwrap(),
            "https://auth.docker.io/token?service=registry.docker.io&scope=repository:owner/image:pull"
        );
        assert_eq!(
            auth_url(Some(&entry(AuthDialect::Github, "")), scope).unwrap(),
            "https://ghcr.io/token?scope=repository:owner/image:pull"
        );
        assert_eq!(
            auth_url(Some(&entry(AuthDialect::Google, "")), scope).unwrap(),
            "https://gcr.io/v2/token?scope=repository:owner/image:pull"
        );
        assert_eq!(
            auth_url(Some(&entry(AuthDialect::Quay, "")), scope).unwrap(),
            "https://quay.io/v2/auth?scope=repository:owner/image:pull"
        );
        assert_eq!(
            auth_url(Some(&entry(AuthDialect::Generic, "auth.example/v2/token")), scope).unwrap(),
            "https://auth.example/v2/token?scope=repository:owner/image:pull"
        );
        assert_eq!(auth_url(Some(&entry(AuthDialect::Anonymous, "")), scope), None);
    }

    // Test 4: Token body accepts either field
    #[test]
    fn test_token_response_fields() {
        let r: TokenResponse = serde_json::from_str(r#"{"token":"abc"}"#).unwrap();
        assert_eq!(r.into_token().as_deref(), Some("abc"));

        let r: TokenResponse = serde_json::from_str(r#"{"access_token":"xyz"}"#).unwrap();
        assert_eq!(r.into_token().as_deref(), Some("xyz"));

        let r: TokenResponse =
            serde_json::from_str(r#"{"token":"abc","access_token":"xyz"}"#).unwrap();
        assert_eq!(r.into_token().as_deref(), Some("abc"));

        let r: TokenResponse = serde_json::from_str(r#"{"other":1}"#).unwrap();
        assert_eq!(r.into_token(), None);
    }
}
