//! Configuration management
//!
//! Loads the optional `config.toml` (camelCase keys, matching the wire
//! contract), merges in the default registry table, and applies environment
//! overrides before the server starts.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub server: ServerConfig,
    pub rate_limit: RateLimitConfig,
    pub security: SecurityConfig,
    pub access: AccessConfig,
    pub registries: BTreeMap<String, RegistryEntry>,
    pub token_cache: TokenCacheConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration: defaults, then the optional file, then
    /// environment overrides, then the default registry table for any host
    /// the file did not mention.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_env();
        config.merge_default_registries();
        Ok(config)
    }

    /// Parse configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::FileRead(format!("failed to read config file: {e}")))?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content)
            .map_err(|e| ConfigError::Parse(format!("failed to parse TOML: {e}")))
    }

    /// Apply environment overrides on top of the loaded file.
    pub fn apply_env(&mut self) {
        if let Ok(host) = std::env::var("SERVER_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("SERVER_PORT") {
            if let Ok(port) = port.parse() {
                self.server.port = port;
            }
        }
        if let Ok(size) = std::env::var("MAX_FILE_SIZE") {
            if let Ok(size) = size.parse() {
                self.server.file_size = size;
            }
        }
        if let Ok(limit) = std::env::var("RATE_LIMIT") {
            if let Ok(limit) = limit.parse() {
                self.rate_limit.request_limit = limit;
            }
        }
        if let Ok(hours) = std::env::var("RATE_PERIOD_HOURS") {
            if let Ok(hours) = hours.parse() {
                self.rate_limit.period_hours = hours;
            }
        }
        if let Ok(csv) = std::env::var("IP_WHITELIST") {
            self.security.white_list.extend(split_csv(&csv));
        }
        if let Ok(csv) = std::env::var("IP_BLACKLIST") {
            self.security.black_list.extend(split_csv(&csv));
        }
    }

    /// Insert the stock registries for any host the file did not configure.
    /// Docker Hub is implicit and never appears in the map.
    pub fn merge_default_registries(&mut self) {
        for (host, entry) in default_registries() {
            self.registries.entry(host).or_insert(entry);
        }
    }

    /// Enabled registry descriptor for a host, if configured.
    pub fn registry(&self, host: &str) -> Option<&RegistryEntry> {
        self.registries.get(host).filter(|r| r.enabled)
    }
}

fn split_csv(csv: &str) -> Vec<String> {
    csv.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Fetch-proxy size cap in bytes.
    pub file_size: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            file_size: default_file_size(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_file_size() -> u64 {
    2 * 1024 * 1024 * 1024 // 2 GiB
}

/// Per-IP rate-limit configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct RateLimitConfig {
    pub request_limit: u32,
    pub period_hours: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            request_limit: default_request_limit(),
            period_hours: default_period_hours(),
        }
    }
}

impl RateLimitConfig {
    pub fn period(&self) -> Duration {
        Duration::from_secs_f64(self.period_hours.max(f64::MIN_POSITIVE) * 3600.0)
    }
}

fn default_request_limit() -> u32 {
    1000
}

fn default_period_hours() -> f64 {
    24.0
}

/// IP allow/deny lists (CIDR strings).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct SecurityConfig {
    pub white_list: Vec<String>,
    pub black_list: Vec<String>,
}

/// Repository/image access patterns and the optional outbound proxy.
///
/// `whiteList`/`blackList` hold `owner/repo` patterns for the GitHub side;
/// `dockerWhiteList`/`dockerBlackList` hold `[registry/]image` patterns.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct AccessConfig {
    pub white_list: Vec<String>,
    pub black_list: Vec<String>,
    pub docker_white_list: Vec<String>,
    pub docker_black_list: Vec<String>,
    /// Outbound proxy URL for upstream requests.
    pub proxy: Option<String>,
}

/// A configured upstream registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct RegistryEntry {
    /// Origin host to dial.
    pub upstream: String,
    /// Token endpoint for the `generic` dialect; unused by the fixed ones.
    pub auth_host: String,
    pub auth_type: AuthDialect,
    pub enabled: bool,
}

impl Default for RegistryEntry {
    fn default() -> Self {
        Self {
            upstream: String::new(),
            auth_host: String::new(),
            auth_type: AuthDialect::Anonymous,
            enabled: true,
        }
    }
}

/// Token-acquisition dialect of a registry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum AuthDialect {
    DockerHub,
    Github,
    Google,
    Quay,
    Anonymous,
    Generic,
}

fn default_registries() -> BTreeMap<String, RegistryEntry> {
    let mut map = BTreeMap::new();
    map.insert(
        "ghcr.io".to_string(),
        RegistryEntry {
            upstream: "ghcr.io".to_string(),
            auth_host: "ghcr.io/token".to_string(),
            auth_type: AuthDialect::Github,
            enabled: true,
        },
    );
    map.insert(
        "gcr.io".to_string(),
        RegistryEntry {
            upstream: "gcr.io".to_string(),
            auth_host: "gcr.io/v2/token".to_string(),
            auth_type: AuthDialect::Google,
            enabled: true,
        },
    );
    map.insert(
        "quay.io".to_string(),
        RegistryEntry {
            upstream: "quay.io".to_string(),
            auth_host: "quay.io/v2/auth".to_string(),
            auth_type: AuthDialect::Quay,
            enabled: true,
        },
    );
    map.insert(
        "registry.k8s.io".to_string(),
        RegistryEntry {
            upstream: "registry.k8s.io".to_string(),
            auth_host: String::new(),
            auth_type: AuthDialect::Anonymous,
            enabled: true,
        },
    );
    map
}

/// Token cache tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct TokenCacheConfig {
    pub enabled: bool,
    /// Duration string, e.g. "20m".
    #[serde(rename = "defaultTTL")]
    pub default_ttl: String,
}

impl Default for TokenCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl: "20m".to_string(),
        }
    }
}

impl TokenCacheConfig {
    pub fn ttl(&self) -> Duration {
        humantime::parse_duration(&self.default_ttl)
            .unwrap_or_else(|_| Duration::from_secs(20 * 60))
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("failed to read configuration file: {0}")]
    FileRead(String),

    #[error("failed to parse configuration: {0}")]
    Parse(String),
}
