//! Common test utilities and helpers for integration tests

#![allow(dead_code)]

use std::sync::Arc;

use axum_test::TestServer;

use fastpull::cidr::CidrList;
use fastpull::config::Config;
use fastpull::ratelimit::RateLimiter;
use fastpull::server::{build_router, AppState};

/// Default configuration with the stock registry table merged in.
pub fn base_config() -> Config {
    let mut config = Config::default();
    config.merge_default_registries();
    config
}

/// Build the rate limiter the way `main` does, from the config's lists.
pub fn limiter_from(config: &Config) -> Arc<RateLimiter> {
    Arc::new(RateLimiter::new(
        config.rate_limit.request_limit,
        config.rate_limit.period(),
        CidrList::from_strings(&config.security.white_list),
        CidrList::from_strings(&config.security.black_list),
    ))
}

/// Spin up a TestServer over the full router for a configuration.
pub fn test_server(config: Config) -> TestServer {
    let config = Arc::new(config);
    let limiter = limiter_from(&config);
    let state = AppState::new(Arc::clone(&config), limiter);
    TestServer::new(build_router(state)).expect("failed to start test server")
}
