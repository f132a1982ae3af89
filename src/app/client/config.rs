//! HTTP client configuration and building logic
//!
//! This module handles the configuration and construction of HTTP clients
//! for XNAT archive interaction, together with the retry policies applied by
//! the resilient request layer to each kind of request.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::constants::{http, limits};
use crate::errors::{AuthError, AuthResult};

/// Retry budget and initial timeout for one kind of request
///
/// Each timed-out or unavailable attempt doubles the timeout and consumes one
/// retry; the request fails once `retries` is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestPolicy {
    /// Retries allowed after the first attempt
    pub retries: u32,
    /// Timeout of the first attempt
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl RequestPolicy {
    pub const fn new(retries: u32, timeout: Duration) -> Self {
        Self { retries, timeout }
    }

    /// Metadata queries (JSON and XML listings)
    pub const fn query() -> Self {
        Self::new(limits::MAX_RETRIES, limits::QUERY_TIMEOUT)
    }

    /// Streamed downloads
    pub const fn stream() -> Self {
        Self::new(limits::MAX_RETRIES, limits::STREAM_TIMEOUT)
    }

    /// PUT and DELETE requests
    pub const fn mutation() -> Self {
        Self::new(limits::MAX_RETRIES, limits::MUTATION_TIMEOUT)
    }

    /// POST uploads
    pub const fn upload() -> Self {
        Self::new(limits::MAX_RETRIES, limits::UPLOAD_TIMEOUT)
    }
}

/// Configuration for the archive HTTP client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// TCP keep-alive settings
    pub tcp_keepalive: Option<Duration>,
    /// TCP nodelay (disable Nagle's algorithm)
    pub tcp_nodelay: bool,
    /// Connection pool idle timeout
    pub pool_idle_timeout: Option<Duration>,
    /// Maximum number of idle connections per host
    pub pool_max_per_host: usize,
    /// Connect timeout
    pub connect_timeout: Duration,
    /// Rate limit (requests per second)
    pub rate_limit_rps: u32,
    /// Accept self-signed certificates (private mirrors)
    pub accept_invalid_certs: bool,
    /// Sleep between attempts after 502/503/504 responses
    pub unavailable_backoff: Duration,
    /// Policy for metadata queries
    pub query: RequestPolicy,
    /// Policy for streamed downloads
    pub stream: RequestPolicy,
    /// Policy for PUT and DELETE requests
    pub mutation: RequestPolicy,
    /// Policy for POST uploads
    pub upload: RequestPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            tcp_keepalive: Some(Duration::from_secs(30)),
            tcp_nodelay: true,
            pool_idle_timeout: Some(http::POOL_IDLE_TIMEOUT),
            pool_max_per_host: http::POOL_MAX_PER_HOST,
            connect_timeout: http::CONNECT_TIMEOUT,
            rate_limit_rps: limits::DEFAULT_RATE_LIMIT_RPS,
            accept_invalid_certs: false,
            unavailable_backoff: limits::UNAVAILABLE_BACKOFF,
            query: RequestPolicy::query(),
            stream: RequestPolicy::stream(),
            mutation: RequestPolicy::mutation(),
            upload: RequestPolicy::upload(),
        }
    }
}

impl ClientConfig {
    /// Builds a fresh HTTP client with its own cookie store
    ///
    /// Every (re-)authentication builds a new client so the session cookie of
    /// an expired session never leaks into the replacement handle. Request
    /// timeouts are applied per attempt by the request layer.
    pub fn build_http_client(&self) -> AuthResult<Client> {
        let mut client_builder = Client::builder()
            .cookie_store(true) // JSESSIONID lives here
            .connect_timeout(self.connect_timeout)
            .user_agent(http::USER_AGENT)
            .tcp_nodelay(self.tcp_nodelay)
            .pool_max_idle_per_host(self.pool_max_per_host)
            .danger_accept_invalid_certs(self.accept_invalid_certs);

        if let Some(keepalive) = self.tcp_keepalive {
            client_builder = client_builder.tcp_keepalive(keepalive);
        }

        if let Some(idle_timeout) = self.pool_idle_timeout {
            client_builder = client_builder.pool_idle_timeout(idle_timeout);
        }

        client_builder.build().map_err(AuthError::Http)
    }

    /// Configuration suited to tests against a local mock server
    pub fn for_testing() -> Self {
        let fast = RequestPolicy::new(limits::MAX_RETRIES, Duration::from_secs(5));
        Self {
            rate_limit_rps: 1000,
            unavailable_backoff: Duration::from_millis(10),
            query: fast,
            stream: fast,
            mutation: fast,
            upload: fast,
            ..Default::default()
        }
    }
}
