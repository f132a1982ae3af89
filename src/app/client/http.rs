//! Resilient HTTP request layer
//!
//! Every archive request goes through [`HttpHandler::send`], which applies
//! rate limiting, per-attempt timeouts that double after each timed-out or
//! unavailable attempt, one transparent re-login on 401, and the archive's
//! 404-means-empty convention. Business-level ambiguity such as 409 on a
//! rename is handed back to the caller as `ArchiveError::Conflict`.

use std::num::NonZeroU32;
use std::path::PathBuf;
use std::time::Duration;

use futures::stream;
use governor::{clock::DefaultClock, state::InMemoryState, Jitter, Quota, RateLimiter};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use tokio::io::AsyncReadExt;
use url::Url;

use super::config::RequestPolicy;
use super::session::Session;
use crate::constants::files;
use crate::errors::{ArchiveError, ArchiveResult, AuthError, ServerFailure};

/// Request body that can be replayed on every attempt
#[derive(Debug, Clone)]
pub enum RequestBody {
    Empty,
    Bytes(Vec<u8>),
    /// File re-opened and streamed from disk on each attempt
    File(PathBuf),
}

/// One archive request and the policy it is retried under
#[derive(Debug, Clone)]
pub struct ArchiveRequest {
    pub method: Method,
    pub url: Url,
    pub body: RequestBody,
    pub content_type: Option<&'static str>,
    pub policy: RequestPolicy,
}

impl ArchiveRequest {
    pub fn new(method: Method, url: Url, policy: RequestPolicy) -> Self {
        Self {
            method,
            url,
            body: RequestBody::Empty,
            content_type: None,
            policy,
        }
    }

    pub fn get(url: Url, policy: RequestPolicy) -> Self {
        Self::new(Method::GET, url, policy)
    }

    pub fn put(url: Url, policy: RequestPolicy) -> Self {
        Self::new(Method::PUT, url, policy)
    }

    pub fn post(url: Url, policy: RequestPolicy) -> Self {
        Self::new(Method::POST, url, policy)
    }

    pub fn delete(url: Url, policy: RequestPolicy) -> Self {
        Self::new(Method::DELETE, url, policy)
    }

    pub fn with_body(mut self, body: RequestBody) -> Self {
        self.body = body;
        self
    }

    pub fn with_content_type(mut self, content_type: &'static str) -> Self {
        self.content_type = Some(content_type);
        self
    }
}

type DirectRateLimiter = RateLimiter<governor::state::NotKeyed, InMemoryState, DefaultClock>;

/// HTTP operations handler with resilience patterns
#[derive(Debug)]
pub struct HttpHandler {
    session: Session,
    rate_limiter: DirectRateLimiter,
    unavailable_backoff: Duration,
}

impl HttpHandler {
    /// Creates a new HttpHandler over an open session
    ///
    /// Rate limit and backoff are taken from the session's configuration.
    ///
    /// # Errors
    ///
    /// Returns `ArchiveError::InvalidConfig` if the configured rate limit is zero
    pub fn new(session: Session) -> ArchiveResult<Self> {
        let rate_limiter = Self::build_rate_limiter(session.config().rate_limit_rps)?;
        let unavailable_backoff = session.config().unavailable_backoff;
        Ok(Self {
            session,
            rate_limiter,
            unavailable_backoff,
        })
    }

    fn build_rate_limiter(rate_limit_rps: u32) -> ArchiveResult<DirectRateLimiter> {
        let rps = NonZeroU32::new(rate_limit_rps).ok_or_else(|| ArchiveError::InvalidConfig {
            reason: "rate limit must be non-zero".to_string(),
        })?;
        Ok(RateLimiter::direct(Quota::per_second(rps)))
    }

    /// The session requests are issued on
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Sends a request, retrying per its policy
    ///
    /// Returns `Ok(None)` when the archive answers 404.
    ///
    /// # Arguments
    ///
    /// * `request` - The request to send; its body is replayed on each attempt
    ///
    /// # Errors
    ///
    /// Returns `ArchiveError` if:
    /// - Every attempt timed out (`Timeout`) or met 502/503/504 (`ServiceUnavailable`)
    /// - The session was rejected again right after logging in (`Auth`)
    /// - The archive answered 409 or 422 (`Conflict`)
    /// - The archive answered any other error status (`Server`)
    pub async fn send(&self, request: &ArchiveRequest) -> ArchiveResult<Option<Response>> {
        let policy = request.policy;
        let mut timeout = policy.timeout;
        let mut attempts = 0u32;
        let mut retries_left = policy.retries;
        let mut reauthenticated = false;

        loop {
            attempts += 1;
            self.rate_limiter
                .until_ready_with_jitter(Jitter::up_to(Duration::from_millis(50)))
                .await;

            let (client, generation) = self.session.handle().await;
            tracing::debug!(
                "{} {} (attempt {}, timeout {}s)",
                request.method,
                request.url,
                attempts,
                timeout.as_secs()
            );

            let builder = client
                .request(request.method.clone(), request.url.clone())
                .timeout(timeout);
            let builder = Self::attach_body(builder, request).await?;

            let response = match builder.send().await {
                Ok(response) => response,
                Err(e) if e.is_timeout() || e.is_connect() => {
                    if retries_left == 0 {
                        tracing::error!(
                            "{} {} timed out after {} attempts",
                            request.method,
                            request.url,
                            attempts
                        );
                        return Err(ArchiveError::Timeout {
                            url: request.url.to_string(),
                            attempts,
                            timeout_secs: timeout.as_secs(),
                        });
                    }
                    retries_left -= 1;
                    timeout *= 2;
                    tracing::warn!(
                        "Request to {} failed: {} (attempt {}/{}). Retrying with timeout {}s",
                        request.url,
                        e,
                        attempts,
                        policy.retries + 1,
                        timeout.as_secs()
                    );
                    continue;
                }
                Err(e) => return Err(ArchiveError::Http(e)),
            };

            let status = response.status();
            if status.is_success() {
                return Ok(Some(response));
            }

            match status {
                StatusCode::NOT_FOUND => {
                    tracing::debug!("{} not found, treating as empty", request.url);
                    return Ok(None);
                }
                StatusCode::UNAUTHORIZED => {
                    if reauthenticated {
                        return Err(AuthError::SessionRejected {
                            server: self.session.server().to_string(),
                        }
                        .into());
                    }
                    self.session.reauthenticate(generation).await?;
                    reauthenticated = true;
                }
                StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => {
                    let body = response.text().await.unwrap_or_default();
                    tracing::debug!("{} answered {}: {}", request.url, status, body);
                    return Err(ArchiveError::Conflict {
                        url: request.url.to_string(),
                        status: status.as_u16(),
                        body,
                    });
                }
                StatusCode::BAD_GATEWAY
                | StatusCode::SERVICE_UNAVAILABLE
                | StatusCode::GATEWAY_TIMEOUT => {
                    let body = response.text().await.unwrap_or_default();
                    let failure = ServerFailure::classify(&body);
                    if status == StatusCode::BAD_GATEWAY && is_semantic(failure) {
                        return Err(Self::server_error(request, status, failure, body));
                    }
                    if retries_left == 0 {
                        tracing::error!(
                            "{} still unavailable after {} attempts",
                            request.url,
                            attempts
                        );
                        return Err(ArchiveError::ServiceUnavailable {
                            url: request.url.to_string(),
                            status: status.as_u16(),
                            attempts,
                        });
                    }
                    retries_left -= 1;
                    timeout *= 2;
                    tracing::warn!(
                        "Server unavailable (HTTP {}) for {} (attempt {}/{}). Backing off for {}s",
                        status.as_u16(),
                        request.url,
                        attempts,
                        policy.retries + 1,
                        self.unavailable_backoff.as_secs_f32()
                    );
                    tokio::time::sleep(self.unavailable_backoff).await;
                }
                _ => {
                    let body = response.text().await.unwrap_or_default();
                    let failure = ServerFailure::classify(&body);
                    return Err(Self::server_error(request, status, failure, body));
                }
            }
        }
    }

    /// Sends a request whose not-found answer is an error
    pub async fn send_expecting(
        &self,
        request: &ArchiveRequest,
        what: &str,
    ) -> ArchiveResult<Response> {
        self.send(request)
            .await?
            .ok_or_else(|| ArchiveError::not_found(what))
    }

    /// Sends a query and decodes its JSON body; 404 yields `None`
    pub async fn get_json(
        &self,
        url: Url,
        policy: RequestPolicy,
    ) -> ArchiveResult<Option<serde_json::Value>> {
        let request = ArchiveRequest::get(url, policy);
        match self.send(&request).await? {
            Some(response) => {
                let text = response.text().await?;
                let value = serde_json::from_str(&text)
                    .map_err(|e| ArchiveError::parse(request.url.as_str(), e))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Sends a query and returns its body as text; 404 yields `None`
    pub async fn get_text(&self, url: Url, policy: RequestPolicy) -> ArchiveResult<Option<String>> {
        match self.send(&ArchiveRequest::get(url, policy)).await? {
            Some(response) => Ok(Some(response.text().await?)),
            None => Ok(None),
        }
    }

    async fn attach_body(
        builder: RequestBuilder,
        request: &ArchiveRequest,
    ) -> ArchiveResult<RequestBuilder> {
        let builder = match request.content_type {
            Some(content_type) => builder.header(reqwest::header::CONTENT_TYPE, content_type),
            None => builder,
        };

        Ok(match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Bytes(bytes) => builder.body(bytes.clone()),
            RequestBody::File(path) => {
                let file = tokio::fs::File::open(path).await?;
                let length = file.metadata().await?.len();
                builder
                    .header(reqwest::header::CONTENT_LENGTH, length)
                    .body(reqwest::Body::wrap_stream(file_stream(file)))
            }
        })
    }

    fn server_error(
        request: &ArchiveRequest,
        status: StatusCode,
        failure: ServerFailure,
        body: String,
    ) -> ArchiveError {
        tracing::warn!(
            "{} {} failed with HTTP {}: {}",
            request.method,
            request.url,
            status.as_u16(),
            failure
        );
        ArchiveError::Server {
            url: request.url.to_string(),
            status: status.as_u16(),
            failure,
            body,
        }
    }
}

/// 502 bodies that describe an import failure rather than a proxy hiccup
fn is_semantic(failure: ServerFailure) -> bool {
    matches!(
        failure,
        ServerFailure::MultipleSessions | ServerFailure::UnidentifiedExperiment
    )
}

/// Streams an open file in fixed-size chunks
fn file_stream(
    file: tokio::fs::File,
) -> impl futures::Stream<Item = std::io::Result<Vec<u8>>> + Send + 'static {
    stream::unfold(Some(file), |state| async move {
        let mut file = state?;
        let mut buffer = vec![0u8; files::UPLOAD_CHUNK_SIZE];
        match file.read(&mut buffer).await {
            Ok(0) => None,
            Ok(n) => {
                buffer.truncate(n);
                Some((Ok(buffer), Some(file)))
            }
            Err(e) => Some((Err(e), None)),
        }
    })
}
