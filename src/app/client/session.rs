//! XNAT session management
//!
//! A [`Session`] owns the authenticated transport handle for one server. The
//! handle is an `Arc<reqwest::Client>` whose cookie store carries the
//! `JSESSIONID`; when the server reports the session expired, a brand-new
//! client is logged in and swapped in, so requests already in flight finish
//! against the handle they started with.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use reqwest::{Client, StatusCode};
use tokio::sync::RwLock;

use super::config::ClientConfig;
use crate::auth::Credentials;
use crate::constants::{auth, xnat};
use crate::errors::{AuthError, AuthResult};

/// Current transport handle and the login that produced it
#[derive(Debug, Clone)]
struct Transport {
    client: Arc<Client>,
    generation: u64,
}

/// An authenticated connection to one XNAT server
#[derive(Debug)]
pub struct Session {
    server: String,
    credentials: Credentials,
    config: ClientConfig,
    transport: RwLock<Transport>,
    closed: AtomicBool,
}

impl Session {
    /// Opens a session by logging in once
    ///
    /// # Arguments
    ///
    /// * `server` - Normalized base URL of the server
    /// * `credentials` - Username and password for basic authentication
    /// * `config` - Transport configuration for every client this session builds
    ///
    /// # Errors
    ///
    /// Returns `AuthError` if:
    /// - The session endpoint answers with a non-success status
    /// - The server answers with an HTML page (expired password)
    /// - Every login attempt times out (`LoginTimeout`, transient)
    /// - The HTTP request fails
    pub async fn open(
        server: &str,
        credentials: Credentials,
        config: ClientConfig,
    ) -> AuthResult<Self> {
        let server = server.trim_end_matches('/').to_string();
        let client = Self::login(&server, &credentials, &config).await?;
        tracing::info!("Opened XNAT session on {} as {}", server, credentials.username);

        Ok(Self {
            server,
            credentials,
            config,
            transport: RwLock::new(Transport {
                client: Arc::new(client),
                generation: 0,
            }),
            closed: AtomicBool::new(false),
        })
    }

    /// Logs in on a fresh client and returns it
    ///
    /// Timeouts and connection failures are retried under the query policy,
    /// doubling the timeout each time.
    async fn login(server: &str, credentials: &Credentials, config: &ClientConfig) -> AuthResult<Client> {
        let client = config.build_http_client()?;
        let url = format!("{}{}", server, xnat::SESSION_PATH);
        let mut timeout = config.query.timeout;
        let mut attempts = 0u32;

        let response = loop {
            attempts += 1;
            tracing::debug!("Requesting session token from {} (attempt {})", url, attempts);
            match client
                .post(&url)
                .basic_auth(&credentials.username, Some(&credentials.password))
                .timeout(timeout)
                .send()
                .await
            {
                Ok(response) => break response,
                Err(e) if e.is_timeout() || e.is_connect() => {
                    if attempts > config.query.retries {
                        tracing::error!("Login to {} timed out after {} attempts", server, attempts);
                        return Err(AuthError::LoginTimeout {
                            server: server.to_string(),
                            attempts,
                            timeout_secs: timeout.as_secs(),
                        });
                    }
                    timeout *= 2;
                    tracing::warn!(
                        "Login to {} failed: {}. Retrying with timeout {}s",
                        server,
                        e,
                        timeout.as_secs()
                    );
                }
                Err(e) => return Err(AuthError::Http(e)),
            }
        };

        let status = response.status();
        if status != StatusCode::OK {
            tracing::warn!("Login to {} refused: HTTP {}", server, status);
            return Err(AuthError::LoginFailed {
                server: server.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.text().await?;
        if body.to_lowercase().contains(auth::HTML_MARKER) {
            return Err(AuthError::CredentialsExpired {
                username: credentials.username.clone(),
                server: server.to_string(),
            });
        }

        Ok(client)
    }

    /// Current transport handle and its generation
    pub async fn handle(&self) -> (Arc<Client>, u64) {
        let transport = self.transport.read().await;
        (Arc::clone(&transport.client), transport.generation)
    }

    /// Replaces the transport handle after the server rejected it
    ///
    /// `seen_generation` is the generation of the handle that got the 401. If
    /// another caller already replaced that handle, nothing is done.
    ///
    /// # Errors
    ///
    /// Returns `AuthError` if logging in again fails.
    pub async fn reauthenticate(&self, seen_generation: u64) -> AuthResult<()> {
        let mut transport = self.transport.write().await;
        if transport.generation != seen_generation {
            tracing::debug!(
                "Session on {} already refreshed (generation {})",
                self.server,
                transport.generation
            );
            return Ok(());
        }

        tracing::info!("Session on {} expired, logging in again", self.server);
        let client = Self::login(&self.server, &self.credentials, &self.config).await?;
        *transport = Transport {
            client: Arc::new(client),
            generation: seen_generation + 1,
        };
        Ok(())
    }

    /// Base URL of the server
    pub fn server(&self) -> &str {
        &self.server
    }

    /// Transport configuration of this session
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Logs out of the server
    ///
    /// Failures are logged; the server expires the session on its own.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let (client, _) = self.handle().await;
        let url = format!("{}{}", self.server, xnat::SESSION_PATH);
        match client
            .delete(&url)
            .timeout(self.config.mutation.timeout)
            .send()
            .await
        {
            Ok(response) => tracing::debug!(
                "Closed session on {}: HTTP {}",
                self.server,
                response.status()
            ),
            Err(e) => tracing::warn!("Failed closing session on {}: {}", self.server, e),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if *self.closed.get_mut() {
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!("No runtime to close session on {}", self.server);
            return;
        };

        let client = Arc::clone(&self.transport.get_mut().client);
        let url = format!("{}{}", self.server, xnat::SESSION_PATH);
        runtime.spawn(async move {
            if let Err(e) = client.delete(&url).send().await {
                tracing::debug!("Best-effort session teardown failed: {}", e);
            }
        });
    }
}
