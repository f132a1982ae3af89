//! Configuration management for XNAT Sync
//!
//! This module provides the TOML configuration file with automatic
//! first-run initialization and zero-config defaults. The core library never
//! reads it; the binary converts it into runtime values and passes those on.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::app::identifiers::IdMap;
use crate::app::{ClientConfig, RequestPolicy};
use crate::auth::{normalize_server_url, Credentials};
use crate::constants::{env, http, limits, logging};
use crate::errors::{AuthResult, ConfigError, ConfigResult};

const CONFIG_DIR_NAME: &str = "xnat-sync";

/// Unified application configuration for TOML serialization
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Primary archive
    pub source: ServerConfigToml,
    /// Mirror archive
    pub mirror: ServerConfigToml,
    /// HTTP client settings
    pub client: ClientConfigToml,
    /// Retry budgets and timeouts
    pub retry: RetryConfigToml,
    /// Rename state machine settings
    pub rename: RenameConfigToml,
    /// Study and site code translations between naming conventions
    pub identifiers: IdMap,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// One archive server
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfigToml {
    /// Server address; a scheme-less address is taken as https
    pub url: String,
    /// Port, when not part of the address
    pub port: Option<u16>,
    /// Two-line file holding username and password; the environment is
    /// used when absent
    pub credentials_file: Option<PathBuf>,
}

impl ServerConfigToml {
    /// Normalized base URL, falling back to `XNAT_SERVER`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if no address is configured or it can't be parsed.
    pub fn server_url(&self, field: &str) -> ConfigResult<String> {
        let address = if self.url.trim().is_empty() {
            std::env::var(env::SERVER).map_err(|_| ConfigError::MissingField {
                field: format!("{}.url", field),
            })?
        } else {
            self.url.clone()
        };

        normalize_server_url(&address, self.port).map_err(|e| ConfigError::InvalidValue {
            field: format!("{}.url", field),
            value: address.clone(),
            reason: e.to_string(),
        })
    }

    /// Credentials for this server
    pub fn credentials(&self) -> AuthResult<Credentials> {
        Credentials::resolve(self.credentials_file.as_deref())
    }
}

/// TOML-friendly client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfigToml {
    /// TCP keep-alive timeout in seconds (None = disabled)
    pub tcp_keepalive_secs: Option<u64>,
    /// TCP nodelay setting
    pub tcp_nodelay: bool,
    /// Connection pool idle timeout in seconds (None = no timeout)
    pub pool_idle_timeout_secs: Option<u64>,
    /// Maximum idle connections per host
    pub pool_max_per_host: usize,
    /// Connect timeout in seconds
    pub connect_timeout_secs: u64,
    /// Rate limit (requests per second)
    pub rate_limit_rps: u32,
    /// Accept self-signed certificates
    pub accept_invalid_certs: bool,
}

impl Default for ClientConfigToml {
    fn default() -> Self {
        Self {
            tcp_keepalive_secs: Some(30),
            tcp_nodelay: true,
            pool_idle_timeout_secs: Some(http::POOL_IDLE_TIMEOUT.as_secs()),
            pool_max_per_host: http::POOL_MAX_PER_HOST,
            connect_timeout_secs: http::CONNECT_TIMEOUT.as_secs(),
            rate_limit_rps: limits::DEFAULT_RATE_LIMIT_RPS,
            accept_invalid_certs: false,
        }
    }
}

/// TOML-friendly retry configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfigToml {
    /// Sleep after a 502/503/504 answer
    #[serde(with = "humantime_serde")]
    pub unavailable_backoff: Duration,
    pub query: RequestPolicy,
    pub stream: RequestPolicy,
    pub mutation: RequestPolicy,
    pub upload: RequestPolicy,
}

impl Default for RetryConfigToml {
    fn default() -> Self {
        Self {
            unavailable_backoff: limits::UNAVAILABLE_BACKOFF,
            query: RequestPolicy::query(),
            stream: RequestPolicy::stream(),
            mutation: RequestPolicy::mutation(),
            upload: RequestPolicy::upload(),
        }
    }
}

/// Rename settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenameConfigToml {
    /// Rename requests allowed before giving up
    pub attempts: u32,
}

impl Default for RenameConfigToml {
    fn default() -> Self {
        Self {
            attempts: limits::RENAME_ATTEMPTS,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default log level for the application
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: logging::DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

impl AppConfig {
    /// Convert TOML-friendly configuration to runtime configuration
    pub fn to_runtime_config(&self) -> ClientConfig {
        ClientConfig {
            tcp_keepalive: self.client.tcp_keepalive_secs.map(Duration::from_secs),
            tcp_nodelay: self.client.tcp_nodelay,
            pool_idle_timeout: self.client.pool_idle_timeout_secs.map(Duration::from_secs),
            pool_max_per_host: self.client.pool_max_per_host,
            connect_timeout: Duration::from_secs(self.client.connect_timeout_secs),
            rate_limit_rps: self.client.rate_limit_rps,
            accept_invalid_certs: self.client.accept_invalid_certs,
            unavailable_backoff: self.retry.unavailable_backoff,
            query: self.retry.query,
            stream: self.retry.stream,
            mutation: self.retry.mutation,
            upload: self.retry.upload,
        }
    }

    /// Load configuration with precedence:
    /// 1. Default values
    /// 2. Config file (explicit, or the first found in the standard locations)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if an explicitly given file is missing, or the
    /// file can't be read, parsed or validated.
    pub async fn load(config_file_override: Option<PathBuf>) -> ConfigResult<Self> {
        let config_path = match config_file_override {
            Some(path) if !path.exists() => return Err(ConfigError::NotFound { path }),
            Some(path) => Some(path),
            None => Self::find_config_file(),
        };

        let config = match config_path {
            Some(path) => {
                debug!("Loading config from: {}", path.display());
                Self::load_from_file(&path).await?
            }
            None => Self::default(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject values the client can't run with
    pub fn validate(&self) -> ConfigResult<()> {
        if self.client.rate_limit_rps == 0 {
            return Err(ConfigError::InvalidValue {
                field: "client.rate_limit_rps".to_string(),
                value: "0".to_string(),
                reason: "Must be at least 1".to_string(),
            });
        }
        if self.rename.attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "rename.attempts".to_string(),
                value: "0".to_string(),
                reason: "Must be at least 1".to_string(),
            });
        }
        for (field, policy) in [
            ("retry.query", self.retry.query),
            ("retry.stream", self.retry.stream),
            ("retry.mutation", self.retry.mutation),
            ("retry.upload", self.retry.upload),
        ] {
            if policy.timeout.is_zero() {
                return Err(ConfigError::InvalidValue {
                    field: format!("{}.timeout", field),
                    value: "0s".to_string(),
                    reason: "Timeouts must be positive".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Initialize configuration on first run
    ///
    /// Creates a default config file if none exists and notifies the user
    pub async fn initialize_first_run() -> ConfigResult<Option<PathBuf>> {
        let Some(config_path) = Self::get_default_config_path() else {
            debug!("No user config directory, skipping config generation");
            return Ok(None);
        };

        if config_path.exists() {
            return Ok(Some(config_path));
        }

        info!("Creating default configuration file...");

        let io_error = |path: &Path| {
            let path = path.to_path_buf();
            move |source| ConfigError::Io { path, source }
        };

        if let Some(parent) = config_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(io_error(parent))?;
        }

        tokio::fs::write(&config_path, Self::generate_default_config_content())
            .await
            .map_err(io_error(&config_path))?;

        println!("📁 Created default configuration file:");
        println!("   {}", config_path.display());
        println!("   Set the [source] and [mirror] servers before running verify.");
        println!();

        Ok(Some(config_path))
    }

    /// Find configuration file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        let mut search_paths = vec![PathBuf::from("./xnat-sync.toml")];
        search_paths.extend(Self::get_default_config_path());
        #[cfg(unix)]
        search_paths.push(PathBuf::from("/etc/xnat-sync/config.toml"));

        let found = search_paths.into_iter().find(|path| path.exists());
        if found.is_none() {
            debug!("No config file found in standard locations");
        }
        found
    }

    /// Get the default config file path for the current user
    fn get_default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join("config.toml"))
    }

    /// Load configuration from a TOML file
    async fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;

        let config: AppConfig = toml::from_str(&content)?;

        info!("Loaded configuration from: {}", path.display());
        Ok(config)
    }

    /// Generate default configuration content with helpful comments
    fn generate_default_config_content() -> String {
        format!(
            r#"# XNAT Sync Configuration
# This file was automatically generated on first run.
# You can customize any of these settings to suit your needs.

[source]
# Primary archive; falls back to ${server_var} when empty
url = ""
# port = 443
# credentials_file = "/path/to/credentials"  # username on line 1, password on line 2

[mirror]
url = ""

[client]
tcp_keepalive_secs = 30
tcp_nodelay = true
pool_idle_timeout_secs = {pool_idle}
pool_max_per_host = {pool_max}
connect_timeout_secs = {connect}
rate_limit_rps = {rps}
accept_invalid_certs = false

[retry]
# Sleep after the archive answers 502/503/504
unavailable_backoff = "{backoff}s"

# Every timed-out attempt doubles the timeout and uses up one retry
query = {{ retries = {retries}, timeout = "{query}s" }}
stream = {{ retries = {retries}, timeout = "{stream}s" }}
mutation = {{ retries = {retries}, timeout = "{mutation}s" }}
upload = {{ retries = {retries}, timeout = "{upload}s" }}

[rename]
attempts = {attempts}

[identifiers]
# KCNI code = Datman code
[identifiers.study]
# SPN = "SPN01"
[identifiers.site]
# CAMH = "CMH"

[logging]
level = "{level}"  # error, warn, info, debug, trace
"#,
            server_var = env::SERVER,
            pool_idle = http::POOL_IDLE_TIMEOUT.as_secs(),
            pool_max = http::POOL_MAX_PER_HOST,
            connect = http::CONNECT_TIMEOUT.as_secs(),
            rps = limits::DEFAULT_RATE_LIMIT_RPS,
            backoff = limits::UNAVAILABLE_BACKOFF.as_secs(),
            retries = limits::MAX_RETRIES,
            query = limits::QUERY_TIMEOUT.as_secs(),
            stream = limits::STREAM_TIMEOUT.as_secs(),
            mutation = limits::MUTATION_TIMEOUT.as_secs(),
            upload = limits::UPLOAD_TIMEOUT.as_secs(),
            attempts = limits::RENAME_ATTEMPTS,
            level = logging::DEFAULT_LOG_LEVEL,
        )
    }
}
