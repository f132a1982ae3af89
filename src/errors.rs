//! Error types for XNAT Sync
//!
//! This module defines the error taxonomy shared by the session manager, the
//! resilient request layer, the archive client and the reconciliation and
//! rename engines. Transport-level ambiguity (timeouts, expired sessions) is
//! resolved inside the request layer; everything that reaches a caller here
//! is either fatal or a business-level ambiguity the caller must resolve by
//! re-querying the archive.

use std::path::PathBuf;

use thiserror::Error;

/// Authentication and credential errors
#[derive(Error, Debug)]
pub enum AuthError {
    /// Missing environment variables for credentials
    #[error(
        "Missing XNAT credentials. Set XNAT_USER and XNAT_PASS environment variables or run 'auth setup'"
    )]
    MissingCredentials,

    /// Environment variable error
    #[error("Environment variable error: {0}")]
    EnvVar(#[from] std::env::VarError),

    /// HTTP request failed while opening a session
    #[error("HTTP request failed during authentication")]
    Http(#[from] reqwest::Error),

    /// Login kept timing out; the credentials were never judged
    #[error("Login to {server} timed out after {attempts} attempts (last timeout {timeout_secs}s)")]
    LoginTimeout {
        server: String,
        attempts: u32,
        timeout_secs: u64,
    },

    /// Session creation endpoint refused the credentials
    #[error("Failed opening session on {server}: HTTP {status}")]
    LoginFailed { server: String, status: u16 },

    /// Server answered the login with an HTML page instead of a session token
    #[error("Password for user {username} on server {server} has expired. Please update it")]
    CredentialsExpired { username: String, server: String },

    /// Request was still unauthorized after a fresh session was opened
    #[error("Server {server} rejected a freshly opened session")]
    SessionRejected { server: String },

    /// Invalid username format
    #[error("Invalid username format: {reason}")]
    InvalidUsername { reason: String },

    /// Credentials file could not be read or is malformed
    #[error("Failed to read credentials file {path}: {reason}")]
    CredentialFile { path: PathBuf, reason: String },

    /// File I/O error during credential storage
    #[error("Failed to save credentials to file")]
    CredentialStorage(#[from] std::io::Error),
}

/// Recognizable failure messages returned by the archive in error bodies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerFailure {
    /// The import found more than one session matching the upload
    MultipleSessions,
    /// The archive's front-end proxy could not reach the application server
    BadGateway,
    /// The import could not work out which experiment the data belongs to
    UnidentifiedExperiment,
    /// No known failure message matched
    Unrecognized,
}

impl ServerFailure {
    /// Map a response body onto a known failure kind
    pub fn classify(body: &str) -> Self {
        let lowered = body.to_lowercase();
        if lowered.contains("multiple imaging sessions") {
            Self::MultipleSessions
        } else if lowered.contains("bad gateway") {
            Self::BadGateway
        } else if lowered.contains("unable to identify experiment") {
            Self::UnidentifiedExperiment
        } else {
            Self::Unrecognized
        }
    }

    /// Human-readable reason for the failure
    pub fn reason(&self) -> &'static str {
        match self {
            Self::MultipleSessions => "multiple imaging sessions in archive, check prearchive",
            Self::BadGateway => "bad gateway, check the application server logs",
            Self::UnidentifiedExperiment => "unable to identify experiment, did the upload fail?",
            Self::Unrecognized => "unrecognized server error",
        }
    }
}

impl std::fmt::Display for ServerFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.reason())
    }
}

/// Errors raised by the archive client and the layers built on it
#[derive(Error, Debug)]
pub enum ArchiveError {
    /// Authentication failed or the session could not be recovered
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// HTTP transport error that is not a timeout
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Every attempt timed out
    #[error("Request to {url} timed out after {attempts} attempts (last timeout {timeout_secs}s)")]
    Timeout {
        url: String,
        attempts: u32,
        timeout_secs: u64,
    },

    /// Server kept answering 502/503/504
    #[error("Server unavailable (HTTP {status}) for {url} after {attempts} attempts")]
    ServiceUnavailable {
        url: String,
        status: u16,
        attempts: u32,
    },

    /// 409/422 responses whose meaning must be established by re-querying
    #[error("Ambiguous HTTP {status} response from {url}: {body}")]
    Conflict {
        url: String,
        status: u16,
        body: String,
    },

    /// Server returned a non-success status with a diagnostic body
    #[error("Server error HTTP {status} ({failure}) from {url}: {body}")]
    Server {
        url: String,
        status: u16,
        failure: ServerFailure,
        body: String,
    },

    /// Requested record does not exist
    #[error("{what} does not exist")]
    NotFound { what: String },

    /// Target name is already taken by another record
    #[error("Can't use name {name}: {reason}")]
    NameInUse { name: String, reason: String },

    /// Download or upload did not complete; local artifacts were removed
    #[error("Transfer of {path} failed: {reason}")]
    PartialTransfer { path: PathBuf, reason: String },

    /// Response could not be projected onto the expected structure
    #[error("Malformed response for {what}: {reason}")]
    Parse { what: String, reason: String },

    /// Client configuration cannot be used
    #[error("Invalid client configuration: {reason}")]
    InvalidConfig { reason: String },

    /// URL could not be built
    #[error("Invalid URL: {url} - {error}")]
    InvalidUrl { url: String, error: String },

    /// Local file I/O failed
    #[error("File I/O error")]
    Io(#[from] std::io::Error),
}

impl AuthError {
    /// Network trouble while logging in, as opposed to bad credentials
    pub fn is_transient(&self) -> bool {
        matches!(self, AuthError::LoginTimeout { .. })
    }
}

impl ArchiveError {
    /// Timeouts and unavailability are transient until the budget runs out
    pub fn is_transient(&self) -> bool {
        match self {
            ArchiveError::Timeout { .. } | ArchiveError::ServiceUnavailable { .. } => true,
            ArchiveError::Auth(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Credentials are bad or the server refuses them; nothing else can succeed
    pub fn is_fatal_auth(&self) -> bool {
        matches!(self, ArchiveError::Auth(e) if !e.is_transient())
    }

    /// The status code the archive answered with, when there was one
    pub fn status(&self) -> Option<u16> {
        match self {
            ArchiveError::Conflict { status, .. }
            | ArchiveError::Server { status, .. }
            | ArchiveError::ServiceUnavailable { status, .. } => Some(*status),
            ArchiveError::Auth(AuthError::LoginFailed { status, .. }) => Some(*status),
            _ => None,
        }
    }

    pub fn parse(what: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        ArchiveError::Parse {
            what: what.into(),
            reason: reason.to_string(),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        ArchiveError::NotFound { what: what.into() }
    }
}

/// Identifier parsing and conversion errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentifierError {
    /// Identifier does not match the expected naming convention
    #[error("Can't parse {id} as a {convention} identifier")]
    Parse {
        id: String,
        convention: &'static str,
    },

    /// Identifier has no equivalent in the other convention
    #[error("Identifier {id} can't be converted: {reason}")]
    Unsupported { id: String, reason: String },
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    NotFound { path: PathBuf },

    /// Invalid configuration format
    #[error("Invalid configuration format")]
    InvalidFormat(#[from] toml::de::Error),

    /// Missing required configuration field
    #[error("Missing required configuration field: {field}")]
    MissingField { field: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for {field}: {value}. {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    /// Configuration file could not be read or written
    #[error("Configuration file I/O error for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Top-level application error that can represent any error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Authentication error
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Archive interaction error
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    /// Identifier error
    #[error(transparent)]
    Identifier(#[from] IdentifierError),

    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Generic I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Report serialization error
    #[error("Failed to serialize report")]
    Json(#[from] serde_json::Error),

    /// Generic application error with context
    #[error("Application error: {message}")]
    Generic { message: String },
}

impl AppError {
    /// Create a generic application error with a message
    pub fn generic(message: impl Into<String>) -> Self {
        Self::Generic {
            message: message.into(),
        }
    }

    /// Check if the error is recoverable by re-running the operation later
    pub fn is_recoverable(&self) -> bool {
        match self {
            AppError::Archive(e) => e.is_transient() || matches!(e, ArchiveError::Conflict { .. }),
            AppError::Auth(e) => e.is_transient() || matches!(e, AuthError::Http(_)),
            _ => false,
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            AppError::Auth(_) | AppError::Archive(ArchiveError::Auth(_)) => "authentication",
            AppError::Archive(ArchiveError::PartialTransfer { .. }) => "transfer",
            AppError::Archive(_) => "archive",
            AppError::Identifier(_) => "identifier",
            AppError::Config(_) => "config",
            AppError::Io(_) => "io",
            AppError::Json(_) => "report",
            AppError::Generic { .. } => "generic",
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;

/// Authentication result type alias
pub type AuthResult<T> = std::result::Result<T, AuthError>;

/// Archive result type alias
pub type ArchiveResult<T> = std::result::Result<T, ArchiveError>;

/// Identifier result type alias
pub type IdentifierResult<T> = std::result::Result<T, IdentifierError>;

/// Configuration result type alias
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
