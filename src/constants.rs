//! Application constants for XNAT Sync
//!
//! This module centralizes all constants used throughout the application,
//! organized by functional domain for maintainability and clarity.

use std::time::Duration;

/// Environment variable names for authentication
pub mod env {
    /// Environment variable name for the XNAT username
    pub const USERNAME: &str = "XNAT_USER";

    /// Environment variable name for the XNAT password
    pub const PASSWORD: &str = "XNAT_PASS";

    /// Environment variable naming the default XNAT server
    pub const SERVER: &str = "XNAT_SERVER";
}

/// Authentication and credential-related constants
pub mod auth {
    /// Minimum allowed username length
    pub const MIN_USERNAME_LENGTH: usize = 2;

    /// Maximum allowed username length
    pub const MAX_USERNAME_LENGTH: usize = 64;

    /// File permissions for .env file (Unix only) - owner read/write only
    #[cfg(unix)]
    pub const ENV_FILE_PERMISSIONS: u32 = 0o600;

    /// Marker of an HTML page where a session token was expected
    pub const HTML_MARKER: &str = "<html";
}

/// HTTP client configuration constants
pub mod http {
    use super::Duration;

    /// Default user agent for all HTTP requests
    pub const USER_AGENT: &str = "XNAT-Sync/0.1.0 (Imaging Archive Mirror)";

    /// Connection establishment timeout
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

    /// Connection pool idle timeout
    pub const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

    /// Maximum idle connections per host in pool
    pub const POOL_MAX_PER_HOST: usize = 4;

    /// Content type of DICOM archive uploads
    pub const ZIP_CONTENT_TYPE: &str = "application/zip";
}

/// Retry budgets and timeouts of the resilient request layer
pub mod limits {
    use super::Duration;

    /// Default rate limit for archive requests (requests per second)
    pub const DEFAULT_RATE_LIMIT_RPS: u32 = 10;

    /// Retry budget shared by every request kind
    pub const MAX_RETRIES: u32 = 3;

    /// Initial timeout of metadata queries
    pub const QUERY_TIMEOUT: Duration = Duration::from_secs(150);

    /// Initial timeout of streamed downloads
    pub const STREAM_TIMEOUT: Duration = Duration::from_secs(300);

    /// Initial timeout of PUT and DELETE requests
    pub const MUTATION_TIMEOUT: Duration = Duration::from_secs(30);

    /// Initial timeout of POST uploads
    pub const UPLOAD_TIMEOUT: Duration = Duration::from_secs(60 * 60);

    /// Fixed sleep after a gateway timeout or unavailable response
    pub const UNAVAILABLE_BACKOFF: Duration = Duration::from_secs(30);

    /// Attempts made by the rename state machine
    pub const RENAME_ATTEMPTS: u32 = 3;
}

/// XNAT REST endpoints and vocabulary
pub mod xnat {
    /// Session creation and teardown endpoint
    pub const SESSION_PATH: &str = "/data/JSESSION";

    /// Session type used when creating or renaming experiments
    pub const MR_SESSION_XSI_TYPE: &str = "xnat:mrSessionData";

    /// Namespace of resource catalog documents
    pub const CATALOG_NAMESPACE: &str = "http://nrg.wustl.edu/catalog";

    /// Label XNAT gives to folders created without one
    pub const NO_LABEL: &str = "No Label";

    /// Label used for unlabelled folders in reports
    pub const NOLABEL: &str = "NOLABEL";

    /// Resource label holding raw series data
    pub const DICOM_LABEL: &str = "DICOM";

    /// Resource label holding preview images
    pub const SNAPSHOTS_LABEL: &str = "SNAPSHOTS";

    /// Pipeline that gets stuck and blocks renames
    pub const AUTORUN_PIPELINE: &str = "xnat_tools/AutoRun.xml";
}

/// File operation constants
pub mod files {
    /// Partial download suffix for atomic operations
    pub const PARTIAL_FILE_SUFFIX: &str = ".part";

    /// Prefix of temporary files created during repair
    pub const TEMP_FILE_PREFIX: &str = "xnat_sync_";

    /// Chunk size when streaming uploads from disk
    pub const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;
}

/// Logging and debugging constants
pub mod logging {
    /// Default log level
    pub const DEFAULT_LOG_LEVEL: &str = "info";
}

// Re-export commonly used constants for convenience
pub use env::{PASSWORD as ENV_PASSWORD, SERVER as ENV_SERVER, USERNAME as ENV_USERNAME};
pub use http::USER_AGENT;
pub use limits::{DEFAULT_RATE_LIMIT_RPS, MAX_RETRIES};
