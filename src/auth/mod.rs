//! Authentication management for XNAT credentials
//!
//! This module provides functions for resolving XNAT credentials from the
//! environment or a credentials file, interactive setup and verification, and
//! normalization of server addresses.
//!
//! # Examples
//!
//! ```rust,no_run
//! use xnat_sync::auth::Credentials;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let credentials = Credentials::resolve(None)?;
//! println!("Connecting as {}", credentials.username);
//! # Ok(())
//! # }
//! ```

pub mod credentials;
pub mod server;

// Re-export main public API
pub use credentials::{
    check_credentials, get_auth_status, prompt_credentials, save_credentials, setup_credentials,
    show_auth_status, verify_credentials, AuthStatus, Credentials,
};
pub use server::normalize_server_url;
