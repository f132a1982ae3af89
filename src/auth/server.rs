//! XNAT server address normalization

use url::Url;

use crate::errors::{ArchiveError, ArchiveResult};

/// Normalize a configured server address into a base URL
///
/// A missing scheme defaults to `https://`, trailing slashes are dropped and
/// `port` is appended when the address does not already carry one.
///
/// # Errors
///
/// Returns `ArchiveError::InvalidUrl` if the result is not a valid URL.
pub fn normalize_server_url(address: &str, port: Option<u16>) -> ArchiveResult<String> {
    let trimmed = address.trim().trim_end_matches('/');
    let with_scheme = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    };

    let mut url = Url::parse(&with_scheme).map_err(|e| ArchiveError::InvalidUrl {
        url: address.to_string(),
        error: e.to_string(),
    })?;

    if url.host_str().is_none() {
        return Err(ArchiveError::InvalidUrl {
            url: address.to_string(),
            error: "missing host".to_string(),
        });
    }

    if let (Some(port), None) = (port, url.port()) {
        url.set_port(Some(port))
            .map_err(|_| ArchiveError::InvalidUrl {
                url: address.to_string(),
                error: format!("can't set port {}", port),
            })?;
    }

    Ok(url.as_str().trim_end_matches('/').to_string())
}
