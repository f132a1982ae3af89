//! Streaming downloads with atomic writes and digest verification
//!
//! Response bodies are streamed chunk by chunk into `<destination>.part`
//! while an MD5 digest is computed. The partial file is renamed onto the
//! destination only once the body completed and matched any expected
//! digest; on every other path it is removed before the error propagates.
//! Zip archives must never be empty, single resource files may be.

use std::path::{Path, PathBuf};

use futures::StreamExt;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use url::Url;

use super::http::{ArchiveRequest, HttpHandler};
use crate::app::hash::Md5Hash;
use crate::constants::files;
use crate::errors::{ArchiveError, ArchiveResult};

/// File download operations handler
pub struct DownloadHandler<'a> {
    http_handler: &'a HttpHandler,
}

impl<'a> DownloadHandler<'a> {
    /// Creates a new DownloadHandler with the given HTTP handler
    pub fn new(http_handler: &'a HttpHandler) -> Self {
        Self { http_handler }
    }

    /// Downloads `url` to `destination`
    ///
    /// # Arguments
    ///
    /// * `url` - The URL to download from
    /// * `destination` - The path to save the file to; an existing file is replaced
    /// * `expected` - Digest the downloaded bytes must match, when known
    /// * `reject_empty` - Treat a zero-byte body as a failed transfer
    ///
    /// # Errors
    ///
    /// Returns `ArchiveError` if:
    /// - The archive has nothing at `url` (`NotFound`)
    /// - The request fails after retries
    /// - The body breaks off or fails verification (`PartialTransfer`)
    /// - The body is empty and `reject_empty` is set (`PartialTransfer`)
    pub async fn download_file(
        &self,
        url: Url,
        destination: &Path,
        expected: Option<Md5Hash>,
        reject_empty: bool,
    ) -> ArchiveResult<PathBuf> {
        if let Some(parent) = destination.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let policy = self.http_handler.session().config().stream;
        let request = ArchiveRequest::get(url, policy);
        let response = self
            .http_handler
            .send(&request)
            .await?
            .ok_or_else(|| ArchiveError::not_found(request.url.to_string()))?;

        let partial_path = partial_path(destination);
        match Self::stream_to_file(response, &partial_path, expected, reject_empty).await {
            Ok(bytes) => {
                tokio::fs::rename(&partial_path, destination).await.map_err(|e| {
                    ArchiveError::PartialTransfer {
                        path: destination.to_path_buf(),
                        reason: format!("can't move partial download into place: {}", e),
                    }
                })?;
                tracing::info!(
                    "Downloaded {} ({} bytes) to {}",
                    request.url,
                    bytes,
                    destination.display()
                );
                Ok(destination.to_path_buf())
            }
            Err(reason) => {
                if let Err(e) = tokio::fs::remove_file(&partial_path).await {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        tracing::warn!(
                            "Failed removing partial download {}: {}",
                            partial_path.display(),
                            e
                        );
                    }
                }
                tracing::error!("Download of {} failed: {}", request.url, reason);
                Err(ArchiveError::PartialTransfer {
                    path: destination.to_path_buf(),
                    reason,
                })
            }
        }
    }

    /// Streams the body into `path`, returning the byte count
    async fn stream_to_file(
        response: reqwest::Response,
        path: &Path,
        expected: Option<Md5Hash>,
        reject_empty: bool,
    ) -> Result<u64, String> {
        let mut file = File::create(path)
            .await
            .map_err(|e| format!("can't create {}: {}", path.display(), e))?;
        let mut context = md5::Context::new();
        let mut written = 0u64;

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| format!("body broke off after {} bytes: {}", written, e))?;
            context.consume(&chunk);
            file.write_all(&chunk)
                .await
                .map_err(|e| format!("write failed: {}", e))?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(|e| format!("flush failed: {}", e))?;

        if reject_empty && written == 0 {
            return Err("server returned an empty body".to_string());
        }

        let actual: Md5Hash = context.compute().into();
        match expected {
            Some(expected) if expected != actual => Err(format!(
                "digest mismatch: expected {}, got {}",
                expected, actual
            )),
            _ => Ok(written),
        }
    }
}

/// `<destination>.part`, next to the destination
pub fn partial_path(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(files::PARTIAL_FILE_SUFFIX);
    destination.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_path_keeps_extension() {
        // Test that the partial file sits next to the destination
        let partial = partial_path(Path::new("/tmp/series_5.zip"));
        assert_eq!(partial, PathBuf::from("/tmp/series_5.zip.part"));
    }

    #[test]
    fn test_partial_path_no_extension() {
        let partial = partial_path(Path::new("/tmp/notes"));
        assert_eq!(partial, PathBuf::from("/tmp/notes.part"));
    }
}
