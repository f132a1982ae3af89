//! File uploads
//!
//! Uploads POST a local file as the raw request body. The file is re-opened
//! and streamed on every attempt, so a retried upload never resends a
//! half-consumed body.

use std::path::Path;

use url::Url;

use super::http::{ArchiveRequest, HttpHandler, RequestBody};
use crate::errors::{ArchiveError, ArchiveResult};

/// File upload operations handler
pub struct UploadHandler<'a> {
    http_handler: &'a HttpHandler,
}

impl<'a> UploadHandler<'a> {
    pub fn new(http_handler: &'a HttpHandler) -> Self {
        Self { http_handler }
    }

    /// POSTs the contents of `source` to `url`
    ///
    /// Empty sources are refused when `reject_empty` is set; DICOM archives
    /// pass it, plain resource files may legitimately be empty.
    ///
    /// # Errors
    ///
    /// Returns `ArchiveError` if:
    /// - `source` is missing, or empty with `reject_empty` set (`PartialTransfer`)
    /// - The archive has no endpoint at `url` (`NotFound`)
    /// - The archive rejects the upload (`Server`, with the matched failure)
    pub async fn upload_file(
        &self,
        url: Url,
        source: &Path,
        content_type: Option<&'static str>,
        reject_empty: bool,
    ) -> ArchiveResult<String> {
        let metadata = tokio::fs::metadata(source).await.map_err(|e| {
            ArchiveError::PartialTransfer {
                path: source.to_path_buf(),
                reason: format!("can't read upload source: {}", e),
            }
        })?;
        if reject_empty && metadata.len() == 0 {
            return Err(ArchiveError::PartialTransfer {
                path: source.to_path_buf(),
                reason: "refusing to upload an empty file".to_string(),
            });
        }

        let policy = self.http_handler.session().config().upload;
        let mut request = ArchiveRequest::post(url, policy)
            .with_body(RequestBody::File(source.to_path_buf()));
        if let Some(content_type) = content_type {
            request = request.with_content_type(content_type);
        }

        tracing::debug!(
            "Uploading {} ({} bytes) to {}",
            source.display(),
            metadata.len(),
            request.url
        );
        let response = self
            .http_handler
            .send_expecting(&request, request.url.as_str())
            .await?;
        let reply = response.text().await.unwrap_or_default();

        tracing::info!("Uploaded {} to {}", source.display(), request.url);
        Ok(reply)
    }
}
