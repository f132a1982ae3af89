//! Resource catalog parsing
//!
//! Listing the files of a resource folder returns an XML catalog in the
//! `http://nrg.wustl.edu/catalog` namespace with one `entry` element per
//! file. Entries outside that namespace are ignored.

use quick_xml::events::{BytesStart, Event};
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::reader::NsReader;
use serde::Serialize;

use crate::app::hash::Md5Hash;
use crate::constants::xnat;
use crate::errors::{ArchiveError, ArchiveResult};

/// A single file inside a resource folder
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceFile {
    /// Path of the file within the folder, possibly percent-encoded
    pub uri: String,
    pub id: String,
    pub digest: Option<Md5Hash>,
    pub size: Option<u64>,
    pub format: Option<String>,
    pub content: Option<String>,
}

impl ResourceFile {
    /// The URI with percent-escapes decoded, as used for upload file names
    pub fn decoded_uri(&self) -> String {
        let bytes = urlencoding::decode_binary(self.uri.as_bytes());
        String::from_utf8_lossy(&bytes).into_owned()
    }

    fn from_element(element: &BytesStart<'_>) -> ArchiveResult<Option<Self>> {
        let mut uri = None;
        let mut id = String::new();
        let mut digest = None;
        let mut size = None;
        let mut format = None;
        let mut content = None;

        for attr in element.attributes().flatten() {
            let key = String::from_utf8_lossy(attr.key.local_name().into_inner()).to_string();
            let value = attr
                .unescape_value()
                .map_err(|e| ArchiveError::parse("resource catalog", e))?
                .into_owned();

            match key.as_str() {
                "URI" => uri = Some(value),
                "ID" => id = value,
                "digest" if !value.is_empty() => match Md5Hash::from_hex(&value) {
                    Ok(hash) => digest = Some(hash),
                    Err(e) => tracing::debug!("Ignoring catalog digest: {}", e),
                },
                "size" => size = value.parse().ok(),
                "format" if !value.is_empty() => format = Some(value),
                "content" if !value.is_empty() => content = Some(value),
                _ => {}
            }
        }

        // An entry without a URI can't be downloaded or compared
        Ok(uri.map(|uri| Self {
            uri,
            id,
            digest,
            size,
            format,
            content,
        }))
    }
}

/// Parse a resource catalog into its file entries
///
/// # Errors
///
/// Returns `ArchiveError::Parse` if the document is not well-formed XML.
pub fn parse_catalog(xml: &str) -> ArchiveResult<Vec<ResourceFile>> {
    let mut reader = NsReader::from_str(xml);
    reader.config_mut().trim_text(true);

    let catalog_ns = Namespace(xnat::CATALOG_NAMESPACE.as_bytes());
    let mut files = Vec::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_resolved_event_into(&mut buf) {
            Ok((ResolveResult::Bound(ns), Event::Start(ref e)))
            | Ok((ResolveResult::Bound(ns), Event::Empty(ref e)))
                if ns == catalog_ns && e.local_name().into_inner() == b"entry" =>
            {
                if let Some(file) = ResourceFile::from_element(e)? {
                    files.push(file);
                }
            }
            Ok((_, Event::Eof)) => break,
            Err(e) => return Err(ArchiveError::parse("resource catalog", e)),
            _ => {}
        }
        buf.clear();
    }

    Ok(files)
}
