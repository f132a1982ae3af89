//! MD5 digest type for catalog entries and transfer verification
//!
//! XNAT reports a hex MD5 digest for every file in a resource catalog. The
//! digest is the comparison key when reconciling resource folders and the
//! checksum a download is verified against, so it is stored as its raw
//! 16 bytes and compared byte-wise.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::ArchiveError;

/// MD5 digest stored as a 16-byte array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Md5Hash([u8; 16]);

impl Md5Hash {
    /// Parse a 32-character hex digest (case insensitive)
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use xnat_sync::app::Md5Hash;
    ///
    /// let hash = Md5Hash::from_hex("50c9d1c465f3cbff652be1509c2e2a4e")?;
    /// let hash_upper = Md5Hash::from_hex("50C9D1C465F3CBFF652BE1509C2E2A4E")?;
    /// assert_eq!(hash, hash_upper);
    /// # Ok::<(), xnat_sync::errors::ArchiveError>(())
    /// ```
    pub fn from_hex(hex: &str) -> Result<Self, ArchiveError> {
        let invalid = || ArchiveError::parse("MD5 digest", format!("'{}' is not 32 hex digits", hex));

        if hex.len() != 32 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(invalid());
        }

        let mut bytes = [0u8; 16];
        for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
            let pair = std::str::from_utf8(chunk).map_err(|_| invalid())?;
            bytes[i] = u8::from_str_radix(pair, 16).map_err(|_| invalid())?;
        }

        Ok(Md5Hash(bytes))
    }

    /// Digest of an in-memory buffer
    pub fn compute(data: &[u8]) -> Self {
        md5::compute(data).into()
    }

    /// Lowercase 32-character hex representation
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl From<md5::Digest> for Md5Hash {
    fn from(digest: md5::Digest) -> Self {
        Md5Hash(digest.0)
    }
}

impl fmt::Display for Md5Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for Md5Hash {
    type Err = ArchiveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

// Serialized as the hex string XNAT itself reports
impl Serialize for Md5Hash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Md5Hash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let hex_string = String::deserialize(deserializer)?;
        Self::from_hex(&hex_string).map_err(serde::de::Error::custom)
    }
}
