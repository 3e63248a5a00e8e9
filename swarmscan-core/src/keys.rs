//! Lookup keys for objects stored in containers.

use std::fmt;
use std::io::Read;
use std::path::Path;

use sha2::{Digest as _, Sha256};

use crate::error::Result;

/// The two keys an object is stored under: a hash of its URL and, when the
/// content is known, a hash of its content hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UrlKeys {
    /// Hex SHA-256 of the URL, empty when the URL is empty.
    pub url: String,
    /// Hex SHA-256 of the content hash, if one is known.
    pub content: Option<String>,
}

impl UrlKeys {
    /// Derive keys for a URL and optional content hash.
    pub fn new(url: &str, content_hash: Option<&str>) -> Self {
        let url = if url.is_empty() {
            String::new()
        } else {
            sha256_hex(url.as_bytes())
        };
        let content = content_hash
            .filter(|h| !h.is_empty())
            .map(|h| sha256_hex(h.as_bytes()));
        Self { url, content }
    }

    /// True when neither key is available. Empty keys are never stored.
    pub fn is_empty(&self) -> bool {
        self.url.is_empty() && self.content.is_none()
    }

    /// Non-empty keys, URL key first.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.url.as_str())
            .filter(|k| !k.is_empty())
            .chain(self.content.as_deref())
    }
}

impl fmt::Display for UrlKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.url, self.content.as_deref().unwrap_or("-"))
    }
}

/// Hex SHA-256 of a byte slice.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Hex SHA-256 of a file's contents, read in chunks.
pub fn file_sha256(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
