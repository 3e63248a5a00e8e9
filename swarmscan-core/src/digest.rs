//! Scan digests: salted bloom filters over scanned objects.
//!
//! A digest answers "has this object possibly been scanned under this
//! signature set?" with no false negatives. It carries no verdict; a hit must
//! be resolved against the paired [`ScanLog`](crate::ScanLog).
//!
//! # File format
//!
//! A bincode header (little-endian fixed-width integers, `u64`
//! length-prefixed strings) followed by the raw filter bytes:
//!
//! | field           | type   |
//! |-----------------|--------|
//! | nonce           | u32    |
//! | capacity        | u32    |
//! | url_count       | u32    |
//! | scanner         | string |
//! | sig_version     | string |
//! | sig_epoch       | i64    |
//! | filter_bits     | u64    |
//! | filter_hashes   | u32    |
//! | filter_len      | u64    |
//!
//! The number of trailing bytes must equal `filter_len` exactly.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use bincode::Options;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::bloom::{BloomFilter, DEFAULT_FP_RATE};
use crate::container::{ContainerKind, ScanContainer};
use crate::error::{CoreError, Result};
use crate::keys::UrlKeys;
use crate::persist::write_verified;
use crate::safety::Safety;
use crate::siginfo::SigInfo;

/// Upper bound on the encoded header, strings included.
const MAX_HEADER_BYTES: u64 = 4096;

#[derive(Debug, Serialize, Deserialize)]
struct DigestHeader {
    nonce: u32,
    capacity: u32,
    url_count: u32,
    scanner: String,
    sig_version: String,
    sig_epoch: i64,
    filter_bits: u64,
    filter_hashes: u32,
    filter_len: u64,
}

fn header_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
        .with_limit(MAX_HEADER_BYTES)
        .allow_trailing_bytes()
}

/// A salted, capacity-bounded membership set.
#[derive(Debug, Clone)]
pub struct Digest {
    nonce: u32,
    capacity: u32,
    url_count: u32,
    siginfo: SigInfo,
    filter: BloomFilter,
    path: PathBuf,
    saved: bool,
}

impl Digest {
    /// Random salt mixed into every bit position of this digest.
    pub fn nonce(&self) -> u32 {
        self.nonce
    }

    /// Whether the in-memory state matches the file on disk.
    pub fn is_saved(&self) -> bool {
        self.saved
    }

    /// Serialize header and filter into one buffer.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let header = DigestHeader {
            nonce: self.nonce,
            capacity: self.capacity,
            url_count: self.url_count,
            scanner: self.siginfo.scanner.clone(),
            sig_version: self.siginfo.sig_version.clone(),
            sig_epoch: self.siginfo.sig_epoch(),
            filter_bits: self.filter.num_bits(),
            filter_hashes: self.filter.num_hashes(),
            filter_len: self.filter.as_bytes().len() as u64,
        };
        let mut bytes = header_options().serialize(&header)?;
        bytes.extend_from_slice(self.filter.as_bytes());
        Ok(bytes)
    }

    /// Parse a digest from bytes; `path` is remembered for later saves.
    pub fn from_bytes(bytes: &[u8], path: &Path) -> Result<Self> {
        let mut cursor = Cursor::new(bytes);
        let header: DigestHeader = header_options()
            .deserialize_from(&mut cursor)
            .map_err(|e| CoreError::InvalidContainer(format!("digest header: {}", e)))?;

        let rest = &bytes[cursor.position() as usize..];
        if rest.len() as u64 != header.filter_len {
            return Err(CoreError::InvalidContainer(format!(
                "digest filter is {} bytes, header declares {}",
                rest.len(),
                header.filter_len
            )));
        }
        if header.url_count > header.capacity {
            return Err(CoreError::InvalidContainer(format!(
                "digest holds {} urls but capacity is {}",
                header.url_count, header.capacity
            )));
        }

        let filter = BloomFilter::from_parts(header.filter_bits, header.filter_hashes, rest.to_vec())?;
        let siginfo = SigInfo::from_epoch(header.scanner, header.sig_version, header.sig_epoch);

        Ok(Self {
            nonce: header.nonce,
            capacity: header.capacity,
            url_count: header.url_count,
            siginfo,
            filter,
            path: path.to_path_buf(),
            saved: true,
        })
    }

    fn add_key(&mut self, key: &str) -> bool {
        self.filter.insert(self.nonce, key.as_bytes())
    }
}

impl ScanContainer for Digest {
    const KIND: ContainerKind = ContainerKind::Digest;

    fn create(capacity: u32, siginfo: SigInfo, path: &Path) -> Self {
        // Each object contributes up to two keys
        let filter = BloomFilter::with_capacity(capacity as usize * 2, DEFAULT_FP_RATE);
        Self {
            nonce: rand::thread_rng().gen(),
            capacity,
            url_count: 0,
            siginfo,
            filter,
            path: path.to_path_buf(),
            saved: false,
        }
    }

    fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let digest = Self::from_bytes(&bytes, path)?;
        debug!(path = %path.display(), urls = digest.url_count, "digest loaded");
        Ok(digest)
    }

    fn save(&mut self) -> Result<()> {
        if self.saved {
            return Ok(());
        }
        let bytes = self.to_bytes()?;
        write_verified(&self.path, &bytes)?;
        self.saved = true;
        Ok(())
    }

    fn add(&mut self, keys: &UrlKeys, _safety: Safety) -> Result<bool> {
        if keys.is_empty() {
            return Ok(false);
        }
        if self.url_count >= self.capacity {
            return Err(CoreError::ContainerFull { capacity: self.capacity });
        }

        self.saved = false;
        let mut added = false;
        if let Some(content) = keys.content.as_deref() {
            added |= self.add_key(content);
        }
        if !keys.url.is_empty() {
            added |= self.add_key(&keys.url);
        }
        if added {
            self.url_count += 1;
        }
        Ok(added)
    }

    fn lookup(&self, keys: &UrlKeys) -> Option<Safety> {
        let found = keys
            .iter()
            .any(|key| self.filter.contains(self.nonce, key.as_bytes()));
        // Maliciousness is meaningless for a pre-filter hit
        found.then_some(Safety::MALICIOUS)
    }

    fn len(&self) -> u32 {
        self.url_count
    }

    fn capacity(&self) -> u32 {
        self.capacity
    }

    fn siginfo(&self) -> &SigInfo {
        &self.siginfo
    }

    fn path(&self) -> &Path {
        &self.path
    }
}
