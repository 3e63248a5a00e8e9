//! Scan logs: the authoritative verdict table paired with each digest.
//!
//! A log maps every stored key to `"1"` (malicious) or `"0"` (benign). The
//! table is persisted as one bincode-encoded map, with container metadata kept
//! in the same map under reserved keys.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, warn};

use crate::container::{ContainerKind, ScanContainer};
use crate::error::{CoreError, Result};
use crate::keys::UrlKeys;
use crate::persist::write_verified;
use crate::safety::Safety;
use crate::siginfo::SigInfo;

pub const DEFAULT_LOG_CAPACITY: u32 = 500;
pub const UNKNOWN_SCANNER: &str = "Unknown Scanner Version";
pub const UNKNOWN_SIG_VERSION: &str = "Unknown Signature Version";

const KEY_CAPACITY: &str = "maxcapacity";
const KEY_SCANNER: &str = "scannervv";
const KEY_SIG_VERSION: &str = "sigversion";
const KEY_SIG_TIMESTAMP: &str = "sigtimestamp";
const KEY_URL_COUNT: &str = "urlcount";
const KEY_HITS: &str = "hits";

const RESERVED_KEYS: [&str; 6] = [
    KEY_CAPACITY,
    KEY_SCANNER,
    KEY_SIG_VERSION,
    KEY_SIG_TIMESTAMP,
    KEY_URL_COUNT,
    KEY_HITS,
];

const MALICIOUS: &str = "1";
const BENIGN: &str = "0";

/// Persistent key to verdict table.
#[derive(Debug, Clone)]
pub struct ScanLog {
    entries: BTreeMap<String, String>,
    capacity: u32,
    url_count: u32,
    hits: u64,
    siginfo: SigInfo,
    path: PathBuf,
    saved: bool,
}

impl ScanLog {
    /// Stored verdict for a single key, if present.
    pub fn get(&self, key: &str) -> Option<bool> {
        self.entries.get(key).map(|v| v == MALICIOUS)
    }

    /// Hit counter as last recorded.
    pub fn hits(&self) -> u64 {
        self.hits
    }

    /// Number of distinct keys in the table.
    pub fn key_count(&self) -> usize {
        self.entries.len()
    }

    pub fn is_saved(&self) -> bool {
        self.saved
    }

    /// Serialize entries and metadata into one buffer.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut table = self.entries.clone();
        table.insert(KEY_CAPACITY.into(), self.capacity.to_string());
        table.insert(KEY_SCANNER.into(), self.siginfo.scanner.clone());
        table.insert(KEY_SIG_VERSION.into(), self.siginfo.sig_version.clone());
        table.insert(KEY_SIG_TIMESTAMP.into(), self.siginfo.sig_epoch().to_string());
        table.insert(KEY_URL_COUNT.into(), self.url_count.to_string());
        table.insert(KEY_HITS.into(), self.hits.to_string());
        Ok(bincode::serialize(&table)?)
    }

    /// Parse a log table. Missing metadata falls back to defaults.
    pub fn from_bytes(bytes: &[u8], path: &Path) -> Result<Self> {
        let mut table: BTreeMap<String, String> = bincode::deserialize(bytes)
            .map_err(|e| CoreError::InvalidContainer(format!("scan log table: {}", e)))?;

        let capacity = take_parsed(&mut table, KEY_CAPACITY).unwrap_or(DEFAULT_LOG_CAPACITY);
        let scanner = table
            .remove(KEY_SCANNER)
            .unwrap_or_else(|| UNKNOWN_SCANNER.to_string());
        let sig_version = table
            .remove(KEY_SIG_VERSION)
            .unwrap_or_else(|| UNKNOWN_SIG_VERSION.to_string());
        let sig_epoch = take_parsed(&mut table, KEY_SIG_TIMESTAMP).unwrap_or_else(|| Utc::now().timestamp());
        let url_count = take_parsed(&mut table, KEY_URL_COUNT).unwrap_or(0);
        let hits = take_parsed(&mut table, KEY_HITS).unwrap_or(0);

        if let Some((key, value)) = table.iter().find(|(_, v)| *v != MALICIOUS && *v != BENIGN) {
            return Err(CoreError::InvalidContainer(format!(
                "scan log entry {} has value {:?}",
                key, value
            )));
        }
        if url_count > capacity {
            return Err(CoreError::InvalidContainer(format!(
                "scan log holds {} urls but capacity is {}",
                url_count, capacity
            )));
        }

        Ok(Self {
            entries: table,
            capacity,
            url_count,
            hits,
            siginfo: SigInfo::from_epoch(scanner, sig_version, sig_epoch),
            path: path.to_path_buf(),
            saved: true,
        })
    }
}

fn take_parsed<T: std::str::FromStr>(table: &mut BTreeMap<String, String>, key: &str) -> Option<T> {
    let raw = table.remove(key)?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "ignoring unparsable scan log metadata");
            None
        }
    }
}

impl ScanContainer for ScanLog {
    const KIND: ContainerKind = ContainerKind::Log;

    fn create(capacity: u32, siginfo: SigInfo, path: &Path) -> Self {
        Self {
            entries: BTreeMap::new(),
            capacity,
            url_count: 0,
            hits: 0,
            siginfo,
            path: path.to_path_buf(),
            saved: false,
        }
    }

    fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let log = Self::from_bytes(&bytes, path)?;
        debug!(path = %path.display(), urls = log.url_count, "scan log loaded");
        Ok(log)
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

    fn add(&mut self, keys: &UrlKeys, safety: Safety) -> Result<bool> {
        if keys.is_empty() {
            return Ok(false);
        }
        if self.url_count >= self.capacity {
            return Err(CoreError::ContainerFull { capacity: self.capacity });
        }

        let value = if safety.malicious { MALICIOUS } else { BENIGN };
        let mut added = false;
        for key in keys.iter() {
            if RESERVED_KEYS.contains(&key) {
                continue;
            }
            let previous = self.entries.insert(key.to_string(), value.to_string());
            added |= previous.is_none();
        }
        self.saved = false;
        if added {
            self.url_count += 1;
        }
        Ok(added)
    }

    fn lookup(&self, keys: &UrlKeys) -> Option<Safety> {
        keys.iter()
            .find_map(|key| self.get(key))
            .map(|malicious| Safety::new(true, malicious))
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

    fn record_hits(&mut self, hits: u64) {
        if self.hits != hits {
            self.hits = hits;
            self.saved = false;
        }
    }
}
