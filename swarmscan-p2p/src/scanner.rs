//! Local malware scanner adapters.

use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use swarmscan_core::SigInfo;

use crate::error::{P2pError, Result};

/// A local scanner: reports its signature set and scans files.
pub trait ScanHandler: Send + Sync {
    /// Signature set currently in use.
    fn sig_info(&self) -> SigInfo;

    /// Scan a file, returning true if it is malicious.
    fn scan(&self, path: &Path) -> Result<bool>;
}

/// Flags any file with a line starting with `evil`.
#[derive(Debug, Clone)]
pub struct DummyScanner {
    siginfo: SigInfo,
}

impl DummyScanner {
    /// A dummy scanner whose signatures date from now.
    pub fn new() -> Self {
        let now = Utc::now().timestamp();
        Self::with_siginfo(SigInfo::new("dummy 1.0", "1.0", Utc.timestamp_opt(now, 0).single().unwrap_or_default()))
    }

    pub fn with_siginfo(siginfo: SigInfo) -> Self {
        Self { siginfo }
    }
}

impl Default for DummyScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl ScanHandler for DummyScanner {
    fn sig_info(&self) -> SigInfo {
        self.siginfo.clone()
    }

    fn scan(&self, path: &Path) -> Result<bool> {
        let reader = BufReader::new(std::fs::File::open(path)?);
        for line in reader.split(b'\n') {
            if line?.starts_with(b"evil") {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// Look up a scan handler by its configured name.
pub fn scanner_by_name(name: &str) -> Result<Arc<dyn ScanHandler>> {
    match name {
        "dummy" => Ok(Arc::new(DummyScanner::new())),
        other => Err(P2pError::UnknownScanner(other.to_string())),
    }
}
