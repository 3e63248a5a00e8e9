//! Scanner signature information.

use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Identifies what "malicious" meant when a scan was produced: the scanner
/// (vendor and version), the signature database version and its date.
///
/// Equality ignores sub-second differences in `sig_date`, so scans grouped by
/// signature do not split on timestamp noise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigInfo {
    /// Scanner vendor and version
    pub scanner: String,
    /// Version of the signature set in use
    pub sig_version: String,
    /// When the signature set was last updated
    pub sig_date: DateTime<Utc>,
}

impl SigInfo {
    /// Create signature info from its parts.
    pub fn new(scanner: impl Into<String>, sig_version: impl Into<String>, sig_date: DateTime<Utc>) -> Self {
        Self {
            scanner: scanner.into(),
            sig_version: sig_version.into(),
            sig_date,
        }
    }

    /// Build signature info from a signature date given in epoch seconds.
    ///
    /// Out-of-range timestamps clamp to the epoch.
    pub fn from_epoch(scanner: impl Into<String>, sig_version: impl Into<String>, epoch: i64) -> Self {
        let sig_date = Utc
            .timestamp_opt(epoch, 0)
            .single()
            .unwrap_or_default();
        Self::new(scanner, sig_version, sig_date)
    }

    /// Signature date in whole seconds since the epoch.
    pub fn sig_epoch(&self) -> i64 {
        self.sig_date.timestamp()
    }

    /// Age of the signature set in fractional days, relative to `now`.
    pub fn age_days(&self, now: DateTime<Utc>) -> f64 {
        (now - self.sig_date).num_seconds() as f64 / 86_400.0
    }
}

impl PartialEq for SigInfo {
    fn eq(&self, other: &Self) -> bool {
        self.scanner == other.scanner
            && self.sig_version == other.sig_version
            && self.sig_epoch() == other.sig_epoch()
    }
}

impl Eq for SigInfo {}

impl Hash for SigInfo {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.scanner.hash(state);
        self.sig_version.hash(state);
        self.sig_epoch().hash(state);
    }
}

impl fmt::Display for SigInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} / {} ({})",
            self.scanner,
            self.sig_version,
            self.sig_date.format("%Y-%m-%d %H:%M:%S")
        )
    }
}
