//! Scan results, local or supplied by peers.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::container::ContainerKind;
use crate::error::{CoreError, Result};
use crate::keys::UrlKeys;
use crate::safety::Safety;
use crate::siginfo::SigInfo;

/// Where a scan came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScanOrigin {
    /// Produced by our own scanner.
    Local,
    /// Returned by a peer in answer to an active scan request.
    SocialActive,
    /// Resolved from a peer's container.
    SocialAggregate,
}

impl fmt::Display for ScanOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ScanOrigin::Local => "local",
            ScanOrigin::SocialActive => "social-active",
            ScanOrigin::SocialAggregate => "social-aggregate",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    Unknown,
    Benign,
    Malicious,
}

impl Classification {
    pub fn from_malicious(malicious: bool) -> Self {
        if malicious {
            Classification::Malicious
        } else {
            Classification::Benign
        }
    }

    /// Verdict for this classification. Unknown never reads as benign.
    pub fn safety(&self) -> Safety {
        match self {
            Classification::Unknown => Safety::POSSIBLY_MALICIOUS,
            Classification::Benign => Safety::BENIGN,
            Classification::Malicious => Safety::MALICIOUS,
        }
    }
}

/// One scan of one object.
///
/// Immutable once stored, apart from `tainted` and the `digested`/`logged`
/// inclusion flags. Verdict and signature accessors refuse tainted scans.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scan {
    /// Assigned by the store on insert.
    pub id: u64,
    /// Peer this record belongs to.
    pub owner: String,
    pub origin: ScanOrigin,
    pub url: String,
    pub content_hash: Option<String>,
    pub file_size: Option<u64>,
    pub classification: Classification,
    sig: SigInfo,
    /// Peer who supplied an active scan to us, or who asked us for a local one.
    pub peer: Option<String>,
    /// Queued request this scan answers.
    pub request: Option<u64>,
    /// Sent request this scan fulfils.
    pub sent_request: Option<u64>,
    pub tainted: bool,
    pub timestamp: DateTime<Utc>,
    pub scan_ms: Option<u64>,
    pub retrieve_ms: Option<u64>,
    pub digested: bool,
    pub logged: bool,
}

impl Scan {
    pub fn new(
        owner: impl Into<String>,
        origin: ScanOrigin,
        url: impl Into<String>,
        malicious: bool,
        siginfo: SigInfo,
    ) -> Self {
        Self {
            id: 0,
            owner: owner.into(),
            origin,
            url: url.into(),
            content_hash: None,
            file_size: None,
            classification: Classification::from_malicious(malicious),
            sig: siginfo,
            peer: None,
            request: None,
            sent_request: None,
            tainted: false,
            timestamp: Utc::now(),
            scan_ms: None,
            retrieve_ms: None,
            digested: false,
            logged: false,
        }
    }

    pub fn with_hash(mut self, hash: Option<String>) -> Self {
        self.content_hash = hash.filter(|h| !h.is_empty());
        self
    }

    pub fn with_size(mut self, size: Option<u64>) -> Self {
        self.file_size = size;
        self
    }

    pub fn with_peer(mut self, peer: impl Into<String>) -> Self {
        self.peer = Some(peer.into());
        self
    }

    /// Verdict carried by this scan.
    pub fn safety(&self) -> Result<Safety> {
        if self.tainted {
            return Err(CoreError::TaintedScan);
        }
        Ok(self.classification.safety())
    }

    /// Signature set this scan was produced with.
    pub fn siginfo(&self) -> Result<&SigInfo> {
        if self.tainted {
            return Err(CoreError::TaintedScan);
        }
        Ok(&self.sig)
    }

    /// Flag the scan as tainted and return the peer whose trust must be punished.
    pub fn taint(&mut self) -> Result<String> {
        let peer = self.peer.clone().ok_or_else(|| {
            CoreError::NotImplemented(format!("tainting scan {} which has no supplying peer", self.id))
        })?;
        self.tainted = true;
        Ok(peer)
    }

    /// Lookup keys for the scanned object.
    pub fn keys(&self) -> UrlKeys {
        UrlKeys::new(&self.url, self.content_hash.as_deref())
    }

    /// Whether this scan has been folded into a container of `kind`.
    pub fn included_in(&self, kind: ContainerKind) -> bool {
        match kind {
            ContainerKind::Digest => self.digested,
            ContainerKind::Log => self.logged,
        }
    }

    pub fn mark_included(&mut self, kind: ContainerKind) {
        match kind {
            ContainerKind::Digest => self.digested = true,
            ContainerKind::Log => self.logged = true,
        }
    }
}

impl fmt::Display for Scan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Scan(id={}, {}, {}, {}, {:?}, hash={}, peer={}, tainted={})",
            self.id,
            self.owner,
            self.origin,
            self.url,
            self.classification,
            self.content_hash.as_deref().unwrap_or("-"),
            self.peer.as_deref().unwrap_or("-"),
            self.tainted
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(malicious: bool) -> Scan {
        Scan::new("alice", ScanOrigin::Local, "http://a/", malicious, SigInfo::from_epoch("dummy", "1", 0))
    }

    #[test]
    fn test_tainted_scan_refuses_verdict() {
        let mut s = scan(false).with_peer("bob");
        assert_eq!(s.safety().unwrap(), Safety::BENIGN);
        assert_eq!(s.taint().unwrap(), "bob");
        assert!(matches!(s.safety(), Err(CoreError::TaintedScan)));
        assert!(matches!(s.siginfo(), Err(CoreError::TaintedScan)));
    }

    #[test]
    fn test_peerless_scan_cannot_be_tainted() {
        let mut s = scan(true);
        assert!(matches!(s.taint(), Err(CoreError::NotImplemented(_))));
        assert!(!s.tainted);
    }

    #[test]
    fn test_unknown_is_possibly_malicious() {
        assert_eq!(Classification::Unknown.safety(), Safety::POSSIBLY_MALICIOUS);
    }

    #[test]
    fn test_empty_hash_is_none() {
        let s = scan(false).with_hash(Some(String::new()));
        assert_eq!(s.content_hash, None);
        assert_eq!(s.keys().iter().count(), 1);
    }

    #[test]
    fn test_origin_serializes_kebab_case() {
        let json = serde_json::to_string(&ScanOrigin::SocialActive).unwrap();
        assert_eq!(json, "\"social-active\"");
    }
}
