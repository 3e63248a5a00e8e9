//! The interface shared by digests and logs.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::keys::UrlKeys;
use crate::safety::Safety;
use crate::siginfo::SigInfo;

/// Which kind of container a file or record holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerKind {
    /// Probabilistic membership pre-filter.
    Digest,
    /// Authoritative verdict table.
    Log,
}

impl ContainerKind {
    /// Name used in container offers between peers.
    pub fn offer_name(&self) -> &'static str {
        match self {
            ContainerKind::Digest => "scandigestfile",
            ContainerKind::Log => "scanlogfile",
        }
    }

    /// Parse an offer name, case-insensitively.
    pub fn from_offer_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "scandigestfile" => Some(ContainerKind::Digest),
            "scanlogfile" => Some(ContainerKind::Log),
            _ => None,
        }
    }

    /// Suffix appended to file names and URLs of this kind.
    pub fn suffix(&self) -> &'static str {
        match self {
            ContainerKind::Digest => "",
            ContainerKind::Log => ".log",
        }
    }
}

impl fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.offer_name())
    }
}

/// A capacity-bounded, file-backed store of scan verdicts sharing one [`SigInfo`].
///
/// `add` fails with [`CoreError::ContainerFull`](crate::CoreError::ContainerFull)
/// once `len() >= capacity()`; rotating to a fresh container is the caller's job.
pub trait ScanContainer: Sized + Send + 'static {
    /// Kind tag for records and offers.
    const KIND: ContainerKind;

    /// Create an empty container bound to `siginfo`, to be saved at `path`.
    fn create(capacity: u32, siginfo: SigInfo, path: &Path) -> Self;

    /// Load and validate a container file. Never returns a partial container.
    fn load(path: &Path) -> Result<Self>;

    /// Persist pending changes, verifying the write.
    fn save(&mut self) -> Result<()>;

    /// Store the object's keys with its verdict. Returns true if newly stored.
    fn add(&mut self, keys: &UrlKeys, safety: Safety) -> Result<bool>;

    /// Look up an object. Digests answer presence only.
    fn lookup(&self, keys: &UrlKeys) -> Option<Safety>;

    /// Number of objects stored.
    fn len(&self) -> u32;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn capacity(&self) -> u32;

    fn siginfo(&self) -> &SigInfo;

    fn path(&self) -> &Path;

    /// Remember the hit counter alongside the data, where the format allows it.
    fn record_hits(&mut self, _hits: u64) {}
}
