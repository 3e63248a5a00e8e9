//! Cross-peer request state.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use swarmscan_core::ContainerKind;

use crate::error::P2pError;

/// Length of a sent scan request key.
pub const KEY_LENGTH: usize = 16;

const KEY_ALPHABET: &[u8] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789!\"#$%&'()*+,-./:;<=>?@[\\]^_`{|}~";

/// Progress of a queued request: received, then processed, then done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestState {
    Received,
    Processed,
    Done,
}

/// What a peer asked of us.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestKind {
    #[serde(rename = "active-scan")]
    ActiveScan,
    #[serde(rename = "scandigestfile-offer")]
    DigestOffer,
    #[serde(rename = "scanlogfile-offer")]
    LogOffer,
}

impl RequestKind {
    /// Offer kind for a container kind.
    pub fn offer(kind: ContainerKind) -> Self {
        match kind {
            ContainerKind::Digest => RequestKind::DigestOffer,
            ContainerKind::Log => RequestKind::LogOffer,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::ActiveScan => "active-scan",
            RequestKind::DigestOffer => "scandigestfile-offer",
            RequestKind::LogOffer => "scanlogfile-offer",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestKind {
    type Err = P2pError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active-scan" => Ok(RequestKind::ActiveScan),
            "scandigestfile-offer" => Ok(RequestKind::DigestOffer),
            "scanlogfile-offer" => Ok(RequestKind::LogOffer),
            other => Err(P2pError::Protocol(format!("unknown request type {}", other))),
        }
    }
}

/// A request received from a peer, waiting to be served.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedRequest {
    /// Assigned by the store on insert.
    pub id: u64,
    pub owner: String,
    pub peer: String,
    pub kind: RequestKind,
    pub url: String,
    pub key: Option<String>,
    pub state: RequestState,
    pub received: DateTime<Utc>,
    pub fulfilled: Option<DateTime<Utc>>,
}

impl QueuedRequest {
    pub fn new(owner: &str, kind: RequestKind, peer: &str, url: &str, key: Option<String>) -> Self {
        Self {
            id: 0,
            owner: owner.to_string(),
            peer: peer.to_string(),
            kind,
            url: url.to_string(),
            key,
            state: RequestState::Received,
            received: Utc::now(),
            fulfilled: None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.state == RequestState::Done
    }

    /// Same request as another, ignoring state. Retried calls match.
    pub fn same_as(&self, other: &QueuedRequest) -> bool {
        self.owner == other.owner
            && self.kind == other.kind
            && self.peer == other.peer
            && self.url == other.url
            && self.key == other.key
    }

    /// Move to `Done` and stamp the fulfilment time.
    pub fn finish(&mut self) {
        self.state = RequestState::Done;
        self.fulfilled = Some(Utc::now());
    }
}

/// An active scan request we sent to a peer, awaiting its result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentScanRequest {
    /// Assigned by the store on insert.
    pub id: u64,
    pub owner: String,
    pub peer: String,
    pub url: String,
    pub key: String,
}

impl SentScanRequest {
    /// New request with a freshly generated key.
    pub fn new(owner: &str, url: &str, peer: &str) -> Self {
        Self {
            id: 0,
            owner: owner.to_string(),
            peer: peer.to_string(),
            url: url.to_string(),
            key: Self::generate_key(),
        }
    }

    /// Random key of letters, digits and punctuation.
    pub fn generate_key() -> String {
        let mut rng = rand::thread_rng();
        (0..KEY_LENGTH)
            .filter_map(|_| KEY_ALPHABET.choose(&mut rng).map(|b| *b as char))
            .collect()
    }

    /// Whether this request correlates with a reply.
    pub fn matches(&self, owner: &str, peer: &str, url: &str, key: &str) -> bool {
        self.owner == owner && self.peer == peer && self.url == url && self.key == key
    }
}
