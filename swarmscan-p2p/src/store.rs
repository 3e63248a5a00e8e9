//! Relational records: peers, relationships, scans, containers and requests.
//!
//! [`Store`] is the seam to whatever relational backend holds these records.
//! [`MemoryStore`] keeps them in memory behind a mutex and can snapshot the
//! whole set to a JSON file between runs. Every operation is atomic with
//! respect to the others.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use swarmscan_core::{ContainerKind, ContainerRecord, Scan, ScanOrigin};
use tracing::{debug, info, warn};

use crate::error::{P2pError, Result};
use crate::peer::Peer;
use crate::request::{QueuedRequest, RequestKind, SentScanRequest};
use crate::trust::Relationship;

/// Filter for scans relevant to one object.
#[derive(Debug, Clone, Default)]
pub struct ScanQuery<'a> {
    pub url: &'a str,
    /// Only scans of objects with this size, when known.
    pub size: Option<u64>,
    /// Only scans of objects with this content hash, when known.
    pub hash: Option<&'a str>,
}

impl<'a> ScanQuery<'a> {
    pub fn url(url: &'a str) -> Self {
        Self { url, size: None, hash: None }
    }

    fn matches(&self, scan: &Scan) -> bool {
        if scan.url != self.url || scan.tainted {
            return false;
        }
        if let (Some(want), Some(have)) = (self.hash, scan.content_hash.as_deref()) {
            if want != have {
                return false;
            }
        }
        if let (Some(want), Some(have)) = (self.size, scan.file_size) {
            if want != have {
                return false;
            }
        }
        true
    }
}

/// Persistence for everything except container files.
pub trait Store: Send + Sync {
    fn upsert_peer(&self, peer: Peer);
    fn peer(&self, name: &str) -> Option<Peer>;
    fn peers(&self) -> Vec<Peer>;

    fn upsert_relationship(&self, relationship: Relationship);
    fn relationship(&self, peer: &str) -> Option<Relationship>;
    fn relationships(&self) -> Vec<Relationship>;
    /// Known peers with perceived distance at most `max_distance`, closest first.
    fn peers_within(&self, max_distance: f64) -> Vec<(Peer, Relationship)>;

    /// Insert a scan, returning it with its assigned id.
    fn insert_scan(&self, scan: Scan) -> Scan;
    fn update_scan(&self, scan: &Scan) -> Result<()>;
    fn scan(&self, id: u64) -> Option<Scan>;
    /// Untainted scans of the queried object, oldest first.
    fn relevant_scans(&self, query: &ScanQuery<'_>) -> Vec<Scan>;
    /// Local scans not yet folded into a container of `kind`, oldest first.
    /// Logs only take scans that are already digested.
    fn pending_local_scans(&self, kind: ContainerKind) -> Vec<Scan>;

    fn insert_container(&self, record: ContainerRecord) -> ContainerRecord;
    fn update_container(&self, record: &ContainerRecord) -> Result<()>;
    fn container(&self, id: u64) -> Option<ContainerRecord>;
    fn containers(&self, kind: ContainerKind) -> Vec<ContainerRecord>;

    fn insert_request(&self, request: QueuedRequest) -> QueuedRequest;
    /// A stored request equal to `request` in everything but id and state.
    fn find_request(&self, request: &QueuedRequest) -> Option<QueuedRequest>;
    fn update_request(&self, request: &QueuedRequest) -> Result<()>;
    /// Requests of `kind` not yet done, closest requesting peer first.
    fn pending_requests(&self, kind: RequestKind) -> Vec<QueuedRequest>;

    fn insert_sent_request(&self, request: SentScanRequest) -> SentScanRequest;
    fn find_sent_request(&self, owner: &str, peer: &str, url: &str, key: &str) -> Option<SentScanRequest>;
    fn remove_sent_request(&self, id: u64);
    /// The scan a peer returned for one of our sent requests.
    fn scan_for_sent_request(&self, sent: u64) -> Option<Scan>;
    /// Peers we already sent a scan request for `url` to.
    fn asked_peers(&self, url: &str) -> HashSet<String>;

    /// Multiply a peer's perceived distance by `factor`.
    fn punish(&self, peer: &str, factor: f64) -> Result<()> {
        let mut rel = self
            .relationship(peer)
            .ok_or_else(|| P2pError::PeerNotKnown(peer.to_string()))?;
        rel.punish(factor);
        warn!(peer, distance = rel.perceived_distance, "peer punished");
        self.upsert_relationship(rel);
        Ok(())
    }
}

/// Taint a peer-supplied scan and punish the peer that supplied it.
pub fn mark_scan_tainted(store: &dyn Store, scan: &mut Scan, punishment: f64) -> Result<()> {
    let peer = scan.taint()?;
    store.punish(&peer, punishment)?;
    store.update_scan(scan)
}

/// Taint a foreign container and punish its creator.
pub fn mark_container_tainted(store: &dyn Store, record: &mut ContainerRecord, punishment: f64) -> Result<()> {
    let creator = record.taint()?;
    store.punish(&creator, punishment)?;
    store.update_container(record)
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Tables {
    next_id: u64,
    peers: BTreeMap<String, Peer>,
    relationships: BTreeMap<String, Relationship>,
    scans: BTreeMap<u64, Scan>,
    containers: BTreeMap<u64, ContainerRecord>,
    requests: BTreeMap<u64, QueuedRequest>,
    sent_requests: BTreeMap<u64, SentScanRequest>,
}

impl Tables {
    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn distance_of(&self, peer: &str) -> f64 {
        self.relationships
            .get(peer)
            .map(|r| r.perceived_distance)
            .unwrap_or(f64::INFINITY)
    }
}

fn by_distance(a: f64, b: f64) -> Ordering {
    a.partial_cmp(&b).unwrap_or(Ordering::Equal)
}

/// In-memory [`Store`] with JSON snapshots.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        // A panicked writer leaves whole records behind, never partial ones
        self.tables.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Restore from a snapshot, or start empty if there is none.
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!(path = %path.display(), "no store snapshot, starting empty");
            return Ok(Self::new());
        }
        let bytes = std::fs::read(path)?;
        let tables: Tables = serde_json::from_slice(&bytes)?;
        info!(
            path = %path.display(),
            peers = tables.peers.len(),
            scans = tables.scans.len(),
            containers = tables.containers.len(),
            "store restored"
        );
        Ok(Self { tables: Mutex::new(tables) })
    }

    /// Write all records to `path` through a temporary sibling.
    pub fn snapshot(&self, path: &Path) -> Result<()> {
        let json = {
            let tables = self.lock();
            serde_json::to_vec_pretty(&*tables)?
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        debug!(path = %path.display(), "store snapshot written");
        Ok(())
    }
}

impl Store for MemoryStore {
    fn upsert_peer(&self, peer: Peer) {
        self.lock().peers.insert(peer.name.clone(), peer);
    }

    fn peer(&self, name: &str) -> Option<Peer> {
        self.lock().peers.get(name).cloned()
    }

    fn peers(&self) -> Vec<Peer> {
        self.lock().peers.values().cloned().collect()
    }

    fn upsert_relationship(&self, relationship: Relationship) {
        self.lock()
            .relationships
            .insert(relationship.peer.clone(), relationship);
    }

    fn relationship(&self, peer: &str) -> Option<Relationship> {
        self.lock().relationships.get(peer).cloned()
    }

    fn relationships(&self) -> Vec<Relationship> {
        self.lock().relationships.values().cloned().collect()
    }

    fn peers_within(&self, max_distance: f64) -> Vec<(Peer, Relationship)> {
        let tables = self.lock();
        let mut close: Vec<(Peer, Relationship)> = tables
            .relationships
            .values()
            .filter(|r| r.within(max_distance))
            .filter_map(|r| tables.peers.get(&r.peer).map(|p| (p.clone(), r.clone())))
            .collect();
        close.sort_by(|a, b| by_distance(a.1.perceived_distance, b.1.perceived_distance));
        close
    }

    fn insert_scan(&self, mut scan: Scan) -> Scan {
        let mut tables = self.lock();
        scan.id = tables.allocate_id();
        tables.scans.insert(scan.id, scan.clone());
        scan
    }

    fn update_scan(&self, scan: &Scan) -> Result<()> {
        let mut tables = self.lock();
        match tables.scans.get_mut(&scan.id) {
            Some(slot) => {
                *slot = scan.clone();
                Ok(())
            }
            None => Err(P2pError::Store(format!("scan {} does not exist", scan.id))),
        }
    }

    fn scan(&self, id: u64) -> Option<Scan> {
        self.lock().scans.get(&id).cloned()
    }

    fn relevant_scans(&self, query: &ScanQuery<'_>) -> Vec<Scan> {
        self.lock()
            .scans
            .values()
            .filter(|s| query.matches(s))
            .cloned()
            .collect()
    }

    fn pending_local_scans(&self, kind: ContainerKind) -> Vec<Scan> {
        self.lock()
            .scans
            .values()
            .filter(|s| s.origin == ScanOrigin::Local && !s.tainted && !s.included_in(kind))
            .filter(|s| kind == ContainerKind::Digest || s.digested)
            .cloned()
            .collect()
    }

    fn insert_container(&self, mut record: ContainerRecord) -> ContainerRecord {
        let mut tables = self.lock();
        record.id = tables.allocate_id();
        tables.containers.insert(record.id, record.clone());
        record
    }

    fn update_container(&self, record: &ContainerRecord) -> Result<()> {
        let mut tables = self.lock();
        match tables.containers.get_mut(&record.id) {
            Some(slot) => {
                *slot = record.clone();
                Ok(())
            }
            None => Err(P2pError::Store(format!("container {} does not exist", record.id))),
        }
    }

    fn container(&self, id: u64) -> Option<ContainerRecord> {
        self.lock().containers.get(&id).cloned()
    }

    fn containers(&self, kind: ContainerKind) -> Vec<ContainerRecord> {
        self.lock()
            .containers
            .values()
            .filter(|c| c.kind == kind)
            .cloned()
            .collect()
    }

    fn insert_request(&self, mut request: QueuedRequest) -> QueuedRequest {
        let mut tables = self.lock();
        request.id = tables.allocate_id();
        tables.requests.insert(request.id, request.clone());
        request
    }

    fn find_request(&self, request: &QueuedRequest) -> Option<QueuedRequest> {
        self.lock()
            .requests
            .values()
            .find(|r| r.same_as(request))
            .cloned()
    }

    fn update_request(&self, request: &QueuedRequest) -> Result<()> {
        let mut tables = self.lock();
        match tables.requests.get_mut(&request.id) {
            Some(slot) => {
                *slot = request.clone();
                Ok(())
            }
            None => Err(P2pError::Store(format!("request {} does not exist", request.id))),
        }
    }

    fn pending_requests(&self, kind: RequestKind) -> Vec<QueuedRequest> {
        let tables = self.lock();
        let mut pending: Vec<QueuedRequest> = tables
            .requests
            .values()
            .filter(|r| r.kind == kind && !r.is_done())
            .cloned()
            .collect();
        // Stable sort keeps arrival order among equally close peers
        pending.sort_by(|a, b| by_distance(tables.distance_of(&a.peer), tables.distance_of(&b.peer)));
        pending
    }

    fn insert_sent_request(&self, mut request: SentScanRequest) -> SentScanRequest {
        let mut tables = self.lock();
        request.id = tables.allocate_id();
        tables.sent_requests.insert(request.id, request.clone());
        request
    }

    fn find_sent_request(&self, owner: &str, peer: &str, url: &str, key: &str) -> Option<SentScanRequest> {
        self.lock()
            .sent_requests
            .values()
            .find(|r| r.matches(owner, peer, url, key))
            .cloned()
    }

    fn remove_sent_request(&self, id: u64) {
        self.lock().sent_requests.remove(&id);
    }

    fn scan_for_sent_request(&self, sent: u64) -> Option<Scan> {
        self.lock()
            .scans
            .values()
            .find(|s| s.sent_request == Some(sent))
            .cloned()
    }

    fn asked_peers(&self, url: &str) -> HashSet<String> {
        self.lock()
            .sent_requests
            .values()
            .filter(|r| r.url == url)
            .map(|r| r.peer.clone())
            .collect()
    }
}
