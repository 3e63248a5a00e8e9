//! Container manager: our in-progress container plus a bounded working set
//! of containers retrieved from peers.
//!
//! One manager exists per container kind. Its periodic jobs are
//! [`update_ours`](ContainerManager::update_ours),
//! [`retrieve_offers`](ContainerManager::retrieve_offers) and
//! [`redeem_relationships`](ContainerManager::redeem_relationships);
//! request handling calls [`search`](ContainerManager::search). All of them
//! serialize on one state lock, and network calls are made with the lock
//! released.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use swarmscan_core::{ContainerRecord, CoreError, Safety, Scan, ScanContainer, SigInfo, UrlKeys};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{P2pError, Result};
use crate::protocol::{PeerCall, RpcReply};
use crate::request::RequestKind;
use crate::scanner::ScanHandler;
use crate::settings::ManagerSettings;
use crate::store::Store;
use crate::transport::PeerTransport;

/// A container that answered a search.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    /// Peer who built the container.
    pub creator: String,
    pub created: DateTime<Utc>,
    pub siginfo: SigInfo,
    /// Verdict. Digest hits are always (true, true) and carry presence only.
    pub safety: Safety,
}

struct Slot<C> {
    record: ContainerRecord,
    container: C,
}

impl<C: ScanContainer> Slot<C> {
    /// Drop from memory, flushing anything the container tracks on disk.
    fn unload(mut self) {
        if let Err(e) = self.container.save() {
            warn!(path = %self.record.path.display(), error = %e, "failed to flush container on unload");
        }
        debug!(kind = %self.record.kind, path = %self.record.path.display(), "container unloaded");
    }
}

struct ManagerState<C> {
    loaded: Vec<Slot<C>>,
    ours: Slot<C>,
    announce_queue: Vec<ContainerRecord>,
}

/// Builds, shares, retrieves and searches containers of one kind.
pub struct ContainerManager<C: ScanContainer> {
    owner: String,
    settings: ManagerSettings,
    store: Arc<dyn Store>,
    transport: Arc<dyn PeerTransport>,
    scanner: Arc<dyn ScanHandler>,
    state: Mutex<ManagerState<C>>,
}

impl<C: ScanContainer> ContainerManager<C> {
    /// Load the most useful foreign containers and resume or create ours.
    pub fn open(
        owner: impl Into<String>,
        settings: ManagerSettings,
        store: Arc<dyn Store>,
        transport: Arc<dyn PeerTransport>,
        scanner: Arc<dyn ScanHandler>,
    ) -> Result<Self> {
        let owner = owner.into();
        std::fs::create_dir_all(&settings.locations.share_dir)?;
        std::fs::create_dir_all(&settings.locations.storage_dir)?;

        let now = Utc::now();
        let records = store.containers(C::KIND);
        let mut foreign: Vec<&ContainerRecord> = records
            .iter()
            .filter(|r| r.owner == owner && r.is_foreign() && !r.tainted)
            .collect();
        foreign.sort_by(|a, b| by_usefulness(b, a, now));

        let mut loaded = Vec::new();
        for record in foreign.into_iter().take(settings.load_limit) {
            match C::load(&record.path) {
                Ok(container) => loaded.push(Slot {
                    record: record.clone(),
                    container,
                }),
                Err(e) => warn!(kind = %C::KIND, path = %record.path.display(), error = %e, "failed to load container"),
            }
        }

        let resumable = records
            .iter()
            .filter(|r| r.owner == owner && !r.is_foreign() && !r.complete)
            .max_by_key(|r| r.created);
        let resumed = resumable.and_then(|record| match C::load(&record.path) {
            Ok(container) => Some(Slot {
                record: record.clone(),
                container,
            }),
            Err(e) => {
                warn!(kind = %C::KIND, path = %record.path.display(), error = %e, "cannot resume our container");
                None
            }
        });

        let ours = match resumed {
            Some(slot) => slot,
            None => new_ours::<C>(&owner, &settings, store.as_ref(), scanner.sig_info())?,
        };

        info!(
            kind = %C::KIND,
            loaded = loaded.len(),
            ours = %ours.record.path.display(),
            "container manager ready"
        );

        Ok(Self {
            owner,
            settings,
            store,
            transport,
            scanner,
            state: Mutex::new(ManagerState {
                loaded,
                ours,
                announce_queue: Vec::new(),
            }),
        })
    }

    /// Fold pending local scans into our container, rotating on signature
    /// change or overflow, then announce sealed containers.
    pub async fn update_ours(&self) -> Result<()> {
        let sealed = {
            let mut state = self.state.lock().await;
            let scans = self.store.pending_local_scans(C::KIND);
            let current = state.ours.container.siginfo().clone();
            let live = self.scanner.sig_info();

            let mut same = Vec::new();
            let mut newer = Vec::new();
            let mut discarded = HashSet::new();
            for scan in scans {
                let sig = scan.siginfo()?.clone();
                if sig == current {
                    same.push(scan);
                } else if sig == live {
                    newer.push(scan);
                } else {
                    discarded.insert(sig);
                }
            }
            debug!(kind = %C::KIND, same = same.len(), newer = newer.len(), "updating our container");

            self.add_scans(&mut state, same)?;
            if live != current {
                self.rotate(&mut state, live)?;
                self.add_scans(&mut state, newer)?;
            }
            if !discarded.is_empty() {
                let sigs: Vec<String> = discarded.iter().map(ToString::to_string).collect();
                warn!(kind = %C::KIND, ?sigs, "scans discarded: signature matches neither our container nor the scanner");
            }

            state.ours.container.save()?;
            self.store.update_container(&state.ours.record)?;
            std::mem::take(&mut state.announce_queue)
        };

        if !sealed.is_empty() {
            self.announce(&sealed).await;
        }
        Ok(())
    }

    fn add_scans(&self, state: &mut ManagerState<C>, scans: Vec<Scan>) -> Result<()> {
        for mut scan in scans {
            let safety = scan.safety()?;
            let keys = scan.keys();
            match state.ours.container.add(&keys, safety) {
                Ok(_) => {}
                Err(CoreError::ContainerFull { capacity }) => {
                    debug!(kind = %C::KIND, capacity, "our container is full");
                    let sig = scan.siginfo()?.clone();
                    self.rotate(state, sig)?;
                    state.ours.container.add(&keys, safety)?;
                }
                Err(e) => return Err(e.into()),
            }
            scan.mark_included(C::KIND);
            self.store.update_scan(&scan)?;
        }
        Ok(())
    }

    /// Seal our container, queue it for announcement and open a fresh one.
    fn rotate(&self, state: &mut ManagerState<C>, siginfo: SigInfo) -> Result<()> {
        let fresh = new_ours::<C>(&self.owner, &self.settings, self.store.as_ref(), siginfo)?;
        let mut sealed = std::mem::replace(&mut state.ours, fresh);
        sealed.container.save()?;
        sealed.record.complete = true;
        self.store.update_container(&sealed.record)?;
        info!(
            kind = %C::KIND,
            urls = sealed.container.len(),
            sig = %sealed.record.siginfo,
            "container sealed"
        );
        state.announce_queue.push(sealed.record);
        Ok(())
    }

    async fn announce(&self, sealed: &[ContainerRecord]) {
        let peers = self.store.peers_within(self.settings.announce_distance);
        info!(kind = %C::KIND, containers = sealed.len(), peers = peers.len(), "announcing containers");

        for record in sealed {
            let call = PeerCall::ContainerOffer {
                owner: self.owner.clone(),
                url: record.url.clone(),
                kind: C::KIND.offer_name().to_string(),
            };
            let calls = peers.iter().map(|(peer, _)| {
                let call = &call;
                async move { (peer, self.transport.call(peer, call).await) }
            });
            for (peer, result) in join_all(calls).await {
                match result {
                    Ok(RpcReply::Success) => debug!(peer = %peer.name, url = %record.url, "offer accepted"),
                    Ok(reply) => warn!(peer = %peer.name, %reply, "offer not accepted"),
                    Err(e) => warn!(peer = %peer.name, error = %e, "failed to send offer"),
                }
            }
        }
    }

    /// Retrieve offered containers and admit valid ones to the working set.
    /// Returns how many were admitted.
    pub async fn retrieve_offers(&self) -> Result<usize> {
        let mut requests = self.store.pending_requests(RequestKind::offer(C::KIND));
        if requests.is_empty() {
            debug!(kind = %C::KIND, "no offers to retrieve");
            return Ok(0);
        }
        if self.settings.process_single_offer {
            requests.truncate(1);
        }

        let mut admitted = 0;
        for mut request in requests {
            let path = self.settings.locations.foreign(C::KIND);
            info!(kind = %C::KIND, peer = %request.peer, url = %request.url, "retrieving offered container");

            let outcome = match self
                .transport
                .download(&request.url, &path, self.settings.download_timeout)
                .await
            {
                Ok(bytes) => {
                    debug!(bytes, path = %path.display(), "offer downloaded");
                    C::load(&path).map_err(P2pError::from)
                }
                Err(e) => Err(e),
            };

            request.finish();
            self.store.update_request(&request)?;

            let container = match outcome {
                Ok(container) => container,
                Err(e) => {
                    warn!(kind = %C::KIND, peer = %request.peer, url = %request.url, error = %e, "discarding offered container");
                    let _ = tokio::fs::remove_file(&path).await;
                    continue;
                }
            };

            let record = self.store.insert_container(ContainerRecord::foreign(
                C::KIND,
                &self.owner,
                &request.peer,
                request.url.as_str(),
                path,
                container.siginfo().clone(),
            ));
            let slot = Slot { record, container };

            let mut state = self.state.lock().await;
            if state.loaded.len() >= self.settings.load_limit {
                unload_least_useful(&mut state.loaded);
            }
            if state.loaded.len() < self.settings.load_limit {
                debug!(kind = %C::KIND, "slot available, loading container");
                state.loaded.push(slot);
                admitted += 1;
            } else {
                debug!(kind = %C::KIND, "no slot available");
                slot.unload();
            }
        }
        Ok(admitted)
    }

    /// Query every loaded container, dropping tainted ones first. Each
    /// container that answers has its hit counter bumped.
    pub async fn search(&self, keys: &UrlKeys) -> Vec<SearchHit> {
        let mut state = self.state.lock().await;

        let mut kept = Vec::with_capacity(state.loaded.len());
        for mut slot in state.loaded.drain(..) {
            if let Some(fresh) = self.store.container(slot.record.id) {
                slot.record = fresh;
            }
            if slot.record.tainted {
                info!(kind = %C::KIND, creator = %slot.record.creator, "unloading tainted container");
                slot.unload();
            } else {
                kept.push(slot);
            }
        }
        state.loaded = kept;

        let mut hits = Vec::new();
        for slot in state.loaded.iter_mut() {
            let Some(safety) = slot.container.lookup(keys) else {
                continue;
            };
            slot.record.hits += 1;
            slot.container.record_hits(slot.record.hits);
            if let Err(e) = self.store.update_container(&slot.record) {
                warn!(error = %e, "failed to record container hit");
            }
            hits.push(SearchHit {
                creator: slot.record.creator.clone(),
                created: slot.record.created,
                siginfo: slot.record.siginfo.clone(),
                safety,
            });
        }
        debug!(kind = %C::KIND, keys = %keys, hits = hits.len(), "container search");
        hits
    }

    /// Number of loaded containers that contain the object.
    pub async fn search_count(&self, keys: &UrlKeys) -> usize {
        self.search(keys).await.len()
    }

    /// Pull every relationship's perceived distance back toward its real one.
    pub fn redeem_relationships(&self) {
        let amount = self.settings.redemption_amount;
        let relationships = self.store.relationships();
        for mut rel in relationships {
            rel.redeem(amount);
            self.store.upsert_relationship(rel);
        }
        debug!(amount, "relationships redeemed");
    }

    /// Persist our container, e.g. before shutdown.
    pub async fn flush(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.ours.container.save()?;
        self.store.update_container(&state.ours.record)?;
        Ok(())
    }

    pub async fn loaded_count(&self) -> usize {
        self.state.lock().await.loaded.len()
    }

    /// Record of the container currently being built.
    pub async fn ours(&self) -> ContainerRecord {
        self.state.lock().await.ours.record.clone()
    }

    pub async fn ours_len(&self) -> u32 {
        self.state.lock().await.ours.container.len()
    }
}

fn by_usefulness(a: &ContainerRecord, b: &ContainerRecord, now: DateTime<Utc>) -> Ordering {
    a.usefulness(now)
        .partial_cmp(&b.usefulness(now))
        .unwrap_or(Ordering::Equal)
}

fn unload_least_useful<C: ScanContainer>(loaded: &mut Vec<Slot<C>>) {
    let now = Utc::now();
    let least = loaded
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| by_usefulness(&a.record, &b.record, now))
        .map(|(i, _)| i);
    match least {
        Some(index) => loaded.remove(index).unload(),
        None => debug!("no containers loaded to unload"),
    }
}

fn new_ours<C: ScanContainer>(
    owner: &str,
    settings: &ManagerSettings,
    store: &dyn Store,
    siginfo: SigInfo,
) -> Result<Slot<C>> {
    let record = ContainerRecord::local(C::KIND, owner, siginfo.clone(), &settings.locations);
    let mut container = C::create(settings.max_capacity, siginfo, &record.path);
    container.save()?;
    let record = store.insert_container(record);
    info!(kind = %C::KIND, path = %record.path.display(), sig = %record.siginfo, "new container");
    Ok(Slot { record, container })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{mark_container_tainted, MemoryStore};
    use crate::test_support::{manager_settings, seed_peer, MockTransport, SwitchableScanner};
    use swarmscan_core::{ContainerKind, Digest, ScanLog, ScanOrigin};

    struct Fixture {
        _dir: tempfile::TempDir,
        store: Arc<MemoryStore>,
        transport: Arc<MockTransport>,
        scanner: Arc<SwitchableScanner>,
        settings: ManagerSettings,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let settings = manager_settings(dir.path());
        Fixture {
            _dir: dir,
            store: Arc::new(MemoryStore::new()),
            transport: Arc::new(MockTransport::default()),
            scanner: Arc::new(SwitchableScanner::new(sig("A"))),
            settings,
        }
    }

    impl Fixture {
        fn open<C: ScanContainer>(&self) -> ContainerManager<C> {
            ContainerManager::open(
                "alice",
                self.settings.clone(),
                self.store.clone(),
                self.transport.clone(),
                self.scanner.clone(),
            )
            .unwrap()
        }

        fn local_scan(&self, url: &str, sig_version: &str) -> Scan {
            self.store
                .insert_scan(Scan::new("alice", ScanOrigin::Local, url, false, sig(sig_version)))
        }

        fn own_records(&self, kind: ContainerKind) -> Vec<ContainerRecord> {
            self.store
                .containers(kind)
                .into_iter()
                .filter(|r| !r.is_foreign())
                .collect()
        }
    }

    fn sig(version: &str) -> SigInfo {
        SigInfo::from_epoch("dummy 1.0", version, 1_700_000_000)
    }

    #[tokio::test]
    async fn test_rotation_follows_signature_groups() {
        let fx = fixture();
        seed_peer(fx.store.as_ref(), "bob", 1.0);
        let manager = fx.open::<Digest>();

        fx.local_scan("http://1/", "A");
        fx.local_scan("http://2/", "A");
        manager.update_ours().await.unwrap();

        fx.scanner.switch(sig("B"));
        fx.local_scan("http://3/", "B");
        manager.update_ours().await.unwrap();

        fx.scanner.switch(sig("C"));
        fx.local_scan("http://4/", "C");
        manager.update_ours().await.unwrap();

        let mut records = fx.own_records(ContainerKind::Digest);
        records.sort_by_key(|r| r.id);
        let versions: Vec<&str> = records.iter().map(|r| r.siginfo.sig_version.as_str()).collect();
        assert_eq!(versions, vec!["A", "B", "C"]);
        assert!(records[0].complete && records[1].complete && !records[2].complete);
        assert_eq!(manager.ours_len().await, 1);
        assert!(fx.store.pending_local_scans(ContainerKind::Digest).is_empty());

        // Two sealed containers, one peer
        assert_eq!(fx.transport.offers().len(), 2);
    }

    #[tokio::test]
    async fn test_overflow_opens_new_containers() {
        let mut fx = fixture();
        fx.settings.max_capacity = 2;
        let manager = fx.open::<ScanLog>();

        for i in 0..5 {
            let mut scan = fx.local_scan(&format!("http://{}/", i), "A");
            scan.mark_included(ContainerKind::Digest);
            fx.store.update_scan(&scan).unwrap();
        }
        manager.update_ours().await.unwrap();

        let records = fx.own_records(ContainerKind::Log);
        assert_eq!(records.len(), 3);
        assert_eq!(records.iter().filter(|r| r.complete).count(), 2);
        assert_eq!(manager.ours_len().await, 1);
        assert!(records.iter().all(|r| r.siginfo == sig("A")));
    }

    #[tokio::test]
    async fn test_stale_signature_scans_are_discarded() {
        let fx = fixture();
        let manager = fx.open::<Digest>();
        fx.local_scan("http://old/", "ancient");
        manager.update_ours().await.unwrap();

        assert_eq!(manager.ours_len().await, 0);
        assert_eq!(fx.store.pending_local_scans(ContainerKind::Digest).len(), 1);
        assert_eq!(fx.own_records(ContainerKind::Digest).len(), 1);
    }

    fn offered_digest(dir: &std::path::Path, url: &str) -> Vec<u8> {
        let mut digest = Digest::create(10, sig("A"), &dir.join("offered"));
        digest.add(&UrlKeys::new(url, None), Safety::BENIGN).unwrap();
        digest.to_bytes().unwrap()
    }

    #[tokio::test]
    async fn test_retrieve_admits_valid_offer() {
        let fx = fixture();
        seed_peer(fx.store.as_ref(), "bob", 1.0);
        let manager = fx.open::<Digest>();
        fx.transport
            .serve("http://bob/share/d1", offered_digest(fx._dir.path(), "http://evil/"));
        fx.store.insert_request(crate::request::QueuedRequest::new(
            "alice",
            RequestKind::DigestOffer,
            "bob",
            "http://bob/share/d1",
            None,
        ));

        assert_eq!(manager.retrieve_offers().await.unwrap(), 1);
        assert_eq!(manager.loaded_count().await, 1);
        assert!(fx.store.pending_requests(RequestKind::DigestOffer).is_empty());

        let keys = UrlKeys::new("http://evil/", None);
        assert_eq!(manager.search_count(&keys).await, 1);
        assert_eq!(manager.search_count(&UrlKeys::new("http://fine/", None)).await, 0);

        let foreign: Vec<ContainerRecord> = fx
            .store
            .containers(ContainerKind::Digest)
            .into_iter()
            .filter(|r| r.is_foreign())
            .collect();
        assert_eq!(foreign[0].creator, "bob");
        assert_eq!(foreign[0].hits, 1);
    }

    #[tokio::test]
    async fn test_invalid_offer_is_discarded() {
        let fx = fixture();
        seed_peer(fx.store.as_ref(), "bob", 1.0);
        let manager = fx.open::<Digest>();
        fx.transport.serve("http://bob/share/bad", b"not a digest".to_vec());
        for url in ["http://bob/share/bad", "http://bob/share/missing"] {
            fx.store.insert_request(crate::request::QueuedRequest::new(
                "alice",
                RequestKind::DigestOffer,
                "bob",
                url,
                None,
            ));
        }

        assert_eq!(manager.retrieve_offers().await.unwrap(), 0);
        assert_eq!(manager.loaded_count().await, 0);
        assert!(fx.store.pending_requests(RequestKind::DigestOffer).is_empty());
    }

    #[tokio::test]
    async fn test_working_set_is_bounded() {
        let mut fx = fixture();
        fx.settings.load_limit = 2;
        seed_peer(fx.store.as_ref(), "bob", 1.0);
        let manager = fx.open::<Digest>();
        for i in 0..4 {
            let url = format!("http://bob/share/d{}", i);
            fx.transport.serve(&url, offered_digest(fx._dir.path(), "http://x/"));
            fx.store.insert_request(crate::request::QueuedRequest::new(
                "alice",
                RequestKind::DigestOffer,
                "bob",
                &url,
                None,
            ));
        }

        manager.retrieve_offers().await.unwrap();
        assert_eq!(manager.loaded_count().await, 2);
    }

    #[tokio::test]
    async fn test_single_offer_mode() {
        let mut fx = fixture();
        fx.settings.process_single_offer = true;
        seed_peer(fx.store.as_ref(), "bob", 1.0);
        let manager = fx.open::<Digest>();
        for i in 0..3 {
            let url = format!("http://bob/share/d{}", i);
            fx.transport.serve(&url, offered_digest(fx._dir.path(), "http://x/"));
            fx.store.insert_request(crate::request::QueuedRequest::new(
                "alice",
                RequestKind::DigestOffer,
                "bob",
                &url,
                None,
            ));
        }

        manager.retrieve_offers().await.unwrap();
        assert_eq!(fx.store.pending_requests(RequestKind::DigestOffer).len(), 2);
    }

    #[tokio::test]
    async fn test_tainted_container_leaves_working_set() {
        let fx = fixture();
        seed_peer(fx.store.as_ref(), "bob", 1.0);
        let manager = fx.open::<Digest>();
        fx.transport
            .serve("http://bob/share/d1", offered_digest(fx._dir.path(), "http://evil/"));
        fx.store.insert_request(crate::request::QueuedRequest::new(
            "alice",
            RequestKind::DigestOffer,
            "bob",
            "http://bob/share/d1",
            None,
        ));
        manager.retrieve_offers().await.unwrap();

        let mut record = fx
            .store
            .containers(ContainerKind::Digest)
            .into_iter()
            .find(|r| r.is_foreign())
            .unwrap();
        mark_container_tainted(fx.store.as_ref(), &mut record, 2.0).unwrap();

        assert_eq!(manager.search_count(&UrlKeys::new("http://evil/", None)).await, 0);
        assert_eq!(manager.loaded_count().await, 0);
        assert_eq!(fx.store.relationship("bob").unwrap().perceived_distance, 2.0);
    }

    #[tokio::test]
    async fn test_reopen_resumes_and_reloads() {
        let fx = fixture();
        seed_peer(fx.store.as_ref(), "bob", 1.0);
        let first = fx.open::<Digest>();
        fx.local_scan("http://1/", "A");
        first.update_ours().await.unwrap();
        fx.transport
            .serve("http://bob/share/d1", offered_digest(fx._dir.path(), "http://evil/"));
        fx.store.insert_request(crate::request::QueuedRequest::new(
            "alice",
            RequestKind::DigestOffer,
            "bob",
            "http://bob/share/d1",
            None,
        ));
        first.retrieve_offers().await.unwrap();
        let ours = first.ours().await;
        drop(first);

        let second = fx.open::<Digest>();
        assert_eq!(second.ours().await.id, ours.id);
        assert_eq!(second.ours_len().await, 1);
        assert_eq!(second.loaded_count().await, 1);
    }

    #[tokio::test]
    async fn test_redemption_moves_toward_real_distance() {
        let fx = fixture();
        seed_peer(fx.store.as_ref(), "bob", 2.0);
        fx.store.punish("bob", 3.0).unwrap();
        let manager = fx.open::<Digest>();

        manager.redeem_relationships();
        let rel = fx.store.relationship("bob").unwrap();
        assert!(rel.perceived_distance < 6.0);
        assert!(rel.perceived_distance > 2.0);
    }
}
