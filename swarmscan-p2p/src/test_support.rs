//! Shared doubles for unit tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use swarmscan_core::{Digest, ScanLog, SigInfo};

use crate::context::ScanContext;
use crate::error::{P2pError, Result};
use crate::fetch::{Downloaded, ObjectHeaders, Retriever};
use crate::manager::ContainerManager;
use crate::peer::Peer;
use crate::protocol::{PeerCall, RpcReply};
use crate::scanner::ScanHandler;
use crate::settings::{DecisionSettings, ManagerSettings, ScanningSettings, SharingSettings};
use crate::store::{MemoryStore, Store};
use crate::transport::PeerTransport;
use crate::trust::Relationship;

type CallHook = Box<dyn Fn(&Peer, &PeerCall) + Send + Sync>;

/// Records calls, answers `success` unless told otherwise, serves canned files.
#[derive(Default)]
pub struct MockTransport {
    calls: Mutex<Vec<(String, PeerCall)>>,
    files: Mutex<HashMap<String, Vec<u8>>>,
    replies: Mutex<HashMap<String, RpcReply>>,
    unreachable: Mutex<Vec<String>>,
    hook: Mutex<Option<CallHook>>,
}

impl MockTransport {
    pub fn serve(&self, url: &str, bytes: Vec<u8>) {
        self.files.lock().unwrap().insert(url.to_string(), bytes);
    }

    pub fn reply_for(&self, peer: &str, reply: RpcReply) {
        self.replies.lock().unwrap().insert(peer.to_string(), reply);
    }

    pub fn unreachable(&self, peer: &str) {
        self.unreachable.lock().unwrap().push(peer.to_string());
    }

    /// Run `hook` on every successful call, e.g. to play the remote peer.
    pub fn on_call(&self, hook: impl Fn(&Peer, &PeerCall) + Send + Sync + 'static) {
        *self.hook.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn calls(&self) -> Vec<(String, PeerCall)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn offers(&self) -> Vec<(String, PeerCall)> {
        self.calls()
            .into_iter()
            .filter(|(_, c)| matches!(c, PeerCall::ContainerOffer { .. }))
            .collect()
    }

    pub fn scan_requests(&self) -> Vec<(String, PeerCall)> {
        self.calls()
            .into_iter()
            .filter(|(_, c)| matches!(c, PeerCall::ScanRequest { .. }))
            .collect()
    }
}

#[async_trait]
impl PeerTransport for MockTransport {
    async fn call(&self, peer: &Peer, call: &PeerCall) -> Result<RpcReply> {
        self.calls.lock().unwrap().push((peer.name.clone(), call.clone()));
        if self.unreachable.lock().unwrap().contains(&peer.name) {
            return Err(P2pError::Network(format!("{} unreachable", peer.name)));
        }
        let reply = self
            .replies
            .lock()
            .unwrap()
            .get(&peer.name)
            .copied()
            .unwrap_or(RpcReply::Success);
        if reply == RpcReply::Success {
            if let Some(hook) = self.hook.lock().unwrap().as_ref() {
                hook(peer, call);
            }
        }
        Ok(reply)
    }

    async fn download(&self, url: &str, dest: &Path, _timeout: Duration) -> Result<u64> {
        let bytes = self.files.lock().unwrap().get(url).cloned();
        let bytes = bytes.ok_or_else(|| P2pError::Network(format!("404 for {}", url)))?;
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(dest, &bytes)?;
        Ok(bytes.len() as u64)
    }
}

/// Scanner whose signature set can be swapped mid-test.
pub struct SwitchableScanner {
    siginfo: Mutex<SigInfo>,
    scans: Mutex<usize>,
}

impl SwitchableScanner {
    pub fn new(siginfo: SigInfo) -> Self {
        Self {
            siginfo: Mutex::new(siginfo),
            scans: Mutex::new(0),
        }
    }

    pub fn switch(&self, siginfo: SigInfo) {
        *self.siginfo.lock().unwrap() = siginfo;
    }

    pub fn scans(&self) -> usize {
        *self.scans.lock().unwrap()
    }
}

impl ScanHandler for SwitchableScanner {
    fn sig_info(&self) -> SigInfo {
        self.siginfo.lock().unwrap().clone()
    }

    fn scan(&self, path: &Path) -> Result<bool> {
        *self.scans.lock().unwrap() += 1;
        let content = std::fs::read(path)?;
        Ok(content.starts_with(b"evil"))
    }
}

/// Serves objects from memory.
#[derive(Default)]
pub struct MockRetriever {
    dir: PathBuf,
    objects: Mutex<HashMap<String, (Vec<u8>, Option<DateTime<Utc>>)>>,
}

impl MockRetriever {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            objects: Mutex::new(HashMap::new()),
        }
    }

    pub fn put(&self, url: &str, body: &[u8], last_modified: Option<DateTime<Utc>>) {
        self.objects
            .lock()
            .unwrap()
            .insert(url.to_string(), (body.to_vec(), last_modified));
    }
}

#[async_trait]
impl Retriever for MockRetriever {
    async fn headers(&self, url: &str) -> Result<ObjectHeaders> {
        let objects = self.objects.lock().unwrap();
        let (body, last_modified) = objects
            .get(url)
            .ok_or_else(|| P2pError::Network(format!("404 for {}", url)))?;
        Ok(ObjectHeaders {
            size: Some(body.len() as u64),
            last_modified: *last_modified,
        })
    }

    async fn download(&self, url: &str) -> Result<Downloaded> {
        let body = self
            .objects
            .lock()
            .unwrap()
            .get(url)
            .map(|(body, _)| body.clone())
            .ok_or_else(|| P2pError::Network(format!("404 for {}", url)))?;
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(uuid::Uuid::new_v4().to_string());
        std::fs::write(&path, &body)?;
        Ok(Downloaded {
            path,
            size: body.len() as u64,
            retrieve_ms: 0,
        })
    }
}

pub fn manager_settings(root: &Path) -> ManagerSettings {
    let sharing = SharingSettings::default();
    ManagerSettings::new(sharing.locations(root.join("share"), root.join("storage")))
}

pub fn seed_peer(store: &dyn Store, name: &str, distance: f64) {
    store.upsert_peer(Peer::new(name, format!("http://{}", name)));
    store.upsert_relationship(Relationship::new(name, distance));
}

/// A complete context over in-memory doubles.
pub struct Harness {
    pub dir: tempfile::TempDir,
    pub store: Arc<MemoryStore>,
    pub transport: Arc<MockTransport>,
    pub retriever: Arc<MockRetriever>,
    pub scanner: Arc<SwitchableScanner>,
    pub context: Arc<ScanContext>,
}

/// Route crate logs to the test harness. `RUST_LOG` selects the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

impl Harness {
    pub fn new(decision: DecisionSettings) -> Self {
        init_tracing();
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let transport = Arc::new(MockTransport::default());
        let retriever = Arc::new(MockRetriever::new(&dir.path().join("downloads")));
        let scanner = Arc::new(SwitchableScanner::new(SigInfo::new("dummy 1.0", "1.0", whole_second_now())));
        let settings = manager_settings(dir.path());

        let digests: ContainerManager<Digest> = ContainerManager::open(
            "alice",
            settings.clone(),
            store.clone(),
            transport.clone(),
            scanner.clone(),
        )
        .unwrap();
        let logs: ContainerManager<ScanLog> = ContainerManager::open("alice", settings, store.clone(), transport.clone(), scanner.clone()).unwrap();

        let scanning = ScanningSettings {
            download_dir: dir.path().join("downloads"),
            ..ScanningSettings::default()
        };
        let context = Arc::new(ScanContext {
            owner: "alice".into(),
            store: store.clone(),
            transport: transport.clone(),
            retriever: retriever.clone(),
            scanner: scanner.clone(),
            digests: Arc::new(digests),
            logs: Arc::new(logs),
            scanning,
            decision,
        });
        Self {
            dir,
            store,
            transport,
            retriever,
            scanner,
            context,
        }
    }
}

pub fn whole_second_now() -> DateTime<Utc> {
    Utc.timestamp_opt(Utc::now().timestamp(), 0).single().unwrap()
}
