//! Per-object state shared by the rounds of one classification.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use swarmscan_core::{file_sha256, Scan, ScanOrigin, UrlKeys};
use tracing::{debug, info, warn};

use crate::context::ScanContext;
use crate::error::{P2pError, Result};
use crate::fetch::{Downloaded, ObjectHeaders};
use crate::manager::SearchHit;
use crate::peer::Peer;
use crate::protocol::{PeerCall, RpcReply};
use crate::request::{QueuedRequest, SentScanRequest};
use crate::store::ScanQuery;
use crate::trust::Relationship;

/// An object being classified. Headers, the download, the content hash,
/// the close peer list and the local scan are fetched at most once.
pub struct ScannableRequest {
    ctx: Arc<ScanContext>,
    url: String,
    /// Set when scanning on behalf of a peer's active scan request.
    parent: Option<QueuedRequest>,
    headers: Option<ObjectHeaders>,
    downloaded: Option<Downloaded>,
    content_hash: Option<String>,
    close_peers: Option<Vec<(Peer, Relationship)>>,
    local: Option<Scan>,
}

impl ScannableRequest {
    pub fn new(ctx: Arc<ScanContext>, url: impl Into<String>) -> Self {
        Self {
            ctx,
            url: url.into(),
            parent: None,
            headers: None,
            downloaded: None,
            content_hash: None,
            close_peers: None,
            local: None,
        }
    }

    /// A request scanned for the peer that queued `parent`.
    pub fn on_behalf_of(ctx: Arc<ScanContext>, parent: QueuedRequest) -> Self {
        let mut request = Self::new(ctx, parent.url.clone());
        request.parent = Some(parent);
        request
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn context(&self) -> &ScanContext {
        &self.ctx
    }

    /// `HEAD` results. Failures leave every field unknown.
    pub async fn headers(&mut self) -> &ObjectHeaders {
        if self.headers.is_none() {
            let headers = match self.ctx.retriever.headers(&self.url).await {
                Ok(headers) => headers,
                Err(e) => {
                    debug!(url = %self.url, error = %e, "no headers for object");
                    ObjectHeaders::default()
                }
            };
            self.headers = Some(headers);
        }
        self.headers.get_or_insert_with(ObjectHeaders::default)
    }

    pub async fn size(&mut self) -> Option<u64> {
        if let Some(downloaded) = &self.downloaded {
            return Some(downloaded.size);
        }
        self.headers().await.size
    }

    /// Last modification time of the object, when the server reports it.
    pub async fn age(&mut self) -> Option<DateTime<Utc>> {
        self.headers().await.last_modified
    }

    async fn download(&mut self) -> Result<Downloaded> {
        if let Some(downloaded) = &self.downloaded {
            return Ok(downloaded.clone());
        }
        let downloaded = self.ctx.retriever.download(&self.url).await?;
        self.downloaded = Some(downloaded.clone());
        Ok(downloaded)
    }

    /// SHA-256 of the object's content, downloading it if needed.
    pub async fn hash(&mut self) -> Result<String> {
        if let Some(hash) = &self.content_hash {
            return Ok(hash.clone());
        }
        let downloaded = self.download().await?;
        let hash = file_sha256(&downloaded.path)?;
        debug!(url = %self.url, %hash, "content hashed");
        self.content_hash = Some(hash.clone());
        Ok(hash)
    }

    /// Lookup keys from what is known so far. Never downloads.
    pub fn keys(&self) -> UrlKeys {
        UrlKeys::new(&self.url, self.content_hash.as_deref())
    }

    /// Untainted scans of this object from any source.
    pub async fn relevant_scans(&mut self, use_size: bool) -> Vec<Scan> {
        let size = if use_size { self.size().await } else { None };
        let query = ScanQuery {
            url: &self.url,
            size,
            hash: self.content_hash.as_deref(),
        };
        self.ctx.store.relevant_scans(&query)
    }

    /// Log results for the object, consulted only when a digest has it.
    pub async fn digest_scans(&mut self) -> Vec<SearchHit> {
        let keys = self.keys();
        if self.ctx.digests.search_count(&keys).await == 0 {
            return Vec::new();
        }
        debug!(url = %self.url, "found in digest, searching logs");
        let hits = self.ctx.logs.search(&keys).await;
        if !hits.is_empty() {
            debug!(url = %self.url, hits = hits.len(), "found in logs");
        }
        hits
    }

    /// Peers close enough to ask for active scans.
    pub fn close_peers(&mut self) -> &[(Peer, Relationship)] {
        let ctx = &self.ctx;
        self.close_peers
            .get_or_insert_with(|| ctx.store.peers_within(ctx.scanning.max_active_distance))
    }

    /// Ask close peers not yet asked about this URL to scan it. Peers that
    /// fail are retried for up to `max_active_retries` rounds in total.
    /// Returns how many requests were accepted.
    pub async fn request_active_scans(&mut self) -> usize {
        let asked = self.ctx.store.asked_peers(&self.url);
        let mut pending: Vec<Peer> = self
            .close_peers()
            .iter()
            .filter(|(peer, _)| !asked.contains(&peer.name))
            .map(|(peer, _)| peer.clone())
            .collect();

        let ctx = &self.ctx;
        let url = self.url.as_str();
        let mut accepted = 0;
        let mut rounds = ctx.scanning.max_active_retries;
        while !pending.is_empty() && rounds > 0 {
            rounds -= 1;
            let attempts = pending.iter().map(|peer| async move {
                // Stored first so a result racing the reply finds its request
                let sent = ctx.store.insert_sent_request(SentScanRequest::new(&ctx.owner, url, &peer.name));
                let call = PeerCall::ScanRequest {
                    owner: ctx.owner.clone(),
                    url: url.to_string(),
                    key: sent.key.clone(),
                };
                debug!(peer = %peer.name, %url, "sending active scan request");
                let result = ctx.transport.call(peer, &call).await;
                (peer, sent, result)
            });

            let mut failed = Vec::new();
            for (peer, sent, result) in join_all(attempts).await {
                match result {
                    Ok(RpcReply::Success) => accepted += 1,
                    Ok(reply) => {
                        warn!(peer = %peer.name, %reply, "active scan request refused");
                        ctx.store.remove_sent_request(sent.id);
                        failed.push(peer.clone());
                    }
                    Err(e) => {
                        warn!(peer = %peer.name, error = %e, "active scan request failed");
                        ctx.store.remove_sent_request(sent.id);
                        failed.push(peer.clone());
                    }
                }
            }
            pending = failed;
        }
        accepted
    }

    /// Our own scan of the object, reusing a stored one for the same content.
    pub async fn local_scan(&mut self) -> Result<Scan> {
        if let Some(scan) = &self.local {
            return Ok(scan.clone());
        }

        let hash = self.hash().await?;
        let size = self.size().await;
        let query = ScanQuery {
            url: &self.url,
            size,
            hash: Some(&hash),
        };
        let owner = &self.ctx.owner;
        let previous = self
            .ctx
            .store
            .relevant_scans(&query)
            .into_iter()
            .find(|s| &s.owner == owner && s.origin == ScanOrigin::Local);
        if let Some(scan) = previous {
            debug!(url = %self.url, scan = scan.id, "reusing stored local scan");
            self.local = Some(scan.clone());
            return Ok(scan);
        }

        let downloaded = self.download().await?;
        let siginfo = self.ctx.scanner.sig_info();
        let scanner = Arc::clone(&self.ctx.scanner);
        let path = downloaded.path.clone();
        let started = Instant::now();
        let malicious = tokio::task::spawn_blocking(move || scanner.scan(&path))
            .await
            .map_err(|e| P2pError::Io(std::io::Error::other(e)))??;
        let scan_ms = started.elapsed().as_millis() as u64;

        let mut scan = Scan::new(&self.ctx.owner, ScanOrigin::Local, &self.url, malicious, siginfo)
            .with_hash(Some(hash))
            .with_size(Some(downloaded.size));
        scan.scan_ms = Some(scan_ms);
        scan.retrieve_ms = Some(downloaded.retrieve_ms);
        if let Some(parent) = &self.parent {
            scan = scan.with_peer(&parent.peer);
            scan.request = Some(parent.id);
        }
        let scan = self.ctx.store.insert_scan(scan);
        info!(url = %self.url, malicious, scan_ms, "local scan");

        self.local = Some(scan.clone());
        Ok(scan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::DecisionSettings;
    use crate::store::Store;
    use crate::rpc::RpcService;
    use crate::test_support::{seed_peer, Harness};
    use swarmscan_core::Classification;

    #[tokio::test]
    async fn test_local_scan_runs_once() {
        let h = Harness::new(DecisionSettings::default());
        h.retriever.put("http://x/a.exe", b"evil\n", None);

        let mut request = ScannableRequest::new(h.context.clone(), "http://x/a.exe");
        let first = request.local_scan().await.unwrap();
        assert_eq!(first.classification, Classification::Malicious);
        assert_eq!(first.file_size, Some(5));
        request.local_scan().await.unwrap();
        assert_eq!(h.scanner.scans(), 1);

        // A fresh request finds the stored scan for the same content
        let mut again = ScannableRequest::new(h.context.clone(), "http://x/a.exe");
        assert_eq!(again.local_scan().await.unwrap().id, first.id);
        assert_eq!(h.scanner.scans(), 1);
    }

    #[tokio::test]
    async fn test_download_failure_is_error() {
        let h = Harness::new(DecisionSettings::default());
        let mut request = ScannableRequest::new(h.context.clone(), "http://x/missing");
        assert!(request.local_scan().await.is_err());
        assert_eq!(request.headers().await, &ObjectHeaders::default());
    }

    #[tokio::test]
    async fn test_active_scans_skip_asked_peers() {
        let h = Harness::new(DecisionSettings::default());
        seed_peer(h.store.as_ref(), "bob", 1.0);
        seed_peer(h.store.as_ref(), "carol", 2.0);
        seed_peer(h.store.as_ref(), "mallory", 50.0);

        let mut request = ScannableRequest::new(h.context.clone(), "http://x/a.exe");
        assert_eq!(request.request_active_scans().await, 2);
        assert_eq!(request.request_active_scans().await, 0);
        assert_eq!(h.transport.scan_requests().len(), 2);
        assert_eq!(h.store.asked_peers("http://x/a.exe").len(), 2);
    }

    #[tokio::test]
    async fn test_failed_peer_is_not_marked_asked() {
        let h = Harness::new(DecisionSettings::default());
        seed_peer(h.store.as_ref(), "bob", 1.0);
        h.transport.unreachable("bob");

        let mut request = ScannableRequest::new(h.context.clone(), "http://x/a.exe");
        assert_eq!(request.request_active_scans().await, 0);
        assert!(h.store.asked_peers("http://x/a.exe").is_empty());
        // Default policy makes a single attempt
        assert_eq!(h.transport.scan_requests().len(), 1);
    }

    #[tokio::test]
    async fn test_result_before_reply_is_kept() {
        let h = Harness::new(DecisionSettings::default());
        seed_peer(h.store.as_ref(), "bob", 1.0);
        let rpc = RpcService::new("alice", h.store.clone());
        let replies = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen = replies.clone();
        // Bob answers before his reply to the request reaches us
        h.transport.on_call(move |peer, call| {
            if let PeerCall::ScanRequest { url, key, .. } = call {
                let reply = rpc.handle(PeerCall::ScanResult {
                    owner: peer.name.clone(),
                    url: url.clone(),
                    hash: String::new(),
                    key: key.clone(),
                    malicious: true,
                    scanner: "av1".into(),
                    sig_version: "1".into(),
                    sig_epoch: 1_700_000_000,
                });
                seen.lock().unwrap().push(reply);
            }
        });

        let mut request = ScannableRequest::new(h.context.clone(), "http://x/a.exe");
        assert_eq!(request.request_active_scans().await, 1);
        assert_eq!(*replies.lock().unwrap(), vec![RpcReply::Success]);
        assert_eq!(request.relevant_scans(false).await.len(), 1);
    }

    #[tokio::test]
    async fn test_refused_request_is_forgotten() {
        let h = Harness::new(DecisionSettings::default());
        seed_peer(h.store.as_ref(), "bob", 1.0);
        h.transport.reply_for("bob", RpcReply::PeerNotKnown);

        let mut request = ScannableRequest::new(h.context.clone(), "http://x/a.exe");
        assert_eq!(request.request_active_scans().await, 0);
        assert!(h.store.asked_peers("http://x/a.exe").is_empty());
    }

    #[tokio::test]
    async fn test_digest_scans_need_a_digest_hit() {
        let h = Harness::new(DecisionSettings::default());
        let mut request = ScannableRequest::new(h.context.clone(), "http://x/a.exe");
        assert!(request.digest_scans().await.is_empty());
    }
}
