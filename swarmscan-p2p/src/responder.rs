//! Serving active scan requests queued by peers.

use std::sync::Arc;

use swarmscan_core::Classification;
use tracing::{debug, info, warn};

use crate::context::ScanContext;
use crate::decision::ScannableRequest;
use crate::error::{P2pError, Result};
use crate::protocol::{PeerCall, RpcReply};
use crate::request::{RequestKind, RequestState};
use crate::store::ScanQuery;

/// Scans what peers asked us to and reports back.
pub struct ActiveScanResponder {
    ctx: Arc<ScanContext>,
}

impl ActiveScanResponder {
    pub fn new(ctx: Arc<ScanContext>) -> Self {
        Self { ctx }
    }

    /// Handle the pending request of the closest peer. Returns false when
    /// nothing was pending.
    ///
    /// A request is scanned once; the result is re-sent on later runs until
    /// the peer accepts it.
    pub async fn perform_requested_scan(&self) -> Result<bool> {
        let store = &self.ctx.store;
        let Some(mut request) = store.pending_requests(RequestKind::ActiveScan).into_iter().next() else {
            return Ok(false);
        };
        let peer = store
            .peer(&request.peer)
            .ok_or_else(|| P2pError::PeerNotKnown(request.peer.clone()))?;

        let scan = if request.state == RequestState::Received {
            let mut scannable = ScannableRequest::on_behalf_of(Arc::clone(&self.ctx), request.clone());
            match scannable.local_scan().await {
                Ok(scan) => {
                    request.state = RequestState::Processed;
                    store.update_request(&request)?;
                    scan
                }
                Err(e) => {
                    warn!(peer = %peer.name, url = %request.url, error = %e, "requested scan failed");
                    request.finish();
                    store.update_request(&request)?;
                    return Err(e);
                }
            }
        } else {
            let previous = store
                .relevant_scans(&ScanQuery::url(&request.url))
                .into_iter()
                .find(|s| s.request == Some(request.id));
            match previous {
                Some(scan) => scan,
                None => {
                    debug!(request = request.id, "scan for processed request is gone");
                    request.finish();
                    store.update_request(&request)?;
                    return Ok(true);
                }
            }
        };

        let siginfo = scan.siginfo()?;
        let call = PeerCall::ScanResult {
            owner: self.ctx.owner.clone(),
            url: request.url.clone(),
            hash: scan.content_hash.clone().unwrap_or_default(),
            key: request.key.clone().unwrap_or_default(),
            malicious: scan.classification == Classification::Malicious,
            scanner: siginfo.scanner.clone(),
            sig_version: siginfo.sig_version.clone(),
            sig_epoch: siginfo.sig_epoch(),
        };
        match self.ctx.transport.call(&peer, &call).await {
            Ok(RpcReply::Success) => {
                request.finish();
                store.update_request(&request)?;
                info!(peer = %peer.name, url = %request.url, "scan result delivered");
            }
            Ok(reply) => warn!(peer = %peer.name, %reply, "scan result not accepted"),
            Err(e) => warn!(peer = %peer.name, error = %e, "failed to deliver scan result"),
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::QueuedRequest;
    use crate::settings::DecisionSettings;
    use crate::store::Store;
    use crate::test_support::{seed_peer, Harness};

    fn queue(h: &Harness, peer: &str, url: &str) -> QueuedRequest {
        h.store.insert_request(QueuedRequest::new(
            "alice",
            RequestKind::ActiveScan,
            peer,
            url,
            Some("k3y".into()),
        ))
    }

    #[tokio::test]
    async fn test_scan_and_report() {
        let h = Harness::new(DecisionSettings::default());
        seed_peer(h.store.as_ref(), "bob", 1.0);
        h.retriever.put("http://x/a", b"evil", None);
        queue(&h, "bob", "http://x/a");

        let responder = ActiveScanResponder::new(h.context.clone());
        assert!(responder.perform_requested_scan().await.unwrap());
        assert!(!responder.perform_requested_scan().await.unwrap());

        let calls = h.transport.calls();
        assert_eq!(calls.len(), 1);
        match &calls[0].1 {
            PeerCall::ScanResult { key, malicious, scanner, .. } => {
                assert_eq!(key, "k3y");
                assert!(malicious);
                assert_eq!(scanner, "dummy 1.0");
            }
            other => panic!("unexpected call {:?}", other),
        }

        let scans = h.store.relevant_scans(&ScanQuery::url("http://x/a"));
        assert_eq!(scans[0].peer.as_deref(), Some("bob"));
    }

    #[tokio::test]
    async fn test_refused_result_is_resent_without_rescanning() {
        let h = Harness::new(DecisionSettings::default());
        seed_peer(h.store.as_ref(), "bob", 1.0);
        h.retriever.put("http://x/a", b"fine", None);
        queue(&h, "bob", "http://x/a");
        h.transport.reply_for("bob", RpcReply::Exception);

        let responder = ActiveScanResponder::new(h.context.clone());
        responder.perform_requested_scan().await.unwrap();
        let pending = h.store.pending_requests(RequestKind::ActiveScan);
        assert_eq!(pending[0].state, RequestState::Processed);

        h.transport.reply_for("bob", RpcReply::Success);
        responder.perform_requested_scan().await.unwrap();
        assert!(h.store.pending_requests(RequestKind::ActiveScan).is_empty());
        assert_eq!(h.scanner.scans(), 1);
        assert_eq!(h.transport.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_scan_closes_request() {
        let h = Harness::new(DecisionSettings::default());
        seed_peer(h.store.as_ref(), "bob", 1.0);
        queue(&h, "bob", "http://x/unreachable");

        let responder = ActiveScanResponder::new(h.context.clone());
        assert!(responder.perform_requested_scan().await.is_err());
        assert!(h.store.pending_requests(RequestKind::ActiveScan).is_empty());
    }
}
