//! Server side of the peer RPC surface.
//!
//! Every call only enqueues a record, keyed by owner, peer, url and key.
//! A retried call finds the record already there and changes nothing.

use std::sync::Arc;

use swarmscan_core::{ContainerKind, Scan, ScanOrigin, SigInfo};
use tracing::{debug, info, warn};

use crate::error::{P2pError, Result};
use crate::protocol::{PeerCall, RpcReply};
use crate::request::{QueuedRequest, RequestKind};
use crate::store::Store;

/// Answers calls from peers on behalf of `owner`.
#[derive(Clone)]
pub struct RpcService {
    owner: String,
    store: Arc<dyn Store>,
}

impl RpcService {
    pub fn new(owner: impl Into<String>, store: Arc<dyn Store>) -> Self {
        Self {
            owner: owner.into(),
            store,
        }
    }

    /// Handle one call. Failures are logged and reported as `exception`.
    pub fn handle(&self, call: PeerCall) -> RpcReply {
        let method = call.method();
        let caller = call.owner().to_string();
        match self.dispatch(call) {
            Ok(reply) => {
                debug!(peer = %caller, method, reply = %reply, "rpc handled");
                reply
            }
            Err(P2pError::PeerNotKnown(_)) => {
                info!(peer = %caller, method, "rpc from unknown peer");
                RpcReply::PeerNotKnown
            }
            Err(P2pError::NoSuchRequest(_)) => {
                warn!(peer = %caller, method, "scan result for a request we never sent");
                RpcReply::NoSuchRequest
            }
            Err(e) => {
                warn!(peer = %caller, method, error = %e, "rpc failed");
                RpcReply::Exception
            }
        }
    }

    fn dispatch(&self, call: PeerCall) -> Result<RpcReply> {
        if self.store.peer(call.owner()).is_none() {
            return Err(P2pError::PeerNotKnown(call.owner().to_string()));
        }

        match call {
            PeerCall::ContainerOffer { owner, url, kind } => {
                let kind = ContainerKind::from_offer_name(&kind)
                    .ok_or_else(|| P2pError::Protocol(format!("unknown container kind {}", kind)))?;
                let request = QueuedRequest::new(&self.owner, RequestKind::offer(kind), &owner, &url, None);
                if self.enqueue(request) {
                    info!(peer = %owner, %url, %kind, "container offer queued");
                }
            }
            PeerCall::ScanRequest { owner, url, key } => {
                let request = QueuedRequest::new(&self.owner, RequestKind::ActiveScan, &owner, &url, Some(key));
                if self.enqueue(request) {
                    info!(peer = %owner, %url, "active scan request queued");
                }
            }
            PeerCall::ScanResult {
                owner,
                url,
                hash,
                key,
                malicious,
                scanner,
                sig_version,
                sig_epoch,
            } => {
                let sent = self
                    .store
                    .find_sent_request(&self.owner, &owner, &url, &key)
                    .ok_or_else(|| P2pError::NoSuchRequest(format!("{} {}", owner, url)))?;
                if self.store.scan_for_sent_request(sent.id).is_some() {
                    debug!(peer = %owner, %url, "scan result already stored");
                    return Ok(RpcReply::Success);
                }

                let siginfo = SigInfo::from_epoch(scanner, sig_version, sig_epoch);
                let mut scan = Scan::new(&self.owner, ScanOrigin::SocialActive, &url, malicious, siginfo)
                    .with_hash(Some(hash))
                    .with_peer(&owner);
                scan.sent_request = Some(sent.id);
                self.store.insert_scan(scan);
                info!(peer = %owner, %url, malicious, "active scan result stored");
            }
        }
        Ok(RpcReply::Success)
    }

    /// Store `request` unless a retry already did. Returns true if stored.
    fn enqueue(&self, request: QueuedRequest) -> bool {
        if let Some(existing) = self.store.find_request(&request) {
            debug!(peer = %request.peer, url = %request.url, id = existing.id, "request already queued");
            return false;
        }
        self.store.insert_request(request);
        true
    }
}
