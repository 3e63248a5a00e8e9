//! Wire types for the peer RPC surface and the proxy hop.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{P2pError, Result};

/// Terminator of a proxy request frame.
pub const FRAME_END: u8 = 0x04;

/// Largest proxy request frame accepted, terminator excluded.
pub const MAX_FRAME_BYTES: usize = 16 * 1024;

/// A call from one peer to another, POSTed as JSON to `{peer}/rpc`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params")]
pub enum PeerCall {
    /// A sealed container is available for download.
    #[serde(rename = "containerOffer")]
    ContainerOffer {
        owner: String,
        url: String,
        /// `scandigestfile` or `scanlogfile`
        kind: String,
    },
    /// Please scan `url` and report back under `key`.
    #[serde(rename = "scanRequest")]
    ScanRequest { owner: String, url: String, key: String },
    /// Result of a scan we were asked for.
    #[serde(rename = "scanResult")]
    ScanResult {
        owner: String,
        url: String,
        /// Content hash, empty when unknown.
        hash: String,
        key: String,
        malicious: bool,
        scanner: String,
        sig_version: String,
        sig_epoch: i64,
    },
}

impl PeerCall {
    /// Name of the calling peer.
    pub fn owner(&self) -> &str {
        match self {
            PeerCall::ContainerOffer { owner, .. }
            | PeerCall::ScanRequest { owner, .. }
            | PeerCall::ScanResult { owner, .. } => owner,
        }
    }

    pub fn method(&self) -> &'static str {
        match self {
            PeerCall::ContainerOffer { .. } => "containerOffer",
            PeerCall::ScanRequest { .. } => "scanRequest",
            PeerCall::ScanResult { .. } => "scanResult",
        }
    }
}

/// Reply to a [`PeerCall`], sent as a bare JSON string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RpcReply {
    #[serde(rename = "success")]
    Success,
    #[serde(rename = "peer not known")]
    PeerNotKnown,
    #[serde(rename = "no such request")]
    NoSuchRequest,
    #[serde(rename = "exception")]
    Exception,
}

impl RpcReply {
    pub fn as_str(&self) -> &'static str {
        match self {
            RpcReply::Success => "success",
            RpcReply::PeerNotKnown => "peer not known",
            RpcReply::NoSuchRequest => "no such request",
            RpcReply::Exception => "exception",
        }
    }
}

impl fmt::Display for RpcReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Encode a URL as a proxy request frame: JSON string, then [`FRAME_END`].
pub fn encode_request(url: &str) -> Result<Vec<u8>> {
    let mut frame = serde_json::to_vec(url)?;
    frame.push(FRAME_END);
    Ok(frame)
}

/// Decode the body of a proxy request frame, terminator already stripped.
pub fn decode_request(body: &[u8]) -> Result<String> {
    if body.len() > MAX_FRAME_BYTES {
        return Err(P2pError::Protocol(format!(
            "request frame of {} bytes exceeds {}",
            body.len(),
            MAX_FRAME_BYTES
        )));
    }
    Ok(serde_json::from_slice(body)?)
}

/// Encode a verdict reply: the JSON string, empty for allow.
pub fn encode_reply(verdict: &str) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(verdict)?)
}

pub fn decode_reply(bytes: &[u8]) -> Result<String> {
    Ok(serde_json::from_slice(bytes)?)
}
