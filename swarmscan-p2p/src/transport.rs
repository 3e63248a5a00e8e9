//! Outbound calls to peers and container downloads.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::{P2pError, Result};
use crate::peer::Peer;
use crate::protocol::{PeerCall, RpcReply};

/// How we reach other peers. Implementations must bound every call in time.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Invoke an RPC on `peer` and return its reply.
    async fn call(&self, peer: &Peer, call: &PeerCall) -> Result<RpcReply>;

    /// Download `url` to `dest`, returning the number of bytes written.
    async fn download(&self, url: &str, dest: &Path, timeout: Duration) -> Result<u64>;
}

/// [`PeerTransport`] over plain HTTP.
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn fetch_to(&self, url: &str, dest: &Path) -> Result<u64> {
        let mut response = self.client.get(url).send().await?.error_for_status()?;
        let expected = response.content_length();

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(dest).await?;
        let mut written = 0u64;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        if let Some(expected) = expected {
            if written < expected {
                return Err(P2pError::Network(format!(
                    "download of {} stopped at {} of {} bytes",
                    url, written, expected
                )));
            }
        }
        Ok(written)
    }
}

#[async_trait]
impl PeerTransport for HttpTransport {
    async fn call(&self, peer: &Peer, call: &PeerCall) -> Result<RpcReply> {
        let endpoint = peer.rpc_endpoint();
        debug!(peer = %peer.name, method = call.method(), "calling peer");
        let response = self
            .client
            .post(&endpoint)
            .timeout(peer.timeout)
            .json(call)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json::<RpcReply>().await?)
    }

    async fn download(&self, url: &str, dest: &Path, timeout: Duration) -> Result<u64> {
        match tokio::time::timeout(timeout, self.fetch_to(url, dest)).await {
            Ok(result) => result,
            Err(elapsed) => {
                warn!(%url, ?timeout, "container download timed out");
                Err(elapsed.into())
            }
        }
    }
}
