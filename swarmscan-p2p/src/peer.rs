//! Known peers and how to reach them.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default timeout for calls to a peer's RPC endpoint.
pub const DEFAULT_PEER_TIMEOUT: Duration = Duration::from_secs(10);

/// A peer we can exchange containers and scans with.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Peer {
    pub name: String,
    /// Base URL of the peer's RPC endpoint, e.g. `http://10.0.0.7:8124`.
    pub rpc_url: String,
    #[serde(with = "duration_secs", default = "default_timeout")]
    pub timeout: Duration,
}

impl Peer {
    pub fn new(name: impl Into<String>, rpc_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rpc_url: rpc_url.into(),
            timeout: DEFAULT_PEER_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Full URL of the peer's RPC handler.
    pub fn rpc_endpoint(&self) -> String {
        format!("{}/rpc", self.rpc_url.trim_end_matches('/'))
    }
}

fn default_timeout() -> Duration {
    DEFAULT_PEER_TIMEOUT
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_endpoint_trims_slash() {
        let peer = Peer::new("bob", "http://10.0.0.7:8124/");
        assert_eq!(peer.rpc_endpoint(), "http://10.0.0.7:8124/rpc");
    }

    #[test]
    fn test_timeout_serializes_as_seconds() {
        let peer = Peer::new("bob", "http://b").with_timeout(Duration::from_secs(3));
        let json = serde_json::to_value(&peer).unwrap();
        assert_eq!(json["timeout"], 3);
        let back: Peer = serde_json::from_value(json).unwrap();
        assert_eq!(back, peer);
    }
}
