//! # Swarmscan P2P
//!
//! **Layer 2: trust-weighted exchange of scan containers**
//!
//! This crate turns the container primitives of `swarmscan-core` into a
//! peer: it builds and announces our own digests and logs, retrieves the
//! ones trusted peers offer, and answers "is this URL safe?" under a
//! deadline by fusing cached verdicts, peer scans and a local scan.
//!
//! ## Features
//!
//! - **Trust model**: perceived distances that are punished for tainted
//!   data and redeemed over time
//! - **Container manager**: rotation on signature change or overflow, a
//!   bounded working set evicted by usefulness
//! - **Decision policies**: `simple`, `paranoid`, `dynamic-paranoid`,
//!   `lax` and `local`
//! - **Peer RPC**: container offers, active scan requests and results over
//!   HTTP
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use swarmscan_p2p::{DecisionEngine, PolicyKind, ScanContext};
//!
//! async fn check(ctx: Arc<ScanContext>) {
//!     let engine = DecisionEngine::new(ctx, PolicyKind::Paranoid.build());
//!     let verdict = engine.classify("http://example.com/setup.exe").await;
//!     if verdict.is_empty() {
//!         println!("allowed");
//!     } else {
//!         println!("denied, redirect to {}", verdict);
//!     }
//! }
//! ```

pub mod context;
pub mod decision;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod manager;
pub mod peer;
pub mod protocol;
pub mod proxy;
pub mod request;
pub mod responder;
pub mod rpc;
pub mod scanner;
pub mod settings;
pub mod store;
pub mod transport;
pub mod trust;

#[cfg(test)]
mod test_support;

// Re-export main types
pub use context::ScanContext;
pub use decision::{DecisionPolicy, PolicyKind, ScannableRequest};
pub use engine::DecisionEngine;
pub use error::{P2pError, Result};
pub use fetch::{HttpRetriever, Retriever};
pub use manager::{ContainerManager, SearchHit};
pub use peer::Peer;
pub use protocol::{PeerCall, RpcReply};
pub use proxy::{query_proxy, serve_proxy, serve_proxy_connection};
pub use responder::ActiveScanResponder;
pub use rpc::RpcService;
pub use scanner::{scanner_by_name, DummyScanner, ScanHandler};
pub use settings::{DecisionSettings, ManagerSettings, ScanningSettings, SharingSettings};
pub use store::{MemoryStore, Store};
pub use transport::{HttpTransport, PeerTransport};
pub use trust::Relationship;
