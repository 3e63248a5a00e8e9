//! # Swarmscan Core
//!
//! **Container primitives for a trust-weighted malware verdict cache**
//!
//! This crate holds everything a peer needs to build, persist and query its
//! scan caches without touching the network:
//!
//! - [`Digest`]: a salted bloom filter answering "possibly scanned" with no
//!   false negatives.
//! - [`ScanLog`]: the authoritative key to verdict table consulted after a
//!   digest hit.
//! - [`Scan`] and [`ContainerRecord`]: the relational records behind them.
//!
//! Both containers implement [`ScanContainer`], are bounded by a fixed
//! capacity and verify every write on disk.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use swarmscan_core::{Digest, SigInfo, Safety, ScanContainer, UrlKeys};
//! use std::path::Path;
//!
//! let sig = SigInfo::from_epoch("dummy 1.0", "42", 1_700_000_000);
//! let mut digest = Digest::create(500, sig, Path::new("/tmp/digest"));
//!
//! let keys = UrlKeys::new("http://example.com/setup.exe", None);
//! digest.add(&keys, Safety::BENIGN).unwrap();
//! assert!(digest.lookup(&keys).is_some());
//! digest.save().unwrap();
//! ```

pub mod bloom;
pub mod container;
pub mod digest;
pub mod error;
pub mod keys;
pub mod log;
pub mod persist;
pub mod record;
pub mod safety;
pub mod scan;
pub mod siginfo;

// Re-export main types for convenience
pub use container::{ContainerKind, ScanContainer};
pub use digest::Digest;
pub use error::{CoreError, Result};
pub use keys::{file_sha256, sha256_hex, UrlKeys};
pub use log::ScanLog;
pub use record::{ContainerLocations, ContainerRecord};
pub use safety::{Safety, WeightedAverager};
pub use scan::{Classification, Scan, ScanOrigin};
pub use siginfo::SigInfo;
