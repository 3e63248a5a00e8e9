//! Services shared by everything that handles a scannable object.

use std::sync::Arc;

use swarmscan_core::{Digest, ScanLog};

use crate::fetch::Retriever;
use crate::manager::ContainerManager;
use crate::scanner::ScanHandler;
use crate::settings::{DecisionSettings, ScanningSettings};
use crate::store::Store;
use crate::transport::PeerTransport;

/// Handles used by decision policies and the requested-scan responder.
pub struct ScanContext {
    /// Our peer name.
    pub owner: String,
    pub store: Arc<dyn Store>,
    pub transport: Arc<dyn PeerTransport>,
    pub retriever: Arc<dyn Retriever>,
    pub scanner: Arc<dyn ScanHandler>,
    pub digests: Arc<ContainerManager<Digest>>,
    pub logs: Arc<ContainerManager<ScanLog>>,
    pub scanning: ScanningSettings,
    pub decision: DecisionSettings,
}
