//! Typed settings consumed by the managers, policies and jobs.

use std::path::PathBuf;
use std::time::Duration;

use swarmscan_core::ContainerLocations;

use crate::trust::DEFAULT_PUNISHMENT;

/// How we publish shared containers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharingSettings {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub share_root: String,
}

impl Default for SharingSettings {
    fn default() -> Self {
        Self {
            scheme: "http".into(),
            host: "127.0.0.1".into(),
            port: 8124,
            share_root: "share".into(),
        }
    }
}

impl SharingSettings {
    /// Container locations for these sharing settings.
    pub fn locations(&self, share_dir: PathBuf, storage_dir: PathBuf) -> ContainerLocations {
        ContainerLocations {
            share_dir,
            storage_dir,
            scheme: self.scheme.clone(),
            host: self.host.clone(),
            port: self.port,
            share_root: self.share_root.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ManagerSettings {
    /// Objects per container before rotation.
    pub max_capacity: u32,
    /// Foreign containers held in memory.
    pub load_limit: usize,
    /// Peers at most this far receive our container offers.
    pub announce_distance: f64,
    /// Fraction of the gap to real distance recovered per redemption.
    pub redemption_amount: f64,
    pub punishment: f64,
    pub download_timeout: Duration,
    /// Retrieve at most one offer per run.
    pub process_single_offer: bool,
    pub locations: ContainerLocations,
}

impl ManagerSettings {
    pub fn new(locations: ContainerLocations) -> Self {
        Self {
            max_capacity: 500,
            load_limit: 20,
            announce_distance: 5.0,
            redemption_amount: 0.1,
            punishment: DEFAULT_PUNISHMENT,
            download_timeout: Duration::from_secs(30),
            process_single_offer: false,
            locations,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScanningSettings {
    /// Peers at most this far are asked for active scans.
    pub max_active_distance: f64,
    /// Rounds of active scan requests per object.
    pub max_active_retries: u32,
    pub download_dir: PathBuf,
    pub network_timeout: Duration,
}

impl Default for ScanningSettings {
    fn default() -> Self {
        Self {
            max_active_distance: 10.0,
            max_active_retries: 1,
            download_dir: std::env::temp_dir().join("swarmscan-downloads"),
            network_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecisionSettings {
    /// `|average|` above which the simple policy is confident.
    pub confidence_threshold: f64,
    /// Distinct scanners the paranoid policy requires.
    pub required_scanners: u32,
    /// Scans with older signatures do not count.
    pub signature_age_days: f64,
    pub freshness_limit_days: f64,
    /// Overall deadline for one classification.
    pub system_timeout: Duration,
    /// Pause between decision rounds.
    pub poll_interval: Duration,
    /// Wait for peers to answer active scan requests.
    pub active_scan_wait: Duration,
    /// Port of the local share server, used in deny redirects.
    pub deny_port: u16,
}

impl Default for DecisionSettings {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            required_scanners: 1,
            signature_age_days: 10.0,
            freshness_limit_days: 2.0,
            system_timeout: Duration::from_secs(20),
            poll_interval: Duration::from_millis(100),
            active_scan_wait: Duration::from_millis(920),
            deny_port: SharingSettings::default().port,
        }
    }
}
