//! Daemon configuration.
//!
//! Loaded from TOML. Every key has a default, so a partial or missing file
//! still yields a complete configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use swarmscan_p2p::{
    DecisionSettings, ManagerSettings, Peer, PolicyKind, ScanningSettings, SharingSettings,
};

/// File looked up in the data directory when no `--config` is given.
pub const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    pub core: CoreConfig,
    pub scanning: ScanningConfig,
    pub container_manager: ManagerConfig,
    pub sharing: SharingConfig,
    pub store: StoreConfig,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub peers: Vec<PeerConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Our peer name.
    pub owner: String,
    pub log_level: String,
    pub log_format: LogFormat,
    pub data_dir: PathBuf,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            owner: "localpeer".into(),
            log_level: "info".into(),
            log_format: LogFormat::Text,
            data_dir: default_data_dir(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub decision_handler: String,
    pub confidence_threshold: f64,
    pub required_scanners: u32,
    /// Days.
    pub signature_age: f64,
    /// Days.
    pub freshness_limit: f64,
    /// Seconds.
    pub system_timeout: u64,
    /// Milliseconds.
    pub poll_interval: u64,
    /// Milliseconds.
    pub active_scan_wait: u64,
    /// Address the filtering proxy connects to.
    pub listen: String,
}

impl Default for CoreConfig {
    fn default() -> Self {
        let decision = DecisionSettings::default();
        Self {
            decision_handler: PolicyKind::Simple.to_string(),
            confidence_threshold: decision.confidence_threshold,
            required_scanners: decision.required_scanners,
            signature_age: decision.signature_age_days,
            freshness_limit: decision.freshness_limit_days,
            system_timeout: decision.system_timeout.as_secs(),
            poll_interval: decision.poll_interval.as_millis() as u64,
            active_scan_wait: decision.active_scan_wait.as_millis() as u64,
            listen: "127.0.0.1:8123".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanningConfig {
    pub handler: String,
    pub max_active_distance: f64,
    pub max_active_retries: u32,
    /// Defaults to `{data_dir}/downloads`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_dir: Option<PathBuf>,
    /// Seconds.
    pub network_timeout: u64,
}

impl Default for ScanningConfig {
    fn default() -> Self {
        let scanning = ScanningSettings::default();
        Self {
            handler: "dummy".into(),
            max_active_distance: scanning.max_active_distance,
            max_active_retries: scanning.max_active_retries,
            download_dir: None,
            network_timeout: scanning.network_timeout.as_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    pub max_capacity: u32,
    pub load_limit: usize,
    pub announce_distance: f64,
    pub redemption_amount: f64,
    /// Seconds.
    pub download_timeout: u64,
    pub process_single_offer: bool,
    /// Seconds between container updates.
    pub update_interval: u64,
    /// Seconds between offer retrievals.
    pub retrieve_interval: u64,
    /// Seconds between relationship redemptions.
    pub redemption_interval: u64,
    /// Seconds between requested scans.
    pub active_scan_interval: u64,
    /// Defaults to `{data_dir}/share`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub share_dir: Option<PathBuf>,
    /// Defaults to `{data_dir}/storage`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_dir: Option<PathBuf>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_capacity: 500,
            load_limit: 20,
            announce_distance: 5.0,
            redemption_amount: 0.1,
            download_timeout: 30,
            process_single_offer: false,
            update_interval: 60,
            retrieve_interval: 30,
            redemption_interval: 3600,
            active_scan_interval: 5,
            share_dir: None,
            storage_dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SharingConfig {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub share_root: String,
}

impl Default for SharingConfig {
    fn default() -> Self {
        let sharing = SharingSettings::default();
        Self {
            scheme: sharing.scheme,
            host: sharing.host,
            port: sharing.port,
            share_root: sharing.share_root,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Defaults to `{data_dir}/store.json`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<PathBuf>,
}

/// A peer and its real distance from the trust-score source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerConfig {
    pub name: String,
    /// Base URL of the peer's RPC endpoint.
    pub url: String,
    pub distance: f64,
    /// Seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

impl PeerConfig {
    pub fn to_peer(&self) -> Peer {
        let peer = Peer::new(&self.name, &self.url);
        match self.timeout {
            Some(secs) => peer.with_timeout(Duration::from_secs(secs)),
            None => peer,
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".swarmscan")
}

impl Config {
    /// Load `path`, or `{data_dir}/config.toml` if it exists, or the defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => {
                let fallback = default_data_dir().join(CONFIG_FILE);
                if !fallback.exists() {
                    return Ok(Self::default());
                }
                fallback
            }
        };
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn parse(text: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn to_toml(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn policy_kind(&self) -> anyhow::Result<PolicyKind> {
        Ok(self.core.decision_handler.parse()?)
    }

    pub fn data_dir(&self) -> &Path {
        &self.general.data_dir
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.store
            .snapshot
            .clone()
            .unwrap_or_else(|| self.data_dir().join("store.json"))
    }

    pub fn share_dir(&self) -> PathBuf {
        self.container_manager
            .share_dir
            .clone()
            .unwrap_or_else(|| self.data_dir().join("share"))
    }

    pub fn storage_dir(&self) -> PathBuf {
        self.container_manager
            .storage_dir
            .clone()
            .unwrap_or_else(|| self.data_dir().join("storage"))
    }

    pub fn download_dir(&self) -> PathBuf {
        self.scanning
            .download_dir
            .clone()
            .unwrap_or_else(|| self.data_dir().join("downloads"))
    }

    pub fn sharing_settings(&self) -> SharingSettings {
        SharingSettings {
            scheme: self.sharing.scheme.clone(),
            host: self.sharing.host.clone(),
            port: self.sharing.port,
            share_root: self.sharing.share_root.clone(),
        }
    }

    pub fn manager_settings(&self) -> ManagerSettings {
        let cm = &self.container_manager;
        let locations = self
            .sharing_settings()
            .locations(self.share_dir(), self.storage_dir());
        ManagerSettings {
            max_capacity: cm.max_capacity,
            load_limit: cm.load_limit,
            announce_distance: cm.announce_distance,
            redemption_amount: cm.redemption_amount,
            download_timeout: Duration::from_secs(cm.download_timeout),
            process_single_offer: cm.process_single_offer,
            ..ManagerSettings::new(locations)
        }
    }

    pub fn scanning_settings(&self) -> ScanningSettings {
        ScanningSettings {
            max_active_distance: self.scanning.max_active_distance,
            max_active_retries: self.scanning.max_active_retries,
            download_dir: self.download_dir(),
            network_timeout: Duration::from_secs(self.scanning.network_timeout),
        }
    }

    pub fn decision_settings(&self) -> DecisionSettings {
        let core = &self.core;
        DecisionSettings {
            confidence_threshold: core.confidence_threshold,
            required_scanners: core.required_scanners,
            signature_age_days: core.signature_age,
            freshness_limit_days: core.freshness_limit,
            system_timeout: Duration::from_secs(core.system_timeout),
            poll_interval: Duration::from_millis(core.poll_interval),
            active_scan_wait: Duration::from_millis(core.active_scan_wait),
            deny_port: self.sharing.port,
        }
    }
}
