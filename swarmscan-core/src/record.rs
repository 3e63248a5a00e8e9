//! Bookkeeping records for container files.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::container::ContainerKind;
use crate::error::{CoreError, Result};
use crate::siginfo::SigInfo;

/// Where container files live and how peers reach the ones we share.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerLocations {
    /// Directory for containers we build and share.
    pub share_dir: PathBuf,
    /// Directory for containers downloaded from peers.
    pub storage_dir: PathBuf,
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub share_root: String,
}

impl ContainerLocations {
    /// Fresh path and public URL for a container we are about to build.
    pub fn local(&self, kind: ContainerKind) -> (PathBuf, String) {
        let name = file_name(kind);
        let url = format!(
            "{}://{}:{}/{}/{}",
            self.scheme,
            self.host,
            self.port,
            self.share_root.trim_matches('/'),
            name
        );
        (self.share_dir.join(&name), url)
    }

    /// Fresh path for a container downloaded from a peer.
    pub fn foreign(&self, kind: ContainerKind) -> PathBuf {
        self.storage_dir.join(file_name(kind))
    }
}

fn file_name(kind: ContainerKind) -> String {
    format!("{}{}", Uuid::new_v4(), kind.suffix())
}

/// Metadata about one container file, ours or a peer's.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerRecord {
    /// Assigned by the store on insert.
    pub id: u64,
    pub kind: ContainerKind,
    /// Peer this record belongs to.
    pub owner: String,
    /// Peer who produced the container. Equals `owner` for our own.
    pub creator: String,
    pub url: String,
    pub path: PathBuf,
    pub siginfo: SigInfo,
    /// Sealed and queued for announcement.
    pub complete: bool,
    pub hits: u64,
    pub created: DateTime<Utc>,
    pub tainted: bool,
}

impl ContainerRecord {
    /// Record for a new container of our own.
    pub fn local(kind: ContainerKind, owner: &str, siginfo: SigInfo, locations: &ContainerLocations) -> Self {
        let (path, url) = locations.local(kind);
        Self::build(kind, owner, owner, url, path, siginfo)
    }

    /// Record for a container retrieved from `creator`.
    pub fn foreign(
        kind: ContainerKind,
        owner: &str,
        creator: &str,
        url: impl Into<String>,
        path: PathBuf,
        siginfo: SigInfo,
    ) -> Self {
        Self::build(kind, owner, creator, url.into(), path, siginfo)
    }

    fn build(kind: ContainerKind, owner: &str, creator: &str, url: String, path: PathBuf, siginfo: SigInfo) -> Self {
        Self {
            id: 0,
            kind,
            owner: owner.to_string(),
            creator: creator.to_string(),
            url,
            path,
            siginfo,
            complete: false,
            hits: 0,
            created: Utc::now(),
            tainted: false,
        }
    }

    pub fn is_foreign(&self) -> bool {
        self.creator != self.owner
    }

    /// Hits per second of age. Zero when the record has no positive age.
    pub fn usefulness(&self, now: DateTime<Utc>) -> f64 {
        let age = (now - self.created).num_milliseconds() as f64 / 1000.0;
        if age <= 0.0 {
            0.0
        } else {
            self.hits as f64 / age
        }
    }

    /// Flag the container as tainted and return its creator for punishment.
    pub fn taint(&mut self) -> Result<String> {
        if !self.is_foreign() {
            return Err(CoreError::NotImplemented(format!(
                "tainting self-created container {}",
                self.path.display()
            )));
        }
        self.tainted = true;
        Ok(self.creator.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn locations() -> ContainerLocations {
        ContainerLocations {
            share_dir: PathBuf::from("/srv/share"),
            storage_dir: PathBuf::from("/srv/storage"),
            scheme: "http".into(),
            host: "10.0.0.5".into(),
            port: 8124,
            share_root: "share".into(),
        }
    }

    fn sig() -> SigInfo {
        SigInfo::from_epoch("dummy", "1", 0)
    }

    #[test]
    fn test_local_log_record_has_suffix() {
        let rec = ContainerRecord::local(ContainerKind::Log, "alice", sig(), &locations());
        assert!(rec.url.starts_with("http://10.0.0.5:8124/share/"));
        assert!(rec.url.ends_with(".log"));
        assert!(rec.path.starts_with("/srv/share"));
        assert_eq!(rec.path.file_name().unwrap().to_str().unwrap(), rec.url.rsplit('/').next().unwrap());
        assert!(!rec.is_foreign());
    }

    #[test]
    fn test_foreign_path_in_storage() {
        let path = locations().foreign(ContainerKind::Digest);
        assert!(path.starts_with("/srv/storage"));
        assert_eq!(path.extension(), None);
    }

    #[test]
    fn test_usefulness() {
        let mut rec = ContainerRecord::local(ContainerKind::Digest, "alice", sig(), &locations());
        rec.hits = 10;
        let later = rec.created + Duration::seconds(5);
        assert!((rec.usefulness(later) - 2.0).abs() < 1e-9);
        assert_eq!(rec.usefulness(rec.created), 0.0);
    }

    #[test]
    fn test_only_foreign_records_can_be_tainted() {
        let mut ours = ContainerRecord::local(ContainerKind::Digest, "alice", sig(), &locations());
        assert!(matches!(ours.taint(), Err(CoreError::NotImplemented(_))));

        let mut theirs = ContainerRecord::foreign(
            ContainerKind::Digest,
            "alice",
            "bob",
            "http://bob/share/x",
            PathBuf::from("/srv/storage/x"),
            sig(),
        );
        assert_eq!(theirs.taint().unwrap(), "bob");
        assert!(theirs.tainted);
    }
}
