//! Decision policies: how evidence about one object becomes a verdict.
//!
//! Every policy works through the same primitive steps on a
//! [`ScannableRequest`]: loaded digests then logs, previously received
//! scans, active scan requests to close peers, and finally a local scan.
//! They differ in ordering and in when they consider themselves confident.
//!
//! | name               | confident when                                        |
//! |--------------------|-------------------------------------------------------|
//! | `simple`           | weighted average of evidence exceeds the threshold    |
//! | `paranoid`         | enough distinct recent scanners, or any malicious one |
//! | `dynamic-paranoid` | as paranoid, scanner count derived from object age    |
//! | `lax`              | any single recent result                              |
//! | `local`            | always, from the local scan alone                     |

mod dynamic_paranoid;
mod lax;
mod local;
mod paranoid;
mod request;
mod simple;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use swarmscan_core::{Safety, Scan, SigInfo};

use crate::error::{P2pError, Result};
use crate::manager::SearchHit;

pub use dynamic_paranoid::{dynamic_threshold, DynamicParanoidPolicy};
pub use lax::LaxPolicy;
pub use local::LocalPolicy;
pub use paranoid::ParanoidPolicy;
pub use request::ScannableRequest;
pub use simple::SimplePolicy;

/// A verdict strategy.
#[async_trait]
pub trait DecisionPolicy: Send + Sync {
    fn kind(&self) -> PolicyKind;

    /// Objects that are allowed without looking at them.
    fn is_exempt(&self, _url: &str) -> bool {
        false
    }

    /// Reply for an allowed object.
    fn allow(&self) -> String {
        String::new()
    }

    /// Reply for a denied object: a redirect to the local warning page.
    fn deny(&self, port: u16) -> String {
        format!("http://localhost:{}/malicious.html", port)
    }

    /// Verdict in force before the first round of evidence completes.
    fn undecided(&self) -> Safety {
        Safety::POSSIBLY_BENIGN
    }

    /// One round of evidence gathering. Rounds repeat until confident.
    async fn process(&self, request: &mut ScannableRequest) -> Result<Safety>;
}

/// Registry of policy names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PolicyKind {
    Simple,
    Paranoid,
    DynamicParanoid,
    Lax,
    Local,
}

impl PolicyKind {
    pub const ALL: [PolicyKind; 5] = [
        PolicyKind::Simple,
        PolicyKind::Paranoid,
        PolicyKind::DynamicParanoid,
        PolicyKind::Lax,
        PolicyKind::Local,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyKind::Simple => "simple",
            PolicyKind::Paranoid => "paranoid",
            PolicyKind::DynamicParanoid => "dynamic-paranoid",
            PolicyKind::Lax => "lax",
            PolicyKind::Local => "local",
        }
    }

    pub fn build(self) -> Arc<dyn DecisionPolicy> {
        match self {
            PolicyKind::Simple => Arc::new(SimplePolicy),
            PolicyKind::Paranoid => Arc::new(ParanoidPolicy),
            PolicyKind::DynamicParanoid => Arc::new(DynamicParanoidPolicy),
            PolicyKind::Lax => Arc::new(LaxPolicy),
            PolicyKind::Local => Arc::new(LocalPolicy),
        }
    }
}

impl FromStr for PolicyKind {
    type Err = P2pError;

    fn from_str(s: &str) -> Result<Self> {
        PolicyKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| P2pError::UnknownPolicy(s.to_string()))
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One piece of evidence: a verdict and the signatures it was reached with.
#[derive(Debug, Clone, PartialEq)]
pub struct Evidence {
    pub safety: Safety,
    pub siginfo: SigInfo,
}

impl Evidence {
    /// Fails on tainted scans.
    pub fn from_scan(scan: &Scan) -> Result<Self> {
        Ok(Self {
            safety: scan.safety()?,
            siginfo: scan.siginfo()?.clone(),
        })
    }
}

impl From<SearchHit> for Evidence {
    fn from(hit: SearchHit) -> Self {
        Self {
            safety: hit.safety,
            siginfo: hit.siginfo,
        }
    }
}

/// Signatures no older than `max_days` whole days.
fn is_recent(siginfo: &SigInfo, max_days: f64, now: DateTime<Utc>) -> bool {
    siginfo.age_days(now).floor() <= max_days
}

/// Tallies of (found, malicious) evidence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    pub found: u32,
    pub malicious: u32,
}

impl Counts {
    /// Count one piece of evidence if its signatures are recent enough.
    pub fn update(&mut self, evidence: &Evidence, max_days: f64, now: DateTime<Utc>) {
        if is_recent(&evidence.siginfo, max_days, now) {
            self.found += 1;
            if evidence.safety == Safety::MALICIOUS {
                self.malicious += 1;
            }
        }
    }

    /// Count distinct scanners with recent signatures. A scanner counts as
    /// malicious if any of its results is.
    pub fn by_scanner<'a>(
        evidence: impl IntoIterator<Item = &'a Evidence>,
        max_days: f64,
        now: DateTime<Utc>,
    ) -> Self {
        let mut scanners: BTreeMap<&str, bool> = BTreeMap::new();
        for e in evidence {
            if !is_recent(&e.siginfo, max_days, now) {
                continue;
            }
            let malicious = scanners.entry(e.siginfo.scanner.as_str()).or_insert(false);
            *malicious |= e.safety == Safety::MALICIOUS;
        }
        Self {
            found: scanners.len() as u32,
            malicious: scanners.values().filter(|m| **m).count() as u32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn evidence(scanner: &str, safety: Safety, age_days: i64, now: DateTime<Utc>) -> Evidence {
        Evidence {
            safety,
            siginfo: SigInfo::new(scanner, "1", now - Duration::days(age_days)),
        }
    }

    #[test]
    fn test_registry_names() {
        for kind in PolicyKind::ALL {
            assert_eq!(kind.as_str().parse::<PolicyKind>().unwrap(), kind);
            assert_eq!(kind.build().kind(), kind);
        }
        assert!(matches!("strict".parse::<PolicyKind>(), Err(P2pError::UnknownPolicy(_))));
    }

    #[test]
    fn test_default_replies() {
        let policy = PolicyKind::Simple.build();
        assert_eq!(policy.allow(), "");
        assert_eq!(policy.deny(8124), "http://localhost:8124/malicious.html");
        assert!(!policy.is_exempt("http://anything/"));
    }

    #[test]
    fn test_stale_evidence_is_not_found() {
        let now = Utc::now();
        let mut counts = Counts::default();
        counts.update(&evidence("a", Safety::MALICIOUS, 11, now), 10.0, now);
        assert_eq!(counts, Counts::default());
        counts.update(&evidence("a", Safety::MALICIOUS, 10, now), 10.0, now);
        assert_eq!(counts, Counts { found: 1, malicious: 1 });
    }

    #[test]
    fn test_possibly_malicious_is_not_malicious() {
        let now = Utc::now();
        let mut counts = Counts::default();
        counts.update(&evidence("a", Safety::POSSIBLY_MALICIOUS, 0, now), 10.0, now);
        assert_eq!(counts, Counts { found: 1, malicious: 0 });
    }

    #[test]
    fn test_by_scanner_collapses_duplicates() {
        let now = Utc::now();
        let all = vec![
            evidence("a", Safety::BENIGN, 0, now),
            evidence("a", Safety::MALICIOUS, 0, now),
            evidence("b", Safety::BENIGN, 1, now),
            evidence("c", Safety::MALICIOUS, 30, now),
        ];
        assert_eq!(Counts::by_scanner(&all, 10.0, now), Counts { found: 2, malicious: 1 });
    }
}
