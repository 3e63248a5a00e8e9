//! Deadline-bounded classification of URLs.

use std::sync::Arc;
use std::time::Instant;

use swarmscan_core::Safety;
use tracing::{error, info, warn};

use crate::context::ScanContext;
use crate::decision::{DecisionPolicy, ScannableRequest};
use crate::error::Result;

/// Runs a [`DecisionPolicy`] until it is confident or time runs out.
pub struct DecisionEngine {
    ctx: Arc<ScanContext>,
    policy: Arc<dyn DecisionPolicy>,
}

impl DecisionEngine {
    pub fn new(ctx: Arc<ScanContext>, policy: Arc<dyn DecisionPolicy>) -> Self {
        Self { ctx, policy }
    }

    pub fn policy(&self) -> &dyn DecisionPolicy {
        self.policy.as_ref()
    }

    pub fn context(&self) -> &Arc<ScanContext> {
        &self.ctx
    }

    /// Verdict for `url` after as many rounds as fit in the system timeout.
    /// On timeout the last completed round stands.
    pub async fn decide(&self, url: &str) -> Result<Safety> {
        let settings = &self.ctx.decision;
        let started = Instant::now();
        let mut request = ScannableRequest::new(Arc::clone(&self.ctx), url);
        let mut safety = self.policy.undecided();

        loop {
            let Some(remaining) = settings.system_timeout.checked_sub(started.elapsed()) else {
                warn!(%url, "decision deadline reached");
                break;
            };
            match tokio::time::timeout(remaining, self.policy.process(&mut request)).await {
                Ok(result) => safety = result?,
                Err(_) => {
                    warn!(%url, policy = %self.policy.kind(), "decision round timed out");
                    break;
                }
            }
            if safety.confident {
                break;
            }
            let Some(remaining) = settings.system_timeout.checked_sub(started.elapsed()) else {
                break;
            };
            tokio::time::sleep(settings.poll_interval.min(remaining)).await;
        }
        Ok(safety)
    }

    /// Reply for the filtering proxy: empty to allow, a redirect to deny.
    /// Internal errors allow the object.
    pub async fn classify(&self, url: &str) -> String {
        if self.policy.is_exempt(url) {
            info!(%url, "exempt");
            return self.policy.allow();
        }
        let started = Instant::now();
        match self.decide(url).await {
            Ok(safety) => {
                info!(
                    %url,
                    confident = safety.confident,
                    malicious = safety.malicious,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "classified"
                );
                if safety.malicious {
                    self.policy.deny(self.ctx.decision.deny_port)
                } else {
                    self.policy.allow()
                }
            }
            Err(e) => {
                error!(%url, error = %e, "classification failed, allowing");
                self.policy.allow()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::PolicyKind;
    use crate::settings::DecisionSettings;
    use crate::test_support::Harness;
    use std::time::Duration;

    fn engine(h: &Harness, kind: PolicyKind) -> DecisionEngine {
        DecisionEngine::new(h.context.clone(), kind.build())
    }

    #[tokio::test]
    async fn test_malicious_is_denied() {
        let h = Harness::new(DecisionSettings::default());
        h.retriever.put("http://x/bad", b"evil", None);
        h.retriever.put("http://x/good", b"fine", None);

        let engine = engine(&h, PolicyKind::Simple);
        assert_eq!(engine.classify("http://x/bad").await, "http://localhost:8124/malicious.html");
        assert_eq!(engine.classify("http://x/good").await, "");
    }

    #[tokio::test]
    async fn test_errors_allow() {
        let h = Harness::new(DecisionSettings::default());
        let engine = engine(&h, PolicyKind::Local);
        assert_eq!(engine.classify("http://x/unreachable").await, "");
    }

    #[tokio::test]
    async fn test_exhausted_paranoid_denies_promptly() {
        for kind in [PolicyKind::Paranoid, PolicyKind::DynamicParanoid] {
            let h = Harness::new(DecisionSettings {
                required_scanners: 2,
                system_timeout: Duration::from_secs(3),
                poll_interval: Duration::from_millis(20),
                ..DecisionSettings::default()
            });
            h.retriever.put("http://x/a", b"fine", None);

            let engine = engine(&h, kind);
            let started = Instant::now();
            let safety = engine.decide("http://x/a").await.unwrap();
            assert_eq!(safety, Safety::MALICIOUS, "{}", kind);
            assert!(started.elapsed() < Duration::from_secs(1), "{} took {:?}", kind, started.elapsed());
            assert_eq!(engine.classify("http://x/a").await, "http://localhost:8124/malicious.html");
            // Local scan is cached across requests
            assert_eq!(h.scanner.scans(), 1);
        }
    }

    #[tokio::test]
    async fn test_slow_round_stops_at_deadline() {
        let h = Harness::new(DecisionSettings {
            system_timeout: Duration::from_millis(200),
            active_scan_wait: Duration::from_secs(30),
            ..DecisionSettings::default()
        });
        h.retriever.put("http://x/a", b"fine", None);

        // Lax waits for peers when it has no history
        let engine = engine(&h, PolicyKind::Lax);
        let started = Instant::now();
        let safety = engine.decide("http://x/a").await.unwrap();
        assert_eq!(safety, engine.policy().undecided());
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
