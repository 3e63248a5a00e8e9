use async_trait::async_trait;
use chrono::Utc;
use swarmscan_core::Safety;
use tracing::debug;

use super::{Counts, DecisionPolicy, Evidence, PolicyKind, ScannableRequest};
use crate::error::Result;

/// A single recent result, local or remote, is enough.
#[derive(Debug, Clone, Copy, Default)]
pub struct LaxPolicy;

#[async_trait]
impl DecisionPolicy for LaxPolicy {
    fn kind(&self) -> PolicyKind {
        PolicyKind::Lax
    }

    async fn process(&self, request: &mut ScannableRequest) -> Result<Safety> {
        let settings = request.context().decision.clone();
        let max_days = settings.signature_age_days;
        let now = Utc::now();
        let mut counts = Counts::default();

        for hit in request.digest_scans().await {
            counts.update(&Evidence::from(hit), max_days, now);
            if counts.malicious >= 1 {
                break;
            }
        }

        if request.relevant_scans(true).await.is_empty() {
            let asked = request.request_active_scans().await;
            debug!(url = %request.url(), asked, "giving peers time to respond");
            tokio::time::sleep(settings.active_scan_wait).await;
        }

        for scan in request.relevant_scans(true).await {
            counts.update(&Evidence::from_scan(&scan)?, max_days, now);
            if counts.malicious >= 1 {
                break;
            }
        }

        if counts.found == 0 {
            let local = request.local_scan().await?;
            counts.update(&Evidence::from_scan(&local)?, max_days, now);
        }

        Ok(Safety::new(counts.found > 0, counts.malicious >= 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::DecisionSettings;
    use crate::store::Store;
    use crate::test_support::{seed_peer, whole_second_now, Harness};
    use crate::protocol::PeerCall;
    use std::time::Duration;
    use swarmscan_core::{Scan, ScanOrigin, SigInfo};

    fn quick() -> DecisionSettings {
        DecisionSettings {
            active_scan_wait: Duration::from_millis(10),
            ..DecisionSettings::default()
        }
    }

    #[tokio::test]
    async fn test_peer_answer_avoids_local_scan() {
        let h = Harness::new(quick());
        seed_peer(h.store.as_ref(), "bob", 1.0);
        h.retriever.put("http://x/a", b"clean", None);
        let store = h.store.clone();
        h.transport.on_call(move |peer, call| {
            if let PeerCall::ScanRequest { url, .. } = call {
                let sig = SigInfo::new("av1", "1", whole_second_now());
                store.insert_scan(
                    Scan::new("alice", ScanOrigin::SocialActive, url, true, sig).with_peer(&peer.name),
                );
            }
        });

        let mut request = ScannableRequest::new(h.context.clone(), "http://x/a");
        let safety = LaxPolicy.process(&mut request).await.unwrap();
        assert_eq!(safety, Safety::MALICIOUS);
        assert_eq!(h.scanner.scans(), 0);
    }

    #[tokio::test]
    async fn test_no_answers_means_local_scan() {
        let h = Harness::new(quick());
        h.retriever.put("http://x/a", b"clean", None);

        let mut request = ScannableRequest::new(h.context.clone(), "http://x/a");
        let safety = LaxPolicy.process(&mut request).await.unwrap();
        assert_eq!(safety, Safety::BENIGN);
        assert_eq!(h.scanner.scans(), 1);
    }
}
