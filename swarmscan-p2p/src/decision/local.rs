use async_trait::async_trait;
use swarmscan_core::Safety;

use super::{DecisionPolicy, PolicyKind, ScannableRequest};
use crate::error::Result;

/// Trusts nobody but our own scanner.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalPolicy;

#[async_trait]
impl DecisionPolicy for LocalPolicy {
    fn kind(&self) -> PolicyKind {
        PolicyKind::Local
    }

    async fn process(&self, request: &mut ScannableRequest) -> Result<Safety> {
        let scan = request.local_scan().await?;
        Ok(Safety::new(true, scan.safety()? == Safety::MALICIOUS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::DecisionSettings;
    use crate::test_support::{seed_peer, Harness};

    #[tokio::test]
    async fn test_local_verdict_only() {
        let h = Harness::new(DecisionSettings::default());
        seed_peer(h.store.as_ref(), "bob", 1.0);
        h.retriever.put("http://x/bad", b"evil", None);
        h.retriever.put("http://x/good", b"fine", None);

        let mut bad = ScannableRequest::new(h.context.clone(), "http://x/bad");
        let mut good = ScannableRequest::new(h.context.clone(), "http://x/good");
        assert_eq!(LocalPolicy.process(&mut bad).await.unwrap(), Safety::MALICIOUS);
        assert_eq!(LocalPolicy.process(&mut good).await.unwrap(), Safety::BENIGN);
        assert!(h.transport.calls().is_empty());
    }
}
