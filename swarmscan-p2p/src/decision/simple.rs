use async_trait::async_trait;
use swarmscan_core::{Safety, WeightedAverager};
use tracing::debug;

use super::{DecisionPolicy, PolicyKind, ScannableRequest};
use crate::error::Result;

const DIGEST_WEIGHT: f64 = 0.8;
const HISTORY_WEIGHT: f64 = 1.0;
const LOCAL_WEIGHT: f64 = 1.0;

/// Weighted average of all evidence, confident past the threshold.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimplePolicy;

fn verdict(average: &WeightedAverager, threshold: f64) -> Safety {
    let avg = average.average();
    Safety::new(avg.abs() > threshold, avg > 0.0)
}

#[async_trait]
impl DecisionPolicy for SimplePolicy {
    fn kind(&self) -> PolicyKind {
        PolicyKind::Simple
    }

    async fn process(&self, request: &mut ScannableRequest) -> Result<Safety> {
        let threshold = request.context().decision.confidence_threshold;
        let mut maliciousness = WeightedAverager::new();
        request.headers().await;

        for hit in request.digest_scans().await {
            maliciousness.add(hit.safety.weight(), DIGEST_WEIGHT);
        }
        let current = verdict(&maliciousness, threshold);
        if current.confident {
            return Ok(current);
        }

        for scan in request.relevant_scans(true).await {
            maliciousness.add(scan.safety()?.weight(), HISTORY_WEIGHT);
        }
        let current = verdict(&maliciousness, threshold);
        if current.confident {
            return Ok(current);
        }

        request.request_active_scans().await;

        let local = request.local_scan().await?;
        maliciousness.add(local.safety()?.weight(), LOCAL_WEIGHT);
        debug!(url = %request.url(), average = maliciousness.average(), "simple verdict");
        Ok(verdict(&maliciousness, threshold))
    }
}
