use async_trait::async_trait;
use chrono::Utc;
use swarmscan_core::Safety;
use tracing::debug;

use super::paranoid::process_with;
use super::{DecisionPolicy, PolicyKind, ScannableRequest};
use crate::error::Result;

/// Paranoid, with the scanner requirement shrinking as the object ages.
/// Objects without a `Last-Modified` header use the configured requirement.
#[derive(Debug, Clone, Copy, Default)]
pub struct DynamicParanoidPolicy;

/// `ceil(1 / log10(max(freshness_limit, age_days)))`, or `None` when the
/// logarithm is not positive.
pub fn dynamic_threshold(age_days: f64, freshness_limit_days: f64) -> Option<u32> {
    let log = age_days.max(freshness_limit_days).log10();
    if log <= 0.0 || !log.is_finite() {
        return None;
    }
    Some((1.0 / log).ceil() as u32)
}

#[async_trait]
impl DecisionPolicy for DynamicParanoidPolicy {
    fn kind(&self) -> PolicyKind {
        PolicyKind::DynamicParanoid
    }

    fn undecided(&self) -> Safety {
        Safety::POSSIBLY_MALICIOUS
    }

    async fn process(&self, request: &mut ScannableRequest) -> Result<Safety> {
        let settings = request.context().decision.clone();
        let required = match request.age().await {
            Some(modified) => {
                let age_days = (Utc::now() - modified).num_seconds() as f64 / 86_400.0;
                let required = dynamic_threshold(age_days, settings.freshness_limit_days)
                    .unwrap_or(settings.required_scanners);
                debug!(url = %request.url(), age_days, required, "dynamic scanner requirement");
                required
            }
            None => settings.required_scanners,
        };
        process_with(required, request).await
    }
}
