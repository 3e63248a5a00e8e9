use std::collections::HashSet;

use async_trait::async_trait;
use chrono::Utc;
use swarmscan_core::Safety;
use tracing::debug;

use super::{Counts, DecisionPolicy, Evidence, PolicyKind, ScannableRequest};
use crate::error::Result;

/// Requires `required_scanners` distinct scanners with recent signatures.
/// Any malicious result blocks the object, and so does running out of
/// evidence before enough scanners have answered.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParanoidPolicy;

/// Fold the evidence so far into a verdict. Until `required` scanners are
/// in, the object is treated as malicious.
pub(crate) fn evaluate(required: u32, evidence: &[Evidence], max_days: f64) -> Safety {
    let counts = Counts::by_scanner(evidence, max_days, Utc::now());
    debug!(required, found = counts.found, malicious = counts.malicious, "paranoid counts");
    let malicious = counts.malicious > 0;
    let confident = malicious || counts.found >= required;
    Safety::new(confident, malicious || !confident)
}

/// Verdict once our own scan is in. Only a full set of benign scanners
/// allows the object.
pub(crate) fn conclude(required: u32, evidence: &[Evidence], max_days: f64) -> Safety {
    let counts = Counts::by_scanner(evidence, max_days, Utc::now());
    if counts.malicious == 0 && counts.found >= required {
        Safety::BENIGN
    } else {
        debug!(required, found = counts.found, "evidence exhausted, blocking");
        Safety::MALICIOUS
    }
}

/// The paranoid rounds with an explicit scanner requirement.
pub(crate) async fn process_with(required: u32, request: &mut ScannableRequest) -> Result<Safety> {
    let max_days = request.context().decision.signature_age_days;
    let mut evidence = Vec::new();
    let mut seen = HashSet::new();

    for scan in request.relevant_scans(false).await {
        seen.insert(scan.id);
        evidence.push(Evidence::from_scan(&scan)?);
    }
    let current = evaluate(required, &evidence, max_days);
    if current.confident {
        return Ok(current);
    }

    evidence.extend(request.digest_scans().await.into_iter().map(Evidence::from));
    let current = evaluate(required, &evidence, max_days);
    if current.confident {
        return Ok(current);
    }

    request.request_active_scans().await;
    let local = request.local_scan().await?;
    // A stored local scan already came in with the relevant scans
    if seen.insert(local.id) {
        evidence.push(Evidence::from_scan(&local)?);
    }
    Ok(conclude(required, &evidence, max_days))
}

#[async_trait]
impl DecisionPolicy for ParanoidPolicy {
    fn kind(&self) -> PolicyKind {
        PolicyKind::Paranoid
    }

    fn undecided(&self) -> Safety {
        Safety::POSSIBLY_MALICIOUS
    }

    async fn process(&self, request: &mut ScannableRequest) -> Result<Safety> {
        let required = request.context().decision.required_scanners;
        process_with(required, request).await
    }
}
