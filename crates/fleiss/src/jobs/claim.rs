use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::jobs::model::Job;
use crate::jobs::store::JobStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// The caller owns this row now.
    Claimed(Job),
    /// Nothing eligible.
    Empty,
    /// Every attempt lost a race; the retry budget is spent.
    Contended,
}

#[derive(Debug, Clone, Copy)]
pub struct ClaimRequest<'a> {
    pub queues: &'a [String],
    pub owner: &'a str,
    pub lease: Option<Duration>,
    pub max_attempts: u32,
}

impl ClaimRequest<'_> {
    fn deadline(&self, now: DateTime<Utc>) -> anyhow::Result<Option<DateTime<Utc>>> {
        let Some(lease) = self.lease else {
            return Ok(None);
        };
        let deadline = chrono::Duration::from_std(lease)
            .ok()
            .and_then(|lease| now.checked_add_signed(lease))
            .ok_or_else(|| anyhow::anyhow!("lease of {lease:?} overflows the claim deadline"))?;
        Ok(Some(deadline))
    }
}

/// Optimistic select-then-claim. The selection read holds no lock; the
/// conditional write in [`JobStore::claim`] decides who wins, and a loser
/// simply selects again.
///
/// Ordering is best effort under contention: a faster poller can take a lower
/// ranked row while a slower one is still retrying on the top row.
pub async fn claim_next(
    store: &dyn JobStore,
    req: ClaimRequest<'_>,
    now: DateTime<Utc>,
) -> anyhow::Result<ClaimOutcome> {
    let expires_at = req.deadline(now)?;

    for attempt in 1..=req.max_attempts.max(1) {
        let Some(candidate) = store.find_next_eligible(req.queues, now).await? else {
            return Ok(ClaimOutcome::Empty);
        };

        if let Some(job) = store.claim(candidate.id, req.owner, now, expires_at).await? {
            return Ok(ClaimOutcome::Claimed(job));
        }

        tracing::debug!(
            job_id = candidate.id,
            owner = req.owner,
            attempt,
            "lost claim race, selecting again"
        );
        tokio::task::yield_now().await;
    }

    Ok(ClaimOutcome::Contended)
}
