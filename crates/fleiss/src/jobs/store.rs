use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::jobs::model::{Job, NewJob, QueueStats};

/// The shared job table. Every mutation is a single conditional write, so
/// implementations stay correct under callers in other processes.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Best-ranked eligible row, or `None`. A hint, not a reservation.
    async fn find_next_eligible(
        &self,
        queues: &[String],
        now: DateTime<Utc>,
    ) -> anyhow::Result<Option<Job>>;

    /// Assigns `owner`/`started_at` only if the row is still unclaimed.
    /// `None` means another caller won.
    async fn claim(
        &self,
        job_id: i64,
        owner: &str,
        now: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> anyhow::Result<Option<Job>>;

    /// Sets `finished_at` if `owner` still holds the claim.
    async fn finish(&self, job_id: i64, owner: &str, now: DateTime<Utc>) -> anyhow::Result<bool>;

    /// Reverts every abandoned row to unclaimed and returns how many changed.
    async fn reclaim_expired(&self, now: DateTime<Utc>) -> anyhow::Result<u64>;

    async fn enqueue(&self, job: NewJob) -> anyhow::Result<i64>;

    async fn get(&self, job_id: i64) -> anyhow::Result<Option<Job>>;

    async fn stats(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<QueueStats>>;
}
