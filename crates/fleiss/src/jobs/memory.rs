use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::instrument;

use crate::jobs::model::{validate_owner, Job, JobState, NewJob, QueueStats};
use crate::jobs::store::JobStore;

/// In-process job table with the same conditional-write semantics as
/// [`PgJobStore`](crate::jobs::PgJobStore). Each mutation runs under the write
/// lock, which plays the role of the row lock.
#[derive(Clone, Default)]
pub struct MemoryJobStore {
    inner: Arc<RwLock<Table>>,
}

#[derive(Default)]
struct Table {
    next_id: i64,
    jobs: BTreeMap<i64, Job>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a row as-is, including claim columns. Test and fixture helper.
    pub async fn insert(&self, mut job: Job) -> i64 {
        let mut table = self.inner.write().await;
        if job.id <= 0 {
            table.next_id += 1;
            job.id = table.next_id;
        } else {
            table.next_id = table.next_id.max(job.id);
        }
        let id = job.id;
        table.jobs.insert(id, job);
        id
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.jobs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn find_next_eligible(
        &self,
        queues: &[String],
        now: DateTime<Utc>,
    ) -> anyhow::Result<Option<Job>> {
        let table = self.inner.read().await;
        let job = table
            .jobs
            .values()
            .filter(|j| j.is_eligible(queues, now))
            .min_by_key(|j| j.rank())
            .cloned();
        Ok(job)
    }

    #[instrument(level = "debug", skip(self, now, expires_at))]
    async fn claim(
        &self,
        job_id: i64,
        owner: &str,
        now: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> anyhow::Result<Option<Job>> {
        validate_owner(owner)?;

        let mut table = self.inner.write().await;
        let Some(job) = table.jobs.get_mut(&job_id) else {
            return Ok(None);
        };
        if !job.is_unclaimed() {
            return Ok(None);
        }

        job.owner = Some(owner.to_string());
        job.started_at = Some(now);
        if expires_at.is_some() {
            job.expires_at = expires_at;
        }
        Ok(Some(job.clone()))
    }

    async fn finish(&self, job_id: i64, owner: &str, now: DateTime<Utc>) -> anyhow::Result<bool> {
        let mut table = self.inner.write().await;
        match table.jobs.get_mut(&job_id) {
            Some(job) if job.finished_at.is_none() && job.owner.as_deref() == Some(owner) => {
                job.finished_at = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn reclaim_expired(&self, now: DateTime<Utc>) -> anyhow::Result<u64> {
        let mut table = self.inner.write().await;
        let mut reclaimed = 0;
        for job in table.jobs.values_mut() {
            let expired = job.started_at.is_some()
                && job.finished_at.is_none()
                && job.expires_at.is_some_and(|at| at <= now);
            if expired {
                job.owner = None;
                job.started_at = None;
                reclaimed += 1;
            }
        }
        Ok(reclaimed)
    }

    async fn enqueue(&self, job: NewJob) -> anyhow::Result<i64> {
        job.validate()?;
        let id = self
            .insert(Job {
                id: 0,
                queue_name: job.queue_name,
                priority: job.priority,
                payload: job.payload,
                scheduled_at: job.scheduled_at,
                started_at: None,
                finished_at: None,
                expires_at: job.expires_at,
                owner: None,
            })
            .await;
        Ok(id)
    }

    async fn get(&self, job_id: i64) -> anyhow::Result<Option<Job>> {
        Ok(self.inner.read().await.jobs.get(&job_id).cloned())
    }

    async fn stats(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<QueueStats>> {
        let table = self.inner.read().await;
        let mut by_queue: HashMap<&str, QueueStats> = HashMap::new();

        for job in table.jobs.values() {
            let entry = by_queue
                .entry(job.queue_name.as_str())
                .or_insert_with(|| QueueStats {
                    queue_name: job.queue_name.clone(),
                    ..Default::default()
                });
            match job.state(now) {
                JobState::Done => entry.done += 1,
                JobState::Unclaimed if job.scheduled_at <= now => entry.pending += 1,
                JobState::Unclaimed => entry.scheduled += 1,
                JobState::Claimed => entry.in_progress += 1,
                JobState::Abandoned => {
                    entry.in_progress += 1;
                    entry.abandoned += 1;
                }
            }
        }

        let mut out: Vec<QueueStats> = by_queue.into_values().collect();
        out.sort_by(|a, b| a.queue_name.cmp(&b.queue_name));
        Ok(out)
    }
}
