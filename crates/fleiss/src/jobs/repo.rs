// crates/fleiss/src/jobs/repo.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::jobs::model::{validate_owner, Job, NewJob, QueueStats};
use crate::jobs::store::JobStore;

/// Postgres-backed job table (`fleiss_jobs`).
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    // ----------------------------
    // Selection
    // ----------------------------

    async fn find_next_eligible(
        &self,
        queues: &[String],
        now: DateTime<Utc>,
    ) -> anyhow::Result<Option<Job>> {
        // Plain read, no row lock: the claim below is what decides ownership.
        let job = sqlx::query_as::<_, Job>(
            r#"
            SELECT *
            FROM fleiss_jobs
            WHERE queue_name = ANY($1)
              AND started_at IS NULL
              AND owner IS NULL
              AND finished_at IS NULL
              AND scheduled_at <= $2
            ORDER BY priority ASC, scheduled_at ASC, id ASC
            LIMIT 1
            "#,
        )
        .bind(queues)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        Ok(job)
    }

    // ----------------------------
    // State transitions
    // ----------------------------

    async fn claim(
        &self,
        job_id: i64,
        owner: &str,
        now: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> anyhow::Result<Option<Job>> {
        validate_owner(owner)?;

        let job = sqlx::query_as::<_, Job>(
            r#"
            UPDATE fleiss_jobs
            SET owner = $2,
                started_at = $3,
                expires_at = COALESCE($4, expires_at)
            WHERE id = $1
              AND started_at IS NULL
              AND owner IS NULL
              AND finished_at IS NULL
            RETURNING *
            "#,
        )
        .bind(job_id)
        .bind(owner)
        .bind(now)
        .bind(expires_at)
        .fetch_optional(&self.pool)
        .await?;

        Ok(job)
    }

    async fn finish(&self, job_id: i64, owner: &str, now: DateTime<Utc>) -> anyhow::Result<bool> {
        let res = sqlx::query(
            r#"
            UPDATE fleiss_jobs
            SET finished_at = $3
            WHERE id = $1
              AND owner = $2
              AND finished_at IS NULL
            "#,
        )
        .bind(job_id)
        .bind(owner)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected() == 1)
    }

    async fn reclaim_expired(&self, now: DateTime<Utc>) -> anyhow::Result<u64> {
        // One statement: Postgres re-checks the WHERE clause on each locked row,
        // so concurrent reapers (or a concurrent finish) never double-revert.
        let res = sqlx::query(
            r#"
            UPDATE fleiss_jobs
            SET owner = NULL,
                started_at = NULL
            WHERE started_at IS NOT NULL
              AND finished_at IS NULL
              AND expires_at IS NOT NULL
              AND expires_at <= $1
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected())
    }

    // ----------------------------
    // Producer side + reads
    // ----------------------------

    async fn enqueue(&self, job: NewJob) -> anyhow::Result<i64> {
        job.validate()?;

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO fleiss_jobs (queue_name, priority, payload, scheduled_at, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(&job.queue_name)
        .bind(job.priority)
        .bind(&job.payload)
        .bind(job.scheduled_at)
        .bind(job.expires_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    async fn get(&self, job_id: i64) -> anyhow::Result<Option<Job>> {
        let job = sqlx::query_as::<_, Job>("SELECT * FROM fleiss_jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(job)
    }

    async fn stats(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<QueueStats>> {
        let rows = sqlx::query_as::<_, QueueStats>(
            r#"
            SELECT
                queue_name,
                COUNT(*) FILTER (
                    WHERE finished_at IS NULL AND started_at IS NULL AND owner IS NULL
                      AND scheduled_at <= $1
                ) AS pending,
                COUNT(*) FILTER (
                    WHERE finished_at IS NULL AND started_at IS NULL AND owner IS NULL
                      AND scheduled_at > $1
                ) AS scheduled,
                COUNT(*) FILTER (
                    WHERE finished_at IS NULL AND (started_at IS NOT NULL OR owner IS NOT NULL)
                ) AS in_progress,
                COUNT(*) FILTER (
                    WHERE finished_at IS NULL AND (started_at IS NOT NULL OR owner IS NOT NULL)
                      AND expires_at IS NOT NULL AND expires_at <= $1
                ) AS abandoned,
                COUNT(*) FILTER (WHERE finished_at IS NOT NULL) AS done
            FROM fleiss_jobs
            GROUP BY queue_name
            ORDER BY queue_name
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}
