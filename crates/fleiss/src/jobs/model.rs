use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::{validate_queue_name, MAX_OWNER_LEN};
use crate::error::ConfigError;

pub const DEFAULT_PRIORITY: i16 = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Job {
    pub id: i64,
    pub queue_name: String,
    pub priority: i16,
    pub payload: String,

    pub scheduled_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,

    pub owner: Option<String>,
}

/// Lifecycle state derived from the row's timestamps; nothing stores it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Unclaimed,
    Claimed,
    Abandoned,
    Done,
}

impl Job {
    pub fn state(&self, now: DateTime<Utc>) -> JobState {
        if self.finished_at.is_some() {
            JobState::Done
        } else if self.started_at.is_none() && self.owner.is_none() {
            JobState::Unclaimed
        } else if self.expires_at.is_some_and(|at| at <= now) {
            JobState::Abandoned
        } else {
            JobState::Claimed
        }
    }

    pub fn is_unclaimed(&self) -> bool {
        self.started_at.is_none() && self.owner.is_none() && self.finished_at.is_none()
    }

    pub fn is_eligible(&self, queues: &[String], now: DateTime<Utc>) -> bool {
        self.is_unclaimed()
            && self.scheduled_at <= now
            && queues.iter().any(|q| q == &self.queue_name)
    }

    pub fn is_abandoned(&self, now: DateTime<Utc>) -> bool {
        self.state(now) == JobState::Abandoned
    }

    /// Selection order: priority, then scheduled_at, then id.
    pub fn rank(&self) -> (i16, DateTime<Utc>, i64) {
        (self.priority, self.scheduled_at, self.id)
    }
}

#[derive(Debug, Clone)]
pub struct NewJob {
    pub queue_name: String,
    pub priority: i16,
    pub payload: String,
    pub scheduled_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl NewJob {
    pub fn new(queue_name: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            queue_name: queue_name.into(),
            priority: DEFAULT_PRIORITY,
            payload: payload.into(),
            scheduled_at: Utc::now(),
            expires_at: None,
        }
    }

    pub fn priority(mut self, priority: i16) -> Self {
        self.priority = priority;
        self
    }

    pub fn scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = at;
        self
    }

    pub fn expires_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_queue_name(&self.queue_name)
    }
}

/// Owner ids are stored in a VARCHAR(100) column.
pub fn validate_owner(owner: &str) -> anyhow::Result<()> {
    if owner.is_empty() || owner.len() > MAX_OWNER_LEN {
        anyhow::bail!("owner id must be 1..={MAX_OWNER_LEN} bytes, got {}", owner.len());
    }
    Ok(())
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct QueueStats {
    pub queue_name: String,
    /// Unclaimed and due now.
    pub pending: i64,
    /// Unclaimed, scheduled in the future.
    pub scheduled: i64,
    pub in_progress: i64,
    /// Subset of `in_progress` whose deadline has passed.
    pub abandoned: i64,
    pub done: i64,
}
