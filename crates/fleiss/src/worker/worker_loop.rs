use chrono::Utc;
use rand::Rng;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::config::MAX_OWNER_LEN;
use crate::jobs::claim::{claim_next, ClaimOutcome, ClaimRequest};
use crate::jobs::executor::{Executor, Outcome};
use crate::jobs::model::Job;
use crate::jobs::store::JobStore;

const FINISH_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Idle,
    Polling,
    Executing,
    Finalizing,
    Stopping,
    Stopped,
}

/// Result of one poll cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tick {
    /// A job was claimed and run. Poll again right away.
    Worked { job_id: i64, outcome: Outcome },
    Empty,
    Contended,
    StoreError,
}

/// One polling/executing unit. Owns a single claim at a time.
pub struct WorkerLoop {
    owner: String,
    queues: Arc<[String]>,
    store: Arc<dyn JobStore>,
    executor: Executor,
    wait_time: Duration,
    lease: Option<Duration>,
    claim_retries: u32,
    state: watch::Sender<WorkerState>,
}

pub struct WorkerLoopBuilder {
    pub owner: String,
    pub queues: Arc<[String]>,
    pub store: Arc<dyn JobStore>,
    pub executor: Executor,
    pub wait_time: Duration,
    pub lease: Option<Duration>,
    pub claim_retries: u32,
}

impl WorkerLoopBuilder {
    pub fn build(self) -> (WorkerLoop, watch::Receiver<WorkerState>) {
        let (tx, rx) = watch::channel(WorkerState::Idle);
        let worker = WorkerLoop {
            owner: self.owner,
            queues: self.queues,
            store: self.store,
            executor: self.executor,
            wait_time: self.wait_time,
            lease: self.lease,
            claim_retries: self.claim_retries,
            state: tx,
        };
        (worker, rx)
    }
}

impl WorkerLoop {
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    fn set(&self, state: WorkerState) {
        self.state.send_replace(state);
    }

    pub async fn run(self, shutdown: CancellationToken) {
        tracing::info!(owner = %self.owner, queues = ?self.queues, "worker loop started");

        // Spread the first polls of a freshly started pool over one wait_time.
        let stagger = self.wait_time.mul_f64(rand::thread_rng().gen_range(0.0..1.0));
        let mut stopping = tokio::select! {
            _ = shutdown.cancelled() => true,
            _ = tokio::time::sleep(stagger) => false,
        };

        while !stopping && !shutdown.is_cancelled() {
            let tick = self.tick(&shutdown).await;
            if matches!(tick, Tick::Worked { .. }) {
                continue;
            }

            self.set(WorkerState::Idle);
            stopping = tokio::select! {
                biased;
                _ = shutdown.cancelled() => true,
                _ = tokio::time::sleep(self.wait_time) => false,
            };
        }

        self.set(WorkerState::Stopping);
        self.set(WorkerState::Stopped);
        tracing::info!(owner = %self.owner, "worker loop stopped");
    }

    /// Polling → (Executing → Finalizing)? → Idle. Shutdown during Executing
    /// reports Stopping, yet the job still runs to completion and is finalized
    /// before the tick returns in Stopping.
    pub async fn tick(&self, shutdown: &CancellationToken) -> Tick {
        self.set(WorkerState::Polling);

        let req = ClaimRequest {
            queues: &self.queues,
            owner: &self.owner,
            lease: self.lease,
            max_attempts: self.claim_retries,
        };

        let job = match claim_next(self.store.as_ref(), req, Utc::now()).await {
            Ok(ClaimOutcome::Claimed(job)) => job,
            Ok(ClaimOutcome::Empty) => {
                self.set(WorkerState::Idle);
                return Tick::Empty;
            }
            Ok(ClaimOutcome::Contended) => {
                tracing::debug!(owner = %self.owner, "claim retry budget exhausted");
                self.set(WorkerState::Idle);
                return Tick::Contended;
            }
            Err(err) => {
                tracing::warn!(owner = %self.owner, error = %err, "poll failed; backing off");
                self.set(WorkerState::Idle);
                return Tick::StoreError;
            }
        };

        tracing::debug!(owner = %self.owner, job_id = job.id, queue = %job.queue_name, "claimed job");
        self.set(WorkerState::Executing);

        let exec = self.executor.execute(&job, &self.owner);
        tokio::pin!(exec);
        let mut draining = false;
        let outcome = tokio::select! {
            outcome = &mut exec => outcome,
            _ = shutdown.cancelled() => {
                draining = true;
                self.set(WorkerState::Stopping);
                tracing::info!(owner = %self.owner, job_id = job.id, "shutdown requested; finishing in-flight job");
                exec.await
            }
        };

        self.set(WorkerState::Finalizing);
        if outcome.is_success() {
            self.finalize(&job).await;
        }
        self.set(if draining {
            WorkerState::Stopping
        } else {
            WorkerState::Idle
        });

        Tick::Worked {
            job_id: job.id,
            outcome,
        }
    }

    async fn finalize(&self, job: &Job) {
        for attempt in 1..=FINISH_ATTEMPTS {
            match self.store.finish(job.id, &self.owner, Utc::now()).await {
                Ok(true) => return,
                Ok(false) => {
                    tracing::warn!(
                        owner = %self.owner,
                        job_id = job.id,
                        "claim was reclaimed before finish; job may run again"
                    );
                    return;
                }
                Err(err) => {
                    tracing::warn!(owner = %self.owner, job_id = job.id, attempt, error = %err, "finish failed");
                    if attempt < FINISH_ATTEMPTS {
                        tokio::time::sleep(self.wait_time).await;
                    }
                }
            }
        }
        tracing::error!(
            owner = %self.owner,
            job_id = job.id,
            "giving up on finish; job stays claimed until its deadline"
        );
    }
}

/// `<worker_id>:<pid>:<nonce>:<index>`, kept within the owner column width.
pub fn owner_id(worker_id: &str, nonce: &str, index: usize) -> String {
    let suffix = format!(":{}:{}:{}", std::process::id(), nonce, index);
    let budget = MAX_OWNER_LEN.saturating_sub(suffix.len());
    let mut prefix = String::with_capacity(budget);
    for c in worker_id.chars() {
        if prefix.len() + c.len_utf8() > budget {
            break;
        }
        prefix.push(c);
    }
    format!("{prefix}{suffix}")
}
