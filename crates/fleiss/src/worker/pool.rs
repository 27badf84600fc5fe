use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::PoolSettings;
use crate::error::ConfigError;
use crate::jobs::executor::Executor;
use crate::jobs::handlers::HandlerRegistry;
use crate::jobs::store::JobStore;
use crate::worker::reaper::Reaper;
use crate::worker::worker_loop::{owner_id, WorkerLoopBuilder, WorkerState};

/// A validated, not yet running set of worker loops.
pub struct WorkerPool {
    store: Arc<dyn JobStore>,
    executor: Executor,
    settings: PoolSettings,
    shutdown: CancellationToken,
}

impl WorkerPool {
    pub fn new(
        store: Arc<dyn JobStore>,
        registry: Arc<HandlerRegistry>,
        settings: PoolSettings,
    ) -> Result<Self, ConfigError> {
        settings.validate()?;
        Ok(Self {
            store,
            executor: Executor::new(registry),
            settings,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    /// Token that stops the pool when cancelled. Hand it to a signal listener
    /// before calling `start`.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn start(self) -> RunningPool {
        let queues: Arc<[String]> = self.settings.queues.iter().cloned().collect();
        let nonce = Uuid::new_v4().simple().to_string()[..8].to_string();

        let mut workers = Vec::with_capacity(self.settings.concurrency);
        let mut tasks = Vec::with_capacity(self.settings.concurrency);

        for index in 0..self.settings.concurrency {
            let (worker, rx) = WorkerLoopBuilder {
                owner: owner_id(&self.settings.worker_id, &nonce, index),
                queues: queues.clone(),
                store: self.store.clone(),
                executor: self.executor.clone(),
                wait_time: self.settings.wait_time,
                lease: self.settings.lease,
                claim_retries: self.settings.claim_retries,
            }
            .build();

            workers.push((worker.owner().to_string(), rx));
            tasks.push(tokio::spawn(worker.run(self.shutdown.clone())));
        }

        let reaper = Reaper::new(self.store.clone(), self.settings.reap_interval);
        let reaper = tokio::spawn(reaper.run(self.shutdown.clone()));

        tracing::info!(
            worker_id = %self.settings.worker_id,
            queues = ?self.settings.queues,
            concurrency = self.settings.concurrency,
            wait_time_ms = self.settings.wait_time.as_millis() as u64,
            lease_secs = self.settings.lease.map(|l| l.as_secs()),
            "worker pool started"
        );

        RunningPool {
            shutdown: self.shutdown,
            board: WorkerBoard {
                workers: Arc::new(workers),
            },
            tasks,
            reaper,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerStatus {
    pub owner: String,
    pub state: WorkerState,
}

/// Read-only view of every loop's current state.
#[derive(Clone)]
pub struct WorkerBoard {
    workers: Arc<Vec<(String, watch::Receiver<WorkerState>)>>,
}

impl WorkerBoard {
    pub fn empty() -> Self {
        Self {
            workers: Arc::new(Vec::new()),
        }
    }

    pub fn snapshot(&self) -> Vec<WorkerStatus> {
        self.workers
            .iter()
            .map(|(owner, rx)| WorkerStatus {
                owner: owner.clone(),
                state: *rx.borrow(),
            })
            .collect()
    }
}

pub struct RunningPool {
    shutdown: CancellationToken,
    board: WorkerBoard,
    tasks: Vec<JoinHandle<()>>,
    reaper: JoinHandle<()>,
}

impl RunningPool {
    /// Stops new polling. In-flight jobs still run to completion. Idempotent.
    pub fn shutdown(&self) {
        if !self.shutdown.is_cancelled() {
            tracing::info!("worker pool shutting down");
        }
        self.shutdown.cancel();
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn board(&self) -> WorkerBoard {
        self.board.clone()
    }

    pub fn states(&self) -> Vec<WorkerStatus> {
        self.board.snapshot()
    }

    /// Blocks until every loop reports Stopped and the reaper has exited.
    pub async fn wait(self) -> anyhow::Result<()> {
        let mut first_err = None;
        for task in self.tasks {
            if let Err(err) = task.await {
                tracing::error!(error = %err, "worker loop task failed");
                first_err.get_or_insert(err);
            }
        }
        if let Err(err) = self.reaper.await {
            tracing::error!(error = %err, "reaper task failed");
            first_err.get_or_insert(err);
        }

        match first_err {
            Some(err) => Err(err.into()),
            None => {
                tracing::info!("worker pool stopped");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::JobError;
    use crate::jobs::handlers::boxed;
    use crate::jobs::memory::MemoryJobStore;
    use crate::jobs::model::{JobState, NewJob};
    use crate::jobs::payload::Payload;
    use chrono::Utc;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    fn settings(concurrency: usize) -> PoolSettings {
        PoolSettings::new(["default"])
            .worker_id("test-host")
            .concurrency(concurrency)
            .wait_time(Duration::from_millis(10))
            .reap_interval(Duration::from_millis(20))
    }

    fn payload(handler: &str) -> String {
        Payload::new(handler, json!(null)).encode()
    }

    #[test]
    fn invalid_settings_fail_before_start() {
        let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
        let registry = Arc::new(HandlerRegistry::new());

        let err = WorkerPool::new(store.clone(), registry.clone(), settings(0))
            .err()
            .expect("zero concurrency must be rejected");
        assert_eq!(err, ConfigError::InvalidConcurrency(0));

        let err = WorkerPool::new(store, registry, PoolSettings::new(Vec::<String>::new()))
            .err()
            .expect("empty queue list must be rejected");
        assert_eq!(err, ConfigError::NoQueues);
    }

    #[tokio::test]
    async fn pool_drains_the_queue() {
        let store = MemoryJobStore::new();
        let ran = Arc::new(AtomicUsize::new(0));

        let mut registry = HandlerRegistry::new();
        let counter = ran.clone();
        registry.register("count", move |_ctx| {
            let counter = counter.clone();
            boxed(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        });

        let mut ids = Vec::new();
        for _ in 0..20 {
            ids.push(store.enqueue(NewJob::new("default", payload("count"))).await.unwrap());
        }

        let pool = WorkerPool::new(Arc::new(store.clone()), Arc::new(registry), settings(4))
            .unwrap()
            .start();
        assert_eq!(pool.states().len(), 4);

        tokio::time::timeout(Duration::from_secs(5), async {
            while ran.load(Ordering::SeqCst) < 20 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("all jobs should run");

        pool.shutdown();
        pool.shutdown();
        tokio::time::timeout(Duration::from_secs(5), pool.wait())
            .await
            .expect("pool should stop")
            .unwrap();

        assert_eq!(ran.load(Ordering::SeqCst), 20, "each job runs exactly once");
        for id in ids {
            let job = store.get(id).await.unwrap().unwrap();
            assert_eq!(job.state(Utc::now()), JobState::Done);
        }
    }

    #[tokio::test]
    async fn shutdown_waits_for_the_in_flight_job() {
        let store = MemoryJobStore::new();
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());

        let mut registry = HandlerRegistry::new();
        let (s, r) = (started.clone(), release.clone());
        registry.register("slow", move |_ctx| {
            let (s, r) = (s.clone(), r.clone());
            boxed(async move {
                s.notify_one();
                r.notified().await;
                Ok(())
            })
        });

        let id = store.enqueue(NewJob::new("default", payload("slow"))).await.unwrap();

        let pool = WorkerPool::new(Arc::new(store.clone()), Arc::new(registry), settings(1))
            .unwrap()
            .start();
        let mut rx = pool.board().workers[0].1.clone();

        tokio::time::timeout(Duration::from_secs(5), started.notified())
            .await
            .expect("job should start");
        assert_eq!(pool.states()[0].state, WorkerState::Executing);

        pool.shutdown();
        tokio::time::timeout(
            Duration::from_secs(2),
            rx.wait_for(|s| *s == WorkerState::Stopping),
        )
        .await
        .expect("loop should report stopping")
        .unwrap();

        // Still running: shutdown alone must not finish or abandon the job.
        let job = store.get(id).await.unwrap().unwrap();
        assert_eq!(job.state(Utc::now()), JobState::Claimed);

        release.notify_one();
        tokio::time::timeout(Duration::from_secs(5), pool.wait())
            .await
            .expect("pool should stop")
            .unwrap();

        let job = store.get(id).await.unwrap().unwrap();
        assert_eq!(job.state(Utc::now()), JobState::Done);
        assert_eq!(*rx.borrow(), WorkerState::Stopped);
    }

    #[tokio::test]
    async fn shutdown_before_start_runs_nothing() {
        let store = MemoryJobStore::new();
        let mut registry = HandlerRegistry::new();
        registry.register("never", |_ctx| {
            boxed(async move { Err(JobError::new("UNEXPECTED", "should not run")) })
        });
        let id = store.enqueue(NewJob::new("default", payload("never"))).await.unwrap();

        let pool =
            WorkerPool::new(Arc::new(store.clone()), Arc::new(registry), settings(3)).unwrap();
        pool.shutdown();
        let running = pool.start();

        tokio::time::timeout(Duration::from_secs(2), running.wait())
            .await
            .expect("pool should stop immediately")
            .unwrap();
        assert!(store.get(id).await.unwrap().unwrap().is_unclaimed());
    }

    #[tokio::test]
    async fn failed_job_is_retried_after_its_lease_expires() {
        let store = MemoryJobStore::new();
        let attempts = Arc::new(AtomicUsize::new(0));

        let mut registry = HandlerRegistry::new();
        let counter = attempts.clone();
        registry.register("flaky", move |_ctx| {
            let counter = counter.clone();
            boxed(async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(JobError::new("DEPENDENCY_DOWN", "first try fails"))
                } else {
                    Ok(())
                }
            })
        });
        let id = store.enqueue(NewJob::new("default", payload("flaky"))).await.unwrap();

        let pool = WorkerPool::new(
            Arc::new(store.clone()),
            Arc::new(registry),
            settings(1).lease(Duration::from_secs(1)),
        )
        .unwrap()
        .start();

        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let job = store.get(id).await.unwrap().unwrap();
                if job.finished_at.is_some() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("job should succeed on the second run");

        pool.shutdown();
        pool.wait().await.unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }
}
