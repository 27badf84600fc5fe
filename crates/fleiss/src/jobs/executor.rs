use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use crate::error::JobError;
use crate::jobs::handlers::{HandlerRegistry, JobContext};
use crate::jobs::model::Job;
use crate::jobs::payload::Payload;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure(String),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }
}

/// Runs one claimed job through the registry. Never returns an error: every
/// failure, including a handler panic, becomes [`Outcome::Failure`].
#[derive(Clone)]
pub struct Executor {
    registry: Arc<HandlerRegistry>,
}

impl Executor {
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub async fn execute(&self, job: &Job, owner: &str) -> Outcome {
        let start = Instant::now();

        let payload = match Payload::decode(&job.payload) {
            Ok(p) => p,
            Err(err) => return self.failed(job, "-", err, start),
        };

        let Some(entry) = self.registry.handler_for(&payload.handler) else {
            let err = JobError::new(
                "UNKNOWN_HANDLER",
                format!("no handler registered for {}", payload.handler),
            );
            return self.failed(job, &payload.handler, err, start);
        };

        let ctx = JobContext {
            job: job.clone(),
            args: payload.args,
            owner: owner.to_string(),
        };

        let result = match AssertUnwindSafe(entry.run(&ctx)).catch_unwind().await {
            Ok(res) => res,
            Err(panic) => Err(JobError::new("PANIC", panic_message(panic.as_ref()))),
        };

        match result {
            Ok(()) => {
                tracing::info!(
                    job_id = job.id,
                    queue = %job.queue_name,
                    handler = %payload.handler,
                    latency_ms = start.elapsed().as_millis() as u64,
                    "job succeeded"
                );
                Outcome::Success
            }
            Err(err) => self.failed(job, &payload.handler, err, start),
        }
    }

    fn failed(&self, job: &Job, handler: &str, err: JobError, start: Instant) -> Outcome {
        tracing::warn!(
            job_id = job.id,
            queue = %job.queue_name,
            handler,
            code = err.code,
            latency_ms = start.elapsed().as_millis() as u64,
            error = %err.message,
            "job failed; left claimed until its deadline"
        );
        Outcome::Failure(err.to_string())
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}
