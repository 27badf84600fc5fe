use serde::de::DeserializeOwned;
use serde_json::Value;
use std::{collections::HashMap, pin::Pin, sync::Arc};
use tokio::sync::Semaphore;

use crate::error::JobError;
use crate::jobs::model::Job;

pub type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;
type HandlerFn =
    dyn for<'a> Fn(&'a JobContext) -> BoxFuture<'a, Result<(), JobError>> + Send + Sync;

/// What a handler sees: the claimed row, its decoded arguments and the claim owner.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job: Job,
    pub args: Value,
    pub owner: String,
}

impl JobContext {
    pub fn parse_args<T: DeserializeOwned>(&self) -> Result<T, JobError> {
        serde_json::from_value(self.args.clone())
            .map_err(|e| JobError::new("BAD_PAYLOAD", e.to_string()))
    }
}

#[derive(Clone)]
pub struct HandlerEntry {
    pub handler: Arc<HandlerFn>,
    pub semaphore: Option<Arc<Semaphore>>,
}

/// Maps the `handler` key of a payload to host code.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, HandlerEntry>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, key: &str, handler: F)
    where
        F: for<'a> Fn(&'a JobContext) -> BoxFuture<'a, Result<(), JobError>>
            + Send
            + Sync
            + 'static,
    {
        self.register_with_options(key, handler, HandlerOptions::new());
    }

    pub fn register_with_limit<F>(&mut self, key: &str, handler: F, max_concurrency: usize)
    where
        F: for<'a> Fn(&'a JobContext) -> BoxFuture<'a, Result<(), JobError>>
            + Send
            + Sync
            + 'static,
    {
        self.register_with_options(
            key,
            handler,
            HandlerOptions::new().max_concurrency(max_concurrency),
        );
    }

    pub fn register_with_options<F>(&mut self, key: &str, handler: F, opts: HandlerOptions)
    where
        F: for<'a> Fn(&'a JobContext) -> BoxFuture<'a, Result<(), JobError>>
            + Send
            + Sync
            + 'static,
    {
        let semaphore = opts
            .max_concurrency
            .map(|n| Arc::new(Semaphore::new(n.max(1))));
        self.handlers.insert(
            key.to_string(),
            HandlerEntry {
                handler: Arc::new(handler),
                semaphore,
            },
        );
    }

    pub fn handler_for(&self, key: &str) -> Option<HandlerEntry> {
        self.handlers.get(key).cloned()
    }

    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }
}

#[derive(Clone, Debug, Default)]
pub struct HandlerOptions {
    max_concurrency: Option<usize>,
}

impl HandlerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = Some(n);
        self
    }
}

impl HandlerEntry {
    pub async fn run(&self, ctx: &JobContext) -> Result<(), JobError> {
        let _permit = match &self.semaphore {
            Some(sem) => Some(
                sem.clone()
                    .acquire_owned()
                    .await
                    .map_err(|_| JobError::new("WORKER_SHUTDOWN", "handler semaphore closed"))?,
            ),
            None => None,
        };

        (self.handler)(ctx).await
    }
}

pub fn boxed<'a, T>(fut: impl std::future::Future<Output = T> + Send + 'a) -> BoxFuture<'a, T> {
    Box::pin(fut)
}
