use thiserror::Error;

use crate::config::{MAX_INTERVAL_SECS, MAX_LEASE_SECS};

/// Invalid settings. Always fatal, and always raised before any worker starts.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("at least one queue name is required")]
    NoQueues,

    #[error("invalid queue name {0:?} (must be 1..=50 non-blank characters)")]
    InvalidQueueName(String),

    #[error("concurrency must be greater than zero, got {0}")]
    InvalidConcurrency(i64),

    #[error("wait_time must be a positive number of seconds up to {max}, got {0}", max = MAX_INTERVAL_SECS)]
    InvalidWaitTime(f64),

    #[error("lease must be a positive number of seconds up to {max}, got {0}", max = MAX_LEASE_SECS)]
    InvalidLease(i64),

    #[error("reap interval must be a positive number of seconds up to {max}, got {0}", max = MAX_INTERVAL_SECS)]
    InvalidReapInterval(f64),

    #[error("claim retries must be greater than zero")]
    InvalidClaimRetries,

    #[error("{key} is missing")]
    Missing { key: &'static str },

    #[error("{key}={value:?} is not a valid value")]
    Malformed { key: &'static str, value: String },
}

/// Failure raised by a job handler. `code` is a short machine readable tag.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct JobError {
    pub code: &'static str,
    pub message: String,
}

impl JobError {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}
