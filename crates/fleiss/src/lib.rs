pub mod admin;
pub mod config;
pub mod db;
pub mod error;
pub mod jobs;
pub mod worker;

pub use error::{ConfigError, JobError};
