pub mod claim;
pub mod executor;
pub mod handlers;
pub mod memory;
pub mod model;
pub mod payload;
pub mod repo;
pub mod store;

pub use claim::{claim_next, ClaimOutcome, ClaimRequest};
pub use executor::{Executor, Outcome};
pub use handlers::{boxed, BoxFuture, HandlerOptions, HandlerRegistry, JobContext};
pub use memory::MemoryJobStore;
pub use model::{Job, JobState, NewJob, QueueStats};
pub use payload::Payload;
pub use repo::PgJobStore;
pub use store::JobStore;
