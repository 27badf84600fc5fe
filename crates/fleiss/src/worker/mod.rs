//! Worker side of the queue.
//!
//! - [`WorkerLoop`]: one poll → claim → execute → finalize cycle at a time
//! - [`WorkerPool`]: N loops plus a [`Reaper`], with cooperative shutdown
//! - [`Reaper`]: returns abandoned claims to the queue

pub mod pool;
pub mod reaper;
pub mod worker_loop;

pub use pool::{RunningPool, WorkerBoard, WorkerPool, WorkerStatus};
pub use reaper::Reaper;
pub use worker_loop::{WorkerLoop, WorkerLoopBuilder, WorkerState};
