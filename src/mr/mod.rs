//! The engine core: task records, the staging store, the coordinator, the
//! worker loop, and the job driver that wires them together.

pub mod coordinator;
pub mod error;
pub mod function;
pub mod job;
pub mod storage;
pub mod task;
pub mod worker;

pub use coordinator::{Coordinator, CoordinatorConfig};
pub use error::Error;
pub use job::{run_job, run_job_with_store, JobConfig};
pub use storage::{FsStore, Store, REDUCE_OUTPUT_PREFIX};
pub use task::{KeyValue, Task, TaskKind, TaskStatus};
pub use worker::{bucket_of, MapFn, ReduceFn, Worker};
