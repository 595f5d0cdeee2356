// lib.rs
// 任务引擎模块入口，声明并导出各子模块。
pub mod config;
pub mod context;
pub mod error;
pub mod object_store;
pub mod parallel_iter;
pub mod pool;
pub mod remote;
pub mod scheduler;
pub mod task;
pub mod task_executor;
pub mod task_splitter;
pub mod types;
pub mod worker;

pub use config::{BackpressurePolicy, EngineConfig};
pub use context::Context;
pub use error::{Error, Result};
pub use object_store::{GetManyReport, ObjectRef, ObjectStore};
pub use parallel_iter::{GatherAsync, GatherSync, ParallelIterator, Shard};
pub use pool::PoolStats;
pub use remote::{RemoteFn, RemoteOptions};
pub use task::{TaskPriority, TaskStatus};
pub use task_splitter::{shard, SplitStrategy, TaskSplitter};
pub use types::HandleId;
pub use worker::WorkerState;
