//! Application Queue - 后端调用的串行调度

mod execution_queue;

pub use execution_queue::{ExecutionQueue, QueuedTask, ResourceClass, TaskId};
