//! Cooperative task scheduling.
//!
//! Manages five priority groups of keyed tasks with request merging, partial
//! cancellation, priority promotion and per-task fault isolation.

mod priority;
mod runner;
mod task;
mod waiter;

pub use priority::{Priority, PriorityGroups};
pub use runner::{Scheduler, SchedulerStats, TaskContext, TickReport};
pub use task::{Step, Task, TaskKey, TaskKind, TaskOutcome, TaskOutput, TaskState};
pub use waiter::{Callback, Notify, Pending, Ticket};
