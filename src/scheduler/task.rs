//! Task trait, keys and outcomes.

use std::sync::Arc;

use super::runner::TaskContext;
use crate::error::RespackError;
use crate::loader::Asset;
use crate::registry::{PackId, ResourceId};

/// Kind of work a task performs. Part of the dedup key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TaskKind {
    PackLoad,
    ResourceLoad,
    Download,
    DelayedUnload,
    Request,
}

impl TaskKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PackLoad => "pack_load",
            Self::ResourceLoad => "resource_load",
            Self::Download => "download",
            Self::DelayedUnload => "delayed_unload",
            Self::Request => "request",
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dedup key: two requests with the same key share one task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskKey {
    pub kind: TaskKind,
    pub name: String,
}

impl TaskKey {
    pub fn new(kind: TaskKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

impl std::fmt::Display for TaskKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.name)
    }
}

/// Lifecycle of a live task entry. A finished task has no entry: its
/// outcome was delivered and [`Scheduler::state`](super::Scheduler::state)
/// reports `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Queued, never polled.
    Free,
    /// Blocked on I/O, a child task or a timer.
    Waiting,
    /// Made progress on its last poll.
    Running,
}

/// Successful result of a task.
#[derive(Debug, Clone)]
pub enum TaskOutput {
    Unit,
    Pack(PackId),
    Resource { id: ResourceId, asset: Asset },
    Downloaded { relative_path: String, bytes: u64, attempts: u32 },
    Body(Arc<Vec<u8>>),
}

pub type TaskOutcome = Result<TaskOutput, RespackError>;

/// Result of one poll.
#[derive(Debug)]
pub enum Step {
    /// Nothing to do until something external changes. Costs no budget.
    Waiting,
    /// Progress was made; poll again.
    Running,
    Done(TaskOutcome),
}

/// A unit of cooperative work over an environment `E`.
pub trait Task<E> {
    fn key(&self) -> &TaskKey;

    fn poll(&mut self, cx: &mut TaskContext<'_, E>) -> Step;

    /// Called once with the final outcome before waiters are notified.
    /// `external_waiters` counts the active public callers receiving it.
    fn finish(&mut self, _cx: &mut TaskContext<'_, E>, _outcome: &TaskOutcome, _external_waiters: usize) {}

    /// Called instead of `finish` once every waiter has cancelled.
    fn cancel(&mut self, _cx: &mut TaskContext<'_, E>) {}
}
