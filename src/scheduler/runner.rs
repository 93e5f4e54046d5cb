//! The tick-driven task runner.
//!
//! Entries are keyed by [`TaskKey`]. Submitting a task whose key is already in
//! flight merges the caller into the existing entry's waiter list instead of
//! starting new work. Each tick drains the five priority groups highest
//! first, FIFO within a group, until the step budget is spent.

use std::cell::RefCell;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;
use std::time::Instant;

use tracing::{debug, error, warn, Span};

use super::priority::{Priority, PriorityGroups};
use super::task::{Step, Task, TaskKey, TaskOutcome, TaskState};
use super::waiter::{Notify, Pending, Ticket, Waiter};
use crate::error::RespackError;
use crate::telemetry::{self, SpanExt, TaskSpan};

/// Counters since construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub created: u64,
    pub merged: u64,
    pub completed: u64,
    pub cancelled: u64,
    pub faulted: u64,
}

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Budgeted steps consumed.
    pub steps: usize,
    /// Entries that finished, faulted or were discarded.
    pub retired: usize,
}

struct Entry<E> {
    task: Option<Box<dyn Task<E>>>,
    priority: Priority,
    state: TaskState,
    waiters: Vec<Waiter>,
    abandoned: bool,
    children: Vec<TaskKey>,
    span: Span,
}

pub(crate) struct Core<E> {
    entries: HashMap<TaskKey, Entry<E>>,
    groups: PriorityGroups<TaskKey>,
    tickets: HashMap<Ticket, TaskKey>,
    next_ticket: u64,
    stats: SchedulerStats,
}

impl<E> Core<E> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            groups: PriorityGroups::new(),
            tickets: HashMap::new(),
            next_ticket: 1,
            stats: SchedulerStats::default(),
        }
    }

    fn submit(&mut self, task: Box<dyn Task<E>>, priority: Priority, notify: Notify) -> Ticket {
        let key = task.key().clone();
        let ticket = Ticket(self.next_ticket);
        self.next_ticket += 1;
        let waiter = Waiter { ticket, notify };

        if let Some(entry) = self.entries.get_mut(&key) {
            entry.waiters.push(waiter);
            if entry.abandoned {
                debug!(task = %key, "abandoned task revived by a new waiter");
                entry.abandoned = false;
            }
            let current = entry.priority;
            self.stats.merged += 1;
            telemetry::record_task_merged(key.kind.as_str());
            debug!(task = %key, waiters = self.entries[&key].waiters.len(), "request merged");
            if priority > current {
                self.promote(&key, priority);
            }
        } else {
            let span = TaskSpan::new(key.kind.as_str(), &key.name, priority.as_str());
            self.entries.insert(
                key.clone(),
                Entry {
                    task: Some(task),
                    priority,
                    state: TaskState::Free,
                    waiters: vec![waiter],
                    abandoned: false,
                    children: Vec::new(),
                    span,
                },
            );
            self.groups.push(key.clone(), priority);
            self.stats.created += 1;
            telemetry::record_task_created(key.kind.as_str());
            debug!(task = %key, %priority, "task queued");
        }
        self.tickets.insert(ticket, key);
        ticket
    }

    /// Move `key` and everything it spawned up to `to`, keeping progress.
    fn promote(&mut self, key: &TaskKey, to: Priority) {
        let Some(entry) = self.entries.get_mut(key) else {
            return;
        };
        if entry.priority >= to {
            return;
        }
        let from = entry.priority;
        entry.priority = to;
        let children = entry.children.clone();
        self.groups.migrate(key, from, to);
        debug!(task = %key, %from, %to, "task promoted");
        for child in &children {
            self.promote(child, to);
        }
    }

    fn cancel(&mut self, ticket: Ticket) -> bool {
        let Some(key) = self.tickets.remove(&ticket) else {
            return false;
        };
        let Some(entry) = self.entries.get_mut(&key) else {
            return false;
        };
        entry.waiters.retain(|w| w.ticket != ticket);
        if entry.waiters.is_empty() {
            entry.abandoned = true;
            debug!(task = %key, "every waiter cancelled");
        }
        true
    }

    fn remove(&mut self, key: &TaskKey) -> Option<Entry<E>> {
        let entry = self.entries.remove(key)?;
        self.groups.remove(key, entry.priority);
        for w in &entry.waiters {
            self.tickets.remove(&w.ticket);
        }
        Some(entry)
    }
}

/// Handed to a task while it is polled.
pub struct TaskContext<'a, E> {
    pub env: &'a mut E,
    pub now: Instant,
    priority: Priority,
    current: TaskKey,
    core: &'a mut Core<E>,
}

impl<'a, E> TaskContext<'a, E> {
    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn key(&self) -> &TaskKey {
        &self.current
    }

    /// Start (or join) a child task at this task's priority.
    pub fn spawn(&mut self, task: Box<dyn Task<E>>) -> Pending {
        let child = task.key().clone();
        let slot = Rc::new(RefCell::new(None));
        let ticket = self
            .core
            .submit(task, self.priority, Notify::Internal(Rc::clone(&slot)));
        if let Some(parent) = self.core.entries.get_mut(&self.current) {
            if !parent.children.contains(&child) {
                parent.children.push(child);
            }
        }
        Pending::new(ticket, slot)
    }

    /// Start a task nobody waits on.
    pub fn spawn_detached(&mut self, task: Box<dyn Task<E>>, priority: Priority) -> Ticket {
        self.core.submit(task, priority, Notify::Detached)
    }

    pub fn cancel(&mut self, ticket: Ticket) -> bool {
        self.core.cancel(ticket)
    }

    pub fn is_in_flight(&self, key: &TaskKey) -> bool {
        self.core.entries.contains_key(key)
    }
}

/// Priority-grouped cooperative scheduler over an environment `E`.
pub struct Scheduler<E> {
    core: Core<E>,
    steps_per_tick: usize,
}

impl<E> Scheduler<E> {
    pub fn new(steps_per_tick: usize) -> Self {
        Self {
            core: Core::new(),
            steps_per_tick: steps_per_tick.max(1),
        }
    }

    pub fn steps_per_tick(&self) -> usize {
        self.steps_per_tick
    }

    /// Queue `task`, or merge into the in-flight task with the same key.
    pub fn submit(&mut self, task: Box<dyn Task<E>>, priority: Priority, notify: Notify) -> Ticket {
        self.core.submit(task, priority, notify)
    }

    /// Submit with an outcome slot the caller polls.
    pub fn submit_pending(&mut self, task: Box<dyn Task<E>>, priority: Priority) -> Pending {
        let slot = Rc::new(RefCell::new(None));
        let ticket = self
            .core
            .submit(task, priority, Notify::Internal(Rc::clone(&slot)));
        Pending::new(ticket, slot)
    }

    /// Suppress one waiter. Returns false for an unknown or delivered ticket.
    pub fn cancel(&mut self, ticket: Ticket) -> bool {
        self.core.cancel(ticket)
    }

    /// `None` once the task finished or was discarded.
    pub fn state(&self, key: &TaskKey) -> Option<TaskState> {
        self.core.entries.get(key).map(|e| e.state)
    }

    pub fn priority_of(&self, key: &TaskKey) -> Option<Priority> {
        self.core.entries.get(key).map(|e| e.priority)
    }

    pub fn is_in_flight(&self, key: &TaskKey) -> bool {
        self.core.entries.contains_key(key)
    }

    pub fn waiter_count(&self, key: &TaskKey) -> usize {
        self.core.entries.get(key).map_or(0, |e| e.waiters.len())
    }

    pub fn len(&self) -> usize {
        self.core.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.core.entries.is_empty()
    }

    pub fn queue_depth(&self, priority: Priority) -> usize {
        self.core.groups.len_of(priority)
    }

    pub fn stats(&self) -> SchedulerStats {
        self.core.stats
    }

    /// Run one tick against `env`.
    pub fn tick(&mut self, env: &mut E, now: Instant) -> TickReport {
        let mut report = TickReport::default();
        let mut budget = self.steps_per_tick;

        'groups: for priority in Priority::DRAIN_ORDER {
            for key in self.core.groups.snapshot(priority) {
                if budget == 0 {
                    break 'groups;
                }
                // Promoted or retired since the snapshot was taken.
                match self.core.entries.get(&key) {
                    Some(entry) if entry.priority == priority => {}
                    _ => continue,
                }
                let visit = self.visit(&key, env, now);
                if visit.consumed {
                    budget -= 1;
                    report.steps += 1;
                }
                if visit.retired {
                    report.retired += 1;
                }
            }
        }

        telemetry::record_scheduler_tick(report.steps, self.core.entries.len());
        report
    }

    fn visit(&mut self, key: &TaskKey, env: &mut E, now: Instant) -> Visit {
        let Some(entry) = self.core.entries.get_mut(key) else {
            return Visit::default();
        };
        let Some(mut task) = entry.task.take() else {
            return Visit::default();
        };
        let abandoned = entry.abandoned;
        let priority = entry.priority;
        let span = entry.span.clone();
        let _guard = span.enter();

        if abandoned {
            let mut cx = self.context(env, now, priority, key);
            if catch_unwind(AssertUnwindSafe(|| task.cancel(&mut cx))).is_err() {
                error!(task = %key, "task panicked while cancelling");
            }
            self.core.remove(key);
            self.core.stats.cancelled += 1;
            telemetry::record_task_finished(key.kind.as_str(), "cancelled");
            span.record_retired("cancelled", 0);
            debug!(task = %key, "task discarded");
            return Visit {
                consumed: true,
                retired: true,
            };
        }

        let step = {
            let mut cx = self.context(env, now, priority, key);
            catch_unwind(AssertUnwindSafe(|| task.poll(&mut cx)))
                .unwrap_or_else(|payload| Step::Done(Err(fault(key, payload))))
        };

        match step {
            Step::Waiting => {
                self.park(key, task, TaskState::Waiting);
                Visit::default()
            }
            Step::Running => {
                self.park(key, task, TaskState::Running);
                Visit {
                    consumed: true,
                    retired: false,
                }
            }
            Step::Done(outcome) => {
                self.complete(key, task, outcome, env, now, priority, &span);
                Visit {
                    consumed: true,
                    retired: true,
                }
            }
        }
    }

    fn context<'a>(
        &'a mut self,
        env: &'a mut E,
        now: Instant,
        priority: Priority,
        key: &TaskKey,
    ) -> TaskContext<'a, E> {
        TaskContext {
            env,
            now,
            priority,
            current: key.clone(),
            core: &mut self.core,
        }
    }

    fn park(&mut self, key: &TaskKey, task: Box<dyn Task<E>>, state: TaskState) {
        if let Some(entry) = self.core.entries.get_mut(key) {
            entry.task = Some(task);
            entry.state = state;
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn complete(
        &mut self,
        key: &TaskKey,
        mut task: Box<dyn Task<E>>,
        outcome: TaskOutcome,
        env: &mut E,
        now: Instant,
        priority: Priority,
        span: &Span,
    ) {
        let Some(entry) = self.core.remove(key) else {
            return;
        };
        let externals = entry.waiters.iter().filter(|w| w.notify.is_external()).count();

        let outcome = {
            let mut cx = self.context(env, now, priority, key);
            match catch_unwind(AssertUnwindSafe(|| task.finish(&mut cx, &outcome, externals))) {
                Ok(()) => outcome,
                Err(payload) => Err(fault(key, payload)),
            }
        };

        let status = match &outcome {
            Err(RespackError::TaskFault { message, .. }) => {
                self.core.stats.faulted += 1;
                span.record_error(message);
                error!(task = %key, %message, "task faulted");
                "faulted"
            }
            Err(e) => {
                self.core.stats.completed += 1;
                span.record_error(e);
                warn!(task = %key, error = %e, "task failed");
                "failed"
            }
            Ok(_) => {
                self.core.stats.completed += 1;
                debug!(task = %key, waiters = entry.waiters.len(), "task finished");
                "ok"
            }
        };
        telemetry::record_task_finished(key.kind.as_str(), status);
        span.record_retired(status, entry.waiters.len());

        for waiter in entry.waiters {
            let ticket = waiter.ticket;
            let delivered = outcome.clone();
            if catch_unwind(AssertUnwindSafe(move || waiter.deliver(delivered))).is_err() {
                error!(task = %key, %ticket, "completion callback panicked");
            }
        }
    }
}

#[derive(Default)]
struct Visit {
    consumed: bool,
    retired: bool,
}

fn fault(key: &TaskKey, payload: Box<dyn std::any::Any + Send>) -> RespackError {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "panic".to_string());
    RespackError::TaskFault {
        task: key.to_string(),
        message,
    }
}
