//! Per-key waiter lists.

use std::cell::RefCell;
use std::rc::Rc;

use super::task::TaskOutcome;

/// Identifies one logical request against a task entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ticket(pub(crate) u64);

impl std::fmt::Display for Ticket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ticket#{}", self.0)
    }
}

pub type Callback = Box<dyn FnOnce(TaskOutcome)>;

/// How a waiter learns the outcome.
pub enum Notify {
    /// A public caller.
    External(Callback),
    /// A parent task polling a [`Pending`].
    Internal(Rc<RefCell<Option<TaskOutcome>>>),
    /// Nobody listens.
    Detached,
}

impl Notify {
    pub fn is_external(&self) -> bool {
        matches!(self, Self::External(_))
    }
}

pub(crate) struct Waiter {
    pub ticket: Ticket,
    pub notify: Notify,
}

impl Waiter {
    pub fn deliver(self, outcome: TaskOutcome) {
        match self.notify {
            Notify::External(callback) => callback(outcome),
            Notify::Internal(slot) => *slot.borrow_mut() = Some(outcome),
            Notify::Detached => {}
        }
    }
}

/// Parent-side view of a child task.
#[derive(Debug, Clone)]
pub struct Pending {
    ticket: Ticket,
    slot: Rc<RefCell<Option<TaskOutcome>>>,
}

impl Pending {
    pub(crate) fn new(ticket: Ticket, slot: Rc<RefCell<Option<TaskOutcome>>>) -> Self {
        Self { ticket, slot }
    }

    pub fn ticket(&self) -> Ticket {
        self.ticket
    }

    pub fn is_done(&self) -> bool {
        self.slot.borrow().is_some()
    }

    /// The child's outcome, once delivered. Later calls return `None`.
    pub fn take(&self) -> Option<TaskOutcome> {
        self.slot.borrow_mut().take()
    }
}
