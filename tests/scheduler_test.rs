//! Integration tests for the cooperative scheduler.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Instant;

use respack_core::scheduler::{
    Notify, Priority, Scheduler, Step, Task, TaskContext, TaskKey, TaskKind, TaskOutcome,
    TaskOutput, TaskState,
};
use respack_core::RespackError;

/// Test environment: a log of what ran.
#[derive(Default)]
struct Log {
    ran: Vec<String>,
    finished: Vec<(String, usize)>,
    cancelled: Vec<String>,
}

/// Finishes after `steps` polls, logging each one.
struct Counted {
    key: TaskKey,
    steps: u32,
}

impl Counted {
    fn boxed(name: &str, steps: u32) -> Box<dyn Task<Log>> {
        Box::new(Self {
            key: TaskKey::new(TaskKind::Request, name),
            steps,
        })
    }
}

impl Task<Log> for Counted {
    fn key(&self) -> &TaskKey {
        &self.key
    }

    fn poll(&mut self, cx: &mut TaskContext<'_, Log>) -> Step {
        cx.env.ran.push(self.key.name.clone());
        self.steps = self.steps.saturating_sub(1);
        if self.steps == 0 {
            Step::Done(Ok(TaskOutput::Unit))
        } else {
            Step::Running
        }
    }

    fn finish(&mut self, cx: &mut TaskContext<'_, Log>, _outcome: &TaskOutcome, external_waiters: usize) {
        cx.env.finished.push((self.key.name.clone(), external_waiters));
    }

    fn cancel(&mut self, cx: &mut TaskContext<'_, Log>) {
        cx.env.cancelled.push(self.key.name.clone());
    }
}

/// Waits forever.
struct Parked(TaskKey);

impl Task<Log> for Parked {
    fn key(&self) -> &TaskKey {
        &self.0
    }

    fn poll(&mut self, _cx: &mut TaskContext<'_, Log>) -> Step {
        Step::Waiting
    }
}

struct Exploding(TaskKey);

impl Task<Log> for Exploding {
    fn key(&self) -> &TaskKey {
        &self.0
    }

    fn poll(&mut self, _cx: &mut TaskContext<'_, Log>) -> Step {
        panic!("boom");
    }
}

/// Spawns a child on first poll and waits for it.
struct Parent {
    key: TaskKey,
    child: Option<respack_core::scheduler::Pending>,
}

impl Task<Log> for Parent {
    fn key(&self) -> &TaskKey {
        &self.key
    }

    fn poll(&mut self, cx: &mut TaskContext<'_, Log>) -> Step {
        match &self.child {
            None => {
                self.child = Some(cx.spawn(Box::new(Parked(key("child")))));
                Step::Running
            }
            Some(child) if child.is_done() => Step::Done(Ok(TaskOutput::Unit)),
            Some(_) => Step::Waiting,
        }
    }

    fn cancel(&mut self, cx: &mut TaskContext<'_, Log>) {
        if let Some(child) = self.child.take() {
            cx.cancel(child.ticket());
        }
    }
}

fn key(name: &str) -> TaskKey {
    TaskKey::new(TaskKind::Request, name)
}

type Outcomes = Rc<RefCell<Vec<Result<(), RespackError>>>>;

fn recorder(outcomes: &Outcomes) -> Notify {
    let sink = Rc::clone(outcomes);
    Notify::External(Box::new(move |outcome| {
        sink.borrow_mut().push(outcome.map(|_| ()));
    }))
}

// === Ordering and budget ===

#[test]
fn higher_priorities_drain_first() {
    let mut scheduler = Scheduler::new(16);
    let mut log = Log::default();
    scheduler.submit(Counted::boxed("low", 1), Priority::Low, Notify::Detached);
    scheduler.submit(Counted::boxed("high-1", 1), Priority::High, Notify::Detached);
    scheduler.submit(Counted::boxed("normal", 1), Priority::Normal, Notify::Detached);
    scheduler.submit(Counted::boxed("high-2", 1), Priority::High, Notify::Detached);
    scheduler.submit(Counted::boxed("bg", 1), Priority::Background, Notify::Detached);
    scheduler.submit(Counted::boxed("urgent", 1), Priority::Urgent, Notify::Detached);

    scheduler.tick(&mut log, Instant::now());
    assert_eq!(log.ran, vec!["urgent", "high-1", "high-2", "normal", "low", "bg"]);
    assert!(scheduler.is_empty());
}

#[test]
fn budget_limits_steps_per_tick() {
    let mut scheduler = Scheduler::new(2);
    let mut log = Log::default();
    for name in ["a", "b", "c"] {
        scheduler.submit(Counted::boxed(name, 1), Priority::Normal, Notify::Detached);
    }

    let report = scheduler.tick(&mut log, Instant::now());
    assert_eq!(report.steps, 2);
    assert_eq!(log.ran, vec!["a", "b"]);
    assert_eq!(scheduler.len(), 1);

    scheduler.tick(&mut log, Instant::now());
    assert_eq!(log.ran, vec!["a", "b", "c"]);
}

#[test]
fn waiting_tasks_cost_no_budget() {
    let mut scheduler = Scheduler::new(1);
    let mut log = Log::default();
    scheduler.submit(Box::new(Parked(key("parked"))), Priority::Urgent, Notify::Detached);
    scheduler.submit(Counted::boxed("work", 1), Priority::Low, Notify::Detached);

    scheduler.tick(&mut log, Instant::now());
    assert_eq!(log.ran, vec!["work"]);
    assert_eq!(scheduler.state(&key("parked")), Some(TaskState::Waiting));
}

#[test]
fn running_task_keeps_its_place_across_ticks() {
    let mut scheduler = Scheduler::new(1);
    let mut log = Log::default();
    scheduler.submit(Counted::boxed("long", 3), Priority::Normal, Notify::Detached);
    assert_eq!(scheduler.state(&key("long")), Some(TaskState::Free));
    scheduler.tick(&mut log, Instant::now());
    assert_eq!(scheduler.state(&key("long")), Some(TaskState::Running));
    scheduler.tick(&mut log, Instant::now());
    scheduler.tick(&mut log, Instant::now());
    assert_eq!(log.ran.len(), 3);
    assert!(!scheduler.is_in_flight(&key("long")));
    assert_eq!(scheduler.state(&key("long")), None);
}

// === Merging ===

#[test]
fn same_key_requests_merge_into_one_task() {
    let mut scheduler = Scheduler::new(16);
    let mut log = Log::default();
    let outcomes: Outcomes = Rc::default();
    for _ in 0..3 {
        scheduler.submit(Counted::boxed("shared", 1), Priority::Normal, recorder(&outcomes));
    }
    assert_eq!(scheduler.len(), 1);
    assert_eq!(scheduler.waiter_count(&key("shared")), 3);

    scheduler.tick(&mut log, Instant::now());
    assert_eq!(log.ran, vec!["shared"]);
    assert_eq!(outcomes.borrow().len(), 3);
    assert_eq!(log.finished, vec![("shared".to_string(), 3)]);

    let stats = scheduler.stats();
    assert_eq!(stats.created, 1);
    assert_eq!(stats.merged, 2);
    assert_eq!(stats.completed, 1);
}

#[test]
fn finished_key_can_be_submitted_again() {
    let mut scheduler = Scheduler::new(16);
    let mut log = Log::default();
    scheduler.submit(Counted::boxed("again", 1), Priority::Normal, Notify::Detached);
    scheduler.tick(&mut log, Instant::now());
    scheduler.submit(Counted::boxed("again", 1), Priority::Normal, Notify::Detached);
    scheduler.tick(&mut log, Instant::now());
    assert_eq!(log.ran, vec!["again", "again"]);
    assert_eq!(scheduler.stats().created, 2);
}

// === Cancellation ===

#[test]
fn partial_cancel_only_suppresses_that_waiter() {
    let mut scheduler = Scheduler::new(16);
    let mut log = Log::default();
    let kept: Outcomes = Rc::default();
    let dropped: Outcomes = Rc::default();
    let ticket = scheduler.submit(Counted::boxed("t", 1), Priority::Normal, recorder(&dropped));
    scheduler.submit(Counted::boxed("t", 1), Priority::Normal, recorder(&kept));

    assert!(scheduler.cancel(ticket));
    assert!(!scheduler.cancel(ticket));
    scheduler.tick(&mut log, Instant::now());

    assert!(dropped.borrow().is_empty());
    assert_eq!(kept.borrow().len(), 1);
    assert_eq!(log.finished, vec![("t".to_string(), 1)]);
    assert!(log.cancelled.is_empty());
}

#[test]
fn cancelling_every_waiter_discards_the_task() {
    let mut scheduler = Scheduler::new(16);
    let mut log = Log::default();
    let outcomes: Outcomes = Rc::default();
    let a = scheduler.submit(Counted::boxed("t", 5), Priority::Normal, recorder(&outcomes));
    let b = scheduler.submit(Counted::boxed("t", 5), Priority::Normal, recorder(&outcomes));

    scheduler.tick(&mut log, Instant::now());
    scheduler.cancel(a);
    scheduler.cancel(b);
    scheduler.tick(&mut log, Instant::now());

    assert_eq!(log.cancelled, vec!["t"]);
    assert!(log.finished.is_empty());
    assert!(outcomes.borrow().is_empty());
    assert!(scheduler.is_empty());
    assert_eq!(scheduler.stats().cancelled, 1);
}

#[test]
fn new_waiter_revives_an_abandoned_task() {
    let mut scheduler = Scheduler::new(16);
    let mut log = Log::default();
    let outcomes: Outcomes = Rc::default();
    let first = scheduler.submit(Counted::boxed("t", 2), Priority::Normal, Notify::Detached);
    scheduler.tick(&mut log, Instant::now());
    scheduler.cancel(first);
    scheduler.submit(Counted::boxed("t", 2), Priority::Normal, recorder(&outcomes));
    scheduler.tick(&mut log, Instant::now());

    assert!(log.cancelled.is_empty());
    assert_eq!(outcomes.borrow().len(), 1);
}

#[test]
fn cancelled_parent_cancels_its_child() {
    let mut scheduler = Scheduler::new(16);
    let mut log = Log::default();
    let ticket = scheduler.submit(
        Box::new(Parent {
            key: key("parent"),
            child: None,
        }),
        Priority::Normal,
        Notify::Detached,
    );
    scheduler.tick(&mut log, Instant::now());
    assert!(scheduler.is_in_flight(&key("child")));

    scheduler.cancel(ticket);
    scheduler.tick(&mut log, Instant::now());
    scheduler.tick(&mut log, Instant::now());
    assert!(scheduler.is_empty());
}

// === Promotion ===

#[test]
fn higher_priority_request_promotes_task_and_children() {
    let mut scheduler = Scheduler::new(16);
    let mut log = Log::default();
    scheduler.submit(
        Box::new(Parent {
            key: key("parent"),
            child: None,
        }),
        Priority::Low,
        Notify::Detached,
    );
    scheduler.tick(&mut log, Instant::now());
    assert_eq!(scheduler.priority_of(&key("child")), Some(Priority::Low));

    scheduler.submit(
        Box::new(Parent {
            key: key("parent"),
            child: None,
        }),
        Priority::Urgent,
        Notify::Detached,
    );
    assert_eq!(scheduler.priority_of(&key("parent")), Some(Priority::Urgent));
    assert_eq!(scheduler.priority_of(&key("child")), Some(Priority::Urgent));
    assert_eq!(scheduler.queue_depth(Priority::Low), 0);
    assert_eq!(scheduler.queue_depth(Priority::Urgent), 2);
}

#[test]
fn lower_priority_request_never_demotes() {
    let mut scheduler: Scheduler<Log> = Scheduler::new(16);
    scheduler.submit(Counted::boxed("t", 1), Priority::High, Notify::Detached);
    scheduler.submit(Counted::boxed("t", 1), Priority::Background, Notify::Detached);
    assert_eq!(scheduler.priority_of(&key("t")), Some(Priority::High));
}

// === Fault isolation ===

#[test]
fn panicking_task_faults_alone() {
    let mut scheduler = Scheduler::new(16);
    let mut log = Log::default();
    let outcomes: Outcomes = Rc::default();
    scheduler.submit(Box::new(Exploding(key("bad"))), Priority::High, recorder(&outcomes));
    scheduler.submit(Counted::boxed("good", 1), Priority::Normal, Notify::Detached);

    scheduler.tick(&mut log, Instant::now());

    assert_eq!(log.ran, vec!["good"]);
    let outcomes = outcomes.borrow();
    assert!(matches!(
        outcomes.as_slice(),
        [Err(RespackError::TaskFault { message, .. })] if message == "boom"
    ));
    assert_eq!(scheduler.stats().faulted, 1);
    assert!(scheduler.is_empty());
}

#[test]
fn panicking_callback_does_not_starve_other_waiters() {
    let mut scheduler = Scheduler::new(16);
    let mut log = Log::default();
    let outcomes: Outcomes = Rc::default();
    scheduler.submit(
        Counted::boxed("t", 1),
        Priority::Normal,
        Notify::External(Box::new(|_| panic!("callback"))),
    );
    scheduler.submit(Counted::boxed("t", 1), Priority::Normal, recorder(&outcomes));
    scheduler.tick(&mut log, Instant::now());
    assert_eq!(outcomes.borrow().len(), 1);
}
