//! Deferred execution for promise callbacks.
//!
//! A [`Promise`] never runs a waiter inside the call that triggered it. Every
//! callback goes through a [`Scheduler`], which runs it on a later turn. The
//! [`ManualScheduler`] here keeps a virtual clock so tests can step through
//! turns and timers deterministically.
//!
//! # Examples
//!
//! ```
//! use deferred::{ManualScheduler, Promise, Resolution};
//! use std::time::Duration;
//!
//! let scheduler = ManualScheduler::new();
//! let p = Promise::<_, ()>::delay_resolve(&scheduler, Resolution::Value(7), Duration::from_millis(10));
//! scheduler.advance(Duration::from_millis(9));
//! assert!(p.is_pending());
//! assert_eq!(scheduler.run_until_settled(&p), Ok(Ok(7)));
//! ```
use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use crate::{Error, Promise};

/// A unit of deferred work.
pub type Task = Box<dyn FnOnce() + 'static>;

/// The "run later" capability promises are built on.
///
/// Implementations must never run `task` inside the call that hands it over.
/// Tasks passed to [`schedule`](Self::schedule) from the same context run in
/// FIFO order. A task passed to [`schedule_after`](Self::schedule_after) must
/// not run before `delay` has elapsed.
pub trait Scheduler {
    fn schedule(&self, task: Task);

    fn schedule_after(&self, task: Task, delay: Duration);
}

impl<S: Scheduler + ?Sized> Scheduler for Rc<S> {
    fn schedule(&self, task: Task) {
        (**self).schedule(task);
    }

    fn schedule_after(&self, task: Task, delay: Duration) {
        (**self).schedule_after(task, delay);
    }
}

struct Timer {
    deadline: Duration,
    id: u64,
    task: Task,
}

impl Eq for Timer {}

impl PartialEq for Timer {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.id == other.id
    }
}

impl Ord for Timer {
    fn cmp(&self, other: &Self) -> Ordering {
        // Min-heap: earliest deadline first, then insertion order.
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for Timer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Ready queue plus timer heap, shared by the scheduler implementations.
#[derive(Default)]
pub(crate) struct TaskQueue {
    ready: VecDeque<Task>,
    timers: BinaryHeap<Timer>,
    next_timer_id: u64,
}

impl TaskQueue {
    pub(crate) fn push(&mut self, task: Task) {
        self.ready.push_back(task);
    }

    pub(crate) fn push_timer(&mut self, deadline: Duration, task: Task) {
        let id = self.next_timer_id;
        self.next_timer_id += 1;
        self.timers.push(Timer { deadline, id, task });
    }

    pub(crate) fn pop_ready(&mut self) -> Option<Task> {
        self.ready.pop_front()
    }

    pub(crate) fn next_deadline(&self) -> Option<Duration> {
        self.timers.peek().map(|timer| timer.deadline)
    }

    /// Removes the earliest timer if its deadline is at or before `now`.
    pub(crate) fn pop_due(&mut self, now: Duration) -> Option<(Duration, Task)> {
        if self.next_deadline()? > now {
            return None;
        }
        self.timers.pop().map(|timer| (timer.deadline, timer.task))
    }

    pub(crate) fn ready_len(&self) -> usize {
        self.ready.len()
    }

    pub(crate) fn timers_len(&self) -> usize {
        self.timers.len()
    }
}

/// Register a waiter on `promise` that parks its result in a shared slot.
pub(crate) fn watch<T, E>(promise: &Promise<T, E>) -> Rc<RefCell<Option<Result<T, E>>>>
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    let slot = Rc::new(RefCell::new(None));
    let sink = Rc::clone(&slot);
    promise.on_settled(move |result| *sink.borrow_mut() = Some(result));
    slot
}

/// A deterministic scheduler driven by hand, with a virtual clock.
///
/// Nothing runs until one of the `run*`/`advance` methods is called. Clones
/// share the same queue and clock.
#[derive(Clone, Default)]
pub struct ManualScheduler {
    inner: Rc<ManualInner>,
}

#[derive(Default)]
struct ManualInner {
    queue: RefCell<TaskQueue>,
    now: Cell<Duration>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Virtual time elapsed since creation.
    pub fn now(&self) -> Duration {
        self.inner.now.get()
    }

    pub fn pending_tasks(&self) -> usize {
        self.inner.queue.borrow().ready_len()
    }

    pub fn pending_timers(&self) -> usize {
        self.inner.queue.borrow().timers_len()
    }

    /// Runs ready tasks, including tasks they enqueue, until none are left.
    /// The clock does not move. Returns the number of tasks run.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        loop {
            let task = self.inner.queue.borrow_mut().pop_ready();
            match task {
                Some(task) => {
                    task();
                    ran += 1;
                }
                None => break,
            }
        }
        if ran > 0 {
            tracing::trace!(ran, now = ?self.now(), "drained ready tasks");
        }
        ran
    }

    /// Moves the clock forward by `by`, firing every timer that falls due on
    /// the way in deadline order. Ready tasks are drained before the first
    /// timer and after each one.
    pub fn advance(&self, by: Duration) {
        let target = self.now().saturating_add(by);
        self.run_until_idle();
        loop {
            let due = self.inner.queue.borrow_mut().pop_due(target);
            let Some((deadline, task)) = due else { break };
            self.fire(deadline, task);
            self.run_until_idle();
        }
        self.inner.now.set(target);
    }

    /// Runs everything: ready tasks, then each timer in turn with the clock
    /// jumping to its deadline, until both queues are empty.
    pub fn run(&self) {
        loop {
            self.run_until_idle();
            if !self.fire_next_timer() {
                break;
            }
        }
    }

    /// Drives the queues until `promise` settles and hands back its result.
    ///
    /// Fails with [`Error::Stalled`] when there is nothing left to run and the
    /// promise is still pending.
    pub fn run_until_settled<T, E>(&self, promise: &Promise<T, E>) -> Result<Result<T, E>, Error>
    where
        T: Clone + 'static,
        E: Clone + 'static,
    {
        let slot = watch(promise);
        loop {
            self.run_until_idle();
            if let Some(result) = slot.borrow_mut().take() {
                return Ok(result);
            }
            if !self.fire_next_timer() {
                return Err(Error::Stalled);
            }
        }
    }

    fn fire_next_timer(&self) -> bool {
        let next = {
            let mut queue = self.inner.queue.borrow_mut();
            match queue.next_deadline() {
                Some(deadline) => queue.pop_due(deadline),
                None => None,
            }
        };
        match next {
            Some((deadline, task)) => {
                self.fire(deadline, task);
                true
            }
            None => false,
        }
    }

    fn fire(&self, deadline: Duration, task: Task) {
        if deadline > self.now() {
            self.inner.now.set(deadline);
        }
        tracing::trace!(now = ?self.now(), "timer fired");
        task();
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, task: Task) {
        self.inner.queue.borrow_mut().push(task);
    }

    fn schedule_after(&self, task: Task, delay: Duration) {
        let deadline = self.now().saturating_add(delay);
        self.inner.queue.borrow_mut().push_timer(deadline, task);
    }
}

impl fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualScheduler")
            .field("now", &self.now())
            .field("pending_tasks", &self.pending_tasks())
            .field("pending_timers", &self.pending_timers())
            .finish()
    }
}
