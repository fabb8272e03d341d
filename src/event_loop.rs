//! A wall-clock scheduler for driving promises from a plain thread.
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::thread;
use std::time::{Duration, Instant};

use crate::scheduler::{watch, Scheduler, Task, TaskQueue};
use crate::{Error, Promise};

/// Runs promise callbacks on the current thread against real time.
///
/// Tasks only run inside [`run`](Self::run) or [`block_on`](Self::block_on).
/// Timers sleep the thread until their deadline.
///
/// # Examples
///
/// ```
/// use deferred::{EventLoop, Promise};
/// use std::time::Duration;
///
/// let event_loop = EventLoop::new();
/// let p = Promise::<(), &str>::delay_reject(&event_loop, "boom", Duration::from_millis(5));
/// assert_eq!(event_loop.block_on(&p), Ok(Err("boom")));
/// ```
#[derive(Clone)]
pub struct EventLoop {
    inner: Rc<LoopInner>,
}

struct LoopInner {
    queue: RefCell<TaskQueue>,
    started: Instant,
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLoop {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(LoopInner {
                queue: RefCell::new(TaskQueue::default()),
                started: Instant::now(),
            }),
        }
    }

    fn elapsed(&self) -> Duration {
        self.inner.started.elapsed()
    }

    fn drain_ready(&self) {
        loop {
            let task = self.inner.queue.borrow_mut().pop_ready();
            match task {
                Some(task) => task(),
                None => break,
            }
        }
    }

    /// Sleeps until the earliest timer is due and runs it. Returns `false`
    /// when no timer is queued.
    fn fire_next_timer(&self) -> bool {
        let Some(deadline) = self.inner.queue.borrow().next_deadline() else {
            return false;
        };
        let now = self.elapsed();
        if deadline > now {
            tracing::trace!(wait = ?(deadline - now), "sleeping until next timer");
            thread::sleep(deadline - now);
        }
        let due = self.inner.queue.borrow_mut().pop_due(self.elapsed());
        if let Some((_, task)) = due {
            task();
        }
        true
    }

    /// Runs until both the ready queue and the timers are empty.
    pub fn run(&self) {
        loop {
            self.drain_ready();
            if !self.fire_next_timer() {
                break;
            }
        }
    }

    /// Runs until `promise` settles and returns its result.
    ///
    /// Fails with [`Error::Stalled`] if the loop runs dry first.
    pub fn block_on<T, E>(&self, promise: &Promise<T, E>) -> Result<Result<T, E>, Error>
    where
        T: Clone + 'static,
        E: Clone + 'static,
    {
        let slot = watch(promise);
        loop {
            self.drain_ready();
            if let Some(result) = slot.borrow_mut().take() {
                return Ok(result);
            }
            if !self.fire_next_timer() {
                return Err(Error::Stalled);
            }
        }
    }
}

impl Scheduler for EventLoop {
    fn schedule(&self, task: Task) {
        self.inner.queue.borrow_mut().push(task);
    }

    fn schedule_after(&self, task: Task, delay: Duration) {
        let deadline = self.elapsed().saturating_add(delay);
        self.inner.queue.borrow_mut().push_timer(deadline, task);
    }
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let queue = self.inner.queue.borrow();
        f.debug_struct("EventLoop")
            .field("elapsed", &self.elapsed())
            .field("ready", &queue.ready_len())
            .field("timers", &queue.timers_len())
            .finish()
    }
}
