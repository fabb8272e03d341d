//! The settle-once state machine and the chaining operator.
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::resolution::{self, Resolution};
use crate::scheduler::Scheduler;

/// Where a [`Promise`] is in its lifecycle. Moves out of `Pending` once and
/// never back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Pending,
    Fulfilled,
    Rejected,
}

/// What a handler hands back: a candidate for the derived promise, or an
/// `Err` standing in for a thrown exception.
pub type Outcome<T, E> = Result<Resolution<T, E>, E>;

type Waiter<T, E> = Box<dyn FnOnce(Result<T, E>)>;

enum State<T, E> {
    Pending(Vec<Waiter<T, E>>),
    Settled(Result<T, E>),
}

struct Shared<T, E> {
    state: RefCell<State<T, E>>,
    scheduler: Rc<dyn Scheduler>,
}

impl<T, E> Shared<T, E>
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    fn settle(&self, result: Result<T, E>) {
        let waiters = {
            let mut state = self.state.borrow_mut();
            match std::mem::replace(&mut *state, State::Settled(result.clone())) {
                State::Pending(waiters) => waiters,
                settled @ State::Settled(_) => {
                    *state = settled;
                    tracing::debug!("ignoring settlement of an already settled promise");
                    return;
                }
            }
        };
        tracing::trace!(
            fulfilled = result.is_ok(),
            waiters = waiters.len(),
            "promise settled"
        );
        if waiters.is_empty() {
            return;
        }
        self.scheduler.schedule(Box::new(move || {
            for waiter in waiters {
                waiter(result.clone());
            }
        }));
    }
}

/// A value that will be available later, or a reason it never will be.
///
/// A `Promise` is a handle: clones observe the same settlement. Results are
/// only observable by registering handlers with [`then`](Self::then) and
/// friends, and those handlers always run on a later scheduler turn.
///
/// # Examples
///
/// ```
/// use deferred::{ManualScheduler, Promise, Resolution};
///
/// let scheduler = ManualScheduler::new();
/// let p = Promise::<i32, String>::new(&scheduler, |resolver| {
///     resolver.fulfill(2);
///     Ok(())
/// })
/// .map(|v| v * 10)
/// .and_then(|v| Ok(Resolution::Value(v + 5)));
/// assert_eq!(scheduler.run_until_settled(&p), Ok(Ok(25)));
/// ```
pub struct Promise<T, E> {
    shared: Rc<Shared<T, E>>,
}

impl<T, E> Clone for Promise<T, E> {
    fn clone(&self) -> Self {
        Self {
            shared: Rc::clone(&self.shared),
        }
    }
}

impl<T, E> fmt::Debug for Promise<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match &*self.shared.state.borrow() {
            State::Pending(_) => Status::Pending,
            State::Settled(Ok(_)) => Status::Fulfilled,
            State::Settled(Err(_)) => Status::Rejected,
        };
        f.debug_struct("Promise").field("status", &status).finish()
    }
}

/// The completion capabilities handed to a promise's initializer.
///
/// Every method is a no-op once the promise has settled. Clones settle the
/// same promise, so a resolver can be stashed and called from a later task.
pub struct Resolver<T, E> {
    shared: Rc<Shared<T, E>>,
}

impl<T, E> Clone for Resolver<T, E> {
    fn clone(&self) -> Self {
        Self {
            shared: Rc::clone(&self.shared),
        }
    }
}

impl<T, E> fmt::Debug for Resolver<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver").finish_non_exhaustive()
    }
}

impl<T, E> Resolver<T, E>
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    /// Settle as fulfilled with `value`.
    pub fn fulfill(&self, value: T) {
        self.shared.settle(Ok(value));
    }

    /// Settle as rejected with `reason`.
    pub fn reject(&self, reason: E) {
        self.shared.settle(Err(reason));
    }

    /// Settle through the resolution procedure: a nested promise is adopted
    /// rather than stored.
    pub fn resolve(&self, candidate: impl Into<Resolution<T, E>>) {
        resolution::resolve(self.clone(), candidate.into());
    }
}

impl<T, E> Promise<T, E>
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    /// Creates a pending promise and runs `initializer` on it right away.
    ///
    /// An `Err` returned by the initializer rejects the promise with that
    /// reason, unless the initializer already settled it.
    pub fn new<S, F>(scheduler: &S, initializer: F) -> Self
    where
        S: Scheduler + Clone + 'static,
        F: FnOnce(Resolver<T, E>) -> Result<(), E>,
    {
        Self::with_scheduler(Rc::new(scheduler.clone()), initializer)
    }

    /// A promise that adopts `candidate`: fulfilled with a plain value, or
    /// mirroring a nested promise once it settles.
    pub fn resolved<S>(scheduler: &S, candidate: impl Into<Resolution<T, E>>) -> Self
    where
        S: Scheduler + Clone + 'static,
    {
        Self::resolved_in(Rc::new(scheduler.clone()), candidate.into())
    }

    /// An already rejected promise. `reason` is never unwrapped.
    pub fn rejected<S>(scheduler: &S, reason: E) -> Self
    where
        S: Scheduler + Clone + 'static,
    {
        Self::new(scheduler, |resolver| {
            resolver.reject(reason);
            Ok(())
        })
    }

    pub(crate) fn with_scheduler<F>(scheduler: Rc<dyn Scheduler>, initializer: F) -> Self
    where
        F: FnOnce(Resolver<T, E>) -> Result<(), E>,
    {
        let promise = Self {
            shared: Rc::new(Shared {
                state: RefCell::new(State::Pending(Vec::new())),
                scheduler,
            }),
        };
        if let Err(reason) = initializer(promise.resolver()) {
            tracing::trace!("initializer failed, rejecting");
            promise.resolver().reject(reason);
        }
        promise
    }

    pub(crate) fn resolved_in(scheduler: Rc<dyn Scheduler>, candidate: Resolution<T, E>) -> Self {
        Self::with_scheduler(scheduler, |resolver| {
            resolver.resolve(candidate);
            Ok(())
        })
    }

    pub(crate) fn scheduler(&self) -> Rc<dyn Scheduler> {
        Rc::clone(&self.shared.scheduler)
    }

    fn resolver(&self) -> Resolver<T, E> {
        Resolver {
            shared: Rc::clone(&self.shared),
        }
    }

    pub fn status(&self) -> Status {
        match &*self.shared.state.borrow() {
            State::Pending(_) => Status::Pending,
            State::Settled(Ok(_)) => Status::Fulfilled,
            State::Settled(Err(_)) => Status::Rejected,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status() == Status::Pending
    }

    /// Runs `waiter` with the settled result on a later turn. While pending
    /// the waiter is queued behind earlier ones; once settled it is scheduled
    /// straight away.
    pub(crate) fn on_settled(&self, waiter: impl FnOnce(Result<T, E>) + 'static) {
        let settled = {
            let mut state = self.shared.state.borrow_mut();
            match &mut *state {
                State::Pending(waiters) => {
                    waiters.push(Box::new(waiter));
                    return;
                }
                State::Settled(result) => result.clone(),
            }
        };
        self.shared
            .scheduler
            .schedule(Box::new(move || waiter(settled)));
    }

    /// Chains both handlers onto this promise and returns a new one that
    /// settles with whatever the invoked handler produces.
    ///
    /// A handler returning a promise makes the derived promise follow it. A
    /// handler returning `Err` rejects the derived promise.
    pub fn then<U, F, R>(&self, on_fulfilled: F, on_rejected: R) -> Promise<U, E>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> Outcome<U, E> + 'static,
        R: FnOnce(E) -> Outcome<U, E> + 'static,
    {
        let derived = Promise::with_scheduler(self.scheduler(), |_| Ok(()));
        let resolver = derived.resolver();
        self.on_settled(move |result| {
            let outcome = match result {
                Ok(value) => on_fulfilled(value),
                Err(reason) => on_rejected(reason),
            };
            match outcome {
                Ok(candidate) => resolution::resolve(resolver, candidate),
                Err(thrown) => resolver.reject(thrown),
            }
        });
        derived
    }

    /// [`then`](Self::then) without a rejection handler: a rejection passes
    /// through to the derived promise unchanged.
    pub fn and_then<U, F>(&self, on_fulfilled: F) -> Promise<U, E>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> Outcome<U, E> + 'static,
    {
        self.then(on_fulfilled, Err)
    }

    /// [`then`](Self::then) without a fulfillment handler: the value passes
    /// through unchanged.
    pub fn catch<R>(&self, on_rejected: R) -> Promise<T, E>
    where
        R: FnOnce(E) -> Outcome<T, E> + 'static,
    {
        self.then(|value| Ok(Resolution::Value(value)), on_rejected)
    }

    pub fn map<U, F>(&self, f: F) -> Promise<U, E>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> U + 'static,
    {
        self.and_then(move |value| Ok(Resolution::Value(f(value))))
    }
}

#[cfg(test)]
mod tests {
    use super::{Promise, Status};
    use crate::{ManualScheduler, Resolution};
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    #[test]
    fn test_settles_once() {
        let scheduler = ManualScheduler::new();
        let p = Promise::<i32, &str>::new(&scheduler, |resolver| {
            resolver.fulfill(1);
            resolver.fulfill(2);
            resolver.reject("late");
            Ok(())
        });
        assert_eq!(p.status(), Status::Fulfilled);
        assert_eq!(scheduler.run_until_settled(&p), Ok(Ok(1)));
    }

    #[test]
    fn test_initializer_error_rejects() {
        let scheduler = ManualScheduler::new();
        let p = Promise::<i32, &str>::new(&scheduler, |_| Err("E"));
        assert_eq!(p.status(), Status::Rejected);
        assert_eq!(scheduler.run_until_settled(&p), Ok(Err("E")));
    }

    #[test]
    fn test_initializer_error_after_fulfill_is_ignored() {
        let scheduler = ManualScheduler::new();
        let p = Promise::<i32, &str>::new(&scheduler, |resolver| {
            resolver.fulfill(3);
            Err("too late")
        });
        assert_eq!(scheduler.run_until_settled(&p), Ok(Ok(3)));
    }

    #[test]
    fn test_settlement_schedules_one_task_for_all_waiters() {
        let scheduler = ManualScheduler::new();
        let stash = Rc::new(RefCell::new(None));
        let slot = Rc::clone(&stash);
        let p = Promise::<i32, ()>::new(&scheduler, move |resolver| {
            *slot.borrow_mut() = Some(resolver);
            Ok(())
        });
        let order = Rc::new(RefCell::new(Vec::new()));
        for tag in ["first", "second", "third"] {
            let order = Rc::clone(&order);
            p.map(move |v| order.borrow_mut().push((tag, v)));
        }
        let resolver = stash.borrow_mut().take().unwrap();
        resolver.fulfill(9);
        assert!(order.borrow().is_empty());
        assert_eq!(scheduler.pending_tasks(), 1);
        scheduler.run_until_idle();
        assert_eq!(
            *order.borrow(),
            vec![("first", 9), ("second", 9), ("third", 9)]
        );
    }

    #[test]
    fn test_no_task_without_waiters() {
        let scheduler = ManualScheduler::new();
        let _p = Promise::<i32, ()>::resolved(&scheduler, Resolution::Value(1));
        assert_eq!(scheduler.pending_tasks(), 0);
    }

    #[test]
    fn test_then_on_settled_source_is_deferred() {
        let scheduler = ManualScheduler::new();
        let p = Promise::<i32, ()>::resolved(&scheduler, Resolution::Value(1));
        let ran = Rc::new(Cell::new(false));
        let flag = Rc::clone(&ran);
        let derived = p.map(move |v| {
            flag.set(true);
            v
        });
        assert!(!ran.get());
        assert!(derived.is_pending());
        scheduler.run_until_idle();
        assert!(ran.get());
        assert_eq!(derived.status(), Status::Fulfilled);
    }

    #[test]
    fn test_then_returns_distinct_promise() {
        let scheduler = ManualScheduler::new();
        let p = Promise::<i32, ()>::resolved(&scheduler, Resolution::Value(1));
        let derived = p.map(|v| v);
        assert!(!Rc::ptr_eq(&p.shared, &derived.shared));
    }

    #[test]
    fn test_handler_error_rejects_derived() {
        let scheduler = ManualScheduler::new();
        let p = Promise::<i32, String>::resolved(&scheduler, Resolution::Value(1));
        let derived = p.and_then(|_| -> super::Outcome<i32, String> { Err("thrown".into()) });
        assert_eq!(
            scheduler.run_until_settled(&derived),
            Ok(Err("thrown".to_string()))
        );
    }

    #[test]
    fn test_rejection_handler_can_recover() {
        let scheduler = ManualScheduler::new();
        let p = Promise::<i32, &str>::rejected(&scheduler, "bad");
        let derived = p.then(
            |v| Ok(Resolution::Value(v)),
            |reason| Ok(Resolution::Value(reason.len() as i32)),
        );
        assert_eq!(scheduler.run_until_settled(&derived), Ok(Ok(3)));
    }
}
