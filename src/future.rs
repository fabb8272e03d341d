//! Awaiting a promise from async code.
use std::cell::RefCell;
use std::fmt;
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use crate::Promise;

/// Future returned by awaiting a [`Promise`].
///
/// The first poll registers a waiter like any other handler. It completes
/// once that waiter has run, so something must keep driving the promise's
/// scheduler in the meantime.
///
/// # Examples
///
/// ```
/// use deferred::{ManualScheduler, Promise, Resolution};
/// use futures::executor::LocalPool;
/// use futures::task::LocalSpawnExt;
/// use std::cell::RefCell;
/// use std::rc::Rc;
///
/// let scheduler = ManualScheduler::new();
/// let p = Promise::<i32, ()>::resolved(&scheduler, Resolution::Value(4));
/// let out = Rc::new(RefCell::new(None));
/// let sink = Rc::clone(&out);
///
/// let mut pool = LocalPool::new();
/// pool.spawner()
///     .spawn_local(async move { *sink.borrow_mut() = Some(p.await) })
///     .unwrap();
/// pool.run_until_stalled();
/// scheduler.run();
/// pool.run_until_stalled();
/// assert_eq!(*out.borrow(), Some(Ok(4)));
/// ```
pub struct Settled<T, E> {
    promise: Promise<T, E>,
    slot: Rc<RefCell<Slot<T, E>>>,
    registered: bool,
}

struct Slot<T, E> {
    result: Option<Result<T, E>>,
    waker: Option<Waker>,
}

impl<T, E> fmt::Debug for Settled<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settled")
            .field("promise", &self.promise)
            .field("registered", &self.registered)
            .finish()
    }
}

impl<T, E> Future for Settled<T, E>
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    type Output = Result<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        {
            let mut slot = this.slot.borrow_mut();
            if let Some(result) = slot.result.take() {
                return Poll::Ready(result);
            }
            slot.waker = Some(cx.waker().clone());
        }
        if !this.registered {
            this.registered = true;
            let slot = Rc::clone(&this.slot);
            this.promise.on_settled(move |result| {
                let waker = {
                    let mut slot = slot.borrow_mut();
                    slot.result = Some(result);
                    slot.waker.take()
                };
                if let Some(waker) = waker {
                    waker.wake();
                }
            });
        }
        Poll::Pending
    }
}

impl<T, E> IntoFuture for Promise<T, E>
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    type Output = Result<T, E>;
    type IntoFuture = Settled<T, E>;

    fn into_future(self) -> Self::IntoFuture {
        Settled {
            promise: self,
            slot: Rc::new(RefCell::new(Slot {
                result: None,
                waker: None,
            })),
            registered: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{ManualScheduler, Promise, Resolution};
    use futures::executor::LocalPool;
    use futures::task::LocalSpawnExt;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::time::Duration;

    #[test]
    fn test_await_waits_for_scheduler() {
        let scheduler = ManualScheduler::new();
        let p = Promise::<i32, &str>::delay_resolve(&scheduler, Resolution::Value(1), Duration::from_millis(10));
        let out = Rc::new(RefCell::new(None));
        let sink = Rc::clone(&out);

        let mut pool = LocalPool::new();
        pool.spawner()
            .spawn_local(async move {
                let doubled = p.map(|v| v * 2).await;
                *sink.borrow_mut() = Some(doubled);
            })
            .unwrap();
        pool.run_until_stalled();
        assert!(out.borrow().is_none());

        scheduler.advance(Duration::from_millis(5));
        pool.run_until_stalled();
        assert!(out.borrow().is_none());

        scheduler.advance(Duration::from_millis(5));
        pool.run_until_stalled();
        assert_eq!(*out.borrow(), Some(Ok(2)));
    }

    #[test]
    fn test_await_rejection() {
        let scheduler = ManualScheduler::new();
        let p = Promise::<i32, &str>::rejected(&scheduler, "no");
        let out = Rc::new(RefCell::new(None));
        let sink = Rc::clone(&out);

        let mut pool = LocalPool::new();
        pool.spawner()
            .spawn_local(async move { *sink.borrow_mut() = Some(p.await) })
            .unwrap();
        pool.run_until_stalled();
        scheduler.run_until_idle();
        pool.run_until_stalled();
        assert_eq!(*out.borrow(), Some(Err("no")));
    }
}
