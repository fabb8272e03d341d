//! Combinators composing promises. These only use the public chaining
//! surface and the value-wrapping constructor.
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use crate::promise::Promise;
use crate::resolution::Resolution;
use crate::scheduler::Scheduler;

fn wrap_all<T, E, I, R>(scheduler: &Rc<dyn Scheduler>, inputs: I) -> Vec<Promise<T, E>>
where
    T: Clone + 'static,
    E: Clone + 'static,
    I: IntoIterator<Item = R>,
    R: Into<Resolution<T, E>>,
{
    inputs
        .into_iter()
        .map(|input| Promise::resolved_in(Rc::clone(scheduler), input.into()))
        .collect()
}

impl<T, E> Promise<T, E>
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    /// Fulfills with every input's value, in input order, once all of them
    /// have fulfilled. Rejects with the first rejection; the other inputs keep
    /// running but their outcomes are dropped.
    ///
    /// An empty input fulfills with an empty `Vec`.
    pub fn all<S, I, R>(scheduler: &S, inputs: I) -> Promise<Vec<T>, E>
    where
        S: Scheduler + Clone + 'static,
        I: IntoIterator<Item = R>,
        R: Into<Resolution<T, E>>,
    {
        let scheduler: Rc<dyn Scheduler> = Rc::new(scheduler.clone());
        let wrapped = wrap_all(&scheduler, inputs);
        Promise::with_scheduler(scheduler, move |resolver| {
            if wrapped.is_empty() {
                resolver.fulfill(Vec::new());
                return Ok(());
            }
            let values: Rc<RefCell<Vec<Option<T>>>> = Rc::new(RefCell::new(vec![None; wrapped.len()]));
            let remaining = Rc::new(Cell::new(wrapped.len()));
            let failed = Rc::new(Cell::new(false));
            for (index, input) in wrapped.iter().enumerate() {
                let values = Rc::clone(&values);
                let remaining = Rc::clone(&remaining);
                let failed_on_value = Rc::clone(&failed);
                let failed_on_reason = Rc::clone(&failed);
                let on_value = resolver.clone();
                let on_reason = resolver.clone();
                input.then(
                    move |value| {
                        if !failed_on_value.get() {
                            values.borrow_mut()[index] = Some(value);
                            remaining.set(remaining.get() - 1);
                            if remaining.get() == 0 {
                                let collected = values.borrow_mut().drain(..).flatten().collect();
                                on_value.fulfill(collected);
                            }
                        }
                        Ok(Resolution::Value(()))
                    },
                    move |reason| {
                        failed_on_reason.set(true);
                        on_reason.reject(reason);
                        Ok(Resolution::Value(()))
                    },
                );
            }
            Ok(())
        })
    }

    /// Settles the same way as whichever input settles first. An empty input
    /// never settles.
    pub fn race<S, I, R>(scheduler: &S, inputs: I) -> Promise<T, E>
    where
        S: Scheduler + Clone + 'static,
        I: IntoIterator<Item = R>,
        R: Into<Resolution<T, E>>,
    {
        let scheduler: Rc<dyn Scheduler> = Rc::new(scheduler.clone());
        let wrapped = wrap_all(&scheduler, inputs);
        Promise::with_scheduler(scheduler, move |resolver| {
            for input in &wrapped {
                let on_value = resolver.clone();
                let on_reason = resolver.clone();
                input.then(
                    move |value| {
                        on_value.fulfill(value);
                        Ok(Resolution::Value(()))
                    },
                    move |reason| {
                        on_reason.reject(reason);
                        Ok(Resolution::Value(()))
                    },
                );
            }
            Ok(())
        })
    }

    /// Resolves with `candidate` once `delay` has elapsed. A promise
    /// candidate is adopted when the delay ends, not before.
    pub fn delay_resolve<S>(scheduler: &S, candidate: impl Into<Resolution<T, E>>, delay: Duration) -> Self
    where
        S: Scheduler + Clone + 'static,
    {
        let candidate = candidate.into();
        let timer = scheduler.clone();
        Self::new(scheduler, move |resolver| {
            timer.schedule_after(Box::new(move || resolver.resolve(candidate)), delay);
            Ok(())
        })
    }

    /// Rejects with `reason` once `delay` has elapsed.
    pub fn delay_reject<S>(scheduler: &S, reason: E, delay: Duration) -> Self
    where
        S: Scheduler + Clone + 'static,
    {
        let timer = scheduler.clone();
        Self::new(scheduler, move |resolver| {
            timer.schedule_after(Box::new(move || resolver.reject(reason)), delay);
            Ok(())
        })
    }
}
