//! Settle-once deferred values for single-threaded code.
//!
//! A [`Promise`] stands for a result that is not available yet. It settles
//! exactly once, as fulfilled or rejected. Handlers chained with
//! [`Promise::then`] never run inside the call that registers or triggers
//! them: all of them go through an injected [`Scheduler`]. A handler that
//! returns another promise is followed, so chains flatten.
//!
//! ```
//! use deferred::{ManualScheduler, Promise, Resolution};
//! use std::time::Duration;
//!
//! let scheduler = ManualScheduler::new();
//! let first = Promise::<i32, String>::delay_resolve(&scheduler, Resolution::Value(1), Duration::from_millis(5));
//! let second = Promise::<i32, String>::resolved(&scheduler, Resolution::Value(2));
//! let sum = Promise::<i32, String>::all(&scheduler, [first, second]).map(|values| values.iter().sum::<i32>());
//! assert_eq!(scheduler.run_until_settled(&sum), Ok(Ok(3)));
//! ```
mod combinators;
mod event_loop;
mod future;
mod promise;
mod resolution;
mod scheduler;

pub use event_loop::EventLoop;
pub use future::Settled;
pub use promise::{Outcome, Promise, Resolver, Status};
pub use resolution::{Resolution, Thenable};
pub use scheduler::{ManualScheduler, Scheduler, Task};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    #[error("Scheduler ran out of work while the promise was still pending")]
    Stalled,
}
