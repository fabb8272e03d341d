use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Once;

use deferred::{ManualScheduler, Promise, Resolver};

static INIT_LOGGING: Once = Once::new();

/// Install a test-writer subscriber once. `RUST_LOG` picks the level.
pub fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .with_ansi(false)
            .try_init();
    });
}

/// A pending promise together with the resolver that settles it.
pub fn pending_pair<T, E>(scheduler: &ManualScheduler) -> (Promise<T, E>, Resolver<T, E>)
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    let stash = Rc::new(RefCell::new(None));
    let slot = Rc::clone(&stash);
    let promise = Promise::new(scheduler, move |resolver| {
        *slot.borrow_mut() = Some(resolver);
        Ok(())
    });
    let resolver = stash.borrow_mut().take().expect("initializer runs inline");
    (promise, resolver)
}
