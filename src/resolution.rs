//! How a candidate result becomes a promise's settlement.
use std::fmt;

use crate::promise::{Promise, Resolver};

/// Anything exposing a settlement subscription.
///
/// The resolution procedure adopts any `Thenable` instead of storing it, so
/// foreign deferred-value types can take part by implementing this trait.
/// Exactly one of the two callbacks must eventually be invoked, at most once,
/// and never inside the `subscribe` call itself.
pub trait Thenable<T, E> {
    fn subscribe(self: Box<Self>, on_fulfilled: Box<dyn FnOnce(T)>, on_rejected: Box<dyn FnOnce(E)>);
}

impl<T, E> Thenable<T, E> for Promise<T, E>
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    fn subscribe(self: Box<Self>, on_fulfilled: Box<dyn FnOnce(T)>, on_rejected: Box<dyn FnOnce(E)>) {
        self.on_settled(move |result| match result {
            Ok(value) => on_fulfilled(value),
            Err(reason) => on_rejected(reason),
        });
    }
}

/// A candidate result: either final, or deferred behind something to adopt.
pub enum Resolution<T, E> {
    Value(T),
    Deferred(Box<dyn Thenable<T, E>>),
}

impl<T, E> Resolution<T, E> {
    pub fn is_deferred(&self) -> bool {
        matches!(self, Resolution::Deferred(_))
    }
}

impl<T, E> From<Promise<T, E>> for Resolution<T, E>
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    fn from(promise: Promise<T, E>) -> Self {
        Resolution::Deferred(Box::new(promise))
    }
}

impl<T: fmt::Debug, E> fmt::Debug for Resolution<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Resolution::Deferred(_) => f.write_str("Deferred(..)"),
        }
    }
}

/// Settle `target` from `candidate`.
///
/// A plain value fulfills. A thenable is subscribed to: its value is fed
/// back through this procedure, its rejection is forwarded as is.
pub(crate) fn resolve<T, E>(target: Resolver<T, E>, candidate: Resolution<T, E>)
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    match candidate {
        Resolution::Value(value) => target.fulfill(value),
        Resolution::Deferred(thenable) => {
            tracing::trace!("adopting a nested deferred value");
            let on_rejected = target.clone();
            thenable.subscribe(
                Box::new(move |value| resolve(target, Resolution::Value(value))),
                Box::new(move |reason| on_rejected.reject(reason)),
            );
        }
    }
}
