//! Contract between an [`Iterified`](crate::Iterified) and the executor function it drives.
//!
//! An executor receives a [`Producer`] and emits values through it. It returns an
//! [`ExecutorOutput`]: either synchronously or as a future, either a failure or an optional
//! [`Teardown`] to run once the generation ends.

use crate::{
    error::Cause,
    iterified::{Generation, End},
};
use futures::future::{self, FutureExt, LocalBoxFuture};
use std::{
    future::Future,
    rc::Weak,
};


/// A value which is either available now or produced by a future
pub enum MaybeAsync<T> {
    /// Available immediately
    Sync(T),
    /// Available once the future resolves
    Async(LocalBoxFuture<'static, T>),
}

impl<T> MaybeAsync<T> {
    /// Wrap a future
    pub fn from_future<F>(fut: F) -> Self
    where
        F: Future<Output = T> + 'static,
    {
        MaybeAsync::Async(fut.boxed_local())
    }

    /// Whether this is [`MaybeAsync::Sync`]
    pub fn is_sync(&self) -> bool {
        matches!(self, MaybeAsync::Sync(_))
    }
}

impl<T: 'static> MaybeAsync<T> {
    /// Convert into a future, which is immediately ready for [`MaybeAsync::Sync`]
    pub fn into_future(self) -> LocalBoxFuture<'static, T> {
        match self {
            MaybeAsync::Sync(value) => future::ready(value).boxed_local(),
            MaybeAsync::Async(fut) => fut,
        }
    }
}

impl<T> From<T> for MaybeAsync<T> {
    fn from(value: T) -> Self {
        MaybeAsync::Sync(value)
    }
}

/// Cleanup function returned by an executor, run at most once when its generation ends
pub type Teardown<E = Cause> = Box<dyn FnOnce() -> MaybeAsync<Result<(), E>>>;

/// What an executor returns
///
/// - `Sync(Ok(teardown))` or `Async(..)` resolving to `Ok(teardown)`: the executor started, and
///   `teardown` (if any) runs once the generation ends.
/// - `Async(..)` resolving to `Err(cause)`: equivalent to [`Producer::error`], visible to every
///   consumer.
/// - `Sync(Err(cause))`: the executor failed while being invoked. `cause` is returned only to the
///   pull which invoked it, and the generation then ends as if by [`Producer::done`].
pub type ExecutorOutput<E = Cause> = MaybeAsync<Result<Option<Teardown<E>>, E>>;

/// Box a synchronous teardown function
pub fn teardown<E, F>(f: F) -> Teardown<E>
where
    F: FnOnce() -> Result<(), E> + 'static,
{
    Box::new(move || MaybeAsync::Sync(f()))
}

/// Box an asynchronous teardown function
pub fn async_teardown<E, F, Fut>(f: F) -> Teardown<E>
where
    F: FnOnce() -> Fut + 'static,
    Fut: Future<Output = Result<(), E>> + 'static,
{
    Box::new(move || MaybeAsync::from_future(f()))
}


/// Capabilities handed to an executor for emitting into its generation
///
/// Every method only has an effect while the generation has not yet begun tearing down. After
/// that, or once the generation is gone, they do nothing and return false. Cloning a `Producer`
/// clones a handle to the same generation.
pub struct Producer<T, E = Cause> {
    generation: Weak<Generation<T, E>>,
}

impl<T, E> Producer<T, E> {
    pub(crate) fn new(generation: Weak<Generation<T, E>>) -> Self {
        Producer { generation }
    }

    /// Emit a value to every attached consumer
    pub fn push(&self, value: T) -> bool {
        self.generation.upgrade()
            .is_some_and(|generation| generation.push(value))
    }

    /// End the sequence
    ///
    /// Consumers finish after draining the values already emitted, once teardown has finished.
    pub fn done(&self) -> bool {
        self.generation.upgrade()
            .is_some_and(|generation| generation.end(End::Done))
    }

    /// End the sequence with an error
    ///
    /// Consumers receive `cause` after draining the values already emitted, once teardown has
    /// finished.
    pub fn error(&self, cause: E) -> bool {
        self.generation.upgrade()
            .is_some_and(|generation| generation.end(End::Error(cause)))
    }

    /// Whether the generation has begun tearing down, or is gone
    pub fn is_ended(&self) -> bool {
        self.generation.upgrade()
            .is_none_or(|generation| generation.is_ending())
    }
}

impl<T, E> Clone for Producer<T, E> {
    fn clone(&self) -> Self {
        Producer { generation: Weak::clone(&self.generation) }
    }
}
