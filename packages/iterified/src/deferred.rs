//! Single-shot futures which are settled from the outside.

use futures::{
    channel::oneshot,
    future::{
        self,
        FusedFuture,
        FutureExt,
        LocalBoxFuture,
        Shared,
    },
};
use std::{
    cell::RefCell,
    fmt::{self, Formatter, Debug},
    future::Future,
    pin::Pin,
    task::{Poll, Context},
};


/// Future which is resolved or rejected by whoever holds the `Deferred`
///
/// Only the first call to [`resolve`](Self::resolve) or [`reject`](Self::reject) has an effect.
/// All later calls are ignored. If a `Deferred` is dropped without being settled, its futures
/// remain pending forever.
pub struct Deferred<T, E> {
    // taken when settled.
    sender: RefCell<Option<oneshot::Sender<Result<T, E>>>>,
    future: DeferredFuture<T, E>,
}

/// Future half of a [`Deferred`]
///
/// Any number of clones may exist. They all resolve to the same settled value.
pub struct DeferredFuture<T, E>(Shared<LocalBoxFuture<'static, Result<T, E>>>);

impl<T: Clone + 'static, E: Clone + 'static> Deferred<T, E> {
    /// Construct an unsettled deferred
    pub fn new() -> Self {
        let (sender, receiver) = oneshot::channel();
        let future = async move {
            match receiver.await {
                Ok(result) => result,
                // dropped without settling
                Err(oneshot::Canceled) => future::pending().await,
            }
        };
        Deferred {
            sender: RefCell::new(Some(sender)),
            future: DeferredFuture(future.boxed_local().shared()),
        }
    }

    /// Get a future which resolves once this deferred is settled
    pub fn future(&self) -> DeferredFuture<T, E> {
        self.future.clone()
    }
}

impl<T, E> Deferred<T, E> {
    /// Resolve with a value, unless already settled
    ///
    /// Returns whether this call settled the deferred.
    pub fn resolve(&self, value: T) -> bool {
        self.settle(Ok(value))
    }

    /// Reject with an error, unless already settled
    ///
    /// Returns whether this call settled the deferred.
    pub fn reject(&self, error: E) -> bool {
        self.settle(Err(error))
    }

    /// Whether this deferred has been resolved or rejected
    pub fn is_settled(&self) -> bool {
        self.sender.borrow().is_none()
    }

    fn settle(&self, result: Result<T, E>) -> bool {
        // release the borrow before waking anything
        let sender = self.sender.borrow_mut().take();
        match sender {
            Some(sender) => {
                // the receiver lives inside our own shared future, so this can't fail.
                let _ = sender.send(result);
                true
            }
            None => false,
        }
    }
}

impl<T: Clone + 'static, E: Clone + 'static> Default for Deferred<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> Debug for Deferred<T, E> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("settled", &self.is_settled())
            .finish()
    }
}

impl<T: Clone, E: Clone> DeferredFuture<T, E> {
    /// The settled value, if this future has already been polled to completion by any clone
    pub fn peek(&self) -> Option<Result<T, E>> {
        self.0.peek().cloned()
    }
}

impl<T, E> Clone for DeferredFuture<T, E> {
    fn clone(&self) -> Self {
        DeferredFuture(self.0.clone())
    }
}

impl<T: Clone, E: Clone> Future for DeferredFuture<T, E> {
    type Output = Result<T, E>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context) -> Poll<Self::Output> {
        Pin::new(&mut self.0).poll(cx)
    }
}

impl<T: Clone, E: Clone> FusedFuture for DeferredFuture<T, E> {
    fn is_terminated(&self) -> bool {
        self.0.is_terminated()
    }
}
