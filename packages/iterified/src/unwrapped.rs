// multicast sequences fed from the outside, with no executor in between.

use crate::{
    channel::api::{Channel, Cursor},
    error::Cause,
};
use std::fmt::{self, Formatter, Debug};


/// Construct an [`Unwrapped`]
pub fn unwrapped<T, E>() -> Unwrapped<T, E> {
    Unwrapped::new()
}

/// Producer handle of a multicast sequence which is fed by calling its methods directly
///
/// Unlike [`Iterified`](crate::Iterified), there is no executor, no consumer counting, and no
/// teardown. Values go straight into a single channel, and consumers obtained from
/// [`iterable`](Self::iterable) are plain [`Cursor`]s. Once ended, the sequence stays ended.
///
/// Cloning an `Unwrapped` clones a handle to the same sequence.
pub struct Unwrapped<T, E = Cause> {
    /// Consumer side of the sequence
    pub iterable: UnwrappedIterable<T, E>,
}

/// Consumer side of an [`Unwrapped`]
pub struct UnwrappedIterable<T, E = Cause>(Channel<T, E>);

impl<T, E> Unwrapped<T, E> {
    /// Construct an active sequence with no consumers
    pub fn new() -> Self {
        Unwrapped { iterable: UnwrappedIterable(Channel::new()) }
    }

    /// Emit a value to every attached consumer
    ///
    /// Returns whether the sequence was still active.
    pub fn push(&self, value: T) -> bool {
        self.iterable.0.put(value)
    }

    /// End the sequence
    ///
    /// Returns whether this call ended it.
    pub fn done(&self) -> bool {
        self.iterable.0.close()
    }

    /// End the sequence with an error
    ///
    /// Returns whether this call ended it.
    pub fn error(&self, cause: E) -> bool {
        self.iterable.0.error(cause)
    }

    /// Whether the sequence has ended
    pub fn is_closed(&self) -> bool {
        self.iterable.0.is_closed()
    }
}

impl<T, E> UnwrappedIterable<T, E> {
    /// Attach a new consumer, which sees the values pushed from now on
    pub fn iter(&self) -> Cursor<T, E> {
        self.0.attach()
    }
}

impl<T, E> Default for Unwrapped<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> Clone for Unwrapped<T, E> {
    fn clone(&self) -> Self {
        Unwrapped { iterable: self.iterable.clone() }
    }
}

impl<T, E> Clone for UnwrappedIterable<T, E> {
    fn clone(&self) -> Self {
        UnwrappedIterable(self.0.clone())
    }
}

impl<T, E> Debug for Unwrapped<T, E> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("Unwrapped")
            .field("channel", &self.iterable.0)
            .finish()
    }
}

impl<T, E> Debug for UnwrappedIterable<T, E> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_tuple("UnwrappedIterable").field(&self.0).finish()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use futures::{poll, FutureExt, StreamExt};
    use std::task::Poll;

    #[tokio::test]
    async fn each_consumer_gets_each_value_in_order() {
        let source = unwrapped::<&str, ()>();
        let iter_1 = source.iterable.iter();
        let iter_2 = source.iterable.iter();

        source.push("value_1");
        source.push("value_2");
        source.push("value_3");

        for iter in [&iter_1, &iter_2] {
            assert_eq!(iter.next().await, Ok(Some("value_1")));
            assert_eq!(iter.next().await, Ok(Some("value_2")));
            assert_eq!(iter.next().await, Ok(Some("value_3")));
        }
    }

    #[tokio::test]
    async fn done_reaches_every_consumer() {
        let source = unwrapped::<&str, ()>();
        let iter_1 = source.iterable.iter();
        let iter_2 = source.iterable.iter();

        source.push("value");
        assert!(source.done());
        assert!(!source.done());
        assert!(!source.push("late"));
        assert!(source.is_closed());

        for iter in [&iter_1, &iter_2] {
            assert_eq!(iter.next().await, Ok(Some("value")));
            assert_eq!(iter.next().await, Ok(None));
        }
    }

    #[tokio::test]
    async fn consumers_see_values_from_their_attach_point() {
        let source = unwrapped::<u32, ()>();
        let iter_1 = source.iterable.iter();
        source.push(1);
        source.push(2);
        let iter_2 = source.iterable.iter();
        source.push(3);
        source.push(4);
        let iter_3 = source.iterable.iter();
        source.push(5);
        source.push(6);
        let iter_4 = source.iterable.iter();
        source.done();

        let collect = |iter: Cursor<u32, ()>| async move {
            iter.map(|item| item.unwrap()).collect::<Vec<_>>().await
        };
        assert_eq!(collect(iter_1).await, [1, 2, 3, 4, 5, 6]);
        assert_eq!(collect(iter_2).await, [3, 4, 5, 6]);
        assert_eq!(collect(iter_3).await, [5, 6]);
        assert!(collect(iter_4).await.is_empty());
    }

    #[tokio::test]
    async fn pending_pulls_resolve_one_by_one() {
        let source = unwrapped::<&str, ()>();
        let iter = source.iterable.iter();
        let mut pull_1 = iter.next().boxed_local();
        let mut pull_2 = iter.next().boxed_local();
        assert!(poll!(&mut pull_1).is_pending());
        assert!(poll!(&mut pull_2).is_pending());

        source.push("value_1");
        assert!(poll!(&mut pull_1).is_ready());
        assert!(poll!(&mut pull_2).is_pending());
        source.push("value_2");
        assert_eq!(pull_2.await, Ok(Some("value_2")));
    }

    #[tokio::test]
    async fn pulls_after_end_stay_done() {
        let source = unwrapped::<&str, &str>();
        let iter = source.iterable.iter();
        source.done();
        assert_eq!(iter.next().await, Ok(None));
        assert_eq!(iter.next().await, Ok(None));

        // the error is raised once, even to a consumer attached after it
        let errored = unwrapped::<&str, &str>();
        errored.error("oops...");
        let iter = errored.iterable.iter();
        assert_eq!(iter.next().await, Err("oops..."));
        assert_eq!(iter.next().await, Ok(None));
        assert_eq!(iter.next().await, Ok(None));
    }

    #[tokio::test]
    async fn closing_resolves_only_that_consumers_pulls() {
        let source = unwrapped::<&str, ()>();
        let iter_1 = source.iterable.iter();
        let iter_2 = source.iterable.iter();
        let mut pulls_1 = [iter_1.next().boxed_local(), iter_1.next().boxed_local()];
        let mut pulls_2 = [iter_2.next().boxed_local(), iter_2.next().boxed_local()];
        for pull in pulls_1.iter_mut().chain(&mut pulls_2) {
            assert!(poll!(pull).is_pending());
        }

        iter_1.close();
        for pull in &mut pulls_1 {
            assert_eq!(poll!(pull), Poll::Ready(Ok(None)));
        }
        for pull in &mut pulls_2 {
            assert!(poll!(pull).is_pending());
        }

        iter_2.close();
        for pull in &mut pulls_2 {
            assert_eq!(poll!(pull), Poll::Ready(Ok(None)));
        }
        assert!(!source.is_closed());
    }
}
