// adapter from "pull" futures to `Stream::poll_next`.

use futures::{
    future::LocalBoxFuture,
    ready,
};
use std::task::{Poll, Context};


// boxed future for a single pull. resolves to `Ok(None)` once the sequence is finished.
pub(crate) type Pull<T, E> = LocalBoxFuture<'static, Result<Option<T>, E>>;

// poll the in-flight pull, starting a new one if none is in flight.
//
// the slot is cleared once the pull resolves, so the next call starts a fresh pull.
pub(crate) fn poll_pull<T, E>(
    in_flight: &mut Option<Pull<T, E>>,
    cx: &mut Context,
    start: impl FnOnce() -> Pull<T, E>,
) -> Poll<Option<Result<T, E>>> {
    let pull = in_flight.get_or_insert_with(start);
    let result = ready!(pull.as_mut().poll(cx));
    *in_flight = None;
    Poll::Ready(result.transpose())
}
