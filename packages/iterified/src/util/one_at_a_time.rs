//! Serialization of overlapping asynchronous calls.

use futures::{
    channel::oneshot,
    future::{
        FutureExt,
        LocalBoxFuture,
        Shared,
    },
};
use std::{
    cell::RefCell,
    future::Future,
};


/// Queue which runs overlapping asynchronous calls strictly one after another
///
/// A call takes its place in line when [`call`](Self::call) is invoked, not when its future is
/// first polled. Its work does not begin until every call queued before it has resolved or been
/// dropped, and each caller receives the output of its own call.
///
/// Since futures are lazy, a queued call can only make progress once the calls ahead of it are
/// polled to completion or dropped.
#[derive(Default)]
pub struct OneAtATime {
    // fires once the most recently queued call, and every call before it, resolved or was dropped.
    tail: RefCell<Option<Shared<LocalBoxFuture<'static, ()>>>>,
}

impl OneAtATime {
    /// Construct with an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `fut` behind all previously queued calls
    ///
    /// The returned future does not borrow `self`.
    pub fn call<F: Future>(&self, fut: F) -> impl Future<Output = F::Output> {
        let (finished, on_finished) = oneshot::channel::<()>();
        let prev = self.tail.borrow_mut().take();
        // the next call's turn waits for this call and for everything queued before it.
        let turn = {
            let prev = prev.clone();
            async move {
                if let Some(prev) = prev {
                    prev.await;
                }
                let _ = on_finished.await;
            }
        };
        *self.tail.borrow_mut() = Some(turn.boxed_local().shared());
        async move {
            // dropping the sender is what lets the next call proceed
            let _finished = finished;
            if let Some(prev) = prev {
                prev.await;
            }
            fut.await
        }
    }
}
