// exposed API of channels

use super::core::{
    Core,
    State,
    Advance,
};
use crate::{
    deferred::Deferred,
    error::Cause,
    util::{
        OneAtATime,
        pull_stream::{Pull, poll_pull},
    },
};
use futures::{
    future::{select, FutureExt},
    Stream,
};
use std::{
    cell::{Cell, RefCell},
    convert::Infallible,
    fmt::{self, Formatter, Debug},
    future::Future,
    pin::Pin,
    rc::Rc,
    task::{Poll, Context},
};


/// Handle to a multicast channel
///
/// A single producer appends values with [`put`](Self::put), and any number of [`Cursor`]s read
/// them at their own pace. Each cursor only sees values put after it was
/// [`attach`](Self::attach)ed. The channel is unbounded: putting never blocks, and every value is
/// retained for as long as the channel lives.
///
/// Once [`close`](Self::close)d or [`error`](Self::error)ed, the channel is permanently in that
/// terminal state, and further puts are ignored. Cloning a `Channel` clones a handle to the same
/// channel.
pub struct Channel<T, E = Cause>(Rc<RefCell<Core<T, E>>>);

impl<T, E> Channel<T, E> {
    /// Construct an empty, active channel
    pub fn new() -> Self {
        Channel(Rc::new(RefCell::new(Core::new())))
    }

    /// Append a value, unless the channel is closed or errored
    ///
    /// Wakes every cursor waiting for a value. Returns whether the value was appended.
    pub fn put(&self, value: T) -> bool {
        let retired = self.0.borrow_mut().put(value);
        match retired {
            Ok(news) => {
                news.resolve(());
                true
            }
            Err(_) => false,
        }
    }

    /// Close the channel, unless it is already closed or errored
    ///
    /// Cursors finish once they have read every value put before this. Returns whether this call
    /// closed the channel.
    pub fn close(&self) -> bool {
        self.terminate(State::Closed)
    }

    /// Error the channel with a cause, unless it is already closed or errored
    ///
    /// Each cursor raises the cause once it has read every value put before this. Returns whether
    /// this call errored the channel.
    pub fn error(&self, cause: E) -> bool {
        self.terminate(State::Errored(cause))
    }

    /// Whether the channel has been closed or errored
    pub fn is_closed(&self) -> bool {
        self.0.borrow().is_terminal()
    }

    /// Attach a new cursor at the current end of the channel
    ///
    /// The cursor will only see values put from now on.
    pub fn attach(&self) -> Cursor<T, E> {
        let pos = self.0.borrow().tail();
        Cursor {
            shared: Rc::new(CursorShared {
                channel: self.clone(),
                pos: Cell::new(pos),
                closed: Cell::new(false),
                interrupt: Deferred::new(),
                pulls: OneAtATime::new(),
            }),
            in_flight: None,
        }
    }

    fn terminate(&self, state: State<E>) -> bool {
        let closed = matches!(state, State::Closed);
        let retired = self.0.borrow_mut().terminate(state);
        match retired {
            Some(news) => {
                trace!(closed, "channel terminated");
                news.resolve(());
                true
            }
            None => false,
        }
    }
}

impl<T, E> Clone for Channel<T, E> {
    fn clone(&self) -> Self {
        Channel(Rc::clone(&self.0))
    }
}

impl<T, E> Default for Channel<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> Debug for Channel<T, E> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let core = self.0.borrow();
        f.debug_struct("Channel")
            .field("len", &core.tail())
            .field("closed", &core.is_terminal())
            .finish()
    }
}


/// A single consumer's independent read position into a [`Channel`]
///
/// Pull values with [`next`](Self::next), or use the cursor as a [`Stream`]. Overlapping pulls
/// on the same cursor are queued and resolve strictly in the order they were made.
pub struct Cursor<T, E = Cause> {
    shared: Rc<CursorShared<T, E>>,
    // pull driven by the `Stream` impl.
    in_flight: Option<Pull<T, E>>,
}

// cursor state shared with its in-flight pulls.
struct CursorShared<T, E> {
    channel: Channel<T, E>,
    // index of the next item to read.
    pos: Cell<usize>,
    // once set, never unset.
    closed: Cell<bool>,
    // resolved on close, to wake only this cursor's pending pull.
    interrupt: Deferred<(), Infallible>,
    pulls: OneAtATime,
}

impl<T: Clone + 'static, E: Clone + 'static> Cursor<T, E> {
    /// Pull the next value
    ///
    /// - Resolves to `Ok(Some(value))` for the next value put after this cursor's attach point.
    /// - Resolves to `Ok(None)` once the cursor is closed, or once it has read everything and the
    ///   channel is closed.
    /// - Resolves to `Err(cause)` once it has read everything and the channel is errored. This
    ///   happens once: the cursor becomes closed, and later pulls resolve to `Ok(None)`.
    ///
    /// The returned future does not borrow the cursor.
    pub fn next(&self) -> impl Future<Output = Result<Option<T>, E>> + 'static {
        self.shared.start_pull()
    }
}

impl<T, E> Cursor<T, E> {
    /// Close this cursor
    ///
    /// Any pending pull on this cursor resolves to `Ok(None)`, as does every later pull. Does not
    /// affect the channel or other cursors. Returns whether this call closed the cursor.
    pub fn close(&self) -> bool {
        self.shared.close()
    }

    /// Whether this cursor has been closed, or has raised its channel's error
    pub fn is_closed(&self) -> bool {
        self.shared.closed.get()
    }

    /// Handle to the channel this cursor reads from
    pub fn channel(&self) -> &Channel<T, E> {
        &self.shared.channel
    }
}

impl<T, E> CursorShared<T, E> {
    fn close(&self) -> bool {
        if self.closed.replace(true) {
            return false;
        }
        trace!("cursor closed");
        self.interrupt.resolve(());
        true
    }
}

impl<T: Clone + 'static, E: Clone + 'static> CursorShared<T, E> {
    // queue a pull behind any pulls already in flight on this cursor.
    fn start_pull(self: &Rc<Self>) -> impl Future<Output = Result<Option<T>, E>> + 'static {
        let this = Rc::clone(self);
        self.pulls.call(async move { this.pull().await })
    }

    // the decision tree behind a single pull. only ever runs one at a time per cursor.
    async fn pull(&self) -> Result<Option<T>, E> {
        loop {
            if self.closed.get() {
                return Ok(None);
            }
            let mut pos = self.pos.get();
            let advance = self.channel.0.borrow().advance(&mut pos);
            self.pos.set(pos);
            match advance {
                Advance::Item(item) => return Ok(Some(item)),
                Advance::Finished => return Ok(None),
                Advance::Errored(cause) => {
                    // raise it once, then finish like any closed cursor
                    self.closed.set(true);
                    return Err(cause);
                }
                Advance::Wait(news) => {
                    let _ = select(news, self.interrupt.future()).await;
                }
            }
        }
    }
}

impl<T: Clone + 'static, E: Clone + 'static> Stream for Cursor<T, E> {
    type Item = Result<T, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let shared = &this.shared;
        poll_pull(&mut this.in_flight, cx, || shared.start_pull().boxed_local())
    }
}

impl<T, E> Debug for Cursor<T, E> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("Cursor")
            .field("pos", &self.shared.pos.get())
            .field("closed", &self.shared.closed.get())
            .finish()
    }
}


// ==== tests ====


#[cfg(test)]
mod tests {
    use super::*;
    use futures::{poll, StreamExt};
    use rand::prelude::*;
    use rand_pcg::Pcg32;
    use std::collections::VecDeque;

    #[tokio::test]
    async fn every_cursor_sees_each_put() {
        let channel = Channel::<&str, ()>::new();
        let cursors = (0..4).map(|_| channel.attach()).collect::<Vec<_>>();

        channel.put("v");
        for cursor in &cursors {
            assert_eq!(cursor.next().await, Ok(Some("v")));
        }
    }

    #[tokio::test]
    async fn cursor_only_sees_values_after_attach() {
        let channel = Channel::<u32, ()>::new();
        let early = channel.attach();
        channel.put(1);
        channel.put(2);
        let late = channel.attach();
        channel.put(3);
        channel.put(4);
        channel.close();

        assert_eq!(early.collect::<Vec<_>>().await, [Ok(1), Ok(2), Ok(3), Ok(4)]);
        assert_eq!(late.collect::<Vec<_>>().await, [Ok(3), Ok(4)]);
        assert!(channel.attach().collect::<Vec<_>>().await.is_empty());
    }

    #[tokio::test]
    async fn pending_pulls_resolve_in_order() {
        let channel = Channel::<&str, ()>::new();
        let cursor = channel.attach();
        let mut pull_1 = cursor.next().boxed_local();
        let mut pull_2 = cursor.next().boxed_local();

        assert!(poll!(&mut pull_1).is_pending());
        assert!(poll!(&mut pull_2).is_pending());

        channel.put("x");
        assert_eq!(poll!(&mut pull_1), Poll::Ready(Ok(Some("x"))));
        assert!(poll!(&mut pull_2).is_pending());

        channel.put("y");
        assert_eq!(poll!(&mut pull_2), Poll::Ready(Ok(Some("y"))));
    }

    #[tokio::test]
    async fn dropped_pull_does_not_reorder_later_pulls() {
        let channel = Channel::<&str, ()>::new();
        let cursor = channel.attach();
        let mut pull_1 = cursor.next().boxed_local();
        let pull_2 = cursor.next().boxed_local();
        let mut pull_3 = cursor.next().boxed_local();
        assert!(poll!(&mut pull_1).is_pending());

        drop(pull_2);
        assert!(poll!(&mut pull_3).is_pending());
        channel.put("x");
        assert!(poll!(&mut pull_3).is_pending());
        assert_eq!(poll!(&mut pull_1), Poll::Ready(Ok(Some("x"))));

        channel.put("y");
        assert_eq!(pull_3.await, Ok(Some("y")));
    }

    #[tokio::test]
    async fn close_is_sticky() {
        let channel = Channel::<u32, ()>::new();
        let cursor = channel.attach();
        let other = channel.attach();
        let mut pending = cursor.next().boxed_local();
        assert!(poll!(&mut pending).is_pending());

        assert!(cursor.close());
        assert!(!cursor.close());
        assert_eq!(pending.await, Ok(None));

        channel.put(1);
        assert_eq!(cursor.next().await, Ok(None));
        assert_eq!(cursor.next().await, Ok(None));
        assert!(!channel.is_closed());

        // other cursors are unaffected
        assert_eq!(other.next().await, Ok(Some(1)));
    }

    #[tokio::test]
    async fn error_is_raised_once_per_cursor() {
        let channel = Channel::<u32, &str>::new();
        let cursor_1 = channel.attach();
        let cursor_2 = channel.attach();
        channel.put(1);
        assert!(channel.error("oops"));
        assert!(!channel.close());
        assert!(!channel.put(2));
        assert!(channel.is_closed());

        assert_eq!(cursor_1.next().await, Ok(Some(1)));
        assert_eq!(cursor_1.next().await, Err("oops"));
        assert_eq!(cursor_1.next().await, Ok(None));
        assert_eq!(cursor_1.next().await, Ok(None));
        assert!(cursor_1.is_closed());

        assert_eq!(cursor_2.next().await, Ok(Some(1)));
        assert_eq!(cursor_2.next().await, Err("oops"));
        assert_eq!(cursor_2.next().await, Ok(None));
    }

    #[tokio::test]
    async fn waiting_cursors_wake_on_terminal_transition() {
        let channel = Channel::<u32, &str>::new();
        let cursor_1 = channel.attach();
        let cursor_2 = channel.attach();
        let mut pull_1 = cursor_1.next().boxed_local();
        let mut pull_2 = cursor_2.next().boxed_local();
        assert!(poll!(&mut pull_1).is_pending());
        assert!(poll!(&mut pull_2).is_pending());

        channel.error("late");
        assert_eq!(pull_1.await, Err("late"));
        assert_eq!(pull_2.await, Err("late"));
    }

    #[tokio::test]
    async fn stream_yields_error_then_ends() {
        let channel = Channel::<u32, &str>::new();
        let cursor = channel.attach();
        channel.put(1);
        channel.error("bad");
        assert_eq!(cursor.collect::<Vec<_>>().await, [Ok(1), Err("bad")]);
    }

    // random interleavings of puts, attaches, and pulls, checked against a VecDeque per cursor.
    #[test]
    fn stochastic_against_model() {
        let mut rng = Pcg32::from_seed(0xdeadbeefdeadbeefdeadbeefdeadbeefu128.to_le_bytes());

        for _ in 0..20 {
            let channel = Channel::<u32, ()>::new();
            let mut cursors: Vec<(Cursor<u32, ()>, VecDeque<u32>)> = Vec::new();

            for i in 0u32..2_000 {
                if cursors.is_empty() || rng.gen_ratio(2, 100) {
                    cursors.push((channel.attach(), VecDeque::new()));
                } else if rng.gen_ratio(45, 100) {
                    assert!(channel.put(i));
                    for (_, model) in &mut cursors {
                        model.push_back(i);
                    }
                } else {
                    let j = rng.gen_range(0..cursors.len());
                    let (cursor, model) = &mut cursors[j];
                    match Cursor::next(cursor).now_or_never() {
                        Some(pulled) => assert_eq!(pulled, Ok(model.pop_front())),
                        // dropping the pending pull must leave the cursor where it was
                        None => assert!(model.is_empty()),
                    }
                }
            }

            channel.close();
            for (cursor, model) in cursors {
                let rest = futures::executor::block_on(cursor.collect::<Vec<_>>());
                assert_eq!(rest, model.into_iter().map(Ok).collect::<Vec<_>>());
            }
        }
    }
}
