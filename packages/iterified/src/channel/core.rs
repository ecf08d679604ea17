// minimal state of a channel. the exposed API is a wrapper around this.

use crate::deferred::{Deferred, DeferredFuture};
use std::{
    convert::Infallible,
    mem::replace,
};


// wake signal shared by every cursor waiting on a channel.
pub(crate) type Signal = Deferred<(), Infallible>;

// channel core state.
pub(crate) struct Core<T, E> {
    // every item ever appended. cursors are indices into this.
    log: Vec<T>,
    // begins as State::Active. once it changes, it never changes again.
    state: State<E>,
    // resolved and replaced whenever log or state changes.
    news: Signal,
}

// possible values for Core.state.
pub(crate) enum State<E> {
    // items may still be appended.
    Active,
    // finished normally. cursors finish once they reach the end of the log.
    Closed,
    // finished with a cause. cursors raise it once they reach the end of the log.
    Errored(E),
}

// result of trying to advance a cursor position without waiting.
pub(crate) enum Advance<T, E> {
    // advanced past this item.
    Item(T),
    // at the end of the log, and the channel is closed.
    Finished,
    // at the end of the log, and the channel is errored.
    Errored(E),
    // at the end of the log, and the channel is active. the future resolves on the next change.
    Wait(DeferredFuture<(), Infallible>),
}

impl<T, E> Core<T, E> {
    // construct empty, active core.
    pub(crate) fn new() -> Self {
        Core {
            log: Vec::new(),
            state: State::Active,
            news: Signal::new(),
        }
    }

    // position at which a newly attached cursor begins.
    pub(crate) fn tail(&self) -> usize {
        self.log.len()
    }

    // whether the state is other than active.
    pub(crate) fn is_terminal(&self) -> bool {
        !matches!(self.state, State::Active)
    }

    // append an item if active.
    //
    // on success, returns the retired wake signal, which the caller must resolve once it has
    // released its borrow on the core. otherwise, gives the item back.
    pub(crate) fn put(&mut self, item: T) -> Result<Signal, T> {
        if self.is_terminal() {
            return Err(item);
        }
        self.log.push(item);
        Ok(self.renew())
    }

    // transition to a terminal state if active.
    //
    // on success, returns the retired wake signal, same as put. panics if given State::Active.
    pub(crate) fn terminate(&mut self, state: State<E>) -> Option<Signal> {
        assert!(!matches!(state, State::Active), "terminate with State::Active (internal bug)");
        if self.is_terminal() {
            return None;
        }
        self.state = state;
        Some(self.renew())
    }

    // swap in a fresh wake signal and return the old one.
    fn renew(&mut self) -> Signal {
        replace(&mut self.news, Signal::new())
    }
}

impl<T: Clone, E: Clone> Core<T, E> {
    // try to advance the given position by one item.
    pub(crate) fn advance(&self, pos: &mut usize) -> Advance<T, E> {
        debug_assert!(*pos <= self.log.len(), "cursor position past end of log (internal bug)");
        if let Some(item) = self.log.get(*pos) {
            *pos += 1;
            return Advance::Item(item.clone());
        }
        match &self.state {
            State::Active => Advance::Wait(self.news.future()),
            State::Closed => Advance::Finished,
            State::Errored(cause) => Advance::Errored(cause.clone()),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;

    #[test]
    fn advance_reads_then_reports_state() {
        let mut core = Core::<u32, &str>::new();
        assert!(core.put(1).is_ok());
        assert!(core.put(2).is_ok());

        let mut pos = 0;
        assert!(matches!(core.advance(&mut pos), Advance::Item(1)));
        assert!(matches!(core.advance(&mut pos), Advance::Item(2)));
        assert!(matches!(core.advance(&mut pos), Advance::Wait(_)));
        assert_eq!(pos, 2);

        assert!(core.terminate(State::Errored("boom")).is_some());
        assert!(matches!(core.advance(&mut pos), Advance::Errored("boom")));
        assert!(core.terminate(State::Closed).is_none());
        assert!(matches!(core.put(3), Err(3)));
        assert_eq!(core.tail(), 2);
    }

    #[test]
    fn retired_signal_wakes_waiters() {
        let mut core = Core::<u32, ()>::new();
        let mut pos = core.tail();
        let Advance::Wait(news) = core.advance(&mut pos) else { panic!("expected wait") };

        let retired = core.put(5).ok().unwrap();
        assert!(news.clone().now_or_never().is_none());
        retired.resolve(());
        assert_eq!(news.now_or_never(), Some(Ok(())));

        // a signal taken now is a fresh one
        let mut end = core.tail();
        let Advance::Wait(news) = core.advance(&mut end) else { panic!("expected wait") };
        assert!(news.now_or_never().is_none());
    }
}
