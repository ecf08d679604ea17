// executor-driven multicast sequences.
//
// an Iterified owns at most one live generation at a time. a generation is one run of the
// executor, from its invocation by the first consumer's first pull, until its teardown finishes:
//
//   iter() ----> generation allocated (if none is live), cursor attached to its channel
//      |
//   first pull of a handle ----> active count += 1, executor invoked if not yet invoked
//      |
//   producer done/error, or active count reaches 0 ----> ending signal resolved
//      |
//   driver: executor output settled, ending signal resolved ----> teardown runs
//      |                                                              |
//      |   channel closed or errored <--------------------------------/
//      v
//   generation retired. the next iter() allocates a fresh one.
//
// the driver is a shared future owned by the generation. every consumer of the generation polls it
// while waiting on its cursor, and the consumer whose detach ends the generation awaits it. since
// the channel only becomes terminal at the end of the driver, no consumer can observe the end of a
// generation before its teardown has finished.
//
// if a generation ends with no consumer left to poll its driver (the last one was dropped), the
// driver is handed to the spawner, if one was given. either way, the next iter() allocates a fresh
// generation and puts the old driver in the orphans list, and the fresh generation's executor is
// not invoked until every orphan has finished.

use crate::{
    channel::api::{Channel, Cursor},
    deferred::{Deferred, DeferredFuture},
    error::Cause,
    executor::{ExecutorOutput, MaybeAsync, Producer, Teardown},
    util::{
        OneAtATime,
        pull_stream::{Pull, poll_pull},
    },
};
use futures::{
    future::{join_all, select, Either, FutureExt, LocalBoxFuture, Shared},
    task::{LocalSpawn, LocalSpawnExt},
    Stream,
};
use std::{
    cell::{Cell, RefCell},
    convert::Infallible,
    fmt::{self, Formatter, Debug},
    future::{self, Future},
    pin::{pin, Pin},
    rc::{Rc, Weak},
    task::{Poll, Context},
};


// type-erased executor function.
type Executor<T, E> = dyn Fn(Producer<T, E>) -> ExecutorOutput<E>;

// future which runs a generation's teardown. resolves to the teardown's own failure, if any.
type Driver<E> = Shared<LocalBoxFuture<'static, Result<(), E>>>;

// a driver with its output discarded, so it can be polled without knowing E.
type Progress = Shared<LocalBoxFuture<'static, ()>>;


/// Multicast asynchronous sequence driven by an executor function
///
/// Consumers are obtained with [`iter`](Self::iter). The executor is not invoked until the first
/// pull from any consumer, and is then invoked exactly once for as long as the current
/// generation lasts, no matter how many consumers attach. Each consumer sees the values pushed
/// from the moment it attached onward.
///
/// A generation ends when the executor calls [`Producer::done`] or [`Producer::error`], or when
/// its last active consumer detaches. The executor's [`Teardown`] then runs, and only after it
/// has finished do consumers observe the end of the sequence. After that, attaching a new
/// consumer starts a fresh generation, invoking the executor again.
///
/// Cloning an `Iterified` clones a handle to the same instance.
pub struct Iterified<T, E = Cause>(Rc<Instance<T, E>>);

// shared state of an Iterified.
struct Instance<T, E> {
    executor: Box<Executor<T, E>>,
    // the live generation, if any.
    current: RefCell<Option<Rc<Generation<T, E>>>>,
    // id for the next generation allocated, for logging.
    next_id: Cell<u64>,
    // runs drivers which no consumer is left to poll.
    spawner: Option<Box<dyn LocalSpawn>>,
    // drivers of generations replaced before their teardown finished.
    orphans: RefCell<Vec<Progress>>,
}

// one run of the executor.
pub(crate) struct Generation<T, E> {
    id: u64,
    instance: Weak<Instance<T, E>>,
    channel: Channel<T, E>,
    // number of handles which have started pulling and not yet detached.
    active: Cell<usize>,
    // set when the executor is invoked, which happens at most once.
    invoked: Cell<bool>,
    // how the generation ends. set once, then taken by the driver.
    end: RefCell<Option<End<E>>>,
    // resolved when the end is set. doubles as the "teardown has begun" flag.
    ending: Deferred<(), Infallible>,
    // present once the executor has been invoked.
    driver: RefCell<Option<Driver<E>>>,
    progress: RefCell<Option<Progress>>,
}

// how a generation ends.
pub(crate) enum End<E> {
    Done,
    Error(E),
}

impl<T: Clone + 'static, E: Clone + 'static> Iterified<T, E> {
    /// Construct from an executor function
    ///
    /// The executor is called with a [`Producer`] for the generation it runs in.
    pub fn new<F>(executor: F) -> Self
    where
        F: Fn(Producer<T, E>) -> ExecutorOutput<E> + 'static,
    {
        Self::build(Box::new(executor), None)
    }

    /// Construct from an executor function, with a spawner to finish abandoned teardowns
    ///
    /// When the last consumer of a generation is dropped rather than drained or closed, nothing
    /// is left to await the teardown. Whatever part of it cannot finish on the spot is spawned
    /// onto `spawner`. Without a spawner, it is finished by the first pull of the next
    /// generation, before the executor is invoked again.
    pub fn with_spawner<S, F>(spawner: S, executor: F) -> Self
    where
        S: LocalSpawn + 'static,
        F: Fn(Producer<T, E>) -> ExecutorOutput<E> + 'static,
    {
        Self::build(Box::new(executor), Some(Box::new(spawner)))
    }

    fn build(executor: Box<Executor<T, E>>, spawner: Option<Box<dyn LocalSpawn>>) -> Self {
        Iterified(Rc::new(Instance {
            executor,
            current: RefCell::new(None),
            next_id: Cell::new(0),
            spawner,
            orphans: RefCell::new(Vec::new()),
        }))
    }

    /// Attach a new consumer
    ///
    /// The consumer will see the values pushed from now on. Attaching does not invoke the
    /// executor; the first pull from any consumer does.
    pub fn iter(&self) -> IterifiedIter<T, E> {
        let generation = self.0.current_or_allocate();
        let cursor = generation.channel.attach();
        IterifiedIter {
            handle: Rc::new(Handle {
                instance: Rc::clone(&self.0),
                generation,
                cursor,
                started: Cell::new(false),
                detached: Cell::new(false),
                pulls: OneAtATime::new(),
            }),
            in_flight: None,
        }
    }
}

impl<T, E> Iterified<T, E> {
    /// Whether a generation is live, meaning its executor may be running or its teardown may not
    /// have finished yet
    pub fn is_live(&self) -> bool {
        self.0.current.borrow().is_some()
    }
}

impl<T, E> Clone for Iterified<T, E> {
    fn clone(&self) -> Self {
        Iterified(Rc::clone(&self.0))
    }
}

impl<T, E> Debug for Iterified<T, E> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let current = self.0.current.borrow();
        f.debug_struct("Iterified")
            .field("generation", &current.as_ref().map(|generation| generation.id))
            .field("orphans", &self.0.orphans.borrow().len())
            .finish()
    }
}

impl<T, E> Instance<T, E> {
    fn current_or_allocate(self: &Rc<Self>) -> Rc<Generation<T, E>> {
        let mut current = self.current.borrow_mut();
        if let Some(generation) = &*current {
            if !generation.is_orphaned() {
                return Rc::clone(generation);
            }
            debug!(generation = generation.id, "replacing orphaned generation");
            if let Some(progress) = generation.progress.borrow().clone() {
                self.orphans.borrow_mut().push(progress);
            }
        }
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        debug!(generation = id, "allocating generation");
        let generation = Rc::new(Generation {
            id,
            instance: Rc::downgrade(self),
            channel: Channel::new(),
            active: Cell::new(0),
            invoked: Cell::new(false),
            end: RefCell::new(None),
            ending: Deferred::new(),
            driver: RefCell::new(None),
            progress: RefCell::new(None),
        });
        *current = Some(Rc::clone(&generation));
        generation
    }

    // hand a driver which no consumer is left to poll to the spawner, if there is one.
    fn spawn(&self, id: u64, progress: Progress) {
        let Some(spawner) = &self.spawner else { return };
        match spawner.spawn_local(progress) {
            Ok(()) => debug!(generation = id, "teardown spawned"),
            Err(e) => warn!(generation = id, error = %e, "failed to spawn teardown"),
        }
    }

    // wait for the teardowns of replaced generations.
    async fn await_orphans(&self) {
        let orphans = self.orphans.borrow().clone();
        if orphans.is_empty() {
            return;
        }
        debug!(count = orphans.len(), "waiting for orphaned teardowns");
        join_all(orphans).await;
        self.orphans.borrow_mut().retain(|orphan| orphan.peek().is_none());
    }
}

impl<T, E> Generation<T, E> {
    pub(crate) fn push(&self, value: T) -> bool {
        !self.is_ending() && self.channel.put(value)
    }

    // begin ending the generation, unless it already has.
    pub(crate) fn end(&self, end: End<E>) -> bool {
        if self.is_ending() {
            return false;
        }
        debug!(generation = self.id, error = matches!(end, End::Error(_)), "generation ending");
        *self.end.borrow_mut() = Some(end);
        self.ending.resolve(());
        true
    }

    pub(crate) fn is_ending(&self) -> bool {
        self.ending.is_settled()
    }

    // whether teardown has begun with no active consumer left to drive it.
    fn is_orphaned(&self) -> bool {
        self.is_ending() && self.active.get() == 0
    }

    fn driver(&self) -> Option<Driver<E>> {
        self.driver.borrow().clone()
    }

    // make way for the next generation, if this one is still the live one.
    fn retire(&self) {
        let Some(instance) = self.instance.upgrade() else { return };
        let retired = {
            let mut current = instance.current.borrow_mut();
            match &*current {
                Some(generation) if std::ptr::eq(Rc::as_ptr(generation), self) => current.take(),
                _ => None,
            }
        };
        debug!(generation = self.id, "generation retired");
        drop(retired);
    }
}

impl<T: Clone + 'static, E: Clone + 'static> Generation<T, E> {
    // invoke the executor and set up the driver.
    //
    // returns the cause of a synchronous executor failure, which is only for the caller.
    fn invoke(self: &Rc<Self>, executor: &Executor<T, E>) -> Result<(), E> {
        debug_assert!(!self.invoked.get(), "executor invoked twice in one generation (internal bug)");
        self.invoked.set(true);
        debug!(generation = self.id, "invoking executor");

        let (output, failure) = match executor(Producer::new(Rc::downgrade(self))) {
            MaybeAsync::Sync(Err(cause)) => {
                debug!(generation = self.id, "executor failed synchronously");
                (future::ready(Ok(None)).boxed_local(), Some(cause))
            }
            output => (output.into_future(), None),
        };
        if failure.is_some() {
            self.end(End::Done);
        }

        let driver = drive(
            self.id,
            Rc::downgrade(self),
            self.channel.clone(),
            output,
            self.ending.future(),
        ).boxed_local().shared();
        *self.progress.borrow_mut() = Some(driver.clone().map(|_| ()).boxed_local().shared());
        *self.driver.borrow_mut() = Some(driver);

        match failure {
            Some(cause) => Err(cause),
            None => Ok(()),
        }
    }
}

// run a generation to completion: wait for the executor's output and for the generation to end,
// run the teardown, then terminate the channel and retire the generation.
async fn drive<T, E>(
    id: u64,
    generation: Weak<Generation<T, E>>,
    channel: Channel<T, E>,
    output: LocalBoxFuture<'static, Result<Option<Teardown<E>>, E>>,
    ending: DeferredFuture<(), Infallible>,
) -> Result<(), E>
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    let result = match output.await {
        Ok(teardown) => {
            let _ = ending.await;
            match teardown {
                Some(teardown) => {
                    debug!(generation = id, "running teardown");
                    let result = teardown().into_future().await;
                    match &result {
                        Ok(()) => debug!(generation = id, "teardown finished"),
                        Err(_) => warn!(generation = id, "teardown failed"),
                    }
                    result
                }
                None => Ok(()),
            }
        }
        Err(cause) => {
            debug!(generation = id, "executor failed asynchronously");
            if let Some(generation) = generation.upgrade() {
                generation.end(End::Error(cause.clone()));
            }
            Err(cause)
        }
    };

    let end = generation.upgrade().and_then(|generation| generation.end.take());
    match (&result, end) {
        (Err(cause), _) => channel.error(cause.clone()),
        (Ok(()), Some(End::Error(cause))) => channel.error(cause),
        (Ok(()), _) => channel.close(),
    };
    if let Some(generation) = generation.upgrade() {
        generation.retire();
    }
    result
}


/// Consumer of an [`Iterified`]
///
/// Pull values with [`next`](Self::next), or use it as a [`Stream`]. Overlapping pulls are queued
/// and resolve strictly in the order they were made.
///
/// A consumer becomes active with its first pull, and detaches when it reaches the end of the
/// sequence, is [`close`](Self::close)d, or is dropped. When the last active consumer of a
/// generation detaches, the generation ends.
pub struct IterifiedIter<T, E = Cause> {
    handle: Rc<Handle<T, E>>,
    // pull driven by the `Stream` impl.
    in_flight: Option<Pull<T, E>>,
}

// consumer state shared with its in-flight pulls.
struct Handle<T, E> {
    instance: Rc<Instance<T, E>>,
    generation: Rc<Generation<T, E>>,
    cursor: Cursor<T, E>,
    // set by the first pull.
    started: Cell<bool>,
    // once set, never unset.
    detached: Cell<bool>,
    pulls: OneAtATime,
}

impl<T: Clone + 'static, E: Clone + 'static> IterifiedIter<T, E> {
    /// Pull the next value
    ///
    /// - Resolves to `Ok(Some(value))` for the next value pushed after this consumer attached.
    /// - Resolves to `Ok(None)` once the sequence is done and its teardown has finished, or once
    ///   this consumer is closed.
    /// - Resolves to `Err(cause)` once the sequence has errored and its teardown has finished.
    ///   This happens once, and later pulls resolve to `Ok(None)`.
    ///
    /// The first pull of the first consumer of a generation invokes the executor. If the executor
    /// fails synchronously, only that pull receives the failure.
    ///
    /// The returned future does not borrow the consumer.
    pub fn next(&self) -> impl Future<Output = Result<Option<T>, E>> + 'static {
        self.handle.start_pull()
    }

    /// Close this consumer
    ///
    /// Any pending pull on this consumer resolves to `Ok(None)` right away, as does every later
    /// pull. If this was the last active consumer of its generation, the returned future also
    /// waits for the generation's teardown to finish, and resolves to the teardown's failure if
    /// it failed.
    pub fn close(&self) -> impl Future<Output = Result<(), E>> + 'static {
        self.handle.cursor.close();
        let handle = Rc::clone(&self.handle);
        async move { handle.detach().await }
    }
}

impl<T, E> IterifiedIter<T, E> {
    /// Whether this consumer has been closed or has reached the end of the sequence
    pub fn is_closed(&self) -> bool {
        self.handle.cursor.is_closed()
    }
}

impl<T, E> Handle<T, E> {
    // detach without waiting. returns whether this was the generation's last active consumer.
    fn release(&self) -> bool {
        if self.detached.replace(true) || !self.started.get() {
            return false;
        }
        let remaining = self.generation.active.get().saturating_sub(1);
        self.generation.active.set(remaining);
        trace!(generation = self.generation.id, remaining, "consumer detached");
        if remaining == 0 {
            self.generation.end(End::Done);
        }
        remaining == 0
    }
}

impl<T: Clone + 'static, E: Clone + 'static> Handle<T, E> {
    // queue a pull behind any pulls already in flight on this handle.
    fn start_pull(self: &Rc<Self>) -> impl Future<Output = Result<Option<T>, E>> + 'static {
        let this = Rc::clone(self);
        self.pulls.call(async move { this.pull().await })
    }

    async fn pull(&self) -> Result<Option<T>, E> {
        if !self.started.get() && !self.detached.get() {
            self.started.set(true);
            let generation = &self.generation;
            generation.active.set(generation.active.get() + 1);
            if !generation.invoked.get() {
                self.instance.await_orphans().await;
            }
            if !generation.invoked.get() && !self.detached.get() {
                if let Err(cause) = generation.invoke(&*self.instance.executor) {
                    self.cursor.close();
                    let _ = self.detach().await;
                    return Err(cause);
                }
            }
        }

        let result = match self.generation.driver() {
            Some(driver) => match select(pin!(self.cursor.next()), driver).await {
                Either::Left((result, _)) => result,
                Either::Right((_, next)) => next.await,
            },
            None => self.cursor.next().await,
        };
        match result {
            Ok(Some(item)) => Ok(Some(item)),
            terminal => match (terminal, self.detach().await) {
                (Ok(None), Err(cause)) => Err(cause),
                (terminal, _) => terminal,
            },
        }
    }

    // detach, then wait for teardown if this was the last active consumer.
    async fn detach(&self) -> Result<(), E> {
        if !self.release() {
            return Ok(());
        }
        match self.generation.driver() {
            Some(driver) => driver.await,
            None => Ok(()),
        }
    }
}

impl<T, E> Drop for Handle<T, E> {
    fn drop(&mut self) {
        // nothing can await teardown from here. if this ends the generation, run the teardown as
        // far as it gets without waiting, and spawn the rest.
        self.cursor.close();
        if self.release() {
            let progress = self.generation.progress.borrow().clone();
            if let Some(mut progress) = progress {
                if (&mut progress).now_or_never().is_none() {
                    self.instance.spawn(self.generation.id, progress);
                }
            }
        }
    }
}

impl<T: Clone + 'static, E: Clone + 'static> Stream for IterifiedIter<T, E> {
    type Item = Result<T, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let handle = &this.handle;
        poll_pull(&mut this.in_flight, cx, || handle.start_pull().boxed_local())
    }
}

impl<T, E> Debug for IterifiedIter<T, E> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("IterifiedIter")
            .field("generation", &self.handle.generation.id)
            .field("started", &self.handle.started.get())
            .field("detached", &self.handle.detached.get())
            .finish()
    }
}


// ==== tests ====
