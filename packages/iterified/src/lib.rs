//! Multicast asynchronous sequences for single-threaded async code.
//!
//! An [`Iterified`] wraps a callback-style executor function into a sequence which any number of
//! consumers can pull from at their own pace. The executor is started lazily by the first pull,
//! shared by every consumer attached to it, and torn down once the sequence ends or its last
//! consumer leaves. [`Unwrapped`] is the same thing without the executor: values are pushed in
//! from the outside.
//!
//! ```
//! use futures::executor::block_on;
//! use iterified::{Iterified, MaybeAsync};
//!
//! let numbers = Iterified::<u32, &str>::new(|producer| {
//!     producer.push(1);
//!     producer.push(2);
//!     producer.done();
//!     MaybeAsync::Sync(Ok(None))
//! });
//!
//! block_on(async {
//!     let iter = numbers.iter();
//!     assert_eq!(iter.next().await, Ok(Some(1)));
//!     assert_eq!(iter.next().await, Ok(Some(2)));
//!     assert_eq!(iter.next().await, Ok(None));
//! });
//! ```
//!
//! Every type in this crate is `!Send`. Use it from a single-threaded executor, such as a tokio
//! current-thread runtime, a `LocalSet`, or `futures::executor::block_on`.

#[macro_use]
extern crate tracing;

mod channel;
mod error;
mod iterified;
mod unwrapped;
pub mod deferred;
pub mod executor;
pub mod util;

pub use crate::{
    channel::api::{Channel, Cursor},
    error::Cause,
    executor::{ExecutorOutput, MaybeAsync, Producer, Teardown},
    iterified::{Iterified, IterifiedIter},
    unwrapped::{unwrapped, Unwrapped, UnwrappedIterable},
};
