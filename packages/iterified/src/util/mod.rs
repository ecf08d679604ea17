//! Async utilities.

mod one_at_a_time;
pub(crate) mod pull_stream;

pub use self::one_at_a_time::OneAtATime;
