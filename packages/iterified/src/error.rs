// default error type.

use std::{
    fmt::{Debug, Display},
    rc::Rc,
};
use thiserror::Error;


/// Default cause carried by an errored sequence
///
/// Causes are handed to every consumer that pulls past the point of error, so they must be cheap
/// to clone. This wraps an [`anyhow::Error`] in an `Rc` for that purpose.
#[derive(Debug, Clone, Error)]
pub enum Cause {
    /// The producer or its teardown failed with an error
    #[error("{0}")]
    Failed(Rc<anyhow::Error>),
    /// The producer signaled an error without giving a cause
    #[error("producer signaled an error without a cause")]
    Unspecified,
}

impl Cause {
    /// Wrap an error
    pub fn new<E>(error: E) -> Self
    where
        E: Into<anyhow::Error>,
    {
        Cause::Failed(Rc::new(error.into()))
    }

    /// Construct from a message
    pub fn msg<M>(message: M) -> Self
    where
        M: Display + Debug + Send + Sync + 'static,
    {
        Cause::Failed(Rc::new(anyhow::Error::msg(message)))
    }

    /// Attempt to downcast the wrapped error to a concrete type
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: Display + Debug + Send + Sync + 'static,
    {
        match self {
            Cause::Failed(error) => error.downcast_ref(),
            Cause::Unspecified => None,
        }
    }
}

impl From<anyhow::Error> for Cause {
    fn from(error: anyhow::Error) -> Self {
        Cause::Failed(Rc::new(error))
    }
}
