//! Error values carried by rejected promises.
//!
//! Every rejection in `pledge` is an [Error]. Errors are cheap to clone since a
//! single settlement may be observed by many dependents, and each variant
//! reports a short [Error::name] in the spirit of the exception names used by
//! promise libraries elsewhere (`CancelError`, `TimeoutError`, ...).
use std::{any::Any, rc::Rc, time::Duration};

/// The rejection type of every [Promise](crate::promise::Promise).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// The promise was cancelled. This is the default cancellation reason.
    #[error("{0}")]
    Canceled(Rc<str>),

    /// A timed producer ran out of time.
    #[error("timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// An operation was aborted by its producer.
    #[error("{0}")]
    Aborted(Rc<str>),

    /// A promise was resolved with itself.
    #[error("a promise cannot be resolved with itself")]
    SelfResolution,

    /// A consumer tried to cancel a promise that has no canceler.
    #[error("attempted to cancel an uncancelable promise")]
    Uncancelable,

    /// A producer tried to settle a promise twice.
    #[error("attempted to settle an already settled promise")]
    AlreadySettled,

    /// A producer sent progress for a promise that has already settled.
    #[error("attempted to send progress for an already settled promise")]
    ProgressAfterSettle,

    /// Returned by a progress transform to quietly stop forwarding progress
    /// down one branch of a chain.
    #[error("progress propagation stopped")]
    StopPropagation,

    /// User code panicked while running inside the library.
    #[error("callback panicked: {0}")]
    Panicked(Rc<str>),

    /// The executor ran out of work while the awaited promise was pending.
    #[error("no pending work can settle the promise")]
    Stalled,

    /// An application-defined error.
    #[error("{name}: {message}")]
    Custom { name: Rc<str>, message: Rc<str> },
}

impl Error {
    /// A [Error::Canceled] with the default message.
    pub fn canceled() -> Self {
        Self::Canceled("Canceled".into())
    }

    /// An application error with the generic `Error` name.
    pub fn msg(message: impl AsRef<str>) -> Self {
        Self::custom("Error", message)
    }

    /// An application error with a specific name.
    pub fn custom(name: impl AsRef<str>, message: impl AsRef<str>) -> Self {
        Self::Custom {
            name: name.as_ref().into(),
            message: message.as_ref().into(),
        }
    }

    /// The exception-style name of this error.
    pub fn name(&self) -> &str {
        match self {
            Self::Canceled(_) => "CancelError",
            Self::Timeout(_) => "TimeoutError",
            Self::Aborted(_) => "AbortError",
            Self::SelfResolution => "TypeError",
            Self::Uncancelable | Self::AlreadySettled | Self::ProgressAfterSettle => "Error",
            Self::StopPropagation => "StopPropagation",
            Self::Panicked(_) => "PanicError",
            Self::Stalled => "StalledError",
            Self::Custom { name, .. } => &**name,
        }
    }

    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).into()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.as_str().into()
        } else {
            "unknown panic payload".into()
        };

        Self::Panicked(message)
    }
}

/// Run `f`, turning a panic into an [Error::Panicked].
pub(crate) fn catch<R>(f: impl FnOnce() -> Result<R, Error>) -> Result<R, Error> {
    std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)).unwrap_or_else(|payload| {
        Err(Error::from_panic(payload))
    })
}
