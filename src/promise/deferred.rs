//! The producer side of a promise.
//!
//! Whoever produces an asynchronous result holds a [Resolver]: the only
//! handle able to settle its promise or report progress on it. A [Deferred]
//! bundles a fresh promise with its resolver, for producers that would rather
//! not write an initializer.
//!
//! # Example
//!
//! ```
//! use pledge::promise::Deferred;
//! use pledge::task::Executor;
//!
//! let d = Deferred::<&str, u8>::new();
//! let p = d.promise().progress(|pct| {
//!     println!("{pct}% done");
//!     Ok(pct)
//! });
//!
//! d.progress(50).unwrap();
//! d.resolve("finished").unwrap();
//!
//! assert_eq!(Executor::block_on(&p), Ok("finished"));
//! ```
use std::rc::Rc;

use super::{
    shared::{misuse, Shared},
    IntoResolution, Promise, Resolution,
};
use crate::error::Error;

/// The capability to settle one promise and report its progress.
///
/// Every settling call returns `Ok(())` on success. Settling twice, or sending
/// progress once settled, is ignored unless the thread is configured with
/// [Config::debug](crate::config::Config::debug), in which case it returns
/// [Error::AlreadySettled] or [Error::ProgressAfterSettle].
pub struct Resolver<T, P = ()> {
    shared: Rc<Shared<T, P>>,
}

impl<T, P> Clone for Resolver<T, P> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T, P> Resolver<T, P>
where
    T: Clone + 'static,
    P: Clone + 'static,
{
    pub(super) fn new(shared: Rc<Shared<T, P>>) -> Self {
        Self { shared }
    }

    /// Fulfil the promise with `value`.
    pub fn resolve(&self, value: T) -> Result<(), Error> {
        self.shared.resolve_external(Ok(Resolution::Value(value)))
    }

    /// Reject the promise with `error`.
    pub fn reject(&self, error: Error) -> Result<(), Error> {
        self.shared.resolve_external(Err(error))
    }

    /// Resolve the promise with another promise and take on its eventual
    /// outcome, progress and cancellation.
    ///
    /// Adopting the promise itself rejects it with [Error::SelfResolution]
    /// and returns that error.
    pub fn adopt(&self, promise: Promise<T, P>) -> Result<(), Error> {
        self.shared.resolve_external(Ok(Resolution::Promise(promise)))
    }

    /// Settle with anything a `then` callback could return.
    pub fn settle(&self, resolution: impl IntoResolution<T, P>) -> Result<(), Error> {
        self.shared.resolve_external(resolution.into_resolution())
    }

    /// Send progress to every listener registered so far.
    pub fn progress(&self, data: P) -> Result<(), Error> {
        if self.shared.emit(data) {
            Ok(())
        } else {
            misuse(Error::ProgressAfterSettle)
        }
    }

    /// Whether the promise can still be settled through this resolver.
    pub fn is_pending(&self) -> bool {
        self.shared.is_open()
    }

    /// The promise this resolver settles.
    pub fn promise(&self) -> Promise<T, P> {
        Promise::from_shared(self.shared.clone())
    }
}

/// Installs a canceler while a promise is being constructed.
///
/// Handed to the initializer of [Promise::new]. It is consumed by
/// [CancelSlot::install] and cannot outlive the initializer, so a promise gets
/// at most one canceler and only during construction.
pub struct CancelSlot<'a, T, P> {
    shared: &'a Shared<T, P>,
}

impl<'a, T, P> CancelSlot<'a, T, P>
where
    T: Clone + 'static,
    P: Clone + 'static,
{
    pub(super) fn new(shared: &'a Shared<T, P>) -> Self {
        Self { shared }
    }

    /// Install `canceler`.
    ///
    /// When the promise is cancelled the canceler receives the reason. An `Ok`
    /// value fulfils the promise, an `Err` rejects it. Has no effect if the
    /// promise has already been settled by the initializer.
    pub fn install(self, canceler: impl FnOnce(Error) -> Result<T, Error> + 'static) {
        self.shared.set_canceler(Box::new(canceler));
    }
}

/// A promise together with its [Resolver].
pub struct Deferred<T, P = ()> {
    resolver: Resolver<T, P>,
}

impl<T, P> Deferred<T, P>
where
    T: Clone + 'static,
    P: Clone + 'static,
{
    /// A pending promise whose canceler rejects with the cancellation reason.
    pub fn new() -> Self {
        Self::with_canceler(Err)
    }

    /// A pending promise cancelled by `canceler`.
    pub fn with_canceler(canceler: impl FnOnce(Error) -> Result<T, Error> + 'static) -> Self {
        let shared = Shared::pending();
        shared.set_canceler(Box::new(canceler));

        Self {
            resolver: Resolver::new(shared),
        }
    }

    /// The promise, for handing to consumers.
    pub fn promise(&self) -> Promise<T, P> {
        self.resolver.promise()
    }

    /// The resolver, for handing to whoever completes the operation.
    pub fn resolver(&self) -> Resolver<T, P> {
        self.resolver.clone()
    }

    pub fn resolve(&self, value: T) -> Result<(), Error> {
        self.resolver.resolve(value)
    }

    pub fn reject(&self, error: Error) -> Result<(), Error> {
        self.resolver.reject(error)
    }

    pub fn adopt(&self, promise: Promise<T, P>) -> Result<(), Error> {
        self.resolver.adopt(promise)
    }

    pub fn progress(&self, data: P) -> Result<(), Error> {
        self.resolver.progress(data)
    }
}

impl<T, P> Default for Deferred<T, P>
where
    T: Clone + 'static,
    P: Clone + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::Cell, rc::Rc};

    use super::Deferred;
    use crate::{
        error::Error,
        promise::{Promise, State},
        task::Executor,
    };

    #[test]
    fn resolver_escapes_initializer() {
        let mut held = None;
        let p = Promise::<u8>::new(|resolver, _| {
            held = Some(resolver);
            Ok(())
        });

        let resolver = held.unwrap();
        assert!(resolver.is_pending());
        assert!(resolver.promise().ptr_eq(&p));

        resolver.resolve(1).unwrap();
        assert!(!resolver.is_pending());
        assert_eq!(Executor::block_on(&p), Ok(1));
    }

    #[test]
    fn settle_accepts_callback_results() {
        let a = Deferred::<u8>::new();
        a.resolver().settle(Ok(4)).unwrap();
        assert_eq!(a.promise().outcome(), Some(Ok(4)));

        let b = Deferred::<u8>::new();
        b.resolver().settle(Err(Error::msg("no"))).unwrap();
        assert_eq!(b.promise().state(), State::Rejected);

        let c = Deferred::<u8>::new();
        c.resolver().settle(Promise::resolve(6)).unwrap();
        assert_eq!(Executor::block_on(&c.promise()), Ok(6));
    }

    #[test]
    fn default_canceler_rejects_with_reason() {
        let d = Deferred::<u8>::new();

        d.promise().cancel(None).unwrap();
        assert_eq!(d.promise().outcome(), Some(Err(Error::canceled())));
        assert_eq!(
            d.promise().outcome().unwrap().unwrap_err().name(),
            "CancelError"
        );
    }

    #[test]
    fn custom_canceler_may_fulfil() {
        let calls = Rc::new(Cell::new(0));
        let c = calls.clone();
        let d = Deferred::<u8>::with_canceler(move |_| {
            c.set(c.get() + 1);
            Ok(0)
        });

        d.promise().cancel(Some(Error::Aborted("stop".into()))).unwrap();
        d.promise().cancel(None).unwrap();

        assert_eq!(d.promise().outcome(), Some(Ok(0)));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn canceler_installed_after_settling_is_dropped() {
        let p = Promise::<u8>::new(|resolver, slot| {
            resolver.resolve(2)?;
            slot.install(|_| Ok(9));
            Ok(())
        });

        p.cancel(None).unwrap();
        assert_eq!(p.outcome(), Some(Ok(2)));
    }
}
