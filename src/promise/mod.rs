//! Promises.
//!
//! A [Promise] represents the eventual outcome of an asynchronous operation.
//! On top of the usual fulfil/reject contract it supports:
//!
//! - *progress*: producers can send any number of progress updates before the
//!   promise settles, and `then` chains can transform them on the way down;
//! - *cancellation*: a producer can install a canceler, and consumers anywhere
//!   in a chain can ask for the operation to be aborted;
//! - *aggregation*: [Promise::all] combines a sequence or a keyed map of
//!   promises into a single promise of all their outcomes.
//!
//! The following sub-modules make up the implementation:
//!
//! - `shared`: the state machine shared by every promise.
//! - `deferred`: [Resolver], [Deferred] and [CancelSlot], the producer side.
//! - `all`: the [Collection] trait and [Promise::all].
//!
//! # Example
//!
//! ```
//! use pledge::promise::Promise;
//! use pledge::task::Executor;
//!
//! let p = Promise::<i32>::new(|resolver, _| resolver.resolve(42)).then(|v| Ok(v + 1));
//! assert_eq!(Executor::block_on(&p), Ok(43));
//! ```
//!
//! # Settlement timing
//!
//! A promise is *settled* once it is fulfilled or rejected. Resolving a promise
//! with another promise does not settle it: it stays [State::Pending] until
//! the adopted promise settles, but its resolver is locked from that moment so
//! any further `resolve` or `reject` counts as a double settlement.
use std::{fmt, rc::Rc};

use crate::error::{catch, Error};

mod all;
mod deferred;
mod shared;

pub use all::Collection;
pub use deferred::{CancelSlot, Deferred, Resolver};

use self::shared::Shared;

/// The observable state of a [Promise].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Pending,
    Fulfilled,
    Rejected,
}

/// What a promise is resolved with: a plain value, or another promise whose
/// outcome it adopts.
pub enum Resolution<T, P = ()> {
    Value(T),
    Promise(Promise<T, P>),
}

impl<T, P> From<Promise<T, P>> for Resolution<T, P> {
    fn from(value: Promise<T, P>) -> Self {
        Self::Promise(value)
    }
}

impl<T: fmt::Debug, P> fmt::Debug for Resolution<T, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Self::Promise(p) => f.debug_tuple("Promise").field(&p.shared.id()).finish(),
        }
    }
}

/// Anything a callback may hand back to settle a promise.
///
/// - `Ok(value)` fulfils it, `Err(error)` rejects it.
/// - A [Promise] is adopted.
/// - A [Resolution] is used as is.
pub trait IntoResolution<T, P> {
    fn into_resolution(self) -> Result<Resolution<T, P>, Error>;
}

impl<T, P> IntoResolution<T, P> for Result<T, Error> {
    fn into_resolution(self) -> Result<Resolution<T, P>, Error> {
        self.map(Resolution::Value)
    }
}

impl<T, P> IntoResolution<T, P> for Promise<T, P> {
    fn into_resolution(self) -> Result<Resolution<T, P>, Error> {
        Ok(Resolution::Promise(self))
    }
}

impl<T, P> IntoResolution<T, P> for Resolution<T, P> {
    fn into_resolution(self) -> Result<Resolution<T, P>, Error> {
        Ok(self)
    }
}

/// The eventual outcome of an asynchronous operation.
///
/// `T` is the fulfilled value and `P` the progress payload. A `Promise` is a
/// cheap handle: clones refer to the same underlying promise.
pub struct Promise<T, P = ()> {
    shared: Rc<Shared<T, P>>,
}

impl<T, P> Clone for Promise<T, P> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T, P> fmt::Debug for Promise<T, P>
where
    T: Clone + fmt::Debug + 'static,
    P: Clone + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("id", &self.shared.id())
            .field("outcome", &self.shared.outcome())
            .finish()
    }
}

impl<T, P> From<Resolution<T, P>> for Promise<T, P>
where
    T: Clone + 'static,
    P: Clone + 'static,
{
    /// A promise for `resolution`; a promise is returned unchanged.
    fn from(resolution: Resolution<T, P>) -> Self {
        match resolution {
            Resolution::Value(v) => Self::resolve(v),
            Resolution::Promise(p) => p,
        }
    }
}

impl<T, P> Promise<T, P>
where
    T: Clone + 'static,
    P: Clone + 'static,
{
    /// Create a promise and run `initializer` immediately.
    ///
    /// The initializer receives the [Resolver] used to settle the promise or
    /// report progress, and a [CancelSlot] through which it may install a
    /// canceler. An `Err` returned (or a panic raised) by the initializer
    /// rejects the promise. A promise whose initializer installs no canceler
    /// refuses cancellation with [Error::Uncancelable].
    pub fn new<F>(initializer: F) -> Self
    where
        F: FnOnce(Resolver<T, P>, CancelSlot<'_, T, P>) -> Result<(), Error>,
    {
        let shared = Shared::pending();
        let resolver = Resolver::new(shared.clone());

        let res = catch(|| initializer(resolver, CancelSlot::new(&shared)));

        if let Err(e) = res {
            if shared.is_open() {
                shared.settle(Err(e));
            } else {
                log::debug!("initializer failed after settling: {e}");
            }
        }

        Self { shared }
    }

    /// A promise already fulfilled with `value`.
    pub fn resolve(value: T) -> Self {
        Self {
            shared: Shared::settled(Ok(value)),
        }
    }

    /// A promise already rejected with `error`.
    pub fn reject(error: Error) -> Self {
        Self {
            shared: Shared::settled(Err(error)),
        }
    }

    pub(crate) fn from_shared(shared: Rc<Shared<T, P>>) -> Self {
        Self { shared }
    }

    /// The current state.
    pub fn state(&self) -> State {
        self.shared.state()
    }

    pub fn is_pending(&self) -> bool {
        self.shared.is_pending()
    }

    /// The settled outcome, or `None` while pending.
    pub fn outcome(&self) -> Option<Result<T, Error>> {
        self.shared.outcome()
    }

    /// Whether both handles refer to the same promise.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.shared, &other.shared)
    }

    /// Ask for the operation behind this promise to be aborted.
    ///
    /// `reason` defaults to [Error::Canceled]. The outcome of the promise is
    /// whatever the canceler makes of the reason: its `Ok` value fulfils the
    /// promise, its `Err` rejects it.
    ///
    /// - On a settled promise this does nothing.
    /// - On a promise created by `then` (or one that adopted another promise)
    ///   the request travels upstream. It only reaches the upstream promise
    ///   once no other dependent still needs it; until then it is parked and
    ///   replayed when the upstream settles.
    /// - On a pending promise without a canceler it fails with
    ///   [Error::Uncancelable].
    pub fn cancel(&self, reason: Option<Error>) -> Result<(), Error> {
        use self::shared::{Cancel, Source};

        let reason = reason.unwrap_or_else(Error::canceled);
        self.shared.clone().cancel_from(reason, Source::Consumer)
    }

    fn chain<U, Q>(
        &self,
        on_settled: impl FnOnce(Result<T, Error>) -> Result<Resolution<U, Q>, Error> + 'static,
        on_progress: impl FnMut(P) -> Result<Q, Error> + 'static,
    ) -> Promise<U, Q>
    where
        U: Clone + 'static,
        Q: Clone + 'static,
    {
        Promise {
            shared: self
                .shared
                .chain(Box::new(on_settled), Box::new(on_progress)),
        }
    }

    /// Chain a computation on the fulfilled value.
    ///
    /// A rejection skips `on_fulfilled` and rejects the returned promise with
    /// the same error. Progress passes through unchanged.
    pub fn then<U, R, F>(&self, on_fulfilled: F) -> Promise<U, P>
    where
        U: Clone + 'static,
        R: IntoResolution<U, P>,
        F: FnOnce(T) -> R + 'static,
    {
        self.chain(
            move |outcome| match outcome {
                Ok(v) => on_fulfilled(v).into_resolution(),
                Err(e) => Err(e),
            },
            Ok,
        )
    }

    /// Chain a computation on either outcome.
    pub fn then_else<U, R1, R2, F, G>(&self, on_fulfilled: F, on_rejected: G) -> Promise<U, P>
    where
        U: Clone + 'static,
        R1: IntoResolution<U, P>,
        R2: IntoResolution<U, P>,
        F: FnOnce(T) -> R1 + 'static,
        G: FnOnce(Error) -> R2 + 'static,
    {
        self.chain(
            move |outcome| match outcome {
                Ok(v) => on_fulfilled(v).into_resolution(),
                Err(e) => on_rejected(e).into_resolution(),
            },
            Ok,
        )
    }

    /// Chain on both outcomes and transform progress.
    ///
    /// `on_progress` maps every progress update of this promise before it
    /// reaches listeners of the returned promise. Returning
    /// [Error::StopPropagation] drops the update quietly; any other error is
    /// reported through [Executor::take_uncaught](crate::task::Executor::take_uncaught).
    pub fn then_with<U, Q, R1, R2, F, G, H>(
        &self,
        on_fulfilled: F,
        on_rejected: G,
        on_progress: H,
    ) -> Promise<U, Q>
    where
        U: Clone + 'static,
        Q: Clone + 'static,
        R1: IntoResolution<U, Q>,
        R2: IntoResolution<U, Q>,
        F: FnOnce(T) -> R1 + 'static,
        G: FnOnce(Error) -> R2 + 'static,
        H: FnMut(P) -> Result<Q, Error> + 'static,
    {
        self.chain(
            move |outcome| match outcome {
                Ok(v) => on_fulfilled(v).into_resolution(),
                Err(e) => on_rejected(e).into_resolution(),
            },
            on_progress,
        )
    }

    /// Handle a rejection. Fulfilment passes through unchanged.
    pub fn catch<R, G>(&self, on_rejected: G) -> Promise<T, P>
    where
        R: IntoResolution<T, P>,
        G: FnOnce(Error) -> R + 'static,
    {
        self.chain(
            move |outcome| match outcome {
                Ok(v) => Ok(Resolution::Value(v)),
                Err(e) => on_rejected(e).into_resolution(),
            },
            Ok,
        )
    }

    /// Run `on_settled` with the outcome, whichever it is.
    pub fn finally<U, R, F>(&self, on_settled: F) -> Promise<U, P>
    where
        U: Clone + 'static,
        R: IntoResolution<U, P>,
        F: FnOnce(Result<T, Error>) -> R + 'static,
    {
        self.chain(move |outcome| on_settled(outcome).into_resolution(), Ok)
    }

    /// Observe or transform progress. The outcome passes through unchanged.
    pub fn progress<Q, H>(&self, on_progress: H) -> Promise<T, Q>
    where
        Q: Clone + 'static,
        H: FnMut(P) -> Result<Q, Error> + 'static,
    {
        self.chain(|outcome| outcome.map(Resolution::Value), on_progress)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        cell::{Cell, RefCell},
        rc::Rc,
    };

    use super::{Deferred, Promise, Resolution, State};
    use crate::{config::Config, error::Error, task::Executor};

    #[test]
    fn resolve_is_async() {
        let p = Promise::<i32>::resolve(3);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = seen.clone();
        let _c = p.then(move |v| {
            s.borrow_mut().push(v);
            Ok(())
        });

        assert!(seen.borrow().is_empty());
        Executor::run();
        assert_eq!(*seen.borrow(), vec![3]);
    }

    #[test]
    fn resolve_then_scenario() {
        let p = Promise::<i32>::new(|resolver, _| resolver.resolve(42)).then(|v| Ok(v + 1));

        assert_eq!(p.state(), State::Pending);
        assert_eq!(Executor::block_on(&p), Ok(43));
        assert_eq!(p.state(), State::Fulfilled);
    }

    #[test]
    fn reject_reaches_handler_once() {
        let count = Rc::new(RefCell::new(0));
        let c = count.clone();
        let p = Promise::<i32>::reject(Error::msg("nope")).catch(move |e| {
            *c.borrow_mut() += 1;
            assert_eq!(e, Error::msg("nope"));
            Ok(0)
        });

        assert_eq!(Executor::block_on(&p), Ok(0));
        Executor::run();
        assert_eq!(*count.borrow(), 1);
    }

    #[test]
    fn initializer_error_rejects() {
        let p = Promise::<i32>::new(|_, _| Err(Error::msg("init failed")));
        assert_eq!(p.state(), State::Rejected);
        assert_eq!(p.outcome(), Some(Err(Error::msg("init failed"))));
    }

    #[test]
    fn initializer_panic_rejects() {
        let p = Promise::<i32>::new(|_, _| panic!("init panicked"));
        assert_eq!(p.outcome(), Some(Err(Error::Panicked("init panicked".into()))));
    }

    #[test]
    fn callback_error_rejects_child() {
        let p = Promise::<i32>::resolve(1).then(|_| Err::<i32, _>(Error::msg("bad")));
        assert_eq!(Executor::block_on(&p), Err(Error::msg("bad")));
    }

    #[test]
    fn callback_panic_rejects_child() {
        let p = Promise::<i32>::resolve(1).then(|_| -> Result<i32, Error> { panic!("oops") });
        assert_eq!(Executor::block_on(&p), Err(Error::Panicked("oops".into())));
    }

    #[test]
    fn rejection_passes_through_then() {
        let a = Promise::<i32>::reject(Error::msg("root"));
        let g = a
            .then(|v| Ok(v * 2))
            .then_else(|v| Ok(v.to_string()), |e| Ok(format!("handled {}", e)));

        assert_eq!(Executor::block_on(&g), Ok("handled Error: root".to_string()));
    }

    #[test]
    fn fulfilment_passes_through_catch() {
        let p = Promise::<i32>::resolve(5).catch(|_| Ok(0));
        assert_eq!(Executor::block_on(&p), Ok(5));
    }

    #[test]
    fn finally_sees_both_outcomes() {
        let ok = Promise::<i32>::resolve(1).finally(|r| Ok(r.is_ok()));
        let err = Promise::<i32>::reject(Error::canceled()).finally(|r| Ok(r.is_ok()));

        assert_eq!(Executor::block_on(&ok), Ok(true));
        assert_eq!(Executor::block_on(&err), Ok(false));
    }

    #[test]
    fn callbacks_fire_in_registration_order() {
        let d = Deferred::<i32>::new();
        let order = Rc::new(RefCell::new(Vec::new()));

        for n in 0..4 {
            let o = order.clone();
            let _ = d.promise().then(move |_| {
                o.borrow_mut().push(n);
                Ok(())
            });
        }

        d.resolve(1).unwrap();
        Executor::run();
        assert_eq!(*order.borrow(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn diamond_converges() {
        let d = Deferred::<i32>::new();
        let left = d.promise().then(|v| Ok(v + 1));
        let right = d.promise().then(|v| Ok(v * 10));
        let both = Promise::all(vec![left, right]);

        d.resolve(4).unwrap();

        assert_eq!(Executor::block_on(&both), Ok(vec![Ok(5), Ok(40)]));
    }

    #[test]
    fn double_settle_is_ignored_by_default() {
        let d = Deferred::<i32>::new();

        assert_eq!(d.resolve(1), Ok(()));
        assert_eq!(d.resolve(2), Ok(()));
        assert_eq!(d.reject(Error::msg("late")), Ok(()));

        assert_eq!(d.promise().outcome(), Some(Ok(1)));
    }

    #[test]
    fn double_settle_errors_in_debug() {
        Executor::configure(Config::debug());
        let d = Deferred::<i32>::new();

        d.reject(Error::msg("first")).unwrap();
        assert_eq!(d.resolve(2), Err(Error::AlreadySettled));
        assert_eq!(d.reject(Error::msg("again")), Err(Error::AlreadySettled));
        assert_eq!(d.promise().outcome(), Some(Err(Error::msg("first"))));
    }

    #[test]
    fn adopts_pending_promise() {
        let inner = Deferred::<i32>::new();
        let outer = Deferred::<i32>::new();

        outer.adopt(inner.promise()).unwrap();
        Executor::run();
        assert_eq!(outer.promise().state(), State::Pending);

        inner.resolve(9).unwrap();
        assert_eq!(Executor::block_on(&outer.promise()), Ok(9));
    }

    #[test]
    fn adopted_promise_locks_resolver() {
        Executor::configure(Config::debug());
        let inner = Deferred::<i32>::new();
        let outer = Deferred::<i32>::new();

        outer.adopt(inner.promise()).unwrap();
        assert_eq!(outer.resolve(1), Err(Error::AlreadySettled));

        inner.reject(Error::msg("inner")).unwrap();
        assert_eq!(Executor::block_on(&outer.promise()), Err(Error::msg("inner")));
    }

    #[test]
    fn callback_returning_promise_is_adopted() {
        let later = Deferred::<String>::new();
        let l = later.promise();
        let p = Promise::<i32>::resolve(1).then(move |_| l);

        Executor::run();
        assert!(p.is_pending());

        later.resolve("done".into()).unwrap();
        assert_eq!(Executor::block_on(&p), Ok("done".to_string()));
    }

    #[test]
    fn self_resolution_fails_fast() {
        let d = Deferred::<i32>::new();

        assert_eq!(d.adopt(d.promise()), Err(Error::SelfResolution));
        assert_eq!(d.promise().outcome(), Some(Err(Error::SelfResolution)));
        assert_eq!(d.promise().outcome().unwrap().unwrap_err().name(), "TypeError");
    }

    #[test]
    fn from_resolution_is_identity_for_promises() {
        let p = Promise::<i32>::resolve(1);
        let q = Promise::from(Resolution::Promise(p.clone()));
        assert!(p.ptr_eq(&q));

        let r = Promise::<i32>::from(Resolution::Value(2));
        assert_eq!(Executor::block_on(&r), Ok(2));
    }

    #[test]
    fn progress_reaches_listeners_in_order() {
        let d = Deferred::<(), u32>::new();
        let seen = Rc::new(RefCell::new(Vec::new()));

        for tag in ["a", "b"] {
            let s = seen.clone();
            let _ = d.promise().progress(move |n: u32| {
                s.borrow_mut().push(format!("{tag}{n}"));
                Ok(n)
            });
        }

        d.progress(1).unwrap();
        d.progress(2).unwrap();
        assert!(seen.borrow().is_empty());

        Executor::run();
        assert_eq!(*seen.borrow(), vec!["a1", "b1", "a2", "b2"]);
    }

    #[test]
    fn progress_after_settle_is_inert() {
        let d = Deferred::<(), u32>::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = seen.clone();
        let _ = d.promise().progress(move |n: u32| {
            s.borrow_mut().push(n);
            Ok(n)
        });

        d.resolve(()).unwrap();
        assert_eq!(d.progress(7), Ok(()));
        Executor::run();
        assert!(seen.borrow().is_empty());

        Executor::configure(Config::debug());
        assert_eq!(d.progress(8), Err(Error::ProgressAfterSettle));
    }

    #[test]
    fn progress_is_transformed_down_a_chain() {
        let d = Deferred::<u32, u32>::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = seen.clone();

        let _ = d
            .promise()
            .then_with(Ok, Err, |n: u32| Ok(format!("{n}%")))
            .progress(move |p: String| {
                s.borrow_mut().push(p.clone());
                Ok(p)
            });

        d.progress(10).unwrap();
        d.progress(50).unwrap();
        Executor::run();

        assert_eq!(*seen.borrow(), vec!["10%", "50%"]);
    }

    #[test]
    fn stop_propagation_is_silent() {
        let d = Deferred::<(), u32>::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = seen.clone();

        let _ = d
            .promise()
            .progress(|n: u32| if n % 2 == 0 { Ok(n) } else { Err(Error::StopPropagation) })
            .progress(move |n: u32| {
                s.borrow_mut().push(n);
                Ok(n)
            });

        for n in 1..=4 {
            d.progress(n).unwrap();
        }
        Executor::run();

        assert_eq!(*seen.borrow(), vec![2, 4]);
        assert!(Executor::take_uncaught().is_empty());
    }

    #[test]
    fn failing_progress_transform_surfaces() {
        let d = Deferred::<(), u32>::new();
        let _ = d.promise().progress(|_: u32| Err::<u32, _>(Error::msg("bad progress")));

        d.progress(1).unwrap();
        Executor::run();

        assert_eq!(Executor::take_uncaught(), vec![Error::msg("bad progress")]);
        assert!(d.promise().is_pending());
    }

    #[test]
    fn adopted_progress_is_forwarded() {
        let inner = Deferred::<(), u32>::new();
        let outer = Deferred::<(), u32>::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = seen.clone();

        let _ = outer.promise().progress(move |n: u32| {
            s.borrow_mut().push(n);
            Ok(n)
        });
        outer.adopt(inner.promise()).unwrap();

        inner.progress(3).unwrap();
        Executor::run();

        assert_eq!(*seen.borrow(), vec![3]);
    }

    fn counting_root(calls: &Rc<Cell<u32>>) -> Deferred<i32> {
        let c = calls.clone();
        Deferred::with_canceler(move |reason| {
            c.set(c.get() + 1);
            Err(reason)
        })
    }

    #[test]
    fn uncancelable_differs_from_settled() {
        let uncancelable = Promise::<i32>::new(|_, _| Ok(()));
        assert_eq!(uncancelable.cancel(None), Err(Error::Uncancelable));
        assert!(uncancelable.is_pending());

        let settled = Promise::<i32>::resolve(1);
        assert_eq!(settled.cancel(None), Ok(()));
        assert_eq!(settled.outcome(), Some(Ok(1)));
    }

    #[test]
    fn cancel_reaches_root_with_same_reason() {
        let seen = Rc::new(RefCell::new(None));
        let s = seen.clone();
        let root = Deferred::<i32>::with_canceler(move |reason| {
            *s.borrow_mut() = Some(reason.clone());
            Err(reason)
        });
        let leaf = root.promise().then(|v| Ok(v + 1)).then(|v| Ok(v * 2));
        let reason = Error::Aborted("user".into());

        leaf.cancel(Some(reason.clone())).unwrap();

        assert_eq!(*seen.borrow(), Some(reason.clone()));
        assert_eq!(Executor::block_on(&leaf), Err(reason));
    }

    #[test]
    fn default_cancel_is_cancel_error() {
        let root = Deferred::<i32>::new();
        let leaf = root.promise().then(|v| Ok(v));

        leaf.cancel(None).unwrap();

        let err = Executor::block_on(&leaf).unwrap_err();
        assert_eq!(err.name(), "CancelError");
        assert_eq!(root.promise().outcome(), Some(Err(err)));
    }

    #[test]
    fn canceler_value_fulfils_chain() {
        let root = Deferred::<i32>::with_canceler(|_| Ok(-1));
        let leaf = root.promise().then(|v| Ok(v * 10));

        leaf.cancel(None).unwrap();
        assert_eq!(Executor::block_on(&leaf), Ok(-10));
    }

    #[test]
    fn panicking_canceler_rejects() {
        let d = Deferred::<i32>::with_canceler(|_| panic!("canceler failed"));

        d.promise().cancel(None).unwrap();
        assert_eq!(
            d.promise().outcome(),
            Some(Err(Error::Panicked("canceler failed".into())))
        );
    }

    #[test]
    fn shared_parent_waits_for_every_dependent() {
        let calls = Rc::new(Cell::new(0));
        let root = counting_root(&calls);
        let a = root.promise().then(|v| Ok(v));
        let b = root.promise().then(|v| Ok(v));

        a.cancel(None).unwrap();
        a.cancel(None).unwrap();
        assert_eq!(calls.get(), 0);
        assert!(root.promise().is_pending());

        b.cancel(None).unwrap();
        assert_eq!(calls.get(), 1);

        Executor::run();
        assert_eq!(a.outcome(), Some(Err(Error::canceled())));
        assert_eq!(b.outcome(), Some(Err(Error::canceled())));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn cancel_after_chain_settled_is_noop() {
        let calls = Rc::new(Cell::new(0));
        let root = counting_root(&calls);
        let leaf = root.promise().then(|v| Ok(v + 1));

        root.resolve(1).unwrap();
        assert_eq!(Executor::block_on(&leaf), Ok(2));

        leaf.cancel(None).unwrap();
        Executor::run();

        assert_eq!(leaf.outcome(), Some(Ok(2)));
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn cancel_racing_settlement_is_replayed() {
        let calls = Rc::new(Cell::new(0));
        let later = counting_root(&calls);
        let l = later.promise();

        let root = Deferred::<i32>::new();
        let child = root.promise().then(move |_| l);

        root.resolve(1).unwrap();
        child.cancel(None).unwrap();
        assert!(later.promise().is_pending());
        assert_eq!(calls.get(), 0);

        Executor::run();

        assert_eq!(calls.get(), 1);
        assert_eq!(later.promise().outcome(), Some(Err(Error::canceled())));
        assert_eq!(child.outcome(), Some(Err(Error::canceled())));
    }

    #[test]
    fn adopted_promise_takes_over_cancel() {
        let inner = Deferred::<i32>::with_canceler(|_| Ok(7));
        let outer = Deferred::<i32>::new();

        outer.adopt(inner.promise()).unwrap();
        outer.promise().cancel(None).unwrap();

        assert_eq!(inner.promise().outcome(), Some(Ok(7)));
        assert_eq!(Executor::block_on(&outer.promise()), Ok(7));
    }

    #[test]
    fn cancel_on_child_of_dropped_settled_parent() {
        let child = Promise::<i32>::resolve(1).then(|v| Ok(v + 1));

        assert_eq!(child.cancel(None), Ok(()));
        assert_eq!(Executor::block_on(&child), Ok(2));
    }

    #[test]
    fn cancel_on_child_of_dropped_pending_parent() {
        let child = Deferred::<i32>::new().promise().then(|v| Ok(v));

        child.cancel(None).unwrap();
        Executor::run();

        assert_eq!(child.outcome(), Some(Err(Error::canceled())));
    }

    #[test]
    fn replayed_cancel_survives_dropped_parent() {
        let calls = Rc::new(Cell::new(0));
        let later = counting_root(&calls);
        let l = later.promise();

        let child = Promise::<i32>::resolve(1).then(move |_| l);
        child.cancel(None).unwrap();
        Executor::run();

        assert_eq!(calls.get(), 1);
        assert_eq!(child.outcome(), Some(Err(Error::canceled())));
    }

    #[test]
    fn cancel_reaches_dropped_adopted_promise() {
        let calls = Rc::new(Cell::new(0));
        let outer = Deferred::<i32>::new();

        outer.adopt(counting_root(&calls).promise()).unwrap();
        outer.promise().cancel(None).unwrap();
        Executor::run();

        assert_eq!(calls.get(), 1);
        assert_eq!(outer.promise().outcome(), Some(Err(Error::canceled())));
    }
}
