//! Timers and timed promises.
//!
//! Timers are armed on the thread's timer reactor, which waits for them with
//! io_uring `Timeout` operations while the
//! [Executor](crate::task::Executor) has nothing else to do. When a timer
//! expires its callback is queued on the scheduler like any other
//! continuation, so it never runs in the middle of another callback.
//!
//! # Example
//! Let's give a slow operation 10 milliseconds to finish.
//! ```
//! use pledge::promise::Deferred;
//! use pledge::task::Executor;
//! use std::time::Duration;
//!
//! let slow = Deferred::<u32>::new();
//! let bounded = slow.promise().timeout(Duration::from_millis(10));
//!
//! let err = Executor::block_on(&bounded).unwrap_err();
//! assert_eq!(err.name(), "TimeoutError");
//! ```
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::{
    error::Error,
    promise::Promise,
    reactor::{Reactor, TimerKey},
};

/// A one-shot timer.
///
/// Obtained via [Timer::after]. The handle is `Copy`; any copy can clear the
/// timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timer {
    key: TimerKey,
}

impl Timer {
    /// Run `f` once `d` has elapsed.
    ///
    /// It is guaranteed that `f` runs *at least* `d` after this call; it could
    /// run later if the thread is busy. The callback only runs while the
    /// thread's [Executor](crate::task::Executor) is running.
    pub fn after(d: Duration, f: impl FnOnce() + 'static) -> Self {
        let key = Reactor::add_timer(Instant::now() + d, Box::new(f));

        Self { key }
    }

    /// Disarm the timer. Returns `false` if it has already fired or been
    /// cleared.
    pub fn clear(&self) -> bool {
        Reactor::remove_timer(self.key)
    }
}

/// A promise fulfilled once `d` has elapsed.
///
/// Cancelling it clears the timer and rejects it with the cancellation reason.
pub fn delay(d: Duration) -> Promise<(), ()> {
    Promise::new(|resolver, slot| {
        let timer = Timer::after(d, move || {
            if let Err(e) = resolver.resolve(()) {
                debug!("delay already settled: {e}");
            }
        });

        slot.install(move |reason| {
            timer.clear();
            Err(reason)
        });

        Ok(())
    })
}

impl<T, P> Promise<T, P>
where
    T: Clone + 'static,
    P: Clone + 'static,
{
    /// Bound the time this promise may take.
    ///
    /// If it is still pending after `d`, it is cancelled with
    /// [Error::Timeout]; what it settles with then is up to its canceler. The
    /// returned promise follows this one and clears the timer as soon as it
    /// settles.
    pub fn timeout(&self, d: Duration) -> Promise<T, P> {
        let target = self.clone();
        let timer = Timer::after(d, move || {
            if let Err(e) = target.cancel(Some(Error::Timeout(d))) {
                warn!("could not cancel timed out promise: {e}");
            }
        });

        self.finally(move |outcome| {
            timer.clear();
            outcome
        })
    }
}
