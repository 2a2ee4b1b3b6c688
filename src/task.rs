//! Scheduling and execution.
//!
//! This module provides the per-thread [Executor]. It owns two things:
//!
//! 1. The *microtask queue* (the scheduler). Every promise continuation is
//!    pushed here with [Executor::enqueue] and runs once the current
//!    synchronous stack has unwound, when the queue is next drained.
//!    Callbacks enqueued while the queue is draining run in the same drain, so
//!    diamond-shaped chains settle without waiting for more turns of the loop.
//! 2. The *host loop*. [Executor::run] and [Executor::block_on] drain the queue,
//!    and when it is empty sleep on the timer reactor until a
//!    [Timer](crate::timer::Timer) expires, feeding its callback back into the
//!    queue.
//!
//! Like every other piece of state in `pledge`, the executor is per thread: a
//! promise must be created, settled and observed on the same thread.
//!
//! # Example
//!
//! ```
//! use pledge::promise::Promise;
//! use pledge::task::Executor;
//!
//! let p = Promise::<i32>::resolve(41).then(|v| Ok(v + 1));
//! assert_eq!(Executor::block_on(&p), Ok(42));
//! ```
//!
//! Continuations never run synchronously, even on a promise that is already
//! settled; they wait for the next drain:
//!
//! ```
//! use pledge::promise::Promise;
//! use pledge::task::Executor;
//! use std::cell::Cell;
//! use std::rc::Rc;
//!
//! let seen = Rc::new(Cell::new(false));
//! let flag = seen.clone();
//! let _p = Promise::<()>::resolve(()).then(move |()| {
//!     flag.set(true);
//!     Ok(())
//! });
//!
//! assert!(!seen.get());
//! Executor::run();
//! assert!(seen.get());
//! ```
use std::{cell::RefCell, collections::VecDeque};

use log::{error, trace, warn};
use slab::Slab;

use crate::{
    config::Config,
    error::{catch, Error},
    promise::Promise,
    reactor::Reactor,
};

struct Task {
    seq: u64,
    callback: Box<dyn FnOnce()>,
}

/// The per-thread scheduler and event loop.
///
/// All functions are associated functions acting on the calling thread's
/// executor.
pub struct Executor {
    config: Config,
    tasks: Slab<Task>,
    run_q: VecDeque<TaskHandle>,
    next_seq: u64,
    draining: bool,
    uncaught: Vec<Error>,
}

thread_local! {
    static EXEC: RefCell<Executor> = const { RefCell::new(
        Executor {
            config: Config { debug: false },
            tasks: Slab::new(),
            run_q: VecDeque::new(),
            next_seq: 0,
            draining: false,
            uncaught: Vec::new(),
        }
    )}
}

/// A queued callback.
///
/// Returned by [Executor::enqueue]; it can be used to withdraw the callback
/// before it has run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskHandle {
    slot: usize,
    seq: u64,
}

impl TaskHandle {
    /// Withdraw the callback. Returns `false` if it has already run or was
    /// already removed.
    pub fn remove(self) -> bool {
        let task = EXEC.with(|exec| exec.borrow_mut().take(self));
        task.is_some()
    }
}

impl Executor {
    fn take(&mut self, handle: TaskHandle) -> Option<Task> {
        match self.tasks.get(handle.slot) {
            Some(task) if task.seq == handle.seq => Some(self.tasks.remove(handle.slot)),
            _ => None,
        }
    }

    fn pop(&mut self) -> Option<Task> {
        while let Some(handle) = self.run_q.pop_front() {
            if let Some(task) = self.take(handle) {
                return Some(task);
            }
        }

        None
    }

    /// Install the configuration for this thread.
    pub fn configure(config: Config) {
        EXEC.with(|exec| exec.borrow_mut().config = config);
    }

    /// The configuration of this thread.
    pub fn config() -> Config {
        EXEC.with(|exec| exec.borrow().config)
    }

    /// Queue `f` to run on the next drain of this thread's queue.
    ///
    /// Callbacks run strictly in the order they were queued. If `f` is queued
    /// while the queue is draining, it runs as part of that same drain.
    pub fn enqueue(f: impl FnOnce() + 'static) -> TaskHandle {
        EXEC.with(|exec| {
            let mut exec = exec.borrow_mut();

            let seq = exec.next_seq;
            exec.next_seq += 1;

            let slot = exec.tasks.insert(Task {
                seq,
                callback: Box::new(f),
            });
            let handle = TaskHandle { slot, seq };
            exec.run_q.push_back(handle);
            trace!("task {slot}/{seq} queued");

            handle
        })
    }

    /// Number of callbacks waiting in the queue.
    pub fn pending_tasks() -> usize {
        EXEC.with(|exec| exec.borrow().tasks.len())
    }

    /// Run queued callbacks until the queue is empty, returning how many ran.
    ///
    /// A callback that panics does not stop the drain: the panic is recorded
    /// as an uncaught [Error::Panicked] (see [Executor::take_uncaught]) and the
    /// remaining callbacks still run. Calling `drain` from inside a callback
    /// that is itself being drained does nothing and returns 0; the outer drain
    /// picks up whatever was queued.
    pub fn drain() -> usize {
        let entered = EXEC.with(|exec| {
            let mut exec = exec.borrow_mut();
            !std::mem::replace(&mut exec.draining, true)
        });

        if !entered {
            trace!("nested drain refused");
            return 0;
        }

        let mut ran = 0;

        while let Some(task) = EXEC.with(|exec| exec.borrow_mut().pop()) {
            let callback = task.callback;

            if let Err(e) = catch(|| {
                callback();
                Ok(())
            }) {
                Self::report(e);
            }

            ran += 1;
        }

        EXEC.with(|exec| exec.borrow_mut().draining = false);

        if ran > 0 {
            trace!("drained {ran} callbacks");
        }

        ran
    }

    fn is_draining() -> bool {
        EXEC.with(|exec| exec.borrow().draining)
    }

    /// Record an error that escaped every promise.
    pub(crate) fn report(e: Error) {
        error!("uncaught error: {e}");
        EXEC.with(|exec| exec.borrow_mut().uncaught.push(e));
    }

    /// Take the errors that surfaced outside of any promise since the last
    /// call: panicking queued callbacks and failing progress transforms.
    pub fn take_uncaught() -> Vec<Error> {
        EXEC.with(|exec| std::mem::take(&mut exec.borrow_mut().uncaught))
    }

    fn fire_timers() {
        for callback in Reactor::react() {
            Self::enqueue(callback);
        }
    }

    /// Run the event loop for this thread.
    ///
    /// Drains the queue, then waits for timers, until neither queued callbacks
    /// nor armed timers remain.
    pub fn run() {
        if Self::is_draining() {
            warn!("Executor::run called from a queued callback; ignoring");
            return;
        }

        loop {
            Self::drain();

            if Self::pending_tasks() > 0 {
                continue;
            }

            if !Reactor::has_timers() {
                return;
            }

            Self::fire_timers();
        }
    }

    /// Run the event loop until `promise` settles and return its outcome.
    ///
    /// Returns [Error::Stalled] if the loop runs out of work while the promise
    /// is still pending, or when called from inside a queued callback.
    pub fn block_on<T, P>(promise: &Promise<T, P>) -> Result<T, Error>
    where
        T: Clone + 'static,
        P: Clone + 'static,
    {
        if Self::is_draining() {
            warn!("Executor::block_on called from a queued callback");
            return Err(Error::Stalled);
        }

        loop {
            Self::drain();

            if let Some(outcome) = promise.outcome() {
                return outcome;
            }

            if Self::pending_tasks() > 0 {
                continue;
            }

            if !Reactor::has_timers() {
                return Err(Error::Stalled);
            }

            Self::fire_timers();
        }
    }
}
