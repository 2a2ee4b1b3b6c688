//! The promise state machine.
//!
//! A [Shared] cell holds one promise's state, its pending reactions and
//! progress listeners, its canceler and its link to whatever it is waiting on
//! (the parent of a `then` chain, or a promise it has adopted). All user code
//! (reactions, cancelers, progress transforms) runs with the cell released.
use std::{
    cell::RefCell,
    rc::{Rc, Weak},
    sync::atomic::{AtomicU64, Ordering},
};

use log::{debug, trace, warn};

use super::Resolution;
use crate::{
    error::{catch, Error},
    task::Executor,
};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) type Reaction<T> = Box<dyn FnOnce(Result<T, Error>)>;
pub(crate) type Listener<P> = Rc<dyn Fn(P)>;
pub(crate) type Canceler<T> = Box<dyn FnOnce(Error) -> Result<T, Error>>;
pub(crate) type Settler<T, U, Q> = Box<dyn FnOnce(Result<T, Error>) -> Result<Resolution<U, Q>, Error>>;
pub(crate) type Transform<P, Q> = Box<dyn FnMut(P) -> Result<Q, Error>>;

pub(crate) enum State<T> {
    Pending,
    Fulfilled(T),
    Rejected(Error),
}

/// Who is asking for a cancellation.
pub(crate) enum Source {
    /// A consumer holding the promise.
    Consumer,
    /// A promise that depends on this one and wants it gone.
    Dependent { id: u64, target: Weak<dyn Cancel> },
    /// A queued request being replayed after its dependent's reaction ran.
    Replay,
}

/// A cancellation request parked until the dependent that sent it has run
/// its reaction.
struct Recancel {
    source: u64,
    target: Weak<dyn Cancel>,
    reason: Error,
}

struct Core<T, P> {
    state: State<T>,
    /// Resolved with another promise; only that promise may settle us now.
    locked: bool,
    reactions: Vec<Reaction<T>>,
    listeners: Vec<Listener<P>>,
    canceler: Option<Canceler<T>>,
    /// Held strongly until our reaction on it has run, so a cancel can still
    /// reach it after every other handle is gone.
    upstream: Option<Rc<dyn Cancel>>,
    /// Already withdrawn from `upstream`.
    withdrawn: bool,
    dependents: usize,
    recancelers: Vec<Recancel>,
}

impl<T, P> Core<T, P> {
    fn is_pending(&self) -> bool {
        matches!(self.state, State::Pending)
    }
}

/// Object-safe view of a promise used to route cancellation between promises
/// of different types.
pub(crate) trait Cancel {
    fn id(&self) -> u64;

    fn cancel_from(self: Rc<Self>, reason: Error, source: Source) -> Result<(), Error>;

    /// Dependent `id` no longer needs this promise. `first` is false when the
    /// dependent has already withdrawn once.
    fn withdraw(
        self: Rc<Self>,
        reason: Error,
        id: u64,
        target: Weak<dyn Cancel>,
        first: bool,
    ) -> Result<(), Error>;

    /// Replay the requests dependent `id` queued here.
    fn replay(&self, id: u64);
}

pub(crate) struct Shared<T, P> {
    id: u64,
    core: RefCell<Core<T, P>>,
}

/// Report misuse of a resolver according to the thread's configuration.
pub(crate) fn misuse(e: Error) -> Result<(), Error> {
    if Executor::config().debug {
        warn!("{e}");
        Err(e)
    } else {
        debug!("ignored: {e}");
        Ok(())
    }
}

impl<T, P> Shared<T, P> {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl<T, P> Shared<T, P>
where
    T: Clone + 'static,
    P: Clone + 'static,
{
    fn with_state(state: State<T>) -> Rc<Self> {
        Rc::new(Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            core: RefCell::new(Core {
                state,
                locked: false,
                reactions: Vec::new(),
                listeners: Vec::new(),
                canceler: None,
                upstream: None,
                withdrawn: false,
                dependents: 0,
                recancelers: Vec::new(),
            }),
        })
    }

    pub fn pending() -> Rc<Self> {
        Self::with_state(State::Pending)
    }

    pub fn settled(outcome: Result<T, Error>) -> Rc<Self> {
        Self::with_state(match outcome {
            Ok(v) => State::Fulfilled(v),
            Err(e) => State::Rejected(e),
        })
    }

    pub fn is_pending(&self) -> bool {
        self.core.borrow().is_pending()
    }

    /// Pending and not locked onto another promise.
    pub fn is_open(&self) -> bool {
        let core = self.core.borrow();
        core.is_pending() && !core.locked
    }

    pub fn state(&self) -> super::State {
        match self.core.borrow().state {
            State::Pending => super::State::Pending,
            State::Fulfilled(_) => super::State::Fulfilled,
            State::Rejected(_) => super::State::Rejected,
        }
    }

    pub fn outcome(&self) -> Option<Result<T, Error>> {
        match &self.core.borrow().state {
            State::Pending => None,
            State::Fulfilled(v) => Some(Ok(v.clone())),
            State::Rejected(e) => Some(Err(e.clone())),
        }
    }

    pub fn set_canceler(&self, canceler: Canceler<T>) {
        let mut core = self.core.borrow_mut();

        if core.is_pending() && !core.locked {
            core.canceler = Some(canceler);
        }
    }

    /// Commit a settlement and hand every reaction to the scheduler. Returns
    /// false if the promise had already settled.
    pub fn settle(&self, outcome: Result<T, Error>) -> bool {
        let (reactions, listeners, canceler, upstream) = {
            let mut core = self.core.borrow_mut();

            if !core.is_pending() {
                return false;
            }

            core.state = match &outcome {
                Ok(v) => State::Fulfilled(v.clone()),
                Err(e) => State::Rejected(e.clone()),
            };
            core.locked = false;

            (
                std::mem::take(&mut core.reactions),
                std::mem::take(&mut core.listeners),
                core.canceler.take(),
                core.upstream.take(),
            )
        };

        trace!(
            "promise {} {} with {} reactions",
            self.id,
            if outcome.is_ok() { "fulfilled" } else { "rejected" },
            reactions.len()
        );

        drop((listeners, canceler, upstream));

        for reaction in reactions {
            let outcome = outcome.clone();
            Executor::enqueue(move || reaction(outcome));
        }

        true
    }

    /// Settle from a producer: refuses once settled or locked.
    pub fn resolve_external(
        self: &Rc<Self>,
        resolution: Result<Resolution<T, P>, Error>,
    ) -> Result<(), Error> {
        if !self.is_open() {
            return misuse(Error::AlreadySettled);
        }

        if let Ok(Resolution::Promise(inner)) = &resolution {
            if inner.shared.id == self.id {
                self.settle(Err(Error::SelfResolution));
                return Err(Error::SelfResolution);
            }
        }

        self.resolve_with(resolution);

        Ok(())
    }

    pub fn resolve_with(self: &Rc<Self>, resolution: Result<Resolution<T, P>, Error>) {
        match resolution {
            Ok(Resolution::Value(v)) => {
                self.settle(Ok(v));
            }
            Ok(Resolution::Promise(inner)) => self.adopt(&inner.shared),
            Err(e) => {
                self.settle(Err(e));
            }
        }
    }

    /// Take on the eventual outcome of `inner`. Until it settles, cancelling
    /// this promise cancels `inner` instead.
    fn adopt(self: &Rc<Self>, inner: &Rc<Shared<T, P>>) {
        if inner.id == self.id {
            self.settle(Err(Error::SelfResolution));
            return;
        }

        let replaced = {
            let mut core = self.core.borrow_mut();

            if !core.is_pending() {
                return;
            }

            let upstream: Rc<dyn Cancel> = inner.clone();
            core.locked = true;
            core.withdrawn = false;
            (core.upstream.replace(upstream), core.canceler.take())
        };
        drop(replaced);

        debug!("promise {} adopting promise {}", self.id, inner.id);

        let outer = self.clone();
        let reaction: Reaction<T> = Box::new(move |outcome| {
            let inner = outer.core.borrow_mut().upstream.take();
            outer.settle(outcome);

            if let Some(inner) = inner {
                inner.replay(outer.id);
            }
        });

        let forward = Rc::downgrade(self);
        let listener: Listener<P> = Rc::new(move |data| {
            if let Some(outer) = forward.upgrade() {
                outer.emit(data);
            }
        });

        inner.subscribe(reaction, Some(listener), true);
    }

    /// Register interest in the outcome. The reaction always runs from the
    /// scheduler, even when the promise has already settled.
    pub fn subscribe(&self, reaction: Reaction<T>, listener: Option<Listener<P>>, dependent: bool) {
        let outcome = {
            let mut core = self.core.borrow_mut();

            match &core.state {
                State::Pending => {
                    core.reactions.push(reaction);
                    core.listeners.extend(listener);
                    if dependent {
                        core.dependents += 1;
                    }
                    return;
                }
                State::Fulfilled(v) => Ok(v.clone()),
                State::Rejected(e) => Err(e.clone()),
            }
        };

        Executor::enqueue(move || reaction(outcome));
    }

    /// Queue `data` for every listener. Returns false once settled.
    pub fn emit(&self, data: P) -> bool {
        let listeners = {
            let core = self.core.borrow();

            if !core.is_pending() {
                return false;
            }

            core.listeners.clone()
        };

        for listener in listeners {
            let data = data.clone();
            Executor::enqueue(move || listener(data));
        }

        true
    }

    /// Create a dependent promise whose outcome is computed by `on_settled`
    /// and whose progress is `on_progress` applied to ours.
    pub fn chain<U, Q>(
        self: &Rc<Self>,
        on_settled: Settler<T, U, Q>,
        on_progress: Transform<P, Q>,
    ) -> Rc<Shared<U, Q>>
    where
        U: Clone + 'static,
        Q: Clone + 'static,
    {
        let child = Shared::<U, Q>::pending();
        let upstream: Rc<dyn Cancel> = self.clone();
        child.core.borrow_mut().upstream = Some(upstream);

        let c = child.clone();
        let reaction: Reaction<T> = Box::new(move |outcome| {
            let parent = {
                let mut core = c.core.borrow_mut();
                core.withdrawn = false;
                core.upstream.take()
            };

            c.resolve_with(catch(|| on_settled(outcome)));

            if let Some(parent) = parent {
                parent.replay(c.id);
            }
        });

        let target = Rc::downgrade(&child);
        let transform = RefCell::new(on_progress);
        let listener: Listener<P> = Rc::new(move |data| {
            let Some(child) = target.upgrade() else {
                return;
            };

            match catch(|| (*transform.borrow_mut())(data)) {
                Ok(data) => {
                    child.emit(data);
                }
                Err(Error::StopPropagation) => {
                    trace!("progress stopped before promise {}", child.id);
                }
                Err(e) => Executor::report(e),
            }
        });

        self.subscribe(reaction, Some(listener), true);

        child
    }

    fn queue(&self, id: u64, target: Weak<dyn Cancel>, reason: Error) {
        debug!("promise {} queued cancel from promise {id}", self.id);

        self.core.borrow_mut().recancelers.push(Recancel {
            source: id,
            target,
            reason,
        });
    }
}

enum Route<T> {
    Settled,
    Upstream(Rc<dyn Cancel>, bool),
    Run(Canceler<T>),
    Unowned,
}

impl<T, P> Cancel for Shared<T, P>
where
    T: Clone + 'static,
    P: Clone + 'static,
{
    fn id(&self) -> u64 {
        self.id
    }

    fn cancel_from(self: Rc<Self>, reason: Error, source: Source) -> Result<(), Error> {
        let route = {
            let mut core = self.core.borrow_mut();

            if !core.is_pending() {
                Route::Settled
            } else if let Some(up) = core.upstream.clone() {
                let first = !std::mem::replace(&mut core.withdrawn, true);
                Route::Upstream(up, first)
            } else if let Some(canceler) = core.canceler.take() {
                Route::Run(canceler)
            } else {
                Route::Unowned
            }
        };

        match (route, source) {
            (Route::Upstream(up, first), _) => {
                debug!("promise {} forwarding cancel to promise {}", self.id, up.id());
                let me: Weak<dyn Cancel> = Rc::downgrade(&self) as Weak<dyn Cancel>;
                up.withdraw(reason, self.id, me, first)
            }
            (Route::Run(canceler), _) => {
                debug!("promise {} canceled: {reason}", self.id);
                let outcome = catch(|| canceler(reason));
                self.settle(outcome);
                Ok(())
            }
            (Route::Settled, Source::Consumer) => {
                debug!("attempted to cancel promise {} after it settled", self.id);
                Ok(())
            }
            (Route::Unowned, Source::Consumer) => Err(Error::Uncancelable),
            (Route::Settled | Route::Unowned, Source::Dependent { id, target }) => {
                self.queue(id, target, reason);
                Ok(())
            }
            (Route::Settled | Route::Unowned, Source::Replay) => Ok(()),
        }
    }

    fn withdraw(
        self: Rc<Self>,
        reason: Error,
        id: u64,
        target: Weak<dyn Cancel>,
        first: bool,
    ) -> Result<(), Error> {
        let last = {
            let mut core = self.core.borrow_mut();

            if core.is_pending() {
                if first {
                    core.dependents = core.dependents.saturating_sub(1);
                }
                core.dependents == 0
            } else {
                false
            }
        };

        if last {
            self.cancel_from(reason, Source::Dependent { id, target })
        } else {
            self.queue(id, target, reason);
            Ok(())
        }
    }

    fn replay(&self, id: u64) {
        let due: Vec<Recancel> = {
            let mut core = self.core.borrow_mut();
            let (due, keep) = std::mem::take(&mut core.recancelers)
                .into_iter()
                .partition(|r| r.source == id);
            core.recancelers = keep;
            due
        };

        for r in due {
            if let Some(target) = r.target.upgrade() {
                debug!("replaying cancel on promise {id}");
                if let Err(e) = target.cancel_from(r.reason, Source::Replay) {
                    debug!("replayed cancel on promise {id} failed: {e}");
                }
            }
        }
    }
}
