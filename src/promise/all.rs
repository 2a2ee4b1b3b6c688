//! The aggregate combinator.
//!
//! [Promise::all] waits for every item of a [Collection] and fulfils with a
//! container of the same shape holding each item's outcome. A rejected item
//! fills its slot with the error like any other outcome; it does not cut the
//! aggregate short. While items complete, the aggregate reports a snapshot of
//! the slots filled so far as progress.
use std::{cell::RefCell, collections::BTreeMap, marker::PhantomData, rc::Rc};

use log::debug;

use super::{IntoResolution, Promise, Resolution, Resolver};
use crate::error::Error;

/// A keyed collection of promises or plain values that [Promise::all] can
/// wait on.
///
/// Implemented for `Vec` (sequence in, sequence out) and `BTreeMap` (mapping
/// in, mapping out). Items are anything implementing [IntoResolution]: a
/// [Promise], an already computed `Result`, or a [Resolution].
pub trait Collection<T, P> {
    /// How a slot is addressed.
    type Key: Clone + 'static;
    /// The fulfilled value of the aggregate.
    type Output: Clone + 'static;
    /// The progress payload of the aggregate.
    type Snapshot: Clone + 'static;

    fn into_entries(self) -> Vec<(Self::Key, Result<Resolution<T, P>, Error>)>;

    /// Build the output from one outcome per key, in key order.
    fn output(keys: &[Self::Key], slots: Vec<Result<T, Error>>) -> Self::Output;

    /// Build a progress snapshot from the slots filled so far.
    fn snapshot(keys: &[Self::Key], slots: &[Option<Result<T, Error>>]) -> Self::Snapshot;
}

impl<T, P, I> Collection<T, P> for Vec<I>
where
    T: Clone + 'static,
    I: IntoResolution<T, P>,
{
    type Key = usize;
    type Output = Vec<Result<T, Error>>;
    type Snapshot = Vec<Option<Result<T, Error>>>;

    fn into_entries(self) -> Vec<(usize, Result<Resolution<T, P>, Error>)> {
        self.into_iter()
            .map(|item| item.into_resolution())
            .enumerate()
            .collect()
    }

    fn output(_keys: &[usize], slots: Vec<Result<T, Error>>) -> Self::Output {
        slots
    }

    fn snapshot(_keys: &[usize], slots: &[Option<Result<T, Error>>]) -> Self::Snapshot {
        slots.to_vec()
    }
}

impl<K, T, P, I> Collection<T, P> for BTreeMap<K, I>
where
    K: Ord + Clone + 'static,
    T: Clone + 'static,
    I: IntoResolution<T, P>,
{
    type Key = K;
    type Output = BTreeMap<K, Result<T, Error>>;
    type Snapshot = BTreeMap<K, Result<T, Error>>;

    fn into_entries(self) -> Vec<(K, Result<Resolution<T, P>, Error>)> {
        self.into_iter()
            .map(|(k, item)| (k, item.into_resolution()))
            .collect()
    }

    fn output(keys: &[K], slots: Vec<Result<T, Error>>) -> Self::Output {
        keys.iter().cloned().zip(slots).collect()
    }

    fn snapshot(keys: &[K], slots: &[Option<Result<T, Error>>]) -> Self::Snapshot {
        keys.iter()
            .zip(slots)
            .filter_map(|(k, slot)| slot.clone().map(|outcome| (k.clone(), outcome)))
            .collect()
    }
}

struct Tally<T> {
    slots: Vec<Option<Result<T, Error>>>,
    complete: usize,
    total: usize,
    populating: bool,
}

struct Aggregate<C, T, P>
where
    C: Collection<T, P>,
{
    keys: Vec<C::Key>,
    tally: RefCell<Tally<T>>,
    resolver: Resolver<C::Output, C::Snapshot>,
    _collection: PhantomData<fn() -> (C, P)>,
}

impl<C, T, P> Aggregate<C, T, P>
where
    C: Collection<T, P>,
    T: Clone + 'static,
    P: Clone + 'static,
{
    fn fill(&self, index: usize, outcome: Result<T, Error>) {
        let snapshot = {
            let mut tally = self.tally.borrow_mut();

            match tally.slots.get_mut(index) {
                Some(slot @ None) => *slot = Some(outcome),
                _ => return,
            }
            tally.complete += 1;

            C::snapshot(&self.keys, &tally.slots)
        };

        if self.resolver.is_pending() {
            if let Err(e) = self.resolver.progress(snapshot) {
                debug!("aggregate progress dropped: {e}");
            }
        }

        self.finish();
    }

    fn finish(&self) {
        let slots = {
            let mut tally = self.tally.borrow_mut();

            if tally.populating || tally.complete < tally.total {
                return;
            }

            std::mem::take(&mut tally.slots)
        };

        if !self.resolver.is_pending() {
            return;
        }

        let output = C::output(&self.keys, slots.into_iter().flatten().collect());

        if let Err(e) = self.resolver.resolve(output) {
            debug!("aggregate already settled: {e}");
        }
    }

    /// Cancel every pending item and settle with whatever has been collected.
    /// Items that did not settle synchronously hold `reason`.
    fn cancel(&self, items: &[(usize, Promise<T, P>)], reason: Error) -> C::Output {
        for (_, item) in items {
            if let Err(e) = item.cancel(Some(reason.clone())) {
                debug!("aggregate item not canceled: {e}");
            }
        }

        let mut slots = {
            let tally = self.tally.borrow();
            tally.slots.clone()
        };

        for (index, item) in items {
            if let Some(slot @ None) = slots.get_mut(*index) {
                *slot = item.outcome();
            }
        }

        let slots = slots
            .into_iter()
            .map(|slot| slot.unwrap_or_else(|| Err(reason.clone())))
            .collect();

        C::output(&self.keys, slots)
    }
}

impl<T, P> Promise<T, P>
where
    T: Clone + 'static,
    P: Clone + 'static,
{
    /// Wait for every item of `collection`.
    ///
    /// The returned promise fulfils once every item has settled, with one
    /// `Result` per item in the shape of the input. Every time an item
    /// settles, a snapshot of the slots filled so far is sent as progress.
    ///
    /// Cancelling the aggregate cancels every item that is still pending and
    /// fulfils the aggregate right away; slots of items that have not settled
    /// by then hold the cancellation reason.
    ///
    /// A collection holding only plain `Result` values does not say which
    /// progress type its promises would have, so name it on the call:
    /// `Promise::<u32>::all(vec![Ok(1), Ok(2)])`.
    ///
    /// ```
    /// use pledge::promise::{Deferred, Promise};
    /// use pledge::task::Executor;
    /// use pledge::error::Error;
    ///
    /// let a = Deferred::<u32>::new();
    /// let b = Deferred::<u32>::new();
    /// let both = Promise::all(vec![a.promise(), b.promise()]);
    ///
    /// a.reject(Error::msg("lost")).unwrap();
    /// b.resolve(2).unwrap();
    ///
    /// assert_eq!(
    ///     Executor::block_on(&both),
    ///     Ok(vec![Err(Error::msg("lost")), Ok(2)])
    /// );
    /// ```
    pub fn all<C>(collection: C) -> Promise<C::Output, C::Snapshot>
    where
        C: Collection<T, P> + 'static,
    {
        let (keys, items): (Vec<_>, Vec<_>) = collection.into_entries().into_iter().unzip();

        Promise::new(move |resolver, slot| {
            let aggregate = Rc::new(Aggregate::<C, T, P> {
                tally: RefCell::new(Tally {
                    slots: vec![None; keys.len()],
                    complete: 0,
                    total: 0,
                    populating: true,
                }),
                keys,
                resolver,
                _collection: PhantomData,
            });

            let mut pending = Vec::new();

            for (index, item) in items.into_iter().enumerate() {
                aggregate.tally.borrow_mut().total += 1;

                match item {
                    Ok(Resolution::Value(v)) => aggregate.fill(index, Ok(v)),
                    Err(e) => aggregate.fill(index, Err(e)),
                    Ok(Resolution::Promise(p)) => {
                        let a = aggregate.clone();
                        let _ = p.finally(move |outcome| {
                            a.fill(index, outcome);
                            Ok::<(), Error>(())
                        });
                        pending.push((index, p));
                    }
                }
            }

            aggregate.tally.borrow_mut().populating = false;
            aggregate.finish();

            slot.install(move |reason| Ok(aggregate.cancel(&pending, reason)));

            Ok(())
        })
    }
}
