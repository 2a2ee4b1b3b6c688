pub(crate) use uring::TimerKey;
use std::time::Instant;
use uring::ReactorUring;

mod uring;

pub(crate) type Callback = Box<dyn FnOnce()>;

pub(crate) struct Reactor {}

thread_local! {
    static REACTOR: ReactorUring<Callback> = ReactorUring::new();
}

impl Reactor {
    pub fn add_timer(deadline: Instant, callback: Callback) -> TimerKey {
        REACTOR.with(|r| r.insert(deadline, callback))
    }

    pub fn remove_timer(key: TimerKey) -> bool {
        // Dropped outside the borrow: a callback may own promises whose
        // teardown touches the reactor.
        let callback = REACTOR.with(|r| r.remove(key));
        callback.is_some()
    }

    pub fn has_timers() -> bool {
        REACTOR.with(|r| !r.is_empty())
    }

    /// Block until at least one timer expires and return the expired
    /// callbacks. They must be run after the reactor is released.
    pub fn react() -> Vec<Callback> {
        REACTOR.with(|r| r.react())
    }
}
