use std::{
    cell::RefCell,
    io,
    time::{Duration, Instant},
};

use io_uring::{opcode, types, IoUring};
use log::{trace, warn};
use slab::Slab;

const WAIT_TOKEN: u64 = u64::MAX;

/// Identifies a registered deadline. The sequence number guards against a
/// stale key naming a reused slab slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerKey {
    slot: usize,
    seq: u64,
}

pub struct ReactorUring<T>(RefCell<ReactorInner<T>>);

impl<T> ReactorUring<T> {
    pub fn new() -> Self {
        Self(RefCell::new(ReactorInner::new()))
    }

    pub fn insert(&self, deadline: Instant, obj: T) -> TimerKey {
        self.0.borrow_mut().insert(deadline, obj)
    }

    pub fn remove(&self, key: TimerKey) -> Option<T> {
        self.0.borrow_mut().remove(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().timers.is_empty()
    }

    pub fn react(&self) -> Vec<T> {
        self.0.borrow_mut().react()
    }
}

struct Deadline<T> {
    at: Instant,
    seq: u64,
    obj: T,
}

pub(super) struct ReactorInner<T> {
    uring: Option<IoUring>,
    timers: Slab<Deadline<T>>,
    next_seq: u64,
}

impl<T> ReactorInner<T> {
    pub fn new() -> Self {
        let uring = match IoUring::new(8) {
            Ok(ring) => Some(ring),
            Err(e) => {
                warn!("io_uring unavailable ({e}), timers will fall back to thread sleeps");
                None
            }
        };

        Self {
            uring,
            timers: Slab::new(),
            next_seq: 0,
        }
    }

    pub fn insert(&mut self, at: Instant, obj: T) -> TimerKey {
        let seq = self.next_seq;
        self.next_seq += 1;

        let slot = self.timers.insert(Deadline { at, seq, obj });
        trace!("timer {slot}/{seq} armed");

        TimerKey { slot, seq }
    }

    pub fn remove(&mut self, key: TimerKey) -> Option<T> {
        match self.timers.get(key.slot) {
            Some(d) if d.seq == key.seq => Some(self.timers.remove(key.slot).obj),
            _ => None,
        }
    }

    /// Sleep until the earliest deadline has passed and return every object
    /// whose deadline has expired, in deadline order.
    pub fn react(&mut self) -> Vec<T> {
        let Some(earliest) = self.timers.iter().map(|(_, d)| d.at).min() else {
            return Vec::new();
        };

        if let Err(e) = self.wait_until(earliest) {
            warn!("io_uring timeout failed ({e}), sleeping instead");
            std::thread::sleep(earliest.saturating_duration_since(Instant::now()));
        }

        let now = Instant::now();
        let mut expired: Vec<(Instant, u64, usize)> = self
            .timers
            .iter()
            .filter(|(_, d)| d.at <= now)
            .map(|(slot, d)| (d.at, d.seq, slot))
            .collect();

        expired.sort_unstable();

        expired
            .into_iter()
            .map(|(_, _, slot)| self.timers.remove(slot).obj)
            .collect()
    }

    fn wait_until(&mut self, deadline: Instant) -> io::Result<()> {
        let remaining = deadline.saturating_duration_since(Instant::now());

        if remaining == Duration::ZERO {
            return Ok(());
        }

        let Some(ring) = self.uring.as_mut() else {
            std::thread::sleep(remaining);
            return Ok(());
        };

        let ts = types::Timespec::new()
            .sec(remaining.as_secs())
            .nsec(remaining.subsec_nanos());

        let entry = opcode::Timeout::new(&ts as *const _)
            .build()
            .user_data(WAIT_TOKEN);

        unsafe {
            ring.submission()
                .push(&entry)
                .map_err(|_| io::Error::other("submission queue full"))?;
        }

        match ring.submit_and_wait(1) {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e),
        }

        for cqe in ring.completion() {
            let res = cqe.result();

            if res < 0 && res != -libc::ETIME {
                return Err(io::Error::from_raw_os_error(-res));
            }
        }

        Ok(())
    }
}
