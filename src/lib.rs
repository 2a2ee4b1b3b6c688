//! # `pledge`: promises with progress and cancellation
//!
//! This crate implements a single-threaded promise primitive. A
//! [Promise](promise::Promise) represents the eventual outcome of an
//! asynchronous operation and, on top of the usual fulfil/reject contract,
//! carries progress notifications, cooperative cancellation that travels up
//! `then` chains, and an aggregate combinator over sequences and maps.
//!
//! Continuations never run synchronously. They are queued on the thread's
//! [Executor](task::Executor), which also owns a small io_uring-backed timer
//! reactor used by the [timer] module.
//!
//! For the promise API, refer to the [promise] module. For how callbacks are
//! scheduled and how to drive the event loop, see the [task] module.
//!
//! ## Example
//!
//! A producer reports progress, then fulfils; the consumer chains on both:
//!
//! ```
//! use pledge::promise::Promise;
//! use pledge::task::Executor;
//! use pledge::timer::Timer;
//! use std::time::Duration;
//!
//! let download = Promise::<&str, u8>::new(|resolver, _| {
//!     resolver.progress(50)?;
//!     Timer::after(Duration::from_millis(10), move || {
//!         resolver.resolve("payload").unwrap();
//!     });
//!     Ok(())
//! });
//!
//! let len = download
//!     .progress(|pct| {
//!         println!("{pct}%");
//!         Ok(pct)
//!     })
//!     .then(|body| Ok(body.len()));
//!
//! assert_eq!(Executor::block_on(&len), Ok(7));
//! ```
pub mod config;
pub mod error;
pub mod promise;
pub(crate) mod reactor;
pub mod task;
pub mod timer;

pub use error::Error;
pub use promise::{Deferred, Promise};
