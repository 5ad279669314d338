//! sleepq: sleep queues for kernel threads.
//!
//! Threads block on *wait channels*, opaque tokens naming the condition they wait for. A
//! sleeping thread is woken up individually (most favorable priority first), together with
//! all the other sleepers of its channel, by the expiry of a timeout, or by an asynchronous
//! interruption. Sleeping never allocates, and a wakeup is never lost to a concurrent timeout.
//!
//! The crate does not switch threads by itself. The kernel provides a [`Platform`]: its
//! scheduler, timers and interruption delivery.

#![no_std]
#![warn(rust_2018_idioms)]

#[macro_use]
extern crate log;

#[cfg(test)]
#[macro_use]
extern crate std;

mod condvar;
mod error;
mod global;
pub mod lock;
pub mod param;
mod platform;
mod sleepq;
mod thread;
mod wait_channel;

pub use condvar::CondVar;
pub use error::{Interrupt, WaitError};
pub use global::GlobalSleepQueues;
pub use platform::{DispatchGuard, Platform, Scheduler, Signals, TimerService};
pub use sleepq::{Census, SleepFlags, SleepQueues};
pub use thread::{Epoch, Priority, Tid};
pub use wait_channel::WaitChannel;
