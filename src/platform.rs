//! Collaborators the sleep queues rely on.
//!
//! The sleep queues only decide *who* sleeps and *who* wakes up. Actually switching threads,
//! arming timers and delivering interruptions belong to the rest of the kernel, which plugs
//! them in by implementing the traits of this module.
//!
//! # Lock order
//!
//! Each thread has a dispatch lock, owned by the scheduler, that guards its runnable/blocked
//! transitions. A dispatch lock may be acquired while holding a chain lock, but a chain lock
//! must never be acquired while holding a dispatch lock. A sleeping thread releases its chain
//! lock before it takes its own dispatch lock to switch away. With the `invariants` feature,
//! taking a chain lock while holding a dispatch lock panics.

use core::time::Duration;

use crate::{
    error::Interrupt,
    thread::{Epoch, Priority, Tid},
};

/// The thread scheduler.
pub trait Scheduler: Sync {
    /// The guard of a thread's dispatch lock.
    type Dispatch<'s>: DispatchGuard
    where
        Self: 's;

    /// Returns the thread running the caller.
    fn current(&self) -> Tid;

    /// Returns the current scheduling priority of `td`. Lower values are more favorable.
    /// Must not block.
    fn priority(&self, td: Tid) -> Priority;

    /// Acquires the dispatch lock of `td`.
    fn lock_dispatch(&self, td: Tid) -> Self::Dispatch<'_>;
}

/// A held dispatch lock of a single thread.
pub trait DispatchGuard {
    /// Marks the locked thread, which must be the current thread, non-runnable and switches
    /// away. The dispatch lock is released while the thread is blocked and is held again when
    /// this returns.
    ///
    /// May return spuriously; callers recheck their condition.
    fn block(&mut self);

    /// Makes the locked thread runnable again.
    fn set_runnable(&mut self);

    /// Raises the scheduling priority of the locked thread to `pri`.
    fn lend_priority(&mut self, pri: Priority);
}

/// One-shot timers.
///
/// Each thread owns exactly one sleep timer. When an armed timer expires, the timer service
/// must call [`SleepQueues::timeout`](crate::SleepQueues::timeout) for its thread with the
/// epoch it was armed with, unless it was cancelled first. The callback may run late, even
/// after the thread started another sleep; the epoch tells the two apart.
pub trait TimerService: Sync {
    /// Arms the sleep timer of `td` to expire after `after`, replacing any earlier timer.
    fn arm_timeout(&self, td: Tid, epoch: Epoch, after: Duration);

    /// Cancels the sleep timer of `td`.
    ///
    /// Returns `true` if the timer was pending and its callback will not run. Returns `false`
    /// if the callback has already started or finished, or if no timer was armed.
    fn cancel_timeout(&self, td: Tid) -> bool;
}

/// Asynchronous interruptions of sleeping threads.
///
/// When delivering an interruption to a thread in an interruptible sleep, the implementor
/// must call [`SleepQueues::abort`](crate::SleepQueues::abort).
pub trait Signals: Sync {
    /// Returns the interruption pending for `td`, if any. Must not block.
    fn pending_interrupt(&self, td: Tid) -> Option<Interrupt>;
}

/// Everything the sleep queues need from the kernel.
pub trait Platform: Scheduler + TimerService + Signals {}

impl<T: Scheduler + TimerService + Signals> Platform for T {}
