//! Condition variables on top of the sleep queues.
use core::time::Duration;

use crate::{
    error::WaitError,
    lock::{Guard, RawLock},
    platform::Platform,
    sleepq::{SleepFlags, SleepQueues},
    wait_channel::WaitChannel,
};

/// Condition variables.
///
/// Threads wait for a condition while holding the lock that protects it. Waiting releases
/// the lock while the thread sleeps and reacquires it afterwards, so the condition must be
/// checked again in a loop.
pub struct CondVar {
    /// Required to make this type non-zero-sized. If it were zero-sized, multiple condition
    /// variables may have the same address, spuriously waking up more threads.
    _padding: u8,
}

impl CondVar {
    pub const fn new() -> Self {
        Self { _padding: 0 }
    }

    fn wchan(&self) -> WaitChannel {
        WaitChannel::of(self)
    }

    /// Atomically releases the lock of `guard` and sleeps on this condition variable.
    /// Reacquires the lock when awakened.
    pub fn wait<P: Platform, R: RawLock, T>(
        &self,
        queues: &SleepQueues<P>,
        guard: &mut Guard<'_, R, T>,
    ) {
        // Once added, the thread cannot miss a wakeup, so it's okay to release the lock.
        queues.add(self.wchan(), 0, SleepFlags::CONDVAR);
        guard.reacquire_after(|| queues.wait(self.wchan()));
    }

    /// Like `wait`, but the sleep may be aborted by an interruption.
    pub fn wait_sig<P: Platform, R: RawLock, T>(
        &self,
        queues: &SleepQueues<P>,
        guard: &mut Guard<'_, R, T>,
    ) -> Result<(), WaitError> {
        queues.add(
            self.wchan(),
            0,
            SleepFlags::CONDVAR | SleepFlags::INTERRUPTIBLE,
        );
        guard.reacquire_after(|| queues.wait_sig(self.wchan()))
    }

    /// Like `wait`, but gives up after `timeout`.
    pub fn timedwait<P: Platform, R: RawLock, T>(
        &self,
        queues: &SleepQueues<P>,
        guard: &mut Guard<'_, R, T>,
        timeout: Duration,
    ) -> Result<(), WaitError> {
        queues.add(self.wchan(), 0, SleepFlags::CONDVAR);
        queues.set_timeout(self.wchan(), timeout);
        guard.reacquire_after(|| queues.timedwait(self.wchan()))
    }

    /// Like `timedwait`, but the sleep may also be aborted by an interruption.
    pub fn timedwait_sig<P: Platform, R: RawLock, T>(
        &self,
        queues: &SleepQueues<P>,
        guard: &mut Guard<'_, R, T>,
        timeout: Duration,
    ) -> Result<(), WaitError> {
        queues.add(
            self.wchan(),
            0,
            SleepFlags::CONDVAR | SleepFlags::INTERRUPTIBLE,
        );
        queues.set_timeout(self.wchan(), timeout);
        guard.reacquire_after(|| queues.timedwait_sig(self.wchan()))
    }

    /// Wakes up one waiter, the one with the most favorable priority.
    pub fn signal<P: Platform>(&self, queues: &SleepQueues<P>) -> bool {
        queues.signal(self.wchan(), 0, None)
    }

    /// Wakes up all waiters.
    pub fn broadcast<P: Platform>(&self, queues: &SleepQueues<P>) -> usize {
        queues.broadcast(self.wchan(), 0, None)
    }
}

impl Default for CondVar {
    fn default() -> Self {
        Self::new()
    }
}
