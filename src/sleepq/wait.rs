//! Blocking on a sleep queue, and how a sleep ends.
//!
//! A sleep ends in exactly one of three ways: a wakeup (`signal`, `broadcast`, `remove`), a
//! timeout, or an abort. Whoever ends it detaches the thread from its sleep queue, with the
//! chain lock held, so only one of them can succeed.
//!
//! The timer callback can still run after a wakeup already detached the thread. The waker
//! cancels the timer, but the callback may have started already. In that case the callback
//! finds the thread gone, leaves a note and exits without touching the thread. The callback
//! may even run after the thread started another sleep; it carries the epoch of the sleep it
//! was armed for, and does nothing if that sleep is over.

use core::time::Duration;

use crate::{
    error::WaitError,
    platform::{DispatchGuard, Platform},
    thread::{Epoch, TdFlags, Tid},
    wait_channel::WaitChannel,
};

use super::{SleepFlags, SleepQueues};

impl<P: Platform> SleepQueues<P> {
    /// Blocks the current thread, which must have been `add`ed to `wchan`, until it is woken up.
    pub fn wait(&self, wchan: WaitChannel) {
        let td = self.begin_wait(wchan);
        self.switch(td, wchan);
        self.end_wait(td);
    }

    /// Like `wait`, but the sleep may be aborted by an interruption, which is returned.
    /// The thread must have been `add`ed with `SleepFlags::INTERRUPTIBLE`.
    pub fn wait_sig(&self, wchan: WaitChannel) -> Result<(), WaitError> {
        let td = self.begin_wait(wchan);
        if !self.catch_signals(td, wchan) {
            self.switch(td, wchan);
        }
        let result = self.check_signals(td);
        self.end_wait(td);
        result
    }

    /// Like `wait`, but returns `WaitError::TimedOut` if the timeout armed with `set_timeout`
    /// expires first.
    pub fn timedwait(&self, wchan: WaitChannel) -> Result<(), WaitError> {
        let td = self.begin_wait(wchan);
        self.switch(td, wchan);
        let result = self.check_timeout(td);
        self.end_wait(td);
        result
    }

    /// Combination of `timedwait` and `wait_sig`. If both a timeout and an abort ended the
    /// sleep, the timeout is returned.
    pub fn timedwait_sig(&self, wchan: WaitChannel) -> Result<(), WaitError> {
        let td = self.begin_wait(wchan);
        if !self.catch_signals(td, wchan) {
            self.switch(td, wchan);
        }
        let timeout = self.check_timeout(td);
        let signals = self.check_signals(td);
        self.end_wait(td);
        timeout.and(signals)
    }

    /// Sleeps for `after`, unless the thread is explicitly removed from its sleep earlier.
    pub fn pause(&self, after: Duration) {
        let td = self.platform.current();
        let wchan = WaitChannel::of(self.slot(td));
        self.add(wchan, 0, SleepFlags::PAUSE);
        self.set_timeout(wchan, after);
        let _ = self.timedwait(wchan);
    }

    /// Called by the timer service when the sleep timer of `td`, armed for sleep `epoch`,
    /// expires.
    pub fn timeout(&self, td: Tid, epoch: Epoch) {
        let slot = self.slot(td);
        while let Some(wchan) = slot.wchan() {
            let mut chain = self.lock_chain(wchan);
            if slot.wchan() != Some(wchan) {
                continue;
            }
            if slot.epoch() != epoch {
                break;
            }

            trace!("sleepq: {:?} timed out on {:?}", td, wchan);
            slot.set(TdFlags::TIMEOUT);
            let anchor = chain.anchor_of(wchan);
            self.resume_thread(&mut chain, anchor, td, None, false);
            return;
        }

        if slot.epoch() == epoch {
            debug!("sleepq: timer of {:?} raced with a wakeup", td);
            slot.mark_raced(epoch);
        } else {
            debug!("sleepq: stale timer of {:?} ({:?}) ignored", td, epoch);
        }
    }

    fn begin_wait(&self, wchan: WaitChannel) -> Tid {
        let td = self.platform.current();
        let slot = self.slot(td);
        assert!(
            slot.flags().contains(TdFlags::ADDED),
            "sleepq: {:?} waits without add",
            td
        );
        assert!(
            slot.wchan().map_or(true, |cur| cur == wchan),
            "sleepq: {:?} waits on a foreign channel",
            td
        );
        td
    }

    fn end_wait(&self, td: Tid) {
        self.slot(td).clear(TdFlags::ADDED);
    }

    /// Blocks `td` until it is detached from `wchan`. Returns at once if that already happened.
    fn switch(&self, td: Tid, wchan: WaitChannel) {
        let slot = self.slot(td);
        let mut dispatch = self.lock_dispatch(td);

        // The waker clears the channel with our dispatch lock held, so it either already has,
        // or it will see `SLEEPING` and make us runnable.
        if slot.wchan().is_none() {
            debug!("sleepq: {:?} woken before sleeping on {:?}", td, wchan);
            return;
        }

        slot.set(TdFlags::SLEEPING);
        trace!("sleepq: {:?} blocks on {:?}", td, wchan);
        while slot.flags().contains(TdFlags::SLEEPING) {
            dispatch.block();
        }
    }

    /// Before blocking interruptibly, aborts the sleep at once if an interruption is pending.
    /// Returns `true` if it did.
    fn catch_signals(&self, td: Tid, wchan: WaitChannel) -> bool {
        let slot = self.slot(td);
        let intr = match self.platform.pending_interrupt(td) {
            Some(intr) => intr,
            None => return false,
        };

        let mut chain = self.lock_chain(wchan);
        if slot.wchan() != Some(wchan) {
            // Already woken up; the interruption stays pending for later.
            return false;
        }
        assert!(
            slot.flags().contains(TdFlags::INTERRUPTIBLE),
            "sleepq: interruptible wait on an uninterruptible sleep"
        );

        debug!("sleepq: {:?} interrupted before sleeping on {:?}", td, wchan);
        slot.set_abort(intr);
        slot.set(TdFlags::ABORTED);
        let anchor = chain.anchor_of(wchan);
        self.resume_thread(&mut chain, anchor, td, None, true);
        true
    }

    /// Finds out whether the sleep timer ended the sleep.
    fn check_timeout(&self, td: Tid) -> Result<(), WaitError> {
        let slot = self.slot(td);
        let flags = slot.take(TdFlags::TIMEOUT | TdFlags::TIMER);
        if flags.contains(TdFlags::TIMEOUT) {
            return Err(WaitError::TimedOut);
        }
        if flags.contains(TdFlags::TIMER) {
            // The waker could not cancel the timer. Its callback belongs to this sleep's epoch
            // and cannot end the next one.
            debug!(
                "sleepq: {:?} woken while its timer fires (raced: {})",
                td,
                slot.timeout_raced()
            );
        }
        Ok(())
    }

    /// Finds out whether an abort ended the sleep.
    fn check_signals(&self, td: Tid) -> Result<(), WaitError> {
        let slot = self.slot(td);
        if slot.take(TdFlags::ABORTED).contains(TdFlags::ABORTED) {
            Err(WaitError::Interrupted(slot.abort_value()))
        } else {
            Ok(())
        }
    }
}
