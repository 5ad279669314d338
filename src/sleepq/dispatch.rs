//! Dispatch locks as taken by the sleep queues.
//!
//! With the `invariants` feature, the calling thread is marked while it holds a dispatch lock,
//! and taking a chain lock with the mark set panics.

use core::ops::{Deref, DerefMut};

use cfg_if::cfg_if;

use crate::platform::Platform;
use crate::thread::Tid;

use super::SleepQueues;

cfg_if! {
    if #[cfg(feature = "invariants")] {
        use crate::thread::ThreadSlot;

        /// Marks the calling thread as holding a dispatch lock while alive.
        struct DispatchHeld<'s>(&'s ThreadSlot);

        fn enter_dispatch<P: Platform>(queues: &SleepQueues<P>) -> DispatchHeld<'_> {
            let caller = queues.slot(queues.platform.current());
            caller.enter_dispatch();
            DispatchHeld(caller)
        }

        impl Drop for DispatchHeld<'_> {
            fn drop(&mut self) {
                self.0.leave_dispatch();
            }
        }

        pub(super) fn check_lock_order<P: Platform>(queues: &SleepQueues<P>) {
            assert!(
                !queues.slot(queues.platform.current()).in_dispatch(),
                "sleepq: chain lock taken while holding a dispatch lock"
            );
        }
    } else {
        use core::marker::PhantomData;

        struct DispatchHeld<'s>(PhantomData<&'s ()>);

        fn enter_dispatch<P: Platform>(_queues: &SleepQueues<P>) -> DispatchHeld<'_> {
            DispatchHeld(PhantomData)
        }

        pub(super) fn check_lock_order<P: Platform>(_queues: &SleepQueues<P>) {}
    }
}

/// A held dispatch lock.
pub(super) struct DispatchLock<'s, P: Platform + 's> {
    guard: P::Dispatch<'s>,
    // Dropped after `guard`.
    _held: DispatchHeld<'s>,
}

impl<P: Platform> SleepQueues<P> {
    /// Acquires the dispatch lock of `td`.
    pub(super) fn lock_dispatch(&self, td: Tid) -> DispatchLock<'_, P> {
        let held = enter_dispatch(self);
        DispatchLock {
            guard: self.platform.lock_dispatch(td),
            _held: held,
        }
    }
}

impl<'s, P: Platform> Deref for DispatchLock<'s, P> {
    type Target = P::Dispatch<'s>;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl<P: Platform> DerefMut for DispatchLock<'_, P> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}
