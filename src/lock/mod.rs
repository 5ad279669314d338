//! The lock module.
//!
//! Contains types that provide mutual exclusion for the sleep queue table.
//!
//! # Spinlocks
//! Every sleep queue chain is a [`Spinlock`]. Critical sections are short and never block,
//! so waiting for a chain lock is always a busy wait.
//!
//! # RemoteLock
//! [`RemoteLock`] owns its data but does not have its own raw lock.
//! Instead, its data is protected by the lock of some [`Lock`] that lives elsewhere.
//! Sleep queue nodes and thread links are `RemoteLock`s: which chain lock protects them
//! changes over time, depending on the wait channel they currently belong to.

use core::cell::UnsafeCell;
use core::marker::PhantomData;
use core::ops::{Deref, DerefMut};

mod remotelock;
mod spinlock;

pub use remotelock::RemoteLock;
pub use spinlock::{RawSpinlock, Spinlock, SpinlockGuard};

pub trait RawLock {
    /// Acquires the lock.
    fn acquire(&self);
    /// Releases the lock.
    fn release(&self);
    /// Check whether the lock is held.
    fn holding(&self) -> bool;
}

/// Locks that provide mutual exclusion and has its own `RawLock`.
pub struct Lock<R: RawLock, T> {
    lock: R,
    data: UnsafeCell<T>,
}

unsafe impl<R: RawLock + Sync, T: Send> Sync for Lock<R, T> {}

/// Guards that guarantee exclusive mutable access to the lock's inner data.
pub struct Guard<'s, R: RawLock, T> {
    lock: &'s Lock<R, T>,
    _marker: PhantomData<*const ()>,
}

// Do not implement Send; lock must be unlocked by the thread that acquired it.
unsafe impl<'s, R: RawLock + Sync, T: Sync> Sync for Guard<'s, R, T> {}

impl<R: RawLock, T> Lock<R, T> {
    /// Acquires the lock and returns the lock guard.
    pub fn lock(&self) -> Guard<'_, R, T> {
        self.lock.acquire();

        Guard {
            lock: self,
            _marker: PhantomData,
        }
    }

    /// Consumes the lock and returns the inner data.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }

    /// Check whether the lock is held.
    pub fn holding(&self) -> bool {
        self.lock.holding()
    }
}

impl<'s, R: RawLock, T> Guard<'s, R, T> {
    /// Temporarily releases the lock and calls function `f`.
    /// After `f` returns, reacquires the lock and returns the result of the function call.
    /// The lock is reacquired even if `f` unwinds.
    pub fn reacquire_after<F, U>(&mut self, f: F) -> U
    where
        F: FnOnce() -> U,
    {
        let lock = self.lock;
        lock.lock.release();
        let _reacquire = scopeguard::guard(lock, |lock| lock.lock.acquire());
        f()
    }
}

impl<R: RawLock, T> Drop for Guard<'_, R, T> {
    fn drop(&mut self) {
        self.lock.lock.release();
    }
}

impl<R: RawLock, T> Deref for Guard<'_, R, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        unsafe { &*self.lock.data.get() }
    }
}

impl<R: RawLock, T> DerefMut for Guard<'_, R, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { &mut *self.lock.data.get() }
    }
}
