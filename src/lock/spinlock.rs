use core::cell::UnsafeCell;
use core::hint;
use core::sync::atomic::{AtomicBool, Ordering};

use super::{Guard, Lock, RawLock};

/// Mutual exclusion lock.
pub struct RawSpinlock {
    /// Is the lock held?
    locked: AtomicBool,

    /// Name of lock, for debugging.
    name: &'static str,
}

/// Locks that busy wait until the lock is released.
pub type Spinlock<T> = Lock<RawSpinlock, T>;
/// Guards of `Spinlock<T>`.
pub type SpinlockGuard<'s, T> = Guard<'s, RawSpinlock, T>;

impl RawSpinlock {
    /// Mutual exclusion spin locks.
    pub const fn new(name: &'static str) -> Self {
        Self {
            locked: AtomicBool::new(false),
            name,
        }
    }
}

impl RawLock for RawSpinlock {
    /// Acquires the lock.
    /// Loops (spins) until the lock is acquired.
    fn acquire(&self) {
        // The `Acquire` ordering keeps loads and stores of the critical section from moving
        // above this point, so they happen strictly after the lock is acquired.
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            // Spin on a plain load to keep the cache line shared while the lock is held.
            while self.locked.load(Ordering::Relaxed) {
                hint::spin_loop();
            }
        }
    }

    /// Releases the lock.
    fn release(&self) {
        assert!(self.holding(), "release {}", self.name);

        // All stores in the critical section become visible to other threads before the
        // lock is seen as released.
        self.locked.store(false, Ordering::Release);
    }

    /// Check whether the lock is held.
    fn holding(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }
}

impl<T> Spinlock<T> {
    /// Returns a new `Spinlock` with name `name` and data `data`.
    pub const fn new(name: &'static str, data: T) -> Self {
        Self {
            lock: RawSpinlock::new(name),
            data: UnsafeCell::new(data),
        }
    }
}
