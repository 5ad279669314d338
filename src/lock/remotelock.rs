use core::{cell::UnsafeCell, marker::PhantomData};

use super::{Guard, Lock, RawLock};

/// `RemoteLock<R, U, T>` is similar to `Lock<R, T>`, but uses a lock that lives elsewhere.
/// To access its inner data, a guard of some `Lock<R, U>` is required.
/// Which `Lock<R, U>` protects the data is not fixed by the type: the caller picks it,
/// following the protocol of the data structure that owns the `RemoteLock`.
/// See the [lock](`super`) module documentation for details.
///
/// # Note
///
/// To dereference the inner data, use `RemoteLock::get_mut_unchecked`.
#[repr(transparent)]
pub struct RemoteLock<R: RawLock, U, T> {
    data: UnsafeCell<T>,
    _marker: PhantomData<*const Lock<R, U>>,
}

unsafe impl<R: RawLock, U: Send, T: Send> Sync for RemoteLock<R, U, T> {}
unsafe impl<R: RawLock, U: Send, T: Send> Send for RemoteLock<R, U, T> {}

impl<R: RawLock, U, T> RemoteLock<R, U, T> {
    /// Returns a `RemoteLock` that protects `data`.
    pub const fn new(data: T) -> Self {
        Self {
            data: UnsafeCell::new(data),
            _marker: PhantomData,
        }
    }

    /// Returns a raw pointer to the inner data, for inspection in tests.
    /// The returned pointer is valid until this `RemoteLock` is moved or dropped.
    /// The caller must ensure that accessing the pointer does not incur race.
    #[cfg(test)]
    pub(crate) fn get_mut_raw(&self) -> *mut T {
        self.data.get()
    }

    /// Returns a mutable reference to the inner data.
    ///
    /// # Safety
    ///
    /// The provided `guard` must be from the `Lock` that currently protects this `RemoteLock`,
    /// and no other reference to the inner data may be alive.
    pub unsafe fn get_mut_unchecked<'t>(&'t self, _guard: &'t mut Guard<'_, R, U>) -> &'t mut T {
        unsafe { &mut *self.data.get() }
    }
}
