use core::fmt;
use core::num::NonZeroUsize;

use crate::param::{SC_MASK, SC_SHIFT};

/// An opaque identity naming a condition that threads sleep on.
///
/// A wait channel is usually the address of the object being waited for. The sleep queues
/// never dereference it; two channels are the same iff their values are equal.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct WaitChannel(NonZeroUsize);

impl WaitChannel {
    /// Returns the wait channel named by the address of `obj`.
    ///
    /// `T` must not be zero-sized. Otherwise, distinct objects may share an address and
    /// spuriously wake up each other's sleepers.
    pub fn of<T>(obj: &T) -> Self {
        assert!(
            core::mem::size_of::<T>() != 0,
            "sleepq: zero-sized wait channel"
        );
        match Self::from_raw(obj as *const T as usize) {
            Some(wchan) => wchan,
            None => panic!("sleepq: null wait channel"),
        }
    }

    /// Returns the wait channel with value `raw`, or `None` if `raw` is zero.
    pub const fn from_raw(raw: usize) -> Option<Self> {
        match NonZeroUsize::new(raw) {
            Some(raw) => Some(Self(raw)),
            None => None,
        }
    }

    /// Returns the value of this wait channel.
    pub const fn as_raw(self) -> usize {
        self.0.get()
    }

    /// Returns the index of the chain this wait channel hashes to.
    pub(crate) fn chain_index(self) -> usize {
        let raw = self.as_raw();
        ((raw >> SC_SHIFT) ^ raw) & SC_MASK
    }
}

impl fmt::Debug for WaitChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WaitChannel({:#x})", self.as_raw())
    }
}
