use core::sync::atomic::{AtomicU32, AtomicU8, AtomicUsize, Ordering};

use bitflags::bitflags;

use crate::{
    error::Interrupt,
    lock::{RawSpinlock, RemoteLock},
    param::{NR_SLEEPQS, NTHREAD},
    sleepq::{Chain, NodeId},
    wait_channel::WaitChannel,
};

/// Scheduling priority. Lower values are more favorable.
pub type Priority = u8;

/// Thread ID: the index of the thread's slot in the sleep queue table.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Tid(usize);

impl Tid {
    pub const fn new(index: usize) -> Self {
        assert!(index < NTHREAD, "sleepq: thread index out of range");
        Self(index)
    }

    pub const fn index(self) -> usize {
        self.0
    }
}

/// Identifies one sleep of a thread, from `add` until its `wait*` returns.
///
/// The sleep timer is armed with the epoch of the sleep it belongs to, and its callback hands
/// the epoch back, so that a late callback cannot end a later sleep.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Epoch(usize);

bitflags! {
    /// Wait state of a thread.
    pub(crate) struct TdFlags: u32 {
        /// The sleep may be aborted by an interruption.
        const INTERRUPTIBLE = 1 << 0;
        /// `add` was called and the matching `wait*` has not returned yet.
        const ADDED = 1 << 1;
        /// The thread is blocked in the scheduler, or about to be.
        const SLEEPING = 1 << 2;
        /// The sleep timer is armed and has not been cancelled.
        const TIMER = 1 << 3;
        /// The sleep timer expired and detached the thread.
        const TIMEOUT = 1 << 4;
        /// An interruption aborted the sleep.
        const ABORTED = 1 << 5;
    }
}

/// Linkage of a thread into a block list.
///
/// While the thread sits on a sleep queue, this is protected by the lock of the chain its
/// wait channel hashes to. Otherwise, only the thread itself touches it.
pub(crate) struct WaitLink {
    /// Which block list of the anchor the thread is in.
    pub queue: usize,
    pub prev: Option<Tid>,
    pub next: Option<Tid>,
    /// The node this thread holds, or `None` while it is lent to a sleep queue.
    pub own_node: Option<NodeId>,
}

/// Per-thread record of the sleep queue table.
pub(crate) struct ThreadSlot {
    pub link: RemoteLock<RawSpinlock, Chain, WaitLink>,

    /// The wait channel the thread is queued on, or 0.
    /// Changes to and from a channel happen with that channel's chain lock held; clearing it
    /// also happens with the thread's dispatch lock held.
    wchan: AtomicUsize,

    flags: AtomicU32,

    /// The `Interrupt` recorded by an abort.
    abort: AtomicU8,

    /// Epoch of the current or last sleep. Advances in `add`, with the chain lock held.
    epoch: AtomicUsize,

    /// Latest epoch whose timer fired after the thread had already been woken.
    raced: AtomicUsize,

    /// Number of dispatch locks the thread holds inside the sleep queues.
    #[cfg(feature = "invariants")]
    dispatch_held: AtomicUsize,
}

impl ThreadSlot {
    pub fn new(node: NodeId) -> Self {
        Self {
            link: RemoteLock::new(WaitLink {
                queue: 0,
                prev: None,
                next: None,
                own_node: Some(node),
            }),
            wchan: AtomicUsize::new(0),
            flags: AtomicU32::new(0),
            abort: AtomicU8::new(0),
            epoch: AtomicUsize::new(0),
            raced: AtomicUsize::new(0),
            #[cfg(feature = "invariants")]
            dispatch_held: AtomicUsize::new(0),
        }
    }

    pub fn wchan(&self) -> Option<WaitChannel> {
        WaitChannel::from_raw(self.wchan.load(Ordering::Acquire))
    }

    pub fn set_wchan(&self, wchan: Option<WaitChannel>) {
        self.wchan
            .store(wchan.map_or(0, WaitChannel::as_raw), Ordering::Release);
    }

    pub fn flags(&self) -> TdFlags {
        TdFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }

    pub fn set(&self, flags: TdFlags) {
        self.flags.fetch_or(flags.bits(), Ordering::AcqRel);
    }

    pub fn clear(&self, flags: TdFlags) {
        self.flags.fetch_and(!flags.bits(), Ordering::AcqRel);
    }

    /// Clears `flags` and returns which of them were set.
    pub fn take(&self, flags: TdFlags) -> TdFlags {
        let old = self.flags.fetch_and(!flags.bits(), Ordering::AcqRel);
        TdFlags::from_bits_truncate(old) & flags
    }

    pub fn set_abort(&self, intr: Interrupt) {
        self.abort.store(intr as u8, Ordering::Release);
    }

    pub fn abort_value(&self) -> Interrupt {
        Interrupt::from_raw(self.abort.load(Ordering::Acquire)).unwrap_or(Interrupt::Abort)
    }

    pub fn epoch(&self) -> Epoch {
        Epoch(self.epoch.load(Ordering::Acquire))
    }

    /// Starts a new sleep and returns its epoch.
    pub fn next_epoch(&self) -> Epoch {
        Epoch(self.epoch.fetch_add(1, Ordering::AcqRel).wrapping_add(1))
    }

    /// Records that the timer of sleep `epoch` fired too late to end it.
    pub fn mark_raced(&self, epoch: Epoch) {
        self.raced.fetch_max(epoch.0, Ordering::AcqRel);
    }

    /// Whether the timer of the current sleep fired after the thread was woken.
    pub fn timeout_raced(&self) -> bool {
        self.raced.load(Ordering::Acquire) == self.epoch.load(Ordering::Acquire)
    }

    #[cfg(feature = "invariants")]
    pub fn enter_dispatch(&self) {
        self.dispatch_held.fetch_add(1, Ordering::Relaxed);
    }

    #[cfg(feature = "invariants")]
    pub fn leave_dispatch(&self) {
        self.dispatch_held.fetch_sub(1, Ordering::Relaxed);
    }

    #[cfg(feature = "invariants")]
    pub fn in_dispatch(&self) -> bool {
        self.dispatch_held.load(Ordering::Relaxed) != 0
    }
}

pub(crate) fn check_queue(queue: usize) {
    assert!(queue < NR_SLEEPQS, "sleepq: queue class {} out of range", queue);
}
