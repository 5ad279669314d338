//! Sleep queues.
//!
//! A sleep queue holds the threads blocked on one wait channel. Sleep queues are kept in a
//! fixed hash table of chains, indexed by a hash of the wait channel, each with its own
//! spinlock. Only wait channels that currently have sleepers are in the table.
//!
//! Sleeping is split in two steps so that callers can release their own locks in between
//! without losing a wakeup:
//! * `add` puts the current thread on the sleep queue of a wait channel. From then on, the
//!   thread is visible to every wakeup on that channel.
//! * `wait`, `wait_sig`, `timedwait` or `timedwait_sig` blocks the thread until it is woken
//!   up, its timeout expires or an interruption aborts the sleep.
//!
//! Nothing is allocated when a thread sleeps. Each thread owns one sleep queue node, and
//! lends it to the sleep queue while it sleeps; see the [`node`] module.

use core::time::Duration;

use array_macro::array;
use bitflags::bitflags;
use cfg_if::cfg_if;

use crate::{
    error::Interrupt,
    lock::{RawSpinlock, RemoteLock, Spinlock},
    param::{NCHAIN, NR_SLEEPQS, NTHREAD},
    platform::{DispatchGuard, Platform},
    thread::{check_queue, Priority, TdFlags, ThreadSlot, Tid},
    wait_channel::WaitChannel,
};

mod chain;
mod dispatch;
mod node;
mod wait;


pub use chain::Chain;
pub use node::NodeId;

use chain::ChainGuard;
use dispatch::check_lock_order;
use node::{NodeState, SleepQueueNode};

bitflags! {
    /// How a thread sleeps.
    pub struct SleepFlags: u32 {
        /// Sleeping on a condition variable.
        const CONDVAR = 0x01;
        /// Sleeping for a fixed time, with nobody to wake the thread up.
        const PAUSE = 0x02;
        /// Sleeping for a contended lock.
        const LOCK = 0x04;
        /// Mask of the sleep kind. A plain sleep has no kind bits set.
        const TYPE = 0xff;
        /// The sleep may be aborted by an interruption.
        const INTERRUPTIBLE = 0x100;
    }
}

cfg_if! {
    if #[cfg(feature = "invariants")] {
        fn set_kind(node: &mut SleepQueueNode, flags: SleepFlags) {
            node.kind = flags & SleepFlags::TYPE;
        }

        fn check_kind(node: &SleepQueueNode, flags: SleepFlags) {
            assert_eq!(
                node.kind,
                flags & SleepFlags::TYPE,
                "sleepq: mixed sleep kinds on {:?}",
                node.channel()
            );
        }
    } else {
        fn set_kind(_node: &mut SleepQueueNode, _flags: SleepFlags) {}

        fn check_kind(_node: &SleepQueueNode, _flags: SleepFlags) {}
    }
}

/// The sleep queue table.
///
/// Create it once, before any thread sleeps, and share it for the lifetime of the kernel.
/// See [`GlobalSleepQueues`](crate::GlobalSleepQueues) for a process-wide instance.
pub struct SleepQueues<P> {
    chains: [Spinlock<Chain>; NCHAIN],

    /// Node `i` is created for thread `i`, but may be held by any thread later on.
    nodes: [RemoteLock<RawSpinlock, Chain, SleepQueueNode>; NTHREAD],

    threads: [ThreadSlot; NTHREAD],

    platform: P,
}

/// Where the nodes of a sleep queue table are.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Census {
    /// Nodes linked into a chain as the anchor of a wait channel.
    pub anchors: usize,
    /// Nodes lent to an anchor.
    pub spares: usize,
    /// Nodes held by threads that are not sleeping.
    pub held: usize,
    /// Threads sleeping on some wait channel.
    pub sleepers: usize,
    /// Largest number of anchors ever linked into one chain.
    pub max_depth: usize,
}

impl<P: Platform> SleepQueues<P> {
    /// Returns a sleep queue table where no thread sleeps.
    pub fn new(platform: P) -> Self {
        Self {
            chains: array![_ => Spinlock::new("sleepq chain", Chain::new()); NCHAIN],
            nodes: array![i => RemoteLock::new(SleepQueueNode::new(Tid::new(i))); NTHREAD],
            threads: array![i => ThreadSlot::new(NodeId(i)); NTHREAD],
            platform,
        }
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    fn slot(&self, td: Tid) -> &ThreadSlot {
        &self.threads[td.index()]
    }

    /// Locks the chain `wchan` hashes to.
    fn lock_chain(&self, wchan: WaitChannel) -> ChainGuard<'_, P> {
        check_lock_order(self);
        ChainGuard::new(self, self.chains[wchan.chain_index()].lock())
    }

    /// Locks every chain, in index order.
    fn lock_all_chains(&self) -> [ChainGuard<'_, P>; NCHAIN] {
        check_lock_order(self);
        array![i => ChainGuard::new(self, self.chains[i].lock()); NCHAIN]
    }

    /// Puts the current thread on the sleep queue of `wchan`, in block list `queue`.
    ///
    /// Afterwards, every wakeup of `wchan` sees the thread, even before it blocks with one of
    /// the `wait` functions, which must follow. `flags` gives the kind of the sleep and whether
    /// it is interruptible.
    pub fn add(&self, wchan: WaitChannel, queue: usize, flags: SleepFlags) {
        check_queue(queue);
        let td = self.platform.current();
        let slot = self.slot(td);
        assert!(
            !slot.flags().contains(TdFlags::ADDED),
            "sleepq: {:?} added twice",
            td
        );
        debug_assert!(slot.wchan().is_none());

        let mut chain = self.lock_chain(wchan);
        let node = match chain.link(td).own_node.take() {
            Some(node) => node,
            None => panic!("sleepq: {:?} has no sleep queue node", td),
        };

        // The first sleeper's node becomes the anchor; everyone else lends theirs to it.
        let anchor = match chain.lookup(wchan) {
            Some(anchor) => {
                check_kind(chain.node(anchor), flags);
                chain.push_spare(anchor, node);
                anchor
            }
            None => {
                chain.link_anchor(node, wchan);
                set_kind(chain.node(node), flags);
                node
            }
        };
        chain.enqueue(anchor, queue, td);

        slot.clear(TdFlags::all());
        let mut tdflags = TdFlags::ADDED;
        if flags.contains(SleepFlags::INTERRUPTIBLE) {
            tdflags |= TdFlags::INTERRUPTIBLE;
        }
        slot.set(tdflags);
        // A timer callback reads the epoch after seeing the channel.
        let epoch = slot.next_epoch();
        slot.set_wchan(Some(wchan));
        trace!(
            "sleepq: {:?} sleeps on {:?} queue {} ({:?})",
            td,
            wchan,
            queue,
            epoch
        );
    }

    /// Arms a timeout for the current thread's sleep on `wchan`.
    ///
    /// Must be called after `add` and before `timedwait` or `timedwait_sig`.
    pub fn set_timeout(&self, wchan: WaitChannel, after: Duration) {
        let td = self.platform.current();
        let slot = self.slot(td);
        let flags = slot.flags();
        assert!(
            flags.contains(TdFlags::ADDED),
            "sleepq: timeout without add"
        );
        assert!(!flags.contains(TdFlags::TIMER), "sleepq: timeout set twice");
        assert!(
            slot.wchan().map_or(true, |cur| cur == wchan),
            "sleepq: timeout for a foreign channel"
        );

        // Set before arming, so that a wakeup racing with us sees the timer.
        slot.set(TdFlags::TIMER);
        self.platform.arm_timeout(td, slot.epoch(), after);
    }

    /// Wakes up the thread with the most favorable priority on block list `queue` of
    /// `wchan`; the earliest sleeper among equals. Returns `false` if there was none.
    ///
    /// If `pri` is given, the woken thread's priority is raised to at least `pri`.
    pub fn signal(&self, wchan: WaitChannel, queue: usize, pri: Option<Priority>) -> bool {
        check_queue(queue);
        let mut chain = self.lock_chain(wchan);
        let anchor = match chain.lookup(wchan) {
            Some(anchor) => anchor,
            None => return false,
        };
        let td = match chain.first_by_key(anchor, queue, |td| self.platform.priority(td)) {
            Some(td) => td,
            None => return false,
        };
        trace!("sleepq: signal {:?} on {:?}", td, wchan);
        self.resume_thread(&mut chain, anchor, td, pri, true);
        true
    }

    /// Wakes up every thread on block list `queue` of `wchan`. Returns how many were woken.
    ///
    /// Threads that start sleeping after this returns are not affected.
    pub fn broadcast(&self, wchan: WaitChannel, queue: usize, pri: Option<Priority>) -> usize {
        check_queue(queue);
        let mut chain = self.lock_chain(wchan);
        let anchor = match chain.lookup(wchan) {
            Some(anchor) => anchor,
            None => return 0,
        };

        let mut woken = 0;
        while let Some(td) = chain.first(anchor, queue) {
            woken += 1;
            if self.resume_thread(&mut chain, anchor, td, pri, true) {
                break;
            }
        }
        trace!("sleepq: broadcast {:?} woke {}", wchan, woken);
        woken
    }

    /// Wakes up `td` if it sleeps on `wchan`, regardless of its priority.
    /// Returns `false` if it did not.
    pub fn remove(&self, td: Tid, wchan: WaitChannel) -> bool {
        let slot = self.slot(td);
        let mut chain = self.lock_chain(wchan);
        if slot.wchan() != Some(wchan) {
            return false;
        }
        trace!("sleepq: remove {:?} from {:?}", td, wchan);
        let anchor = chain.anchor_of(wchan);
        self.resume_thread(&mut chain, anchor, td, None, true);
        true
    }

    /// Aborts the interruptible sleep of `td`, which then returns `Interrupted(intr)`.
    ///
    /// Does nothing, and returns `false`, if `td` is not sleeping, its sleep is not
    /// interruptible, or its timeout has already expired.
    pub fn abort(&self, td: Tid, intr: Interrupt) -> bool {
        let slot = self.slot(td);
        loop {
            let wchan = match slot.wchan() {
                Some(wchan) => wchan,
                None => return false,
            };
            let mut chain = self.lock_chain(wchan);
            if slot.wchan() != Some(wchan) {
                continue;
            }

            let flags = slot.flags();
            if !flags.contains(TdFlags::INTERRUPTIBLE) {
                return false;
            }
            if flags.contains(TdFlags::TIMEOUT) {
                debug!("sleepq: timeout of {:?} wins over abort", td);
                return false;
            }

            trace!("sleepq: abort {:?} on {:?} with {:?}", td, wchan, intr);
            slot.set_abort(intr);
            slot.set(TdFlags::ABORTED);
            let anchor = chain.anchor_of(wchan);
            self.resume_thread(&mut chain, anchor, td, None, true);
            return true;
        }
    }

    /// Returns the number of threads sleeping on block list `queue` of `wchan`.
    pub fn sleepcnt(&self, wchan: WaitChannel, queue: usize) -> usize {
        check_queue(queue);
        let mut chain = self.lock_chain(wchan);
        match chain.lookup(wchan) {
            Some(anchor) => chain.node(anchor).lists[queue].len,
            None => 0,
        }
    }

    /// Wakes up every sleeping thread for which `matches` holds. Returns how many were woken.
    ///
    /// `matches` is called with chain locks held and must not block.
    pub fn remove_matching(&self, mut matches: impl FnMut(Tid) -> bool) -> usize {
        let mut woken = 0;
        for lock in self.chains.iter() {
            check_lock_order(self);
            let mut chain = ChainGuard::new(self, lock.lock());
            let mut anchors = chain.anchors();
            while let Some(anchor) = anchors.next(&mut chain) {
                'queues: for queue in 0..NR_SLEEPQS {
                    let mut cur = chain.first(anchor, queue);
                    while let Some(td) = cur {
                        cur = chain.link(td).next;
                        if !matches(td) {
                            continue;
                        }
                        woken += 1;
                        if self.resume_thread(&mut chain, anchor, td, None, true) {
                            break 'queues;
                        }
                    }
                }
            }
        }
        woken
    }

    /// Detaches `td` from `anchor`, hands it a node back and makes it runnable if it blocked.
    /// If `cancel_timer`, also tries to cancel its sleep timer.
    ///
    /// Returns `true` if `anchor` itself was handed to `td`. The caller must not touch
    /// `anchor` afterwards.
    fn resume_thread(
        &self,
        chain: &mut ChainGuard<'_, P>,
        anchor: NodeId,
        td: Tid,
        pri: Option<Priority>,
        cancel_timer: bool,
    ) -> bool {
        let slot = self.slot(td);
        chain.dequeue(anchor, td);
        let released = chain.reclaim(anchor, td);

        // If the callback already started, it finds the thread gone and leaves it alone.
        if cancel_timer
            && slot.flags().contains(TdFlags::TIMER)
            && self.platform.cancel_timeout(td)
        {
            slot.clear(TdFlags::TIMER);
        }

        let mut dispatch = self.lock_dispatch(td);
        slot.clear(TdFlags::INTERRUPTIBLE);
        slot.set_wchan(None);
        if let Some(pri) = pri {
            if pri < self.platform.priority(td) {
                dispatch.lend_priority(pri);
            }
        }
        if slot.take(TdFlags::SLEEPING).contains(TdFlags::SLEEPING) {
            dispatch.set_runnable();
        }
        released
    }

    /// Locks every chain and counts where the nodes are.
    pub fn census(&self) -> Census {
        let mut chains = self.lock_all_chains();
        let mut census = Census::default();

        for chain in chains.iter() {
            census.max_depth = census.max_depth.max(chain.chain().max_depth());
        }
        // With every chain locked, no node can change, so any guard may read any node.
        let chain = &mut chains[0];
        for i in 0..NTHREAD {
            let node = chain.node(NodeId(i));
            match node.state {
                NodeState::Held(_) => census.held += 1,
                NodeState::Linked(_) => {
                    census.anchors += 1;
                    census.sleepers += node.blocked();
                }
                NodeState::Spare(_) => census.spares += 1,
            }
        }
        census
    }

    /// Locks every chain and checks the consistency of the whole table. Panics if it is broken.
    pub fn check_invariants(&self) {
        let mut chains = self.lock_all_chains();

        let mut linked = 0;
        for (index, chain) in chains.iter_mut().enumerate() {
            let mut depth = 0;
            let mut anchors = chain.anchors();
            while let Some(anchor) = anchors.next(chain) {
                depth += 1;
                linked += 1;
                let wchan = match chain.node(anchor).channel() {
                    Some(wchan) => wchan,
                    None => panic!("sleepq: linked node {:?} without channel", anchor),
                };
                assert_eq!(wchan.chain_index(), index, "sleepq: anchor in wrong chain");
                assert_eq!(chain.lookup(wchan), Some(anchor), "sleepq: duplicate anchor");

                let mut spares = 0;
                let mut cur = chain.node(anchor).spares;
                while let Some(spare) = cur {
                    assert_eq!(chain.node(spare).state, NodeState::Spare(anchor));
                    spares += 1;
                    cur = chain.node(spare).next;
                }
                assert_eq!(
                    spares + 1,
                    chain.node(anchor).blocked(),
                    "sleepq: spare count of {:?}",
                    wchan
                );

                for queue in 0..NR_SLEEPQS {
                    let mut len = 0;
                    let mut cur = chain.first(anchor, queue);
                    while let Some(td) = cur {
                        len += 1;
                        assert_eq!(self.slot(td).wchan(), Some(wchan));
                        let link = chain.link(td);
                        assert_eq!(link.queue, queue);
                        assert!(link.own_node.is_none(), "sleepq: sleeper holds a node");
                        cur = link.next;
                    }
                    assert_eq!(len, chain.node(anchor).lists[queue].len);
                }
            }
            assert_eq!(depth, chain.chain().depth(), "sleepq: chain depth");
        }

        // With every chain locked, no node can change, so any guard may read any node.
        let chain = &mut chains[0];
        let mut anchors = 0;
        let mut spares = 0;
        let mut held = 0;
        for i in 0..NTHREAD {
            let id = NodeId(i);
            match chain.node(id).state {
                NodeState::Held(td) => {
                    held += 1;
                    assert_eq!(chain.link(td).own_node, Some(id), "sleepq: node lost");
                    assert!(self.slot(td).wchan().is_none(), "sleepq: sleeper holds a node");
                }
                NodeState::Linked(_) => anchors += 1,
                NodeState::Spare(_) => spares += 1,
            }
        }
        assert_eq!(anchors, linked, "sleepq: unlinked anchor");
        assert_eq!(anchors + spares + held, NTHREAD, "sleepq: node count");
    }
}
