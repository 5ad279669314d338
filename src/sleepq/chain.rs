//! Sleep queue chains: the buckets of the sleep queue table.
//!
//! A chain is a spinlock over the list of anchors whose wait channels hash to it. Holding a
//! chain's lock grants access to:
//! * the anchors linked into the chain, and the nodes on their spare lists, and
//! * the `WaitLink` of every thread sleeping on one of those anchors.
//!
//! A thread that is not sleeping owns its node and its `WaitLink`, and hands them over to a
//! chain while holding that chain's lock.

use crate::{
    lock::SpinlockGuard,
    thread::{check_queue, Tid, WaitLink},
    wait_channel::WaitChannel,
};

use super::{
    node::{NodeId, NodeState, SleepQueueNode},
    SleepQueues,
};

/// The contents of a chain's lock.
pub struct Chain {
    /// First anchor linked into this chain.
    head: Option<NodeId>,

    /// Number of anchors linked into this chain.
    depth: usize,

    /// Largest `depth` ever observed.
    max_depth: usize,
}

impl Chain {
    pub(crate) const fn new() -> Self {
        Self {
            head: None,
            depth: 0,
            max_depth: 0,
        }
    }

    pub(crate) fn depth(&self) -> usize {
        self.depth
    }

    pub(crate) fn max_depth(&self) -> usize {
        self.max_depth
    }
}

/// A locked chain of the table.
///
/// # Safety
///
/// `node` and `link` may only be called for nodes and threads the chain lock protects, per
/// the module documentation.
pub(crate) struct ChainGuard<'s, P> {
    queues: &'s SleepQueues<P>,
    guard: SpinlockGuard<'s, Chain>,
}

impl<'s, P> ChainGuard<'s, P> {
    pub fn new(queues: &'s SleepQueues<P>, guard: SpinlockGuard<'s, Chain>) -> Self {
        Self { queues, guard }
    }

    pub fn chain(&self) -> &Chain {
        &self.guard
    }

    /// Returns the node `id`.
    pub fn node(&mut self, id: NodeId) -> &mut SleepQueueNode {
        // SAFETY: `id` is protected by this chain; see the type documentation.
        unsafe { self.queues.nodes[id.0].get_mut_unchecked(&mut self.guard) }
    }

    /// Returns the `WaitLink` of thread `td`.
    pub fn link(&mut self, td: Tid) -> &mut WaitLink {
        // SAFETY: `td` is protected by this chain; see the type documentation.
        unsafe {
            self.queues.threads[td.index()]
                .link
                .get_mut_unchecked(&mut self.guard)
        }
    }

    /// Returns the anchor of `wchan`, if some thread sleeps on it.
    pub fn lookup(&mut self, wchan: WaitChannel) -> Option<NodeId> {
        let mut cur = self.guard.head;
        while let Some(id) = cur {
            let node = self.node(id);
            if node.channel() == Some(wchan) {
                return Some(id);
            }
            cur = node.next;
        }
        None
    }

    /// Returns the anchor of `wchan`, which must have a sleeper.
    pub fn anchor_of(&mut self, wchan: WaitChannel) -> NodeId {
        match self.lookup(wchan) {
            Some(anchor) => anchor,
            None => panic!("sleepq: {:?} has sleepers but no anchor", wchan),
        }
    }

    /// Makes the free node `id` the anchor of `wchan` and links it into this chain.
    pub fn link_anchor(&mut self, id: NodeId, wchan: WaitChannel) {
        let head = self.guard.head;
        let node = self.node(id);
        assert!(node.is_empty(), "sleepq: anchoring a busy node");
        node.state = NodeState::Linked(wchan);
        node.spares = None;
        node.next = head;

        let chain = &mut *self.guard;
        chain.head = Some(id);
        chain.depth += 1;
        chain.max_depth = chain.max_depth.max(chain.depth);
    }

    /// Unlinks the anchor `id` from this chain. Its channel becomes unassigned.
    fn unlink_anchor(&mut self, id: NodeId) {
        let next = self.node(id).next;
        let mut prev = None;
        let mut cur = self.guard.head;
        while let Some(cur_id) = cur {
            if cur_id == id {
                break;
            }
            prev = Some(cur_id);
            cur = self.node(cur_id).next;
        }
        assert_eq!(cur, Some(id), "sleepq: unlinking a foreign anchor");

        match prev {
            Some(prev) => self.node(prev).next = next,
            None => self.guard.head = next,
        }
        self.guard.depth -= 1;

        let node = self.node(id);
        node.next = None;
        node.spares = None;
    }

    /// Lends the node `id` to `anchor`.
    pub fn push_spare(&mut self, anchor: NodeId, id: NodeId) {
        let spares = self.node(anchor).spares;
        let node = self.node(id);
        node.state = NodeState::Spare(anchor);
        node.next = spares;
        self.node(anchor).spares = Some(id);
    }

    /// Takes back a node for a thread leaving `anchor`, and hands it to `td`.
    ///
    /// If `td` was the last sleeper, the anchor itself is unlinked and handed over.
    /// Returns `true` in that case: the caller must not touch `anchor` anymore.
    pub fn reclaim(&mut self, anchor: NodeId, td: Tid) -> bool {
        let (id, released) = match self.node(anchor).spares {
            Some(spare) => {
                let next = self.node(spare).next;
                self.node(anchor).spares = next;
                (spare, false)
            }
            None => {
                assert!(
                    self.node(anchor).is_empty(),
                    "sleepq: sleepers left without spare nodes"
                );
                self.unlink_anchor(anchor);
                (anchor, true)
            }
        };

        let node = self.node(id);
        node.state = NodeState::Held(td);
        node.next = None;
        self.link(td).own_node = Some(id);
        released
    }

    /// Appends `td` to block list `queue` of `anchor`.
    pub fn enqueue(&mut self, anchor: NodeId, queue: usize, td: Tid) {
        check_queue(queue);
        let tail = self.node(anchor).lists[queue].tail;
        {
            let link = self.link(td);
            link.queue = queue;
            link.prev = tail;
            link.next = None;
        }
        match tail {
            Some(tail) => self.link(tail).next = Some(td),
            None => self.node(anchor).lists[queue].head = Some(td),
        }
        let list = &mut self.node(anchor).lists[queue];
        list.tail = Some(td);
        list.len += 1;
    }

    /// Removes `td` from the block list of `anchor` it is in.
    pub fn dequeue(&mut self, anchor: NodeId, td: Tid) {
        let (queue, prev, next) = {
            let link = self.link(td);
            let entry = (link.queue, link.prev, link.next);
            link.prev = None;
            link.next = None;
            entry
        };
        match prev {
            Some(prev) => self.link(prev).next = next,
            None => self.node(anchor).lists[queue].head = next,
        }
        match next {
            Some(next) => self.link(next).prev = prev,
            None => self.node(anchor).lists[queue].tail = prev,
        }
        self.node(anchor).lists[queue].len -= 1;
    }

    /// Returns the first thread of block list `queue` of `anchor`.
    pub fn first(&mut self, anchor: NodeId, queue: usize) -> Option<Tid> {
        check_queue(queue);
        self.node(anchor).lists[queue].head
    }

    /// Returns the thread of block list `queue` of `anchor` that comes first by `key`.
    /// Among threads with equal keys, the one that was queued first wins.
    pub fn first_by_key<K: Ord>(
        &mut self,
        anchor: NodeId,
        queue: usize,
        mut key: impl FnMut(Tid) -> K,
    ) -> Option<Tid> {
        let mut best: Option<(Tid, K)> = None;
        let mut cur = self.first(anchor, queue);
        while let Some(td) = cur {
            let k = key(td);
            if best.as_ref().map_or(true, |(_, best_k)| k < *best_k) {
                best = Some((td, k));
            }
            cur = self.link(td).next;
        }
        best.map(|(td, _)| td)
    }

    /// Returns the anchors linked into this chain.
    pub fn anchors(&mut self) -> AnchorIter {
        AnchorIter {
            cur: self.guard.head,
        }
    }
}

/// A cursor over the anchors of a chain. Advance it with `ChainGuard`s of the same chain.
pub(crate) struct AnchorIter {
    cur: Option<NodeId>,
}

impl AnchorIter {
    pub fn next<P>(&mut self, chain: &mut ChainGuard<'_, P>) -> Option<NodeId> {
        let id = self.cur?;
        self.cur = chain.node(id).next;
        Some(id)
    }
}
