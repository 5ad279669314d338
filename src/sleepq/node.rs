//! Sleep queue nodes.
//!
//! Every thread owns one node, created with the thread. A node is always in exactly one of
//! three places:
//! * held by a thread that is not sleeping,
//! * linked into a chain as the anchor of a wait channel, or
//! * on the spare list of an anchor, lent by a thread sleeping on that channel.
//!
//! When a thread sleeps on a channel nobody else sleeps on, its node becomes the anchor.
//! Otherwise, it lends its node to the anchor. When a thread wakes up, it takes back some
//! node, not necessarily the one it lent: the anchor itself if it was the last sleeper,
//! otherwise a spare.

use crate::{param::NR_SLEEPQS, thread::Tid, wait_channel::WaitChannel};

#[cfg(feature = "invariants")]
use super::SleepFlags;

/// Index of a node in the node arena.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct NodeId(pub(crate) usize);

/// Where a node is.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum NodeState {
    /// Held by a thread that can use it for its next sleep.
    Held(Tid),
    /// Linked into a chain as the anchor of a wait channel.
    Linked(WaitChannel),
    /// On the spare list of the given anchor.
    Spare(NodeId),
}

/// A FIFO list of sleeping threads, linked through their `WaitLink`s.
#[derive(Clone, Copy, Default, Debug)]
pub(crate) struct BlockList {
    pub head: Option<Tid>,
    pub tail: Option<Tid>,
    pub len: usize,
}

pub(crate) struct SleepQueueNode {
    pub state: NodeState,

    /// Threads blocked on this channel, one list per queue class.
    pub lists: [BlockList; NR_SLEEPQS],

    /// Nodes lent by the other threads sleeping on this channel.
    pub spares: Option<NodeId>,

    /// Next anchor in the chain while linked; next spare while on a spare list.
    pub next: Option<NodeId>,

    /// Sleep kind shared by all sleepers on this channel.
    #[cfg(feature = "invariants")]
    pub kind: SleepFlags,
}

impl SleepQueueNode {
    pub const fn new(holder: Tid) -> Self {
        Self {
            state: NodeState::Held(holder),
            lists: [BlockList {
                head: None,
                tail: None,
                len: 0,
            }; NR_SLEEPQS],
            spares: None,
            next: None,
            #[cfg(feature = "invariants")]
            kind: SleepFlags::empty(),
        }
    }

    /// The channel this node represents. Assigned iff the node is linked into a chain.
    pub fn channel(&self) -> Option<WaitChannel> {
        match self.state {
            NodeState::Linked(wchan) => Some(wchan),
            _ => None,
        }
    }

    /// Number of threads sleeping on this node, over all queue classes.
    pub fn blocked(&self) -> usize {
        self.lists.iter().map(|list| list.len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.lists.iter().all(|list| list.head.is_none())
    }
}
