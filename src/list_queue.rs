//! Unbounded Michael–Scott queue with versioned links
//!
//! The list always starts with a sentinel: `head` names the node whose
//! payload has already been consumed (or never existed), and the elements
//! present are the payloads of the nodes after it, up to `tail`.
//!
//! Every node is released twice before its slot is reused: once by the
//! consumer that takes its payload, and once by the consumer that moves `head`
//! past it. Until then it cannot be recycled, which is what lets a consumer
//! read the payload after its head CAS even while other consumers keep
//! advancing `head` behind it.
//!
//! A reference to a node is tagged with the node's generation, which changes
//! on every reuse. `tail` holds generation-tagged references and `head` holds
//! them upgraded by one, so neither can ever show an earlier incarnation of a
//! node again. The confirm re-reads in `push` and `pop` rely on this: if the
//! value is unchanged, the node read in between was not recycled.

use std::fmt;

use crossbeam_utils::CachePadded;

use crate::arena::NodeArena;
use crate::common::{ordering, ConcurrentQueue};
use crate::error::Full;
use crate::node::{DATA_NODE_REFS, SENTINEL_REFS};
use crate::tagged::AtomicTaggedPtr;

/// Initial version of the tail link; head and tail count independently.
const TAIL_INITIAL_VERSION: u32 = 0x7fff;

/// An unbounded lock-free multi-producer multi-consumer queue
///
/// `push` never fails and `pop` never blocks: an empty queue is reported as
/// `None`.
///
/// ```
/// use lockfree_queue_rs::ListQueue;
///
/// let queue = ListQueue::new();
/// queue.push(1);
/// queue.push(2);
/// assert_eq!(queue.pop(), Some(1));
/// assert_eq!(queue.pop(), Some(2));
/// assert_eq!(queue.pop(), None);
/// ```
pub struct ListQueue<T> {
    head: CachePadded<AtomicTaggedPtr>,
    tail: CachePadded<AtomicTaggedPtr>,
    arena: NodeArena<T>,
}

// Safety: payloads are moved between threads but never shared; all other
// state is atomic.
unsafe impl<T: Send> Send for ListQueue<T> {}
unsafe impl<T: Send> Sync for ListQueue<T> {}

impl<T> ListQueue<T> {
    /// Creates an empty queue holding only the sentinel node
    pub fn new() -> Self {
        let arena = NodeArena::new();
        let sentinel = arena.allocate();
        arena.node(sentinel.address()).set_refs(SENTINEL_REFS);

        Self {
            head: CachePadded::new(AtomicTaggedPtr::new(sentinel.with_version(0))),
            tail: CachePadded::new(AtomicTaggedPtr::new(
                sentinel.with_version(TAIL_INITIAL_VERSION),
            )),
            arena,
        }
    }

    /// Appends a value at the tail
    pub fn push(&self, value: T) {
        let handle = self.arena.allocate();
        let node = self.arena.node(handle.address());
        node.set_refs(DATA_NODE_REFS);
        // Safety: the node came off the free list (or is fresh) and is not
        // reachable by anyone else until the link CAS below publishes it.
        unsafe { node.write_data(value) };

        loop {
            let tail = self.tail.load(ordering::A);
            let next = self.arena.node(tail.address()).next().load(ordering::A);
            if self.tail.load(ordering::A) != tail {
                continue;
            }

            if !next.is_null() {
                // Someone linked a node but has not swung the tail yet.
                let _ = self
                    .tail
                    .compare_exchange(tail, next, ordering::AR, ordering::A);
                continue;
            }

            if self
                .arena
                .node(tail.address())
                .next()
                .compare_exchange(next, handle, ordering::AR, ordering::A)
                .is_err()
            {
                continue;
            }

            // May fail if another thread already helped; the node is
            // reachable either way.
            let _ = self
                .tail
                .compare_exchange(tail, handle, ordering::AR, ordering::A);
            return;
        }
    }

    /// Removes the value at the head, or returns `None` if the queue is empty
    pub fn pop(&self) -> Option<T> {
        loop {
            let head = self.head.load(ordering::A);
            let tail = self.tail.load(ordering::A);
            let head_node = self.arena.node(head.address());
            let next = head_node.next().load(ordering::A);
            if self.head.load(ordering::A) != head {
                continue;
            }

            if next.is_null() {
                return None;
            }

            if head.addr_eq(tail) {
                // Tail lags one node behind a completed link; help it along
                // so head never overtakes tail.
                let _ = self
                    .tail
                    .compare_exchange(tail, next, ordering::AR, ordering::A);
                continue;
            }

            if self
                .head
                .compare_exchange(head, next.upgrade(), ordering::AR, ordering::A)
                .is_ok()
            {
                let next_node = self.arena.node(next.address());
                // Safety: only the winner of the head CAS reaches this point
                // for `next`, and its payload reference keeps it from being
                // recycled until released below.
                let value = unsafe { next_node.take_data() };

                if next_node.release() {
                    self.arena.recycle(next.address());
                }
                if head_node.release() {
                    self.arena.recycle(head.address());
                }
                return Some(value);
            }
        }
    }

    /// Returns `true` if the queue held no elements at the time of the call
    ///
    /// The answer may be stale by the time it is returned.
    pub fn is_empty(&self) -> bool {
        let head = self.head.load(ordering::A);
        self.arena.node(head.address()).next().load(ordering::A).is_null()
    }
}

impl<T> Default for ListQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for ListQueue<T> {
    fn drop(&mut self) {
        // Exclusive access: every push has linked its node, so following the
        // links from head reaches every payload that was never popped.
        let head = self.head.load(ordering::A);
        let mut next = self.arena.node(head.address()).next().load(ordering::A);
        let mut drained = 0usize;
        while !next.is_null() {
            let node = self.arena.node(next.address());
            // Safety: nodes after head still own their payloads.
            unsafe { node.drop_data() };
            drained += 1;
            next = node.next().load(ordering::A);
        }
        tracing::trace!(drained, "list queue dropped");
    }
}

impl<T> fmt::Debug for ListQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListQueue")
            .field("head", &*self.head)
            .field("tail", &*self.tail)
            .field("arena", &self.arena)
            .finish()
    }
}

impl<T: Send> ConcurrentQueue<T> for ListQueue<T> {
    fn try_push(&self, element: T) -> Result<(), Full<T>> {
        ListQueue::push(self, element);
        Ok(())
    }

    fn try_pop(&self) -> Option<T> {
        ListQueue::pop(self)
    }

    fn capacity(&self) -> Option<usize> {
        None
    }
}
