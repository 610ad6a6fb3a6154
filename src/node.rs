//! Linked-list cells for [`ListQueue`](crate::ListQueue)

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicU32, AtomicUsize};

use crate::common::ordering;
use crate::tagged::{AtomicTaggedPtr, TaggedPtr};

/// References held by a node that carries a payload: one for the payload
/// still waiting to be taken, one for the structural link that reaches it.
pub(crate) const DATA_NODE_REFS: usize = 2;

/// The sentinel never carries a payload, only the structural reference.
pub(crate) const SENTINEL_REFS: usize = 1;

/// One cell of the linked queue
///
/// Nodes live inside a [`NodeArena`](crate::arena::NodeArena) and are reused
/// after both references are released. Only `next` and `refs` are ever read by
/// threads that do not own the node; `data` is touched exclusively by the
/// producer before the node is linked and by the one consumer whose head CAS
/// made the node the new head.
///
/// Each reuse of the cell starts a new incarnation with a fresh even
/// `generation`. A [`TaggedPtr`] naming the node carries that generation, so
/// a reference to an earlier incarnation never compares equal to a current one.
pub(crate) struct Node<T> {
    data: UnsafeCell<MaybeUninit<T>>,
    next: AtomicTaggedPtr,
    refs: AtomicUsize,
    generation: AtomicU32,
}

impl<T> Node<T> {
    /// An unused cell, as laid out when an arena segment is allocated
    pub(crate) fn vacant() -> Self {
        Self {
            data: UnsafeCell::new(MaybeUninit::uninit()),
            next: AtomicTaggedPtr::new(TaggedPtr::null()),
            refs: AtomicUsize::new(0),
            generation: AtomicU32::new(0),
        }
    }

    #[inline]
    pub(crate) fn next(&self) -> &AtomicTaggedPtr {
        &self.next
    }

    /// Starts a new incarnation and returns its generation.
    ///
    /// The link is reset to null tagged with the new generation, which no
    /// stale reader can hold for this slot. Only the allocating thread may
    /// call this.
    #[inline]
    pub(crate) fn renew(&self) -> u32 {
        let generation = self.generation.load(ordering::X).wrapping_add(2);
        self.generation.store(generation, ordering::X);
        self.next
            .store(TaggedPtr::null().with_version(generation), ordering::X);
        generation
    }

    #[inline]
    pub(crate) fn generation(&self) -> u32 {
        self.generation.load(ordering::X)
    }

    #[inline]
    pub(crate) fn set_refs(&self, refs: usize) {
        self.refs.store(refs, ordering::X);
    }

    /// Drops one reference, returning `true` if it was the last one.
    #[inline]
    pub(crate) fn release(&self) -> bool {
        let prev = self.refs.fetch_sub(1, ordering::AR);
        debug_assert!(prev > 0, "node released more often than referenced");
        prev == 1
    }

    /// Moves `value` into the node.
    ///
    /// # Safety
    ///
    /// The caller must own the node exclusively and the payload slot must be
    /// vacant.
    #[inline]
    pub(crate) unsafe fn write_data(&self, value: T) {
        (*self.data.get()).write(value);
    }

    /// Moves the payload out of the node, leaving the slot vacant.
    ///
    /// # Safety
    ///
    /// The payload must have been written and not yet taken, and no other
    /// thread may access it concurrently.
    #[inline]
    pub(crate) unsafe fn take_data(&self) -> T {
        (*self.data.get()).assume_init_read()
    }

    /// Drops the payload in place.
    ///
    /// # Safety
    ///
    /// Same contract as [`Node::take_data`].
    #[inline]
    pub(crate) unsafe fn drop_data(&self) {
        (*self.data.get()).assume_init_drop();
    }
}
