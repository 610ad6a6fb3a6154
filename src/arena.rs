//! Node storage for the linked queue
//!
//! Nodes are addressed by 32-bit handles instead of raw pointers. The storage
//! is split into segments of doubling length that are allocated on demand and
//! never move or shrink while the arena lives. A thread holding a stale handle
//! can therefore still load a recycled node's atomics safely; the generation
//! carried in the [`TaggedPtr`]s it compares against makes sure such a stale
//! read never wins a CAS.
//!
//! Released nodes go onto a lock-free free list (a Treiber stack threaded
//! through the nodes' `next` links) and are handed out again before any fresh
//! slot is claimed. Free-list links are tagged with an odd version, so even
//! the bottom link (address 0) never equals the null `next` of a live
//! incarnation.

use std::fmt;
use std::marker::PhantomData;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicUsize};

use crossbeam_utils::CachePadded;

use crate::common::ordering;
use crate::node::Node;
use crate::tagged::{AtomicTaggedPtr, TaggedPtr};

const FIRST_SEGMENT_BITS: u32 = 5;
const FIRST_SEGMENT_LEN: u64 = 1 << FIRST_SEGMENT_BITS;

/// Handle `0` is null, so slots `0..MAX_SLOTS` map to handles `1..=u32::MAX`.
const MAX_SLOTS: usize = u32::MAX as usize;

/// Enough doubling segments to cover every slot a 32-bit handle can name.
const SEGMENTS: usize = (u32::BITS + 1 - FIRST_SEGMENT_BITS) as usize;

/// Maps a zero-based slot to `(segment, offset)`.
#[inline]
const fn locate(slot: u64) -> (usize, usize) {
    let n = slot + FIRST_SEGMENT_LEN;
    let segment = (u64::BITS - 1 - n.leading_zeros()) - FIRST_SEGMENT_BITS;
    let offset = n - (FIRST_SEGMENT_LEN << segment);
    (segment as usize, offset as usize)
}

#[inline]
const fn segment_len(segment: usize) -> usize {
    (FIRST_SEGMENT_LEN << segment) as usize
}

pub(crate) struct NodeArena<T> {
    segments: [AtomicPtr<Node<T>>; SEGMENTS],
    /// Next slot that has never been handed out
    fresh: CachePadded<AtomicUsize>,
    /// Top of the free list
    free: CachePadded<AtomicTaggedPtr>,
    _marker: PhantomData<T>,
}

impl<T> NodeArena<T> {
    pub(crate) fn new() -> Self {
        Self {
            segments: std::array::from_fn(|_| AtomicPtr::new(ptr::null_mut())),
            fresh: CachePadded::new(AtomicUsize::new(0)),
            free: CachePadded::new(AtomicTaggedPtr::new(TaggedPtr::null())),
            _marker: PhantomData,
        }
    }

    /// Resolves a non-null handle to its node.
    ///
    /// Every handle that can be observed anywhere in the queue was produced by
    /// [`NodeArena::allocate`], whose segment is installed before the handle is
    /// returned, so the segment pointer is never null here.
    #[inline]
    pub(crate) fn node(&self, address: u32) -> &Node<T> {
        debug_assert_ne!(address, 0, "null node handle dereferenced");
        let (segment, offset) = locate(u64::from(address) - 1);
        let base = self.segments[segment].load(ordering::A);
        debug_assert!(!base.is_null(), "node handle points at a missing segment");
        // Safety: an installed segment is never freed while the arena lives,
        // and `locate` keeps `offset < segment_len(segment)`.
        unsafe { &*base.add(offset) }
    }

    /// Hands out a vacant node: recycled if possible, fresh otherwise.
    ///
    /// The returned handle is tagged with the node's new generation, and the
    /// node's `next` is null tagged with the same generation.
    pub(crate) fn allocate(&self) -> TaggedPtr {
        let address = loop {
            let top = self.free.load(ordering::A);
            if top.is_null() {
                break self.allocate_fresh();
            }

            // `top` may be taken by someone else before the CAS; the link read
            // here is then garbage, but the bumped version makes the CAS fail.
            let link = self.node(top.address()).next().load(ordering::A);
            let popped = TaggedPtr::pack(link.address(), top.version().wrapping_add(1));
            if self
                .free
                .compare_exchange(top, popped, ordering::AR, ordering::A)
                .is_ok()
            {
                break top.address();
            }
        };

        let generation = self.node(address).renew();
        TaggedPtr::pack(address, generation)
    }

    /// Returns a node whose references have all been released.
    pub(crate) fn recycle(&self, address: u32) {
        let node = self.node(address);
        let link_version = node.generation().wrapping_add(1);
        loop {
            let top = self.free.load(ordering::A);
            node.next()
                .store(TaggedPtr::pack(top.address(), link_version), ordering::X);
            let pushed = TaggedPtr::pack(address, top.version().wrapping_add(1));
            if self
                .free
                .compare_exchange(top, pushed, ordering::AR, ordering::A)
                .is_ok()
            {
                return;
            }
        }
    }

    fn allocate_fresh(&self) -> u32 {
        let slot = self.fresh.fetch_add(1, ordering::X);
        if slot >= MAX_SLOTS {
            panic!("node arena exhausted: more than {} live nodes", MAX_SLOTS);
        }
        let (segment, _) = locate(slot as u64);
        self.ensure_segment(segment);
        // Fits: slot < u32::MAX.
        (slot + 1) as u32
    }

    fn ensure_segment(&self, segment: usize) {
        if !self.segments[segment].load(ordering::A).is_null() {
            return;
        }

        let len = segment_len(segment);
        let storage: Box<[Node<T>]> = (0..len).map(|_| Node::vacant()).collect();
        let fresh = Box::into_raw(storage) as *mut Node<T>;

        match self.segments[segment].compare_exchange(
            ptr::null_mut(),
            fresh,
            ordering::AR,
            ordering::A,
        ) {
            Ok(_) => {
                tracing::debug!(segment, len, "node arena segment installed");
            }
            Err(_) => {
                // Another thread installed the segment first.
                // Safety: `fresh` came from `Box::into_raw` above with `len`
                // nodes and was never published.
                unsafe { drop(Box::from_raw(ptr::slice_from_raw_parts_mut(fresh, len))) };
            }
        }
    }

    /// Number of slots ever handed out fresh; recycled reuse does not count.
    pub(crate) fn high_water_mark(&self) -> usize {
        self.fresh.load(ordering::X).min(MAX_SLOTS)
    }
}

impl<T> Drop for NodeArena<T> {
    fn drop(&mut self) {
        // Payloads are owned by the queue and already dropped; nodes only hold
        // atomics and uninitialised storage.
        for (segment, base) in self.segments.iter_mut().enumerate() {
            let base = *base.get_mut();
            if !base.is_null() {
                // Safety: every installed segment came from `Box::into_raw`
                // of exactly `segment_len(segment)` nodes.
                unsafe {
                    drop(Box::from_raw(ptr::slice_from_raw_parts_mut(
                        base,
                        segment_len(segment),
                    )));
                }
            }
        }
    }
}

impl<T> fmt::Debug for NodeArena<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeArena")
            .field("high_water_mark", &self.high_water_mark())
            .field("free", &*self.free)
            .finish()
    }
}
