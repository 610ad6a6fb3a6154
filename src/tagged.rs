//! Versioned node handles
//!
//! A [`TaggedPtr`] packs a node address and a version counter into one `u64`
//! so that both can be compared and swapped by a single CAS. The address is an
//! index into a [`NodeArena`](crate::arena::NodeArena) rather than a raw
//! pointer: `0` is null and `n` names arena slot `n - 1`.
//!
//! The version defends against ABA. If a node is recycled and ends up at the
//! same address again, the version stored next to the address will have moved
//! on, and a CAS holding the old pair fails.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

const ADDRESS_BITS: u32 = 32;
const ADDRESS_MASK: u64 = (1 << ADDRESS_BITS) - 1;

/// A packed `(address, version)` pair
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct TaggedPtr(u64);

impl TaggedPtr {
    /// The null address at version zero
    #[inline]
    pub const fn null() -> Self {
        Self(0)
    }

    /// Packs an address and a version into one word
    #[inline]
    pub const fn pack(address: u32, version: u32) -> Self {
        Self(((version as u64) << ADDRESS_BITS) | address as u64)
    }

    /// The node address; `0` is null
    #[inline]
    pub const fn address(self) -> u32 {
        (self.0 & ADDRESS_MASK) as u32
    }

    #[inline]
    pub const fn version(self) -> u32 {
        (self.0 >> ADDRESS_BITS) as u32
    }

    /// Same address, next version
    #[inline]
    pub const fn upgrade(self) -> Self {
        self.with_version(self.version().wrapping_add(1))
    }

    /// Same address, given version
    #[inline]
    pub const fn with_version(self, version: u32) -> Self {
        Self::pack(self.address(), version)
    }

    #[inline]
    pub const fn is_null(self) -> bool {
        self.address() == 0
    }

    /// Identity comparison that ignores the version
    #[inline]
    pub const fn addr_eq(self, other: Self) -> bool {
        self.address() == other.address()
    }

    #[inline]
    pub const fn into_raw(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Debug for TaggedPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaggedPtr")
            .field("address", &self.address())
            .field("version", &self.version())
            .finish()
    }
}

/// A [`TaggedPtr`] that can be loaded, stored and swapped atomically
#[repr(transparent)]
pub struct AtomicTaggedPtr {
    raw: AtomicU64,
}

impl AtomicTaggedPtr {
    #[inline]
    pub const fn new(ptr: TaggedPtr) -> Self {
        Self {
            raw: AtomicU64::new(ptr.into_raw()),
        }
    }

    #[inline]
    pub fn load(&self, order: Ordering) -> TaggedPtr {
        TaggedPtr::from_raw(self.raw.load(order))
    }

    #[inline]
    pub fn store(&self, ptr: TaggedPtr, order: Ordering) {
        self.raw.store(ptr.into_raw(), order);
    }

    /// Replaces `current` with `new` if the whole packed word still matches
    #[inline]
    pub fn compare_exchange(
        &self,
        current: TaggedPtr,
        new: TaggedPtr,
        success: Ordering,
        failure: Ordering,
    ) -> Result<TaggedPtr, TaggedPtr> {
        self.raw
            .compare_exchange(current.into_raw(), new.into_raw(), success, failure)
            .map(TaggedPtr::from_raw)
            .map_err(TaggedPtr::from_raw)
    }
}

impl fmt::Debug for AtomicTaggedPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.load(Ordering::Relaxed), f)
    }
}
