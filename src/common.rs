//! Common functionality for the lock-free queues
//!
//! This module provides the shared traits and types used by both queue
//! implementations and by the harness.

use std::sync::atomic::AtomicUsize;

use crossbeam_utils::{Backoff, CachePadded};

use crate::error::Full;

/// Memory ordering constants for atomic operations
///
/// Short aliases so the CAS loops read close to the algorithm description.
pub mod ordering {
    pub use std::sync::atomic::Ordering::AcqRel as AR;
    pub use std::sync::atomic::Ordering::Acquire as A;
    pub use std::sync::atomic::Ordering::Relaxed as X;
    pub use std::sync::atomic::Ordering::Release as R;
}

/// Rounds a requested capacity up to the next power of two.
///
/// Zero is normalised to one so the derived index mask is always usable.
///
/// # Panics
///
/// Panics if the rounded capacity does not fit in a `usize`.
pub const fn round_up_to_power_of_2(n: usize) -> usize {
    if n == 0 {
        return 1;
    }
    match n.checked_next_power_of_two() {
        Some(capacity) => capacity,
        None => panic!("queue capacity overflow"),
    }
}

/// Absolute head and tail positions shared by the bounded queue
///
/// Positions only ever grow; the slot index and the wrap-around cycle are
/// both derived from them.
pub struct QueueCommon {
    /// The head position, where consumers pop elements
    ///
    /// Placed on its own cache line to avoid false sharing with tail
    pub head: CachePadded<AtomicUsize>,

    /// The tail position, where producers push elements
    ///
    /// Placed on its own cache line to avoid false sharing with head
    pub tail: CachePadded<AtomicUsize>,
}

impl QueueCommon {
    /// Creates both positions at zero
    #[inline]
    pub fn new() -> Self {
        Self {
            head: CachePadded::new(AtomicUsize::new(0)),
            tail: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    /// Returns the number of elements at the time of the call
    ///
    /// The result may be stale as soon as it is returned when push/pop
    /// run concurrently.
    #[inline]
    pub fn was_size(&self) -> usize {
        // Load head first: tail never trails head, so this cannot underflow.
        let head = self.head.load(ordering::X);
        let tail = self.tail.load(ordering::X);
        tail.wrapping_sub(head)
    }

    /// Checks if the queue was empty during this call
    #[inline]
    pub fn was_empty(&self) -> bool {
        self.was_size() == 0
    }

    /// Checks if the queue was full during this call
    #[inline]
    pub fn was_full(&self, capacity: usize) -> bool {
        self.was_size() >= capacity
    }
}

impl Default for QueueCommon {
    fn default() -> Self {
        Self::new()
    }
}

/// Operations shared by every queue in this crate
///
/// `try_push`/`try_pop` are the lock-free core: they either complete or report
/// full/empty immediately. `push_spin`/`pop_spin` are convenience loops for
/// callers that are happy to busy-wait; their names keep them apart from the
/// queues' own non-blocking `push`/`pop`.
pub trait ConcurrentQueue<T>: Send + Sync {
    /// Attempts to push an element to the queue
    ///
    /// Returns the element inside [`Full`] if the queue had no free slot.
    fn try_push(&self, element: T) -> Result<(), Full<T>>;

    /// Attempts to pop an element from the queue
    ///
    /// Returns `None` if the queue was empty.
    fn try_pop(&self) -> Option<T>;

    /// Returns the fixed capacity, or `None` for an unbounded queue
    fn capacity(&self) -> Option<usize>;

    /// Pushes an element, busy-waiting while the queue is full
    fn push_spin(&self, element: T) {
        let backoff = Backoff::new();
        let mut element = element;
        loop {
            match self.try_push(element) {
                Ok(()) => return,
                Err(Full(rejected)) => element = rejected,
            }
            backoff.snooze();
        }
    }

    /// Pops an element, busy-waiting while the queue is empty
    fn pop_spin(&self) -> T {
        let backoff = Backoff::new();
        loop {
            if let Some(element) = self.try_pop() {
                return element;
            }
            backoff.snooze();
        }
    }
}
