//! Bounded ring-buffer queue with per-slot sequence counters
//!
//! Positions handed out by `head` and `tail` grow forever. A position `p`
//! lives in slot `p & mask` during cycle `p / capacity`. Each slot records the
//! position it is waiting for on each side:
//!
//! * `store_index == p`: the producer that claimed `p` may write the slot;
//! * `read_index == p`: the consumer that claimed `p` may read it.
//!
//! A consumer finishing position `p` sets `store_index = p + capacity`, which
//! hands the slot to the producer one full cycle later. Full and empty thus
//! fall out of the counters alone, without a shared element count.

use std::cell::UnsafeCell;
use std::fmt;
use std::mem::MaybeUninit;
use std::sync::atomic::AtomicUsize;

use crate::common::{ordering, round_up_to_power_of_2, ConcurrentQueue, QueueCommon};
use crate::error::Full;

struct Slot<T> {
    val: UnsafeCell<MaybeUninit<T>>,
    read_index: AtomicUsize,
    store_index: AtomicUsize,
}

impl<T> Slot<T> {
    /// A slot that looks as if its previous-cycle value was already consumed.
    fn new(index: usize, capacity: usize) -> Self {
        Self {
            val: UnsafeCell::new(MaybeUninit::uninit()),
            read_index: AtomicUsize::new(index.wrapping_sub(capacity)),
            store_index: AtomicUsize::new(index),
        }
    }
}

/// Signed distance from `position` to `seq`, robust to wrap-around.
#[inline(always)]
fn lag(seq: usize, position: usize) -> isize {
    seq.wrapping_sub(position) as isize
}

/// A lock-free fixed-capacity multi-producer multi-consumer queue
///
/// Capacity is rounded up to the next power of two and never changes.
/// Elements come out in exactly the order their pushes claimed positions.
///
/// ```
/// use lockfree_queue_rs::RingBufferQueue;
///
/// let queue = RingBufferQueue::new(2);
/// assert!(queue.push(1).is_ok());
/// assert!(queue.push(2).is_ok());
/// assert_eq!(queue.push(3).unwrap_err().into_inner(), 3);
/// assert_eq!(queue.pop(), Some(1));
/// ```
pub struct RingBufferQueue<T> {
    /// The head and tail positions
    common: QueueCommon,

    slots: Box<[Slot<T>]>,

    /// `capacity - 1`; turns a position into a slot index
    mask: usize,
}

// Safety: a payload is only accessed by the producer or consumer whose CAS
// claimed its position, and hand-over goes through release/acquire counters.
unsafe impl<T: Send> Send for RingBufferQueue<T> {}
unsafe impl<T: Send> Sync for RingBufferQueue<T> {}

impl<T> RingBufferQueue<T> {
    /// Creates an empty queue holding at least `capacity` elements
    ///
    /// A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        let requested = capacity;
        let capacity = round_up_to_power_of_2(capacity);
        if capacity != requested {
            tracing::debug!(requested, capacity, "ring buffer capacity rounded up");
        }

        let slots = (0..capacity).map(|i| Slot::new(i, capacity)).collect();

        Self {
            common: QueueCommon::new(),
            slots,
            mask: capacity - 1,
        }
    }

    #[inline(always)]
    fn slot(&self, position: usize) -> &Slot<T> {
        &self.slots[position & self.mask]
    }

    /// Attempts to append a value
    ///
    /// Returns the value inside [`Full`] if every slot was occupied.
    pub fn push(&self, value: T) -> Result<(), Full<T>> {
        let mut tail = self.common.tail.load(ordering::X);
        loop {
            let slot = self.slot(tail);
            let store_index = slot.store_index.load(ordering::A);
            let diff = lag(store_index, tail);

            if diff == 0 {
                match self.common.tail.compare_exchange_weak(
                    tail,
                    tail.wrapping_add(1),
                    ordering::AR,
                    ordering::A,
                ) {
                    Ok(_) => {
                        // Safety: the CAS made this thread the only producer
                        // for `tail`, and `store_index == tail` means the
                        // previous value has been moved out.
                        unsafe { (*slot.val.get()).write(value) };
                        slot.read_index.store(tail, ordering::R);
                        return Ok(());
                    }
                    Err(current) => tail = current,
                }
            } else if diff < 0 {
                // Still holding the value from one cycle ago.
                return Err(Full(value));
            } else {
                // Another producer already filled this position.
                tail = self.common.tail.load(ordering::X);
            }
        }
    }

    /// Removes the oldest value, or returns `None` if the queue is empty
    pub fn pop(&self) -> Option<T> {
        let mut head = self.common.head.load(ordering::X);
        loop {
            let slot = self.slot(head);
            let read_index = slot.read_index.load(ordering::A);
            let diff = lag(read_index, head);

            if diff == 0 {
                match self.common.head.compare_exchange_weak(
                    head,
                    head.wrapping_add(1),
                    ordering::AR,
                    ordering::A,
                ) {
                    Ok(_) => {
                        // Safety: the CAS made this thread the only consumer
                        // for `head`, and the acquire load above observed the
                        // producer's publish.
                        let value = unsafe { (*slot.val.get()).assume_init_read() };
                        slot.store_index
                            .store(head.wrapping_add(self.slots.len()), ordering::R);
                        return Some(value);
                    }
                    Err(current) => head = current,
                }
            } else if diff < 0 {
                // Not yet filled for this cycle.
                return None;
            } else {
                // Another consumer already took this position.
                head = self.common.head.load(ordering::X);
            }
        }
    }

    /// Returns the fixed capacity of the queue
    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Returns the number of elements at the time of the call
    #[inline]
    pub fn was_size(&self) -> usize {
        self.common.was_size()
    }

    /// Checks if the queue was empty during this call
    #[inline]
    pub fn was_empty(&self) -> bool {
        self.common.was_empty()
    }

    /// Checks if the queue was full during this call
    #[inline]
    pub fn was_full(&self) -> bool {
        self.common.was_full(self.capacity())
    }
}

impl<T> Drop for RingBufferQueue<T> {
    fn drop(&mut self) {
        let head = *self.common.head.get_mut();
        let tail = *self.common.tail.get_mut();
        let mut drained = 0usize;

        // Every claimed position has been published: pushes finish their
        // write before returning and we have exclusive access.
        let mut position = head;
        while position != tail {
            let slot = &mut self.slots[position & self.mask];
            debug_assert_eq!(*slot.read_index.get_mut(), position);
            unsafe { slot.val.get_mut().assume_init_drop() };
            drained += 1;
            position = position.wrapping_add(1);
        }
        tracing::trace!(drained, "ring buffer dropped");
    }
}

impl<T> fmt::Debug for RingBufferQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingBufferQueue")
            .field("capacity", &self.capacity())
            .field("head", &self.common.head.load(ordering::X))
            .field("tail", &self.common.tail.load(ordering::X))
            .finish()
    }
}

impl<T: Send> ConcurrentQueue<T> for RingBufferQueue<T> {
    fn try_push(&self, element: T) -> Result<(), Full<T>> {
        RingBufferQueue::push(self, element)
    }

    fn try_pop(&self) -> Option<T> {
        RingBufferQueue::pop(self)
    }

    fn capacity(&self) -> Option<usize> {
        Some(RingBufferQueue::capacity(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_ring_buffer_basic() {
        let q = RingBufferQueue::new(16);

        assert!(q.push(1).is_ok());
        assert!(q.push(2).is_ok());
        assert!(q.push(3).is_ok());

        assert_eq!(q.pop(), Some(1));
        assert_eq!(q.pop(), Some(2));
        assert_eq!(q.pop(), Some(3));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn test_ring_buffer_full() {
        // Rounded up to 4.
        let q = RingBufferQueue::new(3);
        assert_eq!(q.capacity(), 4);

        for i in 1..=4 {
            assert!(q.push(i).is_ok());
        }
        assert!(q.was_full());
        assert_eq!(q.push(5), Err(Full(5)));

        for i in 1..=4 {
            assert_eq!(q.pop(), Some(i));
        }
        assert_eq!(q.pop(), None);
        assert!(q.was_empty());
    }

    #[test]
    fn test_capacity_one_wraps() {
        let q = RingBufferQueue::new(1);
        assert_eq!(q.capacity(), 1);

        for cycle in 0..10 {
            assert!(q.push(cycle).is_ok());
            assert_eq!(q.push(cycle + 100), Err(Full(cycle + 100)));
            assert_eq!(q.pop(), Some(cycle));
            assert_eq!(q.pop(), None);
        }
    }

    #[test]
    fn test_zero_capacity_is_normalised() {
        let q = RingBufferQueue::new(0);
        assert_eq!(q.capacity(), 1);
        assert!(q.push("only").is_ok());
        assert!(q.push("rejected").is_err());
    }

    #[test]
    fn test_full_and_empty_are_idempotent() {
        let q = RingBufferQueue::new(2);
        for _ in 0..5 {
            assert_eq!(q.pop(), None);
        }
        assert_eq!(q.was_size(), 0);

        q.push(1).unwrap();
        q.push(2).unwrap();
        for _ in 0..5 {
            assert_eq!(q.push(3), Err(Full(3)));
        }
        assert_eq!(q.was_size(), 2);
        assert_eq!(q.pop(), Some(1));
        assert_eq!(q.pop(), Some(2));
    }

    #[test]
    fn test_complex_type() {
        struct ComplexType {
            id: u32,
            data: Vec<u8>,
        }

        let q = RingBufferQueue::new(16);
        assert!(q.push(ComplexType { id: 1, data: vec![1, 2, 3] }).is_ok());
        assert!(q.push(ComplexType { id: 2, data: vec![4, 5, 6] }).is_ok());

        let item1 = q.pop().unwrap();
        assert_eq!(item1.id, 1);
        assert_eq!(item1.data, vec![1, 2, 3]);

        let item2 = q.pop().unwrap();
        assert_eq!(item2.id, 2);
        assert_eq!(item2.data, vec![4, 5, 6]);
    }

    #[test]
    fn test_drop_with_pending_elements() {
        let q = RingBufferQueue::new(8);
        for i in 0..6 {
            q.push(i.to_string()).unwrap();
        }
        assert_eq!(q.pop().unwrap(), "0");
        drop(q);
    }

    #[test]
    fn test_ring_buffer_threaded() {
        const NUM_PRODUCERS: usize = 4;
        const NUM_CONSUMERS: usize = 4;
        const ITEMS_PER_PRODUCER: usize = 10_000;

        let q = Arc::new(RingBufferQueue::new(64));
        let expected_sum = (0..ITEMS_PER_PRODUCER).sum::<usize>() * NUM_PRODUCERS;

        let mut producer_threads = Vec::new();
        for _ in 0..NUM_PRODUCERS {
            let q2 = q.clone();
            producer_threads.push(thread::spawn(move || {
                for i in 0..ITEMS_PER_PRODUCER {
                    let mut item = i;
                    while let Err(Full(rejected)) = q2.push(item) {
                        item = rejected;
                        thread::yield_now();
                    }
                }
            }));
        }

        let mut consumer_threads = Vec::new();
        for _ in 0..NUM_CONSUMERS {
            let q2 = q.clone();
            consumer_threads.push(thread::spawn(move || {
                let mut local_sum = 0;
                let mut count = 0;
                while count < (ITEMS_PER_PRODUCER * NUM_PRODUCERS) / NUM_CONSUMERS {
                    if let Some(value) = q2.pop() {
                        local_sum += value;
                        count += 1;
                    }
                }
                local_sum
            }));
        }

        for handle in producer_threads {
            handle.join().unwrap();
        }
        let total_sum: usize = consumer_threads
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .sum();

        assert_eq!(total_sum, expected_sum);
        assert!(q.was_empty());
    }
}
