//! # lockfree_queue_rs
//!
//! Lock-free multiple-producer-multiple-consumer queues.
//!
//! Two interchangeable implementations of the same contract are provided:
//!
//! * [`ListQueue`]: an unbounded Michael–Scott linked queue. Links carry a
//!   version next to the node handle so a CAS against a recycled node fails,
//!   and nodes are reused only after both the consumer that read them and the
//!   consumer that unlinked them have let go.
//! * [`RingBufferQueue`]: a bounded queue over a power-of-two array whose
//!   slots carry sequence counters, so full and empty are detected without a
//!   shared element count.
//!
//! Neither queue ever blocks: a full or empty queue is reported to the caller
//! straight away. The [`ConcurrentQueue`] trait adds busy-waiting `push_spin`/`pop_spin`
//! on top for callers that want them, and [`harness`] drives either queue with
//! a fixed producer/consumer workload.

mod arena;
mod common;
mod error;
mod node;
mod tagged;

pub mod harness;
pub mod list_queue;
pub mod ring_buffer;

// Re-exports for convenience
pub use common::{round_up_to_power_of_2, ConcurrentQueue};
pub use error::{Full, HarnessError};
pub use harness::{HarnessConfig, HarnessReport};
pub use list_queue::ListQueue;
pub use ring_buffer::RingBufferQueue;
pub use tagged::{AtomicTaggedPtr, TaggedPtr};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queues_are_send_and_sync() {
        fn is_queue<Q: ConcurrentQueue<String>>() -> bool {
            true
        }

        assert!(is_queue::<ListQueue<String>>());
        assert!(is_queue::<RingBufferQueue<String>>());
    }

    #[test]
    fn capacity_reports_boundedness() {
        let list = ListQueue::<u8>::new();
        let ring = RingBufferQueue::<u8>::new(5);
        assert_eq!(ConcurrentQueue::capacity(&list), None);
        assert_eq!(ConcurrentQueue::capacity(&ring), Some(8));
    }
}
