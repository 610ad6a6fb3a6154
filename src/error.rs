//! Error types
//!
//! Only two things can go wrong at runtime: a bounded queue has no free slot,
//! or the harness was given a configuration it cannot run. An empty queue is
//! reported as `None` and is not an error.

use std::fmt;

use thiserror::Error;

/// Returned by a push into a queue that was full at the time of the call
///
/// Carries the rejected element back to the caller so nothing is dropped
/// silently.
#[derive(Error, Clone, Copy, PartialEq, Eq)]
#[error("queue is full")]
pub struct Full<T>(pub T);

impl<T> Full<T> {
    /// Returns the element that could not be pushed
    #[inline]
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Debug for Full<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Full(..)")
    }
}

/// Reasons a harness run can be rejected or abandoned
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HarnessError {
    /// No producer units were requested
    #[error("at least one producer is required")]
    NoProducers,

    /// No consumer units were requested
    #[error("at least one consumer is required")]
    NoConsumers,

    /// Producers would push nothing
    #[error("items per producer must be positive")]
    NoItems,

    /// The total item count cannot be split evenly between consumers
    #[error("{total} items cannot be split evenly across {consumers} consumers")]
    UnevenSplit {
        /// Items pushed by all producers together
        total: u64,
        /// Number of consumer units
        consumers: usize,
    },

    /// The item count or the expected sum does not fit in a `u64`
    #[error("workload of {producers} x {items_per_producer} items overflows u64")]
    Overflow {
        /// Number of producer units
        producers: usize,
        /// Items pushed by each producer
        items_per_producer: u64,
    },

    /// A producer or consumer thread panicked
    #[error("{role} unit {index} panicked")]
    WorkerPanicked {
        /// `"producer"` or `"consumer"`
        role: &'static str,
        /// Index of the unit within its role
        index: usize,
    },
}
