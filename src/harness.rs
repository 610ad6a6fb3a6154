//! Producer/consumer throughput harness
//!
//! Drives a fixed number of producer and consumer threads against one queue:
//! each producer pushes `0..items_per_producer`, and consumers busy-retry
//! `try_pop` until they have collectively drained everything. Every unit keeps
//! its running totals in its own cache-line-padded record so the bookkeeping
//! does not add contention of its own.
//!
//! A unit that panics raises a shared abort flag. Units waiting on a full or
//! empty queue watch that flag and stop, so the run always ends and the panic
//! is reported as [`HarnessError::WorkerPanicked`].

use std::sync::atomic::AtomicBool;
use std::sync::Barrier;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_utils::{Backoff, CachePadded};

use crate::common::{ordering, ConcurrentQueue};
use crate::error::{Full, HarnessError};

/// Shape of one harness run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HarnessConfig {
    /// Number of producer threads
    pub producers: usize,
    /// Number of consumer threads
    pub consumers: usize,
    /// Values pushed by each producer
    pub items_per_producer: u64,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            producers: 8,
            consumers: 8,
            items_per_producer: 1_000_000,
        }
    }
}

/// Derived counts of a validated configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Workload {
    total_items: u64,
    items_per_consumer: u64,
    expected_sum: u64,
}

impl HarnessConfig {
    pub fn with_producers(mut self, producers: usize) -> Self {
        self.producers = producers;
        self
    }

    pub fn with_consumers(mut self, consumers: usize) -> Self {
        self.consumers = consumers;
        self
    }

    pub fn with_items_per_producer(mut self, items_per_producer: u64) -> Self {
        self.items_per_producer = items_per_producer;
        self
    }

    /// Checks that the run can complete with every consumer taking an equal share
    pub fn validate(&self) -> Result<(), HarnessError> {
        self.workload().map(|_| ())
    }

    fn workload(&self) -> Result<Workload, HarnessError> {
        if self.producers == 0 {
            return Err(HarnessError::NoProducers);
        }
        if self.consumers == 0 {
            return Err(HarnessError::NoConsumers);
        }
        if self.items_per_producer == 0 {
            return Err(HarnessError::NoItems);
        }

        let overflow = HarnessError::Overflow {
            producers: self.producers,
            items_per_producer: self.items_per_producer,
        };
        let producers = self.producers as u128;
        let items = u128::from(self.items_per_producer);
        let total_items = u64::try_from(producers * items).map_err(|_| overflow.clone())?;
        let expected_sum =
            u64::try_from(items * (items - 1) / 2 * producers).map_err(|_| overflow)?;

        if total_items % self.consumers as u64 != 0 {
            return Err(HarnessError::UnevenSplit {
                total: total_items,
                consumers: self.consumers,
            });
        }

        Ok(Workload {
            total_items,
            items_per_consumer: total_items / self.consumers as u64,
            expected_sum,
        })
    }
}

/// Totals collected from one harness run
#[derive(Debug, Clone, PartialEq)]
pub struct HarnessReport {
    /// Sum of every value the producers pushed
    pub produced_sum: u64,
    /// Sum of every value the consumers popped
    pub consumed_sum: u64,
    /// Number of values the consumers popped
    pub consumed_items: u64,
    /// `0 + 1 + ... + (items_per_producer - 1)`, once per producer
    pub expected_sum: u64,
    /// Values still found in the queue after all units finished
    pub leftover: u64,
    /// Wall-clock time from the start signal until every unit was joined
    pub elapsed: Duration,
}

impl HarnessReport {
    /// True if nothing was lost, duplicated or left behind
    pub fn is_balanced(&self) -> bool {
        self.produced_sum == self.expected_sum
            && self.consumed_sum == self.expected_sum
            && self.leftover == 0
    }

    /// Elapsed time in microseconds, saturating at `u64::MAX`
    pub fn elapsed_micros(&self) -> u64 {
        u64::try_from(self.elapsed.as_micros()).unwrap_or(u64::MAX)
    }

    /// Popped values per second
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            return f64::INFINITY;
        }
        self.consumed_items as f64 / secs
    }
}

/// Running totals owned by a single unit
#[derive(Debug, Default)]
struct UnitRecord {
    sum: u64,
    items: u64,
}

/// Raises the abort flag if its unit unwinds.
struct AbortOnPanic<'a>(&'a AtomicBool);

impl Drop for AbortOnPanic<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0.store(true, ordering::R);
        }
    }
}

/// Runs the configured producers and consumers against `queue`
pub fn run<Q>(config: &HarnessConfig, queue: &Q) -> Result<HarnessReport, HarnessError>
where
    Q: ConcurrentQueue<u64>,
{
    let workload = config.workload()?;
    tracing::info!(
        producers = config.producers,
        consumers = config.consumers,
        items_per_producer = config.items_per_producer,
        "harness starting"
    );

    // Producers, consumers and the timer all start together.
    let barrier = Barrier::new(config.producers + config.consumers + 1);
    let abort = AtomicBool::new(false);

    let (produced, consumed, elapsed) = thread::scope(|s| {
        let producers: Vec<_> = (0..config.producers)
            .map(|_| {
                let (barrier, abort) = (&barrier, &abort);
                s.spawn(move || {
                    let _guard = AbortOnPanic(abort);
                    let mut record = CachePadded::new(UnitRecord::default());
                    let backoff = Backoff::new();
                    barrier.wait();
                    for value in 0..config.items_per_producer {
                        let mut item = value;
                        while let Err(Full(rejected)) = queue.try_push(item) {
                            if abort.load(ordering::A) {
                                return record;
                            }
                            item = rejected;
                            backoff.snooze();
                        }
                        backoff.reset();
                        record.sum += value;
                        record.items += 1;
                    }
                    record
                })
            })
            .collect();

        let consumers: Vec<_> = (0..config.consumers)
            .map(|_| {
                let (barrier, abort) = (&barrier, &abort);
                s.spawn(move || {
                    let _guard = AbortOnPanic(abort);
                    let mut record = CachePadded::new(UnitRecord::default());
                    let backoff = Backoff::new();
                    barrier.wait();
                    while record.items < workload.items_per_consumer {
                        match queue.try_pop() {
                            Some(value) => {
                                record.sum += value;
                                record.items += 1;
                                backoff.reset();
                            }
                            None if abort.load(ordering::A) => break,
                            None => backoff.snooze(),
                        }
                    }
                    record
                })
            })
            .collect();

        barrier.wait();
        let start = Instant::now();

        let produced = join_all(producers, "producer");
        let consumed = join_all(consumers, "consumer");
        (produced, consumed, start.elapsed())
    });
    let (produced, consumed) = (produced?, consumed?);

    let mut leftover = 0;
    while queue.try_pop().is_some() {
        leftover += 1;
    }

    let report = HarnessReport {
        produced_sum: produced.iter().map(|r| r.sum).sum(),
        consumed_sum: consumed.iter().map(|r| r.sum).sum(),
        consumed_items: consumed.iter().map(|r| r.items).sum(),
        expected_sum: workload.expected_sum,
        leftover,
        elapsed,
    };

    if report.is_balanced() {
        tracing::info!(
            items = workload.total_items,
            elapsed_us = report.elapsed_micros(),
            ops_per_sec = report.throughput(),
            "harness finished"
        );
    } else {
        tracing::warn!(
            produced_sum = report.produced_sum,
            consumed_sum = report.consumed_sum,
            expected_sum = report.expected_sum,
            leftover = report.leftover,
            "harness totals do not match"
        );
    }

    Ok(report)
}

fn join_all(
    handles: Vec<thread::ScopedJoinHandle<'_, CachePadded<UnitRecord>>>,
    role: &'static str,
) -> Result<Vec<UnitRecord>, HarnessError> {
    let mut records = Vec::with_capacity(handles.len());
    let mut failure = None;
    // Join everything even after a failure so no unit is left detached.
    for (index, handle) in handles.into_iter().enumerate() {
        match handle.join() {
            Ok(record) => records.push(CachePadded::into_inner(record)),
            Err(_) => {
                failure.get_or_insert(HarnessError::WorkerPanicked { role, index });
            }
        }
    }
    match failure {
        Some(err) => Err(err),
        None => Ok(records),
    }
}
