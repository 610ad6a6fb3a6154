//! Multi-threaded stress tests: every pushed value is popped exactly once,
//! whichever queue carries it.

use lockfree_queue_rs::harness::{self, HarnessConfig};
use lockfree_queue_rs::{ConcurrentQueue, Full, ListQueue, RingBufferQueue};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::sync::{Arc, Barrier, Mutex};
use std::thread;

/// Producers push disjoint ranges, consumers record everything they pop.
/// Afterwards each value must have been seen exactly once.
fn stress<Q>(queue: Q, producers: usize, consumers: usize, n: u64)
where
    Q: ConcurrentQueue<u64> + 'static,
{
    let q = Arc::new(queue);
    let barrier = Arc::new(Barrier::new(producers + consumers));
    let total = producers as u64 * n;
    let popped = Arc::new(std::sync::atomic::AtomicU64::new(0));

    let mut producer_handles = Vec::with_capacity(producers);
    for p in 0..producers {
        let q = Arc::clone(&q);
        let barrier = Arc::clone(&barrier);
        producer_handles.push(thread::spawn(move || {
            barrier.wait();
            let base = p as u64 * n;
            for i in 0..n {
                q.push_spin(base + i);
            }
        }));
    }

    let results = Arc::new(Mutex::new(Vec::with_capacity(total as usize)));
    let mut consumer_handles = Vec::with_capacity(consumers);
    for _ in 0..consumers {
        let q = Arc::clone(&q);
        let barrier = Arc::clone(&barrier);
        let results = Arc::clone(&results);
        let popped = Arc::clone(&popped);
        consumer_handles.push(thread::spawn(move || {
            barrier.wait();
            let mut local = Vec::new();
            while popped.load(std::sync::atomic::Ordering::Relaxed) < total {
                match q.try_pop() {
                    Some(value) => {
                        local.push(value);
                        popped.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    }
                    None => thread::yield_now(),
                }
            }
            results.lock().unwrap().extend(local);
        }));
    }

    for handle in producer_handles {
        handle.join().unwrap();
    }
    for handle in consumer_handles {
        handle.join().unwrap();
    }

    let mut results = results.lock().unwrap();
    assert_eq!(results.len() as u64, total, "lost or duplicated values");
    results.sort_unstable();
    for (expected, &actual) in results.iter().enumerate() {
        assert_eq!(expected as u64, actual, "value {} missing or duplicated", expected);
    }
    assert!(q.try_pop().is_none(), "queue not empty after drain");
}

#[test]
fn test_stress_list_queue() {
    stress(ListQueue::new(), 4, 4, 50_000);
}

#[test]
fn test_stress_list_queue_more_consumers() {
    stress(ListQueue::new(), 2, 6, 50_000);
}

#[test]
fn test_stress_ring_buffer() {
    stress(RingBufferQueue::new(1024), 4, 4, 50_000);
}

#[test]
fn test_stress_ring_buffer_tiny() {
    // Constant wrap-around with producers spinning on a full queue.
    stress(RingBufferQueue::new(2), 3, 3, 20_000);
}

/// The reference driver: 8 producers each push 0..1_000_000 into one list
/// queue while 8 consumers drain all 8_000_000 values.
#[test]
#[ignore] // Slow in debug builds; run with --ignored --release
fn test_reference_workload_list_queue() {
    let config = HarnessConfig::default();
    let queue = ListQueue::new();
    let report = harness::run(&config, &queue).unwrap();
    assert!(report.is_balanced(), "{:?}", report);
    assert_eq!(report.consumed_items, 8_000_000);
}

#[test]
fn test_harness_list_queue() {
    let config = HarnessConfig::default()
        .with_producers(4)
        .with_consumers(4)
        .with_items_per_producer(100_000);
    let queue = ListQueue::new();
    let report = harness::run(&config, &queue).unwrap();
    assert!(report.is_balanced(), "{:?}", report);
    assert_eq!(report.consumed_items, 400_000);
}

#[test]
fn test_harness_ring_buffer() {
    let config = HarnessConfig::default()
        .with_producers(4)
        .with_consumers(2)
        .with_items_per_producer(100_000);
    let queue = RingBufferQueue::new(256);
    let report = harness::run(&config, &queue).unwrap();
    assert!(report.is_balanced(), "{:?}", report);
}

#[test]
fn test_ring_buffer_global_fifo() {
    // One producer, one consumer: the consumer must see 0, 1, 2, ... exactly.
    const N: u64 = 200_000;
    let q = Arc::new(RingBufferQueue::new(64));

    let producer = {
        let q = Arc::clone(&q);
        thread::spawn(move || {
            for i in 0..N {
                let mut item = i;
                while let Err(Full(rejected)) = q.push(item) {
                    item = rejected;
                    thread::yield_now();
                }
            }
        })
    };

    let mut expected = 0;
    while expected < N {
        if let Some(value) = q.pop() {
            assert_eq!(value, expected);
            expected += 1;
        }
    }
    producer.join().unwrap();
}

#[test]
fn test_ring_buffer_never_exceeds_capacity() {
    use std::sync::atomic::{AtomicUsize, Ordering};

    const CAPACITY: usize = 8;
    let q = Arc::new(RingBufferQueue::new(CAPACITY));
    let pushed = Arc::new(AtomicUsize::new(0));
    let popped = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..4u64)
        .map(|seed| {
            let q = Arc::clone(&q);
            let pushed = Arc::clone(&pushed);
            let popped = Arc::clone(&popped);
            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(seed);
                for i in 0..20_000u32 {
                    if rng.random_bool(0.6) {
                        if q.push(i).is_ok() {
                            pushed.fetch_add(1, Ordering::Relaxed);
                        }
                    } else if q.pop().is_some() {
                        popped.fetch_add(1, Ordering::Relaxed);
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    // Whatever is left was accepted and never popped; it must fit.
    let mut left = 0;
    while q.pop().is_some() {
        left += 1;
    }
    assert_eq!(left, pushed.load(Ordering::Relaxed) - popped.load(Ordering::Relaxed));
    assert!(left <= CAPACITY);
}

/// A single-threaded random interleaving compared against `VecDeque`.
fn random_model_check<Q: ConcurrentQueue<u32>>(queue: Q, bound: Option<usize>, seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut model = VecDeque::new();

    for step in 0..20_000u32 {
        if rng.random_bool(0.55) {
            match queue.try_push(step) {
                Ok(()) => model.push_back(step),
                Err(Full(rejected)) => {
                    assert_eq!(rejected, step);
                    assert_eq!(Some(model.len()), bound, "rejected below capacity");
                }
            }
        } else {
            assert_eq!(queue.try_pop(), model.pop_front());
        }
    }
    while let Some(expected) = model.pop_front() {
        assert_eq!(queue.try_pop(), Some(expected));
    }
    assert_eq!(queue.try_pop(), None);
}

#[test]
fn test_random_interleaving_list_queue() {
    for seed in 0..4 {
        random_model_check(ListQueue::new(), None, seed);
    }
}

#[test]
fn test_random_interleaving_ring_buffer() {
    for seed in 0..4 {
        random_model_check(RingBufferQueue::new(16), Some(16), seed);
    }
}
