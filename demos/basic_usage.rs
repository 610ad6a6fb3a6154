use lockfree_queue_rs::{Full, ListQueue, RingBufferQueue};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

fn main() {
    println!("Lock-free Queue Example");
    println!("-----------------------\n");

    // Configuration
    const PRODUCERS: usize = 2; // Number of producer threads
    const CONSUMERS: usize = 2; // Number of consumer threads
    const N: u32 = 1_000_000; // Each producer pushes this many elements into the queue
    const CAPACITY: usize = 1024; // Capacity of the bounded queue

    run_list_queue(PRODUCERS, CONSUMERS, N);
    println!();
    run_ring_buffer(PRODUCERS, CONSUMERS, N, CAPACITY);
}

/// Producers push `N..=1`, then one `0` per consumer as a stop marker.
fn run_list_queue(producers: usize, consumers: usize, n: u32) {
    println!("ListQueue (unbounded)");
    println!("Starting {} producers and {} consumers", producers, consumers);

    let queue = Arc::new(ListQueue::<u32>::new());
    let start_time = Instant::now();

    let consumer_threads: Vec<_> = (0..consumers)
        .map(|_| {
            let q = queue.clone();
            thread::spawn(move || {
                let mut local_sum = 0u64;
                loop {
                    match q.pop() {
                        Some(0) => break,
                        Some(value) => local_sum += value as u64,
                        None => thread::yield_now(),
                    }
                }
                local_sum
            })
        })
        .collect();

    let producer_threads: Vec<_> = (0..producers)
        .map(|_| {
            let q = queue.clone();
            thread::spawn(move || {
                for value in (1..=n).rev() {
                    q.push(value);
                }
            })
        })
        .collect();

    for handle in producer_threads {
        handle.join().unwrap();
    }
    for _ in 0..consumers {
        queue.push(0);
    }
    let sums: Vec<u64> = consumer_threads.into_iter().map(|h| h.join().unwrap()).collect();

    report(&sums, producers, n, start_time);
}

/// Same workload over the bounded queue; a rejected push is retried.
fn run_ring_buffer(producers: usize, consumers: usize, n: u32, capacity: usize) {
    println!("RingBufferQueue (capacity {})", capacity);
    println!("Starting {} producers and {} consumers", producers, consumers);

    let queue = Arc::new(RingBufferQueue::<u32>::new(capacity));
    let start_time = Instant::now();

    let consumer_threads: Vec<_> = (0..consumers)
        .map(|_| {
            let q = queue.clone();
            thread::spawn(move || {
                let mut local_sum = 0u64;
                loop {
                    match q.pop() {
                        Some(0) => break,
                        Some(value) => local_sum += value as u64,
                        None => thread::yield_now(),
                    }
                }
                local_sum
            })
        })
        .collect();

    let push = |q: &RingBufferQueue<u32>, mut value: u32| {
        while let Err(Full(rejected)) = q.push(value) {
            value = rejected;
            thread::yield_now();
        }
    };

    let producer_threads: Vec<_> = (0..producers)
        .map(|_| {
            let q = queue.clone();
            thread::spawn(move || {
                for value in (1..=n).rev() {
                    push(&q, value);
                }
            })
        })
        .collect();

    for handle in producer_threads {
        handle.join().unwrap();
    }
    for _ in 0..consumers {
        push(&queue, 0);
    }
    let sums: Vec<u64> = consumer_threads.into_iter().map(|h| h.join().unwrap()).collect();

    report(&sums, producers, n, start_time);
}

fn report(sums: &[u64], producers: usize, n: u32, start_time: Instant) {
    let total_sum: u64 = sums.iter().sum();
    // The expected sum is N*(N+1)/2 * PRODUCERS
    let expected_sum = (n as u64 * (n as u64 + 1) / 2) * producers as u64;

    println!("Execution time: {:?}", start_time.elapsed());
    println!("Total sum: {}", total_sum);
    println!("Expected sum: {}", expected_sum);

    if total_sum != expected_sum {
        println!("ERROR: Sum mismatch! Difference: {}", total_sum as i64 - expected_sum as i64);
    } else {
        println!("SUCCESS: All elements were correctly processed.");
    }

    for (i, &sum) in sums.iter().enumerate() {
        println!("Consumer {}: sum = {}", i, sum);
    }
}
