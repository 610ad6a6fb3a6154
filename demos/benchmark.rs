//! Runs the producer/consumer harness against both queues and prints a summary.
//!
//! Usage: `cargo run --release --example benchmark [producers] [consumers] [items]`

use lockfree_queue_rs::harness::{self, HarnessConfig, HarnessReport};
use lockfree_queue_rs::{ConcurrentQueue, HarnessError, ListQueue, RingBufferQueue};
use std::env;
use std::process;

// Capacity of the bounded queue
const CAPACITY: usize = 1024;
// Timing runs per queue
const TIMING_RUNS: usize = 5;

fn main() {
    let config = match parse_args() {
        Some(config) => config,
        None => {
            eprintln!("usage: benchmark [producers] [consumers] [items_per_producer]");
            process::exit(2);
        }
    };

    println!("Lock-free Queue Benchmarks");
    println!("--------------------------\n");
    println!("Number of CPUs: {}", num_cpus::get());
    println!(
        "Producers: {}, consumers: {}, items per producer: {}\n",
        config.producers, config.consumers, config.items_per_producer
    );

    let mut summary = Vec::new();
    for (name, result) in [
        ("ListQueue", bench("ListQueue", &config, ListQueue::<u64>::new)),
        (
            "RingBufferQueue",
            bench("RingBufferQueue", &config, || RingBufferQueue::<u64>::new(CAPACITY)),
        ),
    ] {
        match result {
            Ok(reports) => summary.push((name, reports)),
            Err(err) => {
                eprintln!("{}: {}", name, err);
                process::exit(1);
            }
        }
    }

    println!("\nSummary Results:");
    println!("{:<20} {:>20} {:>12}", "Queue Type", "Throughput (Mops/s)", "Balanced");
    println!("{:<20} {:>20} {:>12}", "----------", "-------------------", "--------");
    for (name, reports) in summary {
        let avg = reports.iter().map(|r| r.throughput()).sum::<f64>() / reports.len() as f64;
        let balanced = reports.iter().all(HarnessReport::is_balanced);
        println!("{:<20} {:>20.2} {:>12}", name, avg / 1e6, balanced);
    }
}

fn parse_args() -> Option<HarnessConfig> {
    let mut config = HarnessConfig::default();
    let mut args = env::args().skip(1);
    if let Some(arg) = args.next() {
        config = config.with_producers(arg.parse().ok()?);
    }
    if let Some(arg) = args.next() {
        config = config.with_consumers(arg.parse().ok()?);
    }
    if let Some(arg) = args.next() {
        config = config.with_items_per_producer(arg.parse().ok()?);
    }
    Some(config)
}

fn bench<Q, F>(name: &str, config: &HarnessConfig, make: F) -> Result<Vec<HarnessReport>, HarnessError>
where
    Q: ConcurrentQueue<u64>,
    F: Fn() -> Q,
{
    println!("{}:", name);
    let mut reports = Vec::with_capacity(TIMING_RUNS);
    for run in 0..TIMING_RUNS {
        let queue = make();
        let report = harness::run(config, &queue)?;
        println!(
            "  run {}: {:>10.2?}  {:>8.2} Mops/s  sum {} / {}",
            run,
            report.elapsed,
            report.throughput() / 1e6,
            report.consumed_sum,
            report.expected_sum
        );
        reports.push(report);
    }
    Ok(reports)
}
