//! Scripted walkthroughs driven from the CLI (`cargo run -- --diagnose` /
//! `--smoke-test`): a quick look at each queue type's behavior without
//! reaching for the test harness.
//!
//! `smoke_test` runs the same push(1,2,3)/pop-three-times sequence across
//! all four queue types so their output can be compared side by side.

use crate::{BLQueue, LLQueue, RingsQueue, SimpleQueue};
use colored::*;

/// Runs the push(1,2,3)/pop x3 sequence on every queue type and prints
/// what each one returned, the way `simpleTester.c`'s `basic_test` did
/// for its three queues.
pub fn smoke_test() {
    println!("{}", "Running cross-queue smoke test...".yellow().bold());

    {
        let q = SimpleQueue::new();
        q.push(1);
        q.push(2);
        q.push(3);
        println!(
            "SimpleQueue: {} {} {}",
            q.pop(),
            q.pop(),
            q.pop()
        );
    }

    {
        let q: RingsQueue = RingsQueue::new();
        q.push(1);
        q.push(2);
        q.push(3);
        println!("RingsQueue:  {} {} {}", q.pop(), q.pop(), q.pop());
    }

    {
        let q: LLQueue = LLQueue::new(1);
        let mut h = q.register(0);
        q.push(&mut h, 1);
        q.push(&mut h, 2);
        q.push(&mut h, 3);
        println!(
            "LLQueue:     {} {} {}",
            q.pop(&mut h),
            q.pop(&mut h),
            q.pop(&mut h)
        );
    }

    {
        let q: BLQueue = BLQueue::new(1);
        let mut h = q.register(0);
        q.push(&mut h, 1);
        q.push(&mut h, 2);
        q.push(&mut h, 3);
        println!(
            "BLQueue:     {} {} {}",
            q.pop(&mut h),
            q.pop(&mut h),
            q.pop(&mut h)
        );
    }

    println!("{}", "Smoke test complete.".green().bold());
}

/// Diagnostics for `LLQueue`: a single-threaded push/pop, then a pop
/// performed from a spawned thread to show hazard-pointer protection
/// crossing thread boundaries.
pub fn diagnose_ll_queue() {
    println!("Starting LLQueue diagnostics");

    let queue: LLQueue = LLQueue::new(2);

    {
        let mut h = queue.register(0);
        println!("Pushing value 42");
        queue.push(&mut h, 42);

        println!("Popping value");
        match queue.pop(&mut h) {
            0 => println!("Pop failed - queue was empty"),
            value => println!("Popped value: {value}"),
        }
    }

    println!("\nTesting concurrent operations with hazard pointer protection");
    let queue = std::sync::Arc::new(LLQueue::<64, 32>::new(2));
    {
        let mut h = queue.register(0);
        queue.push(&mut h, 42);
    }

    let queue_clone = std::sync::Arc::clone(&queue);
    let handle = std::thread::spawn(move || {
        let mut h = queue_clone.register(1);
        println!("Thread: Popping value from queue");
        let result = queue_clone.pop(&mut h);
        println!("Thread: Pop result: {result}");
    });
    handle.join().expect("diagnostic thread panicked");

    println!("Diagnostics complete");
}

/// Diagnostics for `BLQueue`, exercising the node-rollover path so a
/// reader can see the successor allocation happen.
pub fn diagnose_bl_queue() {
    println!("Starting BLQueue diagnostics");

    let queue: BLQueue<4> = BLQueue::new(1);
    let mut h = queue.register(0);

    for v in 1..=5u64 {
        println!("Pushing value {v}");
        queue.push(&mut h, v);
    }

    println!("Node should have rolled over after the 4th push; draining:");
    loop {
        match queue.pop(&mut h) {
            0 => break,
            v => println!("Popped: {v}"),
        }
    }

    println!("Diagnostics complete");
}
