use clap::Parser;
use colored::*;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use unbounded_queues::{diagnostics, BLQueue, LLQueue, RingsQueue, SimpleQueue, EMPTY};

/// Command-line driver for the four queue implementations in this crate.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Enable verbose per-queue output where the demo supports it
    #[arg(short, long)]
    verbose: bool,

    /// Run a multi-threaded stress test across all four queue types
    #[arg(short, long)]
    stress_test: bool,

    /// Run a smaller push-then-drain verification (faster than --stress-test)
    #[arg(long)]
    quick_test: bool,

    /// Run the cross-queue push(1,2,3)/pop x3 parity check
    #[arg(long)]
    smoke_test: bool,

    /// Run scripted LLQueue and BLQueue diagnostics
    #[arg(long)]
    diagnose: bool,
}

fn main() {
    let args = Args::parse();

    println!("{}", "Unbounded MPMC Queues Demonstration".green().bold());
    println!("=====================================\n");

    if args.diagnose {
        diagnostics::diagnose_ll_queue();
        println!();
        diagnostics::diagnose_bl_queue();
        return;
    }

    if args.smoke_test {
        diagnostics::smoke_test();
        return;
    }

    if args.stress_test {
        stress_test(args.verbose);
    } else if args.quick_test {
        quick_verification_test(args.verbose);
    } else {
        basic_demo();
    }

    println!("\n{}", "Demonstration complete!".green().bold());
}

/// Pushes 1, 2, 3 onto each queue type and drains it, narrating what each
/// design is doing differently along the way.
fn basic_demo() {
    println!("{}", "\nRunning basic demonstration...".yellow().bold());

    println!("\n{}", "SimpleQueue (two-lock Michael-Scott):".cyan());
    let q = SimpleQueue::new();
    q.push(1);
    q.push(2);
    q.push(3);
    while !q.is_empty() {
        println!("  popped: {}", q.pop());
    }

    println!("\n{}", "RingsQueue (linked ring buffers):".cyan());
    let q: RingsQueue = RingsQueue::new();
    q.push(1);
    q.push(2);
    q.push(3);
    while !q.is_empty() {
        println!("  popped: {}", q.pop());
    }

    println!("\n{}", "LLQueue (lock-free, hazard pointers):".cyan());
    let q: LLQueue = LLQueue::new(1);
    let mut h = q.register(0);
    q.push(&mut h, 1);
    q.push(&mut h, 2);
    q.push(&mut h, 3);
    while !q.is_empty(&mut h) {
        println!("  popped: {}", q.pop(&mut h));
    }

    println!("\n{}", "BLQueue (lock-free, batched slots):".cyan());
    let q: BLQueue = BLQueue::new(1);
    let mut h = q.register(0);
    q.push(&mut h, 1);
    q.push(&mut h, 2);
    q.push(&mut h, 3);
    while !q.is_empty(&mut h) {
        println!("  popped: {}", q.pop(&mut h));
    }
}

const STRESS_PRODUCERS: usize = 4;
const STRESS_CONSUMERS: usize = 4;
const STRESS_OPS_PER_PRODUCER: u64 = 2_000;

/// Spawns producer and consumer threads against each queue type and checks
/// that every pushed value is accounted for once all threads have joined.
fn stress_test(verbose: bool) {
    println!(
        "{}",
        "\nRunning stress test with concurrent operations..."
            .yellow()
            .bold()
    );
    println!(
        "{STRESS_PRODUCERS} producers x {STRESS_OPS_PER_PRODUCER} pushes, {STRESS_CONSUMERS} consumers draining"
    );
    let start_time = Instant::now();

    println!("\n{}", "SimpleQueue:".cyan());
    stress_simple_queue(verbose);

    println!("\n{}", "RingsQueue:".cyan());
    stress_rings_queue(verbose);

    println!("\n{}", "LLQueue:".cyan());
    stress_ll_queue(verbose);

    println!("\n{}", "BLQueue:".cyan());
    stress_bl_queue(verbose);

    let elapsed = Instant::now().duration_since(start_time);
    println!("\nStress test completed in {:.2}s.", elapsed.as_secs_f32());
}

fn report_conservation(pushed: u64, popped: u64) {
    println!(
        "  pushed {pushed}, popped {popped} -> conserved: {}",
        pushed == popped
    );
}

fn stress_simple_queue(verbose: bool) {
    let total_pushed = STRESS_PRODUCERS as u64 * STRESS_OPS_PER_PRODUCER;
    let queue = Arc::new(SimpleQueue::new());
    let popped = Arc::new(AtomicU64::new(0));

    let mut handles = Vec::new();
    for p in 0..STRESS_PRODUCERS {
        let queue = Arc::clone(&queue);
        handles.push(thread::spawn(move || {
            let base = (p as u64) * 1_000_000 + 1;
            for i in 0..STRESS_OPS_PER_PRODUCER {
                queue.push(base + i);
            }
        }));
    }
    for _ in 0..STRESS_CONSUMERS {
        let queue = Arc::clone(&queue);
        let popped = Arc::clone(&popped);
        handles.push(thread::spawn(move || {
            while popped.load(Ordering::Relaxed) < total_pushed {
                if queue.pop() != EMPTY {
                    popped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }));
    }
    for handle in handles {
        handle.join().expect("stress thread panicked");
    }
    if verbose {
        println!("  queue drained to empty: {}", queue.is_empty());
    }
    report_conservation(total_pushed, popped.load(Ordering::Relaxed));
}

fn stress_rings_queue(verbose: bool) {
    let total_pushed = STRESS_PRODUCERS as u64 * STRESS_OPS_PER_PRODUCER;
    let queue: Arc<RingsQueue> = Arc::new(RingsQueue::new());
    let popped = Arc::new(AtomicU64::new(0));

    let mut handles = Vec::new();
    for p in 0..STRESS_PRODUCERS {
        let queue = Arc::clone(&queue);
        handles.push(thread::spawn(move || {
            let base = (p as u64) * 1_000_000 + 1;
            for i in 0..STRESS_OPS_PER_PRODUCER {
                queue.push(base + i);
            }
        }));
    }
    for _ in 0..STRESS_CONSUMERS {
        let queue = Arc::clone(&queue);
        let popped = Arc::clone(&popped);
        handles.push(thread::spawn(move || {
            while popped.load(Ordering::Relaxed) < total_pushed {
                if queue.pop() != EMPTY {
                    popped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }));
    }
    for handle in handles {
        handle.join().expect("stress thread panicked");
    }
    if verbose {
        println!("  queue drained to empty: {}", queue.is_empty());
    }
    report_conservation(total_pushed, popped.load(Ordering::Relaxed));
}

fn stress_ll_queue(verbose: bool) {
    let total_threads = STRESS_PRODUCERS + STRESS_CONSUMERS;
    let total_pushed = STRESS_PRODUCERS as u64 * STRESS_OPS_PER_PRODUCER;
    let queue: Arc<LLQueue> = Arc::new(LLQueue::new(total_threads));
    let popped = Arc::new(AtomicU64::new(0));

    let mut handles = Vec::new();
    for p in 0..STRESS_PRODUCERS {
        let queue = Arc::clone(&queue);
        handles.push(thread::spawn(move || {
            let mut h = queue.register(p);
            let base = (p as u64) * 1_000_000 + 1;
            for i in 0..STRESS_OPS_PER_PRODUCER {
                queue.push(&mut h, base + i);
            }
        }));
    }
    for c in 0..STRESS_CONSUMERS {
        let queue = Arc::clone(&queue);
        let popped = Arc::clone(&popped);
        handles.push(thread::spawn(move || {
            let mut h = queue.register(STRESS_PRODUCERS + c);
            while popped.load(Ordering::Relaxed) < total_pushed {
                if queue.pop(&mut h) != EMPTY {
                    popped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }));
    }
    for handle in handles {
        handle.join().expect("stress thread panicked");
    }
    if verbose {
        println!("  registered {total_threads} hazard-pointer threads");
    }
    report_conservation(total_pushed, popped.load(Ordering::Relaxed));
}

fn stress_bl_queue(verbose: bool) {
    let total_threads = STRESS_PRODUCERS + STRESS_CONSUMERS;
    let total_pushed = STRESS_PRODUCERS as u64 * STRESS_OPS_PER_PRODUCER;
    let queue: Arc<BLQueue> = Arc::new(BLQueue::new(total_threads));
    let popped = Arc::new(AtomicU64::new(0));

    let mut handles = Vec::new();
    for p in 0..STRESS_PRODUCERS {
        let queue = Arc::clone(&queue);
        handles.push(thread::spawn(move || {
            let mut h = queue.register(p);
            let base = (p as u64) * 1_000_000 + 1;
            for i in 0..STRESS_OPS_PER_PRODUCER {
                queue.push(&mut h, base + i);
            }
        }));
    }
    for c in 0..STRESS_CONSUMERS {
        let queue = Arc::clone(&queue);
        let popped = Arc::clone(&popped);
        handles.push(thread::spawn(move || {
            let mut h = queue.register(STRESS_PRODUCERS + c);
            while popped.load(Ordering::Relaxed) < total_pushed {
                if queue.pop(&mut h) != EMPTY {
                    popped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }));
    }
    for handle in handles {
        handle.join().expect("stress thread panicked");
    }
    if verbose {
        println!("  registered {total_threads} hazard-pointer threads");
    }
    report_conservation(total_pushed, popped.load(Ordering::Relaxed));
}

/// A faster, single-producer-then-drain sanity check for each queue type.
fn quick_verification_test(verbose: bool) {
    println!("{}", "\nRunning quick verification test...".yellow().bold());
    let n = 50u64;

    let q = SimpleQueue::new();
    for i in 1..=n {
        q.push(i);
    }
    let mut drained = 0u64;
    while q.pop() != EMPTY {
        drained += 1;
    }
    assert_eq!(drained, n);
    if verbose {
        println!("  SimpleQueue: drained {drained} values");
    }

    let q: RingsQueue = RingsQueue::new();
    for i in 1..=n {
        q.push(i);
    }
    let mut drained = 0u64;
    while q.pop() != EMPTY {
        drained += 1;
    }
    assert_eq!(drained, n);
    if verbose {
        println!("  RingsQueue: drained {drained} values");
    }

    let q: LLQueue = LLQueue::new(1);
    let mut h = q.register(0);
    for i in 1..=n {
        q.push(&mut h, i);
    }
    let mut drained = 0u64;
    while q.pop(&mut h) != EMPTY {
        drained += 1;
    }
    assert_eq!(drained, n);
    if verbose {
        println!("  LLQueue: drained {drained} values");
    }

    let q: BLQueue = BLQueue::new(1);
    let mut h = q.register(0);
    for i in 1..=n {
        q.push(&mut h, i);
    }
    let mut drained = 0u64;
    while q.pop(&mut h) != EMPTY {
        drained += 1;
    }
    assert_eq!(drained, n);
    if verbose {
        println!("  BLQueue: drained {drained} values");
    }

    println!("{}", "Quick verification test passed!".green().bold());
}
