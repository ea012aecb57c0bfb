//! Lock-free, one-node-per-element Michael–Scott queue reclaimed with
//! hazard pointers.
//!
//! The head node is always a sentinel whose `item` exists only to be
//! atomically claimed: `pop` exchanges it to `EMPTY` to win the right to
//! advance past it, then returns the value stored in the node that
//! becomes the *new* sentinel. This variant is deliberately preserved
//! rather than replaced with a CAS-on-`next` scheme.

use crate::hazard::{HazardPointers, ThreadHandle};
use crate::value::{assert_pushable, Value, EMPTY};
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU64, Ordering};

struct Node {
    item: AtomicU64,
    next: AtomicPtr<Node>,
}

impl Node {
    fn new(item: Value) -> *mut Node {
        Box::into_raw(Box::new(Node {
            item: AtomicU64::new(item),
            next: AtomicPtr::new(ptr::null_mut()),
        }))
    }
}

/// Default sizing for the hazard-pointer registry backing this queue.
pub const MAX_THREADS: usize = 128;
pub const RETIRED_THRESHOLD: usize = 100;

/// A lock-free MPMC FIFO queue. `MAX_THREADS`/`RETIRED_THRESHOLD` size the
/// hazard-pointer registry used to reclaim popped nodes.
pub struct LLQueue<const MAX_THREADS: usize = 128, const RETIRED_THRESHOLD: usize = 100> {
    head: AtomicPtr<Node>,
    tail: AtomicPtr<Node>,
    hp: HazardPointers<Node, MAX_THREADS, RETIRED_THRESHOLD>,
}

/// A thread's capability to call [`LLQueue::push`]/`pop`/`is_empty`.
pub type LLHandle<'q, const MAX_THREADS: usize, const RETIRED_THRESHOLD: usize> =
    ThreadHandle<'q, Node, MAX_THREADS, RETIRED_THRESHOLD>;

impl<const MAX_THREADS: usize, const RETIRED_THRESHOLD: usize>
    LLQueue<MAX_THREADS, RETIRED_THRESHOLD>
{
    /// Allocates a fresh queue with a single sentinel node and a
    /// hazard-pointer registry for up to `num_threads` participants.
    pub fn new(num_threads: usize) -> Self {
        let sentinel = Node::new(EMPTY);
        LLQueue {
            head: AtomicPtr::new(sentinel),
            tail: AtomicPtr::new(sentinel),
            hp: HazardPointers::new(num_threads),
        }
    }

    /// Binds the calling thread to `thread_id` for hazard-pointer use on
    /// this queue. Must be called once per thread before `push`/`pop`.
    pub fn register(
        &self,
        thread_id: usize,
    ) -> LLHandle<'_, MAX_THREADS, RETIRED_THRESHOLD> {
        self.hp.register(thread_id)
    }

    /// Appends `item`. Loops protecting the current tail and racing to
    /// CAS it onto `tail->next`; on success, best-effort-advances the
    /// queue's tail (a lagging tail is tolerated — a losing CAS here just
    /// means a future push's retry will see the fresher tail).
    pub fn push(
        &self,
        handle: &mut LLHandle<'_, MAX_THREADS, RETIRED_THRESHOLD>,
        item: Value,
    ) {
        assert_pushable(item);
        let node = Node::new(item);
        loop {
            let tail = handle.protect(&self.tail);
            // Safety: hazard-protected, so `tail` cannot be freed here.
            let tail_ref = unsafe { &*tail };
            if tail_ref
                .next
                .compare_exchange(ptr::null_mut(), node, Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
        }
        self.tail.store(node, Ordering::Release);
        handle.clear();
    }

    /// Claims the current head's item slot (stamping it `EMPTY`); on
    /// success reads the value from the node that becomes the new
    /// sentinel, advances head, and retires the old one. If another
    /// thread already claimed the head, retries with a fresh protect.
    pub fn pop(&self, handle: &mut LLHandle<'_, MAX_THREADS, RETIRED_THRESHOLD>) -> Value {
        loop {
            let head = handle.protect(&self.head);
            // Safety: hazard-protected.
            let head_ref = unsafe { &*head };
            let next = head_ref.next.load(Ordering::Acquire);
            if next.is_null() {
                handle.clear();
                return EMPTY;
            }
            let claimed = head_ref.item.swap(EMPTY, Ordering::AcqRel);
            if claimed != EMPTY {
                // Safety: `next` was read via an acquire load of a field
                // on the hazard-protected head; it cannot be freed while
                // we hold that protection.
                let value = unsafe { &*next }.item.load(Ordering::Acquire);
                self.head.store(next, Ordering::Release);
                handle.clear();
                handle.retire(head);
                return value;
            }
            // Another popper already claimed this head; retry.
        }
    }

    /// Snapshot: true iff the (possibly stale) head's `next` is null.
    pub fn is_empty(&self, handle: &mut LLHandle<'_, MAX_THREADS, RETIRED_THRESHOLD>) -> bool {
        let head = handle.protect(&self.head);
        let next = unsafe { &*head }.next.load(Ordering::Acquire);
        handle.clear();
        next.is_null()
    }
}

impl<const MAX_THREADS: usize, const RETIRED_THRESHOLD: usize> Drop
    for LLQueue<MAX_THREADS, RETIRED_THRESHOLD>
{
    fn drop(&mut self) {
        let mut node = *self.head.get_mut();
        while !node.is_null() {
            let next = unsafe { (*node).next.load(Ordering::Relaxed) };
            unsafe {
                drop(Box::from_raw(node));
            }
            node = next;
        }
        self.hp.finalize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn fresh_queue_is_empty() {
        let q: LLQueue = LLQueue::new(1);
        let mut h = q.register(0);
        assert!(q.is_empty(&mut h));
        assert_eq!(q.pop(&mut h), EMPTY);
    }

    #[test]
    fn single_threaded_fifo_order() {
        let q: LLQueue = LLQueue::new(1);
        let mut h = q.register(0);
        q.push(&mut h, 1);
        q.push(&mut h, 2);
        q.push(&mut h, 3);
        assert_eq!(q.pop(&mut h), 1);
        assert_eq!(q.pop(&mut h), 2);
        assert_eq!(q.pop(&mut h), 3);
        assert_eq!(q.pop(&mut h), EMPTY);
        assert!(q.is_empty(&mut h));
    }

    #[test]
    fn two_producers_one_consumer_preserves_program_order_per_producer() {
        let q: Arc<LLQueue> = Arc::new(LLQueue::new(3));
        let q1 = Arc::clone(&q);
        let q2 = Arc::clone(&q);

        let producer1 = thread::spawn(move || {
            let mut h = q1.register(0);
            for v in 1..=200u64 {
                q1.push(&mut h, v);
            }
        });
        let producer2 = thread::spawn(move || {
            let mut h = q2.register(1);
            for v in 10_000..=10_199u64 {
                q2.push(&mut h, v);
            }
        });
        producer1.join().unwrap();
        producer2.join().unwrap();

        let mut h = q.register(2);
        let mut from_p1 = Vec::new();
        let mut from_p2 = Vec::new();
        loop {
            match q.pop(&mut h) {
                EMPTY => break,
                v if v < 10_000 => from_p1.push(v),
                v => from_p2.push(v),
            }
        }
        assert_eq!(from_p1, (1..=200).collect::<Vec<_>>());
        assert_eq!(from_p2, (10_000..=10_199).collect::<Vec<_>>());
    }

    /// No value pushed is ever observed twice across concurrent producers
    /// and consumers, and every popped value was genuinely pushed.
    #[test]
    fn concurrent_pushes_and_pops_deliver_each_value_exactly_once() {
        use std::collections::HashSet;
        use std::sync::Mutex;

        let q: Arc<LLQueue> = Arc::new(LLQueue::new(4));
        let producers = 2;
        let per_producer = 500u64;
        let collected = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for p in 0..producers {
            let q = Arc::clone(&q);
            handles.push(thread::spawn(move || {
                let mut h = q.register(p as usize);
                let base = (p as u64) * 1_000_000;
                for i in 0..per_producer {
                    q.push(&mut h, base + i + 1);
                }
            }));
        }
        for p in 0..producers {
            let q = Arc::clone(&q);
            let collected = Arc::clone(&collected);
            handles.push(thread::spawn(move || {
                let mut h = q.register(producers as usize + p as usize);
                let mut popped = 0u64;
                while popped < per_producer {
                    let v = q.pop(&mut h);
                    if v != EMPTY {
                        collected.lock().unwrap().push(v);
                        popped += 1;
                    }
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let values = collected.lock().unwrap();
        let unique: HashSet<_> = values.iter().copied().collect();
        assert_eq!(unique.len(), values.len(), "a value was delivered twice");
        assert_eq!(values.len() as u64, producers * per_producer);
    }
}
