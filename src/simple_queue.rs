//! Two-lock Michael–Scott queue: one mutex guarding the head, one guarding
//! the tail, each end progressing independently of the other.

use crate::value::{assert_pushable, Value, EMPTY};
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Mutex;

struct Node {
    item: Value,
    next: AtomicPtr<Node>,
}

impl Node {
    fn new(item: Value) -> *mut Node {
        Box::into_raw(Box::new(Node {
            item,
            next: AtomicPtr::new(ptr::null_mut()),
        }))
    }
}

/// A multi-producer, multi-consumer FIFO queue with independent
/// head/tail locks. `push` only contends with other pushers; `pop` only
/// contends with other poppers.
pub struct SimpleQueue {
    head: Mutex<*mut Node>,
    tail: Mutex<*mut Node>,
}

// Safety: every raw pointer field is only ever read or written while
// holding its corresponding mutex.
unsafe impl Send for SimpleQueue {}
unsafe impl Sync for SimpleQueue {}

impl SimpleQueue {
    /// Allocates a fresh queue holding a single sentinel node.
    pub fn new() -> Self {
        let sentinel = Node::new(EMPTY);
        SimpleQueue {
            head: Mutex::new(sentinel),
            tail: Mutex::new(sentinel),
        }
    }

    /// Appends `item` to the tail. `item` must not be the `EMPTY`
    /// sentinel.
    pub fn push(&self, item: Value) {
        assert_pushable(item);
        let node = Node::new(item);
        let mut tail = self.tail.lock().expect("tail mutex poisoned");
        unsafe {
            (**tail).next.store(node, Ordering::Release);
        }
        *tail = node;
    }

    /// Removes and returns the front value, or `EMPTY` if only the
    /// sentinel remains.
    pub fn pop(&self) -> Value {
        let mut head = self.head.lock().expect("head mutex poisoned");
        let begin = unsafe { (**head).next.load(Ordering::Acquire) };
        if begin.is_null() {
            return EMPTY;
        }
        let val = unsafe { (*begin).item };
        let old_head = *head;
        *head = begin;
        unsafe {
            drop(Box::from_raw(old_head));
        }
        val
    }

    /// Snapshot: true iff the sentinel's `next` is currently null.
    pub fn is_empty(&self) -> bool {
        let head = self.head.lock().expect("head mutex poisoned");
        unsafe { (**head).next.load(Ordering::Acquire).is_null() }
    }
}

impl Default for SimpleQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SimpleQueue {
    fn drop(&mut self) {
        let mut node = *self.head.get_mut().expect("head mutex poisoned");
        while !node.is_null() {
            let next = unsafe { (*node).next.load(Ordering::Relaxed) };
            unsafe {
                drop(Box::from_raw(node));
            }
            node = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn fresh_queue_is_empty() {
        let q = SimpleQueue::new();
        assert!(q.is_empty());
        assert_eq!(q.pop(), EMPTY);
    }

    #[test]
    fn single_threaded_fifo_order() {
        let q = SimpleQueue::new();
        q.push(1);
        q.push(2);
        q.push(3);
        assert_eq!(q.pop(), 1);
        assert_eq!(q.pop(), 2);
        assert_eq!(q.pop(), 3);
        assert_eq!(q.pop(), EMPTY);
        assert!(q.is_empty());
    }

    #[test]
    fn two_producers_one_consumer_preserves_program_order_per_producer() {
        let q = Arc::new(SimpleQueue::new());
        let q1 = Arc::clone(&q);
        let q2 = Arc::clone(&q);

        let producer1 = thread::spawn(move || {
            for v in 1..=50u64 {
                q1.push(v);
            }
        });
        let producer2 = thread::spawn(move || {
            for v in 1000..=1049u64 {
                q2.push(v);
            }
        });
        producer1.join().unwrap();
        producer2.join().unwrap();

        let mut from_p1 = Vec::new();
        let mut from_p2 = Vec::new();
        loop {
            match q.pop() {
                EMPTY => break,
                v if v < 1000 => from_p1.push(v),
                v => from_p2.push(v),
            }
        }

        assert_eq!(from_p1, (1..=50).collect::<Vec<_>>());
        assert_eq!(from_p2, (1000..=1049).collect::<Vec<_>>());
    }
}
