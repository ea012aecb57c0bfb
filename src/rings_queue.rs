//! A singly-linked list of fixed-capacity ring-buffer nodes, guarded by
//! independent push/pop locks. Producers and consumers progress in
//! parallel; only the current tail ring ever accepts new values, and only
//! the current head ring is ever drained.

use crate::value::{assert_pushable, Value, EMPTY};
use std::cell::UnsafeCell;
use std::ptr;
use std::sync::atomic::{AtomicI64, AtomicPtr, Ordering};
use std::sync::Mutex;

/// `RING_SIZE` slots per node. `push_idx`/`pop_idx` climb without wrapping;
/// the slot touched is always `idx % RING_SIZE`. They are atomic because
/// the consumer reads `push_idx` (and the producer reads `pop_idx`) across
/// the lock boundary the other side holds; `buffer` itself is plain
/// storage, since the two locks' disjoint-index invariant (0 <= pop_idx <=
/// push_idx <= pop_idx + RING_SIZE) already keeps producer and consumer
/// from ever touching the same slot at the same time.
struct RingNode<const RING_SIZE: usize> {
    next: AtomicPtr<RingNode<RING_SIZE>>,
    buffer: UnsafeCell<[Value; RING_SIZE]>,
    push_idx: AtomicI64,
    pop_idx: AtomicI64,
}

// Safety: see the disjoint-index reasoning on `buffer` above.
unsafe impl<const RING_SIZE: usize> Sync for RingNode<RING_SIZE> {}

impl<const RING_SIZE: usize> RingNode<RING_SIZE> {
    fn new() -> *mut Self {
        Box::into_raw(Box::new(RingNode {
            next: AtomicPtr::new(ptr::null_mut()),
            buffer: UnsafeCell::new([EMPTY; RING_SIZE]),
            push_idx: AtomicI64::new(0),
            pop_idx: AtomicI64::new(0),
        }))
    }
}

/// A FIFO queue of ring-buffer nodes. `RING_SIZE` (default 1024, a power
/// of two so the modulo-index math stays cheap) is the slot count per ring.
pub struct RingsQueue<const RING_SIZE: usize = 1024> {
    push_lock: Mutex<*mut RingNode<RING_SIZE>>,
    pop_lock: Mutex<*mut RingNode<RING_SIZE>>,
}

// Safety: every raw pointer is only read or written while holding the
// lock that owns it; cross-lock reads go through the atomic idx fields.
unsafe impl<const RING_SIZE: usize> Send for RingsQueue<RING_SIZE> {}
unsafe impl<const RING_SIZE: usize> Sync for RingsQueue<RING_SIZE> {}

impl<const RING_SIZE: usize> RingsQueue<RING_SIZE> {
    /// Allocates a fresh queue holding a single, empty ring node.
    pub fn new() -> Self {
        let node = RingNode::new();
        RingsQueue {
            push_lock: Mutex::new(node),
            pop_lock: Mutex::new(node),
        }
    }

    /// Appends `item`. If the tail ring is full, allocates and links a new
    /// ring node and deposits `item` as its first slot.
    pub fn push(&self, item: Value) {
        assert_pushable(item);
        let mut tail = self.push_lock.lock().expect("push lock poisoned");
        // Safety: `*tail` is always a live node while the push lock is held.
        let node = unsafe { &**tail };
        let push_idx = node.push_idx.load(Ordering::Relaxed);
        let pop_idx = node.pop_idx.load(Ordering::Acquire);

        if push_idx - pop_idx < RING_SIZE as i64 {
            unsafe {
                (*node.buffer.get())[(push_idx as usize) % RING_SIZE] = item;
            }
            node.push_idx.store(push_idx + 1, Ordering::Release);
        } else {
            let new_node = RingNode::new();
            // Safety: freshly allocated, not yet visible to any other thread.
            let new_ref = unsafe { &*new_node };
            unsafe {
                (*new_ref.buffer.get())[0] = item;
            }
            new_ref.push_idx.store(1, Ordering::Relaxed);
            node.next.store(new_node, Ordering::Release);
            *tail = new_node;
        }
    }

    /// Removes and returns the front value. If the head ring is exhausted
    /// and a successor exists, advances head (freeing the drained ring)
    /// before retrying; returns `EMPTY` if nothing remains.
    pub fn pop(&self) -> Value {
        let mut head = self.pop_lock.lock().expect("pop lock poisoned");
        let mut head_ptr = *head;
        // Safety: `head_ptr` always points to a live node while the pop
        // lock is held.
        let mut node = unsafe { &*head_ptr };
        let pop_idx = node.pop_idx.load(Ordering::Relaxed);
        let next = node.next.load(Ordering::Acquire);

        let mut pop_idx = pop_idx;
        if !next.is_null() && pop_idx == node.push_idx.load(Ordering::Acquire) {
            let drained = head_ptr;
            head_ptr = next;
            *head = head_ptr;
            node = unsafe { &*head_ptr };
            pop_idx = node.pop_idx.load(Ordering::Relaxed);
            unsafe {
                drop(Box::from_raw(drained));
            }
        }

        if pop_idx == node.push_idx.load(Ordering::Acquire) {
            return EMPTY;
        }
        let val = unsafe { (*node.buffer.get())[(pop_idx as usize) % RING_SIZE] };
        node.pop_idx.store(pop_idx + 1, Ordering::Release);
        val
    }

    /// Snapshot: true iff the head ring is exhausted and has no successor.
    pub fn is_empty(&self) -> bool {
        let head = self.pop_lock.lock().expect("pop lock poisoned");
        let node = unsafe { &**head };
        node.pop_idx.load(Ordering::Acquire) == node.push_idx.load(Ordering::Acquire)
            && node.next.load(Ordering::Acquire).is_null()
    }
}

impl<const RING_SIZE: usize> Default for RingsQueue<RING_SIZE> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const RING_SIZE: usize> Drop for RingsQueue<RING_SIZE> {
    fn drop(&mut self) {
        let mut node = *self.pop_lock.get_mut().expect("pop lock poisoned");
        while !node.is_null() {
            let next = unsafe { (*node).next.load(Ordering::Relaxed) };
            unsafe {
                drop(Box::from_raw(node));
            }
            node = next;
        }
    }
}
