//! Hazard-pointer safe memory reclamation.
//!
//! Gives a thread two abilities: publish "I am about to dereference `P`" so
//! no other thread frees `P` while the publication stands, and hand off a
//! retired node for reclamation once no such publication references it
//! anymore.
//!
//! The registry is generic over the node type it protects and over two
//! compile-time constants: `MAX_THREADS` (the size of the hazard-slot
//! array) and `RETIRED_THRESHOLD` (a thread's retired row triggers a scan
//! once it holds one more than this many entries). Each of [`crate::LLQueue`]
//! and [`crate::BLQueue`] owns its own registry sized for its node type.
//!
//! Unlike the thread-local `_thread_id` of the C original, registration
//! here returns a [`ThreadHandle`] that borrows the registry and carries
//! the assigned id. There is no mutable global thread-id state: a handle
//! is the capability to call `protect`/`clear`/`retire`, and its `&mut
//! self` methods make it impossible for two threads to drive the same
//! handle concurrently without introducing their own (unnecessary)
//! synchronization.

use crossbeam_utils::CachePadded;
use std::cell::UnsafeCell;
use std::collections::HashSet;
use std::marker::PhantomData;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

/// Per-thread buffer of nodes retired by that thread but not yet freed.
/// Exclusively owned by the thread holding the matching [`ThreadHandle`];
/// no other thread ever reads or writes this row (spec invariant I1).
struct RetiredRow<T> {
    ptrs: Vec<*mut T>,
}

impl<T> RetiredRow<T> {
    fn new() -> Self {
        RetiredRow { ptrs: Vec::new() }
    }
}

/// The hazard-pointer registry: a fixed-size array of published pointers
/// plus one retired-node row per thread.
pub struct HazardPointers<T, const MAX_THREADS: usize, const RETIRED_THRESHOLD: usize> {
    hazard: Box<[CachePadded<AtomicPtr<T>>]>,
    retired: Box<[UnsafeCell<RetiredRow<T>>]>,
    num_threads: AtomicUsize,
}

// Safety: `hazard` is only ever touched through atomic operations.
// `retired[i]` is only ever touched by the holder of `ThreadHandle { id: i,
// .. }`, and a `ThreadHandle`'s mutating methods take `&mut self`, so two
// threads can never race on the same row through the safe API.
unsafe impl<T, const M: usize, const R: usize> Sync for HazardPointers<T, M, R> {}
// Safety: the raw pointers stored in `retired` rows are never dereferenced
// except by the owning thread's handle; moving the whole registry (e.g.
// into an `Arc`'s allocation) does not alias anything.
unsafe impl<T, const M: usize, const R: usize> Send for HazardPointers<T, M, R> {}

impl<T, const MAX_THREADS: usize, const RETIRED_THRESHOLD: usize>
    HazardPointers<T, MAX_THREADS, RETIRED_THRESHOLD>
{
    /// Creates a registry for up to `MAX_THREADS` threads, of which
    /// `num_threads` will actually register. All hazard slots and retired
    /// rows start empty (this plays the role of the C `initialize` call;
    /// in Rust that work happens for free at construction time).
    pub fn new(num_threads: usize) -> Self {
        assert!(
            num_threads <= MAX_THREADS,
            "num_threads {num_threads} exceeds MAX_THREADS {MAX_THREADS}"
        );
        let hazard = (0..MAX_THREADS)
            .map(|_| CachePadded::new(AtomicPtr::new(ptr::null_mut())))
            .collect();
        let retired = (0..MAX_THREADS)
            .map(|_| UnsafeCell::new(RetiredRow::new()))
            .collect();
        HazardPointers {
            hazard,
            retired,
            num_threads: AtomicUsize::new(num_threads),
        }
    }

    /// Binds the calling thread to `thread_id` for the lifetime of the
    /// returned handle. Preconditions: `thread_id < MAX_THREADS` and
    /// `thread_id` is within the registry's configured `num_threads`.
    pub fn register(&self, thread_id: usize) -> ThreadHandle<'_, T, MAX_THREADS, RETIRED_THRESHOLD> {
        assert!(
            thread_id < MAX_THREADS,
            "thread_id {thread_id} out of range (MAX_THREADS = {MAX_THREADS})"
        );
        assert!(
            thread_id < self.num_threads.load(Ordering::Acquire),
            "thread_id {thread_id} not within the registered num_threads"
        );
        ThreadHandle {
            hp: self,
            id: thread_id,
            _not_sync: PhantomData,
        }
    }

    /// Best-effort cleanup: zeroes every hazard slot and frees every
    /// retired node. The caller must guarantee no queue operation is in
    /// flight on any thread — this is not safe to call concurrently with
    /// `protect`/`retire`, and it does not check; it trusts quiescence the
    /// same way a queue's `delete` contract does.
    pub fn finalize(&self) {
        for slot in self.hazard.iter() {
            slot.store(ptr::null_mut(), Ordering::Relaxed);
        }
        for row_cell in self.retired.iter() {
            // Safety: caller-guaranteed quiescence means no thread holds a
            // `ThreadHandle` touching this row right now.
            let row = unsafe { &mut *row_cell.get() };
            for ptr in row.ptrs.drain(..) {
                unsafe {
                    drop(Box::from_raw(ptr));
                }
            }
        }
    }
}

/// A thread's capability to protect, clear, and retire pointers in one
/// [`HazardPointers`] registry. Not `Copy`/`Clone`: only one handle for a
/// given id should exist at a time, and its `&mut self` methods are the
/// mechanism that enforces single-threaded use of a handle.
pub struct ThreadHandle<'hp, T, const MAX_THREADS: usize, const RETIRED_THRESHOLD: usize> {
    hp: &'hp HazardPointers<T, MAX_THREADS, RETIRED_THRESHOLD>,
    id: usize,
    // `AtomicPtr`/raw pointers are already !Sync, but spell out the intent:
    // a handle is meant to live on one thread's stack, not be shared.
    _not_sync: PhantomData<std::cell::Cell<()>>,
}

impl<T, const MAX_THREADS: usize, const RETIRED_THRESHOLD: usize>
    ThreadHandle<'_, T, MAX_THREADS, RETIRED_THRESHOLD>
{
    /// Loads `atom`, publishes it as this thread's hazard, then reloads
    /// `atom` to confirm it hasn't changed since publication. Retries
    /// until the two loads agree, so the returned pointer is guaranteed
    /// to have been hazarded at the instant it was still live in `atom`.
    ///
    /// The publish-then-reload pair must use `SeqCst`: Release/Acquire
    /// only orders the hazard store against *that atomic*, not against a
    /// later load of the unrelated `atom` (the StoreLoad/Dekker case). A
    /// weaker ordering lets a concurrent `scan` observe `hazard[me]` as
    /// still null, free the node, while this thread has already decided
    /// the reload confirms it's live — a use-after-free that reproduces
    /// even on TSO hardware. `SeqCst` gives the store-before-load ordering
    /// the algorithm actually needs.
    pub fn protect(&mut self, atom: &AtomicPtr<T>) -> *mut T {
        loop {
            let candidate = atom.load(Ordering::SeqCst);
            self.hp.hazard[self.id].store(candidate, Ordering::SeqCst);
            if atom.load(Ordering::SeqCst) == candidate {
                return candidate;
            }
        }
    }

    /// Withdraws this thread's hazard publication. Must be called once the
    /// thread is done dereferencing the pointer returned by `protect`.
    pub fn clear(&mut self) {
        self.hp.hazard[self.id].store(ptr::null_mut(), Ordering::Release);
    }

    /// Schedules `ptr` for reclamation. Once this thread's retired row
    /// holds `RETIRED_THRESHOLD + 1` entries, runs a scan: every entry
    /// still referenced by some thread's hazard slot is kept (compacted to
    /// the front of the row); every other entry is freed.
    ///
    /// Retiring a pointer that is already retired is a contract violation
    /// (spec: undefined behavior) and is not checked here.
    pub fn retire(&mut self, ptr: *mut T) {
        // Safety: this row belongs exclusively to `self.id`, and `&mut
        // self` means no other call through this handle can be racing us.
        let row = unsafe { &mut *self.hp.retired[self.id].get() };
        row.ptrs.push(ptr);
        if row.ptrs.len() == RETIRED_THRESHOLD + 1 {
            self.scan(row);
        }
    }

    /// Partitions the retired row into pointers still hazarded by some
    /// thread (kept, compacted to the front) and pointers safe to free.
    /// Kept separate from the push/threshold bookkeeping in `retire` so
    /// compaction and rescanning aren't conflated into one step.
    fn scan(&self, row: &mut RetiredRow<T>) {
        let num_threads = self.hp.num_threads.load(Ordering::Acquire);
        // SeqCst to pair with `protect`'s SeqCst publish: a scan must never
        // observe a hazard slot as null while that publish is still
        // globally pending, or it could free a node a protecting thread
        // has already committed to dereferencing.
        let hazardous: HashSet<*mut T> = self.hp.hazard[..num_threads]
            .iter()
            .map(|slot| slot.load(Ordering::SeqCst))
            .filter(|p| !p.is_null())
            .collect();

        let mut survivors = Vec::with_capacity(row.ptrs.len());
        for ptr in row.ptrs.drain(..) {
            if hazardous.contains(&ptr) {
                survivors.push(ptr);
            } else {
                unsafe {
                    drop(Box::from_raw(ptr));
                }
            }
        }
        row.ptrs = survivors;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn protect_returns_current_value() {
        let hp = HazardPointers::<u32, 4, 8>::new(1);
        let mut handle = hp.register(0);
        let mut value = 7u32;
        let atom = AtomicPtr::new(&mut value as *mut u32);
        let protected = handle.protect(&atom);
        assert_eq!(protected, atom.load(Ordering::Acquire));
        handle.clear();
    }

    #[test]
    #[should_panic]
    fn register_out_of_range_panics() {
        let hp = HazardPointers::<u32, 4, 8>::new(1);
        let _ = hp.register(4);
    }

    #[test]
    #[should_panic]
    fn register_beyond_num_threads_panics() {
        let hp = HazardPointers::<u32, 4, 8>::new(1);
        let _ = hp.register(1);
    }

    /// A node retired while another thread's hazard slot still references
    /// it must survive the scan; once that hazard clears, a later scan
    /// reclaims it.
    #[test]
    fn retire_keeps_hazarded_node_until_cleared() {
        let hp: Arc<HazardPointers<u32, 4, 1>> = Arc::new(HazardPointers::new(2));

        let node = Box::into_raw(Box::new(11u32));
        let atom = AtomicPtr::new(node);

        let mut handle_b = hp.register(1);
        let protected = handle_b.protect(&atom);
        assert_eq!(protected, node);

        // Thread A retires `node` while B's hazard still holds it.
        {
            let mut handle_a = hp.register(0);
            handle_a.retire(node); // 1 entry, threshold is 1 -> no scan yet.
            handle_a.retire(Box::into_raw(Box::new(99u32))); // triggers scan at 2 entries.
        }
        // `node` must have survived: B's hazard[1] still equals it.
        let row = unsafe { &*hp.retired[0].get() };
        assert!(row.ptrs.contains(&node));
        drop(row);

        handle_b.clear();

        // A later scan (another retire past threshold) now reclaims it.
        let mut handle_a = hp.register(0);
        handle_a.retire(Box::into_raw(Box::new(1u32)));
        handle_a.retire(Box::into_raw(Box::new(2u32)));
        let row = unsafe { &*hp.retired[0].get() };
        assert!(!row.ptrs.contains(&node));
    }
}
