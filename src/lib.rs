//! Four MPMC unbounded FIFO queue designs, compared side by side, and the
//! hazard-pointer reclamation scheme the lock-free two of them share.
//!
//! - [`SimpleQueue`] — two-lock Michael–Scott queue, one value per node.
//! - [`RingsQueue`] — a linked list of fixed-capacity ring-buffer nodes,
//!   guarded by independent push/pop locks.
//! - [`LLQueue`] — lock-free, one value per node, reclaimed with hazard
//!   pointers.
//! - [`BLQueue`] — lock-free, values batched into fixed-size slot-array
//!   nodes, reclaimed with hazard pointers.
//!
//! All four share the same [`Value`] domain and expose the same abstract
//! surface (`new`/`push`/`pop`/`is_empty`, with `delete` expressed as
//! `Drop` rather than an explicit method, per Rust idiom). `LLQueue` and
//! `BLQueue` additionally require each participating thread to `register`
//! once and thread a [`hazard::ThreadHandle`] through their operations.

pub mod bl_queue;
pub mod diagnostics;
pub mod hazard;
pub mod ll_queue;
pub mod rings_queue;
pub mod simple_queue;
pub mod value;

pub use bl_queue::BLQueue;
pub use hazard::{HazardPointers, ThreadHandle};
pub use ll_queue::LLQueue;
pub use rings_queue::RingsQueue;
pub use simple_queue::SimpleQueue;
pub use value::{Value, EMPTY, TAKEN};
