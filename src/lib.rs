//! A lock-free linked queue for Rust.
//!
//! This crate provides a multi-producer/multi-consumer FIFO queue built on nothing but
//! compare-and-swap, together with the hazard pointer memory management it needs and a
//! linearizability tester for checking it. The queue keeps a permanent dummy head and splices
//! dequeued nodes out from behind it; the tail pointer is either advanced eagerly after every
//! enqueue or left on the dummy, see [`TailPolicy`](structures::TailPolicy).

pub mod structures;
pub mod memory;
pub mod testing;
pub mod error;

pub use crate::error::QueueError;
